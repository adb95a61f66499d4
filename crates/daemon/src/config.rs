use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use eeg_types::{Settings, SettingsError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Timing of the streaming loop and session start.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamTiming {
    /// Processing cycles per second
    pub refresh_hz: f64,
    /// Length of the analysis window
    pub window_seconds: f64,
    /// Ring buffer size requested from the source, in samples per row
    pub buffer_size: usize,
    /// Pause after starting the stream so the buffer can fill
    pub fill_delay_ms: u64,
    /// Minimum spacing between two triggers of the same region
    pub cooldown_ms: u64,
    /// Channel standard deviation that flags a window as bad
    pub artifact_threshold_uv: f64,
}

impl Default for StreamTiming {
    fn default() -> Self {
        Self {
            refresh_hz: 5.0,
            window_seconds: 2.0,
            buffer_size: 450_000,
            fill_delay_ms: 3000,
            cooldown_ms: 1000,
            artifact_threshold_uv: band_power::ARTIFACT_THRESHOLD_UV,
        }
    }
}

impl StreamTiming {
    /// Saturates for rates too small to represent; `DaemonConfig::validate`
    /// rejects those up front.
    pub fn cycle_period(&self) -> Duration {
        Duration::try_from_secs_f64(1.0 / self.refresh_hz).unwrap_or(Duration::MAX)
    }

    pub fn fill_delay(&self) -> Duration {
        Duration::from_millis(self.fill_delay_ms)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }
}

/// Length and cadence of a calibration run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationPlan {
    pub duration_secs: u32,
    pub rate_hz: u32,
}

impl Default for CalibrationPlan {
    fn default() -> Self {
        Self {
            duration_secs: 10,
            rate_hz: 5,
        }
    }
}

impl CalibrationPlan {
    pub fn total_cycles(&self) -> u32 {
        self.duration_secs * self.rate_hz
    }

    pub fn period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.rate_hz as f64)
    }

    /// Whole seconds left at the start of `cycle`.
    pub fn countdown(&self, cycle: u32) -> u32 {
        self.duration_secs.saturating_sub(cycle / self.rate_hz)
    }
}

/// Options for the emulated board
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyntheticConfig {
    /// Seconds of history generated up front when the stream starts
    pub prefill_seconds: f64,
}

/// Configuration for the daemon
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Address the control server listens on
    pub bind_addr: SocketAddr,
    /// Initial session tunables
    pub settings: Settings,
    pub stream: StreamTiming,
    pub calibration: CalibrationPlan,
    pub synthetic: SyntheticConfig,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 5000)),
            settings: Settings::default(),
            stream: StreamTiming::default(),
            calibration: CalibrationPlan::default(),
            synthetic: SyntheticConfig::default(),
        }
    }
}

impl DaemonConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.settings.validate()?;

        let stream = &self.stream;
        let period_ok = stream.refresh_hz.is_finite()
            && stream.refresh_hz > 0.0
            && Duration::try_from_secs_f64(1.0 / stream.refresh_hz).is_ok();
        if !period_ok {
            return Err(ConfigError::Invalid(format!(
                "stream.refresh_hz must be a positive rate with a representable period, got {}",
                stream.refresh_hz
            )));
        }
        if !(stream.window_seconds.is_finite() && stream.window_seconds > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "stream.window_seconds must be positive, got {}",
                stream.window_seconds
            )));
        }
        if stream.buffer_size == 0 {
            return Err(ConfigError::Invalid("stream.buffer_size must be non-zero".to_string()));
        }
        if self.calibration.rate_hz == 0 || self.calibration.duration_secs == 0 {
            return Err(ConfigError::Invalid(
                "calibration.duration_secs and calibration.rate_hz must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read configuration file '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("could not parse configuration file '{path}': {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid settings: {0}")]
    Settings(#[from] SettingsError),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Load daemon configuration from a TOML file, or defaults when no path is given.
pub fn load_config(path: Option<&Path>) -> Result<DaemonConfig, ConfigError> {
    let config = match path {
        Some(path) => {
            let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;
            let config: DaemonConfig = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
            tracing::info!("Loaded configuration from {}", path.display());
            config
        }
        None => DaemonConfig::default(),
    };

    config.validate()?;
    Ok(config)
}
