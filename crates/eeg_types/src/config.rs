//! Session tunables and device selection

use std::collections::HashMap;

use serde::{Deserialize, Deserializer, Serialize};

use crate::region::{Region, RegionMap};

/// Default connection timeout when the client omits it or sends garbage.
pub const DEFAULT_TIMEOUT_SECS: u64 = 20;

/// Which scalar is computed per region from the band powers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricMode {
    /// Alpha (7-13 Hz) band power.
    #[default]
    #[serde(alias = "alpha")]
    Power,
    /// Beta (13-30 Hz) over alpha power.
    #[serde(alias = "focus")]
    Ratio,
}

/// Types of supported acquisition devices
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    /// Synthetic generator with an 8 channel layout
    Synthetic,
    /// Interaxon Muse 2 headband
    Muse2,
    /// Interaxon Muse S headband
    MuseS,
}

/// Tunables that may change at any time while a session runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Multiple of the baseline a smoothed metric must exceed to fire.
    pub sensitivity: f64,
    /// EMA factor in (0, 1]; 1.0 disables smoothing.
    pub smoothing_factor: f64,
    pub metric_mode: MetricMode,
    /// "+"-joined key chords, one per region. Empty means unbound.
    pub key_bindings: RegionMap<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            sensitivity: 2.0,
            smoothing_factor: 0.2,
            metric_mode: MetricMode::Power,
            key_bindings: RegionMap::default(),
        }
    }
}

impl Settings {
    pub fn validate(&self) -> Result<(), SettingsError> {
        validate_sensitivity(self.sensitivity)?;
        validate_smoothing(self.smoothing_factor)
    }

    /// Apply a partial update. The update is checked as a whole first, so a
    /// rejected update leaves every field untouched.
    pub fn apply(&mut self, update: SettingsUpdate) -> Result<(), SettingsError> {
        if let Some(sensitivity) = update.sensitivity {
            validate_sensitivity(sensitivity)?;
        }
        if let Some(smoothing) = update.smoothing {
            validate_smoothing(smoothing)?;
        }

        if let Some(sensitivity) = update.sensitivity {
            self.sensitivity = sensitivity;
        }
        if let Some(smoothing) = update.smoothing {
            self.smoothing_factor = smoothing;
        }
        if let Some(mode) = update.metric_mode {
            self.metric_mode = mode;
        }
        if let Some(mut bindings) = update.key_bindings {
            // The client always sends the full binding table; a missing
            // region means the binding was cleared.
            self.key_bindings = RegionMap::new(
                bindings.remove(&Region::Left).unwrap_or_default(),
                bindings.remove(&Region::Right).unwrap_or_default(),
            );
        }
        Ok(())
    }
}

fn validate_sensitivity(value: f64) -> Result<(), SettingsError> {
    if !value.is_finite() || value <= 1.0 {
        return Err(SettingsError::Sensitivity(value));
    }
    Ok(())
}

fn validate_smoothing(value: f64) -> Result<(), SettingsError> {
    if !value.is_finite() || value <= 0.0 || value > 1.0 {
        return Err(SettingsError::Smoothing(value));
    }
    Ok(())
}

/// Partial settings update as sent by the client.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SettingsUpdate {
    #[serde(default, deserialize_with = "lenient_f64")]
    pub sensitivity: Option<f64>,
    #[serde(default)]
    pub key_bindings: Option<HashMap<Region, String>>,
    #[serde(default)]
    pub metric_mode: Option<MetricMode>,
    #[serde(default, alias = "smoothing_factor", deserialize_with = "lenient_f64")]
    pub smoothing: Option<f64>,
}

/// Errors raised when a settings update is out of range
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SettingsError {
    #[error("sensitivity must be a finite value above 1.0, got {0}")]
    Sensitivity(f64),
    #[error("smoothing factor must be in (0, 1], got {0}")]
    Smoothing(f64),
}

/// A number that may arrive as a JSON number or as a numeric string.
#[derive(Deserialize)]
#[serde(untagged)]
enum LooseNumber {
    Number(f64),
    Text(String),
}

fn lenient_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<LooseNumber>::deserialize(deserializer)? {
        None => Ok(None),
        Some(LooseNumber::Number(n)) => Ok(Some(n)),
        Some(LooseNumber::Text(text)) => text
            .trim()
            .parse::<f64>()
            .map(Some)
            .map_err(|_| serde::de::Error::custom(format!("expected a number, got '{}'", text))),
    }
}

/// Connection timeout in seconds; anything unparsable falls back to the default.
pub(crate) fn lenient_timeout<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let secs = match Option::<LooseNumber>::deserialize(deserializer)? {
        Some(LooseNumber::Number(n)) if n.is_finite() && n >= 0.0 => n as u64,
        Some(LooseNumber::Text(text)) => text.trim().parse::<u64>().unwrap_or(DEFAULT_TIMEOUT_SECS),
        _ => DEFAULT_TIMEOUT_SECS,
    };
    Ok(secs)
}

pub(crate) fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_SECS
}
