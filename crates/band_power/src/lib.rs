//! Spectral metrics for lateral engagement
//!
//! Welch power spectral density per channel, band power integration, and the
//! per-region metric (alpha power or beta/alpha ratio) the daemon smooths and
//! triggers on. Also hosts the signal quality check run on every window.

pub mod metrics;
pub mod quality;
pub mod welch;

pub use metrics::{MetricEngine, RawMetrics, ALPHA_BAND, BETA_BAND, MIN_ALPHA_POWER};
pub use quality::{check_signal_quality, QualityReport, ARTIFACT_THRESHOLD_UV};
pub use welch::{band_power, nfft_for, Psd, WelchPsd};

/// Errors raised while computing spectral metrics
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MetricError {
    #[error("channel {0} is not present in the sample window")]
    MissingChannel(usize),
    #[error("need at least {needed} samples for a Welch segment, got {got}")]
    InsufficientSamples { needed: usize, got: usize },
    #[error("invalid frequency band {low}-{high} Hz")]
    InvalidBand { low: f64, high: f64 },
    #[error("sampling rate must be positive")]
    InvalidSamplingRate,
}
