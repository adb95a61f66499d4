use eeg_types::SampleWindow;

use crate::MetricError;

/// Standard deviation above which a channel is treated as carrying artifacts.
pub const ARTIFACT_THRESHOLD_UV: f64 = 100.0;

/// Result of the per-window signal quality check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QualityReport {
    /// Largest channel standard deviation in the window.
    pub max_std: f64,
    pub bad: bool,
}

/// Flag the window as bad when any channel's standard deviation exceeds
/// `threshold`. Advisory only; callers keep processing either way.
pub fn check_signal_quality(
    window: &SampleWindow,
    channels: &[usize],
    threshold: f64,
) -> Result<QualityReport, MetricError> {
    let mut max_std: f64 = 0.0;
    for &ch in channels {
        let samples = window.channel(ch).ok_or(MetricError::MissingChannel(ch))?;
        max_std = max_std.max(std_dev(samples));
    }
    Ok(QualityReport {
        max_std,
        bad: max_std > threshold,
    })
}

/// Population standard deviation.
fn std_dev(samples: &[f64]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let n = samples.len() as f64;
    let mean = samples.iter().sum::<f64>() / n;
    let variance = samples.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
    variance.sqrt()
}
