use eeg_types::{ChannelMap, MetricMode, RegionMap, SampleWindow};
use tracing::trace;

use crate::welch::{band_power, WelchPsd};
use crate::MetricError;

/// Alpha band edges in Hz.
pub const ALPHA_BAND: (f64, f64) = (7.0, 13.0);
/// Beta band edges in Hz.
pub const BETA_BAND: (f64, f64) = (13.0, 30.0);
/// Channels with less alpha power than this are left out of ratio averages.
pub const MIN_ALPHA_POWER: f64 = 0.001;

/// Raw per-region metrics for one window. `None` marks a region with no
/// channels, which is skipped rather than reported.
pub type RawMetrics = RegionMap<Option<f64>>;

/// Computes one scalar per region from a multichannel sample window.
#[derive(Clone)]
pub struct MetricEngine {
    welch: WelchPsd,
    sampling_rate: u32,
}

impl MetricEngine {
    pub fn new(sampling_rate: u32) -> Result<Self, MetricError> {
        Ok(Self {
            welch: WelchPsd::new(sampling_rate)?,
            sampling_rate,
        })
    }

    pub fn sampling_rate(&self) -> u32 {
        self.sampling_rate
    }

    pub fn nfft(&self) -> usize {
        self.welch.nfft()
    }

    /// Metric of a single channel, or `None` when the channel does not qualify
    /// (ratio mode with near-zero alpha power).
    pub fn channel_metric(&self, samples: &[f64], mode: MetricMode) -> Result<Option<f64>, MetricError> {
        let psd = self.welch.compute(samples)?;
        let alpha = band_power(&psd, ALPHA_BAND.0, ALPHA_BAND.1)?;

        match mode {
            MetricMode::Power => Ok(Some(alpha)),
            MetricMode::Ratio => {
                if alpha > MIN_ALPHA_POWER {
                    let beta = band_power(&psd, BETA_BAND.0, BETA_BAND.1)?;
                    Ok(Some(beta / alpha))
                } else {
                    Ok(None)
                }
            }
        }
    }

    /// Mean metric over the qualifying channels of a region, or `None` when
    /// no channel qualifies.
    pub fn region_metric(
        &self,
        window: &SampleWindow,
        channels: &[usize],
        mode: MetricMode,
    ) -> Result<Option<f64>, MetricError> {
        let mut sum = 0.0;
        let mut included = 0usize;

        for &ch in channels {
            let samples = window.channel(ch).ok_or(MetricError::MissingChannel(ch))?;
            if let Some(value) = self.channel_metric(samples, mode)? {
                sum += value;
                included += 1;
            } else {
                trace!(channel = ch, "channel excluded from region average");
            }
        }

        if included == 0 {
            return Ok(None);
        }
        Ok(Some(sum / included as f64))
    }

    /// Metrics for both regions. A region with no qualifying channel reads 0.0;
    /// a region with an empty channel list is `None`.
    pub fn compute_metrics(
        &self,
        window: &SampleWindow,
        channel_map: &ChannelMap,
        mode: MetricMode,
    ) -> Result<RawMetrics, MetricError> {
        let left = self.region_or_skip(window, &channel_map.left, mode)?;
        let right = self.region_or_skip(window, &channel_map.right, mode)?;
        Ok(RegionMap::new(left, right))
    }

    fn region_or_skip(
        &self,
        window: &SampleWindow,
        channels: &[usize],
        mode: MetricMode,
    ) -> Result<Option<f64>, MetricError> {
        if channels.is_empty() {
            return Ok(None);
        }
        Ok(Some(self.region_metric(window, channels, mode)?.unwrap_or(0.0)))
    }
}
