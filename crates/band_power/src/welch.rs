use std::sync::Arc;

use apodize::hanning_iter;
use rustfft::{num_complex::Complex, Fft, FftPlanner};

use crate::MetricError;

/// FFT length used for a given sampling rate: the smallest power of two that
/// is at least one second of samples.
pub fn nfft_for(sampling_rate: u32) -> usize {
    (sampling_rate.max(1) as usize).next_power_of_two()
}

/// One-sided power spectral density.
#[derive(Debug, Clone, PartialEq)]
pub struct Psd {
    /// Power per bin (µV²/Hz when the input is in µV).
    pub power: Vec<f64>,
    /// Bin center frequencies in Hz, ascending from 0 to Nyquist.
    pub freqs: Vec<f64>,
}

/// Welch's method with a Hann window and 50% segment overlap.
#[derive(Clone)]
pub struct WelchPsd {
    nfft: usize,
    sampling_rate: f64,
    window: Vec<f64>,
    // Sum of squares of the window samples
    window_power: f64,
    fft: Arc<dyn Fft<f64>>,
}

impl WelchPsd {
    pub fn new(sampling_rate: u32) -> Result<Self, MetricError> {
        if sampling_rate == 0 {
            return Err(MetricError::InvalidSamplingRate);
        }
        let nfft = nfft_for(sampling_rate);
        let mut planner = FftPlanner::<f64>::new();
        let fft = planner.plan_fft_forward(nfft);
        let window: Vec<f64> = hanning_iter(nfft).collect();
        let window_power = window.iter().map(|w| w * w).sum();

        Ok(Self {
            nfft,
            sampling_rate: sampling_rate as f64,
            window,
            window_power,
            fft,
        })
    }

    pub fn nfft(&self) -> usize {
        self.nfft
    }

    /// Average the windowed periodograms of every full segment.
    pub fn compute(&self, samples: &[f64]) -> Result<Psd, MetricError> {
        if samples.len() < self.nfft {
            return Err(MetricError::InsufficientSamples {
                needed: self.nfft,
                got: samples.len(),
            });
        }

        let step = self.nfft - self.nfft / 2;
        let bins = self.nfft / 2 + 1;
        let mut power = vec![0.0; bins];
        let mut buffer = vec![Complex::new(0.0, 0.0); self.nfft];
        let mut segments = 0usize;

        let mut start = 0;
        while start + self.nfft <= samples.len() {
            let segment = &samples[start..start + self.nfft];
            for ((slot, &x), &w) in buffer.iter_mut().zip(segment).zip(&self.window) {
                *slot = Complex::new(x * w, 0.0);
            }
            self.fft.process(&mut buffer);

            for (acc, c) in power.iter_mut().zip(&buffer) {
                *acc += c.norm_sqr();
            }
            segments += 1;
            start += step;
        }

        let scaling = 1.0 / (self.sampling_rate * self.window_power * segments as f64);
        for (k, p) in power.iter_mut().enumerate() {
            *p *= scaling;
            // Fold negative frequencies in; DC and Nyquist have no mirror.
            if k != 0 && k != self.nfft / 2 {
                *p *= 2.0;
            }
        }

        let resolution = self.sampling_rate / self.nfft as f64;
        let freqs = (0..bins).map(|k| k as f64 * resolution).collect();

        Ok(Psd { power, freqs })
    }
}

/// Integrate PSD power between `low` and `high` Hz (inclusive) with the
/// trapezoidal rule.
pub fn band_power(psd: &Psd, low: f64, high: f64) -> Result<f64, MetricError> {
    if !(low >= 0.0 && high > low) {
        return Err(MetricError::InvalidBand { low, high });
    }

    let Some(start) = psd.freqs.iter().position(|&f| f >= low) else {
        return Ok(0.0);
    };
    let Some(end) = psd.freqs.iter().rposition(|&f| f <= high) else {
        return Ok(0.0);
    };
    if end <= start {
        return Ok(0.0);
    }

    let total = (start..end)
        .map(|i| {
            let df = psd.freqs[i + 1] - psd.freqs[i];
            0.5 * (psd.power[i] + psd.power[i + 1]) * df
        })
        .sum();
    Ok(total)
}
