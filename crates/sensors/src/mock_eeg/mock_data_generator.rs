use std::f64::consts::PI;

use log::debug;
use rand::Rng;
use rand_distr::StandardNormal;

/// Scale from the unitless band weights to microvolts.
const AMPLITUDE_UV: f64 = 10.0;
/// Standard deviation of the broadband noise in microvolts.
const NOISE_UV: f64 = 1.0;

const DELTA_HZ: f64 = 2.5;
const THETA_HZ: f64 = 6.0;
const ALPHA_HZ: f64 = 10.0;
const BETA_HZ: f64 = 20.0;
const GAMMA_HZ: f64 = 40.0;

/// Relative amplitude of each band for one channel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BandWeights {
    pub delta: f64,
    pub theta: f64,
    pub alpha: f64,
    pub beta: f64,
    pub gamma: f64,
}

impl BandWeights {
    pub const fn new(delta: f64, theta: f64, alpha: f64, beta: f64, gamma: f64) -> Self {
        Self {
            delta,
            theta,
            alpha,
            beta,
            gamma,
        }
    }

    fn as_array(&self) -> [f64; 5] {
        [self.delta, self.theta, self.alpha, self.beta, self.gamma]
    }
}

// Frontal, central, parietal, occipital pairs
const BASE_CHANNEL_WEIGHTS: [BandWeights; 8] = [
    BandWeights::new(3.0, 1.5, 0.8, 0.4, 0.1),
    BandWeights::new(3.0, 1.5, 0.8, 0.4, 0.1),
    BandWeights::new(2.0, 1.2, 1.5, 0.6, 0.1),
    BandWeights::new(2.0, 1.2, 1.5, 0.6, 0.1),
    BandWeights::new(1.5, 1.0, 2.5, 0.7, 0.1),
    BandWeights::new(1.5, 1.0, 2.5, 0.7, 0.1),
    BandWeights::new(1.2, 0.8, 3.0, 0.5, 0.1),
    BandWeights::new(1.2, 0.8, 3.0, 0.5, 0.1),
];

/// A generator for EEG-like data with multiple frequency bands.
///
/// Each channel is a sum of band oscillators with random starting phases, a
/// little 50/60 Hz line noise and Gaussian broadband noise. Values are in µV.
#[derive(Debug, Clone)]
pub struct EegGenerator {
    sample_rate: f64,
    weights: Vec<BandWeights>,
    // [delta, theta, alpha, beta, gamma, line 50, line 60]
    phases: Vec<[f64; 7]>,
    line_noise_amplitude: Vec<f64>,
}

impl EegGenerator {
    pub fn new(sample_rate: u32, num_channels: usize) -> Self {
        let weights = (0..num_channels)
            .map(|i| BASE_CHANNEL_WEIGHTS[i % BASE_CHANNEL_WEIGHTS.len()])
            .collect();
        Self::with_weights(sample_rate, weights)
    }

    pub fn with_weights(sample_rate: u32, weights: Vec<BandWeights>) -> Self {
        let mut rng = rand::thread_rng();
        debug!(
            "Initializing EEG generator with {} Hz sample rate, {} channels",
            sample_rate,
            weights.len()
        );

        let phases = weights
            .iter()
            .map(|_| {
                let mut p = [0.0; 7];
                for phase in p.iter_mut() {
                    *phase = rng.gen::<f64>() * 2.0 * PI;
                }
                p
            })
            .collect();

        // Different channels pick up different amounts of line noise
        let line_noise_amplitude = weights.iter().map(|_| rng.gen_range(0.2..0.7)).collect();

        Self {
            sample_rate: sample_rate as f64,
            weights,
            phases,
            line_noise_amplitude,
        }
    }

    pub fn num_channels(&self) -> usize {
        self.weights.len()
    }

    /// Produce the next sample for `channel`, in µV. Unknown channels read 0.
    pub fn next_sample(&mut self, channel: usize) -> f64 {
        let (Some(phases), Some(weights)) = (self.phases.get_mut(channel), self.weights.get(channel)) else {
            return 0.0;
        };

        let freqs = [DELTA_HZ, THETA_HZ, ALPHA_HZ, BETA_HZ, GAMMA_HZ, 50.0, 60.0];
        for (phase, freq) in phases.iter_mut().zip(freqs) {
            *phase += 2.0 * PI * freq / self.sample_rate;
            // Wrap phases to avoid floating point precision issues
            if *phase > 2.0 * PI {
                *phase -= 2.0 * PI;
            }
        }

        let bands: f64 = weights
            .as_array()
            .iter()
            .zip(phases.iter())
            .map(|(w, p)| w * p.sin())
            .sum();

        let line = self.line_noise_amplitude[channel];
        let line_noise = phases[5].sin() * line * 0.7 + phases[6].sin() * line * 0.3;

        let noise: f64 = rand::thread_rng().sample::<f64, _>(StandardNormal) * NOISE_UV;

        (bands + line_noise) * AMPLITUDE_UV + noise
    }
}
