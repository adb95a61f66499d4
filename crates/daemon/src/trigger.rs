//! Threshold decisions, refractory control and key dispatch.

use std::time::Duration;

use eeg_types::{Baselines, Region, RegionMap};
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::keys::{KeyChord, KeySink};
use crate::telemetry::Telemetry;

/// Decide which region, if any, dominates this cycle.
///
/// Left wins when it exceeds its scaled baseline and is strictly above right;
/// right is checked the same way only if left did not fire. A tie fires neither.
pub fn decide(smoothed: RegionMap<f64>, baselines: Baselines, sensitivity: f64) -> Option<Region> {
    let RegionMap { left, right } = smoothed;
    if left > baselines.left * sensitivity && left > right {
        Some(Region::Left)
    } else if right > baselines.right * sensitivity && right > left {
        Some(Region::Right)
    } else {
        None
    }
}

/// Per-region cooldown around [`decide`].
#[derive(Debug, Clone)]
pub struct TriggerEngine {
    cooldown: Duration,
    last_fired: RegionMap<Option<Instant>>,
}

impl TriggerEngine {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            last_fired: RegionMap::default(),
        }
    }

    pub fn evaluate(&mut self, smoothed: RegionMap<f64>, baselines: Baselines, sensitivity: f64) -> Option<Region> {
        self.evaluate_at(smoothed, baselines, sensitivity, Instant::now())
    }

    /// Like [`evaluate`](Self::evaluate) with an explicit clock reading.
    /// A suppressed firing leaves the cooldown state untouched.
    pub fn evaluate_at(
        &mut self,
        smoothed: RegionMap<f64>,
        baselines: Baselines,
        sensitivity: f64,
        now: Instant,
    ) -> Option<Region> {
        let region = decide(smoothed, baselines, sensitivity)?;

        if let Some(last) = self.last_fired[region] {
            if now.saturating_duration_since(last) < self.cooldown {
                trace!(region = %region, "Trigger suppressed by cooldown");
                return None;
            }
        }
        self.last_fired[region] = Some(now);
        Some(region)
    }
}

/// Inject the chord bound to `region`. Failures are reported, never raised.
pub fn dispatch(region: Region, binding: &str, sink: &dyn KeySink, telemetry: &Telemetry) {
    if binding.is_empty() {
        debug!(region = %region, "No key bound");
        return;
    }

    telemetry.log(format!(
        "State Detected: '{}'. Pressing '{}'.",
        region.as_str().to_uppercase(),
        binding
    ));

    let result = KeyChord::parse(binding).and_then(|chord| match chord {
        Some(chord) => chord.send(sink),
        None => Ok(()),
    });
    if let Err(e) = result {
        telemetry.warn(format!("Error pressing key '{}': {}", binding, e));
    }
}
