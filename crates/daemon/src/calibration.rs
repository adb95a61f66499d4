//! Timed baseline collection.

use std::sync::Arc;

use eeg_types::{Baselines, CalibrationStatus, Region, RegionMap, TelemetryEvent, DEFAULT_BASELINE};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::CalibrationPlan;
use crate::session::SessionState;
use crate::streaming::{StreamContext, StreamError};

/// Raw region metrics collected over a calibration run.
#[derive(Debug, Clone, Default)]
pub struct CalibrationAccumulator {
    samples: RegionMap<Vec<f64>>,
}

impl CalibrationAccumulator {
    pub fn add(&mut self, region: Region, value: f64) {
        self.samples[region].push(value);
    }

    pub fn sample_count(&self, region: Region) -> usize {
        self.samples[region].len()
    }

    /// Mean per region; a region without samples falls back to the default baseline.
    pub fn baselines(&self) -> Baselines {
        self.samples.clone().map(|_, values| {
            if values.is_empty() {
                DEFAULT_BASELINE
            } else {
                values.iter().sum::<f64>() / values.len() as f64
            }
        })
    }
}

/// Holds the session's calibrating flag; clears it when dropped.
pub struct CalibrationGuard {
    session: Arc<SessionState>,
}

impl CalibrationGuard {
    /// Enter calibration, or `None` if the session is not streaming or is
    /// already calibrating.
    pub fn acquire(session: Arc<SessionState>) -> Option<Self> {
        if session.try_begin_calibration() {
            Some(Self { session })
        } else {
            None
        }
    }
}

impl Drop for CalibrationGuard {
    fn drop(&mut self) {
        self.session.end_calibration();
    }
}

/// Collect raw metrics for the planned duration and install their means as
/// the new baselines.
///
/// Returns `Ok(None)` when cancelled; baselines are then left untouched.
pub async fn run_calibration(
    ctx: Arc<StreamContext>,
    plan: CalibrationPlan,
    guard: CalibrationGuard,
    cancel: CancellationToken,
) -> Result<Option<Baselines>, StreamError> {
    let period = plan.period();
    let mut accumulator = CalibrationAccumulator::default();
    let mut last_countdown = None;

    info!(
        duration_secs = plan.duration_secs,
        rate_hz = plan.rate_hz,
        "Calibration started"
    );

    for cycle in 0..plan.total_cycles() {
        let started = Instant::now();

        let countdown = plan.countdown(cycle);
        if last_countdown != Some(countdown) {
            ctx.telemetry
                .publish(TelemetryEvent::CalibrationStatus(CalibrationStatus::Calibrating { countdown }));
            last_countdown = Some(countdown);
        }

        let window = ctx.source.current_window(ctx.window_samples)?;
        if window.sample_count() >= ctx.window_samples {
            let mode = ctx.session.metric_mode();
            for region in Region::ALL {
                if let Some(value) = ctx.engine.region_metric(&window, &ctx.channel_map[region], mode)? {
                    accumulator.add(region, value);
                }
            }
        } else {
            debug!(cycle, "Calibration window short, no sample taken");
        }

        let sleep_for = period.saturating_sub(started.elapsed());
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!("Calibration cancelled");
                return Ok(None);
            }
            _ = tokio::time::sleep(sleep_for) => {}
        }
    }

    let baselines = accumulator.baselines();
    ctx.session.set_baselines(baselines);
    drop(guard);

    ctx.telemetry
        .publish(TelemetryEvent::CalibrationStatus(CalibrationStatus::Complete { baselines }));
    ctx.telemetry.log(format!(
        "Calibration complete. Baselines: L={:.2}, R={:.2}",
        baselines.left, baselines.right
    ));
    Ok(Some(baselines))
}
