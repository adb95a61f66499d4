//! The fixed-rate processing loop.

use std::sync::Arc;

use band_power::{check_signal_quality, MetricEngine, MetricError};
use eeg_sensor::{AcquisitionSource, DriverError};
use eeg_types::{ChannelMap, SignalQuality, TelemetryEvent};
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use crate::config::StreamTiming;
use crate::keys::KeySink;
use crate::session::SessionState;
use crate::telemetry::Telemetry;
use crate::trigger::{dispatch, TriggerEngine};

/// Errors that end a streaming session
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("acquisition failed: {0}")]
    Driver(#[from] DriverError),
    #[error("metric computation failed: {0}")]
    Metric(#[from] MetricError),
    #[error("shutdown requested before the stream was ready")]
    Cancelled,
}

/// Everything one running stream needs, shared by the loop and calibration runs.
pub struct StreamContext {
    pub source: Arc<dyn AcquisitionSource>,
    pub session: Arc<SessionState>,
    pub telemetry: Telemetry,
    pub sink: Arc<dyn KeySink>,
    pub engine: MetricEngine,
    pub timing: StreamTiming,
    /// Fixed for the lifetime of the stream
    pub channel_map: Arc<ChannelMap>,
    /// Every EEG row, checked for artifacts each cycle
    pub eeg_channels: Vec<usize>,
    /// Samples in one analysis window
    pub window_samples: usize,
}

impl StreamContext {
    pub fn new(
        source: Arc<dyn AcquisitionSource>,
        session: Arc<SessionState>,
        telemetry: Telemetry,
        sink: Arc<dyn KeySink>,
        timing: StreamTiming,
        channel_map: Arc<ChannelMap>,
    ) -> Result<Self, StreamError> {
        let descriptor = source.descriptor();
        let engine = MetricEngine::new(descriptor.sampling_rate)?;
        let window_samples = descriptor.samples_for(timing.window_seconds);
        // A window shorter than one Welch segment would fail every full cycle.
        if window_samples < engine.nfft() {
            return Err(MetricError::InsufficientSamples {
                needed: engine.nfft(),
                got: window_samples,
            }
            .into());
        }
        let eeg_channels = descriptor.eeg_channels.clone();

        Ok(Self {
            source,
            session,
            telemetry,
            sink,
            engine,
            timing,
            channel_map,
            eeg_channels,
            window_samples,
        })
    }
}

/// Run processing cycles until `shutdown_token` is cancelled or a cycle fails.
///
/// Each cycle reads the latest window, flags artifacts, computes and smooths
/// the region metrics, publishes them, and evaluates triggers unless a
/// calibration is running. Short windows are skipped. Pacing sleeps only the
/// remainder of the current cycle.
pub async fn run_stream_loop(ctx: Arc<StreamContext>, shutdown_token: CancellationToken) -> Result<(), StreamError> {
    let period = ctx.timing.cycle_period();
    let mut trigger = TriggerEngine::new(ctx.timing.cooldown());

    info!(
        left = ?ctx.channel_map.left,
        right = ?ctx.channel_map.right,
        window = ctx.window_samples,
        "Streaming loop started"
    );

    loop {
        if shutdown_token.is_cancelled() {
            break;
        }
        let started = Instant::now();

        run_cycle(&ctx, &mut trigger)?;

        let sleep_for = period.saturating_sub(started.elapsed());
        tokio::select! {
            biased;
            _ = shutdown_token.cancelled() => break,
            _ = tokio::time::sleep(sleep_for) => {}
        }
    }

    info!("Streaming loop stopped");
    Ok(())
}

fn run_cycle(ctx: &StreamContext, trigger: &mut TriggerEngine) -> Result<(), StreamError> {
    let window = ctx.source.current_window(ctx.window_samples)?;
    if window.sample_count() < ctx.window_samples {
        trace!(
            available = window.sample_count(),
            needed = ctx.window_samples,
            "Window not full yet, skipping cycle"
        );
        return Ok(());
    }

    let quality = check_signal_quality(&window, &ctx.eeg_channels, ctx.timing.artifact_threshold_uv)?;
    if quality.bad {
        debug!(max_std = quality.max_std, "Artifact detected");
        ctx.telemetry.publish(TelemetryEvent::SignalQuality {
            quality: SignalQuality::Bad,
        });
    }

    let session = &ctx.session;
    let mode = session.metric_mode();
    let raw = ctx.engine.compute_metrics(&window, &ctx.channel_map, mode)?;
    let smoothed = session.update_smoothed(&raw, session.smoothing_factor());

    let calibrating = session.is_calibrating();
    if !calibrating {
        debug!(
            mode = ?mode,
            left = smoothed.left,
            right = smoothed.right,
            "Smoothed metrics"
        );
    }

    ctx.telemetry.publish(TelemetryEvent::MetricSample {
        left_value: smoothed.left,
        right_value: smoothed.right,
    });

    if !calibrating {
        if let Some(region) = trigger.evaluate(smoothed, session.baselines(), session.sensitivity()) {
            dispatch(region, &session.key_binding(region), ctx.sink.as_ref(), &ctx.telemetry);
        }
    }
    Ok(())
}
