//! Serializes session commands: start, stop, calibrate and settings updates.

use std::sync::Arc;

use eeg_sensor::{AcquisitionSource, DriverError, DriverStatus, SourceParams, SyntheticBoard};
use eeg_types::{ConnectionState, ControlCommand, SettingsUpdate, StartSessionRequest, TelemetryEvent};
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::calibration::{run_calibration, CalibrationGuard};
use crate::channel_map::map_channels;
use crate::config::{CalibrationPlan, DaemonConfig, StreamTiming};
use crate::keys::KeySink;
use crate::session::SessionState;
use crate::streaming::{run_stream_loop, StreamContext, StreamError};
use crate::telemetry::Telemetry;

/// Bound on queued commands from all clients
pub const COMMAND_QUEUE_CAPACITY: usize = 32;

/// Opens acquisition sources for new sessions.
pub trait SourceFactory: Send + Sync {
    fn open(&self, params: &SourceParams) -> Result<Arc<dyn AcquisitionSource>, DriverError>;
}

/// Serves every device kind with an emulated board.
#[derive(Debug, Clone, Default)]
pub struct SyntheticSourceFactory {
    prefill_seconds: f64,
}

impl SyntheticSourceFactory {
    pub fn new(prefill_seconds: f64) -> Self {
        Self { prefill_seconds }
    }
}

impl SourceFactory for SyntheticSourceFactory {
    fn open(&self, params: &SourceParams) -> Result<Arc<dyn AcquisitionSource>, DriverError> {
        Ok(Arc::new(SyntheticBoard::new(params).with_prefill(self.prefill_seconds)))
    }
}

#[derive(Debug, Error)]
#[error("session controller is not running")]
pub struct ControllerClosed;

/// Cloneable sender side of the controller's command queue.
#[derive(Clone)]
pub struct ControllerHandle {
    tx: flume::Sender<ControlCommand>,
}

impl ControllerHandle {
    pub async fn send(&self, command: ControlCommand) -> Result<(), ControllerClosed> {
        self.tx.send_async(command).await.map_err(|_| ControllerClosed)
    }
}

struct ActiveStream {
    ctx: Arc<StreamContext>,
    token: CancellationToken,
    loop_task: JoinHandle<()>,
    calibration_task: Option<JoinHandle<()>>,
}

/// Owns the active stream and applies commands one at a time.
pub struct SessionController {
    session: Arc<SessionState>,
    telemetry: Telemetry,
    factory: Arc<dyn SourceFactory>,
    sink: Arc<dyn KeySink>,
    timing: StreamTiming,
    calibration: CalibrationPlan,
    active: Option<ActiveStream>,
    shutdown: CancellationToken,
}

impl SessionController {
    pub fn new(
        config: &DaemonConfig,
        session: Arc<SessionState>,
        telemetry: Telemetry,
        factory: Arc<dyn SourceFactory>,
        sink: Arc<dyn KeySink>,
    ) -> Self {
        Self {
            session,
            telemetry,
            factory,
            sink,
            timing: config.stream.clone(),
            calibration: config.calibration,
            active: None,
            shutdown: CancellationToken::new(),
        }
    }

    /// Start the controller task. It runs until `shutdown_token` is cancelled
    /// or every handle is dropped, and stops any active session on the way out.
    pub fn spawn(mut self, shutdown_token: CancellationToken) -> (ControllerHandle, JoinHandle<()>) {
        let (tx, rx) = flume::bounded(COMMAND_QUEUE_CAPACITY);
        self.shutdown = shutdown_token;
        let task = tokio::spawn(self.run(rx));
        (ControllerHandle { tx }, task)
    }

    async fn run(mut self, rx: flume::Receiver<ControlCommand>) {
        let shutdown_token = self.shutdown.clone();
        loop {
            tokio::select! {
                biased;
                _ = shutdown_token.cancelled() => break,
                command = rx.recv_async() => match command {
                    Ok(command) => self.handle(command).await,
                    Err(_) => break,
                },
            }
        }

        if self.active.is_some() {
            self.stop_session().await;
        }
        info!("Session controller stopped");
    }

    async fn handle(&mut self, command: ControlCommand) {
        debug!(command = command.name(), "Handling command");
        match command {
            ControlCommand::StartSession(request) => self.start_session(request).await,
            ControlCommand::StopSession => self.stop_session().await,
            ControlCommand::StartCalibration => self.start_calibration(),
            ControlCommand::UpdateSettings(update) => self.update_settings(update),
        }
    }

    async fn start_session(&mut self, request: StartSessionRequest) {
        if self.active.is_some() {
            self.telemetry.log("Stream is already running.");
            return;
        }

        let params = SourceParams::from(&request);
        self.telemetry.log(format!("Initializing {:?} board...", params.device));

        match self.open_stream(&params).await {
            Ok(active) => self.active = Some(active),
            Err(e) => {
                self.telemetry.error(format!("Error: {}", e));
                self.session.reset_after_stop();
                self.publish_connection(ConnectionState::Idle);
            }
        }
    }

    async fn open_stream(&self, params: &SourceParams) -> Result<ActiveStream, StreamError> {
        let source = self.factory.open(params)?;
        source.prepare_session()?;
        if let Err(e) = source.start_stream(self.timing.buffer_size) {
            close_source(source.as_ref());
            return Err(e.into());
        }

        self.session.reset_for_stream_start();
        self.session.set_connection(ConnectionState::Streaming);
        self.telemetry.log("Connection successful. Filling buffer...");
        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => {
                close_source(source.as_ref());
                return Err(StreamError::Cancelled);
            }
            _ = tokio::time::sleep(self.timing.fill_delay()) => {}
        }

        let channel_map = map_channels(&source.eeg_channels());
        self.session.set_channel_map(channel_map.clone());

        let ctx = match StreamContext::new(
            source.clone(),
            self.session.clone(),
            self.telemetry.clone(),
            self.sink.clone(),
            self.timing.clone(),
            Arc::new(channel_map),
        ) {
            Ok(ctx) => Arc::new(ctx),
            Err(e) => {
                close_source(source.as_ref());
                return Err(e);
            }
        };

        self.publish_connection(ConnectionState::Streaming);
        self.telemetry.log("Buffer filled. Ready for calibration.");

        let token = CancellationToken::new();
        let loop_ctx = ctx.clone();
        let loop_token = token.clone();
        let telemetry = self.telemetry.clone();
        let loop_task = tokio::spawn(async move {
            if let Err(e) = run_stream_loop(loop_ctx, loop_token).await {
                // The session stays marked as streaming until it is stopped.
                telemetry.error(format!("Streaming loop terminated: {}", e));
            }
        });

        Ok(ActiveStream {
            ctx,
            token,
            loop_task,
            calibration_task: None,
        })
    }

    async fn stop_session(&mut self) {
        if let Some(active) = self.active.take() {
            active.token.cancel();
            if let Err(e) = active.loop_task.await {
                warn!("Streaming task ended abnormally: {}", e);
            }
            if let Some(calibration_task) = active.calibration_task {
                if let Err(e) = calibration_task.await {
                    warn!("Calibration task ended abnormally: {}", e);
                }
            }
            close_source(active.ctx.source.as_ref());
        }

        self.session.reset_after_stop();
        self.telemetry.log("Stream stopped.");
        self.publish_connection(ConnectionState::Idle);
    }

    fn start_calibration(&mut self) {
        let Some(active) = self.active.as_mut() else {
            self.telemetry.log("Calibration needs an active stream.");
            return;
        };
        let Some(guard) = CalibrationGuard::acquire(self.session.clone()) else {
            self.telemetry.log("Calibration is already running.");
            return;
        };

        let ctx = active.ctx.clone();
        let cancel = active.token.child_token();
        let plan = self.calibration;
        let telemetry = self.telemetry.clone();
        active.calibration_task = Some(tokio::spawn(async move {
            if let Err(e) = run_calibration(ctx, plan, guard, cancel).await {
                telemetry.error(format!("Calibration failed: {}", e));
            }
        }));
    }

    fn update_settings(&self, update: SettingsUpdate) {
        match self.session.apply_settings(update) {
            Ok(()) => self.telemetry.log("Settings updated."),
            Err(e) => self.telemetry.warn(format!("Settings rejected: {}", e)),
        }
    }

    fn publish_connection(&self, status: ConnectionState) {
        self.telemetry.publish(TelemetryEvent::ConnectionStatus { status });
    }
}

/// Stop and release a source, logging rather than propagating failures.
fn close_source(source: &dyn AcquisitionSource) {
    if source.status() == DriverStatus::Running {
        if let Err(e) = source.stop_stream() {
            warn!("Failed to stop stream: {}", e);
        }
    }
    if let Err(e) = source.release_session() {
        warn!("Failed to release session: {}", e);
    }
}
