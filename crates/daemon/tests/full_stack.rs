//! End-to-end behavior of the streaming loop, calibration and session
//! controller against a scripted acquisition source, on a paused clock.

use std::f64::consts::PI;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use band_power::MetricError;
use eeg_sensor::{AcquisitionSource, BoardDescriptor, DriverError, DriverStatus, SourceParams};
use eeg_types::{
    CalibrationStatus, ConnectionState, ControlCommand, DeviceKind, Region, SampleWindow, SettingsUpdate,
    SignalQuality, StartSessionRequest, TelemetryEvent,
};
use neurokey_daemon::calibration::{run_calibration, CalibrationGuard};
use neurokey_daemon::channel_map::map_channels;
use neurokey_daemon::config::{CalibrationPlan, DaemonConfig, StreamTiming};
use neurokey_daemon::keys::{KeyError, KeySink, KeyToken};
use neurokey_daemon::streaming::{run_stream_loop, StreamContext, StreamError};
use neurokey_daemon::{SessionController, SessionState, SourceFactory, Telemetry};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

const RATE: u32 = 256;
const EEG_ROWS: usize = 4;

/// Four EEG rows carrying a 10 Hz tone each, plus a counter row.
struct ScriptedSource {
    descriptor: BoardDescriptor,
    amplitudes: Mutex<[f64; EEG_ROWS]>,
    available: Mutex<usize>,
    fail_reads: AtomicBool,
    status: Mutex<DriverStatus>,
    calls: Mutex<Vec<&'static str>>,
}

impl ScriptedSource {
    /// Amplitudes are chosen so a 10 Hz tone carries `power` units of alpha power.
    fn with_alpha_power(left: f64, right: f64) -> Self {
        let left = (2.0 * left).sqrt();
        let right = (2.0 * right).sqrt();
        Self {
            descriptor: BoardDescriptor {
                device: DeviceKind::Synthetic,
                sampling_rate: RATE,
                eeg_channels: (0..EEG_ROWS).collect(),
                row_count: EEG_ROWS + 1,
                package_row: EEG_ROWS,
            },
            amplitudes: Mutex::new([left, left, right, right]),
            available: Mutex::new(usize::MAX),
            fail_reads: AtomicBool::new(false),
            status: Mutex::new(DriverStatus::NotInitialized),
            calls: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().clone()
    }
}

impl AcquisitionSource for ScriptedSource {
    fn descriptor(&self) -> &BoardDescriptor {
        &self.descriptor
    }

    fn prepare_session(&self) -> Result<(), DriverError> {
        self.calls.lock().push("prepare");
        *self.status.lock() = DriverStatus::Prepared;
        Ok(())
    }

    fn start_stream(&self, _buffer_size: usize) -> Result<(), DriverError> {
        self.calls.lock().push("start");
        *self.status.lock() = DriverStatus::Running;
        Ok(())
    }

    fn current_window(&self, sample_count: usize) -> Result<SampleWindow, DriverError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(DriverError::AcquisitionError("board unplugged".to_string()));
        }
        let count = sample_count.min(*self.available.lock());
        let amplitudes = *self.amplitudes.lock();
        let mut rows: Vec<Vec<f64>> = amplitudes
            .iter()
            .map(|amp| {
                (0..count)
                    .map(|i| amp * (2.0 * PI * 10.0 * i as f64 / RATE as f64).sin())
                    .collect()
            })
            .collect();
        rows.push((0..count).map(|i| (i % 256) as f64).collect());
        Ok(SampleWindow::new(rows))
    }

    fn stop_stream(&self) -> Result<(), DriverError> {
        self.calls.lock().push("stop");
        *self.status.lock() = DriverStatus::Prepared;
        Ok(())
    }

    fn release_session(&self) -> Result<(), DriverError> {
        self.calls.lock().push("release");
        *self.status.lock() = DriverStatus::NotInitialized;
        Ok(())
    }

    fn status(&self) -> DriverStatus {
        *self.status.lock()
    }
}

#[derive(Default)]
struct RecordingSink {
    presses: Mutex<Vec<(Instant, KeyToken)>>,
}

impl KeySink for RecordingSink {
    fn press(&self, key: KeyToken) -> Result<(), KeyError> {
        self.presses.lock().push((Instant::now(), key));
        Ok(())
    }

    fn release(&self, _key: KeyToken) -> Result<(), KeyError> {
        Ok(())
    }
}

fn bind_keys(session: &SessionState) {
    let bindings = [(Region::Left, "a".to_string()), (Region::Right, "b".to_string())]
        .into_iter()
        .collect();
    session
        .apply_settings(SettingsUpdate {
            key_bindings: Some(bindings),
            ..Default::default()
        })
        .unwrap();
}

fn stream_context(
    source: Arc<ScriptedSource>,
    session: Arc<SessionState>,
    telemetry: Telemetry,
    sink: Arc<RecordingSink>,
) -> Arc<StreamContext> {
    let channel_map = map_channels(&source.eeg_channels());
    Arc::new(
        StreamContext::new(
            source,
            session,
            telemetry,
            sink,
            StreamTiming::default(),
            Arc::new(channel_map),
        )
        .unwrap(),
    )
}

fn drain(rx: &mut broadcast::Receiver<TelemetryEvent>) -> Vec<TelemetryEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test(start_paused = true)]
async fn test_left_dominance_fires_once_per_cooldown() {
    let source = Arc::new(ScriptedSource::with_alpha_power(10.0, 1.0));
    let session = Arc::new(SessionState::default());
    session.set_connection(ConnectionState::Streaming);
    bind_keys(&session);
    let telemetry = Telemetry::default();
    let mut rx = telemetry.subscribe();
    let sink = Arc::new(RecordingSink::default());

    let ctx = stream_context(source, session.clone(), telemetry, sink.clone());
    assert_eq!(ctx.channel_map.left, vec![0, 1]);
    assert_eq!(ctx.channel_map.right, vec![2, 3]);

    let token = CancellationToken::new();
    let task = tokio::spawn(run_stream_loop(ctx, token.clone()));
    tokio::time::sleep(Duration::from_millis(5_100)).await;
    token.cancel();
    task.await.unwrap().unwrap();

    let presses = sink.presses.lock().clone();
    assert!((4..=6).contains(&presses.len()), "got {} presses", presses.len());
    assert!(presses.iter().all(|(_, key)| *key == KeyToken::Char('a')));
    for pair in presses.windows(2) {
        assert!(pair[1].0 - pair[0].0 >= Duration::from_secs(1));
    }

    let smoothed = session.smoothed();
    assert!((smoothed.left - 10.0).abs() < 1.0, "left {}", smoothed.left);
    assert!((smoothed.right - 1.0).abs() < 0.1, "right {}", smoothed.right);

    let events = drain(&mut rx);
    assert!(events
        .iter()
        .any(|e| matches!(e, TelemetryEvent::MetricSample { .. })));
    assert!(events
        .iter()
        .any(|e| e == &TelemetryEvent::log("State Detected: 'LEFT'. Pressing 'a'.")));
}

#[tokio::test(start_paused = true)]
async fn test_short_windows_are_skipped() {
    let source = Arc::new(ScriptedSource::with_alpha_power(10.0, 1.0));
    *source.available.lock() = 100;
    let session = Arc::new(SessionState::default());
    let telemetry = Telemetry::default();
    let mut rx = telemetry.subscribe();

    let ctx = stream_context(source, session, telemetry, Arc::new(RecordingSink::default()));
    let token = CancellationToken::new();
    let task = tokio::spawn(run_stream_loop(ctx, token.clone()));
    tokio::time::sleep(Duration::from_secs(1)).await;
    token.cancel();
    task.await.unwrap().unwrap();

    assert!(drain(&mut rx).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_artifact_is_flagged_without_blocking_triggers() {
    let source = Arc::new(ScriptedSource::with_alpha_power(10.0, 1.0));
    // Std of a 300 uV tone is about 212 uV, above the artifact threshold
    source.amplitudes.lock()[0] = 300.0;
    let session = Arc::new(SessionState::default());
    session.set_connection(ConnectionState::Streaming);
    bind_keys(&session);
    let telemetry = Telemetry::default();
    let mut rx = telemetry.subscribe();
    let sink = Arc::new(RecordingSink::default());

    let ctx = stream_context(source, session, telemetry, sink.clone());
    let token = CancellationToken::new();
    let task = tokio::spawn(run_stream_loop(ctx, token.clone()));
    tokio::time::sleep(Duration::from_millis(1_100)).await;
    token.cancel();
    task.await.unwrap().unwrap();

    let events = drain(&mut rx);
    let bad = TelemetryEvent::SignalQuality {
        quality: SignalQuality::Bad,
    };
    let first_bad = events.iter().position(|e| e == &bad).expect("no signal quality event");
    assert!(events[first_bad + 1..]
        .iter()
        .any(|e| matches!(e, TelemetryEvent::MetricSample { left_value, .. } if *left_value > 1_000.0)));

    let presses = sink.presses.lock().clone();
    assert!(!presses.is_empty());
    assert!(presses.iter().all(|(_, key)| *key == KeyToken::Char('a')));
}

#[tokio::test(start_paused = true)]
async fn test_window_shorter_than_segment_is_rejected() {
    let source = Arc::new(ScriptedSource::with_alpha_power(1.0, 1.0));
    let channel_map = map_channels(&source.eeg_channels());
    let timing = StreamTiming {
        window_seconds: 0.5,
        ..StreamTiming::default()
    };

    let result = StreamContext::new(
        source,
        Arc::new(SessionState::default()),
        Telemetry::default(),
        Arc::new(RecordingSink::default()),
        timing,
        Arc::new(channel_map),
    );
    assert!(matches!(
        result,
        Err(StreamError::Metric(MetricError::InsufficientSamples { needed: 256, got: 128 }))
    ));
}

#[tokio::test(start_paused = true)]
async fn test_read_error_ends_loop() {
    let source = Arc::new(ScriptedSource::with_alpha_power(1.0, 1.0));
    source.fail_reads.store(true, Ordering::SeqCst);
    let ctx = stream_context(
        source,
        Arc::new(SessionState::default()),
        Telemetry::default(),
        Arc::new(RecordingSink::default()),
    );

    let result = run_stream_loop(ctx, CancellationToken::new()).await;
    assert!(matches!(result, Err(StreamError::Driver(DriverError::AcquisitionError(_)))));
}

#[tokio::test(start_paused = true)]
async fn test_calibration_sets_baselines_and_suppresses_triggers() {
    let source = Arc::new(ScriptedSource::with_alpha_power(10.0, 1.0));
    let session = Arc::new(SessionState::default());
    session.set_connection(ConnectionState::Streaming);
    bind_keys(&session);
    let telemetry = Telemetry::default();
    let mut rx = telemetry.subscribe();
    let sink = Arc::new(RecordingSink::default());
    let ctx = stream_context(source, session.clone(), telemetry, sink.clone());

    let guard = CalibrationGuard::acquire(session.clone()).unwrap();
    let token = CancellationToken::new();
    let loop_task = tokio::spawn(run_stream_loop(ctx.clone(), token.clone()));
    let baselines = run_calibration(ctx, CalibrationPlan::default(), guard, token.child_token())
        .await
        .unwrap()
        .unwrap();
    token.cancel();
    loop_task.await.unwrap().unwrap();

    assert!(!session.is_calibrating());
    assert!((baselines.left - 10.0).abs() < 1.0, "left {}", baselines.left);
    assert!((baselines.right - 1.0).abs() < 0.1, "right {}", baselines.right);
    assert_eq!(session.baselines(), baselines);
    // Left stays at its baseline afterwards, below baseline * sensitivity
    assert!(sink.presses.lock().is_empty());

    let countdowns: Vec<u32> = drain(&mut rx)
        .into_iter()
        .filter_map(|e| match e {
            TelemetryEvent::CalibrationStatus(CalibrationStatus::Calibrating { countdown }) => Some(countdown),
            TelemetryEvent::CalibrationStatus(CalibrationStatus::Complete { baselines: b }) => {
                assert_eq!(b, baselines);
                None
            }
            _ => None,
        })
        .collect();
    assert_eq!(countdowns, (1..=10).rev().collect::<Vec<u32>>());
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_calibration_keeps_baselines() {
    let source = Arc::new(ScriptedSource::with_alpha_power(10.0, 1.0));
    let session = Arc::new(SessionState::default());
    session.set_connection(ConnectionState::Streaming);
    let ctx = stream_context(source, session.clone(), Telemetry::default(), Arc::new(RecordingSink::default()));

    let guard = CalibrationGuard::acquire(session.clone()).unwrap();
    let cancel = CancellationToken::new();
    let task = tokio::spawn(run_calibration(ctx, CalibrationPlan::default(), guard, cancel.clone()));
    tokio::time::sleep(Duration::from_secs(3)).await;
    cancel.cancel();

    assert_eq!(task.await.unwrap().unwrap(), None);
    assert!(!session.is_calibrating());
    assert_eq!(session.baselines(), eeg_types::default_baselines());
}

struct ScriptedFactory {
    source: Arc<ScriptedSource>,
    fail: bool,
}

impl SourceFactory for ScriptedFactory {
    fn open(&self, _params: &SourceParams) -> Result<Arc<dyn AcquisitionSource>, DriverError> {
        if self.fail {
            return Err(DriverError::HardwareNotFound("no headset in range".to_string()));
        }
        Ok(self.source.clone())
    }
}

fn test_config() -> DaemonConfig {
    let mut config = DaemonConfig::default();
    config.stream.fill_delay_ms = 100;
    config
}

fn start_request() -> ControlCommand {
    ControlCommand::StartSession(StartSessionRequest {
        device: DeviceKind::Muse2,
        address: None,
        timeout: 20,
    })
}

async fn next_matching(
    rx: &mut broadcast::Receiver<TelemetryEvent>,
    mut predicate: impl FnMut(&TelemetryEvent) -> bool,
) -> TelemetryEvent {
    loop {
        let event = tokio::time::timeout(Duration::from_secs(30), rx.recv())
            .await
            .expect("timed out waiting for telemetry")
            .unwrap();
        if predicate(&event) {
            return event;
        }
    }
}

fn log_contains(text: &'static str) -> impl FnMut(&TelemetryEvent) -> bool {
    move |event| matches!(event, TelemetryEvent::LogMessage { message } if message.contains(text))
}

#[tokio::test(start_paused = true)]
async fn test_controller_session_lifecycle() {
    let source = Arc::new(ScriptedSource::with_alpha_power(1.0, 1.0));
    let session = Arc::new(SessionState::default());
    let telemetry = Telemetry::default();
    let mut rx = telemetry.subscribe();
    let factory = Arc::new(ScriptedFactory {
        source: source.clone(),
        fail: false,
    });
    let controller = SessionController::new(
        &test_config(),
        session.clone(),
        telemetry,
        factory,
        Arc::new(RecordingSink::default()),
    );
    let shutdown = CancellationToken::new();
    let (handle, task) = controller.spawn(shutdown.clone());

    handle.send(start_request()).await.unwrap();
    next_matching(&mut rx, |e| {
        e == &TelemetryEvent::ConnectionStatus {
            status: ConnectionState::Streaming,
        }
    })
    .await;
    assert!(session.is_streaming());
    assert_eq!(session.channel_map().unwrap().left, vec![0, 1]);
    next_matching(&mut rx, |e| matches!(e, TelemetryEvent::MetricSample { .. })).await;

    handle.send(start_request()).await.unwrap();
    next_matching(&mut rx, log_contains("Stream is already running.")).await;

    handle
        .send(ControlCommand::UpdateSettings(SettingsUpdate {
            smoothing: Some(5.0),
            ..Default::default()
        }))
        .await
        .unwrap();
    next_matching(&mut rx, log_contains("Settings rejected")).await;
    assert_eq!(session.smoothing_factor(), 0.2);

    handle.send(ControlCommand::StopSession).await.unwrap();
    next_matching(&mut rx, |e| {
        e == &TelemetryEvent::ConnectionStatus {
            status: ConnectionState::Idle,
        }
    })
    .await;
    assert!(!session.is_streaming());
    assert!(session.channel_map().is_none());
    assert_eq!(source.calls(), vec!["prepare", "start", "stop", "release"]);

    handle.send(ControlCommand::StartCalibration).await.unwrap();
    next_matching(&mut rx, log_contains("Calibration needs an active stream.")).await;
    assert!(!session.is_calibrating());

    shutdown.cancel();
    task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_controller_connection_failure_reverts_to_idle() {
    let factory = Arc::new(ScriptedFactory {
        source: Arc::new(ScriptedSource::with_alpha_power(1.0, 1.0)),
        fail: true,
    });
    let session = Arc::new(SessionState::default());
    let telemetry = Telemetry::default();
    let mut rx = telemetry.subscribe();
    let controller = SessionController::new(
        &test_config(),
        session.clone(),
        telemetry,
        factory,
        Arc::new(RecordingSink::default()),
    );
    let shutdown = CancellationToken::new();
    let (handle, task) = controller.spawn(shutdown.clone());

    handle.send(start_request()).await.unwrap();
    next_matching(&mut rx, log_contains("no headset in range")).await;
    next_matching(&mut rx, |e| {
        e == &TelemetryEvent::ConnectionStatus {
            status: ConnectionState::Idle,
        }
    })
    .await;
    assert!(!session.is_streaming());

    shutdown.cancel();
    task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_stops_active_session() {
    let source = Arc::new(ScriptedSource::with_alpha_power(1.0, 1.0));
    let session = Arc::new(SessionState::default());
    let telemetry = Telemetry::default();
    let mut rx = telemetry.subscribe();
    let controller = SessionController::new(
        &test_config(),
        session.clone(),
        telemetry,
        Arc::new(ScriptedFactory {
            source: source.clone(),
            fail: false,
        }),
        Arc::new(RecordingSink::default()),
    );
    let shutdown = CancellationToken::new();
    let (handle, task) = controller.spawn(shutdown.clone());

    handle.send(start_request()).await.unwrap();
    handle.send(ControlCommand::StartCalibration).await.unwrap();
    next_matching(&mut rx, |e| matches!(e, TelemetryEvent::CalibrationStatus(_))).await;
    assert!(session.is_calibrating());

    shutdown.cancel();
    task.await.unwrap();
    tokio::task::yield_now().await;

    assert!(!session.is_streaming());
    assert_eq!(source.status(), DriverStatus::NotInitialized);
    assert!(handle.send(ControlCommand::StopSession).await.is_err());
}

#[tokio::test(start_paused = true)]
async fn test_short_window_config_fails_session_start() {
    let source = Arc::new(ScriptedSource::with_alpha_power(1.0, 1.0));
    let session = Arc::new(SessionState::default());
    let telemetry = Telemetry::default();
    let mut rx = telemetry.subscribe();
    let mut config = test_config();
    config.stream.window_seconds = 0.5;
    let controller = SessionController::new(
        &config,
        session.clone(),
        telemetry,
        Arc::new(ScriptedFactory {
            source: source.clone(),
            fail: false,
        }),
        Arc::new(RecordingSink::default()),
    );
    let shutdown = CancellationToken::new();
    let (handle, task) = controller.spawn(shutdown.clone());

    handle.send(start_request()).await.unwrap();
    next_matching(&mut rx, log_contains("need at least 256 samples")).await;
    next_matching(&mut rx, |e| {
        e == &TelemetryEvent::ConnectionStatus {
            status: ConnectionState::Idle,
        }
    })
    .await;
    assert!(!session.is_streaming());
    assert_eq!(source.calls(), vec!["prepare", "start", "stop", "release"]);

    shutdown.cancel();
    task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_interrupts_buffer_fill() {
    let source = Arc::new(ScriptedSource::with_alpha_power(1.0, 1.0));
    let session = Arc::new(SessionState::default());
    let telemetry = Telemetry::default();
    let mut rx = telemetry.subscribe();
    let mut config = test_config();
    config.stream.fill_delay_ms = 3_000;
    let controller = SessionController::new(
        &config,
        session.clone(),
        telemetry,
        Arc::new(ScriptedFactory {
            source: source.clone(),
            fail: false,
        }),
        Arc::new(RecordingSink::default()),
    );
    let shutdown = CancellationToken::new();
    let (handle, task) = controller.spawn(shutdown.clone());

    handle.send(start_request()).await.unwrap();
    next_matching(&mut rx, log_contains("Filling buffer")).await;
    let cancelled_at = Instant::now();
    shutdown.cancel();
    task.await.unwrap();

    assert!(cancelled_at.elapsed() < Duration::from_secs(1));
    assert!(!session.is_streaming());
    assert_eq!(source.status(), DriverStatus::NotInitialized);
    assert_eq!(source.calls(), vec!["prepare", "start", "stop", "release"]);
    assert!(!drain(&mut rx).iter().any(|e| e
        == &TelemetryEvent::ConnectionStatus {
            status: ConnectionState::Streaming,
        }));
}
