use eeg_types::TelemetryEvent;
use tokio::sync::broadcast;
use tracing::{error, info, trace, warn};

/// Capacity of the telemetry broadcast channel
pub const TELEMETRY_CAPACITY: usize = 256;

/// Fan-out of telemetry events to every connected client.
#[derive(Clone)]
pub struct Telemetry {
    tx: broadcast::Sender<TelemetryEvent>,
}

impl Telemetry {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TelemetryEvent> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: TelemetryEvent) {
        if self.tx.send(event).is_err() {
            trace!("No telemetry subscribers");
        }
    }

    /// Publish a log message and mirror it to the tracing log.
    pub fn log(&self, message: impl Into<String>) {
        let message = message.into();
        info!("{}", message);
        self.publish(TelemetryEvent::log(message));
    }

    pub fn warn(&self, message: impl Into<String>) {
        let message = message.into();
        warn!("{}", message);
        self.publish(TelemetryEvent::log(message));
    }

    pub fn error(&self, message: impl Into<String>) {
        let message = message.into();
        error!("{}", message);
        self.publish(TelemetryEvent::log(message));
    }
}

impl Default for Telemetry {
    fn default() -> Self {
        Self::new(TELEMETRY_CAPACITY)
    }
}
