//! Control and telemetry events
//!
//! Inbound [`ControlCommand`]s arrive from the client transport and are handled
//! one at a time by the session controller. Outbound [`TelemetryEvent`]s are
//! broadcast to every connected client. Both are JSON objects tagged by `type`.

use serde::{Deserialize, Serialize};

use crate::config::{default_timeout, lenient_timeout, DeviceKind, SettingsUpdate};
use crate::region::Baselines;

/// Whether an acquisition session is active.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    Idle,
    Streaming,
}

/// Parameters for opening an acquisition session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartSessionRequest {
    pub device: DeviceKind,
    /// MAC address or device name, when the device needs one.
    #[serde(default, alias = "mac_address")]
    pub address: Option<String>,
    #[serde(default = "default_timeout", deserialize_with = "lenient_timeout")]
    pub timeout: u64,
}

/// Commands sent by the client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlCommand {
    StartSession(StartSessionRequest),
    StopSession,
    StartCalibration,
    UpdateSettings(SettingsUpdate),
}

impl ControlCommand {
    pub fn name(&self) -> &'static str {
        match self {
            ControlCommand::StartSession(_) => "start_session",
            ControlCommand::StopSession => "stop_session",
            ControlCommand::StartCalibration => "start_calibration",
            ControlCommand::UpdateSettings(_) => "update_settings",
        }
    }
}

/// Progress of a calibration run
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CalibrationStatus {
    /// Still collecting; `countdown` is the remaining whole seconds.
    Calibrating { countdown: u32 },
    /// Finished; the new baselines are in effect.
    Complete { baselines: Baselines },
}

/// Advisory signal quality flag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalQuality {
    Bad,
}

/// Events published to every connected client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TelemetryEvent {
    ConnectionStatus {
        status: ConnectionState,
    },
    CalibrationStatus(CalibrationStatus),
    SignalQuality {
        quality: SignalQuality,
    },
    /// Smoothed per-region metrics for one processing cycle.
    #[serde(rename = "metric_data")]
    MetricSample {
        left_value: f64,
        right_value: f64,
    },
    LogMessage {
        message: String,
    },
}

impl TelemetryEvent {
    pub fn log(message: impl Into<String>) -> Self {
        TelemetryEvent::LogMessage {
            message: message.into(),
        }
    }

    /// Get a human-readable description of the event type
    pub fn event_type_name(&self) -> &'static str {
        match self {
            TelemetryEvent::ConnectionStatus { .. } => "ConnectionStatus",
            TelemetryEvent::CalibrationStatus(_) => "CalibrationStatus",
            TelemetryEvent::SignalQuality { .. } => "SignalQuality",
            TelemetryEvent::MetricSample { .. } => "MetricSample",
            TelemetryEvent::LogMessage { .. } => "LogMessage",
        }
    }
}
