//! Common types and traits for acquisition sources

use std::time::Duration;

use eeg_types::{DeviceKind, SampleWindow, StartSessionRequest};
use thiserror::Error;

/// Static layout of a supported device.
#[derive(Debug, Clone, PartialEq)]
pub struct BoardDescriptor {
    pub device: DeviceKind,
    /// Samples per second per row.
    pub sampling_rate: u32,
    /// Row indices carrying EEG data, ascending.
    pub eeg_channels: Vec<usize>,
    /// Total rows returned by a window read.
    pub row_count: usize,
    /// Row holding the package counter.
    pub package_row: usize,
}

impl BoardDescriptor {
    pub fn for_device(device: DeviceKind) -> Self {
        match device {
            DeviceKind::Synthetic => Self {
                device,
                sampling_rate: 250,
                eeg_channels: (1..=8).collect(),
                row_count: 10,
                package_row: 0,
            },
            // TP9, AF7, AF8, TP10
            DeviceKind::Muse2 | DeviceKind::MuseS => Self {
                device,
                sampling_rate: 256,
                eeg_channels: (1..=4).collect(),
                row_count: 6,
                package_row: 0,
            },
        }
    }

    /// Samples needed for a window of the given duration.
    pub fn samples_for(&self, seconds: f64) -> usize {
        (self.sampling_rate as f64 * seconds) as usize
    }
}

/// Connection parameters for a session
#[derive(Debug, Clone, PartialEq)]
pub struct SourceParams {
    pub device: DeviceKind,
    pub address: Option<String>,
    pub timeout: Duration,
}

impl From<&StartSessionRequest> for SourceParams {
    fn from(req: &StartSessionRequest) -> Self {
        Self {
            device: req.device,
            address: req.address.clone().filter(|a| !a.trim().is_empty()),
            timeout: Duration::from_secs(req.timeout),
        }
    }
}

/// Status of an acquisition source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverStatus {
    /// No session prepared
    NotInitialized,
    /// Session prepared, not streaming
    Prepared,
    /// Actively streaming samples
    Running,
}

/// Errors that can occur in acquisition sources
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DriverError {
    /// Hardware is missing or held by another session
    #[error("Hardware not found: {0}")]
    HardwareNotFound(String),
    /// Invalid configuration
    #[error("Configuration error: {0}")]
    ConfigurationError(String),
    /// A lifecycle call arrived in the wrong state
    #[error("Invalid driver state: expected {expected:?}, found {actual:?}")]
    InvalidState {
        expected: DriverStatus,
        actual: DriverStatus,
    },
    /// Timeout error
    #[error("Timeout error: {0}")]
    TimeoutError(String),
    /// Acquisition error
    #[error("Acquisition error: {0}")]
    AcquisitionError(String),
}

/// Trait that all acquisition sources must implement
///
/// Methods take `&self` so a source can be shared between the streaming loop
/// and a calibration run; implementations synchronize internally.
pub trait AcquisitionSource: Send + Sync {
    /// Static layout of the device behind this source.
    fn descriptor(&self) -> &BoardDescriptor;

    /// Open the device session.
    fn prepare_session(&self) -> Result<(), DriverError>;

    /// Start streaming into a ring buffer holding at most `buffer_size` samples per row.
    fn start_stream(&self, buffer_size: usize) -> Result<(), DriverError>;

    /// The latest `sample_count` samples of every row, oldest first.
    ///
    /// May return fewer samples than requested when the buffer has not filled yet.
    fn current_window(&self, sample_count: usize) -> Result<SampleWindow, DriverError>;

    /// Stop streaming. The session stays prepared.
    fn stop_stream(&self) -> Result<(), DriverError>;

    /// Close the device session and release the hardware.
    fn release_session(&self) -> Result<(), DriverError>;

    /// Get current driver status
    fn status(&self) -> DriverStatus;

    fn sampling_rate(&self) -> u32 {
        self.descriptor().sampling_rate
    }

    fn eeg_channels(&self) -> Vec<usize> {
        self.descriptor().eeg_channels.clone()
    }
}
