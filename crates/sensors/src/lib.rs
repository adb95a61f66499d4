pub mod types;
pub mod mock_eeg;

// Re-export the main types that users need
pub use types::{AcquisitionSource, BoardDescriptor, DriverError, DriverStatus, SourceParams};
pub use mock_eeg::driver::SyntheticBoard;
