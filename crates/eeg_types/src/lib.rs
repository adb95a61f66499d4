//! Shared types for the neurokey daemon
//!
//! This crate contains the types exchanged between the acquisition layer, the
//! metric engine and the daemon: lateral regions, sample windows, the tunable
//! session settings, and the control/telemetry events that cross the client
//! transport.

pub mod config;
pub mod data;
pub mod event;
pub mod region;

// Re-export commonly used types
pub use config::*;
pub use data::*;
pub use event::*;
pub use region::*;
