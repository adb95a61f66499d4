//! Neurokey daemon: turns lateralized EEG band power into key presses.
//!
//! The [`controller::SessionController`] owns the acquisition session and runs
//! the [`streaming`] loop and [`calibration`] runs against it. Clients drive it
//! over the WebSocket transport in [`server`].

pub mod calibration;
pub mod channel_map;
pub mod config;
pub mod controller;
pub mod keys;
pub mod server;
pub mod session;
pub mod smoothing;
pub mod streaming;
pub mod telemetry;
pub mod trigger;

pub use config::{load_config, DaemonConfig};
pub use controller::{ControllerHandle, SessionController, SourceFactory, SyntheticSourceFactory};
pub use session::SessionState;
pub use telemetry::Telemetry;
