//! gps365-sync - polling client and state coordinator for 365GPS trackers
//!
//! Logs into a 365GPS account, keeps an up-to-date snapshot of every tracker
//! on it and forwards device commands (LED, speaker, find, update interval,
//! saving profile, shutdown, reboot) to the backend.

pub mod config;
pub mod coordinator;
pub mod error;
pub mod gps365;
pub mod models;
pub mod saving_profile;

pub use coordinator::{Coordinator, CoordinatorState, PollingOptions, PollingTask, Snapshot};
pub use error::{ApiError, Error};
pub use gps365::{Gps365Client, TrackerApi};
pub use models::DeviceState;
