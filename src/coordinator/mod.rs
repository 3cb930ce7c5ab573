//! Per-account state coordinator
//!
//! - `refresh`: snapshot ownership, refresh exclusivity and coalescing
//! - `commands`: device commands followed by a forced refresh
//! - `sync`: background polling loop
//! - `listeners`: change notification

mod commands;
mod decode;
mod listeners;
mod refresh;
mod sync;

#[cfg(test)]
mod fake;

pub use commands::UPDATE_INTERVAL_RANGE;
pub use listeners::{Listener, Subscription};
pub use refresh::{
    Coordinator, CoordinatorState, PollingOptions, RefreshHealth, RefreshOutcome, Snapshot,
};
pub use sync::PollingTask;
