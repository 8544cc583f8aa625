//! Sync triggers: after-write auto sync and the periodic watch loop.

mod auto_sync;
mod trigger;

pub use auto_sync::try_auto_sync;
pub use trigger::{run_periodic, WatchStats};
