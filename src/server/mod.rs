//! Shared server state and the maintenance cron.

pub mod cron;
pub mod state;

pub use state::{SaveRule, ServerState, SharedState};
