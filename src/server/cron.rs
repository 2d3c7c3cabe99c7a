//! Maintenance Cron
//!
//! A once-per-second background task that performs the server's
//! housekeeping: periodic stats logging, compaction of sparse hash
//! tables, collection of finished background saves, and the automatic
//! save policy.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::connection::ServerStats;
use crate::server::state::{unix_now, SharedState};

/// Tick period of the maintenance loop.
const CRON_PERIOD: Duration = Duration::from_secs(1);

/// Stats are logged once every this many ticks.
const STATS_PERIOD_TICKS: u64 = 5;

/// A database table is compacted once it holds at least this many slots...
const RESIZE_MIN_SLOTS: usize = 16384;

/// ...and less than this percentage of them is in use.
const RESIZE_MIN_FILL_PERCENT: usize = 10;

/// Runs the maintenance loop forever. Spawned once at startup.
pub async fn run(shared: SharedState, stats: Arc<ServerStats>) {
    let mut ticker = tokio::time::interval(CRON_PERIOD);
    let mut loops: u64 = 0;
    loop {
        ticker.tick().await;
        tick(&shared, &stats, loops);
        loops += 1;
    }
}

/// One cron iteration, separated out so tests can drive it directly.
fn tick(shared: &SharedState, stats: &ServerStats, loops: u64) {
    let mut state = match shared.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };

    if loops % STATS_PERIOD_TICKS == 0 {
        info!(
            "{} clients connected, {} keys in {} databases, {} changes since last save",
            stats.active_connections.load(Ordering::Relaxed),
            state.key_count(),
            state.store.db_count(),
            state.dirty,
        );
    }

    for index in state
        .store
        .compact_sparse(RESIZE_MIN_SLOTS, RESIZE_MIN_FILL_PERCENT)
    {
        debug!("compacted sparse hash table for DB {index}");
    }

    state.poll_background_save();

    if !state.background_save_in_progress() {
        let now = unix_now();
        if state.should_auto_save(now) {
            info!(
                "{} changes since last save {} seconds ago, saving...",
                state.dirty,
                now.saturating_sub(state.lastsave)
            );
            state.start_background_save();
        }
    }
}
