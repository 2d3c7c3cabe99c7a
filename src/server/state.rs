//! Shared Server State
//!
//! One [`ServerState`] instance holds everything the command dispatcher
//! and the maintenance cron operate on: the keyspaces, the persistence
//! bookkeeping (dirty counter, last-save timestamp, save rules) and the
//! background save slot. All command execution runs on a current-thread
//! runtime, so the mutex around the state is uncontended in the common
//! case; it exists so the background snapshot writer and tests can be
//! reasoned about safely.

use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, TryRecvError};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{info, warn};

use crate::config::Config;
use crate::storage::{snapshot, SnapshotError, Store};

/// One `save <seconds> <changes>` policy line: snapshot when at least
/// `changes` mutations happened and more than `seconds` seconds passed
/// since the last save.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SaveRule {
    pub seconds: u64,
    pub changes: u64,
}

impl SaveRule {
    pub const fn new(seconds: u64, changes: u64) -> Self {
        Self { seconds, changes }
    }
}

/// The state shared between connection tasks and the cron.
pub type SharedState = Arc<Mutex<ServerState>>;

#[derive(Debug)]
pub struct ServerState {
    /// The keyspaces
    pub store: Store,
    /// Mutations since the last successful save
    pub dirty: u64,
    /// Unix timestamp of the last successful save
    pub lastsave: u64,
    /// Automatic snapshot policy
    pub save_rules: Vec<SaveRule>,
    /// Connections idle longer than this many seconds are closed
    pub max_idle_secs: u64,
    /// Snapshot file path
    db_path: PathBuf,
    /// Receiver for the outcome of an in-flight background save
    background_save: Option<mpsc::Receiver<Result<(), SnapshotError>>>,
}

impl ServerState {
    /// Builds the state from a loaded configuration and an initial
    /// store (freshly created or restored from a snapshot).
    pub fn new(config: &Config, store: Store) -> Self {
        Self {
            store,
            dirty: 0,
            lastsave: unix_now(),
            save_rules: config.save_rules.clone(),
            max_idle_secs: config.max_idle_secs,
            db_path: PathBuf::from(&config.db_filename),
            background_save: None,
        }
    }

    /// Wraps the state for sharing across tasks.
    pub fn shared(self) -> SharedState {
        Arc::new(Mutex::new(self))
    }

    /// A state with `db_count` empty databases, no save rules and a
    /// snapshot path under the system temp directory. Used by tests and
    /// benches.
    pub fn for_tests(db_count: usize) -> Self {
        let name = format!(
            "emberkv-test-{}-{:08x}.edb",
            std::process::id(),
            rand::random::<u32>()
        );
        Self {
            store: Store::new(db_count),
            dirty: 0,
            lastsave: unix_now(),
            save_rules: Vec::new(),
            max_idle_secs: 300,
            db_path: std::env::temp_dir().join(name),
            background_save: None,
        }
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Writes a snapshot synchronously and resets the persistence
    /// bookkeeping on success.
    pub fn save(&mut self) -> Result<(), SnapshotError> {
        snapshot::save(&self.store, &self.db_path)?;
        self.dirty = 0;
        self.lastsave = unix_now();
        info!("DB saved on disk");
        Ok(())
    }

    /// True while a background save is running.
    pub fn background_save_in_progress(&self) -> bool {
        self.background_save.is_some()
    }

    /// Starts a background save.
    ///
    /// The store is cloned under the lock; `Bytes` payloads are
    /// reference-counted, so the clone copies table structure but not
    /// value data. The actual file write runs on the blocking pool and
    /// reports back through a channel the cron polls.
    pub fn start_background_save(&mut self) {
        let snapshot_store = self.store.clone();
        let path = self.db_path.clone();
        let (tx, rx) = mpsc::channel();
        self.background_save = Some(rx);
        tokio::task::spawn_blocking(move || {
            let result = snapshot::save(&snapshot_store, &path);
            // The receiver may be gone if the server is shutting down
            let _ = tx.send(result);
        });
        info!("background saving started");
    }

    /// Collects a finished background save, if any. Called once per
    /// cron tick; never blocks.
    pub fn poll_background_save(&mut self) {
        let outcome = match &self.background_save {
            Some(rx) => match rx.try_recv() {
                Ok(result) => result,
                Err(TryRecvError::Empty) => return,
                Err(TryRecvError::Disconnected) => Err(SnapshotError::Io(
                    std::io::Error::other("background save worker vanished"),
                )),
            },
            None => return,
        };
        self.background_save = None;
        match outcome {
            Ok(()) => {
                self.dirty = 0;
                self.lastsave = unix_now();
                info!("background saving terminated with success");
            }
            Err(err) => warn!("background saving error: {err}"),
        }
    }

    /// True when any save rule is satisfied.
    pub fn should_auto_save(&self, now: u64) -> bool {
        self.save_rules
            .iter()
            .any(|rule| self.dirty >= rule.changes && now.saturating_sub(self.lastsave) > rule.seconds)
    }

    /// Total number of keys across all databases.
    pub fn key_count(&self) -> usize {
        self.store.iter().map(|(_, db)| db.len()).sum()
    }
}

pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
