//! Keyspaces
//!
//! The server owns a fixed number of independently addressable
//! key-to-value maps ("databases"), selectable per connection with
//! `SELECT`. A key lives in at most one database entry at a time; `MOVE`
//! and `RENAME` transfer the value without copying its payload.
//!
//! All mutation happens on the single command-execution thread, so the
//! maps need no interior locking of their own; the `ServerState` mutex
//! above them provides exclusive access.

use bytes::Bytes;
use rand::seq::IteratorRandom;
use std::collections::HashMap;

use crate::glob;
use crate::storage::Value;

/// One selectable keyspace: a map from binary-safe key to value.
pub type Database = HashMap<Bytes, Value>;

/// Outcome of a key transfer (`RENAME`/`MOVE`-style operations).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferError {
    /// Source and destination are the same
    SameTarget,
    /// The source key does not exist
    NoSuchKey,
    /// The destination already holds a key (NX-style refusal)
    DestinationExists,
}

/// The set of all keyspaces.
#[derive(Debug, Clone)]
pub struct Store {
    databases: Vec<Database>,
}

impl Store {
    /// Creates `count` empty databases.
    pub fn new(count: usize) -> Self {
        Self {
            databases: vec![Database::new(); count],
        }
    }

    /// Number of databases.
    pub fn db_count(&self) -> usize {
        self.databases.len()
    }

    /// Returns a database by index.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of range; callers validate indices via
    /// [`Store::valid_index`] before selecting.
    pub fn db(&self, index: usize) -> &Database {
        &self.databases[index]
    }

    /// Returns a database by index, mutably.
    pub fn db_mut(&mut self, index: usize) -> &mut Database {
        &mut self.databases[index]
    }

    /// Returns true if `index` addresses an existing database.
    pub fn valid_index(&self, index: usize) -> bool {
        index < self.databases.len()
    }

    /// Iterates over `(index, database)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &Database)> {
        self.databases.iter().enumerate()
    }

    /// Picks an arbitrary key's value from the database, or `None` when
    /// it is empty.
    pub fn random_value(&self, index: usize) -> Option<&Value> {
        let db = self.db(index);
        db.values().choose(&mut rand::thread_rng())
    }

    /// Collects the keys of a database matching a glob pattern.
    ///
    /// A lone `*` short-circuits to all keys.
    pub fn matching_keys(&self, index: usize, pattern: &[u8]) -> Vec<Bytes> {
        self.db(index)
            .keys()
            .filter(|key| pattern == b"*" || glob::matches(pattern, key))
            .cloned()
            .collect()
    }

    /// Moves the value under `key` to `newkey` within one database,
    /// overwriting the destination unless `nx` is set.
    pub fn rename(
        &mut self,
        index: usize,
        key: &Bytes,
        newkey: &Bytes,
        nx: bool,
    ) -> Result<(), TransferError> {
        if key == newkey {
            return Err(TransferError::SameTarget);
        }
        let db = self.db_mut(index);
        if !db.contains_key(key) {
            return Err(TransferError::NoSuchKey);
        }
        if nx && db.contains_key(newkey) {
            return Err(TransferError::DestinationExists);
        }
        if let Some(value) = db.remove(key) {
            db.insert(newkey.clone(), value);
        }
        Ok(())
    }

    /// Transfers `key` from database `src` to database `dst` without
    /// copying the value. Fails if the destination already has the key.
    pub fn move_key(
        &mut self,
        src: usize,
        dst: usize,
        key: &Bytes,
    ) -> Result<(), TransferError> {
        if src == dst {
            return Err(TransferError::SameTarget);
        }
        if !self.databases[src].contains_key(key) {
            return Err(TransferError::NoSuchKey);
        }
        if self.databases[dst].contains_key(key) {
            return Err(TransferError::DestinationExists);
        }
        if let Some(value) = self.databases[src].remove(key) {
            self.databases[dst].insert(key.clone(), value);
        }
        Ok(())
    }

    /// Shrinks databases whose tables have become sparse.
    ///
    /// A table is compacted once it holds at least `min_slots` slots and
    /// less than `min_fill` percent of them are used. Returns the
    /// indices of the databases that were shrunk.
    pub fn compact_sparse(&mut self, min_slots: usize, min_fill: usize) -> Vec<usize> {
        let mut shrunk = Vec::new();
        for (idx, db) in self.databases.iter_mut().enumerate() {
            let capacity = db.capacity();
            let used = db.len();
            if capacity >= min_slots && used > 0 && used * 100 / capacity < min_fill {
                db.shrink_to_fit();
                shrunk.push(idx);
            }
        }
        shrunk
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(s: &str) -> Bytes {
        Bytes::from(s.to_string())
    }

    #[test]
    fn test_insert_and_lookup() {
        let mut store = Store::new(2);
        store.db_mut(0).insert(key("a"), Value::str("1"));
        assert_eq!(store.db(0).get(&key("a")), Some(&Value::str("1")));
        assert_eq!(store.db(1).get(&key("a")), None);
    }

    #[test]
    fn test_rename_moves_value() {
        let mut store = Store::new(1);
        store.db_mut(0).insert(key("a"), Value::str("1"));
        store.rename(0, &key("a"), &key("b"), false).unwrap();
        assert!(store.db(0).get(&key("a")).is_none());
        assert_eq!(store.db(0).get(&key("b")), Some(&Value::str("1")));
    }

    #[test]
    fn test_rename_same_key_fails() {
        let mut store = Store::new(1);
        store.db_mut(0).insert(key("a"), Value::str("1"));
        assert_eq!(
            store.rename(0, &key("a"), &key("a"), false),
            Err(TransferError::SameTarget)
        );
    }

    #[test]
    fn test_rename_missing_source_fails() {
        let mut store = Store::new(1);
        assert_eq!(
            store.rename(0, &key("a"), &key("b"), false),
            Err(TransferError::NoSuchKey)
        );
    }

    #[test]
    fn test_renamenx_existing_destination_is_untouched() {
        let mut store = Store::new(1);
        store.db_mut(0).insert(key("src"), Value::str("s"));
        store.db_mut(0).insert(key("dst"), Value::str("d"));
        assert_eq!(
            store.rename(0, &key("src"), &key("dst"), true),
            Err(TransferError::DestinationExists)
        );
        // No mutation on failure
        assert_eq!(store.db(0).get(&key("src")), Some(&Value::str("s")));
        assert_eq!(store.db(0).get(&key("dst")), Some(&Value::str("d")));
    }

    #[test]
    fn test_rename_overwrites_without_nx() {
        let mut store = Store::new(1);
        store.db_mut(0).insert(key("src"), Value::str("s"));
        store.db_mut(0).insert(key("dst"), Value::str("d"));
        store.rename(0, &key("src"), &key("dst"), false).unwrap();
        assert_eq!(store.db(0).get(&key("dst")), Some(&Value::str("s")));
        assert!(store.db(0).get(&key("src")).is_none());
    }

    #[test]
    fn test_move_between_databases() {
        let mut store = Store::new(2);
        store.db_mut(0).insert(key("k"), Value::str("v"));
        store.move_key(0, 1, &key("k")).unwrap();
        assert!(store.db(0).get(&key("k")).is_none());
        assert_eq!(store.db(1).get(&key("k")), Some(&Value::str("v")));
    }

    #[test]
    fn test_move_refuses_existing_target_key() {
        let mut store = Store::new(2);
        store.db_mut(0).insert(key("k"), Value::str("a"));
        store.db_mut(1).insert(key("k"), Value::str("b"));
        assert_eq!(
            store.move_key(0, 1, &key("k")),
            Err(TransferError::DestinationExists)
        );
        // Source is untouched on failure
        assert_eq!(store.db(0).get(&key("k")), Some(&Value::str("a")));
    }

    #[test]
    fn test_move_same_database_fails() {
        let mut store = Store::new(2);
        store.db_mut(0).insert(key("k"), Value::str("a"));
        assert_eq!(
            store.move_key(0, 0, &key("k")),
            Err(TransferError::SameTarget)
        );
    }

    #[test]
    fn test_matching_keys() {
        let mut store = Store::new(1);
        store.db_mut(0).insert(key("user:1"), Value::str("a"));
        store.db_mut(0).insert(key("user:2"), Value::str("b"));
        store.db_mut(0).insert(key("session:1"), Value::str("c"));

        let mut matched = store.matching_keys(0, b"user:*");
        matched.sort();
        assert_eq!(matched, vec![key("user:1"), key("user:2")]);
        assert_eq!(store.matching_keys(0, b"*").len(), 3);
    }

    #[test]
    fn test_random_value() {
        let mut store = Store::new(1);
        assert!(store.random_value(0).is_none());
        store.db_mut(0).insert(key("k"), Value::str("v"));
        assert_eq!(store.random_value(0), Some(&Value::str("v")));
    }

    #[test]
    fn test_compact_sparse_only_when_thresholds_hit() {
        let mut store = Store::new(1);
        store.db_mut(0).insert(key("a"), Value::str("1"));
        // Tiny tables are never compacted
        assert!(store.compact_sparse(16_384, 10).is_empty());
    }
}
