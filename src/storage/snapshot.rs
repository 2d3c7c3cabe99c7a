//! Binary Snapshot Persistence
//!
//! Point-in-time serialization of the whole keyspace set to a single
//! file, and the matching load at startup.
//!
//! ## File Format
//!
//! ```text
//! "EMBERKV01"                                  9-byte magic
//! [record ...]
//! 0xFF                                         end of file
//! ```
//!
//! A record is one of:
//!
//! ```text
//! 0xFE <db: u32 BE>                            select target database
//! 0x00 <klen: u32 BE> <key> <vlen: u32 BE> <val>           string entry
//! 0x01 <klen: u32 BE> <key> <count: u32 BE>
//!      count * (<len: u32 BE> <bytes>)         list entry, head to tail
//! ```
//!
//! Empty databases produce no records at all.
//!
//! ## Atomicity
//!
//! A save writes to a uniquely named temporary file and renames it over
//! the target, so readers only ever observe complete snapshots. A failed
//! write leaves the temp file behind for diagnostics; a failed rename
//! removes it.
//!
//! ## Load Failure Policy
//!
//! Any structural problem in the file - wrong magic, short read, unknown
//! record opcode, database index out of range, duplicate key - is
//! unrecoverable: the caller aborts startup rather than serve a
//! possibly-corrupt data set. A missing file is the one benign case
//! (first run).

use bytes::Bytes;
use rand::Rng;
use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::Path;
use thiserror::Error;
use tracing::warn;

use crate::storage::{Store, Value};

/// Magic bytes identifying a snapshot file.
pub const MAGIC: &[u8; 9] = b"EMBERKV01";

/// Record opcode for a string entry.
const OPCODE_STRING: u8 = 0;
/// Record opcode for a list entry.
const OPCODE_LIST: u8 = 1;
/// Record opcode selecting the target database.
const OPCODE_SELECT_DB: u8 = 254;
/// End-of-file marker.
const OPCODE_EOF: u8 = 255;

/// Errors raised while writing or reading a snapshot.
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// Underlying I/O failure (including short reads)
    #[error("snapshot I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The file does not start with the expected magic
    #[error("wrong signature, not a snapshot file")]
    BadMagic,

    /// A record carries an opcode this version does not know
    #[error("unknown record opcode: {0:#04x}")]
    UnknownOpcode(u8),

    /// A select-db record addresses a database this server does not have
    #[error("snapshot was created with more than {limit} databases (index {index})")]
    DatabaseOutOfRange { index: usize, limit: usize },

    /// The same key appears twice within one database
    #[error("duplicated key found in snapshot")]
    DuplicateKey,
}

// ---------------------------------------------------------------------------
// Saving
// ---------------------------------------------------------------------------

/// Serializes `store` to `path` atomically.
///
/// On success the snapshot file at `path` is a complete, self-contained
/// image of every populated database.
pub fn save(store: &Store, path: impl AsRef<Path>) -> Result<(), SnapshotError> {
    let path = path.as_ref();
    // The temp file lives next to the target so the rename stays on one
    // filesystem
    let temp = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.join(temp_file_name()),
        _ => temp_file_name().into(),
    };

    match write_snapshot(store, &temp) {
        Ok(()) => {}
        Err(e) => {
            // The temp file is left in place for diagnostics
            warn!(temp = %temp.display(), error = %e, "Error writing snapshot");
            return Err(e);
        }
    }

    if let Err(e) = std::fs::rename(&temp, path) {
        warn!(error = %e, "Error moving temp snapshot file to final destination");
        std::fs::remove_file(&temp).ok();
        return Err(e.into());
    }
    Ok(())
}

/// Generates a unique name for the in-progress snapshot.
fn temp_file_name() -> String {
    let tag: u32 = rand::thread_rng().gen();
    format!("temp-{}-{:08x}.edb", std::process::id(), tag)
}

fn write_snapshot(store: &Store, temp: &Path) -> Result<(), SnapshotError> {
    let mut w = BufWriter::new(File::create(temp)?);
    w.write_all(MAGIC)?;

    for (index, db) in store.iter() {
        if db.is_empty() {
            continue;
        }
        w.write_all(&[OPCODE_SELECT_DB])?;
        w.write_all(&(index as u32).to_be_bytes())?;

        for (key, value) in db {
            match value {
                Value::Str(s) => {
                    w.write_all(&[OPCODE_STRING])?;
                    write_blob(&mut w, key)?;
                    write_blob(&mut w, s)?;
                }
                Value::List(items) => {
                    w.write_all(&[OPCODE_LIST])?;
                    write_blob(&mut w, key)?;
                    w.write_all(&(items.len() as u32).to_be_bytes())?;
                    for item in items {
                        write_blob(&mut w, item)?;
                    }
                }
            }
        }
    }

    w.write_all(&[OPCODE_EOF])?;
    w.flush()?;
    Ok(())
}

fn write_blob(w: &mut impl Write, data: &[u8]) -> Result<(), SnapshotError> {
    w.write_all(&(data.len() as u32).to_be_bytes())?;
    w.write_all(data)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Reads a snapshot from `path` into a fresh `Store` of `db_count`
/// databases.
///
/// Returns `Ok(None)` when the file does not exist (clean first start);
/// every other failure is unrecoverable and must abort startup.
pub fn load(path: impl AsRef<Path>, db_count: usize) -> Result<Option<Store>, SnapshotError> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let mut r = BufReader::new(file);

    let mut magic = [0u8; 9];
    read_exact(&mut r, &mut magic)?;
    if &magic != MAGIC {
        return Err(SnapshotError::BadMagic);
    }

    let mut store = Store::new(db_count);
    let mut current_db = 0usize;

    loop {
        let opcode = read_u8(&mut r)?;
        match opcode {
            OPCODE_EOF => break,
            OPCODE_SELECT_DB => {
                let index = read_u32(&mut r)? as usize;
                if index >= db_count {
                    return Err(SnapshotError::DatabaseOutOfRange {
                        index,
                        limit: db_count,
                    });
                }
                current_db = index;
            }
            OPCODE_STRING => {
                let key = read_blob(&mut r)?;
                let val = read_blob(&mut r)?;
                insert_unique(&mut store, current_db, key, Value::Str(val))?;
            }
            OPCODE_LIST => {
                let key = read_blob(&mut r)?;
                let count = read_u32(&mut r)?;
                let mut items = VecDeque::with_capacity(count as usize);
                for _ in 0..count {
                    items.push_back(read_blob(&mut r)?);
                }
                insert_unique(&mut store, current_db, key, Value::List(items))?;
            }
            other => return Err(SnapshotError::UnknownOpcode(other)),
        }
    }

    Ok(Some(store))
}

fn insert_unique(
    store: &mut Store,
    db: usize,
    key: Bytes,
    value: Value,
) -> Result<(), SnapshotError> {
    if store.db_mut(db).insert(key, value).is_some() {
        return Err(SnapshotError::DuplicateKey);
    }
    Ok(())
}

fn read_exact(r: &mut impl Read, buf: &mut [u8]) -> Result<(), SnapshotError> {
    // read_exact maps a truncated file to UnexpectedEof
    r.read_exact(buf)?;
    Ok(())
}

fn read_u8(r: &mut impl Read) -> Result<u8, SnapshotError> {
    let mut b = [0u8; 1];
    read_exact(r, &mut b)?;
    Ok(b[0])
}

fn read_u32(r: &mut impl Read) -> Result<u32, SnapshotError> {
    let mut b = [0u8; 4];
    read_exact(r, &mut b)?;
    Ok(u32::from_be_bytes(b))
}

fn read_blob(r: &mut impl Read) -> Result<Bytes, SnapshotError> {
    let len = read_u32(r)? as usize;
    let mut data = vec![0u8; len];
    read_exact(r, &mut data)?;
    Ok(Bytes::from(data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn temp_path() -> PathBuf {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        let n = COUNTER.fetch_add(1, Ordering::SeqCst);
        std::env::temp_dir().join(format!("emberkv_snap_{}_{}.edb", std::process::id(), n))
    }

    fn key(s: &str) -> Bytes {
        Bytes::from(s.to_string())
    }

    #[test]
    fn test_missing_file_is_clean_start() {
        let loaded = load(temp_path(), 16).unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn test_round_trip_preserves_every_database() {
        let mut store = Store::new(4);
        store.db_mut(0).insert(key("name"), Value::str("ember"));
        store
            .db_mut(0)
            .insert(key("bin"), Value::str(Bytes::from(&b"\x00\xff\x01"[..])));
        let mut list = VecDeque::new();
        list.push_back(Bytes::from("a"));
        list.push_back(Bytes::from("b"));
        list.push_back(Bytes::from("c"));
        store.db_mut(2).insert(key("l"), Value::List(list.clone()));

        let path = temp_path();
        save(&store, &path).unwrap();

        let loaded = load(&path, 4).unwrap().expect("snapshot should exist");
        assert_eq!(loaded.db(0).get(&key("name")), Some(&Value::str("ember")));
        assert_eq!(
            loaded.db(0).get(&key("bin")),
            Some(&Value::str(Bytes::from(&b"\x00\xff\x01"[..])))
        );
        assert_eq!(loaded.db(2).get(&key("l")), Some(&Value::List(list)));
        assert_eq!(loaded.db(1).len(), 0);
        assert_eq!(loaded.db(3).len(), 0);
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn test_empty_store_round_trips() {
        let store = Store::new(16);
        let path = temp_path();
        save(&store, &path).unwrap();
        let loaded = load(&path, 16).unwrap().expect("snapshot should exist");
        assert!(loaded.iter().all(|(_, db)| db.is_empty()));
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn test_list_order_is_preserved() {
        let mut store = Store::new(1);
        let mut list = VecDeque::new();
        for i in 0..100 {
            list.push_back(Bytes::from(format!("item-{i}")));
        }
        store.db_mut(0).insert(key("l"), Value::List(list.clone()));

        let path = temp_path();
        save(&store, &path).unwrap();
        let loaded = load(&path, 1).unwrap().expect("snapshot should exist");
        assert_eq!(loaded.db(0).get(&key("l")), Some(&Value::List(list)));
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn test_bad_magic_is_fatal() {
        let path = temp_path();
        std::fs::write(&path, b"NOTADUMP!\xff").unwrap();
        assert!(matches!(load(&path, 16), Err(SnapshotError::BadMagic)));
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn test_truncated_file_is_fatal() {
        let mut store = Store::new(1);
        store.db_mut(0).insert(key("k"), Value::str("value"));
        let path = temp_path();
        save(&store, &path).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() - 4]).unwrap();
        assert!(matches!(load(&path, 1), Err(SnapshotError::Io(_))));
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn test_out_of_range_database_is_fatal() {
        let mut store = Store::new(4);
        store.db_mut(3).insert(key("k"), Value::str("v"));
        let path = temp_path();
        save(&store, &path).unwrap();

        // Load into a server configured with fewer databases
        assert!(matches!(
            load(&path, 2),
            Err(SnapshotError::DatabaseOutOfRange { index: 3, limit: 2 })
        ));
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn test_duplicate_key_is_fatal() {
        let path = temp_path();
        let mut bytes = Vec::new();
        bytes.extend_from_slice(MAGIC);
        bytes.push(OPCODE_SELECT_DB);
        bytes.extend_from_slice(&0u32.to_be_bytes());
        for _ in 0..2 {
            bytes.push(OPCODE_STRING);
            bytes.extend_from_slice(&1u32.to_be_bytes());
            bytes.push(b'k');
            bytes.extend_from_slice(&1u32.to_be_bytes());
            bytes.push(b'v');
        }
        bytes.push(OPCODE_EOF);
        std::fs::write(&path, bytes).unwrap();
        assert!(matches!(load(&path, 1), Err(SnapshotError::DuplicateKey)));
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn test_unknown_opcode_is_fatal() {
        let path = temp_path();
        let mut bytes = Vec::new();
        bytes.extend_from_slice(MAGIC);
        bytes.push(0x42);
        std::fs::write(&path, bytes).unwrap();
        assert!(matches!(
            load(&path, 1),
            Err(SnapshotError::UnknownOpcode(0x42))
        ));
        std::fs::remove_file(path).ok();
    }
}
