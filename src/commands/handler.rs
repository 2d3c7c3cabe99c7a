//! Command Dispatcher
//!
//! Takes a fully parsed argument vector, validates it against the
//! command table and executes it against the shared server state. Every
//! path produces exactly one [`Reply`]; protocol-level failures are the
//! parser's business and never reach this module.

use bytes::Bytes;
use std::collections::hash_map::Entry;
use tracing::{error, warn};

use crate::commands::{lookup, CommandKind};
use crate::protocol::Reply;
use crate::server::ServerState;
use crate::storage::{TransferError, Value};

/// Executes one command against the server state.
///
/// `db_index` is the connection's selected database and is updated in
/// place by `SELECT`.
pub fn execute(state: &mut ServerState, db_index: &mut usize, args: &[Bytes]) -> Reply {
    let spec = match lookup(&args[0]) {
        Some(spec) => spec,
        None => return Reply::error("unknown command"),
    };
    if args.len() != spec.arity {
        return Reply::error("wrong number of arguments");
    }

    match spec.kind {
        CommandKind::Ping => Reply::Pong,
        CommandKind::Echo => Reply::Bulk(args[1].clone()),
        CommandKind::Set => set(state, *db_index, &args[1], &args[2], false),
        CommandKind::SetNx => set(state, *db_index, &args[1], &args[2], true),
        CommandKind::Get => get(state, *db_index, &args[1]),
        CommandKind::Del => del(state, *db_index, &args[1]),
        CommandKind::Exists => {
            let found = state.store.db(*db_index).contains_key(&args[1]);
            Reply::Integer(found as i64)
        }
        CommandKind::Incr => incr_decr(state, *db_index, &args[1], 1),
        CommandKind::Decr => incr_decr(state, *db_index, &args[1], -1),
        CommandKind::Select => select(state, db_index, &args[1]),
        CommandKind::RandomKey => random_key(state, *db_index),
        CommandKind::Keys => {
            let keys = state.store.matching_keys(*db_index, &args[1]);
            let mut joined = Vec::new();
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    joined.push(b' ');
                }
                joined.extend_from_slice(key);
            }
            Reply::bulk(joined)
        }
        CommandKind::DbSize => Reply::Integer(state.store.db(*db_index).len() as i64),
        CommandKind::LastSave => Reply::Integer(state.lastsave as i64),
        CommandKind::Save => match state.save() {
            Ok(()) => Reply::Ok,
            Err(err) => {
                error!("foreground save failed: {err}");
                Reply::error("saving the DB failed")
            }
        },
        CommandKind::BgSave => {
            if state.background_save_in_progress() {
                Reply::error("background save already in progress")
            } else {
                state.start_background_save();
                Reply::Ok
            }
        }
        CommandKind::Shutdown => shutdown(state),
        CommandKind::Rename => rename(state, *db_index, &args[1], &args[2], false),
        CommandKind::RenameNx => rename(state, *db_index, &args[1], &args[2], true),
        CommandKind::Move => move_key(state, *db_index, &args[1], &args[2]),
        CommandKind::LPush => push(state, *db_index, &args[1], &args[2], true),
        CommandKind::RPush => push(state, *db_index, &args[1], &args[2], false),
        CommandKind::LLen => llen(state, *db_index, &args[1]),
        CommandKind::LIndex => lindex(state, *db_index, &args[1], &args[2]),
        CommandKind::LPop => pop(state, *db_index, &args[1], true),
        CommandKind::RPop => pop(state, *db_index, &args[1], false),
        CommandKind::LRange => lrange(state, *db_index, &args[1], &args[2], &args[3]),
        CommandKind::LTrim => ltrim(state, *db_index, &args[1], &args[2], &args[3]),
    }
}

fn set(state: &mut ServerState, db_index: usize, key: &Bytes, value: &Bytes, nx: bool) -> Reply {
    let db = state.store.db_mut(db_index);
    match db.entry(key.clone()) {
        Entry::Occupied(mut entry) => {
            if !nx {
                entry.insert(Value::str(value.clone()));
                state.dirty += 1;
            }
        }
        Entry::Vacant(entry) => {
            entry.insert(Value::str(value.clone()));
            state.dirty += 1;
        }
    }
    Reply::Ok
}

fn get(state: &ServerState, db_index: usize, key: &Bytes) -> Reply {
    match state.store.db(db_index).get(key) {
        None => Reply::Nil,
        Some(value) => match value.as_str() {
            Some(data) => Reply::Bulk(data.clone()),
            None => Reply::error("GET against key not holding a string value"),
        },
    }
}

fn del(state: &mut ServerState, db_index: usize, key: &Bytes) -> Reply {
    if state.store.db_mut(db_index).remove(key).is_some() {
        state.dirty += 1;
    }
    Reply::Ok
}

fn incr_decr(state: &mut ServerState, db_index: usize, key: &Bytes, delta: i64) -> Reply {
    let db = state.store.db_mut(db_index);
    let current = db
        .get(key)
        .and_then(Value::as_str)
        .map(|data| leading_i64(data))
        .unwrap_or(0);
    let value = current.saturating_add(delta);
    db.insert(key.clone(), Value::str(value.to_string()));
    state.dirty += 1;
    Reply::Integer(value)
}

fn select(state: &ServerState, db_index: &mut usize, raw: &Bytes) -> Reply {
    let requested = leading_i64(raw);
    if requested < 0 || !state.store.valid_index(requested as usize) {
        return Reply::error("invalid DB index");
    }
    *db_index = requested as usize;
    Reply::Ok
}

fn random_key(state: &ServerState, db_index: usize) -> Reply {
    match state.store.random_value(db_index).and_then(Value::as_str) {
        Some(data) => Reply::Line(data.clone()),
        None => Reply::Line(Bytes::new()),
    }
}

fn shutdown(state: &mut ServerState) -> Reply {
    warn!("user requested shutdown, saving DB...");
    match state.save() {
        Ok(()) => {
            warn!("server exit now, bye bye...");
            std::process::exit(0);
        }
        Err(err) => {
            warn!("error trying to save the DB, can't exit: {err}");
            Reply::error("can't quit, problems saving the DB")
        }
    }
}

fn rename(state: &mut ServerState, db_index: usize, key: &Bytes, newkey: &Bytes, nx: bool) -> Reply {
    match state.store.rename(db_index, key, newkey, nx) {
        Ok(()) => {
            state.dirty += 1;
            Reply::Ok
        }
        Err(TransferError::SameTarget) => Reply::error("src and dest key are the same"),
        Err(TransferError::NoSuchKey) => Reply::error("no such key"),
        Err(TransferError::DestinationExists) => Reply::error("destination key exists"),
    }
}

fn move_key(state: &mut ServerState, db_index: usize, key: &Bytes, raw_target: &Bytes) -> Reply {
    let target = leading_i64(raw_target);
    if target < 0 || !state.store.valid_index(target as usize) {
        return Reply::error("target DB out of range");
    }
    match state.store.move_key(db_index, target as usize, key) {
        Ok(()) => {
            state.dirty += 1;
            Reply::Ok
        }
        Err(TransferError::SameTarget) => Reply::error("source DB is the same as target DB"),
        Err(TransferError::NoSuchKey) => Reply::error("no such key"),
        Err(TransferError::DestinationExists) => {
            Reply::error("target DB already contains the moved key")
        }
    }
}

fn push(state: &mut ServerState, db_index: usize, key: &Bytes, element: &Bytes, head: bool) -> Reply {
    let db = state.store.db_mut(db_index);
    let value = db.entry(key.clone()).or_insert_with(Value::empty_list);
    let list = match value.as_list_mut() {
        Some(list) => list,
        None => return Reply::error("push against existing key not holding a list"),
    };
    if head {
        list.push_front(element.clone());
    } else {
        list.push_back(element.clone());
    }
    state.dirty += 1;
    Reply::Ok
}

fn llen(state: &ServerState, db_index: usize, key: &Bytes) -> Reply {
    match state.store.db(db_index).get(key) {
        None => Reply::Integer(0),
        Some(value) => match value.as_list() {
            Some(list) => Reply::Integer(list.len() as i64),
            None => Reply::error("LLEN against key not holding a list value"),
        },
    }
}

fn lindex(state: &ServerState, db_index: usize, key: &Bytes, raw_index: &Bytes) -> Reply {
    let list = match state.store.db(db_index).get(key) {
        None => return Reply::Nil,
        Some(value) => match value.as_list() {
            Some(list) => list,
            None => return Reply::error("LINDEX against key not holding a list value"),
        },
    };
    let mut index = leading_i64(raw_index);
    if index < 0 {
        index += list.len() as i64;
    }
    if index < 0 || index as usize >= list.len() {
        return Reply::Nil;
    }
    match list.get(index as usize) {
        Some(element) => Reply::Bulk(element.clone()),
        None => Reply::Nil,
    }
}

fn pop(state: &mut ServerState, db_index: usize, key: &Bytes, head: bool) -> Reply {
    let list = match state.store.db_mut(db_index).get_mut(key) {
        None => return Reply::Nil,
        Some(value) => match value.as_list_mut() {
            Some(list) => list,
            None => return Reply::error("POP against key not holding a list value"),
        },
    };
    let popped = if head { list.pop_front() } else { list.pop_back() };
    match popped {
        Some(element) => {
            state.dirty += 1;
            Reply::Bulk(element)
        }
        // The empty list object stays under the key
        None => Reply::Nil,
    }
}

fn lrange(state: &ServerState, db_index: usize, key: &Bytes, raw_start: &Bytes, raw_end: &Bytes) -> Reply {
    let list = match state.store.db(db_index).get(key) {
        None => return Reply::Nil,
        Some(value) => match value.as_list() {
            Some(list) => list,
            None => return Reply::error("LRANGE against key not holding a list value"),
        },
    };
    match normalize_range(leading_i64(raw_start), leading_i64(raw_end), list.len()) {
        None => Reply::MultiBulk(Vec::new()),
        Some((start, end)) => {
            let elements = list.iter().skip(start).take(end - start + 1).cloned().collect();
            Reply::MultiBulk(elements)
        }
    }
}

fn ltrim(state: &mut ServerState, db_index: usize, key: &Bytes, raw_start: &Bytes, raw_end: &Bytes) -> Reply {
    let list = match state.store.db_mut(db_index).get_mut(key) {
        None => return Reply::error("no such key"),
        Some(value) => match value.as_list_mut() {
            Some(list) => list,
            None => return Reply::error("LTRIM against key not holding a list value"),
        },
    };
    let before = list.len();
    match normalize_range(leading_i64(raw_start), leading_i64(raw_end), before) {
        None => list.clear(),
        Some((start, end)) => {
            list.truncate(end + 1);
            list.drain(..start);
        }
    }
    if list.len() != before {
        state.dirty += 1;
    }
    Reply::Ok
}

/// Converts a start/end pair with negative-from-tail semantics into an
/// inclusive in-bounds range, or `None` when the range selects nothing.
fn normalize_range(mut start: i64, mut end: i64, len: usize) -> Option<(usize, usize)> {
    let len = len as i64;
    if start < 0 {
        start += len;
    }
    if end < 0 {
        end += len;
    }
    start = start.max(0);
    end = end.max(0);
    if start > end || start >= len {
        return None;
    }
    end = end.min(len - 1);
    Some((start as usize, end as usize))
}

/// Parses the leading base-10 integer of a byte string the way C's
/// `strtoll` does: optional whitespace and sign, then digits; anything
/// unparseable yields 0.
fn leading_i64(data: &[u8]) -> i64 {
    let mut rest = data;
    while let Some((&b, tail)) = rest.split_first() {
        if b.is_ascii_whitespace() {
            rest = tail;
        } else {
            break;
        }
    }
    let negative = match rest.first() {
        Some(b'-') => {
            rest = &rest[1..];
            true
        }
        Some(b'+') => {
            rest = &rest[1..];
            false
        }
        _ => false,
    };
    let mut value: i64 = 0;
    for &b in rest {
        if !b.is_ascii_digit() {
            break;
        }
        value = value
            .saturating_mul(10)
            .saturating_add(i64::from(b - b'0'));
    }
    if negative {
        -value
    } else {
        value
    }
}
