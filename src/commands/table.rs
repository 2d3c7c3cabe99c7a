//! Command Table
//!
//! Every command the server understands is declared here once, as a row
//! in a const table. The row carries the wire name, the exact number of
//! arguments (command name included) and whether the last argument is
//! transferred in bulk mode. The parser consults the table to decide
//! when to switch into bulk mode; the dispatcher consults it to reject
//! malformed requests before touching the keyspace.

use std::collections::HashMap;
use std::sync::OnceLock;

/// Closed set of server commands.
///
/// `QUIT` is intentionally absent: it never reaches the dispatcher and
/// is handled at the connection level instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    Ping,
    Echo,
    Set,
    SetNx,
    Get,
    Del,
    Exists,
    Incr,
    Decr,
    Select,
    RandomKey,
    Keys,
    DbSize,
    LastSave,
    Save,
    BgSave,
    Shutdown,
    Rename,
    RenameNx,
    Move,
    LPush,
    RPush,
    LLen,
    LIndex,
    LPop,
    RPop,
    LRange,
    LTrim,
}

/// Static description of one command.
#[derive(Debug, Clone, Copy)]
pub struct CommandSpec {
    pub kind: CommandKind,
    /// Lowercase wire name.
    pub name: &'static str,
    /// Exact argument count, command name included.
    pub arity: usize,
    /// Whether the final argument arrives as a counted binary payload.
    pub bulk: bool,
}

const fn spec(kind: CommandKind, name: &'static str, arity: usize, bulk: bool) -> CommandSpec {
    CommandSpec { kind, name, arity, bulk }
}

pub const COMMAND_TABLE: &[CommandSpec] = &[
    spec(CommandKind::Ping, "ping", 1, false),
    spec(CommandKind::Echo, "echo", 2, true),
    spec(CommandKind::Set, "set", 3, true),
    spec(CommandKind::SetNx, "setnx", 3, true),
    spec(CommandKind::Get, "get", 2, false),
    spec(CommandKind::Del, "del", 2, false),
    spec(CommandKind::Exists, "exists", 2, false),
    spec(CommandKind::Incr, "incr", 2, false),
    spec(CommandKind::Decr, "decr", 2, false),
    spec(CommandKind::Select, "select", 2, false),
    spec(CommandKind::RandomKey, "randomkey", 1, false),
    spec(CommandKind::Keys, "keys", 2, false),
    spec(CommandKind::DbSize, "dbsize", 1, false),
    spec(CommandKind::LastSave, "lastsave", 1, false),
    spec(CommandKind::Save, "save", 1, false),
    spec(CommandKind::BgSave, "bgsave", 1, false),
    spec(CommandKind::Shutdown, "shutdown", 1, false),
    spec(CommandKind::Rename, "rename", 3, false),
    spec(CommandKind::RenameNx, "renamenx", 3, false),
    spec(CommandKind::Move, "move", 3, false),
    spec(CommandKind::LPush, "lpush", 3, true),
    spec(CommandKind::RPush, "rpush", 3, true),
    spec(CommandKind::LLen, "llen", 2, false),
    spec(CommandKind::LIndex, "lindex", 3, false),
    spec(CommandKind::LPop, "lpop", 2, false),
    spec(CommandKind::RPop, "rpop", 2, false),
    spec(CommandKind::LRange, "lrange", 4, false),
    spec(CommandKind::LTrim, "ltrim", 4, false),
];

fn table_index() -> &'static HashMap<&'static str, &'static CommandSpec> {
    static INDEX: OnceLock<HashMap<&'static str, &'static CommandSpec>> = OnceLock::new();
    INDEX.get_or_init(|| COMMAND_TABLE.iter().map(|s| (s.name, s)).collect())
}

/// Looks a command up by its wire name, case-insensitively.
pub fn lookup(name: &[u8]) -> Option<&'static CommandSpec> {
    // Longest command name is "randomkey"; anything longer cannot match
    // and must not allocate.
    if name.len() > 16 || !name.is_ascii() {
        return None;
    }
    let mut lowered = [0u8; 16];
    for (dst, src) in lowered.iter_mut().zip(name) {
        *dst = src.to_ascii_lowercase();
    }
    let lowered = std::str::from_utf8(&lowered[..name.len()]).ok()?;
    table_index().get(lowered).copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_is_case_insensitive() {
        let spec = lookup(b"SeT").unwrap();
        assert_eq!(spec.kind, CommandKind::Set);
        assert_eq!(spec.arity, 3);
        assert!(spec.bulk);
    }

    #[test]
    fn test_lookup_unknown_name() {
        assert!(lookup(b"flushall").is_none());
        assert!(lookup(b"").is_none());
        assert!(lookup(b"this-name-is-far-too-long-to-match").is_none());
    }

    #[test]
    fn test_table_names_are_unique_and_lowercase() {
        let mut seen = std::collections::HashSet::new();
        for spec in COMMAND_TABLE {
            assert!(seen.insert(spec.name), "duplicate name {}", spec.name);
            assert_eq!(spec.name, spec.name.to_lowercase());
        }
    }

    #[test]
    fn test_bulk_commands_have_payload_arity() {
        for spec in COMMAND_TABLE.iter().filter(|s| s.bulk) {
            assert!(spec.arity >= 2, "{} cannot carry a payload", spec.name);
        }
    }
}
