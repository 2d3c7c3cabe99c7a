//! # emberkv - A Single-Threaded In-Memory Key-Value Server
//!
//! emberkv is an in-memory key-value database speaking a simple line-based
//! TCP protocol, with point-in-time binary snapshots persisted to disk.
//! The whole data set lives in memory, organised into several independently
//! selectable keyspaces ("databases").
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────────┐
//! │                              emberkv                                  │
//! │                                                                       │
//! │  ┌─────────────┐    ┌──────────────┐    ┌──────────────┐              │
//! │  │ TCP Server  │───>│  Connection  │───>│   Command    │              │
//! │  │ (Listener)  │    │   Handler    │    │   Handler    │              │
//! │  └─────────────┘    └──────────────┘    └──────┬───────┘              │
//! │                                                │                      │
//! │                                                ▼                      │
//! │  ┌─────────────┐    ┌──────────────────────────────────────────────┐  │
//! │  │  Command    │    │                 ServerState                  │  │
//! │  │  Parser     │    │  ┌──────┐ ┌──────┐ ┌──────┐         ┌──────┐ │  │
//! │  │             │    │  │ DB 0 │ │ DB 1 │ │ DB 2 │  . . .  │ DB N │ │  │
//! │  └─────────────┘    │  └──────┘ └──────┘ └──────┘         └──────┘ │  │
//! │                     └──────────────┬───────────────────────────────┘  │
//! │                                    │                                  │
//! │                     ┌──────────────┴───────────────┐                  │
//! │                     │        Maintenance Cron      │                  │
//! │                     │   (save policy, bgsave poll) │                  │
//! │                     └──────────────┬───────────────┘                  │
//! │                                    ▼                                  │
//! │                     ┌──────────────────────────────┐                  │
//! │                     │      Snapshot (dump.edb)     │                  │
//! │                     └──────────────────────────────┘                  │
//! └───────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Supported Commands
//!
//! ### String Commands
//! - `SET key length` / `SETNX key length` (value sent as bulk payload)
//! - `GET key`
//! - `DEL key`
//! - `EXISTS key`
//! - `INCR key` / `DECR key`
//!
//! ### List Commands
//! - `LPUSH key length` / `RPUSH key length` (value sent as bulk payload)
//! - `LPOP key` / `RPOP key`
//! - `LLEN key`
//! - `LINDEX key index`
//! - `LRANGE key start end`
//! - `LTRIM key start end`
//!
//! ### Keyspace Commands
//! - `SELECT index`
//! - `RANDOMKEY`
//! - `KEYS pattern`
//! - `DBSIZE`
//! - `RENAME key newkey` / `RENAMENX key newkey`
//! - `MOVE key dbindex`
//!
//! ### Server Commands
//! - `PING`, `ECHO length`
//! - `SAVE`, `BGSAVE`, `LASTSAVE`
//! - `SHUTDOWN`, `QUIT`
//!
//! ## Module Overview
//!
//! - [`protocol`]: the line protocol parser and reply serialization
//! - [`commands`]: command table and execution against the keyspaces
//! - [`connection`]: per-client connection tasks
//! - [`storage`]: keyspaces, values, and snapshot persistence
//! - [`server`]: shared server state and the maintenance cron
//! - [`config`]: startup configuration file reader
//! - [`glob`]: glob-style pattern matching for `KEYS`
//!
//! ## Design Highlights
//!
//! ### Single-Threaded Execution
//!
//! All command parsing, dispatch and store mutation run on a
//! current-thread tokio runtime: no two commands ever execute
//! concurrently, and commands on one connection execute and reply in
//! strict arrival order even when pipelined. The only worker concurrency
//! is the background snapshot writer, which operates on its own deep
//! snapshot of the keyspaces.
//!
//! ### Binary-Safe Values
//!
//! Keys and values are `bytes::Bytes`, so values may hold arbitrary
//! binary payloads (transferred over the wire in bulk mode) and a
//! snapshot clone shares payload memory instead of copying it.

pub mod commands;
pub mod config;
pub mod connection;
pub mod glob;
pub mod protocol;
pub mod server;
pub mod storage;

// Re-export commonly used types for convenience
pub use commands::{execute, lookup, CommandKind, CommandSpec};
pub use config::Config;
pub use connection::{handle_connection, ServerStats};
pub use protocol::{CommandParser, ProtocolError, Reply};
pub use server::{SaveRule, ServerState, SharedState};
pub use storage::{Database, SnapshotError, Store, Value};

/// The default port emberkv listens on
pub const DEFAULT_PORT: u16 = 6379;

/// The default host emberkv binds to
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Version of emberkv
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
