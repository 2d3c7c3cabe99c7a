//! Storage Module
//!
//! The in-memory side of emberkv: tagged values, the selectable
//! keyspaces, and the binary snapshot engine that persists them.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          Store                              │
//! │  ┌────────┐ ┌────────┐ ┌────────┐           ┌────────┐     │
//! │  │  DB 0  │ │  DB 1  │ │  DB 2  │  . . .    │  DB N  │     │
//! │  │HashMap │ │HashMap │ │HashMap │           │HashMap │     │
//! │  └────────┘ └────────┘ └────────┘           └────────┘     │
//! └──────────────────────────┬──────────────────────────────────┘
//!                            │ save / load
//!                            ▼
//!              ┌───────────────────────────┐
//!              │    snapshot (dump.edb)    │
//!              └───────────────────────────┘
//! ```
//!
//! There is no locking at this level: the `ServerState` mutex above the
//! `Store` serializes every command, and the background snapshot writer
//! receives its own deep clone.

pub mod snapshot;
pub mod store;
pub mod value;

// Re-export commonly used types
pub use snapshot::{SnapshotError, MAGIC};
pub use store::{Database, Store, TransferError};
pub use value::Value;
