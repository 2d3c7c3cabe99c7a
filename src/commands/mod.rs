//! Command table and dispatcher.

pub mod handler;
pub mod table;

pub use handler::execute;
pub use table::{lookup, CommandKind, CommandSpec, COMMAND_TABLE};
