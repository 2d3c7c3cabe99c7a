//! Per-client connection tasks.

pub mod handler;

pub use handler::{handle_connection, ConnectionError, ConnectionHandler, ServerStats};
