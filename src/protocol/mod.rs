//! Wire protocol: request parsing and reply serialization.
//!
//! Requests are newline-terminated token lines; commands that carry a
//! binary payload announce its byte length as the last token and send
//! the raw bytes on the following line. Replies are plain lines, with
//! bulk data prefixed by a length line.

pub mod parser;
pub mod reply;

pub use parser::{CommandParser, ProtocolError, MAX_ARGS, MAX_INLINE_SIZE};
pub use reply::{Reply, CRLF};
