//! Incremental Command Parser
//!
//! Parses the line-based request protocol out of a connection's
//! append-only byte buffer. The parser is incremental: it consumes the
//! buffer as far as it can and asks for more bytes when a command is
//! still incomplete, which lets the connection handler drain pipelined
//! commands without waiting for extra readiness events.
//!
//! ## Request Grammar
//!
//! A request is a space-separated token line terminated by `\n` (an
//! optional `\r` before it is stripped). For commands whose last
//! argument is transferred in bulk, the line carries the byte length of
//! that argument instead, and exactly that many raw bytes plus a
//! trailing terminator follow on the stream:
//!
//! ```text
//! set mykey 5\r\n
//! hello\r\n
//! ```
//!
//! ## State Machine
//!
//! ```text
//!          line complete,                    payload complete
//!          bulk command
//! AwaitingLine ────────────────> AwaitingBulk ────────────────┐
//!     ▲    │                                                  │
//!     │    │ line complete, inline command                    │
//!     │    ▼                                                  │
//!     │  dispatch <───────────────────────────────────────────┘
//!     └─────┘
//! ```
//!
//! ## Contract
//!
//! [`CommandParser::parse`] returns:
//! - `Ok(Some(argv))` - a full command was assembled; the consumed bytes
//!   have been split off the buffer
//! - `Ok(None)` - more bytes are needed
//! - `Err(e)` - the connection is protocol-invalid and must be destroyed

use bytes::{Bytes, BytesMut};
use thiserror::Error;

use crate::commands;

/// A command line with no terminator may grow at most this large before
/// the client is considered protocol-invalid.
pub const MAX_INLINE_SIZE: usize = 1024;

/// Maximum number of arguments retained from one request line; extra
/// tokens are silently dropped.
pub const MAX_ARGS: usize = 16;

/// Errors that make a connection protocol-invalid.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// No line terminator within [`MAX_INLINE_SIZE`] bytes
    #[error("inline request too long: {0} bytes buffered without a terminator")]
    InlineTooLong(usize),

    /// The declared bulk length is not a non-negative integer
    #[error("invalid bulk length: {0}")]
    InvalidBulkLength(String),
}

/// Incremental parser state for one connection.
#[derive(Debug, Default)]
pub struct CommandParser {
    /// Arguments accumulated for the command being assembled
    args: Vec<Bytes>,
    /// Bytes still owed for a pending bulk argument (payload + CRLF),
    /// `None` while awaiting an inline line
    bulk_remaining: Option<usize>,
}

impl CommandParser {
    /// Creates a parser in the awaiting-line state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attempts to assemble the next complete command from `buf`.
    ///
    /// Consumed bytes are split off the front of `buf`. Empty request
    /// lines are discarded. On success the parser is back in the
    /// awaiting-line state, ready for the next pipelined command.
    pub fn parse(&mut self, buf: &mut BytesMut) -> Result<Option<Vec<Bytes>>, ProtocolError> {
        loop {
            // Bulk payload pending: the inline part of the command was
            // already tokenized.
            if let Some(needed) = self.bulk_remaining {
                if buf.len() < needed {
                    return Ok(None);
                }
                let mut payload = buf.split_to(needed);
                payload.truncate(needed - 2); // drop the trailing terminator
                self.args.push(payload.freeze());
                self.bulk_remaining = None;
                return Ok(Some(std::mem::take(&mut self.args)));
            }

            let Some(newline) = buf.iter().position(|&b| b == b'\n') else {
                if buf.len() >= MAX_INLINE_SIZE {
                    return Err(ProtocolError::InlineTooLong(buf.len()));
                }
                return Ok(None);
            };

            let mut line = buf.split_to(newline + 1);
            line.truncate(newline);
            if line.last() == Some(&b'\r') {
                line.truncate(line.len() - 1);
            }

            let mut args: Vec<Bytes> = Vec::new();
            let line = line.freeze();
            for token in split_tokens(&line) {
                if args.len() == MAX_ARGS {
                    break;
                }
                args.push(line.slice_ref(token));
            }

            // Empty lines are discarded, not errors
            if args.is_empty() {
                continue;
            }

            // A known bulk-mode command at its declared arity carries
            // the byte length of its final argument as the last inline
            // token; swap it for the payload once it arrives.
            if let Some(spec) = commands::lookup(&args[0]) {
                if spec.bulk && args.len() == spec.arity {
                    let len_token = match args.pop() {
                        Some(t) => t,
                        None => continue,
                    };
                    let declared = parse_bulk_len(&len_token)?;
                    // The payload is owed together with its CRLF; a
                    // declared length that cannot fit both is bogus
                    let needed = declared
                        .checked_add(2)
                        .ok_or_else(|| bad_bulk_len(&len_token))?;
                    self.args = args;
                    self.bulk_remaining = Some(needed);
                    continue;
                }
            }

            return Ok(Some(args));
        }
    }

    /// True when a bulk payload is still owed (used by tests).
    pub fn awaiting_bulk(&self) -> bool {
        self.bulk_remaining.is_some()
    }
}

/// Splits a request line on single spaces, dropping empty tokens.
fn split_tokens(line: &[u8]) -> impl Iterator<Item = &[u8]> {
    line.split(|&b| b == b' ').filter(|t| !t.is_empty())
}

fn parse_bulk_len(token: &[u8]) -> Result<usize, ProtocolError> {
    std::str::from_utf8(token)
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .ok_or_else(|| bad_bulk_len(token))
}

fn bad_bulk_len(token: &[u8]) -> ProtocolError {
    ProtocolError::InvalidBulkLength(String::from_utf8_lossy(token).into())
}
