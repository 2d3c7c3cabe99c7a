//! Reply Types and Wire Serialization
//!
//! The server speaks a line-oriented protocol. Every reply form ends in
//! CRLF:
//!
//! - `+OK` / `+PONG`: positive acknowledgements
//! - `-ERR <message>`: errors (one uniform representation for every
//!   client-visible error)
//! - `nil`: the distinguished no-value reply
//! - `<n>`: a bare integer line
//! - `<len>` line followed by `len` payload bytes and CRLF: a bulk reply
//! - `<count>` line followed by `count` bulk groups: a multi-bulk reply
//!
//! Bulk replies are binary-safe; everything else is plain ASCII.

use bytes::Bytes;
use std::fmt;

/// The CRLF terminator used on every protocol line
pub const CRLF: &[u8] = b"\r\n";

/// A reply queued for transmission to a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// `+OK`
    Ok,
    /// `+PONG`
    Pong,
    /// `-ERR <message>`
    Error(String),
    /// `nil` - the distinguished no-value reply
    Nil,
    /// A bare line of raw bytes (used by RANDOMKEY; empty for an empty
    /// keyspace)
    Line(Bytes),
    /// A bare integer line
    Integer(i64),
    /// Length-prefixed binary-safe payload
    Bulk(Bytes),
    /// Count line followed by that many bulk groups
    MultiBulk(Vec<Bytes>),
}

impl Reply {
    /// Creates an error reply from a message.
    pub fn error(msg: impl Into<String>) -> Self {
        Reply::Error(msg.into())
    }

    /// Creates a bulk reply.
    pub fn bulk(data: impl Into<Bytes>) -> Self {
        Reply::Bulk(data.into())
    }

    /// Returns true if this reply is an error.
    pub fn is_error(&self) -> bool {
        matches!(self, Reply::Error(_))
    }

    /// Serializes the reply to a fresh byte vector.
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.serialize_into(&mut buf);
        buf
    }

    /// Serializes the reply into an existing buffer.
    ///
    /// This is the hot path: the connection handler appends a whole
    /// pipelined batch into one buffer before flushing.
    pub fn serialize_into(&self, buf: &mut Vec<u8>) {
        match self {
            Reply::Ok => buf.extend_from_slice(b"+OK\r\n"),
            Reply::Pong => buf.extend_from_slice(b"+PONG\r\n"),
            Reply::Error(msg) => {
                buf.extend_from_slice(b"-ERR ");
                buf.extend_from_slice(msg.as_bytes());
                buf.extend_from_slice(CRLF);
            }
            Reply::Nil => buf.extend_from_slice(b"nil\r\n"),
            Reply::Line(data) => {
                buf.extend_from_slice(data);
                buf.extend_from_slice(CRLF);
            }
            Reply::Integer(n) => {
                buf.extend_from_slice(n.to_string().as_bytes());
                buf.extend_from_slice(CRLF);
            }
            Reply::Bulk(data) => {
                buf.extend_from_slice(data.len().to_string().as_bytes());
                buf.extend_from_slice(CRLF);
                buf.extend_from_slice(data);
                buf.extend_from_slice(CRLF);
            }
            Reply::MultiBulk(items) => {
                buf.extend_from_slice(items.len().to_string().as_bytes());
                buf.extend_from_slice(CRLF);
                for item in items {
                    buf.extend_from_slice(item.len().to_string().as_bytes());
                    buf.extend_from_slice(CRLF);
                    buf.extend_from_slice(item);
                    buf.extend_from_slice(CRLF);
                }
            }
        }
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Ok => write!(f, "OK"),
            Reply::Pong => write!(f, "PONG"),
            Reply::Error(msg) => write!(f, "(error) {}", msg),
            Reply::Nil => write!(f, "(nil)"),
            Reply::Line(data) => write!(f, "{}", String::from_utf8_lossy(data)),
            Reply::Integer(n) => write!(f, "(integer) {}", n),
            Reply::Bulk(data) => write!(f, "\"{}\"", String::from_utf8_lossy(data)),
            Reply::MultiBulk(items) => {
                for (i, item) in items.iter().enumerate() {
                    writeln!(f, "{}) {}", i + 1, String::from_utf8_lossy(item))?;
                }
                Ok(())
            }
        }
    }
}
