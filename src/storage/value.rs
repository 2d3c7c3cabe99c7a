//! Stored Value Types
//!
//! A keyspace entry is either a binary-safe string or an ordered list of
//! binary-safe strings. Shared ownership of payloads is expressed
//! through `Bytes` (refcounted), and the value itself is moved or cloned
//! under normal Rust ownership.

use bytes::Bytes;
use std::collections::VecDeque;

/// A value reachable from a keyspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// Binary-safe string
    Str(Bytes),
    /// Ordered list of binary-safe strings, head first
    List(VecDeque<Bytes>),
}

impl Value {
    /// Creates a string value.
    pub fn str(data: impl Into<Bytes>) -> Self {
        Value::Str(data.into())
    }

    /// Creates an empty list value.
    pub fn empty_list() -> Self {
        Value::List(VecDeque::new())
    }

    /// Returns true if this value is a string.
    pub fn is_str(&self) -> bool {
        matches!(self, Value::Str(_))
    }

    /// Returns true if this value is a list.
    pub fn is_list(&self) -> bool {
        matches!(self, Value::List(_))
    }

    /// Returns the string payload, if this is a string value.
    pub fn as_str(&self) -> Option<&Bytes> {
        match self {
            Value::Str(b) => Some(b),
            Value::List(_) => None,
        }
    }

    /// Returns the list payload, if this is a list value.
    pub fn as_list(&self) -> Option<&VecDeque<Bytes>> {
        match self {
            Value::List(l) => Some(l),
            Value::Str(_) => None,
        }
    }

    /// Returns the list payload mutably, if this is a list value.
    pub fn as_list_mut(&mut self) -> Option<&mut VecDeque<Bytes>> {
        match self {
            Value::List(l) => Some(l),
            Value::Str(_) => None,
        }
    }
}
