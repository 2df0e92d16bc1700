//! # Reply Values
//!
//! Purpose: Model a RESP2 reply exactly as the store sent it. Typed decoding
//! happens later, per command, so batches can keep the raw ordered list.

use crate::error::{Error, Result};

/// RESP reply value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// `$-1` or `*-1`.
    Nil,
    /// +OK or +PONG style responses.
    Simple(Vec<u8>),
    /// -ERR ... responses.
    Error(Vec<u8>),
    /// :123 responses.
    Integer(i64),
    /// $... bulk strings.
    Bulk(Vec<u8>),
    /// *... arrays.
    Array(Vec<Value>),
}

impl Value {
    /// Returns true for `Nil`.
    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    /// Returns true for an error reply.
    pub fn is_error(&self) -> bool {
        matches!(self, Value::Error(_))
    }

    /// Converts an error reply into `Err`, passing every other value through.
    pub fn into_result(self) -> Result<Value> {
        match self {
            Value::Error(raw) => Err(Error::from_reply(&raw)),
            other => Ok(other),
        }
    }

    /// Borrows the payload of a simple or bulk string.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Simple(data) | Value::Bulk(data) => Some(data),
            _ => None,
        }
    }

    /// Short label used in protocol error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Simple(_) => "simple",
            Value::Error(_) => "error",
            Value::Integer(_) => "integer",
            Value::Bulk(_) => "bulk",
            Value::Array(_) => "array",
        }
    }

    /// Shorthand for `Value::Simple(b"OK")`.
    pub fn ok() -> Self {
        Value::Simple(b"OK".to_vec())
    }

    /// Builds an error reply from text, e.g. `Value::error("ERR syntax error")`.
    pub fn error(message: impl AsRef<str>) -> Self {
        Value::Error(message.as_ref().as_bytes().to_vec())
    }

    /// Builds a bulk reply.
    pub fn bulk(data: impl Into<Vec<u8>>) -> Self {
        Value::Bulk(data.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_reply_becomes_command_error() {
        let err = Value::error("WRONGTYPE bad").into_result().unwrap_err();
        assert_eq!(err.code(), Some("WRONGTYPE"));
    }

    #[test]
    fn non_error_passes_through() {
        assert_eq!(Value::Integer(3).into_result().unwrap(), Value::Integer(3));
    }
}
