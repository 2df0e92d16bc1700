//! # Error Taxonomy
//!
//! Purpose: Give every failure a kind at the point where it is created, so
//! callers branch on `Error::kind()` instead of matching message strings.
//!
//! ## Design Principles
//! 1. **Tag at Origin**: Each variant carries its classification; there is no
//!    lookup table of "known" errors to keep in sync.
//! 2. **Cheap to Clone**: Batch results hand out the same per-command error to
//!    every reader, so payloads are plain strings.
//! 3. **Not-Found Is Not a Failure**: A nil reply has its own variant and never
//!    shares a kind with transport problems.

use std::fmt;
use std::io;

use thiserror::Error;

/// Result alias used across the workspace.
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification used by callers to decide how to react.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The key or field does not exist; usually a cache miss.
    NotFound,
    /// Configuration is invalid or incomplete.
    Config,
    /// The round trip could not be completed (dial, IO, pool, routing).
    Connection,
    /// The call deadline elapsed or a socket timed out.
    Timeout,
    /// The caller cancelled the call.
    Cancelled,
    /// The store executed the command and replied with an error.
    Command,
    /// Malformed or unexpected wire data.
    Protocol,
    /// The API was used outside its documented state machine.
    InvalidUse,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::NotFound => "not found",
            ErrorKind::Config => "configuration",
            ErrorKind::Connection => "connection",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Command => "command",
            ErrorKind::Protocol => "protocol",
            ErrorKind::InvalidUse => "invalid use",
        };
        f.write_str(name)
    }
}

/// Errors surfaced by the access layer.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// A read targeted a missing key, field or member.
    #[error("key not found")]
    NotFound,

    /// A required configuration field is absent or empty.
    #[error("invalid configuration: missing `{field}`")]
    MissingConfig { field: &'static str },

    /// A configuration field holds an unusable value.
    #[error("invalid configuration: `{field}` {reason}")]
    InvalidConfig { field: &'static str, reason: String },

    /// Network failure while dialling, writing or reading.
    ///
    /// `unsent` is true when the request provably never reached the store,
    /// which makes the call safe to retry.
    #[error("connection error: {message}")]
    Connection { message: String, unsent: bool },

    /// No pooled connection became available in time.
    #[error("connection pool exhausted")]
    PoolExhausted,

    /// Cluster redirects exceeded the configured bound.
    #[error("too many cluster redirects ({0})")]
    TooManyRedirects(usize),

    /// No sentinel could name a master for the supervised group.
    #[error("no master found for `{0}`")]
    NoMaster(String),

    /// Deadline elapsed or a socket timed out.
    #[error("operation timed out")]
    Timeout,

    /// The call was cancelled through its `CancelToken`.
    #[error("operation cancelled")]
    Cancelled,

    /// The store replied with an error, e.g. `WRONGTYPE`.
    #[error("{code} {message}")]
    Command { code: String, message: String },

    /// RESP framing violation or a reply shape the command does not produce.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Batch or client used outside its state machine.
    #[error("invalid use: {0}")]
    InvalidUse(&'static str),
}

impl Error {
    /// Returns the classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NotFound => ErrorKind::NotFound,
            Error::MissingConfig { .. } | Error::InvalidConfig { .. } => ErrorKind::Config,
            Error::Connection { .. }
            | Error::PoolExhausted
            | Error::TooManyRedirects(_)
            | Error::NoMaster(_) => ErrorKind::Connection,
            Error::Timeout => ErrorKind::Timeout,
            Error::Cancelled => ErrorKind::Cancelled,
            Error::Command { .. } => ErrorKind::Command,
            Error::Protocol(_) => ErrorKind::Protocol,
            Error::InvalidUse(_) => ErrorKind::InvalidUse,
        }
    }

    /// True for a logical miss (nil reply).
    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    /// True for connectivity problems worth failing over on.
    pub fn is_connection(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Connection | ErrorKind::Timeout | ErrorKind::Cancelled
        )
    }

    /// True when the store rejected the command.
    pub fn is_command(&self) -> bool {
        self.kind() == ErrorKind::Command
    }

    /// True for state machine violations.
    pub fn is_invalid_use(&self) -> bool {
        self.kind() == ErrorKind::InvalidUse
    }

    /// The leading token of a store error reply (`WRONGTYPE`, `MOVED`, ...).
    pub fn code(&self) -> Option<&str> {
        match self {
            Error::Command { code, .. } => Some(code),
            _ => None,
        }
    }

    /// True when the request never left the client and may be re-sent.
    pub fn is_unsent(&self) -> bool {
        matches!(self, Error::Connection { unsent: true, .. })
    }

    /// Builds a connection error for a request that was never delivered.
    pub fn unsent(message: impl Into<String>) -> Self {
        Error::Connection {
            message: message.into(),
            unsent: true,
        }
    }

    /// Builds a connection error for a request that may have been delivered.
    pub fn connection(message: impl Into<String>) -> Self {
        Error::Connection {
            message: message.into(),
            unsent: false,
        }
    }

    /// Splits a raw error reply such as `WRONGTYPE Operation against ...`.
    pub fn from_reply(raw: &[u8]) -> Self {
        let text = String::from_utf8_lossy(raw);
        let (code, message) = match text.split_once(' ') {
            Some((code, rest)) => (code.to_string(), rest.to_string()),
            None => (text.to_string(), String::new()),
        };
        Error::Command { code, message }
    }

    /// Marks a connection error as possibly delivered.
    pub(crate) fn into_sent(self) -> Self {
        match self {
            Error::Connection { message, .. } => Error::Connection {
                message,
                unsent: false,
            },
            other => other,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => Error::Timeout,
            _ => Error::connection(err.to_string()),
        }
    }
}

/// Converts an IO error raised before the request bytes were flushed.
pub fn unsent_io(err: io::Error) -> Error {
    match Error::from(err) {
        Error::Connection { message, .. } => Error::unsent(message),
        other => other,
    }
}

/// Converts an IO error raised after the request may have been flushed.
pub fn sent_io(err: io::Error) -> Error {
    Error::from(err).into_sent()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_reply_code() {
        let err = Error::from_reply(b"WRONGTYPE Operation against a key holding the wrong kind of value");
        assert_eq!(err.kind(), ErrorKind::Command);
        assert_eq!(err.code(), Some("WRONGTYPE"));
    }

    #[test]
    fn reply_without_message_keeps_code() {
        let err = Error::from_reply(b"ERR");
        assert_eq!(err.code(), Some("ERR"));
    }

    #[test]
    fn io_timeouts_classify_as_timeout() {
        let err: Error = io::Error::new(io::ErrorKind::WouldBlock, "slow").into();
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert!(err.is_connection());
    }

    #[test]
    fn not_found_is_not_a_connection_problem() {
        assert!(Error::NotFound.is_not_found());
        assert!(!Error::NotFound.is_connection());
    }

    #[test]
    fn unsent_marker_survives_conversion() {
        let err = unsent_io(io::Error::new(io::ErrorKind::BrokenPipe, "pipe"));
        assert!(err.is_unsent());
        let err = sent_io(io::Error::new(io::ErrorKind::BrokenPipe, "pipe"));
        assert!(!err.is_unsent());
    }
}
