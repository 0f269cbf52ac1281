//! Error types for pigeon.
//!
//! This module provides the error type shared by the codecs, the ingest
//! server, the upstream client and the coordinator.

use thiserror::Error;

/// Result type alias for pigeon operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for pigeon operations.
#[derive(Error, Debug)]
pub enum Error {
    /// A stream target could not be parsed as a URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// The ingest listener could not bind its port
    #[error("Failed to bind {addr}: {reason}")]
    Bind {
        /// Address the listener tried to bind
        addr: String,
        /// Human-readable cause (port in use, permission denied, ...)
        reason: String,
    },

    /// Malformed HTTP or SSE framing
    #[error("Parse error: {0}")]
    Parse(String),

    /// Transport-level errors
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Cancelled operation
    #[error("Operation cancelled")]
    Cancelled,

    /// The reconnect budget was exhausted
    #[error("Max reconnect attempts reached ({0})")]
    MaxAttemptsExceeded(u32),

    /// IO errors outside of a live transport
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal errors
    #[error("Internal error: {0}")]
    Internal(String),

    /// Other errors
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Transport-specific errors.
#[derive(Error, Debug)]
pub enum TransportError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP request error (DNS failure, connection refused, reset, ...)
    #[error("HTTP error: {0}")]
    Request(#[from] reqwest::Error),

    /// Upstream answered with a non-success status
    #[error("Unexpected HTTP status: {0}")]
    Status(u16),

    /// Upstream closed the event stream
    #[error("Event stream ended")]
    StreamEnded,

    /// Connection closed
    #[error("Connection closed")]
    ConnectionClosed,
}

impl Error {
    /// Create a parse error.
    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse(message.into())
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Create an invalid URL error.
    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::InvalidUrl(url.into())
    }

    /// Create a bind error.
    pub fn bind(addr: impl ToString, reason: impl ToString) -> Self {
        Self::Bind {
            addr: addr.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Whether this error is an explicit cancellation rather than a fault.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_creation() {
        let err = Error::bind("127.0.0.1:8787", "address in use");
        assert_eq!(
            err.to_string(),
            "Failed to bind 127.0.0.1:8787: address in use"
        );

        let err = Error::parse("missing request line");
        assert!(!err.is_cancelled());
        assert!(Error::Cancelled.is_cancelled());
    }

    #[test]
    fn transport_error_wraps() {
        let err: Error = TransportError::Status(503).into();
        assert_eq!(
            err.to_string(),
            "Transport error: Unexpected HTTP status: 503"
        );
        assert_eq!(
            Error::MaxAttemptsExceeded(10).to_string(),
            "Max reconnect attempts reached (10)"
        );
    }
}
