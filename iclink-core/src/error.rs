//! Error types for iclink
//!
//! A single error enum covers every failure the connection layer can surface.
//! The variants fall into three groups:
//!
//! - **Session failures**: `Transport`, `Protocol`. The coordinator handles
//!   these internally by reconnecting; callers only see them as the reason a
//!   specific request failed.
//! - **Request failures**: `Timeout`, `Rejected`, `Cancelled`. Returned to the
//!   caller that issued the request.
//! - **Admission failures**: `NotConnected`, `CircuitOpen`. Returned
//!   immediately, before anything is queued.
//!
//! # Examples
//!
//! ```rust
//! use iclink_core::Error;
//!
//! let err = Error::Timeout;
//! assert!(err.is_retryable());
//! assert!(!Error::NotConnected.is_retryable());
//! ```

use std::time::Duration;
use thiserror::Error;

/// Result type for iclink operations
pub type Result<T> = std::result::Result<T, Error>;

/// Application-level error type for iclink operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// Connect or write failure on the underlying byte stream
    ///
    /// Never raised to a consumer other than as the failure of a request that
    /// was on the wire when the session broke.
    #[error("Transport error: {0}")]
    Transport(String),

    /// No response arrived within the allowed window
    ///
    /// Also used when the flow-control deadlock timer frees a stuck slot and
    /// when the cleanup sweep ages out an orphaned entry.
    #[error("Request timeout")]
    Timeout,

    /// No session is open and queuing while disconnected is disabled
    #[error("Not connected")]
    NotConnected,

    /// Malformed or unexpected message shape from the remote side
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The circuit breaker is open; reconnection is suspended
    #[error("Circuit breaker open, next attempt in {}s", retry_in.as_secs())]
    CircuitOpen {
        /// Time remaining until the probe attempt
        retry_in: Duration,
    },

    /// The request was abandoned because the coordinator stopped
    #[error("Request cancelled")]
    Cancelled,

    /// The remote side answered with a non-success response code
    #[error("{command} rejected with response code {code}")]
    Rejected {
        /// Command echoed in the response
        command: String,
        /// Response code reported by the controller
        code: String,
    },

    /// Serialization or deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid configuration value
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Whether a caller may reasonably retry the failed operation
    ///
    /// `NotConnected` and `CircuitOpen` describe the session rather than the
    /// request, so retrying immediately will fail the same way.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Error::NotConnected | Error::CircuitOpen { .. } | Error::Config(_)
        )
    }

    /// Short label used as a metric attribute
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Transport(_) => "transport",
            Error::Timeout => "timeout",
            Error::NotConnected => "not_connected",
            Error::Protocol(_) => "protocol",
            Error::CircuitOpen { .. } => "circuit_open",
            Error::Cancelled => "cancelled",
            Error::Rejected { .. } => "rejected",
            Error::Serialization(_) => "serialization",
            Error::Config(_) => "config",
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Transport(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(Error::Timeout.is_retryable());
        assert!(Error::Transport("reset".into()).is_retryable());
        assert!(Error::Cancelled.is_retryable());
        assert!(!Error::NotConnected.is_retryable());
        assert!(!Error::CircuitOpen {
            retry_in: Duration::from_secs(10)
        }
        .is_retryable());
    }

    #[test]
    fn test_circuit_open_display() {
        let error = Error::CircuitOpen {
            retry_in: Duration::from_secs(42),
        };
        assert_eq!(error.to_string(), "Circuit breaker open, next attempt in 42s");
    }

    #[test]
    fn test_rejected_display() {
        let error = Error::Rejected {
            command: "SetParamList".into(),
            code: "400".into(),
        };
        let display = error.to_string();
        assert!(display.contains("SetParamList"));
        assert!(display.contains("400"));
    }

    #[test]
    fn test_from_serde_error() {
        let serde_error = serde_json::from_str::<serde_json::Value>("{bad").unwrap_err();
        match Error::from(serde_error) {
            Error::Serialization(msg) => assert!(!msg.is_empty()),
            other => panic!("Expected Serialization error, got {:?}", other),
        }
    }

    #[test]
    fn test_from_io_error() {
        let io_error = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        assert_eq!(Error::from(io_error), Error::Transport("refused".into()));
    }

    #[test]
    fn test_kind_labels() {
        assert_eq!(Error::Timeout.kind(), "timeout");
        assert_eq!(Error::Protocol("x".into()).kind(), "protocol");
    }
}
