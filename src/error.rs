//! Error types for the devtools bridge.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use devtools_bridge::{Result, Requester};
//!
//! async fn example(rpc: &Requester) -> Result<()> {
//!     let sum = rpc.call("math:add", serde_json::json!({ "a": 5, "b": 3 })).await?;
//!     assert_eq!(sum, 8);
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Configuration | [`Error::Config`] |
//! | RPC | [`Error::CallTimeout`], [`Error::Remote`], [`Error::TooManyPendingCalls`], [`Error::InvalidPayload`] |
//! | Transport | [`Error::TransportClosed`], [`Error::ConnectionClosed`], [`Error::Connection`], [`Error::Protocol`] |
//! | External | [`Error::Io`], [`Error::Json`], [`Error::WebSocket`], [`Error::Url`] |

// ============================================================================
// Imports
// ============================================================================

use std::io::Error as IoError;
use std::result::Result as StdResult;

use thiserror::Error;
use tokio_tungstenite::tungstenite::Error as WsError;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

/// Error type produced by method handlers.
///
/// Any `std::error::Error` converts into it with `?`, as do `&str` and
/// `String`. Its `Display` text becomes the `error` field of the response.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync + 'static>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when options or builder state are invalid.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    // ========================================================================
    // RPC Errors
    // ========================================================================
    /// No response arrived before the call deadline.
    ///
    /// Client-local: never sent over the wire.
    #[error("RPC Timeout: {method}")]
    CallTimeout {
        /// Method that was called.
        method: String,
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// The responder answered with an error.
    ///
    /// Covers unknown methods and handler failures alike; the display text
    /// is exactly the remote message.
    #[error("{message}")]
    Remote {
        /// Method that was called.
        method: String,
        /// Error message sent by the responder.
        message: String,
    },

    /// Too many calls are awaiting a response.
    #[error("Too many pending calls: {pending}/{max}")]
    TooManyPendingCalls {
        /// Calls currently pending.
        pending: usize,
        /// Configured maximum.
        max: usize,
    },

    /// A payload could not be converted to or from the requested type.
    #[error("Invalid payload for {method}: {message}")]
    InvalidPayload {
        /// Method or event the payload belongs to.
        method: String,
        /// Decoder message.
        message: String,
    },

    // ========================================================================
    // Transport Errors
    // ========================================================================
    /// Publish on a broadcast handle that has already been released.
    #[error("Transport closed: {topic}")]
    TransportClosed {
        /// Topic of the released handle.
        topic: String,
    },

    /// Point-to-point connection closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Connection could not be established.
    #[error("Connection failed: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
    },

    /// Malformed payload surfaced to a caller.
    #[error("Protocol error: {message}")]
    Protocol {
        /// Description of the protocol violation.
        message: String,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),

    /// URL parse error.
    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a call timeout error.
    #[inline]
    pub fn call_timeout(method: impl Into<String>, timeout_ms: u64) -> Self {
        Self::CallTimeout {
            method: method.into(),
            timeout_ms,
        }
    }

    /// Creates a remote error.
    #[inline]
    pub fn remote(method: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Remote {
            method: method.into(),
            message: message.into(),
        }
    }

    /// Creates an invalid payload error.
    #[inline]
    pub fn invalid_payload(method: impl Into<String>, message: impl ToString) -> Self {
        Self::InvalidPayload {
            method: method.into(),
            message: message.to_string(),
        }
    }

    /// Creates a transport closed error.
    #[inline]
    pub fn transport_closed(topic: impl Into<String>) -> Self {
        Self::TransportClosed {
            topic: topic.into(),
        }
    }

    /// Creates a connection error.
    #[inline]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Creates a protocol error.
    #[inline]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a call timeout.
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::CallTimeout { .. })
    }

    /// Returns `true` if the responder answered with an error.
    #[inline]
    #[must_use]
    pub fn is_remote(&self) -> bool {
        matches!(self, Self::Remote { .. })
    }

    /// Returns `true` if a broadcast handle was already released.
    #[inline]
    #[must_use]
    pub fn is_transport_closed(&self) -> bool {
        matches!(self, Self::TransportClosed { .. })
    }

    /// Returns `true` if this is a connection error.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. } | Self::ConnectionClosed | Self::WebSocket(_)
        )
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::ErrorKind;

    #[test]
    fn test_call_timeout_display_names_method() {
        let err = Error::call_timeout("math:add", 5000);
        assert_eq!(err.to_string(), "RPC Timeout: math:add");
        assert!(err.is_timeout());
    }

    #[test]
    fn test_remote_display_is_message() {
        let err = Error::remote("error:throw", "boom");
        assert_eq!(err.to_string(), "boom");
        assert!(err.is_remote());
        assert!(!err.is_timeout());
    }

    #[test]
    fn test_config_error() {
        let err = Error::config("namespace must not be empty");
        assert_eq!(
            err.to_string(),
            "Configuration error: namespace must not be empty"
        );
    }

    #[test]
    fn test_is_transport_closed() {
        let closed = Error::transport_closed("u-devtools:console");
        assert!(closed.is_transport_closed());
        assert!(!Error::ConnectionClosed.is_transport_closed());
    }

    #[test]
    fn test_is_connection_error() {
        assert!(Error::connection("refused").is_connection_error());
        assert!(Error::ConnectionClosed.is_connection_error());
        assert!(!Error::config("test").is_connection_error());
    }

    #[test]
    fn test_from_io_error() {
        let io_err = IoError::new(ErrorKind::AddrInUse, "port taken");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_from_json_error() {
        let json_err = serde_json::from_str::<String>("invalid").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Json(_)));
    }

    #[test]
    fn test_handler_error_from_str() {
        let err: HandlerError = "boom".into();
        assert_eq!(err.to_string(), "boom");
    }
}
