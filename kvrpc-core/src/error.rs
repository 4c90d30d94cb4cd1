//! Error types for kvrpc
//!
//! Errors fall in two groups, and the split decides where they surface:
//!
//! - **Transport errors** (`MalformedEnvelope`, `RouteNotFound`, `Overloaded`,
//!   `UnsupportedVerb`, `WebSocket`, `Io`, `ConnectionClosed`) are handled by
//!   the transport layer. They never reach a bound method and are never
//!   wrapped in a response envelope.
//! - **Application errors** (`ArityMismatch`, `ParameterDecode`, `Service`,
//!   `Serialization`, `Internal`) are converted into an error envelope at the
//!   binder boundary. [`Error::reply_message`] gives the text that goes on
//!   the wire.
//!
//! # Examples
//!
//! ```rust
//! use kvrpc_core::Error;
//!
//! let error = Error::ArityMismatch { expected: 2, actual: 1 };
//! assert_eq!(error.reply_message(), "Invalid parameters");
//!
//! let error = Error::service("user already exists");
//! assert_eq!(error.reply_message(), "user already exists");
//! ```

use thiserror::Error;

/// Result type for kvrpc operations
pub type Result<T> = std::result::Result<T, Error>;

/// Message sent back when the parameter count does not match the binding
pub const INVALID_PARAMETERS: &str = "Invalid parameters";

/// Message sent back when a failure carries no text of its own
pub const GENERIC_ERROR: &str = "Error";

/// Error type for kvrpc operations
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// The payload is not a syntactically valid request envelope
    ///
    /// There is no id to answer, so the transport aborts the request.
    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// `params.len()` differs from the binding's declared arity
    #[error("Invalid parameters (expected {expected}, got {actual})")]
    ArityMismatch {
        /// Arity the binding declares
        expected: usize,
        /// Number of params the request carried
        actual: usize,
    },

    /// A positional parameter could not be decoded into its declared type
    #[error("Cannot decode parameter {index}: {message}")]
    ParameterDecode {
        /// Zero-based position of the offending parameter
        index: usize,
        /// Decoder message
        message: String,
    },

    /// Failure raised by a bound service method
    ///
    /// The message is forwarded verbatim to the caller.
    #[error("{0}")]
    Service(String),

    /// A return value could not be encoded
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// No binding matches the requested route
    #[error("Route not found: {0}")]
    RouteNotFound(String),

    /// The verb is not one the unary transport accepts
    #[error("Unsupported verb: {0}")]
    UnsupportedVerb(String),

    /// The admission bound was reached and the wait timed out
    #[error("Server overloaded")]
    Overloaded,

    /// WebSocket transport failure
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// Input/output error
    #[error("IO error: {0}")]
    Io(String),

    /// The session or connection is gone
    #[error("Connection closed")]
    ConnectionClosed,

    /// Invalid server configuration (bind address, observability setup)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Unexpected failure inside the server (including caught panics)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Failure raised from inside a service method
    pub fn service(message: impl Into<String>) -> Self {
        Error::Service(message.into())
    }

    /// Text placed in the `error` field of a response envelope
    ///
    /// Arity failures always read `"Invalid parameters"`. Service failures
    /// forward their own message, falling back to `"Error"` when it is
    /// empty. Decode failures report the decoder's message.
    pub fn reply_message(&self) -> String {
        let message = match self {
            Error::ArityMismatch { .. } => return INVALID_PARAMETERS.to_string(),
            Error::Service(message) => message.clone(),
            Error::ParameterDecode { message, .. } => message.clone(),
            Error::Internal(message) => message.clone(),
            other => other.to_string(),
        };
        if message.trim().is_empty() {
            GENERIC_ERROR.to_string()
        } else {
            message
        }
    }

    /// Whether this error belongs to the transport layer
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Error::MalformedEnvelope(_)
                | Error::RouteNotFound(_)
                | Error::UnsupportedVerb(_)
                | Error::Overloaded
                | Error::WebSocket(_)
                | Error::Io(_)
                | Error::ConnectionClosed
        )
    }
}

impl From<String> for Error {
    fn from(message: String) -> Self {
        Error::Service(message)
    }
}

impl From<&str> for Error {
    fn from(message: &str) -> Self {
        Error::Service(message.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}
