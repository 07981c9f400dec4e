//! Error types for streaming sessions.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for streaming operations.
pub type Result<T> = std::result::Result<T, StreamError>;

/// Errors that can occur while opening or consuming a stream.
#[derive(Error, Debug)]
pub enum StreamError {
    /// Failed to open or read the HTTP connection.
    #[error("Connection error: {0}")]
    Connection(String),

    /// The server answered with a non-success status code.
    #[error("HTTP {status}: {body}")]
    Http {
        /// HTTP status code.
        status: u16,
        /// Response body text, if readable.
        body: String,
    },

    /// The response body ended before a terminal event was seen.
    #[error("Stream ended before completion")]
    UnexpectedEof,

    /// A frame could not be decoded.
    #[error("Decode error: {0}")]
    Decode(String),

    /// Audio decoding or scheduling failed.
    #[error("Audio error: {0}")]
    Audio(String),

    /// The server declared an error event.
    #[error("Server error: {code} - {message}")]
    Server {
        /// Stable error code from the server.
        code: String,
        /// Human-readable error message.
        message: String,
    },

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StreamError {
    /// Create a new connection error.
    pub fn connection<S: Into<String>>(msg: S) -> Self {
        Self::Connection(msg.into())
    }

    /// Create a new decode error.
    pub fn decode<S: Into<String>>(msg: S) -> Self {
        Self::Decode(msg.into())
    }

    /// Create a new audio error.
    pub fn audio<S: Into<String>>(msg: S) -> Self {
        Self::Audio(msg.into())
    }

    /// Create a new server error.
    pub fn server<S: Into<String>>(code: S, message: S) -> Self {
        Self::Server { code: code.into(), message: message.into() }
    }
}

/// Stable error code for a banned session.
pub const SESSION_BANNED: &str = "SESSION_BANNED";

/// Stable error code for exhausted credits/quota.
pub const CREDITS_EXHAUSTED: &str = "CREDITS_EXHAUSTED";

/// Normalized failure shape handed to [`StreamHandler::on_error`].
///
/// Free-text server errors are remapped onto stable codes so consumers never
/// have to parse error prose.
///
/// [`StreamHandler::on_error`]: crate::controller::StreamHandler::on_error
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamFailure {
    /// Human-readable error message.
    pub message: String,
    /// Stable error code, when the condition is recognized.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Numeric or provider-specific code, when present on the wire.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl StreamFailure {
    /// Classify a raw message/code pair into a normalized failure.
    ///
    /// A recognized code supplied by the server wins; otherwise the message
    /// text is matched for known conditions (session ban, credit exhaustion).
    /// A wire code that is not one of the stable codes is carried through
    /// verbatim in `code`.
    pub fn classify(message: impl Into<String>, code: Option<&str>) -> Self {
        let message = message.into();
        let wire = code.filter(|c| !c.is_empty());
        let error = match wire {
            Some(c) if c == SESSION_BANNED || c == CREDITS_EXHAUSTED => Some(c.to_string()),
            _ => {
                let lower = message.to_lowercase();
                if lower.contains("banned") {
                    Some(SESSION_BANNED.to_string())
                } else if lower.contains("credit") || lower.contains("quota") {
                    Some(CREDITS_EXHAUSTED.to_string())
                } else {
                    None
                }
            }
        };
        let code = wire.filter(|c| error.as_deref() != Some(*c)).map(str::to_string);
        Self { message, error, code }
    }

    /// True when this failure is terminal for the whole session (banned).
    pub fn is_terminal(&self) -> bool {
        self.error.as_deref() == Some(SESSION_BANNED)
    }
}

impl From<&StreamError> for StreamFailure {
    fn from(err: &StreamError) -> Self {
        match err {
            StreamError::Server { code, message } => {
                Self::classify(message.clone(), Some(code.as_str()))
            }
            other => Self::classify(other.to_string(), None),
        }
    }
}
