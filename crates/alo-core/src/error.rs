//! Error types for the synchronization core

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Why a connection attempt did not produce an open link.
///
/// Cloneable so the same failure can be reported both to the caller of
/// `connect()` and to observers of the connection state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionError {
    #[error("handshake failed: {reason}")]
    Handshake { reason: String },

    #[error("server rejected the session token")]
    Unauthorized,

    #[error("connection attempt superseded by a newer connect")]
    Superseded,

    #[error("connection closed")]
    Closed,
}

impl ConnectionError {
    pub fn handshake(reason: impl Into<String>) -> Self {
        Self::Handshake {
            reason: reason.into(),
        }
    }

    /// Retrying with the same credential cannot succeed.
    pub fn is_auth(&self) -> bool {
        matches!(self, ConnectionError::Unauthorized)
    }
}

/// Error types organized by layer
#[derive(Debug, Error)]
pub enum Error {
    // ─────────────────────────────────────────────────────────────
    // Common/Infrastructure Errors
    // ─────────────────────────────────────────────────────────────
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    // ─────────────────────────────────────────────────────────────
    // Transport Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    // ─────────────────────────────────────────────────────────────
    // Authorization Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Unauthorized: session token rejected")]
    Unauthorized,

    // ─────────────────────────────────────────────────────────────
    // Protocol Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Protocol error: {message}")]
    Protocol { message: String },

    // ─────────────────────────────────────────────────────────────
    // REST Errors
    // ─────────────────────────────────────────────────────────────
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("HTTP request failed: {message}")]
    Http { message: String },

    #[error("Conversation not found: {id}")]
    ConversationNotFound { id: String },

    // ─────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },
}

// ─────────────────────────────────────────────────────────────────
// Convenience Constructors
// ─────────────────────────────────────────────────────────────────

impl Error {
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    pub fn http(message: impl Into<String>) -> Self {
        Self::Http {
            message: message.into(),
        }
    }

    pub fn conversation_not_found(id: impl Into<String>) -> Self {
        Self::ConversationNotFound { id: id.into() }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// The session token is no longer accepted; the caller should log out.
    pub fn is_auth(&self) -> bool {
        matches!(
            self,
            Error::Unauthorized | Error::Connection(ConnectionError::Unauthorized)
        )
    }

    /// A transient failure worth retrying with the same request.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::Protocol { .. }
                | Error::Http { .. }
                | Error::Connection(ConnectionError::Handshake { .. })
                | Error::Connection(ConnectionError::Closed)
        ) || matches!(self, Error::Api { status, .. } if *status >= 500)
    }
}

// ─────────────────────────────────────────────────────────────────
// Error Context Extensions
// ─────────────────────────────────────────────────────────────────

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Log the error under `context` and convert it.
    fn context(self, context: impl Into<String>) -> Result<T>;
}

impl<T, E: Into<Error>> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| {
            let err = e.into();
            tracing::error!("{}: {:?}", context.into(), err);
            err
        })
    }
}
