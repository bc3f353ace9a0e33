//! Error types for the replication peer.

use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors raised while routing a request, before or after it reaches the
/// store. Store and replication failures travel inside the reply envelope
/// instead.
#[derive(Error, Debug)]
pub enum ServerError {
    /// No endpoint is served at this path.
    #[error("unknown path: {0}")]
    UnknownPath(String),

    /// The reply could not be encoded.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ServerError {
    /// Returns true if this is a client error (4xx).
    pub fn is_client_error(&self) -> bool {
        matches!(self, ServerError::UnknownPath(_))
    }

    /// Returns true if this is a server error (5xx).
    pub fn is_server_error(&self) -> bool {
        matches!(self, ServerError::Internal(_))
    }
}
