//! Protocol error types.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while encoding, decoding or validating messages.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// JSON encoding or decoding failed.
    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// A `_revisions` history cannot describe a valid ancestry.
    #[error("invalid revision history for {doc_id}: {reason}")]
    InvalidHistory {
        /// Document the history belongs to.
        doc_id: String,
        /// What is wrong with it.
        reason: String,
    },

    /// A document's body cannot be stored as sent.
    #[error("invalid document {doc_id}: {reason}")]
    InvalidDocument {
        /// Document ID.
        doc_id: String,
        /// What is wrong with it.
        reason: String,
    },
}

impl ProtocolError {
    /// Creates an invalid history error.
    pub fn invalid_history(doc_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidHistory {
            doc_id: doc_id.into(),
            reason: reason.into(),
        }
    }
}
