//! Error types for the replication engine.

use revdb_core::CoreError;
use revdb_sync_protocol::{ErrorKind, ErrorResponse, ProtocolError};
use thiserror::Error;

/// Result type for replication operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during replication.
#[derive(Error, Debug)]
pub enum SyncError {
    /// The peer could not be reached or the exchange broke off.
    #[error("network error: {message}")]
    Network {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// A message could not be encoded or decoded.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A document's revision history was rejected.
    #[error("malformed history for document {doc_id}: {reason}")]
    MalformedHistory {
        /// Document ID.
        doc_id: String,
        /// Description of the defect.
        reason: String,
    },

    /// Attachment bytes are not available.
    #[error("attachment {name} of {doc_id}@{revision} is unavailable")]
    AttachmentUnavailable {
        /// Document ID.
        doc_id: String,
        /// Revision carrying the attachment.
        revision: String,
        /// Attachment name.
        name: String,
    },

    /// A revision the changes feed announced could not be fetched.
    #[error("revision {revision} of {doc_id} is missing on the source")]
    MissingRevision {
        /// Document ID.
        doc_id: String,
        /// Revision that was requested.
        revision: String,
    },

    /// Local storage failed.
    #[error("storage error: {0}")]
    Storage(CoreError),

    /// Another writer updated the checkpoint concurrently.
    #[error("checkpoint {id} was modified concurrently")]
    CheckpointConflict {
        /// Local document ID of the checkpoint.
        id: String,
    },

    /// The peer reported an error.
    #[error("remote error: {0}")]
    Remote(ErrorResponse),

    /// The replicator itself failed (e.g. a worker thread could not be
    /// spawned).
    #[error("internal error: {0}")]
    Internal(String),

    /// Replication was stopped.
    #[error("replication cancelled")]
    Cancelled,

    /// Invalid state transition.
    #[error("invalid state transition from {from} to {to}")]
    InvalidStateTransition {
        /// Current state.
        from: String,
        /// Attempted target state.
        to: String,
    },
}

impl SyncError {
    /// Creates a retryable network error.
    pub fn network_retryable(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable network error.
    pub fn network_fatal(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Network { retryable, .. } => *retryable,
            SyncError::Remote(response) => response.kind == ErrorKind::Storage,
            _ => false,
        }
    }

    /// Returns true if this error concerns a single document and must not
    /// abort the rest of the batch.
    pub fn is_document_scoped(&self) -> bool {
        matches!(
            self,
            SyncError::MalformedHistory { .. }
                | SyncError::AttachmentUnavailable { .. }
                | SyncError::MissingRevision { .. }
        )
    }

    /// Returns true if this error reports a stale revision on write.
    pub fn is_conflict(&self) -> bool {
        match self {
            SyncError::Storage(CoreError::RevisionConflict { .. }) => true,
            SyncError::Remote(response) => response.kind == ErrorKind::Conflict,
            _ => false,
        }
    }
}

impl From<CoreError> for SyncError {
    fn from(error: CoreError) -> Self {
        match error {
            CoreError::MalformedHistory { doc_id, reason } => {
                SyncError::MalformedHistory { doc_id, reason }
            }
            CoreError::AttachmentUnavailable {
                doc_id,
                revision,
                name,
            } => SyncError::AttachmentUnavailable {
                doc_id,
                revision,
                name,
            },
            // Bytes that contradict their metadata are bad content for this
            // document only; the caller records which document it was.
            mismatch @ CoreError::AttachmentMismatch { .. } => SyncError::MalformedHistory {
                doc_id: String::new(),
                reason: mismatch.to_string(),
            },
            CoreError::RevisionNotFound { doc_id, revision } => {
                SyncError::MissingRevision { doc_id, revision }
            }
            CoreError::ReservedField { doc_id, field } => SyncError::MalformedHistory {
                reason: format!("body uses reserved field {field:?}"),
                doc_id,
            },
            other => SyncError::Storage(other),
        }
    }
}

impl From<ProtocolError> for SyncError {
    fn from(error: ProtocolError) -> Self {
        match error {
            ProtocolError::InvalidHistory { doc_id, reason }
            | ProtocolError::InvalidDocument { doc_id, reason } => {
                SyncError::MalformedHistory { doc_id, reason }
            }
            ProtocolError::Codec(error) => SyncError::Protocol(error.to_string()),
        }
    }
}

impl From<ErrorResponse> for SyncError {
    fn from(response: ErrorResponse) -> Self {
        let doc_id = response.doc_id.clone().unwrap_or_default();
        let revision = response.revision.clone().unwrap_or_default();
        match response.kind {
            ErrorKind::MalformedHistory => SyncError::MalformedHistory {
                doc_id,
                reason: response.reason,
            },
            ErrorKind::AttachmentUnavailable => SyncError::AttachmentUnavailable {
                doc_id,
                revision,
                name: response.name.unwrap_or_default(),
            },
            ErrorKind::MissingRevision => SyncError::MissingRevision { doc_id, revision },
            _ => SyncError::Remote(response),
        }
    }
}
