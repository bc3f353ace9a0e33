//! Error types for RevDB core.

use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in RevDB core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A revision history is structurally invalid (cycles, gaps, duplicates,
    /// or an id reused with different content).
    #[error("malformed history for document {doc_id}: {reason}")]
    MalformedHistory {
        /// Document whose history was rejected.
        doc_id: String,
        /// Description of the defect.
        reason: String,
    },

    /// Attachment metadata is known but its bytes are not stored locally.
    #[error("attachment {name} of {doc_id}@{revision} is unavailable")]
    AttachmentUnavailable {
        /// Document ID.
        doc_id: String,
        /// Revision the attachment belongs to.
        revision: String,
        /// Attachment name.
        name: String,
    },

    /// Attachment bytes do not match the recorded metadata.
    #[error("attachment {name} does not match its metadata: {reason}")]
    AttachmentMismatch {
        /// Attachment name.
        name: String,
        /// What did not match.
        reason: String,
    },

    /// The revision has no attachment with this name.
    #[error("attachment {name} not found on {doc_id}@{revision}")]
    AttachmentNotFound {
        /// Document ID.
        doc_id: String,
        /// Revision searched.
        revision: String,
        /// Attachment name.
        name: String,
    },

    /// Document not found.
    #[error("document not found: {doc_id}")]
    DocumentNotFound {
        /// The document ID that was not found.
        doc_id: String,
    },

    /// Revision not found in the document's tree.
    #[error("revision {revision} not found for document {doc_id}")]
    RevisionNotFound {
        /// Document ID.
        doc_id: String,
        /// The revision that was not found.
        revision: String,
    },

    /// The supplied revision is not the current one (stale edit or
    /// concurrent writer).
    #[error("revision conflict on {doc_id}: {reason}")]
    RevisionConflict {
        /// Document ID.
        doc_id: String,
        /// Description of the conflict.
        reason: String,
    },

    /// Document ID is empty or uses a reserved prefix.
    #[error("invalid document id: {doc_id:?}")]
    InvalidDocumentId {
        /// The rejected ID.
        doc_id: String,
    },

    /// A body uses a top-level field name reserved for replication
    /// metadata (`_id`, `_rev`, `_deleted`, ...).
    #[error("document {doc_id} uses reserved field {field:?}")]
    ReservedField {
        /// Document ID.
        doc_id: String,
        /// The offending field name.
        field: String,
    },

    /// A revision ID string could not be parsed.
    #[error("invalid revision id: {value:?}")]
    InvalidRevisionId {
        /// The rejected string.
        value: String,
    },

    /// JSON encoding error.
    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// Storage backend failure.
    #[error("storage error: {message}")]
    Storage {
        /// Description of the failure.
        message: String,
    },
}

impl CoreError {
    /// Creates a malformed history error.
    pub fn malformed_history(doc_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedHistory {
            doc_id: doc_id.into(),
            reason: reason.into(),
        }
    }

    /// Creates a revision conflict error.
    pub fn revision_conflict(doc_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::RevisionConflict {
            doc_id: doc_id.into(),
            reason: reason.into(),
        }
    }

    /// Creates a revision not found error.
    pub fn revision_not_found(doc_id: impl Into<String>, revision: impl ToString) -> Self {
        Self::RevisionNotFound {
            doc_id: doc_id.into(),
            revision: revision.to_string(),
        }
    }

    /// Creates an attachment unavailable error.
    pub fn attachment_unavailable(
        doc_id: impl Into<String>,
        revision: impl ToString,
        name: impl Into<String>,
    ) -> Self {
        Self::AttachmentUnavailable {
            doc_id: doc_id.into(),
            revision: revision.to_string(),
            name: name.into(),
        }
    }

    /// Creates a storage error.
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = CoreError::malformed_history("d1", "revision lists itself as parent");
        assert_eq!(
            err.to_string(),
            "malformed history for document d1: revision lists itself as parent"
        );

        let err = CoreError::attachment_unavailable("d1", "2-abc", "photo.jpg");
        assert!(err.to_string().contains("photo.jpg"));
        assert!(err.to_string().contains("2-abc"));
    }
}
