//! Reply envelope and structured remote errors.

use revdb_core::CoreError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Category of an error reported by a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// A revision history was rejected.
    MalformedHistory,
    /// Attachment bytes are not stored on the peer.
    AttachmentUnavailable,
    /// A requested revision does not exist on the peer.
    MissingRevision,
    /// The write was based on a stale revision.
    Conflict,
    /// The requested document or attachment does not exist.
    NotFound,
    /// The request could not be decoded or was invalid.
    BadRequest,
    /// The peer's storage failed.
    Storage,
}

impl ErrorKind {
    /// Returns the wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MalformedHistory => "malformed_history",
            Self::AttachmentUnavailable => "attachment_unavailable",
            Self::MissingRevision => "missing_revision",
            Self::Conflict => "conflict",
            Self::NotFound => "not_found",
            Self::BadRequest => "bad_request",
            Self::Storage => "storage",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An error reported by a peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error category.
    pub kind: ErrorKind,
    /// Human-readable description.
    pub reason: String,
    /// Document the error concerns, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc_id: Option<String>,
    /// Revision the error concerns, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,
    /// Attachment the error concerns, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ErrorResponse {
    /// Creates an error with no document context.
    pub fn new(kind: ErrorKind, reason: impl Into<String>) -> Self {
        Self {
            kind,
            reason: reason.into(),
            doc_id: None,
            revision: None,
            name: None,
        }
    }

    /// Creates a bad request error.
    pub fn bad_request(reason: impl Into<String>) -> Self {
        Self::new(ErrorKind::BadRequest, reason)
    }

    /// Attaches the document ID.
    #[must_use]
    pub fn with_doc_id(mut self, doc_id: impl Into<String>) -> Self {
        self.doc_id = Some(doc_id.into());
        self
    }

    /// Attaches the revision.
    #[must_use]
    pub fn with_revision(mut self, revision: impl Into<String>) -> Self {
        self.revision = Some(revision.into());
        self
    }

    /// Attaches the attachment name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

impl fmt::Display for ErrorResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.reason)
    }
}

impl std::error::Error for ErrorResponse {}

impl From<&CoreError> for ErrorResponse {
    fn from(error: &CoreError) -> Self {
        let reason = error.to_string();
        match error {
            CoreError::MalformedHistory { doc_id, .. } => {
                Self::new(ErrorKind::MalformedHistory, reason).with_doc_id(doc_id)
            }
            CoreError::AttachmentUnavailable {
                doc_id,
                revision,
                name,
            } => Self::new(ErrorKind::AttachmentUnavailable, reason)
                .with_doc_id(doc_id)
                .with_revision(revision)
                .with_name(name),
            CoreError::AttachmentMismatch { name, .. } => {
                Self::bad_request(reason).with_name(name)
            }
            CoreError::AttachmentNotFound {
                doc_id,
                revision,
                name,
            } => Self::new(ErrorKind::NotFound, reason)
                .with_doc_id(doc_id)
                .with_revision(revision)
                .with_name(name),
            CoreError::DocumentNotFound { doc_id } => {
                Self::new(ErrorKind::NotFound, reason).with_doc_id(doc_id)
            }
            CoreError::RevisionNotFound { doc_id, revision } => {
                Self::new(ErrorKind::MissingRevision, reason)
                    .with_doc_id(doc_id)
                    .with_revision(revision)
            }
            CoreError::RevisionConflict { doc_id, .. } => {
                Self::new(ErrorKind::Conflict, reason).with_doc_id(doc_id)
            }
            CoreError::InvalidDocumentId { doc_id } => {
                Self::bad_request(reason).with_doc_id(doc_id)
            }
            CoreError::ReservedField { doc_id, .. } => {
                Self::new(ErrorKind::MalformedHistory, reason).with_doc_id(doc_id)
            }
            CoreError::InvalidRevisionId { .. } => Self::bad_request(reason),
            CoreError::Codec(_) | CoreError::Storage { .. } => {
                Self::new(ErrorKind::Storage, reason)
            }
        }
    }
}

/// The envelope of every peer response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reply<T> {
    /// The request succeeded.
    Ok(T),
    /// The request failed.
    Error(ErrorResponse),
}

impl<T> Reply<T> {
    /// Converts into a `Result`.
    pub fn into_result(self) -> Result<T, ErrorResponse> {
        match self {
            Self::Ok(value) => Ok(value),
            Self::Error(error) => Err(error),
        }
    }
}

impl<T> From<Result<T, ErrorResponse>> for Reply<T> {
    fn from(result: Result<T, ErrorResponse>) -> Self {
        match result {
            Ok(value) => Self::Ok(value),
            Err(error) => Self::Error(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn reply_envelope_shape() {
        let ok: Reply<u32> = Reply::Ok(5);
        assert_eq!(serde_json::to_value(&ok).unwrap(), json!({"ok": 5}));

        let err: Reply<u32> = Reply::Error(
            ErrorResponse::new(ErrorKind::MissingRevision, "gone")
                .with_doc_id("d1")
                .with_revision("2-b"),
        );
        assert_eq!(
            serde_json::to_value(&err).unwrap(),
            json!({"error": {
                "kind": "missing_revision",
                "reason": "gone",
                "doc_id": "d1",
                "revision": "2-b"
            }})
        );
    }

    #[test]
    fn core_errors_keep_their_context() {
        let error = CoreError::AttachmentUnavailable {
            doc_id: "d1".into(),
            revision: "2-b".into(),
            name: "photo".into(),
        };
        let response = ErrorResponse::from(&error);
        assert_eq!(response.kind, ErrorKind::AttachmentUnavailable);
        assert_eq!(response.name.as_deref(), Some("photo"));

        let conflict = CoreError::revision_conflict("_local/r", "stale");
        assert_eq!(ErrorResponse::from(&conflict).kind, ErrorKind::Conflict);
    }
}
