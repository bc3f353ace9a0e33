//! Replication checkpoints.
//!
//! A checkpoint is the last source sequence whose batch was fully merged
//! into the target. It lives on the target as the local document
//! `_local/<replicator id>` with body `{"lastSequence": <token>}`.

use crate::endpoint::ReplicationTarget;
use crate::error::{SyncError, SyncResult};
use revdb_core::{Body, LOCAL_PREFIX};
use revdb_sync_protocol::{LocalPutRequest, SequenceToken};

/// Body field holding the sequence token.
const LAST_SEQUENCE_FIELD: &str = "lastSequence";

/// Reads and writes the checkpoint of one replicator on a target.
pub struct CheckpointManager<'a, T: ReplicationTarget + ?Sized> {
    target: &'a T,
    document_id: String,
}

impl<'a, T: ReplicationTarget + ?Sized> CheckpointManager<'a, T> {
    /// Creates a manager for the given replicator.
    pub fn new(target: &'a T, replicator_id: &str) -> Self {
        Self {
            target,
            document_id: format!("{LOCAL_PREFIX}{replicator_id}"),
        }
    }

    /// Returns the local document ID holding the checkpoint.
    pub fn document_id(&self) -> &str {
        &self.document_id
    }

    /// Returns the stored position, or `None` to start from the beginning.
    pub fn get(&self) -> SyncResult<Option<SequenceToken>> {
        let Some(document) = self.target.get_local_document(&self.document_id)? else {
            return Ok(None);
        };
        match document.body.get(LAST_SEQUENCE_FIELD) {
            Some(serde_json::Value::String(token)) => Ok(Some(SequenceToken::new(token.as_str()))),
            Some(serde_json::Value::Number(number)) => {
                Ok(Some(SequenceToken::new(number.to_string())))
            }
            _ => {
                tracing::warn!(
                    checkpoint = %self.document_id,
                    "checkpoint has no usable lastSequence, replicating from the start"
                );
                Ok(None)
            }
        }
    }

    /// Stores a new position.
    ///
    /// Creates the checkpoint document or updates it on top of its current
    /// revision. A concurrent writer surfaces as
    /// [`SyncError::CheckpointConflict`].
    pub fn put(&self, token: &SequenceToken) -> SyncResult<()> {
        let known = self
            .target
            .get_local_document(&self.document_id)?
            .map(|document| document.revision);

        let mut body = Body::new();
        body.insert(
            LAST_SEQUENCE_FIELD.to_string(),
            serde_json::Value::String(token.as_str().to_string()),
        );

        let request = LocalPutRequest {
            id: self.document_id.clone(),
            known,
            body,
        };
        match self.target.put_local_document(request) {
            Ok(document) => {
                tracing::debug!(
                    checkpoint = %self.document_id,
                    sequence = %token,
                    revision = %document.revision,
                    "checkpoint saved"
                );
                Ok(())
            }
            Err(error) if error.is_conflict() => Err(SyncError::CheckpointConflict {
                id: self.document_id.clone(),
            }),
            Err(error) => Err(error),
        }
    }
}
