//! The two sides of a replication.
//!
//! A replication reads from a [`ReplicationSource`] and writes to a
//! [`ReplicationTarget`]. A local store and a remote peer both offer both
//! capabilities, so pull is `(remote, local)` and push is `(local, remote)`.

use crate::error::{SyncError, SyncResult};
use revdb_core::{
    AttachmentMeta, AttachmentPayload, CoreError, DocumentStore, LocalDocument, MergeOutcome,
    UnsavedAttachment,
};
use revdb_sync_protocol::{
    AttachmentRequest, AttachmentResponse, AttachmentUpload, AttachmentUploadResponse,
    BulkGetRequest, ChangeRow, ChangesRequest, ChangesResponse, DocumentRevs, LocalPutRequest,
    MissingAttachmentsRequest, MissingAttachmentsResponse, RevsDiffRequest, RevsDiffResponse,
    SequenceToken,
};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Read side of a replication.
pub trait ReplicationSource: Send + Sync {
    /// Returns a stable identifier of this endpoint.
    fn identifier(&self) -> &str;

    /// Returns changed documents after a position.
    fn changes(&self, request: &ChangesRequest) -> SyncResult<ChangesResponse>;

    /// Returns the requested revisions of one document with their
    /// ancestry, body and attachment metadata.
    fn fetch_revisions(&self, request: &BulkGetRequest) -> SyncResult<Vec<DocumentRevs>>;

    /// Returns the bytes of one attachment.
    fn fetch_attachment(&self, request: &AttachmentRequest) -> SyncResult<AttachmentResponse>;
}

/// Write side of a replication.
pub trait ReplicationTarget: Send + Sync {
    /// Returns a stable identifier of this endpoint.
    fn identifier(&self) -> &str;

    /// Returns, per document, the candidate revisions not held here.
    fn revs_diff(&self, request: &RevsDiffRequest) -> SyncResult<RevsDiffResponse>;

    /// Merges a revision and its ancestry into the document's tree.
    fn force_insert(&self, revision: DocumentRevs) -> SyncResult<MergeOutcome>;

    /// Returns the attachments of a revision whose bytes are missing.
    fn missing_attachments(
        &self,
        request: &MissingAttachmentsRequest,
    ) -> SyncResult<MissingAttachmentsResponse>;

    /// Stores the bytes of an attachment whose metadata is already known.
    fn store_attachment(&self, upload: AttachmentUpload) -> SyncResult<AttachmentUploadResponse>;

    /// Reads a local document.
    fn get_local_document(&self, id: &str) -> SyncResult<Option<LocalDocument>>;

    /// Creates (`known == None`) or updates a local document.
    fn put_local_document(&self, request: LocalPutRequest) -> SyncResult<LocalDocument>;
}

/// A replication endpoint backed by a local [`DocumentStore`].
pub struct LocalEndpoint<D: DocumentStore> {
    store: Arc<D>,
}

impl<D: DocumentStore> LocalEndpoint<D> {
    /// Creates an endpoint over a shared store.
    pub fn new(store: Arc<D>) -> Self {
        Self { store }
    }

    /// Returns the underlying store.
    pub fn store(&self) -> &Arc<D> {
        &self.store
    }
}

impl<D: DocumentStore> Clone for LocalEndpoint<D> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<D: DocumentStore> ReplicationSource for LocalEndpoint<D> {
    fn identifier(&self) -> &str {
        self.store.identifier()
    }

    fn changes(&self, request: &ChangesRequest) -> SyncResult<ChangesResponse> {
        let since = match &request.since {
            Some(token) => token.as_u64().ok_or_else(|| {
                SyncError::Protocol(format!("sequence token {token} was not issued here"))
            })?,
            None => 0,
        };
        let changes = self.store.changes(since, request.limit as usize)?;

        let last_seq = (!changes.entries.is_empty() || request.since.is_some())
            .then(|| SequenceToken::from(changes.last_sequence));
        let results = changes
            .entries
            .into_iter()
            .map(|entry| ChangeRow {
                seq: SequenceToken::from(entry.sequence),
                id: entry.doc_id,
                changes: entry.leaves,
                deleted: entry.deleted,
            })
            .collect();

        Ok(ChangesResponse {
            results,
            last_seq,
            has_more: changes.has_more,
        })
    }

    fn fetch_revisions(&self, request: &BulkGetRequest) -> SyncResult<Vec<DocumentRevs>> {
        let missing = |revision: &revdb_core::RevisionId| SyncError::MissingRevision {
            doc_id: request.id.clone(),
            revision: revision.to_string(),
        };

        let tree = self.store.get_all_revisions(&request.id)?;
        let mut docs = Vec::with_capacity(request.revs.len());
        for id in &request.revs {
            let Some(tree) = tree.as_ref() else {
                return Err(missing(id));
            };
            let revision = tree
                .get(id)
                .filter(|revision| !revision.is_stub())
                .ok_or_else(|| missing(id))?;
            let history = tree.history(id).ok_or_else(|| missing(id))?;

            let mut attachments = BTreeMap::new();
            for (name, meta) in &revision.attachments {
                let payload = if request.attachments {
                    let data = self.store.read_attachment(&request.id, id, name)?;
                    AttachmentPayload::inline(meta.clone(), data)
                } else {
                    AttachmentPayload::stub(meta.clone())
                };
                attachments.insert(name.clone(), payload);
            }
            docs.push(DocumentRevs::new(revision, &history, attachments));
        }
        Ok(docs)
    }

    fn fetch_attachment(&self, request: &AttachmentRequest) -> SyncResult<AttachmentResponse> {
        let meta = self.attachment_meta(&request.doc_id, &request.rev, &request.name)?;
        let data = self
            .store
            .read_attachment(&request.doc_id, &request.rev, &request.name)?;
        Ok(AttachmentResponse {
            content_type: meta.content_type,
            data,
        })
    }
}

impl<D: DocumentStore> LocalEndpoint<D> {
    fn attachment_meta(
        &self,
        doc_id: &str,
        revision: &revdb_core::RevisionId,
        name: &str,
    ) -> SyncResult<AttachmentMeta> {
        self.store
            .get_all_revisions(doc_id)?
            .and_then(|tree| tree.get(revision).cloned())
            .ok_or_else(|| SyncError::MissingRevision {
                doc_id: doc_id.to_string(),
                revision: revision.to_string(),
            })?
            .attachments
            .remove(name)
            .ok_or_else(|| {
                SyncError::Storage(CoreError::AttachmentNotFound {
                    doc_id: doc_id.to_string(),
                    revision: revision.to_string(),
                    name: name.to_string(),
                })
            })
    }
}

impl<D: DocumentStore> ReplicationTarget for LocalEndpoint<D> {
    fn identifier(&self) -> &str {
        self.store.identifier()
    }

    fn revs_diff(&self, request: &RevsDiffRequest) -> SyncResult<RevsDiffResponse> {
        let mut missing = BTreeMap::new();
        for (doc_id, candidates) in &request.0 {
            let tree = self.store.get_all_revisions(doc_id)?;
            let mut absent = Vec::new();
            for revision in candidates {
                // A revision still waiting for attachment bytes is not held.
                let held = match &tree {
                    Some(tree) if tree.contains(revision) => self
                        .store
                        .incomplete_attachments(doc_id, revision)?
                        .is_empty(),
                    _ => false,
                };
                if !held {
                    absent.push(revision.clone());
                }
            }
            missing.insert(doc_id.clone(), absent);
        }
        Ok(RevsDiffResponse(missing))
    }

    fn force_insert(&self, revision: DocumentRevs) -> SyncResult<MergeOutcome> {
        let insert = revision.into_force_insert()?;
        Ok(self.store.force_insert(insert)?)
    }

    fn missing_attachments(
        &self,
        request: &MissingAttachmentsRequest,
    ) -> SyncResult<MissingAttachmentsResponse> {
        let missing = self
            .store
            .incomplete_attachments(&request.doc_id, &request.rev)?
            .into_iter()
            .collect();
        Ok(MissingAttachmentsResponse { missing })
    }

    fn store_attachment(&self, upload: AttachmentUpload) -> SyncResult<AttachmentUploadResponse> {
        let prepared = self.store.prepare_attachment(UnsavedAttachment::new(
            upload.name,
            upload.content_type,
            upload.data,
        ))?;
        let digest = prepared.digest.clone();
        self.store
            .add_attachment(prepared, &upload.doc_id, &upload.rev)?;
        Ok(AttachmentUploadResponse { digest })
    }

    fn get_local_document(&self, id: &str) -> SyncResult<Option<LocalDocument>> {
        Ok(self.store.get_local_document(id)?)
    }

    fn put_local_document(&self, request: LocalPutRequest) -> SyncResult<LocalDocument> {
        let document = match &request.known {
            Some(known) => self
                .store
                .update_local_document(&request.id, known, request.body)?,
            None => self.store.create_local_document(&request.id, request.body)?,
        };
        Ok(document)
    }
}
