//! Fetching missing revisions and merging them into the target.

use crate::endpoint::{ReplicationSource, ReplicationTarget};
use crate::error::SyncResult;
use revdb_core::RevisionId;
use revdb_sync_protocol::{
    AttachmentRequest, AttachmentUpload, BulkGetRequest, MissingAttachmentsRequest,
};

/// What replicating one document changed on the target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DocumentTransfer {
    /// Revisions newly added to the target's tree (including stubs).
    pub revisions_inserted: usize,
    /// Attachments whose bytes were fetched separately.
    pub attachments_fetched: usize,
}

/// Moves missing revisions of a document from source to target.
pub struct BulkFetcher<'a, S: ReplicationSource + ?Sized, T: ReplicationTarget + ?Sized> {
    source: &'a S,
    target: &'a T,
    inline_attachments: bool,
}

impl<'a, S, T> BulkFetcher<'a, S, T>
where
    S: ReplicationSource + ?Sized,
    T: ReplicationTarget + ?Sized,
{
    /// Creates a fetcher.
    pub fn new(source: &'a S, target: &'a T, inline_attachments: bool) -> Self {
        Self {
            source,
            target,
            inline_attachments,
        }
    }

    /// Fetches `missing` leaves of `doc_id` with their ancestry and merges
    /// each into the target.
    ///
    /// Each leaf is merged atomically. Attachments that arrive as stubs are
    /// completed afterwards; until then the revision's body is readable on
    /// the target but its attachment bytes are not.
    pub fn transfer(&self, doc_id: &str, missing: &[RevisionId]) -> SyncResult<DocumentTransfer> {
        let mut transfer = DocumentTransfer::default();
        if missing.is_empty() {
            return Ok(transfer);
        }

        let docs = self.source.fetch_revisions(&BulkGetRequest {
            id: doc_id.to_string(),
            revs: missing.to_vec(),
            attachments: self.inline_attachments,
        })?;

        for doc in docs {
            let rev = doc.rev.clone();
            let has_stubs = doc.attachments.values().any(|payload| payload.is_stub());

            let outcome = self.target.force_insert(doc)?;
            transfer.revisions_inserted += outcome.inserted.len();

            // A revision already held may still be waiting for its bytes.
            if has_stubs || outcome.is_noop() {
                transfer.attachments_fetched += self.complete_attachments(doc_id, &rev)?;
            }
        }

        tracing::trace!(
            doc_id,
            revisions = transfer.revisions_inserted,
            attachments = transfer.attachments_fetched,
            "document transferred"
        );
        Ok(transfer)
    }

    /// Fetches the bytes of every attachment the target lacks.
    fn complete_attachments(&self, doc_id: &str, rev: &RevisionId) -> SyncResult<usize> {
        let incomplete = self
            .target
            .missing_attachments(&MissingAttachmentsRequest {
                doc_id: doc_id.to_string(),
                rev: rev.clone(),
            })?
            .missing;

        let mut fetched = 0;
        for (name, meta) in incomplete {
            let attachment = self.source.fetch_attachment(&AttachmentRequest {
                doc_id: doc_id.to_string(),
                rev: rev.clone(),
                name: name.clone(),
            })?;
            self.target.store_attachment(AttachmentUpload {
                doc_id: doc_id.to_string(),
                rev: rev.clone(),
                name,
                content_type: meta.content_type,
                data: attachment.data,
            })?;
            fetched += 1;
        }
        Ok(fetched)
    }
}
