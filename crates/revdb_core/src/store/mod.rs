//! The document store contract consumed by replication.
//!
//! A store gives atomic single-document read/modify/write with lookup by
//! document ID and revision ID. Replication only ever touches documents
//! through this trait.

mod memory;

pub use memory::MemoryDocumentStore;

use crate::attachment::{AttachmentMeta, AttachmentPayload, PreparedAttachment, UnsavedAttachment};
use crate::error::CoreResult;
use crate::revision::{Body, RevisionContent, RevisionId};
use crate::tree::{MergeOutcome, RevisionTree};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Reserved prefix of local (non-replicated) document IDs.
pub const LOCAL_PREFIX: &str = "_local/";

/// Digest used for local document revisions.
const LOCAL_DIGEST: &str = "local";

/// A local document: stored alongside regular documents but never listed,
/// never part of the changes feed and never replicated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalDocument {
    /// Full ID, including [`LOCAL_PREFIX`].
    pub id: String,
    /// Current revision; bumped on every update.
    pub revision: RevisionId,
    /// Body.
    pub body: Body,
}

impl LocalDocument {
    /// Creates the first revision of a local document.
    pub fn first(id: impl Into<String>, body: Body) -> CoreResult<Self> {
        Ok(Self {
            id: id.into(),
            revision: RevisionId::new(1, LOCAL_DIGEST)?,
            body,
        })
    }

    /// Returns the next revision of this document with a new body.
    pub fn next(&self, body: Body) -> CoreResult<Self> {
        Ok(Self {
            id: self.id.clone(),
            revision: RevisionId::new(self.revision.child_generation()?, LOCAL_DIGEST)?,
            body,
        })
    }
}

/// A revision history to merge into a document, as received from a
/// replication source.
#[derive(Debug, Clone, PartialEq)]
pub struct ForceInsert {
    /// Document ID.
    pub doc_id: String,
    /// Revision IDs, newest first.
    pub history: Vec<RevisionId>,
    /// Body of the newest revision.
    pub body: Body,
    /// Whether the newest revision is a deletion.
    pub deleted: bool,
    /// Attachments of the newest revision; bytes present if sent inline.
    pub attachments: BTreeMap<String, AttachmentPayload>,
}

impl ForceInsert {
    /// Returns the newest revision ID, if the history is non-empty.
    #[must_use]
    pub fn leaf(&self) -> Option<&RevisionId> {
        self.history.first()
    }

    /// Returns the content of the newest revision.
    #[must_use]
    pub fn leaf_content(&self) -> RevisionContent {
        RevisionContent {
            body: self.body.clone(),
            deleted: self.deleted,
            attachments: self
                .attachments
                .iter()
                .map(|(name, payload)| (name.clone(), payload.meta.clone()))
                .collect(),
        }
    }
}

/// One row of the changes feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEntry {
    /// Sequence at which the document last changed.
    pub sequence: u64,
    /// Document ID.
    pub doc_id: String,
    /// Current leaf revisions, winner first.
    pub leaves: Vec<RevisionId>,
    /// Whether the winning leaf is a deletion.
    pub deleted: bool,
}

/// A page of the changes feed.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Changes {
    /// Changes in sequence order.
    pub entries: Vec<ChangeEntry>,
    /// Sequence of the last entry, or the `since` value if empty.
    pub last_sequence: u64,
    /// Whether more changes exist after this page.
    pub has_more: bool,
}

/// The storage collaborator used by replication.
///
/// Implementations must serialize mutations of the same document and must
/// keep mutations of different documents independent.
pub trait DocumentStore: Send + Sync {
    /// Returns a stable identifier for this store.
    fn identifier(&self) -> &str;

    /// Reads a local document.
    fn get_local_document(&self, id: &str) -> CoreResult<Option<LocalDocument>>;

    /// Creates a local document. Fails with `RevisionConflict` if it exists.
    fn create_local_document(&self, id: &str, body: Body) -> CoreResult<LocalDocument>;

    /// Updates a local document whose current revision is `known`.
    ///
    /// Fails with `RevisionConflict` if the current revision differs.
    fn update_local_document(
        &self,
        id: &str,
        known: &RevisionId,
        body: Body,
    ) -> CoreResult<LocalDocument>;

    /// Returns a snapshot of a document's revision tree.
    fn get_all_revisions(&self, doc_id: &str) -> CoreResult<Option<RevisionTree>>;

    /// Merges a replicated history into a document, atomically.
    ///
    /// Inline attachment bytes are verified and stored before the merged
    /// tree becomes visible.
    fn force_insert(&self, insert: ForceInsert) -> CoreResult<MergeOutcome>;

    /// Stages attachment bytes without associating them with a revision.
    fn prepare_attachment(&self, attachment: UnsavedAttachment) -> CoreResult<PreparedAttachment>;

    /// Associates staged bytes with the named attachment of a revision.
    fn add_attachment(
        &self,
        prepared: PreparedAttachment,
        doc_id: &str,
        revision: &RevisionId,
    ) -> CoreResult<()>;

    /// Lists attachments of a revision whose bytes are not stored.
    fn incomplete_attachments(
        &self,
        doc_id: &str,
        revision: &RevisionId,
    ) -> CoreResult<Vec<(String, AttachmentMeta)>>;

    /// Reads attachment bytes.
    ///
    /// Fails with `AttachmentUnavailable` if only the metadata is known.
    fn read_attachment(&self, doc_id: &str, revision: &RevisionId, name: &str)
        -> CoreResult<Vec<u8>>;

    /// Returns documents changed after `since`, at most `limit` of them.
    fn changes(&self, since: u64, limit: usize) -> CoreResult<Changes>;
}
