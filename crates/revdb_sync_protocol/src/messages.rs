//! Protocol messages for replication.

use crate::error::{ProtocolError, ProtocolResult};
use crate::history::RevisionHistory;
use crate::sequence::SequenceToken;
use revdb_core::{
    check_body, AttachmentMeta, AttachmentPayload, Body, ForceInsert, LocalDocument, Revision,
    RevisionId,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

fn is_false(value: &bool) -> bool {
    !*value
}

/// Request for the changes feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangesRequest {
    /// Return changes after this position; `None` means from the start.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since: Option<SequenceToken>,
    /// Maximum rows to return.
    pub limit: u32,
}

impl ChangesRequest {
    /// Creates a changes request.
    pub fn new(since: Option<SequenceToken>, limit: u32) -> Self {
        Self { since, limit }
    }
}

/// One document in the changes feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRow {
    /// Position of this change.
    pub seq: SequenceToken,
    /// Document ID.
    pub id: String,
    /// Current leaf revisions, winner first.
    pub changes: Vec<RevisionId>,
    /// Whether the winning revision is a deletion.
    #[serde(default, skip_serializing_if = "is_false")]
    pub deleted: bool,
}

/// A page of the changes feed.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChangesResponse {
    /// Rows in feed order.
    pub results: Vec<ChangeRow>,
    /// Position to resume from; `None` if the feed is empty.
    pub last_seq: Option<SequenceToken>,
    /// Whether more changes follow this page.
    #[serde(default)]
    pub has_more: bool,
}

impl ChangesResponse {
    /// Groups the leaf revisions of this page by document.
    ///
    /// A document listed twice contributes the union of its leaves.
    pub fn leaves_by_document(&self) -> BTreeMap<String, Vec<RevisionId>> {
        let mut documents: BTreeMap<String, Vec<RevisionId>> = BTreeMap::new();
        for row in &self.results {
            let leaves = documents.entry(row.id.clone()).or_default();
            for revision in &row.changes {
                if !leaves.contains(revision) {
                    leaves.push(revision.clone());
                }
            }
        }
        documents
    }
}

/// Candidate revisions per document, to be checked against the target.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RevsDiffRequest(pub BTreeMap<String, Vec<RevisionId>>);

/// Revisions the target lacks, per document.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RevsDiffResponse(pub BTreeMap<String, Vec<RevisionId>>);

/// Request for specific revisions of one document with their ancestry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkGetRequest {
    /// Document ID.
    pub id: String,
    /// Revisions to fetch.
    pub revs: Vec<RevisionId>,
    /// Whether attachment bytes should be included inline.
    #[serde(default)]
    pub attachments: bool,
}

/// The requested revisions, in request order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkGetResponse {
    /// One entry per requested revision.
    pub docs: Vec<DocumentRevs>,
}

/// A revision as transferred between peers: content plus ancestry.
///
/// The body fields are flattened next to the reserved `_`-prefixed fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRevs {
    /// Document ID.
    #[serde(rename = "_id")]
    pub id: String,
    /// Revision ID; must equal the newest entry of `revisions`.
    #[serde(rename = "_rev")]
    pub rev: RevisionId,
    /// Ancestry, newest first.
    #[serde(rename = "_revisions")]
    pub revisions: RevisionHistory,
    /// Whether this revision is a deletion.
    #[serde(rename = "_deleted", default, skip_serializing_if = "is_false")]
    pub deleted: bool,
    /// Attachment metadata, with bytes if requested inline.
    #[serde(
        rename = "_attachments",
        default,
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub attachments: BTreeMap<String, AttachmentPayload>,
    /// Document body.
    #[serde(flatten)]
    pub body: Body,
}

impl DocumentRevs {
    /// Builds the transfer form of a stored revision.
    ///
    /// `history` is the path from `revision` to its root, newest first.
    /// A stub revision is sent with an empty body.
    pub fn new(
        revision: &Revision,
        history: &[RevisionId],
        attachments: BTreeMap<String, AttachmentPayload>,
    ) -> Self {
        Self {
            id: revision.doc_id.clone(),
            rev: revision.id.clone(),
            revisions: RevisionHistory::from_revisions(history),
            deleted: revision.deleted,
            attachments,
            body: revision.body.clone().unwrap_or_default(),
        }
    }

    /// Decodes the ancestry, newest first, checking it ends in `rev`.
    pub fn history(&self) -> ProtocolResult<Vec<RevisionId>> {
        let history = self.revisions.to_revisions(&self.id)?;
        if history.first() != Some(&self.rev) {
            return Err(ProtocolError::invalid_history(
                &self.id,
                format!("history does not start at {}", self.rev),
            ));
        }
        Ok(history)
    }

    /// Converts into a store force insert.
    ///
    /// Body fields starting with `_` are rejected: on the wire they would
    /// shadow the metadata fields.
    pub fn into_force_insert(self) -> ProtocolResult<ForceInsert> {
        check_body(&self.id, &self.body).map_err(|e| ProtocolError::InvalidDocument {
            doc_id: self.id.clone(),
            reason: e.to_string(),
        })?;
        let history = self.history()?;
        Ok(ForceInsert {
            doc_id: self.id,
            history,
            body: self.body,
            deleted: self.deleted,
            attachments: self.attachments,
        })
    }
}

/// Revisions to merge into the peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkDocsRequest {
    /// Revisions with their ancestry.
    pub docs: Vec<DocumentRevs>,
    /// Must be `false`: revisions are inserted as given, not as new edits.
    pub new_edits: bool,
}

impl BulkDocsRequest {
    /// Creates a replication insert (`new_edits: false`).
    pub fn replicate(docs: Vec<DocumentRevs>) -> Self {
        Self {
            docs,
            new_edits: false,
        }
    }
}

/// Outcome of one document of a bulk insert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkDocsResult {
    /// Document ID.
    pub id: String,
    /// Revision that was merged.
    pub rev: RevisionId,
    /// Revisions newly added, oldest first.
    #[serde(default)]
    pub inserted: Vec<RevisionId>,
    /// Set if this document was rejected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<crate::reply::ErrorResponse>,
}

/// Per-document outcomes of a bulk insert, in request order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkDocsResponse {
    /// One result per submitted document.
    pub results: Vec<BulkDocsResult>,
}

/// Request for attachment bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentRequest {
    /// Document ID.
    pub doc_id: String,
    /// Revision carrying the attachment.
    pub rev: RevisionId,
    /// Attachment name.
    pub name: String,
}

/// Attachment bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentResponse {
    /// MIME type.
    pub content_type: String,
    /// Bytes, base64 on the wire.
    #[serde(with = "revdb_core::base64_bytes")]
    pub data: Vec<u8>,
}

/// Bytes for an attachment whose metadata the peer already holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentUpload {
    /// Document ID.
    pub doc_id: String,
    /// Revision carrying the attachment.
    pub rev: RevisionId,
    /// Attachment name.
    pub name: String,
    /// MIME type.
    pub content_type: String,
    /// Bytes, base64 on the wire.
    #[serde(with = "revdb_core::base64_bytes")]
    pub data: Vec<u8>,
}

/// Acknowledges an attachment upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentUploadResponse {
    /// Digest under which the bytes were stored.
    pub digest: String,
}

/// Asks which attachments of a revision lack their bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissingAttachmentsRequest {
    /// Document ID.
    pub doc_id: String,
    /// Revision to inspect.
    pub rev: RevisionId,
}

/// Attachments whose bytes are missing, by name.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MissingAttachmentsResponse {
    /// Metadata of each incomplete attachment.
    pub missing: BTreeMap<String, AttachmentMeta>,
}

/// Reads a local document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalGetRequest {
    /// Local document ID, including the `_local/` prefix.
    pub id: String,
}

/// A local document, if it exists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalGetResponse {
    /// The document.
    pub document: Option<LocalDocument>,
}

/// Creates or updates a local document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalPutRequest {
    /// Local document ID, including the `_local/` prefix.
    pub id: String,
    /// Revision the write is based on; `None` to create.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub known: Option<RevisionId>,
    /// New body.
    pub body: Body,
}

/// The stored local document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalPutResponse {
    /// The document after the write.
    pub document: LocalDocument,
}
