//! # RevDB Sync Protocol
//!
//! Replication wire messages and the JSON codec for RevDB.
//!
//! This crate provides:
//! - `SequenceToken`, the opaque changes-feed position
//! - `RevisionHistory`, the compact `_revisions` encoding of an ancestry
//! - Request/response messages for every replication endpoint
//! - `Reply`, the `{"ok": ...}` / `{"error": ...}` envelope
//! - JSON encoding/decoding
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod codec;
mod error;
mod history;
mod messages;
mod reply;
mod sequence;

pub use codec::{decode, encode};
pub use error::{ProtocolError, ProtocolResult};
pub use history::RevisionHistory;
pub use messages::{
    AttachmentRequest, AttachmentResponse, AttachmentUpload, AttachmentUploadResponse,
    BulkDocsRequest, BulkDocsResponse, BulkDocsResult, BulkGetRequest, BulkGetResponse,
    ChangeRow, ChangesRequest, ChangesResponse, DocumentRevs, LocalGetRequest, LocalGetResponse,
    LocalPutRequest, LocalPutResponse, MissingAttachmentsRequest, MissingAttachmentsResponse,
    RevsDiffRequest, RevsDiffResponse,
};
pub use reply::{ErrorKind, ErrorResponse, Reply};
pub use sequence::SequenceToken;

/// Request paths served by a replication peer. Every request is a POST
/// with a JSON body.
pub mod paths {
    /// Changes feed.
    pub const CHANGES: &str = "/_changes";
    /// Revision diff.
    pub const REVS_DIFF: &str = "/_revs_diff";
    /// Fetch revisions with their histories.
    pub const BULK_GET: &str = "/_bulk_get";
    /// Force insert revisions (`new_edits: false`).
    pub const BULK_DOCS: &str = "/_bulk_docs";
    /// Read attachment bytes.
    pub const ATTACHMENT: &str = "/_attachment";
    /// Upload attachment bytes for an existing revision.
    pub const ATTACHMENT_PUT: &str = "/_attachment/put";
    /// List attachments whose bytes are missing.
    pub const MISSING_ATTACHMENTS: &str = "/_missing_attachments";
    /// Read a local document.
    pub const LOCAL_GET: &str = "/_local/get";
    /// Write a local document.
    pub const LOCAL_PUT: &str = "/_local/put";
}
