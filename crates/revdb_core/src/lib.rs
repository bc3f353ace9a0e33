//! # RevDB Core
//!
//! Revision trees and the document store contract for RevDB.
//!
//! This crate provides:
//! - `RevisionId` / `Revision` for immutable document versions
//! - `RevisionTree`, the per-document forest of edit branches with
//!   deterministic winner selection
//! - The `DocumentStore` contract that replication consumes
//! - `MemoryDocumentStore`, a thread-safe in-memory implementation with
//!   local CRUD, local documents and attachment staging
//!
//! ## Winner selection
//!
//! Among the leaves of a tree, non-deleted leaves are preferred; ties are
//! broken by higher generation, then by the lexicographically greater
//! digest. Every replica holding the same leaves picks the same winner.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod attachment;
mod error;
mod revision;
mod store;
mod tree;

pub use attachment::{
    attachment_digest, base64_bytes, base64_option, AttachmentMeta, AttachmentPayload, PreparedAttachment, UnsavedAttachment,
    DIGEST_PREFIX,
};
pub use error::{CoreError, CoreResult};
pub use revision::{check_body, Body, Revision, RevisionContent, RevisionId};
pub use store::{
    ChangeEntry, Changes, DocumentStore, ForceInsert, LocalDocument, MemoryDocumentStore,
    LOCAL_PREFIX,
};
pub use tree::{MergeOutcome, RevisionTree};
