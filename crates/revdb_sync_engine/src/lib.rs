//! # RevDB Sync Engine
//!
//! Replication engine for RevDB.
//!
//! This crate provides:
//! - Endpoint capabilities (`ReplicationSource`, `ReplicationTarget`) for
//!   local stores and remote peers
//! - Checkpoint management on the target
//! - Revision diffing and bulk fetch with force insert
//! - A bounded worker pool for per-document jobs
//! - The replicator state machine with events and reports
//! - HTTP client abstraction with a loopback client for tests
//!
//! ## Architecture
//!
//! Replication is one-way: pull is a remote source into a local target,
//! push is a local source into a remote target. Bidirectional sync is a
//! push followed by a pull.
//!
//! ## Key Invariants
//!
//! - The checkpoint advances only after its whole batch is merged
//! - Merging is idempotent, so an interrupted batch is safely redone
//! - Document-scoped failures never abort sibling documents
//! - Every replica picks the same winning revision

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod checkpoint;
mod config;
mod differ;
mod endpoint;
mod error;
mod fetcher;
mod http;
mod pool;
mod replicator;

pub use checkpoint::CheckpointManager;
pub use config::ReplicationConfig;
pub use differ::RevisionDiffer;
pub use endpoint::{LocalEndpoint, ReplicationSource, ReplicationTarget};
pub use error::{SyncError, SyncResult};
pub use fetcher::{BulkFetcher, DocumentTransfer};
pub use http::{HttpClient, LoopbackClient, LoopbackServer, RemoteEndpoint};
pub use pool::WorkerPool;
pub use replicator::{
    derive_replicator_id, DocumentFailure, ReplicationEvent, ReplicationHandle,
    ReplicationReport, ReplicationState, Replicator,
};
