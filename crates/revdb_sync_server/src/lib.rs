//! # RevDB Sync Server
//!
//! Reference replication peer for RevDB.
//!
//! This crate provides:
//! - A request handler serving every replication endpoint from a
//!   [`DocumentStore`](revdb_core::DocumentStore)
//! - Path dispatch and the JSON reply envelope
//! - A [`LoopbackServer`](revdb_sync_engine::LoopbackServer) implementation,
//!   so a [`RemoteEndpoint`](revdb_sync_engine::RemoteEndpoint) can talk to
//!   the peer in-process
//!
//! # Architecture
//!
//! The peer has no state of its own: every request is decoded, applied to
//! the store through a [`LocalEndpoint`](revdb_sync_engine::LocalEndpoint)
//! and answered with `{"ok": ...}` or `{"error": ...}`. Replicators drive
//! all of the protocol; the peer only answers.
//!
//! ```
//! use revdb_core::MemoryDocumentStore;
//! use revdb_sync_engine::{LoopbackClient, RemoteEndpoint, ReplicationSource};
//! use revdb_sync_protocol::ChangesRequest;
//! use revdb_sync_server::{PeerServer, ServerConfig};
//! use std::sync::Arc;
//!
//! let store = Arc::new(MemoryDocumentStore::with_identifier("peer"));
//! let server = PeerServer::new(ServerConfig::new("peer"), store);
//! let remote = RemoteEndpoint::new("http://peer/db", LoopbackClient::new(server));
//!
//! let changes = remote.changes(&ChangesRequest::new(None, 10)).unwrap();
//! assert!(changes.results.is_empty());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
// Request handling must not panic on client input.
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod config;
mod error;
mod handler;
mod server;

pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use handler::{error_response, HandlerContext, HandlerResult, RequestHandler};
pub use server::PeerServer;
