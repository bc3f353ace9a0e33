//! # RevDB Testkit
//!
//! Test utilities for RevDB.
//!
//! This crate provides:
//! - Fixtures for building bodies, histories and populated stores
//! - Store snapshots for comparing replicas after replication
//! - Property-based generators for revision histories using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use revdb_testkit::prelude::*;
//!
//! #[test]
//! fn replicas_match() {
//!     let store = populated_store(10);
//!     assert_eq!(snapshot(&store).len(), 10);
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use fixtures::*;
pub use generators::*;
