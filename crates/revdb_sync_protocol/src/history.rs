//! Compact revision ancestry encoding.

use crate::error::{ProtocolError, ProtocolResult};
use revdb_core::RevisionId;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// A revision ancestry in `_revisions` form: the generation of the newest
/// revision plus the digests from newest to oldest.
///
/// `{"start": 3, "ids": ["c", "b", "a"]}` is `3-c`, `2-b`, `1-a`. A history
/// whose oldest generation is above 1 has been truncated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevisionHistory {
    /// Generation of the first (newest) entry.
    pub start: u64,
    /// Digests, newest first.
    pub ids: Vec<String>,
}

impl RevisionHistory {
    /// Encodes a newest-first chain of revision IDs.
    ///
    /// The chain is assumed to have consecutive generations; an empty chain
    /// encodes as `start: 0`.
    pub fn from_revisions(history: &[RevisionId]) -> Self {
        Self {
            start: history.first().map_or(0, RevisionId::generation),
            ids: history
                .iter()
                .map(|revision| revision.digest().to_string())
                .collect(),
        }
    }

    /// Decodes into revision IDs, newest first.
    pub fn to_revisions(&self, doc_id: &str) -> ProtocolResult<Vec<RevisionId>> {
        if self.ids.is_empty() {
            return Err(ProtocolError::invalid_history(doc_id, "no revisions"));
        }
        if self.start < self.ids.len() as u64 {
            return Err(ProtocolError::invalid_history(
                doc_id,
                format!(
                    "{} revisions cannot start at generation {}",
                    self.ids.len(),
                    self.start
                ),
            ));
        }

        let mut seen = HashSet::new();
        let mut revisions = Vec::with_capacity(self.ids.len());
        for (offset, digest) in self.ids.iter().enumerate() {
            let generation = self.start - offset as u64;
            let revision = RevisionId::new(generation, digest.as_str()).map_err(|_| {
                ProtocolError::invalid_history(doc_id, format!("invalid digest {digest:?}"))
            })?;
            if !seen.insert(digest.as_str()) {
                return Err(ProtocolError::invalid_history(
                    doc_id,
                    format!("digest {digest:?} appears twice"),
                ));
            }
            revisions.push(revision);
        }
        Ok(revisions)
    }

    /// Returns true if the history does not reach generation 1.
    #[must_use]
    pub fn is_truncated(&self) -> bool {
        self.start > self.ids.len() as u64
    }
}
