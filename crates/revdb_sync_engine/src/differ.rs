//! Revision diffing against the target.

use crate::endpoint::ReplicationTarget;
use crate::error::SyncResult;
use revdb_core::RevisionId;
use revdb_sync_protocol::RevsDiffRequest;
use std::collections::BTreeMap;

/// Partitions candidate revisions into those the target holds and those it
/// needs, in requests of at most `batch_size` documents.
pub struct RevisionDiffer<'a, T: ReplicationTarget + ?Sized> {
    target: &'a T,
    batch_size: usize,
}

impl<'a, T: ReplicationTarget + ?Sized> RevisionDiffer<'a, T> {
    /// Creates a differ.
    pub fn new(target: &'a T, batch_size: usize) -> Self {
        Self {
            target,
            batch_size: batch_size.max(1),
        }
    }

    /// Returns, for every input document, the candidates the target lacks.
    ///
    /// Documents the target holds completely map to an empty list. The
    /// result does not depend on the batch size.
    pub fn diff(
        &self,
        candidates: &BTreeMap<String, Vec<RevisionId>>,
    ) -> SyncResult<BTreeMap<String, Vec<RevisionId>>> {
        let mut missing: BTreeMap<String, Vec<RevisionId>> = BTreeMap::new();
        let documents: Vec<(&String, &Vec<RevisionId>)> = candidates.iter().collect();

        for chunk in documents.chunks(self.batch_size) {
            let request = RevsDiffRequest(
                chunk
                    .iter()
                    .map(|(doc_id, revs)| ((*doc_id).clone(), (*revs).clone()))
                    .collect(),
            );
            let mut response = self.target.revs_diff(&request)?;
            for (doc_id, revs) in chunk {
                let absent: Vec<RevisionId> = response
                    .0
                    .remove(*doc_id)
                    .unwrap_or_default()
                    .into_iter()
                    .filter(|revision| revs.contains(revision))
                    .collect();
                missing.insert((*doc_id).clone(), absent);
            }
        }

        tracing::debug!(
            documents = candidates.len(),
            needing = missing.values().filter(|revs| !revs.is_empty()).count(),
            "diffed revisions against target"
        );
        Ok(missing)
    }
}
