//! Test fixtures and store helpers.

use revdb_core::{
    Body, DocumentStore, ForceInsert, MemoryDocumentStore, RevisionId,
};
use std::collections::BTreeMap;

/// Converts a JSON object literal into a [`Body`].
///
/// Non-object values yield an empty body.
pub fn body(value: serde_json::Value) -> Body {
    match value {
        serde_json::Value::Object(map) => map,
        _ => Body::new(),
    }
}

/// Parses a list of revision ID strings.
///
/// # Panics
///
/// Panics on an invalid revision ID; intended for literals in tests.
pub fn history(ids: &[&str]) -> Vec<RevisionId> {
    ids.iter()
        .map(|id| RevisionId::parse(id).expect("invalid revision id in fixture"))
        .collect()
}

/// Builds a [`ForceInsert`] without attachments.
pub fn force_insert(doc_id: &str, ids: &[&str], value: serde_json::Value) -> ForceInsert {
    ForceInsert {
        doc_id: doc_id.to_string(),
        history: history(ids),
        body: body(value),
        deleted: false,
        attachments: BTreeMap::new(),
    }
}

/// Creates a store holding `count` documents named `doc-000`, `doc-001`, ...
///
/// # Panics
///
/// Panics if the store rejects a write.
pub fn populated_store(count: usize) -> MemoryDocumentStore {
    let store = MemoryDocumentStore::new();
    for n in 0..count {
        store
            .create_document(
                Some(&format!("doc-{n:03}")),
                body(serde_json::json!({ "n": n })),
            )
            .expect("failed to create fixture document");
    }
    store
}

/// The replicated state of one document.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentSnapshot {
    /// Body of the winning leaf (`None` for a stub).
    pub winning_body: Option<Body>,
    /// Whether the winning leaf is deleted.
    pub deleted: bool,
    /// All leaf revision IDs, sorted.
    pub leaves: Vec<RevisionId>,
}

/// Captures `(document id, winning body, leaf ids)` for every document.
///
/// # Panics
///
/// Panics if the store fails to return a tree it listed.
pub fn snapshot(store: &MemoryDocumentStore) -> BTreeMap<String, DocumentSnapshot> {
    store
        .document_ids()
        .into_iter()
        .filter_map(|doc_id| {
            let tree = store
                .get_all_revisions(&doc_id)
                .expect("failed to read revision tree")?;
            let winner = tree.winning_leaf()?;
            let mut leaves: Vec<RevisionId> =
                tree.leaves().iter().map(|leaf| leaf.id.clone()).collect();
            leaves.sort();
            let snapshot = DocumentSnapshot {
                winning_body: winner.body.clone(),
                deleted: winner.deleted,
                leaves,
            };
            Some((doc_id, snapshot))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn populated_store_has_documents() {
        let store = populated_store(3);
        let snap = snapshot(&store);
        assert_eq!(snap.len(), 3);
        assert_eq!(
            snap["doc-001"].winning_body,
            Some(body(json!({"n": 1})))
        );
    }

    #[test]
    fn history_parses_ids() {
        let ids = history(&["2-b", "1-a"]);
        assert_eq!(ids[0].generation(), 2);
        assert_eq!(ids[1].digest(), "a");
    }
}
