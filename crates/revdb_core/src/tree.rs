//! Per-document revision tree.
//!
//! The tree is an arena of nodes keyed by revision ID. Parent and child
//! links are IDs, never owning pointers, so a document with many branches
//! (or several roots after a truncated merge) has no ownership cycles.
//!
//! # Invariants
//!
//! - No duplicate revision IDs.
//! - A revision's parent has generation exactly one less.
//! - A revision whose parent is not in the tree is an unattached fragment
//!   root; it is linked as soon as the parent is inserted.
//! - Nodes are never removed and their content is never changed.

use crate::error::{CoreError, CoreResult};
use crate::revision::{Revision, RevisionContent, RevisionId};
use std::collections::{BTreeMap, BTreeSet, HashMap};

#[derive(Debug, Clone)]
struct Node {
    revision: Revision,
    children: BTreeSet<RevisionId>,
}

/// Result of merging a history into a tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOutcome {
    /// Revisions added by the merge, oldest first.
    pub inserted: Vec<RevisionId>,
    /// The newest revision of the merged history.
    pub leaf: RevisionId,
}

impl MergeOutcome {
    /// Returns true if the merge added nothing.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.inserted.is_empty()
    }
}

/// All known revisions of one document.
#[derive(Debug, Clone)]
pub struct RevisionTree {
    doc_id: String,
    nodes: HashMap<RevisionId, Node>,
    /// Children whose parent has not arrived yet, keyed by that parent.
    orphans: HashMap<RevisionId, BTreeSet<RevisionId>>,
}

impl RevisionTree {
    /// Creates an empty tree for a document.
    pub fn new(doc_id: impl Into<String>) -> Self {
        Self {
            doc_id: doc_id.into(),
            nodes: HashMap::new(),
            orphans: HashMap::new(),
        }
    }

    /// Returns the document ID.
    #[must_use]
    pub fn doc_id(&self) -> &str {
        &self.doc_id
    }

    /// Returns the number of revisions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true if the tree holds no revisions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Returns true if the revision is in the tree.
    #[must_use]
    pub fn contains(&self, id: &RevisionId) -> bool {
        self.nodes.contains_key(id)
    }

    /// Gets a revision by ID.
    #[must_use]
    pub fn get(&self, id: &RevisionId) -> Option<&Revision> {
        self.nodes.get(id).map(|node| &node.revision)
    }

    /// Iterates over all revisions in no particular order.
    pub fn revisions(&self) -> impl Iterator<Item = &Revision> {
        self.nodes.values().map(|node| &node.revision)
    }

    /// Returns the children of a revision, sorted.
    #[must_use]
    pub fn children(&self, id: &RevisionId) -> Vec<&RevisionId> {
        self.nodes
            .get(id)
            .map(|node| node.children.iter().collect())
            .unwrap_or_default()
    }

    /// Returns the roots: revisions with no parent, or whose parent is not
    /// in the tree.
    #[must_use]
    pub fn roots(&self) -> Vec<&RevisionId> {
        let mut roots: Vec<&RevisionId> = self
            .nodes
            .values()
            .filter(|node| {
                node.revision
                    .parent
                    .as_ref()
                    .map_or(true, |parent| !self.nodes.contains_key(parent))
            })
            .map(|node| &node.revision.id)
            .collect();
        roots.sort();
        roots
    }

    /// Returns the path from `id` to its root, newest first.
    #[must_use]
    pub fn history(&self, id: &RevisionId) -> Option<Vec<RevisionId>> {
        let mut current = self.nodes.get(id)?;
        let mut path = vec![current.revision.id.clone()];
        while let Some(parent) = current
            .revision
            .parent
            .as_ref()
            .and_then(|parent| self.nodes.get(parent))
        {
            path.push(parent.revision.id.clone());
            current = parent;
        }
        Some(path)
    }

    /// Returns all leaves, winner first.
    ///
    /// Ordering: non-deleted before deleted, then generation descending,
    /// then digest descending.
    #[must_use]
    pub fn leaves(&self) -> Vec<&Revision> {
        let mut leaves: Vec<&Revision> = self
            .nodes
            .values()
            .filter(|node| node.children.is_empty())
            .map(|node| &node.revision)
            .collect();
        leaves.sort_by(|a, b| winner_key(b).cmp(&winner_key(a)));
        leaves
    }

    /// Returns the winning leaf, or `None` for an empty tree.
    #[must_use]
    pub fn winning_leaf(&self) -> Option<&Revision> {
        self.nodes
            .values()
            .filter(|node| node.children.is_empty())
            .map(|node| &node.revision)
            .max_by(|a, b| winner_key(a).cmp(&winner_key(b)))
    }

    /// Returns every leaf except the winner, in winner order.
    #[must_use]
    pub fn conflicts(&self) -> Vec<&Revision> {
        self.leaves().into_iter().skip(1).collect()
    }

    /// Returns true if more than one leaf shares the winner's deleted
    /// status.
    #[must_use]
    pub fn is_conflicted(&self) -> bool {
        let Some(winner) = self.winning_leaf() else {
            return false;
        };
        self.leaves()
            .iter()
            .filter(|leaf| leaf.deleted == winner.deleted)
            .count()
            > 1
    }

    /// Inserts a single revision.
    ///
    /// If the parent is not in the tree the revision is kept as an
    /// unattached fragment until the parent arrives. Returns `false` if an
    /// identical revision was already present.
    pub fn insert(&mut self, revision: Revision) -> CoreResult<bool> {
        self.check_shape(&revision)?;
        match self.nodes.get(&revision.id) {
            Some(node) => {
                self.check_compatible(&node.revision, &revision)?;
                if needs_parent(&node.revision, &revision) {
                    if let Some(parent) = revision.parent {
                        self.adopt_parent(&revision.id, parent);
                    }
                }
                Ok(false)
            }
            None => {
                self.link(revision);
                Ok(true)
            }
        }
    }

    /// Merges an externally supplied history into the tree.
    ///
    /// `history` is ordered newest to oldest and must have consecutive
    /// generations. It may end at generation 1, at a revision already in
    /// the tree, or at a truncation point (whose revision then becomes a
    /// fragment root). Revisions without an entry in `contents` are stored
    /// as stubs; the newest revision must have content unless it is
    /// already present.
    ///
    /// The merge is all-or-nothing and idempotent.
    pub fn merge_history(
        &mut self,
        history: &[RevisionId],
        contents: &BTreeMap<RevisionId, RevisionContent>,
    ) -> CoreResult<MergeOutcome> {
        let Some(leaf) = history.first() else {
            return Err(self.malformed("empty revision history"));
        };

        for pair in history.windows(2) {
            if pair[1].generation().checked_add(1) != Some(pair[0].generation()) {
                return Err(self.malformed(format!(
                    "history is not consecutive: {} follows {}",
                    pair[0], pair[1]
                )));
            }
        }

        if !self.contains(leaf) && !contents.contains_key(leaf) {
            return Err(self.malformed(format!("missing body for leaf revision {leaf}")));
        }

        // Build candidate revisions oldest first and validate them all
        // before touching the tree.
        let mut pending = Vec::new();
        for (index, id) in history.iter().enumerate().rev() {
            let parent = history.get(index + 1).cloned();
            let revision = match contents.get(id) {
                Some(content) => Revision::new(&self.doc_id, id.clone(), parent, content.clone()),
                None => Revision::stub(&self.doc_id, id.clone(), parent),
            };
            self.check_shape(&revision)?;
            if let Some(node) = self.nodes.get(id) {
                self.check_compatible(&node.revision, &revision)?;
            }
            pending.push(revision);
        }

        let mut inserted = Vec::new();
        for revision in pending {
            match self.nodes.get(&revision.id) {
                Some(node) => {
                    if needs_parent(&node.revision, &revision) {
                        if let Some(parent) = revision.parent {
                            self.adopt_parent(&revision.id, parent);
                        }
                    }
                }
                None => {
                    inserted.push(revision.id.clone());
                    self.link(revision);
                }
            }
        }

        tracing::trace!(
            doc_id = %self.doc_id,
            leaf = %leaf,
            inserted = inserted.len(),
            "merged revision history"
        );

        Ok(MergeOutcome {
            inserted,
            leaf: leaf.clone(),
        })
    }

    fn malformed(&self, reason: impl Into<String>) -> CoreError {
        CoreError::malformed_history(&self.doc_id, reason)
    }

    /// Checks a revision on its own, independent of the tree contents.
    fn check_shape(&self, revision: &Revision) -> CoreResult<()> {
        if revision.doc_id != self.doc_id {
            return Err(self.malformed(format!(
                "revision {} belongs to document {}",
                revision.id, revision.doc_id
            )));
        }
        if let Some(parent) = &revision.parent {
            if parent == &revision.id {
                return Err(self.malformed(format!("{} lists itself as parent", revision.id)));
            }
            if parent.generation().checked_add(1) != Some(revision.id.generation()) {
                return Err(self.malformed(format!(
                    "{} cannot be the parent of {}",
                    parent, revision.id
                )));
            }
        }
        Ok(())
    }

    /// Checks that `incoming` describes the same revision as `existing`.
    fn check_compatible(&self, existing: &Revision, incoming: &Revision) -> CoreResult<()> {
        let parents_agree = match (&existing.parent, &incoming.parent) {
            (Some(a), Some(b)) => a == b,
            // One side does not know the parent; the other may fill it in.
            _ => true,
        };
        if !parents_agree {
            return Err(self.malformed(format!(
                "{} already exists with a different parent",
                existing.id
            )));
        }
        if let (Some(a), Some(b)) = (&existing.body, &incoming.body) {
            if a != b || existing.deleted != incoming.deleted {
                return Err(self.malformed(format!(
                    "{} already exists with different content",
                    existing.id
                )));
            }
        }
        Ok(())
    }

    fn link(&mut self, revision: Revision) {
        let id = revision.id.clone();
        let children = self.orphans.remove(&id).unwrap_or_default();
        if let Some(parent) = revision.parent.clone() {
            self.attach_child(parent, id.clone());
        }
        self.nodes.insert(id, Node { revision, children });
    }

    /// Records a parent for a fragment root that was stored without one.
    fn adopt_parent(&mut self, id: &RevisionId, parent: RevisionId) {
        if let Some(node) = self.nodes.get_mut(id) {
            node.revision.parent = Some(parent.clone());
        }
        self.attach_child(parent, id.clone());
    }

    fn attach_child(&mut self, parent: RevisionId, child: RevisionId) {
        match self.nodes.get_mut(&parent) {
            Some(node) => {
                node.children.insert(child);
            }
            None => {
                self.orphans.entry(parent).or_default().insert(child);
            }
        }
    }
}

fn winner_key(revision: &Revision) -> (bool, &RevisionId) {
    (!revision.deleted, &revision.id)
}

fn needs_parent(existing: &Revision, incoming: &Revision) -> bool {
    existing.parent.is_none() && incoming.parent.is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::revision::Body;
    use serde_json::json;

    fn rev(s: &str) -> RevisionId {
        RevisionId::parse(s).unwrap()
    }

    fn content(value: serde_json::Value) -> RevisionContent {
        RevisionContent::new(value.as_object().cloned().unwrap_or_default())
    }

    fn revision(id: &str, parent: Option<&str>, value: serde_json::Value) -> Revision {
        Revision::new("d1", rev(id), parent.map(rev), content(value))
    }

    fn contents(entries: &[(&str, RevisionContent)]) -> BTreeMap<RevisionId, RevisionContent> {
        entries
            .iter()
            .map(|(id, content)| (rev(id), content.clone()))
            .collect()
    }

    #[test]
    fn single_revision_has_no_conflicts() {
        let mut tree = RevisionTree::new("d1");
        assert!(tree.insert(revision("1-aaa", None, json!({"v": 1}))).unwrap());

        assert_eq!(tree.winning_leaf().unwrap().id, rev("1-aaa"));
        assert!(tree.conflicts().is_empty());
        assert!(!tree.is_conflicted());
    }

    #[test]
    fn concurrent_edits_pick_greater_digest() {
        let mut tree = RevisionTree::new("d1");
        tree.insert(revision("1-aaa", None, json!({"v": 1})))
            .unwrap();

        tree.merge_history(
            &[rev("2-bbb"), rev("1-aaa")],
            &contents(&[("2-bbb", content(json!({"v": "b"})))]),
        )
        .unwrap();
        tree.merge_history(
            &[rev("2-ccc"), rev("1-aaa")],
            &contents(&[("2-ccc", content(json!({"v": "c"})))]),
        )
        .unwrap();

        assert_eq!(tree.winning_leaf().unwrap().id, rev("2-ccc"));
        let conflicts: Vec<_> = tree.conflicts().iter().map(|r| r.id.to_string()).collect();
        assert_eq!(conflicts, vec!["2-bbb"]);
        assert!(tree.is_conflicted());
    }

    #[test]
    fn live_leaf_beats_deeper_deleted_leaf() {
        let mut tree = RevisionTree::new("d1");
        tree.insert(revision("1-aaa", None, json!({}))).unwrap();
        tree.insert(revision("2-bbb", Some("1-aaa"), json!({})))
            .unwrap();
        tree.insert(Revision::new(
            "d1",
            rev("3-zzz"),
            Some(rev("2-bbb")),
            RevisionContent::tombstone(),
        ))
        .unwrap();
        tree.insert(revision("2-aaa", Some("1-aaa"), json!({"x": 1})))
            .unwrap();

        let winner = tree.winning_leaf().unwrap();
        assert_eq!(winner.id, rev("2-aaa"));
        assert!(!winner.deleted);
        // The deleted branch is a leaf but not a live conflict.
        assert_eq!(tree.conflicts().len(), 1);
        assert!(!tree.is_conflicted());
    }

    #[test]
    fn all_deleted_picks_highest() {
        let mut tree = RevisionTree::new("d1");
        tree.insert(revision("1-aaa", None, json!({}))).unwrap();
        for id in ["2-bbb", "2-ccc"] {
            tree.insert(Revision::new(
                "d1",
                rev(id),
                Some(rev("1-aaa")),
                RevisionContent::tombstone(),
            ))
            .unwrap();
        }

        let winner = tree.winning_leaf().unwrap();
        assert_eq!(winner.id, rev("2-ccc"));
        assert!(winner.deleted);
        assert!(tree.is_conflicted());
    }

    #[test]
    fn fragment_is_linked_when_parent_arrives() {
        let mut tree = RevisionTree::new("d1");
        tree.insert(revision("2-bbb", Some("1-aaa"), json!({})))
            .unwrap();
        assert_eq!(tree.roots(), vec![&rev("2-bbb")]);
        assert_eq!(tree.history(&rev("2-bbb")).unwrap(), vec![rev("2-bbb")]);

        tree.insert(revision("1-aaa", None, json!({}))).unwrap();
        assert_eq!(tree.roots(), vec![&rev("1-aaa")]);
        assert_eq!(tree.children(&rev("1-aaa")), vec![&rev("2-bbb")]);
        assert_eq!(tree.leaves().len(), 1);
        assert_eq!(
            tree.history(&rev("2-bbb")).unwrap(),
            vec![rev("2-bbb"), rev("1-aaa")]
        );
    }

    #[test]
    fn insert_rejects_self_parent_and_generation_gap() {
        let mut tree = RevisionTree::new("d1");
        let err = tree
            .insert(revision("2-aaa", Some("2-aaa"), json!({})))
            .unwrap_err();
        assert!(matches!(err, CoreError::MalformedHistory { .. }));

        let err = tree
            .insert(revision("4-aaa", Some("2-bbb"), json!({})))
            .unwrap_err();
        assert!(matches!(err, CoreError::MalformedHistory { .. }));
        assert!(tree.is_empty());
    }

    #[test]
    fn insert_rejects_same_id_different_content() {
        let mut tree = RevisionTree::new("d1");
        tree.insert(revision("1-aaa", None, json!({"a": 1}))).unwrap();
        assert!(!tree.insert(revision("1-aaa", None, json!({"a": 1}))).unwrap());

        let err = tree
            .insert(revision("1-aaa", None, json!({"a": 2})))
            .unwrap_err();
        assert!(matches!(err, CoreError::MalformedHistory { .. }));
    }

    #[test]
    fn merge_creates_stub_intermediates() {
        let mut tree = RevisionTree::new("d1");
        let outcome = tree
            .merge_history(
                &[rev("3-ccc"), rev("2-bbb"), rev("1-aaa")],
                &contents(&[("3-ccc", content(json!({"v": 3})))]),
            )
            .unwrap();

        assert_eq!(outcome.inserted, vec![rev("1-aaa"), rev("2-bbb"), rev("3-ccc")]);
        assert!(tree.get(&rev("1-aaa")).unwrap().is_stub());
        assert!(tree.get(&rev("2-bbb")).unwrap().is_stub());
        assert!(!tree.get(&rev("3-ccc")).unwrap().is_stub());
        assert_eq!(tree.leaves().len(), 1);
    }

    #[test]
    fn merge_is_idempotent() {
        let mut tree = RevisionTree::new("d1");
        let history = [rev("2-bbb"), rev("1-aaa")];
        let bodies = contents(&[("2-bbb", content(json!({"v": 2})))]);

        let first = tree.merge_history(&history, &bodies).unwrap();
        assert_eq!(first.inserted.len(), 2);
        let snapshot: Vec<_> = tree.leaves().into_iter().cloned().collect();

        let second = tree.merge_history(&history, &bodies).unwrap();
        assert!(second.is_noop());
        assert_eq!(tree.len(), 2);
        let again: Vec<_> = tree.leaves().into_iter().cloned().collect();
        assert_eq!(snapshot, again);
    }

    #[test]
    fn merge_stops_at_common_ancestor() {
        let mut tree = RevisionTree::new("d1");
        tree.insert(revision("1-aaa", None, json!({}))).unwrap();
        tree.insert(revision("2-bbb", Some("1-aaa"), json!({})))
            .unwrap();

        let outcome = tree
            .merge_history(
                &[rev("3-ddd"), rev("2-bbb")],
                &contents(&[("3-ddd", content(json!({"v": 3})))]),
            )
            .unwrap();
        assert_eq!(outcome.inserted, vec![rev("3-ddd")]);
        assert_eq!(tree.roots(), vec![&rev("1-aaa")]);
        assert_eq!(tree.winning_leaf().unwrap().id, rev("3-ddd"));
    }

    #[test]
    fn merge_rejects_bad_history_without_side_effects() {
        let mut tree = RevisionTree::new("d1");
        tree.insert(revision("1-aaa", None, json!({}))).unwrap();

        // Gap in generations.
        let err = tree
            .merge_history(
                &[rev("3-ccc"), rev("1-aaa")],
                &contents(&[("3-ccc", content(json!({})))]),
            )
            .unwrap_err();
        assert!(matches!(err, CoreError::MalformedHistory { .. }));

        // Revision listing itself as an ancestor.
        let err = tree
            .merge_history(
                &[rev("2-bbb"), rev("2-bbb")],
                &contents(&[("2-bbb", content(json!({})))]),
            )
            .unwrap_err();
        assert!(matches!(err, CoreError::MalformedHistory { .. }));

        // Existing revision claimed under a different parent.
        tree.insert(revision("2-bbb", Some("1-aaa"), json!({})))
            .unwrap();
        let err = tree
            .merge_history(
                &[rev("3-ccc"), rev("2-bbb"), rev("1-zzz")],
                &contents(&[("3-ccc", content(json!({})))]),
            )
            .unwrap_err();
        assert!(matches!(err, CoreError::MalformedHistory { .. }));

        // Missing leaf body.
        let err = tree
            .merge_history(&[rev("3-eee"), rev("2-bbb")], &BTreeMap::new())
            .unwrap_err();
        assert!(matches!(err, CoreError::MalformedHistory { .. }));

        assert_eq!(tree.len(), 2);
        assert!(!tree.contains(&rev("3-ccc")));
        assert!(!tree.contains(&rev("1-zzz")));
    }

    #[test]
    fn truncated_root_adopts_parent_later() {
        let mut tree = RevisionTree::new("d1");
        tree.merge_history(
            &[rev("3-ccc"), rev("2-bbb")],
            &contents(&[("3-ccc", content(json!({})))]),
        )
        .unwrap();
        assert_eq!(tree.roots(), vec![&rev("2-bbb")]);

        tree.merge_history(
            &[rev("3-ccc"), rev("2-bbb"), rev("1-aaa")],
            &contents(&[("3-ccc", content(json!({})))]),
        )
        .unwrap();
        assert_eq!(tree.roots(), vec![&rev("1-aaa")]);
        assert_eq!(tree.leaves().len(), 1);
        assert_eq!(tree.history(&rev("3-ccc")).unwrap().len(), 3);
    }

    #[test]
    fn rejects_revision_of_other_document() {
        let mut tree = RevisionTree::new("d1");
        let other = Revision::new("d2", rev("1-aaa"), None, RevisionContent::new(Body::new()));
        assert!(tree.insert(other).is_err());
    }
}
