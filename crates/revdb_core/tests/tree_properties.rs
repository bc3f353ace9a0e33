//! Property tests for revision tree merging.

use proptest::prelude::*;
use revdb_core::{
    Body, DocumentStore, ForceInsert, MemoryDocumentStore, RevisionContent, RevisionId,
    RevisionTree,
};
use revdb_testkit::prelude::*;
use std::collections::BTreeMap;

fn leaf_contents(history: &[RevisionId], body: &Body) -> BTreeMap<RevisionId, RevisionContent> {
    history
        .first()
        .map(|leaf| (leaf.clone(), RevisionContent::new(body.clone())))
        .into_iter()
        .collect()
}

fn merge_all(branches: &[Vec<RevisionId>], body: &Body) -> RevisionTree {
    let mut tree = RevisionTree::new("doc");
    for branch in branches {
        tree.merge_history(branch, &leaf_contents(branch, body))
            .expect("merge failed");
    }
    tree
}

/// Merges the branches of `set` in `order`, ending deleted branches in a
/// tombstone.
fn merge_in_order(set: &BranchSet, order: &[usize], body: &Body) -> RevisionTree {
    let mut tree = RevisionTree::new("doc");
    for &index in order {
        let branch = &set.branches[index];
        let content = if set.deleted[index] {
            RevisionContent::tombstone()
        } else {
            RevisionContent::new(body.clone())
        };
        let contents = branch
            .first()
            .map(|leaf| (leaf.clone(), content))
            .into_iter()
            .collect();
        tree.merge_history(branch, &contents).expect("merge failed");
    }
    tree
}

/// A branch set with a random permutation of its branch indices.
fn arb_shuffled_branches() -> impl Strategy<Value = (BranchSet, Vec<usize>)> {
    arb_branches(5, 6).prop_flat_map(|set| {
        let order: Vec<usize> = (0..set.branches.len()).collect();
        (Just(set), Just(order).prop_shuffle())
    })
}

fn sorted_leaves(tree: &RevisionTree) -> Vec<RevisionId> {
    let mut leaves: Vec<RevisionId> = tree.leaves().iter().map(|leaf| leaf.id.clone()).collect();
    leaves.sort();
    leaves
}

proptest! {
    #![proptest_config(PropTestConfig::quick().to_proptest_config())]

    #[test]
    fn merging_twice_changes_nothing(set in arb_branches(4, 6), body in arb_body(4)) {
        let mut tree = merge_all(&set.branches, &body);
        let size = tree.len();
        for branch in &set.branches {
            let outcome = tree.merge_history(branch, &leaf_contents(branch, &body)).unwrap();
            prop_assert!(outcome.is_noop());
        }
        prop_assert_eq!(tree.len(), size);
    }

    #[test]
    fn winner_does_not_depend_on_merge_order(
        (set, order) in arb_shuffled_branches(),
        body in arb_body(4),
    ) {
        let natural: Vec<usize> = (0..set.branches.len()).collect();
        let forward = merge_in_order(&set, &natural, &body);
        let shuffled = merge_in_order(&set, &order, &body);
        let expected = set.expected_winner();

        let winner = |tree: &RevisionTree| tree.winning_leaf().map(|leaf| leaf.id.clone());
        prop_assert_eq!(winner(&forward), expected.clone());
        prop_assert_eq!(winner(&shuffled), expected);
        prop_assert_eq!(sorted_leaves(&forward), sorted_leaves(&shuffled));

        let deleted = |tree: &RevisionTree| tree.winning_leaf().map(|leaf| leaf.deleted);
        prop_assert_eq!(deleted(&forward), deleted(&shuffled));
    }

    #[test]
    fn every_branch_ends_in_a_leaf(set in arb_branches(4, 6), body in arb_body(2)) {
        let tree = merge_all(&set.branches, &body);
        let mut expected = set.leaves();
        expected.sort();
        expected.dedup();
        prop_assert_eq!(sorted_leaves(&tree), expected);
    }

    #[test]
    fn winner_has_the_highest_generation(set in arb_branches(4, 6), body in arb_body(2)) {
        let tree = merge_all(&set.branches, &body);
        let winner = tree.winning_leaf().unwrap();
        let highest = set.leaves().iter().map(RevisionId::generation).max().unwrap();
        prop_assert_eq!(winner.generation(), highest);
        prop_assert_eq!(tree.conflicts().len(), tree.leaves().len() - 1);
    }

    #[test]
    fn merged_history_is_recoverable(history in arb_history(10), body in arb_body(3)) {
        let mut tree = RevisionTree::new("doc");
        tree.merge_history(&history, &leaf_contents(&history, &body)).unwrap();
        prop_assert_eq!(tree.history(&history[0]), Some(history.clone()));
    }

    #[test]
    fn store_force_insert_is_idempotent(history in arb_history(6), body in arb_body(3)) {
        let store = MemoryDocumentStore::new();
        let insert = ForceInsert {
            doc_id: "doc".to_string(),
            history: history.clone(),
            body,
            deleted: false,
            attachments: BTreeMap::new(),
        };
        let first = store.force_insert(insert.clone()).unwrap();
        let sequence = store.last_sequence();
        let second = store.force_insert(insert).unwrap();

        prop_assert_eq!(first.inserted.len(), history.len());
        prop_assert!(second.is_noop());
        prop_assert_eq!(store.last_sequence(), sequence);
    }
}
