//! Property-based test generators using proptest.

use proptest::prelude::*;
use revdb_core::{Body, RevisionId};

/// Strategy for a short lowercase hex digest.
pub fn arb_digest() -> impl Strategy<Value = String> {
    "[0-9a-f]{6,12}"
}

/// Strategy for a JSON scalar value.
pub fn arb_scalar() -> impl Strategy<Value = serde_json::Value> {
    prop_oneof![
        Just(serde_json::Value::Null),
        any::<bool>().prop_map(serde_json::Value::Bool),
        any::<i64>().prop_map(serde_json::Value::from),
        "[a-zA-Z0-9 ]{0,24}".prop_map(serde_json::Value::String),
    ]
}

/// Strategy for a document body with up to `max_fields` scalar fields.
pub fn arb_body(max_fields: usize) -> impl Strategy<Value = Body> {
    prop::collection::btree_map("[a-z]{1,8}", arb_scalar(), 0..=max_fields)
        .prop_map(|fields| fields.into_iter().collect())
}

/// Strategy for a linear history, newest first, ending at generation 1.
pub fn arb_history(max_depth: usize) -> impl Strategy<Value = Vec<RevisionId>> {
    prop::collection::vec(arb_digest(), 1..=max_depth.max(1)).prop_map(|digests| {
        let mut history: Vec<RevisionId> = digests
            .into_iter()
            .enumerate()
            .filter_map(|(index, digest)| {
                // Prefix with the generation so digests never repeat.
                RevisionId::new(index as u64 + 1, format!("{}{digest}", index + 1)).ok()
            })
            .collect();
        history.reverse();
        history
    })
}

/// A set of branches that share a common trunk.
#[derive(Debug, Clone)]
pub struct BranchSet {
    /// Each branch as a full history, newest first, ending at generation 1.
    pub branches: Vec<Vec<RevisionId>>,
    /// Whether each branch ends in a deletion, parallel to `branches`.
    pub deleted: Vec<bool>,
}

impl BranchSet {
    /// Returns the leaf of every branch.
    #[must_use]
    pub fn leaves(&self) -> Vec<RevisionId> {
        self.branches
            .iter()
            .filter_map(|branch| branch.first().cloned())
            .collect()
    }

    /// Returns the leaf that should win: live leaves beat deleted ones,
    /// then the highest revision ID.
    #[must_use]
    pub fn expected_winner(&self) -> Option<RevisionId> {
        self.branches
            .iter()
            .zip(&self.deleted)
            .filter_map(|(branch, deleted)| branch.first().map(|leaf| (!deleted, leaf)))
            .max()
            .map(|(_, leaf)| leaf.clone())
    }
}

/// Strategy for up to `max_branches` branches forking off a shared trunk
/// of up to `max_depth` revisions.
///
/// Branch digests are prefixed with the branch index so that two branches
/// never produce the same revision ID by accident.
pub fn arb_branches(max_branches: usize, max_depth: usize) -> impl Strategy<Value = BranchSet> {
    let depth = max_depth.max(1);
    let trunk = prop::collection::vec(arb_digest(), 1..=depth);
    let branch = (
        1..=depth,
        prop::collection::vec(arb_digest(), 1..=depth),
        any::<bool>(),
    );
    (
        trunk,
        prop::collection::vec(branch, 1..=max_branches.max(1)),
    )
        .prop_map(|(trunk, branches)| {
            let trunk: Vec<RevisionId> = trunk
                .into_iter()
                .enumerate()
                .filter_map(|(index, digest)| {
                    RevisionId::new(index as u64 + 1, format!("t{digest}")).ok()
                })
                .collect();

            let deleted = branches.iter().map(|(_, _, deleted)| *deleted).collect();
            let branches = branches
                .into_iter()
                .enumerate()
                .map(|(branch_index, (fork, extension, _))| {
                    let fork = fork.min(trunk.len());
                    let mut history: Vec<RevisionId> = trunk[..fork].to_vec();
                    for (offset, digest) in extension.into_iter().enumerate() {
                        let generation = (fork + offset + 1) as u64;
                        if let Ok(id) =
                            RevisionId::new(generation, format!("b{branch_index}x{offset}{digest}"))
                        {
                            history.push(id);
                        }
                    }
                    history.reverse();
                    history
                })
                .collect();
            BranchSet { branches, deleted }
        })
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a quick configuration for fast tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Creates a thorough configuration for comprehensive tests.
    #[must_use]
    pub fn thorough() -> Self {
        Self {
            cases: 1000,
            max_shrink_iters: 5000,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}
