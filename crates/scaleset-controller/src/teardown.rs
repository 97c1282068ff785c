//! Finalizer-gated teardown of a runner set.
//!
//! The finalizer is added the first time a live runner set is observed
//! without it. Once the set is marked for deletion the controller drains
//! its children and only then releases the finalizer.

use scaleset_core::{ObjectMeta, RUNNER_SET_FINALIZER};

/// Where a runner set stands in its two-phase delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownState {
    /// Live runner set; converge toward `replicas`.
    Active,
    /// Marked for deletion with children remaining.
    Draining,
    /// Marked for deletion and empty; the finalizer can go.
    Removable,
}

impl TeardownState {
    pub fn observe(meta: &ObjectMeta, children: usize) -> Self {
        if !meta.is_deleting() {
            TeardownState::Active
        } else if children > 0 {
            TeardownState::Draining
        } else {
            TeardownState::Removable
        }
    }
}

/// Finalizers with ours appended, if missing.
pub fn with_finalizer(meta: &ObjectMeta) -> Vec<String> {
    let mut finalizers = meta.finalizers.clone();
    if !meta.has_finalizer(RUNNER_SET_FINALIZER) {
        finalizers.push(RUNNER_SET_FINALIZER.to_string());
    }
    finalizers
}

/// Finalizers with ours removed.
pub fn without_finalizer(meta: &ObjectMeta) -> Vec<String> {
    meta.finalizers
        .iter()
        .filter(|f| *f != RUNNER_SET_FINALIZER)
        .cloned()
        .collect()
}
