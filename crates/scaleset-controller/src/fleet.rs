//! Fleet classification.
//!
//! A [`FleetState`] is a read-time projection of the runners owned by one
//! runner set. It is rebuilt from a fresh list on every reconcile and never
//! cached.

use scaleset_core::{Runner, RunnerPhase, RunnerSetStatus};

/// Lifecycle bucket a runner falls into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bucket {
    Pending,
    Running,
    Finished,
    Failed,
    Deleting,
}

impl Bucket {
    /// Classify one runner. Deletion wins over any phase.
    pub fn of(runner: &Runner) -> Self {
        if runner.metadata.is_deleting() {
            return Bucket::Deleting;
        }
        match runner.status.phase {
            RunnerPhase::Running => Bucket::Running,
            RunnerPhase::Succeeded => Bucket::Finished,
            RunnerPhase::Failed => Bucket::Failed,
            RunnerPhase::Pending | RunnerPhase::Unknown => Bucket::Pending,
        }
    }
}

/// Runners of one runner set, partitioned by lifecycle.
#[derive(Debug, Default)]
pub struct FleetState {
    pub pending: Vec<Runner>,
    pub running: Vec<Runner>,
    pub finished: Vec<Runner>,
    pub failed: Vec<Runner>,
    pub deleting: Vec<Runner>,
    /// Highest parseable patch-id annotation across all runners.
    pub latest_patch_id: Option<i64>,
}

impl FleetState {
    pub fn classify(runners: Vec<Runner>) -> Self {
        let mut fleet = FleetState::default();
        for runner in runners {
            if let Some(id) = runner.patch_id() {
                fleet.latest_patch_id = Some(fleet.latest_patch_id.map_or(id, |cur| cur.max(id)));
            }
            match Bucket::of(&runner) {
                Bucket::Pending => fleet.pending.push(runner),
                Bucket::Running => fleet.running.push(runner),
                Bucket::Finished => fleet.finished.push(runner),
                Bucket::Failed => fleet.failed.push(runner),
                Bucket::Deleting => fleet.deleting.push(runner),
            }
        }
        fleet
    }

    /// Runners counted against `replicas`. Finished runners are awaiting
    /// cleanup and do not count.
    pub fn scale_total(&self) -> u32 {
        (self.pending.len() + self.running.len() + self.failed.len()) as u32
    }

    /// Whether the fleet already carries the given scaling decision.
    pub fn is_patch_adopted(&self, patch_id: i64) -> bool {
        self.latest_patch_id == Some(patch_id)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
            + self.running.len()
            + self.finished.len()
            + self.failed.len()
            + self.deleting.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Status counters for the owning runner set.
    pub fn status(&self) -> RunnerSetStatus {
        RunnerSetStatus {
            current_replicas: self.scale_total(),
            pending_runners: self.pending.len() as u32,
            running_runners: self.running.len() as u32,
            failed_runners: self.failed.len() as u32,
        }
    }

    /// Runners that no longer hold capacity and should be removed.
    pub fn cleanup_candidates(&self) -> impl Iterator<Item = &Runner> {
        self.finished.iter().chain(self.failed.iter())
    }

    /// Pending and running runners merged and ordered oldest first, so
    /// scale-down reclaims the longest-idle candidates first.
    pub fn deletion_order(&self) -> Vec<&Runner> {
        let mut candidates: Vec<&Runner> =
            self.pending.iter().chain(self.running.iter()).collect();
        candidates.sort_by(|a, b| {
            a.metadata
                .creation_timestamp
                .cmp(&b.metadata.creation_timestamp)
                .then_with(|| a.metadata.name.cmp(&b.metadata.name))
        });
        candidates
    }
}
