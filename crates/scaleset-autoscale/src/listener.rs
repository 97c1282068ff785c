//! Listener worker — feeds message batches through the calculator.
//!
//! Batches arrive on a bounded channel and are processed one at a time in
//! arrival order. Each decision is written onto the runner set through a
//! [`PatchApplier`]; the write is skipped when it would repeat the last
//! applied patch.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info};

use scaleset_state::StateStore;

use crate::calculator::{DesiredReplicaCalculator, ScaleBounds};

/// Job counts reported by one message batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct JobBatch {
    /// Jobs newly assigned to this runner set.
    #[serde(default)]
    pub acquired: u32,
    /// Jobs newly finished by this runner set.
    #[serde(default)]
    pub completed: u32,
}

/// The `{replicas, patch_id}` pair written onto a runner set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScalePatch {
    pub replicas: u32,
    pub patch_id: i64,
}

/// Writes a scaling decision onto a runner set's spec.
#[async_trait]
pub trait PatchApplier: Send + Sync {
    async fn apply_patch(&self, runner_set: &str, patch: ScalePatch) -> anyhow::Result<()>;
}

#[async_trait]
impl PatchApplier for StateStore {
    async fn apply_patch(&self, runner_set: &str, patch: ScalePatch) -> anyhow::Result<()> {
        self.patch_runner_set_spec(runner_set, patch.replicas, patch.patch_id)?;
        Ok(())
    }
}

/// Owns one calculator and drives it from a stream of batches.
pub struct ListenerWorker<P> {
    runner_set: String,
    calculator: DesiredReplicaCalculator,
    applier: P,
    batches: mpsc::Receiver<JobBatch>,
    last_applied: Option<ScalePatch>,
}

impl<P: PatchApplier> ListenerWorker<P> {
    /// Create a worker and the sender used to submit batches to it.
    pub fn new(
        runner_set: &str,
        bounds: ScaleBounds,
        applier: P,
        capacity: usize,
    ) -> (Self, mpsc::Sender<JobBatch>) {
        let (tx, rx) = mpsc::channel(capacity);
        let worker = Self {
            runner_set: runner_set.to_string(),
            calculator: DesiredReplicaCalculator::new(bounds),
            applier,
            batches: rx,
            last_applied: None,
        };
        (worker, tx)
    }

    pub fn calculator(&self) -> &DesiredReplicaCalculator {
        &self.calculator
    }

    /// Compute the decision for one batch and apply it.
    pub async fn process(&mut self, batch: JobBatch) -> anyhow::Result<ScalePatch> {
        let patch_id = self.calculator.compute(batch.acquired, batch.completed);
        let patch = ScalePatch {
            replicas: self.calculator.last_patch().unwrap_or(0),
            patch_id,
        };

        if self.last_applied == Some(patch) {
            debug!(runner_set = %self.runner_set, ?patch, "decision unchanged, skipping patch");
            return Ok(patch);
        }

        self.applier.apply_patch(&self.runner_set, patch).await?;
        self.last_applied = Some(patch);
        info!(
            runner_set = %self.runner_set,
            replicas = patch.replicas,
            patch_id = patch.patch_id,
            acquired = batch.acquired,
            completed = batch.completed,
            "applied scaling decision"
        );
        Ok(patch)
    }

    /// Run until shutdown or until every sender is dropped.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(runner_set = %self.runner_set, "listener started");

        loop {
            tokio::select! {
                batch = self.batches.recv() => {
                    let Some(batch) = batch else {
                        info!(runner_set = %self.runner_set, "batch channel closed");
                        break;
                    };
                    if let Err(e) = self.process(batch).await {
                        // The next batch re-applies since `last_applied` is unchanged.
                        error!(runner_set = %self.runner_set, error = %e, "failed to apply scaling decision");
                    }
                }
                _ = shutdown.changed() => {
                    info!(runner_set = %self.runner_set, "listener shutting down");
                    break;
                }
            }
        }
    }
}
