//! Controller runtime — turns store events into reconcile passes.
//!
//! Keys are deduplicated while queued and never reconciled concurrently
//! with themselves. A key that changes while its pass is in flight is
//! marked dirty and re-queued once the pass completes. Failed passes are
//! retried with exponential backoff.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use scaleset_actions::ActionsService;
use scaleset_core::ScaleSetConfig;
use scaleset_state::StateStore;

use crate::reconciler::RunnerSetReconciler;

/// Tuning for the controller loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerConfig {
    pub max_concurrent_reconciles: usize,
    pub requeue_base: Duration,
    pub requeue_max: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_reconciles: 2,
            requeue_base: Duration::from_millis(500),
            requeue_max: Duration::from_secs(60),
        }
    }
}

impl From<&ScaleSetConfig> for ControllerConfig {
    fn from(config: &ScaleSetConfig) -> Self {
        Self {
            max_concurrent_reconciles: config.controller.max_concurrent_reconciles.max(1),
            requeue_base: config.requeue_base(),
            requeue_max: config.requeue_max(),
        }
    }
}

impl ControllerConfig {
    /// Backoff before retrying a key that has failed `failures` times in a row.
    pub fn requeue_delay(&self, failures: u32) -> Duration {
        let exp = failures.saturating_sub(1).min(16);
        self.requeue_base
            .saturating_mul(1u32 << exp)
            .min(self.requeue_max)
    }
}

/// Per-key scheduling state.
#[derive(Debug, Default)]
struct WorkQueue {
    ready: VecDeque<String>,
    queued: HashSet<String>,
    in_flight: HashSet<String>,
    dirty: HashSet<String>,
    failures: HashMap<String, u32>,
}

impl WorkQueue {
    fn add(&mut self, key: &str) {
        if self.in_flight.contains(key) {
            self.dirty.insert(key.to_string());
        } else if self.queued.insert(key.to_string()) {
            self.ready.push_back(key.to_string());
        }
    }

    fn next(&mut self) -> Option<String> {
        let key = self.ready.pop_front()?;
        self.queued.remove(&key);
        self.in_flight.insert(key.clone());
        Some(key)
    }

    /// Record a finished pass. Returns the consecutive failure count when
    /// the pass failed.
    fn done(&mut self, key: &str, ok: bool) -> Option<u32> {
        self.in_flight.remove(key);
        let failures = if ok {
            self.failures.remove(key);
            None
        } else {
            let count = self.failures.entry(key.to_string()).or_insert(0);
            *count += 1;
            Some(*count)
        };
        if self.dirty.remove(key) {
            self.add(key);
        }
        failures
    }
}

/// Watches the fleet store and reconciles runner sets as they change.
pub struct Controller {
    store: StateStore,
    reconciler: Arc<RunnerSetReconciler>,
    config: ControllerConfig,
}

impl Controller {
    pub fn new(
        store: StateStore,
        actions: Arc<dyn ActionsService>,
        config: ControllerConfig,
    ) -> Self {
        let reconciler = Arc::new(RunnerSetReconciler::new(
            Arc::new(store.clone()),
            actions,
        ));
        Self {
            store,
            reconciler,
            config,
        }
    }

    /// Run until the shutdown signal fires. In-flight passes are allowed
    /// to finish before returning.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut events = self.store.subscribe();
        let (requeue_tx, mut requeue_rx) = mpsc::unbounded_channel::<String>();
        let mut queue = WorkQueue::default();
        let mut tasks: JoinSet<(String, bool)> = JoinSet::new();

        info!(
            max_concurrent = self.config.max_concurrent_reconciles,
            "controller started"
        );
        self.enqueue_all(&mut queue);

        loop {
            while tasks.len() < self.config.max_concurrent_reconciles {
                let Some(key) = queue.next() else { break };
                let reconciler = self.reconciler.clone();
                tasks.spawn(async move {
                    match reconciler.reconcile(&key).await {
                        Ok(()) => (key, true),
                        Err(e) => {
                            warn!(runner_set = %key, errors = e.count(), error = %e, "reconcile failed");
                            (key, false)
                        }
                    }
                });
            }

            tokio::select! {
                _ = shutdown.changed() => {
                    info!("controller shutting down");
                    break;
                }
                event = events.recv() => match event {
                    Ok(event) => {
                        if let Some(key) = event.runner_set_key() {
                            debug!(runner_set = %key, kind = ?event.kind, action = ?event.action, "change observed");
                            queue.add(key);
                        }
                    }
                    Err(RecvError::Lagged(missed)) => {
                        warn!(missed, "event stream lagged, resyncing");
                        self.enqueue_all(&mut queue);
                    }
                    Err(RecvError::Closed) => {
                        info!("event stream closed");
                        break;
                    }
                },
                Some(key) = requeue_rx.recv() => queue.add(&key),
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => match joined {
                    Ok((key, ok)) => {
                        if let Some(failures) = queue.done(&key, ok) {
                            let delay = self.config.requeue_delay(failures);
                            debug!(runner_set = %key, failures, ?delay, "requeueing after failure");
                            let tx = requeue_tx.clone();
                            tokio::spawn(async move {
                                tokio::time::sleep(delay).await;
                                let _ = tx.send(key);
                            });
                        }
                    }
                    Err(e) => error!(error = %e, "reconcile task aborted"),
                },
            }
        }

        while tasks.join_next().await.is_some() {}
        info!("controller stopped");
    }

    fn enqueue_all(&self, queue: &mut WorkQueue) {
        match self.store.list_runner_sets() {
            Ok(sets) => {
                for set in sets {
                    queue.add(&set.key());
                }
            }
            Err(e) => error!(error = %e, "failed to list runner sets"),
        }
    }
}
