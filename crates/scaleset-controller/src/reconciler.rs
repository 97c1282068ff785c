//! Runner set reconciler — converges a fleet of runners toward `replicas`.
//!
//! Every pass re-reads the runner set and re-lists its runners, so a pass
//! that is cancelled midway leaves nothing for the next one to repair:
//!
//! ```text
//! reconcile(key)
//!   ├── runner set gone                 → done
//!   ├── no finalizer, live              → add finalizer, done
//!   ├── no finalizer, deleting          → done
//!   └── TeardownState::observe
//!       ├── Active    → cleanup finished/failed
//!       │               scale up/down unless patch already adopted
//!       │               re-list, patch status if changed
//!       ├── Draining  → cleanup finished/failed, reclaim idle runners
//!       └── Removable → release finalizer
//! ```
//!
//! Runners created by a partially failed scale-up still carry the current
//! patch id, so the requeued pass treats the patch as adopted. The shortfall
//! is made up by the next scaling decision, not by retries.

use std::sync::Arc;

use tracing::{debug, info, warn};
use uuid::Uuid;

use scaleset_actions::ActionsService;
use scaleset_core::{
    ObjectMeta, PATCH_ID_ANNOTATION, RUNNER_SET_FINALIZER, Runner, RunnerSet, RunnerSpec,
    RunnerStatus,
};
use scaleset_state::StateResult;

use crate::client::FleetClient;
use crate::error::{ControllerError, ControllerResult};
use crate::fleet::FleetState;
use crate::teardown::{TeardownState, with_finalizer, without_finalizer};

/// Reconciles one runner set at a time against the fleet store.
pub struct RunnerSetReconciler {
    client: Arc<dyn FleetClient>,
    actions: Arc<dyn ActionsService>,
}

impl RunnerSetReconciler {
    pub fn new(client: Arc<dyn FleetClient>, actions: Arc<dyn ActionsService>) -> Self {
        Self { client, actions }
    }

    /// Run one full reconcile pass for the runner set at `key`.
    pub async fn reconcile(&self, key: &str) -> ControllerResult<()> {
        let Some(set) = self.client.get_runner_set(key).await? else {
            debug!(runner_set = %key, "runner set not found, nothing to do");
            return Ok(());
        };

        if !set.metadata.has_finalizer(RUNNER_SET_FINALIZER) {
            if set.metadata.is_deleting() {
                debug!(runner_set = %key, "runner set deleting without finalizer");
                return Ok(());
            }
            info!(runner_set = %key, "adding finalizer");
            ignore_not_found(
                self.client
                    .set_runner_set_finalizers(key, with_finalizer(&set.metadata))
                    .await,
            )?;
            return Ok(());
        }

        let runners = self.client.list_runners(key).await?;
        match TeardownState::observe(&set.metadata, runners.len()) {
            TeardownState::Active => self.converge(&set, FleetState::classify(runners)).await,
            TeardownState::Draining => self.drain(&set, FleetState::classify(runners)).await,
            TeardownState::Removable => self.release(&set).await,
        }
    }

    async fn converge(&self, set: &RunnerSet, fleet: FleetState) -> ControllerResult<()> {
        let key = set.key();
        let mut errors = Vec::new();

        self.cleanup_finished(&key, &fleet, &mut errors).await;
        let mut acted = fleet.cleanup_candidates().next().is_some();

        let total = fleet.scale_total();
        let replicas = set.spec.replicas;
        let patch_id = set.spec.patch_id;

        if fleet.is_patch_adopted(patch_id) {
            debug!(runner_set = %key, patch_id, total, replicas, "latest patch already adopted");
        } else if total < replicas {
            self.create_runners(set, replicas - total, &mut errors).await;
            acted = true;
        } else if total > replicas {
            info!(runner_set = %key, total, replicas, patch_id, "scaling down");
            self.scale_down(&key, &fleet, total - replicas, &mut errors)
                .await;
            acted = true;
        } else {
            debug!(runner_set = %key, total, patch_id, "fleet at desired size");
        }

        // Status counts the fleet as this pass left it.
        let fleet = if acted {
            match self.client.list_runners(&key).await {
                Ok(runners) => FleetState::classify(runners),
                Err(e) => {
                    errors.push(e.into());
                    fleet
                }
            }
        } else {
            fleet
        };
        if let Err(e) = self.update_status(set, &fleet).await {
            errors.push(e);
        }

        ControllerError::aggregate(errors)
    }

    async fn drain(&self, set: &RunnerSet, fleet: FleetState) -> ControllerResult<()> {
        let key = set.key();
        info!(
            runner_set = %key,
            pending = fleet.pending.len(),
            running = fleet.running.len(),
            finished = fleet.finished.len(),
            failed = fleet.failed.len(),
            deleting = fleet.deleting.len(),
            "draining runner set"
        );

        let mut errors = Vec::new();
        self.cleanup_finished(&key, &fleet, &mut errors).await;

        let live = (fleet.pending.len() + fleet.running.len()) as u32;
        if live > 0 {
            self.scale_down(&key, &fleet, live, &mut errors).await;
        }
        if !fleet.deleting.is_empty() {
            debug!(runner_set = %key, count = fleet.deleting.len(), "waiting for runners to finish deleting");
        }

        ControllerError::aggregate(errors)
    }

    async fn release(&self, set: &RunnerSet) -> ControllerResult<()> {
        let key = set.key();
        info!(runner_set = %key, "runner set drained, removing finalizer");
        ignore_not_found(
            self.client
                .set_runner_set_finalizers(&key, without_finalizer(&set.metadata))
                .await,
        )?;
        Ok(())
    }

    /// Delete every finished and failed runner.
    async fn cleanup_finished(
        &self,
        owner_key: &str,
        fleet: &FleetState,
        errors: &mut Vec<ControllerError>,
    ) {
        for runner in fleet.cleanup_candidates() {
            match self.delete_runner(owner_key, runner).await {
                Ok(()) => debug!(
                    runner_set = %owner_key,
                    runner = %runner.name(),
                    phase = ?runner.status.phase,
                    "cleaned up runner"
                ),
                Err(e) => errors.push(e),
            }
        }
    }

    async fn create_runners(
        &self,
        set: &RunnerSet,
        count: u32,
        errors: &mut Vec<ControllerError>,
    ) {
        let key = set.key();
        info!(runner_set = %key, count, patch_id = set.spec.patch_id, "scaling up");

        let mut created = 0u32;
        for _ in 0..count {
            let runner = new_runner(set);
            let name = runner.metadata.name.clone();
            match self.client.create_runner(runner).await {
                Ok(_) => {
                    created += 1;
                    debug!(runner_set = %key, runner = %name, "runner created");
                }
                Err(e) => {
                    warn!(runner_set = %key, runner = %name, error = %e, "failed to create runner");
                    errors.push(ControllerError::CreateRunner {
                        runner_set: key.clone(),
                        source: e,
                    });
                }
            }
        }

        if created < count {
            warn!(runner_set = %key, requested = count, created, "scale-up incomplete");
        }
    }

    /// Reclaim up to `count` idle runners, oldest first. Unregistered and
    /// busy runners are skipped and left for a later pass.
    async fn scale_down(
        &self,
        owner_key: &str,
        fleet: &FleetState,
        count: u32,
        errors: &mut Vec<ControllerError>,
    ) -> u32 {
        let mut removed = 0u32;
        for runner in fleet.deletion_order() {
            if removed >= count {
                break;
            }
            if !runner.is_registered() {
                debug!(runner_set = %owner_key, runner = %runner.name(), "runner not registered yet, skipping");
                continue;
            }
            if runner.has_job() {
                debug!(
                    runner_set = %owner_key,
                    runner = %runner.name(),
                    job_request_id = runner.status.job_request_id,
                    "runner is busy, skipping"
                );
                continue;
            }
            match self.remove_runner(owner_key, runner).await {
                Ok(true) => removed += 1,
                Ok(false) => {}
                Err(e) => errors.push(e),
            }
        }

        if removed < count {
            info!(runner_set = %owner_key, requested = count, removed, "some runners could not be reclaimed yet");
        }
        removed
    }

    /// Deregister a runner, then delete it. Returns `false` if the runner
    /// picked up a job in the meantime and was left alone.
    async fn remove_runner(&self, owner_key: &str, runner: &Runner) -> ControllerResult<bool> {
        let runner_id = runner.status.runner_id;
        match self.actions.remove_runner(runner_id).await {
            Ok(()) => {}
            Err(e) if e.is_job_still_running() => {
                info!(runner_set = %owner_key, runner = %runner.name(), runner_id, "runner picked up a job, leaving it");
                return Ok(false);
            }
            Err(e) => {
                warn!(runner_set = %owner_key, runner = %runner.name(), runner_id, error = %e, "failed to deregister runner");
                return Err(ControllerError::Deregister {
                    runner: runner.name().to_string(),
                    runner_id,
                    source: e,
                });
            }
        }

        self.delete_runner(owner_key, runner).await?;
        info!(runner_set = %owner_key, runner = %runner.name(), runner_id, "runner reclaimed");
        Ok(true)
    }

    async fn delete_runner(&self, owner_key: &str, runner: &Runner) -> ControllerResult<()> {
        match self.client.delete_runner(owner_key, runner.name()).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => {
                debug!(runner_set = %owner_key, runner = %runner.name(), "runner already gone");
                Ok(())
            }
            Err(e) => Err(ControllerError::DeleteRunner {
                runner: runner.name().to_string(),
                source: e,
            }),
        }
    }

    async fn update_status(&self, set: &RunnerSet, fleet: &FleetState) -> ControllerResult<()> {
        let desired = fleet.status();
        if set.status == desired {
            return Ok(());
        }
        debug!(runner_set = %set.key(), ?desired, "updating status");
        ignore_not_found(
            self.client
                .update_runner_set_status(&set.key(), desired)
                .await,
        )?;
        Ok(())
    }
}

/// Build a new runner for `set`, stamped with the set's current patch id.
pub fn new_runner(set: &RunnerSet) -> Runner {
    let suffix = Uuid::new_v4().simple().to_string();
    let name = format!("{}-runner-{}", set.metadata.name, &suffix[..8]);

    let mut metadata = ObjectMeta::new(&set.metadata.namespace, &name);
    metadata.labels = set.spec.runner_template.labels.clone();
    metadata
        .annotations
        .insert(PATCH_ID_ANNOTATION.to_string(), set.spec.patch_id.to_string());
    metadata.owner = Some(set.owner_reference());

    Runner {
        metadata,
        spec: RunnerSpec {
            template: set.spec.runner_template.clone(),
        },
        status: RunnerStatus::default(),
    }
}

fn ignore_not_found(result: StateResult<()>) -> StateResult<()> {
    match result {
        Err(e) if e.is_not_found() => Ok(()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use chrono::{Duration, TimeZone, Utc};
    use scaleset_actions::ActionsError;
    use scaleset_core::{RunnerPhase, RunnerSetStatus, RunnerTemplate};
    use scaleset_state::{StateError, StateStore};

    // ── Fakes ─────────────────────────────────────────────────────

    #[derive(Default)]
    struct FakeActions {
        calls: Mutex<Vec<i64>>,
        responses: Mutex<HashMap<i64, ActionsError>>,
    }

    impl FakeActions {
        fn respond(&self, runner_id: i64, err: ActionsError) {
            self.responses.lock().unwrap().insert(runner_id, err);
        }

        fn calls(&self) -> Vec<i64> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ActionsService for FakeActions {
        async fn remove_runner(&self, runner_id: i64) -> Result<(), ActionsError> {
            self.calls.lock().unwrap().push(runner_id);
            match self.responses.lock().unwrap().get(&runner_id) {
                Some(err) => Err(err.clone()),
                None => Ok(()),
            }
        }
    }

    /// Store wrapper that counts writes and can reject creations.
    struct CountingClient {
        store: StateStore,
        writes: AtomicUsize,
        creates: AtomicUsize,
        fail_every_other_create: bool,
    }

    impl CountingClient {
        fn new(store: StateStore) -> Self {
            Self {
                store,
                writes: AtomicUsize::new(0),
                creates: AtomicUsize::new(0),
                fail_every_other_create: false,
            }
        }

        fn writes(&self) -> usize {
            self.writes.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl FleetClient for CountingClient {
        async fn get_runner_set(&self, key: &str) -> StateResult<Option<RunnerSet>> {
            self.store.get_runner_set(key)
        }

        async fn list_runners(&self, owner_key: &str) -> StateResult<Vec<Runner>> {
            self.store.list_runners_for(owner_key)
        }

        async fn create_runner(&self, runner: Runner) -> StateResult<Runner> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            let n = self.creates.fetch_add(1, Ordering::SeqCst);
            if self.fail_every_other_create && n % 2 == 1 {
                return Err(StateError::Write("quota exceeded".to_string()));
            }
            self.store.create_runner(runner)
        }

        async fn delete_runner(&self, owner_key: &str, name: &str) -> StateResult<()> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            self.store.delete_runner(owner_key, name).map(|_| ())
        }

        async fn update_runner_set_status(
            &self,
            key: &str,
            status: RunnerSetStatus,
        ) -> StateResult<()> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            self.store.update_runner_set_status(key, status).map(|_| ())
        }

        async fn set_runner_set_finalizers(
            &self,
            key: &str,
            finalizers: Vec<String>,
        ) -> StateResult<()> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            self.store
                .set_runner_set_finalizers(key, finalizers)
                .map(|_| ())
        }
    }

    struct Harness {
        store: StateStore,
        client: Arc<CountingClient>,
        actions: Arc<FakeActions>,
        reconciler: RunnerSetReconciler,
    }

    impl Harness {
        fn new() -> Self {
            Self::with_client(|store| CountingClient::new(store))
        }

        fn with_client(f: impl FnOnce(StateStore) -> CountingClient) -> Self {
            let store = StateStore::open_in_memory().unwrap();
            let client = Arc::new(f(store.clone()));
            let actions = Arc::new(FakeActions::default());
            let reconciler = RunnerSetReconciler::new(client.clone(), actions.clone());
            Self {
                store,
                client,
                actions,
                reconciler,
            }
        }

        /// A runner set that already carries the finalizer.
        fn ready_set(&self, replicas: u32, patch_id: i64) -> RunnerSet {
            let mut set = RunnerSet::new(
                "ci",
                "linux",
                RunnerTemplate {
                    image: "runner:latest".to_string(),
                    ..Default::default()
                },
            );
            set.metadata.finalizers = vec![RUNNER_SET_FINALIZER.to_string()];
            set.spec.replicas = replicas;
            set.spec.patch_id = patch_id;
            self.store.create_runner_set(set).unwrap()
        }

        fn seed(&self, set: &RunnerSet, seed: Seed) -> Runner {
            let base = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
            let mut runner = new_runner(set);
            runner.metadata.name = seed.name.to_string();
            runner.metadata.creation_timestamp = Some(base - Duration::seconds(seed.age_secs));
            runner.metadata.annotations.insert(
                PATCH_ID_ANNOTATION.to_string(),
                seed.patch_id.to_string(),
            );
            runner.status = RunnerStatus {
                phase: seed.phase,
                runner_id: seed.runner_id,
                job_request_id: seed.job_request_id,
                message: None,
            };
            self.store.create_runner(runner).unwrap()
        }

        fn runner_names(&self) -> Vec<String> {
            let mut names: Vec<String> = self
                .store
                .list_runners_for("ci/linux")
                .unwrap()
                .into_iter()
                .map(|r| r.metadata.name)
                .collect();
            names.sort();
            names
        }
    }

    struct Seed {
        name: &'static str,
        phase: RunnerPhase,
        runner_id: i64,
        job_request_id: i64,
        age_secs: i64,
        patch_id: i64,
    }

    fn idle(name: &'static str, phase: RunnerPhase, runner_id: i64, age_secs: i64) -> Seed {
        Seed {
            name,
            phase,
            runner_id,
            job_request_id: 0,
            age_secs,
            patch_id: 0,
        }
    }

    // ── Finalizer ─────────────────────────────────────────────────

    #[tokio::test]
    async fn missing_runner_set_is_not_an_error() {
        let h = Harness::new();
        assert!(h.reconciler.reconcile("ci/missing").await.is_ok());
        assert_eq!(h.client.writes(), 0);
    }

    #[tokio::test]
    async fn finalizer_is_added_before_any_scaling() {
        let h = Harness::new();
        let mut set = RunnerSet::new("ci", "linux", RunnerTemplate::default());
        set.spec.replicas = 2;
        h.store.create_runner_set(set).unwrap();

        h.reconciler.reconcile("ci/linux").await.unwrap();

        let set = h.store.get_runner_set("ci/linux").unwrap().unwrap();
        assert!(set.metadata.has_finalizer(RUNNER_SET_FINALIZER));
        assert!(h.runner_names().is_empty());

        h.reconciler.reconcile("ci/linux").await.unwrap();
        assert_eq!(h.runner_names().len(), 2);
    }

    // ── Scale up ──────────────────────────────────────────────────

    #[tokio::test]
    async fn scales_up_with_patch_annotation_and_owner() {
        let h = Harness::new();
        let set = h.ready_set(3, 4);

        h.reconciler.reconcile("ci/linux").await.unwrap();

        let runners = h.store.list_runners_for("ci/linux").unwrap();
        assert_eq!(runners.len(), 3);
        for runner in &runners {
            assert_eq!(runner.patch_id(), Some(4));
            assert_eq!(runner.metadata.owner, Some(set.owner_reference()));
            assert_eq!(runner.spec.template.image, "runner:latest");
            assert!(runner.metadata.name.starts_with("linux-runner-"));
        }
    }

    #[tokio::test]
    async fn converged_fleet_produces_no_writes() {
        let h = Harness::new();
        h.ready_set(2, 0);

        h.reconciler.reconcile("ci/linux").await.unwrap();
        // The scaling pass already counts the runners it created.
        let set = h.store.get_runner_set("ci/linux").unwrap().unwrap();
        assert_eq!(set.status.current_replicas, 2);
        assert_eq!(set.status.pending_runners, 2);

        let before = h.client.writes();
        h.reconciler.reconcile("ci/linux").await.unwrap();
        h.reconciler.reconcile("ci/linux").await.unwrap();
        assert_eq!(h.client.writes(), before);
    }

    #[tokio::test]
    async fn adopted_patch_skips_scaling() {
        let h = Harness::new();
        let set = h.ready_set(3, 7);
        let mut seed = idle("a", RunnerPhase::Running, 1, 10);
        seed.patch_id = 7;
        h.seed(&set, seed);

        h.reconciler.reconcile("ci/linux").await.unwrap();
        assert_eq!(h.runner_names(), vec!["a"]);
    }

    #[tokio::test]
    async fn creation_failures_are_collected() {
        let h = Harness::with_client(|store| CountingClient {
            fail_every_other_create: true,
            ..CountingClient::new(store)
        });
        h.ready_set(4, 1);

        let err = h.reconciler.reconcile("ci/linux").await.unwrap_err();
        assert_eq!(err.count(), 2);
        assert!(matches!(err, ControllerError::Aggregate(_)));
        // Failures did not stop the rest of the batch.
        assert_eq!(h.runner_names().len(), 2);
    }

    #[tokio::test]
    async fn partial_scale_up_waits_for_the_next_patch() {
        let h = Harness::with_client(|store| CountingClient {
            fail_every_other_create: true,
            ..CountingClient::new(store)
        });
        h.ready_set(4, 1);

        assert!(h.reconciler.reconcile("ci/linux").await.is_err());
        assert_eq!(h.runner_names().len(), 2);

        // The survivors carry patch 1, so the retry sees it adopted and
        // leaves the shortfall alone.
        h.reconciler.reconcile("ci/linux").await.unwrap();
        assert_eq!(h.runner_names().len(), 2);

        // A newer decision is acted on again.
        h.store.patch_runner_set_spec("ci/linux", 4, 2).unwrap();
        assert!(h.reconciler.reconcile("ci/linux").await.is_err());
        assert_eq!(h.runner_names().len(), 3);
    }

    // ── Scale down ────────────────────────────────────────────────

    #[tokio::test]
    async fn scales_down_oldest_first_with_deregistration() {
        let h = Harness::new();
        let set = h.ready_set(1, 1);
        h.seed(&set, idle("pending-old", RunnerPhase::Pending, 11, 300));
        h.seed(&set, idle("pending-new", RunnerPhase::Pending, 12, 10));
        h.seed(&set, idle("running-mid", RunnerPhase::Running, 13, 100));

        h.reconciler.reconcile("ci/linux").await.unwrap();

        assert_eq!(h.actions.calls(), vec![11, 13]);
        assert_eq!(h.runner_names(), vec!["pending-new"]);
    }

    #[tokio::test]
    async fn busy_and_unregistered_runners_are_never_reclaimed() {
        let h = Harness::new();
        let set = h.ready_set(0, 1);
        h.seed(&set, idle("unregistered", RunnerPhase::Pending, 0, 400));
        h.seed(
            &set,
            Seed {
                job_request_id: 77,
                ..idle("busy", RunnerPhase::Running, 21, 300)
            },
        );
        h.seed(&set, idle("idle", RunnerPhase::Running, 22, 200));

        h.reconciler.reconcile("ci/linux").await.unwrap();

        assert_eq!(h.actions.calls(), vec![22]);
        assert_eq!(h.runner_names(), vec!["busy", "unregistered"]);
    }

    #[tokio::test]
    async fn job_still_running_leaves_runner_and_moves_on() {
        let h = Harness::new();
        let set = h.ready_set(2, 1);
        h.seed(&set, idle("oldest", RunnerPhase::Running, 31, 300));
        h.seed(&set, idle("middle", RunnerPhase::Running, 32, 200));
        h.seed(&set, idle("newest", RunnerPhase::Running, 33, 100));
        h.actions.respond(
            31,
            ActionsError::from_response(
                400,
                r#"{"typeName":"JobStillRunningException","message":"busy"}"#,
            ),
        );

        h.reconciler.reconcile("ci/linux").await.unwrap();

        assert_eq!(h.actions.calls(), vec![31, 32]);
        assert_eq!(h.runner_names(), vec!["newest", "oldest"]);
    }

    #[tokio::test]
    async fn deregistration_failure_is_surfaced_and_runner_kept() {
        let h = Harness::new();
        let set = h.ready_set(1, 1);
        h.seed(&set, idle("oldest", RunnerPhase::Running, 41, 300));
        h.seed(&set, idle("middle", RunnerPhase::Running, 42, 200));
        h.seed(&set, idle("newest", RunnerPhase::Running, 43, 100));
        h.actions.respond(
            41,
            ActionsError::Api {
                status: 500,
                exception: None,
                message: "boom".to_string(),
            },
        );

        let err = h.reconciler.reconcile("ci/linux").await.unwrap_err();

        assert!(matches!(err, ControllerError::Deregister { runner_id: 41, .. }));
        assert_eq!(h.actions.calls(), vec![41, 42, 43]);
        assert_eq!(h.runner_names(), vec!["oldest"]);
    }

    // ── Cleanup and status ────────────────────────────────────────

    #[tokio::test]
    async fn finished_and_failed_runners_are_always_cleaned_up() {
        let h = Harness::new();
        let set = h.ready_set(1, 5);
        let mut keep = idle("live", RunnerPhase::Running, 51, 10);
        keep.patch_id = 5;
        h.seed(&set, keep);
        h.seed(&set, idle("done", RunnerPhase::Succeeded, 52, 20));
        h.seed(&set, idle("broken", RunnerPhase::Failed, 53, 30));

        h.reconciler.reconcile("ci/linux").await.unwrap();

        assert_eq!(h.runner_names(), vec!["live"]);
        // Cleanup is a plain delete, no deregistration.
        assert!(h.actions.calls().is_empty());
        // Status is taken after cleanup, so the failed runner is not counted.
        let set = h.store.get_runner_set("ci/linux").unwrap().unwrap();
        assert_eq!(
            set.status,
            RunnerSetStatus {
                current_replicas: 1,
                pending_runners: 0,
                running_runners: 1,
                failed_runners: 0,
            }
        );
    }

    #[tokio::test]
    async fn status_counts_the_fleet_after_scaling_down() {
        let h = Harness::new();
        let set = h.ready_set(1, 3);
        h.seed(&set, idle("old", RunnerPhase::Running, 71, 300));
        h.seed(&set, idle("new", RunnerPhase::Running, 72, 100));

        h.reconciler.reconcile("ci/linux").await.unwrap();

        assert_eq!(h.runner_names(), vec!["new"]);
        let set = h.store.get_runner_set("ci/linux").unwrap().unwrap();
        assert_eq!(set.status.current_replicas, 1);
        assert_eq!(set.status.running_runners, 1);
    }

    #[tokio::test]
    async fn status_reflects_fleet_and_is_written_once() {
        let h = Harness::new();
        let set = h.ready_set(3, 2);
        for (name, phase, age) in [
            ("a", RunnerPhase::Pending, 1),
            ("b", RunnerPhase::Running, 2),
            ("c", RunnerPhase::Running, 3),
        ] {
            let mut seed = idle(name, phase, 0, age);
            seed.patch_id = 2;
            h.seed(&set, seed);
        }

        h.reconciler.reconcile("ci/linux").await.unwrap();
        let writes = h.client.writes();
        assert_eq!(writes, 1);
        let set = h.store.get_runner_set("ci/linux").unwrap().unwrap();
        assert_eq!(set.status.current_replicas, 3);
        assert_eq!(set.status.running_runners, 2);

        h.reconciler.reconcile("ci/linux").await.unwrap();
        assert_eq!(h.client.writes(), writes);
    }

    #[tokio::test]
    async fn runners_of_a_prefix_sharing_set_are_not_touched() {
        let h = Harness::new();
        h.ready_set(0, 1);
        let mut other = RunnerSet::new("ci", "linux:arm", RunnerTemplate::default());
        other.metadata.finalizers = vec![RUNNER_SET_FINALIZER.to_string()];
        let other = h.store.create_runner_set(other).unwrap();
        let mut seed = idle("arm-1", RunnerPhase::Running, 81, 100);
        seed.patch_id = 1;
        h.seed(&other, seed);

        h.reconciler.reconcile("ci/linux").await.unwrap();

        assert!(h.actions.calls().is_empty());
        assert_eq!(h.store.list_runners_for("ci/linux:arm").unwrap().len(), 1);
        let set = h.store.get_runner_set("ci/linux").unwrap().unwrap();
        assert_eq!(set.status, RunnerSetStatus::default());
    }

    // ── Teardown ──────────────────────────────────────────────────

    #[tokio::test]
    async fn teardown_drains_children_before_releasing_finalizer() {
        let h = Harness::new();
        let set = h.ready_set(4, 1);
        h.seed(&set, idle("idle", RunnerPhase::Running, 61, 100));
        h.seed(&set, idle("done", RunnerPhase::Succeeded, 62, 90));
        h.seed(
            &set,
            Seed {
                job_request_id: 9,
                ..idle("busy", RunnerPhase::Running, 63, 80)
            },
        );
        let mut stuck = new_runner(&set);
        stuck.metadata.name = "stuck".to_string();
        stuck.metadata.finalizers = vec!["actions.github.com/runner-finalizer".to_string()];
        h.store.create_runner(stuck).unwrap();
        h.store.delete_runner("ci/linux", "stuck").unwrap();

        h.store.delete_runner_set("ci/linux").unwrap();
        h.reconciler.reconcile("ci/linux").await.unwrap();

        assert_eq!(h.actions.calls(), vec![61]);
        assert_eq!(h.runner_names(), vec!["busy", "stuck"]);
        let set = h.store.get_runner_set("ci/linux").unwrap().unwrap();
        assert!(set.metadata.has_finalizer(RUNNER_SET_FINALIZER));

        // The busy runner finishes its job and the stuck one is released.
        h.store
            .update_runner_status(
                "ci/linux",
                "busy",
                RunnerStatus {
                    phase: RunnerPhase::Succeeded,
                    runner_id: 63,
                    job_request_id: 9,
                    message: None,
                },
            )
            .unwrap();
        h.store
            .set_runner_finalizers("ci/linux", "stuck", Vec::new())
            .unwrap();

        h.reconciler.reconcile("ci/linux").await.unwrap();
        assert!(h.runner_names().is_empty());
        assert!(h.store.get_runner_set("ci/linux").unwrap().is_some());

        h.reconciler.reconcile("ci/linux").await.unwrap();
        assert!(h.store.get_runner_set("ci/linux").unwrap().is_none());
    }

    #[tokio::test]
    async fn deleting_set_without_finalizer_is_left_alone() {
        let h = Harness::new();
        let mut set = RunnerSet::new("ci", "linux", RunnerTemplate::default());
        set.metadata.finalizers = vec!["example.com/other".to_string()];
        h.store.create_runner_set(set).unwrap();
        h.store.delete_runner_set("ci/linux").unwrap();

        h.reconciler.reconcile("ci/linux").await.unwrap();
        assert_eq!(h.client.writes(), 0);
    }
}
