//! Daemon assembly.
//!
//! One process serves one configured runner set: the listener turns job
//! batches into `{replicas, patch_id}`, the controller converges the fleet,
//! and the API exposes both over HTTP. Runner sets created through the API
//! are reconciled too, but only the configured one has a listener.

use std::sync::Arc;

use anyhow::Context;
use axum::Router;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use scaleset_actions::{ActionsService, HttpActionsClient, NoopActionsService};
use scaleset_api::{ApiState, build_router};
use scaleset_autoscale::{ListenerWorker, ScaleBounds};
use scaleset_controller::{Controller, ControllerConfig};
use scaleset_core::{RunnerSet, ScaleSetConfig};
use scaleset_state::StateStore;

/// Depth of the listener's batch queue.
const BATCH_QUEUE_DEPTH: usize = 64;

/// Running subsystems of one daemon.
pub struct Daemon {
    state: ApiState,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl Daemon {
    /// Start the listener and controller. Must be called from within a
    /// tokio runtime.
    pub fn start(
        config: &ScaleSetConfig,
        store: StateStore,
        actions: Arc<dyn ActionsService>,
    ) -> anyhow::Result<Self> {
        let set = ensure_runner_set(&store, config)?;
        let key = set.key();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let controller_config = ControllerConfig::from(config);
        let controller = Controller::new(store.clone(), actions, controller_config);
        let controller_handle = tokio::spawn(controller.run(shutdown_rx.clone()));

        let bounds = ScaleBounds::from(config);
        let (worker, batches) =
            ListenerWorker::new(&key, bounds, store.clone(), BATCH_QUEUE_DEPTH);
        let listener_handle = tokio::spawn(worker.run(shutdown_rx));
        info!(
            runner_set = %key,
            min_runners = bounds.min_runners,
            max_runners = bounds.max_runners,
            scale_up_factor = bounds.scale_up_factor,
            "scaling bounds"
        );

        let state = ApiState::new(store);
        state.listeners.register(&key, batches);

        Ok(Self {
            state,
            shutdown: shutdown_tx,
            tasks: vec![controller_handle, listener_handle],
        })
    }

    pub fn router(&self) -> Router {
        build_router(self.state.clone())
    }

    pub fn store(&self) -> &StateStore {
        &self.state.store
    }

    /// Signal every background task and wait for it to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "background task ended abnormally");
            }
        }
        info!("daemon stopped");
    }
}

/// Create the configured runner set unless it already exists.
pub fn ensure_runner_set(store: &StateStore, config: &ScaleSetConfig) -> anyhow::Result<RunnerSet> {
    let desired = config.runner_set();
    let key = desired.key();
    if let Some(existing) = store
        .get_runner_set(&key)
        .with_context(|| format!("failed to read runner set {key}"))?
    {
        if existing.spec.runner_template != desired.spec.runner_template {
            warn!(runner_set = %key, "stored runner template differs from config, keeping stored");
        }
        info!(runner_set = %key, replicas = existing.spec.replicas, "runner set found");
        return Ok(existing);
    }

    let created = store
        .create_runner_set(desired)
        .with_context(|| format!("failed to create runner set {key}"))?;
    info!(runner_set = %key, "runner set created from config");
    Ok(created)
}

/// Pick the Actions service client. Without an `[actions]` section every
/// deregistration succeeds locally.
pub fn actions_service(config: &ScaleSetConfig) -> anyhow::Result<Arc<dyn ActionsService>> {
    let Some(actions) = &config.actions else {
        info!("no [actions] section, runner deregistration is a no-op");
        return Ok(Arc::new(NoopActionsService));
    };
    let token = std::env::var(&actions.token_env)
        .with_context(|| format!("environment variable {} is not set", actions.token_env))?;
    let client = HttpActionsClient::new(&actions.base_url, token)?;
    info!(base_url = %actions.base_url, "actions service client configured");
    Ok(Arc::new(client))
}
