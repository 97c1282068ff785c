//! scaleset-api — REST API for runner sets.
//!
//! Provides axum route handlers for managing runner sets, inspecting their
//! runners, feeding job batches to listeners, and recording runner status
//! reported by the per-runner lifecycle side.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/api/v1/runnersets` | List all runner sets |
//! | POST | `/api/v1/runnersets` | Create a runner set |
//! | GET | `/api/v1/runnersets/{ns}/{name}` | Get a runner set |
//! | DELETE | `/api/v1/runnersets/{ns}/{name}` | Delete a runner set (finalizer-gated) |
//! | GET | `/api/v1/runnersets/{ns}/{name}/runners` | List runners |
//! | POST | `/api/v1/runnersets/{ns}/{name}/batches` | Submit a job batch |
//! | PUT | `/api/v1/runnersets/{ns}/{name}/runners/{runner}/status` | Update runner status |
//! | GET | `/healthz` | Liveness |

pub mod handlers;

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use axum::Router;
use axum::routing::{get, post, put};
use tokio::sync::mpsc;

use scaleset_autoscale::JobBatch;
use scaleset_state::StateStore;

/// Batch senders of the running listeners, keyed by runner set.
#[derive(Clone, Default)]
pub struct ListenerRegistry {
    senders: Arc<RwLock<HashMap<String, mpsc::Sender<JobBatch>>>>,
}

impl ListenerRegistry {
    // The map is never left half-written, so a poisoned lock is still usable.
    pub fn register(&self, runner_set: &str, sender: mpsc::Sender<JobBatch>) {
        self.senders
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(runner_set.to_string(), sender);
    }

    pub fn get(&self, runner_set: &str) -> Option<mpsc::Sender<JobBatch>> {
        self.senders
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(runner_set)
            .cloned()
    }
}

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub store: StateStore,
    pub listeners: ListenerRegistry,
}

impl ApiState {
    pub fn new(store: StateStore) -> Self {
        Self {
            store,
            listeners: ListenerRegistry::default(),
        }
    }
}

/// Build the complete API router.
pub fn build_router(state: ApiState) -> Router {
    let api_routes = Router::new()
        .route(
            "/runnersets",
            get(handlers::list_runner_sets).post(handlers::create_runner_set),
        )
        .route(
            "/runnersets/{ns}/{name}",
            get(handlers::get_runner_set).delete(handlers::delete_runner_set),
        )
        .route("/runnersets/{ns}/{name}/runners", get(handlers::list_runners))
        .route("/runnersets/{ns}/{name}/batches", post(handlers::submit_batch))
        .route(
            "/runnersets/{ns}/{name}/runners/{runner}/status",
            put(handlers::update_runner_status),
        )
        .with_state(state);

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/healthz", get(handlers::healthz))
}

#[cfg(test)]
mod tests {
    use super::*;

    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode};
    use serde_json::Value;
    use tower::ServiceExt;

    use scaleset_core::{RUNNER_SET_FINALIZER, RunnerSet, RunnerTemplate};

    async fn call(router: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut req = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(json) => {
                req = req.header("content-type", "application/json");
                Body::from(serde_json::to_vec(&json).unwrap())
            }
            None => Body::empty(),
        };
        let resp = router.clone().oneshot(req.body(body).unwrap()).await.unwrap();
        let status = resp.status();
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }

    fn runner_set() -> RunnerSet {
        RunnerSet::new(
            "ci",
            "linux",
            RunnerTemplate {
                image: "runner:latest".to_string(),
                ..Default::default()
            },
        )
    }

    #[tokio::test]
    async fn healthz_is_ok() {
        let router = build_router(ApiState::new(StateStore::open_in_memory().unwrap()));
        let (status, body) = call(&router, "GET", "/healthz", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
    }

    #[tokio::test]
    async fn create_get_and_list_runner_sets() {
        let router = build_router(ApiState::new(StateStore::open_in_memory().unwrap()));
        let set = serde_json::to_value(runner_set()).unwrap();

        let (status, body) = call(&router, "POST", "/api/v1/runnersets", Some(set.clone())).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["data"]["metadata"]["resource_version"], 1);

        let (status, _) = call(&router, "POST", "/api/v1/runnersets", Some(set)).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, body) = call(&router, "GET", "/api/v1/runnersets/ci/linux", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["spec"]["runner_template"]["image"], "runner:latest");

        let (status, body) = call(&router, "GET", "/api/v1/runnersets", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn registry_survives_a_poisoned_lock() {
        let registry = ListenerRegistry::default();
        let poisoner = registry.clone();
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.senders.write().unwrap();
            panic!("writer died holding the lock");
        })
        .join();
        assert!(registry.senders.is_poisoned());

        let (tx, _rx) = mpsc::channel(1);
        registry.register("ci/linux", tx);
        assert!(registry.get("ci/linux").is_some());
    }

    #[tokio::test]
    async fn runner_set_names_with_key_separators_are_rejected() {
        let store = StateStore::open_in_memory().unwrap();
        let router = build_router(ApiState::new(store.clone()));

        for (namespace, name) in [("ci", "linux:arm"), ("ci/prod", "linux")] {
            let mut set = runner_set();
            set.metadata.namespace = namespace.to_string();
            set.metadata.name = name.to_string();
            let set = serde_json::to_value(set).unwrap();
            let (status, body) = call(&router, "POST", "/api/v1/runnersets", Some(set)).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert_eq!(body["success"], false);
        }
        assert!(store.list_runner_sets().unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_runner_set_is_not_found() {
        let router = build_router(ApiState::new(StateStore::open_in_memory().unwrap()));
        let (status, body) = call(&router, "GET", "/api/v1/runnersets/ci/nope", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["success"], false);

        let (status, _) = call(&router, "DELETE", "/api/v1/runnersets/ci/nope", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = call(&router, "GET", "/api/v1/runnersets/ci/nope/runners", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn delete_is_gated_by_finalizer() {
        let store = StateStore::open_in_memory().unwrap();
        let mut set = runner_set();
        set.metadata.finalizers = vec![RUNNER_SET_FINALIZER.to_string()];
        store.create_runner_set(set).unwrap();
        let router = build_router(ApiState::new(store.clone()));

        let (status, body) = call(&router, "DELETE", "/api/v1/runnersets/ci/linux", None).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert!(!body["data"]["metadata"]["deletion_timestamp"].is_null());
        assert!(store.get_runner_set("ci/linux").unwrap().is_some());

        store.set_runner_set_finalizers("ci/linux", Vec::new()).unwrap();
        let (status, _) = call(&router, "GET", "/api/v1/runnersets/ci/linux", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn batches_reach_the_registered_listener() {
        let store = StateStore::open_in_memory().unwrap();
        store.create_runner_set(runner_set()).unwrap();
        let state = ApiState::new(store);
        let (tx, mut rx) = mpsc::channel(4);
        state.listeners.register("ci/linux", tx);
        let router = build_router(state);

        let batch = serde_json::json!({ "acquired": 3, "completed": 1 });
        let (status, _) = call(&router, "POST", "/api/v1/runnersets/ci/linux/batches", Some(batch)).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(rx.recv().await, Some(JobBatch { acquired: 3, completed: 1 }));
    }

    #[tokio::test]
    async fn batch_without_listener_is_rejected() {
        let store = StateStore::open_in_memory().unwrap();
        store.create_runner_set(runner_set()).unwrap();
        let router = build_router(ApiState::new(store));

        let batch = serde_json::json!({ "acquired": 1 });
        let (status, body) = call(&router, "POST", "/api/v1/runnersets/ci/linux/batches", Some(batch)).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert!(body["error"].as_str().unwrap().contains("no listener"));
    }

    #[tokio::test]
    async fn runner_status_updates_are_recorded() {
        let store = StateStore::open_in_memory().unwrap();
        let set = store.create_runner_set(runner_set()).unwrap();
        let mut runner = scaleset_core::Runner {
            metadata: scaleset_core::ObjectMeta::new("ci", "linux-runner-1"),
            spec: Default::default(),
            status: Default::default(),
        };
        runner.metadata.owner = Some(set.owner_reference());
        store.create_runner(runner).unwrap();
        let router = build_router(ApiState::new(store.clone()));

        let status_body = serde_json::json!({
            "phase": "running",
            "runner_id": 42,
            "job_request_id": 0
        });
        let (status, _) = call(
            &router,
            "PUT",
            "/api/v1/runnersets/ci/linux/runners/linux-runner-1/status",
            Some(status_body.clone()),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let stored = store.get_runner("ci/linux", "linux-runner-1").unwrap().unwrap();
        assert_eq!(stored.status.runner_id, 42);

        let (status, body) = call(&router, "GET", "/api/v1/runnersets/ci/linux/runners", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"][0]["status"]["phase"], "running");

        let (status, _) = call(
            &router,
            "PUT",
            "/api/v1/runnersets/ci/linux/runners/ghost/status",
            Some(status_body),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
