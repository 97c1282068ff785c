//! REST API handlers.
//!
//! Each handler reads/writes via `StateStore` and returns JSON responses.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tracing::{debug, info, warn};

use scaleset_autoscale::JobBatch;
use scaleset_core::{RunnerSet, RunnerStatus, is_valid_name};
use scaleset_state::StateError;

use crate::ApiState;

/// Response wrapper for consistent API format.
#[derive(serde::Serialize)]
struct ApiResponse<T: serde::Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: serde::Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> Response {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
        .into_response()
}

fn state_error(e: StateError) -> Response {
    let status = match &e {
        StateError::NotFound(_) => StatusCode::NOT_FOUND,
        StateError::AlreadyExists(_) => StatusCode::CONFLICT,
        StateError::Invalid(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error_response(&e.to_string(), status)
}

fn set_key(ns: &str, name: &str) -> String {
    format!("{ns}/{name}")
}

// ── Runner sets ────────────────────────────────────────────────

/// GET /api/v1/runnersets
pub async fn list_runner_sets(State(state): State<ApiState>) -> Response {
    match state.store.list_runner_sets() {
        Ok(sets) => ApiResponse::ok(sets).into_response(),
        Err(e) => state_error(e),
    }
}

/// POST /api/v1/runnersets
pub async fn create_runner_set(
    State(state): State<ApiState>,
    Json(set): Json<RunnerSet>,
) -> Response {
    if set.metadata.name.is_empty() || set.metadata.namespace.is_empty() {
        return error_response("name and namespace are required", StatusCode::BAD_REQUEST);
    }
    if !is_valid_name(&set.metadata.name) || !is_valid_name(&set.metadata.namespace) {
        return error_response(
            "name and namespace must not contain '/' or ':'",
            StatusCode::BAD_REQUEST,
        );
    }
    match state.store.create_runner_set(set) {
        Ok(created) => {
            info!(runner_set = %created.key(), "runner set created");
            (StatusCode::CREATED, ApiResponse::ok(created)).into_response()
        }
        Err(e) => state_error(e),
    }
}

/// GET /api/v1/runnersets/{ns}/{name}
pub async fn get_runner_set(
    State(state): State<ApiState>,
    Path((ns, name)): Path<(String, String)>,
) -> Response {
    match state.store.get_runner_set(&set_key(&ns, &name)) {
        Ok(Some(set)) => ApiResponse::ok(set).into_response(),
        Ok(None) => error_response("runner set not found", StatusCode::NOT_FOUND),
        Err(e) => state_error(e),
    }
}

/// DELETE /api/v1/runnersets/{ns}/{name}
///
/// Answers 202 with the object while finalizers hold it, 200 once gone.
pub async fn delete_runner_set(
    State(state): State<ApiState>,
    Path((ns, name)): Path<(String, String)>,
) -> Response {
    let key = set_key(&ns, &name);
    match state.store.delete_runner_set(&key) {
        Ok(Some(set)) => {
            info!(runner_set = %key, "runner set marked for deletion");
            (StatusCode::ACCEPTED, ApiResponse::ok(set)).into_response()
        }
        Ok(None) => {
            info!(runner_set = %key, "runner set deleted");
            ApiResponse::ok("deleted").into_response()
        }
        Err(e) => state_error(e),
    }
}

// ── Runners ────────────────────────────────────────────────────

/// GET /api/v1/runnersets/{ns}/{name}/runners
pub async fn list_runners(
    State(state): State<ApiState>,
    Path((ns, name)): Path<(String, String)>,
) -> Response {
    let key = set_key(&ns, &name);
    match state.store.get_runner_set(&key) {
        Ok(Some(_)) => {}
        Ok(None) => return error_response("runner set not found", StatusCode::NOT_FOUND),
        Err(e) => return state_error(e),
    }
    match state.store.list_runners_for(&key) {
        Ok(runners) => ApiResponse::ok(runners).into_response(),
        Err(e) => state_error(e),
    }
}

/// PUT /api/v1/runnersets/{ns}/{name}/runners/{runner}/status
pub async fn update_runner_status(
    State(state): State<ApiState>,
    Path((ns, name, runner)): Path<(String, String, String)>,
    Json(status): Json<RunnerStatus>,
) -> Response {
    let key = set_key(&ns, &name);
    match state.store.update_runner_status(&key, &runner, status) {
        Ok(updated) => {
            debug!(
                runner_set = %key,
                runner = %runner,
                phase = ?updated.status.phase,
                runner_id = updated.status.runner_id,
                "runner status updated"
            );
            ApiResponse::ok(updated).into_response()
        }
        Err(e) => state_error(e),
    }
}

// ── Job batches ────────────────────────────────────────────────

/// POST /api/v1/runnersets/{ns}/{name}/batches
pub async fn submit_batch(
    State(state): State<ApiState>,
    Path((ns, name)): Path<(String, String)>,
    Json(batch): Json<JobBatch>,
) -> Response {
    let key = set_key(&ns, &name);
    let Some(sender) = state.listeners.get(&key) else {
        return error_response(
            &format!("no listener for runner set {key}"),
            StatusCode::CONFLICT,
        );
    };
    match sender.send(batch).await {
        Ok(()) => {
            debug!(runner_set = %key, acquired = batch.acquired, completed = batch.completed, "batch queued");
            (StatusCode::ACCEPTED, ApiResponse::ok(batch)).into_response()
        }
        Err(_) => {
            warn!(runner_set = %key, "listener stopped, batch dropped");
            error_response("listener is not running", StatusCode::SERVICE_UNAVAILABLE)
        }
    }
}

// ── Health ─────────────────────────────────────────────────────

/// GET /healthz
pub async fn healthz() -> Response {
    ApiResponse::ok("ok").into_response()
}
