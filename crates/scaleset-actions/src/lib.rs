//! scaleset-actions — the Actions-service capability used by the controller.
//!
//! The controller only needs one call from the Actions service: removing a
//! runner's registration before its resource is deleted, so that the job
//! queue never hands a job to a runner that is about to disappear.
//!
//! - **`error`** — `ActionsError` and the "job still running" classification
//! - **`client`** — `HttpActionsClient`, a thin reqwest client

pub mod client;
pub mod error;

use async_trait::async_trait;
use tracing::debug;

pub use client::HttpActionsClient;
pub use error::{ActionsError, JOB_STILL_RUNNING_EXCEPTION};

/// Deregistration capability of the Actions service.
#[async_trait]
pub trait ActionsService: Send + Sync {
    /// Remove a runner registration. Fails with a job-still-running
    /// classification if the runner has already been handed a job.
    async fn remove_runner(&self, runner_id: i64) -> Result<(), ActionsError>;
}

/// Accepts every removal without calling out. Used when no Actions
/// endpoint is configured (local and standalone runs).
#[derive(Debug, Default, Clone)]
pub struct NoopActionsService;

#[async_trait]
impl ActionsService for NoopActionsService {
    async fn remove_runner(&self, runner_id: i64) -> Result<(), ActionsError> {
        debug!(runner_id, "no actions endpoint configured, skipping deregistration");
        Ok(())
    }
}
