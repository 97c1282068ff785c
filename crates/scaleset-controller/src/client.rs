//! Fleet store seam used by the reconciler.
//!
//! The reconciler never touches the store directly; it goes through
//! [`FleetClient`] so that an API-server backed client can stand in for the
//! embedded store.

use async_trait::async_trait;

use scaleset_core::{Runner, RunnerSet, RunnerSetStatus};
use scaleset_state::{StateResult, StateStore};

#[async_trait]
pub trait FleetClient: Send + Sync {
    async fn get_runner_set(&self, key: &str) -> StateResult<Option<RunnerSet>>;

    /// List every runner owned by the runner set at `owner_key`.
    async fn list_runners(&self, owner_key: &str) -> StateResult<Vec<Runner>>;

    async fn create_runner(&self, runner: Runner) -> StateResult<Runner>;

    async fn delete_runner(&self, owner_key: &str, name: &str) -> StateResult<()>;

    async fn update_runner_set_status(&self, key: &str, status: RunnerSetStatus)
    -> StateResult<()>;

    async fn set_runner_set_finalizers(&self, key: &str, finalizers: Vec<String>)
    -> StateResult<()>;
}

#[async_trait]
impl FleetClient for StateStore {
    async fn get_runner_set(&self, key: &str) -> StateResult<Option<RunnerSet>> {
        StateStore::get_runner_set(self, key)
    }

    async fn list_runners(&self, owner_key: &str) -> StateResult<Vec<Runner>> {
        self.list_runners_for(owner_key)
    }

    async fn create_runner(&self, runner: Runner) -> StateResult<Runner> {
        StateStore::create_runner(self, runner)
    }

    async fn delete_runner(&self, owner_key: &str, name: &str) -> StateResult<()> {
        StateStore::delete_runner(self, owner_key, name).map(|_| ())
    }

    async fn update_runner_set_status(
        &self,
        key: &str,
        status: RunnerSetStatus,
    ) -> StateResult<()> {
        StateStore::update_runner_set_status(self, key, status).map(|_| ())
    }

    async fn set_runner_set_finalizers(
        &self,
        key: &str,
        finalizers: Vec<String>,
    ) -> StateResult<()> {
        StateStore::set_runner_set_finalizers(self, key, finalizers).map(|_| ())
    }
}
