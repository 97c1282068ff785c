//! StateStore — redb-backed persistence for runner sets and runners.
//!
//! Resources follow Kubernetes object semantics: the store assigns uid,
//! creation timestamp and resource version on create; a delete on an
//! object that still holds finalizers only stamps its deletion timestamp;
//! clearing the last finalizer of a deleting object removes it. Every
//! committed write is broadcast as a [`WatchEvent`].

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

use scaleset_core::{ObjectMeta, Runner, RunnerSet, RunnerSetStatus, RunnerStatus};

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::watch::{ResourceKind, WatchAction, WatchEvent};

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

type Table = TableDefinition<'static, &'static str, &'static [u8]>;

/// Capacity of the watch broadcast channel. Slow subscribers observe
/// `RecvError::Lagged` and are expected to resync with a full list.
const WATCH_CAPACITY: usize = 1024;

/// Objects the store knows how to persist generically.
trait StoredObject: Serialize + DeserializeOwned {
    const KIND: ResourceKind;
    fn meta(&self) -> &ObjectMeta;
    fn meta_mut(&mut self) -> &mut ObjectMeta;
    fn owner(&self) -> Option<String>;
}

impl StoredObject for RunnerSet {
    const KIND: ResourceKind = ResourceKind::RunnerSet;
    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }
    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
    fn owner(&self) -> Option<String> {
        None
    }
}

impl StoredObject for Runner {
    const KIND: ResourceKind = ResourceKind::Runner;
    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }
    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
    fn owner(&self) -> Option<String> {
        self.owner_key()
    }
}

/// Thread-safe fleet store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
    events: broadcast::Sender<WatchEvent>,
}

impl StateStore {
    /// Open (or create) a persistent store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self::with_database(db)?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self::with_database(db)?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    fn with_database(db: Database) -> StateResult<Self> {
        let (events, _) = broadcast::channel(WATCH_CAPACITY);
        let store = Self {
            db: Arc::new(db),
            events,
        };
        store.ensure_tables()?;
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        txn.open_table(RUNNER_SETS).map_err(map_err!(Table))?;
        txn.open_table(RUNNERS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Subscribe to change notifications for every committed write.
    pub fn subscribe(&self) -> broadcast::Receiver<WatchEvent> {
        self.events.subscribe()
    }

    // ── Runner sets ────────────────────────────────────────────────

    pub fn create_runner_set(&self, set: RunnerSet) -> StateResult<RunnerSet> {
        let key = set.key();
        self.insert_new(RUNNER_SETS, &key, set)
    }

    pub fn get_runner_set(&self, key: &str) -> StateResult<Option<RunnerSet>> {
        self.get(RUNNER_SETS, key)
    }

    pub fn list_runner_sets(&self) -> StateResult<Vec<RunnerSet>> {
        self.list_prefix(RUNNER_SETS, "")
    }

    /// Write a scaling decision onto a runner set's spec.
    pub fn patch_runner_set_spec(
        &self,
        key: &str,
        replicas: u32,
        patch_id: i64,
    ) -> StateResult<RunnerSet> {
        self.modify(RUNNER_SETS, key, |set: &mut RunnerSet| {
            set.spec.replicas = replicas;
            set.spec.patch_id = patch_id;
        })?
        .ok_or_else(|| StateError::NotFound(key.to_string()))
    }

    pub fn update_runner_set_status(
        &self,
        key: &str,
        status: RunnerSetStatus,
    ) -> StateResult<RunnerSet> {
        self.modify(RUNNER_SETS, key, |set: &mut RunnerSet| {
            set.status = status;
        })?
        .ok_or_else(|| StateError::NotFound(key.to_string()))
    }

    /// Replace a runner set's finalizers. Returns `None` when the set was
    /// deleting and this removed its last finalizer.
    pub fn set_runner_set_finalizers(
        &self,
        key: &str,
        finalizers: Vec<String>,
    ) -> StateResult<Option<RunnerSet>> {
        self.modify(RUNNER_SETS, key, |set: &mut RunnerSet| {
            set.metadata.finalizers = finalizers;
        })
    }

    /// Request deletion. Returns the object if finalizers keep it alive.
    pub fn delete_runner_set(&self, key: &str) -> StateResult<Option<RunnerSet>> {
        self.delete(RUNNER_SETS, key)
    }

    // ── Runners ────────────────────────────────────────────────────

    /// Create a runner. The runner must carry an owner reference.
    pub fn create_runner(&self, runner: Runner) -> StateResult<Runner> {
        let owner = runner
            .owner_key()
            .ok_or_else(|| StateError::Invalid(format!("runner {} has no owner", runner.name())))?;
        let key = runner_key(&owner, runner.name());
        self.insert_new(RUNNERS, &key, runner)
    }

    pub fn get_runner(&self, owner_key: &str, name: &str) -> StateResult<Option<Runner>> {
        self.get(RUNNERS, &runner_key(owner_key, name))
    }

    /// List every runner owned by the given runner set. The key prefix
    /// narrows the scan; the owner reference decides membership.
    pub fn list_runners_for(&self, owner_key: &str) -> StateResult<Vec<Runner>> {
        let runners: Vec<Runner> = self.list_prefix(RUNNERS, &runner_key(owner_key, ""))?;
        Ok(runners
            .into_iter()
            .filter(|runner| runner.owner_key().as_deref() == Some(owner_key))
            .collect())
    }

    pub fn update_runner_status(
        &self,
        owner_key: &str,
        name: &str,
        status: RunnerStatus,
    ) -> StateResult<Runner> {
        let key = runner_key(owner_key, name);
        self.modify(RUNNERS, &key, |runner: &mut Runner| {
            runner.status = status;
        })?
        .ok_or(StateError::NotFound(key))
    }

    pub fn set_runner_finalizers(
        &self,
        owner_key: &str,
        name: &str,
        finalizers: Vec<String>,
    ) -> StateResult<Option<Runner>> {
        self.modify(RUNNERS, &runner_key(owner_key, name), |runner: &mut Runner| {
            runner.metadata.finalizers = finalizers;
        })
    }

    pub fn delete_runner(&self, owner_key: &str, name: &str) -> StateResult<Option<Runner>> {
        self.delete(RUNNERS, &runner_key(owner_key, name))
    }

    // ── Generic helpers ────────────────────────────────────────────

    fn insert_new<T: StoredObject>(&self, def: Table, key: &str, mut obj: T) -> StateResult<T> {
        {
            let meta = obj.meta_mut();
            meta.uid = Uuid::new_v4().to_string();
            // Imported objects keep their original creation time.
            meta.creation_timestamp.get_or_insert_with(Utc::now);
            meta.deletion_timestamp = None;
            meta.resource_version = 1;
        }
        let value = serde_json::to_vec(&obj).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(def).map_err(map_err!(Table))?;
            if table.get(key).map_err(map_err!(Read))?.is_some() {
                return Err(StateError::AlreadyExists(key.to_string()));
            }
            table.insert(key, value.as_slice()).map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, kind = ?T::KIND, "object created");
        self.notify(&obj, WatchAction::Added);
        Ok(obj)
    }

    fn get<T: StoredObject>(&self, def: Table, key: &str) -> StateResult<Option<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(def).map_err(map_err!(Table))?;
        match table.get(key).map_err(map_err!(Read))? {
            Some(guard) => {
                let obj: T =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(obj))
            }
            None => Ok(None),
        }
    }

    fn list_prefix<T: StoredObject>(&self, def: Table, prefix: &str) -> StateResult<Vec<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(def).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if key.value().starts_with(prefix) {
                let obj: T =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                results.push(obj);
            }
        }
        Ok(results)
    }

    /// Read-modify-write one object in a single transaction. Returns
    /// `None` if the change released the last finalizer of a deleting
    /// object, which removes it.
    fn modify<T, F>(&self, def: Table, key: &str, f: F) -> StateResult<Option<T>>
    where
        T: StoredObject,
        F: FnOnce(&mut T),
    {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let (obj, removed) = {
            let mut table = txn.open_table(def).map_err(map_err!(Table))?;
            let mut obj: T = match table.get(key).map_err(map_err!(Read))? {
                Some(guard) => {
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?
                }
                None => return Err(StateError::NotFound(key.to_string())),
            };
            f(&mut obj);
            let meta = obj.meta_mut();
            meta.resource_version += 1;
            let removed = meta.is_deleting() && meta.finalizers.is_empty();
            if removed {
                table.remove(key).map_err(map_err!(Write))?;
            } else {
                let value = serde_json::to_vec(&obj).map_err(map_err!(Serialize))?;
                table.insert(key, value.as_slice()).map_err(map_err!(Write))?;
            }
            (obj, removed)
        };
        txn.commit().map_err(map_err!(Transaction))?;

        if removed {
            debug!(%key, kind = ?T::KIND, "last finalizer released, object removed");
            self.notify(&obj, WatchAction::Deleted);
            Ok(None)
        } else {
            self.notify(&obj, WatchAction::Modified);
            Ok(Some(obj))
        }
    }

    fn delete<T: StoredObject>(&self, def: Table, key: &str) -> StateResult<Option<T>> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let (obj, action) = {
            let mut table = txn.open_table(def).map_err(map_err!(Table))?;
            let mut obj: T = match table.get(key).map_err(map_err!(Read))? {
                Some(guard) => {
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?
                }
                None => return Err(StateError::NotFound(key.to_string())),
            };
            if obj.meta().finalizers.is_empty() {
                table.remove(key).map_err(map_err!(Write))?;
                (obj, Some(WatchAction::Deleted))
            } else if obj.meta().is_deleting() {
                (obj, None)
            } else {
                let meta = obj.meta_mut();
                meta.deletion_timestamp = Some(Utc::now());
                meta.resource_version += 1;
                let value = serde_json::to_vec(&obj).map_err(map_err!(Serialize))?;
                table.insert(key, value.as_slice()).map_err(map_err!(Write))?;
                (obj, Some(WatchAction::Modified))
            }
        };
        txn.commit().map_err(map_err!(Transaction))?;

        match action {
            Some(WatchAction::Deleted) => {
                debug!(%key, kind = ?T::KIND, "object deleted");
                self.notify(&obj, WatchAction::Deleted);
                Ok(None)
            }
            Some(action) => {
                debug!(%key, kind = ?T::KIND, finalizers = ?obj.meta().finalizers, "deletion pending on finalizers");
                self.notify(&obj, action);
                Ok(Some(obj))
            }
            None => Ok(Some(obj)),
        }
    }

    fn notify<T: StoredObject>(&self, obj: &T, action: WatchAction) {
        // No subscribers is not an error.
        let _ = self.events.send(WatchEvent {
            kind: T::KIND,
            action,
            key: obj.meta().key(),
            owner: obj.owner(),
        });
    }
}
