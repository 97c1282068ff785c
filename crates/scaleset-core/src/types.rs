//! Resource model for runner sets and runners.
//!
//! Both resources carry Kubernetes-style object metadata: finalizers,
//! a deletion timestamp, an owner reference, and a resource version that
//! the store bumps on every write. All types are serializable to/from JSON
//! for storage and for the REST API.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::PATCH_ID_ANNOTATION;

/// Wall-clock timestamp used throughout the resource model.
pub type Timestamp = DateTime<Utc>;

// ── Metadata ───────────────────────────────────────────────────────

/// Object metadata shared by every stored resource.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ObjectMeta {
    pub name: String,
    pub namespace: String,
    /// Assigned by the store on create.
    #[serde(default)]
    pub uid: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    #[serde(default)]
    pub finalizers: Vec<String>,
    #[serde(default)]
    pub owner: Option<OwnerReference>,
    /// Assigned by the store on create.
    #[serde(default)]
    pub creation_timestamp: Option<Timestamp>,
    /// Set by the store when a delete is requested while finalizers remain.
    #[serde(default)]
    pub deletion_timestamp: Option<Timestamp>,
    #[serde(default)]
    pub resource_version: u64,
}

impl ObjectMeta {
    pub fn new(namespace: &str, name: &str) -> Self {
        Self {
            name: name.to_string(),
            namespace: namespace.to_string(),
            ..Self::default()
        }
    }

    /// `{namespace}/{name}`.
    pub fn key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }

    pub fn is_deleting(&self) -> bool {
        self.deletion_timestamp.is_some()
    }

    pub fn has_finalizer(&self, finalizer: &str) -> bool {
        self.finalizers.iter().any(|f| f == finalizer)
    }
}

/// Names and namespaces are key segments, so they may not contain the
/// `/` and `:` separators.
pub fn is_valid_name(name: &str) -> bool {
    !name.trim().is_empty() && !name.contains(['/', ':'])
}

/// Reference from a child resource to the resource that owns it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OwnerReference {
    pub kind: String,
    pub name: String,
    pub uid: String,
}

// ── Runner set ─────────────────────────────────────────────────────

/// Template stamped onto every runner a runner set creates.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct RunnerTemplate {
    /// Runner container image.
    pub image: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

/// Desired state of a runner set, written by the patch applier.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct RunnerSetSpec {
    /// Desired number of runners.
    pub replicas: u32,
    /// Token of the scaling decision that produced `replicas`.
    #[serde(default)]
    pub patch_id: i64,
    pub runner_template: RunnerTemplate,
}

/// Observed fleet counters, written by the reconciler.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct RunnerSetStatus {
    /// Pending + running + failed; finished runners are excluded.
    pub current_replicas: u32,
    pub pending_runners: u32,
    pub running_runners: u32,
    pub failed_runners: u32,
}

/// An autoscaled group of ephemeral single-job runners.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunnerSet {
    pub metadata: ObjectMeta,
    pub spec: RunnerSetSpec,
    #[serde(default)]
    pub status: RunnerSetStatus,
}

impl RunnerSet {
    pub fn new(namespace: &str, name: &str, template: RunnerTemplate) -> Self {
        Self {
            metadata: ObjectMeta::new(namespace, name),
            spec: RunnerSetSpec {
                replicas: 0,
                patch_id: 0,
                runner_template: template,
            },
            status: RunnerSetStatus::default(),
        }
    }

    pub fn key(&self) -> String {
        self.metadata.key()
    }

    /// Owner reference for runners created by this set.
    pub fn owner_reference(&self) -> OwnerReference {
        OwnerReference {
            kind: crate::RUNNER_SET_KIND.to_string(),
            name: self.metadata.name.clone(),
            uid: self.metadata.uid.clone(),
        }
    }
}

// ── Runner ─────────────────────────────────────────────────────────

/// Lifecycle phase of a runner, mirrored from its pod.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RunnerPhase {
    #[default]
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

/// Runner spec, copied from the owning set's template at creation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct RunnerSpec {
    pub template: RunnerTemplate,
}

/// Runner status, owned by the per-runner lifecycle reconciler.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct RunnerStatus {
    #[serde(default)]
    pub phase: RunnerPhase,
    /// Actions-service registration id; 0 until registered.
    #[serde(default)]
    pub runner_id: i64,
    /// Id of the job being executed; 0 when idle.
    #[serde(default)]
    pub job_request_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// One ephemeral runner: a single job slot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Runner {
    pub metadata: ObjectMeta,
    pub spec: RunnerSpec,
    #[serde(default)]
    pub status: RunnerStatus,
}

impl Runner {
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// Patch id annotation, if present and parseable.
    pub fn patch_id(&self) -> Option<i64> {
        self.metadata
            .annotations
            .get(PATCH_ID_ANNOTATION)
            .and_then(|v| v.trim().parse::<i64>().ok())
    }

    /// Registered with the Actions service.
    pub fn is_registered(&self) -> bool {
        self.status.runner_id != 0
    }

    /// Currently executing a job.
    pub fn has_job(&self) -> bool {
        self.status.job_request_id > 0
    }

    /// Owner key `{namespace}/{owner}`, if owned.
    pub fn owner_key(&self) -> Option<String> {
        self.metadata
            .owner
            .as_ref()
            .map(|o| format!("{}/{}", self.metadata.namespace, o.name))
    }
}
