//! Change notifications emitted by the store after every committed write.

use serde::{Deserialize, Serialize};

/// Which table a change touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    RunnerSet,
    Runner,
}

/// What happened to the object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchAction {
    Added,
    Modified,
    Deleted,
}

/// A single change to a stored object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchEvent {
    pub kind: ResourceKind,
    pub action: WatchAction,
    /// `{namespace}/{name}` of the changed object.
    pub key: String,
    /// Key of the owning runner set, for runners.
    pub owner: Option<String>,
}

impl WatchEvent {
    /// The runner set a reconciler should look at for this change.
    pub fn runner_set_key(&self) -> Option<&str> {
        match self.kind {
            ResourceKind::RunnerSet => Some(&self.key),
            ResourceKind::Runner => self.owner.as_deref(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runner_events_map_to_owner() {
        let ev = WatchEvent {
            kind: ResourceKind::Runner,
            action: WatchAction::Modified,
            key: "ci/linux-abc".to_string(),
            owner: Some("ci/linux".to_string()),
        };
        assert_eq!(ev.runner_set_key(), Some("ci/linux"));

        let orphan = WatchEvent { owner: None, ..ev };
        assert_eq!(orphan.runner_set_key(), None);
    }

    #[test]
    fn runner_set_events_map_to_self() {
        let ev = WatchEvent {
            kind: ResourceKind::RunnerSet,
            action: WatchAction::Added,
            key: "ci/linux".to_string(),
            owner: None,
        };
        assert_eq!(ev.runner_set_key(), Some("ci/linux"));
    }
}
