//! scaleset.toml configuration parser.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{RunnerSet, RunnerTemplate, is_valid_name};

/// Errors reported by [`ScaleSetConfig::validate`].
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("scale_set.{0} must not be empty")]
    Empty(&'static str),

    #[error("scale_set.{field} {value:?} must not contain '/' or ':'")]
    InvalidName { field: &'static str, value: String },

    #[error("min_runners ({min}) exceeds max_runners ({max})")]
    MinAboveMax { min: u32, max: u32 },

    #[error("scale_up_factor must be >= 1.0, got {0}")]
    ScaleUpFactor(f64),

    #[error("controller.max_concurrent_reconciles must be at least 1")]
    Concurrency,

    #[error("controller.requeue_base_ms ({base}) exceeds requeue_max_ms ({max})")]
    Requeue { base: u64, max: u64 },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScaleSetConfig {
    pub scale_set: ScaleSetSection,
    #[serde(default)]
    pub runner: RunnerSection,
    #[serde(default)]
    pub controller: ControllerSection,
    pub actions: Option<ActionsSection>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScaleSetSection {
    pub name: String,
    pub namespace: String,
    #[serde(default)]
    pub min_runners: u32,
    /// Omitted means unbounded.
    pub max_runners: Option<u32>,
    #[serde(default = "default_scale_up_factor")]
    pub scale_up_factor: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerSection {
    #[serde(default = "default_image")]
    pub image: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl Default for RunnerSection {
    fn default() -> Self {
        Self {
            image: default_image(),
            labels: BTreeMap::new(),
            env: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerSection {
    #[serde(default = "default_concurrency")]
    pub max_concurrent_reconciles: usize,
    #[serde(default = "default_requeue_base_ms")]
    pub requeue_base_ms: u64,
    #[serde(default = "default_requeue_max_ms")]
    pub requeue_max_ms: u64,
}

impl Default for ControllerSection {
    fn default() -> Self {
        Self {
            max_concurrent_reconciles: default_concurrency(),
            requeue_base_ms: default_requeue_base_ms(),
            requeue_max_ms: default_requeue_max_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionsSection {
    /// Scale-set endpoint of the Actions service.
    pub base_url: String,
    /// Environment variable holding the bearer token.
    #[serde(default = "default_token_env")]
    pub token_env: String,
}

fn default_scale_up_factor() -> f64 {
    1.0
}

fn default_image() -> String {
    "ghcr.io/actions/actions-runner:latest".to_string()
}

fn default_concurrency() -> usize {
    2
}

fn default_requeue_base_ms() -> u64 {
    500
}

fn default_requeue_max_ms() -> u64 {
    60_000
}

fn default_token_env() -> String {
    "GITHUB_TOKEN".to_string()
}

impl ScaleSetConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ScaleSetConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let s = &self.scale_set;
        if s.name.trim().is_empty() {
            return Err(ConfigError::Empty("name"));
        }
        if s.namespace.trim().is_empty() {
            return Err(ConfigError::Empty("namespace"));
        }
        for (field, value) in [("name", &s.name), ("namespace", &s.namespace)] {
            if !is_valid_name(value) {
                return Err(ConfigError::InvalidName {
                    field,
                    value: value.clone(),
                });
            }
        }
        let max = self.max_runners();
        if s.min_runners > max {
            return Err(ConfigError::MinAboveMax {
                min: s.min_runners,
                max,
            });
        }
        if !(s.scale_up_factor >= 1.0) {
            return Err(ConfigError::ScaleUpFactor(s.scale_up_factor));
        }
        let c = &self.controller;
        if c.max_concurrent_reconciles == 0 {
            return Err(ConfigError::Concurrency);
        }
        if c.requeue_base_ms > c.requeue_max_ms {
            return Err(ConfigError::Requeue {
                base: c.requeue_base_ms,
                max: c.requeue_max_ms,
            });
        }
        Ok(())
    }

    /// Upper bound on runners; `u32::MAX` when unbounded.
    pub fn max_runners(&self) -> u32 {
        self.scale_set.max_runners.unwrap_or(u32::MAX)
    }

    pub fn requeue_base(&self) -> Duration {
        Duration::from_millis(self.controller.requeue_base_ms)
    }

    pub fn requeue_max(&self) -> Duration {
        Duration::from_millis(self.controller.requeue_max_ms)
    }

    /// The runner set this configuration describes, ready to be created.
    pub fn runner_set(&self) -> RunnerSet {
        RunnerSet::new(
            &self.scale_set.namespace,
            &self.scale_set.name,
            RunnerTemplate {
                image: self.runner.image.clone(),
                labels: self.runner.labels.clone(),
                env: self.runner.env.clone(),
            },
        )
    }

    /// Scaffold a minimal configuration.
    pub fn scaffold(namespace: &str, name: &str) -> Self {
        ScaleSetConfig {
            scale_set: ScaleSetSection {
                name: name.to_string(),
                namespace: namespace.to_string(),
                min_runners: 0,
                max_runners: Some(10),
                scale_up_factor: default_scale_up_factor(),
            },
            runner: RunnerSection::default(),
            controller: ControllerSection::default(),
            actions: None,
        }
    }
}
