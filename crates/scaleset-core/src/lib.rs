//! scaleset-core — shared types for the runner scale-set controller.
//!
//! Holds the resource model (runner sets and their child runners), the
//! well-known annotation and finalizer names, and the `scaleset.toml`
//! configuration parser.

pub mod config;
pub mod types;

pub use config::{ConfigError, ScaleSetConfig};
pub use types::*;

/// Annotation stamped on every runner with the patch id that created it.
pub const PATCH_ID_ANNOTATION: &str = "actions.github.com/patch-id";

/// Finalizer held by a runner set while it still has live children.
pub const RUNNER_SET_FINALIZER: &str = "actions.github.com/runnerset-finalizer";

/// Owner kind recorded on runners created for a runner set.
pub const RUNNER_SET_KIND: &str = "RunnerSet";
