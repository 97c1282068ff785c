//! scaleset-controller — convergence of runner sets toward their desired size.
//!
//! Each runner set carries `{replicas, patch_id}` written by its listener.
//! The controller lists the set's runners, classifies them, and creates or
//! reclaims runners until the fleet matches, unless the fleet already
//! carries the latest patch id.
//!
//! # Reclaim Order
//!
//! ```text
//! candidates = pending ++ running, oldest creation time first
//! for runner in candidates until `count` removed:
//!     skip if never registered (runner_id == 0)
//!     skip if busy (job_request_id > 0)
//!     deregister with the Actions service
//!         job still running → skip, not an error
//!     delete the runner resource
//! ```
//!
//! Deletion of a runner set is gated by a finalizer: children are drained
//! first and the finalizer is released only once none remain.

pub mod client;
pub mod error;
pub mod fleet;
pub mod reconciler;
pub mod runtime;
pub mod teardown;

pub use client::FleetClient;
pub use error::{ControllerError, ControllerResult};
pub use fleet::{Bucket, FleetState};
pub use reconciler::{RunnerSetReconciler, new_runner};
pub use runtime::{Controller, ControllerConfig};
pub use teardown::TeardownState;
