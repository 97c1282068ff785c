//! scaleset-autoscale — job-queue driven desired replica calculation.
//!
//! Consumes message batches of `(acquired, completed)` job counts, turns
//! each into a bounded desired runner count paired with a patch id, and
//! writes that pair onto the runner set's spec for the controller to act
//! on.
//!
//! # Scaling Algorithm
//!
//! ```text
//! target = clamp(min_runners + ceil(acquired * scale_up_factor), min, max)
//!
//! first batch:         last = target,             seq = 0
//! non-empty batch:     last = target,             seq += 1
//! empty batch:         last = max(last, target)
//!                      if min > 0 && last == min: seq += 1   // re-assert floor
//!                      else:                      seq unchanged
//!
//! patch_id = seq
//! ```
//!
//! A repeated patch id tells the controller the fleet already reflects the
//! decision; a new one asks it to converge again.

pub mod calculator;
pub mod listener;

pub use calculator::{DesiredReplicaCalculator, ScaleBounds};
pub use listener::{JobBatch, ListenerWorker, PatchApplier, ScalePatch};
