//! Desired replica calculator.
//!
//! A single-threaded state machine owned by exactly one listener. It keeps
//! the last desired count and the patch sequence; neither is shared across
//! runner sets.

use tracing::debug;

use scaleset_core::ScaleSetConfig;

/// Inclusive runner bounds and the scale-up multiplier.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScaleBounds {
    pub min_runners: u32,
    pub max_runners: u32,
    pub scale_up_factor: f64,
}

impl ScaleBounds {
    pub fn new(min_runners: u32, max_runners: u32) -> Self {
        Self {
            min_runners,
            max_runners,
            scale_up_factor: 1.0,
        }
    }

    /// No upper bound.
    pub fn unbounded(min_runners: u32) -> Self {
        Self::new(min_runners, u32::MAX)
    }

    pub fn with_scale_up_factor(mut self, factor: f64) -> Self {
        self.scale_up_factor = factor;
        self
    }

    fn clamp(&self, value: u32) -> u32 {
        value.max(self.min_runners).min(self.max_runners)
    }
}

impl From<&ScaleSetConfig> for ScaleBounds {
    fn from(config: &ScaleSetConfig) -> Self {
        Self::new(config.scale_set.min_runners, config.max_runners())
            .with_scale_up_factor(config.scale_set.scale_up_factor)
    }
}

/// Turns per-batch job counts into a desired runner count and patch id.
#[derive(Debug, Clone)]
pub struct DesiredReplicaCalculator {
    bounds: ScaleBounds,
    /// Last computed desired count; `None` until the first batch.
    last_patch: Option<u32>,
    /// Last issued patch sequence; `None` until the first batch.
    patch_seq: Option<i64>,
}

impl DesiredReplicaCalculator {
    pub fn new(bounds: ScaleBounds) -> Self {
        Self {
            bounds,
            last_patch: None,
            patch_seq: None,
        }
    }

    pub fn bounds(&self) -> ScaleBounds {
        self.bounds
    }

    pub fn last_patch(&self) -> Option<u32> {
        self.last_patch
    }

    pub fn patch_seq(&self) -> Option<i64> {
        self.patch_seq
    }

    /// Process one message batch and return the patch id of the resulting
    /// decision. The desired count is available from [`Self::last_patch`].
    pub fn compute(&mut self, acquired: u32, completed: u32) -> i64 {
        let target = self.target_for(acquired);

        let (Some(last), Some(seq)) = (self.last_patch, self.patch_seq) else {
            // Nothing has run yet, so completions cannot be meaningful.
            self.last_patch = Some(target);
            self.patch_seq = Some(0);
            debug!(acquired, desired = target, patch_id = 0, "initial scaling decision");
            return 0;
        };

        let (desired, next_seq) = if acquired == 0 && completed == 0 {
            let desired = self.bounds.clamp(last.max(target));
            if self.bounds.min_runners > 0 && desired == self.bounds.min_runners {
                // Re-assert the floor so drift below it gets corrected.
                (desired, seq + 1)
            } else {
                (desired, seq)
            }
        } else {
            (target, seq + 1)
        };

        self.last_patch = Some(desired);
        self.patch_seq = Some(next_seq);
        debug!(
            acquired,
            completed,
            previous = last,
            desired,
            patch_id = next_seq,
            "scaling decision"
        );
        next_seq
    }

    fn target_for(&self, acquired: u32) -> u32 {
        let factor = if self.bounds.scale_up_factor >= 1.0 {
            self.bounds.scale_up_factor
        } else {
            1.0
        };
        // Float-to-int `as` saturates at u32::MAX.
        let scaled = (f64::from(acquired) * factor).ceil() as u32;
        self.bounds
            .clamp(self.bounds.min_runners.saturating_add(scaled))
    }
}
