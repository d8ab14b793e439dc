//! Consecutive apply-failure tracking for the degraded signal.

use tracing::{info, warn};

/// Counts consecutive failed capacity changes for one loop.
///
/// Once the count reaches the threshold the loop is degraded; a single
/// success clears it.
#[derive(Debug)]
pub struct FailureTracker {
    knob: &'static str,
    consecutive: u32,
    threshold: u32,
    degraded: bool,
}

impl FailureTracker {
    pub fn new(knob: &'static str, threshold: u32) -> Self {
        Self {
            knob,
            consecutive: 0,
            threshold: threshold.max(1),
            degraded: false,
        }
    }

    /// Record a successful apply; returns true if this cleared degraded.
    pub fn record_success(&mut self) -> bool {
        self.consecutive = 0;
        if self.degraded {
            self.degraded = false;
            info!(knob = self.knob, "capacity changes succeeding again, degraded cleared");
            return true;
        }
        false
    }

    /// Record a failed apply; returns the degraded flag afterwards.
    pub fn record_failure(&mut self) -> bool {
        self.consecutive = self.consecutive.saturating_add(1);
        if self.consecutive >= self.threshold && !self.degraded {
            self.degraded = true;
            warn!(
                knob = self.knob,
                failures = self.consecutive,
                threshold = self.threshold,
                "capacity changes failing persistently, marking degraded"
            );
        }
        self.degraded
    }

    pub fn consecutive(&self) -> u32 {
        self.consecutive
    }

    pub fn degraded(&self) -> bool {
        self.degraded
    }
}
