//! Loop clock anchored to the wall clock at startup.
//!
//! Decisions are stamped in epoch seconds, but elapsed time comes from
//! tokio's monotonic clock so cooldowns survive wall-clock jumps and
//! follow `tokio::time::pause()` in tests.

use std::time::{SystemTime, UNIX_EPOCH};

use tokio::time::Instant;

use qscale_core::Epoch;

#[derive(Debug, Clone, Copy)]
pub struct LoopClock {
    base: Epoch,
    started: Instant,
}

impl LoopClock {
    pub fn start() -> Self {
        Self::starting_at(epoch_secs())
    }

    pub fn starting_at(base: Epoch) -> Self {
        Self {
            base,
            started: Instant::now(),
        }
    }

    pub fn now(&self) -> Epoch {
        self.base + self.started.elapsed().as_secs()
    }
}

pub fn epoch_secs() -> Epoch {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
