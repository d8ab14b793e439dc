//! Instance capacity provider: sizes the compute pool from task demand.
//!
//! The provider never looks at the queue. It polls the demand the task
//! service reports, converts it to a required instance count at the
//! configured utilization target, and moves the pool toward that count in
//! bounded steps. Zero demand always maps to zero required instances
//! (before clamping to the pool minimum), so the pool can drain.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use qscale_core::config::InstanceSettings;
use qscale_core::{
    BackendError, ControllerError, InstancePool, TaskService, with_timeout,
};

/// Absorbs float noise such as `0.9 / 0.3 = 3.0000000000000004`.
const CEIL_EPSILON: f64 = 1e-9;

/// Result of one reconciliation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoolAdjustment {
    pub demand: f64,
    pub required: u32,
    pub from: u32,
    pub to: u32,
}

impl PoolAdjustment {
    pub fn changed(&self) -> bool {
        self.from != self.to
    }
}

/// Instances needed for `demand`, clamped to the pool bounds.
pub fn required_instances(demand: f64, settings: &InstanceSettings) -> u32 {
    if demand.is_nan() || demand <= 0.0 {
        return settings.bounds.clamp(0);
    }
    let raw = demand / settings.capacity_per_instance * settings.utilization.headroom_factor();
    // Any positive demand needs at least one instance.
    let needed = (raw - CEIL_EPSILON).ceil().max(1.0) as u32;
    settings.bounds.clamp(needed)
}

/// Next pool size on the way from `current` to `required`.
///
/// Scale-out moves by at least `step.min` and at most `step.max`, capped
/// at the pool max. Scale-in moves by at most `step.max` and stops at
/// `required`.
pub fn next_pool_size(current: u32, required: u32, settings: &InstanceSettings) -> u32 {
    if required > current {
        let step = settings.step.clamp(required - current);
        current.saturating_add(step).min(settings.bounds.max)
    } else if required < current {
        let step = (current - required).min(settings.step.max);
        current - step
    } else {
        current
    }
}

pub struct InstanceCapacityProvider {
    pool: Arc<dyn InstancePool>,
    tasks: Arc<dyn TaskService>,
    pool_id: String,
    service_id: String,
    settings: InstanceSettings,
    call_timeout: Duration,
    /// Last observed or applied pool size.
    current: Option<u32>,
}

impl InstanceCapacityProvider {
    pub fn new(
        pool: Arc<dyn InstancePool>,
        tasks: Arc<dyn TaskService>,
        pool_id: &str,
        service_id: &str,
        settings: InstanceSettings,
        call_timeout: Duration,
    ) -> Self {
        Self {
            pool,
            tasks,
            pool_id: pool_id.to_string(),
            service_id: service_id.to_string(),
            settings,
            call_timeout,
            current: None,
        }
    }

    /// Refresh the view of the pool size. A failed read keeps the last
    /// known size.
    pub async fn observe(&mut self) -> Option<u32> {
        match with_timeout(self.call_timeout, self.pool.instance_pool_size(&self.pool_id)).await {
            Ok(size) => {
                self.current = Some(size);
            }
            Err(e) => {
                warn!(
                    pool = %self.pool_id,
                    error = %e,
                    last_known = ?self.current,
                    "pool size read failed, using last known size"
                );
            }
        }
        self.current
    }

    /// Read demand and move the pool one bounded step toward the required size.
    pub async fn reconcile(&mut self) -> Result<PoolAdjustment, ControllerError> {
        let demand = with_timeout(
            self.call_timeout,
            self.tasks.scheduled_task_demand(&self.service_id),
        )
        .await
        .map_err(ControllerError::TransientRead)?;

        if !demand.is_finite() || demand < 0.0 {
            return Err(ControllerError::TransientRead(BackendError::Protocol(
                format!("invalid task demand {demand}"),
            )));
        }

        let known = self.observe().await;
        let current = known.unwrap_or(self.settings.bounds.min);
        let required = required_instances(demand, &self.settings);
        let next = next_pool_size(current, required, &self.settings);

        let adjustment = PoolAdjustment {
            demand,
            required,
            from: current,
            to: next,
        };

        if known.is_some() && !adjustment.changed() {
            debug!(pool = %self.pool_id, demand, size = current, "instance pool steady");
            return Ok(adjustment);
        }

        with_timeout(
            self.call_timeout,
            self.pool.set_instance_pool_size(&self.pool_id, next),
        )
        .await
        .map_err(ControllerError::Apply)?;

        self.current = Some(next);
        info!(
            pool = %self.pool_id,
            demand,
            required,
            from = current,
            to = next,
            "instance pool resized"
        );

        Ok(adjustment)
    }

    pub fn current(&self) -> Option<u32> {
        self.current
    }

    pub fn pool_id(&self) -> &str {
        &self.pool_id
    }
}
