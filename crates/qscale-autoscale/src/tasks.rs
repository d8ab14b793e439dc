//! Task capacity controller: applies scaling decisions to the workload.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use qscale_core::{CapacityBounds, ControllerError, ScalingDecision, TaskService, with_timeout};

/// What applying a decision did to the desired task count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Changed { from: Option<u32>, to: u32 },
    /// Re-issued the current count; a no-op at the infrastructure level.
    Unchanged(u32),
}

impl ApplyOutcome {
    pub fn count(&self) -> u32 {
        match self {
            ApplyOutcome::Changed { to, .. } => *to,
            ApplyOutcome::Unchanged(n) => *n,
        }
    }
}

pub struct TaskCapacityController {
    service: Arc<dyn TaskService>,
    service_id: String,
    bounds: CapacityBounds,
    call_timeout: Duration,
    /// Last count the service accepted.
    applied: Option<u32>,
}

impl TaskCapacityController {
    pub fn new(
        service: Arc<dyn TaskService>,
        service_id: &str,
        bounds: CapacityBounds,
        call_timeout: Duration,
    ) -> Self {
        Self {
            service,
            service_id: service_id.to_string(),
            bounds,
            call_timeout,
            applied: None,
        }
    }

    /// Set the desired task count to `clamp(decision.target, min, max)`.
    ///
    /// The call is always issued, even for an unchanged count, so a
    /// service that drifted is pulled back.
    pub async fn apply(&mut self, decision: &ScalingDecision) -> Result<ApplyOutcome, ControllerError> {
        let count = self.bounds.clamp(decision.target);
        if count != decision.target {
            debug!(
                service = %self.service_id,
                requested = decision.target,
                clamped = count,
                "decision clamped to task bounds"
            );
        }

        with_timeout(
            self.call_timeout,
            self.service.set_desired_task_count(&self.service_id, count),
        )
        .await
        .map_err(ControllerError::Apply)?;

        let outcome = match self.applied {
            Some(prev) if prev == count => ApplyOutcome::Unchanged(count),
            prev => ApplyOutcome::Changed {
                from: prev,
                to: count,
            },
        };
        self.applied = Some(count);

        match outcome {
            ApplyOutcome::Changed { from, to } => {
                info!(service = %self.service_id, from = ?from, to, "desired task count changed");
            }
            ApplyOutcome::Unchanged(n) => {
                debug!(service = %self.service_id, count = n, "desired task count reaffirmed");
            }
        }

        Ok(outcome)
    }

    pub fn applied(&self) -> Option<u32> {
        self.applied
    }

    pub fn service_id(&self) -> &str {
        &self.service_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qscale_backend::InMemoryCluster;
    use qscale_core::{BackendError, ScaleDirection};

    fn decision(target: u32) -> ScalingDecision {
        ScalingDecision {
            target,
            direction: ScaleDirection::Out,
            epoch: 0,
        }
    }

    fn controller(cluster: &Arc<InMemoryCluster>, min: u32, max: u32) -> TaskCapacityController {
        TaskCapacityController::new(
            cluster.clone(),
            "worker",
            CapacityBounds { min, max },
            Duration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn applies_clamped_target() {
        let cluster = Arc::new(InMemoryCluster::new(1.0));
        let mut tasks = controller(&cluster, 1, 3);

        let outcome = tasks.apply(&decision(10)).await.unwrap();
        assert_eq!(outcome, ApplyOutcome::Changed { from: None, to: 3 });
        assert_eq!(cluster.desired_task_count("worker").await, Some(3));

        let outcome = tasks.apply(&decision(0)).await.unwrap();
        assert_eq!(outcome, ApplyOutcome::Changed { from: Some(3), to: 1 });
        assert_eq!(cluster.desired_task_count("worker").await, Some(1));
    }

    #[tokio::test]
    async fn applying_twice_equals_applying_once() {
        let cluster = Arc::new(InMemoryCluster::new(1.0));
        let mut tasks = controller(&cluster, 0, 3);

        tasks.apply(&decision(3)).await.unwrap();
        let once = cluster.desired_task_count("worker").await;

        let outcome = tasks.apply(&decision(3)).await.unwrap();
        assert_eq!(outcome, ApplyOutcome::Unchanged(3));
        assert_eq!(cluster.desired_task_count("worker").await, once);
        assert_eq!(tasks.applied(), Some(3));
    }

    #[tokio::test]
    async fn failure_is_an_apply_error_and_keeps_previous_count() {
        let cluster = Arc::new(InMemoryCluster::new(1.0));
        let mut tasks = controller(&cluster, 0, 3);
        tasks.apply(&decision(3)).await.unwrap();

        cluster
            .fail_task_updates(1, BackendError::Unavailable("ecs".into()))
            .await;
        let err = tasks.apply(&decision(0)).await.unwrap_err();
        assert!(matches!(err, ControllerError::Apply(BackendError::Unavailable(_))));
        assert_eq!(tasks.applied(), Some(3));
        assert_eq!(cluster.desired_task_count("worker").await, Some(3));

        // Retried on the next cycle with the same decision.
        let outcome = tasks.apply(&decision(0)).await.unwrap();
        assert_eq!(outcome, ApplyOutcome::Changed { from: Some(3), to: 0 });
    }
}
