//! Pool loop: periodic instance pool reconciliation.
//!
//! Runs on its own cadence, independent of the scaling loop. A failed
//! demand read skips the period (stale demand); a failed resize counts
//! toward the degraded signal and is retried on the next period.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use qscale_core::{ControllerError, ControllerSettings, Epoch, InstancePool, PoolStatus, TaskService};

use crate::clock::LoopClock;
use crate::failures::FailureTracker;
use crate::instances::{InstanceCapacityProvider, PoolAdjustment};

pub struct PoolLoop {
    provider: InstanceCapacityProvider,
    failures: FailureTracker,
    stale_reads: u64,
    interval: Duration,
    status_tx: watch::Sender<PoolStatus>,
}

impl PoolLoop {
    pub fn new(
        settings: &ControllerSettings,
        pool: Arc<dyn InstancePool>,
        service: Arc<dyn TaskService>,
    ) -> Self {
        let (status_tx, _) = watch::channel(PoolStatus {
            pool_id: settings.pool_id.clone(),
            ..PoolStatus::default()
        });

        Self {
            provider: InstanceCapacityProvider::new(
                pool,
                service,
                &settings.pool_id,
                &settings.service_id,
                settings.instances,
                settings.call_timeout,
            ),
            failures: FailureTracker::new("instances", settings.degraded_after),
            stale_reads: 0,
            interval: settings.reconcile_interval,
            status_tx,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<PoolStatus> {
        self.status_tx.subscribe()
    }

    pub fn status(&self) -> PoolStatus {
        self.status_tx.borrow().clone()
    }

    /// Seed the provider from the observed pool size.
    pub async fn seed(&mut self, now: Epoch) {
        let size = self.provider.observe().await;
        info!(pool = %self.provider.pool_id(), size = ?size, "instance pool observed");
        self.status_tx.send_modify(|status| {
            status.pool_size = size;
            status.updated_at = now;
        });
    }

    /// Run one reconciliation period at `now`.
    pub async fn tick(&mut self, now: Epoch) -> Option<PoolAdjustment> {
        let result = self.provider.reconcile().await;

        let adjustment = match result {
            Ok(adjustment) => {
                self.failures.record_success();
                Some(adjustment)
            }
            Err(ControllerError::TransientRead(e)) => {
                self.stale_reads += 1;
                warn!(
                    pool = %self.provider.pool_id(),
                    error = %e,
                    "task demand read failed, skipping reconciliation"
                );
                None
            }
            Err(e) => {
                warn!(
                    pool = %self.provider.pool_id(),
                    error = %e,
                    "instance pool resize failed, will retry next period"
                );
                self.failures.record_failure();
                None
            }
        };

        let stale_reads = self.stale_reads;
        let pool_size = self.provider.current();
        let consecutive = self.failures.consecutive();
        let degraded = self.failures.degraded();
        self.status_tx.send_modify(|status| {
            if let Some(adj) = adjustment {
                status.last_demand = Some(adj.demand);
                status.required_instances = Some(adj.required);
            }
            status.pool_size = pool_size;
            status.stale_demand_reads = stale_reads;
            status.consecutive_apply_failures = consecutive;
            status.degraded = degraded;
            status.updated_at = now;
        });

        adjustment
    }

    /// Run the reconciliation loop until the shutdown signal.
    pub async fn run(mut self, clock: LoopClock, mut shutdown: watch::Receiver<bool>) {
        info!(
            pool = %self.provider.pool_id(),
            interval_secs = self.interval.as_secs(),
            "pool loop started"
        );

        self.seed(clock.now()).await;

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick(clock.now()).await;
                }
                _ = shutdown.changed() => {
                    info!("pool loop shutting down");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qscale_backend::InMemoryCluster;
    use qscale_core::{BackendError, ControllerConfig};

    fn pool_loop(cluster: &Arc<InMemoryCluster>) -> PoolLoop {
        let mut config = ControllerConfig::default();
        config.controller.pool_id = "pool".to_string();
        config.controller.service_id = "worker".to_string();
        config.controller.degraded_after = 2;
        PoolLoop::new(&config.validate().unwrap(), cluster.clone(), cluster.clone())
    }

    #[tokio::test]
    async fn follows_task_demand() {
        let cluster = Arc::new(InMemoryCluster::new(1.0));
        let mut p = pool_loop(&cluster);

        cluster.set_desired_task_count("worker", 3).await;
        let adj = p.tick(0).await.unwrap();
        assert_eq!(adj.to, 3);

        let status = p.status();
        assert_eq!(status.last_demand, Some(3.0));
        assert_eq!(status.required_instances, Some(3));
        assert_eq!(status.pool_size, Some(3));
    }

    #[tokio::test]
    async fn stale_demand_skips_the_period() {
        let cluster = Arc::new(InMemoryCluster::new(1.0));
        let mut p = pool_loop(&cluster);
        cluster
            .fail_demand_reads(1, BackendError::Timeout(Duration::from_secs(10)))
            .await;

        assert!(p.tick(0).await.is_none());
        let status = p.status();
        assert_eq!(status.stale_demand_reads, 1);
        assert!(!status.degraded);
        assert_eq!(status.consecutive_apply_failures, 0);
    }

    #[tokio::test]
    async fn persistent_resize_failures_degrade() {
        let cluster = Arc::new(InMemoryCluster::new(1.0));
        let mut p = pool_loop(&cluster);
        cluster.set_desired_task_count("worker", 2).await;
        cluster
            .fail_pool_updates(2, BackendError::Unavailable("asg".into()))
            .await;

        p.tick(0).await;
        p.tick(60).await;
        assert!(p.status().degraded);

        p.tick(120).await;
        let status = p.status();
        assert!(!status.degraded);
        assert_eq!(status.pool_size, Some(2));
    }

    #[tokio::test]
    async fn seed_reads_existing_pool() {
        let cluster = Arc::new(InMemoryCluster::new(1.0));
        cluster.set_pool_size("pool", 2).await;
        let mut p = pool_loop(&cluster);

        p.seed(0).await;
        assert_eq!(p.status().pool_size, Some(2));
    }
}
