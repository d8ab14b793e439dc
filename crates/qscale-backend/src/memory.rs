//! In-process cluster simulation.
//!
//! Scheduled task demand is `desired_task_count * task_demand`, so the
//! instance pool loop sees the scaling loop's decisions the same way it
//! would through a real task service. Failures can be injected per
//! capability call for a fixed number of calls.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use qscale_core::{BackendError, BackendResult, BacklogSource, InstancePool, TaskService};

#[derive(Debug, Default)]
struct FailurePlan {
    remaining: u32,
    error: Option<BackendError>,
}

impl FailurePlan {
    fn arm(&mut self, times: u32, error: BackendError) {
        self.remaining = times;
        self.error = Some(error);
    }

    /// Consume one injected failure, if any are left.
    fn take(&mut self) -> Option<BackendError> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        self.error.clone()
    }
}

#[derive(Debug, Default)]
struct ClusterState {
    backlog: HashMap<String, f64>,
    desired: HashMap<String, u32>,
    pools: HashMap<String, u32>,
    task_update_calls: u64,
    pool_update_calls: u64,
    backlog_failures: FailurePlan,
    task_update_failures: FailurePlan,
    demand_failures: FailurePlan,
    pool_update_failures: FailurePlan,
}

pub struct InMemoryCluster {
    /// Demand one scheduled task places on the pool.
    task_demand: f64,
    state: RwLock<ClusterState>,
}

impl InMemoryCluster {
    pub fn new(task_demand: f64) -> Self {
        Self {
            task_demand,
            state: RwLock::new(ClusterState::default()),
        }
    }

    pub async fn set_backlog(&self, queue_id: &str, depth: f64) {
        self.state
            .write()
            .await
            .backlog
            .insert(queue_id.to_string(), depth);
    }

    pub async fn desired_task_count(&self, service_id: &str) -> Option<u32> {
        self.state.read().await.desired.get(service_id).copied()
    }

    /// Set the desired count directly, as an operator would.
    pub async fn set_desired_task_count(&self, service_id: &str, count: u32) {
        self.state
            .write()
            .await
            .desired
            .insert(service_id.to_string(), count);
    }

    pub async fn pool_size(&self, pool_id: &str) -> Option<u32> {
        self.state.read().await.pools.get(pool_id).copied()
    }

    pub async fn set_pool_size(&self, pool_id: &str, count: u32) {
        self.state
            .write()
            .await
            .pools
            .insert(pool_id.to_string(), count);
    }

    pub async fn task_update_calls(&self) -> u64 {
        self.state.read().await.task_update_calls
    }

    pub async fn pool_update_calls(&self) -> u64 {
        self.state.read().await.pool_update_calls
    }

    pub async fn fail_backlog_reads(&self, times: u32, error: BackendError) {
        self.state.write().await.backlog_failures.arm(times, error);
    }

    pub async fn fail_task_updates(&self, times: u32, error: BackendError) {
        self.state.write().await.task_update_failures.arm(times, error);
    }

    pub async fn fail_demand_reads(&self, times: u32, error: BackendError) {
        self.state.write().await.demand_failures.arm(times, error);
    }

    pub async fn fail_pool_updates(&self, times: u32, error: BackendError) {
        self.state.write().await.pool_update_failures.arm(times, error);
    }
}

#[async_trait]
impl BacklogSource for InMemoryCluster {
    async fn sample_backlog(&self, queue_id: &str) -> BackendResult<f64> {
        let mut state = self.state.write().await;
        if let Some(err) = state.backlog_failures.take() {
            return Err(err);
        }
        Ok(state.backlog.get(queue_id).copied().unwrap_or(0.0))
    }
}

#[async_trait]
impl TaskService for InMemoryCluster {
    async fn set_desired_task_count(&self, service_id: &str, count: u32) -> BackendResult<()> {
        let mut state = self.state.write().await;
        state.task_update_calls += 1;
        if let Some(err) = state.task_update_failures.take() {
            return Err(err);
        }
        debug!(service = service_id, count, "simulated desired task count set");
        state.desired.insert(service_id.to_string(), count);
        Ok(())
    }

    async fn scheduled_task_demand(&self, service_id: &str) -> BackendResult<f64> {
        let mut state = self.state.write().await;
        if let Some(err) = state.demand_failures.take() {
            return Err(err);
        }
        let desired = state.desired.get(service_id).copied().unwrap_or(0);
        Ok(f64::from(desired) * self.task_demand)
    }
}

#[async_trait]
impl InstancePool for InMemoryCluster {
    async fn set_instance_pool_size(&self, pool_id: &str, count: u32) -> BackendResult<()> {
        let mut state = self.state.write().await;
        state.pool_update_calls += 1;
        if let Some(err) = state.pool_update_failures.take() {
            return Err(err);
        }
        debug!(pool = pool_id, count, "simulated instance pool resized");
        state.pools.insert(pool_id.to_string(), count);
        Ok(())
    }

    async fn instance_pool_size(&self, pool_id: &str) -> BackendResult<u32> {
        Ok(self.state.read().await.pools.get(pool_id).copied().unwrap_or(0))
    }
}
