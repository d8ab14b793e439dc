//! External capabilities the controller consumes.
//!
//! The controller never talks to infrastructure directly; it drives these
//! traits. Implementations must be idempotent for the setters: the loops
//! re-issue the same count freely (on reaffirmation and on retry).

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{BackendError, BackendResult};

/// Reads the current backlog depth of a queue.
#[async_trait]
pub trait BacklogSource: Send + Sync {
    async fn sample_backlog(&self, queue_id: &str) -> BackendResult<f64>;
}

/// The workload whose desired task count is being driven.
#[async_trait]
pub trait TaskService: Send + Sync {
    /// `count` is always pre-clamped by the caller.
    async fn set_desired_task_count(&self, service_id: &str, count: u32) -> BackendResult<()>;

    /// Resource demand of tasks scheduled (running or waiting for capacity).
    async fn scheduled_task_demand(&self, service_id: &str) -> BackendResult<f64>;
}

/// The compute instance pool backing the tasks.
#[async_trait]
pub trait InstancePool: Send + Sync {
    /// `count` is always pre-clamped and pre-stepped by the caller.
    async fn set_instance_pool_size(&self, pool_id: &str, count: u32) -> BackendResult<()>;

    /// Observed pool size; used to seed and refresh the provider's view.
    async fn instance_pool_size(&self, pool_id: &str) -> BackendResult<u32>;
}

/// Run a capability call under a deadline; an elapsed deadline becomes
/// [`BackendError::Timeout`].
pub async fn with_timeout<T, F>(limit: Duration, call: F) -> BackendResult<T>
where
    F: Future<Output = BackendResult<T>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(BackendError::Timeout(limit)),
    }
}
