//! Controller: owns the two control loops and their shutdown signal.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use qscale_core::{
    BacklogSource, ControllerSettings, InstancePool, PoolStatus, ScalingStatus, TaskService,
};

use crate::clock::LoopClock;
use crate::pool_loop::PoolLoop;
use crate::scaler::ScalingLoop;

/// Capability implementations the loops talk to.
#[derive(Clone)]
pub struct Backends {
    pub queue: Arc<dyn BacklogSource>,
    pub tasks: Arc<dyn TaskService>,
    pub pool: Arc<dyn InstancePool>,
}

/// Read-only view of both loops' latest status.
#[derive(Clone)]
pub struct StatusHandle {
    scaling: watch::Receiver<ScalingStatus>,
    pool: watch::Receiver<PoolStatus>,
}

impl StatusHandle {
    pub fn new(scaling: watch::Receiver<ScalingStatus>, pool: watch::Receiver<PoolStatus>) -> Self {
        Self { scaling, pool }
    }

    pub fn scaling(&self) -> ScalingStatus {
        self.scaling.borrow().clone()
    }

    pub fn pool(&self) -> PoolStatus {
        self.pool.borrow().clone()
    }

    /// True when either loop has crossed its consecutive-failure threshold.
    pub fn degraded(&self) -> bool {
        self.scaling.borrow().degraded || self.pool.borrow().degraded
    }
}

pub struct Controller {
    shutdown_tx: watch::Sender<bool>,
    scaling: JoinHandle<()>,
    pool: JoinHandle<()>,
    status: StatusHandle,
}

impl Controller {
    /// Spawn the scaling and pool loops on the current runtime.
    pub fn start(settings: &ControllerSettings, backends: Backends) -> Self {
        let scaling_loop = ScalingLoop::new(settings, backends.queue, backends.tasks.clone());
        let pool_loop = PoolLoop::new(settings, backends.pool, backends.tasks);
        let status = StatusHandle::new(scaling_loop.subscribe(), pool_loop.subscribe());

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let clock = LoopClock::start();

        info!(
            queue = %settings.queue_id,
            service = %settings.service_id,
            pool = %settings.pool_id,
            "controller starting"
        );

        let scaling = tokio::spawn(scaling_loop.run(clock, shutdown_rx.clone()));
        let pool = tokio::spawn(pool_loop.run(clock, shutdown_rx));

        Self {
            shutdown_tx,
            scaling,
            pool,
            status,
        }
    }

    pub fn status(&self) -> StatusHandle {
        self.status.clone()
    }

    /// Signal both loops and wait for any in-flight tick to finish.
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(true);

        if let Err(e) = self.scaling.await {
            warn!(error = %e, "scaling loop task failed");
        }
        if let Err(e) = self.pool.await {
            warn!(error = %e, "pool loop task failed");
        }
        info!("controller stopped");
    }
}
