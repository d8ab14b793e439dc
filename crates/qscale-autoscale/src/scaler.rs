//! Scaling loop: sample, evaluate, decide, apply.
//!
//! Fires once per sampling period. Each tick takes one backlog sample,
//! feeds the alarm window, asks the step policy for an outcome, and hands
//! any decision to the task controller. A decision whose apply failed is
//! kept as pending and re-issued on a later tick unless a newer decision
//! supersedes it.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use qscale_core::{
    AlarmState, BacklogSample, BacklogSource, ControllerSettings, Epoch, PolicyOutcome,
    ScalingDecision, ScalingStatus, TaskService,
};
use qscale_metrics::{AlarmEvaluator, MetricSampler};

use crate::clock::LoopClock;
use crate::failures::FailureTracker;
use crate::policy::StepScalingPolicy;
use crate::tasks::TaskCapacityController;

pub struct ScalingLoop {
    sampler: MetricSampler,
    evaluator: AlarmEvaluator,
    policy: StepScalingPolicy,
    tasks: TaskCapacityController,
    failures: FailureTracker,
    /// Decision whose apply failed, awaiting retry.
    pending: Option<ScalingDecision>,
    suppressed: u64,
    interval: Duration,
    status_tx: watch::Sender<ScalingStatus>,
}

impl ScalingLoop {
    pub fn new(
        settings: &ControllerSettings,
        source: Arc<dyn BacklogSource>,
        service: Arc<dyn TaskService>,
    ) -> Self {
        let (status_tx, _) = watch::channel(ScalingStatus {
            queue_id: settings.queue_id.clone(),
            service_id: settings.service_id.clone(),
            ..ScalingStatus::default()
        });

        Self {
            sampler: MetricSampler::new(source, &settings.queue_id, settings.call_timeout),
            evaluator: AlarmEvaluator::new(settings.alarm),
            policy: StepScalingPolicy::new(
                settings.step_table.clone(),
                settings.task_bounds,
                settings.cooldown,
            ),
            tasks: TaskCapacityController::new(
                service,
                &settings.service_id,
                settings.task_bounds,
                settings.call_timeout,
            ),
            failures: FailureTracker::new("tasks", settings.degraded_after),
            pending: None,
            suppressed: 0,
            interval: settings.sample_interval,
            status_tx,
        }
    }

    /// Watch the status published after every tick.
    pub fn subscribe(&self) -> watch::Receiver<ScalingStatus> {
        self.status_tx.subscribe()
    }

    pub fn status(&self) -> ScalingStatus {
        self.status_tx.borrow().clone()
    }

    /// Run one sampling period at `now`.
    pub async fn tick(&mut self, now: Epoch) -> PolicyOutcome {
        let sample = self.sampler.sample(now).await;
        let evaluation = self.evaluator.record(now, sample.map(|s| s.depth));
        let outcome = self.policy.evaluate(&evaluation);

        let to_apply = match outcome {
            PolicyOutcome::Decided(decision) => {
                info!(
                    queue = %self.sampler.queue_id(),
                    target = decision.target,
                    direction = ?decision.direction,
                    magnitude = ?evaluation.magnitude,
                    "scaling decision"
                );
                Some(decision)
            }
            PolicyOutcome::Reaffirmed(decision) => Some(decision),
            PolicyOutcome::Suppressed {
                target,
                remaining_secs,
            } => {
                self.suppressed += 1;
                info!(
                    queue = %self.sampler.queue_id(),
                    target,
                    remaining_secs,
                    "scaling decision suppressed by cooldown"
                );
                // A failed re-issue of the current count is still owed.
                self.pending
                    .filter(|d| Some(d.target) == self.policy.current_target())
            }
            PolicyOutcome::NoAction { reason } => {
                debug!(queue = %self.sampler.queue_id(), reason = ?reason, "no scaling action");
                self.pending
            }
        };

        if let Some(decision) = to_apply {
            match self.tasks.apply(&decision).await {
                Ok(_) => {
                    self.policy.record_applied(&decision, now);
                    self.pending = None;
                    self.failures.record_success();
                }
                Err(e) => {
                    warn!(
                        service = %self.tasks.service_id(),
                        target = decision.target,
                        error = %e,
                        "desired task count update failed, will retry next period"
                    );
                    self.pending = Some(decision);
                    self.failures.record_failure();
                }
            }
        }

        self.publish(now, sample, evaluation.state, outcome);
        outcome
    }

    fn publish(
        &self,
        now: Epoch,
        sample: Option<BacklogSample>,
        alarm_state: AlarmState,
        outcome: PolicyOutcome,
    ) {
        let previous_sample = self.status_tx.borrow().last_sample;
        self.status_tx.send_replace(ScalingStatus {
            queue_id: self.sampler.queue_id().to_string(),
            service_id: self.tasks.service_id().to_string(),
            last_sample: sample.or(previous_sample),
            alarm_state,
            last_outcome: Some(outcome),
            desired_task_count: self.tasks.applied(),
            pending_target: self.pending.map(|d| d.target),
            suppressed_decisions: self.suppressed,
            missing_samples: self.sampler.missing_samples(),
            consecutive_apply_failures: self.failures.consecutive(),
            degraded: self.failures.degraded(),
            updated_at: now,
        });
    }

    /// Run the scaling loop until the shutdown signal.
    ///
    /// Shutdown is only observed between ticks, so a capacity change that
    /// is in flight completes before the loop exits.
    pub async fn run(mut self, clock: LoopClock, mut shutdown: watch::Receiver<bool>) {
        info!(
            queue = %self.sampler.queue_id(),
            interval_secs = self.interval.as_secs(),
            "scaling loop started"
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick(clock.now()).await;
                }
                _ = shutdown.changed() => {
                    info!("scaling loop shutting down");
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
    use qscale_core::{BackendError, ControllerConfig, NoActionReason};

    fn settings() -> ControllerSettings {
        let mut config = ControllerConfig::default();
        config.controller.queue_id = "jobs".to_string();
        config.controller.service_id = "worker".to_string();
        config.controller.degraded_after = 2;
        config.validate().unwrap()
    }

    fn scaling_loop(cluster: &Arc<InMemoryCluster>) -> ScalingLoop {
        ScalingLoop::new(&settings(), cluster.clone(), cluster.clone())
    }

    #[tokio::test]
    async fn idle_queue_settles_at_zero() {
        let cluster = Arc::new(InMemoryCluster::new(1.0));
        let mut s = scaling_loop(&cluster);

        for t in [0, 30, 60] {
            s.tick(t).await;
        }
        assert_eq!(cluster.desired_task_count("worker").await, Some(0));
        assert_eq!(s.status().alarm_state, AlarmState::Ok);
    }

    #[tokio::test]
    async fn backlog_scales_out_within_one_period() {
        let cluster = Arc::new(InMemoryCluster::new(1.0));
        let mut s = scaling_loop(&cluster);
        s.tick(0).await;

        cluster.set_backlog("jobs", 5.0).await;
        let outcome = s.tick(30).await;
        assert!(matches!(outcome, PolicyOutcome::Decided(d) if d.target == 3));
        assert_eq!(cluster.desired_task_count("worker").await, Some(3));
    }

    #[tokio::test]
    async fn cooldown_holds_capacity_then_releases() {
        let cluster = Arc::new(InMemoryCluster::new(1.0));
        let mut s = scaling_loop(&cluster);

        cluster.set_backlog("jobs", 5.0).await;
        s.tick(100).await;

        cluster.set_backlog("jobs", 0.0).await;
        let held = s.tick(110).await;
        assert!(matches!(held, PolicyOutcome::Suppressed { target: 0, remaining_secs: 20 }));
        assert_eq!(cluster.desired_task_count("worker").await, Some(3));
        assert_eq!(s.status().suppressed_decisions, 1);

        let released = s.tick(130).await;
        assert!(matches!(released, PolicyOutcome::Decided(d) if d.target == 0));
        assert_eq!(cluster.desired_task_count("worker").await, Some(0));
    }

    #[tokio::test]
    async fn missing_sample_is_not_fatal() {
        let cluster = Arc::new(InMemoryCluster::new(1.0));
        let mut s = scaling_loop(&cluster);
        cluster
            .fail_backlog_reads(1, BackendError::Unavailable("sqs".into()))
            .await;

        let outcome = s.tick(0).await;
        assert_eq!(
            outcome,
            PolicyOutcome::NoAction {
                reason: NoActionReason::InsufficientData
            }
        );
        let status = s.status();
        assert_eq!(status.alarm_state, AlarmState::InsufficientData);
        assert_eq!(status.missing_samples, 1);

        // Recovers on the next period.
        s.tick(30).await;
        assert_eq!(s.status().alarm_state, AlarmState::Ok);
    }

    #[tokio::test]
    async fn failed_apply_is_retried_and_degrades() {
        let cluster = Arc::new(InMemoryCluster::new(1.0));
        let mut s = scaling_loop(&cluster);
        cluster.set_backlog("jobs", 5.0).await;
        cluster
            .fail_task_updates(2, BackendError::Unavailable("ecs".into()))
            .await;

        s.tick(0).await;
        let status = s.status();
        assert_eq!(status.pending_target, Some(3));
        assert_eq!(status.consecutive_apply_failures, 1);
        assert!(!status.degraded);

        s.tick(30).await;
        assert!(s.status().degraded);

        // Third attempt goes through and clears the signal.
        s.tick(60).await;
        let status = s.status();
        assert_eq!(cluster.desired_task_count("worker").await, Some(3));
        assert_eq!(status.pending_target, None);
        assert!(!status.degraded);
    }

    #[tokio::test]
    async fn pending_decision_retried_on_insufficient_data() {
        let cluster = Arc::new(InMemoryCluster::new(1.0));
        let mut s = scaling_loop(&cluster);
        cluster.set_backlog("jobs", 5.0).await;
        cluster
            .fail_task_updates(1, BackendError::Unavailable("ecs".into()))
            .await;
        s.tick(0).await;

        cluster
            .fail_backlog_reads(1, BackendError::Unavailable("sqs".into()))
            .await;
        let outcome = s.tick(30).await;
        assert!(matches!(outcome, PolicyOutcome::NoAction { .. }));
        assert_eq!(cluster.desired_task_count("worker").await, Some(3));
    }

    #[tokio::test]
    async fn failed_reaffirm_is_retried_during_cooldown() {
        let cluster = Arc::new(InMemoryCluster::new(1.0));
        let mut s = scaling_loop(&cluster);
        cluster.set_backlog("jobs", 5.0).await;
        s.tick(0).await;

        // Someone moved the service; the re-issue that would pull it back fails.
        cluster.set_desired_task_count("worker", 1).await;
        cluster
            .fail_task_updates(1, BackendError::Unavailable("ecs".into()))
            .await;
        let outcome = s.tick(10).await;
        assert!(matches!(outcome, PolicyOutcome::Reaffirmed(d) if d.target == 3));
        assert_eq!(s.status().pending_target, Some(3));

        // Backlog cleared but the scale-in is held; the owed count still lands.
        cluster.set_backlog("jobs", 0.0).await;
        let outcome = s.tick(20).await;
        assert!(matches!(outcome, PolicyOutcome::Suppressed { target: 0, .. }));
        assert_eq!(cluster.desired_task_count("worker").await, Some(3));
        assert_eq!(s.status().pending_target, None);
    }

    #[tokio::test(start_paused = true)]
    async fn run_stops_on_shutdown() {
        let cluster = Arc::new(InMemoryCluster::new(1.0));
        let s = scaling_loop(&cluster);
        let status = s.subscribe();
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(s.run(LoopClock::starting_at(0), rx));
        tokio::time::sleep(Duration::from_secs(61)).await;

        tx.send(true).unwrap();
        handle.await.unwrap();

        // Ticks at 0, 30, 60.
        assert_eq!(status.borrow().updated_at, 60);
        assert_eq!(cluster.desired_task_count("worker").await, Some(0));
    }
}
