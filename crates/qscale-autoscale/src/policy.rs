//! Step scaling policy: maps an alarm evaluation to a target task count.
//!
//! The policy owns the cooldown clock. A change of target is only allowed
//! once `cooldown` has elapsed since the last applied change; the check
//! is `elapsed >= cooldown`, so a decision exactly at the boundary passes.
//! Re-issuing the currently applied target is always allowed and never
//! restarts the cooldown.

use std::time::Duration;

use tracing::debug;

use qscale_core::{
    CapacityBounds, Epoch, NoActionReason, PolicyOutcome, ScalingDecision, StepTable,
};
use qscale_metrics::AlarmEvaluation;

/// Last change the task controller confirmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct AppliedChange {
    target: u32,
    applied_at: Epoch,
}

#[derive(Debug)]
pub struct StepScalingPolicy {
    table: StepTable,
    /// Decided targets are clamped to these, so cooldown tracks the
    /// count the service actually receives.
    task_bounds: CapacityBounds,
    cooldown_secs: u64,
    /// Starts empty: no cooldown is active after a restart.
    last_change: Option<AppliedChange>,
}

impl StepScalingPolicy {
    pub fn new(table: StepTable, task_bounds: CapacityBounds, cooldown: Duration) -> Self {
        Self {
            table,
            task_bounds,
            cooldown_secs: cooldown.as_secs(),
            last_change: None,
        }
    }

    /// Evaluate one alarm emission. Does not mutate: the cooldown only
    /// starts once [`record_applied`](Self::record_applied) confirms the change.
    pub fn evaluate(&self, eval: &AlarmEvaluation) -> PolicyOutcome {
        let (Some(direction), Some(magnitude)) = (eval.state.direction(), eval.magnitude) else {
            return PolicyOutcome::NoAction {
                reason: NoActionReason::InsufficientData,
            };
        };

        let Some(step) = self.table.resolve(magnitude, Some(direction)) else {
            return PolicyOutcome::NoAction {
                reason: NoActionReason::NoMatchingStep,
            };
        };

        if step.direction != direction {
            debug!(
                state = eval.state.label(),
                magnitude,
                step_direction = ?step.direction,
                "matching step moves against the alarm state"
            );
            return PolicyOutcome::NoAction {
                reason: NoActionReason::DirectionMismatch,
            };
        }

        let decision = ScalingDecision {
            target: self
                .task_bounds
                .clamp(step.target.resolve(self.task_bounds.max)),
            direction,
            epoch: eval.epoch,
        };

        if let Some(last) = self.last_change {
            if last.target == decision.target {
                return PolicyOutcome::Reaffirmed(decision);
            }
            let elapsed = eval.epoch.saturating_sub(last.applied_at);
            if elapsed < self.cooldown_secs {
                return PolicyOutcome::Suppressed {
                    target: decision.target,
                    remaining_secs: self.cooldown_secs - elapsed,
                };
            }
        }

        PolicyOutcome::Decided(decision)
    }

    /// Confirm that `decision` reached the task service at `applied_at`.
    ///
    /// Re-applying the current target leaves the cooldown clock alone.
    pub fn record_applied(&mut self, decision: &ScalingDecision, applied_at: Epoch) {
        match self.last_change {
            Some(last) if last.target == decision.target => {}
            _ => {
                self.last_change = Some(AppliedChange {
                    target: decision.target,
                    applied_at,
                });
            }
        }
    }

    /// Seconds left before a new target may be applied.
    pub fn cooldown_remaining(&self, now: Epoch) -> u64 {
        self.last_change
            .map(|last| {
                self.cooldown_secs
                    .saturating_sub(now.saturating_sub(last.applied_at))
            })
            .unwrap_or(0)
    }

    /// Target of the last applied change.
    pub fn current_target(&self) -> Option<u32> {
        self.last_change.map(|last| last.target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qscale_core::{AlarmState, ScaleDirection, StepAdjustment, StepTarget};

    fn policy(cooldown_secs: u64) -> StepScalingPolicy {
        StepScalingPolicy::new(
            StepTable::reference(),
            CapacityBounds { min: 0, max: 3 },
            Duration::from_secs(cooldown_secs),
        )
    }

    fn eval(epoch: Epoch, state: AlarmState, magnitude: Option<f64>) -> AlarmEvaluation {
        AlarmEvaluation {
            epoch,
            state,
            previous: state,
            magnitude,
            changed: false,
        }
    }

    fn apply(p: &mut StepScalingPolicy, outcome: PolicyOutcome, at: Epoch) {
        let decision = outcome.decision().expect("expected a decision");
        p.record_applied(&decision, at);
    }

    #[test]
    fn ok_scales_to_lowest_step() {
        let p = policy(30);
        let outcome = p.evaluate(&eval(0, AlarmState::Ok, Some(0.0)));
        assert_eq!(
            outcome,
            PolicyOutcome::Decided(ScalingDecision {
                target: 0,
                direction: ScaleDirection::In,
                epoch: 0,
            })
        );
    }

    #[test]
    fn alarm_scales_to_max() {
        let p = policy(30);
        let outcome = p.evaluate(&eval(0, AlarmState::Alarm, Some(5.0)));
        assert_eq!(outcome.decision().unwrap().target, 3);
        assert_eq!(outcome.decision().unwrap().direction, ScaleDirection::Out);
    }

    #[test]
    fn insufficient_data_is_no_action() {
        let p = policy(30);
        assert_eq!(
            p.evaluate(&eval(0, AlarmState::InsufficientData, None)),
            PolicyOutcome::NoAction {
                reason: NoActionReason::InsufficientData
            }
        );
    }

    #[test]
    fn second_change_within_cooldown_is_suppressed() {
        let mut p = policy(30);
        let first = p.evaluate(&eval(100, AlarmState::Alarm, Some(5.0)));
        apply(&mut p, first, 100);

        let second = p.evaluate(&eval(110, AlarmState::Ok, Some(0.0)));
        assert_eq!(
            second,
            PolicyOutcome::Suppressed {
                target: 0,
                remaining_secs: 20
            }
        );
        assert_eq!(p.cooldown_remaining(110), 20);
    }

    #[test]
    fn change_exactly_at_cooldown_boundary_applies() {
        let mut p = policy(30);
        let first = p.evaluate(&eval(100, AlarmState::Alarm, Some(5.0)));
        apply(&mut p, first, 100);

        let at_boundary = p.evaluate(&eval(130, AlarmState::Ok, Some(0.0)));
        assert!(matches!(at_boundary, PolicyOutcome::Decided(d) if d.target == 0));
        assert_eq!(p.cooldown_remaining(130), 0);
    }

    #[test]
    fn reaffirm_does_not_restart_cooldown() {
        let mut p = policy(30);
        let first = p.evaluate(&eval(100, AlarmState::Alarm, Some(5.0)));
        apply(&mut p, first, 100);

        let again = p.evaluate(&eval(120, AlarmState::Alarm, Some(9.0)));
        assert!(matches!(again, PolicyOutcome::Reaffirmed(d) if d.target == 3));
        apply(&mut p, again, 120);

        // Cooldown still measured from t=100.
        let change = p.evaluate(&eval(130, AlarmState::Ok, Some(0.0)));
        assert!(matches!(change, PolicyOutcome::Decided(d) if d.target == 0));
    }

    #[test]
    fn unapplied_decision_does_not_start_cooldown() {
        let p = policy(30);
        let first = p.evaluate(&eval(100, AlarmState::Alarm, Some(5.0)));
        assert!(matches!(first, PolicyOutcome::Decided(_)));

        // Never recorded as applied: the next change is free.
        let second = p.evaluate(&eval(105, AlarmState::Ok, Some(0.0)));
        assert!(matches!(second, PolicyOutcome::Decided(d) if d.target == 0));
    }

    #[test]
    fn boundary_magnitude_resolves_to_one_target() {
        let p = policy(30);
        // Reference threshold is 0, so a magnitude of 1 is ALARM.
        let outcome = p.evaluate(&eval(0, AlarmState::Alarm, Some(1.0)));
        assert_eq!(outcome.decision().unwrap().target, 3);

        // With a higher threshold the same value could be OK; then scale-in wins.
        let outcome = p.evaluate(&eval(0, AlarmState::Ok, Some(1.0)));
        assert_eq!(outcome.decision().unwrap().target, 0);
    }

    #[test]
    fn step_against_alarm_direction_is_no_action() {
        let p = policy(30);
        // Positive but below the out-step's lower bound.
        assert_eq!(
            p.evaluate(&eval(0, AlarmState::Alarm, Some(0.5))),
            PolicyOutcome::NoAction {
                reason: NoActionReason::DirectionMismatch
            }
        );
    }

    #[test]
    fn exact_targets_from_multi_step_table() {
        let table = StepTable::new(vec![
            StepAdjustment {
                lower_bound: None,
                upper_bound: Some(10.0),
                direction: ScaleDirection::In,
                target: StepTarget::Exact(1),
            },
            StepAdjustment {
                lower_bound: Some(10.0),
                upper_bound: Some(100.0),
                direction: ScaleDirection::Out,
                target: StepTarget::Exact(4),
            },
            StepAdjustment {
                lower_bound: Some(100.0),
                upper_bound: None,
                direction: ScaleDirection::Out,
                target: StepTarget::Max,
            },
        ])
        .unwrap();
        let p = StepScalingPolicy::new(table, CapacityBounds { min: 1, max: 8 }, Duration::ZERO);

        let mid = p.evaluate(&eval(0, AlarmState::Alarm, Some(50.0)));
        assert_eq!(mid.decision().unwrap().target, 4);

        // Shared boundary between two out-steps: the upper one wins.
        let edge = p.evaluate(&eval(0, AlarmState::Alarm, Some(100.0)));
        assert_eq!(edge.decision().unwrap().target, 8);
    }

    fn clamped_table() -> StepTable {
        StepTable::new(vec![
            StepAdjustment {
                lower_bound: None,
                upper_bound: Some(1.0),
                direction: ScaleDirection::In,
                target: StepTarget::Exact(0),
            },
            StepAdjustment {
                lower_bound: Some(1.0),
                upper_bound: Some(10.0),
                direction: ScaleDirection::Out,
                target: StepTarget::Exact(5),
            },
            StepAdjustment {
                lower_bound: Some(10.0),
                upper_bound: None,
                direction: ScaleDirection::Out,
                target: StepTarget::Max,
            },
        ])
        .unwrap()
    }

    #[test]
    fn steps_clamping_to_the_same_count_are_reaffirmed() {
        let mut p = StepScalingPolicy::new(
            clamped_table(),
            CapacityBounds { min: 0, max: 3 },
            Duration::from_secs(30),
        );

        // Exact(5) clamps to the task max of 3.
        let first = p.evaluate(&eval(0, AlarmState::Alarm, Some(5.0)));
        assert!(matches!(first, PolicyOutcome::Decided(d) if d.target == 3));
        apply(&mut p, first, 0);

        // The max step lands on the same count.
        let higher = p.evaluate(&eval(10, AlarmState::Alarm, Some(20.0)));
        assert!(matches!(higher, PolicyOutcome::Reaffirmed(d) if d.target == 3));
        apply(&mut p, higher, 10);

        let lower = p.evaluate(&eval(40, AlarmState::Alarm, Some(5.0)));
        assert!(matches!(lower, PolicyOutcome::Reaffirmed(d) if d.target == 3));
        apply(&mut p, lower, 40);

        // Cooldown still runs from t=0, so scale-in is free at t=50.
        let scale_in = p.evaluate(&eval(50, AlarmState::Ok, Some(0.0)));
        assert!(matches!(scale_in, PolicyOutcome::Decided(d) if d.target == 0));
    }

    #[test]
    fn exact_target_below_task_min_is_raised() {
        let p = StepScalingPolicy::new(
            StepTable::reference(),
            CapacityBounds { min: 1, max: 3 },
            Duration::from_secs(30),
        );
        let outcome = p.evaluate(&eval(0, AlarmState::Ok, Some(0.0)));
        assert_eq!(outcome.decision().unwrap().target, 1);
    }

    #[test]
    fn zero_cooldown_never_suppresses() {
        let mut p = policy(0);
        let first = p.evaluate(&eval(100, AlarmState::Alarm, Some(5.0)));
        apply(&mut p, first, 100);
        let second = p.evaluate(&eval(100, AlarmState::Ok, Some(0.0)));
        assert!(matches!(second, PolicyOutcome::Decided(d) if d.target == 0));
    }
}
