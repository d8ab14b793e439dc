//! Domain types shared by the sampler, the alarm evaluator, the scaling
//! policy, and the two capacity loops.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Seconds since the Unix epoch.
pub type Epoch = u64;

// ── Samples and alarms ─────────────────────────────────────────────

/// One backlog depth reading for a queue.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BacklogSample {
    /// When the sample was taken.
    pub epoch: Epoch,
    /// Pending units of work at that instant.
    pub depth: f64,
}

/// Discrete alarm state derived from the sample window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlarmState {
    Ok,
    Alarm,
    #[default]
    InsufficientData,
}

impl AlarmState {
    pub fn label(&self) -> &'static str {
        match self {
            AlarmState::Ok => "OK",
            AlarmState::Alarm => "ALARM",
            AlarmState::InsufficientData => "INSUFFICIENT_DATA",
        }
    }

    /// The scaling direction this state is allowed to trigger.
    pub fn direction(&self) -> Option<ScaleDirection> {
        match self {
            AlarmState::Ok => Some(ScaleDirection::In),
            AlarmState::Alarm => Some(ScaleDirection::Out),
            AlarmState::InsufficientData => None,
        }
    }
}

/// Window aggregate compared against the alarm threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Statistic {
    #[default]
    Sum,
    Average,
    Maximum,
    Minimum,
    SampleCount,
}

impl Statistic {
    /// Aggregate a non-empty set of sample depths.
    pub fn aggregate(&self, values: &[f64]) -> f64 {
        if values.is_empty() {
            return 0.0;
        }
        match self {
            Statistic::Sum => values.iter().sum(),
            Statistic::Average => values.iter().sum::<f64>() / values.len() as f64,
            Statistic::Maximum => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            Statistic::Minimum => values.iter().copied().fold(f64::INFINITY, f64::min),
            Statistic::SampleCount => values.len() as f64,
        }
    }
}

/// How a missing sample (a failed read) enters the alarm window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingData {
    /// Counts against the evaluation-period requirement.
    #[default]
    Missing,
    /// Treated as an empty queue.
    NotBreaching,
    /// Skipped; the alarm keeps its previous state.
    Ignore,
}

// ── Step scaling ───────────────────────────────────────────────────

/// Which way a step moves task capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScaleDirection {
    In,
    Out,
}

/// Exact task count a step scales to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawStepTarget", into = "RawStepTarget")]
pub enum StepTarget {
    Exact(u32),
    /// The configured task maximum.
    Max,
}

impl StepTarget {
    pub fn resolve(&self, task_max: u32) -> u32 {
        match self {
            StepTarget::Exact(n) => *n,
            StepTarget::Max => task_max,
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum RawStepTarget {
    Count(u32),
    Keyword(String),
}

impl TryFrom<RawStepTarget> for StepTarget {
    type Error = String;

    fn try_from(raw: RawStepTarget) -> Result<Self, Self::Error> {
        match raw {
            RawStepTarget::Count(n) => Ok(StepTarget::Exact(n)),
            RawStepTarget::Keyword(s) if s == "max" => Ok(StepTarget::Max),
            RawStepTarget::Keyword(s) => {
                Err(format!("invalid step target {s:?}: expected a count or \"max\""))
            }
        }
    }
}

impl From<StepTarget> for RawStepTarget {
    fn from(target: StepTarget) -> Self {
        match target {
            StepTarget::Exact(n) => RawStepTarget::Count(n),
            StepTarget::Max => RawStepTarget::Keyword("max".to_string()),
        }
    }
}

/// One interval of the step table. Both bounds are inclusive; a missing
/// bound is unbounded on that side.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StepAdjustment {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lower_bound: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upper_bound: Option<f64>,
    pub direction: ScaleDirection,
    pub target: StepTarget,
}

impl StepAdjustment {
    pub fn lower(&self) -> f64 {
        self.lower_bound.unwrap_or(f64::NEG_INFINITY)
    }

    pub fn upper(&self) -> f64 {
        self.upper_bound.unwrap_or(f64::INFINITY)
    }

    pub fn contains(&self, magnitude: f64) -> bool {
        magnitude >= self.lower() && magnitude <= self.upper()
    }
}

/// Ordered, gap-free, non-overlapping set of step intervals.
///
/// Adjacent steps may share their boundary value; [`StepTable::resolve`]
/// decides deterministically which one wins there.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepTable {
    steps: Vec<StepAdjustment>,
}

impl StepTable {
    /// Validate and sort a set of steps.
    pub fn new(mut steps: Vec<StepAdjustment>) -> Result<Self, ConfigError> {
        if steps.is_empty() {
            return Err(ConfigError::EmptyStepTable);
        }

        for (index, step) in steps.iter().enumerate() {
            if step.lower_bound.is_some_and(f64::is_nan) || step.upper_bound.is_some_and(f64::is_nan)
            {
                return Err(ConfigError::NanBound { index });
            }
            if step.lower() > step.upper() {
                return Err(ConfigError::InvertedStep {
                    index,
                    lower: step.lower(),
                    upper: step.upper(),
                });
            }
        }

        steps.sort_by(|a, b| {
            a.lower()
                .total_cmp(&b.lower())
                .then(a.upper().total_cmp(&b.upper()))
        });

        let first = steps[0];
        if first.lower() != f64::NEG_INFINITY {
            return Err(ConfigError::UncoveredBelow(first.lower()));
        }

        for pair in steps.windows(2) {
            let (below, above) = (pair[0], pair[1]);
            if above.lower() > below.upper() {
                return Err(ConfigError::StepGap {
                    upper: below.upper(),
                    lower: above.lower(),
                });
            }
            if above.lower() < below.upper() {
                return Err(ConfigError::StepOverlap {
                    lower: above.lower(),
                    upper: below.upper(),
                });
            }
        }

        if let Some(last) = steps.last()
            && last.upper() != f64::INFINITY
        {
            return Err(ConfigError::UncoveredAbove(last.upper()));
        }

        Ok(Self { steps })
    }

    /// The reference table: `<= 1 -> 0` on scale-in, `>= 1 -> max` on scale-out.
    pub fn reference() -> Self {
        Self {
            steps: default_steps(),
        }
    }

    pub fn steps(&self) -> &[StepAdjustment] {
        &self.steps
    }

    /// The step covering the lowest magnitudes.
    pub fn lowest(&self) -> &StepAdjustment {
        &self.steps[0]
    }

    /// Find the step for `magnitude`.
    ///
    /// At a shared boundary both neighbours match. The one whose direction
    /// equals `preferred` wins; otherwise scale-out wins. NaN matches nothing.
    pub fn resolve(
        &self,
        magnitude: f64,
        preferred: Option<ScaleDirection>,
    ) -> Option<&StepAdjustment> {
        let candidates: Vec<&StepAdjustment> =
            self.steps.iter().filter(|s| s.contains(magnitude)).collect();

        match candidates.as_slice() {
            [] => None,
            [only] => Some(*only),
            _ => {
                let pick = |direction: ScaleDirection| {
                    candidates
                        .iter()
                        .rev()
                        .find(|s| s.direction == direction)
                        .copied()
                };
                preferred
                    .and_then(pick)
                    .or_else(|| pick(ScaleDirection::Out))
                    .or_else(|| candidates.last().copied())
            }
        }
    }
}

pub(crate) fn default_steps() -> Vec<StepAdjustment> {
    vec![
        StepAdjustment {
            lower_bound: None,
            upper_bound: Some(1.0),
            direction: ScaleDirection::In,
            target: StepTarget::Exact(0),
        },
        StepAdjustment {
            lower_bound: Some(1.0),
            upper_bound: None,
            direction: ScaleDirection::Out,
            target: StepTarget::Max,
        },
    ]
}

// ── Capacity ───────────────────────────────────────────────────────

/// Inclusive min/max for a capacity knob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapacityBounds {
    pub min: u32,
    pub max: u32,
}

impl CapacityBounds {
    pub fn new(field: &'static str, min: u32, max: u32) -> Result<Self, ConfigError> {
        if min > max {
            return Err(ConfigError::InvertedBounds { field, min, max });
        }
        Ok(Self { min, max })
    }

    /// Out-of-range values are clamped, never rejected.
    pub fn clamp(&self, value: u32) -> u32 {
        value.max(self.min).min(self.max)
    }
}

/// Share of instance capacity that scheduled tasks should consume, in
/// percent. Always in `(0, 100]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UtilizationTarget(u32);

impl UtilizationTarget {
    pub fn new(percent: u32) -> Result<Self, ConfigError> {
        if percent == 0 || percent > 100 {
            return Err(ConfigError::UtilizationOutOfRange(percent));
        }
        Ok(Self(percent))
    }

    pub fn percent(&self) -> u32 {
        self.0
    }

    /// Multiplier applied to raw demand: `100 / percent`.
    pub fn headroom_factor(&self) -> f64 {
        100.0 / self.0 as f64
    }
}

// ── Decisions ──────────────────────────────────────────────────────

/// A target task count chosen by the step policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScalingDecision {
    pub target: u32,
    pub direction: ScaleDirection,
    /// When the decision was made.
    pub epoch: Epoch,
}

/// Why an evaluation produced no decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoActionReason {
    InsufficientData,
    NoMatchingStep,
    /// The matching step moves the other way from the alarm state.
    DirectionMismatch,
}

/// Result of one step policy evaluation. Every evaluation yields one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PolicyOutcome {
    /// A new target to apply.
    Decided(ScalingDecision),
    /// Same target as the last applied decision; re-issued, cooldown untouched.
    Reaffirmed(ScalingDecision),
    /// Cooldown active; the decision was evaluated and dropped.
    Suppressed { target: u32, remaining_secs: u64 },
    NoAction { reason: NoActionReason },
}

impl PolicyOutcome {
    /// The decision to hand to the task controller, if any.
    pub fn decision(&self) -> Option<ScalingDecision> {
        match self {
            PolicyOutcome::Decided(d) | PolicyOutcome::Reaffirmed(d) => Some(*d),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            PolicyOutcome::Decided(_) => "decided",
            PolicyOutcome::Reaffirmed(_) => "reaffirmed",
            PolicyOutcome::Suppressed { .. } => "suppressed",
            PolicyOutcome::NoAction { .. } => "no_action",
        }
    }
}

// ── Status ─────────────────────────────────────────────────────────

/// Published by the alarm/step loop after every cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScalingStatus {
    pub queue_id: String,
    pub service_id: String,
    pub last_sample: Option<BacklogSample>,
    pub alarm_state: AlarmState,
    pub last_outcome: Option<PolicyOutcome>,
    /// Last task count successfully applied.
    pub desired_task_count: Option<u32>,
    /// Decision awaiting a retry after a failed apply.
    pub pending_target: Option<u32>,
    pub suppressed_decisions: u64,
    pub missing_samples: u64,
    pub consecutive_apply_failures: u32,
    pub degraded: bool,
    pub updated_at: Epoch,
}

/// Published by the instance capacity loop after every reconciliation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PoolStatus {
    pub pool_id: String,
    pub last_demand: Option<f64>,
    pub required_instances: Option<u32>,
    pub pool_size: Option<u32>,
    pub stale_demand_reads: u64,
    pub consecutive_apply_failures: u32,
    pub degraded: bool,
    pub updated_at: Epoch,
}
