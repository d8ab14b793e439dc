//! Alarm evaluator: turns a stream of backlog samples into an alarm state.
//!
//! Keeps a sliding window of the last `evaluation_periods` samples. The
//! window aggregate (sum by default) strictly above the threshold is
//! ALARM, at or below is OK, and a window with fewer than N present
//! samples is INSUFFICIENT_DATA. Every call re-emits the current state,
//! changed or not, so the scaling policy can re-affirm its decision.

use std::collections::VecDeque;

use tracing::{debug, info};

use qscale_core::config::AlarmConfig;
use qscale_core::{AlarmState, Epoch, MissingData};

/// Emitted once per recorded sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlarmEvaluation {
    pub epoch: Epoch,
    pub state: AlarmState,
    pub previous: AlarmState,
    /// Window aggregate; `None` while data is insufficient.
    pub magnitude: Option<f64>,
    pub changed: bool,
}

#[derive(Debug)]
pub struct AlarmEvaluator {
    config: AlarmConfig,
    /// Oldest first. `None` marks a missing sample.
    window: VecDeque<Option<f64>>,
    state: AlarmState,
    magnitude: Option<f64>,
}

impl AlarmEvaluator {
    pub fn new(config: AlarmConfig) -> Self {
        let periods = config.evaluation_periods.max(1) as usize;
        Self {
            config,
            window: VecDeque::with_capacity(periods),
            state: AlarmState::InsufficientData,
            magnitude: None,
        }
    }

    pub fn state(&self) -> AlarmState {
        self.state
    }

    fn periods(&self) -> usize {
        self.config.evaluation_periods.max(1) as usize
    }

    /// Feed one sampling period. `depth` is `None` when the read failed.
    pub fn record(&mut self, epoch: Epoch, depth: Option<f64>) -> AlarmEvaluation {
        let previous = self.state;

        let slot = match (depth, self.config.treat_missing_data) {
            (Some(d), _) => Some(d),
            (None, MissingData::Missing) => None,
            (None, MissingData::NotBreaching) => Some(0.0),
            (None, MissingData::Ignore) => {
                debug!(state = previous.label(), "missing sample ignored");
                return AlarmEvaluation {
                    epoch,
                    state: previous,
                    previous,
                    magnitude: self.magnitude,
                    changed: false,
                };
            }
        };

        self.window.push_back(slot);
        while self.window.len() > self.periods() {
            self.window.pop_front();
        }

        let present: Vec<f64> = self.window.iter().flatten().copied().collect();
        let (state, magnitude) = if present.len() < self.periods() {
            (AlarmState::InsufficientData, None)
        } else {
            let aggregate = self.config.statistic.aggregate(&present);
            let state = if aggregate > self.config.threshold {
                AlarmState::Alarm
            } else {
                AlarmState::Ok
            };
            (state, Some(aggregate))
        };

        self.state = state;
        self.magnitude = magnitude;
        let changed = state != previous;

        if changed {
            info!(
                from = previous.label(),
                to = state.label(),
                magnitude = ?magnitude,
                threshold = self.config.threshold,
                "alarm state changed"
            );
        } else {
            debug!(state = state.label(), magnitude = ?magnitude, "alarm state unchanged");
        }

        AlarmEvaluation {
            epoch,
            state,
            previous,
            magnitude,
            changed,
        }
    }
}
