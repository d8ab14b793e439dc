//! Error types for the capacity controller.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Result type alias for external capability calls.
pub type BackendResult<T> = Result<T, BackendError>;

/// Errors raised while loading or validating the static configuration.
///
/// All of these are fatal at startup: the controller refuses to run
/// rather than make undefined decisions.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid duration for {field}: {value:?}")]
    InvalidDuration { field: &'static str, value: String },

    #[error("{0} must be greater than zero")]
    ZeroInterval(&'static str),

    #[error("scaling.cooldown must be a whole number of seconds, got {0:?}")]
    FractionalCooldown(String),

    #[error("{0} must not be empty")]
    MissingIdentifier(&'static str),

    #[error("{field}: min ({min}) exceeds max ({max})")]
    InvertedBounds {
        field: &'static str,
        min: u32,
        max: u32,
    },

    #[error("instance scaling step min must be at least 1")]
    ZeroScalingStep,

    #[error("utilization target must be in (0, 100], got {0}")]
    UtilizationOutOfRange(u32),

    #[error("capacity_per_instance must be a positive number, got {0}")]
    InvalidInstanceCapacity(f64),

    #[error("evaluation_periods must be at least 1")]
    ZeroEvaluationPeriods,

    #[error("alarm threshold must be a finite number")]
    InvalidThreshold,

    #[error("degraded_after must be at least 1")]
    ZeroDegradedAfter,

    #[error("step table is empty")]
    EmptyStepTable,

    #[error("step {index} has a NaN bound")]
    NanBound { index: usize },

    #[error("step {index}: lower bound {lower} exceeds upper bound {upper}")]
    InvertedStep { index: usize, lower: f64, upper: f64 },

    #[error("step table has a gap between {upper} and {lower}")]
    StepGap { upper: f64, lower: f64 },

    #[error("step table intervals overlap between {lower} and {upper}")]
    StepOverlap { lower: f64, upper: f64 },

    #[error("step table does not cover values below {0}")]
    UncoveredBelow(f64),

    #[error("step table does not cover values above {0}")]
    UncoveredAbove(f64),
}

/// Errors returned by an external capability (queue, task service, pool).
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BackendError {
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("call timed out after {0:?}")]
    Timeout(Duration),

    #[error("request rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("unknown resource: {0}")]
    NotFound(String),
}

/// How a failure inside a control loop is classified.
///
/// Only `Config` is fatal. `TransientRead` becomes a missing sample or a
/// stale demand reading; `Apply` is retried on the loop's next cycle.
#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("transient read failure: {0}")]
    TransientRead(BackendError),

    #[error("capacity change failed: {0}")]
    Apply(BackendError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl ControllerError {
    /// Whether the controller must stop instead of retrying.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ControllerError::Config(_))
    }
}
