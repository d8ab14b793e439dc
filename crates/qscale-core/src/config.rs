//! qscale.toml configuration parser.
//!
//! The file is loaded once at startup. [`ControllerConfig::validate`]
//! turns the raw, serde-friendly form into [`ControllerSettings`], the
//! only form the control loops accept. Every field defaults to the
//! reference deployment: 30s sampling, alarm on any positive backlog,
//! 30s cooldown, tasks 0..3, instances 0..3 at 100% utilization.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::types::{
    CapacityBounds, MissingData, Statistic, StepAdjustment, StepTable, UtilizationTarget,
    default_steps,
};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    pub controller: LoopConfig,
    pub alarm: AlarmConfig,
    pub scaling: ScalingConfig,
    pub tasks: TaskConfig,
    pub instances: InstanceConfig,
    pub backend: BackendConfig,
}

/// Identifiers of the external resources and loop cadences.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopConfig {
    pub queue_id: String,
    pub service_id: String,
    pub pool_id: String,
    /// Backlog sampling period (e.g., "30s").
    pub sample_interval: String,
    /// Instance pool reconciliation period (e.g., "60s").
    pub reconcile_interval: String,
    /// Timeout applied to every capability call.
    pub call_timeout: String,
    /// Consecutive failed applies before a loop reports itself degraded.
    pub degraded_after: u32,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            queue_id: "work".to_string(),
            service_id: "worker".to_string(),
            pool_id: "worker-pool".to_string(),
            sample_interval: "30s".to_string(),
            reconcile_interval: "60s".to_string(),
            call_timeout: "10s".to_string(),
            degraded_after: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlarmConfig {
    /// Samples in the sliding window.
    pub evaluation_periods: u32,
    /// The alarm fires when the aggregate is strictly above this.
    pub threshold: f64,
    pub statistic: Statistic,
    pub treat_missing_data: MissingData,
}

impl Default for AlarmConfig {
    fn default() -> Self {
        Self {
            evaluation_periods: 1,
            threshold: 0.0,
            statistic: Statistic::Sum,
            treat_missing_data: MissingData::Missing,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScalingConfig {
    /// Minimum time between two applied changes (e.g., "30s").
    pub cooldown: String,
    pub steps: Vec<StepAdjustment>,
}

impl Default for ScalingConfig {
    fn default() -> Self {
        Self {
            cooldown: "30s".to_string(),
            steps: default_steps(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskConfig {
    pub min: u32,
    pub max: u32,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self { min: 0, max: 3 }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct InstanceConfig {
    pub min: u32,
    pub max: u32,
    /// Smallest scale-out adjustment, in instances.
    pub step_min: u32,
    /// Largest adjustment in either direction, in instances.
    pub step_max: u32,
    /// Percent of instance capacity tasks should consume.
    pub target_utilization: u32,
    /// Demand units a single instance can hold.
    pub capacity_per_instance: f64,
}

impl Default for InstanceConfig {
    fn default() -> Self {
        Self {
            min: 0,
            max: 3,
            step_min: 1,
            step_max: 3,
            target_utilization: 100,
            capacity_per_instance: 1.0,
        }
    }
}

/// Which implementation backs the external capabilities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackendConfig {
    /// In-process cluster for dry runs.
    Memory {
        #[serde(default = "default_task_demand")]
        task_demand: f64,
    },
    /// JSON over HTTP/1 against a capacity API.
    Http {
        /// host:port of the capacity API.
        address: String,
        #[serde(default)]
        base_path: String,
    },
}

impl Default for BackendConfig {
    fn default() -> Self {
        BackendConfig::Memory {
            task_demand: default_task_demand(),
        }
    }
}

fn default_task_demand() -> f64 {
    1.0
}

/// Validated, typed configuration consumed by the control loops.
#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub queue_id: String,
    pub service_id: String,
    pub pool_id: String,
    pub sample_interval: Duration,
    pub reconcile_interval: Duration,
    pub call_timeout: Duration,
    pub degraded_after: u32,
    pub alarm: AlarmConfig,
    pub cooldown: Duration,
    pub step_table: StepTable,
    pub task_bounds: CapacityBounds,
    pub instances: InstanceSettings,
}

#[derive(Debug, Clone, Copy)]
pub struct InstanceSettings {
    pub bounds: CapacityBounds,
    /// Per-adjustment step range, `min >= 1`.
    pub step: CapacityBounds,
    pub utilization: UtilizationTarget,
    pub capacity_per_instance: f64,
}

impl ControllerConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Read, parse, and validate in one step.
    pub fn load(path: &Path) -> Result<(Self, ControllerSettings), ConfigError> {
        let config = Self::from_file(path)?;
        let settings = config.validate()?;
        Ok((config, settings))
    }

    pub fn to_toml_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    /// Check every invariant of the configuration surface.
    pub fn validate(&self) -> Result<ControllerSettings, ConfigError> {
        let c = &self.controller;
        for (field, value) in [
            ("controller.queue_id", &c.queue_id),
            ("controller.service_id", &c.service_id),
            ("controller.pool_id", &c.pool_id),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::MissingIdentifier(field));
            }
        }
        if let BackendConfig::Http { address, .. } = &self.backend {
            if address.trim().is_empty() {
                return Err(ConfigError::MissingIdentifier("backend.address"));
            }
        }

        let sample_interval = nonzero_duration("controller.sample_interval", &c.sample_interval)?;
        let reconcile_interval =
            nonzero_duration("controller.reconcile_interval", &c.reconcile_interval)?;
        let call_timeout = nonzero_duration("controller.call_timeout", &c.call_timeout)?;
        if c.degraded_after == 0 {
            return Err(ConfigError::ZeroDegradedAfter);
        }

        if self.alarm.evaluation_periods == 0 {
            return Err(ConfigError::ZeroEvaluationPeriods);
        }
        if !self.alarm.threshold.is_finite() {
            return Err(ConfigError::InvalidThreshold);
        }

        let cooldown = parse_duration(&self.scaling.cooldown).ok_or_else(|| {
            ConfigError::InvalidDuration {
                field: "scaling.cooldown",
                value: self.scaling.cooldown.clone(),
            }
        })?;
        // Decision epochs are whole seconds.
        if cooldown.subsec_nanos() != 0 {
            return Err(ConfigError::FractionalCooldown(self.scaling.cooldown.clone()));
        }
        let step_table = StepTable::new(self.scaling.steps.clone())?;

        let task_bounds = CapacityBounds::new("tasks", self.tasks.min, self.tasks.max)?;

        let i = &self.instances;
        let bounds = CapacityBounds::new("instances", i.min, i.max)?;
        if i.step_min == 0 {
            return Err(ConfigError::ZeroScalingStep);
        }
        let step = CapacityBounds::new("instances.step", i.step_min, i.step_max)?;
        let utilization = UtilizationTarget::new(i.target_utilization)?;
        if !(i.capacity_per_instance.is_finite() && i.capacity_per_instance > 0.0) {
            return Err(ConfigError::InvalidInstanceCapacity(i.capacity_per_instance));
        }

        Ok(ControllerSettings {
            queue_id: c.queue_id.clone(),
            service_id: c.service_id.clone(),
            pool_id: c.pool_id.clone(),
            sample_interval,
            reconcile_interval,
            call_timeout,
            degraded_after: c.degraded_after,
            alarm: self.alarm,
            cooldown,
            step_table,
            task_bounds,
            instances: InstanceSettings {
                bounds,
                step,
                utilization,
                capacity_per_instance: i.capacity_per_instance,
            },
        })
    }
}

fn nonzero_duration(field: &'static str, value: &str) -> Result<Duration, ConfigError> {
    let d = parse_duration(value).ok_or_else(|| ConfigError::InvalidDuration {
        field,
        value: value.to_string(),
    })?;
    if d.is_zero() {
        return Err(ConfigError::ZeroInterval(field));
    }
    Ok(d)
}

/// Parse a duration string like "30s", "500ms", "5m".
///
/// A bare number is read as seconds.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(ms) = s.strip_suffix("ms") {
        ms.trim().parse::<u64>().ok().map(Duration::from_millis)
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.trim().parse::<u64>().ok().map(Duration::from_secs)
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.trim()
            .parse::<u64>()
            .ok()
            .map(|m| Duration::from_secs(m * 60))
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}
