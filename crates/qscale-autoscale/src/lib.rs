//! qscale-autoscale: queue-depth-driven capacity control.
//!
//! Two independent loops drive two capacity knobs:
//!
//! ```text
//! ScalingLoop (every sample_interval)
//!   MetricSampler → AlarmEvaluator → StepScalingPolicy → TaskCapacityController
//!                                                              │
//!                                   desired task count (external service)
//!                                                              │
//! PoolLoop (every reconcile_interval)                          ▼
//!   scheduled_task_demand() → InstanceCapacityProvider → set_instance_pool_size()
//! ```
//!
//! The loops share no in-process state. The pool loop only sees the task
//! loop's effect through the demand the task service reports, so it may
//! lag by one reconciliation period.
//!
//! # Scaling Algorithm
//!
//! ```text
//! alarm  = aggregate(last N samples) > threshold
//! step   = step_table.resolve(aggregate, alarm direction)
//! if step.direction != alarm direction:          NoAction
//! if step.target == last applied target:         Reaffirmed (cooldown untouched)
//! if now - last applied change < cooldown:       Suppressed
//! else:                                          Decided → clamp(min, max) → apply
//!
//! required  = demand <= 0 ? 0 : ceil(demand / capacity_per_instance * 100 / utilization)
//! scale-out = current + clamp(required - current, step_min, step_max), capped at max
//! scale-in  = current - min(current - required, step_max)
//! ```

pub mod clock;
pub mod controller;
pub mod failures;
pub mod instances;
pub mod policy;
pub mod pool_loop;
pub mod scaler;
pub mod tasks;

pub use controller::{Backends, Controller, StatusHandle};
pub use instances::{InstanceCapacityProvider, PoolAdjustment};
pub use policy::StepScalingPolicy;
pub use pool_loop::PoolLoop;
pub use scaler::ScalingLoop;
pub use tasks::{ApplyOutcome, TaskCapacityController};
