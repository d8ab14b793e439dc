//! qscale-metrics: from queue backlog to alarm state.
//!
//! # Architecture
//!
//! ```text
//! MetricSampler
//!   └── sample() → Option<BacklogSample>   (failed reads become None)
//!
//! AlarmEvaluator
//!   └── record(epoch, Option<depth>) → AlarmEvaluation
//!         sliding window of N samples, aggregate vs threshold
//!         OK | ALARM | INSUFFICIENT_DATA
//!
//! Prometheus exposition
//!   └── render_prometheus() → text/plain for /metrics endpoint
//! ```

pub mod alarm;
pub mod prometheus;
pub mod sampler;

pub use alarm::{AlarmEvaluation, AlarmEvaluator};
pub use prometheus::render_prometheus;
pub use sampler::MetricSampler;
