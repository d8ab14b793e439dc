//! qscale-core: shared model for the queue-depth capacity controller.
//!
//! Holds the data model (samples, alarm states, step tables, capacity
//! bounds), the static configuration surface and its validation, the
//! error taxonomy, and the four external capabilities the controller
//! drives.

pub mod capability;
pub mod config;
pub mod error;
pub mod types;

pub use capability::{BacklogSource, InstancePool, TaskService, with_timeout};
pub use config::{BackendConfig, ControllerConfig, ControllerSettings, parse_duration};
pub use error::{BackendError, BackendResult, ConfigError, ControllerError};
pub use types::*;
