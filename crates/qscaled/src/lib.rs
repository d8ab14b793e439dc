//! qscaled library surface: backend wiring and the status router.
//!
//! Split from `main.rs` so integration tests can drive the router and
//! the backends without spawning the binary.

pub mod router;

use std::sync::Arc;

use qscale_autoscale::Backends;
use qscale_backend::{HttpBackend, InMemoryCluster};
use qscale_core::BackendConfig;

pub use router::build_router;

/// Build the capability implementations selected by `[backend]`.
pub fn build_backends(config: &BackendConfig) -> Backends {
    match config {
        BackendConfig::Memory { task_demand } => {
            let cluster = Arc::new(InMemoryCluster::new(*task_demand));
            Backends {
                queue: cluster.clone(),
                tasks: cluster.clone(),
                pool: cluster,
            }
        }
        BackendConfig::Http { address, base_path } => {
            let client = Arc::new(HttpBackend::new(address, base_path));
            Backends {
                queue: client.clone(),
                tasks: client.clone(),
                pool: client,
            }
        }
    }
}
