//! Capability implementations for the qscale controller.
//!
//! - [`InMemoryCluster`] simulates a queue, a task service and an instance
//!   pool in process. Used by `kind = "memory"` and throughout the tests.
//! - [`HttpBackend`] talks JSON over HTTP/1.1 to an external agent that
//!   fronts the real infrastructure.

pub mod http;
pub mod memory;

pub use http::HttpBackend;
pub use memory::InMemoryCluster;
