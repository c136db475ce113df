//! Coordination core for the LAN compute platform.
//!
//! This crate has no I/O of its own: it owns the task queue, the node
//! registry, the scheduler loop, and the wire types shared by the
//! coordinator and worker binaries. `lancompute-coordinator` wraps it
//! in an axum service; `lancompute-worker` talks to that service as
//! an HTTP client.

pub mod coordinator;
pub mod error;
mod matching;
pub mod model;
mod queue;
mod registry;
pub mod scheduler;
pub mod wire;

pub use coordinator::{Coordinator, CoordinatorSnapshot, SharedCoordinator};
pub use error::CoreError;
pub use queue::TaskQueue;
pub use registry::{DetachOutcome, NodeRegistry};
