//! Agent library for host and container telemetry
//!
//! This crate provides the core functionality for:
//! - Host identity resolution and persistence
//! - Pluggable metric, check and spec collection
//! - Destination-gated, bounded delivery to the monitoring backend
//! - Supervision of the startup sequence and collection loops
//! - Health checks and observability

pub mod collector;
pub mod group;
pub mod health;
pub mod host;
pub mod manager;
pub mod models;
pub mod observability;
pub mod orchestrator;
pub mod platform;
pub mod plugin;
pub mod retry;
pub mod sync;

#[cfg(test)]
pub(crate) mod testing;

pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use host::{HostResolver, IdFile, ResolveError};
pub use models::*;
pub use observability::{AgentMetrics, StructuredLogger};
pub use orchestrator::{ManagerConfigs, Orchestrator, OrchestratorBuilder, RunConfig};
