//! Synchronization with the monitoring backend
//!
//! This module provides:
//! - The [`BackendApi`] contract and its HTTP implementation
//! - Classified API errors driving retry decisions
//! - The destination-gated delivery queue shared by all subsystems

mod client;
mod error;
mod queue;


pub use client::{ClientConfig, HttpApiClient};
pub use error::ApiError;
pub use queue::{DeliveryOutcome, DeliveryQueue, QueueConfig, QueueStats, DEFAULT_WINDOW};

use crate::models::{CheckReport, GraphDef, Host, HostMetricValue, HostParams, HostStatus};
use async_trait::async_trait;

/// Operations the agent needs from the monitoring backend
#[async_trait]
pub trait BackendApi: Send + Sync {
    async fn find_host(&self, id: &str) -> Result<Host, ApiError>;

    /// Hosts carrying `custom_identifier` whose status is one of `statuses`
    async fn find_hosts(
        &self,
        custom_identifier: &str,
        statuses: &[HostStatus],
    ) -> Result<Vec<Host>, ApiError>;

    /// Create a host record and return its id
    async fn create_host(&self, params: &HostParams) -> Result<String, ApiError>;

    async fn update_host(&self, id: &str, params: &HostParams) -> Result<(), ApiError>;

    async fn update_host_status(&self, id: &str, status: HostStatus) -> Result<(), ApiError>;

    async fn retire_host(&self, id: &str) -> Result<(), ApiError>;

    async fn post_metric_values(&self, values: &[HostMetricValue]) -> Result<(), ApiError>;

    async fn post_graph_defs(&self, defs: &[GraphDef]) -> Result<(), ApiError>;

    async fn post_check_reports(&self, reports: &[CheckReport]) -> Result<(), ApiError>;
}

/// Posts one delivery window of a subsystem to the backend
#[async_trait]
pub trait Deliver: Send + Sync + 'static {
    type Item: Clone + Send + Sync + 'static;

    /// Subsystem name used in logs, metrics and health components
    const SUBSYSTEM: &'static str;

    /// Deliver `window` (the oldest queued items, in order) to `destination`.
    /// All-or-nothing: an error means none of the window counts as delivered.
    async fn deliver(&self, destination: &str, window: Vec<Self::Item>) -> Result<(), ApiError>;
}
