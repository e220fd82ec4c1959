//! Core data models for the telemetry agent

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Lifecycle status of a host record at the monitoring backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostStatus {
    Working,
    Standby,
    Maintenance,
    Poweroff,
}

impl HostStatus {
    /// Statuses a host may carry while it is still considered alive
    pub const ACTIVE: [HostStatus; 4] = [
        HostStatus::Working,
        HostStatus::Standby,
        HostStatus::Maintenance,
        HostStatus::Poweroff,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            HostStatus::Working => "working",
            HostStatus::Standby => "standby",
            HostStatus::Maintenance => "maintenance",
            HostStatus::Poweroff => "poweroff",
        }
    }
}

impl fmt::Display for HostStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Host record as returned by the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Host {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<HostStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_identifier: Option<String>,
}

/// Descriptive fields sent when creating or updating a host
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostParams {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default)]
    pub memo: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_identifier: Option<String>,
    #[serde(default)]
    pub meta: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub role_fullnames: Vec<String>,
    #[serde(default)]
    pub checks: Vec<CheckConfig>,
}

/// Check monitor declaration attached to the host spec
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckConfig {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memo: Option<String>,
}

/// Output of one spec generator: a partial document plus an optional hostname
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HostSpec {
    pub meta: serde_json::Map<String, serde_json::Value>,
    pub hostname: Option<String>,
}

/// Named metric values produced by one metric generator
pub type MetricValues = HashMap<String, f64>;

/// A single metric sample ready for delivery
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricValue {
    pub name: String,
    pub time: i64,
    pub value: f64,
}

/// Metric sample stamped with its destination host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostMetricValue {
    pub host_id: String,
    #[serde(flatten)]
    pub value: MetricValue,
}

/// Severity of a check result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CheckStatus {
    Ok,
    Warning,
    Critical,
    Unknown,
}

impl CheckStatus {
    /// Map a plugin exit code to a check status
    pub fn from_exit_code(code: Option<i32>) -> Self {
        match code {
            Some(0) => CheckStatus::Ok,
            Some(1) => CheckStatus::Warning,
            Some(2) => CheckStatus::Critical,
            _ => CheckStatus::Unknown,
        }
    }
}

/// Origin of a check report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckSource {
    #[serde(rename = "type")]
    pub kind: String,
    pub host_id: String,
}

impl CheckSource {
    pub fn host(host_id: impl Into<String>) -> Self {
        Self {
            kind: "host".to_string(),
            host_id: host_id.into(),
        }
    }
}

/// Result of one check execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckReport {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<CheckSource>,
    pub name: String,
    pub status: CheckStatus,
    pub message: String,
    pub occurred_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notification_interval: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_check_attempts: Option<u32>,
}

/// Graph definition describing how a group of metrics is rendered
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphDef {
    pub name: String,
    pub display_name: String,
    pub unit: String,
    pub metrics: Vec<GraphDefMetric>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphDefMetric {
    pub name: String,
    pub display_name: String,
    #[serde(default)]
    pub is_stacked: bool,
}
