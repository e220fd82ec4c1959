//! Environment the agent runs in
//!
//! A [`Platform`] supplies the metric and spec generators for its
//! environment plus the signals used to gate startup. A
//! [`ReadinessProbe`] optionally holds startup until the workload is up.

use crate::collector::{CgroupGenerator, MetricGenerator, SpecGenerator, SystemSpecGenerator};
use anyhow::Result;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[async_trait]
pub trait Platform: Send + Sync {
    fn metric_generators(&self) -> Vec<Arc<dyn MetricGenerator>>;

    fn spec_generators(&self) -> Vec<Arc<SpecGenerator>>;

    /// Identifier the platform assigns to this host, used to adopt an existing record
    async fn custom_identifier(&self, cancel: &CancellationToken) -> Result<Option<String>>;

    /// Whether the monitored workload has started
    async fn is_running(&self, cancel: &CancellationToken) -> bool;
}

#[async_trait]
pub trait ReadinessProbe: Send + Sync {
    async fn check(&self, cancel: &CancellationToken) -> Result<()>;

    fn initial_delay(&self) -> Duration;

    fn period(&self) -> Duration;
}

/// Plain Linux host: the agent's own cgroup plus procfs host facts
#[derive(Debug, Clone)]
pub struct HostPlatform {
    cgroup_root: PathBuf,
    proc_path: PathBuf,
    custom_identifier: Option<String>,
}

impl Default for HostPlatform {
    fn default() -> Self {
        Self::new("/sys/fs/cgroup", "/proc")
    }
}

impl HostPlatform {
    pub fn new(cgroup_root: impl Into<PathBuf>, proc_path: impl Into<PathBuf>) -> Self {
        Self {
            cgroup_root: cgroup_root.into(),
            proc_path: proc_path.into(),
            custom_identifier: None,
        }
    }

    pub fn with_custom_identifier(mut self, custom_identifier: Option<String>) -> Self {
        self.custom_identifier = custom_identifier.filter(|id| !id.is_empty());
        self
    }
}

#[async_trait]
impl Platform for HostPlatform {
    fn metric_generators(&self) -> Vec<Arc<dyn MetricGenerator>> {
        vec![Arc::new(CgroupGenerator::with_proc_path(
            self.cgroup_root.clone(),
            self.proc_path.clone(),
        ))]
    }

    fn spec_generators(&self) -> Vec<Arc<SpecGenerator>> {
        vec![Arc::new(SystemSpecGenerator::new(self.proc_path.clone()))]
    }

    async fn custom_identifier(&self, _cancel: &CancellationToken) -> Result<Option<String>> {
        Ok(self.custom_identifier.clone())
    }

    async fn is_running(&self, _cancel: &CancellationToken) -> bool {
        true
    }
}
