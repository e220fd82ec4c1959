//! cgroup v2 metric generator
//!
//! Reads resource usage of the agent's own cgroup from the unified hierarchy:
//! - cpu.stat for CPU usage (as a percentage between two samples) and throttling
//! - memory.current for current memory usage
//! - memory.stat for the working set and page cache breakdown

use super::{Generator, MetricGenerator};
use crate::models::{GraphDef, GraphDefMetric, MetricValues};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Instant;
use tokio::fs;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy)]
struct CpuSample {
    usage_usec: u64,
    at: Instant,
}

/// Metric generator for the cgroup v2 unified hierarchy
pub struct CgroupGenerator {
    cgroup_root: PathBuf,
    proc_path: PathBuf,
    previous: Mutex<Option<CpuSample>>,
}

impl CgroupGenerator {
    pub fn new(cgroup_root: impl Into<PathBuf>) -> Self {
        Self::with_proc_path(cgroup_root, "/proc")
    }

    /// Create generator with custom proc path (for testing)
    pub fn with_proc_path(cgroup_root: impl Into<PathBuf>, proc_path: impl Into<PathBuf>) -> Self {
        Self {
            cgroup_root: cgroup_root.into(),
            proc_path: proc_path.into(),
            previous: Mutex::new(None),
        }
    }

    /// Parse cpu.stat file contents
    /// Returns (usage_usec, throttled_periods)
    pub fn parse_cpu_stat(content: &str) -> (u64, u64) {
        let mut usage_usec = 0u64;
        let mut throttled_periods = 0u64;

        for line in content.lines() {
            let mut parts = line.split_whitespace();
            match (parts.next(), parts.next()) {
                (Some("usage_usec"), Some(v)) => usage_usec = v.parse().unwrap_or(0),
                (Some("nr_throttled"), Some(v)) => throttled_periods = v.parse().unwrap_or(0),
                _ => {}
            }
        }

        (usage_usec, throttled_periods)
    }

    /// Parse memory.stat file contents into stat name to value
    pub fn parse_memory_stat(content: &str) -> HashMap<String, u64> {
        content
            .lines()
            .filter_map(|line| {
                let mut parts = line.split_whitespace();
                let key = parts.next()?;
                let value = parts.next()?.parse::<u64>().ok()?;
                Some((key.to_string(), value))
            })
            .collect()
    }

    /// Extract the cgroup v2 path ("0::/path") from /proc/<pid>/cgroup contents
    pub fn parse_proc_cgroup(content: &str) -> Option<String> {
        content.lines().find_map(|line| {
            let parts: Vec<&str> = line.splitn(3, ':').collect();
            (parts.len() == 3 && parts[0] == "0").then(|| parts[2].to_string())
        })
    }

    /// CPU usage in percent of one core between two cumulative readings
    pub fn cpu_percent(previous_usec: u64, current_usec: u64, elapsed_usec: u64) -> Option<f64> {
        if elapsed_usec == 0 || current_usec < previous_usec {
            return None;
        }
        Some((current_usec - previous_usec) as f64 / elapsed_usec as f64 * 100.0)
    }

    async fn own_cgroup_path(&self) -> Result<PathBuf> {
        let cgroup_file = self.proc_path.join("self/cgroup");
        let content = fs::read_to_string(&cgroup_file)
            .await
            .with_context(|| format!("Failed to read {}", cgroup_file.display()))?;
        let relative = Self::parse_proc_cgroup(&content)
            .with_context(|| format!("No cgroup v2 entry in {}", cgroup_file.display()))?;
        Ok(self.cgroup_root.join(relative.trim_start_matches('/')))
    }

    async fn read_cgroup_value(cgroup_path: &Path, filename: &str) -> Result<u64> {
        let file_path = cgroup_path.join(filename);
        let content = fs::read_to_string(&file_path)
            .await
            .with_context(|| format!("Failed to read {}", file_path.display()))?;
        content
            .trim()
            .parse()
            .with_context(|| format!("Failed to parse {} value", filename))
    }
}

#[async_trait]
impl Generator for CgroupGenerator {
    type Output = MetricValues;

    fn name(&self) -> &str {
        "cgroup"
    }

    async fn generate(&self, _cancel: &CancellationToken) -> Result<MetricValues> {
        let cgroup_path = self.own_cgroup_path().await?;
        let mut values = MetricValues::new();

        let cpu_stat = fs::read_to_string(cgroup_path.join("cpu.stat"))
            .await
            .with_context(|| format!("Failed to read cpu.stat under {}", cgroup_path.display()))?;
        let (usage_usec, throttled_periods) = Self::parse_cpu_stat(&cpu_stat);
        let now = Instant::now();

        let previous = self
            .previous
            .lock()
            .map_err(|_| anyhow::anyhow!("cpu sample lock poisoned"))?
            .replace(CpuSample {
                usage_usec,
                at: now,
            });
        if let Some(previous) = previous {
            let elapsed = now.duration_since(previous.at).as_micros() as u64;
            if let Some(percent) = Self::cpu_percent(previous.usage_usec, usage_usec, elapsed) {
                values.insert("container.cpu.usage".to_string(), percent);
            }
        }
        values.insert(
            "container.cpu.throttled_periods".to_string(),
            throttled_periods as f64,
        );

        let memory_current = Self::read_cgroup_value(&cgroup_path, "memory.current").await?;
        let memory_stat = fs::read_to_string(cgroup_path.join("memory.stat"))
            .await
            .unwrap_or_default();
        let memory_stats = Self::parse_memory_stat(&memory_stat);

        // Working set = current - inactive_file
        let inactive_file = memory_stats.get("inactive_file").copied().unwrap_or(0);
        let cache = memory_stats.get("file").copied().unwrap_or(0);

        values.insert("container.memory.usage".to_string(), memory_current as f64);
        values.insert(
            "container.memory.working_set".to_string(),
            memory_current.saturating_sub(inactive_file) as f64,
        );
        values.insert("container.memory.cache".to_string(), cache as f64);

        Ok(values)
    }
}

#[async_trait]
impl MetricGenerator for CgroupGenerator {
    async fn graph_defs(&self) -> Result<Vec<GraphDef>> {
        let metric = |name: &str, display_name: &str| GraphDefMetric {
            name: name.to_string(),
            display_name: display_name.to_string(),
            is_stacked: false,
        };

        Ok(vec![
            GraphDef {
                name: "container.cpu".to_string(),
                display_name: "Container CPU".to_string(),
                unit: "percentage".to_string(),
                metrics: vec![metric("container.cpu.usage", "Usage")],
            },
            GraphDef {
                name: "container.memory".to_string(),
                display_name: "Container Memory".to_string(),
                unit: "bytes".to_string(),
                metrics: vec![
                    metric("container.memory.usage", "Usage"),
                    metric("container.memory.working_set", "Working set"),
                    metric("container.memory.cache", "Cache"),
                ],
            },
        ])
    }
}
