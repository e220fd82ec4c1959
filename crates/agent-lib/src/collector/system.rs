//! Host spec generator backed by procfs

use super::Generator;
use crate::models::HostSpec;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::json;
use std::path::PathBuf;
use tokio::fs;
use tokio_util::sync::CancellationToken;

/// Reports hostname, kernel release and CPU count
pub struct SystemSpecGenerator {
    proc_path: PathBuf,
}

impl Default for SystemSpecGenerator {
    fn default() -> Self {
        Self::new("/proc")
    }
}

impl SystemSpecGenerator {
    pub fn new(proc_path: impl Into<PathBuf>) -> Self {
        Self {
            proc_path: proc_path.into(),
        }
    }

    async fn read_kernel_value(&self, name: &str) -> Result<String> {
        let path = self.proc_path.join("sys/kernel").join(name);
        let content = fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Ok(content.trim().to_string())
    }
}

#[async_trait]
impl Generator for SystemSpecGenerator {
    type Output = HostSpec;

    fn name(&self) -> &str {
        "system"
    }

    async fn generate(&self, _cancel: &CancellationToken) -> Result<HostSpec> {
        let hostname = self.read_kernel_value("hostname").await?;
        let kernel_release = self.read_kernel_value("osrelease").await?;
        let cpu_count = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);

        let mut meta = serde_json::Map::new();
        meta.insert(
            "kernel".to_string(),
            json!({ "release": kernel_release, "name": std::env::consts::OS }),
        );
        meta.insert(
            "cpu".to_string(),
            json!({ "count": cpu_count, "arch": std::env::consts::ARCH }),
        );

        Ok(HostSpec {
            meta,
            hostname: (!hostname.is_empty()).then_some(hostname),
        })
    }
}
