//! Agent configuration

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use telemetry_agent_lib::HostStatus;

/// Agent configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// API key for the monitoring backend
    #[serde(default)]
    pub apikey: String,

    /// Base URL of the monitoring backend
    #[serde(default = "default_apibase")]
    pub apibase: String,

    /// Directory holding the persisted host id
    #[serde(default = "default_root")]
    pub root: PathBuf,

    /// API server port for health/metrics
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Host name used when no spec generator reports one
    #[serde(default = "default_hostname")]
    pub hostname: String,

    #[serde(default)]
    pub display_name: Option<String>,

    #[serde(default)]
    pub memo: String,

    /// Role full names ("service:role")
    #[serde(default)]
    pub roles: Vec<String>,

    /// Identifier used to adopt an existing host record
    #[serde(default)]
    pub custom_identifier: Option<String>,

    /// Status forced on the host after startup
    #[serde(default)]
    pub host_status: Option<HostStatus>,

    #[serde(default = "default_cgroup_root")]
    pub cgroup_root: PathBuf,

    #[serde(default = "default_proc_path")]
    pub proc_path: PathBuf,

    #[serde(default)]
    pub readiness: Option<ReadinessConfig>,

    #[serde(default)]
    pub checks: Vec<CheckPluginConfig>,
}

/// Command that must succeed before the agent registers the host
#[derive(Debug, Clone, Deserialize)]
pub struct ReadinessConfig {
    pub command: String,
    #[serde(default)]
    pub initial_delay_secs: u64,
    #[serde(default = "default_probe_period")]
    pub period_secs: u64,
    #[serde(default = "default_command_timeout")]
    pub timeout_secs: u64,
}

impl ReadinessConfig {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_secs(self.initial_delay_secs)
    }

    pub fn period(&self) -> Duration {
        Duration::from_secs(self.period_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Check monitor run as a shell command
#[derive(Debug, Clone, Deserialize)]
pub struct CheckPluginConfig {
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub memo: Option<String>,
    #[serde(default = "default_command_timeout")]
    pub timeout_secs: u64,
    /// Minutes between re-notifications
    #[serde(default)]
    pub notification_interval: Option<u32>,
    #[serde(default)]
    pub max_check_attempts: Option<u32>,
}

fn default_apibase() -> String {
    "https://api.example-monitoring.io".to_string()
}

fn default_root() -> PathBuf {
    PathBuf::from("/var/tmp/telemetry-agent")
}

fn default_api_port() -> u16 {
    8080
}

fn default_hostname() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string())
}

fn default_cgroup_root() -> PathBuf {
    PathBuf::from("/sys/fs/cgroup")
}

fn default_proc_path() -> PathBuf {
    PathBuf::from("/proc")
}

fn default_probe_period() -> u64 {
    10
}

fn default_command_timeout() -> u64 {
    30
}

impl AgentConfig {
    /// Load configuration from an optional file, then `AGENT_*` environment variables
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let settings = builder
            .add_source(config::Environment::with_prefix("AGENT"))
            .build()
            .context("Failed to load configuration")?;

        let config: AgentConfig = settings
            .try_deserialize()
            .context("Invalid configuration")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.apikey.trim().is_empty() {
            bail!("apikey is required (set it in the config file or AGENT_APIKEY)");
        }
        if self.apibase.trim().is_empty() {
            bail!("apibase must not be empty");
        }
        for check in &self.checks {
            if check.name.is_empty() || check.command.is_empty() {
                bail!("every check needs a name and a command");
            }
        }
        Ok(())
    }
}
