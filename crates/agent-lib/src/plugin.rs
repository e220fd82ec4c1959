//! Shell command checks and readiness probes

use crate::collector::Generator;
use crate::models::{CheckConfig, CheckReport, CheckStatus};
use crate::platform::ReadinessProbe;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Longest check message reported to the backend, in bytes
pub const MAX_MESSAGE_BYTES: usize = 1024;

pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Captured result of one command run
#[derive(Debug, Clone, PartialEq)]
pub struct CommandOutput {
    pub exit_code: Option<i32>,
    /// stdout followed by stderr
    pub output: String,
    pub timed_out: bool,
}

/// Run `command` through `sh -c`, killing it on timeout or cancellation
pub async fn run_command(
    command: &str,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<CommandOutput> {
    let child = Command::new("sh")
        .arg("-c")
        .arg(command)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("Failed to spawn `{}`", command))?;

    tokio::select! {
        output = child.wait_with_output() => {
            let output = output.with_context(|| format!("Failed to run `{}`", command))?;
            let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
            text.push_str(&String::from_utf8_lossy(&output.stderr));
            Ok(CommandOutput {
                exit_code: output.status.code(),
                output: text,
                timed_out: false,
            })
        }
        _ = tokio::time::sleep(timeout) => Ok(CommandOutput {
            exit_code: None,
            output: format!("command timed out after {}s", timeout.as_secs()),
            timed_out: true,
        }),
        _ = cancel.cancelled() => bail!("`{}` cancelled", command),
    }
}

/// Cut `s` to at most `max` bytes on a char boundary
pub fn truncate_utf8(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Check monitor backed by a shell command.
///
/// Exit codes 0/1/2 map to OK/WARNING/CRITICAL; anything else, a signal
/// or a timeout is UNKNOWN.
#[derive(Debug, Clone)]
pub struct CommandCheck {
    name: String,
    command: String,
    timeout: Duration,
    memo: Option<String>,
    notification_interval: Option<u32>,
    max_check_attempts: Option<u32>,
}

impl CommandCheck {
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            timeout: DEFAULT_COMMAND_TIMEOUT,
            memo: None,
            notification_interval: None,
            max_check_attempts: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_memo(mut self, memo: Option<String>) -> Self {
        self.memo = memo;
        self
    }

    pub fn with_notification_interval(mut self, minutes: Option<u32>) -> Self {
        self.notification_interval = minutes;
        self
    }

    pub fn with_max_check_attempts(mut self, attempts: Option<u32>) -> Self {
        self.max_check_attempts = attempts;
        self
    }

    /// Declaration attached to the host spec
    pub fn config(&self) -> CheckConfig {
        CheckConfig {
            name: self.name.clone(),
            memo: self.memo.clone(),
        }
    }
}

#[async_trait]
impl Generator for CommandCheck {
    type Output = CheckReport;

    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(&self, cancel: &CancellationToken) -> Result<CheckReport> {
        let result = run_command(&self.command, self.timeout, cancel).await?;
        let status = if result.timed_out {
            CheckStatus::Unknown
        } else {
            CheckStatus::from_exit_code(result.exit_code)
        };
        debug!(check = %self.name, ?status, exit_code = ?result.exit_code, "Check finished");

        Ok(CheckReport {
            source: None,
            name: self.name.clone(),
            status,
            message: truncate_utf8(&result.output, MAX_MESSAGE_BYTES).to_string(),
            occurred_at: chrono::Utc::now().timestamp(),
            notification_interval: self.notification_interval,
            max_check_attempts: self.max_check_attempts,
        })
    }
}

/// Readiness probe that succeeds once a shell command exits 0
#[derive(Debug, Clone)]
pub struct CommandProbe {
    command: String,
    timeout: Duration,
    initial_delay: Duration,
    period: Duration,
}

impl CommandProbe {
    pub fn new(command: impl Into<String>, initial_delay: Duration, period: Duration) -> Self {
        Self {
            command: command.into(),
            timeout: DEFAULT_COMMAND_TIMEOUT,
            initial_delay,
            period,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl ReadinessProbe for CommandProbe {
    async fn check(&self, cancel: &CancellationToken) -> Result<()> {
        let result = run_command(&self.command, self.timeout, cancel).await?;
        match result.exit_code {
            Some(0) if !result.timed_out => Ok(()),
            _ => bail!(
                "readiness command exited with {:?}: {}",
                result.exit_code,
                truncate_utf8(result.output.trim(), MAX_MESSAGE_BYTES)
            ),
        }
    }

    fn initial_delay(&self) -> Duration {
        self.initial_delay
    }

    fn period(&self) -> Duration {
        self.period
    }
}
