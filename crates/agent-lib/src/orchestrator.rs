//! Top-level supervisor of the agent
//!
//! [`Orchestrator::run`] starts the three manager loops together with a
//! gated startup sequence:
//! 1. wait for the platform to report the workload running
//! 2. wait for the readiness probe, if one is configured
//! 3. collect the host spec
//! 4. resolve the host identity, backing off on retryable failures
//! 5. best-effort startup side effects (host status, graph definitions)
//! 6. publish the host id to every manager
//!
//! All loops share one cancellation token; the first failure cancels the
//! rest. Retirement is a separate operation.

use crate::collector::CheckGenerator;
use crate::group::TaskGroup;
use crate::health::{components, HealthRegistry};
use crate::host::{HostResolver, ResolveError};
use crate::manager::{
    CheckManager, CheckPipeline, Manager, ManagerConfig, MetricManager, MetricPipeline,
    SpecManager, SpecPipeline,
};
use crate::models::{CheckConfig, Host, HostParams, HostStatus};
use crate::observability::{AgentMetrics, StructuredLogger};
use crate::platform::{Platform, ReadinessProbe};
use crate::retry::{retry_fixed, sleep_or_cancel, Backoff};
use crate::sync::{BackendApi, QueueConfig};
use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Timing and retry settings of the startup sequence and retirement
#[derive(Debug, Clone, PartialEq)]
pub struct RunConfig {
    /// Wait between platform readiness polls after the first
    pub platform_poll_interval: Duration,
    pub resolve_initial_delay: Duration,
    pub resolve_max_delay: Duration,
    /// Attempts for the host status update and graph definition post
    pub side_effect_attempts: u32,
    pub retire_attempts: u32,
    /// Fixed delay between side effect and retirement attempts
    pub retry_delay: Duration,
    /// Status forced on the host once resolved, when it differs
    pub host_status_on_start: Option<HostStatus>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            platform_poll_interval: Duration::from_secs(3),
            resolve_initial_delay: Duration::from_secs(1),
            resolve_max_delay: Duration::from_secs(10 * 60),
            side_effect_attempts: 5,
            retire_attempts: 3,
            retry_delay: Duration::from_secs(3),
            host_status_on_start: None,
        }
    }
}

/// Scheduling of the three manager loops
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManagerConfigs {
    pub metric: ManagerConfig,
    pub check: ManagerConfig,
    pub spec: ManagerConfig,
}

impl Default for ManagerConfigs {
    fn default() -> Self {
        Self {
            metric: ManagerConfig::METRIC,
            check: ManagerConfig::CHECK,
            spec: ManagerConfig::SPEC,
        }
    }
}

pub struct OrchestratorBuilder {
    api: Arc<dyn BackendApi>,
    platform: Arc<dyn Platform>,
    root: PathBuf,
    config: RunConfig,
    managers: ManagerConfigs,
    probe: Option<Arc<dyn ReadinessProbe>>,
    checks: Vec<Arc<CheckGenerator>>,
    check_configs: Vec<CheckConfig>,
    host_params: HostParams,
    health: HealthRegistry,
    agent_name: String,
}

impl OrchestratorBuilder {
    /// `root` is the directory holding the persisted host id
    pub fn new(
        api: Arc<dyn BackendApi>,
        platform: Arc<dyn Platform>,
        root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            api,
            platform,
            root: root.into(),
            config: RunConfig::default(),
            managers: ManagerConfigs::default(),
            probe: None,
            checks: Vec::new(),
            check_configs: Vec::new(),
            host_params: HostParams::default(),
            health: HealthRegistry::new(),
            agent_name: "telemetry-agent".to_string(),
        }
    }

    pub fn run_config(mut self, config: RunConfig) -> Self {
        self.config = config;
        self
    }

    pub fn manager_configs(mut self, managers: ManagerConfigs) -> Self {
        self.managers = managers;
        self
    }

    pub fn readiness_probe(mut self, probe: Arc<dyn ReadinessProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    /// Check generators and the declarations attached to the host spec
    pub fn checks(mut self, generators: Vec<Arc<CheckGenerator>>, configs: Vec<CheckConfig>) -> Self {
        self.checks = generators;
        self.check_configs = configs;
        self
    }

    /// Configured host fields; spec generators fill in the rest
    pub fn host_params(mut self, params: HostParams) -> Self {
        self.host_params = params;
        self
    }

    pub fn health(mut self, health: HealthRegistry) -> Self {
        self.health = health;
        self
    }

    pub fn agent_name(mut self, name: impl Into<String>) -> Self {
        self.agent_name = name.into();
        self
    }

    pub fn build(self) -> Orchestrator {
        let mut base = self.host_params;
        base.checks = self.check_configs;

        let metric = Manager::new(
            MetricPipeline::new(Arc::clone(&self.api)),
            self.platform.metric_generators(),
            self.managers.metric,
            QueueConfig::METRIC,
        )
        .with_health(self.health.clone());
        let check = Manager::new(
            CheckPipeline::new(Arc::clone(&self.api)),
            self.checks,
            self.managers.check,
            QueueConfig::CHECK,
        )
        .with_health(self.health.clone());
        let spec = Manager::new(
            SpecPipeline::new(Arc::clone(&self.api), base),
            self.platform.spec_generators(),
            self.managers.spec,
            QueueConfig::SPEC,
        )
        .with_health(self.health.clone());

        Orchestrator {
            resolver: HostResolver::new(Arc::clone(&self.api), &self.root),
            api: self.api,
            platform: self.platform,
            probe: self.probe,
            config: self.config,
            metric: Arc::new(metric),
            check: Arc::new(check),
            spec: Arc::new(spec),
            health: self.health,
            logger: StructuredLogger::new(self.agent_name),
            metrics: AgentMetrics::new(),
        }
    }
}

pub struct Orchestrator {
    config: RunConfig,
    api: Arc<dyn BackendApi>,
    platform: Arc<dyn Platform>,
    probe: Option<Arc<dyn ReadinessProbe>>,
    resolver: HostResolver,
    metric: Arc<MetricManager>,
    check: Arc<CheckManager>,
    spec: Arc<SpecManager>,
    health: HealthRegistry,
    logger: StructuredLogger,
    metrics: AgentMetrics,
}

impl Orchestrator {
    pub fn builder(
        api: Arc<dyn BackendApi>,
        platform: Arc<dyn Platform>,
        root: impl Into<PathBuf>,
    ) -> OrchestratorBuilder {
        OrchestratorBuilder::new(api, platform, root)
    }

    pub fn health(&self) -> &HealthRegistry {
        &self.health
    }

    pub fn resolver(&self) -> &HostResolver {
        &self.resolver
    }

    pub fn metric_manager(&self) -> &Arc<MetricManager> {
        &self.metric
    }

    pub fn check_manager(&self) -> &Arc<CheckManager> {
        &self.check
    }

    pub fn spec_manager(&self) -> &Arc<SpecManager> {
        &self.spec
    }

    /// Run the startup sequence and all manager loops until cancelled or
    /// until one of them fails.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) -> Result<()> {
        for name in components::ALL {
            self.health.register(name).await;
        }
        self.health
            .set_degraded(components::HOST_RESOLVER, "host not resolved yet")
            .await;

        let mut group = TaskGroup::new(cancel.child_token());
        let token = group.token();

        let this = Arc::clone(&self);
        let startup_token = token.clone();
        group.spawn("startup", async move { this.startup(&startup_token).await });
        group.spawn("metric_manager", Arc::clone(&self.metric).run(token.clone()));
        group.spawn("check_manager", Arc::clone(&self.check).run(token.clone()));
        group.spawn("spec_manager", Arc::clone(&self.spec).run(token));

        group.wait().await
    }

    /// Gated startup; cancellation at any wait is a clean return
    async fn startup(&self, cancel: &CancellationToken) -> Result<()> {
        if !self.wait_platform_ready(cancel).await {
            return Ok(());
        }
        if let Some(probe) = &self.probe {
            if !self.wait_readiness(probe.as_ref(), cancel).await {
                return Ok(());
            }
        }

        let custom_identifier = self
            .platform
            .custom_identifier(cancel)
            .await
            .context("Failed to get custom identifier")?;
        self.spec.set_custom_identifier(custom_identifier);

        let params = self
            .spec
            .fetch(cancel)
            .await
            .context("Failed to collect host spec")?;

        let Some(host) = self.resolve_host(&params, cancel).await? else {
            return Ok(());
        };
        self.logger.log_host_resolved(&host.id, &host.name);

        self.apply_startup_side_effects(&host, cancel).await;
        if cancel.is_cancelled() {
            return Ok(());
        }
        self.publish(&host.id).await;
        Ok(())
    }

    async fn wait_platform_ready(&self, cancel: &CancellationToken) -> bool {
        let mut delay = Duration::ZERO;
        loop {
            if !sleep_or_cancel(cancel, delay).await {
                return false;
            }
            if self.platform.is_running(cancel).await {
                return true;
            }
            debug!("Waiting for the platform to report running");
            delay = self.config.platform_poll_interval;
        }
    }

    async fn wait_readiness(&self, probe: &dyn ReadinessProbe, cancel: &CancellationToken) -> bool {
        let mut delay = probe.initial_delay();
        loop {
            if !sleep_or_cancel(cancel, delay).await {
                return false;
            }
            match probe.check(cancel).await {
                Ok(()) => {
                    info!("Readiness probe succeeded");
                    return true;
                }
                Err(_) if cancel.is_cancelled() => return false,
                Err(e) => debug!(error = %e, "Readiness probe not yet passing"),
            }
            delay = probe.period();
        }
    }

    /// Resolve with exponential backoff; `None` when cancelled first
    async fn resolve_host(
        &self,
        params: &HostParams,
        cancel: &CancellationToken,
    ) -> Result<Option<Host>> {
        let mut backoff = Backoff::new(
            self.config.resolve_initial_delay,
            self.config.resolve_max_delay,
        );

        loop {
            match self.resolver.resolve(params, cancel).await {
                Ok(host) => {
                    self.metrics.set_host_resolved(true);
                    self.health.set_healthy(components::HOST_RESOLVER).await;
                    return Ok(Some(host));
                }
                Err(ResolveError::Cancelled) => return Ok(None),
                Err(ResolveError::Fatal(e)) => {
                    self.health
                        .set_unhealthy(components::HOST_RESOLVER, format!("{:#}", e))
                        .await;
                    return Err(e.context("Failed to resolve host"));
                }
                Err(ResolveError::Retryable(e)) => {
                    self.metrics.inc_host_resolution_failures();
                    let delay = backoff.next_delay();
                    warn!(
                        error = %e,
                        retry_in_ms = delay.as_millis() as u64,
                        "Host resolution failed, retrying"
                    );
                    self.health
                        .set_degraded(components::HOST_RESOLVER, e.to_string())
                        .await;
                    if !sleep_or_cancel(cancel, delay).await {
                        return Ok(None);
                    }
                }
            }
        }
    }

    async fn apply_startup_side_effects(&self, host: &Host, cancel: &CancellationToken) {
        let attempts = self.config.side_effect_attempts;
        let delay = self.config.retry_delay;

        if let Some(status) = self.config.host_status_on_start {
            if host.status != Some(status) {
                let api = &self.api;
                let host_id = host.id.as_str();
                match retry_fixed("update_host_status", attempts, delay, cancel, move || {
                    api.update_host_status(host_id, status)
                })
                .await
                {
                    Ok(()) => info!(host_id = %host.id, status = %status, "Updated host status"),
                    Err(e) if e.is_cancelled() => debug!("Host status update cancelled"),
                    Err(e) => warn!(host_id = %host.id, error = %e, "Giving up on host status update"),
                }
            }
        }

        self.metric.post_graph_defs(cancel, attempts, delay).await;
    }

    async fn publish(&self, host_id: &str) {
        self.metric.set_host_id(host_id).await;
        self.check.set_host_id(host_id).await;
        self.spec.set_host_id(host_id).await;
        self.health.mark_ready(host_id).await;
        info!(host_id = %host_id, "Host id published, delivery enabled");
    }

    /// Retire the locally known host and forget its id; no-op without one
    pub async fn retire(&self, cancel: &CancellationToken) -> Result<()> {
        let Some(host_id) = self.resolver.local_id().await? else {
            info!("No local host id, nothing to retire");
            return Ok(());
        };

        let api = &self.api;
        let id = host_id.as_str();
        retry_fixed(
            "retire_host",
            self.config.retire_attempts,
            self.config.retry_delay,
            cancel,
            move || api.retire_host(id),
        )
        .await
        .with_context(|| format!("Failed to retire host {}", host_id))?;

        self.resolver.forget().await?;
        self.metrics.set_host_resolved(false);
        self.health.reset().await;
        self.logger.log_host_retired(&host_id);
        Ok(())
    }
}
