//! Telemetry Agent - host and container monitoring agent
//!
//! Collects metrics, check results and host specs and relays them to the
//! monitoring backend. SIGHUP reloads the configuration in place;
//! SIGTERM/SIGINT stop the agent and retire the host.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use telemetry_agent_lib::{
    collector::CheckGenerator,
    health::HealthRegistry,
    observability::{AgentMetrics, StructuredLogger},
    platform::HostPlatform,
    plugin::{CommandCheck, CommandProbe},
    sync::{BackendApi, ClientConfig, HttpApiClient},
    HostParams, Orchestrator, RunConfig,
};
use tokio::signal::unix::{signal, SignalKind};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod config;

use config::AgentConfig;

const AGENT_NAME: &str = "telemetry-agent";
const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Parser)]
#[command(name = "telemetry-agent", version, about = "Host and container telemetry agent")]
struct Cli {
    /// Configuration file (TOML, YAML or JSON)
    #[arg(long, env = "AGENT_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Clone, Copy, Subcommand)]
enum Command {
    /// Run the agent until terminated (default)
    Run,
    /// Retire the locally registered host and exit
    Retire,
}

enum Exit {
    Finished(Result<()>),
    Reload,
    Terminate(&'static str),
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    let cli = Cli::parse();
    let logger = StructuredLogger::new(AGENT_NAME);

    let result = match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(cli.config.as_deref(), &logger).await,
        Command::Retire => retire(cli.config.as_deref()).await,
    };

    if let Err(e) = &result {
        logger.log_fatal("main", e);
    }
    result
}

async fn run(config_path: Option<&Path>, logger: &StructuredLogger) -> Result<()> {
    let mut config = AgentConfig::load(config_path)?;
    logger.log_startup(AGENT_VERSION);

    let health = HealthRegistry::new();
    // Register the collectors before the first scrape
    AgentMetrics::new();
    let state = Arc::new(api::AppState::new(health.clone()));
    let api_handle = tokio::spawn(api::serve(config.api_port, state));

    let mut hangup = signal(SignalKind::hangup()).context("Failed to install SIGHUP handler")?;
    let mut terminate =
        signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;

    let result = loop {
        let orchestrator = Arc::new(build_orchestrator(&config, health.clone())?);
        let cancel = CancellationToken::new();
        let mut running = tokio::spawn(Arc::clone(&orchestrator).run(cancel.clone()));

        let exit = tokio::select! {
            joined = &mut running => Exit::Finished(flatten(joined)),
            _ = hangup.recv() => Exit::Reload,
            _ = terminate.recv() => Exit::Terminate("SIGTERM"),
            _ = tokio::signal::ctrl_c() => Exit::Terminate("SIGINT"),
        };

        match exit {
            Exit::Finished(result) => break result,
            Exit::Reload => {
                info!("SIGHUP received, reloading configuration");
                cancel.cancel();
                stop(running).await?;
                health.reset().await;
                config = AgentConfig::load(config_path)?;
            }
            Exit::Terminate(signal_name) => {
                logger.log_shutdown(signal_name);
                cancel.cancel();
                if let Err(e) = stop(running).await {
                    warn!(error = %format!("{:#}", e), "Agent stopped with an error");
                }
                // Fresh token: the run token is already cancelled
                break orchestrator.retire(&CancellationToken::new()).await;
            }
        }
    };

    api_handle.abort();
    result
}

async fn retire(config_path: Option<&Path>) -> Result<()> {
    let config = AgentConfig::load(config_path)?;
    let orchestrator = build_orchestrator(&config, HealthRegistry::new())?;
    orchestrator.retire(&CancellationToken::new()).await
}

async fn stop(running: JoinHandle<Result<()>>) -> Result<()> {
    flatten(running.await)
}

fn flatten(joined: Result<Result<()>, tokio::task::JoinError>) -> Result<()> {
    joined.context("Orchestrator task panicked")?
}

fn build_orchestrator(config: &AgentConfig, health: HealthRegistry) -> Result<Orchestrator> {
    let client = HttpApiClient::new(ClientConfig {
        endpoint: config.apibase.clone(),
        api_key: config.apikey.clone(),
        ..ClientConfig::default()
    })?;
    let api: Arc<dyn BackendApi> = Arc::new(client);

    let platform = HostPlatform::new(&config.cgroup_root, &config.proc_path)
        .with_custom_identifier(config.custom_identifier.clone());

    let mut check_generators: Vec<Arc<CheckGenerator>> = Vec::new();
    let mut check_configs = Vec::new();
    for plugin in &config.checks {
        let check = CommandCheck::new(&plugin.name, &plugin.command)
            .with_timeout(std::time::Duration::from_secs(plugin.timeout_secs))
            .with_memo(plugin.memo.clone())
            .with_notification_interval(plugin.notification_interval)
            .with_max_check_attempts(plugin.max_check_attempts);
        check_configs.push(check.config());
        check_generators.push(Arc::new(check));
    }

    let host_params = HostParams {
        name: config.hostname.clone(),
        display_name: config.display_name.clone(),
        memo: config.memo.clone(),
        role_fullnames: config.roles.clone(),
        ..HostParams::default()
    };

    let mut builder = Orchestrator::builder(api, Arc::new(platform), &config.root)
        .run_config(RunConfig {
            host_status_on_start: config.host_status,
            ..RunConfig::default()
        })
        .checks(check_generators, check_configs)
        .host_params(host_params)
        .health(health)
        .agent_name(AGENT_NAME);

    if let Some(readiness) = &config.readiness {
        let probe = CommandProbe::new(
            &readiness.command,
            readiness.initial_delay(),
            readiness.period(),
        )
        .with_timeout(readiness.timeout());
        builder = builder.readiness_probe(Arc::new(probe));
    }

    Ok(builder.build())
}
