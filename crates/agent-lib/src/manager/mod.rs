//! Periodic collect → buffer → send loops
//!
//! A [`Manager`] pairs a [`Collector`] with a [`DeliveryQueue`] and runs
//! one collection cycle per tick. The three subsystems differ only in
//! their [`Pipeline`]: how generator outputs become queue items and how a
//! delivery window reaches the backend.

mod check;
mod metric;
mod spec;


pub use check::{CheckManager, CheckPipeline};
pub use metric::{MetricManager, MetricPipeline};
pub use spec::{SpecManager, SpecPipeline};

use crate::collector::{CollectError, Collector, Generator, DEFAULT_MAX_CONCURRENCY};
use crate::health::HealthRegistry;
use crate::sync::{Deliver, DeliveryOutcome, DeliveryQueue, QueueConfig};
use anyhow::anyhow;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Subsystem-specific glue between generator outputs and delivery
pub trait Pipeline: Deliver {
    type Generator: Generator + ?Sized + 'static;

    /// Turn one cycle's generator outputs into a queue batch
    fn assemble(&self, outputs: Vec<<Self::Generator as Generator>::Output>) -> Vec<Self::Item>;
}

/// Scheduling configuration of one manager loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManagerConfig {
    /// Delay before the first cycle; `interval` when unset
    pub initial_interval: Option<Duration>,
    pub interval: Duration,
    pub max_concurrency: usize,
}

impl ManagerConfig {
    pub const METRIC: ManagerConfig = ManagerConfig {
        initial_interval: None,
        interval: Duration::from_secs(60),
        max_concurrency: DEFAULT_MAX_CONCURRENCY,
    };

    pub const CHECK: ManagerConfig = ManagerConfig {
        initial_interval: None,
        interval: Duration::from_secs(60),
        max_concurrency: DEFAULT_MAX_CONCURRENCY,
    };

    /// First refresh after a minute, then every 30 minutes
    pub const SPEC: ManagerConfig = ManagerConfig {
        initial_interval: Some(Duration::from_secs(60)),
        interval: Duration::from_secs(30 * 60),
        max_concurrency: DEFAULT_MAX_CONCURRENCY,
    };
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self::METRIC
    }
}

/// Collection loop of one subsystem
pub struct Manager<P: Pipeline> {
    collector: Collector<P::Generator>,
    queue: DeliveryQueue<P>,
    config: ManagerConfig,
    health: Option<HealthRegistry>,
}

impl<P: Pipeline> Manager<P> {
    pub fn new(
        pipeline: P,
        generators: Vec<Arc<P::Generator>>,
        config: ManagerConfig,
        queue_config: QueueConfig,
    ) -> Self {
        Self {
            collector: Collector::new(P::SUBSYSTEM, generators, config.max_concurrency),
            queue: DeliveryQueue::new(pipeline, queue_config),
            config,
            health: None,
        }
    }

    /// Report cycle outcomes to `health` under `<subsystem>_manager`
    pub fn with_health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn component(&self) -> String {
        format!("{}_manager", P::SUBSYSTEM)
    }

    pub fn config(&self) -> ManagerConfig {
        self.config
    }

    pub fn pipeline(&self) -> &P {
        self.queue.deliverer()
    }

    pub fn queue(&self) -> &DeliveryQueue<P> {
        &self.queue
    }

    pub fn collector(&self) -> &Collector<P::Generator> {
        &self.collector
    }

    /// Unblock delivery of queued and future batches
    pub async fn set_host_id(&self, host_id: &str) {
        self.queue.set_destination(host_id).await;
    }

    /// Run all generators once and assemble their outputs into a batch
    pub async fn collect_once(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Vec<P::Item>, CollectError> {
        let outputs = self.collector.collect(cancel).await?;
        Ok(self.queue.deliverer().assemble(outputs))
    }

    /// One collect + enqueue cycle
    pub async fn cycle(&self, cancel: &CancellationToken) -> Result<DeliveryOutcome, CollectError> {
        let batch = match self.collect_once(cancel).await {
            Ok(batch) => batch,
            Err(e) => {
                if let Some(health) = &self.health {
                    health.set_unhealthy(&self.component(), e.to_string()).await;
                }
                return Err(e);
            }
        };

        let outcome = self.queue.enqueue(batch).await;
        if let Some(health) = &self.health {
            match &outcome {
                DeliveryOutcome::Failed(e) => {
                    health
                        .set_degraded(&self.component(), format!("delivery failed: {}", e))
                        .await
                }
                DeliveryOutcome::Delivered { .. } => health.set_healthy(&self.component()).await,
                DeliveryOutcome::Buffered => {}
            }
        }
        Ok(outcome)
    }

    /// Tick until cancelled, running each cycle as its own task.
    ///
    /// Returns the first hard cycle error; cancellation is a clean exit.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) -> anyhow::Result<()> {
        let period = self.config.interval.max(Duration::from_millis(1));
        let first = self.config.initial_interval.unwrap_or(period);
        let mut ticker = tokio::time::interval_at(Instant::now() + first, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            subsystem = P::SUBSYSTEM,
            generators = self.collector.len(),
            interval_secs = period.as_secs(),
            "Manager loop started"
        );

        let mut cycles = JoinSet::new();
        let result = loop {
            tokio::select! {
                _ = cancel.cancelled() => break Ok(()),
                _ = ticker.tick() => {
                    let manager = Arc::clone(&self);
                    let cancel = cancel.clone();
                    cycles.spawn(async move { manager.cycle(&cancel).await });
                }
                Some(joined) = cycles.join_next(), if !cycles.is_empty() => match joined {
                    Ok(Ok(outcome)) => debug!(subsystem = P::SUBSYSTEM, ?outcome, "Cycle finished"),
                    Ok(Err(e)) => break Err(anyhow::Error::new(e)),
                    Err(e) if e.is_panic() => {
                        break Err(anyhow!("{} cycle panicked: {}", P::SUBSYSTEM, e))
                    }
                    Err(_) => {}
                },
            }
        };

        cycles.shutdown().await;
        match &result {
            Ok(()) => info!(subsystem = P::SUBSYSTEM, "Manager loop stopped"),
            Err(e) => error!(subsystem = P::SUBSYSTEM, error = %e, "Manager loop failed"),
        }
        result
    }
}
