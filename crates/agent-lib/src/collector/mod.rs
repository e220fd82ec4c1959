//! Data collection from pluggable generators
//!
//! A [`Generator`] produces one unit of subsystem data per invocation
//! (metric values, a check report, or a host spec fragment). The
//! [`Collector`] fans out to every generator of a subsystem with bounded
//! concurrency, drops failed generators from the cycle, and returns the
//! successful outputs for the subsystem to merge.

mod cgroup;
mod system;


pub use cgroup::CgroupGenerator;
pub use system::SystemSpecGenerator;

use crate::models::{CheckReport, GraphDef, HostSpec, MetricValues};
use crate::observability::AgentMetrics;
use anyhow::Result;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

pub use async_trait::async_trait;

/// Default number of generators allowed to run at once
pub const DEFAULT_MAX_CONCURRENCY: usize = 8;

/// A pluggable producer of one subsystem's data per collection cycle
#[async_trait]
pub trait Generator: Send + Sync {
    type Output: Send + 'static;

    /// Name used in logs when this generator fails
    fn name(&self) -> &str;

    /// Produce one unit of data; must observe `cancel`
    async fn generate(&self, cancel: &CancellationToken) -> Result<Self::Output>;
}

/// Metric generators can also describe how their metrics are graphed
#[async_trait]
pub trait MetricGenerator: Generator<Output = MetricValues> {
    async fn graph_defs(&self) -> Result<Vec<GraphDef>> {
        Ok(Vec::new())
    }
}

pub type CheckGenerator = dyn Generator<Output = CheckReport>;
pub type SpecGenerator = dyn Generator<Output = HostSpec>;

/// Hard failure of a collection cycle
#[derive(Debug, Error)]
pub enum CollectError {
    #[error("{subsystem} generator panicked: {message}")]
    GeneratorPanicked {
        subsystem: &'static str,
        message: String,
    },
}

/// Fans out to all generators of one subsystem
pub struct Collector<G: ?Sized> {
    subsystem: &'static str,
    generators: Vec<Arc<G>>,
    max_concurrency: usize,
    metrics: AgentMetrics,
}

impl<G> Collector<G>
where
    G: Generator + ?Sized + 'static,
{
    /// Create a collector over the given generators
    pub fn new(subsystem: &'static str, generators: Vec<Arc<G>>, max_concurrency: usize) -> Self {
        Self {
            subsystem,
            generators,
            max_concurrency: max_concurrency.max(1),
            metrics: AgentMetrics::new(),
        }
    }

    pub fn generators(&self) -> &[Arc<G>] {
        &self.generators
    }

    pub fn len(&self) -> usize {
        self.generators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.generators.is_empty()
    }

    /// Run every generator once and return the successful outputs.
    ///
    /// Output order is unspecified. A generator error is logged and its
    /// contribution omitted; only a panicking generator fails the cycle.
    /// On cancellation, outputs finished so far are returned.
    pub async fn collect(&self, cancel: &CancellationToken) -> Result<Vec<G::Output>, CollectError> {
        let start = Instant::now();
        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));
        let mut tasks = JoinSet::new();

        for generator in &self.generators {
            let generator = Arc::clone(generator);
            let semaphore = Arc::clone(&semaphore);
            let cancel = cancel.clone();
            let name = generator.name().to_string();

            tasks.spawn(async move {
                let permit = tokio::select! {
                    permit = semaphore.acquire_owned() => permit.ok(),
                    _ = cancel.cancelled() => None,
                };
                let result = match permit {
                    Some(_permit) => tokio::select! {
                        result = generator.generate(&cancel) => Some(result),
                        _ = cancel.cancelled() => None,
                    },
                    None => None,
                };
                (name, result)
            });
        }

        let mut outputs = Vec::with_capacity(self.generators.len());
        let mut errors = 0usize;

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Some(Ok(output)))) => outputs.push(output),
                Ok((name, Some(Err(e)))) => {
                    errors += 1;
                    self.metrics.inc_generator_errors(self.subsystem);
                    warn!(
                        subsystem = self.subsystem,
                        generator = %name,
                        error = %e,
                        "Generator failed, dropping its output for this cycle"
                    );
                }
                Ok((_, None)) => {}
                Err(e) if e.is_panic() => {
                    tasks.abort_all();
                    error!(subsystem = self.subsystem, error = %e, "Generator panicked");
                    return Err(CollectError::GeneratorPanicked {
                        subsystem: self.subsystem,
                        message: e.to_string(),
                    });
                }
                Err(_) => {}
            }
        }

        let elapsed = start.elapsed();
        self.metrics
            .observe_collection_latency(self.subsystem, elapsed.as_secs_f64());
        debug!(
            subsystem = self.subsystem,
            generators = self.generators.len(),
            outputs = outputs.len(),
            errors,
            elapsed_ms = elapsed.as_millis() as u64,
            "Collection cycle complete"
        );

        Ok(outputs)
    }
}
