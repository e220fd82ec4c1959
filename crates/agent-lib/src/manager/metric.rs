use super::{Manager, Pipeline};
use crate::collector::{Generator, MetricGenerator};
use crate::models::{GraphDef, HostMetricValue, MetricValue, MetricValues};
use crate::retry::retry_fixed;
use crate::sync::{ApiError, BackendApi, Deliver};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub type MetricManager = Manager<MetricPipeline>;

/// Merges metric maps into timestamped samples and posts them per host
pub struct MetricPipeline {
    api: Arc<dyn BackendApi>,
}

impl MetricPipeline {
    pub fn new(api: Arc<dyn BackendApi>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl Deliver for MetricPipeline {
    type Item = MetricValue;
    const SUBSYSTEM: &'static str = "metric";

    async fn deliver(&self, destination: &str, window: Vec<MetricValue>) -> Result<(), ApiError> {
        let values: Vec<HostMetricValue> = window
            .into_iter()
            .map(|value| HostMetricValue {
                host_id: destination.to_string(),
                value,
            })
            .collect();
        self.api.post_metric_values(&values).await
    }
}

impl Pipeline for MetricPipeline {
    type Generator = dyn MetricGenerator;

    fn assemble(&self, outputs: Vec<MetricValues>) -> Vec<MetricValue> {
        let time = chrono::Utc::now().timestamp();
        // Colliding names: whichever generator output comes last wins
        let merged: BTreeMap<String, f64> = outputs.into_iter().flatten().collect();
        merged
            .into_iter()
            .map(|(name, value)| MetricValue { name, time, value })
            .collect()
    }
}

impl Manager<MetricPipeline> {
    /// Gather graph definitions from every generator and post them once.
    ///
    /// Failures are logged and otherwise ignored.
    pub async fn post_graph_defs(
        &self,
        cancel: &CancellationToken,
        attempts: u32,
        delay: Duration,
    ) {
        let mut defs: Vec<GraphDef> = Vec::new();
        for generator in self.collector().generators() {
            match generator.graph_defs().await {
                Ok(mut generator_defs) => defs.append(&mut generator_defs),
                Err(e) => warn!(
                    generator = %generator.name(),
                    error = %e,
                    "Failed to collect graph definitions"
                ),
            }
        }
        if defs.is_empty() {
            return;
        }

        let api = &self.pipeline().api;
        let defs = &defs;
        match retry_fixed("post_graph_defs", attempts, delay, cancel, move || {
            api.post_graph_defs(defs)
        })
        .await
        {
            Ok(()) => info!(graph_defs = defs.len(), "Posted graph definitions"),
            Err(e) if e.is_cancelled() => debug!("Graph definition posting cancelled"),
            Err(e) => warn!(error = %e, "Giving up on posting graph definitions"),
        }
    }
}
