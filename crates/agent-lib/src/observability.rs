//! Observability infrastructure for the telemetry agent
//!
//! Provides:
//! - Prometheus metrics (collection latency, queue depth, delivery outcomes)
//! - Structured JSON logging of lifecycle events with tracing

use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, register_int_gauge,
    register_int_gauge_vec, HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec,
};
use std::sync::OnceLock;
use tracing::{error, info, warn};

/// Histogram buckets for collection latency (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<Option<AgentMetricsInner>> = OnceLock::new();

struct AgentMetricsInner {
    collection_latency_seconds: HistogramVec,
    generator_errors: IntCounterVec,
    queue_batches: IntGaugeVec,
    delivered_batches: IntCounterVec,
    dropped_batches: IntCounterVec,
    delivery_failures: IntCounterVec,
    host_resolution_failures: IntCounter,
    host_resolved: IntGauge,
}

impl AgentMetricsInner {
    fn register() -> prometheus::Result<Self> {
        Ok(Self {
            collection_latency_seconds: register_histogram_vec!(
                "telemetry_agent_collection_latency_seconds",
                "Time spent running all generators of a subsystem",
                &["subsystem"],
                LATENCY_BUCKETS.to_vec()
            )?,
            generator_errors: register_int_counter_vec!(
                "telemetry_agent_generator_errors_total",
                "Generator invocations that failed and were dropped",
                &["subsystem"]
            )?,
            queue_batches: register_int_gauge_vec!(
                "telemetry_agent_queue_batches",
                "Batches waiting in the delivery queue",
                &["subsystem"]
            )?,
            delivered_batches: register_int_counter_vec!(
                "telemetry_agent_delivered_batches_total",
                "Batches confirmed delivered to the backend",
                &["subsystem"]
            )?,
            dropped_batches: register_int_counter_vec!(
                "telemetry_agent_dropped_batches_total",
                "Batches evicted because the queue exceeded its depth",
                &["subsystem"]
            )?,
            delivery_failures: register_int_counter_vec!(
                "telemetry_agent_delivery_failures_total",
                "Failed delivery attempts",
                &["subsystem"]
            )?,
            host_resolution_failures: register_int_counter!(
                "telemetry_agent_host_resolution_failures_total",
                "Retryable failures while resolving the host identity"
            )?,
            host_resolved: register_int_gauge!(
                "telemetry_agent_host_resolved",
                "1 once the host identity is known"
            )?,
        })
    }
}

/// Agent metrics for Prometheus exposition
///
/// Lightweight handle to the global metrics instance; clones share the
/// same underlying collectors. If registration fails the handle is inert.
#[derive(Clone)]
pub struct AgentMetrics {
    inner: Option<&'static AgentMetricsInner>,
}

impl Default for AgentMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for AgentMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentMetrics")
            .field("registered", &self.inner.is_some())
            .finish()
    }
}

impl AgentMetrics {
    /// Create a new metrics handle (registers global metrics on first call)
    pub fn new() -> Self {
        let inner = GLOBAL_METRICS.get_or_init(|| match AgentMetricsInner::register() {
            Ok(inner) => Some(inner),
            Err(e) => {
                warn!(error = %e, "Failed to register Prometheus metrics");
                None
            }
        });
        Self {
            inner: inner.as_ref(),
        }
    }

    pub fn observe_collection_latency(&self, subsystem: &str, duration_secs: f64) {
        if let Some(m) = self.inner {
            m.collection_latency_seconds
                .with_label_values(&[subsystem])
                .observe(duration_secs);
        }
    }

    pub fn inc_generator_errors(&self, subsystem: &str) {
        if let Some(m) = self.inner {
            m.generator_errors.with_label_values(&[subsystem]).inc();
        }
    }

    pub fn set_queue_batches(&self, subsystem: &str, batches: usize) {
        if let Some(m) = self.inner {
            m.queue_batches
                .with_label_values(&[subsystem])
                .set(batches as i64);
        }
    }

    pub fn add_delivered_batches(&self, subsystem: &str, batches: usize) {
        if let Some(m) = self.inner {
            m.delivered_batches
                .with_label_values(&[subsystem])
                .inc_by(batches as u64);
        }
    }

    pub fn add_dropped_batches(&self, subsystem: &str, batches: usize) {
        if let Some(m) = self.inner {
            m.dropped_batches
                .with_label_values(&[subsystem])
                .inc_by(batches as u64);
        }
    }

    pub fn inc_delivery_failures(&self, subsystem: &str) {
        if let Some(m) = self.inner {
            m.delivery_failures.with_label_values(&[subsystem]).inc();
        }
    }

    pub fn inc_host_resolution_failures(&self) {
        if let Some(m) = self.inner {
            m.host_resolution_failures.inc();
        }
    }

    pub fn set_host_resolved(&self, resolved: bool) {
        if let Some(m) = self.inner {
            m.host_resolved.set(i64::from(resolved));
        }
    }
}

/// Structured logger for agent lifecycle events
#[derive(Debug, Clone)]
pub struct StructuredLogger {
    agent_name: String,
}

impl StructuredLogger {
    pub fn new(agent_name: impl Into<String>) -> Self {
        Self {
            agent_name: agent_name.into(),
        }
    }

    pub fn log_startup(&self, version: &str) {
        info!(
            event = "agent_started",
            agent = %self.agent_name,
            agent_version = %version,
            "Telemetry agent started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "agent_shutdown",
            agent = %self.agent_name,
            reason = %reason,
            "Telemetry agent shutting down"
        );
    }

    pub fn log_host_resolved(&self, host_id: &str, host_name: &str) {
        info!(
            event = "host_resolved",
            agent = %self.agent_name,
            host_id = %host_id,
            host_name = %host_name,
            "Host identity resolved"
        );
    }

    pub fn log_host_retired(&self, host_id: &str) {
        info!(
            event = "host_retired",
            agent = %self.agent_name,
            host_id = %host_id,
            "Host retired"
        );
    }

    pub fn log_fatal(&self, stage: &str, error: &anyhow::Error) {
        error!(
            event = "agent_failed",
            agent = %self.agent_name,
            stage = %stage,
            error = %format!("{:#}", error),
            "Telemetry agent stopped on a fatal error"
        );
    }
}
