//! Destination-gated delivery queue
//!
//! Buffers collected batches in arrival order and relays them to the
//! backend once the destination (host id) is known:
//! - every enqueue triggers one delivery attempt of the oldest batches
//! - a failed attempt keeps the whole queue for the next enqueue
//! - the queue depth is capped by evicting the oldest batches

use super::{ApiError, Deliver};
use crate::observability::AgentMetrics;
use std::collections::VecDeque;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Default number of oldest batches merged into one delivery
pub const DEFAULT_WINDOW: usize = 3;

/// Configuration for a delivery queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueConfig {
    /// Maximum number of batches retained
    pub max_depth: usize,
    /// Maximum number of batches merged into one delivery attempt
    pub window: usize,
}

impl QueueConfig {
    /// Metric queue: about 6 hours of one-minute batches
    pub const METRIC: QueueConfig = QueueConfig {
        max_depth: 360,
        window: DEFAULT_WINDOW,
    };

    pub const CHECK: QueueConfig = QueueConfig {
        max_depth: 60,
        window: DEFAULT_WINDOW,
    };

    /// Spec queue: only the newest document is worth sending
    pub const SPEC: QueueConfig = QueueConfig {
        max_depth: 1,
        window: DEFAULT_WINDOW,
    };
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self::METRIC
    }
}

/// Result of the delivery attempt triggered by an enqueue
#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryOutcome {
    /// No destination yet; the batch was only buffered
    Buffered,
    /// The window was posted and retired from the queue
    Delivered { batches: usize, items: usize },
    /// The backend call failed; the queue is unchanged
    Failed(ApiError),
}

/// Queue statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Batches currently queued
    pub batches: usize,
    /// Configured depth limit
    pub capacity: usize,
    /// Batches confirmed delivered since creation
    pub delivered_batches: u64,
    /// Batches evicted by the depth limit since creation
    pub dropped_batches: u64,
    /// Delivery attempts that failed since creation
    pub failed_attempts: u64,
}

struct QueueState<T> {
    batches: VecDeque<Vec<T>>,
    destination: Option<String>,
    delivered_batches: u64,
    dropped_batches: u64,
    failed_attempts: u64,
}

impl<T> QueueState<T> {
    /// Evict the oldest batches beyond `max_depth`, returning how many were dropped
    fn enforce_depth(&mut self, max_depth: usize) -> usize {
        let excess = self.batches.len().saturating_sub(max_depth);
        if excess > 0 {
            self.batches.drain(..excess);
            self.dropped_batches += excess as u64;
        }
        excess
    }
}

/// Bounded FIFO of batches relayed through a [`Deliver`] implementation
pub struct DeliveryQueue<D: Deliver> {
    deliverer: D,
    config: QueueConfig,
    // Held across the backend call so attempts from one queue never interleave
    state: Mutex<QueueState<D::Item>>,
    metrics: AgentMetrics,
}

impl<D: Deliver> DeliveryQueue<D> {
    /// Create an empty queue in buffer-only mode
    pub fn new(deliverer: D, config: QueueConfig) -> Self {
        Self {
            deliverer,
            config: QueueConfig {
                max_depth: config.max_depth.max(1),
                window: config.window.max(1),
            },
            state: Mutex::new(QueueState {
                batches: VecDeque::new(),
                destination: None,
                delivered_batches: 0,
                dropped_batches: 0,
                failed_attempts: 0,
            }),
            metrics: AgentMetrics::new(),
        }
    }

    pub fn deliverer(&self) -> &D {
        &self.deliverer
    }

    pub fn config(&self) -> QueueConfig {
        self.config
    }

    /// Append a batch and attempt one delivery of the oldest batches
    pub async fn enqueue(&self, batch: Vec<D::Item>) -> DeliveryOutcome {
        let mut state = self.state.lock().await;
        state.batches.push_back(batch);

        let outcome = self.attempt(&mut state).await;

        let dropped = state.enforce_depth(self.config.max_depth);
        if dropped > 0 {
            self.metrics.add_dropped_batches(D::SUBSYSTEM, dropped);
            debug!(
                subsystem = D::SUBSYSTEM,
                dropped,
                max_depth = self.config.max_depth,
                "Dropped oldest batches over queue depth"
            );
        }
        self.metrics
            .set_queue_batches(D::SUBSYSTEM, state.batches.len());

        outcome
    }

    async fn attempt(&self, state: &mut QueueState<D::Item>) -> DeliveryOutcome {
        let Some(destination) = state.destination.clone() else {
            return DeliveryOutcome::Buffered;
        };

        let count = state.batches.len().min(self.config.window);
        let window: Vec<D::Item> = state
            .batches
            .iter()
            .take(count)
            .flat_map(|batch| batch.iter().cloned())
            .collect();
        let items = window.len();

        if items > 0 {
            if let Err(e) = self.deliverer.deliver(&destination, window).await {
                state.failed_attempts += 1;
                self.metrics.inc_delivery_failures(D::SUBSYSTEM);
                warn!(
                    subsystem = D::SUBSYSTEM,
                    error = %e,
                    queued_batches = state.batches.len(),
                    "Delivery failed, keeping batches for the next attempt"
                );
                return DeliveryOutcome::Failed(e);
            }
        }

        state.batches.drain(..count);
        state.delivered_batches += count as u64;
        self.metrics.add_delivered_batches(D::SUBSYSTEM, count);
        debug!(
            subsystem = D::SUBSYSTEM,
            batches = count,
            items,
            remaining = state.batches.len(),
            "Delivered batches"
        );

        DeliveryOutcome::Delivered {
            batches: count,
            items,
        }
    }

    /// Set the destination identifier, unblocking delivery on the next enqueue.
    ///
    /// Empty identifiers are ignored; a known destination is never cleared.
    pub async fn set_destination(&self, destination: impl Into<String>) {
        let destination = destination.into();
        if destination.is_empty() {
            warn!(subsystem = D::SUBSYSTEM, "Ignoring empty destination");
            return;
        }

        let mut state = self.state.lock().await;
        match state.destination.as_deref() {
            Some(current) if current == destination => {}
            Some(current) => {
                warn!(
                    subsystem = D::SUBSYSTEM,
                    from = %current,
                    to = %destination,
                    "Destination replaced"
                );
                state.destination = Some(destination);
            }
            None => {
                info!(
                    subsystem = D::SUBSYSTEM,
                    destination = %destination,
                    buffered_batches = state.batches.len(),
                    "Destination known, delivery unblocked"
                );
                state.destination = Some(destination);
            }
        }
    }

    pub async fn destination(&self) -> Option<String> {
        self.state.lock().await.destination.clone()
    }

    /// Number of queued batches
    pub async fn len(&self) -> usize {
        self.state.lock().await.batches.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.lock().await.batches.is_empty()
    }

    /// Copy of up to `limit` oldest batches without removing them
    pub async fn peek(&self, limit: usize) -> Vec<Vec<D::Item>> {
        self.state
            .lock()
            .await
            .batches
            .iter()
            .take(limit)
            .cloned()
            .collect()
    }

    pub async fn stats(&self) -> QueueStats {
        let state = self.state.lock().await;
        QueueStats {
            batches: state.batches.len(),
            capacity: self.config.max_depth,
            delivered_batches: state.delivered_batches,
            dropped_batches: state.dropped_batches,
            failed_attempts: state.failed_attempts,
        }
    }
}
