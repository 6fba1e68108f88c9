//! The learning buffer and the background learning worker
//!
//! Handlers append one observation per completed upstream call; a single
//! long-lived worker drains the buffer (when it reaches its threshold, and
//! on a steady 5 s poll) and folds each observation into the endpoint's
//! learned behavior, one item per store update so a poisoned item never
//! aborts the batch.

use crate::state::AppState;
use mirage_core::SchemaNode;
use mirage_store::Behavior;
use parking_lot::Mutex;
use serde_json::Value;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Steady-state EWMA weight for latency, distribution, and error rate.
pub const STEADY_ALPHA: f64 = 0.1;

/// How often the worker drains regardless of buffer fill.
const POLL_INTERVAL: Duration = Duration::from_secs(5);

/// One observed request/response pair awaiting learning.
#[derive(Debug, Clone)]
pub struct Observation {
    /// HTTP method.
    pub method: String,
    /// Normalized path pattern.
    pub pattern: String,
    /// Response status (502 for failover synthetics).
    pub status: u16,
    /// Observed latency in milliseconds.
    pub latency_ms: f64,
    /// Parsed request body, when it was valid JSON.
    pub request_body: Option<Value>,
    /// Parsed response body, when it was valid JSON.
    pub response_body: Option<Value>,
}

/// The shared, unbounded observation buffer.
///
/// The mutex is held only to append or to swap the contents out; a
/// [`Notify`] wakes the worker when the drain threshold is reached.
pub struct LearningBuffer {
    items: Mutex<Vec<Observation>>,
    threshold: usize,
    notify: Notify,
}

impl LearningBuffer {
    /// Create a buffer that requests a drain at `threshold` items.
    pub fn new(threshold: usize) -> Self {
        Self {
            items: Mutex::new(Vec::new()),
            threshold: threshold.max(1),
            notify: Notify::new(),
        }
    }

    /// The configured drain threshold.
    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Append an observation, waking the worker at the threshold.
    pub fn push(&self, observation: Observation) {
        let len = {
            let mut items = self.items.lock();
            items.push(observation);
            items.len()
        };
        if len >= self.threshold {
            self.notify.notify_one();
        }
        if len > self.threshold * 10 {
            warn!(
                buffered = len,
                threshold = self.threshold,
                "learning buffer growing faster than it drains"
            );
        }
    }

    /// Swap the contents out under the lock.
    pub fn swap(&self) -> Vec<Observation> {
        std::mem::take(&mut *self.items.lock())
    }

    /// Current number of buffered observations.
    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    /// Whether the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    /// Wait until a push reaches the threshold.
    pub async fn notified(&self) {
        self.notify.notified().await;
    }
}

/// Fold one observation into a learned behavior.
///
/// The first real observation snaps the 400 ms default outright; every
/// later one applies the steady-state EWMA. The status distribution is
/// renormalized so its values always sum to 1.
pub fn apply_observation(behavior: &mut Behavior, observation: &Observation) {
    let is_error = if observation.status >= 400 { 1.0 } else { 0.0 };

    if behavior.is_unobserved() {
        behavior.latency_mean = observation.latency_ms;
        behavior.error_rate = is_error;
        behavior
            .status_code_distribution
            .insert(observation.status.to_string(), 1.0);
    } else {
        behavior.latency_mean =
            behavior.latency_mean * (1.0 - STEADY_ALPHA) + observation.latency_ms * STEADY_ALPHA;

        // Track variance alongside the mean so simulated latency keeps a
        // realistic spread
        let deviation = observation.latency_ms - behavior.latency_mean;
        let variance = behavior.latency_std.powi(2) * (1.0 - STEADY_ALPHA)
            + deviation.powi(2) * STEADY_ALPHA;
        behavior.latency_std = variance.sqrt();

        for value in behavior.status_code_distribution.values_mut() {
            *value *= 1.0 - STEADY_ALPHA;
        }
        *behavior
            .status_code_distribution
            .entry(observation.status.to_string())
            .or_insert(0.0) += STEADY_ALPHA;
        let total: f64 = behavior.status_code_distribution.values().sum();
        if total > 0.0 {
            for value in behavior.status_code_distribution.values_mut() {
                *value /= total;
            }
        }

        behavior.error_rate =
            behavior.error_rate * (1.0 - STEADY_ALPHA) + is_error * STEADY_ALPHA;
    }

    // Schemas: successful responses, any request body. Scalar top-level
    // payloads still count; they land in the root metadata as a leaf.
    if observation.status < 300 {
        if let Some(body) = &observation.response_body {
            behavior.response_schema =
                Some(SchemaNode::learn(behavior.response_schema.take(), body));
        }
    }
    if let Some(body) = &observation.request_body {
        behavior.request_schema = Some(SchemaNode::learn(behavior.request_schema.take(), body));
    }
}

/// Spawn the single learning worker task.
///
/// It drains when the buffer reaches its threshold and on every poll tick,
/// and flushes whatever is left when `shutdown` fires.
pub fn spawn_worker(state: AppState, shutdown: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(POLL_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(threshold = state.buffer.threshold(), "learning worker started");

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                () = state.buffer.notified() => {}
                () = shutdown.cancelled() => {
                    drain(&state).await;
                    info!("learning worker stopped");
                    return;
                }
            }
            if state.buffer.len() >= state.buffer.threshold() {
                drain(&state).await;
            }
        }
    })
}

/// Swap the buffer out and process the snapshot, one item at a time.
pub async fn drain(state: &AppState) {
    let batch = state.buffer.swap();
    if batch.is_empty() {
        return;
    }

    let mut learned = 0usize;
    for observation in &batch {
        match process_item(state, observation).await {
            Ok(()) => {
                learned += 1;
                debug!(
                    method = %observation.method,
                    pattern = %observation.pattern,
                    status = observation.status,
                    latency_ms = observation.latency_ms,
                    "observation learned"
                );
            }
            Err(e) => {
                // One poisoned item must not abort the batch
                error!(
                    method = %observation.method,
                    pattern = %observation.pattern,
                    error = %e,
                    "failed to learn observation"
                );
            }
        }
    }
    debug!(batch = batch.len(), learned, "learning batch processed");
}

async fn process_item(state: &AppState, observation: &Observation) -> mirage_store::Result<()> {
    let target = state.platform.target_url().unwrap_or_default();
    let endpoint = state
        .store
        .get_or_create_endpoint(&observation.method, &observation.pattern, &target)
        .await?;

    let mut behavior = state
        .store
        .behavior(endpoint.id)
        .await?
        .unwrap_or_else(|| Behavior::defaults(endpoint.id));

    apply_observation(&mut behavior, observation);
    state.store.update_behavior(&behavior).await
}
