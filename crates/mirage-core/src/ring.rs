//! Bounded in-memory request log
//!
//! The newest entry is always at the front; the ring never holds more than
//! [`LOG_RING_CAPACITY`] entries. Observers see an order-preserving prefix.

use crate::health::HealthStatus;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Maximum entries retained.
pub const LOG_RING_CAPACITY: usize = 50;

/// How a request was served.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServeMode {
    /// Forwarded to the upstream.
    Proxy,
    /// Served synthetically from the learned model.
    Mock,
}

/// One logged request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    /// Wall-clock time (`HH:MM:SS`).
    pub time: String,
    /// HTTP method.
    pub method: String,
    /// Normalized path pattern.
    pub path: String,
    /// Response status code.
    pub status: u16,
    /// Latency in milliseconds.
    pub latency_ms: u64,
    /// Proxy or mock.
    pub mode: ServeMode,
    /// Whether contract drift was detected on this request.
    pub has_drift: bool,
    /// Health classification of this request.
    pub health_status: String,
    /// Health score of this request.
    pub health_score: f64,
}

impl LogEntry {
    /// Build an entry stamped with the current wall-clock time.
    #[allow(clippy::too_many_arguments)]
    pub fn now(
        method: &str,
        path: &str,
        status: u16,
        latency_ms: f64,
        mode: ServeMode,
        has_drift: bool,
        health_status: HealthStatus,
        health_score: f64,
    ) -> Self {
        Self {
            time: chrono::Local::now().format("%H:%M:%S").to_string(),
            method: method.to_string(),
            path: path.to_string(),
            status,
            latency_ms: latency_ms.round().max(0.0) as u64,
            mode,
            has_drift,
            health_status: health_status.as_str().to_string(),
            health_score,
        }
    }
}

/// Head-insert bounded log, guarded by one mutex covering insert-and-trim.
#[derive(Default)]
pub struct LogRing {
    entries: Mutex<VecDeque<LogEntry>>,
}

impl LogRing {
    /// Create an empty ring.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an entry at the head, trimming the tail past capacity.
    pub fn push(&self, entry: LogEntry) {
        let mut entries = self.entries.lock();
        entries.push_front(entry);
        entries.truncate(LOG_RING_CAPACITY);
    }

    /// Snapshot of the current contents, newest first.
    pub fn snapshot(&self) -> Vec<LogEntry> {
        self.entries.lock().iter().cloned().collect()
    }

    /// Number of retained entries.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the ring is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(path: &str) -> LogEntry {
        LogEntry::now(
            "GET",
            path,
            200,
            42.0,
            ServeMode::Proxy,
            false,
            HealthStatus::Healthy,
            100.0,
        )
    }

    #[test]
    fn newest_entry_is_first() {
        let ring = LogRing::new();
        ring.push(entry("/a"));
        ring.push(entry("/b"));
        let snapshot = ring.snapshot();
        assert_eq!(snapshot[0].path, "/b");
        assert_eq!(snapshot[1].path, "/a");
    }

    #[test]
    fn ring_never_exceeds_capacity() {
        let ring = LogRing::new();
        for i in 0..120 {
            ring.push(entry(&format!("/{i}")));
        }
        assert_eq!(ring.len(), LOG_RING_CAPACITY);
        // The newest survive, the oldest were trimmed
        let snapshot = ring.snapshot();
        assert_eq!(snapshot[0].path, "/119");
        assert_eq!(snapshot[LOG_RING_CAPACITY - 1].path, "/70");
    }
}
