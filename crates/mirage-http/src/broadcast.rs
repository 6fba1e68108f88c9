//! Real-time fan-out of the request log
//!
//! Subscribers connect over WebSocket, immediately receive the current ring
//! contents as an `initial` frame, then an `update` frame per logged
//! request. Each subscriber gets a bounded queue; one whose queue is full
//! or whose connection is gone is pruned inside the same broadcast pass:
//! slow consumers are disconnected, never awaited.

use crate::state::AppState;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use mirage_core::{GlobalHealth, HealthAssessment, LogEntry, LogRing};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::debug;

/// Frames a subscriber can miss before being disconnected.
const SUBSCRIBER_QUEUE: usize = 64;

/// Snapshot frame sent once on connect.
#[derive(Debug, Serialize)]
struct InitialFrame<'a> {
    r#type: &'static str,
    data: &'a [LogEntry],
}

/// Per-request frame.
#[derive(Debug, Serialize)]
struct UpdateFrame<'a> {
    r#type: &'static str,
    data: &'a LogEntry,
    #[serde(skip_serializing_if = "Option::is_none")]
    health_alert: Option<&'a HealthAssessment>,
    global_health: &'a GlobalHealth,
}

/// The mutex-guarded subscriber set.
#[derive(Default)]
pub struct Broadcaster {
    subscribers: Mutex<Vec<mpsc::Sender<String>>>,
}

impl Broadcaster {
    /// Create an empty broadcaster.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new subscriber and return its frame stream.
    pub fn subscribe(&self) -> mpsc::Receiver<String> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_QUEUE);
        self.subscribers.lock().push(tx);
        rx
    }

    /// Deliver a frame to every live subscriber, pruning any whose send
    /// fails in the same pass.
    pub fn broadcast(&self, frame: &str) {
        self.subscribers
            .lock()
            .retain(|tx| tx.try_send(frame.to_string()).is_ok());
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

/// Append a log entry to the ring and fan it out to live subscribers.
pub fn publish(
    ring: &LogRing,
    broadcaster: &Broadcaster,
    entry: LogEntry,
    health_alert: Option<&HealthAssessment>,
    global_health: &GlobalHealth,
) {
    let frame = UpdateFrame {
        r#type: "update",
        data: &entry,
        // Only attach the assessment when something actually fired
        health_alert: health_alert.filter(|h| !h.anomalies.is_empty()),
        global_health,
    };
    match serde_json::to_string(&frame) {
        Ok(text) => {
            ring.push(entry);
            broadcaster.broadcast(&text);
        }
        Err(e) => debug!(error = %e, "could not serialize update frame"),
    }
}

/// WebSocket upgrade handler for the live feed.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();

    // Initial snapshot before any updates
    let snapshot = state.ring.snapshot();
    let initial = InitialFrame {
        r#type: "initial",
        data: &snapshot,
    };
    if let Ok(text) = serde_json::to_string(&initial) {
        if sender.send(Message::Text(text.into())).await.is_err() {
            return;
        }
    }

    let mut frames = state.broadcaster.subscribe();

    // Forward broadcast frames to this client
    let mut send_task = tokio::spawn(async move {
        while let Some(frame) = frames.recv().await {
            if sender.send(Message::Text(frame.into())).await.is_err() {
                break;
            }
        }
    });

    // Client frames are keep-alive only
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(message)) = receiver.next().await {
            match message {
                Message::Close(_) => break,
                _ => debug!("live feed client frame ignored"),
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }
    debug!("live feed subscriber disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;
    use mirage_core::{HealthStatus, ServeMode};

    fn entry(path: &str) -> LogEntry {
        LogEntry::now(
            "GET",
            path,
            200,
            10.0,
            ServeMode::Proxy,
            false,
            HealthStatus::Healthy,
            100.0,
        )
    }

    #[tokio::test]
    async fn subscribers_receive_published_frames() {
        let ring = LogRing::new();
        let broadcaster = Broadcaster::new();
        let mut rx = broadcaster.subscribe();

        publish(&ring, &broadcaster, entry("/a"), None, &GlobalHealth::default());

        let frame = rx.recv().await.expect("frame delivered");
        let parsed: serde_json::Value = serde_json::from_str(&frame).expect("valid json");
        assert_eq!(parsed["type"], "update");
        assert_eq!(parsed["data"]["path"], "/a");
        assert!(parsed.get("health_alert").is_none());
        assert_eq!(parsed["global_health"]["score"], 100.0);
        assert_eq!(ring.len(), 1);
    }

    #[tokio::test]
    async fn dead_subscribers_are_pruned_on_broadcast() {
        let broadcaster = Broadcaster::new();
        let rx = broadcaster.subscribe();
        let _live = broadcaster.subscribe();
        assert_eq!(broadcaster.subscriber_count(), 2);

        drop(rx);
        broadcaster.broadcast("ping");
        assert_eq!(broadcaster.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn slow_subscribers_are_disconnected_not_blocked() {
        let broadcaster = Broadcaster::new();
        let _stalled = broadcaster.subscribe();

        // Fill the queue past capacity; the stalled consumer never reads
        for i in 0..(SUBSCRIBER_QUEUE + 10) {
            broadcaster.broadcast(&format!("frame {i}"));
        }
        assert_eq!(broadcaster.subscriber_count(), 0);
    }
}
