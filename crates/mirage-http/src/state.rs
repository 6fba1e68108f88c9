//! Shared application state and router assembly

use crate::broadcast::Broadcaster;
use crate::learning::LearningBuffer;
use crate::{admin, dispatcher};
use axum::Router;
use mirage_core::{AdaptiveDetector, HealthMonitor, LogRing, Platform, SchemaIntelligence};
use mirage_store::Store;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Upstream call timeout.
pub const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(60);

/// Knobs for assembling the application state.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Initial upstream target URL.
    pub target_url: Option<String>,
    /// Directory for the detector and schema registry documents. `None`
    /// keeps both in memory.
    pub data_dir: Option<PathBuf>,
    /// Observations required before the learning worker drains the buffer.
    pub learning_buffer_size: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            target_url: None,
            data_dir: None,
            learning_buffer_size: 1,
        }
    }
}

/// Everything the handlers share.
#[derive(Clone)]
pub struct AppState {
    /// The SQLite store.
    pub store: Store,
    /// Process-wide mode/learning/profile/target switches.
    pub platform: Arc<Platform>,
    /// Welford latency baselines.
    pub detector: Arc<AdaptiveDetector>,
    /// Four-signal health monitor.
    pub health: Arc<HealthMonitor>,
    /// Learned response schemas and drift detection.
    pub schemas: Arc<SchemaIntelligence>,
    /// Observations awaiting the learning worker.
    pub buffer: Arc<LearningBuffer>,
    /// The bounded request log.
    pub ring: Arc<LogRing>,
    /// Live subscribers of the request log.
    pub broadcaster: Arc<Broadcaster>,
    /// Shared upstream client (60 s timeout).
    pub upstream: reqwest::Client,
}

impl AppState {
    /// Wire up the shared state around an opened store.
    pub fn new(store: Store, config: AppConfig) -> mirage_core::Result<Self> {
        let detector_path = config.data_dir.as_ref().map(|d| d.join("detector_stats.json"));
        let schema_path = config.data_dir.as_ref().map(|d| d.join("schemas.json"));

        let upstream = reqwest::Client::builder()
            .timeout(UPSTREAM_TIMEOUT)
            .build()
            .map_err(|e| mirage_core::Error::generic(format!("upstream client: {e}")))?;

        Ok(Self {
            store,
            platform: Arc::new(Platform::new(config.target_url)),
            detector: Arc::new(AdaptiveDetector::new(detector_path)),
            health: Arc::new(HealthMonitor::new()),
            schemas: Arc::new(SchemaIntelligence::new(schema_path)),
            buffer: Arc::new(LearningBuffer::new(config.learning_buffer_size)),
            ring: Arc::new(LogRing::new()),
            broadcaster: Arc::new(Broadcaster::new()),
            upstream,
        })
    }

    /// Flush everything that persists to disk. Called on shutdown.
    pub fn flush(&self) {
        self.detector.flush();
        self.schemas.flush();
    }
}

/// The full application router: the `/admin` control plane plus the
/// catch-all dispatcher.
pub fn router(state: AppState) -> Router {
    Router::new()
        .nest("/admin", admin::router())
        .fallback(dispatcher::handle)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
