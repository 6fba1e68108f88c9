//! Data models for the store

use chrono::{DateTime, Utc};
use mirage_core::schema::{ContractChange, SchemaNode};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A learned `(method, path_pattern)` endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Endpoint {
    /// Row id.
    pub id: i64,
    /// HTTP method.
    pub method: String,
    /// Normalized path pattern, e.g. `/users/{id}`.
    pub path_pattern: String,
    /// Target the endpoint was first observed against.
    pub target_url: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// The learned statistical and structural model of an endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Behavior {
    /// Owning endpoint id.
    pub endpoint_id: i64,
    /// Exponentially-weighted mean latency in milliseconds.
    pub latency_mean: f64,
    /// Latency standard deviation in milliseconds.
    pub latency_std: f64,
    /// EWMA error rate (failures / total), in `[0, 1]`.
    pub error_rate: f64,
    /// Status code string → probability; empty until the first observation,
    /// then summing to 1 ± 1e-6.
    pub status_code_distribution: HashMap<String, f64>,
    /// Learned response schema.
    pub response_schema: Option<SchemaNode>,
    /// Learned request schema.
    pub request_schema: Option<SchemaNode>,
}

impl Behavior {
    /// The defaults a freshly created endpoint starts with, before any real
    /// observation snaps them to reality.
    pub fn defaults(endpoint_id: i64) -> Self {
        Self {
            endpoint_id,
            latency_mean: 400.0,
            latency_std: 100.0,
            error_rate: 0.0,
            status_code_distribution: HashMap::new(),
            response_schema: None,
            request_schema: None,
        }
    }

    /// True until the first real observation lands.
    pub fn is_unobserved(&self) -> bool {
        self.status_code_distribution.is_empty()
    }
}

/// Per-endpoint chaos configuration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::FromRow)]
pub struct ChaosSettings {
    /// Owning endpoint id.
    pub endpoint_id: i64,
    /// Chaos level in `[0, 100]`.
    pub chaos_level: i64,
    /// Whether the per-endpoint level participates in effective chaos.
    pub is_active: bool,
}

/// A contract drift alert.
#[derive(Debug, Clone, Serialize)]
pub struct DriftAlert {
    /// Row id.
    pub id: i64,
    /// Owning endpoint id.
    pub endpoint_id: i64,
    /// Last detection time.
    pub detected_at: DateTime<Utc>,
    /// Severity score in `[0, 100]`.
    pub drift_score: f64,
    /// Human-readable summary.
    pub drift_summary: Option<String>,
    /// Full list of contract changes.
    pub drift_details: Vec<ContractChange>,
    /// Whether the alert has been resolved.
    pub is_resolved: bool,
    /// Resolution time.
    pub resolved_at: Option<DateTime<Utc>>,
}

/// Aggregated drift history for one endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct DriftStats {
    /// Total alerts ever raised.
    pub total_alerts: i64,
    /// Alerts still unresolved (0 or 1 by invariant).
    pub unresolved_alerts: i64,
    /// Mean drift score across all alerts.
    pub average_drift_score: f64,
    /// The most recent alert (unresolved preferred).
    pub latest_alert: Option<DriftAlert>,
}

/// One persisted health evaluation.
#[derive(Debug, Clone, Serialize)]
pub struct HealthSample {
    /// Row id.
    pub id: i64,
    /// Owning endpoint id.
    pub endpoint_id: i64,
    /// When the request was evaluated.
    pub recorded_at: DateTime<Utc>,
    /// Observed latency.
    pub latency_ms: f64,
    /// Response status.
    pub status_code: i64,
    /// Response size in bytes.
    pub response_size_bytes: i64,
    /// Whether the status was ≥ 400.
    pub is_error: bool,
    /// Latency signal flag.
    pub latency_anomaly: bool,
    /// Error-rate signal flag.
    pub error_spike: bool,
    /// Size signal flag.
    pub size_anomaly: bool,
    /// Health score of the request.
    pub health_score: f64,
    /// Messages of every anomaly that fired.
    pub anomaly_reasons: Vec<String>,
}

/// A health evaluation about to be persisted.
#[derive(Debug, Clone)]
pub struct NewHealthSample {
    /// Owning endpoint id.
    pub endpoint_id: i64,
    /// Observed latency.
    pub latency_ms: f64,
    /// Response status.
    pub status_code: u16,
    /// Response size in bytes.
    pub response_size_bytes: u64,
    /// Latency signal flag.
    pub latency_anomaly: bool,
    /// Error-rate signal flag.
    pub error_spike: bool,
    /// Size signal flag.
    pub size_anomaly: bool,
    /// Health score of the request.
    pub health_score: f64,
    /// Messages of every anomaly that fired.
    pub anomaly_reasons: Vec<String>,
}

/// Which learned schema a control-plane update replaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaKind {
    /// The request schema.
    Inbound,
    /// The response schema.
    Outbound,
}
