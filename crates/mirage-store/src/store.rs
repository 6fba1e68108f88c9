//! The store adapter: CRUD over the five entity families

use crate::error::{Result, StoreError};
use crate::models::{
    Behavior, ChaosSettings, DriftAlert, DriftStats, Endpoint, HealthSample, NewHealthSample,
    SchemaKind,
};
use chrono::{DateTime, Utc};
use mirage_core::schema::{ContractChange, SchemaNode};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

const MIGRATION_SQL: &str = include_str!("../migrations/001_initial_schema.sql");

/// Handle to the SQLite store.
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Open (or create) the database file and run migrations.
    pub async fn connect(database_path: &Path) -> Result<Self> {
        info!(path = %database_path.display(), "connecting to store");
        let options = SqliteConnectOptions::new()
            .filename(database_path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .connect_with(options)
            .await?;

        // WAL for concurrent readers alongside the single writer
        sqlx::query("PRAGMA journal_mode = WAL").execute(&pool).await?;
        sqlx::query("PRAGMA foreign_keys = ON").execute(&pool).await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// In-memory store for tests and ephemeral runs.
    ///
    /// A single pooled connection: each SQLite `:memory:` connection is its
    /// own database.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        sqlx::query("PRAGMA foreign_keys = ON").execute(&pool).await?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::raw_sql(MIGRATION_SQL)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Migration(e.to_string()))?;
        debug!("store migrations applied");
        Ok(())
    }

    /// The underlying pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // ========================================================================
    // Endpoints
    // ========================================================================

    /// Find an endpoint by its identity key.
    pub async fn find_endpoint(&self, method: &str, path_pattern: &str) -> Result<Option<Endpoint>> {
        let endpoint = sqlx::query_as::<_, Endpoint>(
            "SELECT id, method, path_pattern, target_url, created_at
             FROM endpoints WHERE method = ? AND path_pattern = ?",
        )
        .bind(method)
        .bind(path_pattern)
        .fetch_optional(&self.pool)
        .await?;
        Ok(endpoint)
    }

    /// Find an endpoint by row id.
    pub async fn endpoint(&self, endpoint_id: i64) -> Result<Option<Endpoint>> {
        let endpoint = sqlx::query_as::<_, Endpoint>(
            "SELECT id, method, path_pattern, target_url, created_at
             FROM endpoints WHERE id = ?",
        )
        .bind(endpoint_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(endpoint)
    }

    /// All learned endpoints, oldest first.
    pub async fn list_endpoints(&self) -> Result<Vec<Endpoint>> {
        let endpoints = sqlx::query_as::<_, Endpoint>(
            "SELECT id, method, path_pattern, target_url, created_at
             FROM endpoints ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(endpoints)
    }

    /// Find or atomically create an endpoint together with its behavior and
    /// chaos rows.
    ///
    /// Two handlers can race on first observation; the loser of the unique
    /// constraint retries once and returns the winner's row.
    pub async fn get_or_create_endpoint(
        &self,
        method: &str,
        path_pattern: &str,
        target_url: &str,
    ) -> Result<Endpoint> {
        if let Some(endpoint) = self.find_endpoint(method, path_pattern).await? {
            return Ok(endpoint);
        }

        match self.create_endpoint(method, path_pattern, target_url).await {
            Ok(endpoint) => Ok(endpoint),
            Err(e) if e.is_unique_violation() => self
                .find_endpoint(method, path_pattern)
                .await?
                .ok_or_else(|| {
                    StoreError::NotFound(format!("endpoint {method} {path_pattern} after race"))
                }),
            Err(e) => Err(e),
        }
    }

    async fn create_endpoint(
        &self,
        method: &str,
        path_pattern: &str,
        target_url: &str,
    ) -> Result<Endpoint> {
        let created_at = Utc::now();
        let mut tx = self.pool.begin().await?;

        let endpoint_id = sqlx::query(
            "INSERT INTO endpoints (method, path_pattern, target_url, created_at)
             VALUES (?, ?, ?, ?)",
        )
        .bind(method)
        .bind(path_pattern)
        .bind(target_url)
        .bind(created_at)
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

        sqlx::query("INSERT INTO endpoint_behavior (endpoint_id) VALUES (?)")
            .bind(endpoint_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("INSERT INTO chaos_config (endpoint_id) VALUES (?)")
            .bind(endpoint_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        debug!(%method, %path_pattern, endpoint_id, "endpoint created");

        Ok(Endpoint {
            id: endpoint_id,
            method: method.to_string(),
            path_pattern: path_pattern.to_string(),
            target_url: target_url.to_string(),
            created_at,
        })
    }

    // ========================================================================
    // Behavior
    // ========================================================================

    /// The learned behavior of an endpoint.
    pub async fn behavior(&self, endpoint_id: i64) -> Result<Option<Behavior>> {
        let row = sqlx::query_as::<_, BehaviorRow>(
            "SELECT endpoint_id, latency_mean, latency_std, error_rate,
                    status_code_distribution, response_schema, request_schema
             FROM endpoint_behavior WHERE endpoint_id = ?",
        )
        .bind(endpoint_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Behavior::try_from).transpose()
    }

    /// Persist the whole behavior row in one statement.
    pub async fn update_behavior(&self, behavior: &Behavior) -> Result<()> {
        sqlx::query(
            "UPDATE endpoint_behavior
             SET latency_mean = ?, latency_std = ?, error_rate = ?,
                 status_code_distribution = ?, response_schema = ?, request_schema = ?
             WHERE endpoint_id = ?",
        )
        .bind(behavior.latency_mean)
        .bind(behavior.latency_std)
        .bind(behavior.error_rate)
        .bind(serde_json::to_string(&behavior.status_code_distribution)?)
        .bind(schema_text(behavior.response_schema.as_ref())?)
        .bind(schema_text(behavior.request_schema.as_ref())?)
        .bind(behavior.endpoint_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Replace one learned schema outright (control-plane updates and manual
    /// endpoint definitions).
    pub async fn set_schema(
        &self,
        endpoint_id: i64,
        kind: SchemaKind,
        schema: Option<&SchemaNode>,
    ) -> Result<()> {
        let column = match kind {
            SchemaKind::Inbound => "request_schema",
            SchemaKind::Outbound => "response_schema",
        };
        let sql = format!("UPDATE endpoint_behavior SET {column} = ? WHERE endpoint_id = ?");
        sqlx::query(&sql)
            .bind(schema_text(schema)?)
            .bind(endpoint_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ========================================================================
    // Chaos
    // ========================================================================

    /// Per-endpoint chaos settings.
    pub async fn chaos(&self, endpoint_id: i64) -> Result<Option<ChaosSettings>> {
        let settings = sqlx::query_as::<_, ChaosSettings>(
            "SELECT endpoint_id, chaos_level, is_active
             FROM chaos_config WHERE endpoint_id = ?",
        )
        .bind(endpoint_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(settings)
    }

    /// Configure chaos for one endpoint.
    pub async fn set_chaos(&self, endpoint_id: i64, level: i64, active: bool) -> Result<()> {
        sqlx::query("UPDATE chaos_config SET chaos_level = ?, is_active = ? WHERE endpoint_id = ?")
            .bind(level)
            .bind(active)
            .bind(endpoint_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Bulk-update every chaos config (the control plane's global slider).
    pub async fn set_global_chaos(&self, level: i64) -> Result<u64> {
        let result = sqlx::query("UPDATE chaos_config SET chaos_level = ?, is_active = 1")
            .bind(level)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    // ========================================================================
    // Drift alerts
    // ========================================================================

    /// Upsert the endpoint's unresolved drift alert.
    ///
    /// At most one unresolved alert exists per endpoint: the newest
    /// unresolved row is updated in place and any stray duplicates are
    /// resolved in the same transaction; with no unresolved row a fresh one
    /// is inserted.
    pub async fn upsert_drift_alert(
        &self,
        endpoint_id: i64,
        drift_score: f64,
        drift_summary: &str,
        drift_details: &[ContractChange],
    ) -> Result<()> {
        let now = Utc::now();
        let details_json = serde_json::to_string(drift_details)?;
        let mut tx = self.pool.begin().await?;

        let unresolved: Vec<i64> = sqlx::query_scalar(
            "SELECT id FROM drift_alerts
             WHERE endpoint_id = ? AND is_resolved = 0
             ORDER BY detected_at DESC, id DESC",
        )
        .bind(endpoint_id)
        .fetch_all(&mut *tx)
        .await?;

        match unresolved.split_first() {
            Some((current, strays)) => {
                sqlx::query(
                    "UPDATE drift_alerts
                     SET detected_at = ?, drift_score = ?, drift_summary = ?, drift_details = ?
                     WHERE id = ?",
                )
                .bind(now)
                .bind(drift_score)
                .bind(drift_summary)
                .bind(&details_json)
                .bind(current)
                .execute(&mut *tx)
                .await?;

                for stray in strays {
                    sqlx::query(
                        "UPDATE drift_alerts SET is_resolved = 1, resolved_at = ? WHERE id = ?",
                    )
                    .bind(now)
                    .bind(stray)
                    .execute(&mut *tx)
                    .await?;
                }
                if !strays.is_empty() {
                    debug!(endpoint_id, strays = strays.len(), "resolved stray drift alerts");
                }
            }
            None => {
                sqlx::query(
                    "INSERT INTO drift_alerts
                         (endpoint_id, detected_at, drift_score, drift_summary, drift_details, is_resolved)
                     VALUES (?, ?, ?, ?, ?, 0)",
                )
                .bind(endpoint_id)
                .bind(now)
                .bind(drift_score)
                .bind(drift_summary)
                .bind(&details_json)
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;
        Ok(())
    }

    /// Number of unresolved alerts for an endpoint (0 or 1 by invariant).
    pub async fn unresolved_drift_count(&self, endpoint_id: i64) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM drift_alerts WHERE endpoint_id = ? AND is_resolved = 0",
        )
        .bind(endpoint_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    /// Whether the endpoint has an unresolved drift alert.
    pub async fn has_unresolved_drift(&self, endpoint_id: i64) -> Result<bool> {
        Ok(self.unresolved_drift_count(endpoint_id).await? > 0)
    }

    /// List drift alerts, newest first, optionally filtered.
    pub async fn list_drift_alerts(
        &self,
        endpoint_id: Option<i64>,
        unresolved_only: bool,
    ) -> Result<Vec<DriftAlert>> {
        let mut sql = String::from(
            "SELECT id, endpoint_id, detected_at, drift_score, drift_summary,
                    drift_details, is_resolved, resolved_at
             FROM drift_alerts",
        );
        let mut clauses: Vec<&str> = Vec::new();
        if endpoint_id.is_some() {
            clauses.push("endpoint_id = ?");
        }
        if unresolved_only {
            clauses.push("is_resolved = 0");
        }
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY detected_at DESC, id DESC");

        let mut query = sqlx::query_as::<_, DriftAlertRow>(&sql);
        if let Some(id) = endpoint_id {
            query = query.bind(id);
        }
        let rows = query.fetch_all(&self.pool).await?;
        rows.into_iter().map(DriftAlert::try_from).collect()
    }

    /// Mark an alert resolved. Returns false when the id does not exist.
    pub async fn resolve_drift_alert(&self, alert_id: i64) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE drift_alerts SET is_resolved = 1, resolved_at = ? WHERE id = ?",
        )
        .bind(Utc::now())
        .bind(alert_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Aggregated drift history for one endpoint.
    pub async fn drift_stats(&self, endpoint_id: i64) -> Result<DriftStats> {
        let alerts = self.list_drift_alerts(Some(endpoint_id), false).await?;
        let total = alerts.len() as i64;
        let unresolved: Vec<&DriftAlert> = alerts.iter().filter(|a| !a.is_resolved).collect();
        let average = if alerts.is_empty() {
            0.0
        } else {
            alerts.iter().map(|a| a.drift_score).sum::<f64>() / alerts.len() as f64
        };
        let latest = unresolved
            .first()
            .copied()
            .or_else(|| alerts.first())
            .cloned();

        Ok(DriftStats {
            total_alerts: total,
            unresolved_alerts: unresolved.len() as i64,
            average_drift_score: average,
            latest_alert: latest,
        })
    }

    // ========================================================================
    // Health samples
    // ========================================================================

    /// Persist one health evaluation.
    pub async fn insert_health_sample(&self, sample: &NewHealthSample) -> Result<i64> {
        let result = sqlx::query(
            "INSERT INTO health_samples
                 (endpoint_id, recorded_at, latency_ms, status_code, response_size_bytes,
                  is_error, latency_anomaly, error_spike, size_anomaly, health_score,
                  anomaly_reasons)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(sample.endpoint_id)
        .bind(Utc::now())
        .bind(sample.latency_ms)
        .bind(i64::from(sample.status_code))
        .bind(sample.response_size_bytes as i64)
        .bind(sample.status_code >= 400)
        .bind(sample.latency_anomaly)
        .bind(sample.error_spike)
        .bind(sample.size_anomaly)
        .bind(sample.health_score)
        .bind(serde_json::to_string(&sample.anomaly_reasons)?)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    /// The most recent health samples for an endpoint, newest first.
    pub async fn recent_health_samples(
        &self,
        endpoint_id: i64,
        limit: i64,
    ) -> Result<Vec<HealthSample>> {
        let rows = sqlx::query_as::<_, HealthSampleRow>(
            "SELECT id, endpoint_id, recorded_at, latency_ms, status_code,
                    response_size_bytes, is_error, latency_anomaly, error_spike,
                    size_anomaly, health_score, anomaly_reasons
             FROM health_samples
             WHERE endpoint_id = ?
             ORDER BY recorded_at DESC, id DESC
             LIMIT ?",
        )
        .bind(endpoint_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(HealthSample::try_from).collect()
    }
}

fn schema_text(schema: Option<&SchemaNode>) -> Result<Option<String>> {
    schema
        .map(|s| serde_json::to_string(s).map_err(StoreError::from))
        .transpose()
}

// ============================================================================
// Row ↔ model conversions (JSON columns are TEXT)
// ============================================================================

#[derive(sqlx::FromRow)]
struct BehaviorRow {
    endpoint_id: i64,
    latency_mean: f64,
    latency_std: f64,
    error_rate: f64,
    status_code_distribution: String,
    response_schema: Option<String>,
    request_schema: Option<String>,
}

impl TryFrom<BehaviorRow> for Behavior {
    type Error = StoreError;

    fn try_from(row: BehaviorRow) -> Result<Self> {
        let status_code_distribution: HashMap<String, f64> =
            serde_json::from_str(&row.status_code_distribution)?;
        Ok(Self {
            endpoint_id: row.endpoint_id,
            latency_mean: row.latency_mean,
            latency_std: row.latency_std,
            error_rate: row.error_rate,
            status_code_distribution,
            response_schema: parse_schema(row.response_schema.as_deref())?,
            request_schema: parse_schema(row.request_schema.as_deref())?,
        })
    }
}

fn parse_schema(text: Option<&str>) -> Result<Option<SchemaNode>> {
    text.map(|t| serde_json::from_str(t).map_err(StoreError::from))
        .transpose()
}

#[derive(sqlx::FromRow)]
struct DriftAlertRow {
    id: i64,
    endpoint_id: i64,
    detected_at: DateTime<Utc>,
    drift_score: f64,
    drift_summary: Option<String>,
    drift_details: Option<String>,
    is_resolved: bool,
    resolved_at: Option<DateTime<Utc>>,
}

impl TryFrom<DriftAlertRow> for DriftAlert {
    type Error = StoreError;

    fn try_from(row: DriftAlertRow) -> Result<Self> {
        let drift_details = match row.drift_details.as_deref() {
            Some(text) => serde_json::from_str(text)?,
            None => Vec::new(),
        };
        Ok(Self {
            id: row.id,
            endpoint_id: row.endpoint_id,
            detected_at: row.detected_at,
            drift_score: row.drift_score,
            drift_summary: row.drift_summary,
            drift_details,
            is_resolved: row.is_resolved,
            resolved_at: row.resolved_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct HealthSampleRow {
    id: i64,
    endpoint_id: i64,
    recorded_at: DateTime<Utc>,
    latency_ms: f64,
    status_code: i64,
    response_size_bytes: i64,
    is_error: bool,
    latency_anomaly: bool,
    error_spike: bool,
    size_anomaly: bool,
    health_score: f64,
    anomaly_reasons: Option<String>,
}

impl TryFrom<HealthSampleRow> for HealthSample {
    type Error = StoreError;

    fn try_from(row: HealthSampleRow) -> Result<Self> {
        let anomaly_reasons = match row.anomaly_reasons.as_deref() {
            Some(text) => serde_json::from_str(text)?,
            None => Vec::new(),
        };
        Ok(Self {
            id: row.id,
            endpoint_id: row.endpoint_id,
            recorded_at: row.recorded_at,
            latency_ms: row.latency_ms,
            status_code: row.status_code,
            response_size_bytes: row.response_size_bytes,
            is_error: row.is_error,
            latency_anomaly: row.latency_anomaly,
            error_spike: row.error_spike,
            size_anomaly: row.size_anomaly,
            health_score: row.health_score,
            anomaly_reasons,
        })
    }
}
