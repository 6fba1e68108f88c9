//! The control plane
//!
//! Everything under `/admin`: platform switches, chaos configuration,
//! endpoint inspection, drift alert management, health, detector resets,
//! the recent request log, the live WebSocket feed, and the learned-contract
//! OpenAPI export. Authentication of admin callers is the outer layer's
//! concern.

use crate::broadcast;
use crate::error::ApiError;
use crate::state::AppState;
use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use mirage_core::{generate_body, normalize_path, ChaosProfile, PlatformMode, SchemaNode};
use mirage_store::SchemaKind;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::{json, Map, Value};

/// Build the `/admin` router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/config", get(get_config))
        .route("/mode", post(set_mode))
        .route("/learning", post(toggle_learning))
        .route("/chaos/profiles", get(list_profiles).post(set_profile))
        .route("/chaos", post(set_global_chaos))
        .route("/target", post(set_target))
        .route("/endpoints", get(list_endpoints))
        .route("/endpoints/manual", post(create_manual_endpoint))
        .route("/endpoints/{id}/stats", get(endpoint_stats))
        .route("/endpoints/{id}/chaos", post(configure_chaos))
        .route("/endpoints/{id}/schema", post(update_schema))
        .route("/endpoints/{id}/drift-stats", get(endpoint_drift_stats))
        .route("/drift-alerts", get(list_drift_alerts))
        .route("/drift-alerts/{id}/resolve", post(resolve_drift_alert))
        .route("/health", get(all_health))
        .route("/health/global", get(global_health))
        .route("/health/{id}", get(endpoint_health))
        .route("/detector/reset-all", post(reset_all_baselines))
        .route("/detector/reset/{*path}", post(reset_baseline))
        .route("/logs", get(recent_logs))
        .route("/ws", get(broadcast::ws_handler))
        .route("/export-openapi", get(export_openapi))
}

// ── Config & platform switches ──────────────────────────────────────────────

async fn get_config(State(state): State<AppState>) -> Json<Value> {
    let snapshot = state.platform.snapshot();
    Json(json!({
        "platform_mode": snapshot.mode,
        "learning_mode": snapshot.learning_enabled,
        "active_chaos_profile": snapshot.active_profile.key(),
        "target_url": snapshot.target_url,
    }))
}

#[derive(Deserialize)]
struct SetModeBody {
    mode: Option<String>,
}

async fn set_mode(
    State(state): State<AppState>,
    Json(body): Json<SetModeBody>,
) -> Result<Json<Value>, ApiError> {
    let mode = match body.mode.as_deref().unwrap_or("proxy") {
        "proxy" => PlatformMode::Proxy,
        "mock" => PlatformMode::Mock,
        other => {
            return Err(ApiError::bad_request(format!(
                "Invalid mode `{other}`. Expected `proxy` or `mock`."
            )))
        }
    };
    state.platform.set_mode(mode);
    Ok(Json(json!({ "status": "success", "mode": mode })))
}

#[derive(Deserialize)]
struct ToggleLearningBody {
    enabled: Option<bool>,
}

async fn toggle_learning(
    State(state): State<AppState>,
    Json(body): Json<ToggleLearningBody>,
) -> Json<Value> {
    let enabled = body.enabled.unwrap_or(true);
    state.platform.set_learning_enabled(enabled);
    Json(json!({ "status": "success", "learning_enabled": enabled }))
}

async fn list_profiles() -> Json<Value> {
    let mut profiles = Map::new();
    for profile in ChaosProfile::all() {
        profiles.insert(
            profile.key().to_string(),
            json!({
                "name": profile.name(),
                "description": profile.description(),
                "global_chaos": profile.global_chaos(),
            }),
        );
    }
    Json(Value::Object(profiles))
}

#[derive(Deserialize)]
struct SetProfileBody {
    profile: Option<String>,
}

async fn set_profile(
    State(state): State<AppState>,
    Json(body): Json<SetProfileBody>,
) -> Result<Json<Value>, ApiError> {
    let key = body.profile.as_deref().unwrap_or("normal");
    let profile = ChaosProfile::from_key(key)
        .ok_or_else(|| ApiError::bad_request(format!("Invalid profile `{key}`")))?;
    state.platform.set_active_profile(profile);
    Ok(Json(json!({ "status": "profile_applied", "profile": profile.key() })))
}

#[derive(Deserialize)]
struct GlobalChaosBody {
    level: Option<i64>,
}

async fn set_global_chaos(
    State(state): State<AppState>,
    Json(body): Json<GlobalChaosBody>,
) -> Result<Json<Value>, ApiError> {
    let level = body.level.unwrap_or(0);
    if !(0..=100).contains(&level) {
        return Err(ApiError::bad_request("Chaos level must be within 0..=100"));
    }
    let updated = state.store.set_global_chaos(level).await?;
    Ok(Json(json!({
        "status": "updated_globally",
        "level": level,
        "endpoints_updated": updated,
    })))
}

#[derive(Deserialize)]
struct SetTargetBody {
    target_url: Option<String>,
}

async fn set_target(
    State(state): State<AppState>,
    Json(body): Json<SetTargetBody>,
) -> Result<Json<Value>, ApiError> {
    let raw = body
        .target_url
        .ok_or_else(|| ApiError::bad_request("target_url is required"))?;
    let cleaned = state.platform.set_target_url(&raw)?;
    Ok(Json(json!({ "status": "success", "target_url": cleaned })))
}

// ── Endpoints ───────────────────────────────────────────────────────────────

async fn list_endpoints(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let endpoints = state.store.list_endpoints().await?;
    Ok(Json(json!(endpoints)))
}

async fn endpoint_stats(
    State(state): State<AppState>,
    Path(endpoint_id): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    let behavior = state
        .store
        .behavior(endpoint_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Endpoint not found"))?;
    let chaos = state.store.chaos(endpoint_id).await?;
    let detector = state
        .store
        .endpoint(endpoint_id)
        .await?
        .map(|endpoint| state.detector.stats(&endpoint.path_pattern));

    Ok(Json(json!({
        "behavior": {
            "latency_mean": behavior.latency_mean,
            "latency_std": behavior.latency_std,
            "error_rate": behavior.error_rate,
            "status_codes": behavior.status_code_distribution,
            "schema_preview": behavior.response_schema,
            "request_schema": behavior.request_schema,
        },
        "chaos": chaos.map(|c| json!({ "level": c.chaos_level, "active": c.is_active })),
        "detector": detector,
    })))
}

#[derive(Deserialize)]
struct ConfigureChaosBody {
    level: Option<i64>,
    active: Option<bool>,
}

async fn configure_chaos(
    State(state): State<AppState>,
    Path(endpoint_id): Path<i64>,
    Json(body): Json<ConfigureChaosBody>,
) -> Result<Json<Value>, ApiError> {
    let level = body.level.unwrap_or(0);
    if !(0..=100).contains(&level) {
        return Err(ApiError::bad_request("Chaos level must be within 0..=100"));
    }
    state
        .store
        .set_chaos(endpoint_id, level, body.active.unwrap_or(false))
        .await?;
    Ok(Json(json!({ "status": "updated" })))
}

#[derive(Deserialize)]
struct UpdateSchemaBody {
    schema: Option<Value>,
    #[serde(rename = "type", default)]
    kind: Option<String>,
}

async fn update_schema(
    State(state): State<AppState>,
    Path(endpoint_id): Path<i64>,
    Json(body): Json<UpdateSchemaBody>,
) -> Result<Json<Value>, ApiError> {
    let kind = match body.kind.as_deref().unwrap_or("outbound") {
        "inbound" => SchemaKind::Inbound,
        "outbound" => SchemaKind::Outbound,
        other => {
            return Err(ApiError::bad_request(format!(
                "Invalid schema type `{other}`. Expected `inbound` or `outbound`."
            )))
        }
    };
    // The payload is a sample body; a schema is learned from it
    let schema = body
        .schema
        .filter(|v| !v.is_null())
        .map(|sample| SchemaNode::learn(None, &sample));
    state
        .store
        .set_schema(endpoint_id, kind, schema.as_ref())
        .await?;
    Ok(Json(json!({ "status": "schema_updated", "type": body.kind.unwrap_or_else(|| "outbound".to_string()) })))
}

#[derive(Deserialize)]
struct ManualEndpointBody {
    method: Option<String>,
    path: Option<String>,
    status_code: Option<u16>,
    response_body: Option<Value>,
    request_body: Option<Value>,
}

/// Define an endpoint by hand before the real backend exists.
async fn create_manual_endpoint(
    State(state): State<AppState>,
    Json(body): Json<ManualEndpointBody>,
) -> Result<Json<Value>, ApiError> {
    let method = body.method.unwrap_or_else(|| "GET".to_string()).to_uppercase();
    let path = body
        .path
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .ok_or_else(|| ApiError::bad_request("Path is required"))?;
    let status_code = body.status_code.unwrap_or(200);
    let pattern = normalize_path(&path);

    let existed = state.store.find_endpoint(&method, &pattern).await?.is_some();
    let endpoint = state
        .store
        .get_or_create_endpoint(&method, &pattern, "manual://user-defined")
        .await?;

    let mut behavior = state
        .store
        .behavior(endpoint.id)
        .await?
        .ok_or_else(|| ApiError::not_found("Behavior row missing"))?;

    if !existed {
        // Manual endpoints start fast and clean instead of at the proxy
        // defaults
        behavior.latency_mean = 50.0;
        behavior.latency_std = 10.0;
        behavior.error_rate = 0.0;
    }
    if let Some(sample) = &body.response_body {
        behavior.response_schema = Some(SchemaNode::learn(behavior.response_schema.take(), sample));
        behavior.status_code_distribution =
            std::iter::once((status_code.to_string(), 1.0)).collect();
    }
    if let Some(sample) = &body.request_body {
        behavior.request_schema = Some(SchemaNode::learn(behavior.request_schema.take(), sample));
    }
    state.store.update_behavior(&behavior).await?;

    Ok(Json(json!({
        "status": if existed { "updated" } else { "created" },
        "id": endpoint.id,
        "method": method,
        "path": pattern,
    })))
}

// ── Drift alerts ────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct DriftAlertsQuery {
    endpoint_id: Option<i64>,
    #[serde(default)]
    unresolved_only: bool,
}

async fn list_drift_alerts(
    State(state): State<AppState>,
    Query(query): Query<DriftAlertsQuery>,
) -> Result<Json<Value>, ApiError> {
    let alerts = state
        .store
        .list_drift_alerts(query.endpoint_id, query.unresolved_only)
        .await?;
    Ok(Json(json!(alerts)))
}

async fn resolve_drift_alert(
    State(state): State<AppState>,
    Path(alert_id): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    if !state.store.resolve_drift_alert(alert_id).await? {
        return Err(ApiError::not_found("Alert not found"));
    }
    Ok(Json(json!({ "status": "resolved" })))
}

async fn endpoint_drift_stats(
    State(state): State<AppState>,
    Path(endpoint_id): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    let stats = state.store.drift_stats(endpoint_id).await?;
    Ok(Json(json!(stats)))
}

// ── Health ──────────────────────────────────────────────────────────────────

async fn all_health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "global": state.health.global_health(),
        "endpoints": state.health.all_endpoint_health(),
    }))
}

async fn global_health(State(state): State<AppState>) -> Json<Value> {
    Json(json!(state.health.global_health()))
}

async fn endpoint_health(
    State(state): State<AppState>,
    Path(endpoint_id): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    let current = state.health.endpoint_health(endpoint_id);
    let history = state.store.recent_health_samples(endpoint_id, 20).await?;
    Ok(Json(json!({ "current": current, "history": history })))
}

// ── Detector ────────────────────────────────────────────────────────────────

async fn reset_baseline(
    State(state): State<AppState>,
    Path(path): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let full_path = format!("/{}", path.trim_start_matches('/'));
    if !state.detector.reset(&full_path) {
        return Err(ApiError::not_found(format!(
            "No learned stats found for `{full_path}`"
        )));
    }
    Ok(Json(json!({
        "status": "reset",
        "endpoint": full_path,
        "message": "Baseline cleared. It will re-learn from new traffic.",
    })))
}

async fn reset_all_baselines(State(state): State<AppState>) -> Json<Value> {
    let cleared = state.detector.reset_all();
    Json(json!({
        "status": "reset",
        "endpoints_cleared": cleared,
        "message": "All baselines wiped. They will re-learn from fresh traffic.",
    }))
}

// ── Logs ────────────────────────────────────────────────────────────────────

async fn recent_logs(State(state): State<AppState>) -> Json<Value> {
    Json(json!(state.ring.snapshot()))
}

// ── OpenAPI export ──────────────────────────────────────────────────────────

static PATH_PARAM_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{([^}]*)\}").expect("path param regex is valid"));

/// Render every learned endpoint as an OpenAPI 3.0 document, with learned
/// status codes as responses and generated example payloads.
async fn export_openapi(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let endpoints = state.store.list_endpoints().await?;
    let mut paths: Map<String, Value> = Map::new();

    for endpoint in endpoints {
        let Some(behavior) = state.store.behavior(endpoint.id).await? else {
            continue;
        };

        let parameters: Vec<Value> = PATH_PARAM_RE
            .captures_iter(&endpoint.path_pattern)
            .map(|c| {
                json!({
                    "name": c[1].to_string(),
                    "in": "path",
                    "required": true,
                    "schema": { "type": "string" },
                })
            })
            .collect();

        let example = behavior
            .response_schema
            .as_ref()
            .and_then(|schema| generate_body(schema, None));

        let mut responses = Map::new();
        for (code, probability) in &behavior.status_code_distribution {
            // Error codes stay out of the learned success documentation
            if code.parse::<u16>().map_or(true, |c| c >= 400) {
                continue;
            }
            responses.insert(
                code.clone(),
                json!({
                    "description": format!(
                        "Learned response (occurs {:.0}% of cases)",
                        probability * 100.0
                    ),
                    "content": { "application/json": { "example": example } },
                }),
            );
        }
        if responses.is_empty() {
            responses.insert(
                "200".to_string(),
                json!({
                    "description": "Learned success response",
                    "content": { "application/json": { "example": example } },
                }),
            );
        }

        let method_key = endpoint.method.to_lowercase();
        let mut operation = json!({
            "summary": format!("Inferred {} for {}", endpoint.method, endpoint.path_pattern),
            "parameters": parameters,
            "responses": Value::Object(responses),
        });
        if matches!(method_key.as_str(), "post" | "put" | "patch" | "delete") {
            if let Some(request_schema) = &behavior.request_schema {
                if let Some(request_example) = generate_body(request_schema, None) {
                    operation["requestBody"] = json!({
                        "content": { "application/json": { "example": request_example } },
                    });
                }
            }
        }

        if let Some(methods) = paths
            .entry(endpoint.path_pattern.clone())
            .or_insert_with(|| Value::Object(Map::new()))
            .as_object_mut()
        {
            methods.insert(method_key, operation);
        }
    }

    Ok(Json(json!({
        "openapi": "3.0.0",
        "info": {
            "title": "Learned API Contract",
            "version": "1.0.0",
            "description": "Generated automatically by observing live traffic.",
        },
        "servers": [{ "url": "/", "description": "Mirage mock platform" }],
        "paths": Value::Object(paths),
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{router as app_router, AppConfig, AppState};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use mirage_store::Store;
    use tower::ServiceExt;

    async fn app() -> (AppState, axum::Router) {
        let store = Store::in_memory().await.expect("store");
        let state = AppState::new(store, AppConfig::default()).expect("state");
        let router = app_router(state.clone());
        (state, router)
    }

    fn post_json(path: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(path)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .expect("request")
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        serde_json::from_slice(&bytes).expect("json")
    }

    #[tokio::test]
    async fn mode_round_trips_through_the_control_plane() {
        let (state, router) = app().await;
        let response = router
            .clone()
            .oneshot(post_json("/admin/mode", json!({ "mode": "mock" })))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(state.platform.mode(), PlatformMode::Mock);

        let response = router
            .oneshot(post_json("/admin/mode", json!({ "mode": "sideways" })))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn target_url_scheme_is_validated() {
        let (_, router) = app().await;
        let response = router
            .clone()
            .oneshot(post_json(
                "/admin/target",
                json!({ "target_url": "ftp://nope" }),
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = router
            .oneshot(post_json(
                "/admin/target",
                json!({ "target_url": "https://api.example.com/" }),
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["target_url"], "https://api.example.com");
    }

    #[tokio::test]
    async fn invalid_profile_is_rejected() {
        let (state, router) = app().await;
        let response = router
            .clone()
            .oneshot(post_json(
                "/admin/chaos/profiles",
                json!({ "profile": "volcano" }),
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = router
            .oneshot(post_json(
                "/admin/chaos/profiles",
                json!({ "profile": "friday_afternoon" }),
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(state.platform.active_profile(), ChaosProfile::FridayAfternoon);
    }

    #[tokio::test]
    async fn manual_endpoint_definition_learns_its_samples() {
        let (state, router) = app().await;
        let response = router
            .clone()
            .oneshot(post_json(
                "/admin/endpoints/manual",
                json!({
                    "method": "post",
                    "path": "/users/{id}/notes",
                    "status_code": 201,
                    "response_body": { "id": 1, "text": "hello" },
                    "request_body": { "text": "hello" },
                }),
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "created");

        let endpoint = state
            .store
            .find_endpoint("POST", "/users/{id}/notes")
            .await
            .expect("query")
            .expect("created");
        let behavior = state
            .store
            .behavior(endpoint.id)
            .await
            .expect("query")
            .expect("behavior");
        assert_eq!(behavior.latency_mean, 50.0);
        assert_eq!(behavior.status_code_distribution["201"], 1.0);
        assert!(behavior.response_schema.expect("schema").children.contains_key("text"));
    }

    #[tokio::test]
    async fn drift_alert_listing_and_resolution() {
        let (state, router) = app().await;
        let endpoint = state
            .store
            .get_or_create_endpoint("GET", "/drifting", "http://t")
            .await
            .expect("endpoint");
        state
            .store
            .upsert_drift_alert(endpoint.id, 15.0, "changes", &[])
            .await
            .expect("upsert");

        let response = router
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/admin/drift-alerts?unresolved_only=true")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        let alerts = body_json(response).await;
        let alert_id = alerts[0]["id"].as_i64().expect("id");

        let response = router
            .clone()
            .oneshot(post_json(
                &format!("/admin/drift-alerts/{alert_id}/resolve"),
                json!({}),
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        assert!(!state
            .store
            .has_unresolved_drift(endpoint.id)
            .await
            .expect("check"));

        // Resolving again still succeeds at the store level; a bogus id 404s
        let response = router
            .oneshot(post_json("/admin/drift-alerts/99999/resolve", json!({})))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn detector_reset_routes() {
        let (state, router) = app().await;
        state.detector.update("/api/items", 100.0);

        let response = router
            .clone()
            .oneshot(post_json("/admin/detector/reset/api/items", json!({})))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(state.detector.count("/api/items"), 0);

        let response = router
            .oneshot(post_json("/admin/detector/reset/api/items", json!({})))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn openapi_export_reflects_learned_endpoints() {
        let (state, router) = app().await;
        let endpoint = state
            .store
            .get_or_create_endpoint("GET", "/users/{id}", "http://t")
            .await
            .expect("endpoint");
        let mut behavior = state
            .store
            .behavior(endpoint.id)
            .await
            .expect("q")
            .expect("b");
        behavior
            .status_code_distribution
            .insert("200".to_string(), 1.0);
        behavior.response_schema = Some(SchemaNode::learn(None, &json!({ "name": "x" })));
        state.store.update_behavior(&behavior).await.expect("update");

        let response = router
            .oneshot(
                Request::builder()
                    .uri("/admin/export-openapi")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        let doc = body_json(response).await;
        assert_eq!(doc["openapi"], "3.0.0");
        let operation = &doc["paths"]["/users/{id}"]["get"];
        assert_eq!(operation["parameters"][0]["name"], "id");
        assert!(operation["responses"]["200"].is_object());
    }
}
