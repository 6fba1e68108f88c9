//! The request dispatcher
//!
//! Every non-admin request lands here: guard, normalize, pick a mode, touch
//! the store, then either synthesize a response or forward upstream with
//! automatic failover. Learning, drift detection, and health monitoring all
//! hang off the proxy path and never block the client.

use crate::forwarder::{self, UpstreamOutcome, UpstreamResponse};
use crate::learning::Observation;
use crate::state::AppState;
use crate::{broadcast, mock};
use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use mirage_core::schema::{drift_score, drift_summary, ContractChange, Severity};
use mirage_core::{normalize_path, HealthInput, LogEntry, PlatformMode, ServeMode};
use mirage_store::{Behavior, Endpoint, NewHealthSample};
use serde_json::{json, Value};
use tracing::{error, warn};

/// Header that overrides the platform mode for one request.
pub const MOCK_ENABLED_HEADER: &str = "x-mock-enabled";

/// Largest request body the dispatcher will buffer.
const BODY_LIMIT: usize = 10 * 1024 * 1024;

/// The catch-all handler behind the `/admin` router.
pub async fn handle(State(state): State<AppState>, request: Request) -> Response {
    let (parts, body) = request.into_parts();
    let method = parts.method;
    let uri = parts.uri;
    let headers = parts.headers;
    let path = uri.path().to_string();

    // Admin routes that did not match a named handler must 404 cleanly, not
    // fall through to the proxy and get learned as endpoints
    if path == "/admin" || path.starts_with("/admin/") {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({ "detail": "Not found" })),
        )
            .into_response();
    }

    // Without a target the platform is not set up; random browser traffic
    // would otherwise create garbage endpoint rows
    let Some(target) = state.platform.target_url() else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "detail": "No target URL configured. Set one through the control plane."
            })),
        )
            .into_response();
    };

    if method == Method::OPTIONS {
        return StatusCode::OK.into_response();
    }

    let pattern = normalize_path(&path);

    // Per-request header override wins over the platform mode
    let mock_enabled = match header_str(&headers, MOCK_ENABLED_HEADER) {
        Some(value) => value.eq_ignore_ascii_case("true"),
        None => state.platform.mode() == PlatformMode::Mock,
    };

    let body_bytes = axum::body::to_bytes(body, BODY_LIMIT).await.unwrap_or_default();
    let request_json: Option<Value> = if body_bytes.is_empty() {
        None
    } else {
        serde_json::from_slice(&body_bytes).ok()
    };

    let endpoint = match state
        .store
        .get_or_create_endpoint(method.as_str(), &pattern, &target)
        .await
    {
        Ok(endpoint) => endpoint,
        Err(e) => {
            error!(error = %e, %pattern, "store failure in dispatcher");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "detail": "Store failure" })),
            )
                .into_response();
        }
    };
    let behavior = state
        .store
        .behavior(endpoint.id)
        .await
        .ok()
        .flatten()
        .unwrap_or_else(|| Behavior::defaults(endpoint.id));
    let chaos = state.store.chaos(endpoint.id).await.ok().flatten();

    if mock_enabled {
        return mock::generate(
            &state,
            &behavior,
            chaos,
            &pattern,
            method.as_str(),
            &headers,
            request_json.as_ref(),
            false,
        )
        .await;
    }

    // Proxy mode, with automatic mock failover
    let path_and_query = uri
        .path_and_query()
        .map_or_else(|| path.clone(), |pq| pq.as_str().to_string());

    match forwarder::forward(
        &state.upstream,
        &target,
        &path_and_query,
        &method,
        &headers,
        body_bytes,
    )
    .await
    {
        Ok(UpstreamOutcome::Completed(upstream)) => {
            fan_out(
                &state,
                &endpoint,
                &behavior,
                &pattern,
                method.as_str(),
                &upstream,
                request_json,
            )
            .await;
            relay(upstream)
        }
        Ok(UpstreamOutcome::NetworkFailure { latency_ms, .. }) => {
            // The backend is down: record the failure as an observation,
            // then serve a mock instead of an error
            if state.platform.learning_enabled() {
                state.buffer.push(Observation {
                    method: method.as_str().to_string(),
                    pattern: pattern.clone(),
                    status: 502,
                    latency_ms,
                    request_body: request_json.clone(),
                    response_body: None,
                });
            }
            state.detector.update(&pattern, latency_ms);

            mock::generate(
                &state,
                &behavior,
                chaos,
                &pattern,
                method.as_str(),
                &headers,
                request_json.as_ref(),
                true,
            )
            .await
        }
        Err(e) => {
            error!(error = %e, %pattern, "unclassified upstream failure");
            (
                StatusCode::BAD_GATEWAY,
                Json(json!({ "detail": format!("Proxy error: {e}") })),
            )
                .into_response()
        }
    }
}

/// Feed one completed upstream exchange to the three consumers: the
/// learning buffer, schema intelligence, and the detector + health monitor.
/// Store writes happen on spawned tasks; nothing here blocks the relay.
async fn fan_out(
    state: &AppState,
    endpoint: &Endpoint,
    behavior: &Behavior,
    pattern: &str,
    method: &str,
    upstream: &UpstreamResponse,
    request_json: Option<Value>,
) {
    let response_json: Option<Value> = serde_json::from_slice(&upstream.body).ok();

    // 1. Learning buffer
    if state.platform.learning_enabled() {
        state.buffer.push(Observation {
            method: method.to_string(),
            pattern: pattern.to_string(),
            status: upstream.status,
            latency_ms: upstream.latency_ms,
            request_body: request_json,
            response_body: response_json.clone(),
        });
    }

    // 2. Schema intelligence: learn, compare, persist severe drift. Scalar
    //    top-level payloads still learn, as a leaf on the root node.
    let mut has_drift = false;
    if let Some(body) = &response_json {
        let (_, changes) = state.schemas.learn_and_compare(pattern, body);
        let severe: Vec<ContractChange> = changes
            .into_iter()
            .filter(|c| matches!(c.severity, Severity::Breaking | Severity::Warning))
            .collect();
        if !severe.is_empty() {
            has_drift = true;
            let score = drift_score(&severe);
            let summary = drift_summary(&severe);
            let store = state.store.clone();
            let endpoint_id = endpoint.id;
            tokio::spawn(async move {
                if let Err(e) = store
                    .upsert_drift_alert(endpoint_id, score, &summary, &severe)
                    .await
                {
                    error!(endpoint_id, error = %e, "failed to store drift alert");
                }
            });
        }
    }

    // 3. Detector + health monitor
    state.detector.update(pattern, upstream.latency_ms);

    let has_active_drift = has_drift
        || state
            .store
            .has_unresolved_drift(endpoint.id)
            .await
            .unwrap_or(false);

    let assessment = state.health.evaluate(
        &state.detector,
        &HealthInput {
            endpoint_id: endpoint.id,
            path_pattern: pattern.to_string(),
            latency_ms: upstream.latency_ms,
            status_code: upstream.status,
            response_size: upstream.body.len() as u64,
            learned_error_rate: behavior.error_rate,
            has_active_drift,
        },
    );
    for anomaly in &assessment.anomalies {
        warn!(%pattern, severity = ?anomaly.severity, "health anomaly: {}", anomaly.message);
    }

    {
        let store = state.store.clone();
        let sample = NewHealthSample {
            endpoint_id: endpoint.id,
            latency_ms: upstream.latency_ms,
            status_code: upstream.status,
            response_size_bytes: upstream.body.len() as u64,
            latency_anomaly: assessment.latency_anomaly,
            error_spike: assessment.error_spike,
            size_anomaly: assessment.size_anomaly,
            health_score: assessment.health_score,
            anomaly_reasons: assessment
                .anomalies
                .iter()
                .map(|a| a.message.clone())
                .collect(),
        };
        tokio::spawn(async move {
            if let Err(e) = store.insert_health_sample(&sample).await {
                error!(endpoint_id = sample.endpoint_id, error = %e, "failed to store health sample");
            }
        });
    }

    // Log ring + live feed
    let entry = LogEntry::now(
        method,
        pattern,
        upstream.status,
        upstream.latency_ms,
        ServeMode::Proxy,
        has_drift,
        assessment.status,
        assessment.health_score,
    );
    broadcast::publish(
        &state.ring,
        &state.broadcaster,
        entry,
        Some(&assessment),
        &state.health.global_health(),
    );
}

/// Relay the upstream response verbatim: content, status, headers.
fn relay(upstream: UpstreamResponse) -> Response {
    let mut response = Response::builder().status(upstream.status);
    if let Some(headers) = response.headers_mut() {
        *headers = upstream.headers;
    }
    response
        .body(Body::from(upstream.body))
        .unwrap_or_else(|_| StatusCode::BAD_GATEWAY.into_response())
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::FAILOVER_MARKER;
    use crate::state::{router, AppConfig, AppState};
    use mirage_store::Store;
    use tower::ServiceExt;

    async fn app(target: Option<&str>) -> (AppState, axum::Router) {
        let store = Store::in_memory().await.expect("store");
        let state = AppState::new(
            store,
            AppConfig {
                target_url: target.map(ToString::to_string),
                data_dir: None,
                // Large threshold: tests inspect the buffer directly
                learning_buffer_size: 1000,
            },
        )
        .expect("state");
        let router = router(state.clone());
        (state, router)
    }

    fn get(path: &str) -> Request {
        Request::builder()
            .method("GET")
            .uri(path)
            .body(Body::empty())
            .expect("request")
    }

    async fn body_json(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        serde_json::from_slice(&bytes).expect("json body")
    }

    #[tokio::test]
    async fn unmatched_admin_paths_are_not_found() {
        let (_, router) = app(Some("http://127.0.0.1:9")).await;
        let response = router.oneshot(get("/admin/nope")).await.expect("response");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn missing_target_is_service_unavailable() {
        let (_, router) = app(None).await;
        let response = router.oneshot(get("/anything")).await.expect("response");
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn options_requests_get_an_empty_success() {
        let (_, router) = app(Some("http://127.0.0.1:9")).await;
        let request = Request::builder()
            .method("OPTIONS")
            .uri("/api/items")
            .body(Body::empty())
            .expect("request");
        let response = router.oneshot(request).await.expect("response");
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn mock_header_forces_mock_regardless_of_global_mode() {
        let (state, router) = app(Some("http://127.0.0.1:9")).await;
        assert_eq!(state.platform.mode(), PlatformMode::Proxy);

        let request = Request::builder()
            .method("GET")
            .uri("/api/widgets")
            .header("X-Mock-Enabled", "true")
            .body(Body::empty())
            .expect("request");
        let response = router.oneshot(request).await.expect("response");
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        // Nothing learned yet: the default informational object
        assert_eq!(body["endpoint"], "/api/widgets");
        assert!(body["message"].is_string());

        // The endpoint row was created on first observation
        let endpoint = state
            .store
            .find_endpoint("GET", "/api/widgets")
            .await
            .expect("query");
        assert!(endpoint.is_some());
    }

    #[tokio::test]
    async fn unreachable_upstream_fails_over_to_an_annotated_mock() {
        let (state, router) = app(Some("http://127.0.0.1:9")).await;

        let response = router
            .oneshot(get("/orders/42"))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert!(body.get(FAILOVER_MARKER).is_some(), "body was {body}");

        // The failure itself became a learnable observation
        let batch = state.buffer.swap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].status, 502);
        assert_eq!(batch[0].pattern, "/orders/{id}");
        assert!(batch[0].response_body.is_none());

        // And the detector saw the latency sample
        assert_eq!(state.detector.count("/orders/{id}"), 1);
    }

    #[tokio::test]
    async fn high_cardinality_paths_collapse_to_one_endpoint() {
        let (state, router) = app(Some("http://127.0.0.1:9")).await;

        for id in [1, 2, 3] {
            let request = Request::builder()
                .method("GET")
                .uri(format!("/users/{id}"))
                .header("X-Mock-Enabled", "true")
                .body(Body::empty())
                .expect("request");
            let response = router
                .clone()
                .oneshot(request)
                .await
                .expect("response");
            assert_eq!(response.status(), StatusCode::OK);
        }

        let endpoints = state.store.list_endpoints().await.expect("list");
        assert_eq!(endpoints.len(), 1);
        assert_eq!(endpoints[0].path_pattern, "/users/{id}");
    }
}
