//! Synthetic response generation from learned behavior
//!
//! The mock generator replays what it learned: latency sampled around the
//! learned mean, status codes drawn from the learned distribution, bodies
//! synthesized from the learned response schema. Chaos (per-endpoint,
//! profile, per-request header) degrades all of it on purpose.

use crate::broadcast;
use crate::state::AppState;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use mirage_core::chaos;
use mirage_core::{generate_body, HealthStatus, LogEntry, ServeMode};
use mirage_store::{Behavior, ChaosSettings};
use rand::Rng;
use serde_json::{json, Value};
use std::time::Duration;

/// Header that forces a chaos level for one request.
pub const CHAOS_LEVEL_HEADER: &str = "x-chaos-level";

/// Marker key injected into failover bodies.
pub const FAILOVER_MARKER: &str = "_failover";

/// Generate a synthetic response for `pattern` from its learned behavior.
#[allow(clippy::too_many_arguments)]
pub async fn generate(
    state: &AppState,
    behavior: &Behavior,
    chaos_settings: Option<ChaosSettings>,
    pattern: &str,
    method: &str,
    headers: &HeaderMap,
    request_body: Option<&Value>,
    is_failover: bool,
) -> Response {
    let profile = state.platform.active_profile();

    let (endpoint_level, endpoint_active) =
        chaos_settings.map_or((0, false), |c| (c.chaos_level, c.is_active));
    let header_override = headers
        .get(CHAOS_LEVEL_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<i64>().ok());
    let effective = chaos::effective_chaos(endpoint_level, endpoint_active, profile, header_override);

    // Error decision first: a chaos-injected failure skips the latency
    // simulation, mirroring a fast upstream 500
    if chaos::should_inject_error(behavior.error_rate, effective) {
        log_mock(state, method, pattern, 500, 0.0);
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({
                "error": "Chaos injected",
                "endpoint": pattern,
                "failover": is_failover,
                "profile": profile.key(),
            })),
        )
            .into_response();
    }

    let latency_ms = chaos::sample_latency_ms(
        behavior.latency_mean,
        behavior.latency_std,
        effective,
        profile,
        method,
    );
    tokio::time::sleep(Duration::from_millis(latency_ms as u64)).await;

    let status = sample_status(behavior);

    if profile.corrupts_responses() {
        // Zombie mode: a confident 200 with garbage in it
        let body = chaos::corrupted_body();
        log_mock(state, method, pattern, 200, latency_ms);
        return (
            StatusCode::OK,
            [(axum::http::header::CONTENT_TYPE, "text/plain")],
            body,
        )
            .into_response();
    }

    let mut body = behavior
        .response_schema
        .as_ref()
        .and_then(|schema| generate_body(schema, request_body))
        .unwrap_or_else(|| {
            json!({
                "message": "mock fallback (no patterns learned yet)",
                "endpoint": pattern,
            })
        });

    if is_failover {
        if let Value::Object(map) = &mut body {
            map.insert(
                FAILOVER_MARKER.to_string(),
                json!("upstream unreachable; response generated from learned model"),
            );
        }
    }

    log_mock(state, method, pattern, status, latency_ms);
    (status_code(status), Json(body)).into_response()
}

/// Sample a status from the learned distribution; an empty distribution
/// means 200.
fn sample_status(behavior: &Behavior) -> u16 {
    let distribution = &behavior.status_code_distribution;
    if distribution.is_empty() {
        return 200;
    }
    let total: f64 = distribution.values().sum();
    if total <= 0.0 {
        return 200;
    }
    let mut draw = rand::rng().random::<f64>() * total;
    for (code, probability) in distribution {
        draw -= probability;
        if draw <= 0.0 {
            return code.parse().unwrap_or(200);
        }
    }
    // Floating point slack: fall back to any key
    distribution
        .keys()
        .next()
        .and_then(|code| code.parse().ok())
        .unwrap_or(200)
}

fn status_code(status: u16) -> StatusCode {
    StatusCode::from_u16(status).unwrap_or(StatusCode::OK)
}

fn log_mock(state: &AppState, method: &str, pattern: &str, status: u16, latency_ms: f64) {
    let entry = LogEntry::now(
        method,
        pattern,
        status,
        latency_ms,
        ServeMode::Mock,
        false,
        HealthStatus::Healthy,
        100.0,
    );
    broadcast::publish(
        &state.ring,
        &state.broadcaster,
        entry,
        None,
        &state.health.global_health(),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn behavior_with(distribution: &[(&str, f64)]) -> Behavior {
        let mut behavior = Behavior::defaults(1);
        behavior.status_code_distribution = distribution
            .iter()
            .map(|(code, p)| ((*code).to_string(), *p))
            .collect::<HashMap<_, _>>();
        behavior
    }

    #[test]
    fn empty_distribution_samples_200() {
        let behavior = Behavior::defaults(1);
        assert_eq!(sample_status(&behavior), 200);
    }

    #[test]
    fn single_bucket_distribution_always_wins() {
        let behavior = behavior_with(&[("404", 1.0)]);
        for _ in 0..20 {
            assert_eq!(sample_status(&behavior), 404);
        }
    }

    #[test]
    fn samples_respect_the_weights() {
        let behavior = behavior_with(&[("200", 0.8), ("500", 0.2)]);
        let mut seen_200 = 0;
        for _ in 0..500 {
            if sample_status(&behavior) == 200 {
                seen_200 += 1;
            }
        }
        // 0.8 ± generous slack
        assert!(seen_200 > 300, "saw {seen_200} of 500");
        assert!(seen_200 < 500);
    }
}
