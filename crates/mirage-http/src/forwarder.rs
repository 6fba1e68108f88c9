//! Upstream forwarding and failure classification
//!
//! The forwarder relays the request verbatim (method, query, headers minus
//! `Host`, body) and returns whatever the upstream answered; any status is
//! a valid outcome. Network-class failures (connect, timeout, protocol) are
//! classified separately so the dispatcher can fail over to the mock
//! generator instead of surfacing an error.

use axum::body::Bytes;
use axum::http::{HeaderMap, Method};
use std::time::Instant;
use tracing::warn;

pub(crate) use reqwest::Error as UpstreamError;

/// A completed upstream exchange.
#[derive(Debug)]
pub struct UpstreamResponse {
    /// Upstream status code (any value; non-2xx is not an error).
    pub status: u16,
    /// Upstream response headers.
    pub headers: HeaderMap,
    /// Upstream response body.
    pub body: Bytes,
    /// Wall-clock latency of the exchange in milliseconds.
    pub latency_ms: f64,
}

/// What happened when the upstream was called.
#[derive(Debug)]
pub enum UpstreamOutcome {
    /// A response came back (any status).
    Completed(UpstreamResponse),
    /// Connect failure, timeout, or protocol error, recoverable via mock
    /// failover.
    NetworkFailure {
        /// The classified error.
        error: UpstreamError,
        /// Time spent before the failure.
        latency_ms: f64,
    },
}

/// Forward a request to `{target}{path_and_query}`.
///
/// Returns `Err` only for unclassified failures (surfaced to the client as
/// 502); network-class failures come back as
/// [`UpstreamOutcome::NetworkFailure`].
pub async fn forward(
    client: &reqwest::Client,
    target: &str,
    path_and_query: &str,
    method: &Method,
    headers: &HeaderMap,
    body: Bytes,
) -> Result<UpstreamOutcome, UpstreamError> {
    let url = format!("{target}{path_and_query}");

    let mut outbound = headers.clone();
    outbound.remove(axum::http::header::HOST);

    let started = Instant::now();
    let result = client
        .request(method.clone(), &url)
        .headers(outbound)
        .body(body)
        .send()
        .await;

    let response = match result {
        Ok(response) => response,
        Err(error) => {
            let latency_ms = elapsed_ms(started);
            if is_network_class(&error) {
                warn!(%url, error = %error, "upstream unreachable, failing over to mock");
                return Ok(UpstreamOutcome::NetworkFailure { error, latency_ms });
            }
            return Err(error);
        }
    };

    let status = response.status().as_u16();
    let headers = filter_response_headers(response.headers());
    let body = match response.bytes().await {
        Ok(bytes) => bytes,
        Err(error) => {
            // The stream died mid-body; same recovery path as a connect
            // failure
            let latency_ms = elapsed_ms(started);
            warn!(%url, error = %error, "upstream body read failed, failing over to mock");
            return Ok(UpstreamOutcome::NetworkFailure { error, latency_ms });
        }
    };

    Ok(UpstreamOutcome::Completed(UpstreamResponse {
        status,
        headers,
        body,
        latency_ms: elapsed_ms(started),
    }))
}

/// Connect failures, timeouts, and wire-protocol errors are recovered via
/// failover; builder and redirect-policy errors are not.
fn is_network_class(error: &UpstreamError) -> bool {
    !(error.is_builder() || error.is_redirect())
}

/// Hop-by-hop headers do not survive the relay; axum recomputes the
/// content length for the body we return.
fn filter_response_headers(headers: &HeaderMap) -> HeaderMap {
    let mut filtered = headers.clone();
    filtered.remove(axum::http::header::TRANSFER_ENCODING);
    filtered.remove(axum::http::header::CONNECTION);
    filtered.remove(axum::http::header::CONTENT_LENGTH);
    filtered
}

fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn client() -> reqwest::Client {
        reqwest::Client::builder()
            .timeout(Duration::from_secs(2))
            .build()
            .expect("client")
    }

    #[tokio::test]
    async fn connection_refused_classifies_as_network_failure() {
        // Nothing listens on this port
        let outcome = forward(
            &client(),
            "http://127.0.0.1:9",
            "/anything",
            &Method::GET,
            &HeaderMap::new(),
            Bytes::new(),
        )
        .await
        .expect("classified, not surfaced");

        match outcome {
            UpstreamOutcome::NetworkFailure { error, .. } => {
                assert!(error.is_connect() || error.is_timeout());
            }
            UpstreamOutcome::Completed(_) => panic!("expected a network failure"),
        }
    }

    #[test]
    fn hop_by_hop_headers_do_not_survive_the_relay() {
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::TRANSFER_ENCODING,
            "chunked".parse().expect("value"),
        );
        headers.insert(axum::http::header::CONTENT_LENGTH, "42".parse().expect("value"));
        headers.insert(
            axum::http::header::CONTENT_TYPE,
            "application/json".parse().expect("value"),
        );

        let filtered = filter_response_headers(&headers);
        assert!(filtered.get(axum::http::header::TRANSFER_ENCODING).is_none());
        assert!(filtered.get(axum::http::header::CONTENT_LENGTH).is_none());
        assert!(filtered.get(axum::http::header::CONTENT_TYPE).is_some());
    }
}
