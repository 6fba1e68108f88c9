//! Traffic health monitoring
//!
//! Evaluates every proxied request against learned baselines and combines
//! four independent signals (latency anomaly, error-rate spike, response
//! size drift, active contract drift) into a per-endpoint health score and
//! a global platform score.

use crate::detector::{AdaptiveDetector, AnomalySeverity, MIN_LEARNING_SAMPLES};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};

/// Error rate spike factor over the learned baseline.
const ERROR_RATE_SPIKE_FACTOR: f64 = 3.0;
/// Response size change factor considered anomalous (larger or smaller).
const SIZE_CHANGE_FACTOR: f64 = 3.0;
/// Recent observations kept per endpoint.
const SLIDING_WINDOW_SIZE: usize = 50;
/// Minimum observations before window-based signals activate.
const MIN_OBSERVATIONS: usize = MIN_LEARNING_SAMPLES as usize;

/// Penalty weights for the health score.
const LATENCY_PENALTY: f64 = 15.0;
const ERROR_SPIKE_PENALTY: f64 = 25.0;
const SIZE_ANOMALY_PENALTY: f64 = 10.0;
const DRIFT_PENALTY: f64 = 20.0;
/// Multiplier applied to latency/error penalties at high severity.
const HIGH_SEVERITY_MULTIPLIER: f64 = 1.5;

/// Health classification derived from the score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Score ≥ 80.
    Healthy,
    /// Score ≥ 50.
    Degraded,
    /// Everything below.
    Critical,
}

impl HealthStatus {
    /// Classify a score.
    pub fn from_score(score: f64) -> Self {
        if score >= 80.0 {
            Self::Healthy
        } else if score >= 50.0 {
            Self::Degraded
        } else {
            Self::Critical
        }
    }

    /// Lowercase label used in log entries and broadcast frames.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Critical => "critical",
        }
    }
}

/// Which signal produced an anomaly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    LatencySpike,
    ErrorSpike,
    SizeAnomaly,
}

/// One detected anomaly with its severity and explanation.
#[derive(Debug, Clone, Serialize)]
pub struct Anomaly {
    /// Signal that fired.
    #[serde(rename = "type")]
    pub kind: AnomalyKind,
    /// `medium` or `high`.
    pub severity: AnomalySeverity,
    /// Human-readable explanation.
    pub message: String,
}

/// Inputs for one request evaluation.
#[derive(Debug, Clone)]
pub struct HealthInput {
    /// Store id of the endpoint.
    pub endpoint_id: i64,
    /// Normalized path pattern (for messages and detector lookup).
    pub path_pattern: String,
    /// Observed latency in milliseconds.
    pub latency_ms: f64,
    /// Upstream status code.
    pub status_code: u16,
    /// Response body size in bytes.
    pub response_size: u64,
    /// Learned error rate from the endpoint behavior.
    pub learned_error_rate: f64,
    /// Whether an unresolved drift alert exists for the endpoint.
    pub has_active_drift: bool,
}

/// Result of evaluating one request.
#[derive(Debug, Clone, Serialize)]
pub struct HealthAssessment {
    /// 0–100, 100 = healthy.
    pub health_score: f64,
    /// Classification of the score.
    pub status: HealthStatus,
    /// Every anomaly that fired.
    pub anomalies: Vec<Anomaly>,
    /// Latency signal flag.
    pub latency_anomaly: bool,
    /// Error-rate signal flag.
    pub error_spike: bool,
    /// Size signal flag.
    pub size_anomaly: bool,
    /// Drift signal flag.
    pub has_drift: bool,
    /// Observations currently in the sliding window.
    pub observations: usize,
    /// Store id of the endpoint.
    pub endpoint_id: i64,
    /// Normalized path pattern.
    pub path_pattern: String,
}

/// Aggregated platform health.
#[derive(Debug, Clone, Serialize)]
pub struct GlobalHealth {
    /// Blended score: 0.7 × mean + 0.3 × min of endpoint scores.
    pub score: f64,
    /// Classification of the blended score.
    pub status: HealthStatus,
    /// Endpoints currently flagging any anomaly.
    pub anomaly_count: usize,
    /// Endpoints with cached assessments.
    pub endpoints_monitored: usize,
    /// Endpoints in critical state.
    pub critical_endpoints: Vec<EndpointHealthRef>,
    /// Endpoints in degraded state.
    pub degraded_endpoints: Vec<EndpointHealthRef>,
}

/// Minimal endpoint reference inside the global summary.
#[derive(Debug, Clone, Serialize)]
pub struct EndpointHealthRef {
    /// Store id.
    pub endpoint_id: i64,
    /// Normalized path pattern.
    pub path: String,
    /// Latest score.
    pub score: f64,
}

impl Default for GlobalHealth {
    fn default() -> Self {
        Self {
            score: 100.0,
            status: HealthStatus::Healthy,
            anomaly_count: 0,
            endpoints_monitored: 0,
            critical_endpoints: Vec::new(),
            degraded_endpoints: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Observation {
    latency_ms: f64,
    is_error: bool,
}

#[derive(Default)]
struct MonitorState {
    windows: HashMap<i64, VecDeque<Observation>>,
    size_windows: HashMap<i64, VecDeque<u64>>,
    cache: HashMap<i64, HealthAssessment>,
    global: GlobalHealth,
}

/// In-memory anomaly detector combining the four health signals.
///
/// State is rebuilt from live traffic after a restart; the durable latency
/// baseline lives in the adaptive detector.
#[derive(Default)]
pub struct HealthMonitor {
    inner: Mutex<MonitorState>,
}

impl HealthMonitor {
    /// Create an empty monitor.
    pub fn new() -> Self {
        Self::default()
    }

    /// Evaluate one request against the learned baselines.
    pub fn evaluate(&self, detector: &AdaptiveDetector, input: &HealthInput) -> HealthAssessment {
        // Consult the detector before taking the monitor lock; no operation
        // holds two guards at once
        let detail = detector.evaluate(&input.path_pattern, input.latency_ms);

        let mut state = self.inner.lock();
        let mut anomalies: Vec<Anomaly> = Vec::new();
        let is_error = input.status_code >= 400;

        let window = state.windows.entry(input.endpoint_id).or_default();
        window.push_back(Observation {
            latency_ms: input.latency_ms,
            is_error,
        });
        if window.len() > SLIDING_WINDOW_SIZE {
            window.pop_front();
        }
        let window_len = window.len();

        // 1. Latency anomaly: learned Welford baseline first, sliding-window
        //    fallback before the detector is warm.
        let mut latency_anomaly = false;
        if detail.mode == "active" {
            if detail.is_anomaly {
                latency_anomaly = true;
                anomalies.push(Anomaly {
                    kind: AnomalyKind::LatencySpike,
                    severity: detail.severity,
                    message: detail.message.clone(),
                });
            }
        } else if window_len >= MIN_OBSERVATIONS {
            let previous: Vec<f64> = window
                .iter()
                .take(window_len - 1)
                .map(|o| o.latency_ms)
                .collect();
            if let Some((win_mean, win_std)) = mean_and_std(&previous) {
                if win_std > 0.0 {
                    let threshold = win_mean + 2.0 * win_std;
                    if input.latency_ms > threshold {
                        latency_anomaly = true;
                        let overshoot = (input.latency_ms - win_mean) / win_std;
                        anomalies.push(Anomaly {
                            kind: AnomalyKind::LatencySpike,
                            severity: AnomalySeverity::Medium,
                            message: format!(
                                "Latency {:.0}ms is {overshoot:.1}\u{3c3} above the recent average of {win_mean:.0}ms",
                                input.latency_ms
                            ),
                        });
                    }
                }
            }
        }

        // High severity needs more than a few observations to be trustworthy
        if window_len < 10 {
            for anomaly in &mut anomalies {
                if anomaly.kind == AnomalyKind::LatencySpike {
                    anomaly.severity = AnomalySeverity::Medium;
                }
            }
        }

        // 2. Error-rate spike over the learned baseline
        let mut error_spike = false;
        if window_len >= MIN_OBSERVATIONS {
            let recent_errors = window.iter().filter(|o| o.is_error).count();
            let recent_rate = recent_errors as f64 / window_len as f64;
            let baseline = input.learned_error_rate.max(0.01);
            if recent_rate > baseline * ERROR_RATE_SPIKE_FACTOR && recent_errors >= 2 {
                error_spike = true;
                let spike_factor = recent_rate / baseline;
                anomalies.push(Anomaly {
                    kind: AnomalyKind::ErrorSpike,
                    severity: if spike_factor > 5.0 {
                        AnomalySeverity::High
                    } else {
                        AnomalySeverity::Medium
                    },
                    message: format!(
                        "Error rate {:.0}% is {spike_factor:.1}x the baseline of {:.0}%",
                        recent_rate * 100.0,
                        input.learned_error_rate * 100.0
                    ),
                });
            }
        }

        // 3. Response size drift
        let mut size_anomaly = false;
        if input.response_size > 0 {
            let size_window = state.size_windows.entry(input.endpoint_id).or_default();
            size_window.push_back(input.response_size);
            if size_window.len() > SLIDING_WINDOW_SIZE {
                size_window.pop_front();
            }
            if size_window.len() >= MIN_OBSERVATIONS {
                let prior = size_window.len() - 1;
                let avg_size = size_window.iter().take(prior).sum::<u64>() as f64 / prior as f64;
                if avg_size > 0.0 {
                    let ratio = input.response_size as f64 / avg_size;
                    if ratio > SIZE_CHANGE_FACTOR || ratio < 1.0 / SIZE_CHANGE_FACTOR {
                        size_anomaly = true;
                        let direction = if ratio > 1.0 { "larger" } else { "smaller" };
                        anomalies.push(Anomaly {
                            kind: AnomalyKind::SizeAnomaly,
                            severity: if ratio >= 5.0 {
                                AnomalySeverity::High
                            } else {
                                AnomalySeverity::Medium
                            },
                            message: format!(
                                "Response size {}B is {ratio:.1}x {direction} than the average of {:.0}B",
                                input.response_size, avg_size
                            ),
                        });
                    }
                }
            }
        }

        // 4. Score: deductions per signal, high severity weighs harder
        let mut score = 100.0;
        if latency_anomaly {
            score -= LATENCY_PENALTY * severity_multiplier(&anomalies, AnomalyKind::LatencySpike);
        }
        if error_spike {
            score -= ERROR_SPIKE_PENALTY * severity_multiplier(&anomalies, AnomalyKind::ErrorSpike);
        }
        if size_anomaly {
            score -= SIZE_ANOMALY_PENALTY;
        }
        if input.has_active_drift {
            score -= DRIFT_PENALTY;
        }
        let score = score.clamp(0.0, 100.0);

        let assessment = HealthAssessment {
            health_score: score,
            status: HealthStatus::from_score(score),
            anomalies,
            latency_anomaly,
            error_spike,
            size_anomaly,
            has_drift: input.has_active_drift,
            observations: window_len,
            endpoint_id: input.endpoint_id,
            path_pattern: input.path_pattern.clone(),
        };

        state.cache.insert(input.endpoint_id, assessment.clone());
        recompute_global(&mut state);

        assessment
    }

    /// Latest cached assessment for an endpoint (healthy default when unseen).
    pub fn endpoint_health(&self, endpoint_id: i64) -> HealthAssessment {
        self.inner
            .lock()
            .cache
            .get(&endpoint_id)
            .cloned()
            .unwrap_or_else(|| HealthAssessment {
                health_score: 100.0,
                status: HealthStatus::Healthy,
                anomalies: Vec::new(),
                latency_anomaly: false,
                error_spike: false,
                size_anomaly: false,
                has_drift: false,
                observations: 0,
                endpoint_id,
                path_pattern: String::new(),
            })
    }

    /// Latest assessment for every monitored endpoint.
    pub fn all_endpoint_health(&self) -> Vec<HealthAssessment> {
        self.inner.lock().cache.values().cloned().collect()
    }

    /// The aggregated platform health.
    pub fn global_health(&self) -> GlobalHealth {
        self.inner.lock().global.clone()
    }
}

fn severity_multiplier(anomalies: &[Anomaly], kind: AnomalyKind) -> f64 {
    let high = anomalies
        .iter()
        .any(|a| a.kind == kind && a.severity == AnomalySeverity::High);
    if high {
        HIGH_SEVERITY_MULTIPLIER
    } else {
        1.0
    }
}

fn recompute_global(state: &mut MonitorState) {
    if state.cache.is_empty() {
        state.global = GlobalHealth::default();
        return;
    }

    let scores: Vec<f64> = state.cache.values().map(|h| h.health_score).collect();
    let avg = scores.iter().sum::<f64>() / scores.len() as f64;
    let min = scores.iter().copied().fold(f64::INFINITY, f64::min);
    let score = avg * 0.7 + min * 0.3;

    let anomaly_count = state
        .cache
        .values()
        .filter(|h| h.latency_anomaly || h.error_spike || h.size_anomaly)
        .count();

    let refs = |status: HealthStatus| -> Vec<EndpointHealthRef> {
        state
            .cache
            .values()
            .filter(|h| h.status == status)
            .map(|h| EndpointHealthRef {
                endpoint_id: h.endpoint_id,
                path: h.path_pattern.clone(),
                score: h.health_score,
            })
            .collect()
    };

    state.global = GlobalHealth {
        score,
        status: HealthStatus::from_score(score),
        anomaly_count,
        endpoints_monitored: state.cache.len(),
        critical_endpoints: refs(HealthStatus::Critical),
        degraded_endpoints: refs(HealthStatus::Degraded),
    };
}

fn mean_and_std(values: &[f64]) -> Option<(f64, f64)> {
    if values.is_empty() {
        return None;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    if values.len() < 2 {
        return Some((mean, 0.0));
    }
    let variance =
        values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    Some((mean, variance.sqrt()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(endpoint_id: i64, latency: f64, status: u16, size: u64) -> HealthInput {
        HealthInput {
            endpoint_id,
            path_pattern: "/api/items".to_string(),
            latency_ms: latency,
            status_code: status,
            response_size: size,
            learned_error_rate: 0.0,
            has_active_drift: false,
        }
    }

    #[test]
    fn quiet_traffic_scores_perfect() {
        let monitor = HealthMonitor::new();
        let detector = AdaptiveDetector::in_memory();
        for _ in 0..10 {
            let result = monitor.evaluate(&detector, &input(1, 100.0, 200, 512));
            assert_eq!(result.health_score, 100.0);
            assert_eq!(result.status, HealthStatus::Healthy);
        }
    }

    #[test]
    fn error_spike_deducts_points() {
        let monitor = HealthMonitor::new();
        let detector = AdaptiveDetector::in_memory();
        for _ in 0..10 {
            monitor.evaluate(&detector, &input(1, 100.0, 200, 512));
        }
        monitor.evaluate(&detector, &input(1, 100.0, 500, 512));
        let result = monitor.evaluate(&detector, &input(1, 100.0, 500, 512));
        assert!(result.error_spike);
        assert!(result.health_score < 100.0);
        assert!(result
            .anomalies
            .iter()
            .any(|a| a.kind == AnomalyKind::ErrorSpike));
    }

    #[test]
    fn size_blowup_is_flagged() {
        let monitor = HealthMonitor::new();
        let detector = AdaptiveDetector::in_memory();
        for _ in 0..10 {
            monitor.evaluate(&detector, &input(1, 100.0, 200, 1_000));
        }
        let result = monitor.evaluate(&detector, &input(1, 100.0, 200, 10_000));
        assert!(result.size_anomaly);
    }

    #[test]
    fn size_collapse_is_flagged() {
        let monitor = HealthMonitor::new();
        let detector = AdaptiveDetector::in_memory();
        for _ in 0..10 {
            monitor.evaluate(&detector, &input(1, 100.0, 200, 9_000));
        }
        let result = monitor.evaluate(&detector, &input(1, 100.0, 200, 100));
        assert!(result.size_anomaly);
    }

    #[test]
    fn active_drift_deducts_twenty() {
        let monitor = HealthMonitor::new();
        let detector = AdaptiveDetector::in_memory();
        let mut request = input(1, 100.0, 200, 512);
        request.has_active_drift = true;
        let result = monitor.evaluate(&detector, &request);
        assert_eq!(result.health_score, 80.0);
        assert_eq!(result.status, HealthStatus::Healthy);
    }

    #[test]
    fn latency_spike_uses_the_learned_baseline() {
        let monitor = HealthMonitor::new();
        let detector = AdaptiveDetector::in_memory();
        for latency in [100.0, 105.0, 95.0, 102.0, 98.0, 101.0] {
            detector.update("/api/items", latency);
        }
        let result = monitor.evaluate(&detector, &input(1, 5_000.0, 200, 512));
        assert!(result.latency_anomaly);
        assert!(result.health_score < 100.0);
    }

    #[test]
    fn global_health_blends_mean_and_worst() {
        let monitor = HealthMonitor::new();
        let detector = AdaptiveDetector::in_memory();
        monitor.evaluate(&detector, &input(1, 100.0, 200, 512));
        let mut bad = input(2, 100.0, 200, 512);
        bad.has_active_drift = true;
        monitor.evaluate(&detector, &bad);

        let global = monitor.global_health();
        // Scores are 100 and 80: 0.7 * 90 + 0.3 * 80 = 87
        assert!((global.score - 87.0).abs() < 1e-9);
        assert_eq!(global.endpoints_monitored, 2);
        assert_eq!(global.status, HealthStatus::Healthy);
    }

    #[test]
    fn scores_never_leave_bounds() {
        let monitor = HealthMonitor::new();
        let detector = AdaptiveDetector::in_memory();
        for latency in [100.0; 6] {
            detector.update("/api/items", latency);
        }
        for _ in 0..20 {
            let mut worst = input(3, 100_000.0, 500, 1);
            worst.has_active_drift = true;
            let result = monitor.evaluate(&detector, &worst);
            assert!((0.0..=100.0).contains(&result.health_score));
        }
    }
}
