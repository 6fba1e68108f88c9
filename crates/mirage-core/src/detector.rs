//! Adaptive per-endpoint latency anomaly detection
//!
//! Welford's online algorithm with optional exponential decay. Every
//! threshold is learned from real traffic: a slow AI endpoint's 10 s latency
//! becomes its own baseline, while a 1 s spike on a fast endpoint is
//! correctly flagged. O(1) per update, no stored history.
//!
//! The learned table is persisted to a small JSON document (written to a
//! temp file and renamed, so a crash never truncates it) and reloaded on
//! start, so baselines survive restarts.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Observations required before anomaly detection activates. Below this the
/// detector is in learning mode and never flags.
pub const MIN_LEARNING_SAMPLES: u64 = 5;

/// Z-score above which a latency is anomalous.
pub const ANOMALY_Z_THRESHOLD: f64 = 3.0;

/// Exponential decay applied to old observations (1.0 = no decay).
pub const DECAY_FACTOR: f64 = 0.98;

/// Welford state for one endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct WelfordStats {
    /// Total observations ever recorded.
    #[serde(default)]
    pub count: u64,
    /// Running mean latency in milliseconds.
    #[serde(default)]
    pub mean: f64,
    /// Running sum of squared deviations.
    #[serde(default, rename = "M2")]
    pub m2: f64,
    /// Sample standard deviation (Bessel-corrected).
    #[serde(default)]
    pub std: f64,
    /// Effective observation count after decay.
    #[serde(default)]
    pub eff_count: f64,
}

impl WelfordStats {
    /// Whether this endpoint has collected enough samples to detect.
    pub fn is_warm(&self) -> bool {
        self.count >= MIN_LEARNING_SAMPLES
    }
}

/// Detector severity for a single observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnomalySeverity {
    /// Within the learned baseline.
    None,
    /// Above the anomaly threshold.
    Medium,
    /// Far above the anomaly threshold (z > 2× threshold).
    High,
}

/// Full evaluation of one latency observation against the baseline.
#[derive(Debug, Clone, Serialize)]
pub struct AnomalyDetail {
    /// Whether the observation is anomalous.
    pub is_anomaly: bool,
    /// Z-score against the learned baseline (0 when unavailable).
    pub z_score: f64,
    /// Severity bucket.
    pub severity: AnomalySeverity,
    /// Human-readable assessment.
    pub message: String,
    /// `"learning"` until warm, `"active"` after.
    pub mode: &'static str,
    /// Learned mean latency.
    pub mean: f64,
    /// Learned latency standard deviation.
    pub std: f64,
    /// Observation count.
    pub count: u64,
    /// Piecewise-linear request health score (0–100).
    pub health_score: f64,
}

/// Per-endpoint latency anomaly detector.
pub struct AdaptiveDetector {
    stats: Mutex<HashMap<String, WelfordStats>>,
    persist_path: Option<PathBuf>,
    use_decay: bool,
}

impl AdaptiveDetector {
    /// Create a detector, loading persisted baselines when `persist_path`
    /// exists.
    pub fn new(persist_path: Option<PathBuf>) -> Self {
        let mut stats = HashMap::new();
        if let Some(path) = &persist_path {
            match load_stats(path) {
                Ok(Some(loaded)) => {
                    info!(endpoints = loaded.len(), "adaptive detector baselines loaded");
                    stats = loaded;
                }
                Ok(None) => {}
                Err(e) => warn!(error = %e, "could not load detector baselines"),
            }
        }
        Self {
            stats: Mutex::new(stats),
            persist_path,
            use_decay: true,
        }
    }

    /// In-memory detector with no persistence.
    pub fn in_memory() -> Self {
        Self::new(None)
    }

    /// Disable exponential decay (plain Welford). Mostly for tests.
    pub fn without_decay(mut self) -> Self {
        self.use_decay = false;
        self
    }

    /// Record a latency observation and return the updated stats.
    pub fn update(&self, endpoint: &str, latency_ms: f64) -> WelfordStats {
        let updated = {
            let mut table = self.stats.lock();
            let stats = table.entry(endpoint.to_string()).or_default();

            if self.use_decay && stats.count > 0 {
                // Shrink the weight of history so the baseline can follow a
                // drifting endpoint
                stats.m2 *= DECAY_FACTOR;
                stats.eff_count = stats.eff_count * DECAY_FACTOR + 1.0;
            } else {
                stats.eff_count = (stats.count + 1) as f64;
            }
            stats.count += 1;

            let n = if self.use_decay {
                stats.eff_count
            } else {
                stats.count as f64
            };

            let delta = latency_ms - stats.mean;
            stats.mean += delta / n;
            let delta2 = latency_ms - stats.mean; // uses the UPDATED mean
            stats.m2 += delta * delta2;

            stats.std = if n >= 2.0 {
                (stats.m2.max(0.0) / (n - 1.0)).sqrt()
            } else {
                0.0
            };

            *stats
        };

        self.persist();
        updated
    }

    /// Whether `latency_ms` is anomalous for this endpoint.
    ///
    /// Always false during warm-up (fewer than [`MIN_LEARNING_SAMPLES`]
    /// observations), so new endpoints never produce false positives. Once
    /// warm, a zero-variance baseline treats any deviation as anomalous.
    pub fn is_anomaly(&self, endpoint: &str, latency_ms: f64) -> bool {
        let table = self.stats.lock();
        let Some(stats) = table.get(endpoint) else {
            return false;
        };
        if !stats.is_warm() {
            return false;
        }
        if stats.std <= f64::EPSILON {
            return (latency_ms - stats.mean).abs() > f64::EPSILON;
        }
        self.z(stats, latency_ms) > ANOMALY_Z_THRESHOLD
    }

    /// Z-score of a latency against the endpoint baseline, 0 when no usable
    /// baseline exists.
    pub fn z_score(&self, endpoint: &str, latency_ms: f64) -> f64 {
        let table = self.stats.lock();
        match table.get(endpoint) {
            Some(stats) if stats.std > f64::EPSILON => self.z(stats, latency_ms),
            _ => 0.0,
        }
    }

    fn z(&self, stats: &WelfordStats, latency_ms: f64) -> f64 {
        (latency_ms - stats.mean).abs() / stats.std
    }

    /// Request health score from 0 to 100, piecewise linear on the z-score:
    /// 100 within 1σ, sloping to 0 past roughly 10σ. No penalty during
    /// warm-up.
    pub fn health_score(&self, endpoint: &str, latency_ms: f64) -> f64 {
        let table = self.stats.lock();
        let Some(stats) = table.get(endpoint) else {
            return 100.0;
        };
        if !stats.is_warm() || stats.std <= f64::EPSILON {
            return 100.0;
        }
        let z = self.z(stats, latency_ms);
        score_for_z(z)
    }

    /// Full evaluation of one observation, for health monitoring and the
    /// control plane.
    pub fn evaluate(&self, endpoint: &str, latency_ms: f64) -> AnomalyDetail {
        let stats = self.stats(endpoint);

        if !stats.is_warm() {
            return AnomalyDetail {
                is_anomaly: false,
                z_score: 0.0,
                severity: AnomalySeverity::None,
                message: format!(
                    "Learning mode ({}/{MIN_LEARNING_SAMPLES} samples collected)",
                    stats.count
                ),
                mode: "learning",
                mean: stats.mean,
                std: stats.std,
                count: stats.count,
                health_score: 100.0,
            };
        }

        let zero_variance = stats.std <= f64::EPSILON;
        let z = if zero_variance {
            if (latency_ms - stats.mean).abs() > f64::EPSILON {
                f64::INFINITY
            } else {
                0.0
            }
        } else {
            (latency_ms - stats.mean).abs() / stats.std
        };
        let is_anomaly = z > ANOMALY_Z_THRESHOLD;
        let severity = if z > ANOMALY_Z_THRESHOLD * 2.0 {
            AnomalySeverity::High
        } else if z > ANOMALY_Z_THRESHOLD {
            AnomalySeverity::Medium
        } else {
            AnomalySeverity::None
        };
        let message = if is_anomaly {
            format!(
                "Latency {latency_ms:.0}ms is {z:.1}\u{3c3} above the learned baseline of {:.0}ms \u{b1} {:.0}ms",
                stats.mean, stats.std
            )
        } else {
            format!(
                "Latency {latency_ms:.0}ms is normal (baseline: {:.0}ms \u{b1} {:.0}ms)",
                stats.mean, stats.std
            )
        };

        AnomalyDetail {
            is_anomaly,
            z_score: z,
            severity,
            message,
            mode: "active",
            mean: stats.mean,
            std: stats.std,
            count: stats.count,
            health_score: if zero_variance { 100.0 } else { score_for_z(z) },
        }
    }

    /// Raw stats for an endpoint (zeroed when unseen).
    pub fn stats(&self, endpoint: &str) -> WelfordStats {
        self.stats.lock().get(endpoint).copied().unwrap_or_default()
    }

    /// Number of observations recorded for an endpoint.
    pub fn count(&self, endpoint: &str) -> u64 {
        self.stats(endpoint).count
    }

    /// Stats for every tracked endpoint.
    pub fn all_stats(&self) -> HashMap<String, WelfordStats> {
        self.stats.lock().clone()
    }

    /// Clear the baseline for one endpoint. Returns false when none existed.
    pub fn reset(&self, endpoint: &str) -> bool {
        let removed = self.stats.lock().remove(endpoint).is_some();
        if removed {
            self.persist();
        }
        removed
    }

    /// Wipe every learned baseline. Returns how many were cleared.
    pub fn reset_all(&self) -> usize {
        let cleared = {
            let mut table = self.stats.lock();
            let n = table.len();
            table.clear();
            n
        };
        self.persist();
        cleared
    }

    /// Force an immediate save. Called on shutdown.
    pub fn flush(&self) {
        self.persist();
    }

    fn persist(&self) {
        let Some(path) = &self.persist_path else {
            return;
        };
        let snapshot = self.stats.lock().clone();
        if let Err(e) = save_stats(path, &snapshot) {
            warn!(error = %e, "could not persist detector baselines");
        }
    }
}

fn score_for_z(z: f64) -> f64 {
    if z <= 1.0 {
        100.0
    } else if z <= 2.0 {
        100.0 - (z - 1.0) * 10.0
    } else if z <= 3.0 {
        90.0 - (z - 2.0) * 30.0
    } else if z <= 5.0 {
        60.0 - (z - 3.0) * 20.0
    } else {
        (20.0 - (z - 5.0) * 4.0).max(0.0)
    }
}

fn load_stats(path: &Path) -> crate::Result<Option<HashMap<String, WelfordStats>>> {
    if !path.exists() {
        return Ok(None);
    }
    let text = std::fs::read_to_string(path)?;
    Ok(Some(serde_json::from_str(&text)?))
}

fn save_stats(path: &Path, stats: &HashMap<String, WelfordStats>) -> crate::Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, serde_json::to_vec_pretty(stats)?)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn warm_up_never_flags() {
        let detector = AdaptiveDetector::in_memory();
        for _ in 0..4 {
            detector.update("/api", 200.0);
        }
        // 2000ms is wildly off, but only 4 samples collected
        assert!(!detector.is_anomaly("/api", 2000.0));
        assert_eq!(detector.stats("/api").count, 4);
    }

    #[test]
    fn flags_once_warm() {
        let detector = AdaptiveDetector::in_memory();
        for _ in 0..4 {
            detector.update("/api", 200.0);
        }
        assert!(!detector.is_anomaly("/api", 2000.0));

        detector.update("/api", 200.0);
        assert!(detector.is_anomaly("/api", 2000.0));
        assert!(!detector.is_anomaly("/api", 200.0));
    }

    #[test]
    fn tolerates_normal_variance() {
        let detector = AdaptiveDetector::in_memory();
        for latency in [200.0, 210.0, 190.0, 205.0, 195.0, 200.0, 202.0] {
            detector.update("/api", latency);
        }
        assert!(!detector.is_anomaly("/api", 207.0));
        assert!(detector.is_anomaly("/api", 2000.0));
    }

    #[test]
    fn welford_mean_matches_arithmetic_mean_without_decay() {
        let detector = AdaptiveDetector::in_memory().without_decay();
        let samples = [100.0, 150.0, 200.0, 250.0, 300.0];
        for s in samples {
            detector.update("/api", s);
        }
        let stats = detector.stats("/api");
        assert!((stats.mean - 200.0).abs() < 1e-9);
        // Sample std of the series
        assert!((stats.std - 79.0569).abs() < 1e-3);
    }

    #[test]
    fn decay_lets_the_baseline_follow_a_shift() {
        let detector = AdaptiveDetector::in_memory();
        for _ in 0..50 {
            detector.update("/api", 100.0);
        }
        for _ in 0..100 {
            detector.update("/api", 500.0);
        }
        let stats = detector.stats("/api");
        assert!(stats.mean > 400.0, "mean {} should approach 500", stats.mean);
    }

    #[test]
    fn unknown_endpoint_is_never_anomalous() {
        let detector = AdaptiveDetector::in_memory();
        assert!(!detector.is_anomaly("/never-seen", 10_000.0));
        assert_eq!(detector.health_score("/never-seen", 10_000.0), 100.0);
    }

    #[test]
    fn health_score_is_piecewise_on_z() {
        assert_eq!(score_for_z(0.5), 100.0);
        assert_eq!(score_for_z(1.5), 95.0);
        assert_eq!(score_for_z(2.5), 75.0);
        assert_eq!(score_for_z(4.0), 40.0);
        assert_eq!(score_for_z(12.0), 0.0);
    }

    #[test]
    fn reset_clears_a_single_baseline() {
        let detector = AdaptiveDetector::in_memory();
        detector.update("/a", 100.0);
        detector.update("/b", 100.0);
        assert!(detector.reset("/a"));
        assert!(!detector.reset("/a"));
        assert_eq!(detector.count("/a"), 0);
        assert_eq!(detector.count("/b"), 1);
    }

    #[test]
    fn persists_and_reloads_baselines() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("detector_stats.json");

        let detector = AdaptiveDetector::new(Some(path.clone()));
        for _ in 0..6 {
            detector.update("/api", 120.0);
        }
        drop(detector);

        let reloaded = AdaptiveDetector::new(Some(path));
        let stats = reloaded.stats("/api");
        assert_eq!(stats.count, 6);
        assert!((stats.mean - 120.0).abs() < 1e-9);
    }
}
