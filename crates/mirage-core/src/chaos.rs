//! Chaos profiles and synthetic degradation
//!
//! Chaos is deliberate degradation injected into mock responses: extra
//! latency, synthetic errors, corrupted payloads. The effective chaos level
//! for a request is the maximum of the per-endpoint setting, the active
//! profile, and a per-request header override, clamped to `[0, 100]`.

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Synthetic error probability is capped here no matter how much chaos is
/// dialed in, so a mock endpoint always lets some traffic through.
pub const MAX_ERROR_PROBABILITY: f64 = 0.9;

/// Simulated latency floor in milliseconds.
pub const MIN_LATENCY_MS: f64 = 10.0;

/// Named failure scenarios selectable from the control plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChaosProfile {
    /// Standard behavior based on learned patterns.
    #[default]
    Normal,
    /// High latency and frequent random errors.
    FridayAfternoon,
    /// POST/PUT/PATCH requests are extremely slow.
    DbBottleneck,
    /// 200 OK status codes with corrupted payloads.
    ZombieApi,
}

impl ChaosProfile {
    /// All selectable profiles.
    pub fn all() -> [Self; 4] {
        [
            Self::Normal,
            Self::FridayAfternoon,
            Self::DbBottleneck,
            Self::ZombieApi,
        ]
    }

    /// The control-plane key for this profile.
    pub fn key(self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::FridayAfternoon => "friday_afternoon",
            Self::DbBottleneck => "db_bottleneck",
            Self::ZombieApi => "zombie_api",
        }
    }

    /// Parse a control-plane key.
    pub fn from_key(key: &str) -> Option<Self> {
        Self::all().into_iter().find(|p| p.key() == key)
    }

    /// Display name.
    pub fn name(self) -> &'static str {
        match self {
            Self::Normal => "Normal Operations",
            Self::FridayAfternoon => "Friday Afternoon",
            Self::DbBottleneck => "Database Bottleneck",
            Self::ZombieApi => "Zombie API",
        }
    }

    /// What the profile does, for the control plane listing.
    pub fn description(self) -> &'static str {
        match self {
            Self::Normal => "Standard behavior based on learned patterns.",
            Self::FridayAfternoon => "High latency and frequent random errors.",
            Self::DbBottleneck => "POST/PUT/PATCH requests are extremely slow.",
            Self::ZombieApi => "200 OK status codes but with corrupted payloads.",
        }
    }

    /// Chaos level the profile forces platform-wide.
    pub fn global_chaos(self) -> u8 {
        match self {
            Self::FridayAfternoon => 30,
            _ => 0,
        }
    }

    /// Extra simulated latency for a given request method, in milliseconds.
    pub fn latency_boost_ms(self, method: &str) -> u64 {
        match self {
            Self::FridayAfternoon => 1000,
            Self::DbBottleneck => {
                if matches!(method, "POST" | "PUT" | "PATCH") {
                    5000
                } else {
                    0
                }
            }
            _ => 0,
        }
    }

    /// Whether mock bodies should be replaced with corrupted text.
    pub fn corrupts_responses(self) -> bool {
        self == Self::ZombieApi
    }
}

/// Effective chaos for one request: the maximum of the endpoint's configured
/// level (when active), the active profile's global level, and the
/// per-request header override, clamped to `[0, 100]`.
pub fn effective_chaos(
    endpoint_level: i64,
    endpoint_active: bool,
    profile: ChaosProfile,
    header_override: Option<i64>,
) -> u8 {
    let endpoint = if endpoint_active { endpoint_level } else { 0 };
    let level = endpoint
        .max(i64::from(profile.global_chaos()))
        .max(header_override.unwrap_or(0));
    level.clamp(0, 100) as u8
}

/// Probability that a mock request fails with a synthetic 500:
/// `min(0.9, error_rate + chaos/100)`.
pub fn error_probability(learned_error_rate: f64, chaos: u8) -> f64 {
    (learned_error_rate + f64::from(chaos) / 100.0).min(MAX_ERROR_PROBABILITY)
}

/// Draw the error decision.
pub fn should_inject_error(learned_error_rate: f64, chaos: u8) -> bool {
    rand::rng().random::<f64>() < error_probability(learned_error_rate, chaos)
}

/// Simulated latency for a mock response:
/// `max(10, Normal(mean, std)) + chaos × 10 + profile boost`.
pub fn sample_latency_ms(
    latency_mean: f64,
    latency_std: f64,
    chaos: u8,
    profile: ChaosProfile,
    method: &str,
) -> f64 {
    let sampled = sample_normal(latency_mean, latency_std).max(MIN_LATENCY_MS);
    sampled + f64::from(chaos) * 10.0 + profile.latency_boost_ms(method) as f64
}

/// Box–Muller transform over two uniform draws.
fn sample_normal(mean: f64, std_dev: f64) -> f64 {
    let mut rng = rand::rng();
    let u1: f64 = rng.random();
    let u2: f64 = rng.random();
    let z0 = (-2.0 * u1.max(f64::MIN_POSITIVE).ln()).sqrt()
        * (2.0 * std::f64::consts::PI * u2).cos();
    mean + std_dev * z0
}

/// The deliberately corrupted `zombie_api` body: obviously non-JSON text.
pub fn corrupted_body() -> String {
    let mut rng = rand::rng();
    let prefix = "xXx".repeat(rng.random_range(5..=20));
    let suffix = "xXx".repeat(rng.random_range(5..=20));
    format!("{prefix}CORRUPTED_STREAM{suffix}")
}
