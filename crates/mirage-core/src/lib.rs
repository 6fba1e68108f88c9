//! # Mirage Core
//!
//! The learning and simulation engine behind the Mirage adaptive mock
//! platform. This crate has no I/O surface of its own; the HTTP layer and
//! the store build on it.
//!
//! ## Overview
//!
//! - **Path normalization**: collapse high-cardinality paths into stable
//!   endpoint patterns (`/users/42` → `/users/{id}`)
//! - **Schema intelligence**: learn structural JSON schemas from live
//!   traffic, classify contract changes by severity, and generate realistic
//!   mock payloads from what was learned
//! - **Adaptive detection**: per-endpoint Welford latency baselines with
//!   exponential decay and disk persistence
//! - **Health monitoring**: latency/error/size/drift signals blended into
//!   per-endpoint and global health scores
//! - **Chaos**: named failure profiles and effective chaos computation
//! - **Log ring**: the bounded head-insert request log the live feed
//!   broadcasts from
//! - **Platform state**: the process-wide mode/learning/profile/target
//!   switches

pub mod chaos;
pub mod detector;
pub mod error;
pub mod health;
pub mod normalize;
pub mod platform;
pub mod ring;
pub mod schema;

pub use chaos::ChaosProfile;
pub use detector::{AdaptiveDetector, AnomalyDetail, AnomalySeverity, WelfordStats};
pub use error::{Error, Result};
pub use health::{GlobalHealth, HealthAssessment, HealthInput, HealthMonitor, HealthStatus};
pub use normalize::normalize_path;
pub use platform::{Platform, PlatformMode, PlatformSnapshot};
pub use ring::{LogEntry, LogRing, ServeMode, LOG_RING_CAPACITY};
pub use schema::{
    compare, drift_score, drift_summary, generate_body, ChangeType, ContractChange, FieldMeta,
    JsonType, SchemaIntelligence, SchemaNode, Severity,
};
