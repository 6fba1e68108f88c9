//! # Mirage Store
//!
//! SQLite persistence for the Mirage mock platform: the five entity
//! families (endpoints, behaviors, chaos configs, drift alerts, health
//! samples), the unique `(method, path_pattern)` identity constraint, and
//! the drift-alert upsert that keeps at most one unresolved alert per
//! endpoint.

mod error;
mod models;
mod store;

pub use error::{Result, StoreError};
pub use models::{
    Behavior, ChaosSettings, DriftAlert, DriftStats, Endpoint, HealthSample, NewHealthSample,
    SchemaKind,
};
pub use store::Store;
