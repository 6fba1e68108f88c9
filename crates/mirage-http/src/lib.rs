//! # Mirage HTTP
//!
//! The HTTP surface of the Mirage mock platform: the catch-all dispatcher,
//! the upstream forwarder with automatic mock failover, the mock generator,
//! the learning worker, the `/admin` control plane, and the live WebSocket
//! feed of the request log.

pub mod admin;
pub mod broadcast;
pub mod dispatcher;
pub mod error;
pub mod forwarder;
pub mod learning;
pub mod mock;
pub mod state;

pub use broadcast::Broadcaster;
pub use error::ApiError;
pub use learning::{LearningBuffer, Observation};
pub use state::{router, AppConfig, AppState};
