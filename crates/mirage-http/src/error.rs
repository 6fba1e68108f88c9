//! Control-plane error responses

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

/// Errors surfaced by control-plane handlers as JSON responses.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Invalid payload → 400.
    #[error("{0}")]
    BadRequest(String),

    /// Missing entity → 404.
    #[error("{0}")]
    NotFound(String),

    /// Anything else → 500.
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    /// Invalid-payload error.
    pub fn bad_request<S: Into<String>>(message: S) -> Self {
        Self::BadRequest(message.into())
    }

    /// Missing-entity error.
    pub fn not_found<S: Into<String>>(message: S) -> Self {
        Self::NotFound(message.into())
    }
}

impl From<mirage_store::StoreError> for ApiError {
    fn from(e: mirage_store::StoreError) -> Self {
        Self::Internal(e.to_string())
    }
}

impl From<mirage_core::Error> for ApiError {
    fn from(e: mirage_core::Error) -> Self {
        match e {
            mirage_core::Error::Validation { message } => Self::BadRequest(message),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "detail": self.to_string() }))).into_response()
    }
}
