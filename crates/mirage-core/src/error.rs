//! Error types for Mirage Core

/// Result type alias for Mirage core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for Mirage
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Validation error: {message}")]
    Validation { message: String },

    #[error("Normalization error: {message}")]
    Normalize { message: String },

    #[error("Schema error: {message}")]
    Schema { message: String },

    #[error("Detector error: {message}")]
    Detector { message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("Generic error: {0}")]
    Generic(String),
}

impl From<String> for Error {
    fn from(message: String) -> Self {
        Self::Generic(message)
    }
}

impl Error {
    /// Create a validation error
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Create a schema error
    pub fn schema<S: Into<String>>(message: S) -> Self {
        Self::Schema {
            message: message.into(),
        }
    }

    /// Create a detector error
    pub fn detector<S: Into<String>>(message: S) -> Self {
        Self::Detector {
            message: message.into(),
        }
    }

    /// Create a generic error
    pub fn generic<S: Into<String>>(message: S) -> Self {
        Self::Generic(message.into())
    }
}
