//! Error types for the response cache
//!
//! Provides unified error handling using thiserror.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

// == Cache Error Enum ==
/// Unified error type for the response cache.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Configuration could not be used
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Stored metadata or body could not be (de)serialized
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Stored text payload was not valid UTF-8
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// A store driver rejected an operation
    #[error("Driver error: {0}")]
    Driver(String),

    /// The remote store could not be reached
    #[error("Connection error: {0}")]
    Connection(String),

    /// The origin handler failed to produce a response
    #[error("Origin error: {0}")]
    Origin(String),

    /// Reading configuration from disk failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CacheError {
    /// Returns true when the error means the remote store is unreachable.
    pub fn is_connection(&self) -> bool {
        matches!(self, CacheError::Connection(_))
    }
}

// == IntoResponse Implementation ==
impl IntoResponse for CacheError {
    fn into_response(self) -> Response {
        let status = match &self {
            CacheError::Connection(_) => StatusCode::SERVICE_UNAVAILABLE,
            CacheError::Origin(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(json!({
            "error": self.to_string()
        }));

        (status, body).into_response()
    }
}

// == Result Type Alias ==
/// Convenience Result type for the response cache.
pub type Result<T> = std::result::Result<T, CacheError>;
