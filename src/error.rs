use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, CachemarkError>;

/// Application error type.
#[derive(Debug, Error)]
pub enum CachemarkError {
    /// Data generation failed (simulated compute or backing-store fetch).
    #[error("data generation failed: {0}")]
    Generation(String),

    /// Backing-store query failed.
    #[cfg(feature = "mysql")]
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Cached payload could not be serialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Startup-time configuration problem.
    #[error("configuration error: {0}")]
    Config(String),
}

impl IntoResponse for CachemarkError {
    fn into_response(self) -> Response {
        let status = match &self {
            CachemarkError::Generation(_) => StatusCode::INTERNAL_SERVER_ERROR,
            #[cfg(feature = "mysql")]
            CachemarkError::Database(_) => StatusCode::BAD_GATEWAY,
            CachemarkError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
            CachemarkError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        tracing::error!("request failed: {}", self);

        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
