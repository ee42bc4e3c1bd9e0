//! Error handling for the detector service

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Validation error (rejected at the mutation boundary)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Transient network failure (decoder read, RTMP write, report publish)
    #[error("Transient network error: {0}")]
    Transient(String),

    /// Encoder/muxer bootstrap failure (extradata missing, first packet
    /// not a keyframe). Fatal for the push session only.
    #[error("Bootstrap fault: {0}")]
    Bootstrap(String),

    /// Fatal startup failure (detector environment double-init etc.)
    #[error("Runtime fault: {0}")]
    Runtime(String),

    /// Codec error from the decode/encode/mux layer
    #[error("Codec error: {0}")]
    Codec(String),

    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// SQLx database error
    #[error("SQLx error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

impl From<opencv::Error> for Error {
    fn from(e: opencv::Error) -> Self {
        Error::Codec(e.to_string())
    }
}

impl From<ffmpeg_next::Error> for Error {
    fn from(e: ffmpeg_next::Error) -> Self {
        Error::Codec(e.to_string())
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match &self {
            Error::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            Error::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
            Error::Transient(msg) => (StatusCode::BAD_GATEWAY, "TRANSIENT_ERROR", msg.clone()),
            Error::Bootstrap(msg) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "BOOTSTRAP_FAULT",
                msg.clone(),
            ),
            Error::Runtime(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "RUNTIME_FAULT",
                msg.clone(),
            ),
            Error::Codec(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "CODEC_ERROR",
                msg.clone(),
            ),
            Error::Database(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "DATABASE_ERROR",
                msg.clone(),
            ),
            Error::Serialization(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "SERIALIZATION_ERROR",
                e.to_string(),
            ),
            Error::Http(e) => (StatusCode::BAD_GATEWAY, "HTTP_ERROR", e.to_string()),
            Error::Io(e) => (StatusCode::INTERNAL_SERVER_ERROR, "IO_ERROR", e.to_string()),
            Error::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                msg.clone(),
            ),
            Error::Sqlx(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "DATABASE_ERROR",
                e.to_string(),
            ),
        };

        tracing::error!(
            status = %status,
            error_code = %error_code,
            message = %message,
            "Request error"
        );

        let body = Json(json!({
            "success": false,
            "error_code": error_code,
            "message": message
        }));

        (status, body).into_response()
    }
}
