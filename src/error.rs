//! Error types for the chat service.

use std::io;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Result type alias for service operations.
pub type Result<T> = std::result::Result<T, AppError>;

/// Top-level error type for startup and serving.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Server error: {0}")]
    Server(String),

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),
}

/// Errors while producing or consuming a frame stream.
#[derive(Error, Debug)]
pub enum StreamError {
    #[error("Write timeout")]
    WriteTimeout,

    #[error("Consumer disconnected")]
    ConsumerGone,

    #[error("Session exceeded {0} seconds")]
    SessionTimeout(u64),

    #[error("No data received for {0} seconds")]
    SilenceTimeout(u64),

    #[error("Stream ended without an end frame")]
    Incomplete,

    #[error("Stream cancelled")]
    Cancelled,

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },
}

/// Errors reported by external collaborators (storage, database, providers).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BackendError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Content policy rejection: {0}")]
    ContentPolicy(String),

    #[error("Not found")]
    NotFound,

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Machine-readable code for content-policy rejections.
pub const CONTENT_POLICY_CODE: &str = "CONTENT_POLICY_VIOLATION";

/// Errors surfaced to HTTP callers as a JSON envelope.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Upstream(String),

    #[error("Content Policy Violation")]
    ContentPolicy { details: String },
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) | ApiError::ContentPolicy { .. } => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Upstream(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Map a collaborator failure onto the HTTP taxonomy, using `context` as
    /// the user-facing message for generic upstream failures.
    pub fn from_backend(err: BackendError, context: &str) -> Self {
        match err {
            BackendError::NotFound => ApiError::NotFound(context.to_string()),
            BackendError::ContentPolicy(details) => ApiError::ContentPolicy { details },
            other => {
                tracing::error!(error = %other, "{}", context);
                ApiError::Upstream(context.to_string())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        crate::metrics::record_api_error(status.as_u16());
        let body = match &self {
            ApiError::ContentPolicy { details } => json!({
                "error": self.to_string(),
                "code": CONTENT_POLICY_CODE,
                "details": details,
            }),
            _ => json!({ "error": self.to_string() }),
        };
        (status, Json(body)).into_response()
    }
}
