//! Error types

use std::path::PathBuf;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Errors raised by the analysis and pruning engine.
#[derive(Debug, Error)]
pub enum PurgeError {
    /// A required input (site directory or CSS file) does not exist.
    #[error("missing input: {} does not exist", path.display())]
    MissingInput { path: PathBuf },

    #[error("failed to access {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid safelist pattern `{pattern}`: {source}")]
    InvalidSafelist {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

impl PurgeError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PurgeError::Io {
            path: path.into(),
            source,
        }
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Bad request: {0}")]
    BadRequest(String),
    #[error("Unauthorized")]
    Unauthorized,
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "Unauthorized".to_string()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(json!({
            "error": true,
            "message": message,
        }));

        (status, body).into_response()
    }
}

impl From<PurgeError> for AppError {
    fn from(err: PurgeError) -> Self {
        match err {
            PurgeError::MissingInput { .. } => AppError::NotFound(err.to_string()),
            PurgeError::InvalidSafelist { .. } => AppError::BadRequest(err.to_string()),
            PurgeError::Io { .. } => AppError::Internal(err.to_string()),
        }
    }
}

impl From<tokio::task::JoinError> for AppError {
    fn from(err: tokio::task::JoinError) -> Self {
        AppError::Internal(format!("worker task failed: {}", err))
    }
}
