use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::{fmt, path::PathBuf};
use thiserror::Error;

/// Pre-flight failures. Raised before any network call, so nothing needs to
/// be rolled back.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("no video asset found: {0}")]
    AssetNotFound(String),
    #[error(
        "ambiguous asset in {}: {} candidates ({})",
        .folder.display(),
        .candidates.len(),
        .candidates.join(", ")
    )]
    AmbiguousAsset {
        folder: PathBuf,
        candidates: Vec<String>,
    },
    #[error("failed to parse metadata {}: {reason}", .path.display())]
    MetadataParseError { path: PathBuf, reason: String },
    #[error("metadata file not found: {}", .0.display())]
    MetadataNotFound(PathBuf),
}

/// A lightweight wrapper for general errors that keeps the message local.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    /// Shortcut for 400 Bad Request
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "status": "error",
            "message": self.message,
            "code": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

impl From<PipelineError> for AppError {
    fn from(err: PipelineError) -> Self {
        let status = match err {
            PipelineError::AssetNotFound(_) | PipelineError::MetadataNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            PipelineError::AmbiguousAsset { .. } | PipelineError::MetadataParseError { .. } => {
                StatusCode::BAD_REQUEST
            }
        };
        AppError::new(status, err.to_string())
    }
}
