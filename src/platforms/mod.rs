//! Platform adapters: thin wrappers translating pipeline intent into one
//! external API call each.
//!
//! - `youtube`   -> video host (resumable upload + custom thumbnail)
//! - `gcs`       -> object store (media upload, ACL exposure, reachability)
//! - `instagram` -> social (REELS container, status poll, publish)
//!
//! Each adapter owns its auth (`auth`) and its bounded retry policy (`retry`).
//! The orchestrator only sees the traits defined here.

pub mod auth;
pub mod gcs;
pub mod instagram;
pub mod retry;
pub mod youtube;

use crate::models::{metadata::VideoHostSettings, result::LegErrorKind};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Response, StatusCode};
use serde_json::Value;
use std::{io, path::Path};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("authentication failed: {0}")]
    AuthFailure(String),
    #[error("transient network error: {0}")]
    TransientNetwork(String),
    #[error("rejected by platform (HTTP {status}): {message}")]
    PlatformRejected { status: u16, message: String },
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type AdapterResult<T> = Result<T, AdapterError>;

impl AdapterError {
    pub fn kind(&self) -> LegErrorKind {
        match self {
            AdapterError::AuthFailure(_) => LegErrorKind::AuthFailure,
            AdapterError::TransientNetwork(_) => LegErrorKind::TransientNetwork,
            AdapterError::PlatformRejected { .. } => LegErrorKind::PlatformRejected,
            AdapterError::Configuration(_) => LegErrorKind::Configuration,
            AdapterError::Io(_) => LegErrorKind::Io,
        }
    }

    /// Only transport failures, 429 and 5xx are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AdapterError::TransientNetwork(_))
    }

    pub fn is_auth_failure(&self) -> bool {
        matches!(self, AdapterError::AuthFailure(_))
    }
}

impl From<reqwest::Error> for AdapterError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            AdapterError::PlatformRejected {
                status: err.status().map(|s| s.as_u16()).unwrap_or(0),
                message: format!("unexpected response body: {err}"),
            }
        } else if err.is_builder() {
            AdapterError::Configuration(err.to_string())
        } else {
            AdapterError::TransientNetwork(err.to_string())
        }
    }
}

/// Google error reasons that clear up after backing off.
const RATE_LIMIT_REASONS: [&str; 2] = ["rateLimitExceeded", "userRateLimitExceeded"];

/// Graph API error code for an invalid or expired access token.
const GRAPH_INVALID_TOKEN_CODE: i64 = 190;

/// Map a non-success HTTP status to an adapter error.
///
/// Only 401 and an invalid Graph API token are authentication failures. A 403
/// from Google names its cause in `error.errors[].reason`: rate limits are
/// transient, everything else (quota, upload limit, forbidden) is a rejection.
pub fn classify_status(status: StatusCode, body: &str) -> AdapterError {
    let message = if body.trim().is_empty() {
        status
            .canonical_reason()
            .unwrap_or("no response body")
            .to_string()
    } else {
        body.trim().to_string()
    };
    let parsed = serde_json::from_str::<Value>(body).ok();
    let reasons = parsed.as_ref().map(error_reasons).unwrap_or_default();
    let graph_code = parsed
        .as_ref()
        .and_then(|v| v.pointer("/error/code"))
        .and_then(Value::as_i64);

    if status == StatusCode::UNAUTHORIZED || graph_code == Some(GRAPH_INVALID_TOKEN_CODE) {
        return AdapterError::AuthFailure(format!("HTTP {}: {}", status.as_u16(), message));
    }
    let rate_limited = reasons
        .iter()
        .any(|reason| RATE_LIMIT_REASONS.contains(&reason.as_str()));

    match status {
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => {
            AdapterError::TransientNetwork(format!("HTTP {}: {}", status.as_u16(), message))
        }
        StatusCode::FORBIDDEN if rate_limited => AdapterError::TransientNetwork(format!(
            "HTTP 403 ({}): {}",
            reasons.join(", "),
            message
        )),
        s if s.is_server_error() => {
            AdapterError::TransientNetwork(format!("HTTP {}: {}", status.as_u16(), message))
        }
        _ => AdapterError::PlatformRejected {
            status: status.as_u16(),
            message: if reasons.is_empty() {
                message
            } else {
                format!("{} ({})", message, reasons.join(", "))
            },
        },
    }
}

/// `error.errors[].reason` of a Google API error body.
fn error_reasons(body: &Value) -> Vec<String> {
    body.pointer("/error/errors")
        .and_then(Value::as_array)
        .map(|errors| {
            errors
                .iter()
                .filter_map(|e| e.get("reason").and_then(Value::as_str))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Pass a successful response through, classify everything else.
pub async fn ensure_success(response: Response) -> AdapterResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(classify_status(status, &body))
}

/// A best-effort step that failed and was deliberately swallowed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{reason}")]
pub struct Ignored {
    pub reason: String,
}

impl Ignored {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Result of a successful public-exposure request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exposure {
    /// Principal granted read access, e.g. `allUsers`.
    pub entity: String,
}

#[derive(Debug, Clone)]
pub struct VideoUpload {
    pub id: String,
    pub watch_url: String,
    /// Outcome of setting the custom thumbnail; `Ok` when none was given.
    pub thumbnail: Result<(), Ignored>,
}

#[async_trait]
pub trait VideoHost: Send + Sync {
    async fn upload(
        &self,
        video: &Path,
        settings: &VideoHostSettings,
        thumbnail: Option<&Path>,
    ) -> AdapterResult<VideoUpload>;
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store `bytes` at `object_path`, overwriting, and return the public URL.
    async fn put(
        &self,
        bucket: &str,
        object_path: &str,
        bytes: Bytes,
        content_type: &str,
    ) -> AdapterResult<String>;

    /// Grant public read on the object. May legitimately fail under
    /// bucket-level access policies.
    async fn try_make_public(&self, bucket: &str, object_path: &str) -> Result<Exposure, Ignored>;

    /// Check that `url` is readable anonymously.
    async fn verify_public(&self, url: &str) -> Result<(), Ignored>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReelMedia {
    /// Publicly reachable video URL fetched by the platform.
    Url(String),
    /// Local bytes pushed through the platform's resumable upload.
    Bytes { data: Bytes, file_name: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReelRequest {
    pub media: ReelMedia,
    pub caption: String,
    pub share_to_feed: bool,
    pub thumb_offset_seconds: f64,
}

#[async_trait]
pub trait SocialPublisher: Send + Sync {
    /// Publish one reel and return the platform's post id.
    async fn publish_reel(&self, reel: ReelRequest) -> AdapterResult<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_are_classified() {
        assert!(classify_status(StatusCode::UNAUTHORIZED, "").is_auth_failure());
        assert!(classify_status(StatusCode::TOO_MANY_REQUESTS, "slow down").is_retryable());
        assert!(classify_status(StatusCode::BAD_GATEWAY, "").is_retryable());
        match classify_status(StatusCode::BAD_REQUEST, "  invalid title ") {
            AdapterError::PlatformRejected { status, message } => {
                assert_eq!(status, 400);
                assert_eq!(message, "invalid title");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn google_403_reasons_decide_the_class() {
        let quota = r#"{"error": {"code": 403, "errors": [{"reason": "quotaExceeded"}]}}"#;
        let err = classify_status(StatusCode::FORBIDDEN, quota);
        assert!(!err.is_auth_failure());
        assert!(!err.is_retryable());
        assert_eq!(err.kind(), LegErrorKind::PlatformRejected);
        assert!(err.to_string().contains("quotaExceeded"));

        let rate = r#"{"error": {"errors": [{"reason": "userRateLimitExceeded"}]}}"#;
        assert!(classify_status(StatusCode::FORBIDDEN, rate).is_retryable());

        let upload_limit = r#"{"error": {"errors": [{"reason": "uploadLimitExceeded"}]}}"#;
        assert!(!classify_status(StatusCode::FORBIDDEN, upload_limit).is_auth_failure());
        assert!(!classify_status(StatusCode::FORBIDDEN, "").is_auth_failure());
    }

    #[test]
    fn expired_graph_token_is_auth_failure() {
        let body = r#"{"error": {"type": "OAuthException", "code": 190}}"#;
        assert!(classify_status(StatusCode::BAD_REQUEST, body).is_auth_failure());
    }

    #[test]
    fn kinds_mirror_variants() {
        assert_eq!(
            AdapterError::TransientNetwork("x".into()).kind(),
            LegErrorKind::TransientNetwork
        );
        assert_eq!(
            AdapterError::Configuration("x".into()).kind(),
            LegErrorKind::Configuration
        );
        assert!(!AdapterError::Configuration("x".into()).is_retryable());
    }
}
