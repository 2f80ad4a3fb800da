//! `POST /upload` runs the pipeline for one date.

use super::AppState;
use crate::{
    errors::AppError,
    models::{
        asset::is_video_file,
        request::{PublishRequest, parse_date},
        result::{LegError, PublishResult, Stage},
    },
};
use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Local;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Default, Deserialize)]
pub struct UploadParams {
    /// Metadata document applied over the discovered one.
    pub metadata: Option<PathBuf>,
    /// `YYYY-MM-DD`; today (local time) when absent.
    pub date: Option<String>,
    /// Video to publish, relative to the uploads directory.
    pub file: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub status: &'static str,
    pub message: String,
    pub video_id: Option<String>,
    pub watch_url: Option<String>,
    pub object_store_url: Option<String>,
    pub social_post_ids: Vec<String>,
    pub errors: Vec<LegError>,
}

impl From<PublishResult> for UploadResponse {
    fn from(result: PublishResult) -> Self {
        let (status, message) = if result.stage_failed(Stage::VideoHost) {
            let reason = result
                .errors
                .iter()
                .find(|e| e.stage == Stage::VideoHost)
                .map(|e| e.message.clone())
                .unwrap_or_default();
            ("error", format!("video host upload failed: {reason}"))
        } else if result.has_errors() {
            (
                "partial",
                format!("published with {} failed step(s)", result.errors.len()),
            )
        } else {
            ("ok", format!("published {}", result.video_file))
        };

        Self {
            status,
            message,
            video_id: result.video_host_id,
            watch_url: result.watch_url,
            object_store_url: result.object_store_url,
            social_post_ids: result.social_post_ids,
            errors: result.errors,
        }
    }
}

/// `POST /upload?metadata=&date=&file=`
///
/// 200 when the video host accepted the upload even if later legs failed,
/// 502 when it did not. Pre-flight failures come back as `AppError`.
/// `file` and `metadata` must resolve inside the uploads directory.
pub async fn upload(
    State(state): State<AppState>,
    Query(params): Query<UploadParams>,
) -> Result<impl IntoResponse, AppError> {
    let date = match params.date.as_deref().map(str::trim) {
        Some(raw) if !raw.is_empty() => parse_date(raw)
            .map_err(|e| AppError::bad_request(format!("invalid date `{raw}`: {e}")))?,
        _ => Local::now().date_naive(),
    };
    info!(%date, file = ?params.file, metadata = ?params.metadata, "upload requested");

    let root = state.publisher.locator().uploads_root();
    let file = match params.file.as_deref() {
        Some(requested) => {
            let resolved = confine(root, requested)?;
            if !is_video_file(&resolved) {
                return Err(AppError::bad_request(format!(
                    "`{}` is not a video file",
                    requested.display()
                )));
            }
            Some(resolved)
        }
        None => None,
    };
    let metadata = params
        .metadata
        .as_deref()
        .map(|requested| confine(root, requested))
        .transpose()?;

    let request = PublishRequest::new(date)
        .with_file(file)
        .with_metadata_override(metadata);
    let result = state.publisher.run(&request).await?;

    let status = if result.stage_failed(Stage::VideoHost) {
        StatusCode::BAD_GATEWAY
    } else {
        StatusCode::OK
    };
    Ok((status, Json(UploadResponse::from(result))))
}

/// Resolve a client-supplied path against the uploads root. Symlinks and `..`
/// are followed before the containment check.
fn confine(root: &Path, requested: &Path) -> Result<PathBuf, AppError> {
    let not_found = || {
        AppError::new(
            StatusCode::NOT_FOUND,
            format!("file not found: {}", requested.display()),
        )
    };
    let root = root.canonicalize().map_err(|_| not_found())?;
    let resolved = root.join(requested).canonicalize().map_err(|_| not_found())?;
    if !resolved.starts_with(&root) {
        return Err(AppError::bad_request(format!(
            "`{}` is outside the uploads directory",
            requested.display()
        )));
    }
    Ok(resolved)
}
