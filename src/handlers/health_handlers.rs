//! Index, health & readiness handlers.
//!
//! - GET /         -> route list and which credentials are configured
//! - GET /healthz  -> simple liveness ("ok")
//! - GET /readyz   -> readiness that checks the uploads directory and ffmpeg

use super::AppState;
use crate::config::CredentialPresence;
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use std::collections::HashMap;
use tokio::fs;
use uuid::Uuid;

pub const ROUTES: [&str; 4] = ["/", "/healthz", "/readyz", "/upload"];

/// `GET /`
///
/// Presence flags only; credential values never leave the process.
pub async fn index(State(state): State<AppState>) -> impl IntoResponse {
    Json(IndexResponse {
        status: "ok",
        routes: ROUTES.to_vec(),
        env: state.credentials.clone(),
    })
}

/// `GET /healthz`
///
/// Liveness probe; never performs I/O.
pub async fn healthz() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".into(),
        }),
    )
}

/// `GET /readyz`
///
/// 1. Write/read/delete a temp file under the uploads root (thumbnails are
///    written next to the videos).
/// 2. Spawn `ffprobe -version` and `ffmpeg -version`.
///
/// HTTP 200 when all checks pass, 503 otherwise.
pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let root = state.publisher.locator().uploads_root().to_path_buf();
    let tmp_path = root.join(format!(".readyz-{}", Uuid::new_v4()));
    let disk_check = match fs::write(&tmp_path, b"readyz").await {
        Ok(_) => match fs::read(&tmp_path).await {
            Ok(bytes) if bytes == b"readyz" => match fs::remove_file(&tmp_path).await {
                Ok(_) => CheckStatus::ok(),
                Err(e) => CheckStatus {
                    ok: true,
                    error: Some(format!("could not remove tmp file: {}", e)),
                },
            },
            Ok(_) => {
                let _ = fs::remove_file(&tmp_path).await;
                CheckStatus::failed("file content mismatch")
            }
            Err(e) => {
                let _ = fs::remove_file(&tmp_path).await;
                CheckStatus::failed(format!("could not read tmp file: {}", e))
            }
        },
        Err(e) => CheckStatus::failed(format!(
            "could not write tmp file in {}: {}",
            root.display(),
            e
        )),
    };

    let ffmpeg_check = match state.tools.check_tools().await {
        Ok(()) => CheckStatus::ok(),
        Err(e) => CheckStatus::failed(e.to_string()),
    };

    let overall_ok = disk_check.ok && ffmpeg_check.ok;
    let mut checks = HashMap::new();
    checks.insert("uploads_dir", disk_check);
    checks.insert("ffmpeg", ffmpeg_check);

    let body = ReadyResponse {
        status: if overall_ok { "ok" } else { "error" }.into(),
        checks,
    };
    let status = if overall_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}

#[derive(Serialize)]
struct IndexResponse {
    status: &'static str,
    routes: Vec<&'static str>,
    env: CredentialPresence,
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: String,
    checks: HashMap<&'static str, CheckStatus>,
}

#[derive(Serialize)]
struct CheckStatus {
    ok: bool,
    error: Option<String>,
}

impl CheckStatus {
    fn ok() -> Self {
        Self {
            ok: true,
            error: None,
        }
    }

    fn failed(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: Some(error.into()),
        }
    }
}
