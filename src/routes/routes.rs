//! Defines the HTTP trigger routes.
//!
//! - `GET  /`        -> index: route list and credential presence
//! - `GET  /healthz` -> liveness
//! - `GET  /readyz`  -> readiness (uploads dir writable, ffmpeg present)
//! - `POST /upload`  -> run the publish pipeline (`?date=&file=&metadata=`)

use crate::handlers::{
    AppState,
    health_handlers::{healthz, index, readyz},
    publish_handlers::upload,
};
use axum::{
    Router,
    routing::{get, post},
};

/// Build the router; state is attached by the caller.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(index))
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/upload", post(upload))
}
