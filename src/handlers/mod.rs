pub mod health_handlers;
pub mod publish_handlers;

use crate::{
    config::CredentialPresence,
    services::{publisher::Publisher, thumbnail::ThumbnailExtractor},
};
use std::sync::Arc;

/// State shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub publisher: Arc<Publisher>,
    /// Used by readiness checks only; the pipeline owns its own extractor.
    pub tools: ThumbnailExtractor,
    pub credentials: CredentialPresence,
}
