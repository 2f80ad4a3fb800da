//! YouTube Data API v3 video host.
//!
//! Upload uses the resumable protocol: a JSON `POST` opens a session and
//! returns its URL in `Location`, then the whole file is `PUT` there. A retry
//! of the `PUT` simply resends the full body.

use super::{
    AdapterError, AdapterResult, Ignored, VideoHost, VideoUpload, auth::AccessTokenProvider,
    ensure_success, retry::RetryPolicy,
};
use crate::models::{asset::content_type_for, metadata::VideoHostSettings};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, header};
use serde::Deserialize;
use std::{path::Path, sync::Arc};
use tokio::fs;
use tracing::{info, warn};

pub const YOUTUBE_UPLOAD_BASE: &str = "https://www.googleapis.com/upload/youtube/v3";

pub fn watch_url(video_id: &str) -> String {
    format!("https://www.youtube.com/watch?v={video_id}")
}

#[derive(Debug, Deserialize)]
struct VideoResource {
    id: Option<String>,
}

pub struct YouTubeClient {
    http: Client,
    tokens: Arc<dyn AccessTokenProvider>,
    upload_base: String,
    retry: RetryPolicy,
}

impl YouTubeClient {
    pub fn new(
        http: Client,
        tokens: Arc<dyn AccessTokenProvider>,
        upload_base: impl Into<String>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            http,
            tokens,
            upload_base: upload_base.into().trim_end_matches('/').to_string(),
            retry,
        }
    }

    async fn start_session(
        &self,
        token: &str,
        settings: &VideoHostSettings,
        content_type: &str,
        content_length: usize,
    ) -> AdapterResult<String> {
        let response = self
            .http
            .post(format!("{}/videos", self.upload_base))
            .query(&[("uploadType", "resumable"), ("part", "snippet,status")])
            .bearer_auth(token)
            .header("X-Upload-Content-Type", content_type)
            .header("X-Upload-Content-Length", content_length.to_string())
            .json(settings)
            .send()
            .await?;
        let response = ensure_success(response).await?;

        response
            .headers()
            .get(header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| AdapterError::PlatformRejected {
                status: response.status().as_u16(),
                message: "resumable session response carried no Location header".into(),
            })
    }

    async fn send_media(
        &self,
        session_url: &str,
        token: &str,
        content_type: &str,
        body: Bytes,
    ) -> AdapterResult<VideoResource> {
        let response = self
            .http
            .put(session_url)
            .bearer_auth(token)
            .header(header::CONTENT_TYPE, content_type)
            .body(body)
            .send()
            .await?;
        Ok(ensure_success(response).await?.json().await?)
    }

    async fn set_thumbnail(
        &self,
        token: &str,
        video_id: &str,
        thumbnail: &Path,
    ) -> Result<(), Ignored> {
        let image = fs::read(thumbnail)
            .await
            .map_err(|err| Ignored::new(format!("reading {}: {}", thumbnail.display(), err)))?;

        let response = self
            .http
            .post(format!("{}/thumbnails/set", self.upload_base))
            .query(&[("videoId", video_id)])
            .bearer_auth(token)
            .header(header::CONTENT_TYPE, "image/jpeg")
            .body(image)
            .send()
            .await
            .map_err(|err| Ignored::new(format!("custom thumbnail request failed: {err}")))?;

        ensure_success(response)
            .await
            .map(|_| ())
            .map_err(|err| Ignored::new(format!("custom thumbnail rejected: {err}")))
    }
}

#[async_trait]
impl VideoHost for YouTubeClient {
    async fn upload(
        &self,
        video: &Path,
        settings: &VideoHostSettings,
        thumbnail: Option<&Path>,
    ) -> AdapterResult<VideoUpload> {
        let token = self.tokens.access_token().await?;
        let content_type = content_type_for(video);
        let body = Bytes::from(fs::read(video).await?);

        info!(
            file = %video.display(),
            bytes = body.len(),
            title = %settings.snippet.title,
            "uploading to YouTube"
        );
        let session = self
            .retry
            .run("youtube.start_session", || {
                self.start_session(&token, settings, content_type, body.len())
            })
            .await?;
        let resource = self
            .retry
            .run("youtube.upload", || {
                self.send_media(&session, &token, content_type, body.clone())
            })
            .await?;

        let id = resource.id.ok_or_else(|| AdapterError::PlatformRejected {
            status: 200,
            message: "upload response carried no video id".into(),
        })?;
        info!(video_id = %id, "YouTube upload completed");

        let thumbnail = match thumbnail {
            Some(path) => {
                let outcome = self.set_thumbnail(&token, &id, path).await;
                match &outcome {
                    Ok(()) => info!("custom thumbnail set from {}", path.display()),
                    Err(ignored) => warn!("custom thumbnail skipped: {}", ignored),
                }
                outcome
            }
            None => Ok(()),
        };

        Ok(VideoUpload {
            watch_url: watch_url(&id),
            id,
            thumbnail,
        })
    }
}
