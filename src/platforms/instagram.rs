//! Instagram Graph API social publisher.
//!
//! Only the REELS media type is used. A feed post is a reel with
//! `share_to_feed`, so a "reel + post" request is a single container.
//! Flow: create container, (push bytes for resumable uploads), poll
//! `status_code` until `FINISHED`, then `media_publish`.

use super::{
    AdapterError, AdapterResult, ReelMedia, ReelRequest, SocialPublisher,
    auth::AccessTokenProvider, ensure_success, retry::RetryPolicy,
};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, header};
use serde::Deserialize;
use serde_json::{Value, json};
use std::{sync::Arc, time::Duration};
use tokio::time::Instant;
use tracing::{debug, info};

pub const INSTAGRAM_API_BASE: &str = "https://graph.instagram.com/v23.0";

#[derive(Debug, Clone, Copy)]
pub struct PollSettings {
    pub interval: Duration,
    pub timeout: Duration,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3),
            timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Deserialize)]
struct CreatedContainer {
    id: String,
    /// Upload target returned for `upload_type=resumable`.
    #[serde(default)]
    uri: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ContainerStatus {
    #[serde(default)]
    status_code: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Published {
    id: String,
}

pub struct InstagramClient {
    http: Client,
    tokens: Arc<dyn AccessTokenProvider>,
    account_id: Option<String>,
    api_base: String,
    poll: PollSettings,
    retry: RetryPolicy,
}

impl InstagramClient {
    pub fn new(
        http: Client,
        tokens: Arc<dyn AccessTokenProvider>,
        account_id: Option<String>,
        api_base: impl Into<String>,
        poll: PollSettings,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            http,
            tokens,
            account_id: account_id.filter(|id| !id.trim().is_empty()),
            api_base: api_base.into().trim_end_matches('/').to_string(),
            poll,
            retry,
        }
    }

    async fn create_container(
        &self,
        token: &str,
        account_id: &str,
        payload: &Value,
    ) -> AdapterResult<CreatedContainer> {
        let response = self
            .http
            .post(format!("{}/{}/media", self.api_base, account_id))
            .bearer_auth(token)
            .json(payload)
            .send()
            .await?;
        Ok(ensure_success(response).await?.json().await?)
    }

    async fn push_bytes(&self, token: &str, upload_uri: &str, data: Bytes) -> AdapterResult<()> {
        let response = self
            .http
            .post(upload_uri)
            .header(header::AUTHORIZATION, format!("OAuth {token}"))
            .header("offset", "0")
            .header("file_size", data.len().to_string())
            .body(data)
            .send()
            .await?;
        ensure_success(response).await.map(|_| ())
    }

    async fn container_status(&self, token: &str, container_id: &str) -> AdapterResult<String> {
        let response = self
            .http
            .get(format!("{}/{}", self.api_base, container_id))
            .query(&[("fields", "status_code")])
            .bearer_auth(token)
            .send()
            .await?;
        let status: ContainerStatus = ensure_success(response).await?.json().await?;
        Ok(status.status_code.unwrap_or_default())
    }

    async fn wait_until_finished(&self, token: &str, container_id: &str) -> AdapterResult<()> {
        let deadline = Instant::now() + self.poll.timeout;
        loop {
            let status = self
                .retry
                .run("instagram.status", || self.container_status(token, container_id))
                .await?;
            debug!(container_id, status = %status, "container status");
            match status.as_str() {
                "FINISHED" => return Ok(()),
                "ERROR" | "EXPIRED" => {
                    return Err(AdapterError::PlatformRejected {
                        status: 200,
                        message: format!("container {container_id} processing ended with {status}"),
                    });
                }
                _ => {}
            }
            if Instant::now() >= deadline {
                return Err(AdapterError::TransientNetwork(format!(
                    "timed out after {}s waiting for container {container_id}",
                    self.poll.timeout.as_secs()
                )));
            }
            tokio::time::sleep(self.poll.interval).await;
        }
    }

    async fn publish_container(
        &self,
        token: &str,
        account_id: &str,
        container_id: &str,
    ) -> AdapterResult<String> {
        let response = self
            .http
            .post(format!("{}/{}/media_publish", self.api_base, account_id))
            .bearer_auth(token)
            .json(&json!({ "creation_id": container_id }))
            .send()
            .await?;
        let published: Published = ensure_success(response).await?.json().await?;
        Ok(published.id)
    }
}

/// Container creation body for a reel.
pub fn container_payload(reel: &ReelRequest) -> Value {
    let mut payload = json!({
        "media_type": "REELS",
        "caption": reel.caption,
        "share_to_feed": reel.share_to_feed,
        "thumb_offset": (reel.thumb_offset_seconds.max(0.0) * 1000.0).round() as u64,
    });
    match &reel.media {
        ReelMedia::Url(url) => payload["video_url"] = json!(url),
        ReelMedia::Bytes { .. } => payload["upload_type"] = json!("resumable"),
    }
    payload
}

#[async_trait]
impl SocialPublisher for InstagramClient {
    async fn publish_reel(&self, reel: ReelRequest) -> AdapterResult<String> {
        let account_id = self.account_id.as_deref().ok_or_else(|| {
            AdapterError::Configuration("INSTAGRAM_ACCOUNT_ID is not set".into())
        })?;
        let token = self.tokens.access_token().await?;
        let payload = container_payload(&reel);

        info!(share_to_feed = reel.share_to_feed, "creating Instagram REELS container");
        let container = self
            .retry
            .run("instagram.create_container", || {
                self.create_container(&token, account_id, &payload)
            })
            .await?;

        if let ReelMedia::Bytes { data, file_name } = reel.media {
            let uri = container.uri.as_deref().ok_or_else(|| AdapterError::PlatformRejected {
                status: 200,
                message: "resumable container carried no upload uri".into(),
            })?;
            info!(bytes = data.len(), file = %file_name, "pushing video bytes to Instagram");
            self.retry
                .run("instagram.upload", || self.push_bytes(&token, uri, data.clone()))
                .await?;
        }

        self.wait_until_finished(&token, &container.id).await?;

        // Not retried: a lost response after a successful publish would
        // otherwise post twice.
        let publish_id = self
            .publish_container(&token, account_id, &container.id)
            .await?;
        info!(publish_id = %publish_id, creation_id = %container.id, "Instagram published");
        Ok(publish_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platforms::auth::StaticTokenProvider;
    use mockito::{Matcher, Mock, ServerGuard};

    fn client(base: &str, poll_timeout: Duration, max_retries: u32) -> InstagramClient {
        InstagramClient::new(
            Client::new(),
            Arc::new(StaticTokenProvider::new(Some("ig-token".into()), "unused")),
            Some("acct".into()),
            base,
            PollSettings {
                interval: Duration::ZERO,
                timeout: poll_timeout,
            },
            RetryPolicy {
                max_retries,
                base_delay: Duration::ZERO,
                max_delay: Duration::ZERO,
            },
        )
    }

    async fn container_created(server: &mut ServerGuard) -> Mock {
        server
            .mock("POST", "/acct/media")
            .match_header("authorization", "Bearer ig-token")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"id": "c1"}"#)
            .create_async()
            .await
    }

    async fn container_status(server: &mut ServerGuard, status: &str) -> Mock {
        server
            .mock("GET", "/c1")
            .match_query(Matcher::UrlEncoded("fields".into(), "status_code".into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(json!({ "status_code": status }).to_string())
            .create_async()
            .await
    }

    fn reel(media: ReelMedia) -> ReelRequest {
        ReelRequest {
            media,
            caption: "caption".into(),
            share_to_feed: true,
            thumb_offset_seconds: 2.75,
        }
    }

    #[test]
    fn url_payload_carries_video_url() {
        let payload = container_payload(&reel(ReelMedia::Url("https://cdn/v.mp4".into())));
        assert_eq!(payload["media_type"], "REELS");
        assert_eq!(payload["video_url"], "https://cdn/v.mp4");
        assert_eq!(payload["share_to_feed"], true);
        assert_eq!(payload["thumb_offset"], 2750);
        assert!(payload.get("upload_type").is_none());
    }

    #[test]
    fn byte_payload_requests_resumable_upload() {
        let payload = container_payload(&reel(ReelMedia::Bytes {
            data: Bytes::from_static(b"video"),
            file_name: "clip.mp4".into(),
        }));
        assert_eq!(payload["upload_type"], "resumable");
        assert!(payload.get("video_url").is_none());
    }

    #[tokio::test]
    async fn missing_account_is_configuration_error() {
        let client = InstagramClient::new(
            Client::new(),
            Arc::new(StaticTokenProvider::new(Some("t".into()), "unused")),
            None,
            INSTAGRAM_API_BASE,
            PollSettings::default(),
            RetryPolicy::none(),
        );
        let err = client
            .publish_reel(reel(ReelMedia::Url("https://cdn/v.mp4".into())))
            .await
            .unwrap_err();
        assert!(matches!(err, AdapterError::Configuration(_)));
    }

    #[tokio::test]
    async fn finished_container_is_published() {
        let mut server = mockito::Server::new_async().await;
        let created = server
            .mock("POST", "/acct/media")
            .match_body(Matcher::PartialJson(json!({
                "media_type": "REELS",
                "video_url": "https://cdn/v.mp4",
            })))
            .with_status(200)
            .with_body(r#"{"id": "c1"}"#)
            .expect(1)
            .create_async()
            .await;
        let _status = container_status(&mut server, "FINISHED").await;
        let published = server
            .mock("POST", "/acct/media_publish")
            .match_body(Matcher::Json(json!({ "creation_id": "c1" })))
            .with_status(200)
            .with_body(r#"{"id": "post-9"}"#)
            .expect(1)
            .create_async()
            .await;

        let id = client(&server.url(), Duration::from_secs(5), 0)
            .publish_reel(reel(ReelMedia::Url("https://cdn/v.mp4".into())))
            .await
            .unwrap();
        assert_eq!(id, "post-9");
        created.assert_async().await;
        published.assert_async().await;
    }

    #[tokio::test]
    async fn rate_limited_container_creation_is_retried() {
        let mut server = mockito::Server::new_async().await;
        let limited = server
            .mock("POST", "/acct/media")
            .with_status(429)
            .expect(1)
            .create_async()
            .await;
        let created = container_created(&mut server).await;
        let _status = container_status(&mut server, "FINISHED").await;
        let _media_publish = server
            .mock("POST", "/acct/media_publish")
            .with_status(200)
            .with_body(r#"{"id": "post-9"}"#)
            .create_async()
            .await;

        let id = client(&server.url(), Duration::from_secs(5), 2)
            .publish_reel(reel(ReelMedia::Url("https://cdn/v.mp4".into())))
            .await
            .unwrap();
        assert_eq!(id, "post-9");
        limited.assert_async().await;
        created.assert_async().await;
    }

    #[tokio::test]
    async fn errored_container_is_rejected_without_publishing() {
        let mut server = mockito::Server::new_async().await;
        let _created = container_created(&mut server).await;
        let _status = container_status(&mut server, "ERROR").await;
        let publish = server
            .mock("POST", "/acct/media_publish")
            .expect(0)
            .create_async()
            .await;

        let err = client(&server.url(), Duration::from_secs(5), 0)
            .publish_reel(reel(ReelMedia::Url("https://cdn/v.mp4".into())))
            .await
            .unwrap_err();
        assert!(matches!(err, AdapterError::PlatformRejected { .. }));
        assert!(err.to_string().contains("ERROR"));
        publish.assert_async().await;
    }

    #[tokio::test]
    async fn container_stuck_in_progress_times_out() {
        let mut server = mockito::Server::new_async().await;
        let _created = container_created(&mut server).await;
        let _status = container_status(&mut server, "IN_PROGRESS").await;
        let publish = server
            .mock("POST", "/acct/media_publish")
            .expect(0)
            .create_async()
            .await;

        let err = client(&server.url(), Duration::ZERO, 0)
            .publish_reel(reel(ReelMedia::Url("https://cdn/v.mp4".into())))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert!(err.to_string().contains("timed out"));
        publish.assert_async().await;
    }

    #[tokio::test]
    async fn media_publish_failure_is_not_retried() {
        let mut server = mockito::Server::new_async().await;
        let _created = container_created(&mut server).await;
        let _status = container_status(&mut server, "FINISHED").await;
        let publish = server
            .mock("POST", "/acct/media_publish")
            .with_status(503)
            .expect(1)
            .create_async()
            .await;

        let err = client(&server.url(), Duration::from_secs(5), 3)
            .publish_reel(reel(ReelMedia::Url("https://cdn/v.mp4".into())))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        publish.assert_async().await;
    }

    #[tokio::test]
    async fn byte_media_is_pushed_to_the_upload_uri() {
        let mut server = mockito::Server::new_async().await;
        let _media = server
            .mock("POST", "/acct/media")
            .match_body(Matcher::PartialJson(json!({ "upload_type": "resumable" })))
            .with_status(200)
            .with_body(
                json!({ "id": "c1", "uri": format!("{}/upload/c1", server.url()) }).to_string(),
            )
            .create_async()
            .await;
        let pushed = server
            .mock("POST", "/upload/c1")
            .match_header("authorization", "OAuth ig-token")
            .match_header("offset", "0")
            .match_header("file_size", "10")
            .match_body("fake video")
            .with_status(200)
            .with_body(r#"{"success": true}"#)
            .expect(1)
            .create_async()
            .await;
        let _status = container_status(&mut server, "FINISHED").await;
        let _media_publish = server
            .mock("POST", "/acct/media_publish")
            .with_status(200)
            .with_body(r#"{"id": "post-9"}"#)
            .create_async()
            .await;

        let id = client(&server.url(), Duration::from_secs(5), 0)
            .publish_reel(reel(ReelMedia::Bytes {
                data: Bytes::from_static(b"fake video"),
                file_name: "clip.mp4".into(),
            }))
            .await
            .unwrap();
        assert_eq!(id, "post-9");
        pushed.assert_async().await;
    }
}
