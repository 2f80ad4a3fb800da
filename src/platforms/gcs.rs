//! Google Cloud Storage object store (JSON API).
//!
//! `put` is a single-request media upload; the returned object resource's
//! `md5Hash` is checked against the payload. Exposure goes through the
//! object ACL, which buckets with uniform bucket-level access reject; that
//! case is reported as `Ignored`.

use super::{
    AdapterError, AdapterResult, Exposure, Ignored, ObjectStore, auth::AccessTokenProvider,
    ensure_success, retry::RetryPolicy,
};
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose};
use bytes::Bytes;
use reqwest::{Client, Url, header};
use serde::Deserialize;
use serde_json::json;
use std::{sync::Arc, time::Duration};
use tracing::{debug, info};

pub const GCS_API_BASE: &str = "https://storage.googleapis.com/storage/v1";
pub const GCS_UPLOAD_BASE: &str = "https://storage.googleapis.com/upload/storage/v1";
pub const GCS_PUBLIC_BASE: &str = "https://storage.googleapis.com";

const PUBLIC_ENTITY: &str = "allUsers";
const REACHABILITY_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct GcsEndpoints {
    pub api_base: String,
    pub upload_base: String,
    pub public_base: String,
}

impl Default for GcsEndpoints {
    fn default() -> Self {
        Self {
            api_base: GCS_API_BASE.into(),
            upload_base: GCS_UPLOAD_BASE.into(),
            public_base: GCS_PUBLIC_BASE.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ObjectResource {
    #[serde(rename = "md5Hash")]
    md5_hash: Option<String>,
}

pub struct GcsClient {
    http: Client,
    tokens: Arc<dyn AccessTokenProvider>,
    endpoints: GcsEndpoints,
    retry: RetryPolicy,
}

impl GcsClient {
    pub fn new(
        http: Client,
        tokens: Arc<dyn AccessTokenProvider>,
        endpoints: GcsEndpoints,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            http,
            tokens,
            endpoints,
            retry,
        }
    }

    /// Public URL of an object; each path component is percent-encoded and
    /// the `/` separators are kept.
    pub fn public_url(&self, bucket: &str, object_path: &str) -> AdapterResult<String> {
        let segments: Vec<&str> = std::iter::once(bucket)
            .chain(object_path.split('/'))
            .collect();
        Ok(endpoint(&self.endpoints.public_base, &segments)?.into())
    }

    async fn upload_once(
        &self,
        token: &str,
        bucket: &str,
        object_path: &str,
        bytes: Bytes,
        content_type: &str,
        expected_md5: &str,
    ) -> AdapterResult<()> {
        let url = endpoint(&self.endpoints.upload_base, &["b", bucket, "o"])?;
        let response = self
            .http
            .post(url)
            .query(&[("uploadType", "media"), ("name", object_path)])
            .bearer_auth(token)
            .header(header::CONTENT_TYPE, content_type)
            .body(bytes)
            .send()
            .await?;
        let resource: ObjectResource = ensure_success(response).await?.json().await?;

        match resource.md5_hash.as_deref() {
            Some(actual) if actual != expected_md5 => Err(AdapterError::TransientNetwork(format!(
                "checksum mismatch for gs://{bucket}/{object_path}: expected {expected_md5}, store reported {actual}"
            ))),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl ObjectStore for GcsClient {
    async fn put(
        &self,
        bucket: &str,
        object_path: &str,
        bytes: Bytes,
        content_type: &str,
    ) -> AdapterResult<String> {
        let token = self.tokens.access_token().await?;
        let expected_md5 = md5_base64(&bytes);

        info!(bytes = bytes.len(), "uploading to gs://{}/{}", bucket, object_path);
        self.retry
            .run("gcs.put", || {
                self.upload_once(
                    &token,
                    bucket,
                    object_path,
                    bytes.clone(),
                    content_type,
                    &expected_md5,
                )
            })
            .await?;

        self.public_url(bucket, object_path)
    }

    async fn try_make_public(&self, bucket: &str, object_path: &str) -> Result<Exposure, Ignored> {
        let token = self
            .tokens
            .access_token()
            .await
            .map_err(|err| Ignored::new(err.to_string()))?;
        let url = endpoint(&self.endpoints.api_base, &["b", bucket, "o", object_path, "acl"])
            .map_err(|err| Ignored::new(err.to_string()))?;

        let response = self
            .http
            .post(url)
            .bearer_auth(token)
            .json(&json!({ "entity": PUBLIC_ENTITY, "role": "READER" }))
            .send()
            .await
            .map_err(|err| Ignored::new(format!("ACL request failed: {err}")))?;
        ensure_success(response)
            .await
            .map_err(|err| Ignored::new(format!("object ACL not applied: {err}")))?;

        debug!("granted {} read on gs://{}/{}", PUBLIC_ENTITY, bucket, object_path);
        Ok(Exposure {
            entity: PUBLIC_ENTITY.to_string(),
        })
    }

    async fn verify_public(&self, url: &str) -> Result<(), Ignored> {
        let response = self
            .http
            .head(url)
            .timeout(REACHABILITY_TIMEOUT)
            .send()
            .await
            .map_err(|err| Ignored::new(format!("reachability check failed: {err}")))?;
        let status = response.status();
        if status.as_u16() >= 400 {
            return Err(Ignored::new(format!(
                "object not publicly readable (HTTP {}): {}",
                status.as_u16(),
                url
            )));
        }
        Ok(())
    }
}

/// `base` followed by percent-encoded path segments; `/` inside a segment is
/// encoded, as object names require.
fn endpoint(base: &str, segments: &[&str]) -> AdapterResult<Url> {
    let mut url = Url::parse(base)
        .map_err(|err| AdapterError::Configuration(format!("invalid endpoint {base}: {err}")))?;
    url.path_segments_mut()
        .map_err(|_| AdapterError::Configuration(format!("endpoint {base} cannot be a base")))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

fn md5_base64(bytes: &[u8]) -> String {
    general_purpose::STANDARD.encode(md5::compute(bytes).0)
}
