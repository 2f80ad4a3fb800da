//! Access-token providers.
//!
//! The consent flow that mints a refresh token happens elsewhere; here a
//! configured refresh token is exchanged for short-lived access tokens, which
//! are cached until shortly before they expire.

use super::{AdapterError, AdapterResult, classify_status, retry::RetryPolicy};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, info};

pub const GOOGLE_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

/// Refresh this long before the reported expiry.
const EXPIRY_SLACK_SECONDS: i64 = 60;

/// Token endpoint errors that mean the client or refresh token is unusable.
const FATAL_TOKEN_ERRORS: [&str; 3] = ["invalid_grant", "invalid_client", "unauthorized_client"];

#[async_trait]
pub trait AccessTokenProvider: Send + Sync {
    async fn access_token(&self) -> AdapterResult<String>;
}

/// A token supplied verbatim by configuration.
pub struct StaticTokenProvider {
    token: Option<String>,
    missing_hint: String,
}

impl StaticTokenProvider {
    pub fn new(token: Option<String>, missing_hint: impl Into<String>) -> Self {
        Self {
            token: token.filter(|t| !t.trim().is_empty()),
            missing_hint: missing_hint.into(),
        }
    }
}

#[async_trait]
impl AccessTokenProvider for StaticTokenProvider {
    async fn access_token(&self) -> AdapterResult<String> {
        self.token
            .clone()
            .ok_or_else(|| AdapterError::AuthFailure(self.missing_hint.clone()))
    }
}

#[derive(Debug, Clone)]
pub struct OAuthClientCredentials {
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: Option<String>,
    pub token_uri: String,
}

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct TokenErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// Exchanges a long-lived refresh token for access tokens.
pub struct RefreshTokenProvider {
    http: Client,
    credentials: OAuthClientCredentials,
    retry: RetryPolicy,
    cached: Mutex<Option<CachedToken>>,
}

impl RefreshTokenProvider {
    pub fn new(http: Client, credentials: OAuthClientCredentials, retry: RetryPolicy) -> Self {
        Self {
            http,
            credentials,
            retry,
            cached: Mutex::new(None),
        }
    }

    async fn refresh(&self, refresh_token: &str) -> AdapterResult<CachedToken> {
        let params = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", self.credentials.client_id.as_str()),
            ("client_secret", self.credentials.client_secret.as_str()),
        ];
        let response = self
            .http
            .post(&self.credentials.token_uri)
            .form(&params)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(token_error(status, &body));
        }

        let token: TokenResponse = response.json().await?;
        let lifetime = token.expires_in.unwrap_or(3600);
        debug!(expires_in = lifetime, "access token refreshed");
        Ok(CachedToken {
            value: token.access_token,
            expires_at: Utc::now() + ChronoDuration::seconds(lifetime),
        })
    }
}

#[async_trait]
impl AccessTokenProvider for RefreshTokenProvider {
    async fn access_token(&self) -> AdapterResult<String> {
        let refresh_token = self
            .credentials
            .refresh_token
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| {
                AdapterError::AuthFailure(
                    "missing GOOGLE_REFRESH_TOKEN; complete the consent flow and set it in .env"
                        .into(),
                )
            })?;

        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref() {
            if token.expires_at - ChronoDuration::seconds(EXPIRY_SLACK_SECONDS) > Utc::now() {
                return Ok(token.value.clone());
            }
        }

        info!("refreshing Google access token");
        let fresh = self
            .retry
            .run("google token refresh", || self.refresh(refresh_token))
            .await?;
        let value = fresh.value.clone();
        *cached = Some(fresh);
        Ok(value)
    }
}

/// `invalid_grant` means the refresh token itself is expired or revoked.
fn token_error(status: reqwest::StatusCode, body: &str) -> AdapterError {
    match serde_json::from_str::<TokenErrorResponse>(body) {
        Ok(err) if FATAL_TOKEN_ERRORS.contains(&err.error.as_str()) => {
            AdapterError::AuthFailure(format!(
                "token refresh rejected ({}): {}",
                err.error,
                err.error_description.unwrap_or_default()
            ))
        }
        _ => classify_status(status, body),
    }
}
