use crate::{
    models::request::parse_date,
    platforms::{
        auth::{
            AccessTokenProvider, GOOGLE_TOKEN_URI, OAuthClientCredentials, RefreshTokenProvider,
            StaticTokenProvider,
        },
        gcs::{GcsClient, GcsEndpoints},
        instagram::{INSTAGRAM_API_BASE, InstagramClient, PollSettings},
        retry::RetryPolicy,
        youtube::{YOUTUBE_UPLOAD_BASE, YouTubeClient},
    },
    services::{
        locator::AssetLocator,
        publisher::{PublishTargets, Publisher},
        resolver::MetadataResolver,
        thumbnail::ThumbnailExtractor,
    },
};
use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::{env, fmt, path::PathBuf, str::FromStr, sync::Arc, time::Duration};

/// A credential that must never reach logs.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Secret(Option<String>);

impl Secret {
    pub fn new(value: Option<String>) -> Self {
        Self(value.filter(|v| !v.trim().is_empty()))
    }

    pub fn expose(&self) -> Option<String> {
        self.0.clone()
    }

    pub fn is_set(&self) -> bool {
        self.0.is_some()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(if self.is_set() { "<set>" } else { "<unset>" })
    }
}

/// Centralized application configuration.
/// Combines `.env`, environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub uploads_dir: PathBuf,
    pub ffmpeg_path: PathBuf,
    pub ffprobe_path: PathBuf,

    pub google_client_id: Secret,
    pub google_client_secret: Secret,
    pub google_refresh_token: Secret,
    pub google_token_uri: String,
    /// Dedicated object-store token; the Google refresh flow is used when unset.
    pub gcs_access_token: Secret,
    pub bucket: Option<String>,

    pub instagram_account_id: Option<String>,
    pub instagram_access_token: Secret,
    pub instagram_api_base: String,

    pub retry: RetryPolicy,
    pub http_timeout: Duration,
    pub instagram_poll_timeout: Duration,
}

/// Command-line configuration.
#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Publish a dated short video to YouTube, Cloud Storage and Instagram"
)]
pub struct Cli {
    /// Root of the dated upload folders (overrides REEL_PUBLISHER_UPLOADS_DIR)
    #[arg(long, global = true)]
    pub uploads_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Run the pipeline once for one date
    Publish {
        /// Date of the upload folder, YYYY-MM-DD
        #[arg(long, value_parser = parse_date_arg)]
        date: NaiveDate,

        /// Publish this file instead of discovering one in the date folder
        #[arg(long)]
        file: Option<PathBuf>,

        /// Metadata document applied over the discovered one
        #[arg(long)]
        metadata: Option<PathBuf>,
    },
    /// Serve the HTTP trigger
    Serve {
        /// Host to bind to (overrides REEL_PUBLISHER_HOST)
        #[arg(long)]
        host: Option<String>,

        /// Port to bind to (overrides REEL_PUBLISHER_PORT)
        #[arg(long)]
        port: Option<u16>,
    },
}

fn parse_date_arg(raw: &str) -> Result<NaiveDate, String> {
    parse_date(raw).map_err(|err| format!("expected YYYY-MM-DD, got `{raw}`: {err}"))
}

/// Which credentials are configured, never their values.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct CredentialPresence {
    pub google_client_id: bool,
    pub google_client_secret: bool,
    pub google_refresh_token: bool,
    pub gcs_access_token: bool,
    pub gcp_bucket_name: bool,
    pub instagram_account_id: bool,
    pub instagram_access_token: bool,
}

impl AppConfig {
    /// Load `.env`, parse the CLI once and merge it over the environment.
    pub fn from_env_and_args() -> Result<(Self, Command)> {
        // A missing .env file is normal.
        dotenvy::dotenv().ok();
        let cli = Cli::parse();
        let cfg = Self::from_lookup(&cli, |name| env::var(name).ok())?;
        Ok((cfg, cli.command))
    }

    /// Merge `cli` over variables read through `lookup`, then defaults.
    pub fn from_lookup<F>(cli: &Cli, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let parsed = |name: &str| -> Result<Option<u64>> { parse_var(name, var(name)) };

        let (cli_host, cli_port) = match &cli.command {
            Command::Serve { host, port } => (host.clone(), *port),
            Command::Publish { .. } => (None, None),
        };
        let env_port = parse_var::<u16>("REEL_PUBLISHER_PORT", var("REEL_PUBLISHER_PORT"))?;

        let defaults = RetryPolicy::default();
        let retry = RetryPolicy {
            max_retries: parse_var::<u32>("PUBLISH_MAX_RETRIES", var("PUBLISH_MAX_RETRIES"))?
                .unwrap_or(defaults.max_retries),
            base_delay: parsed("PUBLISH_RETRY_BASE_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.base_delay),
            max_delay: defaults.max_delay,
        };

        Ok(Self {
            host: cli_host
                .or_else(|| var("REEL_PUBLISHER_HOST"))
                .unwrap_or_else(|| "0.0.0.0".into()),
            port: cli_port.or(env_port).unwrap_or(8080),
            uploads_dir: cli
                .uploads_dir
                .clone()
                .or_else(|| var("REEL_PUBLISHER_UPLOADS_DIR").map(PathBuf::from))
                .unwrap_or_else(|| PathBuf::from("./uploads")),
            ffmpeg_path: var("FFMPEG_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("ffmpeg")),
            ffprobe_path: var("FFPROBE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("ffprobe")),

            google_client_id: Secret::new(var("GOOGLE_CLIENT_ID")),
            google_client_secret: Secret::new(var("GOOGLE_CLIENT_SECRET")),
            google_refresh_token: Secret::new(var("GOOGLE_REFRESH_TOKEN")),
            google_token_uri: var("GOOGLE_TOKEN_URI").unwrap_or_else(|| GOOGLE_TOKEN_URI.into()),
            gcs_access_token: Secret::new(var("GCS_ACCESS_TOKEN")),
            bucket: var("GCP_PUBLIC_BUCKET_NAME").or_else(|| var("GCP_BUCKET_NAME")),

            instagram_account_id: var("INSTAGRAM_ACCOUNT_ID"),
            instagram_access_token: Secret::new(var("INSTAGRAM_ACCESS_TOKEN")),
            instagram_api_base: var("INSTAGRAM_API_BASE")
                .unwrap_or_else(|| INSTAGRAM_API_BASE.into()),

            retry,
            http_timeout: Duration::from_secs(parsed("PUBLISH_HTTP_TIMEOUT_SECS")?.unwrap_or(120)),
            instagram_poll_timeout: Duration::from_secs(
                parsed("INSTAGRAM_POLL_TIMEOUT_SECS")?.unwrap_or(60),
            ),
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn credential_presence(&self) -> CredentialPresence {
        CredentialPresence {
            google_client_id: self.google_client_id.is_set(),
            google_client_secret: self.google_client_secret.is_set(),
            google_refresh_token: self.google_refresh_token.is_set(),
            gcs_access_token: self.gcs_access_token.is_set(),
            gcp_bucket_name: self.bucket.is_some(),
            instagram_account_id: self.instagram_account_id.is_some(),
            instagram_access_token: self.instagram_access_token.is_set(),
        }
    }

    pub fn http_client(&self) -> Result<reqwest::Client> {
        reqwest::Client::builder()
            .timeout(self.http_timeout)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("building HTTP client")
    }

    /// Wire the adapters and the pipeline from this configuration.
    pub fn publisher(&self) -> Result<Publisher> {
        let http = self.http_client()?;

        let google: Arc<dyn AccessTokenProvider> = Arc::new(RefreshTokenProvider::new(
            http.clone(),
            OAuthClientCredentials {
                client_id: self.google_client_id.expose().unwrap_or_default(),
                client_secret: self.google_client_secret.expose().unwrap_or_default(),
                refresh_token: self.google_refresh_token.expose(),
                token_uri: self.google_token_uri.clone(),
            },
            self.retry,
        ));
        let gcs_tokens: Arc<dyn AccessTokenProvider> = if self.gcs_access_token.is_set() {
            Arc::new(StaticTokenProvider::new(
                self.gcs_access_token.expose(),
                "GCS_ACCESS_TOKEN is empty",
            ))
        } else {
            google.clone()
        };
        let instagram_tokens = Arc::new(StaticTokenProvider::new(
            self.instagram_access_token.expose(),
            "missing INSTAGRAM_ACCESS_TOKEN",
        ));

        let targets = PublishTargets {
            video_host: Arc::new(YouTubeClient::new(
                http.clone(),
                google,
                YOUTUBE_UPLOAD_BASE,
                self.retry,
            )),
            object_store: Arc::new(GcsClient::new(
                http.clone(),
                gcs_tokens,
                GcsEndpoints::default(),
                self.retry,
            )),
            social: Arc::new(InstagramClient::new(
                http,
                instagram_tokens,
                self.instagram_account_id.clone(),
                self.instagram_api_base.clone(),
                PollSettings {
                    timeout: self.instagram_poll_timeout,
                    ..PollSettings::default()
                },
                self.retry,
            )),
        };

        Ok(Publisher::new(
            AssetLocator::new(&self.uploads_dir),
            MetadataResolver::default(),
            Arc::new(ThumbnailExtractor::new(&self.ffmpeg_path, &self.ffprobe_path)),
            targets,
            self.bucket.clone(),
        ))
    }
}

fn parse_var<T>(name: &str, value: Option<String>) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .with_context(|| format!("parsing {} value `{}`", name, raw))
        })
        .transpose()
}
