use anyhow::{Context, Result};
use axum::Router;
use serde_json::json;
use std::{fs, io::ErrorKind, process::ExitCode, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

mod config;
mod errors;
mod handlers;
mod models;
mod platforms;
mod routes;
mod services;

use config::{AppConfig, Command};
use handlers::AppState;
use models::request::PublishRequest;
use services::thumbnail::ThumbnailExtractor;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // --- Logging setup (stderr, so stdout stays machine-readable) ---
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    // --- Parse config + subcommand ---
    let (cfg, command) = AppConfig::from_env_and_args()?;
    tracing::debug!("Starting reel-publisher with config: {:?}", cfg);

    match command {
        Command::Publish {
            date,
            file,
            metadata,
        } => {
            let request = PublishRequest::new(date)
                .with_file(file)
                .with_metadata_override(metadata);
            publish(&cfg, request).await
        }
        Command::Serve { .. } => {
            serve(cfg).await?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// One run; JSON result on stdout, per-leg summary on stderr.
async fn publish(cfg: &AppConfig, request: PublishRequest) -> Result<ExitCode> {
    let publisher = cfg.publisher()?;

    match publisher.run(&request).await {
        Ok(result) => {
            println!("{}", serde_json::to_string_pretty(&result)?);
            for line in result.summary_lines() {
                eprintln!("{line}");
            }
            Ok(if result.has_errors() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            })
        }
        Err(err) => {
            tracing::error!("publish aborted before upload: {}", err);
            println!("{}", json!({ "error": err.to_string() }));
            Ok(ExitCode::FAILURE)
        }
    }
}

async fn serve(cfg: AppConfig) -> Result<()> {
    // --- Ensure uploads directory exists ---
    if !cfg.uploads_dir.exists() {
        fs::create_dir_all(&cfg.uploads_dir)
            .with_context(|| format!("creating {}", cfg.uploads_dir.display()))?;
        tracing::info!("Created uploads directory at {}", cfg.uploads_dir.display());
    }

    let state = AppState {
        publisher: Arc::new(cfg.publisher()?),
        tools: ThumbnailExtractor::new(&cfg.ffmpeg_path, &cfg.ffprobe_path),
        credentials: cfg.credential_presence(),
    };

    // --- Build router ---
    let app: Router = routes::routes::routes().with_state(state);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr)
                .await
                .with_context(|| format!("binding {}", fallback_addr))?
        }
        Err(err) => return Err(err).with_context(|| format!("binding {}", addr)),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}
