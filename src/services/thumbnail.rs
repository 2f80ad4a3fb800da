//! Portrait thumbnail extraction.
//!
//! Probes the video duration with ffprobe, seeks to a clamped offset and
//! writes a single 1080x1920 JPEG with ffmpeg. The source video is only ever
//! read.

use async_trait::async_trait;
use serde_json::Value;
use std::{
    io,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tokio::{fs, process::Command};
use tracing::{debug, info, warn};

pub const THUMBNAIL_FILE_NAME: &str = "thumbnail_9x16.jpg";
pub const THUMBNAIL_WIDTH: u32 = 1080;
pub const THUMBNAIL_HEIGHT: u32 = 1920;

/// Distance from the end used when an offset runs past the last frame.
const LAST_FRAME_MARGIN_SECONDS: f64 = 0.1;

#[derive(Debug, Error)]
pub enum ThumbnailError {
    #[error("input video does not exist: {0}")]
    InvalidInput(String),
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("ffprobe failed: {0}")]
    Probe(String),
    #[error("ffmpeg failed: {0}")]
    Extraction(String),
    #[error("ffmpeg produced no image at {0}")]
    MissingOutput(String),
}

/// Produces one still frame for a video.
#[async_trait]
pub trait FrameExtractor: Send + Sync {
    async fn extract(
        &self,
        video: &Path,
        offset_seconds: f64,
        output: &Path,
    ) -> Result<PathBuf, ThumbnailError>;
}

#[derive(Debug, Clone)]
pub struct ThumbnailExtractor {
    ffmpeg_path: PathBuf,
    ffprobe_path: PathBuf,
}

impl ThumbnailExtractor {
    pub fn new(ffmpeg_path: impl Into<PathBuf>, ffprobe_path: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
            ffprobe_path: ffprobe_path.into(),
        }
    }

    /// Container duration in seconds, if ffprobe reports one.
    pub async fn probe_duration(&self, video: &Path) -> Result<Option<f64>, ThumbnailError> {
        let output = Command::new(&self.ffprobe_path)
            .args(["-v", "error", "-show_entries", "format=duration", "-of", "json"])
            .arg(video)
            .output()
            .await
            .map_err(|source| ThumbnailError::Spawn {
                program: self.ffprobe_path.display().to_string(),
                source,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ThumbnailError::Probe(stderr.trim().to_string()));
        }
        Ok(parse_duration(&String::from_utf8_lossy(&output.stdout)))
    }

    /// Confirm both binaries can be spawned.
    pub async fn check_tools(&self) -> Result<(), ThumbnailError> {
        for program in [&self.ffprobe_path, &self.ffmpeg_path] {
            let output = Command::new(program)
                .arg("-version")
                .output()
                .await
                .map_err(|source| ThumbnailError::Spawn {
                    program: program.display().to_string(),
                    source,
                })?;
            if !output.status.success() {
                return Err(ThumbnailError::Probe(format!(
                    "{} -version exited with {}",
                    program.display(),
                    output.status
                )));
            }
        }
        Ok(())
    }

    async fn run_ffmpeg(&self, args: Vec<String>) -> Result<(), ThumbnailError> {
        debug!("running {} {}", self.ffmpeg_path.display(), args.join(" "));
        let output = Command::new(&self.ffmpeg_path)
            .args(&args)
            .output()
            .await
            .map_err(|source| ThumbnailError::Spawn {
                program: self.ffmpeg_path.display().to_string(),
                source,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ThumbnailError::Extraction(last_lines(&stderr, 5)));
        }
        Ok(())
    }
}

#[async_trait]
impl FrameExtractor for ThumbnailExtractor {
    async fn extract(
        &self,
        video: &Path,
        offset_seconds: f64,
        output: &Path,
    ) -> Result<PathBuf, ThumbnailError> {
        if !video.is_file() {
            return Err(ThumbnailError::InvalidInput(video.display().to_string()));
        }
        if let Some(parent) = output.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|err| ThumbnailError::Extraction(err.to_string()))?;
        }
        remove_stale(output).await;

        let duration = match self.probe_duration(video).await {
            Ok(duration) => duration,
            Err(err) => {
                warn!("duration probe failed, seeking without clamping: {}", err);
                None
            }
        };
        let offset = clamp_offset(offset_seconds, duration);
        if offset != offset_seconds {
            debug!(
                requested = offset_seconds,
                clamped = offset,
                ?duration,
                "thumbnail offset clamped"
            );
        }

        self.run_ffmpeg(seek_args(video, offset, output)).await?;

        // Seeking close to the end can yield no decodable frame; take the
        // last one instead.
        if !output.is_file() {
            debug!("no frame at {:.3}s, retrying from end of stream", offset);
            self.run_ffmpeg(last_frame_args(video, output)).await?;
        }
        if !output.is_file() {
            return Err(ThumbnailError::MissingOutput(output.display().to_string()));
        }

        info!("thumbnail generated at {} (ts={:.2}s)", output.display(), offset);
        Ok(output.to_path_buf())
    }
}

/// Clamp a requested offset into `[0, duration - margin]`.
pub fn clamp_offset(requested: f64, duration: Option<f64>) -> f64 {
    let requested = if requested.is_finite() && requested > 0.0 {
        requested
    } else {
        0.0
    };
    match duration {
        Some(duration) if duration.is_finite() && duration > 0.0 && requested >= duration => {
            (duration - LAST_FRAME_MARGIN_SECONDS).max(0.0)
        }
        _ => requested,
    }
}

/// Scale to cover the portrait frame, then centre-crop to exactly 9:16.
pub fn portrait_filter() -> String {
    format!(
        "scale={w}:{h}:force_original_aspect_ratio=increase,crop={w}:{h},setsar=1",
        w = THUMBNAIL_WIDTH,
        h = THUMBNAIL_HEIGHT
    )
}

fn seek_args(video: &Path, offset: f64, output: &Path) -> Vec<String> {
    vec![
        "-y".into(),
        "-ss".into(),
        format!("{offset:.3}"),
        "-i".into(),
        video.to_string_lossy().into_owned(),
        "-frames:v".into(),
        "1".into(),
        "-q:v".into(),
        "2".into(),
        "-vf".into(),
        portrait_filter(),
        output.to_string_lossy().into_owned(),
    ]
}

fn last_frame_args(video: &Path, output: &Path) -> Vec<String> {
    vec![
        "-y".into(),
        "-sseof".into(),
        "-1".into(),
        "-i".into(),
        video.to_string_lossy().into_owned(),
        "-update".into(),
        "1".into(),
        "-q:v".into(),
        "2".into(),
        "-vf".into(),
        portrait_filter(),
        output.to_string_lossy().into_owned(),
    ]
}

fn parse_duration(json: &str) -> Option<f64> {
    let value: Value = serde_json::from_str(json).ok()?;
    let duration = value.get("format")?.get("duration")?;
    let seconds = match duration {
        Value::String(s) => s.trim().parse::<f64>().ok(),
        Value::Number(n) => n.as_f64(),
        _ => None,
    };
    seconds.filter(|d| d.is_finite() && *d > 0.0)
}

async fn remove_stale(output: &Path) {
    if let Err(err) = fs::remove_file(output).await {
        if err.kind() != io::ErrorKind::NotFound {
            debug!("could not remove stale thumbnail {}: {}", output.display(), err);
        }
    }
}

fn last_lines(text: &str, n: usize) -> String {
    let lines = text.lines().collect::<Vec<_>>();
    lines[lines.len().saturating_sub(n)..].join("\n")
}
