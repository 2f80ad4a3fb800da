//! Aggregate outcome of a publish run.

use chrono::NaiveDate;
use serde::Serialize;
use std::fmt;

/// One of the three per-platform legs of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    VideoHost,
    ObjectStore,
    Social,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::VideoHost => "video_host",
            Stage::ObjectStore => "object_store",
            Stage::Social => "social",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure class of a leg, mirrored from `AdapterError`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LegErrorKind {
    AuthFailure,
    TransientNetwork,
    PlatformRejected,
    Configuration,
    Io,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LegError {
    pub stage: Stage,
    pub kind: LegErrorKind,
    pub message: String,
}

/// A best-effort step that failed and was deliberately not counted as a leg
/// error (public exposure, reachability, thumbnails).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IgnoredFailure {
    pub stage: Option<Stage>,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PublishResult {
    pub date: NaiveDate,
    pub video_file: String,
    pub video_host_id: Option<String>,
    pub watch_url: Option<String>,
    pub object_store_url: Option<String>,
    pub social_post_ids: Vec<String>,
    pub errors: Vec<LegError>,
    pub ignored: Vec<IgnoredFailure>,
}

impl PublishResult {
    pub fn new(date: NaiveDate, video_file: impl Into<String>) -> Self {
        Self {
            date,
            video_file: video_file.into(),
            video_host_id: None,
            watch_url: None,
            object_store_url: None,
            social_post_ids: Vec::new(),
            errors: Vec::new(),
            ignored: Vec::new(),
        }
    }

    pub fn record_error(&mut self, stage: Stage, kind: LegErrorKind, message: impl Into<String>) {
        self.errors.push(LegError {
            stage,
            kind,
            message: message.into(),
        });
    }

    pub fn record_ignored(&mut self, stage: Option<Stage>, message: impl Into<String>) {
        self.ignored.push(IgnoredFailure {
            stage,
            message: message.into(),
        });
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn stage_failed(&self, stage: Stage) -> bool {
        self.errors.iter().any(|e| e.stage == stage)
    }

    /// One human-readable line per leg.
    pub fn summary_lines(&self) -> Vec<String> {
        let leg = |stage: Stage, success: Option<String>| -> String {
            let failures = self
                .errors
                .iter()
                .filter(|e| e.stage == stage)
                .map(|e| e.message.as_str())
                .collect::<Vec<_>>();
            if !failures.is_empty() {
                format!("{stage:<12} FAILED  {}", failures.join("; "))
            } else if let Some(detail) = success {
                format!("{stage:<12} ok      {detail}")
            } else {
                format!("{stage:<12} skipped")
            }
        };

        vec![
            leg(Stage::VideoHost, self.watch_url.clone()),
            leg(Stage::ObjectStore, self.object_store_url.clone()),
            leg(
                Stage::Social,
                (!self.social_post_ids.is_empty()).then(|| self.social_post_ids.join(", ")),
            ),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_serialises_as_snake_case() {
        let json = serde_json::to_string(&Stage::ObjectStore).unwrap();
        assert_eq!(json, "\"object_store\"");
    }

    #[test]
    fn summary_reports_each_leg() {
        let date = NaiveDate::from_ymd_opt(2025, 7, 26).unwrap();
        let mut result = PublishResult::new(date, "clip.mp4");
        result.watch_url = Some("https://www.youtube.com/watch?v=abc".into());
        result.record_error(Stage::ObjectStore, LegErrorKind::TransientNetwork, "503");

        let lines = result.summary_lines();
        assert!(lines[0].contains("ok") && lines[0].contains("watch?v=abc"));
        assert!(lines[1].contains("FAILED") && lines[1].contains("503"));
        assert!(lines[2].contains("skipped"));
        assert!(result.has_errors());
        assert!(result.stage_failed(Stage::ObjectStore));
        assert!(!result.stage_failed(Stage::Social));
    }
}
