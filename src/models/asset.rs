//! Local inputs of a publish run.

use serde::Serialize;
use std::path::{Path, PathBuf};

/// Files located for one request.
///
/// `folder` is always the date-derived folder, even when the video itself was
/// supplied explicitly from elsewhere.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssetBundle {
    pub folder: PathBuf,
    pub video_path: PathBuf,
    pub metadata_path: Option<PathBuf>,
}

impl AssetBundle {
    /// File name of the video, used as the last segment of the object key.
    pub fn file_name(&self) -> String {
        self.video_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "video.mp4".to_string())
    }

    /// MIME type derived from the video extension.
    pub fn content_type(&self) -> &'static str {
        content_type_for(&self.video_path)
    }
}

pub const VIDEO_EXTENSIONS: [&str; 5] = ["mp4", "mov", "m4v", "webm", "mkv"];

pub fn is_video_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|ext| {
            VIDEO_EXTENSIONS
                .iter()
                .any(|candidate| candidate.eq_ignore_ascii_case(ext))
        })
        .unwrap_or(false)
}

pub fn content_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "mov" => "video/quicktime",
        "m4v" => "video/x-m4v",
        "webm" => "video/webm",
        "mkv" => "video/x-matroska",
        _ => "video/mp4",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn video_extension_match_is_case_insensitive() {
        assert!(is_video_file(Path::new("clip.MP4")));
        assert!(is_video_file(Path::new("clip.mov")));
        assert!(!is_video_file(Path::new("metadata.json")));
        assert!(!is_video_file(Path::new("README")));
    }

    #[test]
    fn content_type_follows_extension() {
        assert_eq!(content_type_for(Path::new("a.mov")), "video/quicktime");
        assert_eq!(content_type_for(Path::new("a.MP4")), "video/mp4");
        assert_eq!(content_type_for(Path::new("a.webm")), "video/webm");
    }
}
