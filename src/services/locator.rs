//! Asset discovery for a dated upload folder.
//!
//! Layout: `<uploads_root>/<YYYY>/<MM>/<DD>/` holds exactly one video and an
//! optional `metadata.json`; `<uploads_root>/youtube_metadata.json` is the
//! shared fallback template. Lookups never modify the filesystem.

use crate::{
    errors::PipelineError,
    models::{
        asset::{AssetBundle, is_video_file},
        request::PublishRequest,
    },
};
use std::{
    fs,
    path::{Path, PathBuf},
};
use tracing::{debug, info};

pub const METADATA_FILE_NAME: &str = "metadata.json";
pub const TEMPLATE_FILE_NAME: &str = "youtube_metadata.json";

#[derive(Debug, Clone)]
pub struct AssetLocator {
    uploads_root: PathBuf,
}

impl AssetLocator {
    pub fn new(uploads_root: impl Into<PathBuf>) -> Self {
        Self {
            uploads_root: uploads_root.into(),
        }
    }

    pub fn uploads_root(&self) -> &Path {
        &self.uploads_root
    }

    /// `<uploads_root>/<YYYY>/<MM>/<DD>`. Does not check for existence.
    pub fn date_folder(&self, request: &PublishRequest) -> PathBuf {
        let mut folder = self.uploads_root.clone();
        for segment in request.date_segments().split('/') {
            folder.push(segment);
        }
        folder
    }

    pub fn template_path(&self) -> PathBuf {
        self.uploads_root.join(TEMPLATE_FILE_NAME)
    }

    /// Resolve the video and metadata document for a request.
    pub fn locate(&self, request: &PublishRequest) -> Result<AssetBundle, PipelineError> {
        let folder = self.date_folder(request);

        let video_path = match &request.explicit_file_path {
            Some(explicit) => {
                if !explicit.is_file() {
                    return Err(PipelineError::AssetNotFound(format!(
                        "video file not found: {}",
                        explicit.display()
                    )));
                }
                explicit.clone()
            }
            None => discover_video(&folder)?,
        };

        let metadata_path = self.discover_metadata(&folder);
        info!(
            video = %video_path.display(),
            metadata = ?metadata_path.as_ref().map(|p| p.display().to_string()),
            "located assets"
        );

        Ok(AssetBundle {
            folder,
            video_path,
            metadata_path,
        })
    }

    /// Prefer the folder's own document, then the shared template.
    fn discover_metadata(&self, folder: &Path) -> Option<PathBuf> {
        let own = folder.join(METADATA_FILE_NAME);
        if own.is_file() {
            return Some(own);
        }
        let template = self.template_path();
        if template.is_file() {
            debug!(
                "{} missing in {}; using template {}",
                METADATA_FILE_NAME,
                folder.display(),
                template.display()
            );
            return Some(template);
        }
        debug!("no metadata document for {}; defaults apply", folder.display());
        None
    }
}

/// Exactly one video file must exist in `folder`.
fn discover_video(folder: &Path) -> Result<PathBuf, PipelineError> {
    let entries = fs::read_dir(folder).map_err(|err| {
        PipelineError::AssetNotFound(format!("date folder {}: {}", folder.display(), err))
    })?;

    let mut candidates = entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && is_video_file(path))
        .collect::<Vec<_>>();
    candidates.sort();

    match candidates.len() {
        0 => Err(PipelineError::AssetNotFound(format!(
            "no video file in {}",
            folder.display()
        ))),
        1 => Ok(candidates.remove(0)),
        _ => Err(PipelineError::AmbiguousAsset {
            folder: folder.to_path_buf(),
            candidates: candidates
                .iter()
                .filter_map(|p| p.file_name())
                .map(|n| n.to_string_lossy().into_owned())
                .collect(),
        }),
    }
}
