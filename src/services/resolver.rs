//! Layered metadata resolution.
//!
//! Three partial records are merged per destination and per field, in
//! increasing precedence: built-in template defaults, the discovered document,
//! then an explicit override. Each destination only recognises its own keys;
//! everything else is dropped by deserialisation.
//!
//! Document shape:
//!
//! ```json
//! {
//!   "youtube":   { "snippet": { "title": "..." }, "status": { "privacyStatus": "public" } },
//!   "gcs":       { "bucket": "my-public-bucket" },
//!   "instagram": { "caption": "...", "hashtags": ["news"], "enable_post": false }
//! }
//! ```
//!
//! Top-level `snippet` / `status` are accepted when there is no `youtube`
//! section, which is the shape of the shared server template.

use crate::{
    errors::PipelineError,
    models::metadata::{
        DEFAULT_THUMB_OFFSET_SECONDS, ObjectStoreSettings, ResolvedMetadata, Snippet,
        SocialSettings, Status, VideoHostSettings,
    },
};
use serde::{Deserialize, Deserializer, de::DeserializeOwned};
use serde_json::{Map, Value};
use std::{
    fs,
    path::{Path, PathBuf},
};
use tracing::{debug, info};

pub const DEFAULT_TITLE: &str = "New upload #Shorts";
pub const DEFAULT_PRIVACY_STATUS: &str = "unlisted";

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnippetPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    #[serde(default, deserialize_with = "lenient_strings")]
    pub tags: Option<Vec<String>>,
    #[serde(default, deserialize_with = "string_or_number")]
    pub category_id: Option<String>,
    pub default_language: Option<String>,
    pub default_audio_language: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusPatch {
    pub privacy_status: Option<String>,
    pub self_declared_made_for_kids: Option<bool>,
    pub license: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ObjectStorePatch {
    pub bucket: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SocialPatch {
    pub caption: Option<String>,
    #[serde(default, deserialize_with = "lenient_strings")]
    pub hashtags: Option<Vec<String>>,
    pub thumb_offset_seconds: Option<f64>,
    pub share_to_feed: Option<bool>,
    pub enable_reel: Option<bool>,
    pub enable_post: Option<bool>,
}

/// One source of metadata: every field optional, unknown keys already gone.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataLayer {
    pub snippet: SnippetPatch,
    pub status: StatusPatch,
    pub object_store: ObjectStorePatch,
    pub social: SocialPatch,
}

impl MetadataLayer {
    /// The built-in template: the lowest-precedence layer.
    ///
    /// Social caption and hashtags stay unset so they can be derived from the
    /// video-host snippet.
    pub fn template_defaults() -> Self {
        Self {
            snippet: SnippetPatch {
                title: Some(DEFAULT_TITLE.to_string()),
                description: Some(String::new()),
                tags: Some(Vec::new()),
                ..SnippetPatch::default()
            },
            status: StatusPatch {
                privacy_status: Some(DEFAULT_PRIVACY_STATUS.to_string()),
                ..StatusPatch::default()
            },
            object_store: ObjectStorePatch::default(),
            social: SocialPatch {
                thumb_offset_seconds: Some(DEFAULT_THUMB_OFFSET_SECONDS),
                share_to_feed: Some(true),
                enable_reel: Some(true),
                enable_post: Some(true),
                ..SocialPatch::default()
            },
        }
    }

    /// Field-wise last-writer-wins: values present in `over` replace ours.
    pub fn merge(self, over: MetadataLayer) -> MetadataLayer {
        MetadataLayer {
            snippet: SnippetPatch {
                title: over.snippet.title.or(self.snippet.title),
                description: over.snippet.description.or(self.snippet.description),
                tags: over.snippet.tags.or(self.snippet.tags),
                category_id: over.snippet.category_id.or(self.snippet.category_id),
                default_language: over
                    .snippet
                    .default_language
                    .or(self.snippet.default_language),
                default_audio_language: over
                    .snippet
                    .default_audio_language
                    .or(self.snippet.default_audio_language),
            },
            status: StatusPatch {
                privacy_status: over.status.privacy_status.or(self.status.privacy_status),
                self_declared_made_for_kids: over
                    .status
                    .self_declared_made_for_kids
                    .or(self.status.self_declared_made_for_kids),
                license: over.status.license.or(self.status.license),
            },
            object_store: ObjectStorePatch {
                bucket: over.object_store.bucket.or(self.object_store.bucket),
            },
            social: SocialPatch {
                caption: over.social.caption.or(self.social.caption),
                hashtags: over.social.hashtags.or(self.social.hashtags),
                thumb_offset_seconds: over
                    .social
                    .thumb_offset_seconds
                    .or(self.social.thumb_offset_seconds),
                share_to_feed: over.social.share_to_feed.or(self.social.share_to_feed),
                enable_reel: over.social.enable_reel.or(self.social.enable_reel),
                enable_post: over.social.enable_post.or(self.social.enable_post),
            },
        }
    }

    /// Parse one JSON document into a layer.
    pub fn parse(path: &Path, text: &str) -> Result<MetadataLayer, PipelineError> {
        let parse_err = |reason: String| PipelineError::MetadataParseError {
            path: path.to_path_buf(),
            reason,
        };

        let root: Value = serde_json::from_str(text).map_err(|e| parse_err(e.to_string()))?;
        let Value::Object(root) = root else {
            return Err(parse_err("expected a JSON object at the top level".into()));
        };

        let video_host = root
            .get("youtube")
            .and_then(Value::as_object)
            .unwrap_or(&root);

        Ok(MetadataLayer {
            snippet: section(video_host, "snippet").map_err(&parse_err)?,
            status: section(video_host, "status").map_err(&parse_err)?,
            object_store: section(&root, "gcs").map_err(&parse_err)?,
            social: section(&root, "instagram").map_err(&parse_err)?,
        })
    }
}

/// Deserialise `parent[key]` when it is an object; anything else is ignored.
fn section<T: DeserializeOwned + Default>(
    parent: &Map<String, Value>,
    key: &str,
) -> Result<T, String> {
    match parent.get(key) {
        Some(value @ Value::Object(_)) => {
            T::deserialize(value).map_err(|err| format!("`{key}`: {err}"))
        }
        _ => Ok(T::default()),
    }
}

/// Merge the three layers and derive the final settings. Pure.
pub fn resolve(
    template: &MetadataLayer,
    document: Option<&MetadataLayer>,
    explicit: Option<&MetadataLayer>,
) -> ResolvedMetadata {
    let merged = [document, explicit]
        .into_iter()
        .flatten()
        .fold(template.clone(), |acc, layer| acc.merge(layer.clone()));

    let snippet = Snippet {
        title: merged.snippet.title.unwrap_or_default(),
        description: merged.snippet.description.unwrap_or_default(),
        tags: merged.snippet.tags.unwrap_or_default(),
        category_id: merged.snippet.category_id,
        default_language: merged.snippet.default_language,
        default_audio_language: merged.snippet.default_audio_language,
    };
    let status = Status {
        privacy_status: merged
            .status
            .privacy_status
            .unwrap_or_else(|| DEFAULT_PRIVACY_STATUS.to_string()),
        self_declared_made_for_kids: merged.status.self_declared_made_for_kids,
        license: merged.status.license,
    };

    let caption = match merged.social.caption {
        Some(caption) if !caption.trim().is_empty() => caption.trim().to_string(),
        _ => caption_from_snippet(&snippet),
    };
    let hashtags = normalize_hashtags(
        merged
            .social
            .hashtags
            .as_deref()
            .unwrap_or(snippet.tags.as_slice()),
    );

    let social = SocialSettings {
        caption,
        hashtags,
        thumb_offset_seconds: merged
            .social
            .thumb_offset_seconds
            .unwrap_or(DEFAULT_THUMB_OFFSET_SECONDS),
        share_to_feed: merged.social.share_to_feed.unwrap_or(true),
        enable_reel: merged.social.enable_reel.unwrap_or(true),
        enable_post: merged.social.enable_post.unwrap_or(true),
    };

    ResolvedMetadata {
        video_host: VideoHostSettings { snippet, status },
        object_store: ObjectStoreSettings {
            bucket_preference: merged.object_store.bucket.filter(|b| !b.trim().is_empty()),
        },
        social,
    }
}

fn caption_from_snippet(snippet: &Snippet) -> String {
    let title = snippet.title.trim();
    let description = snippet.description.trim();
    if description.is_empty() {
        title.to_string()
    } else if title.is_empty() {
        description.to_string()
    } else {
        format!("{title}\n\n{description}")
    }
}

fn normalize_hashtags(raw: &[String]) -> Vec<String> {
    raw.iter()
        .map(|tag| {
            tag.trim()
                .trim_start_matches('#')
                .chars()
                .filter(|c| !c.is_whitespace())
                .collect::<String>()
        })
        .filter(|tag| !tag.is_empty())
        .collect()
}

/// Reads metadata documents from disk and resolves them.
#[derive(Debug, Clone)]
pub struct MetadataResolver {
    template: MetadataLayer,
}

impl Default for MetadataResolver {
    fn default() -> Self {
        Self {
            template: MetadataLayer::template_defaults(),
        }
    }
}

impl MetadataResolver {
    /// Resolve from the discovered document and an optional explicit override.
    ///
    /// The override must exist; a discovered document that cannot be read or
    /// parsed aborts resolution.
    pub fn resolve_files(
        &self,
        document: Option<&Path>,
        explicit: Option<&Path>,
    ) -> Result<ResolvedMetadata, PipelineError> {
        let document = document.map(load_layer).transpose()?;
        let explicit = match explicit {
            Some(path) if !path.is_file() => {
                return Err(PipelineError::MetadataNotFound(path.to_path_buf()));
            }
            Some(path) => Some(load_layer(path)?),
            None => None,
        };

        let resolved = resolve(&self.template, document.as_ref(), explicit.as_ref());
        debug!(
            snippet = %serde_json::to_string(&resolved.video_host.snippet).unwrap_or_default(),
            status = %serde_json::to_string(&resolved.video_host.status).unwrap_or_default(),
            "resolved video host settings"
        );
        Ok(resolved)
    }
}

fn load_layer(path: &Path) -> Result<MetadataLayer, PipelineError> {
    let text = fs::read_to_string(path).map_err(|err| PipelineError::MetadataParseError {
        path: PathBuf::from(path),
        reason: err.to_string(),
    })?;
    info!("applying metadata from {}", path.display());
    MetadataLayer::parse(path, &text)
}

/// Accepts `"22"` or `22`.
fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(serde::de::Error::custom(format!(
            "expected string or number, found {other}"
        ))),
    }
}

/// A list whose string and number entries are kept as strings; other entries
/// are skipped.
fn lenient_strings<'de, D>(deserializer: D) -> Result<Option<Vec<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Vec<Value>>::deserialize(deserializer)?;
    Ok(value.map(|items| {
        items
            .into_iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .collect()
    }))
}
