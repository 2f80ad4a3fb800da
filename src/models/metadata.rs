//! Resolved per-destination settings consumed by the platform adapters.
//!
//! These are the *output* of metadata resolution: every field has its final
//! value. The partial, per-layer records live in `services::resolver`.

use serde::Serialize;

/// Offset (seconds) of the frame used for the social preview thumbnail.
pub const DEFAULT_THUMB_OFFSET_SECONDS: f64 = 2.75;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedMetadata {
    pub video_host: VideoHostSettings,
    pub object_store: ObjectStoreSettings,
    pub social: SocialSettings,
}

/// Body of a video insert: serialises to the `snippet` / `status` JSON the
/// video host expects.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VideoHostSettings {
    pub snippet: Snippet,
    pub status: Status,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Snippet {
    pub title: String,
    pub description: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_audio_language: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Status {
    pub privacy_status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub self_declared_made_for_kids: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObjectStoreSettings {
    /// Bucket named by the metadata; the configured bucket is used otherwise.
    pub bucket_preference: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SocialSettings {
    pub caption: String,
    /// Normalised: no leading `#`, no whitespace, never empty entries.
    pub hashtags: Vec<String>,
    pub thumb_offset_seconds: f64,
    pub share_to_feed: bool,
    pub enable_reel: bool,
    pub enable_post: bool,
}

impl SocialSettings {
    /// Whether the social leg has anything to publish.
    pub fn is_enabled(&self) -> bool {
        self.enable_reel || self.enable_post
    }

    /// Feed sharing requested for the single reel call. A feed "post" is only
    /// reachable through a reel shared to the feed.
    pub fn effective_share_to_feed(&self) -> bool {
        self.enable_post || self.share_to_feed
    }

    /// Final caption text: caption, hashtags, then the shareable link.
    pub fn compose_caption(&self, link: Option<&str>) -> String {
        let mut caption = self.caption.trim().to_string();
        if !self.hashtags.is_empty() {
            let tags = self
                .hashtags
                .iter()
                .map(|h| format!("#{h}"))
                .collect::<Vec<_>>()
                .join(" ");
            push_paragraph(&mut caption, &tags);
        }
        if let Some(link) = link.filter(|l| !l.trim().is_empty()) {
            push_paragraph(&mut caption, link.trim());
        }
        caption
    }
}

fn push_paragraph(text: &mut String, paragraph: &str) {
    if !text.is_empty() {
        text.push_str("\n\n");
    }
    text.push_str(paragraph);
}
