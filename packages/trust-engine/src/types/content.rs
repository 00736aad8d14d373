//! Content identity and extracted post content.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{PipelineError, Result};

const KEY_PREFIX: &str = "post:";
const MAX_SHORTCODE_LEN: usize = 64;
const POST_PATH_SEGMENTS: [&str; 3] = ["p", "reel", "tv"];

/// Normalised identity of a submitted post, e.g. `post:ABC123`.
///
/// Used as the key for deduplication and for both cache namespaces, so two
/// spellings of the same post (`https://www.instagram.com/p/ABC123/?igsh=x`
/// and `post:ABC123`) share one pipeline run and one cache entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentKey(String);

impl ContentKey {
    /// Parse and normalise a post reference.
    ///
    /// Accepts `post:<shortcode>` or an Instagram post URL (`/p/`, `/reel/`
    /// or `/tv/` paths). Anything else is a validation failure.
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        if input.is_empty() {
            return Err(PipelineError::validation("content key is empty"));
        }

        let shortcode = if let Some(code) = input.strip_prefix(KEY_PREFIX) {
            code.to_string()
        } else {
            Self::shortcode_from_url(input)?
        };

        Self::validate_shortcode(&shortcode)?;
        Ok(Self(format!("{KEY_PREFIX}{shortcode}")))
    }

    fn shortcode_from_url(input: &str) -> Result<String> {
        let with_scheme = if input.contains("://") {
            input.to_string()
        } else {
            format!("https://{input}")
        };

        let url = url::Url::parse(&with_scheme)
            .map_err(|e| PipelineError::validation(format!("not a URL: {e}")))?;

        match url.scheme() {
            "http" | "https" => {}
            other => {
                return Err(PipelineError::validation(format!(
                    "unsupported scheme: {other}"
                )))
            }
        }

        let host = url.host_str().unwrap_or_default().to_ascii_lowercase();
        let host = host.strip_prefix("www.").unwrap_or(&host);
        if host != "instagram.com" {
            return Err(PipelineError::validation(format!(
                "not an Instagram URL: {host}"
            )));
        }

        let segments: Vec<&str> = url
            .path_segments()
            .map(|s| s.filter(|seg| !seg.is_empty()).collect())
            .unwrap_or_default();

        segments
            .windows(2)
            .find(|pair| POST_PATH_SEGMENTS.contains(&pair[0]))
            .map(|pair| pair[1].to_string())
            .ok_or_else(|| PipelineError::validation("URL does not reference a post"))
    }

    fn validate_shortcode(code: &str) -> Result<()> {
        if code.is_empty() || code.len() > MAX_SHORTCODE_LEN {
            return Err(PipelineError::validation(format!(
                "shortcode must be 1..={MAX_SHORTCODE_LEN} characters"
            )));
        }
        if !code
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(PipelineError::validation(format!(
                "shortcode contains invalid characters: {code}"
            )));
        }
        Ok(())
    }

    /// The normalised key, e.g. `post:ABC123`.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The post shortcode without the `post:` prefix.
    pub fn shortcode(&self) -> &str {
        &self.0[KEY_PREFIX.len()..]
    }
}

impl std::fmt::Display for ContentKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ContentKey {
    type Error = PipelineError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<ContentKey> for String {
    fn from(key: ContentKey) -> Self {
        key.0
    }
}

/// Post content returned by the extraction collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedContent {
    pub content_key: ContentKey,

    /// Post type as reported by the platform ("photo", "video", "carousel")
    pub post_type: String,

    #[serde(default)]
    pub caption: String,

    #[serde(default)]
    pub image_urls: Vec<String>,

    #[serde(default)]
    pub video_urls: Vec<String>,

    /// Publisher handle
    pub author: Option<String>,

    pub fetched_at: DateTime<Utc>,

    /// Collaborator-specific metadata
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl ExtractedContent {
    pub fn new(content_key: ContentKey, post_type: impl Into<String>) -> Self {
        Self {
            content_key,
            post_type: post_type.into(),
            caption: String::new(),
            image_urls: Vec::new(),
            video_urls: Vec::new(),
            author: None,
            fetched_at: Utc::now(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_caption(mut self, caption: impl Into<String>) -> Self {
        self.caption = caption.into();
        self
    }

    pub fn with_images(mut self, urls: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.image_urls = urls.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_videos(mut self, urls: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.video_urls = urls.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }

    pub fn media_count(&self) -> usize {
        self.image_urls.len() + self.video_urls.len()
    }

    pub fn has_media(&self) -> bool {
        self.media_count() > 0
    }
}
