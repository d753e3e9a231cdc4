//! Media and caption collaborators
//!
//! The queue never touches pixels or language models itself. It hands each
//! media reference to a [`MediaProcessor`] to obtain a publicly reachable URL
//! and asks a [`CaptionGenerator`] for text when a job has no caption.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::path::Path;

use crate::config::MediaConfig;
use crate::error::{PlatformError, ReelcastError, Result};
use crate::platforms::PlatformResult;
use crate::types::{ContentType, MediaRef};

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov"];

/// Media ready to hand to the publisher
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedMedia {
    /// URL the platform downloads the media from
    pub url: String,
    pub is_video: bool,
}

#[async_trait]
pub trait MediaProcessor: Send + Sync {
    /// Turn a media reference into something the platform can fetch
    ///
    /// Validation failures are permanent.
    async fn prepare(
        &self,
        media: &MediaRef,
        content_type: ContentType,
        options: &Map<String, Value>,
    ) -> PlatformResult<PreparedMedia>;
}

#[async_trait]
pub trait CaptionGenerator: Send + Sync {
    /// Produce a caption for the given media
    ///
    /// Failures are not fatal to the job; the caller falls back to the
    /// configured default caption.
    async fn generate(&self, media: &[MediaRef], style: &Map<String, Value>) -> Result<String>;
}

/// Default media processor
///
/// Remote URLs pass through. Local files must exist, respect the size limits
/// and are mapped under `public_base_url`, which is expected to serve the
/// media directory.
pub struct UrlMediaProcessor {
    config: MediaConfig,
}

impl UrlMediaProcessor {
    pub fn new(config: MediaConfig) -> Self {
        Self { config }
    }

    fn allowed_extensions(content_type: ContentType) -> &'static [&'static str] {
        match content_type {
            ContentType::Image | ContentType::Carousel => IMAGE_EXTENSIONS,
            ContentType::Reel => VIDEO_EXTENSIONS,
        }
    }

    fn check_extension(name: &str, content_type: ContentType) -> PlatformResult<()> {
        let allowed = Self::allowed_extensions(content_type);
        let extension = Path::new(name)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase());

        match extension {
            Some(ext) if allowed.contains(&ext.as_str()) => Ok(()),
            Some(ext) => Err(PlatformError::Validation(format!(
                "Unsupported file type '.{}' for {} (expected one of: {})",
                ext,
                content_type,
                allowed.join(", ")
            ))),
            None => Err(PlatformError::Validation(format!(
                "Cannot determine file type of '{}'",
                name
            ))),
        }
    }
}

#[async_trait]
impl MediaProcessor for UrlMediaProcessor {
    async fn prepare(
        &self,
        media: &MediaRef,
        content_type: ContentType,
        _options: &Map<String, Value>,
    ) -> PlatformResult<PreparedMedia> {
        let is_video = content_type == ContentType::Reel;

        if media.is_remote() {
            // Only the path component says anything about the file type, and
            // CDN URLs often carry none at all
            let without_query = media.path.split(['?', '#']).next().unwrap_or_default();
            let last_segment = without_query.rsplit('/').next().unwrap_or_default();
            if last_segment.contains('.') {
                Self::check_extension(last_segment, content_type)?;
            }
            return Ok(PreparedMedia {
                url: media.path.clone(),
                is_video,
            });
        }

        let expanded = shellexpand::tilde(&media.path).to_string();
        let path = Path::new(&expanded);
        Self::check_extension(&expanded, content_type)?;

        let metadata = tokio::fs::metadata(path).await.map_err(|e| {
            PlatformError::Validation(format!("Cannot read media file {}: {}", expanded, e))
        })?;
        if !metadata.is_file() {
            return Err(PlatformError::Validation(format!("{} is not a file", expanded)));
        }

        let limit = if is_video {
            self.config.max_video_bytes
        } else {
            self.config.max_image_bytes
        };
        if metadata.len() > limit {
            return Err(PlatformError::Validation(format!(
                "{} is {} bytes, over the {} byte limit",
                expanded,
                metadata.len(),
                limit
            )));
        }

        let base = self.config.public_base_url.as_deref().ok_or_else(|| {
            PlatformError::Validation(format!(
                "Local file {} needs media.public_base_url to be configured",
                expanded
            ))
        })?;
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| PlatformError::Validation(format!("Invalid file name: {}", expanded)))?;

        Ok(PreparedMedia {
            url: format!("{}/{}", base.trim_end_matches('/'), file_name),
            is_video,
        })
    }
}

/// Caption generator that always returns the same text
pub struct FixedCaptionGenerator {
    caption: String,
}

impl FixedCaptionGenerator {
    pub fn new(caption: impl Into<String>) -> Self {
        Self {
            caption: caption.into(),
        }
    }
}

#[async_trait]
impl CaptionGenerator for FixedCaptionGenerator {
    async fn generate(&self, _media: &[MediaRef], _style: &Map<String, Value>) -> Result<String> {
        let caption = self.caption.trim();
        if caption.is_empty() {
            return Err(ReelcastError::InvalidInput(
                "No caption configured".to_string(),
            ));
        }
        Ok(caption.to_string())
    }
}
