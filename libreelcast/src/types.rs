//! Core types for Reelcast

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{FailureKind, PlatformError, ReelcastError};

/// Fewest items a carousel post accepts
pub const CAROUSEL_MIN_ITEMS: usize = 2;
/// Most items a carousel post accepts
pub const CAROUSEL_MAX_ITEMS: usize = 10;

/// A publish job tracked by the queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub content_type: ContentType,
    pub payload: JobPayload,
    pub status: JobStatus,
    pub created_at: i64,
    pub updated_at: i64,
    /// When the current or last attempt entered PROCESSING
    pub started_at: Option<i64>,
    /// When the job reached a terminal state
    pub completed_at: Option<i64>,
    pub result: Option<PublishResult>,
    pub error: Option<JobError>,
    pub retry_count: u32,
    /// Set by an operator; the worker fails the job instead of attempting it
    pub no_retry: bool,
}

impl Job {
    /// Create a new PENDING job with a time-ordered unique id
    pub fn new(content_type: ContentType, payload: JobPayload, now: i64) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            content_type,
            payload,
            status: JobStatus::Pending,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
            result: None,
            error: None,
            retry_count: 0,
            no_retry: false,
        }
    }
}

/// What a job asks to have published
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobPayload {
    pub media: Vec<MediaRef>,
    #[serde(default)]
    pub caption: Option<String>,
    /// Free-form publisher options (location id, cover offset, ...)
    #[serde(default)]
    pub options: serde_json::Map<String, serde_json::Value>,
}

impl JobPayload {
    pub fn new(media: Vec<MediaRef>, caption: Option<String>) -> Self {
        Self {
            media,
            caption,
            options: serde_json::Map::new(),
        }
    }

    pub fn with_option(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.options.insert(key.into(), value);
        self
    }
}

/// Reference to one media item: a local path or an http(s) URL
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaRef {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alt_text: Option<String>,
}

impl MediaRef {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            alt_text: None,
        }
    }

    pub fn is_remote(&self) -> bool {
        self.path.starts_with("http://") || self.path.starts_with("https://")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Image,
    Reel,
    Carousel,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Image => "image",
            ContentType::Reel => "reel",
            ContentType::Carousel => "carousel",
        }
    }

    /// Media type the platform reports for a published post of this kind
    pub fn media_type(&self) -> &'static str {
        match self {
            ContentType::Image => "IMAGE",
            ContentType::Reel => "REELS",
            ContentType::Carousel => "CAROUSEL_ALBUM",
        }
    }

    /// Check that the number of media items fits this content type
    pub fn validate_media_count(&self, count: usize) -> std::result::Result<(), PlatformError> {
        match self {
            ContentType::Image | ContentType::Reel if count != 1 => {
                Err(PlatformError::Validation(format!(
                    "{} posts take exactly one media item (got {})",
                    self.as_str(),
                    count
                )))
            }
            ContentType::Carousel if count < CAROUSEL_MIN_ITEMS => {
                Err(PlatformError::Validation(format!(
                    "Carousel needs at least {} media items (got {})",
                    CAROUSEL_MIN_ITEMS, count
                )))
            }
            ContentType::Carousel if count > CAROUSEL_MAX_ITEMS => {
                Err(PlatformError::Validation(format!(
                    "Carousel accepts at most {} media items (got {})",
                    CAROUSEL_MAX_ITEMS, count
                )))
            }
            _ => Ok(()),
        }
    }
}

impl FromStr for ContentType {
    type Err = ReelcastError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "image" => Ok(ContentType::Image),
            "reel" | "video" => Ok(ContentType::Reel),
            "carousel" => Ok(ContentType::Carousel),
            other => Err(ReelcastError::InvalidInput(format!(
                "Unknown content type '{}'. Valid options: image, reel, carousel",
                other
            ))),
        }
    }
}

impl std::fmt::Display for ContentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Job lifecycle state
///
/// ```text
/// PENDING ──> PROCESSING ──> SUCCESS
///    │  ▲          │    └──> FAILED
///    │  │          ▼
///    │  └──── RATE_LIMITED ──> FAILED
///    └──> RATE_LIMITED | FAILED
/// ```
///
/// PROCESSING may also return to PENDING when a transient failure is
/// re-queued. SUCCESS and FAILED are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Processing,
    Success,
    Failed,
    RateLimited,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Processing => "PROCESSING",
            JobStatus::Success => "SUCCESS",
            JobStatus::Failed => "FAILED",
            JobStatus::RateLimited => "RATE_LIMITED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Success | JobStatus::Failed)
    }

    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (*self, next),
            (Pending, Processing)
                | (Pending, RateLimited)
                | (Pending, Failed)
                | (Processing, Success)
                | (Processing, Failed)
                | (Processing, RateLimited)
                | (Processing, Pending)
                | (RateLimited, Pending)
                | (RateLimited, Failed)
        )
    }
}

impl FromStr for JobStatus {
    type Err = ReelcastError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "PENDING" => Ok(JobStatus::Pending),
            "PROCESSING" => Ok(JobStatus::Processing),
            "SUCCESS" => Ok(JobStatus::Success),
            "FAILED" => Ok(JobStatus::Failed),
            "RATE_LIMITED" => Ok(JobStatus::RateLimited),
            other => Err(ReelcastError::InvalidInput(format!(
                "Unknown job status '{}'",
                other
            ))),
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a successful publish
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishResult {
    /// Platform media id of the published post
    pub id: String,
    pub permalink: Option<String>,
    pub media_type: String,
}

/// Structured failure stored on a job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobError {
    pub kind: FailureKind,
    pub message: String,
}

impl JobError {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl From<&PlatformError> for JobError {
    fn from(error: &PlatformError) -> Self {
        let message = match error {
            PlatformError::Authentication(_) => format!(
                "{}. Rotate the access token (token_file) and re-enqueue the job.",
                error
            ),
            _ => error.to_string(),
        };
        Self::new(error.kind(), message)
    }
}

/// One entry in a job's append-only transition history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobEvent {
    pub id: i64,
    pub job_id: String,
    /// `None` for the creation event
    pub from_status: Option<JobStatus>,
    pub to_status: JobStatus,
    pub message: Option<String>,
    pub occurred_at: i64,
}

/// Aggregate counts over every job in the store
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueStats {
    pub total: u64,
    pub pending: u64,
    pub processing: u64,
    pub success: u64,
    pub failed: u64,
    pub rate_limited: u64,
    /// Entries waiting in the queue, including delayed retries
    pub queue_length: u64,
    /// Mean processing time over the last 10 finished jobs, in seconds
    pub average_processing_secs: Option<f64>,
}
