//! Configuration management for Reelcast

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ConfigError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub instagram: Option<InstagramConfig>,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub publisher: PublisherConfig,
    #[serde(default)]
    pub media: MediaConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
}

/// Graph API account used by the publisher
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstagramConfig {
    /// Instagram professional account id
    pub account_id: String,
    /// File holding the long-lived access token
    pub token_file: String,
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// HTTP request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Number of concurrent workers
    pub workers: usize,
    pub max_retries: u32,
    /// Base of the exponential retry delay, in seconds
    pub retry_base_delay: u64,
    /// Cap on the retry delay, in seconds
    pub retry_max_delay: u64,
    /// Rate-limit waits longer than this re-queue the job instead of sleeping
    pub severe_wait_threshold: u64,
    /// Idle poll interval of the daemon, in seconds
    pub poll_interval: u64,
    /// Caption used when the job has none and generation fails
    pub default_caption: String,
    /// Captions containing any of these (case-insensitive) are rejected
    pub blocked_terms: Vec<String>,
}

/// Local quota and backoff policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub max_per_window: u32,
    /// Window length in seconds
    pub window: u64,
    /// Minimum spacing between calls, in seconds
    pub min_interval: u64,
    /// Platform rate-limit hits within one window before the limiter
    /// blocks for the rest of the window
    pub escalation_threshold: u32,
    /// First backoff after a platform rate-limit hit, in seconds
    pub hit_backoff_base: u64,
    pub backoff_multiplier: f64,
    /// Cap on the hit backoff, in seconds
    pub max_backoff: u64,
}

/// Container status polling
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PublisherConfig {
    /// Seconds between container status checks
    pub poll_interval: u64,
    pub image_poll_attempts: u32,
    pub video_poll_attempts: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    /// Public URL prefix under which local media files are served
    pub public_base_url: Option<String>,
    pub max_image_bytes: u64,
    pub max_video_bytes: u64,
}

fn default_api_version() -> String {
    "v19.0".to_string()
}

fn default_base_url() -> String {
    "https://graph.facebook.com".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            workers: 1,
            max_retries: 3,
            retry_base_delay: 30,
            retry_max_delay: 3600,
            severe_wait_threshold: 60,
            poll_interval: 5,
            default_caption: "📸 New post".to_string(),
            blocked_terms: Vec::new(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_per_window: 200,
            window: 3600,
            min_interval: 1,
            escalation_threshold: 3,
            hit_backoff_base: 2,
            backoff_multiplier: 2.0,
            max_backoff: 3600,
        }
    }
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            poll_interval: 5,
            image_poll_attempts: 12,
            video_poll_attempts: 60,
        }
    }
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            public_base_url: None,
            max_image_bytes: 8 * 1024 * 1024,
            max_video_bytes: 100 * 1024 * 1024,
        }
    }
}

impl QueueConfig {
    pub fn retry_delay(&self, retry_count: u32) -> Duration {
        let factor = 2u64.saturating_pow(retry_count);
        Duration::from_secs(
            self.retry_base_delay
                .saturating_mul(factor)
                .min(self.retry_max_delay),
        )
    }
}

impl Config {
    /// Load configuration from the default location
    pub fn load() -> Result<Self> {
        let config_path = resolve_config_path()?;
        Self::load_from_path(&config_path)
    }

    /// Load configuration from a specific path
    ///
    /// `REELCAST_DB_PATH` overrides `database.path`.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadError)?;
        let mut config: Config = toml::from_str(&content).map_err(ConfigError::ParseError)?;

        if let Ok(db_path) = std::env::var("REELCAST_DB_PATH") {
            config.database.path = db_path;
        }

        config.validate()?;
        Ok(config)
    }

    /// Create a default configuration
    pub fn default_config() -> Self {
        Self {
            database: DatabaseConfig {
                path: "~/.local/share/reelcast/jobs.db".to_string(),
            },
            instagram: None,
            queue: QueueConfig::default(),
            rate_limit: RateLimitConfig::default(),
            publisher: PublisherConfig::default(),
            media: MediaConfig::default(),
        }
    }

    /// Reject settings the queue cannot run with
    pub fn validate(&self) -> Result<()> {
        let invalid = |field: &str, reason: &str| -> Result<()> {
            Err(ConfigError::InvalidValue {
                field: field.to_string(),
                reason: reason.to_string(),
            }
            .into())
        };

        if self.queue.workers == 0 {
            return invalid("queue.workers", "must be at least 1");
        }
        if self.rate_limit.max_per_window == 0 {
            return invalid("rate_limit.max_per_window", "must be at least 1");
        }
        if self.rate_limit.window == 0 {
            return invalid("rate_limit.window", "must be at least 1 second");
        }
        if self.rate_limit.escalation_threshold == 0 {
            return invalid("rate_limit.escalation_threshold", "must be at least 1");
        }
        if self.rate_limit.backoff_multiplier < 1.0 {
            return invalid("rate_limit.backoff_multiplier", "must be >= 1.0");
        }
        if self.publisher.image_poll_attempts == 0 || self.publisher.video_poll_attempts == 0 {
            return invalid("publisher", "poll attempts must be at least 1");
        }
        Ok(())
    }
}

/// Resolve the configuration file path under the XDG config directory
pub fn resolve_config_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("REELCAST_CONFIG") {
        return Ok(PathBuf::from(shellexpand::tilde(&path).to_string()));
    }

    let config_dir = dirs::config_dir()
        .ok_or_else(|| ConfigError::MissingField("config directory".to_string()))?;

    Ok(config_dir.join("reelcast").join("config.toml"))
}
