//! Publisher abstraction and implementations
//!
//! A [`Publisher`] exposes the four primitives of the container-based
//! publishing protocol. Orchestrating them for a given content type lives in
//! [`crate::publishing`], so implementations stay thin wrappers over the
//! remote API.
//!
//! # Examples
//!
//! ```no_run
//! use libreelcast::platforms::{ContainerRequest, ContainerStatus, Publisher};
//! use libreelcast::platforms::instagram::GraphPublisher;
//! use libreelcast::config::InstagramConfig;
//!
//! # async fn example(config: InstagramConfig) -> libreelcast::Result<()> {
//! let publisher = GraphPublisher::new(&config)?;
//!
//! let request = ContainerRequest::Image {
//!     image_url: "https://cdn.example.com/sunset.jpg".to_string(),
//!     caption: Some("Golden hour".to_string()),
//!     options: Default::default(),
//! };
//! let container = publisher.create_container(&request).await?;
//!
//! if publisher.poll_status(&container).await? == ContainerStatus::Finished {
//!     let media_id = publisher.publish(&container).await?;
//!     println!("Published {}", publisher.get_permalink(&media_id).await?);
//! }
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::PlatformError;

pub mod instagram;

// Mock publisher is available for all builds (not just tests) to support integration tests
pub mod mock;

/// Result of a single publisher call
pub type PlatformResult<T> = std::result::Result<T, PlatformError>;

/// Media container to create on the platform
#[derive(Debug, Clone, PartialEq)]
pub enum ContainerRequest {
    Image {
        image_url: String,
        caption: Option<String>,
        options: Map<String, Value>,
    },
    Reel {
        video_url: String,
        caption: Option<String>,
        options: Map<String, Value>,
    },
    /// One slide of a carousel; published only through its parent
    CarouselItem { media_url: String, is_video: bool },
    Carousel {
        children: Vec<String>,
        caption: Option<String>,
        options: Map<String, Value>,
    },
}

impl ContainerRequest {
    pub fn is_video(&self) -> bool {
        match self {
            ContainerRequest::Reel { .. } => true,
            ContainerRequest::CarouselItem { is_video, .. } => *is_video,
            _ => false,
        }
    }
}

/// Processing state of a media container
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerStatus {
    /// Ready to publish
    Finished,
    InProgress,
    /// Already published
    Published,
    /// Processing failed; carries the platform's explanation if any
    Error(Option<String>),
    /// Not published within the platform's retention period
    Expired,
}

impl ContainerStatus {
    /// Map a Graph API `status_code` value
    ///
    /// Unrecognized codes count as still in progress; the caller's polling
    /// budget bounds how long that can last.
    pub fn from_code(code: &str, detail: Option<String>) -> Self {
        match code {
            "FINISHED" => ContainerStatus::Finished,
            "PUBLISHED" => ContainerStatus::Published,
            "ERROR" => ContainerStatus::Error(detail),
            "EXPIRED" => ContainerStatus::Expired,
            other => {
                if other != "IN_PROGRESS" {
                    tracing::debug!(code = %other, "Unrecognized container status code");
                }
                ContainerStatus::InProgress
            }
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, ContainerStatus::Finished | ContainerStatus::Published)
    }
}

/// Remote publishing primitives
///
/// Every method classifies its failures into a [`PlatformError`]; the worker
/// loop decides retries from that classification alone.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Lowercase identifier used in logs (e.g. "instagram")
    fn name(&self) -> &str;

    /// Create a media container and return its id
    async fn create_container(&self, request: &ContainerRequest) -> PlatformResult<String>;

    /// Current processing state of a container
    async fn poll_status(&self, container_id: &str) -> PlatformResult<ContainerStatus>;

    /// Publish a finished container and return the new media id
    async fn publish(&self, container_id: &str) -> PlatformResult<String>;

    /// Public URL of a published media object
    async fn get_permalink(&self, media_id: &str) -> PlatformResult<String>;
}
