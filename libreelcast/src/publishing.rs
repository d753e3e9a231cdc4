//! Container publishing protocol
//!
//! Drives a [`Publisher`] through the steps each content type needs:
//!
//! - image: container, poll until ready, publish, permalink
//! - reel: video container, poll with the longer video budget, publish, permalink
//! - carousel: one container per slide (each polled), parent container
//!   referencing the slides, poll, publish, permalink
//!
//! Polling is bounded. Running out of attempts is a `Timeout`, which the
//! worker retries.

use serde_json::{Map, Value};
use std::time::Duration;

use crate::clock::Clock;
use crate::config::PublisherConfig;
use crate::error::PlatformError;
use crate::media::PreparedMedia;
use crate::platforms::{ContainerRequest, ContainerStatus, PlatformResult, Publisher};
use crate::types::{ContentType, PublishResult, CAROUSEL_MAX_ITEMS, CAROUSEL_MIN_ITEMS};

/// Everything needed to publish one post
pub struct PublishRequest<'a> {
    pub content_type: ContentType,
    pub media: &'a [PreparedMedia],
    pub caption: &'a str,
    pub options: &'a Map<String, Value>,
}

/// Runs the publishing protocol against one publisher
pub struct PublishingFlow<'a> {
    publisher: &'a dyn Publisher,
    clock: &'a dyn Clock,
    config: &'a PublisherConfig,
}

impl<'a> PublishingFlow<'a> {
    pub fn new(
        publisher: &'a dyn Publisher,
        clock: &'a dyn Clock,
        config: &'a PublisherConfig,
    ) -> Self {
        Self {
            publisher,
            clock,
            config,
        }
    }

    /// Publish `request` and describe the resulting post
    ///
    /// A permalink lookup failure after a successful publish is logged and
    /// leaves `permalink` empty; the post exists and must not be published
    /// a second time.
    pub async fn run(&self, request: &PublishRequest<'_>) -> PlatformResult<PublishResult> {
        let container_id = match request.content_type {
            ContentType::Image => self.single(request, false).await?,
            ContentType::Reel => self.single(request, true).await?,
            ContentType::Carousel => self.carousel(request).await?,
        };

        let media_id = self.publisher.publish(&container_id).await?;
        tracing::info!(
            publisher = self.publisher.name(),
            media_id = %media_id,
            content_type = %request.content_type,
            "Media published"
        );

        let permalink = match self.publisher.get_permalink(&media_id).await {
            Ok(permalink) => Some(permalink),
            Err(e) => {
                tracing::warn!(media_id = %media_id, error = %e, "Published but permalink lookup failed");
                None
            }
        };

        Ok(PublishResult {
            id: media_id,
            permalink,
            media_type: request.content_type.media_type().to_string(),
        })
    }

    async fn single(&self, request: &PublishRequest<'_>, video: bool) -> PlatformResult<String> {
        let media = match request.media {
            [only] => only,
            other => {
                return Err(PlatformError::Validation(format!(
                    "{} posts take exactly one media item (got {})",
                    request.content_type,
                    other.len()
                )))
            }
        };

        let caption = Some(request.caption.to_string());
        let options = request.options.clone();
        let container = if video {
            ContainerRequest::Reel {
                video_url: media.url.clone(),
                caption,
                options,
            }
        } else {
            ContainerRequest::Image {
                image_url: media.url.clone(),
                caption,
                options,
            }
        };

        let container_id = self.publisher.create_container(&container).await?;
        self.wait_until_ready(&container_id, video).await?;
        Ok(container_id)
    }

    async fn carousel(&self, request: &PublishRequest<'_>) -> PlatformResult<String> {
        let count = request.media.len();
        if !(CAROUSEL_MIN_ITEMS..=CAROUSEL_MAX_ITEMS).contains(&count) {
            return Err(PlatformError::Validation(format!(
                "Carousel needs {} to {} media items (got {})",
                CAROUSEL_MIN_ITEMS, CAROUSEL_MAX_ITEMS, count
            )));
        }

        let mut children = Vec::with_capacity(count);
        for item in request.media {
            let child = self
                .publisher
                .create_container(&ContainerRequest::CarouselItem {
                    media_url: item.url.clone(),
                    is_video: item.is_video,
                })
                .await?;
            self.wait_until_ready(&child, item.is_video).await?;
            children.push(child);
        }

        let has_video = request.media.iter().any(|m| m.is_video);
        let parent = self
            .publisher
            .create_container(&ContainerRequest::Carousel {
                children,
                caption: Some(request.caption.to_string()),
                options: request.options.clone(),
            })
            .await?;
        self.wait_until_ready(&parent, has_video).await?;
        Ok(parent)
    }

    /// Poll a container until it is ready, fails, or the budget runs out
    async fn wait_until_ready(&self, container_id: &str, video: bool) -> PlatformResult<()> {
        let attempts = if video {
            self.config.video_poll_attempts
        } else {
            self.config.image_poll_attempts
        };
        let interval = Duration::from_secs(self.config.poll_interval);

        for attempt in 1..=attempts {
            match self.publisher.poll_status(container_id).await? {
                status if status.is_ready() => return Ok(()),
                ContainerStatus::Error(detail) => {
                    return Err(PlatformError::Validation(format!(
                        "Container {} failed processing: {}",
                        container_id,
                        detail.unwrap_or_else(|| "no details".to_string())
                    )))
                }
                ContainerStatus::Expired => {
                    return Err(PlatformError::Server(format!(
                        "Container {} expired before publishing",
                        container_id
                    )))
                }
                _ => {
                    tracing::debug!(container_id = %container_id, attempt, attempts, "Container not ready");
                    if attempt < attempts {
                        self.clock.sleep(interval).await;
                    }
                }
            }
        }

        Err(PlatformError::Timeout(format!(
            "Container {} not ready after {} status checks",
            container_id, attempts
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::platforms::mock::MockPublisher;

    fn image(url: &str) -> PreparedMedia {
        PreparedMedia {
            url: url.to_string(),
            is_video: false,
        }
    }

    fn config() -> PublisherConfig {
        PublisherConfig {
            poll_interval: 5,
            image_poll_attempts: 3,
            video_poll_attempts: 6,
        }
    }

    async fn run(
        publisher: &MockPublisher,
        clock: &ManualClock,
        content_type: ContentType,
        media: &[PreparedMedia],
    ) -> PlatformResult<PublishResult> {
        let config = config();
        let options = Map::new();
        PublishingFlow::new(publisher, clock, &config)
            .run(&PublishRequest {
                content_type,
                media,
                caption: "Caption",
                options: &options,
            })
            .await
    }

    #[tokio::test]
    async fn test_image_protocol() {
        let publisher = MockPublisher::default();
        let clock = ManualClock::new(0);

        let result = run(&publisher, &clock, ContentType::Image, &[image("https://c/a.jpg")])
            .await
            .unwrap();

        assert_eq!(
            result,
            PublishResult {
                id: "123".to_string(),
                permalink: Some("https://x/123".to_string()),
                media_type: "IMAGE".to_string(),
            }
        );
        assert_eq!(publisher.create_calls(), 1);
        assert_eq!(publisher.poll_calls(), 1);
        assert_eq!(publisher.publish_calls(), 1);
        assert_eq!(publisher.permalink_calls(), 1);
    }

    #[tokio::test]
    async fn test_reel_protocol_uses_video_container() {
        let publisher = MockPublisher::default();
        let clock = ManualClock::new(0);
        let video = PreparedMedia {
            url: "https://c/a.mp4".to_string(),
            is_video: true,
        };

        let result = run(&publisher, &clock, ContentType::Reel, &[video]).await.unwrap();
        assert_eq!(result.media_type, "REELS");
        assert!(matches!(
            publisher.containers().as_slice(),
            [ContainerRequest::Reel { video_url, .. }] if video_url == "https://c/a.mp4"
        ));
    }

    #[tokio::test]
    async fn test_carousel_protocol_creates_children_then_parent() {
        let publisher = MockPublisher::default();
        let clock = ManualClock::new(0);
        let media = [image("https://c/1.jpg"), image("https://c/2.jpg"), image("https://c/3.jpg")];

        let result = run(&publisher, &clock, ContentType::Carousel, &media).await.unwrap();
        assert_eq!(result.media_type, "CAROUSEL_ALBUM");

        let containers = publisher.containers();
        assert_eq!(containers.len(), 4);
        assert!(containers[..3]
            .iter()
            .all(|c| matches!(c, ContainerRequest::CarouselItem { .. })));
        match &containers[3] {
            ContainerRequest::Carousel { children, caption, .. } => {
                assert_eq!(children, &vec!["container-1", "container-2", "container-3"]);
                assert_eq!(caption.as_deref(), Some("Caption"));
            }
            other => panic!("Expected parent carousel container, got {:?}", other),
        }
        assert_eq!(publisher.poll_calls(), 4);
        assert_eq!(publisher.publish_calls(), 1);
    }

    #[tokio::test]
    async fn test_polls_until_finished_using_clock() {
        let publisher = MockPublisher::default();
        publisher
            .script_poll(Ok(ContainerStatus::InProgress))
            .script_poll(Ok(ContainerStatus::InProgress));
        let clock = ManualClock::new(0);

        run(&publisher, &clock, ContentType::Image, &[image("https://c/a.jpg")])
            .await
            .unwrap();
        assert_eq!(publisher.poll_calls(), 3);
        assert_eq!(clock.now(), 10);
    }

    #[tokio::test]
    async fn test_poll_budget_exhaustion_is_timeout() {
        let publisher = MockPublisher::default();
        for _ in 0..3 {
            publisher.script_poll(Ok(ContainerStatus::InProgress));
        }
        let clock = ManualClock::new(0);

        let err = run(&publisher, &clock, ContentType::Image, &[image("https://c/a.jpg")])
            .await
            .unwrap_err();
        assert!(matches!(err, PlatformError::Timeout(_)));
        assert!(err.is_transient());
        assert_eq!(publisher.publish_calls(), 0);
    }

    #[tokio::test]
    async fn test_container_error_is_permanent() {
        let publisher = MockPublisher::default();
        publisher.script_poll(Ok(ContainerStatus::Error(Some("Unsupported aspect ratio".to_string()))));
        let clock = ManualClock::new(0);

        let err = run(&publisher, &clock, ContentType::Image, &[image("https://c/a.jpg")])
            .await
            .unwrap_err();
        assert!(matches!(err, PlatformError::Validation(_)));
        assert!(err.to_string().contains("Unsupported aspect ratio"));
    }

    #[tokio::test]
    async fn test_permalink_failure_still_succeeds() {
        let publisher = MockPublisher::default();
        publisher.fail_permalink_with(PlatformError::Network("reset".to_string()));
        let clock = ManualClock::new(0);

        let result = run(&publisher, &clock, ContentType::Image, &[image("https://c/a.jpg")])
            .await
            .unwrap();
        assert_eq!(result.id, "123");
        assert!(result.permalink.is_none());
    }

    #[tokio::test]
    async fn test_carousel_bounds_checked_before_any_call() {
        let publisher = MockPublisher::default();
        let clock = ManualClock::new(0);

        let err = run(&publisher, &clock, ContentType::Carousel, &[image("https://c/1.jpg")])
            .await
            .unwrap_err();
        assert!(matches!(err, PlatformError::Validation(_)));
        assert_eq!(publisher.total_calls(), 0);
    }
}
