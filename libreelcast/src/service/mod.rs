//! Service layer for Reelcast
//!
//! This module provides the caller-facing API of the queue, consumed by the
//! `reel-queue` CLI, the `reel-send` daemon and tests alike.
//!
//! # Architecture
//!
//! `ReelcastService` is a facade owning the shared resources:
//!
//! - `JobStore`: durable job records and history
//! - `JobQueue`: pending work, FIFO with delayed entries
//! - `RateLimiter`: publish budget shared by every worker
//! - `EventBus`: job lifecycle event distribution
//!
//! Workers are built from the same resources with [`ReelcastService::worker_pool`].
//!
//! # Example
//!
//! ```no_run
//! use libreelcast::service::{EnqueueOptions, ReelcastService};
//! use libreelcast::types::{ContentType, JobPayload, MediaRef};
//!
//! # async fn example() -> libreelcast::Result<()> {
//! let service = ReelcastService::new().await?;
//!
//! let payload = JobPayload::new(
//!     vec![MediaRef::new("https://cdn.example.com/sunset.jpg")],
//!     Some("Golden hour".to_string()),
//! );
//! let job_id = service
//!     .enqueue(ContentType::Image, payload, EnqueueOptions::default())
//!     .await?;
//!
//! let job = service.get_status(&job_id).await?;
//! println!("{} is {}", job.id, job.status);
//! # Ok(())
//! # }
//! ```

pub mod events;

use std::sync::Arc;
use std::time::Duration;

use self::events::{Event, EventBus, EventReceiver};
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::db::Database;
use crate::error::{FailureKind, PlatformError, ReelcastError, Result};
use crate::media::{CaptionGenerator, FixedCaptionGenerator, MediaProcessor, UrlMediaProcessor};
use crate::platforms::Publisher;
use crate::queue::JobQueue;
use crate::rate_limiter::RateLimiter;
use crate::store::{JobStore, JobUpdate};
use crate::types::{ContentType, Job, JobError, JobEvent, JobPayload, JobStatus, QueueStats};
use crate::worker::{WorkerContext, WorkerPool};

/// Per-enqueue settings
#[derive(Debug, Clone, Default)]
pub struct EnqueueOptions {
    /// Earliest time (unix seconds) the job may be attempted
    pub not_before: Option<i64>,
}

/// Main service facade
pub struct ReelcastService {
    config: Arc<Config>,
    store: JobStore,
    queue: JobQueue,
    limiter: Arc<RateLimiter>,
    clock: Arc<dyn Clock>,
    event_bus: EventBus,
}

impl ReelcastService {
    /// Create a service from the configuration file at the default location
    pub async fn new() -> Result<Self> {
        let config = Config::load()?;
        Self::from_config(config).await
    }

    /// Create a service with a custom configuration and the wall clock
    pub async fn from_config(config: Config) -> Result<Self> {
        Self::with_clock(config, Arc::new(SystemClock)).await
    }

    /// Create a service with a custom configuration and clock
    pub async fn with_clock(config: Config, clock: Arc<dyn Clock>) -> Result<Self> {
        let db = Database::new(&config.database.path).await?;
        let limiter = Arc::new(RateLimiter::new(
            config.rate_limit.clone(),
            Arc::clone(&clock),
        ));

        Ok(Self {
            store: JobStore::new(db.clone(), Arc::clone(&clock)),
            queue: JobQueue::new(db),
            limiter,
            clock,
            event_bus: EventBus::new(100),
            config: Arc::new(config),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &JobStore {
        &self.store
    }

    pub fn queue(&self) -> &JobQueue {
        &self.queue
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// Record a job and queue it for publishing
    ///
    /// Jobs that can never be published (wrong media count for the content
    /// type, caption containing a blocked term) are still recorded, then
    /// immediately FAILED with a validation error; their id is returned like
    /// any other.
    pub async fn enqueue(
        &self,
        content_type: ContentType,
        payload: JobPayload,
        options: EnqueueOptions,
    ) -> Result<String> {
        let now = self.clock.now();
        let job = Job::new(content_type, payload, now);

        let id = self.store.create(&job).await?;
        self.event_bus.emit(Event::JobEnqueued {
            job_id: id.clone(),
            content_type,
        });

        if let Err(rejection) = self.check_enqueue_policy(&job) {
            tracing::warn!(job_id = %id, reason = %rejection, "Job rejected at enqueue");
            let failed = self
                .store
                .update(&id, JobUpdate::status(JobStatus::Failed).with_error(JobError::from(&rejection)))
                .await?;
            if let Some(error) = failed.error {
                self.event_bus.emit(Event::JobFailed { job_id: id.clone(), error });
            }
            return Ok(id);
        }

        let available_at = options.not_before.map_or(now, |at| at.max(now));
        self.queue.push(&id, available_at, now).await?;

        tracing::info!(
            job_id = %id,
            content_type = %content_type,
            media = job.payload.media.len(),
            available_at,
            "Job enqueued"
        );
        Ok(id)
    }

    fn check_enqueue_policy(&self, job: &Job) -> std::result::Result<(), PlatformError> {
        job.content_type
            .validate_media_count(job.payload.media.len())?;

        if let Some(caption) = &job.payload.caption {
            let lowered = caption.to_lowercase();
            let blocked = self
                .config
                .queue
                .blocked_terms
                .iter()
                .find(|term| !term.trim().is_empty() && lowered.contains(&term.to_lowercase()));
            if let Some(term) = blocked {
                return Err(PlatformError::Validation(format!(
                    "Caption contains blocked term '{}'",
                    term
                )));
            }
        }
        Ok(())
    }

    /// Current record of a job
    pub async fn get_status(&self, job_id: &str) -> Result<Job> {
        self.store.get(job_id).await
    }

    pub async fn get_stats(&self) -> Result<QueueStats> {
        self.store.stats().await
    }

    /// Most recent jobs first
    pub async fn get_history(&self, limit: u32) -> Result<Vec<Job>> {
        self.store.list_recent(limit).await
    }

    /// Status transitions of a job, oldest first
    pub async fn get_events(&self, job_id: &str) -> Result<Vec<JobEvent>> {
        self.store.events(job_id).await
    }

    /// Stop further attempts of a job
    ///
    /// A job still waiting in the queue is failed right away. A job being
    /// worked on finishes its current attempt; if that attempt would be
    /// retried, the retry fails it instead.
    pub async fn cancel(&self, job_id: &str) -> Result<Job> {
        let job = self.store.get(job_id).await?;
        if job.status.is_terminal() {
            return Err(ReelcastError::InvalidInput(format!(
                "Job {} already finished ({})",
                job_id, job.status
            )));
        }

        let job = self.store.mark_no_retry(job_id).await?;
        if !self.queue.remove(job_id).await? {
            tracing::info!(job_id = %job_id, "Job in flight; cancellation applies to its retries");
            return Ok(job);
        }

        let error = JobError::new(FailureKind::Cancelled, "Cancelled by operator");
        let job = self
            .store
            .update(job_id, JobUpdate::status(JobStatus::Failed).with_error(error.clone()))
            .await?;
        self.event_bus.emit(Event::JobFailed {
            job_id: job_id.to_string(),
            error,
        });
        tracing::info!(job_id = %job_id, "Job cancelled");
        Ok(job)
    }

    /// Delete finished jobs last updated more than `older_than` ago
    pub async fn prune(&self, older_than: Duration) -> Result<u64> {
        let cutoff = i64::try_from(older_than.as_secs())
            .ok()
            .and_then(|secs| self.clock.now().checked_sub(secs))
            .ok_or_else(|| {
                ReelcastError::InvalidInput(format!(
                    "Prune age out of range: {}s",
                    older_than.as_secs()
                ))
            })?;
        self.store.prune_before(cutoff).await
    }

    /// Re-queue jobs that lost their queue entry, typically because the
    /// daemon stopped mid-attempt
    ///
    /// Interrupted PROCESSING jobs go back to PENDING. Call this before
    /// starting workers.
    pub async fn recover(&self) -> Result<usize> {
        let now = self.clock.now();
        let orphans = self.store.list_unqueued().await?;

        for job in &orphans {
            if job.status == JobStatus::Processing {
                self.store
                    .update(
                        &job.id,
                        JobUpdate::status(JobStatus::Pending)
                            .with_message("Attempt interrupted; re-queued on startup"),
                    )
                    .await?;
            }
            self.queue.push(&job.id, now, now).await?;
            tracing::info!(job_id = %job.id, status = %job.status, "Recovered job");
        }

        Ok(orphans.len())
    }

    /// Subscribe to job lifecycle events
    pub fn subscribe(&self) -> EventReceiver {
        self.event_bus.subscribe()
    }

    /// Shared worker state using the default media processor and caption
    /// generator from configuration
    pub fn worker_context(&self, publisher: Arc<dyn Publisher>) -> Arc<WorkerContext> {
        self.worker_context_with(
            publisher,
            Arc::new(UrlMediaProcessor::new(self.config.media.clone())),
            Arc::new(FixedCaptionGenerator::new(
                self.config.queue.default_caption.clone(),
            )),
        )
    }

    /// Shared worker state with custom collaborators
    pub fn worker_context_with(
        &self,
        publisher: Arc<dyn Publisher>,
        media: Arc<dyn MediaProcessor>,
        captions: Arc<dyn CaptionGenerator>,
    ) -> Arc<WorkerContext> {
        Arc::new(WorkerContext {
            store: self.store.clone(),
            queue: self.queue.clone(),
            limiter: Arc::clone(&self.limiter),
            publisher,
            media,
            captions,
            clock: Arc::clone(&self.clock),
            events: self.event_bus.clone(),
            queue_config: self.config.queue.clone(),
            publisher_config: self.config.publisher.clone(),
        })
    }

    /// Pool of `config.queue.workers` workers publishing through `publisher`
    pub fn worker_pool(&self, publisher: Arc<dyn Publisher>) -> WorkerPool {
        WorkerPool::new(self.worker_context(publisher), self.config.queue.workers)
    }
}
