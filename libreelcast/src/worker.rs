//! Worker loop
//!
//! A [`Worker`] claims the oldest available queue entry, gates it through
//! the rate limiter, drives the publishing protocol and records the outcome.
//! Every failure becomes a job transition: transient ones are re-queued with
//! exponential backoff until the retry budget runs out, permanent ones fail
//! the job immediately.
//!
//! Workers share one [`WorkerContext`]; a [`WorkerPool`] runs several of them
//! over the same queue.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn, Instrument};

use crate::clock::Clock;
use crate::config::{PublisherConfig, QueueConfig};
use crate::error::{FailureKind, PlatformError, ReelcastError, Result};
use crate::media::{CaptionGenerator, MediaProcessor};
use crate::platforms::{PlatformResult, Publisher};
use crate::publishing::{PublishRequest, PublishingFlow};
use crate::queue::JobQueue;
use crate::rate_limiter::RateLimiter;
use crate::service::events::{Event, EventBus};
use crate::store::{JobStore, JobUpdate};
use crate::types::{Job, JobError, JobStatus, MediaRef, PublishResult};

/// State shared by all workers
pub struct WorkerContext {
    pub store: JobStore,
    pub queue: JobQueue,
    pub limiter: Arc<RateLimiter>,
    pub publisher: Arc<dyn Publisher>,
    pub media: Arc<dyn MediaProcessor>,
    pub captions: Arc<dyn CaptionGenerator>,
    pub clock: Arc<dyn Clock>,
    pub events: EventBus,
    pub queue_config: QueueConfig,
    pub publisher_config: PublisherConfig,
}

#[derive(Clone)]
pub struct Worker {
    id: usize,
    ctx: Arc<WorkerContext>,
}

impl Worker {
    pub fn new(id: usize, ctx: Arc<WorkerContext>) -> Self {
        Self { id, ctx }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Claim and process one job
    ///
    /// Returns the job as left by this iteration, or `None` when no entry is
    /// available yet.
    pub async fn run_once(&self) -> Result<Option<Job>> {
        let now = self.ctx.clock.now();
        let Some(job_id) = self.ctx.queue.claim_next(now).await? else {
            return Ok(None);
        };

        let span = tracing::info_span!("job", worker = self.id, job_id = %job_id);
        match self.process(&job_id).instrument(span).await {
            Ok(job) => Ok(Some(job)),
            Err(e) => {
                self.restore_entry(&job_id, &e).await;
                Err(e)
            }
        }
    }

    /// Put a claimed entry back after a store error so the job is not
    /// stranded without a queue entry
    ///
    /// Best effort: a job that is gone or finished is skipped on its next
    /// claim anyway.
    async fn restore_entry(&self, job_id: &str, cause: &ReelcastError) {
        if matches!(cause, ReelcastError::NotFound(_)) {
            return;
        }
        let now = self.ctx.clock.now();
        let poll = Duration::from_secs(self.ctx.queue_config.poll_interval.max(1));
        let retry_at = now.saturating_add(delay_secs(poll));
        match self.ctx.queue.push(job_id, retry_at, now).await {
            Ok(()) => warn!(job_id = %job_id, error = %cause, retry_at, "Attempt aborted, entry restored"),
            Err(e) => error!(job_id = %job_id, error = %e, "Could not restore queue entry"),
        }
    }

    /// Process jobs until `shutdown` is set
    ///
    /// Store failures are logged and the loop carries on with the claimed
    /// entry restored. A job in flight when shutdown is requested is
    /// finished first.
    pub async fn run(&self, shutdown: Arc<AtomicBool>) {
        info!(worker = self.id, "Worker started");

        while !shutdown.load(Ordering::Relaxed) {
            match self.run_once().await {
                Ok(Some(_)) => {}
                Ok(None) => self.idle(&shutdown).await,
                Err(e) => {
                    error!(worker = self.id, error = %e, "Worker iteration failed");
                    self.idle(&shutdown).await;
                }
            }
        }

        info!(worker = self.id, "Worker stopped");
    }

    /// Sleep until the next delayed entry is due, at most `poll_interval`,
    /// checking for shutdown every second
    async fn idle(&self, shutdown: &AtomicBool) {
        let poll = self.ctx.queue_config.poll_interval.max(1);
        let wait = match self.ctx.queue.next_available_at().await {
            Ok(Some(at)) => (at - self.ctx.clock.now()).clamp(1, poll as i64) as u64,
            _ => poll,
        };

        for _ in 0..wait {
            if shutdown.load(Ordering::Relaxed) {
                return;
            }
            self.ctx.clock.sleep(Duration::from_secs(1)).await;
        }
    }

    async fn process(&self, job_id: &str) -> Result<Job> {
        let ctx = &self.ctx;
        let mut job = ctx.store.get(job_id).await?;

        match job.status {
            JobStatus::Pending => {}
            JobStatus::RateLimited => {
                job = self
                    .transition(
                        &job,
                        JobUpdate::status(JobStatus::Pending).with_message("Retrying after rate limit"),
                    )
                    .await?;
            }
            JobStatus::Processing | JobStatus::Success | JobStatus::Failed => {
                warn!(status = %job.status, "Skipping queue entry for job that is not waiting");
                return Ok(job);
            }
        }

        if job.no_retry {
            return self
                .fail(&job, JobError::new(FailureKind::Cancelled, "Cancelled by operator"))
                .await;
        }

        let media = self.preflight(&job).await;
        if let Err(e) = job.content_type.validate_media_count(media.len()) {
            return self.fail(&job, JobError::from(&e)).await;
        }

        while let Err(wait) = ctx.limiter.try_acquire() {
            if wait > ctx.queue_config.severe_wait_threshold {
                return self.defer_rate_limited(&job, wait).await;
            }
            debug!(wait_secs = wait, "Waiting for rate limiter");
            ctx.clock.sleep(Duration::from_secs(wait.max(1))).await;
        }

        job = self
            .transition(&job, JobUpdate::status(JobStatus::Processing))
            .await?;

        match self.attempt(&job, &media).await {
            Ok(result) => {
                self.transition(&job, JobUpdate::status(JobStatus::Success).with_result(result))
                    .await
            }
            Err(error) => self.handle_failure(&job, error).await,
        }
    }

    /// Drop local media that no longer exists; URLs are kept as is
    async fn preflight(&self, job: &Job) -> Vec<MediaRef> {
        let mut valid = Vec::with_capacity(job.payload.media.len());
        for item in &job.payload.media {
            if item.is_remote() {
                valid.push(item.clone());
                continue;
            }
            let path = shellexpand::tilde(&item.path).to_string();
            match tokio::fs::try_exists(&path).await {
                Ok(true) => valid.push(item.clone()),
                _ => warn!(path = %path, "Dropping missing media file"),
            }
        }
        valid
    }

    /// Park a job whose rate-limit wait is too long to sleep through
    async fn defer_rate_limited(&self, job: &Job, wait: u64) -> Result<Job> {
        let max_retries = self.ctx.queue_config.max_retries;
        if job.retry_count >= max_retries {
            let error = JobError::new(
                FailureKind::RateLimit,
                format!(
                    "Rate limit window exhausted ({}s wait) after {} retries",
                    wait, job.retry_count
                ),
            );
            return self.fail(job, error).await;
        }

        info!(wait_secs = wait, "Rate limit wait too long, re-queueing");
        let job = self
            .transition(
                job,
                JobUpdate::status(JobStatus::RateLimited)
                    .with_retry_count(job.retry_count + 1)
                    .with_message(format!("Local rate limit, next attempt in {}s", wait)),
            )
            .await?;
        self.requeue(&job, Duration::from_secs(wait)).await?;
        Ok(job)
    }

    async fn attempt(&self, job: &Job, media: &[MediaRef]) -> PlatformResult<PublishResult> {
        let ctx = &self.ctx;
        let caption = self.resolve_caption(job, media).await;

        let mut prepared = Vec::with_capacity(media.len());
        for item in media {
            prepared.push(
                ctx.media
                    .prepare(item, job.content_type, &job.payload.options)
                    .await?,
            );
        }

        PublishingFlow::new(ctx.publisher.as_ref(), ctx.clock.as_ref(), &ctx.publisher_config)
            .run(&PublishRequest {
                content_type: job.content_type,
                media: &prepared,
                caption: &caption,
                options: &job.payload.options,
            })
            .await
    }

    /// Payload caption, else a generated one, else the configured default
    async fn resolve_caption(&self, job: &Job, media: &[MediaRef]) -> String {
        if let Some(caption) = job.payload.caption.as_deref().map(str::trim) {
            if !caption.is_empty() {
                return caption.to_string();
            }
        }

        match self.ctx.captions.generate(media, &job.payload.options).await {
            Ok(caption) if !caption.trim().is_empty() => caption,
            Ok(_) => self.ctx.queue_config.default_caption.clone(),
            Err(e) => {
                warn!(error = %e, "Caption generation failed, using default caption");
                self.ctx.queue_config.default_caption.clone()
            }
        }
    }

    async fn handle_failure(&self, job: &Job, error: PlatformError) -> Result<Job> {
        let ctx = &self.ctx;
        let kind = error.kind();
        let job_error = JobError::from(&error);

        if kind == FailureKind::RateLimit {
            ctx.limiter.record_rate_limit_hit();
        }

        if !kind.is_transient() {
            warn!(kind = %kind, error = %error, "Permanent failure");
            return self.fail(job, job_error).await;
        }

        let max_retries = ctx.queue_config.max_retries;
        if job.retry_count >= max_retries {
            warn!(kind = %kind, retry_count = job.retry_count, "Retry budget exhausted");
            let exhausted = JobError::new(
                kind,
                format!("{} (gave up after {} retries)", job_error.message, job.retry_count),
            );
            return self.fail(job, exhausted).await;
        }

        let mut delay = ctx.queue_config.retry_delay(job.retry_count);
        let next_status = match kind {
            FailureKind::RateLimit => {
                delay = delay.max(Duration::from_secs(ctx.limiter.seconds_until_available()));
                if let PlatformError::RateLimit {
                    retry_after: Some(secs),
                    ..
                } = &error
                {
                    delay = delay.max(Duration::from_secs(*secs));
                }
                JobStatus::RateLimited
            }
            _ => JobStatus::Pending,
        };

        warn!(
            kind = %kind,
            error = %error,
            retry_in_secs = delay.as_secs(),
            "Transient failure, re-queueing"
        );
        let job = self
            .transition(
                job,
                JobUpdate::status(next_status)
                    .with_retry_count(job.retry_count + 1)
                    .with_error(job_error),
            )
            .await?;
        self.requeue(&job, delay).await?;
        Ok(job)
    }

    async fn fail(&self, job: &Job, error: JobError) -> Result<Job> {
        self.transition(job, JobUpdate::status(JobStatus::Failed).with_error(error))
            .await
    }

    async fn requeue(&self, job: &Job, delay: Duration) -> Result<()> {
        let now = self.ctx.clock.now();
        self.ctx
            .queue
            .push(&job.id, now.saturating_add(delay_secs(delay)), now)
            .await
    }

    /// Persist a transition and announce it
    async fn transition(&self, job: &Job, update: JobUpdate) -> Result<Job> {
        let updated = self.ctx.store.update(&job.id, update).await?;

        info!(
            job_id = %updated.id,
            status = %updated.status,
            retry_count = updated.retry_count,
            "Job status changed"
        );

        let event = match (&updated.status, &updated.result, &updated.error) {
            (JobStatus::Success, Some(result), _) => Event::JobSucceeded {
                job_id: updated.id.clone(),
                result: result.clone(),
            },
            (JobStatus::Failed, _, Some(error)) => Event::JobFailed {
                job_id: updated.id.clone(),
                error: error.clone(),
            },
            _ => Event::JobStatusChanged {
                job_id: updated.id.clone(),
                from: job.status,
                to: updated.status,
                retry_count: updated.retry_count,
            },
        };
        self.ctx.events.emit(event);

        Ok(updated)
    }
}

fn delay_secs(delay: Duration) -> i64 {
    i64::try_from(delay.as_secs()).unwrap_or(i64::MAX)
}

/// Fixed-size set of workers over one queue
pub struct WorkerPool {
    workers: Vec<Worker>,
}

impl WorkerPool {
    /// Create `size` workers (at least one)
    pub fn new(ctx: Arc<WorkerContext>, size: usize) -> Self {
        let workers = (0..size.max(1))
            .map(|id| Worker::new(id, Arc::clone(&ctx)))
            .collect();
        Self { workers }
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Run every worker until `shutdown` is set and all have stopped
    pub async fn run(&self, shutdown: Arc<AtomicBool>) {
        let handles: Vec<_> = self
            .workers
            .iter()
            .cloned()
            .map(|worker| {
                let shutdown = Arc::clone(&shutdown);
                tokio::spawn(async move { worker.run(shutdown).await })
            })
            .collect();

        for result in futures::future::join_all(handles).await {
            if let Err(e) = result {
                error!(error = %e, "Worker task panicked");
            }
        }
    }

    /// Process jobs that are available now, then return how many were handled
    ///
    /// Delayed retries are left in the queue. A worker stops at its first
    /// store error.
    pub async fn drain(&self) -> usize {
        let runs = self.workers.iter().map(|worker| async move {
            let mut handled: usize = 0;
            loop {
                match worker.run_once().await {
                    Ok(Some(_)) => handled += 1,
                    Ok(None) => break,
                    Err(e) => {
                        error!(worker = worker.id(), error = %e, "Worker iteration failed");
                        break;
                    }
                }
            }
            handled
        });

        futures::future::join_all(runs).await.into_iter().sum()
    }
}
