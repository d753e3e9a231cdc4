//! Durable job records and their transition history
//!
//! Every mutation goes straight to SQLite inside a transaction; there is no
//! in-memory cache. In-process writers additionally take an async mutex so
//! that read-validate-write sequences never interleave.

use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, Transaction};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::clock::Clock;
use crate::db::Database;
use crate::error::{DbError, ReelcastError, Result};
use crate::types::{Job, JobError, JobEvent, JobStatus, PublishResult, QueueStats};

/// Number of recent terminal jobs averaged for processing-time statistics
const PROCESSING_TIME_SAMPLE: i64 = 10;

const JOB_COLUMNS: &str = "id, content_type, payload, status, created_at, updated_at, \
     started_at, completed_at, result, error, retry_count, no_retry";

/// Partial update applied to a job by [`JobStore::update`]
///
/// Fields left as `None` keep their stored value. `updated_at` is always
/// refreshed.
#[derive(Debug, Clone, Default)]
pub struct JobUpdate {
    pub status: Option<JobStatus>,
    pub result: Option<PublishResult>,
    pub error: Option<JobError>,
    pub retry_count: Option<u32>,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
    /// Free text recorded on the history event
    pub message: Option<String>,
}

impl JobUpdate {
    pub fn status(status: JobStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn with_result(mut self, result: PublishResult) -> Self {
        self.result = Some(result);
        self
    }

    pub fn with_error(mut self, error: JobError) -> Self {
        self.error = Some(error);
        self
    }

    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = Some(retry_count);
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

#[derive(Clone)]
pub struct JobStore {
    db: Database,
    clock: Arc<dyn Clock>,
    write_lock: Arc<Mutex<()>>,
}

impl JobStore {
    pub fn new(db: Database, clock: Arc<dyn Clock>) -> Self {
        Self {
            db,
            clock,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Persist a new job and its creation event
    pub async fn create(&self, job: &Job) -> Result<String> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.db.pool().begin().await.map_err(DbError::SqlxError)?;

        sqlx::query(
            r#"
            INSERT INTO jobs (id, content_type, payload, status, created_at, updated_at,
                              started_at, completed_at, result, error, retry_count, no_retry)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&job.id)
        .bind(job.content_type.as_str())
        .bind(to_json(&job.payload)?)
        .bind(job.status.as_str())
        .bind(job.created_at)
        .bind(job.updated_at)
        .bind(job.started_at)
        .bind(job.completed_at)
        .bind(job.result.as_ref().map(to_json).transpose()?)
        .bind(job.error.as_ref().map(to_json).transpose()?)
        .bind(job.retry_count as i64)
        .bind(job.no_retry)
        .execute(&mut *tx)
        .await
        .map_err(DbError::SqlxError)?;

        insert_event(&mut tx, &job.id, None, job.status, Some("created"), job.created_at).await?;

        tx.commit().await.map_err(DbError::SqlxError)?;

        tracing::debug!(job_id = %job.id, content_type = %job.content_type, "Job created");
        Ok(job.id.clone())
    }

    /// Fetch a job, failing with `NotFound` for unknown ids
    pub async fn get(&self, id: &str) -> Result<Job> {
        let row = sqlx::query(&format!("SELECT {} FROM jobs WHERE id = ?", JOB_COLUMNS))
            .bind(id)
            .fetch_optional(self.db.pool())
            .await
            .map_err(DbError::SqlxError)?;

        match row {
            Some(row) => job_from_row(&row),
            None => Err(ReelcastError::NotFound(id.to_string())),
        }
    }

    /// Apply `update` to a job in one transaction
    ///
    /// A status change is validated against the lifecycle graph and recorded
    /// as a history event. Terminal jobs accept no further updates.
    /// Reaching SUCCESS clears any error left by earlier attempts; reaching
    /// FAILED requires an error and never carries a result.
    ///
    /// The write is conditional on the status read beforehand, so a change
    /// made by another process in between surfaces as `InvalidTransition`.
    pub async fn update(&self, id: &str, update: JobUpdate) -> Result<Job> {
        let _guard = self.write_lock.lock().await;
        let now = self.clock.now();

        let mut job = self.get(id).await?;
        let from = job.status;

        let target = update.status.unwrap_or(from);
        if from.is_terminal() || (target != from && !from.can_transition_to(target)) {
            return Err(ReelcastError::InvalidTransition {
                job_id: id.to_string(),
                from,
                to: target,
            });
        }

        if let Some(result) = update.result {
            job.result = Some(result);
        }
        if let Some(error) = update.error {
            job.error = Some(error);
        }
        if let Some(retry_count) = update.retry_count {
            job.retry_count = retry_count;
        }
        if let Some(started_at) = update.started_at {
            job.started_at = Some(started_at);
        }
        if let Some(completed_at) = update.completed_at {
            job.completed_at = Some(completed_at);
        }

        match target {
            JobStatus::Processing if target != from && update.started_at.is_none() => {
                job.started_at = Some(now);
            }
            JobStatus::Success => {
                if job.result.is_none() {
                    return Err(ReelcastError::InvalidInput(format!(
                        "Job {} cannot succeed without a result",
                        id
                    )));
                }
                job.error = None;
            }
            JobStatus::Failed => {
                if job.error.is_none() {
                    return Err(ReelcastError::InvalidInput(format!(
                        "Job {} cannot fail without an error",
                        id
                    )));
                }
                job.result = None;
            }
            _ => {}
        }
        if target.is_terminal() && job.completed_at.is_none() {
            job.completed_at = Some(now);
        }

        job.status = target;
        job.updated_at = now;

        let result_json = job.result.as_ref().map(to_json).transpose()?;
        let error_json = job.error.as_ref().map(to_json).transpose()?;

        // Open with the write so the transaction takes the lock up front
        let mut tx = self.db.pool().begin().await.map_err(DbError::SqlxError)?;
        let affected = sqlx::query(
            r#"
            UPDATE jobs
            SET status = ?, updated_at = ?, started_at = ?, completed_at = ?,
                result = ?, error = ?, retry_count = ?
            WHERE id = ? AND status = ?
            "#,
        )
        .bind(job.status.as_str())
        .bind(job.updated_at)
        .bind(job.started_at)
        .bind(job.completed_at)
        .bind(result_json)
        .bind(error_json)
        .bind(job.retry_count as i64)
        .bind(id)
        .bind(from.as_str())
        .execute(&mut *tx)
        .await
        .map_err(DbError::SqlxError)?
        .rows_affected();

        if affected == 0 {
            return Err(ReelcastError::InvalidTransition {
                job_id: id.to_string(),
                from,
                to: target,
            });
        }

        if target != from {
            let message = match (update.message, &job.error) {
                (Some(message), _) => Some(message),
                (None, Some(error)) if target != JobStatus::Success => Some(error.message.clone()),
                (None, _) => None,
            };
            insert_event(&mut tx, id, Some(from), target, message.as_deref(), now).await?;
        }

        tx.commit().await.map_err(DbError::SqlxError)?;

        tracing::debug!(
            job_id = %id,
            from = %from,
            status = %job.status,
            retry_count = job.retry_count,
            "Job updated"
        );
        Ok(job)
    }

    /// Most recently created jobs first
    pub async fn list_recent(&self, limit: u32) -> Result<Vec<Job>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM jobs ORDER BY created_at DESC, id DESC LIMIT ?",
            JOB_COLUMNS
        ))
        .bind(limit as i64)
        .fetch_all(self.db.pool())
        .await
        .map_err(DbError::SqlxError)?;

        rows.iter().map(job_from_row).collect()
    }

    /// Non-terminal jobs without a queue entry, oldest first
    ///
    /// Only meaningful while no worker is running: a job claimed but not yet
    /// marked PROCESSING also matches.
    pub async fn list_unqueued(&self) -> Result<Vec<Job>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {} FROM jobs
            WHERE status IN ('PENDING', 'PROCESSING', 'RATE_LIMITED')
              AND id NOT IN (SELECT job_id FROM queue_entries)
            ORDER BY created_at ASC, id ASC
            "#,
            JOB_COLUMNS
        ))
        .fetch_all(self.db.pool())
        .await
        .map_err(DbError::SqlxError)?;

        rows.iter().map(job_from_row).collect()
    }

    /// Totals by status, queue length and recent average processing time
    pub async fn stats(&self) -> Result<QueueStats> {
        let counts: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM jobs GROUP BY status")
                .fetch_all(self.db.pool())
                .await
                .map_err(DbError::SqlxError)?;

        let mut stats = QueueStats::default();
        for (status, count) in counts {
            let count = count as u64;
            stats.total += count;
            match status.parse::<JobStatus>() {
                Ok(JobStatus::Pending) => stats.pending = count,
                Ok(JobStatus::Processing) => stats.processing = count,
                Ok(JobStatus::Success) => stats.success = count,
                Ok(JobStatus::Failed) => stats.failed = count,
                Ok(JobStatus::RateLimited) => stats.rate_limited = count,
                Err(_) => tracing::warn!(status = %status, "Ignoring unknown job status in stats"),
            }
        }

        let queue_length: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM queue_entries")
            .fetch_one(self.db.pool())
            .await
            .map_err(DbError::SqlxError)?;
        stats.queue_length = queue_length as u64;

        stats.average_processing_secs = sqlx::query_scalar(
            r#"
            SELECT AVG(completed_at - started_at) FROM (
                SELECT completed_at, started_at FROM jobs
                WHERE completed_at IS NOT NULL AND started_at IS NOT NULL
                ORDER BY completed_at DESC
                LIMIT ?
            )
            "#,
        )
        .bind(PROCESSING_TIME_SAMPLE)
        .fetch_one(self.db.pool())
        .await
        .map_err(DbError::SqlxError)?;

        Ok(stats)
    }

    /// Transition history of one job, oldest first
    pub async fn events(&self, id: &str) -> Result<Vec<JobEvent>> {
        // Distinguish "unknown job" from "no events"
        self.get(id).await?;

        let rows = sqlx::query(
            r#"
            SELECT id, job_id, from_status, to_status, message, occurred_at
            FROM job_events WHERE job_id = ? ORDER BY id ASC
            "#,
        )
        .bind(id)
        .fetch_all(self.db.pool())
        .await
        .map_err(DbError::SqlxError)?;

        rows.iter().map(event_from_row).collect()
    }

    /// Flag a job so no further attempt is made
    pub async fn mark_no_retry(&self, id: &str) -> Result<Job> {
        let guard = self.write_lock.lock().await;
        let affected = sqlx::query("UPDATE jobs SET no_retry = 1, updated_at = ? WHERE id = ?")
            .bind(self.clock.now())
            .bind(id)
            .execute(self.db.pool())
            .await
            .map_err(DbError::SqlxError)?
            .rows_affected();
        drop(guard);

        if affected == 0 {
            return Err(ReelcastError::NotFound(id.to_string()));
        }
        self.get(id).await
    }

    /// Delete terminal jobs last updated before `cutoff` together with their
    /// history; returns how many jobs were removed
    pub async fn prune_before(&self, cutoff: i64) -> Result<u64> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.db.pool().begin().await.map_err(DbError::SqlxError)?;

        sqlx::query(
            r#"
            DELETE FROM job_events WHERE job_id IN (
                SELECT id FROM jobs
                WHERE status IN ('SUCCESS', 'FAILED') AND updated_at < ?
            )
            "#,
        )
        .bind(cutoff)
        .execute(&mut *tx)
        .await
        .map_err(DbError::SqlxError)?;

        let removed = sqlx::query(
            "DELETE FROM jobs WHERE status IN ('SUCCESS', 'FAILED') AND updated_at < ?",
        )
        .bind(cutoff)
        .execute(&mut *tx)
        .await
        .map_err(DbError::SqlxError)?
        .rows_affected();

        tx.commit().await.map_err(DbError::SqlxError)?;

        tracing::info!(removed, cutoff, "Pruned finished jobs");
        Ok(removed)
    }
}

async fn insert_event(
    tx: &mut Transaction<'_, Sqlite>,
    job_id: &str,
    from: Option<JobStatus>,
    to: JobStatus,
    message: Option<&str>,
    occurred_at: i64,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO job_events (job_id, from_status, to_status, message, occurred_at)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(job_id)
    .bind(from.map(|s| s.as_str()))
    .bind(to.as_str())
    .bind(message)
    .bind(occurred_at)
    .execute(&mut **tx)
    .await
    .map_err(DbError::SqlxError)?;
    Ok(())
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| {
        ReelcastError::InvalidInput(format!("Failed to serialize job data: {}", e))
    })
}

fn corrupt(table: &'static str, reason: impl std::fmt::Display) -> ReelcastError {
    DbError::CorruptRow {
        table,
        reason: reason.to_string(),
    }
    .into()
}

fn job_from_row(row: &SqliteRow) -> Result<Job> {
    let get_err = |e: sqlx::Error| ReelcastError::from(DbError::SqlxError(e));

    let content_type: String = row.try_get("content_type").map_err(get_err)?;
    let payload: String = row.try_get("payload").map_err(get_err)?;
    let status: String = row.try_get("status").map_err(get_err)?;
    let result: Option<String> = row.try_get("result").map_err(get_err)?;
    let error: Option<String> = row.try_get("error").map_err(get_err)?;
    let retry_count: i64 = row.try_get("retry_count").map_err(get_err)?;

    Ok(Job {
        id: row.try_get("id").map_err(get_err)?,
        content_type: content_type.parse().map_err(|e| corrupt("jobs", e))?,
        payload: serde_json::from_str(&payload).map_err(|e| corrupt("jobs", e))?,
        status: status.parse().map_err(|e| corrupt("jobs", e))?,
        created_at: row.try_get("created_at").map_err(get_err)?,
        updated_at: row.try_get("updated_at").map_err(get_err)?,
        started_at: row.try_get("started_at").map_err(get_err)?,
        completed_at: row.try_get("completed_at").map_err(get_err)?,
        result: result
            .map(|r| serde_json::from_str(&r))
            .transpose()
            .map_err(|e| corrupt("jobs", e))?,
        error: error
            .map(|e| serde_json::from_str(&e))
            .transpose()
            .map_err(|e| corrupt("jobs", e))?,
        retry_count: u32::try_from(retry_count).map_err(|e| corrupt("jobs", e))?,
        no_retry: row.try_get("no_retry").map_err(get_err)?,
    })
}

fn event_from_row(row: &SqliteRow) -> Result<JobEvent> {
    let get_err = |e: sqlx::Error| ReelcastError::from(DbError::SqlxError(e));

    let from_status: Option<String> = row.try_get("from_status").map_err(get_err)?;
    let to_status: String = row.try_get("to_status").map_err(get_err)?;

    Ok(JobEvent {
        id: row.try_get("id").map_err(get_err)?,
        job_id: row.try_get("job_id").map_err(get_err)?,
        from_status: from_status
            .map(|s| s.parse())
            .transpose()
            .map_err(|e| corrupt("job_events", e))?,
        to_status: to_status.parse().map_err(|e| corrupt("job_events", e))?,
        message: row.try_get("message").map_err(get_err)?,
        occurred_at: row.try_get("occurred_at").map_err(get_err)?,
    })
}
