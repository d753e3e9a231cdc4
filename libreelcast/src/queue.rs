//! Persisted FIFO of job ids waiting to be worked
//!
//! Entries are ordered by an autoincrement sequence, so retries pushed back
//! re-enter at the tail. An entry only becomes claimable once its
//! `available_at` has passed.

use crate::db::Database;
use crate::error::{DbError, Result};

#[derive(Clone)]
pub struct JobQueue {
    db: Database,
}

impl JobQueue {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Append `job_id` at the tail, claimable from `available_at` (unix secs)
    ///
    /// A job already in the queue is moved to the tail with the new time.
    pub async fn push(&self, job_id: &str, available_at: i64, now: i64) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO queue_entries (job_id, available_at, enqueued_at)
            VALUES (?, ?, ?)
            "#,
        )
        .bind(job_id)
        .bind(available_at)
        .bind(now)
        .execute(self.db.pool())
        .await
        .map_err(DbError::SqlxError)?;

        tracing::debug!(job_id = %job_id, available_at, "Job queued");
        Ok(())
    }

    /// Remove and return the oldest entry that is available at `now`
    ///
    /// Runs as a single statement, so concurrent workers (or processes)
    /// never claim the same entry.
    pub async fn claim_next(&self, now: i64) -> Result<Option<String>> {
        let job_id: Option<String> = sqlx::query_scalar(
            r#"
            DELETE FROM queue_entries
            WHERE seq = (
                SELECT seq FROM queue_entries
                WHERE available_at <= ?
                ORDER BY seq ASC
                LIMIT 1
            )
            RETURNING job_id
            "#,
        )
        .bind(now)
        .fetch_optional(self.db.pool())
        .await
        .map_err(DbError::SqlxError)?;

        Ok(job_id)
    }

    /// Earliest `available_at` among queued entries
    pub async fn next_available_at(&self) -> Result<Option<i64>> {
        let next: Option<i64> = sqlx::query_scalar("SELECT MIN(available_at) FROM queue_entries")
            .fetch_one(self.db.pool())
            .await
            .map_err(DbError::SqlxError)?;
        Ok(next)
    }

    /// Number of queued entries, delayed ones included
    pub async fn len(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM queue_entries")
            .fetch_one(self.db.pool())
            .await
            .map_err(DbError::SqlxError)?;
        Ok(count as u64)
    }

    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }

    /// Drop the entry for `job_id`; returns whether one existed
    pub async fn remove(&self, job_id: &str) -> Result<bool> {
        let affected = sqlx::query("DELETE FROM queue_entries WHERE job_id = ?")
            .bind(job_id)
            .execute(self.db.pool())
            .await
            .map_err(DbError::SqlxError)?
            .rows_affected();
        Ok(affected > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::store::JobStore;
    use crate::types::{ContentType, Job, JobPayload, MediaRef};
    use std::collections::HashSet;
    use std::sync::Arc;
    use tempfile::TempDir;

    const NOW: i64 = 1_700_000_000;

    async fn setup() -> (JobStore, JobQueue, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("jobs.db");
        let db = Database::new(db_path.to_str().unwrap()).await.unwrap();
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(NOW));
        (JobStore::new(db.clone(), clock), JobQueue::new(db), temp_dir)
    }

    async fn new_job(store: &JobStore) -> String {
        let job = Job::new(
            ContentType::Image,
            JobPayload::new(vec![MediaRef::new("https://cdn.example.com/a.jpg")], None),
            NOW,
        );
        store.create(&job).await.unwrap()
    }

    #[tokio::test]
    async fn test_claims_in_fifo_order() {
        let (store, queue, _temp) = setup().await;
        let a = new_job(&store).await;
        let b = new_job(&store).await;
        let c = new_job(&store).await;
        for id in [&a, &b, &c] {
            queue.push(id, NOW, NOW).await.unwrap();
        }

        assert_eq!(queue.len().await.unwrap(), 3);
        assert_eq!(queue.claim_next(NOW).await.unwrap(), Some(a));
        assert_eq!(queue.claim_next(NOW).await.unwrap(), Some(b));
        assert_eq!(queue.claim_next(NOW).await.unwrap(), Some(c));
        assert_eq!(queue.claim_next(NOW).await.unwrap(), None);
        assert!(queue.is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn test_delayed_entries_wait_until_available() {
        let (store, queue, _temp) = setup().await;
        let delayed = new_job(&store).await;
        let ready = new_job(&store).await;
        queue.push(&delayed, NOW + 60, NOW).await.unwrap();
        queue.push(&ready, NOW, NOW).await.unwrap();

        assert_eq!(queue.claim_next(NOW).await.unwrap(), Some(ready));
        assert_eq!(queue.claim_next(NOW).await.unwrap(), None);
        assert_eq!(queue.next_available_at().await.unwrap(), Some(NOW + 60));
        assert_eq!(queue.claim_next(NOW + 60).await.unwrap(), Some(delayed));
        assert_eq!(queue.next_available_at().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_requeue_moves_to_tail() {
        let (store, queue, _temp) = setup().await;
        let a = new_job(&store).await;
        let b = new_job(&store).await;
        queue.push(&a, NOW, NOW).await.unwrap();
        queue.push(&b, NOW, NOW).await.unwrap();
        queue.push(&a, NOW, NOW).await.unwrap();

        assert_eq!(queue.len().await.unwrap(), 2);
        assert_eq!(queue.claim_next(NOW).await.unwrap(), Some(b));
        assert_eq!(queue.claim_next(NOW).await.unwrap(), Some(a));
    }

    #[tokio::test]
    async fn test_remove() {
        let (store, queue, _temp) = setup().await;
        let a = new_job(&store).await;
        queue.push(&a, NOW, NOW).await.unwrap();

        assert!(queue.remove(&a).await.unwrap());
        assert!(!queue.remove(&a).await.unwrap());
        assert_eq!(queue.claim_next(NOW).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_concurrent_claims_never_duplicate() {
        let (store, queue, _temp) = setup().await;
        let mut expected = HashSet::new();
        for _ in 0..20 {
            let id = new_job(&store).await;
            queue.push(&id, NOW, NOW).await.unwrap();
            expected.insert(id);
        }

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let queue = queue.clone();
                tokio::spawn(async move {
                    let mut claimed = Vec::new();
                    while let Some(id) = queue.claim_next(NOW).await.unwrap() {
                        claimed.push(id);
                    }
                    claimed
                })
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.await.unwrap() {
                assert!(seen.insert(id), "job claimed twice");
            }
        }
        assert_eq!(seen, expected);
    }
}
