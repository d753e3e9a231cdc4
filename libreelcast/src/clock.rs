//! Time source for the queue
//!
//! Everything that reads the current time or waits goes through [`Clock`],
//! so tests can drive rate-limit windows, retry backoff and container polls
//! in virtual time with [`ManualClock`].

use async_trait::async_trait;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[async_trait]
pub trait Clock: Send + Sync {
    /// Current time as a unix timestamp in milliseconds
    fn now_millis(&self) -> i64;

    /// Suspend the caller for `duration`
    async fn sleep(&self, duration: Duration);

    /// Current time as a unix timestamp in seconds
    fn now(&self) -> i64 {
        self.now_millis().div_euclid(1000)
    }
}

/// Wall clock backed by chrono and the tokio timer
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Virtual clock for tests
///
/// `sleep` returns immediately after advancing the clock by the requested
/// duration. Clones share the same time.
#[derive(Debug, Clone)]
pub struct ManualClock {
    millis: Arc<AtomicI64>,
}

impl ManualClock {
    /// Start the clock at `unix_secs`
    pub fn new(unix_secs: i64) -> Self {
        Self {
            millis: Arc::new(AtomicI64::new(unix_secs * 1000)),
        }
    }

    pub fn advance(&self, duration: Duration) {
        self.millis
            .fetch_add(duration.as_millis() as i64, Ordering::SeqCst);
    }

    /// Jump to `unix_secs`; never moves backwards
    pub fn set(&self, unix_secs: i64) {
        self.millis.fetch_max(unix_secs * 1000, Ordering::SeqCst);
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now_millis(&self) -> i64 {
        self.millis.load(Ordering::SeqCst)
    }

    async fn sleep(&self, duration: Duration) {
        self.advance(duration);
        tokio::task::yield_now().await;
    }
}
