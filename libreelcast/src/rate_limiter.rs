//! Rate limiting for publish attempts
//!
//! Tracks publish calls per fixed window and the rate-limit rejections the
//! platform itself reports. Repeated rejections escalate to blocking for the
//! remainder of the window, which protects the account from suspension.

use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::clock::Clock;
use crate::config::RateLimitConfig;

/// Counters for the current window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateWindowState {
    /// Calls made in the window
    pub calls: u32,
    /// Window start, unix millis
    pub window_start: i64,
    /// Platform rate-limit rejections seen in the window
    pub hits: u32,
    /// Last rejection, unix millis
    pub last_hit_at: Option<i64>,
    /// Last call, unix millis
    pub last_call_at: Option<i64>,
}

/// Shared rate limiter
///
/// Cheap to share behind an `Arc`; all counters sit behind one mutex so
/// concurrent workers see consistent state.
pub struct RateLimiter {
    config: RateLimitConfig,
    clock: Arc<dyn Clock>,
    state: Mutex<RateWindowState>,
}

impl RateLimiter {
    /// Create a new rate limiter whose first window starts now
    pub fn new(config: RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        let now = clock.now_millis();
        Self {
            config,
            clock,
            state: Mutex::new(RateWindowState {
                calls: 0,
                window_start: now,
                hits: 0,
                last_hit_at: None,
                last_call_at: None,
            }),
        }
    }

    /// Whether a publish attempt may start now
    pub fn can_proceed(&self) -> bool {
        let now = self.clock.now_millis();
        let state = self.current(now);
        self.wait_millis(&state, now) == 0
    }

    /// Count one attempt against the window, successful or not
    pub fn record_call(&self) {
        let now = self.clock.now_millis();
        let mut state = self.current(now);
        state.calls += 1;
        state.last_call_at = Some(now);
    }

    /// Check the quota and count the attempt under one lock
    ///
    /// Returns the wait in seconds, rounded up, when the attempt may not
    /// start yet; nothing is recorded in that case.
    pub fn try_acquire(&self) -> Result<(), u64> {
        let now = self.clock.now_millis();
        let mut state = self.current(now);
        let millis = self.wait_millis(&state, now);
        if millis > 0 {
            return Err((millis as u64).div_ceil(1000));
        }
        state.calls += 1;
        state.last_call_at = Some(now);
        Ok(())
    }

    /// Note a rate-limit rejection reported by the platform
    pub fn record_rate_limit_hit(&self) {
        let now = self.clock.now_millis();
        let mut state = self.current(now);
        state.hits += 1;
        state.last_hit_at = Some(now);
        tracing::warn!(
            hits = state.hits,
            threshold = self.config.escalation_threshold,
            "Platform reported rate limit"
        );
    }

    /// Seconds until `can_proceed` turns true, rounded up
    ///
    /// Once the platform has rejected us `escalation_threshold` times within
    /// the window, this is the full remaining window rather than the
    /// per-call estimate.
    pub fn seconds_until_available(&self) -> u64 {
        let now = self.clock.now_millis();
        let state = self.current(now);
        let millis = self.wait_millis(&state, now);
        (millis as u64).div_ceil(1000)
    }

    /// Copy of the current window counters
    pub fn snapshot(&self) -> RateWindowState {
        let now = self.clock.now_millis();
        *self.current(now)
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Lock the state, rolling the window over first if it has expired
    fn current(&self, now: i64) -> MutexGuard<'_, RateWindowState> {
        // A poisoned lock only means another worker panicked mid-update;
        // the counters are still usable.
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if now >= state.window_start + self.window_millis() {
            state.calls = 0;
            state.hits = 0;
            state.last_hit_at = None;
            state.window_start = now;
        }
        state
    }

    fn window_millis(&self) -> i64 {
        (self.config.window as i64).saturating_mul(1000)
    }

    fn wait_millis(&self, state: &RateWindowState, now: i64) -> i64 {
        let remaining_window = (state.window_start + self.window_millis() - now).max(0);

        if state.hits >= self.config.escalation_threshold {
            return remaining_window;
        }

        let mut wait = 0;

        if state.calls >= self.config.max_per_window {
            wait = wait.max(remaining_window);
        }

        if let (Some(last_hit), true) = (state.last_hit_at, state.hits > 0) {
            let backoff = self.hit_backoff(state.hits).as_millis() as i64;
            wait = wait.max(last_hit + backoff - now);
        }

        if let Some(last_call) = state.last_call_at {
            let spacing = (self.config.min_interval as i64).saturating_mul(1000);
            wait = wait.max(last_call + spacing - now);
        }

        wait.max(0)
    }

    /// `hit_backoff_base × multiplier^(hits-1)`, capped at `max_backoff`
    fn hit_backoff(&self, hits: u32) -> Duration {
        let exponent = hits.saturating_sub(1) as i32;
        let secs = self.config.hit_backoff_base as f64 * self.config.backoff_multiplier.powi(exponent);
        Duration::from_secs_f64(secs.min(self.config.max_backoff as f64))
    }
}
