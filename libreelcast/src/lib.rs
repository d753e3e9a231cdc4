//! Reelcast - a durable publishing queue for Instagram
//!
//! Jobs (image, reel or carousel posts) are recorded in SQLite, claimed by
//! workers in FIFO order and pushed through the Graph API container protocol
//! while a shared rate limiter keeps the account inside its publishing budget.
//! Transient failures are retried with backoff; permanent ones fail the job
//! with a categorized error.

pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod media;
pub mod platforms;
pub mod publishing;
pub mod queue;
pub mod rate_limiter;
pub mod service;
pub mod store;
pub mod types;
pub mod worker;

// Re-export commonly used types
pub use config::Config;
pub use db::Database;
pub use error::{FailureKind, PlatformError, ReelcastError, Result};
pub use service::{EnqueueOptions, ReelcastService};
pub use types::{ContentType, Job, JobPayload, JobStatus, MediaRef, PublishResult};
