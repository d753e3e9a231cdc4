//! Event system for job lifecycle tracking
//!
//! This module provides an in-process event bus for distributing job events
//! to subscribers without blocking the workers.
//!
//! # Architecture
//!
//! The event bus uses `tokio::sync::broadcast` for multi-subscriber support.
//! Events are emitted on enqueue and on every status transition, and can be
//! consumed by any number of subscribers (daemon logging, dashboards, etc.).
//!
//! # Non-Blocking Behavior
//!
//! If no subscribers exist, events are dropped immediately. Subscribers can
//! lag without blocking emitters.
//!
//! # Example
//!
//! ```no_run
//! use libreelcast::service::events::{Event, EventBus};
//! use libreelcast::types::ContentType;
//!
//! # async fn example() {
//! let event_bus = EventBus::new(100);
//! let mut receiver = event_bus.subscribe();
//!
//! event_bus.emit(Event::JobEnqueued {
//!     job_id: "0190c3a2".to_string(),
//!     content_type: ContentType::Image,
//! });
//!
//! if let Ok(event) = receiver.recv().await {
//!     println!("Received: {:?}", event);
//! }
//! # }
//! ```

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::types::{ContentType, JobError, JobStatus, PublishResult};

/// Event receiver type alias
pub type EventReceiver = broadcast::Receiver<Event>;

/// Event bus for distributing job events
///
/// Cloning is cheap; clones share one channel.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl EventBus {
    /// Create a new event bus with the specified capacity
    ///
    /// The capacity determines how many events can be buffered per subscriber
    /// before older events are dropped (if the subscriber is lagging).
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to events emitted from now on
    pub fn subscribe(&self) -> EventReceiver {
        self.sender.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Never blocks. With no subscribers the event is dropped.
    pub fn emit(&self, event: Event) {
        // send() only fails when nobody is listening
        let _ = self.sender.send(event);
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(100)
    }
}

/// Job lifecycle events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A job was accepted into the queue
    JobEnqueued {
        job_id: String,
        content_type: ContentType,
    },

    /// A job moved between non-terminal states
    JobStatusChanged {
        job_id: String,
        from: JobStatus,
        to: JobStatus,
        retry_count: u32,
    },

    /// A job was published
    JobSucceeded {
        job_id: String,
        result: PublishResult,
    },

    /// A job failed permanently
    JobFailed { job_id: String, error: JobError },
}

impl Event {
    pub fn job_id(&self) -> &str {
        match self {
            Event::JobEnqueued { job_id, .. }
            | Event::JobStatusChanged { job_id, .. }
            | Event::JobSucceeded { job_id, .. }
            | Event::JobFailed { job_id, .. } => job_id,
        }
    }
}
