//! Mock publisher implementation for testing
//!
//! A scriptable [`Publisher`] that records every call and can be told to
//! fail specific protocol steps. Clones share state, so a test can keep one
//! handle for assertions while the worker owns another.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::PlatformError;
use crate::platforms::{ContainerRequest, ContainerStatus, PlatformResult, Publisher};

/// First media id handed out by [`MockPublisher::publish`]
const FIRST_MEDIA_ID: u64 = 123;

#[derive(Debug, Default)]
struct MockState {
    create_calls: usize,
    poll_calls: usize,
    publish_calls: usize,
    permalink_calls: usize,

    /// Requests received by `create_container`, in order
    containers: Vec<ContainerRequest>,
    next_container: u64,
    next_media: u64,

    create_errors: VecDeque<PlatformError>,
    poll_script: VecDeque<PlatformResult<ContainerStatus>>,
    publish_errors: VecDeque<PlatformError>,
    permalink_error: Option<PlatformError>,
}

/// Mock publisher for testing
#[derive(Debug, Clone)]
pub struct MockPublisher {
    name: String,
    permalink_base: String,
    state: Arc<Mutex<MockState>>,
}

impl Default for MockPublisher {
    fn default() -> Self {
        Self::new("mock")
    }
}

impl MockPublisher {
    /// Publisher whose every call succeeds
    ///
    /// Published media ids count up from "123"; permalinks are
    /// `https://x/<media id>`.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            permalink_base: "https://x".to_string(),
            state: Arc::new(Mutex::new(MockState {
                next_media: FIRST_MEDIA_ID,
                ..MockState::default()
            })),
        }
    }

    /// Fail the next `create_container` call with `error`
    ///
    /// Queued errors are consumed one per call.
    pub fn fail_create_with(&self, error: PlatformError) -> &Self {
        self.state().create_errors.push_back(error);
        self
    }

    /// Fail the next `publish` call with `error`
    pub fn fail_publish_with(&self, error: PlatformError) -> &Self {
        self.state().publish_errors.push_back(error);
        self
    }

    /// Answer the next `poll_status` call with `outcome`; unscripted polls
    /// report FINISHED
    pub fn script_poll(&self, outcome: PlatformResult<ContainerStatus>) -> &Self {
        self.state().poll_script.push_back(outcome);
        self
    }

    /// Make every `get_permalink` call fail
    pub fn fail_permalink_with(&self, error: PlatformError) -> &Self {
        self.state().permalink_error = Some(error);
        self
    }

    pub fn create_calls(&self) -> usize {
        self.state().create_calls
    }

    pub fn poll_calls(&self) -> usize {
        self.state().poll_calls
    }

    pub fn publish_calls(&self) -> usize {
        self.state().publish_calls
    }

    pub fn permalink_calls(&self) -> usize {
        self.state().permalink_calls
    }

    /// Calls across all four primitives
    pub fn total_calls(&self) -> usize {
        let state = self.state();
        state.create_calls + state.poll_calls + state.publish_calls + state.permalink_calls
    }

    /// Every container request received so far
    pub fn containers(&self) -> Vec<ContainerRequest> {
        self.state().containers.clone()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl Publisher for MockPublisher {
    fn name(&self) -> &str {
        &self.name
    }

    async fn create_container(&self, request: &ContainerRequest) -> PlatformResult<String> {
        let mut state = self.state();
        state.create_calls += 1;
        if let Some(error) = state.create_errors.pop_front() {
            return Err(error);
        }

        state.containers.push(request.clone());
        state.next_container += 1;
        Ok(format!("container-{}", state.next_container))
    }

    async fn poll_status(&self, _container_id: &str) -> PlatformResult<ContainerStatus> {
        let mut state = self.state();
        state.poll_calls += 1;
        state
            .poll_script
            .pop_front()
            .unwrap_or(Ok(ContainerStatus::Finished))
    }

    async fn publish(&self, _container_id: &str) -> PlatformResult<String> {
        let mut state = self.state();
        state.publish_calls += 1;
        if let Some(error) = state.publish_errors.pop_front() {
            return Err(error);
        }

        let media_id = state.next_media;
        state.next_media += 1;
        Ok(media_id.to_string())
    }

    async fn get_permalink(&self, media_id: &str) -> PlatformResult<String> {
        let mut state = self.state();
        state.permalink_calls += 1;
        match &state.permalink_error {
            Some(error) => Err(error.clone()),
            None => Ok(format!("{}/{}", self.permalink_base, media_id)),
        }
    }
}
