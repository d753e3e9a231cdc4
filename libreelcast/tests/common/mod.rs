//! Shared setup for the integration tests
//!
//! Every harness gets its own database in a temp dir, a [`ManualClock`] and a
//! [`MockPublisher`], so whole job lifecycles run in virtual time.

#![allow(dead_code)]

use std::sync::Arc;

use libreelcast::clock::ManualClock;
use libreelcast::config::Config;
use libreelcast::platforms::mock::MockPublisher;
use libreelcast::types::MediaRef;
use libreelcast::worker::WorkerPool;
use libreelcast::ReelcastService;
use tempfile::TempDir;

pub const START: i64 = 1_767_225_600;

pub struct Harness {
    pub service: ReelcastService,
    pub clock: ManualClock,
    pub publisher: MockPublisher,
    pub pool: WorkerPool,
    pub temp_dir: TempDir,
}

pub fn test_config(temp_dir: &TempDir) -> Config {
    let mut config = Config::default_config();
    config.database.path = temp_dir.path().join("jobs.db").to_str().unwrap().to_string();
    config.rate_limit.min_interval = 0;
    config.media.public_base_url = Some("https://cdn.example.com/media".to_string());
    config
}

pub async fn harness() -> Harness {
    harness_with(|_| {}).await
}

pub async fn harness_with(configure: impl FnOnce(&mut Config)) -> Harness {
    let temp_dir = TempDir::new().unwrap();
    let mut config = test_config(&temp_dir);
    configure(&mut config);

    let clock = ManualClock::new(START);
    let service = ReelcastService::with_clock(config, Arc::new(clock.clone()))
        .await
        .unwrap();
    let publisher = MockPublisher::default();
    let pool = service.worker_pool(Arc::new(publisher.clone()));

    Harness {
        service,
        clock,
        publisher,
        pool,
        temp_dir,
    }
}

impl Harness {
    /// Write a small media file and return a reference to it
    pub fn media_file(&self, name: &str) -> MediaRef {
        let path = self.temp_dir.path().join(name);
        std::fs::write(&path, b"not really a jpeg").unwrap();
        MediaRef::new(path.to_str().unwrap())
    }

    pub fn media_files(&self, count: usize) -> Vec<MediaRef> {
        (0..count)
            .map(|i| self.media_file(&format!("slide-{}.jpg", i)))
            .collect()
    }

    /// Drain the queue, jumping the clock to each delayed entry, until it is
    /// empty; returns how many claims were processed
    pub async fn run_until_idle(&self) -> usize {
        let mut handled = 0;
        for _ in 0..100 {
            handled += self.pool.drain().await;
            match self.service.queue().next_available_at().await.unwrap() {
                Some(at) => self.clock.set(at),
                None => return handled,
            }
        }
        panic!("queue did not settle after 100 rounds");
    }
}
