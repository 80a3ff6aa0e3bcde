//! Test doubles shared across the crate's unit tests

use anyhow::{bail, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;

use crate::connection::bus::MessageBus;
use crate::runtime::adapter::{Outcome, WorkloadRuntime};
use crate::workload::store::ComposeStore;

pub const COMPOSE: &str = "services:\n  app1:\n    image: \"myrepo/app1:2.1.0\"\n    ports:\n      - \"8080:8080\"\n  cache:\n    image: redis:7\n";

/// Temporary workload directory holding `COMPOSE`
pub fn workload_dir() -> TempDir {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("docker-compose.yml"), COMPOSE).unwrap();
    dir
}

pub fn compose_contents(dir: &Path) -> String {
    fs::read_to_string(dir.join("docker-compose.yml")).unwrap()
}

/// Runtime that records every call together with the version on disk at
/// the time of the call
pub struct RecordingRuntime {
    calls: Mutex<Vec<String>>,
    stop: Outcome,
    start: Outcome,
    delay: Duration,
}

impl RecordingRuntime {
    pub fn succeeding() -> Self {
        Self::with_outcomes(Outcome::success(""), Outcome::success(""))
    }

    pub fn with_outcomes(stop: Outcome, start: Outcome) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            stop,
            start,
            delay: Duration::ZERO,
        }
    }

    /// Make every call take `delay`
    pub fn slow(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Recorded calls as `stop@<version>` / `start@<version>`
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    async fn record(&self, action: &str, directory: &Path) {
        let version = ComposeStore::new()
            .load(directory)
            .map(|r| r.version_tag)
            .unwrap_or_else(|_| "?".to_string());
        self.calls.lock().push(format!("{}@{}", action, version));

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
    }
}

#[async_trait]
impl WorkloadRuntime for RecordingRuntime {
    fn runtime_type(&self) -> &str {
        "recording"
    }

    async fn stop(&self, directory: &Path) -> Outcome {
        self.record("stop", directory).await;
        self.stop.clone()
    }

    async fn start(&self, directory: &Path) -> Outcome {
        self.record("start", directory).await;
        self.start.clone()
    }
}

/// In-memory bus
#[derive(Default)]
pub struct MemoryBus {
    published: Mutex<Vec<(String, String)>>,
    replies: Mutex<Vec<(String, String)>>,
    fail_publish: bool,
}

impl MemoryBus {
    pub fn failing() -> Self {
        Self {
            fail_publish: true,
            ..Default::default()
        }
    }

    pub fn published(&self) -> Vec<(String, String)> {
        self.published.lock().clone()
    }

    pub fn replies(&self) -> Vec<(String, String)> {
        self.replies.lock().clone()
    }
}

#[async_trait]
impl MessageBus for MemoryBus {
    async fn publish(&self, channel: &str, payload: &str) -> Result<()> {
        if self.fail_publish {
            bail!("connection reset by peer");
        }
        self.published
            .lock()
            .push((channel.to_string(), payload.to_string()));
        Ok(())
    }

    async fn reply(&self, reply_to: &str, payload: &str) -> Result<()> {
        self.replies
            .lock()
            .push((reply_to.to_string(), payload.to_string()));
        Ok(())
    }
}
