#![allow(dead_code)]

use std::future::Future;
use std::path::Path;
use std::time::Duration;

use assert_cmd::Command;
use chrono::{DateTime, TimeZone, Utc};
use tasksync::config::SyncConfig;
use tasksync::memory::MemoryService;
use tasksync::{SyncClient, TaskRecord};

pub const OWNER: &str = "alice";

pub fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_736_000_000 + secs, 0)
        .single()
        .expect("valid timestamp")
}

/// Builder for records with predictable timestamps.
pub struct RecordBuilder {
    record: TaskRecord,
}

impl RecordBuilder {
    pub fn new(id: &str, title: &str) -> Self {
        Self {
            record: TaskRecord {
                id: id.to_string(),
                title: title.to_string(),
                description: None,
                completed: false,
                created_at: at(0),
                updated_at: at(0),
                owner_id: OWNER.to_string(),
            },
        }
    }

    pub fn description(mut self, description: &str) -> Self {
        self.record.description = Some(description.to_string());
        self
    }

    pub fn completed(mut self, completed: bool) -> Self {
        self.record.completed = completed;
        self
    }

    pub fn created(mut self, secs: i64) -> Self {
        self.record.created_at = at(secs);
        if self.record.updated_at < self.record.created_at {
            self.record.updated_at = self.record.created_at;
        }
        self
    }

    pub fn updated(mut self, secs: i64) -> Self {
        self.record.updated_at = at(secs);
        self
    }

    pub fn build(self) -> TaskRecord {
        self.record
    }
}

pub fn record(id: &str, title: &str) -> TaskRecord {
    RecordBuilder::new(id, title).build()
}

/// Sync settings tuned for tests: short timeout and fast reconnects.
pub fn fast_sync() -> SyncConfig {
    let mut config = SyncConfig::default();
    config.mutation_timeout = "2s".to_string();
    config.backoff.initial = "10ms".to_string();
    config.backoff.max = "50ms".to_string();
    config
}

pub fn memory_client(service: &MemoryService) -> SyncClient<MemoryService> {
    SyncClient::new(service.clone(), OWNER, &fast_sync()).expect("client")
}

/// Poll `check` until it holds or `timeout` passes.
pub async fn eventually<F>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

pub async fn within<T>(future: impl Future<Output = T>) -> T {
    tokio::time::timeout(Duration::from_secs(5), future)
        .await
        .expect("timed out")
}

pub fn tasksync_cmd(data_dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("tasksync").expect("binary");
    cmd.env("TASKSYNC_DATA_DIR", data_dir)
        .env_remove("TASKSYNC_OWNER")
        .env_remove("RUST_LOG");
    cmd
}
