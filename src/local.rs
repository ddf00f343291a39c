//! File-backed task service.
//!
//! Stores every owner's rows in `<data_dir>/tasks.json`. Each `tasksync`
//! process acts as an independent client: writes go through the storage lock,
//! and subscriptions watch the file and turn snapshot differences into change
//! events.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use chrono::Utc;
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use ulid::Ulid;

use crate::error::{Error, Result};
use crate::record::{parse_id, NewTask, TaskPatch, TaskRecord};
use crate::service::{ChangeEvent, Subscription, TaskService};
use crate::storage::{Storage, TASKS_FILE};

const WATCH_DEBOUNCE_MS: u64 = 30;

type Snapshot = BTreeMap<String, TaskRecord>;

#[derive(Debug, Clone)]
pub struct LocalService {
    storage: Storage,
}

impl LocalService {
    pub fn new(storage: Storage) -> Self {
        Self { storage }
    }

    pub fn open(dir: impl AsRef<Path>) -> Self {
        Self::new(Storage::new(dir.as_ref()))
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(Storage) -> Result<T> + Send + 'static,
    {
        let storage = self.storage.clone();
        tokio::task::spawn_blocking(move || f(storage))
            .await
            .map_err(|err| Error::OperationFailed(format!("storage task failed: {err}")))?
    }
}

fn require_owner(owner: &str) -> Result<String> {
    let owner = owner.trim();
    if owner.is_empty() {
        return Err(Error::Auth("no owner is signed in".to_string()));
    }
    Ok(owner.to_string())
}

/// Coerce one stored row, logging rows that cannot be read.
fn read_row(row: &Value) -> Option<TaskRecord> {
    match TaskRecord::from_value(row) {
        Ok(record) => Some(record),
        Err(err) => {
            warn!(error = %err, "skipping unreadable task row");
            None
        }
    }
}

fn row_id(row: &Value) -> Option<String> {
    row.get("id").and_then(|id| parse_id(id).ok())
}

fn snapshot(storage: &Storage, owner: &str) -> Result<Snapshot> {
    let file = storage.read_task_file()?;
    Ok(file
        .tasks
        .iter()
        .filter_map(read_row)
        .filter(|record| record.owner_id == owner)
        .map(|record| (record.id.clone(), record))
        .collect())
}

/// Change events that turn `prev` into `next`, ordered by id.
pub fn diff_snapshots(prev: &Snapshot, next: &Snapshot) -> Result<Vec<ChangeEvent>> {
    let mut events = Vec::new();
    for (id, record) in next {
        match prev.get(id) {
            None => events.push(ChangeEvent::insert(record)?),
            Some(old) if old != record => events.push(ChangeEvent::update(record)?),
            Some(_) => {}
        }
    }
    for id in prev.keys() {
        if !next.contains_key(id) {
            events.push(ChangeEvent::delete(id));
        }
    }
    Ok(events)
}

impl TaskService for LocalService {
    async fn fetch_all(&self, owner: &str) -> Result<Vec<TaskRecord>> {
        let owner = require_owner(owner)?;
        self.blocking(move |storage| Ok(snapshot(&storage, &owner)?.into_values().collect()))
            .await
    }

    async fn insert(&self, owner: &str, task: &NewTask) -> Result<TaskRecord> {
        let owner = require_owner(owner)?;
        let task = task.validate()?;
        self.blocking(move |storage| {
            let now = Utc::now();
            let record = TaskRecord {
                id: Ulid::new().to_string().to_lowercase(),
                title: task.title,
                description: task.description,
                completed: false,
                created_at: now,
                updated_at: now,
                owner_id: owner,
            };
            let row = record.to_value()?;
            storage.update_tasks(|rows| {
                rows.push(row);
                Ok(())
            })?;
            debug!(id = %record.id, "stored new task");
            Ok(record)
        })
        .await
    }

    async fn update(&self, owner: &str, id: &str, patch: &TaskPatch) -> Result<TaskRecord> {
        let owner = require_owner(owner)?;
        let patch = patch.validate()?;
        let id = id.to_string();
        self.blocking(move |storage| {
            storage.update_tasks(|rows| {
                let (index, current) = rows
                    .iter()
                    .enumerate()
                    .filter(|(_, row)| row_id(row).as_deref() == Some(id.as_str()))
                    .find_map(|(index, row)| read_row(row).map(|record| (index, record)))
                    .filter(|(_, record)| record.owner_id == owner)
                    .ok_or_else(|| Error::NotFound(id.clone()))?;

                let mut next = current.patched(&patch);
                let now = Utc::now();
                next.updated_at = if now > current.updated_at {
                    now
                } else {
                    current.updated_at + chrono::Duration::microseconds(1)
                };
                rows[index] = next.to_value()?;
                Ok(next)
            })
        })
        .await
    }

    async fn delete(&self, owner: &str, id: &str) -> Result<()> {
        let owner = require_owner(owner)?;
        let id = id.to_string();
        self.blocking(move |storage| {
            storage.update_tasks(|rows| {
                let index = rows
                    .iter()
                    .position(|row| {
                        row_id(row).as_deref() == Some(id.as_str())
                            && read_row(row).is_some_and(|record| record.owner_id == owner)
                    })
                    .ok_or_else(|| Error::NotFound(id.clone()))?;
                rows.remove(index);
                Ok(())
            })
        })
        .await
    }

    async fn subscribe(&self, owner: &str) -> Result<Subscription> {
        let owner = require_owner(owner)?;
        let root = self.storage.root().to_path_buf();
        std::fs::create_dir_all(&root)?;

        let initial = {
            let owner = owner.clone();
            self.blocking(move |storage| snapshot(&storage, &owner)).await?
        };

        let (tick_tx, mut tick_rx) = mpsc::unbounded_channel::<()>();
        let mut watcher: RecommendedWatcher =
            notify::recommended_watcher(move |res: notify::Result<notify::Event>| match res {
                Ok(event) => {
                    let touches_tasks = event
                        .paths
                        .iter()
                        .any(|path| path.file_name().is_some_and(|name| name == TASKS_FILE));
                    if touches_tasks {
                        let _ = tick_tx.send(());
                    }
                }
                Err(err) => warn!(error = %err, "task file watch error"),
            })?;
        watcher.watch(&root, RecursiveMode::NonRecursive)?;

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let storage = self.storage.clone();
        tokio::spawn(async move {
            let mut current = initial;
            let debounce = Duration::from_millis(WATCH_DEBOUNCE_MS);
            while tick_rx.recv().await.is_some() {
                tokio::time::sleep(debounce).await;
                while tick_rx.try_recv().is_ok() {}

                let reader = storage.clone();
                let owner = owner.clone();
                let next = match tokio::task::spawn_blocking(move || snapshot(&reader, &owner)).await
                {
                    Ok(Ok(next)) => next,
                    Ok(Err(err)) => {
                        warn!(error = %err, "failed to re-read task file");
                        continue;
                    }
                    Err(err) => {
                        warn!(error = %err, "task file reader panicked");
                        continue;
                    }
                };

                let events = match diff_snapshots(&current, &next) {
                    Ok(events) => events,
                    Err(err) => {
                        warn!(error = %err, "failed to diff task snapshots");
                        continue;
                    }
                };
                current = next;
                for event in events {
                    if event_tx.send(event).is_err() {
                        return;
                    }
                }
            }
            debug!("task file watch ended");
        });

        Ok(Subscription::with_keepalive(event_rx, watcher))
    }
}
