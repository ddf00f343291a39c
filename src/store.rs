//! The record store: the single in-memory source of truth for rendering.
//!
//! Every writer (mutation confirmations, push events, bulk reloads) goes
//! through [`RecordStore::apply`] or one of the local-write helpers used by the
//! mutation protocol. Events are idempotent and last-write-wins on
//! `updated_at`, and confirmed removals leave a tombstone, so the same set of
//! events converges to the same state in any order.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::{Error, Result};
use crate::record::TaskRecord;

/// Tombstones kept between bulk loads; the oldest are forgotten first.
pub const MAX_TOMBSTONES: usize = 1024;

/// A confirmed change to apply to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    Inserted(TaskRecord),
    Updated(TaskRecord),
    Removed(String),
}

impl StoreEvent {
    pub fn id(&self) -> &str {
        match self {
            StoreEvent::Inserted(record) | StoreEvent::Updated(record) => &record.id,
            StoreEvent::Removed(id) => id,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RecordStore {
    records: HashMap<String, TaskRecord>,
    tombstones: HashSet<String>,
    tombstone_order: VecDeque<String>,
    revision: u64,
}

/// Store handle shared by the client, the listener and readers.
pub type SharedStore = Arc<Mutex<RecordStore>>;

pub fn shared(store: RecordStore) -> SharedStore {
    Arc::new(Mutex::new(store))
}

/// Lock the shared store. Store operations never panic mid-update, so a
/// poisoned lock still guards a consistent map.
pub fn lock(store: &SharedStore) -> MutexGuard<'_, RecordStore> {
    store.lock().unwrap_or_else(PoisonError::into_inner)
}

impl RecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a confirmed event. Returns `true` when the visible state changed.
    pub fn apply(&mut self, event: StoreEvent) -> bool {
        let changed = match event {
            StoreEvent::Inserted(record) => {
                if self.tombstones.contains(&record.id) || self.records.contains_key(&record.id) {
                    false
                } else {
                    self.records.insert(record.id.clone(), record);
                    true
                }
            }
            StoreEvent::Updated(record) => {
                if self.tombstones.contains(&record.id) {
                    false
                } else {
                    match self.records.get(&record.id) {
                        Some(existing) if existing.updated_at > record.updated_at => false,
                        Some(existing) if *existing == record => false,
                        _ => {
                            self.records.insert(record.id.clone(), record);
                            true
                        }
                    }
                }
            }
            StoreEvent::Removed(id) => {
                let removed = self.records.remove(&id).is_some();
                self.bury(id);
                removed
            }
        };
        if changed {
            self.revision += 1;
        }
        changed
    }

    /// Replace the contents with an authoritative bulk fetch.
    pub fn load(&mut self, records: Vec<TaskRecord>) {
        self.records = records
            .into_iter()
            .map(|record| (record.id.clone(), record))
            .collect();
        self.tombstones.clear();
        self.tombstone_order.clear();
        self.revision += 1;
    }

    pub fn clear(&mut self) {
        self.records.clear();
        self.tombstones.clear();
        self.tombstone_order.clear();
        self.revision += 1;
    }

    fn bury(&mut self, id: String) {
        if !self.tombstones.insert(id.clone()) {
            return;
        }
        self.tombstone_order.push_back(id);
        while self.tombstone_order.len() > MAX_TOMBSTONES {
            if let Some(oldest) = self.tombstone_order.pop_front() {
                self.tombstones.remove(&oldest);
            }
        }
    }

    /// Write an unconfirmed local state for `id`. `None` hides the record.
    /// Local writes never create tombstones.
    pub fn put_local(&mut self, id: &str, record: Option<TaskRecord>) {
        match record {
            Some(record) => {
                self.records.insert(id.to_string(), record);
            }
            None => {
                self.records.remove(id);
            }
        }
        self.revision += 1;
    }

    /// Drop an unconfirmed record (a temporary create placeholder).
    pub fn discard_local(&mut self, id: &str) -> bool {
        let removed = self.records.remove(id).is_some();
        if removed {
            self.revision += 1;
        }
        removed
    }

    /// Restore the state `id` had before an optimistic change, unless a
    /// confirmed removal arrived in the meantime.
    pub fn rollback(&mut self, id: &str, prior: Option<TaskRecord>) {
        if self.tombstones.contains(id) {
            return;
        }
        match prior {
            Some(record) => {
                if self.records.get(id) != Some(&record) {
                    self.records.insert(id.to_string(), record);
                    self.revision += 1;
                }
            }
            None => {
                self.discard_local(id);
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<&TaskRecord> {
        self.records.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.records.contains_key(id)
    }

    pub fn is_tombstoned(&self, id: &str) -> bool {
        self.tombstones.contains(id)
    }

    pub fn tombstone_count(&self) -> usize {
        self.tombstones.len()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Read snapshot ordered by creation time, then id.
    pub fn records(&self) -> Vec<TaskRecord> {
        let mut records: Vec<TaskRecord> = self.records.values().cloned().collect();
        records.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        records
    }

    /// Resolve a full id or a unique case-insensitive prefix.
    pub fn resolve_id(&self, input: &str) -> Result<String> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(Error::InvalidArgument("task id cannot be empty".to_string()));
        }
        if self.records.contains_key(trimmed) {
            return Ok(trimmed.to_string());
        }

        let needle = trimmed.to_ascii_lowercase();
        let mut exact = Vec::new();
        let mut matches = Vec::new();
        for id in self.records.keys() {
            let id_norm = id.to_ascii_lowercase();
            if id_norm == needle {
                exact.push(id.clone());
            } else if id_norm.starts_with(&needle) {
                matches.push(id.clone());
            }
        }

        if exact.len() == 1 {
            return Ok(exact.remove(0));
        }
        matches.extend(exact);
        matches.sort();
        match matches.len() {
            0 => Err(Error::NotFound(trimmed.to_string())),
            1 => Ok(matches.remove(0)),
            _ => Err(Error::InvalidArgument(format!(
                "ambiguous task id '{}': {}",
                trimmed,
                matches.join(", ")
            ))),
        }
    }
}
