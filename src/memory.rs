//! In-process task service.
//!
//! Behaves like the hosted backend: assigns ids and timestamps, scopes
//! records to their owner, and pushes change events to every subscriber of
//! that owner, including the client that made the change. Faults can be
//! injected to exercise rollback, reconnect and reconciliation paths.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use ulid::Ulid;

use crate::error::{Error, Result};
use crate::record::{NewTask, TaskPatch, TaskRecord};
use crate::service::{ChangeEvent, Subscription, TaskService};

/// A fault to inject into the next matching request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    Network(String),
    Auth(String),
    NotFound,
}

impl Fault {
    fn into_error(self, id: &str) -> Error {
        match self {
            Fault::Network(message) => Error::Network(message),
            Fault::Auth(message) => Error::Auth(message),
            Fault::NotFound => Error::NotFound(id.to_string()),
        }
    }
}

#[derive(Default)]
struct MemoryState {
    records: BTreeMap<String, TaskRecord>,
    subscribers: Vec<(String, mpsc::UnboundedSender<ChangeEvent>)>,
    faults: VecDeque<Fault>,
    latency: Option<Duration>,
    response_latency: Option<Duration>,
    session_expired: bool,
    push_paused: bool,
}

#[derive(Clone, Default)]
pub struct MemoryService {
    state: Arc<Mutex<MemoryState>>,
    requests: Arc<AtomicUsize>,
}

impl MemoryService {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fail the next CRUD or fetch request with `fault`.
    pub fn fail_next(&self, fault: Fault) {
        self.state().faults.push_back(fault);
    }

    /// Delay every request by `latency`.
    pub fn set_latency(&self, latency: Option<Duration>) {
        self.state().latency = latency;
    }

    /// Delay responses after the change is stored and pushed, so push events
    /// reach subscribers before the caller sees the confirmation.
    pub fn set_response_latency(&self, latency: Option<Duration>) {
        self.state().response_latency = latency;
    }

    /// Reject every request with an auth error until restored.
    pub fn expire_session(&self, expired: bool) {
        self.state().session_expired = expired;
    }

    /// Stop delivering push events, as if the channel silently dropped them.
    pub fn pause_push(&self, paused: bool) {
        self.state().push_paused = paused;
    }

    /// Sever every live subscription.
    pub fn disconnect_all(&self) {
        self.state().subscribers.clear();
    }

    pub fn subscriber_count(&self) -> usize {
        let mut state = self.state();
        state.subscribers.retain(|(_, tx)| !tx.is_closed());
        state.subscribers.len()
    }

    /// Number of requests that reached the service.
    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    pub fn records(&self, owner: &str) -> Vec<TaskRecord> {
        self.state()
            .records
            .values()
            .filter(|record| record.owner_id == owner)
            .cloned()
            .collect()
    }

    /// A change made by another client: stored and pushed to subscribers.
    pub fn external_insert(&self, owner: &str, task: &NewTask) -> Result<TaskRecord> {
        let task = task.validate()?;
        let mut state = self.state();
        let record = new_record(owner, &task);
        state.records.insert(record.id.clone(), record.clone());
        broadcast(&mut state, owner, ChangeEvent::insert(&record)?);
        Ok(record)
    }

    pub fn external_update(&self, owner: &str, id: &str, patch: &TaskPatch) -> Result<TaskRecord> {
        let patch = patch.validate()?;
        let mut state = self.state();
        let record = apply_patch(&mut state, owner, id, &patch)?;
        broadcast(&mut state, owner, ChangeEvent::update(&record)?);
        Ok(record)
    }

    pub fn external_delete(&self, owner: &str, id: &str) -> Result<()> {
        let mut state = self.state();
        remove_record(&mut state, owner, id)?;
        broadcast(&mut state, owner, ChangeEvent::delete(id));
        Ok(())
    }

    /// Push a raw event to an owner's subscribers without touching storage.
    pub fn push_raw(&self, owner: &str, event: ChangeEvent) {
        broadcast(&mut self.state(), owner, event);
    }

    async fn begin(&self, owner: &str, id: &str) -> Result<()> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        let latency = self.state().latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        let mut state = self.state();
        if state.session_expired || owner.trim().is_empty() {
            return Err(Error::Auth("session is not valid".to_string()));
        }
        if let Some(fault) = state.faults.pop_front() {
            return Err(fault.into_error(id));
        }
        Ok(())
    }

    async fn respond<T>(&self, value: T) -> Result<T> {
        let latency = self.state().response_latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        Ok(value)
    }
}

impl TaskService for MemoryService {
    async fn fetch_all(&self, owner: &str) -> Result<Vec<TaskRecord>> {
        self.begin(owner, "*").await?;
        Ok(self.records(owner))
    }

    async fn insert(&self, owner: &str, task: &NewTask) -> Result<TaskRecord> {
        self.begin(owner, "new").await?;
        let task = task.validate()?;
        let record = {
            let mut state = self.state();
            let record = new_record(owner, &task);
            state.records.insert(record.id.clone(), record.clone());
            broadcast(&mut state, owner, ChangeEvent::insert(&record)?);
            record
        };
        self.respond(record).await
    }

    async fn update(&self, owner: &str, id: &str, patch: &TaskPatch) -> Result<TaskRecord> {
        self.begin(owner, id).await?;
        let patch = patch.validate()?;
        let record = {
            let mut state = self.state();
            let record = apply_patch(&mut state, owner, id, &patch)?;
            broadcast(&mut state, owner, ChangeEvent::update(&record)?);
            record
        };
        self.respond(record).await
    }

    async fn delete(&self, owner: &str, id: &str) -> Result<()> {
        self.begin(owner, id).await?;
        {
            let mut state = self.state();
            remove_record(&mut state, owner, id)?;
            broadcast(&mut state, owner, ChangeEvent::delete(id));
        }
        self.respond(()).await
    }

    async fn subscribe(&self, owner: &str) -> Result<Subscription> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state();
        if state.session_expired || owner.trim().is_empty() {
            return Err(Error::Auth("session is not valid".to_string()));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        state.subscribers.push((owner.to_string(), tx));
        Ok(Subscription::new(rx))
    }
}

fn new_record(owner: &str, task: &NewTask) -> TaskRecord {
    let now = Utc::now();
    TaskRecord {
        id: Ulid::new().to_string().to_lowercase(),
        title: task.title.clone(),
        description: task.description.clone(),
        completed: false,
        created_at: now,
        updated_at: now,
        owner_id: owner.to_string(),
    }
}

fn apply_patch(
    state: &mut MemoryState,
    owner: &str,
    id: &str,
    patch: &TaskPatch,
) -> Result<TaskRecord> {
    let record = state
        .records
        .get_mut(id)
        .filter(|record| record.owner_id == owner)
        .ok_or_else(|| Error::NotFound(id.to_string()))?;
    let mut next = record.patched(patch);
    // Keep updated_at strictly increasing even within one clock tick.
    let now = Utc::now();
    next.updated_at = if now > record.updated_at {
        now
    } else {
        record.updated_at + chrono::Duration::microseconds(1)
    };
    *record = next.clone();
    Ok(next)
}

fn remove_record(state: &mut MemoryState, owner: &str, id: &str) -> Result<()> {
    match state.records.get(id) {
        Some(record) if record.owner_id == owner => {
            state.records.remove(id);
            Ok(())
        }
        _ => Err(Error::NotFound(id.to_string())),
    }
}

fn broadcast(state: &mut MemoryState, owner: &str, event: ChangeEvent) {
    if state.push_paused {
        return;
    }
    state
        .subscribers
        .retain(|(subscriber, tx)| subscriber != owner || tx.send(event.clone()).is_ok());
}
