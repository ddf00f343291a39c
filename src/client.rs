//! The sync client: mutation entry points over a shared record store.
//!
//! Each mutation validates locally, optionally shows its effect right away,
//! calls the service, and then either applies the confirmed record or rolls
//! the store back to what it showed before. A client lives for one login
//! session; [`SyncClient::logout`] abandons everything still in flight.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::error::{Error, MutationKind, Result};
use crate::listener::{ChangeListener, ListenerHandle};
use crate::notice::{Notice, NoticeKind};
use crate::record::{is_temp_id, NewTask, TaskPatch, TaskRecord};
use crate::service::{ChangeEvent, TaskService};
use crate::store::{self, RecordStore, SharedStore, StoreEvent};
use crate::view::{project, ProjectionCache, ViewState};

const NOTICE_CAPACITY: usize = 64;

/// In-flight record ids, each with the state a rollback restores.
type InFlightMap = HashMap<String, Option<TaskRecord>>;

/// An optimistic create waiting for its server record.
struct PendingCreate {
    temp_id: String,
    task: NewTask,
}

impl PendingCreate {
    fn matches(&self, owner: &str, record: &TaskRecord) -> bool {
        record.owner_id == owner
            && record.title == self.task.title
            && record.description == self.task.description
            && !record.is_temporary()
    }
}

struct Inner<S> {
    service: S,
    owner: String,
    store: SharedStore,
    in_flight: Mutex<InFlightMap>,
    pending_creates: Mutex<Vec<PendingCreate>>,
    session: CancellationToken,
    sync: SyncConfig,
    timeout: Duration,
    notices: broadcast::Sender<Notice>,
}

pub struct SyncClient<S> {
    inner: Arc<Inner<S>>,
}

impl<S> Clone for SyncClient<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Marks a record as having a mutation in flight until dropped.
struct InFlight<'a> {
    map: &'a Mutex<InFlightMap>,
    id: String,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.map
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.id);
    }
}

/// Keeps an optimistic create matchable against pushes until dropped.
struct TrackedCreate<'a> {
    list: &'a Mutex<Vec<PendingCreate>>,
    temp_id: String,
}

impl Drop for TrackedCreate<'_> {
    fn drop(&mut self) {
        self.list
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|pending| pending.temp_id != self.temp_id);
    }
}

impl<S: TaskService> SyncClient<S> {
    pub fn new(service: S, owner: impl Into<String>, config: &SyncConfig) -> Result<Self> {
        let owner = owner.into().trim().to_string();
        if owner.is_empty() {
            return Err(Error::Auth("no owner is signed in".to_string()));
        }
        let timeout = config.mutation_timeout()?;
        let (notices, _) = broadcast::channel(NOTICE_CAPACITY);
        Ok(Self {
            inner: Arc::new(Inner {
                service,
                owner,
                store: store::shared(RecordStore::new()),
                in_flight: Mutex::new(HashMap::new()),
                pending_creates: Mutex::new(Vec::new()),
                session: CancellationToken::new(),
                sync: config.clone(),
                timeout,
                notices,
            }),
        })
    }

    pub fn owner(&self) -> &str {
        &self.inner.owner
    }

    pub fn service(&self) -> &S {
        &self.inner.service
    }

    pub fn sync_config(&self) -> &SyncConfig {
        &self.inner.sync
    }

    pub fn store(&self) -> &SharedStore {
        &self.inner.store
    }

    fn store_guard(&self) -> MutexGuard<'_, RecordStore> {
        store::lock(&self.inner.store)
    }

    /// Read snapshot of the store, ordered by creation time.
    pub fn records(&self) -> Vec<TaskRecord> {
        self.store_guard().records()
    }

    pub fn get(&self, id: &str) -> Option<TaskRecord> {
        self.store_guard().get(id).cloned()
    }

    pub fn resolve_id(&self, input: &str) -> Result<String> {
        self.store_guard().resolve_id(input)
    }

    /// The list the UI renders.
    pub fn projected(&self, view: &ViewState) -> Vec<TaskRecord> {
        project(&self.store_guard().records(), view)
    }

    pub fn projected_cached(&self, cache: &mut ProjectionCache, view: &ViewState) -> Vec<TaskRecord> {
        cache.get(&self.store_guard(), view).to_vec()
    }

    pub fn is_pending(&self, id: &str) -> bool {
        self.in_flight().contains_key(id)
    }

    pub fn subscribe_notices(&self) -> broadcast::Receiver<Notice> {
        self.inner.notices.subscribe()
    }

    pub(crate) fn notify(&self, notice: Notice) {
        // No receivers is fine.
        let _ = self.inner.notices.send(notice);
    }

    pub fn session_token(&self) -> CancellationToken {
        self.inner.session.clone()
    }

    pub fn is_logged_out(&self) -> bool {
        self.inner.session.is_cancelled()
    }

    /// End the session: stop listeners, forget in-flight work, clear the store.
    pub fn logout(&self) {
        self.inner.session.cancel();
        self.in_flight().clear();
        self.pending_creates().clear();
        self.store_guard().clear();
        info!(owner = %self.inner.owner, "session ended");
    }

    /// Start the change listener for this session.
    pub fn listen(&self) -> ListenerHandle {
        ChangeListener::new(self.clone()).spawn()
    }

    // =========================================================================
    // Loading
    // =========================================================================

    /// Replace the store with a bulk fetch. In optimistic mode, records with
    /// a mutation still in flight keep their local state, and their rollback
    /// target moves to the fetched version.
    pub async fn load(&self) -> Result<usize> {
        self.ensure_session()?;
        let records = self
            .call(self.inner.service.fetch_all(&self.inner.owner))
            .await?;
        self.ensure_session()?;

        let mut store = self.store_guard();
        let local = if self.optimistic() {
            self.local_state(&store, &records)
        } else {
            Vec::new()
        };
        store.load(records);
        for (id, record) in local {
            store.put_local(&id, record);
        }
        let count = store.len();
        debug!(owner = %self.inner.owner, count, "store loaded");
        Ok(count)
    }

    /// Local state to carry over a bulk load: in-flight records as shown now,
    /// and create placeholders whose server record is not in `fetched`.
    fn local_state(
        &self,
        store: &RecordStore,
        fetched: &[TaskRecord],
    ) -> Vec<(String, Option<TaskRecord>)> {
        let mut local = Vec::new();
        for (id, prior) in self.in_flight().iter_mut() {
            if is_temp_id(id) {
                continue;
            }
            *prior = fetched.iter().find(|record| &record.id == id).cloned();
            local.push((id.clone(), store.get(id).cloned()));
        }

        let settled: HashSet<String> = fetched
            .iter()
            .filter_map(|record| self.take_pending_create(store, record))
            .collect();
        local.extend(
            store
                .records()
                .into_iter()
                .filter(|record| record.is_temporary() && !settled.contains(&record.id))
                .map(|record| (record.id.clone(), Some(record))),
        );
        local
    }

    /// Re-read everything from the service after a gap in push delivery.
    pub async fn reconcile(&self) -> Result<usize> {
        let count = self.load().await?;
        self.notify(
            Notice::new(NoticeKind::Reconciled, format!("Synced {count} tasks"))
                .with_data(serde_json::json!({ "count": count })),
        );
        Ok(count)
    }

    /// Apply a pushed change event. Returns whether the store changed.
    pub fn apply_remote(&self, event: &ChangeEvent) -> Result<bool> {
        if let Some(owner) = event.owner() {
            if owner != self.inner.owner {
                return Err(Error::Payload(format!(
                    "event for owner '{owner}' delivered to '{}'",
                    self.inner.owner
                )));
            }
        }
        let event = event.to_store_event()?;
        let mut store = self.store_guard();
        if let StoreEvent::Inserted(record) | StoreEvent::Updated(record) = &event {
            // Our own create pushed ahead of its confirmation.
            if let Some(temp_id) = self.take_pending_create(&store, record) {
                debug!(temp = %temp_id, id = %record.id, "push settled pending create");
                store.discard_local(&temp_id);
            }
        }
        Ok(store.apply(event))
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    pub async fn create(&self, task: NewTask) -> Result<TaskRecord> {
        let op = MutationKind::Create;
        self.ensure_session()?;
        let task = task.validate().map_err(|err| self.reject(op, "new", err))?;

        let temp = TaskRecord::optimistic(&self.inner.owner, &task);
        let _guard = self.claim(op, &temp.id)?;
        let _tracked = self.optimistic().then(|| self.track_create(&temp.id, &task));
        if self.optimistic() {
            self.store_guard().put_local(&temp.id, Some(temp.clone()));
        }
        debug!(op = %op, id = %temp.id, "sending create");

        let result = self
            .call(self.inner.service.insert(&self.inner.owner, &task))
            .await;
        self.ensure_session()?;

        match result {
            Ok(record) => {
                let mut store = self.store_guard();
                store.discard_local(&temp.id);
                store.apply(StoreEvent::Inserted(record.clone()));
                drop(store);
                debug!(op = %op, id = %record.id, "create confirmed");
                Ok(record)
            }
            Err(err) => {
                self.store_guard().discard_local(&temp.id);
                Err(self.failed(op, &temp.id, err))
            }
        }
    }

    pub async fn update(&self, id: &str, patch: TaskPatch) -> Result<TaskRecord> {
        let op = MutationKind::Update;
        self.ensure_session()?;
        let patch = patch.validate().map_err(|err| self.reject(op, id, err))?;
        let guard = self.claim(op, id)?;
        self.patch_record(op, id, patch, guard).await
    }

    /// Flip the completion flag. The service receives the absolute value.
    pub async fn toggle_complete(&self, id: &str) -> Result<TaskRecord> {
        let op = MutationKind::ToggleComplete;
        self.ensure_session()?;
        let guard = self.claim(op, id)?;
        let completed = self
            .get(id)
            .map(|record| record.completed)
            .ok_or_else(|| self.reject(op, id, Error::NotFound(id.to_string())))?;
        self.patch_record(op, id, TaskPatch::completed(!completed), guard)
            .await
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        let op = MutationKind::Delete;
        self.ensure_session()?;
        let _guard = self.claim(op, id)?;
        let prior = self
            .get(id)
            .ok_or_else(|| self.reject(op, id, Error::NotFound(id.to_string())))?;
        self.remember_prior(id, prior);
        if self.optimistic() {
            self.store_guard().put_local(id, None);
        }
        debug!(op = %op, id, "sending delete");

        let result = self
            .call(self.inner.service.delete(&self.inner.owner, id))
            .await;
        self.ensure_session()?;

        match result {
            Ok(()) | Err(Error::NotFound(_)) => {
                self.store_guard()
                    .apply(StoreEvent::Removed(id.to_string()));
                debug!(op = %op, id, "delete confirmed");
                Ok(())
            }
            Err(err) => {
                let mut store = self.store_guard();
                if self.optimistic() && !store.contains(id) {
                    store.rollback(id, self.prior_of(id));
                }
                drop(store);
                Err(self.failed(op, id, err))
            }
        }
    }

    async fn patch_record(
        &self,
        op: MutationKind,
        id: &str,
        patch: TaskPatch,
        _guard: InFlight<'_>,
    ) -> Result<TaskRecord> {
        let prior = self
            .get(id)
            .ok_or_else(|| self.reject(op, id, Error::NotFound(id.to_string())))?;
        let assumed = prior.patched(&patch);
        self.remember_prior(id, prior);
        if self.optimistic() {
            self.store_guard().put_local(id, Some(assumed.clone()));
        }
        debug!(op = %op, id, "sending update");

        let result = self
            .call(self.inner.service.update(&self.inner.owner, id, &patch))
            .await;
        self.ensure_session()?;

        match result {
            Ok(record) => {
                self.store_guard()
                    .apply(StoreEvent::Updated(record.clone()));
                debug!(op = %op, id, "update confirmed");
                Ok(record)
            }
            Err(err) => {
                let mut store = self.store_guard();
                // Leave newer pushed state alone.
                if self.optimistic() && store.get(id) == Some(&assumed) {
                    store.rollback(id, self.prior_of(id));
                }
                drop(store);
                Err(self.failed(op, id, err))
            }
        }
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    fn optimistic(&self) -> bool {
        self.inner.sync.optimistic
    }

    fn in_flight(&self) -> MutexGuard<'_, InFlightMap> {
        self.inner
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn remember_prior(&self, id: &str, prior: TaskRecord) {
        if let Some(slot) = self.in_flight().get_mut(id) {
            *slot = Some(prior);
        }
    }

    fn prior_of(&self, id: &str) -> Option<TaskRecord> {
        self.in_flight().get(id).cloned().flatten()
    }

    fn pending_creates(&self) -> MutexGuard<'_, Vec<PendingCreate>> {
        self.inner
            .pending_creates
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn track_create(&self, temp_id: &str, task: &NewTask) -> TrackedCreate<'_> {
        self.pending_creates().push(PendingCreate {
            temp_id: temp_id.to_string(),
            task: task.clone(),
        });
        TrackedCreate {
            list: &self.inner.pending_creates,
            temp_id: temp_id.to_string(),
        }
    }

    /// Claim the pending create that `record` confirms, if any. Records the
    /// store already knows about never match.
    fn take_pending_create(&self, store: &RecordStore, record: &TaskRecord) -> Option<String> {
        if store.contains(&record.id)
            || store.is_tombstoned(&record.id)
            || self.in_flight().contains_key(&record.id)
        {
            return None;
        }
        let mut pending = self.pending_creates();
        let index = pending
            .iter()
            .position(|create| create.matches(&self.inner.owner, record))?;
        Some(pending.remove(index).temp_id)
    }

    fn ensure_session(&self) -> Result<()> {
        if self.inner.session.is_cancelled() {
            return Err(Error::SessionEnded);
        }
        Ok(())
    }

    fn claim(&self, op: MutationKind, id: &str) -> Result<InFlight<'_>> {
        {
            let mut in_flight = self.in_flight();
            if in_flight.contains_key(id) {
                drop(in_flight);
                return Err(self.reject(op, id, Error::Busy(id.to_string())));
            }
            in_flight.insert(id.to_string(), None);
        }
        Ok(InFlight {
            map: &self.inner.in_flight,
            id: id.to_string(),
        })
    }

    /// Bound a service call by the timeout and the session.
    pub(crate) async fn call<T>(&self, request: impl Future<Output = Result<T>>) -> Result<T> {
        let timeout = self.inner.timeout;
        tokio::select! {
            biased;
            _ = self.inner.session.cancelled() => Err(Error::SessionEnded),
            outcome = tokio::time::timeout(timeout, request) => match outcome {
                Ok(result) => result,
                Err(_) => Err(Error::Timeout(timeout)),
            },
        }
    }

    /// A failure found before anything was sent.
    fn reject(&self, op: MutationKind, id: &str, err: Error) -> Error {
        debug!(op = %op, id, error = %err, "mutation rejected locally");
        self.notify(Notice::mutation_failed(op, id, &err));
        err
    }

    /// A failure reported by the service, after rollback.
    fn failed(&self, op: MutationKind, id: &str, cause: Error) -> Error {
        let err = Error::mutation(op, id, cause);
        warn!(op = %op, id, error = %err, "mutation failed");
        self.notify(Notice::mutation_failed(op, id, &err));
        if err.requires_reauth() {
            self.notify(Notice::reauth_required(err.cause()));
        }
        err
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{Fault, MemoryService};

    fn client(service: &MemoryService) -> SyncClient<MemoryService> {
        SyncClient::new(service.clone(), "alice", &SyncConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn blank_owner_is_rejected() {
        let result = SyncClient::new(MemoryService::new(), " ", &SyncConfig::default());
        assert!(matches!(result, Err(Error::Auth(_))));
    }

    #[tokio::test]
    async fn create_replaces_temporary_record() {
        let service = MemoryService::new();
        let client = client(&service);
        let record = client.create(NewTask::new("Buy milk")).await.unwrap();

        let records = client.records();
        assert_eq!(records, vec![record.clone()]);
        assert!(!record.is_temporary());
    }

    #[tokio::test]
    async fn validation_never_reaches_service() {
        let service = MemoryService::new();
        let client = client(&service);
        let err = client.create(NewTask::new("   ")).await.unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
        assert_eq!(service.request_count(), 0);
        assert!(client.records().is_empty());
    }

    #[tokio::test]
    async fn failed_update_rolls_back() {
        let service = MemoryService::new();
        let client = client(&service);
        let record = client.create(NewTask::new("Buy milk")).await.unwrap();

        service.fail_next(Fault::Network("offline".to_string()));
        let err = client
            .update(&record.id, TaskPatch::title("Buy oat milk"))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(client.get(&record.id), Some(record));
        assert!(!client.is_pending(&client.records()[0].id));
    }

    #[tokio::test]
    async fn logout_clears_store() {
        let service = MemoryService::new();
        let client = client(&service);
        client.create(NewTask::new("Buy milk")).await.unwrap();
        client.logout();
        assert!(client.records().is_empty());
        assert!(matches!(
            client.create(NewTask::new("Again")).await,
            Err(Error::SessionEnded)
        ));
    }
}
