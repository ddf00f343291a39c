//! The seam between the sync core and the hosted task service.
//!
//! The service is a black box: CRUD calls that return records or errors, and
//! a subscription that pushes change events for one owner's records.
//! Implementations must hand back records already coerced with
//! [`TaskRecord::from_value`]; push payloads stay loosely typed and are coerced
//! by the listener.

use std::any::Any;
use std::future::Future;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::record::{parse_id, NewTask, TaskPatch, TaskRecord};
use crate::store::StoreEvent;

pub trait TaskService: Send + Sync + 'static {
    fn fetch_all(&self, owner: &str) -> impl Future<Output = Result<Vec<TaskRecord>>> + Send;

    /// The service assigns the identifier and timestamps.
    fn insert(&self, owner: &str, task: &NewTask)
        -> impl Future<Output = Result<TaskRecord>> + Send;

    fn update(
        &self,
        owner: &str,
        id: &str,
        patch: &TaskPatch,
    ) -> impl Future<Output = Result<TaskRecord>> + Send;

    fn delete(&self, owner: &str, id: &str) -> impl Future<Output = Result<()>> + Send;

    fn subscribe(&self, owner: &str) -> impl Future<Output = Result<Subscription>> + Send;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// A push notification as delivered by the service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    #[serde(rename = "type")]
    pub kind: ChangeKind,
    /// Record object for inserts and updates; a bare id or an object with an
    /// `id` for deletes.
    pub payload: Value,
}

impl ChangeEvent {
    pub fn insert(record: &TaskRecord) -> Result<Self> {
        Ok(Self {
            kind: ChangeKind::Insert,
            payload: record.to_value()?,
        })
    }

    pub fn update(record: &TaskRecord) -> Result<Self> {
        Ok(Self {
            kind: ChangeKind::Update,
            payload: record.to_value()?,
        })
    }

    pub fn delete(id: &str) -> Self {
        Self {
            kind: ChangeKind::Delete,
            payload: Value::String(id.to_string()),
        }
    }

    /// Coerce into a store event. Deletes only need the identifier.
    pub fn to_store_event(&self) -> Result<StoreEvent> {
        match self.kind {
            ChangeKind::Insert => Ok(StoreEvent::Inserted(TaskRecord::from_value(&self.payload)?)),
            ChangeKind::Update => Ok(StoreEvent::Updated(TaskRecord::from_value(&self.payload)?)),
            ChangeKind::Delete => Ok(StoreEvent::Removed(parse_id(&self.payload)?)),
        }
    }

    /// Owner named in the payload, if any. Deletes usually carry none.
    pub fn owner(&self) -> Option<&str> {
        let object = self.payload.as_object()?;
        object
            .get("owner_id")
            .or_else(|| object.get("user_id"))
            .and_then(Value::as_str)
    }
}

/// A live subscription. The stream ending means the connection was lost.
pub struct Subscription {
    events: mpsc::UnboundedReceiver<ChangeEvent>,
    _keepalive: Option<Box<dyn Any + Send>>,
}

impl Subscription {
    pub fn new(events: mpsc::UnboundedReceiver<ChangeEvent>) -> Self {
        Self {
            events,
            _keepalive: None,
        }
    }

    /// Tie a resource (for example a file watcher) to the subscription's lifetime.
    pub fn with_keepalive(
        events: mpsc::UnboundedReceiver<ChangeEvent>,
        keepalive: impl Any + Send,
    ) -> Self {
        Self {
            events,
            _keepalive: Some(Box::new(keepalive)),
        }
    }

    pub async fn next(&mut self) -> Option<ChangeEvent> {
        self.events.recv().await
    }

    /// Unsubscribe. Dropping the subscription has the same effect.
    pub fn close(mut self) {
        self.events.close();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("keepalive", &self._keepalive.is_some())
            .finish()
    }
}
