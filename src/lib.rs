//! tasksync - optimistic local state sync for a todo list
//!
//! The hosted service owns authentication, persistence and realtime push.
//! This library keeps the client's view of one owner's tasks consistent
//! with it while mutations are in flight and change events arrive in any
//! order.
//!
//! # Core Concepts
//!
//! - **Record Store**: idempotent, last-write-wins map of task records
//! - **Mutations**: validate, apply optimistically, confirm or roll back
//! - **Change Listener**: long-lived subscription with backoff and reconciliation
//! - **View Projection**: search, status filter and sort over the store
//!
//! # Module Organization
//!
//! - `record`: Task records, create/patch inputs, payload coercion
//! - `store`: The record store and its event semantics
//! - `service`: The service trait, change events and subscriptions
//! - `memory`: In-process service with fault injection
//! - `local`: File-backed service shared between processes
//! - `client`: Mutation entry points and session lifecycle
//! - `listener`: Change-event listener
//! - `view`: View projection and its cache
//! - `notice`: User-visible notices
//! - `config`: Configuration loading from `tasksync.toml`
//! - `error`: Error types and result aliases
//! - `storage`: Data directory layout
//! - `lock`: File locking and atomic writes
//! - `cli`: Command-line interface using clap

pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod listener;
pub mod local;
pub mod lock;
pub mod memory;
pub mod notice;
pub mod output;
pub mod record;
pub mod service;
pub mod storage;
pub mod store;
pub mod view;

pub use client::SyncClient;
pub use error::{Error, Result};
pub use record::{NewTask, TaskPatch, TaskRecord};
pub use store::{RecordStore, StoreEvent};
