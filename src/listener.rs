//! Change-event listener.
//!
//! Keeps one subscription open for the session owner and applies every pushed
//! event to the store. A lost subscription is retried with exponential backoff,
//! and each successful subscribe is followed by a full reconciliation fetch so
//! changes missed while disconnected still arrive.

use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::exponential::{ExponentialBackoff, ExponentialBackoffBuilder};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::SyncClient;
use crate::config::{BackoffConfig, SyncConfig};
use crate::error::{Error, Result};
use crate::notice::{Notice, NoticeKind};
use crate::service::{ChangeEvent, Subscription, TaskService};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnected,
    Stopped,
}

/// How a live subscription ended.
enum Outcome {
    Stop,
    Lost,
}

pub struct ChangeListener<S> {
    client: SyncClient<S>,
    cancel: CancellationToken,
}

/// Owns a running listener. Dropping the handle stops the listener.
pub struct ListenerHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
    state: watch::Receiver<ConnectionState>,
}

impl ListenerHandle {
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Wait until the listener reports `target`.
    pub async fn wait_for(&mut self, target: ConnectionState) -> Result<()> {
        self.state
            .wait_for(|state| *state == target)
            .await
            .map(|_| ())
            .map_err(|_| Error::OperationFailed("listener exited".to_string()))
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop the listener and wait for it to drop its subscription.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Err(err) = (&mut self.task).await {
            warn!(error = %err, "listener task did not exit cleanly");
        }
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn build_backoff(config: &BackoffConfig) -> Result<ExponentialBackoff<backoff::SystemClock>> {
    Ok(ExponentialBackoffBuilder::new()
        .with_initial_interval(config.initial()?)
        .with_max_interval(config.max()?)
        .with_multiplier(config.multiplier)
        .with_max_elapsed_time(None)
        .build())
}

async fn tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

impl<S: TaskService> ChangeListener<S> {
    /// The listener stops on its own cancel or when the session ends.
    pub fn new(client: SyncClient<S>) -> Self {
        let cancel = client.session_token().child_token();
        Self { client, cancel }
    }

    pub fn spawn(self) -> ListenerHandle {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        let cancel = self.cancel.clone();
        let task = tokio::spawn(self.run(state_tx));
        ListenerHandle {
            cancel,
            task,
            state: state_rx,
        }
    }

    fn sync(&self) -> &SyncConfig {
        self.client.sync_config()
    }

    async fn run(self, state: watch::Sender<ConnectionState>) {
        let mut backoff = match build_backoff(&self.sync().backoff) {
            Ok(backoff) => backoff,
            Err(err) => {
                warn!(error = %err, "invalid backoff settings, using defaults");
                ExponentialBackoff::default()
            }
        };
        let interval = match self.sync().reconcile_interval() {
            Ok(interval) => interval,
            Err(err) => {
                warn!(error = %err, "invalid reconcile interval, periodic sync disabled");
                None
            }
        };
        let owner = self.client.owner().to_string();

        while !self.cancel.is_cancelled() {
            state.send_replace(ConnectionState::Connecting);
            debug!(owner = %owner, "subscribing to task changes");

            let subscribed = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                result = self.client.call(self.client.service().subscribe(&owner)) => result,
            };

            let subscription = match subscribed {
                Ok(subscription) => subscription,
                Err(err) if err.requires_reauth() => {
                    warn!(owner = %owner, error = %err, "subscription rejected");
                    self.client.notify(Notice::reauth_required(&err));
                    break;
                }
                Err(Error::SessionEnded) => break,
                Err(err) => {
                    warn!(owner = %owner, error = %err, "subscribe failed");
                    state.send_replace(ConnectionState::Disconnected);
                    if !self.pause(&mut backoff).await {
                        break;
                    }
                    continue;
                }
            };

            backoff.reset();
            state.send_replace(ConnectionState::Connected);
            info!(owner = %owner, "listening for task changes");
            self.client
                .notify(Notice::new(NoticeKind::Connected, "Live updates connected"));

            if self.sync().reconcile_on_resubscribe && !self.reconcile().await {
                break;
            }

            match self.pump(subscription, interval).await {
                Outcome::Stop => break,
                Outcome::Lost => {
                    warn!(owner = %owner, "subscription lost");
                    state.send_replace(ConnectionState::Disconnected);
                    self.client.notify(
                        Notice::new(NoticeKind::Disconnected, "Live updates lost, reconnecting")
                            .retryable(true),
                    );
                    if !self.pause(&mut backoff).await {
                        break;
                    }
                }
            }
        }

        state.send_replace(ConnectionState::Stopped);
        debug!(owner = %owner, "listener stopped");
    }

    /// Consume events until the subscription ends or the listener is stopped.
    async fn pump(&self, mut subscription: Subscription, every: Option<Duration>) -> Outcome {
        let mut ticker = every.map(|period| {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Outcome::Stop,
                event = subscription.next() => match event {
                    Some(event) => self.handle(&event),
                    None => return Outcome::Lost,
                },
                _ = tick(&mut ticker) => {
                    if !self.reconcile().await {
                        return Outcome::Stop;
                    }
                }
            }
        }
    }

    fn handle(&self, event: &ChangeEvent) {
        match self.client.apply_remote(event) {
            Ok(changed) => debug!(kind = ?event.kind, changed, "applied change event"),
            Err(err) => {
                warn!(kind = ?event.kind, error = %err, "dropping change event");
                self.client.notify(
                    Notice::new(NoticeKind::EventRejected, format!("Ignored a change: {err}"))
                        .with_data(serde_json::json!({
                            "kind": event.kind,
                            "payload": event.payload,
                        })),
                );
            }
        }
    }

    /// Full fetch. Returns `false` when the listener has to stop.
    async fn reconcile(&self) -> bool {
        let result = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return false,
            result = self.client.reconcile() => result,
        };
        match result {
            Ok(count) => {
                debug!(count, "reconciled with service");
                true
            }
            Err(Error::SessionEnded) => false,
            Err(err) if err.requires_reauth() => {
                warn!(error = %err, "reconcile rejected");
                self.client.notify(Notice::reauth_required(&err));
                false
            }
            Err(err) => {
                // Pushes still flow; the next resubscribe or tick retries.
                warn!(error = %err, "reconcile failed");
                true
            }
        }
    }

    /// Sleep for the next backoff step. Returns `false` if stopped meanwhile.
    async fn pause(&self, backoff: &mut ExponentialBackoff<backoff::SystemClock>) -> bool {
        let delay = backoff
            .next_backoff()
            .unwrap_or(backoff.max_interval);
        debug!(?delay, "waiting before resubscribe");
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }
}
