// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Fire-and-forget event fan-out to subscribed daemons.
//!
//! Each subscriber owns an unbounded queue drained by its own worker
//! task: deliveries to distinct subscribers run in parallel, while one
//! subscriber always sees events in dispatch order. A dead plugin socket
//! never blocks or crashes the main flow; every delivery failure is a
//! debug log and nothing more.

use crate::process::ProcessManager;
use axle_core::{Clock, EventKind, PluginName, SystemClock};
use axle_rpc::{validate_socket_path, RpcClient, RpcError};
use parking_lot::RwLock;
use serde_json::{json, Value};
use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;

/// Deadline for one `on_event` notification write.
const NOTIFY_TIMEOUT: Duration = Duration::from_secs(5);

/// Subscription errors, raised synchronously from `subscribe`.
#[derive(Debug, Error)]
pub enum BusError {
    #[error("subscription must name at least one event")]
    EmptyEvents,

    #[error("event {0} is not in the approved set")]
    UnapprovedEvent(EventKind),

    #[error(transparent)]
    Socket(#[from] RpcError),
}

/// Public view of one plugin's subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub socket_path: PathBuf,
    pub events: BTreeSet<EventKind>,
}

struct QueuedEvent {
    kind: EventKind,
    params: Value,
}

struct SubEntry {
    info: Subscription,
    /// Dropping the sender lets the worker drain and exit.
    sender: mpsc::UnboundedSender<QueuedEvent>,
}

struct BusInner<C: Clock> {
    subscriptions: RwLock<HashMap<PluginName, SubEntry>>,
    manager: ProcessManager<C>,
    client: Arc<RpcClient>,
    clock: C,
}

/// Subscription registry plus async fan-out of approved events.
pub struct EventBus<C: Clock = SystemClock> {
    inner: Arc<BusInner<C>>,
}

impl<C: Clock> Clone for EventBus<C> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<C: Clock> EventBus<C> {
    pub fn new(manager: ProcessManager<C>, clock: C) -> Self {
        Self {
            inner: Arc::new(BusInner {
                subscriptions: RwLock::new(HashMap::new()),
                manager,
                client: Arc::new(RpcClient::new()),
                clock,
            }),
        }
    }

    /// Register (or replace) a plugin's subscription.
    ///
    /// Validates before touching the map, so a rejected subscribe leaves
    /// the registry unchanged. Duplicate event kinds collapse.
    pub fn subscribe(
        &self,
        plugin: PluginName,
        socket_path: PathBuf,
        events: &[EventKind],
    ) -> Result<(), BusError> {
        if events.is_empty() {
            return Err(BusError::EmptyEvents);
        }
        validate_socket_path(&socket_path)?;
        if let Some(event) = events.iter().find(|e| !e.is_approved()) {
            return Err(BusError::UnapprovedEvent(*event));
        }

        let events: BTreeSet<EventKind> = events.iter().copied().collect();
        let (sender, receiver) = mpsc::unbounded_channel();
        self.spawn_worker(plugin.clone(), socket_path.clone(), receiver);

        debug!(plugin = %plugin, count = events.len(), "event subscription registered");
        // Replacing an entry drops the old sender; its worker drains the
        // queue it already accepted, then exits.
        self.inner
            .subscriptions
            .write()
            .insert(plugin, SubEntry { info: Subscription { socket_path, events }, sender });
        Ok(())
    }

    /// Remove a plugin's subscription. Unknown plugins are a no-op.
    pub fn unsubscribe(&self, plugin: &PluginName) {
        self.inner.subscriptions.write().remove(plugin.as_str());
    }

    /// Current subscription for a plugin, if any.
    pub fn subscription(&self, plugin: &PluginName) -> Option<Subscription> {
        self.inner.subscriptions.read().get(plugin.as_str()).map(|entry| entry.info.clone())
    }

    /// Fan an event out to every subscriber whose set contains `kind`.
    ///
    /// Returns immediately: the event is enqueued per subscriber and the
    /// workers deliver in the background. Never raises to the caller.
    pub fn dispatch(&self, kind: EventKind, payload: Value) {
        let params = json!({
            "event_type": kind.as_str(),
            "event_data": payload,
            "timestamp": self.inner.clock.epoch_ms(),
        });

        let subscriptions = self.inner.subscriptions.read();
        for (plugin, entry) in subscriptions.iter() {
            if !entry.info.events.contains(&kind) {
                continue;
            }
            if entry.sender.send(QueuedEvent { kind, params: params.clone() }).is_err() {
                debug!(plugin = %plugin, event = %kind, "subscriber queue closed");
            }
        }
    }

    fn spawn_worker(
        &self,
        plugin: PluginName,
        socket: PathBuf,
        mut receiver: mpsc::UnboundedReceiver<QueuedEvent>,
    ) {
        let manager = self.inner.manager.clone();
        let client = Arc::clone(&self.inner.client);
        tokio::spawn(async move {
            while let Some(event) = receiver.recv().await {
                if !manager.is_running(&plugin) {
                    debug!(plugin = %plugin, event = %event.kind, "subscriber not running, skipped");
                    continue;
                }
                if let Err(e) = client
                    .notify(&socket, "on_event", Some(event.params), Some(NOTIFY_TIMEOUT))
                    .await
                {
                    debug!(plugin = %plugin, event = %event.kind, error = %e, "event delivery failed");
                }
            }
        });
    }
}

#[cfg(test)]
#[path = "bus_tests.rs"]
mod tests;
