// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Subscription registry and replay.
//!
//! The registry remembers every consumer subscription independently of the
//! server-side ids, which change on every recreation. Keys are allocated in
//! increasing order and entries are kept in a `BTreeMap`, so iteration order
//! is registration order.
//!
//! Each entry owns the sending side of its forwarder inbox. Data changes and
//! fault markers travel through the same inbox, which keeps a fault marker
//! between the data produced before the failure and the data produced after
//! the replay.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::error::{ConsumerError, SubscriptionError, UaError, UaResult};
use crate::types::{
    DataChangeMessage, FailureKind, NodeId, StatusCode, SubscriptionParameters,
};

use super::transport::{with_deadline, MonitoredItemCreate, SessionToken, UaTransport};

// =============================================================================
// SubscriptionKey
// =============================================================================

/// Stable identity of a consumer subscription.
///
/// Unlike the server-side subscription id it survives reconnects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SubscriptionKey(u64);

impl SubscriptionKey {
    /// Returns the raw value.
    pub fn value(&self) -> u64 {
        self.0
    }

    #[cfg(test)]
    pub(crate) fn from_raw(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

// =============================================================================
// SubscriptionStatus
// =============================================================================

/// Consumer-visible connectivity of one subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SubscriptionStatus {
    /// Registered, not yet armed on the server.
    #[default]
    Pending,

    /// Receiving data.
    Live,

    /// Waiting for recovery.
    Faulted {
        /// Failed layer.
        kind: FailureKind,
    },

    /// Unsubscribed or client closed.
    Closed,
}

impl SubscriptionStatus {
    /// Returns `true` if the subscription receives data.
    #[inline]
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Live)
    }

    /// Returns `true` if the subscription is waiting for recovery.
    #[inline]
    pub fn is_faulted(&self) -> bool {
        matches!(self, Self::Faulted { .. })
    }
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::Live => write!(f, "Live"),
            Self::Faulted { kind } => write!(f, "Faulted({kind})"),
            Self::Closed => write!(f, "Closed"),
        }
    }
}

// =============================================================================
// Registry
// =============================================================================

#[derive(Debug, Clone)]
struct ItemSpec {
    node_id: NodeId,
    client_handle: u32,
}

struct Entry {
    parameters: SubscriptionParameters,
    items: Vec<ItemSpec>,
    inbox: mpsc::Sender<DataChangeMessage>,
    status: watch::Sender<SubscriptionStatus>,
    server_id: Option<u32>,
}

impl Entry {
    fn set_status(&self, status: SubscriptionStatus) -> SubscriptionStatus {
        self.status.send_replace(status)
    }

    fn status(&self) -> SubscriptionStatus {
        *self.status.borrow()
    }
}

#[derive(Default)]
struct Inner {
    entries: BTreeMap<SubscriptionKey, Entry>,
    by_server_id: HashMap<u32, SubscriptionKey>,
}

impl Inner {
    fn unbind(&mut self, key: SubscriptionKey) -> Option<u32> {
        let server_id = self.entries.get_mut(&key)?.server_id.take()?;
        self.by_server_id.remove(&server_id);
        Some(server_id)
    }
}

/// Destination of a routed data change.
#[derive(Debug, Clone)]
pub struct Route {
    /// Owning subscription.
    pub key: SubscriptionKey,

    /// Node of the monitored item.
    pub node_id: NodeId,

    /// Forwarder inbox.
    pub inbox: mpsc::Sender<DataChangeMessage>,
}

/// Server access needed to arm subscriptions.
#[derive(Clone, Copy)]
pub struct ArmContext<'a> {
    /// Wire services.
    pub transport: &'a dyn UaTransport,

    /// Active session.
    pub session: &'a SessionToken,

    /// Deadline per request.
    pub request_timeout: Duration,
}

/// Result of a replay pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReplayOutcome {
    /// Subscriptions armed again, in registration order.
    pub replayed: Vec<SubscriptionKey>,

    /// Subscriptions that exhausted their local retries.
    pub pending: Vec<SubscriptionKey>,
}

/// Tracks every consumer subscription across reconnects.
pub struct SubscriptionRegistry {
    inner: Mutex<Inner>,
    next_key: AtomicU64,
    next_handle: AtomicU32,
    fault_notifications: bool,
}

impl SubscriptionRegistry {
    /// Creates an empty registry.
    pub fn new(fault_notifications: bool) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            next_key: AtomicU64::new(1),
            next_handle: AtomicU32::new(1),
            fault_notifications,
        }
    }

    /// Registers a subscription in `Pending` state.
    pub fn register(
        &self,
        parameters: SubscriptionParameters,
        nodes: Vec<NodeId>,
        inbox: mpsc::Sender<DataChangeMessage>,
    ) -> (SubscriptionKey, watch::Receiver<SubscriptionStatus>) {
        let key = SubscriptionKey(self.next_key.fetch_add(1, Ordering::Relaxed));
        let items = nodes
            .into_iter()
            .map(|node_id| ItemSpec {
                node_id,
                client_handle: self.next_handle.fetch_add(1, Ordering::Relaxed),
            })
            .collect();
        let (status, status_rx) = watch::channel(SubscriptionStatus::Pending);

        self.inner.lock().entries.insert(
            key,
            Entry {
                parameters,
                items,
                inbox,
                status,
                server_id: None,
            },
        );

        tracing::debug!(subscription = %key, "Subscription registered");
        (key, status_rx)
    }

    /// Removes a subscription and returns its server id, if armed.
    pub fn deregister(&self, key: SubscriptionKey) -> Option<u32> {
        let mut inner = self.inner.lock();
        let server_id = inner.unbind(key);
        if let Some(entry) = inner.entries.remove(&key) {
            entry.set_status(SubscriptionStatus::Closed);
            tracing::debug!(subscription = %key, "Subscription deregistered");
        }
        server_id
    }

    /// Returns all keys in registration order.
    pub fn keys(&self) -> Vec<SubscriptionKey> {
        self.inner.lock().entries.keys().copied().collect()
    }

    /// Returns the number of registered subscriptions.
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Returns `true` if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }

    /// Returns the status of a subscription.
    pub fn status(&self, key: SubscriptionKey) -> Option<SubscriptionStatus> {
        self.inner.lock().entries.get(&key).map(Entry::status)
    }

    /// Returns the current server id of a subscription.
    pub fn server_id(&self, key: SubscriptionKey) -> Option<u32> {
        self.inner.lock().entries.get(&key)?.server_id
    }

    // =========================================================================
    // Routing
    // =========================================================================

    /// Binds a server id to a subscription. Returns `false` if it is gone.
    pub fn bind(&self, key: SubscriptionKey, server_id: u32) -> bool {
        let mut inner = self.inner.lock();
        let Some(entry) = inner.entries.get_mut(&key) else {
            return false;
        };
        let previous = entry.server_id.replace(server_id);
        if let Some(previous) = previous {
            inner.by_server_id.remove(&previous);
        }
        inner.by_server_id.insert(server_id, key);
        true
    }

    /// Forgets the server id of a subscription.
    pub fn unbind(&self, key: SubscriptionKey) -> Option<u32> {
        self.inner.lock().unbind(key)
    }

    /// Forgets a server id and returns the subscription it belonged to.
    pub fn unbind_server_id(&self, server_id: u32) -> Option<SubscriptionKey> {
        let mut inner = self.inner.lock();
        let key = inner.by_server_id.remove(&server_id)?;
        if let Some(entry) = inner.entries.get_mut(&key) {
            entry.server_id = None;
        }
        Some(key)
    }

    /// Forgets every server id.
    pub fn unbind_all(&self) {
        let mut inner = self.inner.lock();
        inner.by_server_id.clear();
        for entry in inner.entries.values_mut() {
            entry.server_id = None;
        }
    }

    /// Resolves a notification to its forwarder inbox.
    pub fn route(&self, server_id: u32, client_handle: u32) -> Option<Route> {
        let inner = self.inner.lock();
        let key = *inner.by_server_id.get(&server_id)?;
        let entry = inner.entries.get(&key)?;
        let item = entry
            .items
            .iter()
            .find(|item| item.client_handle == client_handle)?;
        Some(Route {
            key,
            node_id: item.node_id.clone(),
            inbox: entry.inbox.clone(),
        })
    }

    // =========================================================================
    // Status
    // =========================================================================

    /// Marks a live subscription faulted.
    ///
    /// Only the `Live -> Faulted` edge enqueues a fault marker, so a fault
    /// episode produces at most one. A marker is skipped rather than waited
    /// for when the inbox is full. Returns `true` on that edge.
    pub fn fault(&self, key: SubscriptionKey, kind: FailureKind, reason: &str) -> bool {
        let inner = self.inner.lock();
        let Some(entry) = inner.entries.get(&key) else {
            return false;
        };
        self.fault_entry(key, entry, kind, reason)
    }

    /// Marks every live subscription faulted and returns the affected keys.
    pub fn fault_all(&self, kind: FailureKind, reason: &str) -> Vec<SubscriptionKey> {
        let inner = self.inner.lock();
        inner
            .entries
            .iter()
            .filter(|(key, entry)| self.fault_entry(**key, entry, kind, reason))
            .map(|(key, _)| *key)
            .collect()
    }

    fn fault_entry(
        &self,
        key: SubscriptionKey,
        entry: &Entry,
        kind: FailureKind,
        reason: &str,
    ) -> bool {
        match entry.status() {
            SubscriptionStatus::Live => {
                entry.set_status(SubscriptionStatus::Faulted { kind });
                if self.fault_notifications {
                    if let Err(e) = entry.inbox.try_send(DataChangeMessage::fault(kind, reason)) {
                        tracing::debug!(subscription = %key, error = %e, "Fault marker skipped");
                    }
                }
                tracing::debug!(subscription = %key, kind = %kind, "Subscription faulted");
                true
            }
            SubscriptionStatus::Faulted { kind: current } if kind < current => {
                entry.set_status(SubscriptionStatus::Faulted { kind });
                false
            }
            _ => false,
        }
    }

    /// Marks a subscription live and returns its previous status, or `None`
    /// if it is no longer registered.
    pub fn mark_live(&self, key: SubscriptionKey) -> Option<SubscriptionStatus> {
        let inner = self.inner.lock();
        let entry = inner.entries.get(&key)?;
        Some(entry.set_status(SubscriptionStatus::Live))
    }

    /// Closes every subscription and empties the registry.
    pub fn close_all(&self) -> Vec<SubscriptionKey> {
        let mut inner = self.inner.lock();
        inner.by_server_id.clear();
        let entries = std::mem::take(&mut inner.entries);
        entries
            .into_iter()
            .map(|(key, entry)| {
                entry.set_status(SubscriptionStatus::Closed);
                key
            })
            .collect()
    }

    // =========================================================================
    // Arming and Replay
    // =========================================================================

    fn arm_spec(&self, key: SubscriptionKey) -> Option<(SubscriptionParameters, Vec<MonitoredItemCreate>)> {
        let inner = self.inner.lock();
        let entry = inner.entries.get(&key)?;
        let items = entry
            .items
            .iter()
            .map(|item| MonitoredItemCreate {
                node_id: item.node_id.clone(),
                client_handle: item.client_handle,
                sampling_interval: entry.parameters.interval,
                queue_size: entry.parameters.queue_size,
            })
            .collect();
        Some((entry.parameters.clone(), items))
    }

    /// Creates the server-side subscription and monitored items, then marks
    /// the subscription live.
    ///
    /// Returns `Ok(None)` if the subscription was deregistered meanwhile, in
    /// which case the server subscription is deleted again. On failure the
    /// half-built server subscription is deleted.
    pub async fn arm(&self, ctx: ArmContext<'_>, key: SubscriptionKey) -> UaResult<Option<u32>> {
        let Some((parameters, items)) = self.arm_spec(key) else {
            return Ok(None);
        };

        let server_id = with_deadline(
            "CreateSubscription",
            ctx.request_timeout,
            ctx.transport.create_subscription(ctx.session, &parameters),
        )
        .await?;

        if !self.bind(key, server_id) {
            delete_quietly(ctx, server_id).await;
            return Ok(None);
        }

        let checked = match with_deadline(
            "CreateMonitoredItems",
            ctx.request_timeout,
            ctx.transport
                .create_monitored_items(ctx.session, server_id, &items),
        )
        .await
        {
            Ok(results) if results.len() != items.len() => Err(UaError::subscription(
                SubscriptionError::creation_failed(format!(
                    "server returned {} results for {} monitored items",
                    results.len(),
                    items.len()
                )),
            )),
            Ok(results) => items
                .iter()
                .zip(&results)
                .find(|(_, result)| result.status_code.is_bad())
                .map_or(Ok(()), |(item, result)| {
                    Err(monitored_item_error(&item.node_id, result.status_code))
                }),
            Err(e) => Err(e),
        };

        if let Err(e) = checked {
            self.unbind(key);
            if !e.is_layer_loss() {
                delete_quietly(ctx, server_id).await;
            }
            return Err(e);
        }

        if self.mark_live(key).is_none() {
            tracing::debug!(subscription = %key, server_id, "Subscription removed while arming");
            delete_quietly(ctx, server_id).await;
            return Ok(None);
        }

        tracing::debug!(
            subscription = %key,
            server_id,
            items = items.len(),
            "Subscription armed"
        );
        Ok(Some(server_id))
    }

    /// Re-arms `keys` one after another, in the given order.
    ///
    /// A subscription that fails is retried up to `retries` times before it is
    /// left pending; the remaining subscriptions are replayed regardless. An
    /// error proving the session or a layer below it is gone aborts the pass.
    pub async fn replay(
        &self,
        ctx: ArmContext<'_>,
        keys: &[SubscriptionKey],
        retries: u32,
        retry_delay: Duration,
        cancel: &CancellationToken,
    ) -> UaResult<ReplayOutcome> {
        let mut outcome = ReplayOutcome::default();

        for &key in keys {
            let mut failures = 0u32;
            loop {
                match self.arm(ctx, key).await {
                    Ok(Some(_)) => {
                        outcome.replayed.push(key);
                        break;
                    }
                    Ok(None) => break,
                    Err(e) if e.is_layer_loss() => return Err(e),
                    Err(e) => {
                        failures += 1;
                        e.log("replay subscription");
                        if failures > retries {
                            tracing::warn!(
                                subscription = %key,
                                failures,
                                "Subscription replay exhausted local retries"
                            );
                            outcome.pending.push(key);
                            break;
                        }
                        tokio::select! {
                            _ = cancel.cancelled() => return Err(UaError::client_closed()),
                            _ = tokio::time::sleep(retry_delay) => {}
                        }
                    }
                }
            }
        }

        Ok(outcome)
    }
}

impl fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionRegistry")
            .field("subscriptions", &self.len())
            .finish()
    }
}

fn monitored_item_error(node_id: &NodeId, status: StatusCode) -> UaError {
    if status == StatusCode::BAD_NODE_ID_UNKNOWN || status == StatusCode::BAD_NODE_ID_INVALID {
        UaError::consumer(ConsumerError::unknown_node(node_id.to_string()))
    } else {
        UaError::subscription(SubscriptionError::monitored_item_failed(
            node_id.to_string(),
            status,
        ))
    }
}

async fn delete_quietly(ctx: ArmContext<'_>, server_id: u32) {
    let result = with_deadline(
        "DeleteSubscription",
        ctx.request_timeout,
        ctx.transport.delete_subscription(ctx.session, server_id),
    )
    .await;
    if let Err(e) = result {
        e.log("delete subscription");
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn registry_with(
        count: usize,
    ) -> (
        SubscriptionRegistry,
        Vec<(SubscriptionKey, mpsc::Receiver<DataChangeMessage>)>,
    ) {
        let registry = SubscriptionRegistry::new(true);
        let subs = (0..count)
            .map(|i| {
                let (tx, rx) = mpsc::channel(4);
                let (key, _) = registry.register(
                    SubscriptionParameters::default(),
                    vec![NodeId::numeric(0, 2258), NodeId::string(2, format!("n{i}"))],
                    tx,
                );
                (key, rx)
            })
            .collect();
        (registry, subs)
    }

    #[test]
    fn test_keys_follow_registration_order() {
        let (registry, subs) = registry_with(3);
        let keys: Vec<_> = subs.iter().map(|(k, _)| *k).collect();
        assert_eq!(registry.keys(), keys);
        assert_eq!(keys[0].to_string(), "sub-1");

        registry.deregister(keys[1]);
        assert_eq!(registry.keys(), vec![keys[0], keys[2]]);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_route_by_server_id_and_handle() {
        let (registry, subs) = registry_with(2);
        let (first, _) = subs[0];
        let (second, _) = subs[1];

        assert!(registry.bind(first, 100));
        assert!(registry.bind(second, 200));

        let route = registry.route(200, 4).unwrap();
        assert_eq!(route.key, second);
        assert_eq!(route.node_id, NodeId::string(2, "n1"));
        assert!(registry.route(200, 1).is_none());
        assert!(registry.route(300, 1).is_none());

        assert!(registry.bind(first, 101));
        assert!(registry.route(100, 1).is_none());
        assert_eq!(registry.route(101, 1).unwrap().key, first);

        assert_eq!(registry.unbind_server_id(101), Some(first));
        assert_eq!(registry.server_id(first), None);
        assert_eq!(registry.deregister(second), Some(200));
        assert!(registry.route(200, 3).is_none());
    }

    #[test]
    fn test_single_fault_marker_per_episode() {
        let (registry, mut subs) = registry_with(1);
        let (key, rx) = &mut subs[0];

        // Pending subscriptions are not faulted.
        assert!(!registry.fault(*key, FailureKind::Session, "revoked"));
        assert!(rx.try_recv().is_err());

        registry.mark_live(*key);
        assert!(registry.fault(*key, FailureKind::Session, "revoked"));
        assert!(!registry.fault(*key, FailureKind::Session, "revoked again"));
        assert!(!registry.fault(*key, FailureKind::Transport, "link lost"));
        assert_eq!(
            registry.status(*key),
            Some(SubscriptionStatus::Faulted {
                kind: FailureKind::Transport
            })
        );

        let marker = rx.try_recv().unwrap();
        assert!(marker.is_fault());
        assert!(rx.try_recv().is_err());

        assert_eq!(
            registry.mark_live(*key),
            Some(SubscriptionStatus::Faulted {
                kind: FailureKind::Transport
            })
        );
        assert!(registry.fault(*key, FailureKind::Subscription, "lost"));
        assert!(rx.try_recv().unwrap().is_fault());
    }

    #[test]
    fn test_removed_subscription_cannot_go_live() {
        let (registry, subs) = registry_with(1);
        let key = subs[0].0;
        assert!(registry.bind(key, 42));

        assert_eq!(registry.deregister(key), Some(42));
        assert_eq!(registry.mark_live(key), None);
        assert!(!registry.bind(key, 43));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_fault_marker_skipped_when_inbox_full() {
        let registry = SubscriptionRegistry::new(true);
        let (tx, mut rx) = mpsc::channel(1);
        let (key, status) = registry.register(
            SubscriptionParameters::default(),
            vec![NodeId::numeric(0, 2258)],
            tx.clone(),
        );
        registry.mark_live(key);
        tx.try_send(DataChangeMessage::fault(FailureKind::Transport, "filler"))
            .unwrap();

        assert_eq!(registry.fault_all(FailureKind::Transport, "down"), vec![key]);
        assert!(status.borrow().is_faulted());
        assert_eq!(rx.try_recv().unwrap().error.unwrap().reason, "filler");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_fault_notifications_disabled() {
        let registry = SubscriptionRegistry::new(false);
        let (tx, mut rx) = mpsc::channel(4);
        let (key, _) = registry.register(
            SubscriptionParameters::default(),
            vec![NodeId::numeric(0, 2258)],
            tx,
        );
        registry.mark_live(key);
        assert!(registry.fault(key, FailureKind::Session, "revoked"));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_close_all() {
        let registry = SubscriptionRegistry::new(true);
        let (tx, _rx) = mpsc::channel(4);
        let (key, status) = registry.register(
            SubscriptionParameters::default(),
            vec![NodeId::numeric(0, 2258)],
            tx,
        );
        registry.bind(key, 9);

        assert_eq!(registry.close_all(), vec![key]);
        assert!(registry.is_empty());
        assert_eq!(*status.borrow(), SubscriptionStatus::Closed);
        assert!(registry.route(9, 1).is_none());
        assert_eq!(registry.deregister(key), None);
    }
}
