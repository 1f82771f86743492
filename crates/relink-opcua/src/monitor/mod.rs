// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Consumer-facing subscription API.
//!
//! [`NodeMonitor`] subscribes nodes and forwards their data changes into a
//! queue owned by the caller. The same queue keeps receiving data after every
//! reconnect; during a fault episode it receives at most one fault marker
//! (a message whose `error` is set).
//!
//! # Example
//!
//! ```rust,ignore
//! let monitor = NodeMonitor::new(&client);
//! let (tx, mut rx) = tokio::sync::mpsc::channel(5);
//!
//! let handle = monitor
//!     .chan_subscribe(SubscriptionParameters::default(), tx, ["ns=0;i=2258"])
//!     .await?;
//!
//! while let Some(message) = rx.recv().await {
//!     match &message.error {
//!         Some(fault) => tracing::warn!(%fault, "Subscription interrupted"),
//!         None => println!("{} = {:?}", message.node_id, message.value),
//!     }
//! }
//!
//! handle.unsubscribe().await?;
//! ```

mod forwarder;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::client::{SubscriptionKey, SubscriptionStatus, UaClient};
use crate::error::{ConsumerError, UaError, UaResult};
use crate::types::{DataChangeMessage, NodeId, SubscriptionParameters};

// =============================================================================
// NodeMonitor
// =============================================================================

/// Subscribes nodes on a [`UaClient`].
#[derive(Debug, Clone)]
pub struct NodeMonitor {
    client: UaClient,
}

impl NodeMonitor {
    /// Creates a monitor for `client`.
    pub fn new(client: &UaClient) -> Self {
        Self {
            client: client.clone(),
        }
    }

    /// Returns the underlying client.
    pub fn client(&self) -> &UaClient {
        &self.client
    }

    /// Subscribes `node_ids` and forwards their data changes into `queue`.
    ///
    /// Parameters and node ids are validated before anything is sent. The
    /// client must be `Connected`. Messages are forwarded with blocking
    /// backpressure: a full queue holds up delivery rather than dropping.
    ///
    /// Unsubscribing never closes `queue` on its own; the receiver ends only
    /// once every sender, including the caller's clones, is gone.
    pub async fn chan_subscribe<I, S>(
        &self,
        parameters: SubscriptionParameters,
        queue: mpsc::Sender<DataChangeMessage>,
        node_ids: I,
    ) -> UaResult<SubscriptionHandle>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let nodes = node_ids
            .into_iter()
            .map(|id| id.as_ref().parse::<NodeId>())
            .collect::<UaResult<Vec<_>>>()?;
        self.subscribe_nodes(parameters, queue, nodes).await
    }

    /// Like [`chan_subscribe`](Self::chan_subscribe) with parsed node ids.
    pub async fn subscribe_nodes(
        &self,
        parameters: SubscriptionParameters,
        queue: mpsc::Sender<DataChangeMessage>,
        nodes: Vec<NodeId>,
    ) -> UaResult<SubscriptionHandle> {
        parameters.validate()?;
        if nodes.is_empty() {
            return Err(UaError::consumer(ConsumerError::EmptyNodeList));
        }
        if let Some(node) = nodes.iter().find(|node| node.is_null()) {
            return Err(UaError::consumer(ConsumerError::invalid_node_id(
                node.to_string(),
                "null node id",
            )));
        }

        let core = self.client.core();
        let (inbox_tx, inbox_rx) = mpsc::channel(core.config.forward_buffer);
        let (key, status) = core.subscribe(parameters, nodes, inbox_tx).await?;

        let cancel = core.shutdown_token().child_token();
        forwarder::spawn(key, inbox_rx, queue, cancel.clone());

        Ok(SubscriptionHandle {
            client: self.client.clone(),
            key,
            status,
            cancel,
            released: AtomicBool::new(false),
        })
    }
}

// =============================================================================
// SubscriptionHandle
// =============================================================================

/// A live consumer subscription.
///
/// Dropping the handle removes the subscription as well; prefer
/// [`unsubscribe`](Self::unsubscribe) to also delete it on the server.
pub struct SubscriptionHandle {
    client: UaClient,
    key: SubscriptionKey,
    status: watch::Receiver<SubscriptionStatus>,
    cancel: CancellationToken,
    released: AtomicBool,
}

impl SubscriptionHandle {
    /// Returns the stable key of this subscription.
    pub fn key(&self) -> SubscriptionKey {
        self.key
    }

    /// Returns the current status.
    pub fn status(&self) -> SubscriptionStatus {
        *self.status.borrow()
    }

    /// Returns a receiver tracking the status.
    pub fn status_watch(&self) -> watch::Receiver<SubscriptionStatus> {
        self.status.clone()
    }

    /// Returns the current server-side id, if armed.
    pub fn server_id(&self) -> Option<u32> {
        self.client.core().registry.server_id(self.key)
    }

    /// Stops forwarding and removes the subscription.
    ///
    /// Safe to call while disconnected and more than once. The caller's
    /// queue is left as it is.
    pub async fn unsubscribe(&self) -> UaResult<()> {
        if self.released.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.cancel.cancel();
        self.client.core().unsubscribe(self.key).await;
        tracing::info!(subscription = %self.key, "Unsubscribed");
        Ok(())
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }
        self.cancel.cancel();

        let core = self.client.core().clone();
        let key = self.key;
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move { core.unsubscribe(key).await });
            }
            Err(_) => {
                core.registry.deregister(key);
            }
        }
    }
}

impl fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("key", &self.key)
            .field("status", &self.status())
            .finish()
    }
}
