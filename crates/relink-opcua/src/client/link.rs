// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Transport link ownership.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::mpsc;

use crate::error::{TimeoutError, UaError, UaResult};
use crate::types::Endpoint;

use super::transport::{ServerEvent, TransportState, UaTransport};

/// Owns the transport link.
///
/// Every successful open starts a new epoch. Signals tagged with an older
/// epoch refer to a link that no longer exists.
pub struct LinkManager {
    transport: Arc<dyn UaTransport>,
    endpoint: Endpoint,
    connect_timeout: Duration,
    state: RwLock<TransportState>,
    epoch: AtomicU64,
    opened: AtomicU64,
}

impl LinkManager {
    /// Creates a link manager.
    pub fn new(transport: Arc<dyn UaTransport>, endpoint: Endpoint, connect_timeout: Duration) -> Self {
        Self {
            transport,
            endpoint,
            connect_timeout,
            state: RwLock::new(TransportState::Disconnected),
            epoch: AtomicU64::new(0),
            opened: AtomicU64::new(0),
        }
    }

    /// Returns the link state.
    pub fn state(&self) -> TransportState {
        *self.state.read()
    }

    /// Returns `true` if the link is open.
    pub fn is_up(&self) -> bool {
        self.state().is_connected()
    }

    /// Returns the current epoch.
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    /// Returns the number of links opened so far.
    pub fn opened(&self) -> u64 {
        self.opened.load(Ordering::Relaxed)
    }

    /// Opens a new link and returns its epoch and event stream.
    pub async fn open(&self) -> UaResult<(u64, mpsc::Receiver<ServerEvent>)> {
        *self.state.write() = TransportState::Connecting;

        let result = match tokio::time::timeout(
            self.connect_timeout,
            self.transport.open_link(&self.endpoint),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(UaError::timeout(TimeoutError::Connect {
                duration: self.connect_timeout,
            })),
        };

        match result {
            Ok(events) => {
                let epoch = self.epoch.fetch_add(1, Ordering::AcqRel) + 1;
                self.opened.fetch_add(1, Ordering::Relaxed);
                *self.state.write() = TransportState::Connected;
                tracing::debug!(endpoint = %self.endpoint.url, epoch, "Transport link opened");
                Ok((epoch, events))
            }
            Err(e) => {
                *self.state.write() = TransportState::Failed;
                Err(e)
            }
        }
    }

    /// Marks the link of `epoch` as lost.
    ///
    /// Returns `false` if the epoch is stale or the link was already down.
    pub fn mark_lost(&self, epoch: u64) -> bool {
        if epoch != self.epoch() {
            return false;
        }
        let mut state = self.state.write();
        if state.is_connected() {
            *state = TransportState::Failed;
            true
        } else {
            false
        }
    }

    /// Closes the link. Errors from the peer are logged, not returned.
    pub async fn close(&self) {
        let previous = std::mem::replace(&mut *self.state.write(), TransportState::Disconnected);
        if previous == TransportState::Disconnected {
            return;
        }
        if let Err(e) = self.transport.close_link().await {
            e.log("close link");
        }
        tracing::debug!(endpoint = %self.endpoint.url, "Transport link closed");
    }
}

impl std::fmt::Debug for LinkManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkManager")
            .field("endpoint", &self.endpoint.url)
            .field("state", &self.state())
            .field("epoch", &self.epoch())
            .finish()
    }
}
