// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Connection health watcher.
//!
//! One watcher runs per link epoch. It drains the link's event stream,
//! routes data changes to forwarder inboxes and turns server signals into
//! failure reports. A keepalive tick renews the secure channel when due and
//! pings the session.

use std::sync::Weak;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::types::DataChangeMessage;

use super::transport::{DataChangeNotification, ServerEvent};
use super::wrapper::ClientCore;

/// Running watcher task.
pub(crate) struct WatcherHandle {
    pub(crate) epoch: u64,
    pub(crate) cancel: CancellationToken,
    pub(crate) task: JoinHandle<()>,
}

impl WatcherHandle {
    /// Cancels the task and waits for it to finish.
    pub(crate) async fn stop(self) {
        self.cancel.cancel();
        let _ = self.task.await;
    }
}

/// Spawns the watcher for the link of `epoch`.
pub(crate) fn spawn(
    core: Weak<ClientCore>,
    epoch: u64,
    events: mpsc::Receiver<ServerEvent>,
    cancel: CancellationToken,
    keepalive_interval: Duration,
) -> WatcherHandle {
    let task = tokio::spawn(run(core, epoch, events, cancel.clone(), keepalive_interval));
    WatcherHandle {
        epoch,
        cancel,
        task,
    }
}

async fn run(
    core: Weak<ClientCore>,
    epoch: u64,
    mut events: mpsc::Receiver<ServerEvent>,
    cancel: CancellationToken,
    keepalive_interval: Duration,
) {
    let mut ticker = interval_at(Instant::now() + keepalive_interval, keepalive_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    tracing::debug!(epoch, "Health watcher started");

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            event = events.recv() => {
                let Some(core) = core.upgrade() else { break };
                match event {
                    None => {
                        core.on_link_lost(epoch, "event stream ended");
                        break;
                    }
                    Some(ServerEvent::LinkClosed { reason }) => {
                        core.on_link_lost(epoch, &reason);
                        break;
                    }
                    Some(ServerEvent::ChannelInvalid { channel_id, reason }) => {
                        core.on_channel_invalid(channel_id, &reason);
                    }
                    Some(ServerEvent::SessionInvalid { session_id, reason }) => {
                        core.on_session_invalid(&session_id, &reason);
                    }
                    Some(ServerEvent::SubscriptionLost { subscription_id, reason }) => {
                        core.on_subscription_lost(subscription_id, &reason);
                    }
                    Some(ServerEvent::DataChange(notification)) => {
                        if !deliver(&core, notification, &cancel).await {
                            break;
                        }
                    }
                }
            }
            _ = ticker.tick() => {
                let Some(core) = core.upgrade() else { break };
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = core.keepalive_tick() => {}
                }
            }
        }
    }

    tracing::debug!(epoch, "Health watcher stopped");
}

/// Hands a notification to its forwarder. Returns `false` when cancelled.
async fn deliver(
    core: &ClientCore,
    notification: DataChangeNotification,
    cancel: &CancellationToken,
) -> bool {
    let Some(route) = core
        .registry
        .route(notification.subscription_id, notification.client_handle)
    else {
        tracing::trace!(
            server_id = notification.subscription_id,
            handle = notification.client_handle,
            "Discarding notification without route"
        );
        core.stats.record_discarded();
        return true;
    };

    let message = DataChangeMessage {
        node_id: route.node_id,
        value: notification.value,
        status: notification.status_code,
        source_timestamp: notification.source_timestamp,
        timestamp: notification.server_timestamp,
        error: None,
    };

    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        sent = route.inbox.send(message) => {
            match sent {
                Ok(()) => core.stats.record_routed(),
                Err(_) => core.stats.record_discarded(),
            }
            true
        }
    }
}
