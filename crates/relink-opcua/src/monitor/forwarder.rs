// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Per-subscription forwarding task.
//!
//! The forwarder moves messages from the subscription's inbox into the
//! consumer queue. A full consumer queue blocks the forwarder, which in turn
//! fills the inbox and holds up routing. Nothing is dropped silently.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::client::SubscriptionKey;
use crate::types::DataChangeMessage;

/// Why a forwarder stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ForwarderExit {
    /// Unsubscribed or client closed.
    Cancelled,
    /// The subscription was removed from the registry.
    InboxClosed,
    /// The consumer dropped its receiver.
    QueueClosed,
}

/// Spawns a forwarder for one subscription.
pub(crate) fn spawn(
    key: SubscriptionKey,
    inbox: mpsc::Receiver<DataChangeMessage>,
    queue: mpsc::Sender<DataChangeMessage>,
    cancel: CancellationToken,
) -> JoinHandle<ForwarderExit> {
    tokio::spawn(async move {
        let exit = forward(inbox, queue, cancel).await;
        tracing::debug!(subscription = %key, exit = ?exit, "Forwarder stopped");
        exit
    })
}

async fn forward(
    mut inbox: mpsc::Receiver<DataChangeMessage>,
    queue: mpsc::Sender<DataChangeMessage>,
    cancel: CancellationToken,
) -> ForwarderExit {
    loop {
        let message = tokio::select! {
            biased;
            _ = cancel.cancelled() => return ForwarderExit::Cancelled,
            message = inbox.recv() => match message {
                Some(message) => message,
                None => return ForwarderExit::InboxClosed,
            },
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return ForwarderExit::Cancelled,
            sent = queue.send(message) => {
                if sent.is_err() {
                    return ForwarderExit::QueueClosed;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::types::{FailureKind, NodeId, StatusCode, Variant};

    fn message(value: i64) -> DataChangeMessage {
        DataChangeMessage {
            node_id: NodeId::string(2, "sequence"),
            value: Variant::Int64(value),
            status: StatusCode::GOOD,
            source_timestamp: None,
            timestamp: chrono::Utc::now(),
            error: None,
        }
    }

    #[tokio::test]
    async fn test_forwards_in_order() {
        let (inbox_tx, inbox_rx) = mpsc::channel(8);
        let (queue_tx, mut queue_rx) = mpsc::channel(8);
        let task = spawn(SubscriptionKey::from_raw(1), inbox_rx, queue_tx, CancellationToken::new());

        for i in 0..3 {
            inbox_tx.send(message(i)).await.unwrap();
        }
        inbox_tx
            .send(DataChangeMessage::fault(FailureKind::Session, "session revoked"))
            .await
            .unwrap();
        inbox_tx.send(message(3)).await.unwrap();
        drop(inbox_tx);

        for i in 0..3 {
            assert_eq!(queue_rx.recv().await.unwrap().value, Variant::Int64(i));
        }
        assert!(queue_rx.recv().await.unwrap().is_fault());
        assert_eq!(queue_rx.recv().await.unwrap().value, Variant::Int64(3));
        assert_eq!(task.await.unwrap(), ForwarderExit::InboxClosed);
    }

    #[tokio::test]
    async fn test_blocked_send_released_by_cancel() {
        let (inbox_tx, inbox_rx) = mpsc::channel(8);
        let (queue_tx, _queue_rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        let task = spawn(SubscriptionKey::from_raw(1), inbox_rx, queue_tx, cancel.clone());

        inbox_tx.send(message(1)).await.unwrap();
        inbox_tx.send(message(2)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!task.is_finished());

        cancel.cancel();
        let exit = tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(exit, ForwarderExit::Cancelled);
    }

    #[tokio::test]
    async fn test_stops_when_queue_dropped() {
        let (inbox_tx, inbox_rx) = mpsc::channel(8);
        let (queue_tx, queue_rx) = mpsc::channel(1);
        let task = spawn(SubscriptionKey::from_raw(1), inbox_rx, queue_tx, CancellationToken::new());

        drop(queue_rx);
        inbox_tx.send(message(1)).await.unwrap();
        assert_eq!(task.await.unwrap(), ForwarderExit::QueueClosed);
    }
}
