// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Custom Test Assertions
//!
//! Helpers that wait on queues and event streams with clear failure messages.

use std::future::Future;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};

use relink_opcua::client::ClientEvent;
use relink_opcua::types::{DataChangeMessage, FailureKind};

// =============================================================================
// DataChangeMessage Assertions
// =============================================================================

/// Assertion extensions for [`DataChangeMessage`].
pub trait DataChangeAssertions {
    /// Assert the message carries data.
    fn assert_data(&self);

    /// Assert the message is a fault marker for `kind`.
    fn assert_fault(&self, kind: FailureKind);
}

impl DataChangeAssertions for DataChangeMessage {
    fn assert_data(&self) {
        assert!(
            self.error.is_none(),
            "Expected data, got fault marker: {:?}",
            self.error
        );
        assert!(!self.node_id.is_null(), "Data message without node id");
    }

    fn assert_fault(&self, kind: FailureKind) {
        match &self.error {
            Some(fault) => assert_eq!(fault.kind, kind, "Unexpected fault kind: {fault}"),
            None => panic!("Expected {kind} fault marker, got data for {}", self.node_id),
        }
    }
}

// =============================================================================
// Queue Helpers
// =============================================================================

/// Receives one message or panics after `timeout`.
pub async fn recv_within(
    rx: &mut mpsc::Receiver<DataChangeMessage>,
    timeout: Duration,
) -> DataChangeMessage {
    match tokio::time::timeout(timeout, rx.recv()).await {
        Ok(Some(message)) => message,
        Ok(None) => panic!("Queue closed while waiting for a message"),
        Err(_) => panic!("No message within {timeout:?}"),
    }
}

/// Removes everything currently buffered in the queue.
pub fn drain(rx: &mut mpsc::Receiver<DataChangeMessage>) -> Vec<DataChangeMessage> {
    let mut drained = Vec::new();
    while let Ok(message) = rx.try_recv() {
        drained.push(message);
    }
    drained
}

/// Outcome of waiting for data to resume after a fault.
#[derive(Debug)]
pub struct Resumed {
    /// First data message after the fault markers.
    pub message: DataChangeMessage,
    /// Fault markers seen before it.
    pub faults: Vec<DataChangeMessage>,
}

/// Waits for the next data message, collecting fault markers on the way.
pub async fn recv_data_within(
    rx: &mut mpsc::Receiver<DataChangeMessage>,
    timeout: Duration,
) -> Resumed {
    let deadline = tokio::time::Instant::now() + timeout;
    let mut faults = Vec::new();
    loop {
        let message = match tokio::time::timeout_at(deadline, rx.recv()).await {
            Ok(Some(message)) => message,
            Ok(None) => panic!("Queue closed while waiting for data"),
            Err(_) => panic!(
                "Data did not resume within {timeout:?} ({} fault markers seen)",
                faults.len()
            ),
        };
        if message.is_fault() {
            faults.push(message);
        } else {
            return Resumed { message, faults };
        }
    }
}

// =============================================================================
// Event Helpers
// =============================================================================

/// Waits for the first event matching `predicate`.
pub async fn expect_event<F>(
    events: &mut broadcast::Receiver<ClientEvent>,
    timeout: Duration,
    mut predicate: F,
) -> ClientEvent
where
    F: FnMut(&ClientEvent) -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        match tokio::time::timeout_at(deadline, events.recv()).await {
            Ok(Ok(event)) if predicate(&event) => return event,
            Ok(Ok(_)) => continue,
            Ok(Err(broadcast::error::RecvError::Lagged(skipped))) => {
                tracing::warn!(skipped, "Event receiver lagged");
            }
            Ok(Err(broadcast::error::RecvError::Closed)) => panic!("Event stream closed"),
            Err(_) => panic!("Expected event not seen within {timeout:?}"),
        }
    }
}

/// Collects every event already queued on the receiver.
pub fn drain_events(events: &mut broadcast::Receiver<ClientEvent>) -> Vec<ClientEvent> {
    let mut drained = Vec::new();
    loop {
        match events.try_recv() {
            Ok(event) => drained.push(event),
            Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
            Err(_) => return drained,
        }
    }
}

// =============================================================================
// Async Assertion Helpers
// =============================================================================

/// Wait for a condition to become true within a timeout.
pub async fn wait_for<F, Fut>(timeout: Duration, interval: Duration, mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let start = tokio::time::Instant::now();
    while start.elapsed() < timeout {
        if condition().await {
            return true;
        }
        tokio::time::sleep(interval).await;
    }
    false
}

/// Assert that an async operation completes within a timeout.
#[macro_export]
macro_rules! assert_completes_within {
    ($timeout:expr, $future:expr) => {{
        match tokio::time::timeout($timeout, $future).await {
            Ok(result) => result,
            Err(_) => panic!("Operation did not complete within {:?}", $timeout),
        }
    }};
}
