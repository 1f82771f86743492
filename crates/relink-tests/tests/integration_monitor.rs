// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Node Monitor Integration Tests
//!
//! Consumer-facing behavior of `NodeMonitor` and `SubscriptionHandle`:
//! input validation, unsubscribe semantics, queue ownership and
//! backpressure, plus method call error mapping.

use std::time::Duration;

use tokio::sync::mpsc;

use relink_opcua::client::{ClientEvent, SubscriptionStatus};
use relink_opcua::error::{ConsumerError, ServiceError, UaError};
use relink_opcua::types::{
    CallMethodRequest, ClientState, DataChangeMessage, FailureKind, NodeId, StatusCode, Variant,
};

use relink_tests::assert_completes_within;
use relink_tests::prelude::*;

fn assert_consumer_error(err: &UaError, expected: fn(&ConsumerError) -> bool) {
    match err {
        UaError::Consumer(e) if expected(e) => {}
        other => panic!("unexpected error: {other:?}"),
    }
}

// =============================================================================
// Validation
// =============================================================================

#[tokio::test]
async fn test_subscribe_requires_connection() {
    let harness = TestHarness::build_with(|_| {});
    let (tx, _rx) = mpsc::channel(QUEUE_CAPACITY);

    let err = harness
        .monitor
        .chan_subscribe(ConfigFixtures::subscription(), tx, [CURRENT_TIME_NODE_ID])
        .await
        .unwrap_err();

    assert!(
        matches!(err, UaError::Service(ServiceError::NotConnected { state: ClientState::Disconnected })),
        "unexpected error: {err}"
    );
    assert_eq!(harness.client.subscription_count(), 0);
}

#[tokio::test]
async fn test_subscribe_rejects_invalid_input() {
    let harness = TestHarness::start().await;
    let (tx, _rx) = mpsc::channel(QUEUE_CAPACITY);

    let err = harness
        .monitor
        .chan_subscribe(
            ConfigFixtures::subscription_every(Duration::ZERO),
            tx.clone(),
            [CURRENT_TIME_NODE_ID],
        )
        .await
        .unwrap_err();
    assert_consumer_error(&err, |e| matches!(e, ConsumerError::ZeroInterval));

    let err = harness
        .monitor
        .chan_subscribe(ConfigFixtures::subscription(), tx.clone(), Vec::<&str>::new())
        .await
        .unwrap_err();
    assert_consumer_error(&err, |e| matches!(e, ConsumerError::EmptyNodeList));

    let err = harness
        .monitor
        .chan_subscribe(ConfigFixtures::subscription(), tx.clone(), ["ns=x;i=1"])
        .await
        .unwrap_err();
    assert_consumer_error(&err, |e| matches!(e, ConsumerError::InvalidNodeId { .. }));

    let err = harness
        .monitor
        .subscribe_nodes(ConfigFixtures::subscription(), tx.clone(), vec![NodeId::null()])
        .await
        .unwrap_err();
    assert_consumer_error(&err, |e| matches!(e, ConsumerError::InvalidNodeId { .. }));

    let err = harness
        .monitor
        .chan_subscribe(
            ConfigFixtures::subscription(),
            tx,
            [CURRENT_TIME_NODE_ID, "ns=2;s=missing"],
        )
        .await
        .unwrap_err();
    assert_consumer_error(&err, |e| matches!(e, ConsumerError::UnknownNode { .. }));
    assert!(!err.is_retryable());

    assert_eq!(harness.client.subscription_count(), 0);
    assert!(harness.server.subscription_ids().is_empty());

    let stats = harness.client.stats();
    assert_eq!(stats.failures_detected, 0);
    assert_eq!(stats.recoveries_started, 0);
    assert_eq!(harness.client.state(), ClientState::Connected);
    harness.shutdown().await;
}

// =============================================================================
// Delivery
// =============================================================================

#[tokio::test]
async fn test_messages_carry_node_and_value() {
    let harness = TestHarness::start().await;
    let (handle, mut rx) = harness
        .subscribe(&[CURRENT_TIME_NODE_ID], QUEUE_CAPACITY)
        .await;

    let message = recv_within(&mut rx, RECONNECTION_TIMEOUT).await;
    message.assert_data();
    assert_eq!(message.node_id, NodeFixtures::current_time());
    assert!(matches!(message.value, Variant::DateTime(_)));
    assert!(message.status.is_good());
    assert!(message.source_timestamp.is_some());

    assert_eq!(handle.status(), SubscriptionStatus::Live);
    assert_eq!(harness.client.subscription_count(), 1);
    assert!(harness.client.stats().notifications_routed >= 1);
    harness.shutdown().await;
}

#[tokio::test]
async fn test_subscriptions_can_share_a_queue() {
    let harness = TestHarness::start().await;
    let (tx, mut rx) = mpsc::channel(QUEUE_CAPACITY);

    let _time = harness
        .monitor
        .chan_subscribe(ConfigFixtures::subscription(), tx.clone(), [CURRENT_TIME_NODE_ID])
        .await
        .expect("subscribe current time");
    let _sequence = harness
        .monitor
        .chan_subscribe(ConfigFixtures::subscription(), tx, [SEQUENCE_NODE_ID])
        .await
        .expect("subscribe sequence");

    let mut nodes = Vec::new();
    for _ in 0..10 {
        nodes.push(recv_within(&mut rx, RECONNECTION_TIMEOUT).await.node_id);
    }

    assert!(nodes.contains(&NodeFixtures::current_time()));
    assert!(nodes.contains(&NodeFixtures::sequence()));
    harness.shutdown().await;
}

#[tokio::test]
async fn test_backpressure_blocks_without_loss() {
    let harness = TestHarness::start_with(|config| {
        config.forward_buffer = 2;
    })
    .await;
    let (_handle, mut rx) = harness
        .subscribe_with(
            ConfigFixtures::subscription_every(Duration::from_millis(20)),
            &[SEQUENCE_NODE_ID],
            1,
        )
        .await;

    // Nobody reads: forwarder, inbox and watcher all block behind the queue.
    tokio::time::sleep(Duration::from_millis(500)).await;

    let mut values = Vec::new();
    while values.len() < 30 {
        let message = recv_within(&mut rx, RECONNECTION_TIMEOUT).await;
        message.assert_data();
        values.push(message.value.as_i64().expect("sequence value"));
    }

    assert!(
        values.windows(2).all(|pair| pair[1] == pair[0] + 1),
        "values skipped or reordered: {values:?}"
    );
    assert_eq!(harness.client.stats().notifications_discarded, 0);
    assert_eq!(harness.client.state(), ClientState::Connected);
    harness.shutdown().await;
}

#[tokio::test]
async fn test_fault_notifications_can_be_disabled() {
    let harness = TestHarness::start_with(|config| {
        config.fault_notifications = false;
    })
    .await;
    let mut events = harness.client.events();
    let (_handle, mut rx) = harness
        .subscribe(&[CURRENT_TIME_NODE_ID], QUEUE_CAPACITY)
        .await;
    recv_within(&mut rx, RECONNECTION_TIMEOUT).await.assert_data();

    harness.inject(methods::SESSION_FAILURE).await;
    expect_event(&mut events, RECONNECTION_TIMEOUT, |e| {
        matches!(e, ClientEvent::RecoveryCompleted { .. })
    })
    .await;

    let drained = drain(&mut rx);
    let resumed = recv_data_within(&mut rx, RECONNECTION_TIMEOUT).await;
    assert!(drained.iter().all(|m| !m.is_fault()));
    assert!(resumed.faults.is_empty());
    harness.shutdown().await;
}

#[tokio::test]
async fn test_status_follows_outage() {
    let harness = TestHarness::start().await;
    let (handle, mut rx) = harness
        .subscribe(&[CURRENT_TIME_NODE_ID], QUEUE_CAPACITY)
        .await;
    recv_within(&mut rx, RECONNECTION_TIMEOUT).await.assert_data();
    let mut status = handle.status_watch();

    harness.server.set_available(false);
    let faulted = tokio::time::timeout(
        DISCONNECT_TIMEOUT,
        status.wait_for(|s| *s == SubscriptionStatus::Faulted { kind: FailureKind::Transport }),
    )
    .await
    .expect("subscription faulted in time")
    .map(|s| *s)
    .expect("status sender alive");
    assert!(faulted.is_faulted());

    harness.server.set_available(true);
    tokio::time::timeout(
        RECONNECTION_TIMEOUT,
        status.wait_for(|s| *s == SubscriptionStatus::Live),
    )
    .await
    .expect("subscription live again")
    .expect("status sender alive");
    assert!(handle.server_id().is_some());
    harness.shutdown().await;
}

// =============================================================================
// Unsubscribe
// =============================================================================

#[tokio::test]
async fn test_unsubscribe_is_idempotent() {
    let harness = TestHarness::start().await;
    let (handle, mut rx) = harness
        .subscribe(&[CURRENT_TIME_NODE_ID], QUEUE_CAPACITY)
        .await;
    recv_within(&mut rx, RECONNECTION_TIMEOUT).await.assert_data();

    handle.unsubscribe().await.expect("first unsubscribe");
    handle.unsubscribe().await.expect("second unsubscribe");

    assert_eq!(handle.status(), SubscriptionStatus::Closed);
    assert_eq!(harness.client.subscription_count(), 0);
    assert!(harness.server.subscription_ids().is_empty());
    assert_eq!(harness.server.counters().subscriptions_deleted(), 1);
    harness.shutdown().await;
}

#[tokio::test]
async fn test_unsubscribe_leaves_queue_open() {
    let harness = TestHarness::start().await;
    let (tx, mut rx) = mpsc::channel(QUEUE_CAPACITY);
    let handle = harness
        .monitor
        .chan_subscribe(ConfigFixtures::subscription(), tx.clone(), [CURRENT_TIME_NODE_ID])
        .await
        .expect("subscribe");
    recv_within(&mut rx, RECONNECTION_TIMEOUT).await.assert_data();

    handle.unsubscribe().await.expect("unsubscribe");
    tokio::time::sleep(Duration::from_millis(300)).await;
    drain(&mut rx);
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert!(matches!(rx.try_recv(), Err(mpsc::error::TryRecvError::Empty)));
    tx.send(DataChangeMessage::fault(FailureKind::Session, "manual"))
        .await
        .expect("queue still open");
    assert!(rx.recv().await.is_some_and(|m| m.is_fault()));
    harness.shutdown().await;
}

#[tokio::test]
async fn test_unsubscribe_while_disconnected() {
    let harness = TestHarness::start().await;
    let mut events = harness.client.events();
    let (handle, mut rx) = harness
        .subscribe(&[CURRENT_TIME_NODE_ID], QUEUE_CAPACITY)
        .await;
    recv_within(&mut rx, RECONNECTION_TIMEOUT).await.assert_data();

    harness.server.set_available(false);
    expect_event(&mut events, DISCONNECT_TIMEOUT, |e| {
        matches!(e, ClientEvent::StateChanged { to: ClientState::Disconnected, .. })
    })
    .await;
    handle.unsubscribe().await.expect("unsubscribe while down");
    assert_eq!(harness.client.subscription_count(), 0);

    harness.server.set_available(true);
    expect_event(&mut events, RECONNECTION_TIMEOUT, |e| {
        matches!(e, ClientEvent::RecoveryCompleted { .. })
    })
    .await;

    assert!(harness.server.subscription_ids().is_empty());
    assert_eq!(harness.client.stats().subscriptions_replayed, 0);
    harness.shutdown().await;
}

#[tokio::test]
async fn test_dropping_handle_releases_subscription() {
    let harness = TestHarness::start().await;
    let (handle, mut rx) = harness
        .subscribe(&[CURRENT_TIME_NODE_ID], QUEUE_CAPACITY)
        .await;
    recv_within(&mut rx, RECONNECTION_TIMEOUT).await.assert_data();

    drop(handle);

    let server = harness.server.clone();
    let released = wait_for(DISCONNECT_TIMEOUT, Duration::from_millis(20), || {
        let server = server.clone();
        async move { server.subscription_ids().is_empty() }
    })
    .await;
    assert!(released, "server subscription not deleted after drop");
    assert_eq!(harness.client.subscription_count(), 0);

    // Only the forwarder held the queue sender.
    assert_completes_within!(Duration::from_secs(1), async {
        while rx.recv().await.is_some() {}
    });
    harness.shutdown().await;
}

// =============================================================================
// Call
// =============================================================================

#[tokio::test]
async fn test_call_error_mapping() {
    let harness = TestHarness::start().await;

    let err = harness
        .client
        .call(CallMethodRequest::new(
            NodeId::numeric(2, 99),
            NodeId::string(2, methods::SESSION_FAILURE),
        ))
        .await
        .unwrap_err();
    assert_consumer_error(&err, |e| matches!(e, ConsumerError::UnknownNode { .. }));

    let err = harness
        .client
        .call(CallFixtures::simulation("simulate_nothing"))
        .await
        .unwrap_err();
    match &err {
        UaError::Service(ServiceError::Rejected { service, status }) => {
            assert_eq!(*service, "Call");
            assert_eq!(*status, StatusCode::BAD_METHOD_INVALID);
        }
        other => panic!("unexpected error: {other:?}"),
    }

    let err = harness
        .client
        .call(CallMethodRequest::new(NodeId::null(), NodeFixtures::simulations()))
        .await
        .unwrap_err();
    assert_consumer_error(&err, |e| matches!(e, ConsumerError::InvalidArgument { .. }));

    let stats = harness.client.stats();
    assert_eq!(stats.failures_detected, 0);
    assert!(stats.call_errors >= 2);
    assert_eq!(harness.server.counters().calls(), 2);
    assert_eq!(harness.client.state(), ClientState::Connected);
    harness.shutdown().await;
}
