// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Reconnection Integration Tests
//!
//! Failure injection at every layer while a subscription is active:
//!
//! - connection (transport link dropped)
//! - secure channel invalidated
//! - session revoked
//! - single subscription lost
//!
//! ## Test Categories
//!
//! - `test_auto_reconnection`: all four failures in sequence on one queue
//! - `test_*_failure_*`: layer reuse and isolation for each failure kind
//! - `test_ordering_*`: emission order across a reconnect

use relink_opcua::client::{ClientEvent, SubscriptionStatus};
use relink_opcua::types::{ClientState, FailureKind, Variant};

use relink_tests::prelude::*;

fn went_down(event: &ClientEvent, kind: FailureKind) -> bool {
    match event {
        ClientEvent::StateChanged { from, to } if kind.is_connection_level() => {
            *from == ClientState::Connected && *to == ClientState::Disconnected
        }
        ClientEvent::SubscriptionFaulted { kind: faulted, .. } => {
            !kind.is_connection_level() && *faulted == kind
        }
        _ => false,
    }
}

// =============================================================================
// Full Scenario
// =============================================================================

#[tokio::test]
async fn test_auto_reconnection() {
    let harness = TestHarness::start().await;
    let mut events = harness.client.events();
    let (_handle, mut rx) = harness
        .subscribe(&[CURRENT_TIME_NODE_ID], QUEUE_CAPACITY)
        .await;

    let scenarios = [
        ("connection_failure", methods::CONNECTION_FAILURE, FailureKind::Transport),
        (
            "securechannel_failure",
            methods::SECURE_CHANNEL_FAILURE,
            FailureKind::SecureChannel,
        ),
        ("session_failure", methods::SESSION_FAILURE, FailureKind::Session),
        (
            "subscription_failure",
            methods::SUBSCRIPTION_FAILURE,
            FailureKind::Subscription,
        ),
    ];

    for (name, method, kind) in scenarios {
        let first = recv_within(&mut rx, RECONNECTION_TIMEOUT).await;
        assert!(
            first.error.is_none(),
            "{name}: no error expected for first value: {:?}",
            first.error
        );

        harness.inject(method).await;
        expect_event(&mut events, DISCONNECT_TIMEOUT, |event| went_down(event, kind)).await;

        let drained = drain(&mut rx);
        let resumed = recv_data_within(&mut rx, RECONNECTION_TIMEOUT).await;
        resumed.message.assert_data();

        let faults: Vec<_> = drained
            .iter()
            .chain(&resumed.faults)
            .filter(|m| m.is_fault())
            .collect();
        assert!(
            faults.len() <= 1,
            "{name}: at most one fault marker per episode, got {}",
            faults.len()
        );
        for fault in faults {
            fault.assert_fault(kind);
        }
    }

    let stats = harness.client.stats();
    assert!(stats.recoveries_started >= 4);
    assert_eq!(stats.recoveries_completed, stats.recoveries_started);
    assert_eq!(harness.client.state(), ClientState::Connected);
    harness.shutdown().await;
}

// =============================================================================
// Layer Reuse
// =============================================================================

#[tokio::test]
async fn test_session_failure_reuses_secure_channel() {
    let harness = TestHarness::start().await;
    let mut events = harness.client.events();
    let (handle, mut rx) = harness
        .subscribe(&[CURRENT_TIME_NODE_ID], QUEUE_CAPACITY)
        .await;
    recv_within(&mut rx, RECONNECTION_TIMEOUT).await.assert_data();

    let channel_before = harness.server.channel_id();
    let session_before = harness.server.session_id();
    let server_id_before = handle.server_id();
    let counters = harness.server.counters();
    let (links, channels, sessions) = (
        counters.links_opened(),
        counters.channels_opened(),
        counters.sessions_created(),
    );

    harness.inject(methods::SESSION_FAILURE).await;
    expect_event(&mut events, RECONNECTION_TIMEOUT, |e| {
        matches!(e, ClientEvent::RecoveryCompleted { .. })
    })
    .await;
    recv_data_within(&mut rx, RECONNECTION_TIMEOUT).await;

    assert_eq!(harness.server.channel_id(), channel_before);
    assert_ne!(harness.server.session_id(), session_before);
    assert_ne!(handle.server_id(), server_id_before);
    assert_eq!(counters.links_opened(), links);
    assert_eq!(counters.channels_opened(), channels);
    assert_eq!(counters.sessions_created(), sessions + 1);
    harness.shutdown().await;
}

#[tokio::test]
async fn test_secure_channel_failure_reuses_link() {
    let harness = TestHarness::start().await;
    let mut events = harness.client.events();
    let (_handle, mut rx) = harness
        .subscribe(&[CURRENT_TIME_NODE_ID], QUEUE_CAPACITY)
        .await;
    recv_within(&mut rx, RECONNECTION_TIMEOUT).await.assert_data();

    let counters = harness.server.counters();
    let (links, channels, sessions) = (
        counters.links_opened(),
        counters.channels_opened(),
        counters.sessions_created(),
    );

    harness.inject(methods::SECURE_CHANNEL_FAILURE).await;
    let started = expect_event(&mut events, DISCONNECT_TIMEOUT, |e| {
        matches!(e, ClientEvent::RecoveryStarted { .. })
    })
    .await;
    assert_eq!(
        started,
        ClientEvent::RecoveryStarted {
            kind: FailureKind::SecureChannel
        }
    );
    recv_data_within(&mut rx, RECONNECTION_TIMEOUT).await;

    assert_eq!(counters.links_opened(), links);
    assert_eq!(counters.channels_opened(), channels + 1);
    assert_eq!(counters.sessions_created(), sessions + 1);
    harness.shutdown().await;
}

#[tokio::test]
async fn test_connection_failure_rebuilds_every_layer() {
    let harness = TestHarness::start().await;
    let mut events = harness.client.events();
    let (_handle, mut rx) = harness
        .subscribe(&[CURRENT_TIME_NODE_ID], QUEUE_CAPACITY)
        .await;
    recv_within(&mut rx, RECONNECTION_TIMEOUT).await.assert_data();

    harness.inject(methods::CONNECTION_FAILURE).await;
    expect_event(&mut events, DISCONNECT_TIMEOUT, |e| {
        went_down(e, FailureKind::Transport)
    })
    .await;
    recv_data_within(&mut rx, RECONNECTION_TIMEOUT).await;

    let counters = harness.server.counters();
    assert_eq!(counters.links_opened(), 2);
    assert_eq!(counters.channels_opened(), 2);
    assert_eq!(counters.sessions_created(), 2);

    let stats = harness.client.stats();
    assert_eq!(stats.links_opened, 2);
    assert_eq!(stats.sessions_created, 2);
    assert!(stats.subscriptions_replayed >= 1);
    harness.shutdown().await;
}

// =============================================================================
// Isolation
// =============================================================================

#[tokio::test]
async fn test_subscription_failure_is_isolated() {
    let harness = TestHarness::start().await;
    let (lost, mut lost_rx) = harness
        .subscribe(&[CURRENT_TIME_NODE_ID], QUEUE_CAPACITY)
        .await;
    let (kept, mut kept_rx) = harness
        .subscribe(&[SEQUENCE_NODE_ID], QUEUE_CAPACITY)
        .await;
    recv_within(&mut lost_rx, RECONNECTION_TIMEOUT).await.assert_data();
    recv_within(&mut kept_rx, RECONNECTION_TIMEOUT).await.assert_data();

    let lost_id = lost.server_id().expect("armed");
    let kept_id = kept.server_id().expect("armed");
    let sessions = harness.server.counters().sessions_created();
    let mut events = harness.client.events();
    let mut status = lost.status_watch();

    harness
        .client
        .call(CallFixtures::subscription_failure(lost_id))
        .await
        .expect("fault injection call must succeed");

    expect_event(&mut events, DISCONNECT_TIMEOUT, |e| {
        matches!(e, ClientEvent::SubscriptionResumed { subscription } if *subscription == lost.key())
    })
    .await;
    assert!(status.has_changed().unwrap_or(false));
    assert_eq!(*status.borrow_and_update(), SubscriptionStatus::Live);

    drain(&mut lost_rx);
    recv_data_within(&mut lost_rx, RECONNECTION_TIMEOUT).await;

    assert_ne!(lost.server_id(), Some(lost_id));
    assert_eq!(kept.server_id(), Some(kept_id));
    assert_eq!(kept.status(), SubscriptionStatus::Live);
    assert_eq!(harness.server.counters().sessions_created(), sessions);
    assert_eq!(harness.client.state(), ClientState::Connected);

    let state_changes = drain_events(&mut events)
        .into_iter()
        .filter(|e| matches!(e, ClientEvent::StateChanged { .. }))
        .count();
    assert_eq!(state_changes, 0);
    harness.shutdown().await;
}

// =============================================================================
// Ordering
// =============================================================================

#[tokio::test]
async fn test_ordering_preserved_across_reconnect() {
    let harness = TestHarness::start().await;
    let mut events = harness.client.events();
    let (_handle, mut rx) = harness
        .subscribe(&[SEQUENCE_NODE_ID], QUEUE_CAPACITY)
        .await;

    let mut values = Vec::new();
    for _ in 0..3 {
        let message = recv_within(&mut rx, RECONNECTION_TIMEOUT).await;
        values.push(message.value.as_i64().expect("sequence value"));
    }

    harness.inject(methods::CONNECTION_FAILURE).await;
    expect_event(&mut events, RECONNECTION_TIMEOUT, |e| {
        matches!(e, ClientEvent::RecoveryCompleted { .. })
    })
    .await;

    let mut after = 0;
    while after < 5 {
        let message = recv_within(&mut rx, RECONNECTION_TIMEOUT).await;
        if message.is_fault() {
            continue;
        }
        match message.value {
            Variant::Int64(value) => values.push(value),
            other => panic!("unexpected value {other:?}"),
        }
        after += 1;
    }

    assert!(
        values.windows(2).all(|pair| pair[0] < pair[1]),
        "sequence values reordered: {values:?}"
    );
    harness.shutdown().await;
}
