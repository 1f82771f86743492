// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Client statistics.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Counters for client activity.
#[derive(Debug, Default)]
pub struct ClientStats {
    connects: AtomicU64,
    failures_detected: AtomicU64,
    recoveries_started: AtomicU64,
    recoveries_completed: AtomicU64,
    recovery_attempts: AtomicU64,
    subscriptions_replayed: AtomicU64,
    replay_failures: AtomicU64,
    notifications_routed: AtomicU64,
    notifications_discarded: AtomicU64,
    calls: AtomicU64,
    call_errors: AtomicU64,
}

impl ClientStats {
    /// Records a successful initial connect.
    pub fn record_connect(&self) {
        self.connects.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a detected layer failure.
    pub fn record_failure(&self) {
        self.failures_detected.fetch_add(1, Ordering::Relaxed);
    }

    /// Records the start of a recovery sequence.
    pub fn record_recovery_started(&self) {
        self.recoveries_started.fetch_add(1, Ordering::Relaxed);
    }

    /// Records the completion of a recovery sequence.
    pub fn record_recovery_completed(&self) {
        self.recoveries_completed.fetch_add(1, Ordering::Relaxed);
    }

    /// Records one recovery attempt.
    pub fn record_recovery_attempt(&self) {
        self.recovery_attempts.fetch_add(1, Ordering::Relaxed);
    }

    /// Records replayed and pending subscriptions.
    pub fn record_replay(&self, replayed: usize, pending: usize) {
        self.subscriptions_replayed
            .fetch_add(replayed as u64, Ordering::Relaxed);
        self.replay_failures
            .fetch_add(pending as u64, Ordering::Relaxed);
    }

    /// Records a notification handed to a forwarder.
    pub fn record_routed(&self) {
        self.notifications_routed.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a notification nobody was waiting for.
    pub fn record_discarded(&self) {
        self.notifications_discarded.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a method call and its outcome.
    pub fn record_call(&self, ok: bool) {
        self.calls.fetch_add(1, Ordering::Relaxed);
        if !ok {
            self.call_errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Returns the number of recoveries started.
    pub fn recoveries_started(&self) -> u64 {
        self.recoveries_started.load(Ordering::Relaxed)
    }

    /// Returns the number of recoveries completed.
    pub fn recoveries_completed(&self) -> u64 {
        self.recoveries_completed.load(Ordering::Relaxed)
    }

    /// Returns a point-in-time copy of all counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            connects: self.connects.load(Ordering::Relaxed),
            failures_detected: self.failures_detected.load(Ordering::Relaxed),
            recoveries_started: self.recoveries_started.load(Ordering::Relaxed),
            recoveries_completed: self.recoveries_completed.load(Ordering::Relaxed),
            recovery_attempts: self.recovery_attempts.load(Ordering::Relaxed),
            subscriptions_replayed: self.subscriptions_replayed.load(Ordering::Relaxed),
            replay_failures: self.replay_failures.load(Ordering::Relaxed),
            notifications_routed: self.notifications_routed.load(Ordering::Relaxed),
            notifications_discarded: self.notifications_discarded.load(Ordering::Relaxed),
            calls: self.calls.load(Ordering::Relaxed),
            call_errors: self.call_errors.load(Ordering::Relaxed),
            links_opened: 0,
            channels_opened: 0,
            channels_renewed: 0,
            sessions_created: 0,
        }
    }
}

/// Serializable copy of the client counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    /// Successful initial connects.
    pub connects: u64,
    /// Layer failures detected.
    pub failures_detected: u64,
    /// Recovery sequences started.
    pub recoveries_started: u64,
    /// Recovery sequences completed.
    pub recoveries_completed: u64,
    /// Recovery attempts, including retries.
    pub recovery_attempts: u64,
    /// Subscriptions re-armed by replay.
    pub subscriptions_replayed: u64,
    /// Subscriptions that exhausted local replay retries.
    pub replay_failures: u64,
    /// Notifications handed to forwarders.
    pub notifications_routed: u64,
    /// Notifications without a destination.
    pub notifications_discarded: u64,
    /// Method calls.
    pub calls: u64,
    /// Failed method calls.
    pub call_errors: u64,
    /// Transport links opened.
    pub links_opened: u64,
    /// Secure channels opened.
    pub channels_opened: u64,
    /// Secure channel tokens renewed.
    pub channels_renewed: u64,
    /// Sessions created.
    pub sessions_created: u64,
}
