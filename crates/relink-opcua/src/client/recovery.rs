// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Recovery driver.
//!
//! Failures are reported over an unbounded channel to a single driver task.
//! The driver turns the first failure it sees into a [`RecoveryPlan`],
//! absorbs every other failure that is already queued or arrives while the
//! plan is being executed, and retries with backoff until the client is
//! connected and replayed or the client is closed. There is never more than
//! one recovery sequence in flight.

use std::collections::BTreeSet;
use std::sync::atomic::Ordering;
use std::sync::Weak;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::types::FailureKind;

use super::registry::SubscriptionKey;
use super::state::ClientEvent;
use super::wrapper::ClientCore;

// =============================================================================
// Failure
// =============================================================================

/// A detected layer failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    /// Failed layer.
    pub kind: FailureKind,

    /// What was observed.
    pub reason: String,

    /// Connection generation the failure was detected in.
    pub generation: u64,

    /// Affected subscription for subscription-level failures.
    pub subscription: Option<SubscriptionKey>,

    /// Detection time.
    pub detected_at: Instant,
}

impl Failure {
    /// Creates a failure detected now.
    pub fn new(kind: FailureKind, reason: impl Into<String>, generation: u64) -> Self {
        Self {
            kind,
            reason: reason.into(),
            generation,
            subscription: None,
            detected_at: Instant::now(),
        }
    }

    /// Attaches the affected subscription.
    pub fn for_subscription(mut self, key: SubscriptionKey) -> Self {
        self.subscription = Some(key);
        self
    }
}

// =============================================================================
// RecoveryPlan
// =============================================================================

/// What one recovery sequence has to rebuild.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryPlan {
    start: FailureKind,
    subscriptions: BTreeSet<SubscriptionKey>,
    failures: usize,
    reason: String,
}

impl RecoveryPlan {
    /// Creates a plan from the first failure.
    pub fn new(failure: Failure) -> Self {
        Self {
            start: failure.kind,
            subscriptions: failure.subscription.into_iter().collect(),
            failures: 1,
            reason: failure.reason,
        }
    }

    /// Folds another failure into this plan.
    pub fn absorb(&mut self, failure: Failure) {
        self.start = self.start.deepest(failure.kind);
        self.subscriptions.extend(failure.subscription);
        self.failures += 1;
    }

    /// Moves the restart point down to `kind` if it is deeper.
    pub fn escalate(&mut self, kind: FailureKind) {
        self.start = self.start.deepest(kind);
    }

    /// Layer recovery restarts from.
    pub fn start(&self) -> FailureKind {
        self.start
    }

    /// Subscriptions named by subscription-level failures, in key order.
    pub fn affected(&self) -> Vec<SubscriptionKey> {
        self.subscriptions.iter().copied().collect()
    }

    /// Number of failures folded into this plan.
    pub fn failures(&self) -> usize {
        self.failures
    }

    /// Reason of the first failure.
    pub fn reason(&self) -> &str {
        &self.reason
    }
}

// =============================================================================
// Driver
// =============================================================================

/// Runs until the client is closed or dropped.
pub(crate) async fn run(
    core: Weak<ClientCore>,
    mut failures: mpsc::UnboundedReceiver<Failure>,
    cancel: CancellationToken,
) {
    loop {
        let first = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            failure = failures.recv() => match failure {
                Some(failure) => failure,
                None => break,
            },
        };

        let plan = {
            let Some(client) = core.upgrade() else {
                break;
            };
            if client.is_stale(&first) {
                tracing::trace!(kind = %first.kind, "Ignoring stale failure");
                continue;
            }
            let mut plan = RecoveryPlan::new(first);
            absorb_queued(&client, &mut failures, &mut plan);
            client.recovering.store(true, Ordering::Release);
            plan
        };

        let finished = recover(&core, &mut failures, plan, &cancel).await;
        if let Some(client) = core.upgrade() {
            client.recovering.store(false, Ordering::Release);
        }

        if !finished {
            break;
        }
    }

    tracing::debug!("Recovery driver stopped");
}

/// Drives one recovery sequence. Returns `false` if cancelled or the client
/// was dropped.
///
/// The client is upgraded once per attempt and released again before the
/// backoff sleep, so a dropped client ends the sequence at the next attempt.
async fn recover(
    core: &Weak<ClientCore>,
    failures: &mut mpsc::UnboundedReceiver<Failure>,
    mut plan: RecoveryPlan,
    cancel: &CancellationToken,
) -> bool {
    let Some(client) = core.upgrade() else {
        return false;
    };
    let policy = client.config.reconnect.clone();
    let started = Instant::now();
    let mut attempts: u32 = 0;

    client.stats.record_recovery_started();
    client.state.emit(ClientEvent::RecoveryStarted { kind: plan.start() });
    tracing::info!(
        kind = %plan.start(),
        reason = %plan.reason(),
        failures = plan.failures(),
        "Recovery started"
    );
    drop(client);

    loop {
        if attempts > 0 {
            let delay = policy.delay_for_attempt(attempts - 1);
            tracing::debug!(
                attempt = attempts + 1,
                delay_ms = delay.as_millis() as u64,
                "Waiting before next recovery attempt"
            );
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return false,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        let Some(client) = core.upgrade() else {
            tracing::debug!(attempts, "Client dropped, abandoning recovery");
            return false;
        };

        attempts += 1;
        client.stats.record_recovery_attempt();
        absorb_queued(&client, failures, &mut plan);

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return false,
            result = client.recover_once(&plan, cancel) => result,
        };

        match result {
            Ok(outcome) => {
                // Failures raised against the layers just rebuilt need another pass.
                let mut next: Option<RecoveryPlan> = None;
                while let Ok(failure) = failures.try_recv() {
                    if client.is_stale(&failure) {
                        continue;
                    }
                    match next.as_mut() {
                        Some(plan) => plan.absorb(failure),
                        None => next = Some(RecoveryPlan::new(failure)),
                    }
                }
                if let Some(next) = next {
                    tracing::info!(kind = %next.start(), "Failure during recovery, retrying");
                    plan = next;
                    continue;
                }

                let elapsed = started.elapsed();
                client.stats.record_recovery_completed();
                client.state.emit(ClientEvent::RecoveryCompleted {
                    attempts,
                    elapsed,
                    pending: outcome.pending.len(),
                });
                tracing::info!(
                    attempts,
                    elapsed_ms = elapsed.as_millis() as u64,
                    replayed = outcome.replayed.len(),
                    pending = outcome.pending.len(),
                    "Recovery completed"
                );

                if !outcome.pending.is_empty() {
                    client.schedule_replay(outcome.pending, policy.max_delay);
                }
                return true;
            }
            Err(e) => {
                if cancel.is_cancelled() {
                    return false;
                }
                e.log("recovery attempt");
                if let Some(kind) = e.failure_kind() {
                    plan.escalate(kind);
                }
            }
        }
    }
}

fn absorb_queued(
    core: &ClientCore,
    failures: &mut mpsc::UnboundedReceiver<Failure>,
    plan: &mut RecoveryPlan,
) {
    while let Ok(failure) = failures.try_recv() {
        if !core.is_stale(&failure) {
            plan.absorb(failure);
        }
    }
}

/// Sends `keys` back to the driver after `delay` as subscription failures.
pub(crate) fn retry_later(
    sender: mpsc::UnboundedSender<Failure>,
    keys: Vec<SubscriptionKey>,
    generation: u64,
    delay: Duration,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = tokio::time::sleep(delay) => {
                for key in keys {
                    let failure = Failure::new(FailureKind::Subscription, "pending replay", generation)
                        .for_subscription(key);
                    if sender.send(failure).is_err() {
                        break;
                    }
                }
            }
        }
    });
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_starts_at_deepest_layer() {
        let mut plan = RecoveryPlan::new(Failure::new(FailureKind::Session, "revoked", 1));
        assert_eq!(plan.start(), FailureKind::Session);

        plan.absorb(Failure::new(FailureKind::Subscription, "lost", 1));
        assert_eq!(plan.start(), FailureKind::Session);

        plan.absorb(Failure::new(FailureKind::Transport, "reset", 1));
        assert_eq!(plan.start(), FailureKind::Transport);
        assert_eq!(plan.failures(), 3);
        assert_eq!(plan.reason(), "revoked");

        plan.escalate(FailureKind::SecureChannel);
        assert_eq!(plan.start(), FailureKind::Transport);
    }

    #[test]
    fn test_plan_collects_affected_subscriptions() {
        let (first, second) = (SubscriptionKey::from_raw(2), SubscriptionKey::from_raw(1));
        let mut plan = RecoveryPlan::new(
            Failure::new(FailureKind::Subscription, "lost", 1).for_subscription(first),
        );
        plan.absorb(Failure::new(FailureKind::Subscription, "lost", 1).for_subscription(second));
        plan.absorb(Failure::new(FailureKind::Subscription, "lost", 1).for_subscription(first));

        assert_eq!(plan.affected(), vec![second, first]);
        assert_eq!(plan.start(), FailureKind::Subscription);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_later_reinjects_failures() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let key = SubscriptionKey::from_raw(7);

        retry_later(tx, vec![key], 3, Duration::from_secs(2), CancellationToken::new());
        tokio::time::sleep(Duration::from_secs(3)).await;

        let failure = rx.recv().await.unwrap();
        assert_eq!(failure.kind, FailureKind::Subscription);
        assert_eq!(failure.subscription, Some(key));
        assert_eq!(failure.generation, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_later_cancelled() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        retry_later(tx, vec![SubscriptionKey::from_raw(1)], 1, Duration::from_secs(2), cancel.clone());
        cancel.cancel();
        tokio::time::sleep(Duration::from_secs(3)).await;

        assert!(rx.recv().await.is_none());
    }
}
