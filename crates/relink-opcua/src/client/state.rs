// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Client state and lifecycle events.
//!
//! The state is a single value guarded by a mutex. Every accepted transition
//! is published twice: on a `watch` channel for callers waiting on a specific
//! state, and as a [`ClientEvent::StateChanged`] on a broadcast channel so a
//! fast reconnect is never missed.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};

use crate::types::{ClientState, FailureKind};

use super::registry::SubscriptionKey;

// =============================================================================
// ClientEvent
// =============================================================================

/// Edge-triggered client notifications.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// The client state changed.
    StateChanged {
        /// Previous state.
        from: ClientState,
        /// New state.
        to: ClientState,
    },

    /// A layer failure was detected.
    FailureDetected {
        /// Failed layer.
        kind: FailureKind,
        /// What was observed.
        reason: String,
    },

    /// A recovery sequence started.
    RecoveryStarted {
        /// Layer recovery starts from.
        kind: FailureKind,
    },

    /// A recovery sequence finished.
    RecoveryCompleted {
        /// Attempts needed.
        attempts: u32,
        /// Time from start to completion.
        elapsed: Duration,
        /// Subscriptions still waiting to be replayed.
        pending: usize,
    },

    /// A subscription stopped receiving data.
    SubscriptionFaulted {
        /// The subscription.
        subscription: SubscriptionKey,
        /// Failed layer.
        kind: FailureKind,
    },

    /// A subscription was replayed and receives data again.
    SubscriptionResumed {
        /// The subscription.
        subscription: SubscriptionKey,
    },
}

// =============================================================================
// StateMachine
// =============================================================================

/// Serializes client state transitions.
#[derive(Debug)]
pub struct StateMachine {
    state: Mutex<ClientState>,
    watch: watch::Sender<ClientState>,
    events: broadcast::Sender<ClientEvent>,
}

impl StateMachine {
    /// Creates a state machine in `Disconnected`.
    pub fn new(event_capacity: usize) -> Self {
        let (watch, _) = watch::channel(ClientState::Disconnected);
        let (events, _) = broadcast::channel(event_capacity.max(1));
        Self {
            state: Mutex::new(ClientState::Disconnected),
            watch,
            events,
        }
    }

    /// Returns the current state.
    pub fn current(&self) -> ClientState {
        *self.state.lock()
    }

    /// Returns `true` if `from -> to` is a legal transition.
    pub fn is_allowed(from: ClientState, to: ClientState) -> bool {
        use ClientState::*;

        match (from, to) {
            (Closed, _) => false,
            (Closing, Closed) => true,
            (Closing, _) => false,
            (_, Closing) => true,
            (Disconnected, Connecting) => true,
            (Connecting, SecureChannelUp) => true,
            (SecureChannelUp, SessionUp) => true,
            (SessionUp, Connected) => true,
            (Connecting | SecureChannelUp | SessionUp | Connected, Disconnected) => true,
            _ => false,
        }
    }

    /// Applies a transition if it is legal.
    ///
    /// Returns `false` and leaves the state untouched otherwise.
    pub fn transition(&self, to: ClientState) -> bool {
        let mut state = self.state.lock();
        let from = *state;
        if !Self::is_allowed(from, to) {
            tracing::trace!(from = %from, to = %to, "State transition rejected");
            return false;
        }
        *state = to;
        self.watch.send_replace(to);
        let _ = self.events.send(ClientEvent::StateChanged { from, to });
        drop(state);

        tracing::debug!(from = %from, to = %to, "Client state changed");
        true
    }

    /// Moves to `Disconnected` from any connecting or connected state.
    pub fn fall_back(&self) -> bool {
        self.transition(ClientState::Disconnected)
    }

    /// Publishes an event. Having no subscribers is not an error.
    pub fn emit(&self, event: ClientEvent) {
        let _ = self.events.send(event);
    }

    /// Subscribes to client events.
    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    /// Returns a receiver tracking the current state.
    pub fn watch(&self) -> watch::Receiver<ClientState> {
        self.watch.subscribe()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_table() {
        use ClientState::*;

        assert!(StateMachine::is_allowed(Disconnected, Connecting));
        assert!(StateMachine::is_allowed(SessionUp, Connected));
        assert!(StateMachine::is_allowed(Connected, Disconnected));
        assert!(StateMachine::is_allowed(Connected, Closing));
        assert!(StateMachine::is_allowed(Closing, Closed));

        assert!(!StateMachine::is_allowed(Disconnected, Connected));
        assert!(!StateMachine::is_allowed(Connecting, SessionUp));
        assert!(!StateMachine::is_allowed(Disconnected, Disconnected));
        assert!(!StateMachine::is_allowed(Closing, Connecting));
        assert!(!StateMachine::is_allowed(Closed, Closing));
    }

    #[tokio::test]
    async fn test_transitions_are_published() {
        let machine = StateMachine::new(16);
        let mut events = machine.subscribe();
        let mut watch = machine.watch();

        assert!(machine.transition(ClientState::Connecting));
        assert!(machine.transition(ClientState::SecureChannelUp));
        assert!(!machine.transition(ClientState::Connected));
        assert_eq!(machine.current(), ClientState::SecureChannelUp);

        assert_eq!(
            events.recv().await.unwrap(),
            ClientEvent::StateChanged {
                from: ClientState::Disconnected,
                to: ClientState::Connecting,
            }
        );
        assert_eq!(
            events.recv().await.unwrap(),
            ClientEvent::StateChanged {
                from: ClientState::Connecting,
                to: ClientState::SecureChannelUp,
            }
        );
        assert!(events.try_recv().is_err());

        watch.changed().await.unwrap();
        assert_eq!(*watch.borrow(), ClientState::SecureChannelUp);
    }

    #[test]
    fn test_closing_is_final() {
        let machine = StateMachine::new(4);
        assert!(machine.transition(ClientState::Closing));
        assert!(!machine.fall_back());
        assert!(!machine.transition(ClientState::Connecting));
        assert!(machine.transition(ClientState::Closed));
        assert!(!machine.transition(ClientState::Closing));
        assert_eq!(machine.current(), ClientState::Closed);
    }
}
