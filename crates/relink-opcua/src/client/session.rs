// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! OPC UA session management.
//!
//! A session is bound to exactly one secure channel at a time and can be
//! revoked by the server while that channel stays intact.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::config::ClientConfig;
use crate::error::{SessionError, UaError, UaResult};

use super::transport::{with_deadline, ChannelToken, SessionToken, UaTransport};

// =============================================================================
// SessionState
// =============================================================================

/// State of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Session is not created.
    #[default]
    NotCreated,

    /// CreateSession in progress.
    Creating,

    /// ActivateSession in progress.
    Activating,

    /// Session is active and ready for use.
    Active,

    /// The server revoked the session.
    Invalid,

    /// Session is closed.
    Closed,
}

impl SessionState {
    /// Returns `true` if the session is active and ready for use.
    #[inline]
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }

    /// Returns `true` if the session is in a transitional state.
    #[inline]
    pub fn is_transitioning(&self) -> bool {
        matches!(self, Self::Creating | Self::Activating)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotCreated => write!(f, "NotCreated"),
            Self::Creating => write!(f, "Creating"),
            Self::Activating => write!(f, "Activating"),
            Self::Active => write!(f, "Active"),
            Self::Invalid => write!(f, "Invalid"),
            Self::Closed => write!(f, "Closed"),
        }
    }
}

// =============================================================================
// SessionInfo
// =============================================================================

/// Information about the active session.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    /// Credentials issued by the server.
    pub token: SessionToken,

    /// Channel the session is bound to.
    pub channel_id: u32,

    /// Session creation time.
    pub created_at: Instant,

    /// Last successful round trip.
    pub last_activity: Instant,
}

impl SessionInfo {
    fn new(token: SessionToken, channel_id: u32) -> Self {
        let now = Instant::now();
        Self {
            token,
            channel_id,
            created_at: now,
            last_activity: now,
        }
    }

    /// Returns the server-assigned session id.
    pub fn session_id(&self) -> &str {
        &self.token.session_id
    }

    /// Returns the session age.
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Returns the time since last activity.
    pub fn idle_time(&self) -> Duration {
        self.last_activity.elapsed()
    }
}

// =============================================================================
// SessionManager
// =============================================================================

/// Manages the session lifecycle.
pub struct SessionManager {
    transport: Arc<dyn UaTransport>,
    config: ClientConfig,
    state: RwLock<SessionState>,
    info: RwLock<Option<SessionInfo>>,
    stats: SessionStats,
}

impl SessionManager {
    /// Creates a new session manager.
    pub fn new(transport: Arc<dyn UaTransport>, config: ClientConfig) -> Self {
        Self {
            transport,
            config,
            state: RwLock::new(SessionState::NotCreated),
            info: RwLock::new(None),
            stats: SessionStats::default(),
        }
    }

    /// Returns the current session state.
    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    /// Returns the session info if active.
    pub fn info(&self) -> Option<SessionInfo> {
        if self.state().is_active() {
            self.info.read().clone()
        } else {
            None
        }
    }

    /// Returns the session token if active.
    pub fn token(&self) -> Option<SessionToken> {
        self.info().map(|info| info.token)
    }

    /// Returns the session statistics.
    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    /// Returns `true` if `session_id` is the active session.
    pub fn is_current(&self, session_id: &str) -> bool {
        self.info()
            .is_some_and(|info| info.session_id() == session_id)
    }

    /// Creates and activates a session on `channel`.
    pub async fn create_and_activate(&self, channel: &ChannelToken) -> UaResult<SessionInfo> {
        self.set_state(SessionState::Creating);

        let token = match with_deadline(
            "CreateSession",
            self.config.request_timeout,
            self.transport
                .create_session(channel, &self.config.session_name, self.config.session_timeout),
        )
        .await
        {
            Ok(token) => token,
            Err(e) => {
                self.fail();
                return Err(e);
            }
        };
        self.stats.record_creation();

        self.set_state(SessionState::Activating);
        let activated = with_deadline(
            "ActivateSession",
            self.config.request_timeout,
            self.transport
                .activate_session(channel, &token, &self.config.identity),
        )
        .await;

        if let Err(e) = activated {
            self.fail();
            return Err(e);
        }
        self.stats.record_activation();

        let info = SessionInfo::new(token, channel.channel_id);
        *self.info.write() = Some(info.clone());
        self.set_state(SessionState::Active);

        tracing::info!(
            endpoint = %self.config.endpoint,
            session_id = %info.session_id(),
            channel_id = channel.channel_id,
            "Session activated"
        );

        Ok(info)
    }

    /// Pings the server on the active session.
    pub async fn keepalive(&self) -> UaResult<()> {
        let token = self
            .token()
            .ok_or_else(|| UaError::session(SessionError::NotActivated))?;

        with_deadline(
            "Keepalive",
            self.config.request_timeout,
            self.transport.keepalive(&token),
        )
        .await?;

        if let Some(info) = self.info.write().as_mut() {
            if info.token.session_id == token.session_id {
                info.last_activity = Instant::now();
            }
        }
        Ok(())
    }

    /// Marks the session invalid.
    ///
    /// With `Some(id)` only the matching active session is invalidated.
    /// Returns `true` if the state changed.
    pub fn invalidate(&self, session_id: Option<&str>) -> bool {
        if let Some(id) = session_id {
            if !self.is_current(id) {
                return false;
            }
        }
        let mut state = self.state.write();
        if !state.is_active() {
            return false;
        }
        *state = SessionState::Invalid;
        drop(state);
        self.stats.record_failure();

        if let Some(info) = self.info.read().as_ref() {
            tracing::debug!(
                session_id = %info.session_id(),
                age_ms = info.age().as_millis() as u64,
                idle_ms = info.idle_time().as_millis() as u64,
                "Session invalidated"
            );
        }
        true
    }

    /// Drops the session locally without talking to the server.
    pub fn discard(&self) {
        *self.info.write() = None;
        self.set_state(SessionState::NotCreated);
    }

    /// Closes the session, telling the server if it is still active.
    pub async fn close(&self) {
        if let Some(token) = self.token() {
            let result = with_deadline(
                "CloseSession",
                self.config.request_timeout,
                self.transport.close_session(&token),
            )
            .await;
            if let Err(e) = result {
                e.log("close session");
            }
            tracing::info!(session_id = %token.session_id, "Session closed");
        }
        *self.info.write() = None;
        self.set_state(SessionState::Closed);
    }

    fn fail(&self) {
        *self.info.write() = None;
        self.stats.record_failure();
        self.set_state(SessionState::NotCreated);
    }

    fn set_state(&self, new_state: SessionState) {
        let old_state = std::mem::replace(&mut *self.state.write(), new_state);
        if old_state != new_state {
            tracing::trace!(
                old_state = %old_state,
                new_state = %new_state,
                "Session state changed"
            );
        }
    }
}

impl fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionManager")
            .field("endpoint", &self.config.endpoint)
            .field("state", &self.state())
            .finish()
    }
}

// =============================================================================
// SessionStats
// =============================================================================

/// Statistics for session operations.
#[derive(Debug, Default)]
pub struct SessionStats {
    creations: AtomicU64,
    activations: AtomicU64,
    failures: AtomicU64,
}

impl SessionStats {
    /// Records a session creation.
    pub fn record_creation(&self) {
        self.creations.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a session activation.
    pub fn record_activation(&self) {
        self.activations.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a session failure.
    pub fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the number of session creations.
    pub fn creations(&self) -> u64 {
        self.creations.load(Ordering::Relaxed)
    }

    /// Returns the number of session activations.
    pub fn activations(&self) -> u64 {
        self.activations.load(Ordering::Relaxed)
    }

    /// Returns the number of session failures.
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_state() {
        assert!(SessionState::Active.is_active());
        assert!(!SessionState::Invalid.is_active());
        assert!(SessionState::Creating.is_transitioning());
        assert!(SessionState::Activating.is_transitioning());
        assert!(!SessionState::Active.is_transitioning());
        assert_eq!(SessionState::Invalid.to_string(), "Invalid");
    }

    #[test]
    fn test_session_info() {
        let info = SessionInfo::new(
            SessionToken {
                session_id: "ns=1;i=42".into(),
                auth_token: "token".into(),
                revised_timeout: Duration::from_secs(60),
            },
            7,
        );
        assert_eq!(info.session_id(), "ns=1;i=42");
        assert_eq!(info.channel_id, 7);
        assert!(info.idle_time() <= info.age() + Duration::from_millis(1));
    }

    #[test]
    fn test_session_stats() {
        let stats = SessionStats::default();
        stats.record_creation();
        stats.record_activation();
        stats.record_failure();
        assert_eq!(stats.creations(), 1);
        assert_eq!(stats.activations(), 1);
        assert_eq!(stats.failures(), 1);
    }
}
