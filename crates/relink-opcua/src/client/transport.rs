// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Transport abstraction.
//!
//! [`UaTransport`] is the wire boundary of the client. Encoding, framing and
//! the cryptographic handshake live behind it; the client only sees typed
//! requests, responses and an asynchronous stream of [`ServerEvent`]s for the
//! currently open link.

use std::fmt;
use std::future::Future;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::{UaError, UaResult};
use crate::types::{
    CallMethodRequest, CallMethodResult, Endpoint, NodeId, StatusCode, SubscriptionParameters,
    UserIdentity, Variant,
};

// =============================================================================
// TransportState
// =============================================================================

/// State of the transport link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TransportState {
    /// No link is open.
    #[default]
    Disconnected,

    /// Link is being opened.
    Connecting,

    /// Link is open.
    Connected,

    /// Link was lost and has not been closed locally yet.
    Failed,
}

impl TransportState {
    /// Returns `true` if the link is open.
    #[inline]
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Returns `true` if the link has failed.
    #[inline]
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed)
    }
}

impl fmt::Display for TransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

// =============================================================================
// Wire Types
// =============================================================================

/// Security token issued by OpenSecureChannel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelToken {
    /// Server-assigned channel id.
    pub channel_id: u32,

    /// Token id, changes on every renewal.
    pub token_id: u32,

    /// When the token was issued.
    pub created_at: Instant,

    /// Lifetime granted by the server.
    pub revised_lifetime: Duration,
}

impl ChannelToken {
    /// Creates a token issued now.
    pub fn new(channel_id: u32, token_id: u32, revised_lifetime: Duration) -> Self {
        Self {
            channel_id,
            token_id,
            created_at: Instant::now(),
            revised_lifetime,
        }
    }

    /// Returns `true` once 75% of the lifetime has elapsed.
    pub fn renewal_due(&self) -> bool {
        self.created_at.elapsed() >= self.revised_lifetime.mul_f64(0.75)
    }

    /// Returns `true` once the full lifetime has elapsed.
    pub fn is_expired(&self) -> bool {
        self.created_at.elapsed() >= self.revised_lifetime
    }
}

/// Session credentials returned by CreateSession.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionToken {
    /// Server-assigned session id.
    pub session_id: String,

    /// Authentication token used on every request.
    pub auth_token: String,

    /// Timeout granted by the server.
    pub revised_timeout: Duration,
}

/// Monitored item creation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitoredItemCreate {
    /// Node to sample.
    pub node_id: NodeId,

    /// Client-assigned handle echoed in notifications.
    pub client_handle: u32,

    /// Sampling interval.
    pub sampling_interval: Duration,

    /// Server-side queue size.
    pub queue_size: u32,
}

/// Monitored item creation result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitoredItemResult {
    /// Per-item status.
    pub status_code: StatusCode,

    /// Server-assigned item id.
    pub monitored_item_id: u32,
}

/// A data change published by the server.
#[derive(Debug, Clone, PartialEq)]
pub struct DataChangeNotification {
    /// Server-side subscription id.
    pub subscription_id: u32,

    /// Client handle of the monitored item.
    pub client_handle: u32,

    /// New value.
    pub value: Variant,

    /// Value status.
    pub status_code: StatusCode,

    /// Source timestamp.
    pub source_timestamp: Option<DateTime<Utc>>,

    /// Server timestamp.
    pub server_timestamp: DateTime<Utc>,
}

/// Asynchronous signal delivered on an open link.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    /// The link was closed by the peer or the network.
    LinkClosed {
        /// Reason.
        reason: String,
    },

    /// The server invalidated a secure channel.
    ChannelInvalid {
        /// Channel id.
        channel_id: u32,
        /// Reason.
        reason: String,
    },

    /// The server revoked a session.
    SessionInvalid {
        /// Session id.
        session_id: String,
        /// Reason.
        reason: String,
    },

    /// The server dropped a subscription.
    SubscriptionLost {
        /// Server-side subscription id.
        subscription_id: u32,
        /// Reason.
        reason: String,
    },

    /// A data change notification.
    DataChange(DataChangeNotification),
}

// =============================================================================
// UaTransport
// =============================================================================

/// Wire-level services used by the client.
///
/// Implementations serve one link at a time. `open_link` returns the event
/// stream for that link; the stream ending is equivalent to
/// [`ServerEvent::LinkClosed`].
#[async_trait]
pub trait UaTransport: Send + Sync + 'static {
    // =========================================================================
    // Link
    // =========================================================================

    /// Opens the transport link.
    async fn open_link(&self, endpoint: &Endpoint) -> UaResult<mpsc::Receiver<ServerEvent>>;

    /// Closes the transport link.
    async fn close_link(&self) -> UaResult<()>;

    // =========================================================================
    // Secure Channel
    // =========================================================================

    /// Runs the OpenSecureChannel handshake.
    async fn open_secure_channel(
        &self,
        endpoint: &Endpoint,
        requested_lifetime: Duration,
    ) -> UaResult<ChannelToken>;

    /// Renews the token of an open channel.
    async fn renew_secure_channel(
        &self,
        channel: &ChannelToken,
        requested_lifetime: Duration,
    ) -> UaResult<ChannelToken>;

    /// Closes a secure channel.
    async fn close_secure_channel(&self, channel: &ChannelToken) -> UaResult<()>;

    // =========================================================================
    // Session
    // =========================================================================

    /// Creates a session on the given channel.
    async fn create_session(
        &self,
        channel: &ChannelToken,
        name: &str,
        requested_timeout: Duration,
    ) -> UaResult<SessionToken>;

    /// Activates a session on the given channel.
    async fn activate_session(
        &self,
        channel: &ChannelToken,
        session: &SessionToken,
        identity: &UserIdentity,
    ) -> UaResult<()>;

    /// Closes a session.
    async fn close_session(&self, session: &SessionToken) -> UaResult<()>;

    /// Lightweight round trip proving the session is alive.
    async fn keepalive(&self, session: &SessionToken) -> UaResult<()>;

    // =========================================================================
    // Subscriptions
    // =========================================================================

    /// Creates a subscription and returns its server-side id.
    async fn create_subscription(
        &self,
        session: &SessionToken,
        parameters: &SubscriptionParameters,
    ) -> UaResult<u32>;

    /// Creates monitored items in a subscription.
    async fn create_monitored_items(
        &self,
        session: &SessionToken,
        subscription_id: u32,
        items: &[MonitoredItemCreate],
    ) -> UaResult<Vec<MonitoredItemResult>>;

    /// Deletes a subscription.
    async fn delete_subscription(&self, session: &SessionToken, subscription_id: u32)
        -> UaResult<()>;

    // =========================================================================
    // Methods
    // =========================================================================

    /// Invokes a server method.
    async fn call(
        &self,
        session: &SessionToken,
        request: &CallMethodRequest,
    ) -> UaResult<CallMethodResult>;
}

/// Runs a service request with a deadline.
pub(crate) async fn with_deadline<T, F>(
    service: &'static str,
    deadline: Duration,
    request: F,
) -> UaResult<T>
where
    F: Future<Output = UaResult<T>>,
{
    match tokio::time::timeout(deadline, request).await {
        Ok(result) => result,
        Err(_) => Err(UaError::request_timeout(service, deadline)),
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TimeoutError;

    #[test]
    fn test_transport_state() {
        assert!(TransportState::Connected.is_connected());
        assert!(TransportState::Failed.is_failed());
        assert!(!TransportState::Connecting.is_connected());
        assert_eq!(TransportState::default(), TransportState::Disconnected);
    }

    #[test]
    fn test_channel_token_renewal() {
        let token = ChannelToken::new(1, 1, Duration::from_secs(3600));
        assert!(!token.renewal_due());
        assert!(!token.is_expired());

        let token = ChannelToken::new(1, 1, Duration::ZERO);
        assert!(token.renewal_due());
        assert!(token.is_expired());
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_deadline() {
        let ok = with_deadline("Read", Duration::from_secs(1), async { Ok(7) }).await;
        assert_eq!(ok.unwrap(), 7);

        let slow = with_deadline("Read", Duration::from_secs(1), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert!(matches!(
            slow,
            Err(UaError::Timeout(TimeoutError::Request { service: "Read", .. }))
        ));
    }
}
