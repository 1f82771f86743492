// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Secure channel management.
//!
//! The channel is invalidated, never destroyed, when the link underneath it
//! goes away; the next recovery runs a fresh handshake.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{SecureChannelError, UaError, UaResult};
use crate::types::Endpoint;

use super::transport::{with_deadline, ChannelToken, UaTransport};

// =============================================================================
// ChannelState
// =============================================================================

/// State of the secure channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ChannelState {
    /// No channel.
    #[default]
    Closed,

    /// Handshake in progress.
    Opening,

    /// Channel is usable.
    Open,

    /// The server or the link invalidated the channel.
    Invalid,
}

impl ChannelState {
    /// Returns `true` if the channel is usable.
    #[inline]
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open)
    }
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "Closed"),
            Self::Opening => write!(f, "Opening"),
            Self::Open => write!(f, "Open"),
            Self::Invalid => write!(f, "Invalid"),
        }
    }
}

// =============================================================================
// SecureChannelManager
// =============================================================================

/// Owns the secure channel and its token.
pub struct SecureChannelManager {
    transport: Arc<dyn UaTransport>,
    endpoint: Endpoint,
    lifetime: Duration,
    request_timeout: Duration,
    state: RwLock<ChannelState>,
    token: RwLock<Option<ChannelToken>>,
    opened: AtomicU64,
    renewed: AtomicU64,
}

impl SecureChannelManager {
    /// Creates a channel manager.
    pub fn new(
        transport: Arc<dyn UaTransport>,
        endpoint: Endpoint,
        lifetime: Duration,
        request_timeout: Duration,
    ) -> Self {
        Self {
            transport,
            endpoint,
            lifetime,
            request_timeout,
            state: RwLock::new(ChannelState::Closed),
            token: RwLock::new(None),
            opened: AtomicU64::new(0),
            renewed: AtomicU64::new(0),
        }
    }

    /// Returns the channel state.
    pub fn state(&self) -> ChannelState {
        *self.state.read()
    }

    /// Returns the current token if the channel is open.
    pub fn token(&self) -> Option<ChannelToken> {
        if self.state().is_open() {
            self.token.read().clone()
        } else {
            None
        }
    }

    /// Returns `true` if `channel_id` is the open channel.
    pub fn is_current(&self, channel_id: u32) -> bool {
        self.state().is_open()
            && self
                .token
                .read()
                .as_ref()
                .is_some_and(|t| t.channel_id == channel_id)
    }

    /// Number of handshakes completed.
    pub fn opened(&self) -> u64 {
        self.opened.load(Ordering::Relaxed)
    }

    /// Number of token renewals completed.
    pub fn renewed(&self) -> u64 {
        self.renewed.load(Ordering::Relaxed)
    }

    /// Runs the OpenSecureChannel handshake.
    pub async fn open(&self) -> UaResult<ChannelToken> {
        *self.state.write() = ChannelState::Opening;

        let result = with_deadline(
            "OpenSecureChannel",
            self.request_timeout,
            self.transport.open_secure_channel(&self.endpoint, self.lifetime),
        )
        .await;

        match result {
            Ok(token) => {
                tracing::debug!(
                    endpoint = %self.endpoint.url,
                    channel_id = token.channel_id,
                    lifetime_ms = token.revised_lifetime.as_millis() as u64,
                    "Secure channel opened"
                );
                *self.token.write() = Some(token.clone());
                *self.state.write() = ChannelState::Open;
                self.opened.fetch_add(1, Ordering::Relaxed);
                Ok(token)
            }
            Err(e) => {
                *self.state.write() = ChannelState::Closed;
                *self.token.write() = None;
                Err(e)
            }
        }
    }

    /// Returns `true` when the token should be renewed.
    pub fn renewal_due(&self) -> bool {
        self.token().is_some_and(|t| t.renewal_due())
    }

    /// Renews the token of the open channel.
    pub async fn renew(&self) -> UaResult<ChannelToken> {
        let current = self
            .token()
            .ok_or_else(|| UaError::secure_channel(SecureChannelError::NotOpen))?;

        if current.is_expired() {
            return Err(UaError::secure_channel(SecureChannelError::Expired {
                channel_id: current.channel_id,
                token_id: current.token_id,
            }));
        }

        let token = with_deadline(
            "RenewSecureChannel",
            self.request_timeout,
            self.transport.renew_secure_channel(&current, self.lifetime),
        )
        .await?;

        if !self.is_current(current.channel_id) {
            return Err(UaError::secure_channel(SecureChannelError::invalid(
                current.channel_id,
            )));
        }

        tracing::debug!(
            channel_id = token.channel_id,
            token_id = token.token_id,
            "Secure channel token renewed"
        );
        *self.token.write() = Some(token.clone());
        self.renewed.fetch_add(1, Ordering::Relaxed);
        Ok(token)
    }

    /// Marks the channel invalid.
    ///
    /// With `Some(id)` only the matching open channel is invalidated. Returns
    /// `true` if the state changed.
    pub fn invalidate(&self, channel_id: Option<u32>) -> bool {
        if let Some(id) = channel_id {
            if !self.is_current(id) {
                return false;
            }
        }
        let mut state = self.state.write();
        if state.is_open() {
            *state = ChannelState::Invalid;
            true
        } else {
            false
        }
    }

    /// Drops the channel locally without talking to the server.
    pub fn discard(&self) {
        *self.state.write() = ChannelState::Closed;
        *self.token.write() = None;
    }

    /// Closes the channel, telling the server if it is still open.
    pub async fn close(&self) {
        if let Some(token) = self.token() {
            let result = with_deadline(
                "CloseSecureChannel",
                self.request_timeout,
                self.transport.close_secure_channel(&token),
            )
            .await;
            if let Err(e) = result {
                e.log("close secure channel");
            }
        }
        self.discard();
    }
}

impl fmt::Debug for SecureChannelManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecureChannelManager")
            .field("endpoint", &self.endpoint.url)
            .field("state", &self.state())
            .finish()
    }
}
