// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Connection resilience core for OPC UA clients.
//!
//! This crate keeps an OPC UA client usable across network and server faults.
//! It owns the connection layers (transport link, secure channel, session),
//! detects when any of them fails, rebuilds from the deepest failed layer and
//! replays every subscription the consumer created, in creation order. The
//! consumer's queue stays the same across reconnects.
//!
//! # Features
//!
//! - Layered state machine with edge-triggered events and a state watch
//! - Single-flight recovery with bounded backoff
//! - Subscription registry with ordered replay and per-subscription retries
//! - Blocking backpressure into caller-owned queues, with one fault marker per
//!   fault episode
//! - Transport-agnostic: the wire is an async [`UaTransport`] trait
//!
//! # Error Handling
//!
//! ```text
//! UaError
//! ├── Transport      - Link-level failures (full recovery)
//! ├── SecureChannel  - Channel invalid or expired (recovery from channel)
//! ├── Session        - Session revoked (recovery from session)
//! ├── Subscription   - One subscription lost or failed to arm
//! ├── Consumer       - Invalid input, never triggers recovery
//! ├── Service        - Not connected, rejected call, client closed
//! ├── Configuration  - Invalid settings
//! └── Timeout        - Request or connect deadline exceeded
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use relink_opcua::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> UaResult<()> {
//!     let config = ClientConfig::builder()
//!         .endpoint("opc.tcp://localhost:4840")
//!         .build()?;
//!
//!     let client = UaClient::new(config, transport)?;
//!     client.connect().await?;
//!
//!     let (tx, mut rx) = tokio::sync::mpsc::channel(5);
//!     let handle = NodeMonitor::new(&client)
//!         .chan_subscribe(SubscriptionParameters::default(), tx, ["ns=0;i=2258"])
//!         .await?;
//!
//!     while let Some(message) = rx.recv().await {
//!         println!("{:?}", message.value);
//!     }
//!
//!     handle.unsubscribe().await?;
//!     client.close().await
//! }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![deny(unsafe_code)]

pub mod client;
pub mod config;
pub mod error;
pub mod monitor;
pub mod types;

pub use error::{
    ConfigurationError, ConsumerError, ErrorCode, ErrorSeverity, SecureChannelError, ServiceError,
    SessionError, SubscriptionError, TimeoutError, TransportError, UaError, UaResult,
};

pub use types::{
    CallMethodRequest, CallMethodResult, ClientState, DataChangeMessage, DeliveryFault, Endpoint,
    FailureKind, NodeId, NodeIdentifier, SecurityMode, SecurityPolicy, StatusCode,
    SubscriptionParameters, UserIdentity, Variant, DEFAULT_SUBSCRIPTION_INTERVAL,
};

pub use config::{ClientConfig, ClientConfigBuilder, ConfigFormat, ReconnectPolicy, ReconnectStrategy};

pub use client::{
    ClientEvent, DataChangeNotification, ServerEvent, StatsSnapshot, SubscriptionKey,
    SubscriptionStatus, UaClient, UaTransport,
};

pub use monitor::{NodeMonitor, SubscriptionHandle};

/// Commonly used items.
pub mod prelude {
    pub use crate::client::{ClientEvent, SubscriptionStatus, UaClient, UaTransport};
    pub use crate::config::{ClientConfig, ReconnectPolicy};
    pub use crate::error::{UaError, UaResult};
    pub use crate::monitor::{NodeMonitor, SubscriptionHandle};
    pub use crate::types::{
        CallMethodRequest, ClientState, DataChangeMessage, FailureKind, NodeId,
        SubscriptionParameters, Variant,
    };
}
