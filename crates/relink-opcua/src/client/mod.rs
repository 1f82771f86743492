// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Connection layers, recovery and subscription replay.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                          UaClient                               │
//! │        (connect / close / call / events / state watch)          │
//! └─────────────────────────────────────────────────────────────────┘
//!          │                     │                       │
//!          ▼                     ▼                       ▼
//! ┌─────────────────┐  ┌───────────────────┐  ┌─────────────────────┐
//! │ Health watcher  │  │  Recovery driver  │  │ SubscriptionRegistry│
//! │ (per link epoch)│─▶│  (single flight)  │─▶│  (ordered replay)   │
//! └─────────────────┘  └───────────────────┘  └─────────────────────┘
//!          │                     │
//!          ▼                     ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │   LinkManager  →  SecureChannelManager  →  SessionManager       │
//! └─────────────────────────────────────────────────────────────────┘
//!                                │
//!                                ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        UaTransport                              │
//! │                   (wire boundary, async)                        │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A failure in one layer invalidates that layer and everything above it.
//! Recovery restarts from the deepest failed layer, so a revoked session
//! keeps its secure channel and a lost subscription keeps its session.

mod channel;
mod link;
mod recovery;
mod registry;
mod session;
mod state;
mod stats;
mod transport;
mod watcher;
mod wrapper;

pub use channel::{ChannelState, SecureChannelManager};
pub use link::LinkManager;
pub use recovery::{Failure, RecoveryPlan};
pub use registry::{
    ArmContext, ReplayOutcome, Route, SubscriptionKey, SubscriptionRegistry, SubscriptionStatus,
};
pub use session::{SessionInfo, SessionManager, SessionState, SessionStats};
pub use state::{ClientEvent, StateMachine};
pub use stats::{ClientStats, StatsSnapshot};
pub use transport::{
    ChannelToken, DataChangeNotification, MonitoredItemCreate, MonitoredItemResult, ServerEvent,
    SessionToken, TransportState, UaTransport,
};
pub use wrapper::UaClient;
