// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Test Fixtures
//!
//! Node ids, timeouts and configurations shared by the scenario tests.

use std::time::Duration;

use relink_opcua::config::{ClientConfig, ReconnectPolicy};
use relink_opcua::types::{CallMethodRequest, NodeId, SubscriptionParameters, Variant};

/// Node publishing the server's current time.
pub const CURRENT_TIME_NODE_ID: &str = "ns=0;i=2258";

/// Node publishing a monotonically increasing counter.
pub const SEQUENCE_NODE_ID: &str = "ns=2;s=sequence";

/// Time allowed for a failure to be noticed.
pub const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Time allowed for data delivery to resume after a failure.
pub const RECONNECTION_TIMEOUT: Duration = Duration::from_secs(10);

/// Capacity of consumer queues in the scenario tests.
pub const QUEUE_CAPACITY: usize = 5;

// =============================================================================
// Node Fixtures
// =============================================================================

/// Nodes known to the simulated server.
pub struct NodeFixtures;

impl NodeFixtures {
    /// `Server_ServerStatus_CurrentTime`.
    pub fn current_time() -> NodeId {
        NodeId::numeric(0, 2258)
    }

    /// The sequence counter node.
    pub fn sequence() -> NodeId {
        NodeId::string(2, "sequence")
    }

    /// The object carrying the fault-injection methods.
    pub fn simulations() -> NodeId {
        NodeId::string(2, "simulations")
    }

    /// Returns `true` if the simulated server publishes `node`.
    pub fn is_known(node: &NodeId) -> bool {
        *node == Self::current_time() || *node == Self::sequence()
    }
}

// =============================================================================
// Call Fixtures
// =============================================================================

/// Method requests understood by the simulated server.
pub struct CallFixtures;

impl CallFixtures {
    /// A call to a method on the `simulations` object.
    pub fn simulation(method: &str) -> CallMethodRequest {
        CallMethodRequest::new(NodeFixtures::simulations(), NodeId::string(2, method))
    }

    /// `simulate_subscription_failure` aimed at one server subscription.
    pub fn subscription_failure(server_id: u32) -> CallMethodRequest {
        Self::simulation(super::mocks::methods::SUBSCRIPTION_FAILURE)
            .with_argument(Variant::UInt32(server_id))
    }
}

// =============================================================================
// Config Fixtures
// =============================================================================

/// Client configurations tuned for tests.
pub struct ConfigFixtures;

impl ConfigFixtures {
    /// Short timeouts and a fast fixed reconnect interval.
    pub fn fast(endpoint: &str) -> ClientConfig {
        let mut config = ClientConfig::new(endpoint);
        config.request_timeout = Duration::from_secs(2);
        config.connect_timeout = Duration::from_secs(2);
        config.keepalive_interval = Duration::from_millis(200);
        config.reconnect = ReconnectPolicy::fixed(Duration::from_millis(50));
        config.replay_retry_delay = Duration::from_millis(20);
        config
    }

    /// Default subscription parameters.
    pub fn subscription() -> SubscriptionParameters {
        SubscriptionParameters::default()
    }

    /// Subscription parameters with a custom interval.
    pub fn subscription_every(interval: Duration) -> SubscriptionParameters {
        SubscriptionParameters::default().with_interval(interval)
    }
}
