// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Test Harness
//!
//! A simulated server plus a connected client and node monitor.
//!
//! ## Design Principles
//!
//! - One server and one client per test, nothing shared between tests
//! - Faults are injected through `Call`, like against a real test server
//! - Configuration can be adjusted before the client connects

use std::sync::Arc;

use tokio::sync::mpsc;

use relink_opcua::client::UaClient;
use relink_opcua::config::ClientConfig;
use relink_opcua::monitor::{NodeMonitor, SubscriptionHandle};
use relink_opcua::types::{DataChangeMessage, SubscriptionParameters};

use super::fixtures::{CallFixtures, ConfigFixtures};
use super::init_test_logging;
use super::mocks::{SimulatedServer, SimulatedTransport};

/// Connected client against a fresh simulated server.
pub struct TestHarness {
    /// The server.
    pub server: Arc<SimulatedServer>,
    /// The client under test.
    pub client: UaClient,
    /// Monitor bound to the client.
    pub monitor: NodeMonitor,
}

impl TestHarness {
    /// Builds a client with [`ConfigFixtures::fast`] without connecting it.
    pub fn build_with<F>(configure: F) -> Self
    where
        F: FnOnce(&mut ClientConfig),
    {
        init_test_logging();
        let server = SimulatedServer::new();
        let mut config = ConfigFixtures::fast(server.endpoint());
        configure(&mut config);

        let client = UaClient::new(config, SimulatedTransport::new(&server))
            .expect("test configuration must be valid");
        let monitor = NodeMonitor::new(&client);
        Self {
            server,
            client,
            monitor,
        }
    }

    /// Starts a connected harness with the default test configuration.
    pub async fn start() -> Self {
        Self::start_with(|_| {}).await
    }

    /// Starts a connected harness after adjusting the configuration.
    pub async fn start_with<F>(configure: F) -> Self
    where
        F: FnOnce(&mut ClientConfig),
    {
        let harness = Self::build_with(configure);
        harness
            .client
            .connect()
            .await
            .expect("initial connect must succeed");
        harness
    }

    /// Subscribes `nodes` into a fresh queue of `capacity`.
    pub async fn subscribe(
        &self,
        nodes: &[&str],
        capacity: usize,
    ) -> (SubscriptionHandle, mpsc::Receiver<DataChangeMessage>) {
        self.subscribe_with(SubscriptionParameters::default(), nodes, capacity)
            .await
    }

    /// Subscribes `nodes` with explicit parameters.
    pub async fn subscribe_with(
        &self,
        parameters: SubscriptionParameters,
        nodes: &[&str],
        capacity: usize,
    ) -> (SubscriptionHandle, mpsc::Receiver<DataChangeMessage>) {
        let (tx, rx) = mpsc::channel(capacity);
        let handle = self
            .monitor
            .chan_subscribe(parameters, tx, nodes.iter().copied())
            .await
            .expect("subscribe must succeed");
        (handle, rx)
    }

    /// Asks the server to simulate a failure.
    pub async fn inject(&self, method: &str) {
        self.client
            .call(CallFixtures::simulation(method))
            .await
            .expect("fault injection call must succeed");
    }

    /// Closes the client.
    pub async fn shutdown(self) {
        self.client.close().await.expect("close must succeed");
    }
}
