// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Configuration Integration Tests
//!
//! Configuration files loaded from disk and used to drive a client against
//! the simulated server.

use std::io::Write;
use std::time::Duration;

use tempfile::NamedTempFile;
use tokio::sync::mpsc;

use relink_opcua::client::UaClient;
use relink_opcua::config::{ClientConfig, ReconnectStrategy};
use relink_opcua::error::{ConfigurationError, SessionError, UaError};
use relink_opcua::monitor::NodeMonitor;
use relink_opcua::types::{ClientState, UserIdentity};

use relink_tests::prelude::*;

const YAML: &str = r#"
endpoint: "opc.tcp://localhost:4840"
request_timeout: "2s"
keepalive_interval: "200ms"
replay_retries: 2
forward_buffer: 32
reconnect:
  strategy: fixed
  initial_delay: "50ms"
  max_delay: "50ms"
  jitter: 0.0
"#;

const TOML: &str = r#"
endpoint = "opc.tcp://localhost:4840"
request_timeout = "2s"
keepalive_interval = "200ms"
replay_retries = 2
forward_buffer = 32

[reconnect]
strategy = "fixed"
initial_delay = "50ms"
max_delay = "50ms"
jitter = 0.0
"#;

const JSON: &str = r#"{
  "endpoint": "opc.tcp://localhost:4840",
  "request_timeout": "2s",
  "keepalive_interval": "200ms",
  "replay_retries": 2,
  "forward_buffer": 32,
  "reconnect": {
    "strategy": "fixed",
    "initial_delay": "50ms",
    "max_delay": "50ms",
    "jitter": 0.0
  }
}"#;

fn write_config(suffix: &str, content: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(suffix)
        .tempfile()
        .expect("create temp file");
    file.write_all(content.as_bytes()).expect("write config");
    file
}

#[test]
fn test_all_formats_load_the_same_config() {
    let yaml = write_config(".yaml", YAML);
    let toml = write_config(".toml", TOML);
    let json = write_config(".json", JSON);

    let from_yaml = ClientConfig::load(yaml.path()).expect("yaml config");
    let from_toml = ClientConfig::load(toml.path()).expect("toml config");
    let from_json = ClientConfig::load(json.path()).expect("json config");

    assert_eq!(from_yaml, from_toml);
    assert_eq!(from_yaml, from_json);
    assert_eq!(from_yaml.keepalive_interval, Duration::from_millis(200));
    assert_eq!(from_yaml.reconnect.strategy, ReconnectStrategy::Fixed);
    assert_eq!(from_yaml.forward_buffer, 32);
}

#[test]
fn test_invalid_file_is_rejected() {
    let file = write_config(".yaml", "endpoint: \"http://localhost:4840\"\n");
    let err = ClientConfig::load(file.path()).unwrap_err();
    assert!(matches!(
        err,
        UaError::Configuration(ConfigurationError::InvalidEndpoint { .. })
    ));
    assert!(err.is_terminal());

    let file = write_config(".yaml", "endpoint: [\n");
    let err = ClientConfig::load(file.path()).unwrap_err();
    assert!(matches!(
        err,
        UaError::Configuration(ConfigurationError::Parse { .. })
    ));
}

#[tokio::test]
async fn test_client_runs_from_loaded_config() {
    init_test_logging();
    let file = write_config(".yaml", YAML);
    let config = ClientConfig::load(file.path()).expect("yaml config");

    let server = SimulatedServer::new();
    let client = UaClient::new(config, SimulatedTransport::new(&server)).expect("client");
    client.connect().await.expect("connect");

    let (tx, mut rx) = mpsc::channel(QUEUE_CAPACITY);
    let handle = NodeMonitor::new(&client)
        .chan_subscribe(ConfigFixtures::subscription(), tx, [SEQUENCE_NODE_ID])
        .await
        .expect("subscribe");
    recv_within(&mut rx, RECONNECTION_TIMEOUT).await.assert_data();

    assert_eq!(client.config().forward_buffer, 32);
    handle.unsubscribe().await.expect("unsubscribe");
    client.close().await.expect("close");
    assert_eq!(client.state(), ClientState::Closed);
}

#[tokio::test]
async fn test_client_rejects_invalid_config() {
    let server = SimulatedServer::new();

    let err = UaClient::new(
        ClientConfig::new("localhost:4840"),
        SimulatedTransport::new(&server),
    )
    .unwrap_err();
    assert!(matches!(err, UaError::Configuration(_)));

    let mut config = ConfigFixtures::fast(server.endpoint());
    config.keepalive_interval = Duration::ZERO;
    let err = UaClient::new(config, SimulatedTransport::new(&server)).unwrap_err();
    assert!(matches!(
        err,
        UaError::Configuration(ConfigurationError::InvalidDuration { .. })
    ));
}

#[tokio::test]
async fn test_rejected_credentials_do_not_recover() {
    let harness = TestHarness::build_with(|config| {
        config.identity = UserIdentity::UserName {
            username: "operator".to_string(),
            password: String::new(),
        };
    });

    let err = harness.client.connect().await.unwrap_err();
    assert!(matches!(
        err,
        UaError::Session(SessionError::AuthenticationFailed { .. })
    ));
    assert!(err.is_terminal());
    assert_eq!(harness.client.state(), ClientState::Disconnected);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(harness.client.stats().recoveries_started, 0);
    assert_eq!(harness.server.counters().sessions_created(), 1);
}
