// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Client configuration.
//!
//! [`ClientConfig`] carries everything a [`UaClient`](crate::UaClient) needs:
//! the endpoint, security, timeouts and the reconnect policy. It can be built
//! in code through [`ClientConfigBuilder`] or loaded from YAML, TOML or JSON.
//!
//! # Environment Variable Override
//!
//! ```text
//! RELINK_ENDPOINT=opc.tcp://plc-01:4840
//! RELINK_REQUEST_TIMEOUT=5s
//! RELINK_KEEPALIVE_INTERVAL=2s
//! ```

use std::env;
use std::fmt;
use std::fs;
use std::path::Path;
use std::time::Duration;

use rand::Rng;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{ConfigurationError, UaError, UaResult};
use crate::types::{Endpoint, SecurityMode, SecurityPolicy, UserIdentity};

/// Default environment variable prefix.
pub const ENV_PREFIX: &str = "RELINK";

// =============================================================================
// ReconnectStrategy
// =============================================================================

/// Strategy for reconnect delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReconnectStrategy {
    /// Constant delay between attempts.
    Fixed,

    /// Linear backoff (delay * attempt).
    Linear,

    /// Exponential backoff (delay * 2^attempt).
    #[default]
    Exponential,
}

impl ReconnectStrategy {
    /// Calculates the raw delay for a given attempt (0-based).
    ///
    /// Returns `None` when the multiplication overflows.
    pub fn delay(&self, base_delay: Duration, attempt: u32) -> Option<Duration> {
        match self {
            Self::Fixed => Some(base_delay),
            Self::Linear => base_delay.checked_mul(attempt.saturating_add(1)),
            Self::Exponential => base_delay.checked_mul(2u32.checked_pow(attempt)?),
        }
    }
}

impl fmt::Display for ReconnectStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fixed => write!(f, "Fixed"),
            Self::Linear => write!(f, "Linear"),
            Self::Exponential => write!(f, "Exponential"),
        }
    }
}

// =============================================================================
// ReconnectPolicy
// =============================================================================

/// Backoff between recovery attempts.
///
/// Recovery never gives up, so there is no retry limit here; the delay is
/// always bounded by `max_delay` and never zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconnectPolicy {
    /// Backoff strategy.
    #[serde(default)]
    pub strategy: ReconnectStrategy,

    /// Delay before the second attempt.
    #[serde(default = "default_initial_delay", with = "humantime_serde")]
    pub initial_delay: Duration,

    /// Upper bound for any delay.
    #[serde(default = "default_max_delay", with = "humantime_serde")]
    pub max_delay: Duration,

    /// Random reduction applied to each delay, as a fraction in `[0, 1)`.
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

fn default_initial_delay() -> Duration {
    Duration::from_millis(250)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(5)
}

fn default_jitter() -> f64 {
    0.1
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            strategy: ReconnectStrategy::default(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            jitter: default_jitter(),
        }
    }
}

impl ReconnectPolicy {
    /// Constant interval without jitter.
    pub fn fixed(delay: Duration) -> Self {
        Self {
            strategy: ReconnectStrategy::Fixed,
            initial_delay: delay,
            max_delay: delay,
            jitter: 0.0,
        }
    }

    /// Capped exponential backoff without jitter.
    pub fn exponential(initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            strategy: ReconnectStrategy::Exponential,
            initial_delay,
            max_delay,
            jitter: 0.0,
        }
    }

    /// Sets the jitter fraction.
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter;
        self
    }

    /// Calculates the delay for a given attempt, capped by `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay = self
            .strategy
            .delay(self.initial_delay, attempt)
            .map_or(self.max_delay, |d| d.min(self.max_delay));

        if self.jitter > 0.0 {
            let factor = 1.0 - rand::thread_rng().gen_range(0.0..self.jitter);
            delay.mul_f64(factor)
        } else {
            delay
        }
    }

    /// Validates this policy.
    pub fn validate(&self) -> UaResult<()> {
        if self.initial_delay.is_zero() {
            return Err(UaError::configuration(ConfigurationError::invalid_duration(
                "reconnect.initial_delay",
                self.initial_delay,
                "must be greater than 0",
            )));
        }
        if self.max_delay < self.initial_delay {
            return Err(UaError::configuration(ConfigurationError::invalid_duration(
                "reconnect.max_delay",
                self.max_delay,
                "must not be less than initial_delay",
            )));
        }
        if !(0.0..1.0).contains(&self.jitter) {
            return Err(UaError::configuration(ConfigurationError::invalid_value(
                "reconnect.jitter",
                format!("{} is outside [0, 1)", self.jitter),
            )));
        }
        Ok(())
    }
}

// =============================================================================
// ClientConfig
// =============================================================================

/// Client configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Server endpoint URL (`opc.tcp://host:port/path`).
    pub endpoint: String,

    /// Message security mode.
    #[serde(default)]
    pub security_mode: SecurityMode,

    /// Security policy.
    #[serde(default)]
    pub security_policy: SecurityPolicy,

    /// Identity presented on session activation.
    #[serde(default)]
    pub identity: UserIdentity,

    /// Session name sent to the server.
    #[serde(default = "default_session_name")]
    pub session_name: String,

    /// Requested session timeout.
    #[serde(default = "default_session_timeout", with = "humantime_serde")]
    pub session_timeout: Duration,

    /// Deadline for each service request.
    #[serde(default = "default_request_timeout", with = "humantime_serde")]
    pub request_timeout: Duration,

    /// Deadline for opening the transport link.
    #[serde(default = "default_connect_timeout", with = "humantime_serde")]
    pub connect_timeout: Duration,

    /// Interval of the health watcher's keepalive tick.
    #[serde(default = "default_keepalive_interval", with = "humantime_serde")]
    pub keepalive_interval: Duration,

    /// Requested secure channel token lifetime.
    #[serde(default = "default_channel_lifetime", with = "humantime_serde")]
    pub channel_lifetime: Duration,

    /// Backoff between recovery attempts.
    #[serde(default)]
    pub reconnect: ReconnectPolicy,

    /// Local retries per subscription during replay.
    #[serde(default = "default_replay_retries")]
    pub replay_retries: u32,

    /// Delay between local replay retries.
    #[serde(default = "default_replay_retry_delay", with = "humantime_serde")]
    pub replay_retry_delay: Duration,

    /// Per-subscription buffer between the watcher and the forwarder.
    #[serde(default = "default_forward_buffer")]
    pub forward_buffer: usize,

    /// Whether faulted subscriptions receive an error-tagged message.
    #[serde(default = "default_fault_notifications")]
    pub fault_notifications: bool,

    /// Capacity of the client event broadcast.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

fn default_session_name() -> String {
    "relink session".to_string()
}

fn default_session_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_keepalive_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_channel_lifetime() -> Duration {
    Duration::from_secs(3600)
}

fn default_replay_retries() -> u32 {
    3
}

fn default_replay_retry_delay() -> Duration {
    Duration::from_millis(200)
}

fn default_forward_buffer() -> usize {
    256
}

fn default_fault_notifications() -> bool {
    true
}

fn default_event_capacity() -> usize {
    64
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            security_mode: SecurityMode::default(),
            security_policy: SecurityPolicy::default(),
            identity: UserIdentity::default(),
            session_name: default_session_name(),
            session_timeout: default_session_timeout(),
            request_timeout: default_request_timeout(),
            connect_timeout: default_connect_timeout(),
            keepalive_interval: default_keepalive_interval(),
            channel_lifetime: default_channel_lifetime(),
            reconnect: ReconnectPolicy::default(),
            replay_retries: default_replay_retries(),
            replay_retry_delay: default_replay_retry_delay(),
            forward_buffer: default_forward_buffer(),
            fault_notifications: default_fault_notifications(),
            event_capacity: default_event_capacity(),
        }
    }
}

impl ClientConfig {
    /// Creates a new configuration builder.
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::default()
    }

    /// Creates a configuration with just the endpoint.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Default::default()
        }
    }

    /// Returns the endpoint description used to open links.
    pub fn endpoint(&self) -> Endpoint {
        Endpoint {
            url: self.endpoint.clone(),
            security_mode: self.security_mode,
            security_policy: self.security_policy,
        }
    }

    /// Validates this configuration.
    pub fn validate(&self) -> UaResult<()> {
        if self.endpoint.is_empty() {
            return Err(UaError::configuration(ConfigurationError::missing_field(
                "endpoint",
            )));
        }

        if !self.endpoint.starts_with("opc.tcp://") {
            return Err(UaError::configuration(ConfigurationError::invalid_endpoint(
                &self.endpoint,
                "Endpoint must start with opc.tcp://",
            )));
        }

        if self.security_mode != SecurityMode::None && self.security_policy == SecurityPolicy::None
        {
            return Err(UaError::configuration(ConfigurationError::invalid_security(
                "Security mode requires a security policy other than None",
            )));
        }

        if self.security_mode == SecurityMode::None && self.security_policy != SecurityPolicy::None
        {
            return Err(UaError::configuration(ConfigurationError::invalid_security(
                "Security policy requires a security mode other than None",
            )));
        }

        if let UserIdentity::UserName { username, .. } = &self.identity {
            if username.is_empty() {
                return Err(UaError::configuration(ConfigurationError::missing_field(
                    "identity.username",
                )));
            }
        }

        for (field, duration) in [
            ("session_timeout", self.session_timeout),
            ("request_timeout", self.request_timeout),
            ("connect_timeout", self.connect_timeout),
            ("keepalive_interval", self.keepalive_interval),
            ("channel_lifetime", self.channel_lifetime),
        ] {
            if duration.is_zero() {
                return Err(UaError::configuration(ConfigurationError::invalid_duration(
                    field,
                    duration,
                    "must be greater than 0",
                )));
            }
        }

        if self.forward_buffer == 0 {
            return Err(UaError::configuration(ConfigurationError::invalid_value(
                "forward_buffer",
                "must be greater than 0",
            )));
        }

        if self.event_capacity == 0 {
            return Err(UaError::configuration(ConfigurationError::invalid_value(
                "event_capacity",
                "must be greater than 0",
            )));
        }

        self.reconnect.validate()
    }

    // =========================================================================
    // Loading
    // =========================================================================

    /// Loads configuration from a file, applying `RELINK_` overrides.
    ///
    /// The format follows the extension: `.yaml`/`.yml`, `.toml` or `.json`.
    pub fn load(path: impl AsRef<Path>) -> UaResult<Self> {
        let path = path.as_ref();
        info!("Loading client configuration from: {}", path.display());

        let format = ConfigFormat::from_path(path)?;
        let content = fs::read_to_string(path).map_err(|source| {
            UaError::configuration(ConfigurationError::Io {
                path: path.display().to_string(),
                source,
            })
        })?;

        let mut config: ClientConfig = parse_str(&content, format)?;
        config.apply_env_overrides(|key| env::var(key).ok())?;
        config.validate()?;

        debug!(endpoint = %config.endpoint, "Client configuration loaded");
        Ok(config)
    }

    /// Parses and validates configuration from a string.
    pub fn load_from_str(content: &str, format: ConfigFormat) -> UaResult<Self> {
        let config: ClientConfig = parse_str(content, format)?;
        config.validate()?;
        Ok(config)
    }

    /// Applies `RELINK_*` overrides using the given variable lookup.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> UaResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(&format!("{ENV_PREFIX}_ENDPOINT")) {
            self.endpoint = value;
        }

        for (suffix, field, target) in [
            (
                "REQUEST_TIMEOUT",
                "request_timeout",
                &mut self.request_timeout,
            ),
            (
                "KEEPALIVE_INTERVAL",
                "keepalive_interval",
                &mut self.keepalive_interval,
            ),
        ] {
            if let Some(value) = lookup(&format!("{ENV_PREFIX}_{suffix}")) {
                *target = humantime::parse_duration(&value).map_err(|e| {
                    UaError::configuration(ConfigurationError::invalid_value(
                        field,
                        format!("{ENV_PREFIX}_{suffix}: {e}"),
                    ))
                })?;
            }
        }

        Ok(())
    }
}

// =============================================================================
// ClientConfigBuilder
// =============================================================================

/// Builder for [`ClientConfig`].
#[derive(Debug, Default)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    /// Sets the server endpoint URL.
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.config.endpoint = endpoint.into();
        self
    }

    /// Sets the security mode.
    pub fn security_mode(mut self, mode: SecurityMode) -> Self {
        self.config.security_mode = mode;
        self
    }

    /// Sets the security policy.
    pub fn security_policy(mut self, policy: SecurityPolicy) -> Self {
        self.config.security_policy = policy;
        self
    }

    /// Sets username/password authentication.
    pub fn username(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.config.identity = UserIdentity::UserName {
            username: username.into(),
            password: password.into(),
        };
        self
    }

    /// Sets anonymous authentication.
    pub fn anonymous(mut self) -> Self {
        self.config.identity = UserIdentity::Anonymous;
        self
    }

    /// Sets the session name.
    pub fn session_name(mut self, name: impl Into<String>) -> Self {
        self.config.session_name = name.into();
        self
    }

    /// Sets the session timeout.
    pub fn session_timeout(mut self, timeout: Duration) -> Self {
        self.config.session_timeout = timeout;
        self
    }

    /// Sets the request timeout.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    /// Sets the connect timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Sets the keepalive interval.
    pub fn keepalive_interval(mut self, interval: Duration) -> Self {
        self.config.keepalive_interval = interval;
        self
    }

    /// Sets the requested secure channel lifetime.
    pub fn channel_lifetime(mut self, lifetime: Duration) -> Self {
        self.config.channel_lifetime = lifetime;
        self
    }

    /// Sets the reconnect policy.
    pub fn reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.config.reconnect = policy;
        self
    }

    /// Sets local replay retries per subscription.
    pub fn replay_retries(mut self, retries: u32, delay: Duration) -> Self {
        self.config.replay_retries = retries;
        self.config.replay_retry_delay = delay;
        self
    }

    /// Sets the per-subscription forward buffer.
    pub fn forward_buffer(mut self, capacity: usize) -> Self {
        self.config.forward_buffer = capacity;
        self
    }

    /// Enables or disables error-tagged fault messages.
    pub fn fault_notifications(mut self, enabled: bool) -> Self {
        self.config.fault_notifications = enabled;
        self
    }

    /// Sets the client event broadcast capacity.
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.config.event_capacity = capacity;
        self
    }

    /// Builds and validates the configuration.
    pub fn build(self) -> UaResult<ClientConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

// =============================================================================
// ConfigFormat
// =============================================================================

/// Supported configuration file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    /// YAML format.
    Yaml,
    /// TOML format.
    Toml,
    /// JSON format.
    Json,
}

impl ConfigFormat {
    /// Determines the format from a file path.
    pub fn from_path(path: &Path) -> UaResult<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase());

        match ext.as_deref() {
            Some("yaml") | Some("yml") => Ok(ConfigFormat::Yaml),
            Some("toml") => Ok(ConfigFormat::Toml),
            Some("json") => Ok(ConfigFormat::Json),
            Some(other) => Err(unsupported_format(other)),
            None => Err(unsupported_format("(no extension)")),
        }
    }

    /// Returns the file extension for this format.
    pub fn extension(&self) -> &'static str {
        match self {
            ConfigFormat::Yaml => "yaml",
            ConfigFormat::Toml => "toml",
            ConfigFormat::Json => "json",
        }
    }
}

fn unsupported_format(extension: &str) -> UaError {
    UaError::configuration(ConfigurationError::UnsupportedFormat {
        extension: extension.to_string(),
    })
}

fn parse_str<T: DeserializeOwned>(content: &str, format: ConfigFormat) -> UaResult<T> {
    let parse_error = |e: String| UaError::configuration(ConfigurationError::parse(e));
    match format {
        ConfigFormat::Yaml => {
            let config = config::Config::builder()
                .add_source(config::File::from_str(content, config::FileFormat::Yaml))
                .build()
                .map_err(|e| parse_error(e.to_string()))?;
            config
                .try_deserialize()
                .map_err(|e| parse_error(e.to_string()))
        }
        ConfigFormat::Toml => toml::from_str(content).map_err(|e| parse_error(e.to_string())),
        ConfigFormat::Json => serde_json::from_str(content).map_err(|e| parse_error(e.to_string())),
    }
}

// =============================================================================
// humantime_serde helper
// =============================================================================

pub(crate) mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        humantime::format_duration(*duration)
            .to_string()
            .serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_reconnect_strategy_delay() {
        let base = Duration::from_millis(100);

        assert_eq!(ReconnectStrategy::Fixed.delay(base, 5), Some(base));
        assert_eq!(
            ReconnectStrategy::Linear.delay(base, 2),
            Some(Duration::from_millis(300))
        );
        assert_eq!(
            ReconnectStrategy::Exponential.delay(base, 2),
            Some(Duration::from_millis(400))
        );
        assert_eq!(ReconnectStrategy::Exponential.delay(base, 40), None);
    }

    #[test]
    fn test_delay_for_attempt_is_capped() {
        let policy =
            ReconnectPolicy::exponential(Duration::from_millis(100), Duration::from_secs(1));

        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(800));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(u32::MAX), Duration::from_secs(1));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let policy = ReconnectPolicy::fixed(Duration::from_millis(1000)).with_jitter(0.5);
        for _ in 0..100 {
            let delay = policy.delay_for_attempt(0);
            assert!(delay > Duration::from_millis(500));
            assert!(delay <= Duration::from_millis(1000));
        }
    }

    #[test]
    fn test_policy_validation() {
        assert!(ReconnectPolicy::default().validate().is_ok());
        assert!(ReconnectPolicy::fixed(Duration::ZERO).validate().is_err());
        assert!(ReconnectPolicy::default().with_jitter(1.0).validate().is_err());
        assert!(
            ReconnectPolicy::exponential(Duration::from_secs(2), Duration::from_secs(1))
                .validate()
                .is_err()
        );
    }

    #[test]
    fn test_builder_validation() {
        let config = ClientConfig::builder()
            .endpoint("opc.tcp://localhost:4840")
            .request_timeout(Duration::from_secs(2))
            .build()
            .unwrap();
        assert_eq!(config.request_timeout, Duration::from_secs(2));
        assert_eq!(config.endpoint().url, "opc.tcp://localhost:4840");

        assert!(ClientConfig::builder().build().is_err());
        assert!(ClientConfig::builder()
            .endpoint("http://localhost:4840")
            .build()
            .is_err());
        assert!(ClientConfig::builder()
            .endpoint("opc.tcp://localhost:4840")
            .security_mode(SecurityMode::SignAndEncrypt)
            .build()
            .is_err());
        assert!(ClientConfig::builder()
            .endpoint("opc.tcp://localhost:4840")
            .forward_buffer(0)
            .build()
            .is_err());
    }

    #[test]
    fn test_load_from_yaml() {
        let yaml = r#"
endpoint: "opc.tcp://plc-01:4840"
request_timeout: "3s"
keepalive_interval: "500ms"
reconnect:
  strategy: fixed
  initial_delay: "200ms"
  max_delay: "200ms"
  jitter: 0.0
identity:
  type: user_name
  username: operator
  password: secret
"#;
        let config = ClientConfig::load_from_str(yaml, ConfigFormat::Yaml).unwrap();
        assert_eq!(config.endpoint, "opc.tcp://plc-01:4840");
        assert_eq!(config.request_timeout, Duration::from_secs(3));
        assert_eq!(config.keepalive_interval, Duration::from_millis(500));
        assert_eq!(config.reconnect.strategy, ReconnectStrategy::Fixed);
        assert!(matches!(config.identity, UserIdentity::UserName { .. }));
        assert_eq!(config.replay_retries, 3);
    }

    #[test]
    fn test_load_from_toml_and_json() {
        let toml = r#"
endpoint = "opc.tcp://localhost:4840"
fault_notifications = false

[reconnect]
strategy = "linear"
initial_delay = "1s"
max_delay = "10s"
"#;
        let config = ClientConfig::load_from_str(toml, ConfigFormat::Toml).unwrap();
        assert!(!config.fault_notifications);
        assert_eq!(config.reconnect.strategy, ReconnectStrategy::Linear);

        let json = r#"{"endpoint": "opc.tcp://localhost:4840", "forward_buffer": 16}"#;
        let config = ClientConfig::load_from_str(json, ConfigFormat::Json).unwrap();
        assert_eq!(config.forward_buffer, 16);

        let invalid = r#"{"endpoint": "opc.tcp://localhost:4840", "request_timeout": "soon"}"#;
        assert!(ClientConfig::load_from_str(invalid, ConfigFormat::Json).is_err());
    }

    #[test]
    fn test_load_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "endpoint = \"opc.tcp://localhost:4840\"").unwrap();

        let config = ClientConfig::load(file.path()).unwrap();
        assert_eq!(config.endpoint, "opc.tcp://localhost:4840");

        let err = ClientConfig::load("client.ini").unwrap_err();
        assert!(matches!(
            err,
            UaError::Configuration(ConfigurationError::UnsupportedFormat { .. })
        ));
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("RELINK_ENDPOINT", "opc.tcp://override:4840"),
            ("RELINK_REQUEST_TIMEOUT", "750ms"),
        ]
        .into_iter()
        .collect();

        let mut config = ClientConfig::new("opc.tcp://localhost:4840");
        config
            .apply_env_overrides(|key| vars.get(key).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.endpoint, "opc.tcp://override:4840");
        assert_eq!(config.request_timeout, Duration::from_millis(750));
        assert_eq!(config.keepalive_interval, default_keepalive_interval());

        let mut config = ClientConfig::new("opc.tcp://localhost:4840");
        let err = config
            .apply_env_overrides(|key| {
                (key == "RELINK_KEEPALIVE_INTERVAL").then(|| "often".to_string())
            })
            .unwrap_err();
        assert!(err.to_string().contains("keepalive_interval"));
    }
}
