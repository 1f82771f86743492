// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Protocol data model shared by every layer of the client.
//!
//! - **NodeId**: node identifiers with OPC UA string parsing
//! - **Endpoint**: server address plus negotiated security
//! - **ClientState / FailureKind**: connection lifecycle and failure tagging
//! - **SubscriptionParameters**: consumer subscription options
//! - **Variant / StatusCode**: values and status codes carried on the wire
//!
//! # Examples
//!
//! ```
//! use relink_opcua::types::{NodeId, SubscriptionParameters};
//! use std::time::Duration;
//!
//! let node: NodeId = "ns=0;i=2258".parse().unwrap();
//! assert_eq!(node, NodeId::numeric(0, 2258));
//!
//! let params = SubscriptionParameters::default().with_interval(Duration::from_millis(250));
//! assert!(params.validate().is_ok());
//! ```

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ConsumerError, UaError, UaResult};

// =============================================================================
// NodeId
// =============================================================================

/// OPC UA node identifier.
///
/// A namespace index plus a numeric, string, GUID or opaque identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId {
    /// Namespace index (0 = OPC UA standard namespace).
    pub namespace_index: u16,

    /// The node identifier.
    pub identifier: NodeIdentifier,
}

impl NodeId {
    /// Creates a numeric node ID.
    #[inline]
    pub fn numeric(namespace_index: u16, value: u32) -> Self {
        Self {
            namespace_index,
            identifier: NodeIdentifier::Numeric(value),
        }
    }

    /// Creates a string node ID.
    #[inline]
    pub fn string(namespace_index: u16, value: impl Into<String>) -> Self {
        Self {
            namespace_index,
            identifier: NodeIdentifier::String(value.into()),
        }
    }

    /// Creates a GUID node ID.
    #[inline]
    pub fn guid(namespace_index: u16, value: Uuid) -> Self {
        Self {
            namespace_index,
            identifier: NodeIdentifier::Guid(value),
        }
    }

    /// Creates an opaque node ID.
    #[inline]
    pub fn opaque(namespace_index: u16, value: Vec<u8>) -> Self {
        Self {
            namespace_index,
            identifier: NodeIdentifier::Opaque(value),
        }
    }

    /// The null node id (`i=0`).
    #[inline]
    pub fn null() -> Self {
        Self::numeric(0, 0)
    }

    /// Returns `true` if this is the null node id.
    pub fn is_null(&self) -> bool {
        self.namespace_index == 0 && self.identifier == NodeIdentifier::Numeric(0)
    }

    /// Formats this node id in OPC UA string notation.
    pub fn to_opc_string(&self) -> String {
        if self.namespace_index == 0 {
            self.identifier.to_string()
        } else {
            format!("ns={};{}", self.namespace_index, self.identifier)
        }
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::null()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_opc_string())
    }
}

impl FromStr for NodeId {
    type Err = UaError;

    /// Parses a NodeId from OPC UA string format.
    ///
    /// Supported formats:
    /// - `ns=2;i=1001` (numeric)
    /// - `ns=2;s=MyNode` (string)
    /// - `ns=2;g=550e8400-e29b-41d4-a716-446655440000` (GUID)
    /// - `ns=2;b=SGVsbG8=` (opaque, base64 encoded)
    /// - `i=1001` / `s=MyNode` (namespace 0)
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let invalid = |reason: String| UaError::consumer(ConsumerError::invalid_node_id(s, reason));

        let (namespace_index, identifier_part) = match s.strip_prefix("ns=") {
            Some(rest) => {
                let (ns, id) = rest
                    .split_once(';')
                    .ok_or_else(|| invalid("missing identifier after namespace".into()))?;
                let ns: u16 = ns
                    .parse()
                    .map_err(|_| invalid("invalid namespace index".into()))?;
                (ns, id)
            }
            None => (0, s),
        };

        let identifier = if let Some(id) = identifier_part.strip_prefix("i=") {
            NodeIdentifier::Numeric(
                id.parse()
                    .map_err(|_| invalid("invalid numeric identifier".into()))?,
            )
        } else if let Some(id) = identifier_part.strip_prefix("s=") {
            if id.is_empty() {
                return Err(invalid("empty string identifier".into()));
            }
            NodeIdentifier::String(id.to_string())
        } else if let Some(id) = identifier_part.strip_prefix("g=") {
            NodeIdentifier::Guid(Uuid::parse_str(id).map_err(|e| invalid(format!("invalid GUID: {e}")))?)
        } else if let Some(id) = identifier_part.strip_prefix("b=") {
            NodeIdentifier::Opaque(
                BASE64
                    .decode(id)
                    .map_err(|e| invalid(format!("invalid base64: {e}")))?,
            )
        } else {
            return Err(invalid("expected i=, s=, g= or b=".into()));
        };

        Ok(Self {
            namespace_index,
            identifier,
        })
    }
}

/// OPC UA node identifier types.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum NodeIdentifier {
    /// Numeric identifier.
    Numeric(u32),

    /// String identifier.
    String(String),

    /// GUID identifier.
    Guid(Uuid),

    /// Opaque identifier.
    Opaque(Vec<u8>),
}

impl fmt::Display for NodeIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Numeric(v) => write!(f, "i={}", v),
            Self::String(v) => write!(f, "s={}", v),
            Self::Guid(v) => write!(f, "g={}", v),
            Self::Opaque(v) => write!(f, "b={}", BASE64.encode(v)),
        }
    }
}

// =============================================================================
// Security
// =============================================================================

/// OPC UA message security mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SecurityMode {
    /// No security.
    #[default]
    None,

    /// Messages are signed.
    Sign,

    /// Messages are signed and encrypted.
    SignAndEncrypt,
}

impl SecurityMode {
    /// Returns the display name.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::None => "None",
            Self::Sign => "Sign",
            Self::SignAndEncrypt => "SignAndEncrypt",
        }
    }
}

impl fmt::Display for SecurityMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// OPC UA security policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SecurityPolicy {
    /// No security policy.
    #[default]
    None,

    /// Basic256Sha256.
    Basic256Sha256,

    /// Aes128Sha256RsaOaep.
    Aes128Sha256RsaOaep,

    /// Aes256Sha256RsaPss.
    Aes256Sha256RsaPss,
}

impl SecurityPolicy {
    /// Returns the OPC UA policy URI.
    pub const fn uri(&self) -> &'static str {
        match self {
            Self::None => "http://opcfoundation.org/UA/SecurityPolicy#None",
            Self::Basic256Sha256 => "http://opcfoundation.org/UA/SecurityPolicy#Basic256Sha256",
            Self::Aes128Sha256RsaOaep => {
                "http://opcfoundation.org/UA/SecurityPolicy#Aes128_Sha256_RsaOaep"
            }
            Self::Aes256Sha256RsaPss => {
                "http://opcfoundation.org/UA/SecurityPolicy#Aes256_Sha256_RsaPss"
            }
        }
    }

    /// Returns the short name.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::None => "None",
            Self::Basic256Sha256 => "Basic256Sha256",
            Self::Aes128Sha256RsaOaep => "Aes128Sha256RsaOaep",
            Self::Aes256Sha256RsaPss => "Aes256Sha256RsaPss",
        }
    }
}

impl fmt::Display for SecurityPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// User identity presented when activating a session.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UserIdentity {
    /// Anonymous authentication.
    #[default]
    Anonymous,

    /// Username and password authentication.
    UserName {
        /// The username.
        username: String,
        /// The password.
        password: String,
    },
}

impl fmt::Debug for UserIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Anonymous => write!(f, "Anonymous"),
            Self::UserName { username, .. } => f
                .debug_struct("UserName")
                .field("username", username)
                .field("password", &"***")
                .finish(),
        }
    }
}

/// Server endpoint: address plus negotiated security.
///
/// Immutable for the lifetime of a client.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    /// Endpoint URL (`opc.tcp://host:port/path`).
    pub url: String,

    /// Message security mode.
    pub security_mode: SecurityMode,

    /// Security policy.
    pub security_policy: SecurityPolicy,
}

impl Endpoint {
    /// Creates an unsecured endpoint.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            security_mode: SecurityMode::None,
            security_policy: SecurityPolicy::None,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}/{}]",
            self.url, self.security_mode, self.security_policy
        )
    }
}

// =============================================================================
// ClientState
// =============================================================================

/// Overall client connection state.
///
/// `Connected` is the only state in which subscriptions are live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ClientState {
    /// No layer is established.
    #[default]
    Disconnected,

    /// Establishing the transport link.
    Connecting,

    /// Secure channel is open.
    SecureChannelUp,

    /// Session is created and activated.
    SessionUp,

    /// Fully operational.
    Connected,

    /// Tearing down.
    Closing,

    /// Closed for good.
    Closed,
}

impl ClientState {
    /// Returns `true` if the client is connected.
    #[inline]
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Returns `true` if the client is closing or closed.
    #[inline]
    pub fn is_shutting_down(&self) -> bool {
        matches!(self, Self::Closing | Self::Closed)
    }

    /// Returns `true` while a connection is being established.
    #[inline]
    pub fn is_transitioning(&self) -> bool {
        matches!(self, Self::Connecting | Self::SecureChannelUp | Self::SessionUp)
    }

    /// Returns the display name.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Disconnected => "Disconnected",
            Self::Connecting => "Connecting",
            Self::SecureChannelUp => "SecureChannelUp",
            Self::SessionUp => "SessionUp",
            Self::Connected => "Connected",
            Self::Closing => "Closing",
            Self::Closed => "Closed",
        }
    }
}

impl fmt::Display for ClientState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

// =============================================================================
// FailureKind
// =============================================================================

/// The protocol layer a failure originated in.
///
/// Ordered from the bottom of the stack up, so the minimum of two kinds is
/// the deeper layer and therefore where recovery must restart.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Transport link lost.
    Transport,

    /// Secure channel invalid while the link is up.
    SecureChannel,

    /// Session invalid while the channel is intact.
    Session,

    /// A single subscription was lost.
    Subscription,
}

impl FailureKind {
    /// Returns the deeper of two failure kinds.
    #[inline]
    pub fn deepest(self, other: Self) -> Self {
        self.min(other)
    }

    /// Returns `true` if this failure takes the whole connection down.
    #[inline]
    pub fn is_connection_level(&self) -> bool {
        !matches!(self, Self::Subscription)
    }

    /// Returns the string representation.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Transport => "transport",
            Self::SecureChannel => "secure_channel",
            Self::Session => "session",
            Self::Subscription => "subscription",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// SubscriptionParameters
// =============================================================================

/// Default publishing interval for subscriptions.
pub const DEFAULT_SUBSCRIPTION_INTERVAL: Duration = Duration::from_millis(100);

/// Options for a consumer subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionParameters {
    /// Publishing interval, also used as sampling interval for every item.
    #[serde(with = "crate::config::humantime_serde")]
    pub interval: Duration,

    /// Lifetime count in publishing intervals.
    pub lifetime_count: u32,

    /// Keep-alive count in publishing intervals.
    pub max_keep_alive_count: u32,

    /// Maximum notifications per publish response (0 = unlimited).
    pub max_notifications_per_publish: u32,

    /// Relative priority among this client's subscriptions.
    pub priority: u8,

    /// Server-side queue size per monitored item.
    pub queue_size: u32,
}

impl Default for SubscriptionParameters {
    fn default() -> Self {
        Self {
            interval: DEFAULT_SUBSCRIPTION_INTERVAL,
            lifetime_count: 10_000,
            max_keep_alive_count: 3_000,
            max_notifications_per_publish: 10_000,
            priority: 0,
            queue_size: 10,
        }
    }
}

impl SubscriptionParameters {
    /// Sets the publishing interval.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Sets the priority.
    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    /// Validates the parameters.
    pub fn validate(&self) -> UaResult<()> {
        if self.interval.is_zero() {
            return Err(UaError::consumer(ConsumerError::ZeroInterval));
        }
        if self.max_keep_alive_count == 0 {
            return Err(UaError::consumer(ConsumerError::invalid_argument(
                "max_keep_alive_count must be greater than zero",
            )));
        }
        if self.lifetime_count < self.max_keep_alive_count.saturating_mul(3) {
            return Err(UaError::consumer(ConsumerError::invalid_argument(
                "lifetime_count must be at least three times max_keep_alive_count",
            )));
        }
        if self.queue_size == 0 {
            return Err(UaError::consumer(ConsumerError::invalid_argument(
                "queue_size must be greater than zero",
            )));
        }
        Ok(())
    }
}

// =============================================================================
// StatusCode
// =============================================================================

/// OPC UA status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct StatusCode(pub u32);

impl StatusCode {
    /// Good.
    pub const GOOD: Self = Self(0x0000_0000);
    /// BadUnexpectedError.
    pub const BAD_UNEXPECTED_ERROR: Self = Self(0x8001_0000);
    /// BadTimeout.
    pub const BAD_TIMEOUT: Self = Self(0x800A_0000);
    /// BadSecureChannelIdInvalid.
    pub const BAD_SECURE_CHANNEL_ID_INVALID: Self = Self(0x8022_0000);
    /// BadSessionIdInvalid.
    pub const BAD_SESSION_ID_INVALID: Self = Self(0x8025_0000);
    /// BadSessionClosed.
    pub const BAD_SESSION_CLOSED: Self = Self(0x8026_0000);
    /// BadSubscriptionIdInvalid.
    pub const BAD_SUBSCRIPTION_ID_INVALID: Self = Self(0x8028_0000);
    /// BadNodeIdInvalid.
    pub const BAD_NODE_ID_INVALID: Self = Self(0x8033_0000);
    /// BadNodeIdUnknown.
    pub const BAD_NODE_ID_UNKNOWN: Self = Self(0x8034_0000);
    /// BadMethodInvalid.
    pub const BAD_METHOD_INVALID: Self = Self(0x8075_0000);
    /// BadTooManySubscriptions.
    pub const BAD_TOO_MANY_SUBSCRIPTIONS: Self = Self(0x8077_0000);
    /// BadNotConnected.
    pub const BAD_NOT_CONNECTED: Self = Self(0x808A_0000);
    /// BadInvalidArgument.
    pub const BAD_INVALID_ARGUMENT: Self = Self(0x80AB_0000);
    /// BadConnectionClosed.
    pub const BAD_CONNECTION_CLOSED: Self = Self(0x80AE_0000);

    /// Returns `true` for good status codes.
    #[inline]
    pub fn is_good(&self) -> bool {
        self.0 & 0xC000_0000 == 0
    }

    /// Returns `true` for bad status codes.
    #[inline]
    pub fn is_bad(&self) -> bool {
        self.0 & 0x8000_0000 != 0
    }

    /// Returns the symbolic name for known codes.
    pub fn name(&self) -> &'static str {
        match *self {
            Self::GOOD => "Good",
            Self::BAD_UNEXPECTED_ERROR => "BadUnexpectedError",
            Self::BAD_TIMEOUT => "BadTimeout",
            Self::BAD_SECURE_CHANNEL_ID_INVALID => "BadSecureChannelIdInvalid",
            Self::BAD_SESSION_ID_INVALID => "BadSessionIdInvalid",
            Self::BAD_SESSION_CLOSED => "BadSessionClosed",
            Self::BAD_SUBSCRIPTION_ID_INVALID => "BadSubscriptionIdInvalid",
            Self::BAD_NODE_ID_INVALID => "BadNodeIdInvalid",
            Self::BAD_NODE_ID_UNKNOWN => "BadNodeIdUnknown",
            Self::BAD_METHOD_INVALID => "BadMethodInvalid",
            Self::BAD_TOO_MANY_SUBSCRIPTIONS => "BadTooManySubscriptions",
            Self::BAD_NOT_CONNECTED => "BadNotConnected",
            Self::BAD_INVALID_ARGUMENT => "BadInvalidArgument",
            Self::BAD_CONNECTION_CLOSED => "BadConnectionClosed",
            _ if self.is_bad() => "Bad",
            _ if self.is_good() => "Good",
            _ => "Uncertain",
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:08X})", self.name(), self.0)
    }
}

// =============================================================================
// Variant
// =============================================================================

/// A typed value carried in notifications and method arguments.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Variant {
    /// Boolean value.
    Boolean(bool),

    /// 32-bit signed integer.
    Int32(i32),

    /// 32-bit unsigned integer.
    UInt32(u32),

    /// 64-bit signed integer.
    Int64(i64),

    /// 64-bit unsigned integer.
    UInt64(u64),

    /// 64-bit double.
    Double(f64),

    /// String value.
    String(String),

    /// Date/time value.
    DateTime(DateTime<Utc>),

    /// Byte string.
    ByteString(Vec<u8>),

    /// Null value.
    #[default]
    Null,
}

impl Variant {
    /// Returns `true` if this is a null value.
    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Attempts to get the value as an i64.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int32(v) => Some(*v as i64),
            Self::UInt32(v) => Some(*v as i64),
            Self::Int64(v) => Some(*v),
            Self::UInt64(v) => i64::try_from(*v).ok(),
            _ => None,
        }
    }

    /// Attempts to get the value as a u32.
    pub fn as_u32(&self) -> Option<u32> {
        match self {
            Self::UInt32(v) => Some(*v),
            Self::Int32(v) => u32::try_from(*v).ok(),
            Self::Int64(v) => u32::try_from(*v).ok(),
            Self::UInt64(v) => u32::try_from(*v).ok(),
            _ => None,
        }
    }

    /// Attempts to get the value as a date/time.
    pub fn as_datetime(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::DateTime(v) => Some(*v),
            _ => None,
        }
    }

    /// Attempts to get the value as a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Boolean(v) => write!(f, "{}", v),
            Self::Int32(v) => write!(f, "{}", v),
            Self::UInt32(v) => write!(f, "{}", v),
            Self::Int64(v) => write!(f, "{}", v),
            Self::UInt64(v) => write!(f, "{}", v),
            Self::Double(v) => write!(f, "{}", v),
            Self::String(v) => write!(f, "{}", v),
            Self::DateTime(v) => write!(f, "{}", v.to_rfc3339()),
            Self::ByteString(v) => write!(f, "<{} bytes>", v.len()),
            Self::Null => write!(f, "null"),
        }
    }
}

// =============================================================================
// DataChangeMessage
// =============================================================================

/// Fault attached to a synthetic message while a subscription is recovering.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind} failure: {reason}")]
pub struct DeliveryFault {
    /// Layer that failed.
    pub kind: FailureKind,

    /// What was observed.
    pub reason: String,

    /// When the failure was detected.
    pub detected_at: DateTime<Utc>,
}

/// A message delivered to a consumer queue.
///
/// Either a data change (`error` is `None`) or a fault marker carrying the
/// null node id and a null value.
#[derive(Debug, Clone, PartialEq)]
pub struct DataChangeMessage {
    /// Node the value belongs to.
    pub node_id: NodeId,

    /// New value.
    pub value: Variant,

    /// Value status.
    pub status: StatusCode,

    /// Source timestamp.
    pub source_timestamp: Option<DateTime<Utc>>,

    /// Server timestamp.
    pub timestamp: DateTime<Utc>,

    /// Set when this message reports a fault instead of data.
    pub error: Option<DeliveryFault>,
}

impl DataChangeMessage {
    /// Creates a fault marker.
    pub fn fault(kind: FailureKind, reason: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            node_id: NodeId::null(),
            value: Variant::Null,
            status: StatusCode::BAD_CONNECTION_CLOSED,
            source_timestamp: None,
            timestamp: now,
            error: Some(DeliveryFault {
                kind,
                reason: reason.into(),
                detected_at: now,
            }),
        }
    }

    /// Returns `true` if this message is a fault marker.
    #[inline]
    pub fn is_fault(&self) -> bool {
        self.error.is_some()
    }
}

// =============================================================================
// Method Call
// =============================================================================

/// Request to invoke a server method.
#[derive(Debug, Clone, PartialEq)]
pub struct CallMethodRequest {
    /// Object the method belongs to.
    pub object_id: NodeId,

    /// The method node.
    pub method_id: NodeId,

    /// Input arguments.
    pub input_arguments: Vec<Variant>,
}

impl CallMethodRequest {
    /// Creates a call request without arguments.
    pub fn new(object_id: NodeId, method_id: NodeId) -> Self {
        Self {
            object_id,
            method_id,
            input_arguments: Vec::new(),
        }
    }

    /// Appends an input argument.
    pub fn with_argument(mut self, argument: Variant) -> Self {
        self.input_arguments.push(argument);
        self
    }

    /// Rejects requests addressing the null node.
    pub fn validate(&self) -> UaResult<()> {
        if self.object_id.is_null() {
            return Err(UaError::consumer(ConsumerError::invalid_argument(
                "object id must not be null",
            )));
        }
        if self.method_id.is_null() {
            return Err(UaError::consumer(ConsumerError::invalid_argument(
                "method id must not be null",
            )));
        }
        Ok(())
    }
}

/// Result of a method call.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CallMethodResult {
    /// Overall status.
    pub status_code: StatusCode,

    /// Output arguments.
    pub output_arguments: Vec<Variant>,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_id_parse() {
        let node: NodeId = "ns=0;i=2258".parse().unwrap();
        assert_eq!(node, NodeId::numeric(0, 2258));
        assert_eq!(node.to_string(), "i=2258");

        let node: NodeId = "ns=2;s=simulations".parse().unwrap();
        assert_eq!(node, NodeId::string(2, "simulations"));
        assert_eq!(node.to_string(), "ns=2;s=simulations");

        let node: NodeId = "ns=3;b=SGVsbG8=".parse().unwrap();
        assert_eq!(node, NodeId::opaque(3, b"Hello".to_vec()));

        let guid = "550e8400-e29b-41d4-a716-446655440000";
        let node: NodeId = format!("ns=1;g={guid}").parse().unwrap();
        assert_eq!(node, NodeId::guid(1, Uuid::parse_str(guid).unwrap()));
    }

    #[test]
    fn test_node_id_parse_errors_are_consumer_errors() {
        for input in ["", "ns=2", "ns=x;i=1", "i=abc", "x=1", "ns=2;s="] {
            let err = input.parse::<NodeId>().unwrap_err();
            assert!(
                matches!(err, UaError::Consumer(ConsumerError::InvalidNodeId { .. })),
                "{input}: {err}"
            );
        }
    }

    #[test]
    fn test_failure_kind_ordering() {
        assert!(FailureKind::Transport < FailureKind::SecureChannel);
        assert!(FailureKind::SecureChannel < FailureKind::Session);
        assert!(FailureKind::Session < FailureKind::Subscription);
        assert_eq!(
            FailureKind::Session.deepest(FailureKind::Transport),
            FailureKind::Transport
        );
        assert!(!FailureKind::Subscription.is_connection_level());
    }

    #[test]
    fn test_subscription_parameters_validation() {
        assert!(SubscriptionParameters::default().validate().is_ok());

        let zero = SubscriptionParameters::default().with_interval(Duration::ZERO);
        assert!(matches!(
            zero.validate(),
            Err(UaError::Consumer(ConsumerError::ZeroInterval))
        ));

        let bad_lifetime = SubscriptionParameters {
            lifetime_count: 10,
            max_keep_alive_count: 10,
            ..Default::default()
        };
        assert!(bad_lifetime.validate().is_err());
    }

    #[test]
    fn test_status_code() {
        assert!(StatusCode::GOOD.is_good());
        assert!(StatusCode::BAD_NODE_ID_UNKNOWN.is_bad());
        assert_eq!(StatusCode::BAD_NODE_ID_UNKNOWN.name(), "BadNodeIdUnknown");
        assert_eq!(StatusCode(0x80FF_0000).name(), "Bad");
        assert_eq!(
            StatusCode::BAD_SESSION_ID_INVALID.to_string(),
            "BadSessionIdInvalid (0x80250000)"
        );
    }

    #[test]
    fn test_client_state_helpers() {
        assert!(ClientState::Connected.is_connected());
        assert!(ClientState::SessionUp.is_transitioning());
        assert!(ClientState::Closing.is_shutting_down());
        assert_eq!(ClientState::SecureChannelUp.to_string(), "SecureChannelUp");
    }

    #[test]
    fn test_user_identity_debug_hides_password() {
        let identity = UserIdentity::UserName {
            username: "operator".into(),
            password: "secret".into(),
        };
        let debug = format!("{identity:?}");
        assert!(debug.contains("operator"));
        assert!(!debug.contains("secret"));
    }

    #[test]
    fn test_fault_message() {
        let message = DataChangeMessage::fault(FailureKind::Session, "session revoked");
        assert!(message.is_fault());
        assert!(message.node_id.is_null());
        assert!(message.value.is_null());
        assert_eq!(
            message.error.unwrap().to_string(),
            "session failure: session revoked"
        );
    }

    #[test]
    fn test_call_request_validation() {
        let request = CallMethodRequest::new(NodeId::null(), NodeId::string(2, "m"));
        assert!(request.validate().is_err());

        let request = CallMethodRequest::new(NodeId::string(2, "o"), NodeId::string(2, "m"))
            .with_argument(Variant::UInt32(1));
        assert!(request.validate().is_ok());
        assert_eq!(request.input_arguments.len(), 1);
    }
}
