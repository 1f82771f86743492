// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Error types for the resilient OPC UA client.
//!
//! Errors are grouped by the protocol layer they implicate so that the
//! recovery driver can restart at the right layer instead of always
//! starting from scratch.
//!
//! # Error Categories
//!
//! ```text
//! UaError
//! ├── Transport     - Raw link failures (always a full rebuild)
//! ├── SecureChannel - Channel invalid or expired while the link is up
//! ├── Session       - Session revoked while the channel is intact
//! ├── Subscription  - A single subscription failed to (re)create
//! ├── Consumer      - Invalid caller input, never triggers recovery
//! ├── Service       - Server rejected a request or client not connected
//! ├── Configuration - Invalid settings (terminal)
//! └── Timeout       - A request exceeded its deadline
//! ```
//!
//! # Examples
//!
//! ```
//! use relink_opcua::error::{UaError, TransportError};
//! use relink_opcua::types::FailureKind;
//!
//! let error = UaError::transport(TransportError::closed(Some("peer reset".into())));
//!
//! assert!(error.is_retryable());
//! assert!(error.is_layer_loss());
//! assert_eq!(error.failure_kind(), Some(FailureKind::Transport));
//! ```

use std::fmt;
use std::io;
use std::time::Duration;

use thiserror::Error;
use tracing::Level;

use crate::types::{ClientState, FailureKind, StatusCode};

// =============================================================================
// UaError - Main Error Type
// =============================================================================

/// The main error type for client operations.
#[derive(Debug, Error)]
pub enum UaError {
    /// Transport link errors.
    #[error("{0}")]
    Transport(#[from] TransportError),

    /// Secure channel errors.
    #[error("{0}")]
    SecureChannel(#[from] SecureChannelError),

    /// Session lifecycle errors.
    #[error("{0}")]
    Session(#[from] SessionError),

    /// Subscription errors.
    #[error("{0}")]
    Subscription(#[from] SubscriptionError),

    /// Invalid consumer input.
    #[error("{0}")]
    Consumer(#[from] ConsumerError),

    /// Service-level rejections.
    #[error("{0}")]
    Service(#[from] ServiceError),

    /// Configuration errors.
    #[error("{0}")]
    Configuration(#[from] ConfigurationError),

    /// Timeout errors.
    #[error("{0}")]
    Timeout(#[from] TimeoutError),
}

impl UaError {
    // =========================================================================
    // Factory Methods
    // =========================================================================

    /// Creates a transport error.
    #[inline]
    pub fn transport(error: TransportError) -> Self {
        Self::Transport(error)
    }

    /// Creates a secure channel error.
    #[inline]
    pub fn secure_channel(error: SecureChannelError) -> Self {
        Self::SecureChannel(error)
    }

    /// Creates a session error.
    #[inline]
    pub fn session(error: SessionError) -> Self {
        Self::Session(error)
    }

    /// Creates a subscription error.
    #[inline]
    pub fn subscription(error: SubscriptionError) -> Self {
        Self::Subscription(error)
    }

    /// Creates a consumer error.
    #[inline]
    pub fn consumer(error: ConsumerError) -> Self {
        Self::Consumer(error)
    }

    /// Creates a service error.
    #[inline]
    pub fn service(error: ServiceError) -> Self {
        Self::Service(error)
    }

    /// Creates a configuration error.
    #[inline]
    pub fn configuration(error: ConfigurationError) -> Self {
        Self::Configuration(error)
    }

    /// Creates a timeout error.
    #[inline]
    pub fn timeout(error: TimeoutError) -> Self {
        Self::Timeout(error)
    }

    // =========================================================================
    // Convenience Factory Methods
    // =========================================================================

    /// Creates a "client is not connected" service error.
    pub fn not_connected(state: ClientState) -> Self {
        Self::Service(ServiceError::NotConnected { state })
    }

    /// Creates a "client closed" service error.
    pub fn client_closed() -> Self {
        Self::Service(ServiceError::ClientClosed)
    }

    /// Creates a link-closed transport error.
    pub fn link_closed(reason: impl Into<String>) -> Self {
        Self::Transport(TransportError::closed(Some(reason.into())))
    }

    /// Creates a request timeout error.
    pub fn request_timeout(service: &'static str, duration: Duration) -> Self {
        Self::Timeout(TimeoutError::Request { service, duration })
    }

    // =========================================================================
    // Error Properties
    // =========================================================================

    /// Returns `true` if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) | Self::SecureChannel(_) => true,
            Self::Session(e) => e.is_retryable(),
            Self::Subscription(e) => e.is_retryable(),
            Self::Service(e) => e.is_retryable(),
            Self::Timeout(_) => true,
            Self::Consumer(_) | Self::Configuration(_) => false,
        }
    }

    /// Returns the protocol layer this error implicates.
    ///
    /// Recovery uses this to decide where to restart. `None` means the error
    /// says nothing about connection health.
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            Self::Transport(_) => Some(FailureKind::Transport),
            Self::Timeout(_) => Some(FailureKind::Transport),
            Self::SecureChannel(_) => Some(FailureKind::SecureChannel),
            Self::Session(e) if e.is_retryable() => Some(FailureKind::Session),
            Self::Subscription(_) => Some(FailureKind::Subscription),
            _ => None,
        }
    }

    /// Returns `true` if this error proves a layer is gone.
    ///
    /// Weaker than [`failure_kind`](Self::failure_kind): a timeout implicates
    /// the transport but does not prove the link is dead.
    pub fn is_layer_loss(&self) -> bool {
        match self {
            Self::Transport(e) => matches!(
                e,
                TransportError::Closed { .. } | TransportError::NotConnected
            ),
            Self::SecureChannel(e) => matches!(
                e,
                SecureChannelError::Invalid { .. } | SecureChannelError::Expired { .. }
            ),
            Self::Session(e) => matches!(e, SessionError::Invalid { .. }),
            _ => false,
        }
    }

    /// Returns `true` if retrying cannot help (bad settings, bad credentials).
    pub fn is_terminal(&self) -> bool {
        match self {
            Self::Configuration(_) => true,
            Self::Session(e) => matches!(e, SessionError::AuthenticationFailed { .. }),
            _ => false,
        }
    }

    /// Returns the severity level of this error.
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Transport(e) => e.severity(),
            Self::SecureChannel(_) => ErrorSeverity::Warning,
            Self::Session(e) => e.severity(),
            Self::Subscription(_) => ErrorSeverity::Warning,
            Self::Consumer(_) => ErrorSeverity::Info,
            Self::Service(e) => e.severity(),
            Self::Timeout(_) => ErrorSeverity::Warning,
            Self::Configuration(_) => ErrorSeverity::Critical,
        }
    }

    /// Returns the error category for logging.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Transport(_) => "transport",
            Self::SecureChannel(_) => "secure_channel",
            Self::Session(_) => "session",
            Self::Subscription(_) => "subscription",
            Self::Consumer(_) => "consumer",
            Self::Service(_) => "service",
            Self::Configuration(_) => "configuration",
            Self::Timeout(_) => "timeout",
        }
    }

    /// Returns a unique error code for this error.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::Transport(e) => e.error_code(),
            Self::SecureChannel(e) => e.error_code(),
            Self::Session(e) => e.error_code(),
            Self::Subscription(e) => e.error_code(),
            Self::Consumer(e) => e.error_code(),
            Self::Service(e) => e.error_code(),
            Self::Configuration(e) => e.error_code(),
            Self::Timeout(e) => e.error_code(),
        }
    }

    /// Returns the tracing level for this error.
    pub fn tracing_level(&self) -> Level {
        self.severity().to_tracing_level()
    }

    /// Logs this error with appropriate level and context.
    pub fn log(&self, context: &str) {
        let level = self.tracing_level();
        let code = self.error_code();

        match level {
            Level::ERROR => tracing::error!(
                error_code = %code,
                category = self.category(),
                context = context,
                retryable = self.is_retryable(),
                "{self}"
            ),
            Level::WARN => tracing::warn!(
                error_code = %code,
                category = self.category(),
                context = context,
                retryable = self.is_retryable(),
                "{self}"
            ),
            _ => tracing::debug!(
                error_code = %code,
                category = self.category(),
                context = context,
                retryable = self.is_retryable(),
                "{self}"
            ),
        }
    }
}

// =============================================================================
// TransportError
// =============================================================================

/// Link-level errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection refused.
    #[error("Connection refused to '{endpoint}'")]
    Refused {
        /// Target endpoint.
        endpoint: String,
    },

    /// Link closed unexpectedly.
    #[error("Connection closed{}", .reason.as_deref().map(|r| format!(": {r}")).unwrap_or_default())]
    Closed {
        /// Reason for closure.
        reason: Option<String>,
    },

    /// No link is open.
    #[error("Transport link is not open")]
    NotConnected,
}

impl TransportError {
    /// Creates a connection refused error.
    pub fn refused(endpoint: impl Into<String>) -> Self {
        Self::Refused {
            endpoint: endpoint.into(),
        }
    }

    /// Creates a link closed error.
    pub fn closed(reason: Option<String>) -> Self {
        Self::Closed { reason }
    }

    /// Returns the severity level.
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Refused { .. } => ErrorSeverity::Error,
            Self::Closed { .. } | Self::NotConnected => ErrorSeverity::Warning,
        }
    }

    /// Returns the error code.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::Refused { .. } => ErrorCode::new(1, 1),
            Self::Closed { .. } => ErrorCode::new(1, 2),
            Self::NotConnected => ErrorCode::new(1, 3),
        }
    }
}

// =============================================================================
// SecureChannelError
// =============================================================================

/// Secure channel errors.
#[derive(Debug, Error)]
pub enum SecureChannelError {
    /// The server invalidated the channel.
    #[error("Secure channel {channel_id} is no longer valid")]
    Invalid {
        /// Channel identifier.
        channel_id: u32,
    },

    /// The channel token lifetime elapsed without renewal.
    #[error("Secure channel {channel_id} token {token_id} expired")]
    Expired {
        /// Channel identifier.
        channel_id: u32,
        /// Token identifier.
        token_id: u32,
    },

    /// No channel is open.
    #[error("No secure channel is open")]
    NotOpen,
}

impl SecureChannelError {
    /// Creates an invalid-channel error.
    pub fn invalid(channel_id: u32) -> Self {
        Self::Invalid { channel_id }
    }

    /// Returns the error code.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::Invalid { .. } => ErrorCode::new(2, 1),
            Self::Expired { .. } => ErrorCode::new(2, 2),
            Self::NotOpen => ErrorCode::new(2, 3),
        }
    }
}

// =============================================================================
// SessionError
// =============================================================================

/// Session lifecycle errors.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Session creation failed.
    #[error("Failed to create session: {message}")]
    CreationFailed {
        /// Error message.
        message: String,
    },

    /// The server revoked the session.
    #[error("Session '{session_id}' is no longer valid")]
    Invalid {
        /// Session identifier.
        session_id: String,
    },

    /// No active session.
    #[error("Session not activated")]
    NotActivated,

    /// Identity token rejected.
    #[error("Authentication failed: {message}")]
    AuthenticationFailed {
        /// Error message.
        message: String,
    },
}

impl SessionError {
    /// Creates a session creation failed error.
    pub fn creation_failed(message: impl Into<String>) -> Self {
        Self::CreationFailed {
            message: message.into(),
        }
    }

    /// Creates an invalid-session error.
    pub fn invalid(session_id: impl Into<String>) -> Self {
        Self::Invalid {
            session_id: session_id.into(),
        }
    }

    /// Creates an authentication failed error.
    pub fn authentication_failed(message: impl Into<String>) -> Self {
        Self::AuthenticationFailed {
            message: message.into(),
        }
    }

    /// Returns `true` if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::AuthenticationFailed { .. })
    }

    /// Returns the severity level.
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::AuthenticationFailed { .. } => ErrorSeverity::Critical,
            Self::Invalid { .. } | Self::NotActivated => ErrorSeverity::Warning,
            _ => ErrorSeverity::Error,
        }
    }

    /// Returns the error code.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::CreationFailed { .. } => ErrorCode::new(3, 1),
            Self::Invalid { .. } => ErrorCode::new(3, 2),
            Self::NotActivated => ErrorCode::new(3, 3),
            Self::AuthenticationFailed { .. } => ErrorCode::new(3, 4),
        }
    }
}

// =============================================================================
// SubscriptionError
// =============================================================================

/// Subscription errors.
#[derive(Debug, Error)]
pub enum SubscriptionError {
    /// CreateSubscription failed.
    #[error("Failed to create subscription: {message}")]
    CreationFailed {
        /// Error message.
        message: String,
    },

    /// Server does not know the subscription id.
    #[error("Subscription {subscription_id} not found on server")]
    NotFound {
        /// Server-side subscription id.
        subscription_id: u32,
    },

    /// A monitored item could not be created.
    #[error("Monitored item for '{node_id}' failed: {status}")]
    MonitoredItemFailed {
        /// The node.
        node_id: String,
        /// Server status.
        status: StatusCode,
    },
}

impl SubscriptionError {
    /// Creates a creation failure.
    pub fn creation_failed(message: impl Into<String>) -> Self {
        Self::CreationFailed {
            message: message.into(),
        }
    }

    /// Creates a not-found error.
    pub fn not_found(subscription_id: u32) -> Self {
        Self::NotFound { subscription_id }
    }

    /// Creates a monitored item failure.
    pub fn monitored_item_failed(node_id: impl Into<String>, status: StatusCode) -> Self {
        Self::MonitoredItemFailed {
            node_id: node_id.into(),
            status,
        }
    }

    /// Returns `true` if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        true
    }

    /// Returns the error code.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::CreationFailed { .. } => ErrorCode::new(4, 1),
            Self::NotFound { .. } => ErrorCode::new(4, 2),
            Self::MonitoredItemFailed { .. } => ErrorCode::new(4, 3),
        }
    }
}

// =============================================================================
// ConsumerError
// =============================================================================

/// Invalid input supplied by the caller.
///
/// Returned synchronously and never schedules recovery.
#[derive(Debug, Error)]
pub enum ConsumerError {
    /// Subscription interval was zero.
    #[error("Subscription interval must be greater than zero")]
    ZeroInterval,

    /// No node ids were supplied.
    #[error("At least one node id is required")]
    EmptyNodeList,

    /// Node id could not be parsed.
    #[error("Invalid node id '{node_id}': {reason}")]
    InvalidNodeId {
        /// The rejected input.
        node_id: String,
        /// Reason.
        reason: String,
    },

    /// Server does not know the node.
    #[error("Unknown node id '{node_id}'")]
    UnknownNode {
        /// The node.
        node_id: String,
    },

    /// Generic invalid argument.
    #[error("Invalid argument: {message}")]
    InvalidArgument {
        /// Error message.
        message: String,
    },
}

impl ConsumerError {
    /// Creates an invalid node id error.
    pub fn invalid_node_id(node_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidNodeId {
            node_id: node_id.into(),
            reason: reason.into(),
        }
    }

    /// Creates an unknown node error.
    pub fn unknown_node(node_id: impl Into<String>) -> Self {
        Self::UnknownNode {
            node_id: node_id.into(),
        }
    }

    /// Creates an invalid argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Returns the error code.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::ZeroInterval => ErrorCode::new(5, 1),
            Self::EmptyNodeList => ErrorCode::new(5, 2),
            Self::InvalidNodeId { .. } => ErrorCode::new(5, 3),
            Self::UnknownNode { .. } => ErrorCode::new(5, 4),
            Self::InvalidArgument { .. } => ErrorCode::new(5, 5),
        }
    }
}

// =============================================================================
// ServiceError
// =============================================================================

/// Service call errors.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The client is not in the `Connected` state.
    #[error("Client is not connected (state: {state})")]
    NotConnected {
        /// State at the time of the call.
        state: ClientState,
    },

    /// The server answered with a bad status.
    #[error("{service} rejected by server: {status}")]
    Rejected {
        /// Service name.
        service: &'static str,
        /// Server status.
        status: StatusCode,
    },

    /// The client has been closed.
    #[error("Client is closed")]
    ClientClosed,
}

impl ServiceError {
    /// Creates a rejected error.
    pub fn rejected(service: &'static str, status: StatusCode) -> Self {
        Self::Rejected { service, status }
    }

    /// Returns `true` if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::NotConnected { .. })
    }

    /// Returns the severity level.
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::ClientClosed => ErrorSeverity::Info,
            _ => ErrorSeverity::Warning,
        }
    }

    /// Returns the error code.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::NotConnected { .. } => ErrorCode::new(6, 1),
            Self::Rejected { .. } => ErrorCode::new(6, 2),
            Self::ClientClosed => ErrorCode::new(6, 3),
        }
    }
}

// =============================================================================
// ConfigurationError
// =============================================================================

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    /// Invalid endpoint URL.
    #[error("Invalid endpoint URL: {url} ({reason})")]
    InvalidEndpoint {
        /// The invalid URL.
        url: String,
        /// Reason.
        reason: String,
    },

    /// Invalid security configuration.
    #[error("Invalid security configuration: {message}")]
    InvalidSecurity {
        /// Error message.
        message: String,
    },

    /// Invalid timeout or interval value.
    #[error("Invalid {field}: {duration:?} ({reason})")]
    InvalidDuration {
        /// Field name.
        field: &'static str,
        /// The invalid duration.
        duration: Duration,
        /// Reason.
        reason: String,
    },

    /// Invalid value.
    #[error("Invalid {field}: {reason}")]
    InvalidValue {
        /// Field name.
        field: &'static str,
        /// Reason.
        reason: String,
    },

    /// Missing required field.
    #[error("Missing required configuration: {field}")]
    MissingField {
        /// The missing field.
        field: String,
    },

    /// Unsupported file format.
    #[error("Unsupported configuration format: {extension}")]
    UnsupportedFormat {
        /// File extension.
        extension: String,
    },

    /// Parse failure.
    #[error("Failed to parse configuration: {message}")]
    Parse {
        /// Error message.
        message: String,
    },

    /// File could not be read.
    #[error("Failed to read configuration file '{path}'")]
    Io {
        /// File path.
        path: String,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
}

impl ConfigurationError {
    /// Creates an invalid endpoint error.
    pub fn invalid_endpoint(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidEndpoint {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Creates an invalid security error.
    pub fn invalid_security(message: impl Into<String>) -> Self {
        Self::InvalidSecurity {
            message: message.into(),
        }
    }

    /// Creates an invalid duration error.
    pub fn invalid_duration(
        field: &'static str,
        duration: Duration,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidDuration {
            field,
            duration,
            reason: reason.into(),
        }
    }

    /// Creates an invalid value error.
    pub fn invalid_value(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field,
            reason: reason.into(),
        }
    }

    /// Creates a missing field error.
    pub fn missing_field(field: impl Into<String>) -> Self {
        Self::MissingField {
            field: field.into(),
        }
    }

    /// Creates a parse error.
    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse {
            message: message.into(),
        }
    }

    /// Returns the error code.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::InvalidEndpoint { .. } => ErrorCode::new(7, 1),
            Self::InvalidSecurity { .. } => ErrorCode::new(7, 2),
            Self::InvalidDuration { .. } => ErrorCode::new(7, 3),
            Self::InvalidValue { .. } => ErrorCode::new(7, 4),
            Self::MissingField { .. } => ErrorCode::new(7, 5),
            Self::UnsupportedFormat { .. } => ErrorCode::new(7, 6),
            Self::Parse { .. } => ErrorCode::new(7, 7),
            Self::Io { .. } => ErrorCode::new(7, 8),
        }
    }
}

// =============================================================================
// TimeoutError
// =============================================================================

/// Timeout errors.
#[derive(Debug, Error)]
pub enum TimeoutError {
    /// A service request exceeded the request timeout.
    #[error("{service} timed out after {duration:?}")]
    Request {
        /// Service name.
        service: &'static str,
        /// Timeout duration.
        duration: Duration,
    },

    /// Link establishment exceeded the connect timeout.
    #[error("Connect timed out after {duration:?}")]
    Connect {
        /// Timeout duration.
        duration: Duration,
    },
}

impl TimeoutError {
    /// Returns the timeout duration.
    pub fn duration(&self) -> Duration {
        match self {
            Self::Request { duration, .. } | Self::Connect { duration } => *duration,
        }
    }

    /// Returns the error code.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::Request { .. } => ErrorCode::new(8, 1),
            Self::Connect { .. } => ErrorCode::new(8, 2),
        }
    }
}

// =============================================================================
// ErrorSeverity
// =============================================================================

/// Error severity levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorSeverity {
    /// Informational - no action required.
    Info,
    /// Warning - action may be required.
    Warning,
    /// Error - action required, but recoverable.
    Error,
    /// Critical - immediate action required.
    Critical,
}

impl ErrorSeverity {
    /// Converts to tracing level.
    pub fn to_tracing_level(self) -> Level {
        match self {
            Self::Info => Level::DEBUG,
            Self::Warning => Level::WARN,
            Self::Error | Self::Critical => Level::ERROR,
        }
    }

    /// Returns the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// ErrorCode
// =============================================================================

/// Structured error code.
///
/// Format: `UA-XXYY` where XX is the category and YY the specific error.
///
/// Categories:
/// - 1: Transport
/// - 2: SecureChannel
/// - 3: Session
/// - 4: Subscription
/// - 5: Consumer
/// - 6: Service
/// - 7: Configuration
/// - 8: Timeout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ErrorCode {
    /// Category (1-8).
    pub category: u8,
    /// Specific error within category.
    pub code: u8,
}

impl ErrorCode {
    /// Creates a new error code.
    pub const fn new(category: u8, code: u8) -> Self {
        Self { category, code }
    }

    /// Returns the full error code as a u16.
    pub fn as_u16(&self) -> u16 {
        ((self.category as u16) << 8) | (self.code as u16)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UA-{:02X}{:02X}", self.category, self.code)
    }
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// A Result type with UaError.
pub type UaResult<T> = Result<T, UaError>;

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_kind_by_layer() {
        assert_eq!(
            UaError::link_closed("reset").failure_kind(),
            Some(FailureKind::Transport)
        );
        assert_eq!(
            UaError::secure_channel(SecureChannelError::invalid(7)).failure_kind(),
            Some(FailureKind::SecureChannel)
        );
        assert_eq!(
            UaError::session(SessionError::invalid("s-1")).failure_kind(),
            Some(FailureKind::Session)
        );
        assert_eq!(
            UaError::subscription(SubscriptionError::not_found(3)).failure_kind(),
            Some(FailureKind::Subscription)
        );
        assert_eq!(
            UaError::request_timeout("CreateSession", Duration::from_secs(1)).failure_kind(),
            Some(FailureKind::Transport)
        );
    }

    #[test]
    fn test_consumer_errors_never_implicate_a_layer() {
        let error = UaError::consumer(ConsumerError::ZeroInterval);
        assert_eq!(error.failure_kind(), None);
        assert!(!error.is_retryable());
        assert!(!error.is_layer_loss());
    }

    #[test]
    fn test_terminal_errors() {
        assert!(UaError::session(SessionError::authentication_failed("bad password")).is_terminal());
        assert!(UaError::configuration(ConfigurationError::invalid_endpoint("tcp://x", "scheme"))
            .is_terminal());
        assert!(!UaError::link_closed("reset").is_terminal());
        assert!(!UaError::secure_channel(SecureChannelError::invalid(3)).is_terminal());

        let rejected = UaError::session(SessionError::authentication_failed("bad password"));
        assert_eq!(rejected.failure_kind(), None);
    }

    #[test]
    fn test_layer_loss() {
        assert!(UaError::session(SessionError::invalid("s-1")).is_layer_loss());
        assert!(!UaError::session(SessionError::creation_failed("busy")).is_layer_loss());
        assert!(!UaError::request_timeout("Call", Duration::from_secs(1)).is_layer_loss());
    }

    #[test]
    fn test_transport_errors_are_retryable() {
        let refused = UaError::transport(TransportError::refused("opc.tcp://localhost:4840"));
        assert!(refused.is_retryable());
        assert!(!refused.is_layer_loss());
        assert_eq!(refused.failure_kind(), Some(FailureKind::Transport));
        assert_eq!(refused.error_code().to_string(), "UA-0101");
    }

    #[test]
    fn test_error_code() {
        let code = ErrorCode::new(1, 5);
        assert_eq!(code.to_string(), "UA-0105");
        assert_eq!(code.as_u16(), 0x0105);
        assert_eq!(
            UaError::client_closed().error_code().to_string(),
            "UA-0603"
        );
    }

    #[test]
    fn test_error_category_and_severity() {
        assert_eq!(UaError::not_connected(ClientState::Disconnected).category(), "service");
        assert_eq!(
            UaError::configuration(ConfigurationError::missing_field("endpoint")).severity(),
            ErrorSeverity::Critical
        );
        assert_eq!(ErrorSeverity::Warning.to_tracing_level(), Level::WARN);
    }

    #[test]
    fn test_display_messages() {
        let error = UaError::service(ServiceError::rejected("Call", StatusCode::BAD_METHOD_INVALID));
        assert!(error.to_string().contains("BadMethodInvalid"));

        let closed = TransportError::closed(Some("peer reset".into()));
        assert_eq!(closed.to_string(), "Connection closed: peer reset");
        assert_eq!(TransportError::closed(None).to_string(), "Connection closed");
    }
}
