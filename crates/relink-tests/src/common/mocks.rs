// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Simulated Server
//!
//! An in-process OPC UA server behind the [`UaTransport`] trait.
//!
//! ## Design Principles
//!
//! - Behaves like a real server: ids change on every recreation, revoked
//!   layers answer with the matching errors
//! - Faults are injected through the method-call service, so tests drive
//!   failures exactly the way they would against a real test server
//! - Counters record every handshake for verification

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use relink_opcua::client::{
    ChannelToken, DataChangeNotification, MonitoredItemCreate, MonitoredItemResult, ServerEvent,
    SessionToken, UaTransport,
};
use relink_opcua::error::{
    SecureChannelError, SessionError, SubscriptionError, TransportError, UaError, UaResult,
};
use relink_opcua::types::{
    CallMethodRequest, CallMethodResult, Endpoint, NodeId, StatusCode, SubscriptionParameters,
    UserIdentity, Variant,
};

use super::fixtures::NodeFixtures;

/// Fault injection methods exposed on the `simulations` object.
pub mod methods {
    /// Drops the transport link.
    pub const CONNECTION_FAILURE: &str = "simulate_connection_failure";
    /// Invalidates the secure channel.
    pub const SECURE_CHANNEL_FAILURE: &str = "simulate_securechannel_failure";
    /// Revokes the session.
    pub const SESSION_FAILURE: &str = "simulate_session_failure";
    /// Drops one subscription. Takes an optional `UInt32` subscription id.
    pub const SUBSCRIPTION_FAILURE: &str = "simulate_subscription_failure";
}

const EVENT_BUFFER: usize = 256;

// =============================================================================
// Server State
// =============================================================================

#[derive(Debug)]
struct Session {
    token: SessionToken,
    channel_id: u32,
    activated: bool,
}

#[derive(Debug)]
struct Subscription {
    session_id: String,
    interval: Duration,
    items: Vec<(u32, NodeId)>,
    publisher: CancellationToken,
}

#[derive(Debug, Default)]
struct State {
    link: Option<mpsc::Sender<ServerEvent>>,
    channel: Option<ChannelToken>,
    session: Option<Session>,
    subscriptions: BTreeMap<u32, Subscription>,
}

impl State {
    fn drop_subscriptions(&mut self) {
        for (_, subscription) in std::mem::take(&mut self.subscriptions) {
            subscription.publisher.cancel();
        }
    }

    fn drop_session(&mut self) -> Option<Session> {
        self.drop_subscriptions();
        self.session.take()
    }

    fn drop_channel(&mut self) -> Option<ChannelToken> {
        self.drop_session();
        self.channel.take()
    }

    fn drop_link(&mut self) -> Option<mpsc::Sender<ServerEvent>> {
        self.drop_channel();
        self.link.take()
    }
}

/// Counters of server activity.
#[derive(Debug, Default)]
pub struct ServerCounters {
    links_opened: AtomicU64,
    channels_opened: AtomicU64,
    channels_renewed: AtomicU64,
    sessions_created: AtomicU64,
    subscriptions_created: AtomicU64,
    subscriptions_deleted: AtomicU64,
    keepalives: AtomicU64,
    calls: AtomicU64,
}

impl ServerCounters {
    /// Links opened.
    pub fn links_opened(&self) -> u64 {
        self.links_opened.load(Ordering::SeqCst)
    }

    /// Secure channels opened.
    pub fn channels_opened(&self) -> u64 {
        self.channels_opened.load(Ordering::SeqCst)
    }

    /// Secure channel tokens renewed.
    pub fn channels_renewed(&self) -> u64 {
        self.channels_renewed.load(Ordering::SeqCst)
    }

    /// Sessions created.
    pub fn sessions_created(&self) -> u64 {
        self.sessions_created.load(Ordering::SeqCst)
    }

    /// Subscriptions created.
    pub fn subscriptions_created(&self) -> u64 {
        self.subscriptions_created.load(Ordering::SeqCst)
    }

    /// Subscriptions deleted by the client.
    pub fn subscriptions_deleted(&self) -> u64 {
        self.subscriptions_deleted.load(Ordering::SeqCst)
    }

    /// Keepalive requests served.
    pub fn keepalives(&self) -> u64 {
        self.keepalives.load(Ordering::SeqCst)
    }

    /// Method calls served.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

// =============================================================================
// SimulatedServer
// =============================================================================

/// In-process server with fault injection.
#[derive(Debug)]
pub struct SimulatedServer {
    endpoint: String,
    state: Arc<Mutex<State>>,
    available: AtomicBool,
    next_channel_id: AtomicU32,
    next_session_id: AtomicU32,
    next_subscription_id: AtomicU32,
    next_item_id: AtomicU32,
    sequence: Arc<AtomicI64>,
    fail_subscription_creates: AtomicU32,
    item_reply_delay: Mutex<Duration>,
    fault_delay: Duration,
    counters: ServerCounters,
}

impl SimulatedServer {
    /// Creates a server that accepts links.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::with_endpoint("opc.tcp://localhost:4840"))
    }

    fn with_endpoint(endpoint: &str) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            state: Arc::new(Mutex::new(State::default())),
            available: AtomicBool::new(true),
            next_channel_id: AtomicU32::new(1),
            next_session_id: AtomicU32::new(1),
            next_subscription_id: AtomicU32::new(1),
            next_item_id: AtomicU32::new(1),
            sequence: Arc::new(AtomicI64::new(0)),
            fail_subscription_creates: AtomicU32::new(0),
            item_reply_delay: Mutex::new(Duration::ZERO),
            fault_delay: Duration::from_millis(10),
            counters: ServerCounters::default(),
        }
    }

    /// Endpoint URL clients should use.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Activity counters.
    pub fn counters(&self) -> &ServerCounters {
        &self.counters
    }

    /// Takes the server down (dropping the current link) or brings it back.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
        if !available {
            let link = self.state.lock().drop_link();
            if let Some(link) = link {
                tokio::spawn(announce(
                    link,
                    ServerEvent::LinkClosed {
                        reason: "server shut down".to_string(),
                    },
                ));
            }
        }
    }

    /// Makes the next `count` CreateSubscription requests fail.
    pub fn fail_subscription_creates(&self, count: u32) {
        self.fail_subscription_creates.store(count, Ordering::SeqCst);
    }

    /// Holds back CreateMonitoredItems replies after the items are created.
    pub fn delay_item_replies(&self, delay: Duration) {
        *self.item_reply_delay.lock() = delay;
    }

    /// Ids of the subscriptions alive on the server, in creation order.
    pub fn subscription_ids(&self) -> Vec<u32> {
        self.state.lock().subscriptions.keys().copied().collect()
    }

    /// Id of the current secure channel.
    pub fn channel_id(&self) -> Option<u32> {
        self.state.lock().channel.as_ref().map(|c| c.channel_id)
    }

    /// Id of the current session.
    pub fn session_id(&self) -> Option<String> {
        self.state
            .lock()
            .session
            .as_ref()
            .map(|s| s.token.session_id.clone())
    }

    // =========================================================================
    // Fault Injection
    // =========================================================================

    /// Drops the transport link.
    pub fn inject_connection_failure(&self) {
        let link = self.state.lock().drop_link();
        if let Some(link) = link {
            tokio::spawn(announce(
                link,
                ServerEvent::LinkClosed {
                    reason: "connection reset by peer".to_string(),
                },
            ));
        }
    }

    /// Invalidates the secure channel. The link stays up.
    pub fn inject_secure_channel_failure(&self) {
        let (link, channel) = {
            let mut state = self.state.lock();
            (state.link.clone(), state.drop_channel())
        };
        if let (Some(link), Some(channel)) = (link, channel) {
            tokio::spawn(announce(
                link,
                ServerEvent::ChannelInvalid {
                    channel_id: channel.channel_id,
                    reason: "secure channel id invalid".to_string(),
                },
            ));
        }
    }

    /// Revokes the session. Link and channel stay up.
    pub fn inject_session_failure(&self) {
        let (link, session) = {
            let mut state = self.state.lock();
            (state.link.clone(), state.drop_session())
        };
        if let (Some(link), Some(session)) = (link, session) {
            tokio::spawn(announce(
                link,
                ServerEvent::SessionInvalid {
                    session_id: session.token.session_id,
                    reason: "session id invalid".to_string(),
                },
            ));
        }
    }

    /// Drops one subscription, the most recent one by default.
    pub fn inject_subscription_failure(&self, subscription_id: Option<u32>) {
        let (link, removed) = {
            let mut state = self.state.lock();
            let id = subscription_id.or_else(|| state.subscriptions.keys().next_back().copied());
            let removed = id.and_then(|id| state.subscriptions.remove(&id).map(|s| (id, s)));
            (state.link.clone(), removed)
        };
        if let (Some(link), Some((id, subscription))) = (link, removed) {
            subscription.publisher.cancel();
            tokio::spawn(announce(
                link,
                ServerEvent::SubscriptionLost {
                    subscription_id: id,
                    reason: "subscription id invalid".to_string(),
                },
            ));
        }
    }

    /// Revokes the session without telling the client.
    ///
    /// The client only notices on its next request or keepalive.
    pub fn revoke_session_silently(&self) {
        self.state.lock().drop_session();
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    fn check_session(&self, state: &State, token: &SessionToken) -> UaResult<()> {
        if state.link.is_none() {
            return Err(UaError::link_closed("link is not open"));
        }
        match &state.session {
            Some(session) if session.token.session_id == token.session_id && session.activated => {
                Ok(())
            }
            _ => Err(UaError::session(SessionError::invalid(&token.session_id))),
        }
    }

    fn check_channel(&self, state: &State, channel: &ChannelToken) -> UaResult<()> {
        if state.link.is_none() {
            return Err(UaError::link_closed("link is not open"));
        }
        match &state.channel {
            Some(current) if current.channel_id == channel.channel_id => Ok(()),
            _ => Err(UaError::secure_channel(SecureChannelError::invalid(
                channel.channel_id,
            ))),
        }
    }

    fn start_publisher(&self, state: &State, subscription_id: u32) {
        let (Some(link), Some(subscription)) =
            (state.link.clone(), state.subscriptions.get(&subscription_id))
        else {
            return;
        };
        tokio::spawn(publish(
            link,
            subscription_id,
            subscription.interval,
            subscription.items.clone(),
            subscription.publisher.clone(),
            self.sequence.clone(),
        ));
    }

    fn schedule_fault(self: &Arc<Self>, method: &str, arguments: &[Variant]) {
        let server = self.clone();
        let method = method.to_string();
        let target = arguments.first().and_then(Variant::as_u32);
        let delay = self.fault_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            tracing::debug!(method = %method, "Injecting fault");
            match method.as_str() {
                methods::CONNECTION_FAILURE => server.inject_connection_failure(),
                methods::SECURE_CHANNEL_FAILURE => server.inject_secure_channel_failure(),
                methods::SESSION_FAILURE => server.inject_session_failure(),
                methods::SUBSCRIPTION_FAILURE => server.inject_subscription_failure(target),
                _ => {}
            }
        });
    }
}

async fn announce(link: mpsc::Sender<ServerEvent>, event: ServerEvent) {
    let _ = link.send(event).await;
}

async fn publish(
    link: mpsc::Sender<ServerEvent>,
    subscription_id: u32,
    interval: Duration,
    items: Vec<(u32, NodeId)>,
    cancel: CancellationToken,
    sequence: Arc<AtomicI64>,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {}
        }

        for (client_handle, node_id) in &items {
            let value = if *node_id == NodeFixtures::sequence() {
                Variant::Int64(sequence.fetch_add(1, Ordering::SeqCst) + 1)
            } else {
                Variant::DateTime(Utc::now())
            };
            let notification = DataChangeNotification {
                subscription_id,
                client_handle: *client_handle,
                value,
                status_code: StatusCode::GOOD,
                source_timestamp: Some(Utc::now()),
                server_timestamp: Utc::now(),
            };
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                sent = link.send(ServerEvent::DataChange(notification)) => {
                    if sent.is_err() {
                        return;
                    }
                }
            }
        }
    }
}

/// Wraps the server so fault-injection calls can reach the server handle.
#[derive(Debug, Clone)]
pub struct SimulatedTransport {
    server: Arc<SimulatedServer>,
}

impl SimulatedTransport {
    /// Creates a transport talking to `server`.
    pub fn new(server: &Arc<SimulatedServer>) -> Arc<Self> {
        Arc::new(Self {
            server: server.clone(),
        })
    }
}

#[async_trait]
impl UaTransport for SimulatedTransport {
    async fn open_link(&self, endpoint: &Endpoint) -> UaResult<mpsc::Receiver<ServerEvent>> {
        let server = &self.server;
        if !server.available.load(Ordering::SeqCst) {
            return Err(UaError::transport(TransportError::refused(&endpoint.url)));
        }

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let mut state = server.state.lock();
        state.drop_link();
        state.link = Some(tx);
        server.counters.links_opened.fetch_add(1, Ordering::SeqCst);
        Ok(rx)
    }

    async fn close_link(&self) -> UaResult<()> {
        self.server.state.lock().drop_link();
        Ok(())
    }

    async fn open_secure_channel(
        &self,
        _endpoint: &Endpoint,
        requested_lifetime: Duration,
    ) -> UaResult<ChannelToken> {
        let server = &self.server;
        let mut state = server.state.lock();
        if state.link.is_none() {
            return Err(UaError::transport(TransportError::NotConnected));
        }

        state.drop_channel();
        let channel_id = server.next_channel_id.fetch_add(1, Ordering::SeqCst);
        let token = ChannelToken::new(channel_id, 1, requested_lifetime);
        state.channel = Some(token.clone());
        server.counters.channels_opened.fetch_add(1, Ordering::SeqCst);
        Ok(token)
    }

    async fn renew_secure_channel(
        &self,
        channel: &ChannelToken,
        requested_lifetime: Duration,
    ) -> UaResult<ChannelToken> {
        let server = &self.server;
        let mut state = server.state.lock();
        server.check_channel(&state, channel)?;

        let token = ChannelToken::new(channel.channel_id, channel.token_id + 1, requested_lifetime);
        state.channel = Some(token.clone());
        server.counters.channels_renewed.fetch_add(1, Ordering::SeqCst);
        Ok(token)
    }

    async fn close_secure_channel(&self, channel: &ChannelToken) -> UaResult<()> {
        let mut state = self.server.state.lock();
        if state.channel.as_ref().map(|c| c.channel_id) == Some(channel.channel_id) {
            state.drop_channel();
        }
        Ok(())
    }

    async fn create_session(
        &self,
        channel: &ChannelToken,
        _name: &str,
        requested_timeout: Duration,
    ) -> UaResult<SessionToken> {
        let server = &self.server;
        let mut state = server.state.lock();
        server.check_channel(&state, channel)?;

        state.drop_session();
        let id = server.next_session_id.fetch_add(1, Ordering::SeqCst);
        let token = SessionToken {
            session_id: format!("ns=1;i={}", 1000 + id),
            auth_token: format!("auth-{id}"),
            revised_timeout: requested_timeout,
        };
        state.session = Some(Session {
            token: token.clone(),
            channel_id: channel.channel_id,
            activated: false,
        });
        server.counters.sessions_created.fetch_add(1, Ordering::SeqCst);
        Ok(token)
    }

    async fn activate_session(
        &self,
        channel: &ChannelToken,
        session: &SessionToken,
        identity: &UserIdentity,
    ) -> UaResult<()> {
        let server = &self.server;
        let mut state = server.state.lock();
        server.check_channel(&state, channel)?;

        if let UserIdentity::UserName { password, .. } = identity {
            if password.is_empty() {
                return Err(UaError::session(SessionError::authentication_failed(
                    "empty password",
                )));
            }
        }

        match state.session.as_mut() {
            Some(current) if current.token.session_id == session.session_id => {
                current.activated = true;
                current.channel_id = channel.channel_id;
                Ok(())
            }
            _ => Err(UaError::session(SessionError::invalid(&session.session_id))),
        }
    }

    async fn close_session(&self, session: &SessionToken) -> UaResult<()> {
        let mut state = self.server.state.lock();
        if state.session.as_ref().map(|s| s.token.session_id.as_str())
            == Some(session.session_id.as_str())
        {
            state.drop_session();
        }
        Ok(())
    }

    async fn keepalive(&self, session: &SessionToken) -> UaResult<()> {
        let server = &self.server;
        let state = server.state.lock();
        server.check_session(&state, session)?;
        server.counters.keepalives.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn create_subscription(
        &self,
        session: &SessionToken,
        parameters: &SubscriptionParameters,
    ) -> UaResult<u32> {
        let server = &self.server;
        let mut state = server.state.lock();
        server.check_session(&state, session)?;

        let failing = server
            .fail_subscription_creates
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(UaError::subscription(SubscriptionError::creation_failed(
                StatusCode::BAD_TOO_MANY_SUBSCRIPTIONS.to_string(),
            )));
        }

        let id = server.next_subscription_id.fetch_add(1, Ordering::SeqCst);
        state.subscriptions.insert(
            id,
            Subscription {
                session_id: session.session_id.clone(),
                interval: parameters.interval,
                items: Vec::new(),
                publisher: CancellationToken::new(),
            },
        );
        server
            .counters
            .subscriptions_created
            .fetch_add(1, Ordering::SeqCst);
        Ok(id)
    }

    async fn create_monitored_items(
        &self,
        session: &SessionToken,
        subscription_id: u32,
        items: &[MonitoredItemCreate],
    ) -> UaResult<Vec<MonitoredItemResult>> {
        let server = &self.server;
        let results = {
            let mut state = server.state.lock();
            server.check_session(&state, session)?;

            let Some(subscription) = state.subscriptions.get_mut(&subscription_id) else {
                return Err(UaError::subscription(SubscriptionError::not_found(
                    subscription_id,
                )));
            };

            let results = items
                .iter()
                .map(|item| {
                    if NodeFixtures::is_known(&item.node_id) {
                        subscription.items.push((item.client_handle, item.node_id.clone()));
                        MonitoredItemResult {
                            status_code: StatusCode::GOOD,
                            monitored_item_id: server.next_item_id.fetch_add(1, Ordering::SeqCst),
                        }
                    } else {
                        MonitoredItemResult {
                            status_code: StatusCode::BAD_NODE_ID_UNKNOWN,
                            monitored_item_id: 0,
                        }
                    }
                })
                .collect::<Vec<_>>();

            if results.iter().all(|r| r.status_code.is_good()) {
                server.start_publisher(&state, subscription_id);
            }
            results
        };

        let delay = *server.item_reply_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Ok(results)
    }

    async fn delete_subscription(&self, session: &SessionToken, subscription_id: u32) -> UaResult<()> {
        let server = &self.server;
        let mut state = server.state.lock();
        server.check_session(&state, session)?;

        match state.subscriptions.remove(&subscription_id) {
            Some(subscription) if subscription.session_id == session.session_id => {
                subscription.publisher.cancel();
                server
                    .counters
                    .subscriptions_deleted
                    .fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            Some(subscription) => {
                state.subscriptions.insert(subscription_id, subscription);
                Err(UaError::subscription(SubscriptionError::not_found(
                    subscription_id,
                )))
            }
            None => Err(UaError::subscription(SubscriptionError::not_found(
                subscription_id,
            ))),
        }
    }

    async fn call(
        &self,
        session: &SessionToken,
        request: &CallMethodRequest,
    ) -> UaResult<CallMethodResult> {
        let server = &self.server;
        {
            let state = server.state.lock();
            server.check_session(&state, session)?;
        }
        server.counters.calls.fetch_add(1, Ordering::SeqCst);

        if request.object_id != NodeFixtures::simulations() {
            return Ok(CallMethodResult {
                status_code: StatusCode::BAD_NODE_ID_UNKNOWN,
                output_arguments: Vec::new(),
            });
        }

        let method = request.method_id.to_string();
        let known = [
            methods::CONNECTION_FAILURE,
            methods::SECURE_CHANNEL_FAILURE,
            methods::SESSION_FAILURE,
            methods::SUBSCRIPTION_FAILURE,
        ]
        .into_iter()
        .find(|name| request.method_id == NodeId::string(2, *name));

        let Some(name) = known else {
            tracing::debug!(method = %method, "Unknown simulation method");
            return Ok(CallMethodResult {
                status_code: StatusCode::BAD_METHOD_INVALID,
                output_arguments: Vec::new(),
            });
        };

        server.schedule_fault(name, &request.input_arguments);
        Ok(CallMethodResult {
            status_code: StatusCode::GOOD,
            output_arguments: Vec::new(),
        })
    }
}
