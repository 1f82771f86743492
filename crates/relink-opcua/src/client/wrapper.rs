// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! High-level client with automatic recovery.
//!
//! [`UaClient`] owns the three connection layers (transport link, secure
//! channel, session) and the subscription registry. Failures detected by the
//! health watcher, by call paths or by replay are reported to a single
//! recovery driver, which rebuilds from the deepest failed layer upward and
//! replays the registered subscriptions.
//!
//! Connection-changing work (initial connect, recovery, subscribe, close) is
//! serialized by the lifecycle lock. Background tasks hold only a weak
//! reference to the client core, so dropping the last [`UaClient`] stops them.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::ClientConfig;
use crate::error::{ConsumerError, ServiceError, SubscriptionError, UaError, UaResult};
use crate::types::{
    CallMethodRequest, CallMethodResult, ClientState, DataChangeMessage, FailureKind, NodeId,
    StatusCode, SubscriptionParameters,
};

use super::channel::SecureChannelManager;
use super::link::LinkManager;
use super::recovery::{self, Failure, RecoveryPlan};
use super::registry::{
    ArmContext, ReplayOutcome, SubscriptionKey, SubscriptionRegistry, SubscriptionStatus,
};
use super::session::SessionManager;
use super::state::{ClientEvent, StateMachine};
use super::stats::{ClientStats, StatsSnapshot};
use super::transport::{with_deadline, ServerEvent, SessionToken, UaTransport};
use super::watcher::{self, WatcherHandle};

// =============================================================================
// ClientCore
// =============================================================================

#[derive(Default)]
struct Tasks {
    failures: Option<mpsc::UnboundedReceiver<Failure>>,
    driver: Option<JoinHandle<()>>,
    watcher: Option<WatcherHandle>,
}

/// Shared state behind every [`UaClient`] clone.
pub(crate) struct ClientCore {
    pub(crate) config: ClientConfig,
    pub(crate) transport: Arc<dyn UaTransport>,
    pub(crate) link: LinkManager,
    pub(crate) channel: SecureChannelManager,
    pub(crate) session: SessionManager,
    pub(crate) registry: SubscriptionRegistry,
    pub(crate) state: StateMachine,
    pub(crate) stats: ClientStats,
    pub(crate) recovering: AtomicBool,
    generation: AtomicU64,
    has_connected: AtomicBool,
    closing: AtomicBool,
    lifecycle: tokio::sync::Mutex<()>,
    shutdown: CancellationToken,
    failures: mpsc::UnboundedSender<Failure>,
    tasks: parking_lot::Mutex<Tasks>,
}

impl ClientCore {
    fn new(config: ClientConfig, transport: Arc<dyn UaTransport>) -> Self {
        let endpoint = config.endpoint();
        let (failures, failures_rx) = mpsc::unbounded_channel();

        Self {
            link: LinkManager::new(transport.clone(), endpoint.clone(), config.connect_timeout),
            channel: SecureChannelManager::new(
                transport.clone(),
                endpoint,
                config.channel_lifetime,
                config.request_timeout,
            ),
            session: SessionManager::new(transport.clone(), config.clone()),
            registry: SubscriptionRegistry::new(config.fault_notifications),
            state: StateMachine::new(config.event_capacity),
            stats: ClientStats::default(),
            recovering: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            has_connected: AtomicBool::new(false),
            closing: AtomicBool::new(false),
            lifecycle: tokio::sync::Mutex::new(()),
            shutdown: CancellationToken::new(),
            failures,
            tasks: parking_lot::Mutex::new(Tasks {
                failures: Some(failures_rx),
                ..Default::default()
            }),
            transport,
            config,
        }
    }

    /// Current connection generation.
    pub(crate) fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Token cancelled when the client closes.
    pub(crate) fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    fn arm_context<'a>(&'a self, session: &'a SessionToken) -> ArmContext<'a> {
        ArmContext {
            transport: self.transport.as_ref(),
            session,
            request_timeout: self.config.request_timeout,
        }
    }

    fn transition_or_fail(&self, to: ClientState) -> UaResult<()> {
        if self.state.transition(to) {
            return Ok(());
        }
        let current = self.state.current();
        if current.is_shutting_down() {
            Err(UaError::client_closed())
        } else {
            Err(UaError::not_connected(current))
        }
    }

    // =========================================================================
    // Layer Bring-up
    // =========================================================================

    /// Brings every missing layer up and ends in `Connected`.
    async fn establish(self: &Arc<Self>) -> UaResult<()> {
        self.transition_or_fail(ClientState::Connecting)?;

        let result = self.bring_up().await;
        if result.is_err() {
            self.state.fall_back();
        }
        result
    }

    async fn bring_up(self: &Arc<Self>) -> UaResult<()> {
        if !self.link.is_up() {
            self.stop_watcher().await;
            self.session.discard();
            self.channel.discard();
            self.link.close().await;

            let (epoch, events) = self.link.open().await?;
            self.start_watcher(epoch, events);
        }

        let channel = match self.channel.token() {
            Some(token) => token,
            None => {
                self.session.discard();
                self.channel.open().await?
            }
        };
        self.transition_or_fail(ClientState::SecureChannelUp)?;

        if self.session.info().is_none() {
            self.session.create_and_activate(&channel).await?;
        }
        self.transition_or_fail(ClientState::SessionUp)?;
        self.transition_or_fail(ClientState::Connected)
    }

    /// Drops every layer from `layer` up. Server ids are always forgotten.
    async fn teardown(&self, layer: FailureKind) {
        self.registry.unbind_all();
        match layer {
            FailureKind::Transport => {
                self.stop_watcher().await;
                self.session.discard();
                self.channel.discard();
                self.link.close().await;
            }
            FailureKind::SecureChannel => {
                self.session.discard();
                self.channel.discard();
            }
            FailureKind::Session | FailureKind::Subscription => {
                self.session.discard();
            }
        }
    }

    fn start_watcher(self: &Arc<Self>, epoch: u64, events: mpsc::Receiver<ServerEvent>) {
        let handle = watcher::spawn(
            Arc::downgrade(self),
            epoch,
            events,
            self.shutdown.child_token(),
            self.config.keepalive_interval,
        );
        let previous = self.tasks.lock().watcher.replace(handle);
        if let Some(previous) = previous {
            previous.cancel.cancel();
        }
    }

    async fn stop_watcher(&self) {
        let handle = self.tasks.lock().watcher.take();
        if let Some(handle) = handle {
            tracing::trace!(epoch = handle.epoch, "Stopping health watcher");
            handle.stop().await;
        }
    }

    fn ensure_driver(self: &Arc<Self>) {
        let mut tasks = self.tasks.lock();
        if tasks.driver.is_some() {
            return;
        }
        if let Some(failures) = tasks.failures.take() {
            tasks.driver = Some(tokio::spawn(recovery::run(
                Arc::downgrade(self),
                failures,
                self.shutdown.child_token(),
            )));
        }
    }

    // =========================================================================
    // Failure Reporting
    // =========================================================================

    /// Records a failure and hands it to the recovery driver.
    pub(crate) fn report_failure(
        &self,
        kind: FailureKind,
        reason: &str,
        subscription: Option<SubscriptionKey>,
    ) {
        if self.shutdown.is_cancelled() || !self.has_connected.load(Ordering::Acquire) {
            return;
        }

        let generation = self.generation();
        self.stats.record_failure();
        tracing::warn!(kind = %kind, reason, generation, "Connection failure detected");

        if kind.is_connection_level() {
            for key in self.registry.fault_all(kind, reason) {
                self.state.emit(ClientEvent::SubscriptionFaulted {
                    subscription: key,
                    kind,
                });
            }
            if self.state.current().is_connected() {
                self.state.fall_back();
            }
        } else if let Some(key) = subscription {
            if self.registry.fault(key, kind, reason) {
                self.state.emit(ClientEvent::SubscriptionFaulted {
                    subscription: key,
                    kind,
                });
            }
        }

        self.state.emit(ClientEvent::FailureDetected {
            kind,
            reason: reason.to_string(),
        });

        let mut failure = Failure::new(kind, reason, generation);
        if let Some(key) = subscription {
            failure = failure.for_subscription(key);
        }
        let _ = self.failures.send(failure);
    }

    /// Invalidates the layer an error implicates and reports it.
    pub(crate) fn handle_layer_error(&self, error: &UaError) {
        match error.failure_kind() {
            Some(FailureKind::Transport) => {
                self.on_link_lost(self.link.epoch(), &error.to_string());
            }
            Some(FailureKind::SecureChannel) => {
                if self.channel.invalidate(None) {
                    self.session.invalidate(None);
                    self.report_failure(FailureKind::SecureChannel, &error.to_string(), None);
                }
            }
            Some(FailureKind::Session) => {
                if self.session.invalidate(None) {
                    self.report_failure(FailureKind::Session, &error.to_string(), None);
                }
            }
            Some(FailureKind::Subscription) | None => {}
        }
    }

    pub(crate) fn on_link_lost(&self, epoch: u64, reason: &str) {
        if self.link.mark_lost(epoch) {
            self.channel.invalidate(None);
            self.session.invalidate(None);
            self.report_failure(FailureKind::Transport, reason, None);
        }
    }

    pub(crate) fn on_channel_invalid(&self, channel_id: u32, reason: &str) {
        if self.channel.invalidate(Some(channel_id)) {
            self.session.invalidate(None);
            self.report_failure(FailureKind::SecureChannel, reason, None);
        }
    }

    pub(crate) fn on_session_invalid(&self, session_id: &str, reason: &str) {
        if self.session.invalidate(Some(session_id)) {
            self.report_failure(FailureKind::Session, reason, None);
        }
    }

    pub(crate) fn on_subscription_lost(&self, server_id: u32, reason: &str) {
        match self.registry.unbind_server_id(server_id) {
            Some(key) => self.report_failure(FailureKind::Subscription, reason, Some(key)),
            None => tracing::debug!(server_id, "Loss of unknown subscription ignored"),
        }
    }

    /// Renews the secure channel when due and pings the session.
    pub(crate) async fn keepalive_tick(&self) {
        if !self.state.current().is_connected() || self.recovering.load(Ordering::Acquire) {
            return;
        }

        if self.channel.renewal_due() {
            if let Err(e) = self.channel.renew().await {
                e.log("renew secure channel");
                self.handle_layer_error(&e);
                return;
            }
        }

        if let Err(e) = self.session.keepalive().await {
            e.log("session keepalive");
            self.handle_layer_error(&e);
        }
    }

    /// Layers that went away while nobody was listening for failures.
    fn verify_layers(&self) {
        if !self.link.is_up() {
            self.report_failure(FailureKind::Transport, "link lost while connecting", None);
        } else if self.channel.token().is_none() {
            self.report_failure(FailureKind::SecureChannel, "channel lost while connecting", None);
        } else if self.session.info().is_none() {
            self.report_failure(FailureKind::Session, "session lost while connecting", None);
        }
    }

    // =========================================================================
    // Recovery Hooks
    // =========================================================================

    /// Returns `true` if a failure no longer describes the current connection.
    pub(crate) fn is_stale(&self, failure: &Failure) -> bool {
        if self.shutdown.is_cancelled() || failure.generation < self.generation() {
            return true;
        }
        match (failure.kind, failure.subscription) {
            (FailureKind::Subscription, Some(key)) => !self
                .registry
                .status(key)
                .is_some_and(|status| status.is_faulted()),
            (FailureKind::Subscription, None) => true,
            _ => false,
        }
    }

    /// Executes one attempt of a recovery plan.
    pub(crate) async fn recover_once(
        self: &Arc<Self>,
        plan: &RecoveryPlan,
        cancel: &CancellationToken,
    ) -> UaResult<ReplayOutcome> {
        let _guard = self.lifecycle.lock().await;
        if self.shutdown.is_cancelled() {
            return Err(UaError::client_closed());
        }

        match plan.start() {
            FailureKind::Subscription => {
                let state = self.state.current();
                if !state.is_connected() {
                    return Err(UaError::not_connected(state));
                }
                let keys: Vec<_> = plan
                    .affected()
                    .into_iter()
                    .filter(|key| {
                        self.registry
                            .status(*key)
                            .is_some_and(|status| status.is_faulted())
                    })
                    .collect();
                self.replay(&keys, cancel).await
            }
            layer => {
                self.generation.fetch_add(1, Ordering::AcqRel);
                self.state.fall_back();
                self.teardown(layer).await;
                self.establish().await?;
                let keys = self.registry.keys();
                self.replay(&keys, cancel).await
            }
        }
    }

    async fn replay(
        &self,
        keys: &[SubscriptionKey],
        cancel: &CancellationToken,
    ) -> UaResult<ReplayOutcome> {
        if keys.is_empty() {
            return Ok(ReplayOutcome::default());
        }

        let session = self
            .session
            .token()
            .ok_or_else(|| UaError::not_connected(self.state.current()))?;

        let result = self
            .registry
            .replay(
                self.arm_context(&session),
                keys,
                self.config.replay_retries,
                self.config.replay_retry_delay,
                cancel,
            )
            .await;

        match result {
            Ok(outcome) => {
                self.stats
                    .record_replay(outcome.replayed.len(), outcome.pending.len());
                for key in &outcome.replayed {
                    self.state
                        .emit(ClientEvent::SubscriptionResumed { subscription: *key });
                }
                Ok(outcome)
            }
            Err(e) => {
                self.handle_layer_error(&e);
                Err(e)
            }
        }
    }

    /// Sends subscriptions left pending back to the driver later.
    pub(crate) fn schedule_replay(&self, keys: Vec<SubscriptionKey>, delay: Duration) {
        tracing::debug!(
            pending = keys.len(),
            delay_ms = delay.as_millis() as u64,
            "Scheduling subscription replay"
        );
        recovery::retry_later(
            self.failures.clone(),
            keys,
            self.generation(),
            delay,
            self.shutdown.child_token(),
        );
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    async fn connect(self: &Arc<Self>) -> UaResult<()> {
        if self.closing.load(Ordering::Acquire) {
            return Err(UaError::client_closed());
        }
        if self.has_connected.load(Ordering::Acquire) {
            return self.wait_for(ClientState::Connected).await;
        }

        let guard = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => return Err(UaError::client_closed()),
            guard = self.lifecycle.lock() => guard,
        };
        if self.has_connected.load(Ordering::Acquire) {
            drop(guard);
            return self.wait_for(ClientState::Connected).await;
        }

        self.ensure_driver();
        tracing::info!(endpoint = %self.config.endpoint, "Connecting");

        let result = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => Err(UaError::client_closed()),
            result = self.establish() => result,
        };

        match result {
            Ok(()) => {
                self.has_connected.store(true, Ordering::Release);
                self.stats.record_connect();
                tracing::info!(
                    endpoint = %self.config.endpoint,
                    session_id = ?self.session.info().map(|info| info.session_id().to_string()),
                    "Connected"
                );
                self.verify_layers();
                Ok(())
            }
            Err(e) => {
                e.log("connect");
                self.teardown(FailureKind::Transport).await;
                Err(e)
            }
        }
    }

    async fn wait_for(&self, target: ClientState) -> UaResult<()> {
        let mut watch = self.state.watch();
        loop {
            let current = *watch.borrow_and_update();
            if current == target {
                return Ok(());
            }
            if current.is_shutting_down() && !target.is_shutting_down() {
                return Err(UaError::client_closed());
            }
            if watch.changed().await.is_err() {
                return Err(UaError::client_closed());
            }
        }
    }

    async fn close(&self) -> UaResult<()> {
        if self.closing.swap(true, Ordering::AcqRel) {
            return self.wait_for(ClientState::Closed).await;
        }

        tracing::info!(endpoint = %self.config.endpoint, "Closing client");
        self.shutdown.cancel();
        self.state.transition(ClientState::Closing);

        let driver = self.tasks.lock().driver.take();
        if let Some(driver) = driver {
            let _ = driver.await;
        }

        let _guard = self.lifecycle.lock().await;
        self.stop_watcher().await;

        let closed = self.registry.close_all();
        self.session.close().await;
        self.channel.close().await;
        self.link.close().await;

        self.state.transition(ClientState::Closed);
        tracing::info!(subscriptions = closed.len(), "Client closed");
        Ok(())
    }

    // =========================================================================
    // Services
    // =========================================================================

    /// Registers and arms a subscription. Requires `Connected`.
    pub(crate) async fn subscribe(
        &self,
        parameters: SubscriptionParameters,
        nodes: Vec<NodeId>,
        inbox: mpsc::Sender<DataChangeMessage>,
    ) -> UaResult<(SubscriptionKey, watch::Receiver<SubscriptionStatus>)> {
        let _guard = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => return Err(UaError::client_closed()),
            guard = self.lifecycle.lock() => guard,
        };

        let state = self.state.current();
        if state.is_shutting_down() {
            return Err(UaError::client_closed());
        }
        let session = match self.session.token() {
            Some(session) if state.is_connected() => session,
            _ => return Err(UaError::not_connected(state)),
        };

        let (key, status) = self.registry.register(parameters, nodes, inbox);
        let armed = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => Err(UaError::client_closed()),
            result = self.registry.arm(self.arm_context(&session), key) => result,
        };

        match armed {
            Ok(Some(server_id)) => {
                tracing::info!(subscription = %key, server_id, "Subscription created");
                Ok((key, status))
            }
            Ok(None) => {
                self.registry.deregister(key);
                Err(UaError::subscription(SubscriptionError::creation_failed(
                    "subscription removed while arming",
                )))
            }
            Err(e) => {
                self.registry.deregister(key);
                if e.is_layer_loss() {
                    self.handle_layer_error(&e);
                }
                Err(e)
            }
        }
    }

    /// Removes a subscription and deletes it on the server if reachable.
    pub(crate) async fn unsubscribe(&self, key: SubscriptionKey) {
        let Some(server_id) = self.registry.deregister(key) else {
            return;
        };
        if !self.state.current().is_connected() {
            return;
        }
        if let Some(session) = self.session.token() {
            let result = with_deadline(
                "DeleteSubscription",
                self.config.request_timeout,
                self.transport.delete_subscription(&session, server_id),
            )
            .await;
            if let Err(e) = result {
                e.log("delete subscription");
            }
        }
    }

    async fn call(&self, request: CallMethodRequest) -> UaResult<CallMethodResult> {
        request.validate()?;

        let state = self.state.current();
        if state.is_shutting_down() {
            return Err(UaError::client_closed());
        }
        let session = match self.session.token() {
            Some(session) if state.is_connected() => session,
            _ => return Err(UaError::not_connected(state)),
        };

        let response = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => Err(UaError::client_closed()),
            response = with_deadline(
                "Call",
                self.config.request_timeout,
                self.transport.call(&session, &request),
            ) => response,
        };

        let result = match response {
            Ok(result) if !result.status_code.is_bad() => Ok(result),
            Ok(result)
                if result.status_code == StatusCode::BAD_NODE_ID_UNKNOWN
                    || result.status_code == StatusCode::BAD_NODE_ID_INVALID =>
            {
                Err(UaError::consumer(ConsumerError::unknown_node(
                    request.object_id.to_string(),
                )))
            }
            Ok(result) => Err(UaError::service(ServiceError::rejected(
                "Call",
                result.status_code,
            ))),
            Err(e) => {
                if e.is_layer_loss() {
                    self.handle_layer_error(&e);
                }
                Err(e)
            }
        };

        self.stats.record_call(result.is_ok());
        result
    }

    fn stats_snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            links_opened: self.link.opened(),
            channels_opened: self.channel.opened(),
            channels_renewed: self.channel.renewed(),
            sessions_created: self.session.stats().creations(),
            ..self.stats.snapshot()
        }
    }
}

impl Drop for ClientCore {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

// =============================================================================
// UaClient
// =============================================================================

/// OPC UA client that reconnects and replays subscriptions on its own.
///
/// Cloning is cheap; all clones share one connection.
///
/// # Example
///
/// ```rust,ignore
/// let config = ClientConfig::builder()
///     .endpoint("opc.tcp://localhost:4840")
///     .build()?;
/// let client = UaClient::new(config, transport)?;
/// client.connect().await?;
///
/// let mut events = client.events();
/// while let Ok(event) = events.recv().await {
///     println!("{event:?}");
/// }
/// ```
#[derive(Clone)]
pub struct UaClient {
    core: Arc<ClientCore>,
}

impl UaClient {
    /// Creates a client. Nothing is sent until [`connect`](Self::connect).
    pub fn new(config: ClientConfig, transport: Arc<dyn UaTransport>) -> UaResult<Self> {
        config.validate()?;
        Ok(Self {
            core: Arc::new(ClientCore::new(config, transport)),
        })
    }

    /// Connects to the server.
    ///
    /// The first call establishes transport, secure channel and session, and
    /// returns the error if any layer fails. Once the client has connected,
    /// later calls wait until recovery has the client `Connected` again.
    pub async fn connect(&self) -> UaResult<()> {
        self.core.connect().await
    }

    /// Closes the client.
    ///
    /// Stops recovery, releases every forwarder and tears the layers down
    /// from the session downward. Closing twice is not an error.
    pub async fn close(&self) -> UaResult<()> {
        self.core.close().await
    }

    /// Returns the current state.
    pub fn state(&self) -> ClientState {
        self.core.state.current()
    }

    /// Returns `true` while a recovery sequence is running.
    pub fn is_recovering(&self) -> bool {
        self.core.recovering.load(Ordering::Acquire)
    }

    /// Subscribes to client events.
    pub fn events(&self) -> broadcast::Receiver<ClientEvent> {
        self.core.state.subscribe()
    }

    /// Returns a receiver tracking the current state.
    pub fn state_watch(&self) -> watch::Receiver<ClientState> {
        self.core.state.watch()
    }

    /// Waits until the client reaches `target`.
    ///
    /// Fails once the client is closing, unless `target` is a closing state.
    pub async fn wait_for_state(&self, target: ClientState) -> UaResult<()> {
        self.core.wait_for(target).await
    }

    /// Invokes a method on the server.
    pub async fn call(&self, request: CallMethodRequest) -> UaResult<CallMethodResult> {
        self.core.call(request).await
    }

    /// Returns a snapshot of the client counters.
    pub fn stats(&self) -> StatsSnapshot {
        self.core.stats_snapshot()
    }

    /// Returns the configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.core.config
    }

    /// Returns the number of registered subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.core.registry.len()
    }

    pub(crate) fn core(&self) -> &Arc<ClientCore> {
        &self.core
    }
}

impl fmt::Debug for UaClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UaClient")
            .field("endpoint", &self.core.config.endpoint)
            .field("state", &self.state())
            .field("subscriptions", &self.core.registry.len())
            .field("recovering", &self.is_recovering())
            .finish()
    }
}
