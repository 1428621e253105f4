//! Connection state machine
//!
//! [`ClientInner`] owns the current [`Session`] and drives every transition
//! between [`ConnectionState`]s. Background tasks (reader, heartbeat,
//! reconnect timer, resubscribe) hold the session they were started for and
//! check it against the current one before acting, so a task that outlives
//! its session can never tear down its successor.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::{BoxFuture, FutureExt, Shared};
use geyser_core::{Method, SubscribeUpdate, Subscription, UpdateOneof};
use parking_lot::{Mutex, RwLock};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use super::heartbeat;
use super::session::Session;
use super::ConnectionState;
use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::events::{ClientEvent, EventBus, EVENT_CHANNEL_CAPACITY};
use crate::registry::{SubscriptionRegistry, SubscriptionSnapshot};
use crate::send;
use crate::transport::{StreamSignal, StreamTransport, TransportError};

/// Outcome of an in-flight connect or disconnect, awaitable by every caller
type SharedOutcome = Shared<BoxFuture<'static, Result<()>>>;

/// Run `future` on its own task so it completes even if every waiter drops
fn spawn_shared<F>(future: F) -> SharedOutcome
where
    F: Future<Output = Result<()>> + Send + 'static,
{
    let handle = tokio::spawn(future);
    async move {
        handle
            .await
            .unwrap_or_else(|e| Err(ClientError::Internal(e.to_string())))
    }
    .boxed()
    .shared()
}

#[derive(Default)]
struct Machine {
    session: Option<Arc<Session>>,
    connecting: Option<SharedOutcome>,
    disconnecting: Option<SharedOutcome>,
    reconnect_attempts: u32,
    reconnect_timer: Option<JoinHandle<()>>,
    /// Bumped by an explicit disconnect; reconnect tasks from an older
    /// epoch stop without reporting or rescheduling
    reconnect_epoch: u64,
    /// Automatic reconnection gave up; cleared by the next live session
    exhausted: bool,
}

pub(crate) struct ClientInner {
    transport: Arc<dyn StreamTransport>,
    pub(crate) config: ClientConfig,
    events: EventBus,
    registry: RwLock<SubscriptionRegistry>,
    state: watch::Sender<ConnectionState>,
    machine: Mutex<Machine>,
    /// Serializes registry mutation together with the send that publishes it
    propagation: tokio::sync::Mutex<()>,
    next_subscription_id: AtomicU64,
    next_session_id: AtomicU64,
}

impl ClientInner {
    pub(crate) fn new(transport: Arc<dyn StreamTransport>, config: ClientConfig) -> Self {
        Self {
            transport,
            config,
            events: EventBus::new(EVENT_CHANNEL_CAPACITY),
            registry: RwLock::new(SubscriptionRegistry::new()),
            state: watch::channel(ConnectionState::Idle).0,
            machine: Mutex::new(Machine::default()),
            propagation: tokio::sync::Mutex::new(()),
            next_subscription_id: AtomicU64::new(0),
            next_session_id: AtomicU64::new(0),
        }
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub(crate) fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub(crate) fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub(crate) fn events(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    pub(crate) fn registry(&self) -> &RwLock<SubscriptionRegistry> {
        &self.registry
    }

    pub(crate) fn reconnect_attempts(&self) -> u32 {
        self.machine.lock().reconnect_attempts
    }

    fn set_state(&self, state: ConnectionState) {
        let mut previous = state;
        let changed = self.state.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            previous = *current;
            *current = state;
            true
        });
        if changed {
            debug!(from = %previous, to = %state, "Connection state changed");
        }
    }

    fn is_current(&self, session: &Arc<Session>) -> bool {
        self.machine
            .lock()
            .session
            .as_ref()
            .is_some_and(|current| Arc::ptr_eq(current, session))
    }

    /// The live session, or why there is none
    fn established_session(&self) -> Result<Arc<Session>> {
        let machine = self.machine.lock();
        match &machine.session {
            Some(session) if session.is_established() => Ok(Arc::clone(session)),
            _ if machine.exhausted => Err(ClientError::ReconnectExhausted {
                attempts: machine.reconnect_attempts,
            }),
            _ => Err(ClientError::NotConnected),
        }
    }

    // =========================================================================
    // Connect
    // =========================================================================

    pub(crate) async fn connect(self: &Arc<Self>) -> Result<()> {
        if self.state() == ConnectionState::Connected {
            return Ok(());
        }

        let disconnecting = self.machine.lock().disconnecting.clone();
        if let Some(disconnecting) = disconnecting {
            let _ = disconnecting.await;
        }

        self.events.emit(ClientEvent::ConnectRequested);
        self.start_connect(None).await
    }

    /// Join the in-flight connect or start a new one
    ///
    /// A reconnect passes the epoch it was scheduled in and gets
    /// [`ClientError::Aborted`] if an explicit disconnect happened since.
    async fn start_connect(self: &Arc<Self>, reconnect_epoch: Option<u64>) -> Result<()> {
        let is_reconnect = reconnect_epoch.is_some();
        let pending = {
            let mut machine = self.machine.lock();
            if let Some(epoch) = reconnect_epoch {
                if epoch != machine.reconnect_epoch {
                    return Err(ClientError::Aborted);
                }
                machine.reconnect_timer = None;
            }

            if let Some(connecting) = &machine.connecting {
                connecting.clone()
            } else if machine
                .session
                .as_ref()
                .is_some_and(|session| session.is_established())
            {
                return Ok(());
            } else {
                if !is_reconnect {
                    if let Some(timer) = machine.reconnect_timer.take() {
                        debug!("Pending reconnect superseded by connect");
                        timer.abort();
                    }
                }

                let inner = Arc::clone(self);
                let connecting = spawn_shared(async move {
                    let outcome = inner.establish(is_reconnect).await;
                    inner.machine.lock().connecting = None;
                    outcome
                });
                machine.connecting = Some(connecting.clone());
                connecting
            }
        };
        pending.await
    }

    /// Open a stream and wait for proof that it is live
    async fn establish(self: &Arc<Self>, is_reconnect: bool) -> Result<()> {
        self.set_state(ConnectionState::Connecting);
        let deadline = Instant::now() + self.config.timeouts.connect();

        let opened = match tokio::time::timeout_at(deadline, self.transport.open()).await {
            Ok(Ok(opened)) => opened,
            Ok(Err(error)) => {
                warn!(%error, is_reconnect, "Failed to open stream");
                self.connect_failed(is_reconnect);
                return Err(error.into());
            }
            Err(_) => {
                warn!(is_reconnect, "Timed out opening stream");
                self.connect_failed(is_reconnect);
                return Err(ClientError::ConnectTimeout);
            }
        };

        let session_id = self.next_session_id.fetch_add(1, Ordering::SeqCst) + 1;
        let (session, first_signal) =
            Session::new(session_id, opened.handle, self.config.ping_id_wrap);
        self.machine.lock().session = Some(Arc::clone(&session));
        debug!(session_id, "Stream opened, waiting for first message");

        session.track(tokio::spawn(
            Arc::clone(self).read_signals(Arc::clone(&session), opened.signals),
        ));
        session.track(self.spawn_probe(&session));

        let outcome = match tokio::time::timeout_at(deadline, first_signal).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(ClientError::StreamClosedUnexpectedly),
            Err(_) => Err(ClientError::ConnectTimeout),
        };
        let outcome = outcome.and_then(|()| {
            if self.promote(&session) {
                Ok(())
            } else {
                Err(ClientError::StreamClosedUnexpectedly)
            }
        });

        match outcome {
            Ok(()) => {
                self.handle_open(&session, is_reconnect);
                Ok(())
            }
            Err(error) => {
                warn!(session_id, %error, is_reconnect, "Connect failed");
                self.abandon(&session);
                self.connect_failed(is_reconnect);
                Err(error)
            }
        }
    }

    /// Mark `session` live if it is still the current one
    fn promote(&self, session: &Arc<Session>) -> bool {
        let machine = self.machine.lock();
        let current = machine
            .session
            .as_ref()
            .is_some_and(|current| Arc::ptr_eq(current, session));
        if current {
            session.mark_established();
        }
        current
    }

    /// Drop a session that never became live
    fn abandon(&self, session: &Arc<Session>) {
        {
            let mut machine = self.machine.lock();
            if machine
                .session
                .as_ref()
                .is_some_and(|current| Arc::ptr_eq(current, session))
            {
                machine.session = None;
            }
        }
        session.stream.destroy();
        session.shutdown();
    }

    /// A failed initial connect settles idle; a failed reconnect is
    /// rescheduled by its caller
    fn connect_failed(&self, is_reconnect: bool) {
        if !is_reconnect {
            self.set_state(ConnectionState::Idle);
        }
    }

    /// Initial ping: provokes the first inbound message
    fn spawn_probe(self: &Arc<Self>, session: &Arc<Session>) -> JoinHandle<()> {
        let inner = Arc::clone(self);
        let session = Arc::clone(session);
        tokio::spawn(async move {
            match inner.ping(&session).await {
                Ok(()) | Err(ClientError::Aborted) => {}
                Err(error) => {
                    debug!(session_id = session.id, %error, "Probe ping failed");
                    if !session.settle(Err(error.clone())) {
                        inner.destroy_session(&session, error);
                    }
                }
            }
        })
    }

    fn handle_open(self: &Arc<Self>, session: &Arc<Session>, is_reconnect: bool) {
        self.machine.lock().exhausted = false;
        self.set_state(ConnectionState::Connected);
        info!(session_id = session.id, is_reconnect, "Stream connected");

        if self.config.heartbeat.enabled {
            session.track(heartbeat::spawn(Arc::clone(self), Arc::clone(session)));
        }
        self.events.emit(ClientEvent::Connected);

        let reconnect = &self.config.reconnect;
        let subscriptions = self.registry.read().snapshot();

        // A non-empty registry here means the subscriptions were carried over
        // from a lost session: subscribing requires a live one.
        if reconnect.resubscribe && !subscriptions.is_empty() {
            info!(
                session_id = session.id,
                subscriptions = subscriptions.len(),
                "Restoring subscriptions"
            );
            self.events.emit(ClientEvent::Resubscribing {
                subscriptions: Arc::clone(&subscriptions),
            });
            let inner = Arc::clone(self);
            let target = Arc::clone(session);
            session.track(tokio::spawn(async move {
                inner.resubscribe(target, subscriptions).await
            }));
        } else if reconnect.reset_attempts_after_connected {
            self.machine.lock().reconnect_attempts = 0;
        }
    }

    async fn resubscribe(self: Arc<Self>, session: Arc<Session>, subscriptions: SubscriptionSnapshot) {
        let outcome = {
            let _propagation = self.propagation.lock().await;
            self.send_update(&session).await
        };

        match outcome {
            Ok(()) => {
                if self.config.reconnect.reset_attempts_after_connected {
                    self.machine.lock().reconnect_attempts = 0;
                }
                info!(session_id = session.id, "Subscriptions restored");
                self.events.emit(ClientEvent::Resubscribed { subscriptions });
            }
            Err(ClientError::Aborted) => {}
            Err(error) => {
                if !self.config.reconnect.resubscribe_failure_counts_as_attempt {
                    self.machine.lock().reconnect_attempts = 0;
                }
                self.destroy_session(&session, ClientError::ResubscribeFailed(Box::new(error)));
            }
        }
    }

    // =========================================================================
    // Inbound
    // =========================================================================

    async fn read_signals(
        self: Arc<Self>,
        session: Arc<Session>,
        mut signals: mpsc::UnboundedReceiver<StreamSignal>,
    ) {
        loop {
            let signal = tokio::select! {
                _ = session.cancel.cancelled() => break,
                signal = signals.recv() => signal,
            };

            match signal {
                Some(StreamSignal::Data(update)) => self.handle_data(&session, update),
                Some(StreamSignal::Error(error)) => self.handle_error(&session, error),
                Some(StreamSignal::End) => self.handle_end(&session),
                Some(StreamSignal::Close) | None => {
                    self.handle_stream_closed(&session);
                    break;
                }
            }
        }
        trace!(session_id = session.id, "Reader stopped");
    }

    fn handle_data(self: &Arc<Self>, session: &Arc<Session>, update: SubscribeUpdate) {
        session.record_inbound();
        session.settle(Ok(()));

        match &update.update {
            UpdateOneof::Pong(pong) => {
                let expected = session.last_ping_id();
                if pong.id == expected {
                    debug!(session_id = session.id, ping_id = pong.id, "Pong received");
                } else {
                    debug!(
                        session_id = session.id,
                        ping_id = pong.id,
                        expected,
                        "Pong does not match the last ping"
                    );
                }
                self.events.emit(ClientEvent::PongReceived { id: pong.id });
            }
            UpdateOneof::Ping(_) => self.reply_to_peer_ping(session),
            _ => self.route(update),
        }
    }

    /// Answer a server ping by re-sending the subscription set
    fn reply_to_peer_ping(self: &Arc<Self>, session: &Arc<Session>) {
        debug!(session_id = session.id, "Server ping");
        let inner = Arc::clone(self);
        let target = Arc::clone(session);
        session.track(tokio::spawn(async move {
            let outcome = {
                let _propagation = inner.propagation.lock().await;
                if !target.is_established() {
                    return;
                }
                inner.send_update(&target).await
            };
            match outcome {
                Ok(()) | Err(ClientError::Aborted) => {}
                Err(error) => inner
                    .destroy_session(&target, ClientError::PeerPingReplyFailed(Box::new(error))),
            }
        }));
    }

    /// One `Data` event per registered filter and one `UnhandledMessage` per
    /// unknown filter, in filter order. An update without filters is unhandled.
    fn route(&self, update: SubscribeUpdate) {
        let received_at = Utc::now();
        let matches: Vec<(String, bool)> = {
            let registry = self.registry.read();
            update
                .filters
                .iter()
                .map(|filter| (filter.clone(), registry.has(filter)))
                .collect()
        };

        let update = Arc::new(update);
        if matches.is_empty() {
            trace!("Unhandled message without filters");
            self.events
                .emit(ClientEvent::UnhandledMessage { update });
            return;
        }

        for (subscription_id, registered) in matches {
            if registered {
                trace!(%subscription_id, method = ?update.method(), "Routing update");
                self.events.emit(ClientEvent::Data {
                    subscription_id,
                    update: Arc::clone(&update),
                    received_at,
                });
            } else {
                trace!(filter = %subscription_id, "Unhandled message");
                self.events.emit(ClientEvent::UnhandledMessage {
                    update: Arc::clone(&update),
                });
            }
        }
    }

    fn handle_error(self: &Arc<Self>, session: &Arc<Session>, error: TransportError) {
        if error.is_client_cancellation() {
            debug!(session_id = session.id, "Stream cancelled by client");
            return;
        }
        if session.settle(Err(error.clone().into())) || !self.is_current(session) {
            return;
        }

        warn!(session_id = session.id, %error, "Stream error");
        self.events.emit(ClientEvent::Error(error.into()));
        if self.config.disconnect_on_errors {
            self.teardown(session);
        }
    }

    fn handle_end(self: &Arc<Self>, session: &Arc<Session>) {
        if session.settle(Err(ClientError::StreamEndedUnexpectedly)) {
            return;
        }
        debug!(session_id = session.id, "Stream ended by peer");
        self.teardown(session);
    }

    fn handle_stream_closed(self: &Arc<Self>, session: &Arc<Session>) {
        if session.settle(Err(ClientError::StreamClosedUnexpectedly)) {
            return;
        }
        self.handle_close(session);
    }

    // =========================================================================
    // Teardown and reconnect
    // =========================================================================

    /// Report `reason` and tear `session` down if it is still current
    pub(crate) fn destroy_session(self: &Arc<Self>, session: &Arc<Session>, reason: ClientError) {
        if !self.is_current(session) {
            debug!(session_id = session.id, error = %reason, "Ignoring error for stale session");
            return;
        }
        warn!(session_id = session.id, error = %reason, "Destroying session");
        self.events.emit(ClientEvent::Error(reason));
        self.teardown(session);
    }

    fn teardown(self: &Arc<Self>, session: &Arc<Session>) {
        session.stream.destroy();
        self.handle_close(session);
    }

    /// The current session is gone: settle idle or schedule a reconnect
    fn handle_close(self: &Arc<Self>, session: &Arc<Session>) {
        let established = {
            let mut machine = self.machine.lock();
            if !machine
                .session
                .as_ref()
                .is_some_and(|current| Arc::ptr_eq(current, session))
            {
                return;
            }
            machine.session = None;
            session.is_established()
        };

        if !established {
            debug!(session_id = session.id, "Stream closed before it became live");
            session.shutdown();
            return;
        }

        let explicit = session.is_explicit();
        let subscriptions = self.registry.read().snapshot();
        info!(
            session_id = session.id,
            explicit,
            subscriptions = subscriptions.len(),
            "Stream disconnected"
        );
        self.events.emit(ClientEvent::Disconnected {
            explicit,
            subscriptions,
        });

        if explicit {
            self.registry.write().clear();
            self.set_state(ConnectionState::Idle);
        } else {
            self.schedule_reconnect(None);
        }
        session.shutdown();
    }

    /// `expected_epoch` is set when rescheduling from a reconnect task
    fn schedule_reconnect(self: &Arc<Self>, expected_epoch: Option<u64>) {
        let reconnect = &self.config.reconnect;
        if !reconnect.enabled {
            info!("Reconnect disabled, staying disconnected");
            self.set_state(ConnectionState::Idle);
            return;
        }

        let mut machine = self.machine.lock();
        if expected_epoch.is_some_and(|epoch| epoch != machine.reconnect_epoch) {
            debug!("Reconnect cancelled, not rescheduling");
            return;
        }
        if machine.reconnect_attempts >= reconnect.max_attempts {
            let attempts = machine.reconnect_attempts;
            machine.exhausted = true;
            drop(machine);

            warn!(attempts, "Reconnect attempts exhausted");
            self.set_state(ConnectionState::Idle);
            self.events
                .emit(ClientEvent::ReconnectExhausted { attempts });
            return;
        }

        machine.reconnect_attempts += 1;
        let attempt = machine.reconnect_attempts;
        let remaining = reconnect.max_attempts - attempt;
        self.set_state(ConnectionState::ReconnectWaiting);
        info!(attempt, remaining, delay_ms = reconnect.delay_ms, "Reconnect scheduled");
        self.events
            .emit(ClientEvent::Reconnecting { attempt, remaining });

        let inner = Arc::clone(self);
        let delay = reconnect.delay();
        let epoch = machine.reconnect_epoch;
        machine.reconnect_timer = Some(tokio::spawn(inner.run_reconnect(delay, epoch)));
    }

    async fn run_reconnect(self: Arc<Self>, delay: Duration, epoch: u64) {
        tokio::time::sleep(delay).await;

        match self.start_connect(Some(epoch)).await {
            Ok(()) => {}
            Err(ClientError::Aborted) => debug!("Reconnect cancelled before it started"),
            Err(error) => {
                if self.machine.lock().reconnect_epoch != epoch {
                    debug!(%error, "Reconnect attempt failed after disconnect");
                    return;
                }
                warn!(%error, "Reconnect attempt failed");
                self.events.emit(ClientEvent::ReconnectFailed { error });
                self.schedule_reconnect(Some(epoch));
            }
        }
    }

    // =========================================================================
    // Disconnect
    // =========================================================================

    pub(crate) async fn disconnect(self: &Arc<Self>, explicit: bool) -> Result<()> {
        let pending = loop {
            // Any attempt in flight settles first, so a session it produces
            // is closed here rather than left running
            let connecting = {
                let mut machine = self.machine.lock();
                if let Some(connecting) = machine.connecting.clone() {
                    connecting
                } else if let Some(disconnecting) = &machine.disconnecting {
                    break disconnecting.clone();
                } else {
                    let live = machine
                        .session
                        .clone()
                        .filter(|session| session.is_established());
                    let Some(session) = live else {
                        let timer = if explicit {
                            machine.exhausted = false;
                            machine.reconnect_epoch += 1;
                            machine.reconnect_timer.take()
                        } else {
                            None
                        };
                        drop(machine);

                        if explicit {
                            if let Some(timer) = timer {
                                timer.abort();
                                info!("Pending reconnect cancelled");
                            }
                            self.registry.write().clear();
                            self.set_state(ConnectionState::Idle);
                        }
                        return Ok(());
                    };

                    session.mark_explicit(explicit);
                    let inner = Arc::clone(self);
                    let disconnecting = spawn_shared(async move {
                        let outcome = inner.close_session(&session).await;
                        inner.machine.lock().disconnecting = None;
                        outcome
                    });
                    machine.disconnecting = Some(disconnecting.clone());
                    break disconnecting;
                }
            };
            let _ = connecting.await;
        };
        pending.await
    }

    async fn close_session(self: &Arc<Self>, session: &Arc<Session>) -> Result<()> {
        self.set_state(ConnectionState::Disconnecting);
        info!(
            session_id = session.id,
            explicit = session.is_explicit(),
            "Disconnecting"
        );
        session.stream.cancel();

        let closed = tokio::time::timeout(
            self.config.timeouts.disconnect(),
            session.cancel.cancelled(),
        )
        .await;
        if closed.is_err() {
            self.destroy_session(session, ClientError::DisconnectTimeout);
        }
        Ok(())
    }

    // =========================================================================
    // Subscriptions
    // =========================================================================

    pub(crate) async fn subscribe(
        &self,
        method: Method,
        params: serde_json::Value,
        id: Option<String>,
    ) -> Result<String> {
        let _propagation = self.propagation.lock().await;

        let id = {
            let mut registry = self.registry.write();
            let id = match id {
                Some(id) => id,
                None => self.next_auto_id(&registry),
            };
            registry.add(id.clone(), Subscription::new(method, params))?;
            id
        };

        let outcome = match self.established_session() {
            Ok(session) => self.send_update(&session).await,
            Err(error) => Err(error),
        };

        match outcome {
            Ok(()) => {
                info!(subscription_id = %id, %method, "Subscribed");
                Ok(id)
            }
            Err(error) => {
                self.registry.write().remove(&id);
                debug!(subscription_id = %id, %error, "Subscribe rolled back");
                Err(error)
            }
        }
    }

    pub(crate) async fn unsubscribe(self: &Arc<Self>, id: &str) -> Result<()> {
        let _propagation = self.propagation.lock().await;

        if self.registry.write().remove(id).is_none() {
            debug!(subscription_id = id, "Unsubscribe of unknown id");
            return Ok(());
        }
        info!(subscription_id = id, "Unsubscribed");

        let Ok(session) = self.established_session() else {
            return Ok(());
        };
        match self.send_update(&session).await {
            Ok(()) | Err(ClientError::Aborted) => {}
            Err(error) => {
                self.destroy_session(&session, ClientError::UnsubscribeFailed(Box::new(error)))
            }
        }
        Ok(())
    }

    /// Decimal counter; skips ids the caller registered explicitly
    fn next_auto_id(&self, registry: &SubscriptionRegistry) -> String {
        loop {
            let id = (self.next_subscription_id.fetch_add(1, Ordering::SeqCst) + 1).to_string();
            if !registry.has(&id) {
                return id;
            }
        }
    }

    // =========================================================================
    // Outbound
    // =========================================================================

    /// Publish the full subscription set on `session`
    async fn send_update(&self, session: &Session) -> Result<()> {
        let request = self.registry.read().build_request();
        let options = session.send_options(self.config.timeouts.request());
        send::send(&*session.stream, request.clone(), &options).await?;

        debug!(
            session_id = session.id,
            subscriptions = request.subscription_count(),
            "Subscription set sent"
        );
        self.events.emit(ClientEvent::Updated {
            request: Arc::new(request),
        });
        Ok(())
    }

    pub(crate) async fn ping(&self, session: &Session) -> Result<()> {
        let id = session.next_ping_id();
        debug!(session_id = session.id, ping_id = id, "Sending ping");
        self.events.emit(ClientEvent::PingSent { id });

        let options = session.send_options(self.config.timeouts.request());
        send::ping(&*session.stream, id, &options).await
    }
}
