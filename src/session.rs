/// Connection lifecycle for the Reya WebSocket feed.
///
/// Features:
/// - Explicit [`ConnectionState`] machine with a pure transition function
/// - Subscription replay, in original order, every time a connection opens
/// - JSON heartbeat with pong deadline enforcement
/// - Bounded reconnect policy reported through [`SessionHandler::on_error`]
///
/// A [`ConnectionSession`] is driven by awaiting [`ConnectionSession::connect`], which
/// only returns once the session is Disconnected for good. Everything else goes through
/// a cloneable [`SessionHandle`] whose methods never block.
use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use tokio::sync::{mpsc, watch};
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::channel::{Channel, ParameterizedChannel, PathParams};
use crate::config::WebSocketConfig;
use crate::dispatcher::{MessageDispatcher, PongHook};
use crate::errors::ReyaError;
use crate::models::{InboundMessage, MessageKind, OutboundMessage};
use crate::registry::SubscriptionRegistry;
use crate::resources::{ChannelSubscription, MarketResource, PricesResource, WalletResource};
use crate::transport::{Connector, Transport, TransportEvent, WsConnector};

// ---------------------------------------------------------------------------
// State machine
// ---------------------------------------------------------------------------

/// Socket lifecycle as seen by the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Open,
    Closing,
}

/// Inputs to the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// `connect()` was called.
    Connect,
    /// A transport reached the open state.
    TransportOpened,
    /// The transport closed, errored or failed to open.
    TransportDropped,
    /// No pong arrived within `ping_timeout` of a ping.
    HeartbeatExpired,
    /// `close()` was called.
    CloseRequested,
    /// The transport is gone after a close.
    CloseCompleted,
    /// The reconnect budget is spent.
    RetriesExhausted,
}

impl ConnectionState {
    /// The state reached from `self` on `event`. Events that do not apply are ignored.
    pub fn on_event(self, event: SessionEvent) -> Self {
        use ConnectionState::*;
        use SessionEvent::*;

        match (self, event) {
            (Disconnected, Connect) => Connecting,
            (Connecting, TransportOpened) => Open,
            (Open, TransportDropped) | (Open, HeartbeatExpired) => Connecting,
            (Connecting, TransportDropped) => Connecting,
            (Connecting | Open | Closing, CloseRequested) => Closing,
            (Closing, CloseCompleted) => Disconnected,
            (Connecting | Open, RetriesExhausted) => Disconnected,
            (state, _) => state,
        }
    }

    pub fn is_open(self) -> bool {
        self == ConnectionState::Open
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
            ConnectionState::Closing => "closing",
        };
        f.write_str(name)
    }
}

/// Why a session reached its terminal Disconnected state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// `close()` was called.
    Requested,
    /// `attempts` consecutive connection attempts failed.
    Exhausted { attempts: u32 },
}

// ---------------------------------------------------------------------------
// Callbacks
// ---------------------------------------------------------------------------

/// Application callbacks.
///
/// All callbacks run on the task awaiting [`ConnectionSession::connect`]. A slow
/// callback delays every frame behind it; hand long work off to another task.
pub trait SessionHandler: Send {
    /// A connection reached Open. Registry replay frames are already queued.
    fn on_open(&mut self, _session: &SessionHandle) {}

    /// Every classified inbound message, in arrival order.
    fn on_message(&mut self, session: &SessionHandle, message: InboundMessage);

    /// Bad frames, connection drops and retry exhaustion.
    fn on_error(&mut self, _session: &SessionHandle, _error: &ReyaError) {}

    /// The session is Disconnected and `connect()` is about to return.
    fn on_close(&mut self, _session: &SessionHandle, _reason: CloseReason) {}
}

impl<F> SessionHandler for F
where
    F: FnMut(&SessionHandle, InboundMessage) + Send,
{
    fn on_message(&mut self, session: &SessionHandle, message: InboundMessage) {
        self(session, message)
    }
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

struct SessionInner {
    state: ConnectionState,
    registry: SubscriptionRegistry,
    outbound: Option<mpsc::UnboundedSender<String>>,
    running: bool,
}

impl SessionInner {
    fn apply(&mut self, event: SessionEvent) -> ConnectionState {
        let next = self.state.on_event(event);
        if next != self.state {
            debug!("session.transition from={} to={} event={:?}", self.state, next, event);
            self.state = next;
        }
        next
    }

    /// Queue `frame` on the live connection, if there is one.
    fn transmit(&self, frame: String) -> Result<(), ReyaError> {
        match (&self.outbound, self.state) {
            (Some(tx), ConnectionState::Open) => tx
                .send(frame)
                .map_err(|_| ReyaError::NotConnected(self.state)),
            (_, state) => Err(ReyaError::NotConnected(state)),
        }
    }
}

struct Shared {
    inner: Mutex<SessionInner>,
    shutdown: watch::Sender<bool>,
    confirmed: Arc<AtomicUsize>,
}

/// Cheap, cloneable access to a session's state, registry and outbound queue.
///
/// Handles are passed to every callback and back the resource facade. A handle created
/// with [`SessionHandle::new`] is detached: it records subscriptions but never sends.
#[derive(Clone)]
pub struct SessionHandle {
    shared: Arc<Shared>,
}

impl SessionHandle {
    pub fn new() -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(SessionInner {
                    state: ConnectionState::Disconnected,
                    registry: SubscriptionRegistry::new(),
                    outbound: None,
                    running: false,
                }),
                shutdown,
                confirmed: Arc::new(AtomicUsize::new(0)),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionInner> {
        self.shared
            .inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> ConnectionState {
        self.lock().state
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_open()
    }

    /// Record `channel` and, if Open, send its subscribe frame.
    ///
    /// Returns false if the path was already subscribed; nothing is sent in that case.
    /// While not Open the frame is deferred to the next Open transition.
    pub fn subscribe(&self, channel: Channel) -> bool {
        let frame = OutboundMessage::subscribe(&channel).to_frame();
        let path = channel.path().to_string();

        let mut inner = self.lock();
        if !inner.registry.add(channel) {
            debug!("session.subscribe_duplicate channel={}", path);
            return false;
        }
        match inner.transmit(frame) {
            Ok(()) => info!("session.subscribe channel={}", path),
            Err(_) => info!("session.subscribe_deferred channel={} state={}", path, inner.state),
        }
        true
    }

    /// Forget `path` and, if Open, send its unsubscribe frame.
    ///
    /// Returns false, sending nothing, if `path` was not subscribed.
    pub fn unsubscribe(&self, path: &str) -> bool {
        let mut inner = self.lock();
        if !inner.registry.remove(path) {
            debug!("session.unsubscribe_absent channel={}", path);
            return false;
        }
        info!("session.unsubscribe channel={}", path);
        let _ = inner.transmit(OutboundMessage::unsubscribe(path).to_frame());
        true
    }

    /// Queue a raw text frame. Fails with [`ReyaError::NotConnected`] unless Open.
    pub fn send(&self, frame: impl Into<String>) -> Result<(), ReyaError> {
        self.lock().transmit(frame.into())
    }

    pub fn send_message(&self, message: &OutboundMessage) -> Result<(), ReyaError> {
        self.send(message.to_frame())
    }

    /// Stop the session without reconnecting and clear the registry.
    ///
    /// Safe from any state and from inside callbacks. Once Disconnected (never started,
    /// or retries exhausted) only the registry is cleared.
    pub fn close(&self) {
        let mut inner = self.lock();
        match inner.state {
            ConnectionState::Disconnected | ConnectionState::Closing => {
                debug!(
                    "session.close_idle state={} dropped={}",
                    inner.state,
                    inner.registry.size()
                );
                inner.registry.clear();
                return;
            }
            _ => {}
        }
        info!("session.close state={}", inner.state);
        inner.apply(SessionEvent::CloseRequested);
        inner.outbound = None;
        inner.registry.clear();
        drop(inner);
        self.shared.shutdown.send_replace(true);
    }

    /// Snapshot of the registry in subscribe order.
    pub fn subscriptions(&self) -> Vec<Channel> {
        self.lock().registry.all()
    }

    pub fn subscription_count(&self) -> usize {
        self.lock().registry.size()
    }

    /// Channels the server has confirmed on the current connection.
    pub fn active_subscriptions(&self) -> usize {
        self.shared.confirmed.load(Ordering::SeqCst)
    }

    pub fn market(&self) -> MarketResource {
        MarketResource::new(self.clone())
    }

    pub fn wallet(&self) -> WalletResource {
        WalletResource::new(self.clone())
    }

    pub fn prices(&self) -> PricesResource {
        PricesResource::new(self.clone())
    }

    /// A subscription handle for an arbitrary channel template.
    pub fn channel<P: PathParams>(
        &self,
        template: ParameterizedChannel<P>,
        params: P,
    ) -> ChannelSubscription<P> {
        ChannelSubscription::new(self.clone(), template, params)
    }

    // -- driven by ConnectionSession -------------------------------------------

    fn begin(&self) -> Result<(), ReyaError> {
        let mut inner = self.lock();
        if inner.running {
            return Err(ReyaError::InvalidState(format!(
                "session is already running ({})",
                inner.state
            )));
        }
        inner.running = true;
        inner.apply(SessionEvent::Connect);
        self.shared.shutdown.send_replace(false);
        Ok(())
    }

    /// Open the session on a fresh transport and queue the replay.
    ///
    /// Installing the sender, the Open transition and the registry snapshot happen under
    /// one lock, so a concurrent `subscribe` lands either in the replay or after it.
    fn attach(&self, tx: mpsc::UnboundedSender<String>, probe: bool) -> Option<usize> {
        let mut inner = self.lock();
        if inner.state != ConnectionState::Connecting {
            return None;
        }
        inner.apply(SessionEvent::TransportOpened);

        let channels = inner.registry.all();
        for channel in &channels {
            let _ = tx.send(OutboundMessage::subscribe(channel).to_frame());
        }
        if probe {
            let _ = tx.send(OutboundMessage::Ping.to_frame());
        }
        inner.outbound = Some(tx);
        Some(channels.len())
    }

    fn detach(&self, event: SessionEvent) {
        let mut inner = self.lock();
        inner.outbound = None;
        inner.apply(event);
    }

    fn apply(&self, event: SessionEvent) -> ConnectionState {
        self.lock().apply(event)
    }

    fn finish(&self) {
        let mut inner = self.lock();
        inner.outbound = None;
        inner.apply(SessionEvent::CloseCompleted);
        inner.running = false;
    }
}

impl Default for SessionHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.lock();
        f.debug_struct("SessionHandle")
            .field("state", &inner.state)
            .field("subscriptions", &inner.registry.size())
            .field("running", &inner.running)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

enum Drive {
    Closed,
    Dropped(ReyaError),
}

/// Resolves once `close()` has been requested.
///
/// The `watch::Ref` returned by `wait_for` holds a read guard that is not `Send`; it must be
/// released here so `connect()` stays spawnable.
async fn closed(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|closed| *closed).await;
}

/// A WebSocket session with reconnect, replay and heartbeat.
///
/// Dereferences to its [`SessionHandle`], so subscriptions can be made before
/// `connect()` is awaited.
pub struct ConnectionSession<C = WsConnector> {
    config: WebSocketConfig,
    connector: C,
    handle: SessionHandle,
    pong_hook: Option<PongHook>,
}

impl ConnectionSession<WsConnector> {
    pub fn new(config: WebSocketConfig) -> Self {
        Self::with_connector(config, WsConnector)
    }

    /// A session configured from `REYA_WS_*` environment variables.
    pub fn from_env() -> Result<Self, ReyaError> {
        Ok(Self::new(WebSocketConfig::from_env()?))
    }
}

impl<C: Connector> ConnectionSession<C> {
    pub fn with_connector(config: WebSocketConfig, connector: C) -> Self {
        Self {
            config,
            connector,
            handle: SessionHandle::new(),
            pong_hook: None,
        }
    }

    /// Answer server pings with `hook` instead of the default `pong` frame.
    pub fn with_pong_hook(mut self, hook: PongHook) -> Self {
        self.pong_hook = Some(hook);
        self
    }

    pub fn config(&self) -> &WebSocketConfig {
        &self.config
    }

    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    /// Run the session until it is closed or the reconnect budget is spent.
    ///
    /// Returns `Ok(())` after [`SessionHandle::close`] and
    /// [`ReyaError::ConnectionExhausted`] after `reconnect_attempts` consecutive failed
    /// attempts. Drops in between are reported to `on_error` and retried after
    /// `reconnect_delay`.
    pub async fn connect<H: SessionHandler>(&self, mut handler: H) -> Result<(), ReyaError> {
        self.config.validate()?;
        self.handle.begin()?;

        let mut shutdown = self.handle.shared.shutdown.subscribe();
        let mut dispatcher = MessageDispatcher::with_gauge(self.handle.shared.confirmed.clone());
        if let Some(hook) = &self.pong_hook {
            dispatcher = dispatcher.with_pong_hook(hook.clone());
        }

        info!("session.connect url={}", self.config.url);
        let reason = self.run(&mut handler, &mut dispatcher, &mut shutdown).await;

        dispatcher.reset();
        self.handle.finish();
        info!("session.closed url={} reason={:?}", self.config.url, reason);
        handler.on_close(&self.handle, reason);

        match reason {
            CloseReason::Requested => Ok(()),
            CloseReason::Exhausted { attempts } => Err(ReyaError::ConnectionExhausted { attempts }),
        }
    }

    async fn run<H: SessionHandler>(
        &self,
        handler: &mut H,
        dispatcher: &mut MessageDispatcher,
        shutdown: &mut watch::Receiver<bool>,
    ) -> CloseReason {
        let budget = self.config.reconnect_attempts.max(1);
        let mut failures: u32 = 0;

        loop {
            debug!("session.attempt url={} failures={}", self.config.url, failures);
            let attempt = tokio::select! {
                biased;
                _ = closed(shutdown) => return CloseReason::Requested,
                result = time::timeout(
                    self.config.connection_timeout,
                    self.connector.connect(&self.config),
                ) => result,
            };

            let err = match attempt {
                Ok(Ok(transport)) => {
                    failures = 0;
                    match self.drive(transport, handler, dispatcher, shutdown).await {
                        Drive::Closed => return CloseReason::Requested,
                        Drive::Dropped(err) => err,
                    }
                }
                Ok(Err(err)) => {
                    failures += 1;
                    self.handle.apply(SessionEvent::TransportDropped);
                    err
                }
                Err(_) => {
                    failures += 1;
                    self.handle.apply(SessionEvent::TransportDropped);
                    ReyaError::ConnectionTimeout(self.config.connection_timeout)
                }
            };

            if *shutdown.borrow() {
                return CloseReason::Requested;
            }
            warn!(
                "session.drop url={} error={} failures={}",
                self.config.url, err, failures
            );
            handler.on_error(&self.handle, &err);

            if failures >= budget {
                error!(
                    "session.exhausted url={} attempts={}",
                    self.config.url, failures
                );
                self.handle.apply(SessionEvent::RetriesExhausted);
                handler.on_error(
                    &self.handle,
                    &ReyaError::ConnectionExhausted { attempts: failures },
                );
                return CloseReason::Exhausted { attempts: failures };
            }

            tokio::select! {
                biased;
                _ = closed(shutdown) => return CloseReason::Requested,
                _ = time::sleep(self.config.reconnect_delay) => {}
            }
        }
    }

    /// Pump one open transport until it drops or the session is closed.
    async fn drive<H: SessionHandler>(
        &self,
        transport: Transport,
        handler: &mut H,
        dispatcher: &mut MessageDispatcher,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Drive {
        let Transport {
            mut sink,
            mut events,
        } = transport;
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();

        let Some(replayed) = self.handle.attach(tx, self.config.probe_on_open) else {
            let _ = sink.close().await;
            return Drive::Closed;
        };
        info!("session.open url={} replayed={}", self.config.url, replayed);
        dispatcher.reset();
        handler.on_open(&self.handle);

        let ping_interval = self.config.ping_interval;
        let ping_timeout = self.config.ping_timeout;
        let mut heartbeat = time::interval_at(Instant::now() + ping_interval, ping_interval);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut pong_deadline: Option<Instant> = None;

        let outcome = loop {
            let deadline = pong_deadline.unwrap_or_else(|| Instant::now() + ping_timeout);
            tokio::select! {
                biased;
                _ = closed(shutdown) => {
                    let _ = sink.close().await;
                    break Drive::Closed;
                }
                event = events.next() => match event {
                    Some(Ok(TransportEvent::Text(frame))) => {
                        debug!("session.recv bytes={}", frame.len());
                        if dispatcher.handle_frame(&frame, handler, &self.handle)
                            == Some(MessageKind::Pong)
                        {
                            pong_deadline = None;
                        }
                    }
                    Some(Ok(TransportEvent::Invalid(reason))) => {
                        let err = ReyaError::MalformedFrame(reason);
                        warn!("session.invalid_frame error={}", err);
                        handler.on_error(&self.handle, &err);
                    }
                    Some(Ok(TransportEvent::Pong)) => pong_deadline = None,
                    Some(Ok(TransportEvent::Closed(reason))) => {
                        break Drive::Dropped(ReyaError::WebSocketError(format!(
                            "closed by server: {}",
                            reason.as_deref().unwrap_or("no reason")
                        )));
                    }
                    Some(Err(err)) => break Drive::Dropped(err),
                    None => {
                        break Drive::Dropped(ReyaError::WebSocketError(
                            "connection ended".into(),
                        ));
                    }
                },
                Some(frame) = rx.recv() => {
                    debug!("session.send frame={}", frame);
                    if let Err(err) = sink.send(frame).await {
                        break Drive::Dropped(err);
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_deadline.is_none() {
                        debug!("session.ping url={}", self.config.url);
                        if let Err(err) = sink.send(OutboundMessage::Ping.to_frame()).await {
                            break Drive::Dropped(err);
                        }
                        pong_deadline = Some(Instant::now() + ping_timeout);
                    }
                }
                _ = time::sleep_until(deadline), if pong_deadline.is_some() => {
                    break Drive::Dropped(ReyaError::HeartbeatTimeout(ping_timeout));
                }
            }
        };

        if let Drive::Dropped(err) = &outcome {
            let event = match err {
                ReyaError::HeartbeatTimeout(_) => SessionEvent::HeartbeatExpired,
                _ => SessionEvent::TransportDropped,
            };
            self.handle.detach(event);
        }
        outcome
    }
}

impl<C> Deref for ConnectionSession<C> {
    type Target = SessionHandle;

    fn deref(&self) -> &SessionHandle {
        &self.handle
    }
}

impl<C> fmt::Debug for ConnectionSession<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionSession")
            .field("config", &self.config)
            .field("handle", &self.handle)
            .finish()
    }
}
