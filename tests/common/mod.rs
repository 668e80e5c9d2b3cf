//! Shared fixtures: an in-memory connector and a recording session handler.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use reya_sdk::{
    CloseReason, ConnectionState, Connector, InboundMessage, ReyaError, SessionHandle,
    SessionHandler, Transport, TransportEvent, WebSocketConfig,
};

/// Generous bound for waits; paused-time tests auto-advance past shorter session timers.
pub const WAIT: Duration = Duration::from_secs(120);

/// What the fake connector does on each successive attempt.
#[derive(Debug, Clone, Copy)]
pub enum Plan {
    Accept,
    Refuse,
    Hang,
}

/// The far end of one accepted fake connection.
pub struct FakeServer {
    pub sent: mpsc::UnboundedReceiver<String>,
    pub inbound: mpsc::UnboundedSender<Result<TransportEvent, ReyaError>>,
}

impl FakeServer {
    /// Next frame the client wrote, parsed as JSON.
    pub async fn next_frame(&mut self) -> Value {
        let frame = tokio::time::timeout(WAIT, self.sent.recv())
            .await
            .expect("timed out waiting for a client frame")
            .expect("client transport closed");
        serde_json::from_str(&frame).expect("client sent invalid JSON")
    }

    /// Every remaining frame until the client drops the transport.
    pub async fn drain(mut self) -> Vec<Value> {
        drop(self.inbound);
        let mut frames = Vec::new();
        while let Ok(Some(frame)) = tokio::time::timeout(WAIT, self.sent.recv()).await {
            frames.push(serde_json::from_str(&frame).expect("client sent invalid JSON"));
        }
        frames
    }

    pub fn push(&self, frame: Value) {
        self.inbound
            .send(Ok(TransportEvent::Text(frame.to_string())))
            .expect("client stopped reading");
    }

    pub fn push_raw(&self, frame: &str) {
        self.inbound
            .send(Ok(TransportEvent::Text(frame.to_string())))
            .expect("client stopped reading");
    }
}

/// A [`Connector`] that follows a scripted plan and hands accepted connections to the test.
#[derive(Clone)]
pub struct FakeConnector {
    plan: Arc<Mutex<VecDeque<Plan>>>,
    attempts: Arc<AtomicUsize>,
    servers: mpsc::UnboundedSender<FakeServer>,
}

impl FakeConnector {
    pub fn new(plan: Vec<Plan>) -> (Self, mpsc::UnboundedReceiver<FakeServer>) {
        let (servers, rx) = mpsc::unbounded_channel();
        let connector = Self {
            plan: Arc::new(Mutex::new(plan.into())),
            attempts: Arc::new(AtomicUsize::new(0)),
            servers,
        };
        (connector, rx)
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl Connector for FakeConnector {
    fn connect(
        &self,
        _config: &WebSocketConfig,
    ) -> impl Future<Output = Result<Transport, ReyaError>> + Send {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let step = self
            .plan
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Plan::Refuse);
        let servers = self.servers.clone();

        async move {
            match step {
                Plan::Refuse => Err(ReyaError::WebSocketError("connection refused".into())),
                Plan::Hang => futures_util::future::pending().await,
                Plan::Accept => {
                    let (sent_tx, sent_rx) = mpsc::unbounded_channel::<String>();
                    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
                    let sink = futures_util::sink::unfold(
                        sent_tx,
                        |tx: mpsc::UnboundedSender<String>, frame: String| async move {
                            tx.send(frame)
                                .map_err(|_| ReyaError::WebSocketError("peer gone".into()))?;
                            Ok::<_, ReyaError>(tx)
                        },
                    );
                    let events = UnboundedReceiverStream::new(inbound_rx);
                    let _ = servers.send(FakeServer {
                        sent: sent_rx,
                        inbound: inbound_tx,
                    });
                    Ok(Transport::new(sink, events))
                }
            }
        }
    }
}

pub async fn next_server(servers: &mut mpsc::UnboundedReceiver<FakeServer>) -> FakeServer {
    tokio::time::timeout(WAIT, servers.recv())
        .await
        .expect("timed out waiting for a connection")
        .expect("connector dropped")
}

/// Fast settings for in-memory sessions; heartbeat effectively off.
pub fn test_config() -> WebSocketConfig {
    WebSocketConfig {
        url: "ws://fake.test/".into(),
        connection_timeout: Duration::from_secs(1),
        ping_interval: Duration::from_secs(3600),
        ping_timeout: Duration::from_secs(10),
        reconnect_attempts: 3,
        reconnect_delay: Duration::from_millis(10),
        ssl_verify: true,
        enable_compression: false,
        probe_on_open: false,
    }
}

/// A callback invocation observed by [`Recorder`].
#[derive(Debug)]
pub enum Event {
    Open,
    Message(InboundMessage),
    Error {
        message: String,
        fatal: bool,
        state: ConnectionState,
    },
    Close(CloseReason),
}

/// Forwards every callback to a channel the test reads from.
pub struct Recorder {
    tx: mpsc::UnboundedSender<Event>,
}

impl Recorder {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl SessionHandler for Recorder {
    fn on_open(&mut self, _session: &SessionHandle) {
        let _ = self.tx.send(Event::Open);
    }

    fn on_message(&mut self, _session: &SessionHandle, message: InboundMessage) {
        let _ = self.tx.send(Event::Message(message));
    }

    fn on_error(&mut self, session: &SessionHandle, error: &ReyaError) {
        let _ = self.tx.send(Event::Error {
            message: error.to_string(),
            fatal: error.is_fatal(),
            state: session.state(),
        });
    }

    fn on_close(&mut self, _session: &SessionHandle, reason: CloseReason) {
        let _ = self.tx.send(Event::Close(reason));
    }
}

pub async fn next_event(events: &mut mpsc::UnboundedReceiver<Event>) -> Event {
    tokio::time::timeout(WAIT, events.recv())
        .await
        .expect("timed out waiting for a callback")
        .expect("handler dropped")
}
