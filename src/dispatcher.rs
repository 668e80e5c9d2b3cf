/// Inbound frame classification and routing.
///
/// Every text frame read by the session passes through [`MessageDispatcher::handle_frame`]:
/// it is parsed into an [`InboundMessage`], protocol obligations are met (a `ping` is
/// answered with a `pong` before any user callback runs), and the message is handed to
/// the single `on_message` callback. Bad frames are reported to `on_error` and never end
/// the session.
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use log::{debug, warn};
use serde_json::Value;

use crate::errors::ReyaError;
use crate::models::{InboundMessage, MessageKind, OutboundMessage, UnhandledMessage};
use crate::session::{SessionHandle, SessionHandler};

/// Replaces the default `pong` reply to a server `ping`.
pub type PongHook = Arc<dyn Fn(&SessionHandle) -> Result<(), ReyaError> + Send + Sync>;

/// Parses frames and routes them to a [`SessionHandler`].
///
/// Tracks the channels the server has confirmed on the current connection; the count is
/// published to a shared gauge read by [`SessionHandle::active_subscriptions`].
pub struct MessageDispatcher {
    confirmed: HashSet<String>,
    gauge: Arc<AtomicUsize>,
    pong_hook: Option<PongHook>,
}

impl MessageDispatcher {
    pub fn new() -> Self {
        Self::with_gauge(Arc::new(AtomicUsize::new(0)))
    }

    pub(crate) fn with_gauge(gauge: Arc<AtomicUsize>) -> Self {
        gauge.store(0, Ordering::SeqCst);
        Self {
            confirmed: HashSet::new(),
            gauge,
            pong_hook: None,
        }
    }

    /// Answer server pings with `hook` instead of sending `{"type":"pong"}`.
    pub fn with_pong_hook(mut self, hook: PongHook) -> Self {
        self.pong_hook = Some(hook);
        self
    }

    /// Channels confirmed by `subscribed` and not yet released by `unsubscribed`.
    pub fn active_subscriptions(&self) -> usize {
        self.confirmed.len()
    }

    /// Forget confirmations from a previous connection.
    pub fn reset(&mut self) {
        self.confirmed.clear();
        self.publish();
    }

    /// Parse one text frame.
    pub fn parse(frame: &str) -> Result<InboundMessage, ReyaError> {
        let value = parse_value(frame)?;
        InboundMessage::from_value(&value)
    }

    /// Parse and dispatch one text frame, reporting failures to `on_error`.
    ///
    /// Frames with a missing or unknown `type` are reported and then delivered as
    /// [`InboundMessage::Unhandled`]. Returns the kind of the delivered message.
    pub fn handle_frame<H>(
        &mut self,
        frame: &str,
        handler: &mut H,
        session: &SessionHandle,
    ) -> Option<MessageKind>
    where
        H: SessionHandler + ?Sized,
    {
        let value = match parse_value(frame) {
            Ok(value) => value,
            Err(err) => {
                warn!("dispatcher.malformed error={}", err);
                handler.on_error(session, &err);
                return None;
            }
        };

        let message = match InboundMessage::from_value(&value) {
            Ok(message) => message,
            Err(ReyaError::UnknownMessageType(message_type)) => {
                let err = ReyaError::UnknownMessageType(message_type.clone());
                warn!("dispatcher.unhandled type={:?}", message_type);
                handler.on_error(session, &err);
                InboundMessage::Unhandled(UnhandledMessage {
                    message_type,
                    raw: value,
                })
            }
            Err(err) => {
                warn!("dispatcher.malformed error={}", err);
                // The keep-alive reply depends only on the discriminator.
                if value.get("type").and_then(Value::as_str) == Some("ping") {
                    self.answer_ping(handler, session);
                }
                handler.on_error(session, &err);
                return None;
            }
        };

        let kind = message.kind();
        self.dispatch(message, handler, session);
        Some(kind)
    }

    /// Route a classified message to `handler`.
    pub fn dispatch<H>(&mut self, message: InboundMessage, handler: &mut H, session: &SessionHandle)
    where
        H: SessionHandler + ?Sized,
    {
        match &message {
            InboundMessage::Ping(_) => self.answer_ping(handler, session),
            InboundMessage::Subscribed(m) => {
                if self.confirmed.insert(m.channel.clone()) {
                    debug!("dispatcher.subscribed channel={}", m.channel);
                } else {
                    debug!("dispatcher.subscribed_again channel={}", m.channel);
                }
                self.publish();
            }
            InboundMessage::Unsubscribed(m) => {
                self.confirmed.remove(&m.channel);
                debug!("dispatcher.unsubscribed channel={}", m.channel);
                self.publish();
            }
            InboundMessage::Error(m) => {
                warn!(
                    "dispatcher.server_error message={} channel={:?}",
                    m.message, m.channel
                );
            }
            _ => {}
        }
        handler.on_message(session, message);
    }

    fn answer_ping<H>(&self, handler: &mut H, session: &SessionHandle)
    where
        H: SessionHandler + ?Sized,
    {
        let sent = match &self.pong_hook {
            Some(hook) => hook(session),
            None => session.send_message(&OutboundMessage::Pong),
        };
        if let Err(err) = sent {
            warn!("dispatcher.pong_failed error={}", err);
            handler.on_error(session, &err);
        }
    }

    fn publish(&self) {
        self.gauge.store(self.confirmed.len(), Ordering::SeqCst);
    }
}

impl Default for MessageDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MessageDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageDispatcher")
            .field("confirmed", &self.confirmed)
            .field("pong_hook", &self.pong_hook.is_some())
            .finish()
    }
}

fn parse_value(frame: &str) -> Result<Value, ReyaError> {
    serde_json::from_str(frame).map_err(|e| ReyaError::MalformedFrame(e.to_string()))
}
