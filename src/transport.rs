/// The socket seam between a [`ConnectionSession`](crate::ConnectionSession) and the network.
///
/// A [`Connector`] opens one [`Transport`] per connection attempt. The session owns the
/// subscription registry, so a transport can be thrown away on every drop. Tests plug
/// in their own connector; production uses [`WsConnector`] over `tokio-tungstenite`.
use std::future::Future;
use std::pin::Pin;

use futures_util::{future, Sink, SinkExt, Stream, StreamExt};
use log::{debug, warn};
use tokio_tungstenite::tungstenite::{self, Message as WsMsg};

use crate::config::WebSocketConfig;
use crate::errors::ReyaError;

/// Something read from the socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A text frame.
    Text(String),
    /// A frame that could not be read as text.
    Invalid(String),
    /// A transport-level pong. Counts as a heartbeat reply.
    Pong,
    /// The peer closed the connection.
    Closed(Option<String>),
}

/// Write half: accepts serialized text frames.
pub type FrameSink = Pin<Box<dyn Sink<String, Error = ReyaError> + Send>>;

/// Read half: yields events until the connection ends.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<TransportEvent, ReyaError>> + Send>>;

/// An open connection, split into its write and read halves.
pub struct Transport {
    pub sink: FrameSink,
    pub events: EventStream,
}

impl Transport {
    pub fn new<S, E>(sink: S, events: E) -> Self
    where
        S: Sink<String, Error = ReyaError> + Send + 'static,
        E: Stream<Item = Result<TransportEvent, ReyaError>> + Send + 'static,
    {
        Self {
            sink: Box::pin(sink),
            events: Box::pin(events),
        }
    }
}

/// Opens transports for a session.
pub trait Connector: Send + Sync + 'static {
    /// Open a new connection to `config.url`.
    ///
    /// The session bounds the returned future with `connection_timeout`.
    fn connect(
        &self,
        config: &WebSocketConfig,
    ) -> impl Future<Output = Result<Transport, ReyaError>> + Send;
}

/// Production connector built on `tokio_tungstenite::connect_async`.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

impl Connector for WsConnector {
    fn connect(
        &self,
        config: &WebSocketConfig,
    ) -> impl Future<Output = Result<Transport, ReyaError>> + Send {
        let url = config.url.clone();
        let ssl_verify = config.ssl_verify;
        let compression = config.enable_compression;

        async move {
            if !ssl_verify {
                warn!("transport.ssl_verify_unsupported url={} verifying=true", url);
            }
            if compression {
                debug!("transport.compression_requested url={} negotiated=false", url);
            }
            debug!("transport.connect url={}", url);

            let (ws_stream, _response) = tokio_tungstenite::connect_async(url.as_str()).await?;
            let (sink, stream) = ws_stream.split();

            let sink = sink.with(|frame: String| future::ready(Ok::<_, ReyaError>(WsMsg::Text(frame))));
            let events = stream.filter_map(|item| future::ready(read_event(item)));

            Ok(Transport::new(sink, events))
        }
    }
}

/// Translate one tungstenite read into a session event. Frames the session has no use for
/// yield `None`.
pub(crate) fn read_event(
    item: Result<WsMsg, tungstenite::Error>,
) -> Option<Result<TransportEvent, ReyaError>> {
    match item {
        Ok(WsMsg::Text(text)) => Some(Ok(TransportEvent::Text(text))),
        Ok(WsMsg::Binary(bytes)) => Some(Ok(match String::from_utf8(bytes) {
            Ok(text) => TransportEvent::Text(text),
            Err(e) => {
                warn!("transport.binary_not_utf8 bytes={}", e.as_bytes().len());
                TransportEvent::Invalid(format!("binary frame is not UTF-8: {}", e.utf8_error()))
            }
        })),
        Ok(WsMsg::Pong(_)) => Some(Ok(TransportEvent::Pong)),
        Ok(WsMsg::Close(frame)) => Some(Ok(TransportEvent::Closed(
            frame.map(|f| f.reason.to_string()),
        ))),
        // tungstenite answers transport pings on the next write
        Ok(_) => None,
        Err(err) => Some(Err(ReyaError::from(err))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_event_text_and_utf8_binary() {
        assert!(matches!(
            read_event(Ok(WsMsg::Text("{}".into()))),
            Some(Ok(TransportEvent::Text(text))) if text == "{}"
        ));
        assert!(matches!(
            read_event(Ok(WsMsg::Binary(br#"{"type":"ping"}"#.to_vec()))),
            Some(Ok(TransportEvent::Text(text))) if text == r#"{"type":"ping"}"#
        ));
    }

    #[test]
    fn test_read_event_invalid_binary_is_reported() {
        match read_event(Ok(WsMsg::Binary(vec![0xff, 0xfe, 0x00]))) {
            Some(Ok(TransportEvent::Invalid(reason))) => {
                assert!(reason.contains("UTF-8"), "got {reason}")
            }
            other => panic!("Expected an invalid frame event, got {other:?}"),
        }
    }

    #[test]
    fn test_read_event_control_frames() {
        assert!(matches!(
            read_event(Ok(WsMsg::Pong(Vec::new()))),
            Some(Ok(TransportEvent::Pong))
        ));
        assert!(read_event(Ok(WsMsg::Ping(Vec::new()))).is_none());
        assert!(matches!(
            read_event(Ok(WsMsg::Close(None))),
            Some(Ok(TransportEvent::Closed(None)))
        ));
    }
}
