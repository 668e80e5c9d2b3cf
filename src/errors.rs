/// Error types for the Reya WebSocket SDK.
///
/// Local caller errors (`MissingParameter`, `NotConnected`) are returned synchronously.
/// Protocol and transport problems are reported to the session's error callback and,
/// except for `ConnectionExhausted` and `InvalidConfig`, never end the session.
use std::time::Duration;

use thiserror::Error;

use crate::session::ConnectionState;

/// The primary error type for the Reya SDK.
#[derive(Error, Debug)]
pub enum ReyaError {
    // Channel paths
    #[error("Missing required parameter: {0}")]
    MissingParameter(String),

    // Session
    #[error("Not connected (session is {0})")]
    NotConnected(ConnectionState),

    #[error("Invalid session state: {0}")]
    InvalidState(String),

    #[error("Connection exhausted after {attempts} failed attempts")]
    ConnectionExhausted { attempts: u32 },

    // Protocol
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    #[error("Unknown message type: {}", .0.as_deref().unwrap_or("<missing>"))]
    UnknownMessageType(Option<String>),

    // Transport
    #[error("Connection timed out after {0:?}")]
    ConnectionTimeout(Duration),

    #[error("Heartbeat timed out: no pong within {0:?}")]
    HeartbeatTimeout(Duration),

    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    // Configuration / serialization
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("JSON error: {0}")]
    JsonError(String),

    // Generic
    #[error("{0}")]
    Other(String),
}

impl ReyaError {
    /// Returns true if this error ends the session.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ReyaError::ConnectionExhausted { .. } | ReyaError::InvalidConfig(_)
        )
    }

    /// Returns true if this error is a connection drop that feeds the reconnect policy.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            ReyaError::ConnectionTimeout(_)
                | ReyaError::HeartbeatTimeout(_)
                | ReyaError::WebSocketError(_)
        )
    }

    /// Returns true if this error came from a single bad inbound frame.
    pub fn is_protocol(&self) -> bool {
        matches!(
            self,
            ReyaError::MalformedFrame(_) | ReyaError::UnknownMessageType(_)
        )
    }
}

impl From<serde_json::Error> for ReyaError {
    fn from(err: serde_json::Error) -> Self {
        ReyaError::JsonError(err.to_string())
    }
}

impl From<url::ParseError> for ReyaError {
    fn from(err: url::ParseError) -> Self {
        ReyaError::InvalidConfig(format!("URL parse error: {err}"))
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ReyaError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        ReyaError::WebSocketError(err.to_string())
    }
}
