//! Reya WebSocket SDK for Rust.
//!
//! A resource-addressed subscription client for the Reya trading venue's real-time
//! market and account data feed.
//!
//! # What This SDK Provides
//!
//! - A reconnecting session with heartbeat and subscription replay: [`ConnectionSession`]
//! - A fluent channel API: `session.market()`, `session.wallet()`, `session.prices()`
//! - Classified inbound messages: [`InboundMessage`], with typed payload decoding
//!   through [`ChannelData::typed`]
//! - Channel path templates with typed parameters: [`ParameterizedChannel`]
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use reya_sdk::{ConnectionSession, InboundMessage, SessionHandle, WebSocketConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), reya_sdk::ReyaError> {
//!     let session = ConnectionSession::new(WebSocketConfig::default());
//!
//!     // Recorded now, sent as soon as the connection opens.
//!     session.market().summary("ETHRUSDPERP").subscribe(false)?;
//!     session.wallet().positions("0x6c51275fd01d5dbd2da194e92f920f8598306df2").subscribe(false)?;
//!
//!     session
//!         .connect(|_session: &SessionHandle, message: InboundMessage| {
//!             if let InboundMessage::ChannelData(data) = message {
//!                 println!("{} -> {}", data.channel, data.data);
//!             }
//!         })
//!         .await
//! }
//! ```
//!
//! # Session Lifecycle
//!
//! [`ConnectionSession::connect`] drives the connection and only returns once the
//! session is Disconnected for good: after [`SessionHandle::close`] (`Ok(())`) or after
//! `reconnect_attempts` consecutive failed attempts ([`ReyaError::ConnectionExhausted`]).
//! Every time a connection opens, all registered channels are re-subscribed in the
//! order they were first subscribed. Clone a [`SessionHandle`] to subscribe, send or
//! close from other tasks.
//!
//! # Logging
//!
//! This crate logs through the [`log`](https://docs.rs/log/) facade: transitions and
//! frame traffic at debug level, opens and subscriptions at info, drops at warn and
//! retry exhaustion at error. Configure any compatible logger in your binary, then set
//! `RUST_LOG=debug` to inspect session behavior.
//!
//! # Errors
//!
//! All fallible operations return [`ReyaError`]:
//!
//! - Caller errors are returned synchronously (`MissingParameter`, `NotConnected`)
//! - Bad frames and connection drops go to [`SessionHandler::on_error`] and the session
//!   keeps running (`MalformedFrame`, `UnknownMessageType`, `WebSocketError`, ...)
//! - Only `InvalidConfig` and `ConnectionExhausted` end a session
pub mod channel;
pub mod config;
pub mod dispatcher;
pub mod errors;
pub mod models;
pub mod registry;
pub mod resources;
pub mod session;
pub mod transport;

// Re-export primary types for convenience.
pub use channel::{
    format_path, Channel, ChannelKind, NoParams, ParameterizedChannel, PathParams,
    SymbolParams, WalletParams,
};
pub use config::WebSocketConfig;
pub use dispatcher::{MessageDispatcher, PongHook};
pub use errors::ReyaError;
pub use models::*;
pub use registry::{Subscription, SubscriptionRegistry};
pub use resources::{ChannelSubscription, MarketResource, PricesResource, WalletResource};
pub use session::{
    CloseReason, ConnectionSession, ConnectionState, SessionEvent, SessionHandle,
    SessionHandler,
};
pub use transport::{Connector, Transport, TransportEvent, WsConnector};
