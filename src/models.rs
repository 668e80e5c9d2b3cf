/// Wire models for the Reya WebSocket feed.
///
/// Client frames are [`OutboundMessage`]; server frames are classified into
/// [`InboundMessage`] by their `type` discriminator. Channel payloads stay as raw JSON
/// on [`ChannelData`] and can be decoded into the typed models below on demand.
/// Numeric strings are parsed into [`Decimal`] to avoid precision loss.
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::channel::{Channel, ChannelKind};
use crate::errors::ReyaError;

/// Deserialize a millisecond timestamp sent as an integer, a float or a numeric string.
fn deserialize_millis<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de;

    struct Millis;
    impl<'de> de::Visitor<'de> for Millis {
        type Value = u64;
        fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
            f.write_str("a millisecond timestamp as a number or string")
        }
        fn visit_u64<E: de::Error>(self, v: u64) -> Result<u64, E> {
            Ok(v)
        }
        fn visit_i64<E: de::Error>(self, v: i64) -> Result<u64, E> {
            u64::try_from(v).map_err(de::Error::custom)
        }
        fn visit_f64<E: de::Error>(self, v: f64) -> Result<u64, E> {
            if v.is_finite() && v >= 0.0 {
                Ok(v as u64)
            } else {
                Err(de::Error::custom(format!("invalid timestamp {v}")))
            }
        }
        fn visit_str<E: de::Error>(self, v: &str) -> Result<u64, E> {
            match v.parse::<u64>() {
                Ok(n) => Ok(n),
                Err(_) => v
                    .parse::<f64>()
                    .map_err(de::Error::custom)
                    .and_then(|f| self.visit_f64(f)),
            }
        }
    }
    deserializer.deserialize_any(Millis)
}

fn decode<T: DeserializeOwned>(value: &Value, what: &str) -> Result<T, ReyaError> {
    T::deserialize(value).map_err(|e| ReyaError::MalformedFrame(format!("{what}: {e}")))
}

// ---------------------------------------------------------------------------
// Client -> server
// ---------------------------------------------------------------------------

/// A frame sent by the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    Subscribe { channel: String, batched: bool },
    Unsubscribe { channel: String },
    Ping,
    Pong,
}

impl OutboundMessage {
    pub fn subscribe(channel: &Channel) -> Self {
        OutboundMessage::Subscribe {
            channel: channel.path().to_string(),
            batched: channel.is_batched(),
        }
    }

    pub fn unsubscribe(path: &str) -> Self {
        OutboundMessage::Unsubscribe {
            channel: path.to_string(),
        }
    }

    /// Serialize to the JSON text sent on the socket.
    pub fn to_frame(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// Server -> client
// ---------------------------------------------------------------------------

/// `{"type": "connected"}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectedMessage {
    #[serde(default)]
    pub connection_id: Option<String>,
}

/// `{"type": "subscribed"}`; `contents` carries the initial snapshot when the server sends one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscribedMessage {
    pub channel: String,
    #[serde(default)]
    pub contents: Option<Value>,
}

/// `{"type": "unsubscribed"}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnsubscribedMessage {
    pub channel: String,
}

/// `{"type": "ping"}` / `{"type": "pong"}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatMessage {
    #[serde(default)]
    pub timestamp: Option<f64>,
}

/// `{"type": "error"}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorMessage {
    pub message: String,
    #[serde(default)]
    pub channel: Option<String>,
}

/// `{"type": "channel_data"}`: an update on a subscribed channel.
///
/// The payload arrives under `data` or `contents`. For batched subscriptions it is an
/// array whose element order is only guaranteed to be the frame's arrival order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelData {
    pub channel: String,
    #[serde(default)]
    pub timestamp: Option<f64>,
    #[serde(default, alias = "contents")]
    pub data: Value,
}

/// A frame whose `type` is missing or not understood by this client.
#[derive(Debug, Clone, PartialEq)]
pub struct UnhandledMessage {
    pub message_type: Option<String>,
    pub raw: Value,
}

/// A classified server frame.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    Connected(ConnectedMessage),
    Subscribed(SubscribedMessage),
    Unsubscribed(UnsubscribedMessage),
    ChannelData(ChannelData),
    Ping(HeartbeatMessage),
    Pong(HeartbeatMessage),
    Error(ErrorMessage),
    Unhandled(UnhandledMessage),
}

/// The discriminator of an [`InboundMessage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Connected,
    Subscribed,
    Unsubscribed,
    ChannelData,
    Ping,
    Pong,
    Error,
    Unhandled,
}

impl InboundMessage {
    /// Classify a decoded JSON frame by its `type` field.
    ///
    /// A missing or unrecognized `type` is [`ReyaError::UnknownMessageType`]; a known
    /// type with missing or mistyped fields is [`ReyaError::MalformedFrame`].
    pub fn from_value(value: &Value) -> Result<Self, ReyaError> {
        if !value.is_object() {
            return Err(ReyaError::MalformedFrame(format!(
                "expected a JSON object, got {value}"
            )));
        }
        let message_type = value.get("type").and_then(Value::as_str);
        match message_type {
            Some("connected") => Ok(InboundMessage::Connected(decode(value, "connected")?)),
            Some("subscribed") => Ok(InboundMessage::Subscribed(decode(value, "subscribed")?)),
            Some("unsubscribed") => Ok(InboundMessage::Unsubscribed(decode(
                value,
                "unsubscribed",
            )?)),
            Some("channel_data") => Ok(InboundMessage::ChannelData(decode(
                value,
                "channel_data",
            )?)),
            Some("ping") => Ok(InboundMessage::Ping(decode(value, "ping")?)),
            Some("pong") => Ok(InboundMessage::Pong(decode(value, "pong")?)),
            Some("error") => Ok(InboundMessage::Error(decode(value, "error")?)),
            other => Err(ReyaError::UnknownMessageType(other.map(str::to_string))),
        }
    }

    pub fn kind(&self) -> MessageKind {
        match self {
            InboundMessage::Connected(_) => MessageKind::Connected,
            InboundMessage::Subscribed(_) => MessageKind::Subscribed,
            InboundMessage::Unsubscribed(_) => MessageKind::Unsubscribed,
            InboundMessage::ChannelData(_) => MessageKind::ChannelData,
            InboundMessage::Ping(_) => MessageKind::Ping,
            InboundMessage::Pong(_) => MessageKind::Pong,
            InboundMessage::Error(_) => MessageKind::Error,
            InboundMessage::Unhandled(_) => MessageKind::Unhandled,
        }
    }

    /// The channel this message refers to, if any.
    pub fn channel(&self) -> Option<&str> {
        match self {
            InboundMessage::Subscribed(m) => Some(&m.channel),
            InboundMessage::Unsubscribed(m) => Some(&m.channel),
            InboundMessage::ChannelData(m) => Some(&m.channel),
            InboundMessage::Error(m) => m.channel.as_deref(),
            _ => None,
        }
    }
}

impl ChannelData {
    pub fn kind(&self) -> ChannelKind {
        ChannelKind::classify(&self.channel)
    }

    /// Decode the payload as a single `T`.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, ReyaError> {
        decode(&self.data, &self.channel)
    }

    /// Decode the payload as a list of `T`, accepting a single object or an array.
    pub fn items<T: DeserializeOwned>(&self) -> Result<Vec<T>, ReyaError> {
        match &self.data {
            Value::Array(values) => values.iter().map(|v| decode(v, &self.channel)).collect(),
            Value::Null => Ok(Vec::new()),
            single => Ok(vec![decode(single, &self.channel)?]),
        }
    }

    /// Decode the payload into the model matching the channel kind.
    pub fn typed(&self) -> Result<ChannelUpdate, ReyaError> {
        Ok(match self.kind() {
            ChannelKind::MarketsSummary | ChannelKind::MarketSummary { .. } => {
                ChannelUpdate::MarketSummaries(self.items()?)
            }
            ChannelKind::MarketPerpExecutions { .. } | ChannelKind::WalletPerpExecutions { .. } => {
                ChannelUpdate::PerpExecutions(self.items()?)
            }
            ChannelKind::MarketSpotExecutions { .. } | ChannelKind::WalletSpotExecutions { .. } => {
                ChannelUpdate::SpotExecutions(self.items()?)
            }
            ChannelKind::MarketDepth { .. } => ChannelUpdate::Depth(self.decode()?),
            ChannelKind::AllPrices | ChannelKind::Price { .. } => {
                ChannelUpdate::Prices(self.items()?)
            }
            ChannelKind::WalletPositions { .. } => ChannelUpdate::Positions(self.items()?),
            ChannelKind::WalletOpenOrders { .. } => ChannelUpdate::Orders(self.items()?),
            ChannelKind::WalletAccountBalances { .. } | ChannelKind::Other => {
                ChannelUpdate::Raw(self.data.clone())
            }
        })
    }
}

/// A channel payload decoded by [`ChannelData::typed`].
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelUpdate {
    MarketSummaries(Vec<MarketSummary>),
    PerpExecutions(Vec<PerpExecution>),
    SpotExecutions(Vec<SpotExecution>),
    Depth(Depth),
    Prices(Vec<Price>),
    Positions(Vec<Position>),
    Orders(Vec<Order>),
    Raw(Value),
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Order side: `B` (buy/bid) or `A` (ask/sell).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    #[serde(rename = "B")]
    Buy,
    #[serde(rename = "A")]
    Sell,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderStatus {
    Open,
    Filled,
    Cancelled,
    Rejected,
    #[serde(other)]
    Unknown,
}

/// `LIMIT`, `TP` (take profit) or `SL` (stop loss).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    #[serde(rename = "LIMIT")]
    Limit,
    #[serde(rename = "TP")]
    TakeProfit,
    #[serde(rename = "SL")]
    StopLoss,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeInForce {
    #[serde(rename = "IOC")]
    ImmediateOrCancel,
    #[serde(rename = "GTC")]
    GoodTillCancel,
    #[serde(other)]
    Unknown,
}

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

/// Oracle and pool price for a symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Price {
    pub symbol: String,
    #[serde(default)]
    pub oracle_price: Option<Decimal>,
    #[serde(default)]
    pub pool_price: Option<Decimal>,
    #[serde(deserialize_with = "deserialize_millis")]
    pub updated_at: u64,
}

/// Market statistics, recalculated periodically by the venue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketSummary {
    pub symbol: String,
    #[serde(deserialize_with = "deserialize_millis")]
    pub updated_at: u64,
    pub long_oi_qty: Decimal,
    pub short_oi_qty: Decimal,
    pub oi_qty: Decimal,
    /// Hourly funding rate.
    pub funding_rate: Decimal,
    pub long_funding_value: Decimal,
    pub short_funding_value: Decimal,
    pub funding_rate_velocity: Decimal,
    pub volume24h: Decimal,
    #[serde(default)]
    pub px_change24h: Option<Decimal>,
    #[serde(default)]
    pub throttled_oracle_price: Option<Decimal>,
    #[serde(default)]
    pub throttled_pool_price: Option<Decimal>,
    #[serde(default)]
    pub prices_updated_at: Option<u64>,
}

/// An open position of a margin account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    pub exchange_id: u64,
    pub symbol: String,
    pub account_id: u64,
    pub qty: Decimal,
    pub side: Side,
    pub avg_entry_price: Decimal,
    pub avg_entry_funding_value: Decimal,
    /// Sequence number of the last execution reflected in this position.
    pub last_trade_sequence_number: u64,
}

/// A resting or recently changed order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub exchange_id: u64,
    pub symbol: String,
    pub account_id: u64,
    pub order_id: String,
    #[serde(default)]
    pub qty: Option<Decimal>,
    #[serde(default)]
    pub exec_qty: Option<Decimal>,
    pub side: Side,
    pub limit_px: Decimal,
    pub order_type: OrderType,
    #[serde(default)]
    pub trigger_px: Option<Decimal>,
    #[serde(default)]
    pub time_in_force: Option<TimeInForce>,
    #[serde(default)]
    pub reduce_only: Option<bool>,
    pub status: OrderStatus,
    #[serde(deserialize_with = "deserialize_millis")]
    pub created_at: u64,
    #[serde(deserialize_with = "deserialize_millis")]
    pub last_update_at: u64,
}

impl Order {
    /// Quantity still open, when the venue reports both sizes.
    pub fn remaining_qty(&self) -> Option<Decimal> {
        Some(self.qty? - self.exec_qty.unwrap_or(Decimal::ZERO))
    }
}

/// A perpetual trade execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerpExecution {
    pub exchange_id: u64,
    pub symbol: String,
    pub account_id: u64,
    pub qty: Decimal,
    pub side: Side,
    pub price: Decimal,
    pub fee: Decimal,
    #[serde(rename = "type")]
    pub execution_type: String,
    #[serde(deserialize_with = "deserialize_millis")]
    pub timestamp: u64,
    pub sequence_number: u64,
}

impl PerpExecution {
    /// Notional value of the execution (`qty * price`).
    pub fn notional(&self) -> Decimal {
        self.qty * self.price
    }
}

/// A spot trade execution between a taker and a maker account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpotExecution {
    #[serde(default)]
    pub exchange_id: Option<u64>,
    pub symbol: String,
    pub account_id: u64,
    pub maker_account_id: u64,
    #[serde(default)]
    pub order_id: Option<String>,
    #[serde(default)]
    pub maker_order_id: Option<String>,
    pub side: Side,
    pub qty: Decimal,
    pub price: Decimal,
    pub fee: Decimal,
    #[serde(rename = "type")]
    pub execution_type: String,
    #[serde(deserialize_with = "deserialize_millis")]
    pub timestamp: u64,
}

impl SpotExecution {
    pub fn notional(&self) -> Decimal {
        self.qty * self.price
    }
}

/// One price level of the book.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Level {
    pub px: Decimal,
    pub qty: Decimal,
}

/// Aggregated order book snapshot for a spot market. Bids are best first, as are asks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Depth {
    pub symbol: String,
    #[serde(default)]
    pub bids: Vec<Level>,
    #[serde(default)]
    pub asks: Vec<Level>,
    #[serde(default)]
    pub updated_at: Option<u64>,
}

impl Depth {
    pub fn best_bid(&self) -> Option<&Level> {
        self.bids.first()
    }

    pub fn best_ask(&self) -> Option<&Level> {
        self.asks.first()
    }
}
