/// Channel paths: templating, identity and classification.
///
/// A channel is addressed by a resolved path such as `/v2/wallet/0xABC/positions`.
/// Paths are built from templates with `{name}` placeholders and are otherwise
/// opaque strings; two channels are the same channel iff their paths are equal.
use std::borrow::{Borrow, Cow};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::hash::{BuildHasher, Hash, Hasher};
use std::marker::PhantomData;

use crate::errors::ReyaError;

// ---------------------------------------------------------------------------
// Path parameters
// ---------------------------------------------------------------------------

/// Named values substituted into a path template.
pub trait PathParams {
    /// Look up the value for placeholder `name`.
    fn param(&self, name: &str) -> Option<&str>;
}

impl<T: PathParams + ?Sized> PathParams for &T {
    fn param(&self, name: &str) -> Option<&str> {
        (**self).param(name)
    }
}

impl<K, V, S> PathParams for HashMap<K, V, S>
where
    K: Borrow<str> + Hash + Eq,
    V: AsRef<str>,
    S: BuildHasher,
{
    fn param(&self, name: &str) -> Option<&str> {
        self.get(name).map(AsRef::as_ref)
    }
}

impl<K, V> PathParams for BTreeMap<K, V>
where
    K: Borrow<str> + Ord,
    V: AsRef<str>,
{
    fn param(&self, name: &str) -> Option<&str> {
        self.get(name).map(AsRef::as_ref)
    }
}

impl<K: AsRef<str>, V: AsRef<str>> PathParams for [(K, V)] {
    fn param(&self, name: &str) -> Option<&str> {
        self.iter()
            .find(|(key, _)| key.as_ref() == name)
            .map(|(_, value)| value.as_ref())
    }
}

impl<K: AsRef<str>, V: AsRef<str>, const N: usize> PathParams for [(K, V); N] {
    fn param(&self, name: &str) -> Option<&str> {
        self.as_slice().param(name)
    }
}

/// Parameters for channels without placeholders.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NoParams;

impl PathParams for NoParams {
    fn param(&self, _name: &str) -> Option<&str> {
        None
    }
}

/// Parameters for per-symbol channels (`{symbol}`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolParams {
    pub symbol: String,
}

impl SymbolParams {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
        }
    }
}

impl PathParams for SymbolParams {
    fn param(&self, name: &str) -> Option<&str> {
        (name == "symbol").then_some(self.symbol.as_str())
    }
}

/// Parameters for per-wallet channels (`{address}`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalletParams {
    pub address: String,
}

impl WalletParams {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
        }
    }
}

impl PathParams for WalletParams {
    fn param(&self, name: &str) -> Option<&str> {
        (name == "address").then_some(self.address.as_str())
    }
}

// ---------------------------------------------------------------------------
// Templating
// ---------------------------------------------------------------------------

/// Substitute every `{name}` placeholder in `template` from `params`.
///
/// Fails with [`ReyaError::MissingParameter`] naming the first placeholder that has
/// no value. Braces that do not enclose a plain identifier are copied through.
pub fn format_path<P: PathParams + ?Sized>(template: &str, params: &P) -> Result<String, ReyaError> {
    let mut out = String::with_capacity(template.len() + 32);
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        match after.find('}') {
            Some(close) if is_placeholder_name(&after[..close]) => {
                let name = &after[..close];
                let value = params
                    .param(name)
                    .ok_or_else(|| ReyaError::MissingParameter(name.to_string()))?;
                out.push_str(value);
                rest = &after[close + 1..];
            }
            _ => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    Ok(out)
}

fn is_placeholder_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// A channel path template bound to its parameter record type.
pub struct ParameterizedChannel<P> {
    template: Cow<'static, str>,
    _params: PhantomData<fn(&P)>,
}

impl<P> ParameterizedChannel<P> {
    pub const fn new(template: &'static str) -> Self {
        Self {
            template: Cow::Borrowed(template),
            _params: PhantomData,
        }
    }

    /// A template known only at runtime.
    pub fn custom(template: impl Into<String>) -> Self {
        Self {
            template: Cow::Owned(template.into()),
            _params: PhantomData,
        }
    }

    pub fn template(&self) -> &str {
        &self.template
    }
}

impl<P: PathParams> ParameterizedChannel<P> {
    /// Resolve the template into a concrete path.
    pub fn resolve(&self, params: &P) -> Result<String, ReyaError> {
        format_path(&self.template, params)
    }
}

impl<P> Clone for ParameterizedChannel<P> {
    fn clone(&self) -> Self {
        Self {
            template: self.template.clone(),
            _params: PhantomData,
        }
    }
}

impl<P> fmt::Debug for ParameterizedChannel<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ParameterizedChannel")
            .field(&self.template)
            .finish()
    }
}

/// All-markets summary.
pub const MARKETS_SUMMARY: ParameterizedChannel<NoParams> =
    ParameterizedChannel::new("/v2/markets/summary");
/// Summary for one market.
pub const MARKET_SUMMARY: ParameterizedChannel<SymbolParams> =
    ParameterizedChannel::new("/v2/market/{symbol}/summary");
/// Perp executions for one market.
pub const MARKET_PERP_EXECUTIONS: ParameterizedChannel<SymbolParams> =
    ParameterizedChannel::new("/v2/market/{symbol}/perpExecutions");
/// Spot executions for one market.
pub const MARKET_SPOT_EXECUTIONS: ParameterizedChannel<SymbolParams> =
    ParameterizedChannel::new("/v2/market/{symbol}/spotExecutions");
/// Order book depth snapshots for one spot market.
pub const MARKET_DEPTH: ParameterizedChannel<SymbolParams> =
    ParameterizedChannel::new("/v2/market/{symbol}/depth");
/// Prices for every symbol.
pub const ALL_PRICES: ParameterizedChannel<NoParams> = ParameterizedChannel::new("/v2/prices");
/// Price for one symbol.
pub const PRICE: ParameterizedChannel<SymbolParams> =
    ParameterizedChannel::new("/v2/prices/{symbol}");
/// Open positions of a wallet.
pub const WALLET_POSITIONS: ParameterizedChannel<WalletParams> =
    ParameterizedChannel::new("/v2/wallet/{address}/positions");
/// Open orders of a wallet.
pub const WALLET_OPEN_ORDERS: ParameterizedChannel<WalletParams> =
    ParameterizedChannel::new("/v2/wallet/{address}/openOrders");
/// Perp executions of a wallet.
pub const WALLET_PERP_EXECUTIONS: ParameterizedChannel<WalletParams> =
    ParameterizedChannel::new("/v2/wallet/{address}/perpExecutions");
/// Spot executions of a wallet.
pub const WALLET_SPOT_EXECUTIONS: ParameterizedChannel<WalletParams> =
    ParameterizedChannel::new("/v2/wallet/{address}/spotExecutions");
/// Account balances of a wallet.
pub const WALLET_ACCOUNT_BALANCES: ParameterizedChannel<WalletParams> =
    ParameterizedChannel::new("/v2/wallet/{address}/accountBalances");

// ---------------------------------------------------------------------------
// Channel identity
// ---------------------------------------------------------------------------

/// A subscribable data stream: a resolved path plus the batch-delivery flag.
///
/// Equality and hashing use the path only.
#[derive(Debug, Clone)]
pub struct Channel {
    path: String,
    batched: bool,
}

impl Channel {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            batched: false,
        }
    }

    /// Request batch delivery of updates.
    pub fn batched(mut self, batched: bool) -> Self {
        self.batched = batched;
        self
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn is_batched(&self) -> bool {
        self.batched
    }

    pub fn kind(&self) -> ChannelKind {
        ChannelKind::classify(&self.path)
    }
}

impl PartialEq for Channel {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path
    }
}

impl Eq for Channel {}

impl Hash for Channel {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.path.hash(state);
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path)
    }
}

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

/// The kind of stream a resolved path addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelKind {
    MarketsSummary,
    MarketSummary { symbol: String },
    MarketPerpExecutions { symbol: String },
    MarketSpotExecutions { symbol: String },
    MarketDepth { symbol: String },
    AllPrices,
    Price { symbol: String },
    WalletPositions { address: String },
    WalletOpenOrders { address: String },
    WalletPerpExecutions { address: String },
    WalletSpotExecutions { address: String },
    WalletAccountBalances { address: String },
    Other,
}

impl ChannelKind {
    /// Classify a resolved channel path.
    pub fn classify(path: &str) -> Self {
        let segments: Vec<&str> = path.trim_matches('/').split('/').collect();
        match segments.as_slice() {
            ["v2", "markets", "summary"] => ChannelKind::MarketsSummary,
            ["v2", "market", symbol, "summary"] => ChannelKind::MarketSummary {
                symbol: symbol.to_string(),
            },
            ["v2", "market", symbol, "perpExecutions"] => ChannelKind::MarketPerpExecutions {
                symbol: symbol.to_string(),
            },
            ["v2", "market", symbol, "spotExecutions"] => ChannelKind::MarketSpotExecutions {
                symbol: symbol.to_string(),
            },
            ["v2", "market", symbol, "depth"] => ChannelKind::MarketDepth {
                symbol: symbol.to_string(),
            },
            ["v2", "prices"] => ChannelKind::AllPrices,
            ["v2", "prices", symbol] => ChannelKind::Price {
                symbol: symbol.to_string(),
            },
            ["v2", "wallet", address, "positions"] => ChannelKind::WalletPositions {
                address: address.to_string(),
            },
            ["v2", "wallet", address, "openOrders"] => ChannelKind::WalletOpenOrders {
                address: address.to_string(),
            },
            ["v2", "wallet", address, "perpExecutions"] => ChannelKind::WalletPerpExecutions {
                address: address.to_string(),
            },
            ["v2", "wallet", address, "spotExecutions"] => ChannelKind::WalletSpotExecutions {
                address: address.to_string(),
            },
            ["v2", "wallet", address, "accountBalances"] => ChannelKind::WalletAccountBalances {
                address: address.to_string(),
            },
            _ => ChannelKind::Other,
        }
    }
}
