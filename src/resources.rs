/// Fluent resource API: `session.market().summary("ETHRUSDPERP").subscribe(false)`.
///
/// Every accessor pairs a channel template with its parameters and returns a
/// [`ChannelSubscription`]. Subscribing before the session is Open never fails for
/// connection reasons; the frame goes out on the next Open transition.
use crate::channel::{
    Channel, NoParams, ParameterizedChannel, PathParams, SymbolParams, WalletParams,
    ALL_PRICES, MARKETS_SUMMARY, MARKET_DEPTH, MARKET_PERP_EXECUTIONS, MARKET_SPOT_EXECUTIONS,
    MARKET_SUMMARY, PRICE, WALLET_ACCOUNT_BALANCES, WALLET_OPEN_ORDERS, WALLET_PERP_EXECUTIONS,
    WALLET_POSITIONS, WALLET_SPOT_EXECUTIONS,
};
use crate::errors::ReyaError;
use crate::session::SessionHandle;

/// A subscribable channel bound to a session.
#[derive(Debug, Clone)]
pub struct ChannelSubscription<P> {
    session: SessionHandle,
    template: ParameterizedChannel<P>,
    params: P,
}

impl<P: PathParams> ChannelSubscription<P> {
    pub(crate) fn new(session: SessionHandle, template: ParameterizedChannel<P>, params: P) -> Self {
        Self {
            session,
            template,
            params,
        }
    }

    /// The resolved channel path.
    pub fn path(&self) -> Result<String, ReyaError> {
        self.template.resolve(&self.params)
    }

    /// Subscribe, optionally with batched delivery.
    ///
    /// Fails only if the path cannot be resolved. Subscribing an already subscribed
    /// path is a no-op and keeps the original `batched` flag.
    pub fn subscribe(&self, batched: bool) -> Result<(), ReyaError> {
        let channel = Channel::new(self.path()?).batched(batched);
        self.session.subscribe(channel);
        Ok(())
    }

    /// Unsubscribe. A no-op if the path is not subscribed.
    pub fn unsubscribe(&self) -> Result<(), ReyaError> {
        let path = self.path()?;
        self.session.unsubscribe(&path);
        Ok(())
    }

    pub fn is_subscribed(&self) -> Result<bool, ReyaError> {
        let path = self.path()?;
        Ok(self.session.subscriptions().iter().any(|c| c.path() == path))
    }
}

/// Market data channels.
#[derive(Debug, Clone)]
pub struct MarketResource {
    session: SessionHandle,
}

impl MarketResource {
    pub(crate) fn new(session: SessionHandle) -> Self {
        Self { session }
    }

    /// Summaries of every market.
    pub fn all_markets_summary(&self) -> ChannelSubscription<NoParams> {
        ChannelSubscription::new(self.session.clone(), MARKETS_SUMMARY, NoParams)
    }

    pub fn summary(&self, symbol: impl Into<String>) -> ChannelSubscription<SymbolParams> {
        ChannelSubscription::new(self.session.clone(), MARKET_SUMMARY, SymbolParams::new(symbol))
    }

    pub fn perp_executions(&self, symbol: impl Into<String>) -> ChannelSubscription<SymbolParams> {
        ChannelSubscription::new(
            self.session.clone(),
            MARKET_PERP_EXECUTIONS,
            SymbolParams::new(symbol),
        )
    }

    pub fn spot_executions(&self, symbol: impl Into<String>) -> ChannelSubscription<SymbolParams> {
        ChannelSubscription::new(
            self.session.clone(),
            MARKET_SPOT_EXECUTIONS,
            SymbolParams::new(symbol),
        )
    }

    /// Order book depth of a spot market.
    pub fn depth(&self, symbol: impl Into<String>) -> ChannelSubscription<SymbolParams> {
        ChannelSubscription::new(self.session.clone(), MARKET_DEPTH, SymbolParams::new(symbol))
    }
}

/// Per-wallet account channels.
#[derive(Debug, Clone)]
pub struct WalletResource {
    session: SessionHandle,
}

impl WalletResource {
    pub(crate) fn new(session: SessionHandle) -> Self {
        Self { session }
    }

    fn wallet_channel(
        &self,
        template: ParameterizedChannel<WalletParams>,
        address: impl Into<String>,
    ) -> ChannelSubscription<WalletParams> {
        ChannelSubscription::new(self.session.clone(), template, WalletParams::new(address))
    }

    pub fn positions(&self, address: impl Into<String>) -> ChannelSubscription<WalletParams> {
        self.wallet_channel(WALLET_POSITIONS, address)
    }

    pub fn open_orders(&self, address: impl Into<String>) -> ChannelSubscription<WalletParams> {
        self.wallet_channel(WALLET_OPEN_ORDERS, address)
    }

    /// Order lifecycle updates. The venue publishes these on the open orders channel.
    pub fn order_changes(&self, address: impl Into<String>) -> ChannelSubscription<WalletParams> {
        self.open_orders(address)
    }

    pub fn perp_executions(&self, address: impl Into<String>) -> ChannelSubscription<WalletParams> {
        self.wallet_channel(WALLET_PERP_EXECUTIONS, address)
    }

    pub fn spot_executions(&self, address: impl Into<String>) -> ChannelSubscription<WalletParams> {
        self.wallet_channel(WALLET_SPOT_EXECUTIONS, address)
    }

    pub fn account_balances(&self, address: impl Into<String>) -> ChannelSubscription<WalletParams> {
        self.wallet_channel(WALLET_ACCOUNT_BALANCES, address)
    }
}

/// Price channels.
#[derive(Debug, Clone)]
pub struct PricesResource {
    session: SessionHandle,
}

impl PricesResource {
    pub(crate) fn new(session: SessionHandle) -> Self {
        Self { session }
    }

    pub fn all_prices(&self) -> ChannelSubscription<NoParams> {
        ChannelSubscription::new(self.session.clone(), ALL_PRICES, NoParams)
    }

    pub fn price(&self, symbol: impl Into<String>) -> ChannelSubscription<SymbolParams> {
        ChannelSubscription::new(self.session.clone(), PRICE, SymbolParams::new(symbol))
    }
}
