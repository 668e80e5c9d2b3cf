/// Connection configuration for the Reya WebSocket feed.
use std::env;
use std::str::FromStr;
use std::time::Duration;

use url::Url;

use crate::errors::ReyaError;

/// Production WebSocket endpoint.
pub const DEFAULT_WS_URL: &str = "wss://ws.reya.xyz/";

/// Settings consumed by [`ConnectionSession`](crate::ConnectionSession).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebSocketConfig {
    /// WebSocket endpoint (default: `wss://ws.reya.xyz/`).
    pub url: String,
    /// Time allowed for a connection attempt to reach Open (default: 30s).
    pub connection_timeout: Duration,
    /// Interval between heartbeat pings while Open (default: 30s).
    pub ping_interval: Duration,
    /// Time allowed for a pong after a ping before the connection is dropped (default: 10s).
    pub ping_timeout: Duration,
    /// Consecutive failed connection attempts tolerated before giving up (default: 3).
    pub reconnect_attempts: u32,
    /// Wait between a drop and the next connection attempt (default: 5s).
    pub reconnect_delay: Duration,
    /// Verify the server certificate (default: true).
    pub ssl_verify: bool,
    /// Request per-message compression (default: true).
    pub enable_compression: bool,
    /// Send a `ping` right after every Open to confirm the path end-to-end (default: true).
    pub probe_on_open: bool,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_WS_URL.into(),
            connection_timeout: Duration::from_secs(30),
            ping_interval: Duration::from_secs(30),
            ping_timeout: Duration::from_secs(10),
            reconnect_attempts: 3,
            reconnect_delay: Duration::from_secs(5),
            ssl_verify: true,
            enable_compression: true,
            probe_on_open: true,
        }
    }
}

impl WebSocketConfig {
    /// Default settings pointed at a custom endpoint.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    /// Build a config from `REYA_WS_*` environment variables, falling back to defaults.
    ///
    /// Durations are read as whole seconds.
    pub fn from_env() -> Result<Self, ReyaError> {
        let defaults = Self::default();
        Ok(Self {
            url: env::var("REYA_WS_URL").unwrap_or(defaults.url),
            connection_timeout: env_secs("REYA_WS_CONNECTION_TIMEOUT", defaults.connection_timeout)?,
            ping_interval: env_secs("REYA_WS_PING_INTERVAL", defaults.ping_interval)?,
            ping_timeout: env_secs("REYA_WS_PING_TIMEOUT", defaults.ping_timeout)?,
            reconnect_attempts: env_parse("REYA_WS_RECONNECT_ATTEMPTS", defaults.reconnect_attempts)?,
            reconnect_delay: env_secs("REYA_WS_RECONNECT_DELAY", defaults.reconnect_delay)?,
            ssl_verify: env_flag("REYA_WS_SSL_VERIFY", defaults.ssl_verify),
            enable_compression: env_flag("REYA_WS_ENABLE_COMPRESSION", defaults.enable_compression),
            probe_on_open: defaults.probe_on_open,
        })
    }

    /// Check the settings a session cannot run without.
    pub fn validate(&self) -> Result<(), ReyaError> {
        let url = Url::parse(&self.url)?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(ReyaError::InvalidConfig(format!(
                "url must use ws:// or wss://, got {}",
                url.scheme()
            )));
        }
        for (name, value) in [
            ("connection_timeout", self.connection_timeout),
            ("ping_interval", self.ping_interval),
            ("ping_timeout", self.ping_timeout),
        ] {
            if value.is_zero() {
                return Err(ReyaError::InvalidConfig(format!("{name} must be non-zero")));
            }
        }
        Ok(())
    }
}

fn env_parse<T: FromStr>(name: &str, default: T) -> Result<T, ReyaError> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ReyaError::InvalidConfig(format!("{name}: cannot parse {raw:?}"))),
        Err(_) => Ok(default),
    }
}

fn env_secs(name: &str, default: Duration) -> Result<Duration, ReyaError> {
    env_parse(name, default.as_secs()).map(Duration::from_secs)
}

fn env_flag(name: &str, default: bool) -> bool {
    match env::var(name) {
        Ok(raw) => raw.trim().eq_ignore_ascii_case("true"),
        Err(_) => default,
    }
}
