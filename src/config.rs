//! Client configuration: feed endpoints, subscription topics, and the
//! timing knobs for the watchdog, reconnect backoff and fallback tick.

use std::env;
use std::time::Duration;
use thiserror::Error;
use url::Url;

const DEFAULT_NEGOTIATE_URL: &str = "https://livetiming.formula1.com/signalr/negotiate";
const DEFAULT_SOCKET_BASE_URL: &str = "wss://livetiming.formula1.com/signalr/";
const DEFAULT_USER_AGENT: &str = "BestHTTP";

/// Connection-data parameter naming the logical stream, sent URL-encoded on
/// both the negotiate request and the socket upgrade.
pub const CONNECTION_DATA: &str = r#"[{"name":"Streaming"}]"#;
pub const CLIENT_PROTOCOL: &str = "1.5";

/// Topics requested in the subscription frame.
pub const DEFAULT_TOPICS: &[&str] = &[
    "TimingData",
    "SessionInfo",
    "TrackStatus",
    "WeatherData",
    "LapCount",
    "DriverList",
    "Heartbeat",
];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid negotiate url: {0}")]
    InvalidNegotiateUrl(String),
    #[error("invalid socket url: {0}")]
    InvalidSocketUrl(String),
}

#[derive(Debug, Clone)]
pub struct LiveTimingConfig {
    negotiate_url: Url,
    socket_base_url: Url,
    pub topics: Vec<String>,
    pub user_agent: String,
    /// How long `Streaming` may go without a data-bearing frame before the
    /// session is considered silent.
    pub watchdog_timeout: Duration,
    /// Delay before re-negotiating after a failure or close.
    pub reconnect_backoff: Duration,
    /// Grace period before `Subscribing` advances to `Streaming` even
    /// without a frame.
    pub subscribe_grace: Duration,
    pub fallback_tick: Duration,
}

impl LiveTimingConfig {
    pub fn new(
        negotiate_url: impl AsRef<str>,
        socket_base_url: impl AsRef<str>,
    ) -> Result<Self, ConfigError> {
        let negotiate_url = Url::parse(negotiate_url.as_ref())
            .map_err(|err| ConfigError::InvalidNegotiateUrl(err.to_string()))?;
        // A trailing slash keeps Url::join from replacing the last path
        // segment when the connect endpoint is appended.
        let mut socket_base = socket_base_url.as_ref().trim().to_string();
        if !socket_base.ends_with('/') {
            socket_base.push('/');
        }
        let socket_base_url = Url::parse(&socket_base)
            .map_err(|err| ConfigError::InvalidSocketUrl(err.to_string()))?;
        Ok(Self {
            negotiate_url,
            socket_base_url,
            topics: DEFAULT_TOPICS.iter().map(|t| t.to_string()).collect(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            watchdog_timeout: Duration::from_secs(40),
            reconnect_backoff: Duration::from_secs(20),
            subscribe_grace: Duration::from_secs(3),
            fallback_tick: Duration::from_millis(1500),
        })
    }

    /// Load configuration from the environment, falling back to the
    /// production endpoints.
    pub fn from_env() -> Result<Self, ConfigError> {
        let negotiate = env_or("PITWALL_NEGOTIATE_URL", DEFAULT_NEGOTIATE_URL);
        let socket = env_or("PITWALL_SOCKET_URL", DEFAULT_SOCKET_BASE_URL);
        let mut config = Self::new(negotiate, socket)?;
        if let Ok(agent) = env::var("PITWALL_USER_AGENT") {
            let agent = agent.trim().to_string();
            if !agent.is_empty() {
                config.user_agent = agent;
            }
        }
        Ok(config)
    }

    pub fn negotiate_url(&self) -> &Url {
        &self.negotiate_url
    }

    pub fn socket_base_url(&self) -> &Url {
        &self.socket_base_url
    }

    #[must_use]
    pub fn with_watchdog_timeout(mut self, timeout: Duration) -> Self {
        self.watchdog_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_reconnect_backoff(mut self, backoff: Duration) -> Self {
        self.reconnect_backoff = backoff;
        self
    }

    #[must_use]
    pub fn with_subscribe_grace(mut self, grace: Duration) -> Self {
        self.subscribe_grace = grace;
        self
    }

    #[must_use]
    pub fn with_fallback_tick(mut self, tick: Duration) -> Self {
        self.fallback_tick = tick;
        self
    }
}

fn env_or(var: &str, default: &str) -> String {
    env::var(var)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| default.to_string())
}
