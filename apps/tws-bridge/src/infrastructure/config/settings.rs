//! Bridge Configuration Settings
//!
//! Configuration types for the bridge, loaded from environment variables.
//! Unset or unparsable values fall back to defaults.

use std::time::Duration;

use crate::application::services::SessionOptions;
use crate::domain::session::{
    DEFAULT_REQUEST_ID_BASE, DEFAULT_TICKER_ID_BASE, DEFAULT_TICKER_ID_CEILING, GatewayEndpoint,
    IdLayout, IdLayoutError, RequestId, TickerId,
};

/// Gateway connection settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewaySettings {
    /// Gateway host.
    pub host: String,
    /// Gateway port.
    pub port: u16,
    /// Client id presented to the gateway.
    pub client_id: i32,
    /// Explicit sidecar WebSocket URL; derived from host and port when unset.
    pub bridge_url: Option<String>,
    /// Connect on startup.
    pub auto_connect: bool,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 4002,
            client_id: 0,
            bridge_url: None,
            auto_connect: true,
        }
    }
}

impl GatewaySettings {
    /// Endpoint to connect to.
    #[must_use]
    pub fn endpoint(&self) -> GatewayEndpoint {
        GatewayEndpoint::new(&self.host, self.port, self.client_id)
    }
}

/// Session timeouts, id bases and request defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSettings {
    /// Limit on awaiting a correlated response.
    pub request_timeout: Duration,
    /// Limit on awaiting the connect acknowledgement.
    pub handshake_timeout: Duration,
    /// First request id.
    pub request_id_base: RequestId,
    /// First ticker id.
    pub ticker_id_base: TickerId,
    /// End of the ticker id range (exclusive).
    pub ticker_id_ceiling: TickerId,
    /// Capacity of the inbound event channel.
    pub event_buffer: usize,
    /// Exchange used for market data requests.
    pub default_exchange: String,
    /// Currency used for market data requests.
    pub default_currency: String,
    /// Security type used for market data requests.
    pub default_sec_type: String,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            handshake_timeout: Duration::from_secs(10),
            request_id_base: DEFAULT_REQUEST_ID_BASE,
            ticker_id_base: DEFAULT_TICKER_ID_BASE,
            ticker_id_ceiling: DEFAULT_TICKER_ID_CEILING,
            event_buffer: 4096,
            default_exchange: "CME".to_string(),
            default_currency: "USD".to_string(),
            default_sec_type: "FUT".to_string(),
        }
    }
}

impl SessionSettings {
    /// Request and ticker id ranges.
    #[must_use]
    pub const fn id_layout(&self) -> IdLayout {
        IdLayout {
            request_base: self.request_id_base,
            ticker_base: self.ticker_id_base,
            ticker_ceiling: self.ticker_id_ceiling,
        }
    }
}

impl From<SessionSettings> for SessionOptions {
    fn from(settings: SessionSettings) -> Self {
        Self {
            request_timeout: settings.request_timeout,
            handshake_timeout: settings.handshake_timeout,
            ids: settings.id_layout(),
            default_sec_type: settings.default_sec_type,
            default_exchange: settings.default_exchange,
            default_currency: settings.default_currency,
        }
    }
}

/// Supervisor reconnection settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectSettings {
    /// Reconnect when the session dies.
    pub enabled: bool,
    /// Initial reconnection delay.
    pub delay_initial: Duration,
    /// Maximum reconnection delay.
    pub delay_max: Duration,
    /// Reconnection delay multiplier for exponential backoff.
    pub delay_multiplier: f64,
    /// Maximum reconnection attempts before giving up (0 = unlimited).
    pub max_attempts: u32,
    /// How often the supervisor checks session liveness.
    pub health_check_interval: Duration,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            delay_initial: Duration::from_millis(500),
            delay_max: Duration::from_secs(30),
            delay_multiplier: 2.0,
            max_attempts: 0, // Unlimited
            health_check_interval: Duration::from_secs(5),
        }
    }
}

/// Broadcast settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastSettings {
    /// Per-listener outbound buffer.
    pub listener_buffer: usize,
}

impl Default for BroadcastSettings {
    fn default() -> Self {
        Self {
            listener_buffer: 1024,
        }
    }
}

/// Server port settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerSettings {
    /// HTTP port for health, metrics and listener WebSockets.
    pub http_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { http_port: 8080 }
    }
}

/// Complete bridge configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct BridgeConfig {
    /// Gateway connection settings.
    pub gateway: GatewaySettings,
    /// Session settings.
    pub session: SessionSettings,
    /// Reconnection settings.
    pub reconnect: ReconnectSettings,
    /// Broadcast settings.
    pub broadcast: BroadcastSettings,
    /// Server settings.
    pub server: ServerSettings,
}

impl BridgeConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if the gateway host is empty, the gateway port is
    /// zero, or the request and ticker id ranges overlap.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Same as [`from_env`](Self::from_env).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let env = Env(&lookup);

        let gateway_defaults = GatewaySettings::default();
        let gateway = GatewaySettings {
            host: env
                .raw("GATEWAY_HOST")
                .unwrap_or_else(|| gateway_defaults.host.clone()),
            port: env.parse("GATEWAY_PORT", gateway_defaults.port),
            client_id: env.parse("GATEWAY_CLIENT_ID", gateway_defaults.client_id),
            bridge_url: env.optional("GATEWAY_BRIDGE_URL"),
            auto_connect: env.flag("GATEWAY_AUTO_CONNECT", gateway_defaults.auto_connect),
        };

        if gateway.host.trim().is_empty() {
            return Err(ConfigError::EmptyValue("GATEWAY_HOST".to_string()));
        }
        if gateway.port == 0 {
            return Err(ConfigError::InvalidValue {
                key: "GATEWAY_PORT".to_string(),
                value: "0".to_string(),
            });
        }

        let session_defaults = SessionSettings::default();
        let session = SessionSettings {
            request_timeout: env.secs(
                "BRIDGE_REQUEST_TIMEOUT_SECS",
                session_defaults.request_timeout,
            ),
            handshake_timeout: env.secs(
                "BRIDGE_HANDSHAKE_TIMEOUT_SECS",
                session_defaults.handshake_timeout,
            ),
            request_id_base: env.parse("BRIDGE_REQUEST_ID_BASE", session_defaults.request_id_base),
            ticker_id_base: env.parse("BRIDGE_TICKER_ID_BASE", session_defaults.ticker_id_base),
            ticker_id_ceiling: env.parse(
                "BRIDGE_TICKER_ID_CEILING",
                session_defaults.ticker_id_ceiling,
            ),
            event_buffer: env
                .parse("BRIDGE_EVENT_BUFFER", session_defaults.event_buffer)
                .max(1),
            default_exchange: env.string(
                "BRIDGE_DEFAULT_EXCHANGE",
                &session_defaults.default_exchange,
            ),
            default_currency: env.string(
                "BRIDGE_DEFAULT_CURRENCY",
                &session_defaults.default_currency,
            ),
            default_sec_type: env.string(
                "BRIDGE_DEFAULT_SEC_TYPE",
                &session_defaults.default_sec_type,
            ),
        };

        session.id_layout().validate()?;

        let reconnect_defaults = ReconnectSettings::default();
        let reconnect = ReconnectSettings {
            enabled: env.flag("BRIDGE_AUTO_RECONNECT", reconnect_defaults.enabled),
            delay_initial: env.millis(
                "BRIDGE_RECONNECT_DELAY_INITIAL_MS",
                reconnect_defaults.delay_initial,
            ),
            delay_max: env.secs(
                "BRIDGE_RECONNECT_DELAY_MAX_SECS",
                reconnect_defaults.delay_max,
            ),
            delay_multiplier: env.parse(
                "BRIDGE_RECONNECT_DELAY_MULTIPLIER",
                reconnect_defaults.delay_multiplier,
            ),
            max_attempts: env.parse(
                "BRIDGE_MAX_RECONNECT_ATTEMPTS",
                reconnect_defaults.max_attempts,
            ),
            health_check_interval: env.secs(
                "BRIDGE_HEALTH_CHECK_INTERVAL_SECS",
                reconnect_defaults.health_check_interval,
            ),
        };

        let broadcast = BroadcastSettings {
            listener_buffer: env
                .parse(
                    "BRIDGE_LISTENER_BUFFER",
                    BroadcastSettings::default().listener_buffer,
                )
                .max(1),
        };

        let server = ServerSettings {
            http_port: env.parse("BRIDGE_HTTP_PORT", ServerSettings::default().http_port),
        };

        Ok(Self {
            gateway,
            session,
            reconnect,
            broadcast,
            server,
        })
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            gateway: GatewaySettings::default(),
            session: SessionSettings::default(),
            reconnect: ReconnectSettings::default(),
            broadcast: BroadcastSettings::default(),
            server: ServerSettings::default(),
        }
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// Environment variable has an unusable value.
    #[error("environment variable {key} has invalid value {value:?}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// Offending value.
        value: String,
    },
    /// Request and ticker id ranges are out of order.
    #[error("invalid id ranges: {0}")]
    IdLayout(#[from] IdLayoutError),
}

struct Env<'a, F>(&'a F);

impl<F: Fn(&str) -> Option<String>> Env<'_, F> {
    fn raw(&self, key: &str) -> Option<String> {
        (self.0)(key)
    }

    fn optional(&self, key: &str) -> Option<String> {
        self.raw(key).filter(|v| !v.trim().is_empty())
    }

    fn string(&self, key: &str, default: &str) -> String {
        self.optional(key).unwrap_or_else(|| default.to_string())
    }

    fn parse<T: std::str::FromStr>(&self, key: &str, default: T) -> T {
        self.optional(key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    fn flag(&self, key: &str, default: bool) -> bool {
        self.optional(key)
            .map_or(default, |v| match v.trim().to_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                _ => default,
            })
    }

    fn secs(&self, key: &str, default: Duration) -> Duration {
        self.optional(key)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map_or(default, Duration::from_secs)
    }

    fn millis(&self, key: &str, default: Duration) -> Duration {
        self.optional(key)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map_or(default, Duration::from_millis)
    }
}
