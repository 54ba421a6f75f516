//! Session configuration.
//!
//! One canonical [`VenueConfig`] per venue holds every tunable for that venue:
//! connection timeouts and backoff, router windows, market-data thresholds and
//! the gateway's breaker/retry settings. Risk limits are portfolio-wide.
//!
//! Sources, later overriding earlier:
//! 1. built-in defaults
//! 2. a TOML file
//! 3. `VENUE_SESSION__*` environment variables (`__` separates nesting levels,
//!    e.g. `VENUE_SESSION__VENUES__DRIFT__CONNECTION__HEARTBEAT_INTERVAL_MS`)

use crate::error::ConfigError;
use crate::gateway::GatewayConfig;
use crate::market::MarketDataConfig;
use crate::risk::RiskLimits;
use crate::router::RouterConfig;
use crate::shared::{Channel, VenueId};
use crate::ws::ConnectionConfig;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

const ENV_PREFIX: &str = "VENUE_SESSION";

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub risk: RiskLimits,
    /// Keyed by venue id.
    pub venues: BTreeMap<String, VenueConfig>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct VenueConfig {
    pub ws_url: String,
    /// Command endpoint. Without one the venue is stream-only.
    #[serde(default)]
    pub rest_url: Option<String>,
    /// Channels subscribed when the session starts.
    #[serde(default = "default_channels")]
    pub channels: Vec<Channel>,
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub router: RouterConfig,
    #[serde(default)]
    pub market: MarketDataConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
}

fn default_channels() -> Vec<Channel> {
    vec![
        Channel::MarketData,
        Channel::OrderBook,
        Channel::TradeUpdate,
        Channel::OrderUpdate,
    ]
}

impl VenueConfig {
    pub fn new(ws_url: impl Into<String>) -> Self {
        Self {
            ws_url: ws_url.into(),
            rest_url: None,
            channels: default_channels(),
            connection: ConnectionConfig::default(),
            router: RouterConfig::default(),
            market: MarketDataConfig::default(),
            gateway: GatewayConfig::default(),
        }
    }

    pub fn with_rest_url(mut self, url: impl Into<String>) -> Self {
        self.rest_url = Some(url.into());
        self
    }

    pub fn validate(&self, id: &str) -> Result<(), ConfigError> {
        let field = |name: &str| format!("venues.{}.{}", id, name);

        if !(self.ws_url.starts_with("ws://") || self.ws_url.starts_with("wss://")) {
            return Err(ConfigError::invalid(field("ws_url"), "must be a ws:// or wss:// URL"));
        }
        if let Some(rest) = &self.rest_url {
            if !(rest.starts_with("http://") || rest.starts_with("https://")) {
                return Err(ConfigError::invalid(field("rest_url"), "must be an http(s) URL"));
            }
        }

        let c = &self.connection;
        for (name, value) in [
            ("connection.connect_timeout_ms", c.connect_timeout_ms),
            ("connection.heartbeat_interval_ms", c.heartbeat_interval_ms),
            ("connection.heartbeat_timeout_ms", c.heartbeat_timeout_ms),
            ("connection.reconnect.base_delay_ms", c.reconnect.base_delay_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::invalid(field(name), "must be > 0"));
            }
        }
        if c.reconnect.backoff_factor < 1.0 {
            return Err(ConfigError::invalid(
                field("connection.reconnect.backoff_factor"),
                "must be >= 1",
            ));
        }
        if c.reconnect.max_delay_ms < c.reconnect.base_delay_ms {
            return Err(ConfigError::invalid(
                field("connection.reconnect.max_delay_ms"),
                "must be >= base_delay_ms",
            ));
        }
        if c.replay_queue_capacity == 0 {
            return Err(ConfigError::invalid(field("connection.replay_queue_capacity"), "must be > 0"));
        }
        if self.router.dedupe_window == 0 {
            return Err(ConfigError::invalid(field("router.dedupe_window"), "must be > 0"));
        }
        if self.market.stale_threshold_ms == 0 {
            return Err(ConfigError::invalid(field("market.stale_threshold_ms"), "must be > 0"));
        }
        self.gateway
            .validate()
            .map_err(|e| match e {
                ConfigError::Invalid { field: f, reason } => ConfigError::invalid(field(&f), reason),
                other => other,
            })
    }
}

impl SessionConfig {
    /// Load from a TOML file layered with `VENUE_SESSION__*` overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        let parsed: SessionConfig = settings.try_deserialize()?;
        parsed.validate()?;
        Ok(parsed)
    }

    /// Parse an embedded TOML document. Environment overrides are not applied.
    pub fn from_toml_str(toml: &str) -> Result<Self, ConfigError> {
        let settings = config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()?;
        let parsed: SessionConfig = settings.try_deserialize()?;
        parsed.validate()?;
        Ok(parsed)
    }

    pub fn venue(&self, id: &VenueId) -> Result<&VenueConfig, ConfigError> {
        self.venues
            .get(id.as_str())
            .ok_or_else(|| ConfigError::UnknownVenue(id.to_string()))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.venues.is_empty() {
            return Err(ConfigError::invalid("venues", "at least one venue is required"));
        }
        for (id, venue) in &self.venues {
            venue.validate(id)?;
        }
        if self.risk.max_position_size_percent <= crate::shared::Decimal::ZERO {
            return Err(ConfigError::invalid("risk.max_position_size_percent", "must be > 0"));
        }
        if self.risk.max_exposure_ratio <= crate::shared::Decimal::ZERO {
            return Err(ConfigError::invalid("risk.max_exposure_ratio", "must be > 0"));
        }
        Ok(())
    }
}
