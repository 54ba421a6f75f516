//! Shared newtypes and utilities used across all domain modules.
//!
//! These types are serialization-transparent: they serialize/deserialize identically
//! to the raw format venues send, so they can be used directly in wire types
//! without conversion overhead.

pub mod serde_util;

pub use rust_decimal::Decimal;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::str::FromStr;

// ─── String newtypes ─────────────────────────────────────────────────────────

macro_rules! string_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(String);

        impl $name {
            pub fn new(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl FromStr for $name {
            type Err = std::convert::Infallible;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok($name(s.to_string()))
            }
        }

        impl Serialize for $name {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: Serializer,
            {
                serializer.serialize_str(&self.0)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: Deserializer<'de>,
            {
                let s = String::deserialize(deserializer)?;
                Ok($name(s))
            }
        }
    };
}

string_newtype!(
    /// Identifier of an external venue (exchange / DEX), e.g. `"drift"`.
    VenueId
);

string_newtype!(
    /// A trading pair symbol as the venue names it, e.g. `"SOL-USDC"`.
    TradingPair
);

string_newtype!(
    /// Client-generated command identifier. Doubles as the idempotency key
    /// on every attempt of the same command.
    CommandId
);

impl CommandId {
    /// A fresh random (v4 UUID) command id.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

/// A book or candle is keyed by venue and pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MarketKey {
    pub venue: VenueId,
    pub pair: TradingPair,
}

impl MarketKey {
    pub fn new(venue: impl Into<VenueId>, pair: impl Into<TradingPair>) -> Self {
        Self {
            venue: venue.into(),
            pair: pair.into(),
        }
    }
}

impl std::fmt::Display for MarketKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.venue, self.pair)
    }
}

// ─── Side ────────────────────────────────────────────────────────────────────

/// Order side: Bid (buy) or Ask (sell).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    #[serde(alias = "buy")]
    Bid,
    #[serde(alias = "sell")]
    Ask,
}

impl Side {
    pub fn opposite(&self) -> Side {
        match self {
            Side::Bid => Side::Ask,
            Side::Ask => Side::Bid,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Side::Bid => write!(f, "Buy"),
            Side::Ask => write!(f, "Sell"),
        }
    }
}

// ─── Channel ─────────────────────────────────────────────────────────────────

/// Recognized streaming channel types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Channel {
    MarketData,
    OrderBook,
    OrderUpdate,
    TradeUpdate,
    Heartbeat,
    Error,
}

impl Channel {
    pub const ALL: [Channel; 6] = [
        Channel::MarketData,
        Channel::OrderBook,
        Channel::OrderUpdate,
        Channel::TradeUpdate,
        Channel::Heartbeat,
        Channel::Error,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MarketData => "MARKET_DATA",
            Self::OrderBook => "ORDER_BOOK",
            Self::OrderUpdate => "ORDER_UPDATE",
            Self::TradeUpdate => "TRADE_UPDATE",
            Self::Heartbeat => "HEARTBEAT",
            Self::Error => "ERROR",
        }
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Channel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Channel::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| format!("Unknown channel: {}", s))
    }
}

// ─── CandleInterval ──────────────────────────────────────────────────────────

/// Fixed candle width.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CandleInterval {
    #[default]
    #[serde(rename = "1m")]
    Minute1,
    #[serde(rename = "5m")]
    Minute5,
    #[serde(rename = "15m")]
    Minute15,
    #[serde(rename = "1h")]
    Hour1,
    #[serde(rename = "4h")]
    Hour4,
    #[serde(rename = "1d")]
    Day1,
}

impl CandleInterval {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Minute1 => "1m",
            Self::Minute5 => "5m",
            Self::Minute15 => "15m",
            Self::Hour1 => "1h",
            Self::Hour4 => "4h",
            Self::Day1 => "1d",
        }
    }

    /// Duration of one candle in seconds.
    pub fn seconds(&self) -> u64 {
        match self {
            Self::Minute1 => 60,
            Self::Minute5 => 300,
            Self::Minute15 => 900,
            Self::Hour1 => 3600,
            Self::Hour4 => 14_400,
            Self::Day1 => 86400,
        }
    }

    pub fn millis(&self) -> i64 {
        self.seconds() as i64 * 1000
    }

    /// Start of the window containing `timestamp_ms`.
    pub fn window_start(&self, timestamp_ms: i64) -> i64 {
        timestamp_ms.div_euclid(self.millis()) * self.millis()
    }
}

impl std::fmt::Display for CandleInterval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
