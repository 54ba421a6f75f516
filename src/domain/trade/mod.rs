//! Trade domain: executed trades and rolling history.

pub mod state;
pub mod wire;

use crate::shared::{serde_util, Decimal, Side, TradingPair, VenueId};
use chrono::{DateTime, Utc};
use serde::Serialize;

pub use state::TradeHistory;
pub use wire::TradeUpdate;

/// A trade execution record.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Trade {
    pub venue: VenueId,
    pub trading_pair: TradingPair,
    pub trade_id: Option<String>,
    #[serde(with = "serde_util::timestamp_ms")]
    pub timestamp: DateTime<Utc>,
    pub price: Decimal,
    pub size: Decimal,
    pub side: Side,
}

/// Identity used to recognise a replayed trade: pair, time, price, size.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TradeFingerprint {
    pub trading_pair: TradingPair,
    pub timestamp_ms: i64,
    pub price: Decimal,
    pub size: Decimal,
}

impl Trade {
    /// Build from a wire update, using `fallback_ts` when the payload has no time.
    pub fn from_update(venue: VenueId, update: TradeUpdate, fallback_ts: DateTime<Utc>) -> Self {
        let timestamp = update
            .timestamp
            .and_then(DateTime::<Utc>::from_timestamp_millis)
            .unwrap_or(fallback_ts);
        Self {
            venue,
            trading_pair: update.trading_pair,
            trade_id: update.trade_id,
            timestamp,
            price: update.price,
            size: update.size,
            side: update.side,
        }
    }

    pub fn fingerprint(&self) -> TradeFingerprint {
        TradeFingerprint {
            trading_pair: self.trading_pair.clone(),
            timestamp_ms: self.timestamp.timestamp_millis(),
            // normalize so 1.50 and 1.5 compare equal
            price: self.price.normalize(),
            size: self.size.normalize(),
        }
    }

    pub fn timestamp_ms(&self) -> i64 {
        self.timestamp.timestamp_millis()
    }
}
