//! Wire types for `ORDER_BOOK` and `MARKET_DATA` payloads.

use crate::shared::{serde_util, Decimal, Side, TradingPair};
use serde::{Deserialize, Serialize};

/// `ORDER_BOOK` payload: a full snapshot or an incremental delta.
///
/// A delta level with `size == 0` removes that price.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BookUpdate {
    pub trading_pair: TradingPair,
    #[serde(default, alias = "snapshot")]
    pub is_snapshot: bool,
    #[serde(default)]
    pub bids: Vec<WireLevel>,
    #[serde(default)]
    pub asks: Vec<WireLevel>,
}

impl BookUpdate {
    /// The envelope `type` may carry the snapshot flag instead of the payload.
    pub fn is_snapshot_kind(&self, envelope_kind: &str) -> bool {
        self.is_snapshot || envelope_kind.eq_ignore_ascii_case("snapshot")
    }

    /// First level with a non-positive price or a negative size.
    pub fn first_invalid_level(&self) -> Option<(Side, WireLevel)> {
        let bids = self.bids.iter().map(|l| (Side::Bid, *l));
        let asks = self.asks.iter().map(|l| (Side::Ask, *l));
        bids.chain(asks).find(|(_, level)| !level.is_valid())
    }
}

/// One price level as sent by the venue. Decimals may be strings or numbers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct WireLevel {
    #[serde(with = "serde_util::decimal")]
    pub price: Decimal,
    #[serde(with = "serde_util::decimal")]
    pub size: Decimal,
}

impl WireLevel {
    pub fn new(price: Decimal, size: Decimal) -> Self {
        Self { price, size }
    }

    /// Price must be positive. Size zero removes the level.
    pub fn is_valid(&self) -> bool {
        self.price > Decimal::ZERO && self.size >= Decimal::ZERO
    }
}

impl From<(Decimal, Decimal)> for WireLevel {
    fn from((price, size): (Decimal, Decimal)) -> Self {
        Self { price, size }
    }
}

/// `MARKET_DATA` ticker payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TickerUpdate {
    pub trading_pair: TradingPair,
    #[serde(default, with = "serde_util::decimal_opt")]
    pub best_bid: Option<Decimal>,
    #[serde(default, with = "serde_util::decimal_opt")]
    pub best_ask: Option<Decimal>,
    #[serde(default, alias = "price", with = "serde_util::decimal_opt")]
    pub last_price: Option<Decimal>,
    #[serde(default, alias = "volume", with = "serde_util::decimal_opt")]
    pub volume_24h: Option<Decimal>,
}
