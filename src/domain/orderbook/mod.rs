//! Order-book domain: levels, immutable snapshots, live state and depth.

pub mod depth;
pub mod state;
pub mod wire;

pub use depth::{MarketDepth, MarketDepthPoint};
pub use state::OrderBook;
pub use wire::{BookUpdate, TickerUpdate, WireLevel};

use crate::shared::{serde_util, Decimal, TradingPair, VenueId};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// A single price level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct OrderBookLevel {
    pub price: Decimal,
    pub size: Decimal,
}

impl OrderBookLevel {
    pub fn new(price: Decimal, size: Decimal) -> Self {
        Self { price, size }
    }
}

/// Point-in-time copy of a book. Bids descending, asks ascending.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderBookSnapshot {
    pub trading_pair: TradingPair,
    pub venue: VenueId,
    pub bids: Vec<OrderBookLevel>,
    pub asks: Vec<OrderBookLevel>,
    #[serde(with = "serde_util::timestamp_ms")]
    pub timestamp: DateTime<Utc>,
    pub sequence: u64,
}

impl OrderBookSnapshot {
    pub fn best_bid(&self) -> Option<Decimal> {
        self.bids.first().map(|l| l.price)
    }

    pub fn best_ask(&self) -> Option<Decimal> {
        self.asks.first().map(|l| l.price)
    }

    /// Bids strictly descending, asks strictly ascending, prices and sizes
    /// positive.
    pub fn is_well_formed(&self) -> bool {
        let positive = self
            .bids
            .iter()
            .chain(self.asks.iter())
            .all(|l| l.size > Decimal::ZERO && l.price > Decimal::ZERO);
        let bids_desc = self.bids.windows(2).all(|w| w[0].price > w[1].price);
        let asks_asc = self.asks.windows(2).all(|w| w[0].price < w[1].price);
        positive && bids_desc && asks_asc
    }
}

/// Best bid/ask/last for a pair, from `MARKET_DATA`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Ticker {
    pub trading_pair: TradingPair,
    pub venue: VenueId,
    pub best_bid: Option<Decimal>,
    pub best_ask: Option<Decimal>,
    pub last_price: Option<Decimal>,
    pub volume_24h: Option<Decimal>,
    #[serde(with = "serde_util::timestamp_ms")]
    pub updated_at: DateTime<Utc>,
}

impl Ticker {
    /// Mid price (average of best bid and best ask).
    pub fn mid_price(&self) -> Option<Decimal> {
        match (self.best_bid, self.best_ask) {
            (Some(bid), Some(ask)) => Some((bid + ask) / Decimal::from(2)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn snap(bids: &[(Decimal, Decimal)], asks: &[(Decimal, Decimal)]) -> OrderBookSnapshot {
        OrderBookSnapshot {
            trading_pair: TradingPair::from("BTC-USD"),
            venue: VenueId::from("venue"),
            bids: bids.iter().map(|&(p, s)| OrderBookLevel::new(p, s)).collect(),
            asks: asks.iter().map(|&(p, s)| OrderBookLevel::new(p, s)).collect(),
            timestamp: Utc::now(),
            sequence: 1,
        }
    }

    #[test]
    fn test_well_formed() {
        let ok = snap(&[(dec!(100), dec!(1)), (dec!(99), dec!(2))], &[(dec!(101), dec!(1))]);
        assert!(ok.is_well_formed());
        assert_eq!(ok.best_bid(), Some(dec!(100)));
        assert_eq!(ok.best_ask(), Some(dec!(101)));

        assert!(!snap(&[(dec!(99), dec!(1)), (dec!(100), dec!(1))], &[]).is_well_formed());
        assert!(!snap(&[], &[(dec!(101), dec!(0))]).is_well_formed());
    }
}
