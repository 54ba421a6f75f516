//! Order-book state container: snapshot replace, delta merge, lazy depth.

use super::depth::MarketDepth;
use super::wire::{BookUpdate, WireLevel};
use super::{OrderBookLevel, OrderBookSnapshot};
use crate::shared::{Decimal, MarketKey, Side};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// Live order book for one venue + pair.
///
/// Prices are `BTreeMap` keys, so bids and asks stay sorted and unique
/// without explicit re-sorting. Zero sizes are never stored.
#[derive(Debug, Clone)]
pub struct OrderBook {
    key: MarketKey,
    sequence: u64,
    timestamp: Option<DateTime<Utc>>,
    bids: BTreeMap<Decimal, Decimal>,
    asks: BTreeMap<Decimal, Decimal>,
    has_snapshot: bool,
    needs_resync: bool,
    depth: Option<MarketDepth>,
}

impl OrderBook {
    pub fn new(key: MarketKey) -> Self {
        Self {
            key,
            sequence: 0,
            timestamp: None,
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
            has_snapshot: false,
            needs_resync: false,
            depth: None,
        }
    }

    pub fn key(&self) -> &MarketKey {
        &self.key
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Timestamp of the latest accepted update.
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.timestamp
    }

    pub fn has_snapshot(&self) -> bool {
        self.has_snapshot
    }

    /// Set after a sequence gap; deltas are refused until the next snapshot.
    pub fn needs_resync(&self) -> bool {
        self.needs_resync
    }

    pub fn mark_resync(&mut self) {
        self.needs_resync = true;
    }

    /// Validate, then apply. An update carrying a non-positive price or a
    /// negative size is refused whole and the book is left untouched.
    pub fn try_apply(
        &mut self,
        update: &BookUpdate,
        is_snapshot: bool,
        sequence: u64,
        timestamp: DateTime<Utc>,
    ) -> Result<(), (Side, WireLevel)> {
        if let Some(invalid) = update.first_invalid_level() {
            return Err(invalid);
        }
        self.apply(update, is_snapshot, sequence, timestamp);
        Ok(())
    }

    /// Apply an update (snapshot replaces, delta merges). Levels are assumed
    /// valid; see [`try_apply`](Self::try_apply).
    pub fn apply(
        &mut self,
        update: &BookUpdate,
        is_snapshot: bool,
        sequence: u64,
        timestamp: DateTime<Utc>,
    ) {
        if is_snapshot {
            self.bids.clear();
            self.asks.clear();
            self.has_snapshot = true;
            self.needs_resync = false;
        }

        merge(&mut self.bids, &update.bids);
        merge(&mut self.asks, &update.asks);

        self.sequence = sequence;
        self.timestamp = Some(timestamp);
        self.depth = None;
    }

    /// Bids keyed by price; iterate in reverse for best-first.
    pub fn bids(&self) -> &BTreeMap<Decimal, Decimal> {
        &self.bids
    }

    pub fn asks(&self) -> &BTreeMap<Decimal, Decimal> {
        &self.asks
    }

    pub fn best_bid(&self) -> Option<Decimal> {
        self.bids.keys().next_back().copied()
    }

    pub fn best_ask(&self) -> Option<Decimal> {
        self.asks.keys().next().copied()
    }

    /// Mid price (average of best bid and best ask).
    pub fn mid_price(&self) -> Option<Decimal> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some((bid + ask) / Decimal::from(2)),
            _ => None,
        }
    }

    /// Spread between best ask and best bid.
    pub fn spread(&self) -> Option<Decimal> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some(ask - bid),
            _ => None,
        }
    }

    /// Best `n` bids, highest first.
    pub fn top_bids(&self, n: usize) -> Vec<OrderBookLevel> {
        self.bids
            .iter()
            .rev()
            .take(n)
            .map(|(p, s)| OrderBookLevel::new(*p, *s))
            .collect()
    }

    /// Best `n` asks, lowest first.
    pub fn top_asks(&self, n: usize) -> Vec<OrderBookLevel> {
        self.asks
            .iter()
            .take(n)
            .map(|(p, s)| OrderBookLevel::new(*p, *s))
            .collect()
    }

    /// Depth curve, computed on first read after a write.
    pub fn depth(&mut self) -> &MarketDepth {
        let (bids, asks) = (&self.bids, &self.asks);
        self.depth
            .get_or_insert_with(|| MarketDepth::from_levels(bids.iter().rev(), asks.iter()))
    }

    pub fn depth_is_cached(&self) -> bool {
        self.depth.is_some()
    }

    /// Immutable copy for consumers.
    pub fn snapshot(&self) -> OrderBookSnapshot {
        OrderBookSnapshot {
            trading_pair: self.key.pair.clone(),
            venue: self.key.venue.clone(),
            bids: self.top_bids(usize::MAX),
            asks: self.top_asks(usize::MAX),
            timestamp: self.timestamp.unwrap_or_else(Utc::now),
            sequence: self.sequence,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.bids.is_empty() && self.asks.is_empty()
    }

    pub fn clear(&mut self) {
        self.bids.clear();
        self.asks.clear();
        self.sequence = 0;
        self.timestamp = None;
        self.has_snapshot = false;
        self.depth = None;
    }
}

fn merge(side: &mut BTreeMap<Decimal, Decimal>, levels: &[WireLevel]) {
    for level in levels {
        if level.size.is_zero() {
            side.remove(&level.price);
        } else {
            side.insert(level.price, level.size);
        }
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use crate::shared::TradingPair;
    use proptest::prelude::*;

    fn level() -> impl Strategy<Value = (i64, i64)> {
        // Price in cents, size in hundredths; zero sizes exercise removal.
        (1i64..5_000, 0i64..500)
    }

    /// Mostly valid levels, with the occasional non-positive price or
    /// negative size.
    fn any_level() -> impl Strategy<Value = (i64, i64)> {
        prop_oneof![
            8 => level(),
            1 => (-5_000i64..=0, 0i64..500),
            1 => (1i64..5_000, -500i64..0),
        ]
    }

    fn to_update(bids: Vec<(i64, i64)>, asks: Vec<(i64, i64)>) -> BookUpdate {
        let conv = |v: Vec<(i64, i64)>| {
            v.into_iter()
                .map(|(p, s)| WireLevel::new(Decimal::new(p, 2), Decimal::new(s, 2)))
                .collect()
        };
        BookUpdate {
            trading_pair: TradingPair::from("BTC-USD"),
            is_snapshot: false,
            bids: conv(bids),
            asks: conv(asks),
        }
    }

    proptest! {
        #[test]
        fn prop_deltas_preserve_book_invariants(
            snapshot in (prop::collection::vec(level(), 0..20), prop::collection::vec(level(), 0..20)),
            deltas in prop::collection::vec(
                (prop::collection::vec(any_level(), 0..8), prop::collection::vec(any_level(), 0..8)),
                0..30,
            ),
        ) {
            let mut ob = OrderBook::new(MarketKey::new("venue", "BTC-USD"));
            prop_assert!(ob.try_apply(&to_update(snapshot.0, snapshot.1), true, 0, Utc::now()).is_ok());
            for (seq, (bids, asks)) in deltas.into_iter().enumerate() {
                let update = to_update(bids, asks);
                let before = ob.snapshot();
                match ob.try_apply(&update, false, seq as u64 + 1, Utc::now()) {
                    Ok(()) => {
                        prop_assert!(update.bids.iter().chain(&update.asks).all(WireLevel::is_valid));
                    }
                    Err((_, level)) => {
                        prop_assert!(!level.is_valid());
                        prop_assert_eq!(&ob.snapshot(), &before);
                    }
                }
                let snap = ob.snapshot();
                prop_assert!(snap.is_well_formed());
                let depth = ob.depth();
                for side in [&depth.bids, &depth.asks] {
                    prop_assert!(side.windows(2).all(|w| w[1].cumulative_size > w[0].cumulative_size));
                }
            }
        }
    }
}
