//! Market data aggregator: order books, depth, candles, trades and tickers
//! built from routed envelopes.
//!
//! Runs on the same task as dispatch, so updates for a pair are applied in
//! accepted-sequence order. Rejected updates are logged and returned as
//! [`ProtocolError`]s; they never touch state.

use crate::domain::candle::{Candle, CandleBuilder, CandleUpdate};
use crate::domain::orderbook::{
    BookUpdate, MarketDepthPoint, OrderBook, OrderBookSnapshot, Ticker, TickerUpdate,
};
use crate::domain::trade::{Trade, TradeHistory, TradeUpdate};
use crate::error::ProtocolError;
use crate::shared::{CandleInterval, MarketKey, VenueId};
use crate::ws::RawEnvelope;
use serde::Deserialize;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct MarketDataConfig {
    /// Updates this much older than the latest accepted one are rejected.
    pub stale_threshold_ms: u64,
    pub candle_interval: CandleInterval,
    /// Sealed candles kept per pair.
    pub candle_history: usize,
    /// Trades kept per pair.
    pub trade_history: usize,
    /// Coalesce ticker updates per pair over this interval (last value wins).
    pub ticker_batch_ms: Option<u64>,
}

impl Default for MarketDataConfig {
    fn default() -> Self {
        Self {
            stale_threshold_ms: 5_000,
            candle_interval: CandleInterval::Minute1,
            candle_history: 500,
            trade_history: 200,
            ticker_batch_ms: None,
        }
    }
}

#[derive(Debug)]
pub struct MarketDataAggregator {
    config: MarketDataConfig,
    books: HashMap<MarketKey, OrderBook>,
    candles: HashMap<MarketKey, CandleBuilder>,
    trades: HashMap<MarketKey, TradeHistory>,
    tickers: HashMap<MarketKey, Ticker>,
}

impl Default for MarketDataAggregator {
    fn default() -> Self {
        Self::new(MarketDataConfig::default())
    }
}

impl MarketDataAggregator {
    pub fn new(config: MarketDataConfig) -> Self {
        Self {
            config,
            books: HashMap::new(),
            candles: HashMap::new(),
            trades: HashMap::new(),
            tickers: HashMap::new(),
        }
    }

    pub fn config(&self) -> &MarketDataConfig {
        &self.config
    }

    // ─── Order books ─────────────────────────────────────────────────────

    /// Apply an `ORDER_BOOK` envelope (snapshot replaces, delta merges).
    pub fn apply_book_update(
        &mut self,
        venue: &VenueId,
        envelope: &RawEnvelope,
    ) -> Result<OrderBookSnapshot, ProtocolError> {
        let update = envelope.decode::<BookUpdate>()?.payload;
        let is_snapshot = update.is_snapshot_kind(&envelope.kind);
        let key = MarketKey::new(venue.clone(), update.trading_pair.clone());
        let threshold_ms = self.config.stale_threshold_ms;

        let book = self
            .books
            .entry(key.clone())
            .or_insert_with(|| OrderBook::new(key.clone()));

        if let Some(latest) = book.timestamp() {
            let age_ms = (latest - envelope.timestamp).num_milliseconds();
            if age_ms > threshold_ms as i64 {
                tracing::warn!(%key, age_ms, threshold_ms, sequence = envelope.sequence, "Rejected stale book update");
                return Err(ProtocolError::Stale {
                    key,
                    age_ms,
                    threshold_ms,
                });
            }
        }

        if !is_snapshot {
            if !book.has_snapshot() {
                tracing::warn!(%key, sequence = envelope.sequence, "Delta before snapshot");
                return Err(ProtocolError::MissingSnapshot(key));
            }
            if book.needs_resync() {
                tracing::debug!(%key, sequence = envelope.sequence, "Delta refused while awaiting resync");
                return Err(ProtocolError::ResyncPending(key));
            }
        }

        if let Err((side, level)) = book.try_apply(&update, is_snapshot, envelope.sequence, envelope.timestamp) {
            tracing::warn!(%key, ?side, price = %level.price, size = %level.size, sequence = envelope.sequence, "Rejected book update with invalid level");
            return Err(ProtocolError::InvalidLevel {
                key,
                side,
                price: level.price,
                size: level.size,
            });
        }
        Ok(book.snapshot())
    }

    /// Mark every book of `venue` as needing a fresh snapshot. Returns the
    /// affected keys.
    pub fn mark_resync(&mut self, venue: &VenueId) -> Vec<MarketKey> {
        let mut keys: Vec<MarketKey> = self
            .books
            .iter_mut()
            .filter(|(key, book)| &key.venue == venue && book.has_snapshot())
            .map(|(key, book)| {
                book.mark_resync();
                key.clone()
            })
            .collect();
        keys.sort();
        if !keys.is_empty() {
            tracing::info!(venue = %venue, books = keys.len(), "Books marked for resync");
        }
        keys
    }

    pub fn book(&self, key: &MarketKey) -> Option<&OrderBook> {
        self.books.get(key)
    }

    pub fn snapshot(&self, key: &MarketKey) -> Option<OrderBookSnapshot> {
        self.books.get(key).map(OrderBook::snapshot)
    }

    /// Cumulative depth, bids then asks, at most `max_levels` per side.
    /// Computed on read and cached until the next write to the book.
    pub fn get_depth(&mut self, key: &MarketKey, max_levels: usize) -> Vec<MarketDepthPoint> {
        self.books
            .get_mut(key)
            .map(|book| book.depth().points(max_levels))
            .unwrap_or_default()
    }

    // ─── Trades / candles ────────────────────────────────────────────────

    /// Apply a `TRADE_UPDATE` envelope; returns the open candle.
    pub fn apply_trade(
        &mut self,
        venue: &VenueId,
        envelope: &RawEnvelope,
    ) -> Result<Candle, ProtocolError> {
        self.apply_trade_detailed(venue, envelope).map(|u| u.current)
    }

    /// Like [`apply_trade`](Self::apply_trade), also reporting a sealed
    /// candle and whether the trade was a replay.
    pub fn apply_trade_detailed(
        &mut self,
        venue: &VenueId,
        envelope: &RawEnvelope,
    ) -> Result<CandleUpdate, ProtocolError> {
        let update = envelope.decode::<TradeUpdate>()?.payload;
        let trade = Trade::from_update(venue.clone(), update, envelope.timestamp);
        let key = MarketKey::new(venue.clone(), trade.trading_pair.clone());

        let interval = self.config.candle_interval;
        let history = self.config.candle_history;
        let builder = self
            .candles
            .entry(key.clone())
            .or_insert_with(|| CandleBuilder::new(key.clone(), interval, history));

        let result = match builder.apply(&trade) {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(%key, error = %e, "Rejected trade");
                return Err(e);
            }
        };

        if result.duplicate {
            tracing::debug!(%key, "Ignored replayed trade");
        } else {
            let capacity = self.config.trade_history;
            self.trades
                .entry(key.clone())
                .or_insert_with(|| TradeHistory::new(key.pair.clone(), capacity))
                .push(trade);
        }
        if let Some(sealed) = &result.sealed {
            tracing::debug!(%key, period_start = sealed.period_start_ms(), volume = %sealed.volume, "Candle sealed");
        }
        Ok(result)
    }

    pub fn current_candle(&self, key: &MarketKey) -> Option<&Candle> {
        self.candles.get(key).and_then(CandleBuilder::current)
    }

    /// Sealed candles, newest first.
    pub fn candles(&self, key: &MarketKey, limit: usize) -> Vec<Candle> {
        self.candles
            .get(key)
            .map(|b| b.history(limit))
            .unwrap_or_default()
    }

    pub fn trades(&self, key: &MarketKey) -> Option<&TradeHistory> {
        self.trades.get(key)
    }

    // ─── Tickers ─────────────────────────────────────────────────────────

    /// Apply a `MARKET_DATA` ticker envelope.
    pub fn apply_ticker(
        &mut self,
        venue: &VenueId,
        envelope: &RawEnvelope,
    ) -> Result<Ticker, ProtocolError> {
        let update = envelope.decode::<TickerUpdate>()?.payload;
        let key = MarketKey::new(venue.clone(), update.trading_pair.clone());

        if let Some(previous) = self.tickers.get(&key) {
            let age_ms = (previous.updated_at - envelope.timestamp).num_milliseconds();
            if age_ms > self.config.stale_threshold_ms as i64 {
                tracing::warn!(%key, age_ms, "Rejected stale ticker");
                return Err(ProtocolError::Stale {
                    key,
                    age_ms,
                    threshold_ms: self.config.stale_threshold_ms,
                });
            }
        }

        let ticker = Ticker {
            trading_pair: update.trading_pair,
            venue: venue.clone(),
            best_bid: update.best_bid,
            best_ask: update.best_ask,
            last_price: update.last_price,
            volume_24h: update.volume_24h,
            updated_at: envelope.timestamp,
        };
        self.tickers.insert(key, ticker.clone());
        Ok(ticker)
    }

    pub fn ticker(&self, key: &MarketKey) -> Option<&Ticker> {
        self.tickers.get(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::orderbook::OrderBookLevel;
    use crate::shared::{Channel, Side};
    use chrono::{DateTime, Utc};
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn env(channel: Channel, kind: &str, seq: u64, ts_ms: i64, data: serde_json::Value) -> RawEnvelope {
        RawEnvelope {
            kind: kind.into(),
            channel,
            sequence: seq,
            timestamp: DateTime::<Utc>::from_timestamp_millis(ts_ms).unwrap(),
            payload: data,
        }
    }

    fn venue() -> VenueId {
        VenueId::from("venue")
    }

    fn key() -> MarketKey {
        MarketKey::new("venue", "BTC-USD")
    }

    fn snapshot_env(seq: u64, ts_ms: i64) -> RawEnvelope {
        env(
            Channel::OrderBook,
            "snapshot",
            seq,
            ts_ms,
            json!({"trading_pair": "BTC-USD", "bids": [{"price": "100", "size": "5"}], "asks": [{"price": "101", "size": "3"}]}),
        )
    }

    #[test]
    fn test_snapshot_then_zero_delta_removes_bid() {
        let mut agg = MarketDataAggregator::default();
        agg.apply_book_update(&venue(), &snapshot_env(1, 1_000)).unwrap();
        let delta = env(
            Channel::OrderBook,
            "delta",
            2,
            1_100,
            json!({"trading_pair": "BTC-USD", "bids": [{"price": "100", "size": "0"}]}),
        );
        let snap = agg.apply_book_update(&venue(), &delta).unwrap();
        assert!(snap.bids.is_empty());
        assert_eq!(snap.asks, vec![OrderBookLevel::new(dec!(101), dec!(3))]);
        assert_eq!(snap.sequence, 2);
    }

    #[test]
    fn test_stale_update_rejected_without_change() {
        let mut agg = MarketDataAggregator::default();
        agg.apply_book_update(&venue(), &snapshot_env(1, 10_000)).unwrap();
        let old = env(
            Channel::OrderBook,
            "delta",
            2,
            4_000,
            json!({"trading_pair": "BTC-USD", "bids": [{"price": "100", "size": "0"}]}),
        );
        let err = agg.apply_book_update(&venue(), &old).unwrap_err();
        assert!(matches!(err, ProtocolError::Stale { age_ms: 6_000, threshold_ms: 5_000, .. }));
        assert_eq!(agg.book(&key()).unwrap().best_bid(), Some(dec!(100)));
    }

    #[test]
    fn test_invalid_levels_reject_whole_update() {
        let mut agg = MarketDataAggregator::default();
        agg.apply_book_update(&venue(), &snapshot_env(1, 1_000)).unwrap();
        let before = agg.snapshot(&key()).unwrap();

        let delta = env(
            Channel::OrderBook,
            "delta",
            2,
            1_100,
            json!({
                "trading_pair": "BTC-USD",
                "bids": [{"price": "98", "size": "1"}, {"price": "99", "size": "-7"}],
                "asks": [{"price": "-5", "size": "1"}]
            }),
        );
        let err = agg.apply_book_update(&venue(), &delta).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidLevel { side: Side::Bid, .. }));
        assert_eq!(agg.snapshot(&key()).unwrap(), before);

        let zero_price = env(
            Channel::OrderBook,
            "snapshot",
            3,
            1_200,
            json!({"trading_pair": "BTC-USD", "asks": [{"price": "0", "size": "1"}]}),
        );
        assert!(matches!(
            agg.apply_book_update(&venue(), &zero_price),
            Err(ProtocolError::InvalidLevel { side: Side::Ask, .. })
        ));

        let depth = agg.get_depth(&key(), 10);
        assert!(depth.windows(2).filter(|w| w[0].side == w[1].side).all(|w| w[1].cumulative_size >= w[0].cumulative_size));
        let book = agg.book(&key()).unwrap();
        assert!(book.best_bid() < book.best_ask());
    }

    #[test]
    fn test_non_positive_trades_rejected() {
        let mut agg = MarketDataAggregator::default();
        let t = |seq, px: &str, sz: &str| {
            env(
                Channel::TradeUpdate,
                "trade",
                seq,
                1_000,
                json!({"trading_pair": "BTC-USD", "price": px, "size": sz, "side": "sell"}),
            )
        };
        agg.apply_trade(&venue(), &t(1, "100", "1")).unwrap();
        for (seq, px, sz) in [(2, "100", "0"), (3, "100", "-1"), (4, "0", "1"), (5, "-3", "1")] {
            let err = agg.apply_trade(&venue(), &t(seq, px, sz)).unwrap_err();
            assert!(matches!(err, ProtocolError::InvalidTrade { .. }), "{px}/{sz}: {err:?}");
        }
        let candle = agg.current_candle(&key()).unwrap();
        assert_eq!(candle.volume, dec!(1));
        assert_eq!(candle.trade_count, 1);
        assert_eq!(agg.trades(&key()).unwrap().len(), 1);
    }

    #[test]
    fn test_delta_before_snapshot_rejected() {
        let mut agg = MarketDataAggregator::default();
        let delta = env(
            Channel::OrderBook,
            "delta",
            1,
            0,
            json!({"trading_pair": "BTC-USD", "bids": [{"price": "1", "size": "1"}]}),
        );
        assert!(matches!(
            agg.apply_book_update(&venue(), &delta),
            Err(ProtocolError::MissingSnapshot(_))
        ));
    }

    #[test]
    fn test_resync_blocks_deltas_until_snapshot() {
        let mut agg = MarketDataAggregator::default();
        agg.apply_book_update(&venue(), &snapshot_env(1, 0)).unwrap();
        assert_eq!(agg.mark_resync(&venue()), vec![key()]);

        let delta = env(
            Channel::OrderBook,
            "delta",
            5,
            10,
            json!({"trading_pair": "BTC-USD", "asks": [{"price": "102", "size": "1"}]}),
        );
        assert!(matches!(
            agg.apply_book_update(&venue(), &delta),
            Err(ProtocolError::ResyncPending(_))
        ));
        agg.apply_book_update(&venue(), &snapshot_env(6, 20)).unwrap();
        agg.apply_book_update(&venue(), &delta).unwrap();
    }

    #[test]
    fn test_malformed_payload_is_protocol_error() {
        let mut agg = MarketDataAggregator::default();
        let bad = env(Channel::OrderBook, "snapshot", 1, 0, json!({"bids": "nope"}));
        assert!(matches!(
            agg.apply_book_update(&venue(), &bad),
            Err(ProtocolError::UnexpectedPayload { .. })
        ));
    }

    #[test]
    fn test_get_depth() {
        let mut agg = MarketDataAggregator::default();
        let snap = env(
            Channel::OrderBook,
            "snapshot",
            1,
            0,
            json!({
                "trading_pair": "BTC-USD",
                "bids": [{"price": "100", "size": "1"}, {"price": "99", "size": "2"}, {"price": "98", "size": "3"}],
                "asks": [{"price": "101", "size": "4"}]
            }),
        );
        agg.apply_book_update(&venue(), &snap).unwrap();
        let depth = agg.get_depth(&key(), 2);
        assert_eq!(depth.len(), 3);
        assert_eq!(depth[0].price, dec!(100));
        assert_eq!(depth[1].cumulative_size, dec!(3));
        assert_eq!(depth[2].side, Side::Ask);
        assert!(agg.get_depth(&MarketKey::new("venue", "ETH-USD"), 5).is_empty());
    }

    #[test]
    fn test_trades_build_candles_and_skip_replays() {
        let mut agg = MarketDataAggregator::default();
        let t = |seq, ts, px: &str, sz: &str| {
            env(
                Channel::TradeUpdate,
                "trade",
                seq,
                ts,
                json!({"trading_pair": "BTC-USD", "price": px, "size": sz, "side": "buy", "timestamp": ts}),
            )
        };
        agg.apply_trade(&venue(), &t(1, 1_000, "100", "1")).unwrap();
        agg.apply_trade(&venue(), &t(2, 2_000, "104", "2")).unwrap();
        let candle = agg.apply_trade(&venue(), &t(3, 2_000, "104", "2")).unwrap();
        assert_eq!(candle.volume, dec!(3));
        assert_eq!(candle.high, dec!(104));
        assert_eq!(agg.trades(&key()).unwrap().len(), 2);

        let update = agg.apply_trade_detailed(&venue(), &t(4, 61_000, "99", "1")).unwrap();
        assert_eq!(update.sealed.unwrap().close, dec!(104));
        assert_eq!(agg.candles(&key(), 10).len(), 1);

        let err = agg.apply_trade(&venue(), &t(5, 3_000, "98", "1")).unwrap_err();
        assert!(matches!(err, ProtocolError::LateTrade { .. }));
    }

    #[test]
    fn test_ticker() {
        let mut agg = MarketDataAggregator::default();
        let tick = env(
            Channel::MarketData,
            "ticker",
            1,
            0,
            json!({"trading_pair": "BTC-USD", "best_bid": "100", "best_ask": "102"}),
        );
        let ticker = agg.apply_ticker(&venue(), &tick).unwrap();
        assert_eq!(ticker.mid_price(), Some(dec!(101)));
        assert!(agg.ticker(&key()).is_some());
    }
}
