//! OHLCV candles built from trades.
//!
//! Windows are aligned to the epoch. The open candle is mutated in place; once
//! a trade lands in a later window it is sealed into bounded history and never
//! touched again.

use crate::domain::trade::{Trade, TradeFingerprint};
use crate::error::ProtocolError;
use crate::shared::{serde_util, CandleInterval, Decimal, MarketKey};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};

/// A single OHLCV candle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Candle {
    pub interval: CandleInterval,
    #[serde(with = "serde_util::timestamp_ms")]
    pub period_start: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub trade_count: u64,
}

impl Candle {
    fn open_with(interval: CandleInterval, period_start: DateTime<Utc>, price: Decimal, size: Decimal) -> Self {
        Self {
            interval,
            period_start,
            open: price,
            high: price,
            low: price,
            close: price,
            volume: size,
            trade_count: 1,
        }
    }

    fn update(&mut self, price: Decimal, size: Decimal) {
        if price > self.high {
            self.high = price;
        }
        if price < self.low {
            self.low = price;
        }
        self.close = price;
        self.volume += size;
        self.trade_count += 1;
    }

    pub fn period_start_ms(&self) -> i64 {
        self.period_start.timestamp_millis()
    }

    /// OHLCV invariants.
    pub fn is_valid(&self) -> bool {
        self.high >= self.open
            && self.high >= self.close
            && self.high >= self.low
            && self.low <= self.open
            && self.low <= self.close
            && self.volume >= Decimal::ZERO
    }
}

/// What happened when a trade was applied.
#[derive(Debug, Clone, PartialEq)]
pub struct CandleUpdate {
    /// The open candle after the trade.
    pub current: Candle,
    /// The candle sealed by this trade, if it opened a new window.
    pub sealed: Option<Candle>,
    /// The trade was a replay and was not counted.
    pub duplicate: bool,
}

/// Builds candles for one interval on one venue + pair.
#[derive(Debug, Clone)]
pub struct CandleBuilder {
    key: MarketKey,
    interval: CandleInterval,
    current: Option<Candle>,
    /// Fingerprints of trades counted in the open window.
    seen: HashSet<TradeFingerprint>,
    sealed: BTreeMap<i64, Candle>,
    last_sealed_start: Option<i64>,
    max_history: usize,
}

impl CandleBuilder {
    pub fn new(key: MarketKey, interval: CandleInterval, max_history: usize) -> Self {
        Self {
            key,
            interval,
            current: None,
            seen: HashSet::new(),
            sealed: BTreeMap::new(),
            last_sealed_start: None,
            max_history: max_history.max(1),
        }
    }

    pub fn interval(&self) -> CandleInterval {
        self.interval
    }

    /// Apply a trade. Trades for an already sealed window, or with a
    /// non-positive price or size, are rejected.
    pub fn apply(&mut self, trade: &Trade) -> Result<CandleUpdate, ProtocolError> {
        if trade.price <= Decimal::ZERO || trade.size <= Decimal::ZERO {
            return Err(ProtocolError::InvalidTrade {
                key: self.key.clone(),
                price: trade.price,
                size: trade.size,
            });
        }
        let window = self.interval.window_start(trade.timestamp_ms());

        let current_start = self.current.as_ref().map(Candle::period_start_ms);
        let newest_start = current_start.or(self.last_sealed_start);
        if newest_start.is_some_and(|start| window < start)
            || (current_start.is_none() && self.last_sealed_start == Some(window))
        {
            return Err(ProtocolError::LateTrade {
                key: self.key.clone(),
                window_start: window,
            });
        }

        let mut sealed = None;
        if current_start.is_some_and(|start| window > start) {
            sealed = self.seal_current();
        }

        let is_new = self.seen.insert(trade.fingerprint());
        let current = match self.current.as_mut() {
            Some(candle) => {
                if is_new {
                    candle.update(trade.price, trade.size);
                }
                candle.clone()
            }
            None => {
                let start = DateTime::<Utc>::from_timestamp_millis(window).unwrap_or(trade.timestamp);
                let candle = Candle::open_with(self.interval, start, trade.price, trade.size);
                self.current = Some(candle.clone());
                candle
            }
        };

        Ok(CandleUpdate {
            current,
            sealed,
            duplicate: !is_new,
        })
    }

    /// Force-close the open candle.
    pub fn seal_current(&mut self) -> Option<Candle> {
        let candle = self.current.take()?;
        let start = candle.period_start_ms();
        self.seen.clear();
        self.last_sealed_start = Some(start);
        self.sealed.insert(start, candle.clone());
        while self.sealed.len() > self.max_history {
            self.sealed.pop_first();
        }
        Some(candle)
    }

    pub fn current(&self) -> Option<&Candle> {
        self.current.as_ref()
    }

    /// Most recent sealed candles, newest first.
    pub fn history(&self, limit: usize) -> Vec<Candle> {
        self.sealed.values().rev().take(limit).cloned().collect()
    }
}
