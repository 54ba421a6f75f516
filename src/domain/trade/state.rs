//! Trade state containers.

use super::Trade;
use crate::shared::TradingPair;
use std::collections::VecDeque;

/// Rolling trade history for one pair, most recent first.
#[derive(Debug, Clone)]
pub struct TradeHistory {
    pub trading_pair: TradingPair,
    trades: VecDeque<Trade>,
    max_size: usize,
}

impl TradeHistory {
    pub fn new(trading_pair: TradingPair, max_size: usize) -> Self {
        let max_size = max_size.max(1);
        Self {
            trading_pair,
            trades: VecDeque::with_capacity(max_size),
            max_size,
        }
    }

    /// Push a new trade, evicting the oldest if at capacity.
    pub fn push(&mut self, trade: Trade) {
        if self.trades.len() >= self.max_size {
            self.trades.pop_back();
        }
        self.trades.push_front(trade);
    }

    pub fn trades(&self) -> &VecDeque<Trade> {
        &self.trades
    }

    pub fn latest(&self) -> Option<&Trade> {
        self.trades.front()
    }

    pub fn clear(&mut self) {
        self.trades.clear();
    }

    pub fn len(&self) -> usize {
        self.trades.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trades.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::{Side, VenueId};
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn make_trade(id: &str) -> Trade {
        Trade {
            venue: VenueId::from("v"),
            trading_pair: TradingPair::from("BTC-USD"),
            trade_id: Some(id.to_string()),
            timestamp: Utc::now(),
            price: dec!(50),
            size: dec!(1),
            side: Side::Bid,
        }
    }

    #[test]
    fn test_push_adds_trades() {
        let mut th = TradeHistory::new(TradingPair::from("BTC-USD"), 10);
        th.push(make_trade("t1"));
        th.push(make_trade("t2"));
        assert_eq!(th.len(), 2);
        assert_eq!(th.latest().unwrap().trade_id.as_deref(), Some("t2"));
    }

    #[test]
    fn test_rolling_buffer_evicts_oldest() {
        let mut th = TradeHistory::new(TradingPair::from("BTC-USD"), 3);
        for id in ["t1", "t2", "t3", "t4"] {
            th.push(make_trade(id));
        }
        assert_eq!(th.len(), 3);
        let ids: Vec<_> = th
            .trades()
            .iter()
            .filter_map(|t| t.trade_id.as_deref())
            .collect();
        assert_eq!(ids, ["t4", "t3", "t2"]);
    }
}
