//! Wire type for `TRADE_UPDATE` payloads.

use crate::shared::{serde_util, CommandId, Decimal, Side, TradingPair};
use serde::{Deserialize, Serialize};

/// A public trade print, or a fill of one of our own orders when
/// `command_id` is present.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TradeUpdate {
    pub trading_pair: TradingPair,
    #[serde(with = "serde_util::decimal")]
    pub price: Decimal,
    #[serde(alias = "volume", alias = "quantity", with = "serde_util::decimal")]
    pub size: Decimal,
    pub side: Side,
    /// Epoch millis. Falls back to the envelope timestamp when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trade_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command_id: Option<CommandId>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_trade_update_parses_aliases() {
        let json = r#"{"trading_pair":"BTC-USD","price":"100.5","volume":2,"side":"buy","timestamp":1700000000000}"#;
        let trade: TradeUpdate = serde_json::from_str(json).unwrap();
        assert_eq!(trade.price, dec!(100.5));
        assert_eq!(trade.size, dec!(2));
        assert_eq!(trade.side, Side::Bid);
        assert_eq!(trade.timestamp, Some(1_700_000_000_000));
        assert!(trade.trade_id.is_none());
    }
}
