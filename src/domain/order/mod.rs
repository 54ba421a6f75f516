//! Order domain: outbound commands, acknowledgements, lifecycle tracking.

pub mod state;
pub mod wire;

use crate::error::CommandError;
use crate::shared::{serde_util, CommandId, Decimal, Side, TradingPair, VenueId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use state::OrderTracker;

/// Upper bound for `max_slippage_bps` (100%).
pub const MAX_SLIPPAGE_BPS: u32 = 10_000;

// ─── OrderType ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    Limit,
    Market,
}

impl std::fmt::Display for OrderType {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            OrderType::Limit => write!(f, "Limit"),
            OrderType::Market => write!(f, "Market"),
        }
    }
}

// ─── OrderStatus ─────────────────────────────────────────────────────────────

/// Order lifecycle. `Filled`, `Cancelled` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Submitted,
    PartiallyFilled,
    Filled,
    Cancelled,
    Failed,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Cancelled | OrderStatus::Failed
        )
    }
}

// ─── OrderCommand ────────────────────────────────────────────────────────────

/// A place-order command. Immutable once handed to the gateway; retries reuse `id`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderCommand {
    pub id: CommandId,
    pub trading_pair: TradingPair,
    pub venue: VenueId,
    pub side: Side,
    #[serde(rename = "type")]
    pub order_type: OrderType,
    #[serde(default, with = "serde_util::decimal_opt")]
    pub price: Option<Decimal>,
    #[serde(with = "serde_util::decimal")]
    pub size: Decimal,
    pub max_slippage_bps: u32,
}

impl OrderCommand {
    /// A limit order with a fresh id.
    pub fn limit(
        venue: impl Into<VenueId>,
        pair: impl Into<TradingPair>,
        side: Side,
        price: Decimal,
        size: Decimal,
    ) -> Self {
        Self {
            id: CommandId::generate(),
            trading_pair: pair.into(),
            venue: venue.into(),
            side,
            order_type: OrderType::Limit,
            price: Some(price),
            size,
            max_slippage_bps: 0,
        }
    }

    /// A market order with a fresh id.
    pub fn market(
        venue: impl Into<VenueId>,
        pair: impl Into<TradingPair>,
        side: Side,
        size: Decimal,
        max_slippage_bps: u32,
    ) -> Self {
        Self {
            id: CommandId::generate(),
            trading_pair: pair.into(),
            venue: venue.into(),
            side,
            order_type: OrderType::Market,
            price: None,
            size,
            max_slippage_bps,
        }
    }

    /// Price × size, when a price is known.
    pub fn notional(&self) -> Option<Decimal> {
        self.price.map(|p| p * self.size)
    }

    /// Parameter checks that do not depend on portfolio state.
    pub fn validate(&self) -> Result<(), CommandError> {
        if self.trading_pair.as_str().is_empty() {
            return Err(CommandError::Validation("trading pair is empty".into()));
        }
        if self.size <= Decimal::ZERO {
            return Err(CommandError::Validation(format!(
                "size must be positive, got {}",
                self.size
            )));
        }
        match (self.order_type, self.price) {
            (OrderType::Limit, None) => {
                return Err(CommandError::Validation("limit order requires a price".into()))
            }
            (_, Some(p)) if p <= Decimal::ZERO => {
                return Err(CommandError::Validation(format!(
                    "price must be positive, got {}",
                    p
                )))
            }
            _ => {}
        }
        if self.max_slippage_bps > MAX_SLIPPAGE_BPS {
            return Err(CommandError::Validation(format!(
                "max slippage {}bps exceeds {}bps",
                self.max_slippage_bps, MAX_SLIPPAGE_BPS
            )));
        }
        Ok(())
    }
}

// ─── Acknowledgement ─────────────────────────────────────────────────────────

/// Venue acknowledgement of a submitted command.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Acknowledgement {
    pub command_id: CommandId,
    #[serde(default)]
    pub venue_order_id: Option<String>,
    pub status: OrderStatus,
    #[serde(default, with = "serde_util::decimal_opt")]
    pub filled_size: Option<Decimal>,
    #[serde(default = "Utc::now", with = "serde_util::timestamp_ms")]
    pub received_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_limit_order_validates() {
        let cmd = OrderCommand::limit("drift", "SOL-USDC", Side::Bid, dec!(100), dec!(2));
        assert!(cmd.validate().is_ok());
        assert_eq!(cmd.notional(), Some(dec!(200)));
    }

    #[test]
    fn test_rejects_non_positive_size() {
        let cmd = OrderCommand::limit("drift", "SOL-USDC", Side::Bid, dec!(100), dec!(0));
        assert!(matches!(cmd.validate(), Err(CommandError::Validation(_))));
    }

    #[test]
    fn test_rejects_limit_without_price() {
        let mut cmd = OrderCommand::limit("drift", "SOL-USDC", Side::Ask, dec!(1), dec!(1));
        cmd.price = None;
        assert!(matches!(cmd.validate(), Err(CommandError::Validation(_))));
    }

    #[test]
    fn test_rejects_excess_slippage() {
        let cmd = OrderCommand::market("drift", "SOL-USDC", Side::Ask, dec!(1), 10_001);
        assert!(matches!(cmd.validate(), Err(CommandError::Validation(_))));
    }

    #[test]
    fn test_command_serde_shape() {
        let mut cmd = OrderCommand::limit("drift", "SOL-USDC", Side::Bid, dec!(101.5), dec!(3));
        cmd.id = CommandId::from("c-1");
        let json = serde_json::to_value(&cmd).unwrap();
        assert_eq!(json["id"], "c-1");
        assert_eq!(json["type"], "limit");
        assert_eq!(json["side"], "bid");
        assert_eq!(json["price"], "101.5");
        assert_eq!(json["size"], "3");
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(OrderStatus::Filled.is_terminal());
        assert!(OrderStatus::Cancelled.is_terminal());
        assert!(OrderStatus::Failed.is_terminal());
        assert!(!OrderStatus::Submitted.is_terminal());
    }
}
