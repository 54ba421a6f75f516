//! Portfolio domain: open positions and the snapshot used for risk checks.

use crate::shared::{serde_util, Decimal, Side, TradingPair, VenueId};
use serde::{Deserialize, Serialize};

// ─── Position ────────────────────────────────────────────────────────────────

/// An open position in one trading pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub venue: VenueId,
    pub trading_pair: TradingPair,
    pub side: Side,
    #[serde(with = "serde_util::decimal")]
    pub size: Decimal,
    #[serde(with = "serde_util::decimal")]
    pub entry_price: Decimal,
    #[serde(with = "serde_util::decimal")]
    pub mark_price: Decimal,
}

impl Position {
    /// Marked notional value (always non-negative).
    pub fn notional(&self) -> Decimal {
        (self.size * self.mark_price).abs()
    }

    pub fn unrealized_pnl(&self) -> Decimal {
        let diff = self.mark_price - self.entry_price;
        match self.side {
            Side::Bid => diff * self.size,
            Side::Ask => -diff * self.size,
        }
    }
}

// ─── PortfolioState ──────────────────────────────────────────────────────────

/// Point-in-time portfolio snapshot supplied by the caller.
///
/// `portfolio_value` already includes realized and unrealized P&L;
/// `peak_value` is the high-water mark used for drawdown.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PortfolioState {
    #[serde(with = "serde_util::decimal")]
    pub portfolio_value: Decimal,
    #[serde(with = "serde_util::decimal")]
    pub peak_value: Decimal,
    #[serde(default)]
    pub positions: Vec<Position>,
}

impl PortfolioState {
    pub fn new(portfolio_value: Decimal) -> Self {
        Self {
            portfolio_value,
            peak_value: portfolio_value,
            positions: Vec::new(),
        }
    }

    pub fn with_position(mut self, position: Position) -> Self {
        self.positions.push(position);
        self
    }

    pub fn position(&self, venue: &VenueId, pair: &TradingPair) -> Option<&Position> {
        self.positions
            .iter()
            .find(|p| &p.venue == venue && &p.trading_pair == pair)
    }

    /// Sum of absolute marked notionals across all positions.
    pub fn gross_exposure(&self) -> Decimal {
        self.positions.iter().map(Position::notional).sum()
    }

    pub fn unrealized_pnl(&self) -> Decimal {
        self.positions.iter().map(Position::unrealized_pnl).sum()
    }

    /// Percentage below the high-water mark, floored at zero.
    pub fn drawdown_percent(&self) -> Decimal {
        if self.peak_value <= Decimal::ZERO || self.portfolio_value >= self.peak_value {
            return Decimal::ZERO;
        }
        (self.peak_value - self.portfolio_value) / self.peak_value * Decimal::ONE_HUNDRED
    }

    pub fn open_position_count(&self) -> usize {
        self.positions
            .iter()
            .filter(|p| !p.size.is_zero())
            .count()
    }
}
