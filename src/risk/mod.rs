//! Pre-trade risk validation.
//!
//! A synchronous gate consulted before every submit. Limits are read-only
//! inputs; a failing check is reported, never clamped.

use crate::domain::order::OrderCommand;
use crate::domain::portfolio::PortfolioState;
use crate::shared::{serde_util, Decimal, Side};
use serde::{Deserialize, Serialize};

/// Desk defaults: 20% per position, 0.8 exposure, 15% drawdown, 10 open positions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskLimits {
    #[serde(with = "serde_util::decimal")]
    pub max_position_size_percent: Decimal,
    #[serde(with = "serde_util::decimal")]
    pub max_exposure_ratio: Decimal,
    #[serde(with = "serde_util::decimal")]
    pub max_drawdown_percent: Decimal,
    pub max_open_positions: Option<usize>,
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self {
            max_position_size_percent: Decimal::from(20),
            max_exposure_ratio: Decimal::new(8, 1),
            max_drawdown_percent: Decimal::from(15),
            max_open_positions: Some(10),
        }
    }
}

/// Which limit a command breached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RiskLimit {
    MaxPositionSizePercent,
    MaxExposureRatio,
    MaxDrawdownPercent,
    MaxOpenPositions,
    /// No positive portfolio value to size against.
    PortfolioValue,
    /// Market order with no mark price available for the pair.
    ReferencePrice,
}

impl RiskLimit {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLimit::MaxPositionSizePercent => "maxPositionSizePercent",
            RiskLimit::MaxExposureRatio => "maxExposureRatio",
            RiskLimit::MaxDrawdownPercent => "maxDrawdownPercent",
            RiskLimit::MaxOpenPositions => "maxOpenPositions",
            RiskLimit::PortfolioValue => "portfolioValue",
            RiskLimit::ReferencePrice => "referencePrice",
        }
    }
}

impl std::fmt::Display for RiskLimit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A breached limit: the configured bound and the value the command would produce.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RiskViolation {
    pub limit: RiskLimit,
    pub limit_value: Decimal,
    pub actual: Decimal,
}

impl RiskViolation {
    fn new(limit: RiskLimit, limit_value: Decimal, actual: Decimal) -> Self {
        Self {
            limit,
            limit_value,
            actual,
        }
    }

    /// How far past the limit the command would go.
    pub fn excess(&self) -> Decimal {
        self.actual - self.limit_value
    }
}

impl std::fmt::Display for RiskViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} breached: {} exceeds {} by {}",
            self.limit,
            self.actual,
            self.limit_value,
            self.excess()
        )
    }
}

impl std::error::Error for RiskViolation {}

fn signed(side: Side, notional: Decimal) -> Decimal {
    match side {
        Side::Bid => notional,
        Side::Ask => -notional,
    }
}

/// Validate a command against portfolio state and limits.
///
/// Checks performed (in order, first failure wins):
/// 1. Resulting position in the pair as % of portfolio value
/// 2. Resulting gross exposure / portfolio value
/// 3. Current drawdown from the high-water mark
/// 4. Open position count, when the command opens a new position
pub fn validate(
    command: &OrderCommand,
    portfolio: &PortfolioState,
    limits: &RiskLimits,
) -> Result<(), RiskViolation> {
    if portfolio.portfolio_value <= Decimal::ZERO {
        return Err(RiskViolation::new(
            RiskLimit::PortfolioValue,
            Decimal::ZERO,
            portfolio.portfolio_value,
        ));
    }

    let existing = portfolio.position(&command.venue, &command.trading_pair);
    let reference_price = command
        .price
        .or_else(|| existing.map(|p| p.mark_price))
        .ok_or_else(|| {
            RiskViolation::new(RiskLimit::ReferencePrice, Decimal::ZERO, Decimal::ZERO)
        })?;

    let existing_signed = existing
        .map(|p| signed(p.side, p.notional()))
        .unwrap_or(Decimal::ZERO);
    let order_signed = signed(command.side, command.size * reference_price);
    let resulting = (existing_signed + order_signed).abs();

    // 1. Position size
    let position_pct = resulting / portfolio.portfolio_value * Decimal::ONE_HUNDRED;
    if position_pct > limits.max_position_size_percent {
        return Err(RiskViolation::new(
            RiskLimit::MaxPositionSizePercent,
            limits.max_position_size_percent,
            position_pct,
        ));
    }

    // 2. Aggregate exposure
    let exposure = portfolio.gross_exposure() - existing_signed.abs() + resulting;
    let exposure_ratio = exposure / portfolio.portfolio_value;
    if exposure_ratio > limits.max_exposure_ratio {
        return Err(RiskViolation::new(
            RiskLimit::MaxExposureRatio,
            limits.max_exposure_ratio,
            exposure_ratio,
        ));
    }

    // 3. Drawdown
    let drawdown = portfolio.drawdown_percent();
    if drawdown > limits.max_drawdown_percent {
        return Err(RiskViolation::new(
            RiskLimit::MaxDrawdownPercent,
            limits.max_drawdown_percent,
            drawdown,
        ));
    }

    // 4. Position count
    if let Some(max) = limits.max_open_positions {
        let opens_new = existing.map_or(true, |p| p.size.is_zero());
        let open = portfolio.open_position_count();
        if opens_new && open >= max {
            return Err(RiskViolation::new(
                RiskLimit::MaxOpenPositions,
                Decimal::from(max),
                Decimal::from(open + 1),
            ));
        }
    }

    Ok(())
}
