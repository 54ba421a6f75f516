//! Cumulative depth curve.

use crate::shared::{Decimal, Side};
use serde::Serialize;

/// Cumulative size available at or better than `price`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MarketDepthPoint {
    pub side: Side,
    pub price: Decimal,
    pub cumulative_size: Decimal,
}

/// Both sides of a depth curve, best price first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MarketDepth {
    pub bids: Vec<MarketDepthPoint>,
    pub asks: Vec<MarketDepthPoint>,
}

impl MarketDepth {
    /// Accumulate levels already ordered best-first.
    pub(crate) fn from_levels<'a, B, A>(bids: B, asks: A) -> Self
    where
        B: IntoIterator<Item = (&'a Decimal, &'a Decimal)>,
        A: IntoIterator<Item = (&'a Decimal, &'a Decimal)>,
    {
        Self {
            bids: accumulate(Side::Bid, bids),
            asks: accumulate(Side::Ask, asks),
        }
    }

    /// Bids (descending) then asks (ascending), each limited to `max_levels`.
    pub fn points(&self, max_levels: usize) -> Vec<MarketDepthPoint> {
        self.bids
            .iter()
            .take(max_levels)
            .chain(self.asks.iter().take(max_levels))
            .copied()
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.bids.is_empty() && self.asks.is_empty()
    }
}

fn accumulate<'a, I>(side: Side, levels: I) -> Vec<MarketDepthPoint>
where
    I: IntoIterator<Item = (&'a Decimal, &'a Decimal)>,
{
    let mut total = Decimal::ZERO;
    levels
        .into_iter()
        .map(|(price, size)| {
            total += *size;
            MarketDepthPoint {
                side,
                price: *price,
                cumulative_size: total,
            }
        })
        .collect()
}
