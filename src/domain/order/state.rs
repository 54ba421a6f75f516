//! Order state containers: lifecycle tracking keyed by command id.

use super::wire::OrderUpdate;
use super::{Acknowledgement, OrderCommand, OrderStatus};
use crate::shared::{CommandId, Decimal};
use std::collections::HashMap;

/// A tracked command and its latest known status.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedOrder {
    pub command: OrderCommand,
    pub status: OrderStatus,
    pub venue_order_id: Option<String>,
    pub filled_size: Decimal,
    pub reason: Option<String>,
}

/// Tracks submitted commands through their lifecycle.
///
/// Terminal states are sticky: a late `Submitted` never resurrects a
/// `Cancelled` order.
#[derive(Debug, Default)]
pub struct OrderTracker {
    orders: HashMap<CommandId, TrackedOrder>,
}

impl OrderTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &CommandId) -> Option<&TrackedOrder> {
        self.orders.get(id)
    }

    /// Record a command about to be dispatched.
    pub fn insert_pending(&mut self, command: &OrderCommand) {
        self.orders
            .entry(command.id.clone())
            .or_insert_with(|| TrackedOrder {
                command: command.clone(),
                status: OrderStatus::Pending,
                venue_order_id: None,
                filled_size: Decimal::ZERO,
                reason: None,
            });
    }

    pub fn acknowledge(&mut self, ack: &Acknowledgement) -> Option<OrderStatus> {
        self.apply(&OrderUpdate::from(ack))
    }

    pub fn fail(&mut self, id: &CommandId, reason: impl Into<String>) -> Option<OrderStatus> {
        let order = self.orders.get_mut(id)?;
        if !order.status.is_terminal() {
            order.status = OrderStatus::Failed;
            order.reason = Some(reason.into());
        }
        Some(order.status)
    }

    /// Apply a lifecycle update. Returns the resulting status, or `None` for
    /// an unknown command.
    pub fn apply(&mut self, update: &OrderUpdate) -> Option<OrderStatus> {
        let order = self.orders.get_mut(&update.command_id)?;
        if order.status.is_terminal() {
            return Some(order.status);
        }
        order.status = update.status;
        if update.venue_order_id.is_some() {
            order.venue_order_id = update.venue_order_id.clone();
        }
        if let Some(filled) = update.filled_size {
            order.filled_size = filled;
        }
        if update.reason.is_some() {
            order.reason = update.reason.clone();
        }
        Some(order.status)
    }

    /// Commands that have not reached a terminal state.
    pub fn open_orders(&self) -> impl Iterator<Item = &TrackedOrder> {
        self.orders.values().filter(|o| !o.status.is_terminal())
    }

    /// Drop terminal orders from the table.
    pub fn prune_terminal(&mut self) -> usize {
        let before = self.orders.len();
        self.orders.retain(|_, o| !o.status.is_terminal());
        before - self.orders.len()
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::Side;
    use rust_decimal_macros::dec;

    fn update(id: &CommandId, status: OrderStatus) -> OrderUpdate {
        OrderUpdate {
            command_id: id.clone(),
            venue_order_id: Some("v-1".into()),
            status,
            filled_size: None,
            reason: None,
        }
    }

    #[test]
    fn test_lifecycle_progression() {
        let cmd = OrderCommand::limit("drift", "SOL-USDC", Side::Bid, dec!(10), dec!(1));
        let mut tracker = OrderTracker::new();
        tracker.insert_pending(&cmd);
        assert_eq!(tracker.get(&cmd.id).unwrap().status, OrderStatus::Pending);

        tracker.apply(&update(&cmd.id, OrderStatus::Submitted));
        let mut partial = update(&cmd.id, OrderStatus::PartiallyFilled);
        partial.filled_size = Some(dec!(0.4));
        tracker.apply(&partial);
        let tracked = tracker.get(&cmd.id).unwrap();
        assert_eq!(tracked.status, OrderStatus::PartiallyFilled);
        assert_eq!(tracked.filled_size, dec!(0.4));
        assert_eq!(tracked.venue_order_id.as_deref(), Some("v-1"));
        assert_eq!(tracker.open_orders().count(), 1);
    }

    #[test]
    fn test_terminal_state_is_sticky() {
        let cmd = OrderCommand::limit("drift", "SOL-USDC", Side::Ask, dec!(10), dec!(1));
        let mut tracker = OrderTracker::new();
        tracker.insert_pending(&cmd);
        tracker.apply(&update(&cmd.id, OrderStatus::Cancelled));
        let status = tracker.apply(&update(&cmd.id, OrderStatus::Submitted));
        assert_eq!(status, Some(OrderStatus::Cancelled));
        assert_eq!(tracker.prune_terminal(), 1);
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_unknown_command_is_ignored() {
        let mut tracker = OrderTracker::new();
        assert_eq!(
            tracker.apply(&update(&CommandId::from("nope"), OrderStatus::Filled)),
            None
        );
    }
}
