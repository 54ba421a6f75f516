//! Venue-side subscription params, tracking, and matching.
//!
//! These are the subscriptions the venue itself is asked to stream. They are
//! replayed after every reconnect. Local handler registration lives in
//! [`crate::router`].

use crate::shared::{Channel, TradingPair};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Parameters for a venue `subscribe` / `unsubscribe` frame.
///
/// An empty `trading_pairs` means every pair on the channel.
#[derive(Debug, Clone, Serialize, Deserialize, Hash, Eq, PartialEq)]
pub struct SubscribeParams {
    pub channel: Channel,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub trading_pairs: Vec<TradingPair>,
}

impl SubscribeParams {
    pub fn new(channel: Channel, trading_pairs: Vec<TradingPair>) -> Self {
        Self {
            channel,
            trading_pairs,
        }
    }

    pub fn channel(channel: Channel) -> Self {
        Self::new(channel, Vec::new())
    }

    /// Same channel and the same set of pairs, regardless of order.
    pub fn matches(&self, other: &SubscribeParams) -> bool {
        if self.channel != other.channel {
            return false;
        }
        let a: HashSet<_> = self.trading_pairs.iter().collect();
        let b: HashSet<_> = other.trading_pairs.iter().collect();
        a == b
    }

    /// Deterministic key for deduplicating tracked subscriptions.
    pub fn subscription_key(&self) -> String {
        format!("{}:{}", self.channel, pairs_key(&self.trading_pairs))
    }
}

/// Sort and join pairs for a deterministic key.
fn pairs_key(pairs: &[TradingPair]) -> String {
    let mut sorted: Vec<&str> = pairs.iter().map(|p| p.as_str()).collect();
    sorted.sort_unstable();
    sorted.dedup();
    sorted.join(",")
}

/// The set of venue subscriptions to replay after a reconnect.
#[derive(Debug, Default, Clone)]
pub struct SubscriptionSet {
    active: Vec<SubscribeParams>,
}

impl SubscriptionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a subscribe. Returns `false` if an equivalent one is already tracked.
    pub fn add(&mut self, params: &SubscribeParams) -> bool {
        if self.active.iter().any(|s| s.matches(params)) {
            return false;
        }
        tracing::debug!(key = %params.subscription_key(), "Tracking subscription");
        self.active.push(params.clone());
        true
    }

    /// Forget a subscription. Returns how many entries were removed.
    pub fn remove(&mut self, params: &SubscribeParams) -> usize {
        let before = self.active.len();
        self.active.retain(|s| !s.matches(params));
        let removed = before - self.active.len();
        if removed > 0 {
            tracing::debug!("Removed {} subscription(s) from tracking", removed);
        }
        removed
    }

    pub fn iter(&self) -> impl Iterator<Item = &SubscribeParams> {
        self.active.iter()
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }
}
