//! Last-value-wins batching for subscriptions with a flush interval.

use super::{invoke, BatchKeyFn, Handler, RouterShared, RouterSignal, SubscriptionId};
use crate::ws::RawEnvelope;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;

/// Bounded buffer holding the newest envelope per logical key.
pub(crate) struct BatchBuffer {
    latest: HashMap<String, RawEnvelope>,
    order: VecDeque<String>,
    max_keys: usize,
    evicted: u64,
}

impl BatchBuffer {
    pub(crate) fn new(max_keys: usize) -> Self {
        Self {
            latest: HashMap::new(),
            order: VecDeque::new(),
            max_keys: max_keys.max(1),
            evicted: 0,
        }
    }

    /// Insert, replacing any older value for the same key. Returns `true` if
    /// a different key had to be evicted to stay within bounds.
    pub(crate) fn push(&mut self, key: String, envelope: RawEnvelope) -> bool {
        if self.latest.insert(key.clone(), envelope).is_some() {
            return false;
        }
        self.order.push_back(key);
        if self.order.len() > self.max_keys {
            if let Some(oldest) = self.order.pop_front() {
                self.latest.remove(&oldest);
                self.evicted += 1;
                return true;
            }
        }
        false
    }

    /// Take the buffered envelopes in sequence order.
    pub(crate) fn drain(&mut self) -> Vec<RawEnvelope> {
        self.order.clear();
        let mut out: Vec<RawEnvelope> = self.latest.drain().map(|(_, env)| env).collect();
        out.sort_by_key(|env| env.sequence);
        out
    }

    pub(crate) fn evicted(&self) -> u64 {
        self.evicted
    }

    pub(crate) fn len(&self) -> usize {
        self.latest.len()
    }
}

/// A batched subscription's buffer plus the key function that feeds it.
pub(crate) struct Batcher {
    pub(crate) buffer: Mutex<BatchBuffer>,
    pub(crate) key_fn: BatchKeyFn,
}

impl Batcher {
    pub(crate) fn push(&self, envelope: &RawEnvelope) -> bool {
        let key = (self.key_fn)(envelope);
        match self.buffer.lock() {
            Ok(mut buf) => buf.push(key, envelope.clone()),
            Err(poisoned) => poisoned.into_inner().push(key, envelope.clone()),
        }
    }

    fn drain(&self) -> Vec<RawEnvelope> {
        match self.buffer.lock() {
            Ok(mut buf) => buf.drain(),
            Err(poisoned) => poisoned.into_inner().drain(),
        }
    }
}

/// Default logical key: the payload's `trading_pair`, else the channel.
pub fn default_batch_key(envelope: &RawEnvelope) -> String {
    envelope
        .payload
        .get("trading_pair")
        .and_then(|p| p.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| envelope.channel.as_str().to_string())
}

/// Spawn the timer task that flushes `batcher` every `interval`.
///
/// The task holds only weak references and exits once the subscription or
/// the router is gone.
pub(crate) fn spawn_flusher(
    id: SubscriptionId,
    interval: Duration,
    batcher: Weak<Batcher>,
    handler: Handler,
    router: Weak<RouterShared>,
) -> Option<JoinHandle<()>> {
    let runtime = match tokio::runtime::Handle::try_current() {
        Ok(rt) => rt,
        Err(_) => return None,
    };

    Some(runtime.spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let (Some(batcher), Some(router)) = (batcher.upgrade(), router.upgrade()) else {
                tracing::debug!(subscription = id.0, "Batch flusher stopping");
                return;
            };
            for envelope in batcher.drain() {
                if let Err(error) = invoke(&handler, &envelope) {
                    router.record_failure(RouterSignal::HandlerFailed {
                        subscription: id,
                        channel: envelope.channel,
                        error,
                    });
                } else {
                    router.record_delivery();
                }
            }
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::Channel;
    use chrono::Utc;

    fn env(seq: u64, pair: &str, px: u64) -> RawEnvelope {
        RawEnvelope {
            kind: "ticker".into(),
            channel: Channel::MarketData,
            sequence: seq,
            timestamp: Utc::now(),
            payload: serde_json::json!({"trading_pair": pair, "price": px}),
        }
    }

    #[test]
    fn test_last_value_wins_per_key() {
        let mut buf = BatchBuffer::new(10);
        buf.push(default_batch_key(&env(1, "A", 1)), env(1, "A", 1));
        buf.push(default_batch_key(&env(2, "B", 2)), env(2, "B", 2));
        buf.push(default_batch_key(&env(3, "A", 3)), env(3, "A", 3));
        let out = buf.drain();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].sequence, 2);
        assert_eq!(out[1].sequence, 3);
        assert_eq!(out[1].payload["price"], 3);
        assert_eq!(buf.len(), 0);
    }

    #[test]
    fn test_bounded_keys_evict_oldest() {
        let mut buf = BatchBuffer::new(2);
        assert!(!buf.push("A".into(), env(1, "A", 1)));
        assert!(!buf.push("B".into(), env(2, "B", 1)));
        assert!(buf.push("C".into(), env(3, "C", 1)));
        assert_eq!(buf.evicted(), 1);
        let keys: Vec<u64> = buf.drain().iter().map(|e| e.sequence).collect();
        assert_eq!(keys, [2, 3]);
    }

    #[test]
    fn test_default_key_falls_back_to_channel() {
        let mut e = env(1, "A", 1);
        assert_eq!(default_batch_key(&e), "A");
        e.payload = serde_json::json!({"price": 1});
        assert_eq!(default_batch_key(&e), "MARKET_DATA");
    }
}
