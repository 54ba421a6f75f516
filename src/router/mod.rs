//! Message router: channel-keyed subscriber registry with per-channel
//! sequence dedup, gap signalling and optional last-value-wins batching.
//!
//! `dispatch` runs on the connection event loop, so handler invocation order
//! within a channel matches accepted-sequence order. Batched subscriptions are
//! flushed from their own timer task.

pub mod batch;
mod dedup;

pub use batch::default_batch_key;
pub use dedup::SequenceCheck;

use crate::shared::Channel;
use crate::ws::RawEnvelope;
use batch::{BatchBuffer, Batcher};
use dedup::ChannelSequence;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

// ─── Handler types ───────────────────────────────────────────────────────────

/// Failure reported by a subscriber. Isolated to that subscriber.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct HandlerError(pub String);

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

pub type Handler = Arc<dyn Fn(&RawEnvelope) -> Result<(), HandlerError> + Send + Sync>;

/// Derives the logical key a batched subscription coalesces on.
pub type BatchKeyFn = Arc<dyn Fn(&RawEnvelope) -> String + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u64);

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

// ─── Config / options ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Minimum number of sequences remembered per channel.
    pub dedupe_window: usize,
    /// Distinct keys a batched subscription buffers before evicting the oldest.
    pub max_batch_keys: usize,
    pub signal_buffer: usize,
    /// Clear per-channel sequence state when the connection comes back.
    pub reset_on_reconnect: bool,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            dedupe_window: 1024,
            max_batch_keys: 1024,
            signal_buffer: 256,
            reset_on_reconnect: true,
        }
    }
}

/// Per-subscription options.
#[derive(Clone, Default)]
pub struct SubscribeOptions {
    pub dedupe_window: Option<usize>,
    pub batch_interval: Option<Duration>,
    pub batch_key: Option<BatchKeyFn>,
}

impl SubscribeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dedupe_window(mut self, window: usize) -> Self {
        self.dedupe_window = Some(window);
        self
    }

    pub fn batch_interval_ms(mut self, interval_ms: u64) -> Self {
        self.batch_interval = Some(Duration::from_millis(interval_ms));
        self
    }

    pub fn batch_key<F>(mut self, key: F) -> Self
    where
        F: Fn(&RawEnvelope) -> String + Send + Sync + 'static,
    {
        self.batch_key = Some(Arc::new(key));
        self
    }
}

impl std::fmt::Debug for SubscribeOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscribeOptions")
            .field("dedupe_window", &self.dedupe_window)
            .field("batch_interval", &self.batch_interval)
            .field("batch_key", &self.batch_key.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

// ─── Signals / stats ─────────────────────────────────────────────────────────

/// Out-of-band notifications for other components (e.g. resync on gap).
#[derive(Debug, Clone, PartialEq)]
pub enum RouterSignal {
    SequenceGap {
        channel: Channel,
        expected: u64,
        received: u64,
    },
    OutOfOrder {
        channel: Channel,
        sequence: u64,
        last: u64,
    },
    HandlerFailed {
        subscription: SubscriptionId,
        channel: Channel,
        error: HandlerError,
    },
    BatchOverflow {
        subscription: SubscriptionId,
        evicted_total: u64,
    },
}

/// Sequence continuity was lost. Delivered to continuity hooks on the
/// dispatching task, before any subscriber sees a later envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContinuityBreak {
    /// A gap on one channel; the gapped envelope is dispatched right after.
    Gap {
        channel: Channel,
        expected: u64,
        received: u64,
    },
    /// Every channel's sequence state was forgotten (e.g. a new connection).
    Reset,
}

type ContinuityHook = Arc<dyn Fn(ContinuityBreak) + Send + Sync>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouterStats {
    pub dispatched: u64,
    pub delivered: u64,
    pub duplicates: u64,
    pub out_of_order: u64,
    pub gaps: u64,
    pub handler_failures: u64,
    pub batch_evictions: u64,
}

#[derive(Default)]
struct Counters {
    dispatched: AtomicU64,
    delivered: AtomicU64,
    duplicates: AtomicU64,
    out_of_order: AtomicU64,
    gaps: AtomicU64,
    handler_failures: AtomicU64,
    batch_evictions: AtomicU64,
}

/// Result of routing one envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchOutcome {
    pub verdict: SequenceCheck,
    pub delivered: usize,
    pub batched: usize,
    pub failed: usize,
}

impl DispatchOutcome {
    fn dropped(verdict: SequenceCheck) -> Self {
        Self {
            verdict,
            delivered: 0,
            batched: 0,
            failed: 0,
        }
    }

    /// Whether the envelope passed sequence checks.
    pub fn accepted(&self) -> bool {
        matches!(self.verdict, SequenceCheck::InOrder | SequenceCheck::Gap { .. })
    }
}

// ─── Registry ────────────────────────────────────────────────────────────────

struct SubscriberRecord {
    id: SubscriptionId,
    handler: Handler,
    dedupe_window: usize,
    batcher: Option<Arc<Batcher>>,
    flusher: Option<JoinHandle<()>>,
}

#[derive(Default)]
struct RouterInner {
    subscribers: BTreeMap<Channel, Vec<Arc<SubscriberRecord>>>,
    sequences: HashMap<Channel, ChannelSequence>,
    continuity_hooks: Vec<ContinuityHook>,
}

pub(crate) struct RouterShared {
    config: RouterConfig,
    inner: Mutex<RouterInner>,
    signal_tx: broadcast::Sender<RouterSignal>,
    counters: Counters,
    next_id: AtomicU64,
}

impl RouterShared {
    fn lock(&self) -> MutexGuard<'_, RouterInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn signal(&self, signal: RouterSignal) {
        // No receivers is fine.
        let _ = self.signal_tx.send(signal);
    }

    fn notify_continuity(&self, event: ContinuityBreak) {
        let hooks = self.lock().continuity_hooks.clone();
        for hook in hooks {
            if catch_unwind(AssertUnwindSafe(|| hook(event))).is_err() {
                tracing::error!(?event, "Continuity hook panicked");
            }
        }
    }

    pub(crate) fn record_delivery(&self) {
        self.counters.delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failure(&self, signal: RouterSignal) {
        self.counters.handler_failures.fetch_add(1, Ordering::Relaxed);
        if let RouterSignal::HandlerFailed {
            subscription,
            channel,
            error,
        } = &signal
        {
            tracing::warn!(%subscription, %channel, %error, "Subscriber handler failed");
        }
        self.signal(signal);
    }
}

/// Run a handler with panics contained.
pub(crate) fn invoke(handler: &Handler, envelope: &RawEnvelope) -> Result<(), HandlerError> {
    match catch_unwind(AssertUnwindSafe(|| handler(envelope))) {
        Ok(result) => result,
        Err(panic) => {
            let detail = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(HandlerError(format!("handler panicked: {detail}")))
        }
    }
}

/// Publish/subscribe registry keyed by channel. Cheap to clone.
#[derive(Clone)]
pub struct MessageRouter {
    shared: Arc<RouterShared>,
}

impl Default for MessageRouter {
    fn default() -> Self {
        Self::new(RouterConfig::default())
    }
}

impl std::fmt::Debug for MessageRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageRouter")
            .field("config", &self.shared.config)
            .field("stats", &self.stats())
            .finish()
    }
}

impl MessageRouter {
    pub fn new(config: RouterConfig) -> Self {
        let (signal_tx, _) = broadcast::channel(config.signal_buffer.max(1));
        Self {
            shared: Arc::new(RouterShared {
                config,
                inner: Mutex::new(RouterInner::default()),
                signal_tx,
                counters: Counters::default(),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Register `handler` for `channel`. The returned handle is the disposer.
    ///
    /// A batch interval needs a running tokio runtime for its flush task;
    /// without one the subscription falls back to immediate delivery.
    pub fn subscribe<F>(
        &self,
        channel: Channel,
        handler: F,
        options: SubscribeOptions,
    ) -> SubscriptionHandle
    where
        F: Fn(&RawEnvelope) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.shared.next_id.fetch_add(1, Ordering::Relaxed));
        let handler: Handler = Arc::new(handler);
        let dedupe_window = options
            .dedupe_window
            .unwrap_or(self.shared.config.dedupe_window);

        let (batcher, flusher) = match options.batch_interval {
            Some(interval) if !interval.is_zero() => {
                let batcher = Arc::new(Batcher {
                    buffer: Mutex::new(BatchBuffer::new(self.shared.config.max_batch_keys)),
                    key_fn: options
                        .batch_key
                        .unwrap_or_else(|| Arc::new(default_batch_key)),
                });
                match batch::spawn_flusher(
                    id,
                    interval,
                    Arc::downgrade(&batcher),
                    Arc::clone(&handler),
                    Arc::downgrade(&self.shared),
                ) {
                    Some(task) => (Some(batcher), Some(task)),
                    None => {
                        tracing::error!(
                            subscription = %id,
                            %channel,
                            "No tokio runtime for batch flusher, delivering immediately"
                        );
                        (None, None)
                    }
                }
            }
            _ => (None, None),
        };

        let record = Arc::new(SubscriberRecord {
            id,
            handler,
            dedupe_window,
            batcher,
            flusher,
        });

        let mut inner = self.shared.lock();
        if let Some(seq) = inner.sequences.get_mut(&channel) {
            seq.window().ensure_capacity(dedupe_window);
        }
        inner.subscribers.entry(channel).or_default().push(record);
        tracing::debug!(subscription = %id, %channel, "Subscribed");

        SubscriptionHandle {
            id,
            channel,
            router: Arc::downgrade(&self.shared),
        }
    }

    /// Run `hook` whenever sequence continuity breaks. It runs synchronously
    /// on the dispatching task: for a gap, before the gapped envelope reaches
    /// subscribers; for a reset, before the next envelope is dispatched.
    pub fn on_continuity_break<F>(&self, hook: F)
    where
        F: Fn(ContinuityBreak) + Send + Sync + 'static,
    {
        self.shared.lock().continuity_hooks.push(Arc::new(hook));
    }

    /// Route one envelope to every subscriber of its channel.
    pub fn dispatch(&self, envelope: &RawEnvelope) -> DispatchOutcome {
        let shared = &self.shared;
        shared.counters.dispatched.fetch_add(1, Ordering::Relaxed);
        let channel = envelope.channel;

        let (verdict, subscribers) = {
            let mut inner = shared.lock();
            let window = inner
                .subscribers
                .get(&channel)
                .into_iter()
                .flatten()
                .map(|s| s.dedupe_window)
                .fold(shared.config.dedupe_window, usize::max);
            let seq = inner
                .sequences
                .entry(channel)
                .or_insert_with(|| ChannelSequence::new(window));
            seq.window().ensure_capacity(window);
            let verdict = seq.check(envelope.sequence);
            let subscribers = inner.subscribers.get(&channel).cloned().unwrap_or_default();
            (verdict, subscribers)
        };

        match verdict {
            SequenceCheck::Duplicate => {
                shared.counters.duplicates.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(%channel, sequence = envelope.sequence, "Dropped duplicate");
                return DispatchOutcome::dropped(verdict);
            }
            SequenceCheck::Stale { last } => {
                shared.counters.out_of_order.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(%channel, sequence = envelope.sequence, last, "Dropped out-of-order message");
                shared.signal(RouterSignal::OutOfOrder {
                    channel,
                    sequence: envelope.sequence,
                    last,
                });
                return DispatchOutcome::dropped(verdict);
            }
            SequenceCheck::Gap { expected } => {
                shared.counters.gaps.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(%channel, expected, received = envelope.sequence, "Sequence gap");
                shared.notify_continuity(ContinuityBreak::Gap {
                    channel,
                    expected,
                    received: envelope.sequence,
                });
                shared.signal(RouterSignal::SequenceGap {
                    channel,
                    expected,
                    received: envelope.sequence,
                });
            }
            SequenceCheck::InOrder => {}
        }

        let mut outcome = DispatchOutcome::dropped(verdict);
        for sub in &subscribers {
            if let Some(batcher) = &sub.batcher {
                if batcher.push(envelope) {
                    let evicted = shared.counters.batch_evictions.fetch_add(1, Ordering::Relaxed) + 1;
                    shared.signal(RouterSignal::BatchOverflow {
                        subscription: sub.id,
                        evicted_total: evicted,
                    });
                }
                outcome.batched += 1;
                continue;
            }
            match invoke(&sub.handler, envelope) {
                Ok(()) => {
                    shared.record_delivery();
                    outcome.delivered += 1;
                }
                Err(error) => {
                    outcome.failed += 1;
                    shared.record_failure(RouterSignal::HandlerFailed {
                        subscription: sub.id,
                        channel,
                        error,
                    });
                }
            }
        }
        outcome
    }

    /// Forget all per-channel sequence state.
    pub fn reset_sequences(&self) {
        {
            let mut inner = self.shared.lock();
            for seq in inner.sequences.values_mut() {
                seq.reset();
            }
        }
        tracing::debug!("Router sequences reset");
        self.shared.notify_continuity(ContinuityBreak::Reset);
    }

    pub(crate) fn reset_on_reconnect(&self) -> bool {
        self.shared.config.reset_on_reconnect
    }

    pub fn signals(&self) -> broadcast::Receiver<RouterSignal> {
        self.shared.signal_tx.subscribe()
    }

    pub fn subscriber_count(&self, channel: Channel) -> usize {
        self.shared
            .lock()
            .subscribers
            .get(&channel)
            .map_or(0, Vec::len)
    }

    pub fn stats(&self) -> RouterStats {
        let c = &self.shared.counters;
        RouterStats {
            dispatched: c.dispatched.load(Ordering::Relaxed),
            delivered: c.delivered.load(Ordering::Relaxed),
            duplicates: c.duplicates.load(Ordering::Relaxed),
            out_of_order: c.out_of_order.load(Ordering::Relaxed),
            gaps: c.gaps.load(Ordering::Relaxed),
            handler_failures: c.handler_failures.load(Ordering::Relaxed),
            batch_evictions: c.batch_evictions.load(Ordering::Relaxed),
        }
    }
}

/// Disposer returned by [`MessageRouter::subscribe`].
#[must_use = "dropping the handle keeps the subscription; call unsubscribe() to remove it"]
#[derive(Debug)]
pub struct SubscriptionHandle {
    id: SubscriptionId,
    channel: Channel,
    router: Weak<RouterShared>,
}

impl SubscriptionHandle {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn channel(&self) -> Channel {
        self.channel
    }

    /// Remove the subscription. Returns `false` if it was already gone.
    pub fn unsubscribe(self) -> bool {
        let Some(shared) = self.router.upgrade() else {
            return false;
        };
        let removed = {
            let mut inner = shared.lock();
            let Some(subs) = inner.subscribers.get_mut(&self.channel) else {
                return false;
            };
            let pos = subs.iter().position(|s| s.id == self.id);
            let removed = pos.map(|i| subs.remove(i));
            if subs.is_empty() {
                inner.subscribers.remove(&self.channel);
            }
            removed
        };
        match removed {
            Some(record) => {
                if let Some(task) = &record.flusher {
                    task.abort();
                }
                tracing::debug!(subscription = %self.id, channel = %self.channel, "Unsubscribed");
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::sync::atomic::AtomicUsize;

    fn env(channel: Channel, seq: u64) -> RawEnvelope {
        RawEnvelope {
            kind: "update".into(),
            channel,
            sequence: seq,
            timestamp: Utc::now(),
            payload: serde_json::json!({"trading_pair": "BTC-USD", "seq": seq}),
        }
    }

    fn counting(router: &MessageRouter, channel: Channel) -> (Arc<AtomicUsize>, SubscriptionHandle) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let handle = router.subscribe(
            channel,
            move |_| {
                c.fetch_add(1, Ordering::SeqCst);
                Ok(())
            },
            SubscribeOptions::new(),
        );
        (count, handle)
    }

    #[test]
    fn test_duplicate_never_delivered_twice() {
        let router = MessageRouter::default();
        let (count, _h) = counting(&router, Channel::OrderBook);
        router.dispatch(&env(Channel::OrderBook, 1));
        router.dispatch(&env(Channel::OrderBook, 2));
        let again = router.dispatch(&env(Channel::OrderBook, 2));
        assert_eq!(again.verdict, SequenceCheck::Duplicate);
        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert_eq!(router.stats().duplicates, 1);
    }

    #[test]
    fn test_sequences_are_per_channel() {
        let router = MessageRouter::default();
        let (books, _a) = counting(&router, Channel::OrderBook);
        let (trades, _b) = counting(&router, Channel::TradeUpdate);
        router.dispatch(&env(Channel::OrderBook, 1));
        router.dispatch(&env(Channel::TradeUpdate, 1));
        assert_eq!(books.load(Ordering::SeqCst), 1);
        assert_eq!(trades.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_gap_delivers_and_signals() {
        let router = MessageRouter::default();
        let mut signals = router.signals();
        let (count, _h) = counting(&router, Channel::OrderBook);
        router.dispatch(&env(Channel::OrderBook, 1));
        let outcome = router.dispatch(&env(Channel::OrderBook, 4));
        assert_eq!(outcome.verdict, SequenceCheck::Gap { expected: 2 });
        assert!(outcome.accepted());
        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert_eq!(
            signals.try_recv().unwrap(),
            RouterSignal::SequenceGap {
                channel: Channel::OrderBook,
                expected: 2,
                received: 4
            }
        );
    }

    #[test]
    fn test_out_of_order_dropped() {
        let router = MessageRouter::new(RouterConfig {
            dedupe_window: 1,
            ..Default::default()
        });
        let (count, _h) = counting(&router, Channel::MarketData);
        router.dispatch(&env(Channel::MarketData, 5));
        router.dispatch(&env(Channel::MarketData, 6));
        let late = router.dispatch(&env(Channel::MarketData, 5));
        assert_eq!(late.verdict, SequenceCheck::Stale { last: 6 });
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_failing_handler_isolated() {
        let router = MessageRouter::default();
        let _bad = router.subscribe(
            Channel::OrderUpdate,
            |_| Err(HandlerError::new("boom")),
            SubscribeOptions::new(),
        );
        let _panics = router.subscribe(
            Channel::OrderUpdate,
            |_| panic!("handler exploded"),
            SubscribeOptions::new(),
        );
        let (count, _good) = counting(&router, Channel::OrderUpdate);

        let outcome = router.dispatch(&env(Channel::OrderUpdate, 1));
        assert_eq!(outcome.delivered, 1);
        assert_eq!(outcome.failed, 2);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(router.stats().handler_failures, 2);
    }

    #[test]
    fn test_unsubscribe_disposer() {
        let router = MessageRouter::default();
        let (count, handle) = counting(&router, Channel::MarketData);
        assert_eq!(router.subscriber_count(Channel::MarketData), 1);
        assert!(handle.unsubscribe());
        assert_eq!(router.subscriber_count(Channel::MarketData), 0);
        router.dispatch(&env(Channel::MarketData, 1));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_reset_sequences_accepts_restart() {
        let router = MessageRouter::default();
        let (count, _h) = counting(&router, Channel::OrderBook);
        router.dispatch(&env(Channel::OrderBook, 50));
        router.reset_sequences();
        assert!(router.dispatch(&env(Channel::OrderBook, 1)).accepted());
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_continuity_hook_runs_before_gapped_delivery() {
        let router = MessageRouter::default();
        let log = Arc::new(Mutex::new(Vec::new()));

        let hook_log = Arc::clone(&log);
        router.on_continuity_break(move |event| hook_log.lock().unwrap().push(format!("{event:?}")));
        let handler_log = Arc::clone(&log);
        let _h = router.subscribe(
            Channel::OrderBook,
            move |env| {
                handler_log.lock().unwrap().push(format!("seq {}", env.sequence));
                Ok(())
            },
            SubscribeOptions::new(),
        );

        router.dispatch(&env(Channel::OrderBook, 1));
        router.dispatch(&env(Channel::OrderBook, 4));
        router.reset_sequences();
        router.dispatch(&env(Channel::OrderBook, 1));

        let gap = ContinuityBreak::Gap {
            channel: Channel::OrderBook,
            expected: 2,
            received: 4,
        };
        assert_eq!(
            *log.lock().unwrap(),
            vec![
                "seq 1".to_string(),
                format!("{gap:?}"),
                "seq 4".to_string(),
                format!("{:?}", ContinuityBreak::Reset),
                "seq 1".to_string(),
            ]
        );
    }

    #[test]
    fn test_panicking_continuity_hook_is_contained() {
        let router = MessageRouter::default();
        router.on_continuity_break(|_| panic!("boom"));
        let (count, _h) = counting(&router, Channel::OrderBook);
        router.dispatch(&env(Channel::OrderBook, 1));
        router.dispatch(&env(Channel::OrderBook, 3));
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_batched_subscription_last_value_wins() {
        let router = MessageRouter::default();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _h = router.subscribe(
            Channel::MarketData,
            move |env| {
                sink.lock().unwrap().push(env.sequence);
                Ok(())
            },
            SubscribeOptions::new().batch_interval_ms(100),
        );

        for seq in 1..=5 {
            let outcome = router.dispatch(&env(Channel::MarketData, seq));
            assert_eq!(outcome.batched, 1);
        }
        assert!(seen.lock().unwrap().is_empty());

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(*seen.lock().unwrap(), vec![5]);
    }
}
