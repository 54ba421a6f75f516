//! Bounded FIFO of outbound messages attempted while not connected.

use super::MessageOut;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Replay queue with drop-oldest overflow.
///
/// The drop counter is shared with the connection handle so callers can read
/// it without going through the event loop.
#[derive(Debug)]
pub struct ReplayQueue {
    messages: VecDeque<MessageOut>,
    capacity: usize,
    dropped: Arc<AtomicU64>,
}

impl ReplayQueue {
    pub fn new(capacity: usize) -> Self {
        Self::with_counter(capacity, Arc::new(AtomicU64::new(0)))
    }

    pub(crate) fn with_counter(capacity: usize, dropped: Arc<AtomicU64>) -> Self {
        let capacity = capacity.max(1);
        Self {
            messages: VecDeque::with_capacity(capacity),
            capacity,
            dropped,
        }
    }

    /// Enqueue at the back. Returns the total drop count if the oldest
    /// entry had to be evicted.
    pub fn push(&mut self, message: MessageOut) -> Option<u64> {
        let mut overflow = None;
        if self.messages.len() >= self.capacity {
            self.messages.pop_front();
            let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            tracing::warn!(
                capacity = self.capacity,
                dropped_total = total,
                "Replay queue full, dropped oldest message"
            );
            overflow = Some(total);
        }
        self.messages.push_back(message);
        overflow
    }

    /// Put a message that failed to send back at the front. Never evicts
    /// older entries; if full, the returned message is the one dropped.
    pub fn requeue_front(&mut self, message: MessageOut) -> Option<u64> {
        if self.messages.len() >= self.capacity {
            let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            return Some(total);
        }
        self.messages.push_front(message);
        None
    }

    /// Take everything, oldest first.
    pub fn drain(&mut self) -> Vec<MessageOut> {
        self.messages.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Total messages dropped since creation.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
