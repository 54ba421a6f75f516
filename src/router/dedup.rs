//! Per-channel sequence tracking with a bounded history of seen sequences.

use std::collections::{HashSet, VecDeque};

/// What the sequence tracker decided about an incoming sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceCheck {
    /// Next expected sequence (or the first one seen).
    InOrder,
    /// Accepted, but `expected` was skipped.
    Gap { expected: u64 },
    /// Already seen within the window.
    Duplicate,
    /// Older than the last accepted sequence and not in the window.
    Stale { last: u64 },
}

/// Bounded set of recently seen sequences, evicting the oldest.
#[derive(Debug)]
pub(crate) struct SeenWindow {
    order: VecDeque<u64>,
    set: HashSet<u64>,
    capacity: usize,
}

impl SeenWindow {
    pub(crate) fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            order: VecDeque::with_capacity(capacity),
            set: HashSet::with_capacity(capacity),
            capacity,
        }
    }

    pub(crate) fn contains(&self, sequence: u64) -> bool {
        self.set.contains(&sequence)
    }

    pub(crate) fn insert(&mut self, sequence: u64) {
        if !self.set.insert(sequence) {
            return;
        }
        self.order.push_back(sequence);
        while self.order.len() > self.capacity {
            if let Some(old) = self.order.pop_front() {
                self.set.remove(&old);
            }
        }
    }

    /// Grow (never shrink) the window.
    pub(crate) fn ensure_capacity(&mut self, capacity: usize) {
        self.capacity = self.capacity.max(capacity);
    }

    #[cfg(test)]
    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    pub(crate) fn clear(&mut self) {
        self.order.clear();
        self.set.clear();
    }
}

/// Sequence state of one channel.
#[derive(Debug)]
pub(crate) struct ChannelSequence {
    last: Option<u64>,
    seen: SeenWindow,
}

impl ChannelSequence {
    pub(crate) fn new(window: usize) -> Self {
        Self {
            last: None,
            seen: SeenWindow::new(window),
        }
    }

    /// Classify `sequence` and, if it is accepted, record it.
    pub(crate) fn check(&mut self, sequence: u64) -> SequenceCheck {
        if self.seen.contains(sequence) {
            return SequenceCheck::Duplicate;
        }
        let verdict = match self.last {
            None => SequenceCheck::InOrder,
            Some(last) if sequence <= last => return SequenceCheck::Stale { last },
            Some(last) if sequence == last + 1 => SequenceCheck::InOrder,
            Some(last) => SequenceCheck::Gap { expected: last + 1 },
        };
        self.seen.insert(sequence);
        self.last = Some(sequence);
        verdict
    }

    pub(crate) fn window(&mut self) -> &mut SeenWindow {
        &mut self.seen
    }

    /// Forget counters, e.g. after the venue restarted its sequence on reconnect.
    pub(crate) fn reset(&mut self) {
        self.last = None;
        self.seen.clear();
    }
}
