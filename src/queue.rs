//! Fixed-capacity FIFO that never blocks.
//!
//! Producers (scan workers, conversion tasks, the monitor) push without
//! waiting; when the queue is full the oldest item is discarded and
//! counted. Consumers drain in batches on their own cadence.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

/// A queued payload tagged with its push sequence number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueItem<T> {
    pub seq: u64,
    pub payload: T,
}

/// Bounded drop-oldest queue.
///
/// `size() <= capacity()` holds after every operation. Sequence numbers are
/// assigned under the lock, so items popped from one queue are strictly
/// increasing in `seq`.
#[derive(Debug)]
pub struct BoundedQueue<T> {
    items: Mutex<VecDeque<QueueItem<T>>>,
    capacity: usize,
    next_seq: AtomicU64,
    dropped: AtomicU64,
}

impl<T> BoundedQueue<T> {
    /// Create a queue holding at most `capacity` items (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity,
            next_seq: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Append `payload`, evicting the oldest item if the queue is full.
    ///
    /// Returns `true` when an eviction occurred.
    pub fn push(&self, payload: T) -> bool {
        let mut items = self.items.lock();
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);

        let evicted = if items.len() >= self.capacity {
            items.pop_front();
            self.dropped.fetch_add(1, Ordering::Relaxed);
            true
        } else {
            false
        };

        items.push_back(QueueItem { seq, payload });
        evicted
    }

    /// Remove up to `max_n` items in FIFO order.
    pub fn pop_batch(&self, max_n: usize) -> Vec<T> {
        self.pop_items(max_n)
            .into_iter()
            .map(|item| item.payload)
            .collect()
    }

    /// Like [`pop_batch`](Self::pop_batch) but keeps sequence numbers.
    pub fn pop_items(&self, max_n: usize) -> Vec<QueueItem<T>> {
        let mut items = self.items.lock();
        let n = max_n.min(items.len());
        items.drain(..n).collect()
    }

    pub fn size(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total items discarded because the queue was full. Never decreases.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Total items ever pushed.
    pub fn pushed_count(&self) -> u64 {
        self.next_seq.load(Ordering::Relaxed)
    }
}
