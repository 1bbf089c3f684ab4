//! A worker-private queue of items that become due at a point in time.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Min-heap of items keyed by their due time. Items due at the same time come
/// out in insertion order.
#[derive(Debug)]
pub struct DelayingQueue<T> {
    heap: BinaryHeap<Reverse<(Instant, u64, Entry<T>)>>,
    sequence: u64,
}

/// Wrapper ordering only by the surrounding key.
#[derive(Debug)]
struct Entry<T>(T);

impl<T> PartialEq for Entry<T> {
    fn eq(&self, _: &Self) -> bool {
        true
    }
}

impl<T> Eq for Entry<T> {}

impl<T> PartialOrd for Entry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Entry<T> {
    fn cmp(&self, _: &Self) -> std::cmp::Ordering {
        std::cmp::Ordering::Equal
    }
}

impl<T> Default for DelayingQueue<T> {
    fn default() -> Self {
        Self {
            heap: BinaryHeap::new(),
            sequence: 0,
        }
    }
}

impl<T> DelayingQueue<T> {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an item that is due immediately.
    pub fn add(&mut self, item: T) {
        self.add_after(item, Duration::ZERO);
    }

    /// Adds an item that becomes due after `delay`.
    pub fn add_after(&mut self, item: T, delay: Duration) {
        self.sequence += 1;
        self.heap
            .push(Reverse((Instant::now() + delay, self.sequence, Entry(item))));
    }

    /// Number of queued items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// Returns true if no item is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Waits for the next due item.
    ///
    /// Returns `None` when the queue is empty or when `cancel` fires first;
    /// remaining items are abandoned in the latter case.
    pub async fn next(&mut self, cancel: &CancellationToken) -> Option<T> {
        let due = self.heap.peek().map(|Reverse((due, _, _))| *due)?;
        tokio::select! {
            biased;
            () = cancel.cancelled() => None,
            () = tokio::time::sleep_until(due) => {
                self.heap.pop().map(|Reverse((_, _, Entry(item)))| item)
            }
        }
    }
}
