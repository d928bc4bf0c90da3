//! Per-channel ordered buffer.
//!
//! A thread-safe min-priority queue keyed by a 64-bit timestamp. Items with
//! equal timestamps come out in insertion order.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::{Mutex, MutexGuard, PoisonError};

struct Entry<T> {
    timestamp: i64,
    seq: u64,
    value: T,
}

// Reversed so that `BinaryHeap` (a max-heap) yields the earliest entry first.
impl<T> Ord for Entry<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .timestamp
            .cmp(&self.timestamp)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl<T> PartialOrd for Entry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> PartialEq for Entry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.timestamp == other.timestamp && self.seq == other.seq
    }
}

impl<T> Eq for Entry<T> {}

struct Heap<T> {
    entries: BinaryHeap<Entry<T>>,
    next_seq: u64,
}

/// Thread-safe buffer ordered ascending by timestamp.
pub struct OrderedBuffer<T> {
    inner: Mutex<Heap<T>>,
}

impl<T> OrderedBuffer<T> {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Heap {
                entries: BinaryHeap::new(),
                next_seq: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Heap<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert `value` at `timestamp`.
    pub fn push(&self, value: T, timestamp: i64) {
        let mut heap = self.lock();
        let seq = heap.next_seq;
        heap.next_seq = heap.next_seq.wrapping_add(1);
        heap.entries.push(Entry {
            timestamp,
            seq,
            value,
        });
    }

    /// Remove and return the earliest item.
    pub fn pop(&self) -> Option<(T, i64)> {
        self.lock().entries.pop().map(|e| (e.value, e.timestamp))
    }

    /// Remove the earliest item only if it carries exactly `timestamp`.
    pub fn pop_at(&self, timestamp: i64) -> Option<T> {
        let mut heap = self.lock();
        match heap.entries.peek() {
            Some(head) if head.timestamp == timestamp => heap.entries.pop().map(|e| e.value),
            _ => None,
        }
    }

    /// Timestamp of the earliest item, if any.
    pub fn head_timestamp(&self) -> Option<i64> {
        self.lock().entries.peek().map(|e| e.timestamp)
    }

    /// Number of buffered items.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    /// Whether the buffer holds no items.
    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }
}

impl<T: Clone> OrderedBuffer<T> {
    /// Copy of the earliest item without removing it.
    pub fn head(&self) -> Option<(T, i64)> {
        self.lock()
            .entries
            .peek()
            .map(|e| (e.value.clone(), e.timestamp))
    }

    /// Copy of the earliest item only if it carries exactly `timestamp`.
    pub fn head_at(&self, timestamp: i64) -> Option<T> {
        self.lock()
            .entries
            .peek()
            .filter(|e| e.timestamp == timestamp)
            .map(|e| e.value.clone())
    }
}

impl<T> Default for OrderedBuffer<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pop_returns_ascending_timestamps() {
        let buf = OrderedBuffer::new();
        buf.push("c", 30);
        buf.push("a", 10);
        buf.push("b", 20);
        assert_eq!(buf.pop(), Some(("a", 10)));
        assert_eq!(buf.pop(), Some(("b", 20)));
        assert_eq!(buf.pop(), Some(("c", 30)));
        assert_eq!(buf.pop(), None);
    }

    #[test]
    fn test_equal_timestamps_keep_insertion_order() {
        let buf = OrderedBuffer::new();
        buf.push(1, 5);
        buf.push(2, 5);
        buf.push(3, 5);
        let order: Vec<i32> = std::iter::from_fn(|| buf.pop().map(|(v, _)| v)).collect();
        assert_eq!(order, vec![1, 2, 3]);
    }

    #[test]
    fn test_head_does_not_remove() {
        let buf = OrderedBuffer::new();
        buf.push("x".to_string(), 7);
        assert_eq!(buf.head(), Some(("x".to_string(), 7)));
        assert_eq!(buf.len(), 1);
        assert_eq!(buf.head_timestamp(), Some(7));
    }

    #[test]
    fn test_pop_at_requires_matching_head() {
        let buf = OrderedBuffer::new();
        buf.push('a', 100);
        assert_eq!(buf.pop_at(50), None);
        assert_eq!(buf.len(), 1);
        assert_eq!(buf.pop_at(100), Some('a'));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_head_at_requires_matching_head() {
        let buf = OrderedBuffer::new();
        buf.push(9u8, -3);
        assert_eq!(buf.head_at(0), None);
        assert_eq!(buf.head_at(-3), Some(9));
    }

    #[test]
    fn test_empty_buffer() {
        let buf: OrderedBuffer<u32> = OrderedBuffer::default();
        assert!(buf.is_empty());
        assert_eq!(buf.len(), 0);
        assert_eq!(buf.pop(), None);
        assert_eq!(buf.head(), None);
        assert_eq!(buf.head_timestamp(), None);
    }

    #[test]
    fn test_concurrent_pushes_all_arrive() {
        let buf = OrderedBuffer::new();
        std::thread::scope(|s| {
            for t in 0..4i64 {
                let buf = &buf;
                s.spawn(move || {
                    for i in 0..250i64 {
                        buf.push(t * 1000 + i, t * 1000 + i);
                    }
                });
            }
        });
        assert_eq!(buf.len(), 1000);
        let mut prev = i64::MIN;
        while let Some((_, ts)) = buf.pop() {
            assert!(ts >= prev);
            prev = ts;
        }
    }
}
