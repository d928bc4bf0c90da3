//! Channel lifecycle item: one ordered buffer plus its closing flag and
//! in-flight operation accounting.
//!
//! Every push and pop registers itself with the in-flight counter *before*
//! inspecting the closing flag. A close-drain task that sets the flag and then
//! observes the counter at zero therefore knows no push can still land.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::buffer::OrderedBuffer;

struct InFlightState {
    active: usize,
    completed: u64,
}

/// Counts operations currently touching a channel buffer.
struct InFlight {
    state: Mutex<InFlightState>,
    changed: Condvar,
}

impl InFlight {
    fn new() -> Self {
        Self {
            state: Mutex::new(InFlightState {
                active: 0,
                completed: 0,
            }),
            changed: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, InFlightState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn enter(&self) -> InFlightGuard<'_> {
        self.lock().active += 1;
        InFlightGuard { counter: self }
    }

    fn exit(&self) {
        let mut state = self.lock();
        state.active -= 1;
        state.completed = state.completed.wrapping_add(1);
        drop(state);
        self.changed.notify_all();
    }

    fn completed(&self) -> u64 {
        self.lock().completed
    }

    /// Block until no operation is in flight, or `timeout` elapses.
    fn wait_idle(&self, timeout: Duration) -> bool {
        let state = self.lock();
        let (state, _) = self
            .changed
            .wait_timeout_while(state, timeout, |s| s.active > 0)
            .unwrap_or_else(PoisonError::into_inner);
        state.active == 0
    }

    /// Block until an operation completes after `seen`, or `timeout` elapses.
    fn wait_completion(&self, seen: u64, timeout: Duration) {
        let state = self.lock();
        let _ = self
            .changed
            .wait_timeout_while(state, timeout, |s| s.completed == seen)
            .unwrap_or_else(PoisonError::into_inner);
    }
}

struct InFlightGuard<'a> {
    counter: &'a InFlight,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.counter.exit();
    }
}

/// A named channel's buffer and lifecycle state. Owned by the registry.
pub(crate) struct ChannelItem<T> {
    buffer: OrderedBuffer<T>,
    closing: AtomicBool,
    in_flight: InFlight,
    pushed: AtomicU64,
    popped: AtomicU64,
    dropped: AtomicU64,
}

impl<T> ChannelItem<T> {
    pub(crate) fn new() -> Self {
        Self {
            buffer: OrderedBuffer::new(),
            closing: AtomicBool::new(false),
            in_flight: InFlight::new(),
            pushed: AtomicU64::new(0),
            popped: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Append an item unless the channel is closing. Returns whether it was accepted.
    pub(crate) fn push(&self, value: T, timestamp: i64) -> bool {
        let _guard = self.in_flight.enter();
        if self.closing.load(Ordering::SeqCst) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        self.buffer.push(value, timestamp);
        self.pushed.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Remove the earliest item.
    pub(crate) fn pop(&self) -> Option<(T, i64)> {
        let _guard = self.in_flight.enter();
        let item = self.buffer.pop();
        if item.is_some() {
            self.popped.fetch_add(1, Ordering::Relaxed);
        }
        item
    }

    /// Remove the earliest item if it still carries `timestamp`.
    pub(crate) fn pop_at(&self, timestamp: i64) -> Option<T> {
        let _guard = self.in_flight.enter();
        let item = self.buffer.pop_at(timestamp);
        if item.is_some() {
            self.popped.fetch_add(1, Ordering::Relaxed);
        }
        item
    }

    pub(crate) fn head_timestamp(&self) -> Option<i64> {
        self.buffer.head_timestamp()
    }

    /// Mark the channel closing. Returns `true` if this call made the transition.
    pub(crate) fn close(&self) -> bool {
        !self.closing.swap(true, Ordering::SeqCst)
    }

    pub(crate) fn is_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Counter of completed operations, for use with [`Self::wait_activity`].
    pub(crate) fn activity(&self) -> u64 {
        self.in_flight.completed()
    }

    /// Quiesce in-flight operations (bounded by `timeout`) and report whether
    /// the buffer is empty afterwards.
    pub(crate) fn is_drained(&self, timeout: Duration) -> bool {
        self.in_flight.wait_idle(timeout) && self.buffer.is_empty()
    }

    /// Wait for any operation to complete after `seen`, bounded by `timeout`.
    pub(crate) fn wait_activity(&self, seen: u64, timeout: Duration) {
        self.in_flight.wait_completion(seen, timeout);
    }

    pub(crate) fn counters(&self) -> (u64, u64, u64) {
        (
            self.pushed.load(Ordering::Relaxed),
            self.popped.load(Ordering::Relaxed),
            self.dropped.load(Ordering::Relaxed),
        )
    }
}

impl<T: Clone> ChannelItem<T> {
    pub(crate) fn head(&self) -> Option<(T, i64)> {
        self.buffer.head()
    }

    pub(crate) fn head_at(&self, timestamp: i64) -> Option<T> {
        self.buffer.head_at(timestamp)
    }
}
