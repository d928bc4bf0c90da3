//! Concurrent registry mapping channel names to their buffers.
//!
//! Closing a channel is two-phase: the closing flag is raised immediately so
//! further pushes are dropped, and a close-drain task removes the entry once
//! in-flight operations have quiesced and the buffer has been popped empty.
//! A channel nobody drains stays registered until the registry shuts down.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::channel::ChannelItem;
use crate::error::{QueueError, Result};

/// Wakes waiters when any channel receives a push.
///
/// Pushers only touch the mutex when somebody is actually waiting.
struct PushSignal {
    epoch: AtomicU64,
    waiters: AtomicUsize,
    lock: Mutex<()>,
    cv: Condvar,
}

impl PushSignal {
    fn new() -> Self {
        Self {
            epoch: AtomicU64::new(0),
            waiters: AtomicUsize::new(0),
            lock: Mutex::new(()),
            cv: Condvar::new(),
        }
    }

    fn notify(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        if self.waiters.load(Ordering::SeqCst) > 0 {
            let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
            self.cv.notify_all();
        }
    }

    fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    fn wait_since(&self, seen: u64, timeout: Duration) {
        self.waiters.fetch_add(1, Ordering::SeqCst);
        let guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        if self.epoch.load(Ordering::SeqCst) == seen {
            let _ = self
                .cv
                .wait_timeout(guard, timeout)
                .unwrap_or_else(PoisonError::into_inner);
        }
        self.waiters.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Thread-safe name → channel mapping with deferred removal of closed channels.
pub struct ChannelRegistry<T> {
    channels: RwLock<HashMap<String, Arc<ChannelItem<T>>>>,
    signal: PushSignal,
    shutdown: AtomicBool,
    reapers: Mutex<Vec<JoinHandle<()>>>,
    drain_poll: Duration,
    dropped_unknown: AtomicU64,
}

impl<T: Send + 'static> ChannelRegistry<T> {
    /// Create an empty registry whose close-drain tasks re-check every `drain_poll`.
    pub fn new(drain_poll: Duration) -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            signal: PushSignal::new(),
            shutdown: AtomicBool::new(false),
            reapers: Mutex::new(Vec::new()),
            drain_poll: drain_poll.max(Duration::from_millis(1)),
            dropped_unknown: AtomicU64::new(0),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<ChannelItem<T>>>> {
        self.channels.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Arc<ChannelItem<T>>>> {
        self.channels.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `name` with an empty buffer. Returns `false` if it already exists.
    pub fn create_channel(&self, name: &str) -> bool {
        if self.read().contains_key(name) {
            return false;
        }
        let mut channels = self.write();
        if channels.contains_key(name) {
            return false;
        }
        channels.insert(name.to_string(), Arc::new(ChannelItem::new()));
        log::debug!("channel `{name}` created");
        true
    }

    /// Start closing `name`: reject further pushes and schedule removal once drained.
    ///
    /// Returns `true` if this call started the close; `false` for unknown names
    /// and channels that are already closing.
    pub fn close_channel(self: &Arc<Self>, name: &str) -> bool {
        let Some(item) = self.get(name) else {
            return false;
        };
        if !item.close() {
            return false;
        }
        log::debug!("channel `{name}` closing with {} buffered", item.len());

        let registry = Arc::clone(self);
        let owned = name.to_string();
        let spawned = thread::Builder::new()
            .name("chronoq-drain".to_string())
            .spawn(move || registry.drain_and_remove(&owned, &item));

        match spawned {
            Ok(handle) => {
                let mut reapers = self.reapers.lock().unwrap_or_else(PoisonError::into_inner);
                reapers.retain(|h| !h.is_finished());
                reapers.push(handle);
            }
            Err(e) => {
                log::warn!("channel `{name}` will stay registered: drain task failed to start: {e}");
            }
        }
        true
    }

    fn drain_and_remove(&self, name: &str, item: &Arc<ChannelItem<T>>) {
        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                log::debug!("drain of `{name}` abandoned at shutdown ({} left)", item.len());
                return;
            }
            let seen = item.activity();
            if item.is_drained(self.drain_poll) {
                let mut channels = self.write();
                if channels.get(name).is_some_and(|c| Arc::ptr_eq(c, item)) {
                    channels.remove(name);
                    log::info!("channel `{name}` drained and removed");
                }
                return;
            }
            item.wait_activity(seen, self.drain_poll);
        }
    }

    /// Append to `name`. Unknown and closing channels drop the item silently.
    pub fn push(&self, name: &str, value: T, timestamp: i64) {
        let _ = self.try_push(name, value, timestamp);
    }

    /// Append to `name`, reporting why an item was not accepted.
    pub fn try_push(&self, name: &str, value: T, timestamp: i64) -> Result<()> {
        let Some(item) = self.get(name) else {
            self.dropped_unknown.fetch_add(1, Ordering::Relaxed);
            return Err(QueueError::UnknownChannel(name.to_string()));
        };
        if !item.push(value, timestamp) {
            return Err(QueueError::ChannelClosing(name.to_string()));
        }
        self.signal.notify();
        Ok(())
    }

    pub(crate) fn get(&self, name: &str) -> Option<Arc<ChannelItem<T>>> {
        self.read().get(name).cloned()
    }

    /// Point-in-time copy of every registered channel.
    pub(crate) fn entries(&self) -> Vec<(String, Arc<ChannelItem<T>>)> {
        self.read()
            .iter()
            .map(|(name, item)| (name.clone(), Arc::clone(item)))
            .collect()
    }

    /// Whether `name` is registered (closing channels included).
    pub fn contains(&self, name: &str) -> bool {
        self.read().contains_key(name)
    }

    /// Whether `name` is registered and closing.
    pub fn is_closing(&self, name: &str) -> bool {
        self.get(name).is_some_and(|item| item.is_closing())
    }

    /// Sorted names of registered channels.
    pub fn channel_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of registered channels.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Whether no channel is registered.
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// True iff no non-closing channel holds a buffered item.
    pub fn is_idle(&self) -> bool {
        self.read()
            .values()
            .all(|item| item.is_closing() || item.is_empty())
    }

    /// Pushes dropped because the channel name was unknown.
    pub fn dropped_unknown(&self) -> u64 {
        self.dropped_unknown.load(Ordering::Relaxed)
    }

    /// Push counter, for use with [`Self::wait_for_push`].
    pub fn push_epoch(&self) -> u64 {
        self.signal.epoch()
    }

    /// Block until a push lands after `seen`, or `timeout` elapses.
    pub fn wait_for_push(&self, seen: u64, timeout: Duration) {
        self.signal.wait_since(seen, timeout);
    }
}

impl<T> ChannelRegistry<T> {
    /// Stop every close-drain task and wait for them to exit.
    ///
    /// Channels still waiting to drain stay registered.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        let handles: Vec<_> = self
            .reapers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for handle in handles {
            let _ = handle.join();
        }
    }
}
