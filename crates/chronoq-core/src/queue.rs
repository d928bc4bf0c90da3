//! The public facade: a registry of named channels, the merge path over
//! them, and an optional sampling stage in front.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::clock::{Clock, SystemClock};
use crate::config::QueueConfig;
use crate::error::Result;
use crate::merge::{self, Snapshot};
use crate::registry::ChannelRegistry;
use crate::sampling::SamplingEngine;

/// Counters and state for one channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelReport {
    /// Channel name.
    pub name: String,
    /// Items currently buffered.
    pub buffered: usize,
    /// Items accepted since creation.
    pub pushed: u64,
    /// Items removed by pops.
    pub popped: u64,
    /// Pushes dropped because the channel was closing.
    pub dropped: u64,
    /// Whether the channel is closing and waiting to drain.
    pub closing: bool,
}

/// Point-in-time view of a queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueReport {
    /// Name of the clock driving eligibility.
    pub clock: String,
    /// Number of registered channels (closing ones included).
    pub total: usize,
    /// Items buffered across all channels.
    pub buffered: usize,
    /// Pushes dropped because the channel name was unknown.
    pub dropped_unknown: u64,
    /// Whether the sampling task is active.
    pub sampling: bool,
    /// Current sampling window in nanoseconds, if sampling was ever started.
    pub window_ns: Option<i64>,
    /// Sampled windows waiting to be popped.
    pub pending_samples: usize,
    /// Per-channel details, sorted by name.
    pub channels: Vec<ChannelReport>,
}

/// Multi-channel temporal merge queue.
///
/// Producers push timestamped items onto named channels from any thread.
/// Consumers pop snapshots holding every channel's item at the earliest
/// timestamp available now. With sampling started, consumers instead receive
/// one weight-biased snapshot per window.
///
/// Dropping the queue stops the sampling task and every pending close-drain
/// task.
pub struct TemporalQueue<T> {
    registry: Arc<ChannelRegistry<T>>,
    sampling: SamplingEngine<T>,
    clock: Arc<dyn Clock>,
}

impl<T: Send + 'static> Default for TemporalQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send + 'static> TemporalQueue<T> {
    /// Empty queue on the wall clock with default settings.
    pub fn new() -> Self {
        let config = QueueConfig::default();
        Self {
            registry: Arc::new(ChannelRegistry::new(config.drain_poll())),
            sampling: SamplingEngine::new(config.idle_wait()),
            clock: Arc::new(SystemClock),
        }
    }

    // -----------------------------------------------------------------------
    // Channel lifecycle
    // -----------------------------------------------------------------------

    /// Register `name`. Returns `false` if it already exists.
    pub fn create_channel(&self, name: &str) -> bool {
        self.registry.create_channel(name)
    }

    /// Stop accepting pushes on `name` and remove it once drained.
    ///
    /// Buffered items remain poppable. Returns `false` for unknown or already
    /// closing channels.
    pub fn close_channel(&self, name: &str) -> bool {
        self.registry.close_channel(name)
    }

    /// Append an item. Unknown and closing channels drop it silently.
    pub fn push(&self, name: &str, value: T, timestamp: i64) {
        self.registry.push(name, value, timestamp);
    }

    /// Append an item, reporting why it was not accepted.
    pub fn try_push(&self, name: &str, value: T, timestamp: i64) -> Result<()> {
        self.registry.try_push(name, value, timestamp)
    }

    // -----------------------------------------------------------------------
    // Consumption
    // -----------------------------------------------------------------------

    /// Whether emptiness is judged by the sampled output.
    fn reads_samples(&self) -> bool {
        self.sampling.is_active() || !self.sampling.is_empty()
    }

    /// Remove and return the next snapshot.
    ///
    /// Pending sampled windows are served first; when there are none the
    /// raw merge path answers, whether or not sampling is running.
    pub fn pop(&self) -> Option<Snapshot<T>> {
        self.sampling
            .pop()
            .or_else(|| merge::pop(&self.registry, self.clock.now_ns()))
    }

    /// Whether there is nothing to pop.
    ///
    /// Closing channels are ignored. While sampling, only the sampled output
    /// counts.
    pub fn is_empty(&self) -> bool {
        if self.reads_samples() {
            self.sampling.is_empty()
        } else {
            self.registry.is_idle()
        }
    }

    // -----------------------------------------------------------------------
    // Sampling
    // -----------------------------------------------------------------------

    /// Ask the sampling task to stop. It finishes the window in progress.
    pub fn close_sample(&self) {
        self.sampling.stop();
    }

    /// Whether the sampling task is running.
    pub fn is_sampling(&self) -> bool {
        self.sampling.is_active()
    }

    // -----------------------------------------------------------------------
    // Introspection
    // -----------------------------------------------------------------------

    /// Sorted names of registered channels, closing ones included.
    pub fn channel_names(&self) -> Vec<String> {
        self.registry.channel_names()
    }

    /// Number of registered channels.
    pub fn channel_count(&self) -> usize {
        self.registry.len()
    }

    /// Whether `name` is registered (closing or not).
    pub fn contains_channel(&self, name: &str) -> bool {
        self.registry.contains(name)
    }

    /// The time source deciding when items are due.
    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    /// Snapshot of counters for every channel.
    pub fn report(&self) -> QueueReport {
        let mut channels: Vec<ChannelReport> = self
            .registry
            .entries()
            .into_iter()
            .map(|(name, item)| {
                let (pushed, popped, dropped) = item.counters();
                ChannelReport {
                    name,
                    buffered: item.len(),
                    pushed,
                    popped,
                    dropped,
                    closing: item.is_closing(),
                }
            })
            .collect();
        channels.sort_by(|a, b| a.name.cmp(&b.name));

        let window = self.sampling.window_ns();
        QueueReport {
            clock: self.clock.name().to_string(),
            total: channels.len(),
            buffered: channels.iter().map(|c| c.buffered).sum(),
            dropped_unknown: self.registry.dropped_unknown(),
            sampling: self.sampling.is_active(),
            window_ns: (window > 0).then_some(window),
            pending_samples: self.sampling.pending(),
            channels,
        }
    }
}

impl<T: Clone + Send + 'static> TemporalQueue<T> {
    /// Build a queue on the wall clock from `config`.
    pub fn with_config(config: QueueConfig) -> Result<Self> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Build a queue from `config` driven by `clock`.
    ///
    /// Configured channels are created first, then sampling starts if the
    /// config asks for it.
    pub fn with_clock(config: QueueConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;
        let queue = Self {
            registry: Arc::new(ChannelRegistry::new(config.drain_poll())),
            sampling: SamplingEngine::new(config.idle_wait()),
            clock,
        };
        for name in &config.channels {
            queue.create_channel(name);
        }
        if let Some(sampling) = &config.sampling {
            queue.start_sample(sampling.rate, &sampling.weights)?;
        }
        log::debug!(
            "queue ready: {} channels, clock {}",
            queue.channel_count(),
            queue.clock.name()
        );
        Ok(queue)
    }

    /// Copy the next snapshot without removing anything.
    ///
    /// Looks at the same source [`pop`](Self::pop) would take from.
    pub fn head(&self) -> Option<Snapshot<T>> {
        self.sampling
            .head()
            .or_else(|| merge::head(&self.registry, self.clock.now_ns()))
    }

    /// Start (or retune) windowed sampling at `rate` windows per second.
    ///
    /// Weights are recorded only for channels registered now, and never
    /// replace a weight set earlier. Calling this while sampling only updates
    /// the window and adds weights.
    pub fn start_sample(&self, rate: u32, weights: &HashMap<String, f64>) -> Result<()> {
        self.sampling
            .start(&self.registry, &self.clock, rate, weights)
    }

    /// Weights the sampler is currently scoring with.
    pub fn sample_weights(&self) -> HashMap<String, f64> {
        self.sampling.weights()
    }
}

impl<T> Drop for TemporalQueue<T> {
    fn drop(&mut self) {
        self.sampling.shutdown();
        self.registry.shutdown();
    }
}
