//! Windowed, weight-biased sampling of the merged stream.
//!
//! A background task drains the merge path and reduces every window of
//! snapshots to one representative snapshot:
//!
//! 1. Each in-window snapshot is scored as the sum of its channels' weights.
//! 2. Its values are folded into a running result (last write wins per channel).
//! 3. When a snapshot lands at or beyond `window_start + window`, its timestamp
//!    becomes the next window start, the highest-scoring buffered snapshot is
//!    overlaid onto the running result, and that result is published.
//!
//! Windows are event-aligned: the snapshot that crosses a boundary only moves
//! the window start and is otherwise consumed. Score ties go to the latest
//! snapshot, and the running maximum starts at zero, so a window whose scores
//! are all negative is anchored by its first snapshot.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::channel::ChannelItem;
use crate::clock::Clock;
use crate::config::{validate_weights, window_ns};
use crate::error::{QueueError, Result};
use crate::merge::{self, Snapshot};
use crate::registry::ChannelRegistry;

/// Sum of the configured weights of the channels present in `values`.
pub fn score<T>(values: &BTreeMap<String, T>, weights: &HashMap<String, f64>) -> f64 {
    values.keys().filter_map(|k| weights.get(k)).sum()
}

/// Outcome of feeding one snapshot to a [`WindowAccumulator`].
#[derive(Debug, Clone, PartialEq)]
pub enum WindowStep<T> {
    /// The snapshot fell inside the current window and was buffered.
    Open,
    /// The snapshot crossed the boundary. Carries the window's representative
    /// snapshot, or `None` if nothing was buffered.
    Closed(Option<Snapshot<T>>),
}

/// Reduces a stream of snapshots to one representative snapshot per window.
#[derive(Debug)]
pub struct WindowAccumulator<T> {
    window_start: i64,
    buffer: Vec<BTreeMap<String, T>>,
    approx: BTreeMap<String, T>,
    max_index: usize,
    max_score: f64,
}

impl<T: Clone> WindowAccumulator<T> {
    /// Start the first window at `window_start`.
    pub fn new(window_start: i64) -> Self {
        Self {
            window_start,
            buffer: Vec::new(),
            approx: BTreeMap::new(),
            max_index: 0,
            max_score: 0.0,
        }
    }

    /// Start of the current window.
    pub fn window_start(&self) -> i64 {
        self.window_start
    }

    /// Snapshots buffered in the current window.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Feed one snapshot, using a window of `window_ns` and the given weights.
    pub fn observe(
        &mut self,
        snapshot: Snapshot<T>,
        window_ns: i64,
        weights: &HashMap<String, f64>,
    ) -> WindowStep<T> {
        if snapshot.timestamp.saturating_sub(self.window_start) < window_ns {
            let s = score(&snapshot.values, weights);
            for (k, v) in &snapshot.values {
                self.approx.insert(k.clone(), v.clone());
            }
            self.buffer.push(snapshot.values);
            if s >= self.max_score {
                self.max_score = s;
                self.max_index = self.buffer.len() - 1;
            }
            return WindowStep::Open;
        }

        self.window_start = snapshot.timestamp;
        let buffer = std::mem::take(&mut self.buffer);
        let mut approx = std::mem::take(&mut self.approx);
        let max_index = std::mem::replace(&mut self.max_index, 0);
        self.max_score = 0.0;

        let Some(anchor) = buffer.into_iter().nth(max_index) else {
            return WindowStep::Closed(None);
        };
        approx.extend(anchor);
        WindowStep::Closed(Some(Snapshot {
            timestamp: self.window_start,
            values: approx,
        }))
    }
}

/// State shared between the queue and its sampling task.
struct Shared<T> {
    active: AtomicBool,
    window_ns: AtomicI64,
    weights: RwLock<HashMap<String, f64>>,
    output: RwLock<Arc<ChannelItem<Snapshot<T>>>>,
}

/// Owns the sampling task and its output channel.
pub(crate) struct SamplingEngine<T> {
    shared: Arc<Shared<T>>,
    task: Mutex<Option<JoinHandle<()>>>,
    idle_wait: Duration,
}

impl<T: Send + 'static> SamplingEngine<T> {
    pub(crate) fn new(idle_wait: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                active: AtomicBool::new(false),
                window_ns: AtomicI64::new(0),
                weights: RwLock::new(HashMap::new()),
                output: RwLock::new(Arc::new(ChannelItem::new())),
            }),
            task: Mutex::new(None),
            idle_wait,
        }
    }

    fn output(&self) -> Arc<ChannelItem<Snapshot<T>>> {
        Arc::clone(&self.shared.output.read().unwrap_or_else(PoisonError::into_inner))
    }

    pub(crate) fn pop(&self) -> Option<Snapshot<T>> {
        self.output().pop().map(|(snapshot, _)| snapshot)
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.output().is_empty()
    }

    pub(crate) fn pending(&self) -> usize {
        self.output().len()
    }

    pub(crate) fn window_ns(&self) -> i64 {
        self.shared.window_ns.load(Ordering::SeqCst)
    }

    pub(crate) fn weights(&self) -> HashMap<String, f64> {
        self.shared
            .weights
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Flag sampling as running without spawning a task.
    #[cfg(test)]
    pub(crate) fn mark_active(&self) {
        self.shared.active.store(true, Ordering::SeqCst);
    }

    /// Queue a window on the output as the task would.
    #[cfg(test)]
    pub(crate) fn publish(&self, snapshot: Snapshot<T>) {
        let timestamp = snapshot.timestamp;
        self.output().push(snapshot, timestamp);
    }
}

impl<T> SamplingEngine<T> {
    fn task(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.task.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn is_active(&self) -> bool {
        self.shared.active.load(Ordering::SeqCst)
    }

    /// Signal the task to stop at its next idle point.
    pub(crate) fn stop(&self) {
        if self.shared.active.swap(false, Ordering::SeqCst) {
            log::info!("sampling stopping");
        }
    }

    /// Stop the task and wait for it to exit.
    pub(crate) fn shutdown(&self) {
        self.stop();
        if let Some(handle) = self.task().take() {
            let _ = handle.join();
        }
    }
}

impl<T: Clone + Send + 'static> SamplingEngine<T> {
    pub(crate) fn head(&self) -> Option<Snapshot<T>> {
        self.output().head().map(|(snapshot, _)| snapshot)
    }

    /// Merge weights, set the window from `rate`, and launch the task if idle.
    ///
    /// Weights are only recorded for channels registered right now, and a
    /// channel that already has a weight keeps it.
    pub(crate) fn start(
        &self,
        registry: &Arc<ChannelRegistry<T>>,
        clock: &Arc<dyn Clock>,
        rate: u32,
        weights: &HashMap<String, f64>,
    ) -> Result<()> {
        let window = window_ns(rate)?;
        validate_weights(weights)?;

        let mut task = self.task();
        {
            let mut current = self
                .shared
                .weights
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            for (channel, weight) in weights {
                if registry.contains(channel) && !current.contains_key(channel) {
                    current.insert(channel.clone(), *weight);
                }
            }
        }
        self.shared.window_ns.store(window, Ordering::SeqCst);

        if self.shared.active.load(Ordering::SeqCst) {
            log::debug!("sampling already running; window now {window} ns");
            return Ok(());
        }
        if let Some(stale) = task.take() {
            let _ = stale.join();
        }

        let output = Arc::new(ChannelItem::new());
        *self
            .shared
            .output
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Arc::clone(&output);
        let window_start = clock.now_ns();
        self.shared.active.store(true, Ordering::SeqCst);

        let shared = Arc::clone(&self.shared);
        let registry = Arc::clone(registry);
        let clock = Arc::clone(clock);
        let idle_wait = self.idle_wait;
        let spawned = thread::Builder::new()
            .name("chronoq-sampler".to_string())
            .spawn(move || run(&shared, &registry, clock.as_ref(), &output, window_start, idle_wait));

        match spawned {
            Ok(handle) => {
                *task = Some(handle);
                log::info!("sampling started at {rate} windows/s");
                Ok(())
            }
            Err(e) => {
                self.shared.active.store(false, Ordering::SeqCst);
                Err(QueueError::Spawn(e))
            }
        }
    }
}

/// Sampling task body.
///
/// Once the active flag is cleared the task exits at the next window
/// boundary, or as soon as the merge path runs dry.
fn run<T: Clone + Send + 'static>(
    shared: &Shared<T>,
    registry: &ChannelRegistry<T>,
    clock: &dyn Clock,
    output: &ChannelItem<Snapshot<T>>,
    window_start: i64,
    idle_wait: Duration,
) {
    let mut acc = WindowAccumulator::new(window_start);
    loop {
        if !shared.active.load(Ordering::SeqCst) && acc.buffered() == 0 {
            break;
        }
        let seen = registry.push_epoch();
        let Some(snapshot) = merge::pop(registry, clock.now_ns()) else {
            if !shared.active.load(Ordering::SeqCst) {
                break;
            }
            registry.wait_for_push(seen, idle_wait);
            continue;
        };

        let window = shared.window_ns.load(Ordering::SeqCst);
        let step = {
            let weights = shared.weights.read().unwrap_or_else(PoisonError::into_inner);
            acc.observe(snapshot, window, &weights)
        };
        if let WindowStep::Closed(Some(result)) = step {
            log::debug!(
                "window closed at {} with {} channels",
                result.timestamp,
                result.len()
            );
            let ts = result.timestamp;
            output.push(result, ts);
        }
    }
    log::debug!("sampling task exited ({} snapshots abandoned)", acc.buffered());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::time::Instant;

    fn snap(ts: i64, pairs: &[(&str, i32)]) -> Snapshot<i32> {
        Snapshot {
            timestamp: ts,
            values: pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
        }
    }

    fn weights(pairs: &[(&str, f64)]) -> HashMap<String, f64> {
        pairs.iter().map(|(k, w)| (k.to_string(), *w)).collect()
    }

    // -----------------------------------------------------------------------
    // Scoring
    // -----------------------------------------------------------------------

    #[test]
    fn test_score_sums_present_channels() {
        let w = weights(&[("a", 1.0), ("b", 0.5), ("c", 4.0)]);
        let s = snap(0, &[("a", 1), ("b", 2), ("z", 3)]);
        assert!((score(&s.values, &w) - 1.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_score_unweighted_is_zero() {
        let s = snap(0, &[("a", 1)]);
        assert_eq!(score(&s.values, &HashMap::new()), 0.0);
    }

    // -----------------------------------------------------------------------
    // Window accumulation
    // -----------------------------------------------------------------------

    #[test]
    fn test_in_window_snapshots_are_buffered() {
        let mut acc = WindowAccumulator::new(0);
        assert_eq!(acc.observe(snap(10, &[("a", 1)]), 100, &HashMap::new()), WindowStep::Open);
        assert_eq!(acc.observe(snap(99, &[("a", 2)]), 100, &HashMap::new()), WindowStep::Open);
        assert_eq!(acc.buffered(), 2);
    }

    #[test]
    fn test_boundary_emits_at_boundary_timestamp() {
        let mut acc = WindowAccumulator::new(0);
        acc.observe(snap(10, &[("a", 1)]), 100, &HashMap::new());
        let WindowStep::Closed(Some(out)) = acc.observe(snap(100, &[("a", 2)]), 100, &HashMap::new())
        else {
            panic!("expected a closed window");
        };
        assert_eq!(out.timestamp, 100);
        assert_eq!(out.get("a"), Some(&1), "the boundary snapshot is not part of the result");
        assert_eq!(acc.window_start(), 100);
        assert_eq!(acc.buffered(), 0);
    }

    #[test]
    fn test_empty_window_emits_nothing() {
        let mut acc: WindowAccumulator<i32> = WindowAccumulator::new(0);
        assert_eq!(
            acc.observe(snap(500, &[("a", 1)]), 100, &HashMap::new()),
            WindowStep::Closed(None)
        );
        assert_eq!(acc.window_start(), 500);
    }

    #[test]
    fn test_highest_score_anchors_result() {
        let w = weights(&[("cam", 2.0), ("imu", 1.0)]);
        let mut acc = WindowAccumulator::new(0);
        acc.observe(snap(1, &[("imu", 10)]), 100, &w);
        acc.observe(snap(2, &[("cam", 20), ("imu", 11)]), 100, &w);
        acc.observe(snap(3, &[("imu", 12)]), 100, &w);
        let WindowStep::Closed(Some(out)) = acc.observe(snap(200, &[("imu", 13)]), 100, &w) else {
            panic!("expected a closed window");
        };
        // The best-scoring snapshot (t=2) overwrites the later imu value.
        assert_eq!(out.get("cam"), Some(&20));
        assert_eq!(out.get("imu"), Some(&11));
    }

    #[test]
    fn test_non_anchor_channels_filled_from_window() {
        let w = weights(&[("a", 1.0)]);
        let mut acc = WindowAccumulator::new(0);
        acc.observe(snap(1, &[("b", 7)]), 100, &w);
        acc.observe(snap(2, &[("a", 1)]), 100, &w);
        let WindowStep::Closed(Some(out)) = acc.observe(snap(150, &[("a", 2)]), 100, &w) else {
            panic!("expected a closed window");
        };
        assert_eq!(out.len(), 2);
        assert_eq!(out.get("b"), Some(&7));
        assert_eq!(out.get("a"), Some(&1));
    }

    #[test]
    fn test_score_ties_pick_latest() {
        let w = weights(&[("a", 1.0), ("b", 1.0)]);
        let mut acc = WindowAccumulator::new(0);
        acc.observe(snap(1, &[("a", 1)]), 100, &w);
        acc.observe(snap(2, &[("b", 2)]), 100, &w);
        acc.observe(snap(3, &[("a", 3)]), 100, &w);
        let WindowStep::Closed(Some(out)) = acc.observe(snap(100, &[]), 100, &w) else {
            panic!("expected a closed window");
        };
        assert_eq!(out.get("a"), Some(&3));
        assert_eq!(out.get("b"), Some(&2));
    }

    #[test]
    fn test_negative_scores_never_displace_first() {
        let w = weights(&[("a", -1.0), ("b", -2.0)]);
        let mut acc = WindowAccumulator::new(0);
        acc.observe(snap(1, &[("a", 1), ("b", 1)]), 100, &w);
        acc.observe(snap(2, &[("a", 2), ("b", 2)]), 100, &w);
        let WindowStep::Closed(Some(out)) = acc.observe(snap(100, &[]), 100, &w) else {
            panic!("expected a closed window");
        };
        // Index 0 anchors, overwriting the later values.
        assert_eq!(out.get("a"), Some(&1));
        assert_eq!(out.get("b"), Some(&1));
    }

    #[test]
    fn test_snapshots_before_window_start_count_as_inside() {
        let mut acc = WindowAccumulator::new(1_000);
        assert_eq!(acc.observe(snap(10, &[("a", 1)]), 100, &HashMap::new()), WindowStep::Open);
    }

    #[test]
    fn test_window_state_resets_between_windows() {
        let w = weights(&[("a", 5.0)]);
        let mut acc = WindowAccumulator::new(0);
        acc.observe(snap(1, &[("a", 1)]), 100, &w);
        acc.observe(snap(100, &[]), 100, &w);
        acc.observe(snap(101, &[("b", 2)]), 100, &w);
        let WindowStep::Closed(Some(out)) = acc.observe(snap(200, &[]), 100, &w) else {
            panic!("expected a closed window");
        };
        assert_eq!(out.values.keys().collect::<Vec<_>>(), vec!["b"]);
    }

    // -----------------------------------------------------------------------
    // Background task
    // -----------------------------------------------------------------------

    fn wait_for<T: Send + 'static>(engine: &SamplingEngine<T>, n: usize) -> bool {
        let start = Instant::now();
        while start.elapsed() < Duration::from_secs(5) {
            if engine.pending() >= n {
                return true;
            }
            thread::sleep(Duration::from_millis(1));
        }
        false
    }

    #[test]
    fn test_engine_emits_one_snapshot_per_window() {
        let registry = Arc::new(ChannelRegistry::new(Duration::from_millis(1)));
        registry.create_channel("a");
        let clock_impl = Arc::new(ManualClock::new(0));
        let clock: Arc<dyn Clock> = clock_impl.clone();
        let engine = SamplingEngine::new(Duration::from_micros(200));

        engine.start(&registry, &clock, 10, &weights(&[("a", 1.0)])).unwrap();
        assert!(engine.is_active());
        assert_eq!(engine.window_ns(), 100_000_000);

        clock_impl.set(1_000_000_000);
        for i in 0..=300i64 {
            registry.push("a", i as i32, i * 1_000_000);
        }
        assert!(wait_for(&engine, 3));
        engine.shutdown();

        let mut emitted = Vec::new();
        while let Some(s) = engine.pop() {
            emitted.push(s);
        }
        assert_eq!(emitted.len(), 3);
        assert_eq!(
            emitted.iter().map(|s| s.timestamp).collect::<Vec<_>>(),
            vec![100_000_000, 200_000_000, 300_000_000]
        );
        for s in &emitted {
            assert_eq!(s.len(), 1);
        }
    }

    #[test]
    fn test_restart_keeps_existing_weights() {
        let registry = Arc::new(ChannelRegistry::<i32>::new(Duration::from_millis(1)));
        registry.create_channel("a");
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(0));
        let engine = SamplingEngine::new(Duration::from_micros(200));

        engine.start(&registry, &clock, 5, &weights(&[("a", 1.0), ("ghost", 3.0)])).unwrap();
        engine.start(&registry, &clock, 20, &weights(&[("a", 9.0)])).unwrap();
        let w = engine.weights();
        assert_eq!(w.get("a"), Some(&1.0));
        assert!(!w.contains_key("ghost"), "weights only apply to registered channels");
        assert_eq!(engine.window_ns(), 50_000_000);
        engine.shutdown();
        assert!(!engine.is_active());
    }

    #[test]
    fn test_invalid_rate_leaves_engine_idle() {
        let registry = Arc::new(ChannelRegistry::<i32>::new(Duration::from_millis(1)));
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(0));
        let engine = SamplingEngine::new(Duration::from_micros(200));
        assert!(matches!(
            engine.start(&registry, &clock, 0, &HashMap::new()),
            Err(QueueError::InvalidSampleRate)
        ));
        assert!(!engine.is_active());
    }

    #[test]
    fn test_shutdown_joins_idle_task_promptly() {
        let registry = Arc::new(ChannelRegistry::<i32>::new(Duration::from_millis(1)));
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(0));
        let engine = SamplingEngine::new(Duration::from_millis(1));
        engine.start(&registry, &clock, 30, &HashMap::new()).unwrap();
        let start = Instant::now();
        engine.shutdown();
        assert!(start.elapsed() < Duration::from_secs(2));
    }
}
