//! Time sources for merge eligibility and sampling windows.
//!
//! Timestamps are plain `i64` nanosecond values; larger means later. The
//! queue only asks a clock for "now" when deciding which buffered heads are
//! eligible and where the first sampling window starts.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// A source of the current time in nanoseconds.
pub trait Clock: Send + Sync {
    /// Current time in nanoseconds.
    fn now_ns(&self) -> i64;

    /// Human-readable clock name.
    fn name(&self) -> &str {
        "unknown"
    }
}

/// Wall clock: nanoseconds since the UNIX epoch.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ns(&self) -> i64 {
        now_ns()
    }

    fn name(&self) -> &str {
        "system-wall"
    }
}

/// Current wall-clock time in nanoseconds since the UNIX epoch.
///
/// Saturates at `i64::MAX` and reads as zero before the epoch.
pub fn now_ns() -> i64 {
    let since_epoch = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    i64::try_from(since_epoch.as_nanos()).unwrap_or(i64::MAX)
}

/// A clock that only moves when told to. Useful for deterministic tests and replays.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    /// Create a clock reading `start`.
    pub fn new(start: i64) -> Self {
        Self {
            now: AtomicI64::new(start),
        }
    }

    /// Jump to `now`.
    pub fn set(&self, now: i64) {
        self.now.store(now, Ordering::SeqCst);
    }

    /// Move forward by `delta_ns` and return the new reading.
    pub fn advance(&self, delta_ns: i64) -> i64 {
        self.now.fetch_add(delta_ns, Ordering::SeqCst) + delta_ns
    }
}

impl Clock for ManualClock {
    fn now_ns(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }

    fn name(&self) -> &str {
        "manual"
    }
}
