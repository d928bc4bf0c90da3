//! # chronoq-core
//!
//! **Merge asynchronous timestamped streams into one ordered sequence.**
//!
//! `chronoq-core` accepts items pushed concurrently onto independently named
//! channels (sensors, media feeds, log sources) and hands consumers snapshots
//! of every channel's item at the globally earliest timestamp. Producers never
//! coordinate with each other.
//!
//! ## Quick Start
//!
//! ```no_run
//! use chronoq_core::TemporalQueue;
//!
//! let queue: TemporalQueue<&str> = TemporalQueue::new();
//! queue.create_channel("a");
//! queue.create_channel("b");
//!
//! queue.push("a", "va", 10);
//! queue.push("b", "vb", 10);
//!
//! let snapshot = queue.pop().expect("both heads are due");
//! assert_eq!(snapshot.timestamp, 10);
//! assert_eq!(snapshot.len(), 2);
//! assert!(queue.pop().is_none());
//! ```
//!
//! ## Architecture
//!
//! Producers → Channels (ordered buffers) → Merge → [Sampling] → Consumers
//!
//! - **Channels** keep their items ordered by timestamp. Closing a channel
//!   rejects new pushes immediately; the channel is removed once drained.
//! - **Merge** scans every channel head, picks the earliest timestamp not later
//!   than now, and takes every channel tied at it as one [`Snapshot`].
//! - **Sampling** (optional) reduces the merged stream to one weight-biased
//!   snapshot per window, see [`sampling`].
//!
//! Timestamps are caller-supplied `i64` nanoseconds. The [`Clock`] only decides
//! which heads are due; [`ManualClock`] makes that deterministic.

pub mod buffer;
mod channel;
pub mod clock;
pub mod config;
pub mod error;
pub mod merge;
pub mod queue;
pub mod registry;
pub mod sampling;

pub use buffer::OrderedBuffer;
pub use clock::{Clock, ManualClock, SystemClock, now_ns};
pub use config::{QueueConfig, SamplingConfig};
pub use error::{QueueError, Result};
pub use merge::Snapshot;
pub use queue::{ChannelReport, QueueReport, TemporalQueue};
pub use registry::ChannelRegistry;
pub use sampling::{WindowAccumulator, WindowStep};

/// Library version (from Cargo.toml).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
