//! Cross-channel merge: pick the channels holding the globally earliest
//! eligible timestamp and take (or copy) their heads as one snapshot.
//!
//! Selection is a single forward scan seeded with the caller's `now`:
//! - a head equal to the running minimum joins the tie set,
//! - a strictly smaller head resets the tie set and lowers the minimum,
//! - heads later than `now` are not yet eligible.
//!
//! A slow channel whose head is far in the past is always eligible, so late
//! producers never hold back faster ones. Channels that change between the
//! scan and the take (emptied, or a different head) are skipped.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::channel::ChannelItem;
use crate::registry::ChannelRegistry;

/// Items sharing one timestamp, keyed by channel name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot<T> {
    /// The shared timestamp in nanoseconds.
    pub timestamp: i64,
    /// One item per contributing channel.
    pub values: BTreeMap<String, T>,
}

impl<T> Snapshot<T> {
    /// Number of channels in the snapshot.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether no channel contributed.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Item contributed by `channel`, if any.
    pub fn get(&self, channel: &str) -> Option<&T> {
        self.values.get(channel)
    }
}

/// Indices of the channels tied at the earliest eligible head, and that timestamp.
fn select<T>(channels: &[(String, Arc<ChannelItem<T>>)], now: i64) -> Option<(i64, Vec<usize>)> {
    let mut min_ts = now;
    let mut tied = Vec::new();
    for (i, (_, item)) in channels.iter().enumerate() {
        let Some(ts) = item.head_timestamp() else {
            continue;
        };
        if ts < min_ts {
            tied.clear();
            min_ts = ts;
            tied.push(i);
        } else if ts == min_ts {
            tied.push(i);
        }
    }
    if tied.is_empty() {
        None
    } else {
        Some((min_ts, tied))
    }
}

/// Remove and return the earliest snapshot eligible at `now`.
pub fn pop<T: Send + 'static>(registry: &ChannelRegistry<T>, now: i64) -> Option<Snapshot<T>> {
    let channels = registry.entries();
    let (timestamp, tied) = select(&channels, now)?;
    let values: BTreeMap<String, T> = tied
        .into_iter()
        .filter_map(|i| {
            let (name, item) = &channels[i];
            item.pop_at(timestamp).map(|v| (name.clone(), v))
        })
        .collect();
    if values.is_empty() {
        None
    } else {
        Some(Snapshot { timestamp, values })
    }
}

/// Copy the earliest snapshot eligible at `now` without removing anything.
pub fn head<T: Clone + Send + 'static>(
    registry: &ChannelRegistry<T>,
    now: i64,
) -> Option<Snapshot<T>> {
    let channels = registry.entries();
    let (timestamp, tied) = select(&channels, now)?;
    let values: BTreeMap<String, T> = tied
        .into_iter()
        .filter_map(|i| {
            let (name, item) = &channels[i];
            item.head_at(timestamp).map(|v| (name.clone(), v))
        })
        .collect();
    if values.is_empty() {
        None
    } else {
        Some(Snapshot { timestamp, values })
    }
}
