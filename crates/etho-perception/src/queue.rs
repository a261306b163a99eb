//! Bounded FIFO of timestamped snapshots with closest-timestamp lookup.

use std::collections::VecDeque;

use etho_types::WorldSnapshot;

/// Default number of snapshots buffered per source.
pub const DEFAULT_CAPACITY: usize = 100;

/// A bounded FIFO that drops its oldest entry when full.
#[derive(Debug, Clone)]
pub struct SnapshotQueue {
    entries: VecDeque<WorldSnapshot>,
    capacity: usize,
}

impl SnapshotQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append a snapshot; returns `true` when the oldest entry was dropped to
    /// make room.
    pub fn push(&mut self, snapshot: WorldSnapshot) -> bool {
        let dropped = self.entries.len() >= self.capacity;
        if dropped {
            self.entries.pop_front();
        }
        self.entries.push_back(snapshot);
        dropped
    }

    /// Oldest entry, without removing it.
    pub fn front(&self) -> Option<&WorldSnapshot> {
        self.entries.front()
    }

    pub fn pop_front(&mut self) -> Option<WorldSnapshot> {
        self.entries.pop_front()
    }

    /// Take the snapshot whose timestamp is closest to `timestamp_ms`, within
    /// `tolerance_ms`.
    ///
    /// Entries older than `timestamp_ms − tolerance_ms` are discarded first.
    /// The match and every entry in front of it are consumed; newer entries
    /// stay for later lookups.  Equal distances prefer the older entry.
    pub fn take_closest(&mut self, timestamp_ms: u64, tolerance_ms: u64) -> Option<WorldSnapshot> {
        let oldest_allowed = timestamp_ms.saturating_sub(tolerance_ms);
        while self.entries.front().is_some_and(|s| s.timestamp_ms < oldest_allowed) {
            self.entries.pop_front();
        }

        let (index, _) = self
            .entries
            .iter()
            .enumerate()
            .map(|(i, s)| (i, s.timestamp_ms.abs_diff(timestamp_ms)))
            .filter(|&(_, diff)| diff <= tolerance_ms)
            .min_by_key(|&(i, diff)| (diff, i))?;

        self.entries.drain(..index);
        self.entries.pop_front()
    }
}

impl Default for SnapshotQueue {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
