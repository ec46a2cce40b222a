// crates/tessera-escrow/src/snapshot.rs
//
// Balance checkpoints for point-in-time queries.
//
// A `History` is an append-only sequence of (index, value) pairs with
// non-decreasing indices. Two writes at the same index collapse into one, so
// the sequence is a step function: the value at any index is the value of the
// latest snapshot at or before it, and zero before the first snapshot.

use serde::{Deserialize, Serialize};

use tessera_core::{Amount, Timestamp};

/// A single checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub index: Timestamp,
    pub value: Amount,
}

/// Append-only checkpoint sequence.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct History {
    snapshots: Vec<Snapshot>,
}

/// Position of a `History` that `restore` can roll back to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryMark {
    len: usize,
    last: Option<Snapshot>,
}

impl History {
    pub fn new() -> Self {
        Self {
            snapshots: Vec::new(),
        }
    }

    /// Record `value` at `index`.
    ///
    /// An index at or before the latest one overwrites the latest value, which
    /// keeps indices monotonic even if the time source stalls.
    pub fn add_snapshot(&mut self, index: Timestamp, value: Amount) {
        match self.snapshots.last_mut() {
            Some(last) if index <= last.index => last.value = value,
            _ => self.snapshots.push(Snapshot { index, value }),
        }
    }

    /// Value of the latest snapshot with key `<= index`, zero if none.
    pub fn value_at(&self, index: Timestamp) -> Amount {
        let position = self.snapshots.partition_point(|s| s.index <= index);
        if position == 0 {
            0
        } else {
            self.snapshots[position - 1].value
        }
    }

    /// Value of the newest snapshot, zero if empty.
    pub fn last_value(&self) -> Amount {
        self.snapshots.last().map(|s| s.value).unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    pub fn as_slice(&self) -> &[Snapshot] {
        &self.snapshots
    }

    pub(crate) fn mark(&self) -> HistoryMark {
        HistoryMark {
            len: self.snapshots.len(),
            last: self.snapshots.last().copied(),
        }
    }

    /// Undo every write made since `mark`.
    pub(crate) fn restore(&mut self, mark: HistoryMark) {
        self.snapshots.truncate(mark.len);
        if let (Some(slot), Some(saved)) = (self.snapshots.last_mut(), mark.last) {
            *slot = saved;
        }
    }
}
