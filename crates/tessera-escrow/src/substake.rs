// crates/tessera-escrow/src/substake.rs
//
// Sub-stake store: the bounded per-staker arena every other component
// operates on.
//
// A sub-stake is active in period P iff
//   first_period <= P <= effective_last_period(start)
// where the effective last period is `last_period` once fixed, otherwise
// `start + periods` (saturating at MAX_PERIOD). `start` is the staker's start
// period (see `StakerRecord::start_period`), which moves forward by one while
// wind-down is on and the next period is already committed.
//
// Slots are recycled: a slot whose last period is fixed and strictly earlier
// than every pending commitment can no longer affect any owed reward.

use serde::{Deserialize, Serialize};

use tessera_core::{Amount, Period, TesseraError};

use crate::commitment::CommitmentWindow;

/// One locked portion of a staker's balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubStake {
    /// First period in which the value is locked.
    pub first_period: Period,
    /// Fixed last period, or `None` while the end is still derived from `periods`.
    pub last_period: Option<Period>,
    /// Remaining duration counted from the start period; 0 once fixed.
    pub periods: Period,
    /// Locked amount.
    pub locked_value: Amount,
}

impl SubStake {
    /// An open-ended sub-stake.
    pub fn open(first_period: Period, periods: Period, locked_value: Amount) -> Self {
        Self {
            first_period,
            last_period: None,
            periods,
            locked_value,
        }
    }

    /// A sub-stake with a fixed last period.
    pub fn fixed(first_period: Period, last_period: Period, locked_value: Amount) -> Self {
        Self {
            first_period,
            last_period: Some(last_period),
            periods: 0,
            locked_value,
        }
    }

    /// Effective last period given the staker's start period.
    pub fn last_period_from(&self, start_period: Period) -> Period {
        match self.last_period {
            Some(last) => last,
            None => start_period.saturating_add(self.periods),
        }
    }

    pub fn is_active(&self, period: Period, start_period: Period) -> bool {
        self.first_period <= period && period <= self.last_period_from(start_period)
    }

    /// A sub-stake whose last period precedes its first is never active.
    pub fn is_empty_range(&self, start_period: Period) -> bool {
        self.last_period_from(start_period) < self.first_period
    }

    /// Fixed and settled: cannot affect any reward still owed under `window`.
    pub fn is_reusable(&self, window: &CommitmentWindow) -> bool {
        match self.last_period {
            Some(last) => window.all_after(last),
            None => false,
        }
    }

    /// Turn this slot into a settled, never-active one.
    pub(crate) fn retire(&mut self) {
        self.last_period = Some(0);
        self.periods = 0;
        self.locked_value = 0;
    }
}

/// Fixed-capacity sub-stake arena.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubStakes {
    slots: Vec<SubStake>,
}

impl SubStakes {
    pub fn new() -> Self {
        Self { slots: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&SubStake> {
        self.slots.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &SubStake> {
        self.slots.iter()
    }

    pub fn as_slice(&self) -> &[SubStake] {
        &self.slots
    }

    pub(crate) fn get_mut(&mut self, index: usize) -> Option<&mut SubStake> {
        self.slots.get_mut(index)
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut SubStake> {
        self.slots.iter_mut()
    }

    /// Look up a slot, mapping a bad index to `InvalidParameter`.
    pub fn slot(&self, index: usize) -> Result<&SubStake, TesseraError> {
        self.slots.get(index).ok_or_else(|| {
            TesseraError::InvalidParameter(format!(
                "Sub-stake index {} out of range ({} sub-stakes)",
                index,
                self.slots.len()
            ))
        })
    }

    pub(crate) fn slot_mut(&mut self, index: usize) -> Result<&mut SubStake, TesseraError> {
        let len = self.slots.len();
        self.slots.get_mut(index).ok_or_else(|| {
            TesseraError::InvalidParameter(format!(
                "Sub-stake index {} out of range ({} sub-stakes)",
                index, len
            ))
        })
    }

    /// Write a sub-stake, recycling the first reusable slot or appending.
    ///
    /// Returns the index written.
    ///
    /// # Errors
    /// Returns `TesseraError::CapacityExceeded` if no slot is reusable and the
    /// arena already holds `capacity` sub-stakes.
    pub(crate) fn save(
        &mut self,
        sub_stake: SubStake,
        window: &CommitmentWindow,
        capacity: usize,
    ) -> Result<usize, TesseraError> {
        self.save_keeping(sub_stake, window, capacity, None)
    }

    /// Like `save`, but never overwrites the slot at `keep`.
    pub(crate) fn save_keeping(
        &mut self,
        sub_stake: SubStake,
        window: &CommitmentWindow,
        capacity: usize,
        keep: Option<usize>,
    ) -> Result<usize, TesseraError> {
        let reusable = self
            .slots
            .iter()
            .enumerate()
            .position(|(i, s)| Some(i) != keep && s.is_reusable(window));
        if let Some(index) = reusable {
            self.slots[index] = sub_stake;
            return Ok(index);
        }
        if self.slots.len() >= capacity {
            return Err(TesseraError::CapacityExceeded(format!(
                "Staker already holds the maximum of {} sub-stakes",
                capacity
            )));
        }
        self.slots.push(sub_stake);
        Ok(self.slots.len() - 1)
    }

    /// Sum of values active at `period`.
    pub fn locked_at(&self, start_period: Period, period: Period) -> Amount {
        self.slots
            .iter()
            .filter(|s| s.is_active(period, start_period))
            .fold(0, |acc: Amount, s| acc.saturating_add(s.locked_value))
    }

    /// Remove a settled slot, moving the last slot into its place.
    ///
    /// # Errors
    /// `InvalidParameter` for a bad index, `StateConflict` if the slot can
    /// still affect an owed reward.
    pub(crate) fn remove_unused(
        &mut self,
        index: usize,
        window: &CommitmentWindow,
    ) -> Result<SubStake, TesseraError> {
        let slot = self.slot(index)?;
        if !slot.is_reusable(window) {
            return Err(TesseraError::StateConflict(format!(
                "Sub-stake {} is still in use",
                index
            )));
        }
        Ok(self.slots.swap_remove(index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window(current: Option<Period>, next: Option<Period>) -> CommitmentWindow {
        CommitmentWindow { current, next }
    }

    #[test]
    fn test_open_ended_last_period() {
        let s = SubStake::open(5, 10, 100);
        assert_eq!(s.last_period_from(4), 14);
        assert_eq!(s.last_period_from(5), 15);
        assert!(s.is_active(5, 4));
        assert!(s.is_active(14, 4));
        assert!(!s.is_active(15, 4));
        assert!(!s.is_active(4, 4));
    }

    #[test]
    fn test_last_period_caps_at_max() {
        let s = SubStake::open(1, Period::MAX, 100);
        assert_eq!(s.last_period_from(10), Period::MAX);
    }

    #[test]
    fn test_fixed_ignores_start() {
        let s = SubStake::fixed(3, 7, 50);
        assert_eq!(s.last_period_from(0), 7);
        assert_eq!(s.last_period_from(100), 7);
    }

    #[test]
    fn test_save_appends_until_capacity() {
        let mut arena = SubStakes::new();
        let w = window(None, None);
        assert_eq!(arena.save(SubStake::open(1, 5, 10), &w, 2).unwrap(), 0);
        assert_eq!(arena.save(SubStake::open(1, 5, 10), &w, 2).unwrap(), 1);
        let err = arena.save(SubStake::open(1, 5, 10), &w, 2).unwrap_err();
        assert!(matches!(err, TesseraError::CapacityExceeded(_)));
        assert_eq!(arena.len(), 2);
    }

    #[test]
    fn test_save_reuses_settled_slot() {
        let mut arena = SubStakes::new();
        let w = window(Some(10), Some(11));
        arena.save(SubStake::open(1, 50, 10), &w, 2).unwrap();
        arena.save(SubStake::fixed(1, 9, 20), &w, 2).unwrap();
        let index = arena.save(SubStake::open(12, 5, 30), &w, 2).unwrap();
        assert_eq!(index, 1);
        assert_eq!(arena.get(1).unwrap().locked_value, 30);
    }

    #[test]
    fn test_save_keeps_slot_still_owed() {
        let mut arena = SubStakes::new();
        // Ends in period 10, which is still awaiting settlement
        let w = window(Some(10), Some(11));
        arena.save(SubStake::fixed(1, 10, 20), &w, 1).unwrap();
        assert!(arena.save(SubStake::open(12, 5, 30), &w, 1).is_err());
    }

    #[test]
    fn test_save_keeping_skips_protected_slot() {
        let mut arena = SubStakes::new();
        let w = window(None, None);
        arena.save(SubStake::fixed(1, 9, 20), &w, 3).unwrap();
        arena.save(SubStake::fixed(1, 9, 30), &w, 3).unwrap();
        let index = arena
            .save_keeping(SubStake::fixed(2, 4, 40), &w, 3, Some(0))
            .unwrap();
        assert_eq!(index, 1);
        assert_eq!(arena.get(0).unwrap().locked_value, 20);
        assert_eq!(arena.get(1).unwrap().locked_value, 40);
    }

    #[test]
    fn test_locked_at_sums_active() {
        let mut arena = SubStakes::new();
        let w = window(None, None);
        arena.save(SubStake::open(2, 3, 100), &w, 10).unwrap();
        arena.save(SubStake::fixed(2, 2, 40), &w, 10).unwrap();
        arena.save(SubStake::open(4, 3, 7), &w, 10).unwrap();
        // start period 1: first sub-stake covers 2..=4
        assert_eq!(arena.locked_at(1, 1), 0);
        assert_eq!(arena.locked_at(1, 2), 140);
        assert_eq!(arena.locked_at(1, 3), 100);
        assert_eq!(arena.locked_at(1, 4), 107);
        assert_eq!(arena.locked_at(1, 5), 0);
    }

    #[test]
    fn test_remove_unused() {
        let mut arena = SubStakes::new();
        let w = window(None, Some(8));
        arena.save(SubStake::open(1, 20, 6), &w, 10).unwrap();
        arena.save(SubStake::fixed(1, 3, 5), &w, 10).unwrap();
        assert!(matches!(
            arena.remove_unused(0, &w),
            Err(TesseraError::StateConflict(_))
        ));
        let removed = arena.remove_unused(1, &w).unwrap();
        assert_eq!(removed.locked_value, 5);
        assert_eq!(arena.len(), 1);
        assert_eq!(arena.get(0).unwrap().locked_value, 6);
        assert!(matches!(
            arena.remove_unused(5, &w),
            Err(TesseraError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_retired_slot_is_inactive_and_reusable() {
        let mut s = SubStake::open(4, 10, 100);
        s.retire();
        assert!(s.is_empty_range(3));
        assert!(!s.is_active(4, 3));
        assert!(s.is_reusable(&window(Some(5), Some(6))));
    }
}
