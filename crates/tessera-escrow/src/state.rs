// crates/tessera-escrow/src/state.rs
//
// Ledger-wide state and its rollback machinery.
//
// Every mutating operation runs between `LedgerState::savepoint` and either
// `release` or `restore`. A savepoint captures exactly the fragments the
// operation may touch: the named staker records, their worker map entries,
// the global balance history tail, the stakers list length and the burned
// total. `locked_per_period` journals the pre-image of every period it
// changes while a savepoint is open.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use tessera_core::{Address, Amount, Period};

use crate::snapshot::{History, HistoryMark};
use crate::staker::StakerRecord;
use crate::worker::WorkerRegistry;

/// Total tokens committed per period, across all stakers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockedPerPeriod {
    totals: BTreeMap<Period, Amount>,
    #[serde(skip)]
    journal: Option<BTreeMap<Period, Option<Amount>>>,
}

impl LockedPerPeriod {
    pub fn get(&self, period: Period) -> Amount {
        self.totals.get(&period).copied().unwrap_or(0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Period, Amount)> + '_ {
        self.totals.iter().map(|(p, v)| (*p, *v))
    }

    pub(crate) fn add(&mut self, period: Period, value: Amount) {
        if value == 0 {
            return;
        }
        self.record(period);
        let total = self.totals.entry(period).or_insert(0);
        *total = total.saturating_add(value);
    }

    pub(crate) fn sub(&mut self, period: Period, value: Amount) {
        if value == 0 {
            return;
        }
        self.record(period);
        let total = self.totals.entry(period).or_insert(0);
        if *total < value {
            tracing::warn!(
                "locked_per_period[{}] underflow: {} < {}, clamping to zero",
                period,
                total,
                value
            );
        }
        *total = total.saturating_sub(value);
    }

    fn record(&mut self, period: Period) {
        if let Some(journal) = self.journal.as_mut() {
            let before = self.totals.get(&period).copied();
            journal.entry(period).or_insert(before);
        }
    }

    fn begin(&mut self) {
        self.journal = Some(BTreeMap::new());
    }

    fn commit(&mut self) {
        self.journal = None;
    }

    fn rollback(&mut self) {
        if let Some(journal) = self.journal.take() {
            for (period, before) in journal {
                match before {
                    Some(value) => {
                        self.totals.insert(period, value);
                    }
                    None => {
                        self.totals.remove(&period);
                    }
                }
            }
        }
    }
}

/// All state the ledger owns.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerState {
    pub stakers: BTreeMap<Address, StakerRecord>,
    /// Stakers in registration order; the active-stakers query pages over it.
    pub staker_list: Vec<Address>,
    pub locked_per_period: LockedPerPeriod,
    pub balance_history: History,
    pub workers: WorkerRegistry,
    /// Slashed tokens permanently removed from circulation.
    pub burned: Amount,
}

/// Pre-images needed to undo one operation.
#[derive(Debug)]
pub(crate) struct Savepoint {
    stakers: Vec<(Address, Option<StakerRecord>)>,
    workers: Vec<(Address, Option<Address>)>,
    staker_list_len: usize,
    balance_history: HistoryMark,
    burned: Amount,
}

impl LedgerState {
    /// Open a savepoint covering the given staker (and worker) addresses.
    pub(crate) fn savepoint(&mut self, touched: &[Address]) -> Savepoint {
        let mut worker_keys: Vec<Address> = touched.to_vec();
        for address in touched {
            if let Some(worker) = self.stakers.get(address).and_then(|r| r.worker) {
                worker_keys.push(worker);
            }
        }
        worker_keys.sort();
        worker_keys.dedup();

        let mut staker_keys = touched.to_vec();
        staker_keys.sort();
        staker_keys.dedup();

        self.locked_per_period.begin();
        Savepoint {
            stakers: staker_keys
                .into_iter()
                .map(|a| (a, self.stakers.get(&a).cloned()))
                .collect(),
            workers: worker_keys
                .into_iter()
                .map(|w| (w, self.workers.staker_of(&w)))
                .collect(),
            staker_list_len: self.staker_list.len(),
            balance_history: self.balance_history.mark(),
            burned: self.burned,
        }
    }

    /// Keep every change made since the savepoint.
    pub(crate) fn release(&mut self, _savepoint: Savepoint) {
        self.locked_per_period.commit();
    }

    /// Discard every change made since the savepoint.
    pub(crate) fn restore(&mut self, savepoint: Savepoint) {
        self.locked_per_period.rollback();
        for (address, record) in savepoint.stakers {
            match record {
                Some(record) => {
                    self.stakers.insert(address, record);
                }
                None => {
                    self.stakers.remove(&address);
                }
            }
        }
        for (worker, staker) in savepoint.workers {
            self.workers.restore_entry(worker, staker);
        }
        self.staker_list.truncate(savepoint.staker_list_len);
        self.balance_history.restore(savepoint.balance_history);
        self.burned = savepoint.burned;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_locked_per_period_add_sub() {
        let mut locked = LockedPerPeriod::default();
        locked.add(3, 100);
        locked.add(3, 50);
        locked.sub(3, 30);
        assert_eq!(locked.get(3), 120);
        assert_eq!(locked.get(4), 0);
    }

    #[test]
    fn test_locked_per_period_sub_clamps() {
        let mut locked = LockedPerPeriod::default();
        locked.add(1, 10);
        locked.sub(1, 25);
        assert_eq!(locked.get(1), 0);
    }

    #[test]
    fn test_locked_per_period_rollback() {
        let mut locked = LockedPerPeriod::default();
        locked.add(1, 10);
        locked.begin();
        locked.add(1, 5);
        locked.add(2, 7);
        locked.sub(1, 3);
        locked.rollback();
        assert_eq!(locked.get(1), 10);
        assert_eq!(locked.iter().count(), 1);
    }

    #[test]
    fn test_locked_per_period_commit_keeps_changes() {
        let mut locked = LockedPerPeriod::default();
        locked.begin();
        locked.add(9, 4);
        locked.commit();
        locked.rollback();
        assert_eq!(locked.get(9), 4);
    }

    #[test]
    fn test_savepoint_restores_records_and_history() {
        let alice = Address::from_label("alice");
        let bob = Address::from_label("bob");
        let mut state = LedgerState::default();
        state.stakers.insert(
            alice,
            StakerRecord {
                value: 10,
                ..StakerRecord::default()
            },
        );
        state.balance_history.add_snapshot(1, 10);

        let savepoint = state.savepoint(&[alice, bob]);
        state.stakers.get_mut(&alice).unwrap().value = 99;
        state.stakers.insert(bob, StakerRecord::default());
        state.staker_list.push(bob);
        state.balance_history.add_snapshot(2, 99);
        state.locked_per_period.add(5, 5);
        state.burned = 7;
        state.restore(savepoint);

        assert_eq!(state.stakers.get(&alice).unwrap().value, 10);
        assert!(!state.stakers.contains_key(&bob));
        assert!(state.staker_list.is_empty());
        assert_eq!(state.balance_history.last_value(), 10);
        assert_eq!(state.locked_per_period.get(5), 0);
        assert_eq!(state.burned, 0);
    }
}
