// crates/tessera-escrow/src/worker.rs
//
// Worker binding: a 1:1 relation between a staker and the agent that commits
// on its behalf.
//
// Rules for `bond`:
//   - rebinding requires `min_worker_periods` since the previous binding;
//   - a worker serves at most one staker;
//   - a worker may not itself be a staker with sub-stakes, unless the staker
//     bonds itself;
//   - binding the worker that is already bound is rejected.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use tessera_core::{Address, Period, TesseraError};

use crate::staker::StakerRecord;

/// Inverse map from worker to staker.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerRegistry {
    staker_of_worker: BTreeMap<Address, Address>,
}

impl WorkerRegistry {
    pub fn staker_of(&self, worker: &Address) -> Option<Address> {
        self.staker_of_worker.get(worker).copied()
    }

    pub fn len(&self) -> usize {
        self.staker_of_worker.len()
    }

    pub fn is_empty(&self) -> bool {
        self.staker_of_worker.is_empty()
    }

    /// Drop the staker's current binding, if any.
    pub(crate) fn unbind(&mut self, staker: &mut StakerRecord, current_period: Period) {
        if let Some(worker) = staker.worker.take() {
            self.staker_of_worker.remove(&worker);
            staker.worker_start_period = current_period;
        }
    }

    pub(crate) fn restore_entry(&mut self, worker: Address, staker: Option<Address>) {
        match staker {
            Some(staker) => {
                self.staker_of_worker.insert(worker, staker);
            }
            None => {
                self.staker_of_worker.remove(&worker);
            }
        }
    }

    /// Bind `worker` to `staker` (or unbind with `None`).
    ///
    /// `worker_has_sub_stakes` reports whether the worker address is itself a
    /// staker with sub-stakes.
    ///
    /// # Errors
    /// Returns `TesseraError::StateConflict` on any rule violation.
    pub(crate) fn bond(
        &mut self,
        staker_address: &Address,
        staker: &mut StakerRecord,
        worker: Option<Address>,
        worker_has_sub_stakes: bool,
        current_period: Period,
        min_worker_periods: Period,
    ) -> Result<(), TesseraError> {
        if worker == staker.worker {
            return Err(TesseraError::StateConflict(
                "Specified worker is already bonded with this staker".to_string(),
            ));
        }

        if staker.worker.is_some() {
            let earliest = staker.worker_start_period.saturating_add(min_worker_periods);
            if current_period < earliest {
                return Err(TesseraError::StateConflict(format!(
                    "Worker cannot be changed before period {} (current {})",
                    earliest, current_period
                )));
            }
        }

        if let Some(new_worker) = worker {
            if new_worker.is_zero() {
                return Err(TesseraError::StateConflict(
                    "The zero address cannot be a worker".to_string(),
                ));
            }
            if self.staker_of_worker.contains_key(&new_worker) {
                return Err(TesseraError::StateConflict(format!(
                    "Worker {} is already in use",
                    new_worker.short()
                )));
            }
            if worker_has_sub_stakes && new_worker != *staker_address {
                return Err(TesseraError::StateConflict(format!(
                    "Worker {} is a staker",
                    new_worker.short()
                )));
            }
        }

        if let Some(old_worker) = staker.worker.take() {
            self.staker_of_worker.remove(&old_worker);
        }
        if let Some(new_worker) = worker {
            self.staker_of_worker.insert(new_worker, *staker_address);
        }
        staker.worker = worker;
        staker.worker_start_period = current_period;
        Ok(())
    }
}
