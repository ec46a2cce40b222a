// crates/tessera-escrow/src/staker.rs
//
// Per-staker record: balance, commitment window, flags, downtime, sub-stakes
// and balance history. Records are created on first touch and never deleted.

use serde::{Deserialize, Serialize};

use tessera_core::{Address, Amount, Period};

use crate::commitment::CommitmentWindow;
use crate::snapshot::History;
use crate::substake::SubStakes;

/// Per-staker switches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakerFlags {
    /// Minted rewards go to the free balance instead of compounding.
    pub re_stake_disabled: bool,
    /// Open-ended durations shrink by one on every commitment.
    pub wind_down: bool,
    /// Minted rewards also accumulate into `completed_work`.
    pub measure_work: bool,
    /// Balance changes are not checkpointed.
    pub snapshots_disabled: bool,
}

impl StakerFlags {
    pub fn re_stake(&self) -> bool {
        !self.re_stake_disabled
    }
}

/// A run of periods in which the staker did not commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Downtime {
    pub start_period: Period,
    pub end_period: Period,
}

/// Everything the ledger knows about one staker.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakerRecord {
    /// Custodied balance, locked and free.
    pub value: Amount,
    /// Periods awaiting reward settlement.
    pub commitments: CommitmentWindow,
    /// Most recent settled period, kept once both slots have emptied.
    pub last_committed_period: Option<Period>,
    /// Re-stake flag is frozen while the current period is below this.
    pub lock_re_stake_until_period: Period,
    pub completed_work: Amount,
    pub worker_start_period: Period,
    pub worker: Option<Address>,
    pub flags: StakerFlags,
    pub past_downtime: Vec<Downtime>,
    pub sub_stakes: SubStakes,
    pub history: History,
    /// Period the staker entered the stakers list; `None` until first deposit.
    pub registered_period: Option<Period>,
}

impl StakerRecord {
    /// Start period for open-ended sub-stakes.
    ///
    /// With wind-down on and the next period already committed, durations
    /// have already been decremented for that period, so they count from it.
    pub fn start_period(&self, current_period: Period) -> Period {
        match self.commitments.next {
            Some(next) if self.flags.wind_down && next > current_period => {
                current_period.saturating_add(1)
            }
            _ => current_period,
        }
    }

    /// Tokens locked in `period`, as seen from `current_period`.
    pub fn locked_tokens(&self, current_period: Period, period: Period) -> Amount {
        let start = self.start_period(current_period);
        self.sub_stakes.locked_at(start, period)
    }

    /// Largest amount locked in either the current or the next period.
    pub fn max_locked_now(&self, current_period: Period) -> Amount {
        let current = self.locked_tokens(current_period, current_period);
        let next = self.locked_tokens(current_period, current_period.saturating_add(1));
        current.max(next)
    }

    /// Balance not locked in the current or next period.
    pub fn free_balance(&self, current_period: Period) -> Amount {
        self.value.saturating_sub(self.max_locked_now(current_period))
    }

    /// Latest committed period, pending or settled.
    pub fn last_committed_period(&self) -> Option<Period> {
        self.commitments.next.or(self.last_committed_period)
    }

    pub fn is_re_stake_locked(&self, current_period: Period) -> bool {
        current_period < self.lock_re_stake_until_period
    }

    /// Stakers may act while they hold value or still await a settlement.
    pub fn is_active_staker(&self) -> bool {
        self.value > 0 || self.commitments.next.is_some()
    }
}
