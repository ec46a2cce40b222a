// crates/tessera-core/src/traits.rs
//
// Interfaces of the collaborators the staking ledger consumes but does not own.

use crate::error::TesseraError;
use crate::identity::Address;
use crate::units::{Amount, Period, Timestamp};

/// Token custody and transfer.
///
/// Every call either fully succeeds or returns an error and changes nothing.
/// The ledger invokes custody only after its own state is updated.
pub trait TokenCustody {
    /// Move `value` from `from` into the custody account `to`.
    fn transfer_from(&mut self, from: &Address, to: &Address, value: Amount)
        -> Result<(), TesseraError>;

    /// Pay `value` out of `from` (the custody account) to `to`.
    fn transfer(&mut self, from: &Address, to: &Address, value: Amount) -> Result<(), TesseraError>;

    /// Permanently remove `value` held by `holder` from circulation.
    fn burn(&mut self, holder: &Address, value: Amount) -> Result<(), TesseraError>;
}

/// Fee/policy module notified of staker lifecycle events.
pub trait FeePolicy {
    /// A staker made its first deposit; fees are tracked from `period`.
    fn register(&mut self, staker: &Address, period: Period);

    /// Rewards for `period` were settled for `staker`.
    fn update_fee(&mut self, staker: &Address, period: Period);

    /// `staker` committed to `period`; apply the default fee delta.
    fn set_default_fee_delta(&mut self, staker: &Address, period: Period);
}

/// Reward curve: pure and deterministic.
pub trait RewardCurve {
    /// Reward owed to one sub-stake of `sub_stake_value` for a period in which
    /// `total_locked` tokens were committed, with `remaining_duration` periods
    /// of lock still ahead of it.
    fn reward(
        &self,
        current_period: Period,
        sub_stake_value: Amount,
        total_locked: Amount,
        remaining_duration: Period,
    ) -> Amount;
}

/// Source of logical time in seconds. Must be monotonically non-decreasing.
pub trait TimeSource {
    fn now(&self) -> Timestamp;
}

/// Wall-clock time source (UTC seconds since the Unix epoch).
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTime;

impl TimeSource for SystemTime {
    fn now(&self) -> Timestamp {
        chrono::Utc::now().timestamp().max(0) as Timestamp
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_time_is_after_2020() {
        // 2020-01-01T00:00:00Z
        assert!(SystemTime.now() > 1_577_836_800);
    }

    #[test]
    fn test_system_time_non_decreasing() {
        let a = SystemTime.now();
        let b = SystemTime.now();
        assert!(b >= a);
    }
}
