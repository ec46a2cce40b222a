// crates/tessera-escrow/src/slashing.rs
//
// Slashing: forced reduction of a staker's balance and locked commitment.
//
// After the balance drops by the penalty, the amount locked in the current
// and the next period must again fit inside it. Sub-stakes are reduced
// shortest first (smallest effective last period, then smallest span):
//
//   partial reduction  -> value shrinks in place; if a still-owed period older
//                         than the decrease period overlaps the sub-stake, the
//                         removed part lives on as an "old" fixed fragment
//                         ending just before the decrease period, so rewards
//                         already earned are not lost;
//   full reduction     -> last period is fixed just before the decrease period.
//
// Removed amounts leave `locked_per_period` only for committed periods inside
// the reduced range.

use serde::{Deserialize, Serialize};

use tessera_core::{Amount, Period, TesseraError};

use crate::staker::StakerRecord;
use crate::state::LockedPerPeriod;
use crate::substake::SubStake;

/// What a slash actually applied.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlashOutcome {
    /// Penalty after capping at the staker's balance.
    pub penalty: Amount,
    /// Investigator payout after capping at the applied penalty.
    pub reward: Amount,
    /// `penalty - reward`, removed from circulation.
    pub burned: Amount,
}

/// Apply `penalty` to the staker, paying at most `reward` of it out.
///
/// # Errors
/// `InvalidParameter` for a zero penalty; `CapacityExceeded` if an old
/// fragment cannot be stored.
pub(crate) fn slash(
    record: &mut StakerRecord,
    locked: &mut LockedPerPeriod,
    penalty: Amount,
    reward: Amount,
    current_period: Period,
    capacity: usize,
) -> Result<SlashOutcome, TesseraError> {
    if penalty == 0 {
        return Err(TesseraError::InvalidParameter(
            "Penalty must be greater than zero".to_string(),
        ));
    }
    let penalty = penalty.min(record.value);
    let reward = reward.min(penalty);
    record.value -= penalty;

    let next_period = current_period.saturating_add(1);
    let start_period = record.start_period(current_period);

    let mut current_lock: Amount = 0;
    let mut next_lock: Amount = 0;
    let mut current_and_next_lock: Amount = 0;
    for sub_stake in record.sub_stakes.iter() {
        if sub_stake.is_empty_range(start_period) {
            continue;
        }
        match (
            sub_stake.is_active(current_period, start_period),
            sub_stake.is_active(next_period, start_period),
        ) {
            (true, true) => {
                current_and_next_lock = current_and_next_lock.saturating_add(sub_stake.locked_value)
            }
            (true, false) => current_lock = current_lock.saturating_add(sub_stake.locked_value),
            (false, true) => next_lock = next_lock.saturating_add(sub_stake.locked_value),
            (false, false) => {}
        }
    }

    let locked_current = current_lock.saturating_add(current_and_next_lock);
    if record.value < locked_current {
        decrease_sub_stakes(
            record,
            locked,
            locked_current - record.value,
            current_period,
            start_period,
            capacity,
        )?;
    }

    if next_lock > 0 {
        let locked_next = next_lock.saturating_add(current_and_next_lock)
            - current_and_next_lock.saturating_sub(record.value);
        if record.value < locked_next {
            decrease_sub_stakes(
                record,
                locked,
                locked_next - record.value,
                next_period,
                start_period,
                capacity,
            )?;
        }
    }

    Ok(SlashOutcome {
        penalty,
        reward,
        burned: penalty - reward,
    })
}

/// Remove `amount` from the sub-stakes active in `decrease_period`.
fn decrease_sub_stakes(
    record: &mut StakerRecord,
    locked: &mut LockedPerPeriod,
    mut amount: Amount,
    decrease_period: Period,
    start_period: Period,
    capacity: usize,
) -> Result<(), TesseraError> {
    while amount > 0 {
        let shortest = match shortest_active(record, decrease_period, start_period) {
            Some(found) => found,
            None => break,
        };
        let (first_period, last_period, value) = {
            let s = &record.sub_stakes.as_slice()[shortest];
            (s.first_period, s.last_period_from(start_period), s.locked_value)
        };

        let applied = if amount < value {
            if let Some(sub_stake) = record.sub_stakes.get_mut(shortest) {
                sub_stake.locked_value -= amount;
            }
            save_old_sub_stake(record, first_period, amount, decrease_period, capacity)?;
            let applied = amount;
            amount = 0;
            applied
        } else {
            if let Some(sub_stake) = record.sub_stakes.get_mut(shortest) {
                if decrease_period == 0 {
                    sub_stake.retire();
                } else {
                    sub_stake.last_period = Some(decrease_period - 1);
                    sub_stake.periods = 0;
                }
            }
            amount -= value;
            value
        };

        let window = record.commitments;
        for period in [window.current, window.next].into_iter().flatten() {
            if decrease_period <= period && period <= last_period {
                locked.sub(period, applied);
            }
        }
        tracing::debug!(
            "Reduced sub-stake {} by {} from period {}",
            shortest,
            applied,
            decrease_period
        );
    }
    Ok(())
}

/// Index of the shortest sub-stake active in `period`.
fn shortest_active(record: &StakerRecord, period: Period, start_period: Period) -> Option<usize> {
    record
        .sub_stakes
        .iter()
        .enumerate()
        .filter(|(_, s)| s.is_active(period, start_period))
        .min_by_key(|(_, s)| {
            let last = s.last_period_from(start_period);
            (last, last - s.first_period)
        })
        .map(|(index, _)| index)
}

/// Keep the removed part of a partially reduced sub-stake alive for the
/// committed periods that precede `decrease_period`.
fn save_old_sub_stake(
    record: &mut StakerRecord,
    first_period: Period,
    value: Amount,
    decrease_period: Period,
    capacity: usize,
) -> Result<(), TesseraError> {
    let window = record.commitments;
    let old_current = window.current.filter(|p| *p < decrease_period);
    let old_next = window.next.filter(|p| *p < decrease_period);
    let crosses = |first: Period| {
        (
            old_current.map_or(false, |p| p >= first),
            old_next.map_or(false, |p| p >= first),
        )
    };

    let pattern = crosses(first_period);
    if pattern == (false, false) {
        return Ok(());
    }

    let last_period = decrease_period - 1;
    for sub_stake in record.sub_stakes.iter_mut() {
        if sub_stake.last_period == Some(last_period) && crosses(sub_stake.first_period) == pattern
        {
            sub_stake.locked_value = sub_stake.locked_value.saturating_add(value);
            return Ok(());
        }
    }

    record.sub_stakes.save(
        SubStake::fixed(first_period, last_period, value),
        &window,
        capacity,
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commitment::CommitmentWindow;

    fn record_with(value: Amount, sub_stakes: &[SubStake], window: CommitmentWindow) -> StakerRecord {
        let mut record = StakerRecord {
            value,
            ..StakerRecord::default()
        };
        for s in sub_stakes {
            record.sub_stakes.save(*s, &CommitmentWindow::default(), 30).unwrap();
        }
        record.commitments = window;
        record
    }

    fn committed(current: Option<Period>, next: Option<Period>) -> CommitmentWindow {
        CommitmentWindow { current, next }
    }

    #[test]
    fn test_zero_penalty_rejected() {
        let mut record = record_with(100, &[], CommitmentWindow::default());
        let mut locked = LockedPerPeriod::default();
        assert!(matches!(
            slash(&mut record, &mut locked, 0, 0, 5, 30),
            Err(TesseraError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_penalty_and_reward_capped() {
        let mut record = record_with(100, &[], CommitmentWindow::default());
        let mut locked = LockedPerPeriod::default();
        let outcome = slash(&mut record, &mut locked, 500, 900, 5, 30).unwrap();
        assert_eq!(outcome.penalty, 100);
        assert_eq!(outcome.reward, 100);
        assert_eq!(outcome.burned, 0);
        assert_eq!(record.value, 0);
    }

    #[test]
    fn test_free_balance_absorbs_penalty() {
        let mut record = record_with(1_000, &[SubStake::open(2, 10, 600)], CommitmentWindow::default());
        let mut locked = LockedPerPeriod::default();
        slash(&mut record, &mut locked, 400, 0, 5, 30).unwrap();
        assert_eq!(record.value, 600);
        assert_eq!(record.sub_stakes.get(0).unwrap().locked_value, 600);
    }

    #[test]
    fn test_partial_reduction_updates_committed_totals() {
        let mut record = record_with(
            1_000,
            &[SubStake::open(2, 10, 1_000)],
            committed(Some(5), Some(6)),
        );
        let mut locked = LockedPerPeriod::default();
        locked.add(5, 1_000);
        locked.add(6, 1_000);

        slash(&mut record, &mut locked, 300, 100, 5, 30).unwrap();
        assert_eq!(record.value, 700);
        assert_eq!(record.sub_stakes.len(), 1);
        assert_eq!(record.sub_stakes.get(0).unwrap().locked_value, 700);
        assert_eq!(locked.get(5), 700);
        assert_eq!(locked.get(6), 700);
    }

    #[test]
    fn test_partial_reduction_keeps_old_fragment() {
        // Period 4 is committed but not yet minted
        let mut record = record_with(
            1_000,
            &[SubStake::open(2, 10, 1_000)],
            committed(Some(4), Some(5)),
        );
        let mut locked = LockedPerPeriod::default();
        locked.add(4, 1_000);
        locked.add(5, 1_000);

        slash(&mut record, &mut locked, 400, 0, 5, 30).unwrap();
        assert_eq!(record.sub_stakes.len(), 2);
        assert_eq!(record.sub_stakes.get(0).unwrap().locked_value, 600);
        assert_eq!(*record.sub_stakes.get(1).unwrap(), SubStake::fixed(2, 4, 400));
        // Period 4 still carries the full amount, period 5 the reduced one
        assert_eq!(record.locked_tokens(5, 4), 1_000);
        assert_eq!(locked.get(4), 1_000);
        assert_eq!(locked.get(5), 600);
    }

    #[test]
    fn test_old_fragment_merges_into_matching_one() {
        let mut record = record_with(
            1_000,
            &[SubStake::open(2, 10, 1_000)],
            committed(Some(4), Some(5)),
        );
        let mut locked = LockedPerPeriod::default();
        slash(&mut record, &mut locked, 100, 0, 5, 30).unwrap();
        slash(&mut record, &mut locked, 100, 0, 5, 30).unwrap();
        assert_eq!(record.sub_stakes.len(), 2);
        assert_eq!(record.sub_stakes.get(1).unwrap().locked_value, 200);
    }

    #[test]
    fn test_shortest_reduced_first() {
        let mut record = record_with(
            1_000,
            &[SubStake::open(2, 10, 500), SubStake::open(2, 3, 500)],
            CommitmentWindow::default(),
        );
        let mut locked = LockedPerPeriod::default();

        slash(&mut record, &mut locked, 600, 0, 5, 30).unwrap();
        let long = record.sub_stakes.get(0).unwrap();
        let short = record.sub_stakes.get(1).unwrap();
        assert_eq!(short.last_period, Some(4));
        assert_eq!(long.locked_value, 400);
        assert_eq!(record.locked_tokens(5, 5), 400);
    }

    #[test]
    fn test_next_period_reduction() {
        // One sub-stake starts next period, one is already running
        let mut record = record_with(
            1_000,
            &[SubStake::open(6, 10, 500), SubStake::open(2, 10, 500)],
            CommitmentWindow::default(),
        );
        let mut locked = LockedPerPeriod::default();

        slash(&mut record, &mut locked, 700, 0, 5, 30).unwrap();
        assert_eq!(record.value, 300);
        assert_eq!(record.locked_tokens(5, 5), 300);
        assert_eq!(record.locked_tokens(5, 6), 300);
        // Same last period: the one with the smaller span goes first
        assert_eq!(record.sub_stakes.get(0).unwrap().last_period, Some(5));
        assert_eq!(record.sub_stakes.get(1).unwrap().locked_value, 300);
    }

    #[test]
    fn test_full_slash_unlocks_everything() {
        let mut record = record_with(
            1_000,
            &[SubStake::open(2, 10, 700), SubStake::open(6, 10, 300)],
            committed(None, Some(6)),
        );
        let mut locked = LockedPerPeriod::default();
        locked.add(6, 1_000);

        let outcome = slash(&mut record, &mut locked, 1_000, 10, 5, 30).unwrap();
        assert_eq!(outcome.burned, 990);
        assert_eq!(record.value, 0);
        assert_eq!(record.locked_tokens(5, 5), 0);
        assert_eq!(record.locked_tokens(5, 6), 0);
        assert_eq!(locked.get(6), 0);
    }
}
