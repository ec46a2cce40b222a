// crates/tessera-escrow/src/commitment.rs
//
// Commitment / mint engine.
//
// A staker's commitment state is a two-slot window {current, next} of periods
// whose rewards are still owed. Committing to the next period shifts the
// window; minting settles every slot that lies strictly in the past.
//
//   commit in period C:  settle -> (no-op if next == C+1)
//                        -> locked_per_period[C+1] += locked(C+1)
//                        -> {current, next} = {next, C+1}
//                        -> wind-down decrement, downtime gap
//
// The window can never hold more than two periods: a commit first settles
// everything settleable, and the slot it vacates is always already past.

use serde::{Deserialize, Serialize};

use tessera_core::{Amount, Period, RewardCurve, TesseraError};

use crate::staker::{Downtime, StakerRecord};
use crate::state::LockedPerPeriod;

/// Periods awaiting reward settlement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitmentWindow {
    pub current: Option<Period>,
    pub next: Option<Period>,
}

impl CommitmentWindow {
    pub fn is_empty(&self) -> bool {
        self.current.is_none() && self.next.is_none()
    }

    pub fn contains(&self, period: Period) -> bool {
        self.current == Some(period) || self.next == Some(period)
    }

    /// True if every pending slot is strictly later than `period`.
    pub fn all_after(&self, period: Period) -> bool {
        self.current.map_or(true, |c| period < c) && self.next.map_or(true, |n| period < n)
    }
}

/// Result of settling owed rewards.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MintOutcome {
    pub reward: Amount,
    /// Periods settled, oldest first. At most two.
    pub settled: Vec<Period>,
}

impl MintOutcome {
    pub fn is_noop(&self) -> bool {
        self.settled.is_empty()
    }
}

/// Result of `commit_to_next_period`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitOutcome {
    pub minted: MintOutcome,
    /// Period committed and the amount locked for it; `None` for a repeat commit.
    pub committed: Option<(Period, Amount)>,
    /// Gap recorded because the staker skipped periods.
    pub downtime: Option<Downtime>,
}

/// Settle every owed slot that lies before `current_period`.
pub(crate) fn settle_rewards<R: RewardCurve + ?Sized>(
    record: &mut StakerRecord,
    locked: &mut LockedPerPeriod,
    curve: &R,
    current_period: Period,
) -> MintOutcome {
    let previous_period = current_period.saturating_sub(1);
    let window = record.commitments;
    let next = match window.next {
        Some(next) => next,
        None => return MintOutcome::default(),
    };
    let nothing_due = match window.current {
        None => next > previous_period,
        Some(current) => current > previous_period,
    };
    if current_period == 0 || nothing_due {
        return MintOutcome::default();
    }

    if next <= previous_period {
        record.last_committed_period = Some(next);
    }
    let start_period = record.start_period(current_period);
    let re_stake = record.flags.re_stake();
    let mut outcome = MintOutcome::default();

    if let Some(current) = window.current {
        let (reward, carried) = mint_period(
            record,
            locked.get(current),
            curve,
            current,
            current_period,
            start_period,
            re_stake.then_some(next),
        );
        record.commitments.current = None;
        outcome.reward = outcome.reward.saturating_add(reward);
        outcome.settled.push(current);
        locked.add(next, carried);
    }
    if next <= previous_period {
        let (reward, _) = mint_period(
            record,
            locked.get(next),
            curve,
            next,
            current_period,
            start_period,
            None,
        );
        record.commitments.next = None;
        outcome.reward = outcome.reward.saturating_add(reward);
        outcome.settled.push(next);
    }

    record.value = record.value.saturating_add(outcome.reward);
    if record.flags.measure_work {
        record.completed_work = record.completed_work.saturating_add(outcome.reward);
    }
    outcome
}

/// Reward every sub-stake active in `minting_period`.
///
/// Returns the total reward and, when `carry_into` is set, the part of the
/// re-staked reward that landed on sub-stakes also active in that period
/// (and therefore already counted in its locked total).
fn mint_period<R: RewardCurve + ?Sized>(
    record: &mut StakerRecord,
    total_locked: Amount,
    curve: &R,
    minting_period: Period,
    current_period: Period,
    start_period: Period,
    carry_into: Option<Period>,
) -> (Amount, Amount) {
    let re_stake = record.flags.re_stake();
    let mut reward: Amount = 0;
    let mut carried: Amount = 0;
    for sub_stake in record.sub_stakes.iter_mut() {
        if !sub_stake.is_active(minting_period, start_period) {
            continue;
        }
        let last_period = sub_stake.last_period_from(start_period);
        let sub_reward = curve.reward(
            current_period,
            sub_stake.locked_value,
            total_locked,
            last_period - minting_period,
        );
        reward = reward.saturating_add(sub_reward);
        if re_stake {
            sub_stake.locked_value = sub_stake.locked_value.saturating_add(sub_reward);
            if carry_into.map_or(false, |p| sub_stake.is_active(p, start_period)) {
                carried = carried.saturating_add(sub_reward);
            }
        }
    }
    (reward, carried)
}

/// Commit the staker's locked tokens to the period after `current_period`.
///
/// # Errors
/// `StateConflict` if the staker holds no value or has nothing locked for the
/// next period.
pub(crate) fn commit_to_next_period<R: RewardCurve + ?Sized>(
    record: &mut StakerRecord,
    locked: &mut LockedPerPeriod,
    curve: &R,
    current_period: Period,
) -> Result<CommitOutcome, TesseraError> {
    if record.value == 0 {
        return Err(TesseraError::StateConflict(
            "Staker has no stake to commit".to_string(),
        ));
    }
    let next_period = current_period.checked_add(1).ok_or_else(|| {
        TesseraError::InvalidParameter("Period counter exhausted".to_string())
    })?;

    let last_active = record.last_committed_period().or(record.registered_period);
    let minted = settle_rewards(record, locked, curve, current_period);

    if record.commitments.next == Some(next_period) {
        return Ok(CommitOutcome {
            minted,
            committed: None,
            downtime: None,
        });
    }

    let locked_tokens = record.locked_tokens(current_period, next_period);
    if locked_tokens == 0 {
        return Err(TesseraError::StateConflict(format!(
            "No tokens locked for period {}",
            next_period
        )));
    }
    locked.add(next_period, locked_tokens);

    record.commitments.current = record.commitments.next;
    record.commitments.next = Some(next_period);

    if record.flags.wind_down {
        decrease_sub_stakes_duration(record, next_period);
    }

    let downtime = match last_active {
        Some(last) if last < current_period => {
            let gap = Downtime {
                start_period: last + 1,
                end_period: current_period,
            };
            record.past_downtime.push(gap);
            Some(gap)
        }
        _ => None,
    };

    Ok(CommitOutcome {
        minted,
        committed: Some((next_period, locked_tokens)),
        downtime,
    })
}

/// Wind-down: one period less on every open-ended sub-stake; those reaching
/// zero get their last period fixed to the period just committed.
fn decrease_sub_stakes_duration(record: &mut StakerRecord, next_period: Period) {
    for sub_stake in record.sub_stakes.iter_mut() {
        if sub_stake.last_period.is_some() || sub_stake.periods == 0 {
            continue;
        }
        sub_stake.periods -= 1;
        if sub_stake.periods == 0 {
            sub_stake.last_period = Some(next_period);
        }
    }
}

/// Re-express open-ended durations after the wind-down flag flipped, so that
/// every effective last period stays where it was.
///
/// Only needed when the next period is already committed: that is the only
/// case in which the start period depends on the flag.
pub(crate) fn apply_wind_down_change(
    record: &mut StakerRecord,
    wind_down: bool,
    next_period: Period,
) {
    if record.commitments.next != Some(next_period) {
        return;
    }
    for sub_stake in record.sub_stakes.iter_mut() {
        if !wind_down && sub_stake.last_period == Some(next_period) {
            sub_stake.last_period = None;
            sub_stake.periods = 1;
            continue;
        }
        if sub_stake.last_period.is_some() || sub_stake.periods == 0 {
            continue;
        }
        if wind_down {
            sub_stake.periods -= 1;
            if sub_stake.periods == 0 {
                sub_stake.last_period = Some(next_period);
            }
        } else {
            sub_stake.periods = sub_stake.periods.saturating_add(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::substake::SubStake;

    /// Pays a tenth of the sub-stake value, regardless of totals.
    struct TenthCurve;

    impl RewardCurve for TenthCurve {
        fn reward(&self, _: Period, value: Amount, _: Amount, _: Period) -> Amount {
            value / 10
        }
    }

    fn staker(value: Amount, sub_stakes: &[SubStake]) -> StakerRecord {
        let mut record = StakerRecord {
            value,
            registered_period: Some(1),
            ..StakerRecord::default()
        };
        let window = CommitmentWindow::default();
        for s in sub_stakes {
            record.sub_stakes.save(*s, &window, 30).unwrap();
        }
        record
    }

    #[test]
    fn test_window_helpers() {
        let w = CommitmentWindow {
            current: Some(4),
            next: Some(5),
        };
        assert!(w.contains(4));
        assert!(w.contains(5));
        assert!(!w.contains(6));
        assert!(w.all_after(3));
        assert!(!w.all_after(4));
        assert!(CommitmentWindow::default().all_after(100));
    }

    #[test]
    fn test_commit_shifts_window() {
        let mut record = staker(1_000, &[SubStake::open(2, 10, 1_000)]);
        let mut locked = LockedPerPeriod::default();

        let outcome = commit_to_next_period(&mut record, &mut locked, &TenthCurve, 1).unwrap();
        assert_eq!(outcome.committed, Some((2, 1_000)));
        assert_eq!(record.commitments.next, Some(2));
        assert_eq!(record.commitments.current, None);
        assert_eq!(locked.get(2), 1_000);

        commit_to_next_period(&mut record, &mut locked, &TenthCurve, 2).unwrap();
        assert_eq!(record.commitments.current, Some(2));
        assert_eq!(record.commitments.next, Some(3));
    }

    #[test]
    fn test_repeat_commit_is_noop() {
        let mut record = staker(1_000, &[SubStake::open(2, 10, 1_000)]);
        let mut locked = LockedPerPeriod::default();
        commit_to_next_period(&mut record, &mut locked, &TenthCurve, 1).unwrap();
        let before = record.clone();

        let outcome = commit_to_next_period(&mut record, &mut locked, &TenthCurve, 1).unwrap();
        assert_eq!(outcome.committed, None);
        assert_eq!(record, before);
        assert_eq!(locked.get(2), 1_000);
    }

    #[test]
    fn test_commit_requires_value_and_lock() {
        let mut locked = LockedPerPeriod::default();
        let mut empty = staker(0, &[]);
        assert!(matches!(
            commit_to_next_period(&mut empty, &mut locked, &TenthCurve, 1),
            Err(TesseraError::StateConflict(_))
        ));

        let mut unlocked = staker(500, &[]);
        assert!(matches!(
            commit_to_next_period(&mut unlocked, &mut locked, &TenthCurve, 1),
            Err(TesseraError::StateConflict(_))
        ));
    }

    #[test]
    fn test_mint_settles_past_slots_only() {
        let mut record = staker(1_000, &[SubStake::open(2, 10, 1_000)]);
        let mut locked = LockedPerPeriod::default();
        commit_to_next_period(&mut record, &mut locked, &TenthCurve, 1).unwrap();
        commit_to_next_period(&mut record, &mut locked, &TenthCurve, 2).unwrap();

        // In period 3 only period 2 is in the past
        let outcome = settle_rewards(&mut record, &mut locked, &TenthCurve, 3);
        assert_eq!(outcome.settled, vec![2]);
        assert_eq!(outcome.reward, 100);
        assert_eq!(record.commitments.current, None);
        assert_eq!(record.commitments.next, Some(3));

        // Nothing more is due until period 4
        assert!(settle_rewards(&mut record, &mut locked, &TenthCurve, 3).is_noop());
    }

    #[test]
    fn test_mint_re_stake_compounds() {
        let mut record = staker(1_000, &[SubStake::open(2, 10, 1_000)]);
        let mut locked = LockedPerPeriod::default();
        commit_to_next_period(&mut record, &mut locked, &TenthCurve, 1).unwrap();
        commit_to_next_period(&mut record, &mut locked, &TenthCurve, 2).unwrap();

        let outcome = settle_rewards(&mut record, &mut locked, &TenthCurve, 5);
        // 1000/10 for period 2, then 1100/10 for period 3
        assert_eq!(outcome.settled, vec![2, 3]);
        assert_eq!(outcome.reward, 210);
        assert_eq!(record.value, 1_210);
        assert_eq!(record.sub_stakes.get(0).unwrap().locked_value, 1_210);
        // The period-2 reward is also locked (and committed) in period 3
        assert_eq!(locked.get(3), 1_100);
        assert!(record.commitments.is_empty());
    }

    #[test]
    fn test_mint_without_re_stake_frees_reward() {
        let mut record = staker(1_000, &[SubStake::open(2, 10, 1_000)]);
        record.flags.re_stake_disabled = true;
        record.flags.measure_work = true;
        let mut locked = LockedPerPeriod::default();
        commit_to_next_period(&mut record, &mut locked, &TenthCurve, 1).unwrap();

        let outcome = settle_rewards(&mut record, &mut locked, &TenthCurve, 3);
        assert_eq!(outcome.reward, 100);
        assert_eq!(record.value, 1_100);
        assert_eq!(record.sub_stakes.get(0).unwrap().locked_value, 1_000);
        assert_eq!(record.completed_work, 100);
    }

    #[test]
    fn test_downtime_recorded_after_gap() {
        let mut record = staker(1_000, &[SubStake::open(2, 20, 1_000)]);
        let mut locked = LockedPerPeriod::default();
        commit_to_next_period(&mut record, &mut locked, &TenthCurve, 1).unwrap();
        assert!(record.past_downtime.is_empty());

        // Committed for 2, skipped 3..=5, commits again in 6
        let outcome = commit_to_next_period(&mut record, &mut locked, &TenthCurve, 6).unwrap();
        assert_eq!(
            outcome.downtime,
            Some(Downtime {
                start_period: 3,
                end_period: 6
            })
        );
        assert_eq!(record.past_downtime.len(), 1);
    }

    #[test]
    fn test_wind_down_decrements_and_fixes() {
        let mut record = staker(1_000, &[SubStake::open(2, 2, 1_000)]);
        record.flags.wind_down = true;
        let mut locked = LockedPerPeriod::default();

        commit_to_next_period(&mut record, &mut locked, &TenthCurve, 1).unwrap();
        let s = record.sub_stakes.get(0).unwrap();
        assert_eq!(s.periods, 1);
        assert_eq!(s.last_period, None);
        assert_eq!(s.last_period_from(record.start_period(1)), 3);

        commit_to_next_period(&mut record, &mut locked, &TenthCurve, 2).unwrap();
        let s = record.sub_stakes.get(0).unwrap();
        assert_eq!(s.periods, 0);
        assert_eq!(s.last_period, Some(3));
    }

    #[test]
    fn test_wind_down_change_preserves_last_period() {
        let mut record = staker(1_000, &[SubStake::open(2, 5, 1_000), SubStake::open(2, 1, 500)]);
        let mut locked = LockedPerPeriod::default();
        commit_to_next_period(&mut record, &mut locked, &TenthCurve, 1).unwrap();
        let before: Vec<Period> = record
            .sub_stakes
            .iter()
            .map(|s| s.last_period_from(record.start_period(1)))
            .collect();

        record.flags.wind_down = true;
        apply_wind_down_change(&mut record, true, 2);
        let during: Vec<Period> = record
            .sub_stakes
            .iter()
            .map(|s| s.last_period_from(record.start_period(1)))
            .collect();
        assert_eq!(before, during);
        assert_eq!(record.sub_stakes.get(1).unwrap().last_period, Some(2));

        record.flags.wind_down = false;
        apply_wind_down_change(&mut record, false, 2);
        let after: Vec<Period> = record
            .sub_stakes
            .iter()
            .map(|s| s.last_period_from(record.start_period(1)))
            .collect();
        assert_eq!(before, after);
    }
}
