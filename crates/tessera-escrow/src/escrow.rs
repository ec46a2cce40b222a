// crates/tessera-escrow/src/escrow.rs
//
// StakingEscrow: the public ledger facade.
//
// Every mutating operation reads the time source once, derives the current
// period from it, and runs inside `transact`: on error the savepoint is
// restored and no partial state survives. Internal effects come first; the
// custody and fee-policy collaborators are called last, custody before policy
// (policy calls cannot fail).
//
// Callers identify themselves with an explicit `&Address`; there is no
// ambient sender.

use tessera_core::{
    Address, Amount, FeePolicy, Period, RewardCurve, TesseraError, TimeSource, Timestamp,
    TokenCustody,
};

use std::collections::BTreeMap;

use crate::commitment::{self, CommitOutcome, MintOutcome};
use crate::config::EscrowConfig;
use crate::period::PeriodClock;
use crate::slashing::{self, SlashOutcome};
use crate::staker::{Downtime, StakerFlags, StakerRecord};
use crate::state::LedgerState;
use crate::substake::SubStake;

/// Label hashed into the address that holds all custodied tokens.
pub const ESCROW_ACCOUNT_LABEL: &str = "tessera:escrow";

/// The staking ledger.
pub struct StakingEscrow<C, P, R, K> {
    config: EscrowConfig,
    clock: PeriodClock,
    escrow_account: Address,
    state: LedgerState,
    custody: C,
    policy: P,
    curve: R,
    time: K,
}

/// Record of an active staker, or `Unauthorized`.
fn active_record<'a>(
    stakers: &'a mut BTreeMap<Address, StakerRecord>,
    staker: &Address,
) -> Result<&'a mut StakerRecord, TesseraError> {
    match stakers.get_mut(staker) {
        Some(record) if record.is_active_staker() => Ok(record),
        _ => Err(TesseraError::Unauthorized(format!(
            "{} is not a staker",
            staker.short()
        ))),
    }
}

fn following_period(period: Period) -> Result<Period, TesseraError> {
    period
        .checked_add(1)
        .ok_or_else(|| TesseraError::InvalidParameter("Period counter exhausted".to_string()))
}

/// Check that `value` more can be locked in `next_period`.
fn ensure_lockable(
    record: &StakerRecord,
    current_period: Period,
    next_period: Period,
    value: Amount,
    max_locked: Amount,
) -> Result<(), TesseraError> {
    let locked = record.locked_tokens(current_period, next_period);
    let required = locked
        .checked_add(value)
        .ok_or_else(|| TesseraError::InvalidParameter("Locked amount overflow".to_string()))?;
    if required > record.value {
        return Err(TesseraError::InsufficientBalance(format!(
            "Cannot lock {}: {} of {} already locked",
            value, locked, record.value
        )));
    }
    if required > max_locked {
        return Err(TesseraError::InvalidParameter(format!(
            "Locked amount {} would exceed the maximum of {}",
            required, max_locked
        )));
    }
    Ok(())
}

/// Sub-stake at `index` that is still locked after `current_period`.
fn continuing_sub_stake(
    record: &StakerRecord,
    index: usize,
    current_period: Period,
) -> Result<SubStake, TesseraError> {
    let sub_stake = *record.sub_stakes.slot(index)?;
    let start_period = record.start_period(current_period);
    if sub_stake.last_period_from(start_period) <= current_period {
        return Err(TesseraError::StateConflict(format!(
            "Sub-stake {} is not locked in the next period",
            index
        )));
    }
    Ok(sub_stake)
}

impl<C, P, R, K> StakingEscrow<C, P, R, K>
where
    C: TokenCustody,
    P: FeePolicy,
    R: RewardCurve,
    K: TimeSource,
{
    /// Create an empty ledger.
    pub fn new(
        config: EscrowConfig,
        custody: C,
        policy: P,
        curve: R,
        time: K,
    ) -> Result<Self, TesseraError> {
        Self::with_state(config, LedgerState::default(), custody, policy, curve, time)
    }

    /// Resume a ledger from previously persisted state.
    pub fn with_state(
        config: EscrowConfig,
        state: LedgerState,
        custody: C,
        policy: P,
        curve: R,
        time: K,
    ) -> Result<Self, TesseraError> {
        config.validate()?;
        let clock = PeriodClock::new(config.seconds_per_period)?;
        Ok(Self {
            config,
            clock,
            escrow_account: Address::from_label(ESCROW_ACCOUNT_LABEL),
            state,
            custody,
            policy,
            curve,
            time,
        })
    }

    pub fn config(&self) -> &EscrowConfig {
        &self.config
    }

    pub fn state(&self) -> &LedgerState {
        &self.state
    }

    pub fn custody(&self) -> &C {
        &self.custody
    }

    pub fn custody_mut(&mut self) -> &mut C {
        &mut self.custody
    }

    pub fn policy(&self) -> &P {
        &self.policy
    }

    pub fn time(&self) -> &K {
        &self.time
    }

    /// Address holding every custodied token.
    pub fn escrow_account(&self) -> Address {
        self.escrow_account
    }

    /// Tear the ledger down into its state and collaborators.
    pub fn into_parts(self) -> (LedgerState, C, P, R, K) {
        (self.state, self.custody, self.policy, self.curve, self.time)
    }

    // ------------------------------------------------------------------
    // Plumbing
    // ------------------------------------------------------------------

    fn now(&self) -> (Timestamp, Period) {
        let now = self.time.now();
        (now, self.clock.period_at(now))
    }

    /// Run `op` atomically over the given staker (and worker) addresses.
    fn transact<T>(
        &mut self,
        touched: &[Address],
        op: impl FnOnce(&mut Self) -> Result<T, TesseraError>,
    ) -> Result<T, TesseraError> {
        let savepoint = self.state.savepoint(touched);
        match op(self) {
            Ok(value) => {
                self.state.release(savepoint);
                Ok(value)
            }
            Err(e) => {
                self.state.restore(savepoint);
                tracing::debug!("Operation rolled back: {}", e);
                Err(e)
            }
        }
    }

    /// Checkpoint the staker's balance and move the global balance by `delta`.
    fn add_snapshots(&mut self, staker: &Address, now: Timestamp, delta: i128) {
        let record = match self.state.stakers.get_mut(staker) {
            Some(record) if !record.flags.snapshots_disabled => record,
            _ => return,
        };
        record.history.add_snapshot(now, record.value);
        let global = i128::from(self.state.balance_history.last_value()) + delta;
        let global = global.clamp(0, i128::from(Amount::MAX)) as Amount;
        self.state.balance_history.add_snapshot(now, global);
    }

    /// Add `staker` to the stakers list on first deposit. Returns true if new.
    fn register(&mut self, staker: &Address, current_period: Period) -> bool {
        let record = self.state.stakers.entry(*staker).or_default();
        if record.registered_period.is_some() {
            return false;
        }
        record.registered_period = Some(current_period);
        self.state.staker_list.push(*staker);
        true
    }

    fn ensure_not_foreign_worker(&self, staker: &Address) -> Result<(), TesseraError> {
        match self.state.workers.staker_of(staker) {
            Some(owner) if owner != *staker => Err(TesseraError::StateConflict(format!(
                "{} is bound as a worker of {}",
                staker.short(),
                owner.short()
            ))),
            _ => Ok(()),
        }
    }

    /// Increase a known staker's balance, honoring the lock maximum.
    fn credit(&mut self, staker: &Address, value: Amount) -> Result<(), TesseraError> {
        let max = self.config.max_allowable_locked_tokens;
        let record = self.state.stakers.get_mut(staker).ok_or_else(|| {
            TesseraError::Unauthorized(format!("{} is not a staker", staker.short()))
        })?;
        let total = record
            .value
            .checked_add(value)
            .ok_or_else(|| TesseraError::InvalidParameter("Balance overflow".to_string()))?;
        if total > max {
            return Err(TesseraError::InvalidParameter(format!(
                "Balance {} would exceed the maximum of {}",
                total, max
            )));
        }
        record.value = total;
        Ok(())
    }

    fn lock_new_sub_stake(
        &mut self,
        staker: &Address,
        value: Amount,
        periods: Period,
        current_period: Period,
    ) -> Result<usize, TesseraError> {
        if value < self.config.min_allowable_locked_tokens {
            return Err(TesseraError::InvalidParameter(format!(
                "Lock of {} is below the minimum of {}",
                value, self.config.min_allowable_locked_tokens
            )));
        }
        if periods < self.config.min_locked_periods {
            return Err(TesseraError::InvalidParameter(format!(
                "Lock of {} periods is below the minimum of {}",
                periods, self.config.min_locked_periods
            )));
        }
        let next_period = following_period(current_period)?;
        let max = self.config.max_allowable_locked_tokens;
        let capacity = self.config.max_sub_stakes;

        let LedgerState {
            stakers,
            locked_per_period,
            ..
        } = &mut self.state;
        let record = active_record(stakers, staker)?;
        ensure_lockable(record, current_period, next_period, value, max)?;
        if record.commitments.next == Some(next_period) {
            locked_per_period.add(next_period, value);
        }
        let window = record.commitments;
        record
            .sub_stakes
            .save(SubStake::open(next_period, periods, value), &window, capacity)
    }

    fn increase_sub_stake(
        &mut self,
        staker: &Address,
        index: usize,
        value: Amount,
        current_period: Period,
    ) -> Result<(), TesseraError> {
        if value == 0 {
            return Err(TesseraError::InvalidParameter(
                "Increase must be greater than zero".to_string(),
            ));
        }
        let next_period = following_period(current_period)?;
        let max = self.config.max_allowable_locked_tokens;
        let capacity = self.config.max_sub_stakes;

        let LedgerState {
            stakers,
            locked_per_period,
            ..
        } = &mut self.state;
        let record = active_record(stakers, staker)?;
        let sub_stake = continuing_sub_stake(record, index, current_period)?;
        ensure_lockable(record, current_period, next_period, value, max)?;
        if record.commitments.next == Some(next_period) {
            locked_per_period.add(next_period, value);
        }

        // Current and earlier periods keep seeing the old value.
        let window = record.commitments;
        if sub_stake.first_period <= current_period {
            record.sub_stakes.save_keeping(
                SubStake::fixed(sub_stake.first_period, current_period, sub_stake.locked_value),
                &window,
                capacity,
                Some(index),
            )?;
        }
        let slot = record.sub_stakes.slot_mut(index)?;
        slot.first_period = next_period;
        slot.locked_value = slot.locked_value.saturating_add(value);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Custody
    // ------------------------------------------------------------------

    /// Deposit `value` from `payer` for `staker` and lock it for `periods`.
    ///
    /// Returns the index of the new sub-stake.
    pub fn deposit(
        &mut self,
        staker: &Address,
        payer: &Address,
        value: Amount,
        periods: Period,
    ) -> Result<usize, TesseraError> {
        if value == 0 {
            return Err(TesseraError::InvalidParameter(
                "Deposit must be greater than zero".to_string(),
            ));
        }
        let (now, current_period) = self.now();
        let (staker, payer) = (*staker, *payer);

        let index = self.transact(&[staker], |this| {
            this.ensure_not_foreign_worker(&staker)?;
            let registered = this.register(&staker, current_period);
            this.credit(&staker, value)?;
            let index = this.lock_new_sub_stake(&staker, value, periods, current_period)?;
            this.add_snapshots(&staker, now, i128::from(value));

            let escrow = this.escrow_account;
            this.custody.transfer_from(&payer, &escrow, value)?;
            if registered {
                this.policy.register(&staker, current_period.saturating_sub(1));
            }
            Ok(index)
        })?;

        tracing::info!(
            "Deposited {} for {} locked {} periods as sub-stake {} (period {})",
            value,
            staker.short(),
            periods,
            index,
            current_period
        );
        Ok(index)
    }

    /// Deposit `value` and add it to an existing sub-stake.
    pub fn deposit_and_increase(
        &mut self,
        staker: &Address,
        payer: &Address,
        index: usize,
        value: Amount,
    ) -> Result<(), TesseraError> {
        if value == 0 {
            return Err(TesseraError::InvalidParameter(
                "Deposit must be greater than zero".to_string(),
            ));
        }
        let (now, current_period) = self.now();
        let (staker, payer) = (*staker, *payer);

        self.transact(&[staker], |this| {
            this.ensure_not_foreign_worker(&staker)?;
            this.credit(&staker, value)?;
            this.increase_sub_stake(&staker, index, value, current_period)?;
            this.add_snapshots(&staker, now, i128::from(value));
            let escrow = this.escrow_account;
            this.custody.transfer_from(&payer, &escrow, value)
        })?;

        tracing::info!(
            "Deposited {} into sub-stake {} of {}",
            value,
            index,
            staker.short()
        );
        Ok(())
    }

    /// Seed many new stakers in one call, all paid for by `payer`.
    ///
    /// `sub_stake_counts[i]` consecutive entries of `values`/`periods` belong
    /// to `stakers[i]`. Returns the total deposited.
    pub fn batch_deposit(
        &mut self,
        payer: &Address,
        stakers: &[Address],
        sub_stake_counts: &[usize],
        values: &[Amount],
        periods: &[Period],
        lock_re_stake_until: Period,
    ) -> Result<Amount, TesseraError> {
        let entries = sub_stake_counts
            .iter()
            .try_fold(0usize, |acc, &count| acc.checked_add(count))
            .ok_or_else(|| {
                TesseraError::InvalidParameter("Sub-stake count overflow".to_string())
            })?;
        if stakers.is_empty()
            || sub_stake_counts.len() != stakers.len()
            || values.len() != periods.len()
            || entries != values.len()
        {
            return Err(TesseraError::InvalidParameter(
                "Batch lengths do not match".to_string(),
            ));
        }
        let (now, current_period) = self.now();
        let next_period = following_period(current_period)?;
        let payer = *payer;
        let min_value = self.config.min_allowable_locked_tokens;
        let min_periods = self.config.min_locked_periods;
        let max = self.config.max_allowable_locked_tokens;
        let capacity = self.config.max_sub_stakes;

        let total = self.transact(stakers, |this| {
            let mut total: Amount = 0;
            let mut offset = 0;
            for (staker, &count) in stakers.iter().zip(sub_stake_counts) {
                if staker.is_zero() {
                    return Err(TesseraError::InvalidParameter(
                        "The zero address cannot stake".to_string(),
                    ));
                }
                if count == 0 {
                    return Err(TesseraError::InvalidParameter(format!(
                        "No sub-stakes given for {}",
                        staker.short()
                    )));
                }
                if count > capacity {
                    return Err(TesseraError::CapacityExceeded(format!(
                        "{} sub-stakes requested, capacity is {}",
                        count, capacity
                    )));
                }
                if this.state.workers.staker_of(staker).is_some() {
                    return Err(TesseraError::StateConflict(format!(
                        "{} is bound as a worker",
                        staker.short()
                    )));
                }
                if let Some(existing) = this.state.stakers.get(staker) {
                    if existing.registered_period.is_some() || !existing.sub_stakes.is_empty() {
                        return Err(TesseraError::StateConflict(format!(
                            "{} is already a staker",
                            staker.short()
                        )));
                    }
                }
                this.register(staker, current_period);

                let record = this.state.stakers.entry(*staker).or_default();
                let window = record.commitments;
                let mut staker_value: Amount = 0;
                let chunk = values[offset..offset + count]
                    .iter()
                    .zip(&periods[offset..offset + count]);
                for (&value, &duration) in chunk {
                    if value < min_value || duration < min_periods {
                        return Err(TesseraError::InvalidParameter(format!(
                            "Sub-stake of {} for {} periods is below the minimums ({}, {})",
                            value, duration, min_value, min_periods
                        )));
                    }
                    staker_value = staker_value.checked_add(value).ok_or_else(|| {
                        TesseraError::InvalidParameter("Balance overflow".to_string())
                    })?;
                    record
                        .sub_stakes
                        .save(SubStake::open(next_period, duration, value), &window, capacity)?;
                }
                offset += count;

                if staker_value > max {
                    return Err(TesseraError::InvalidParameter(format!(
                        "Balance {} would exceed the maximum of {}",
                        staker_value, max
                    )));
                }
                record.value = staker_value;
                if lock_re_stake_until > current_period {
                    record.lock_re_stake_until_period = lock_re_stake_until;
                }
                total = total.checked_add(staker_value).ok_or_else(|| {
                    TesseraError::InvalidParameter("Batch total overflow".to_string())
                })?;
                this.add_snapshots(staker, now, i128::from(staker_value));
            }

            let escrow = this.escrow_account;
            this.custody.transfer_from(&payer, &escrow, total)?;
            for staker in stakers {
                this.policy.register(staker, current_period.saturating_sub(1));
            }
            Ok(total)
        })?;

        tracing::info!(
            "Batch deposit of {} for {} stakers ({} sub-stakes)",
            total,
            stakers.len(),
            entries
        );
        Ok(total)
    }

    /// Withdraw free (unlocked) balance back to the staker.
    pub fn withdraw(&mut self, staker: &Address, value: Amount) -> Result<(), TesseraError> {
        if value == 0 {
            return Err(TesseraError::InvalidParameter(
                "Withdrawal must be greater than zero".to_string(),
            ));
        }
        let (now, current_period) = self.now();
        let staker = *staker;

        let unbound = self.transact(&[staker], |this| {
            let LedgerState {
                stakers, workers, ..
            } = &mut this.state;
            let record = active_record(stakers, &staker)?;
            let free = record.free_balance(current_period);
            if value > free {
                return Err(TesseraError::InsufficientBalance(format!(
                    "Cannot withdraw {}: only {} is unlocked",
                    value, free
                )));
            }
            record.value -= value;
            let mut unbound = None;
            if record.value == 0 && record.commitments.next.is_none() {
                unbound = record.worker;
                workers.unbind(record, current_period);
            }

            this.add_snapshots(&staker, now, -i128::from(value));
            let escrow = this.escrow_account;
            this.custody.transfer(&escrow, &staker, value)?;
            Ok(unbound)
        })?;

        tracing::info!("Withdrew {} for {}", value, staker.short());
        if let Some(worker) = unbound {
            tracing::info!(
                "Worker {} unbound from emptied staker {}",
                worker.short(),
                staker.short()
            );
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Locking
    // ------------------------------------------------------------------

    /// Lock already deposited tokens as a new sub-stake.
    pub fn lock_and_create(
        &mut self,
        staker: &Address,
        value: Amount,
        periods: Period,
    ) -> Result<usize, TesseraError> {
        let (_, current_period) = self.now();
        let staker = *staker;
        let index = self.transact(&[staker], |this| {
            this.lock_new_sub_stake(&staker, value, periods, current_period)
        })?;
        tracing::info!(
            "Locked {} for {} periods as sub-stake {} of {}",
            value,
            periods,
            index,
            staker.short()
        );
        Ok(index)
    }

    /// Lock already deposited tokens into an existing sub-stake.
    pub fn lock_and_increase(
        &mut self,
        staker: &Address,
        index: usize,
        value: Amount,
    ) -> Result<(), TesseraError> {
        let (_, current_period) = self.now();
        let staker = *staker;
        self.transact(&[staker], |this| {
            this.increase_sub_stake(&staker, index, value, current_period)
        })?;
        tracing::info!(
            "Increased sub-stake {} of {} by {}",
            index,
            staker.short(),
            value
        );
        Ok(())
    }

    /// Split `new_value` off sub-stake `index` into a new sub-stake locked
    /// `extra_periods` longer. Returns the new sub-stake's index.
    pub fn divide_stake(
        &mut self,
        staker: &Address,
        index: usize,
        new_value: Amount,
        extra_periods: Period,
    ) -> Result<usize, TesseraError> {
        let min_value = self.config.min_allowable_locked_tokens;
        if new_value < min_value {
            return Err(TesseraError::InvalidParameter(format!(
                "New sub-stake of {} is below the minimum of {}",
                new_value, min_value
            )));
        }
        if extra_periods == 0 {
            return Err(TesseraError::InvalidParameter(
                "Extra periods must be greater than zero".to_string(),
            ));
        }
        let (_, current_period) = self.now();
        let capacity = self.config.max_sub_stakes;
        let staker = *staker;

        let new_index = self.transact(&[staker], |this| {
            let record = active_record(&mut this.state.stakers, &staker)?;
            let sub_stake = continuing_sub_stake(record, index, current_period)?;
            if new_value >= sub_stake.locked_value {
                return Err(TesseraError::InsufficientBalance(format!(
                    "Cannot split {} off a sub-stake of {}",
                    new_value, sub_stake.locked_value
                )));
            }
            let remainder = sub_stake.locked_value - new_value;
            if remainder < min_value {
                return Err(TesseraError::InvalidParameter(format!(
                    "Remaining sub-stake of {} is below the minimum of {}",
                    remainder, min_value
                )));
            }
            let start_period = record.start_period(current_period);
            let periods = (sub_stake.last_period_from(start_period) - start_period)
                .checked_add(extra_periods)
                .ok_or_else(|| TesseraError::InvalidParameter("Duration overflow".to_string()))?;

            record.sub_stakes.slot_mut(index)?.locked_value = remainder;
            let window = record.commitments;
            record.sub_stakes.save(
                SubStake::open(sub_stake.first_period, periods, new_value),
                &window,
                capacity,
            )
        })?;

        tracing::info!(
            "Divided sub-stake {} of {}: {} moved to sub-stake {} (+{} periods)",
            index,
            staker.short(),
            new_value,
            new_index,
            extra_periods
        );
        Ok(new_index)
    }

    /// Extend sub-stake `index` by `extra_periods`.
    pub fn prolong_stake(
        &mut self,
        staker: &Address,
        index: usize,
        extra_periods: Period,
    ) -> Result<(), TesseraError> {
        if extra_periods == 0 {
            return Err(TesseraError::InvalidParameter(
                "Extra periods must be greater than zero".to_string(),
            ));
        }
        let (_, current_period) = self.now();
        let min_periods = self.config.min_locked_periods;
        let staker = *staker;

        self.transact(&[staker], |this| {
            let record = active_record(&mut this.state.stakers, &staker)?;
            let sub_stake = continuing_sub_stake(record, index, current_period)?;
            let start_period = record.start_period(current_period);
            let last_period = sub_stake.last_period_from(start_period);
            let remaining = (last_period - current_period).saturating_add(extra_periods);
            if remaining < min_periods {
                return Err(TesseraError::InvalidParameter(format!(
                    "Prolonged duration of {} periods is below the minimum of {}",
                    remaining, min_periods
                )));
            }
            let periods = (last_period - start_period)
                .checked_add(extra_periods)
                .ok_or_else(|| TesseraError::InvalidParameter("Duration overflow".to_string()))?;
            let slot = record.sub_stakes.slot_mut(index)?;
            slot.periods = periods;
            slot.last_period = None;
            Ok(())
        })?;

        tracing::info!(
            "Prolonged sub-stake {} of {} by {} periods",
            index,
            staker.short(),
            extra_periods
        );
        Ok(())
    }

    /// Merge two sub-stakes ending in the same period.
    pub fn merge_stake(
        &mut self,
        staker: &Address,
        index1: usize,
        index2: usize,
    ) -> Result<(), TesseraError> {
        if index1 == index2 {
            return Err(TesseraError::InvalidParameter(
                "Cannot merge a sub-stake with itself".to_string(),
            ));
        }
        let (_, current_period) = self.now();
        let staker = *staker;

        self.transact(&[staker], |this| {
            let record = active_record(&mut this.state.stakers, &staker)?;
            let first = continuing_sub_stake(record, index1, current_period)?;
            let second = continuing_sub_stake(record, index2, current_period)?;
            let start_period = record.start_period(current_period);
            if first.last_period_from(start_period) != second.last_period_from(start_period) {
                return Err(TesseraError::StateConflict(
                    "Sub-stakes end in different periods".to_string(),
                ));
            }

            let (absorber, absorbed) = if second.first_period > first.first_period {
                (index2, index1)
            } else {
                (index1, index2)
            };
            let (absorber_stake, absorbed_stake) = if absorber == index1 {
                (first, second)
            } else {
                (second, first)
            };

            let slot = record.sub_stakes.slot_mut(absorber)?;
            slot.locked_value = slot.locked_value.saturating_add(absorbed_stake.locked_value);
            let slot = record.sub_stakes.slot_mut(absorbed)?;
            if absorbed_stake.first_period == absorber_stake.first_period {
                slot.retire();
            } else {
                slot.last_period = Some(absorber_stake.first_period - 1);
                slot.periods = 0;
            }
            Ok(())
        })?;

        tracing::info!(
            "Merged sub-stakes {} and {} of {}",
            index1,
            index2,
            staker.short()
        );
        Ok(())
    }

    /// Drop a settled sub-stake slot; the last slot takes its index.
    pub fn remove_unused_sub_stake(
        &mut self,
        staker: &Address,
        index: usize,
    ) -> Result<SubStake, TesseraError> {
        let staker = *staker;
        let removed = self.transact(&[staker], |this| {
            let record = active_record(&mut this.state.stakers, &staker)?;
            let window = record.commitments;
            record.sub_stakes.remove_unused(index, &window)
        })?;
        tracing::info!("Removed unused sub-stake {} of {}", index, staker.short());
        Ok(removed)
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Called by a bound worker: settle owed rewards and commit the staker's
    /// locked tokens to the next period. Repeating it in one period is a no-op.
    pub fn commit_to_next_period(&mut self, worker: &Address) -> Result<CommitOutcome, TesseraError> {
        let (now, current_period) = self.now();
        let staker = self.state.workers.staker_of(worker).ok_or_else(|| {
            TesseraError::Unauthorized(format!("{} is not a bound worker", worker.short()))
        })?;

        let outcome = self.transact(&[staker], |this| {
            let LedgerState {
                stakers,
                locked_per_period,
                ..
            } = &mut this.state;
            let record = stakers.get_mut(&staker).ok_or_else(|| {
                TesseraError::Unauthorized(format!("{} is not a staker", staker.short()))
            })?;
            let outcome =
                commitment::commit_to_next_period(record, locked_per_period, &this.curve, current_period)?;

            if !outcome.minted.is_noop() {
                this.add_snapshots(&staker, now, i128::from(outcome.minted.reward));
            }
            for period in &outcome.minted.settled {
                this.policy.update_fee(&staker, *period);
            }
            if let Some((period, _)) = outcome.committed {
                this.policy.set_default_fee_delta(&staker, period);
            }
            Ok(outcome)
        })?;

        match outcome.committed {
            Some((period, locked)) => tracing::info!(
                "{} committed {} for period {} (minted {})",
                staker.short(),
                locked,
                period,
                outcome.minted.reward
            ),
            None => tracing::debug!(
                "{} already committed to period {}",
                staker.short(),
                current_period.saturating_add(1)
            ),
        }
        if let Some(gap) = outcome.downtime {
            tracing::warn!(
                "{} missed periods {}..={}",
                staker.short(),
                gap.start_period,
                gap.end_period
            );
        }
        Ok(outcome)
    }

    /// Settle every reward owed for past committed periods.
    pub fn mint(&mut self, staker: &Address) -> Result<MintOutcome, TesseraError> {
        let (now, current_period) = self.now();
        let staker = *staker;

        let outcome = self.transact(&[staker], |this| {
            let LedgerState {
                stakers,
                locked_per_period,
                ..
            } = &mut this.state;
            let record = active_record(stakers, &staker)?;
            let outcome =
                commitment::settle_rewards(record, locked_per_period, &this.curve, current_period);
            if !outcome.is_noop() {
                this.add_snapshots(&staker, now, i128::from(outcome.reward));
            }
            for period in &outcome.settled {
                this.policy.update_fee(&staker, *period);
            }
            Ok(outcome)
        })?;

        if !outcome.is_noop() {
            tracing::info!(
                "Minted {} for {} (periods {:?})",
                outcome.reward,
                staker.short(),
                outcome.settled
            );
        }
        Ok(outcome)
    }

    // ------------------------------------------------------------------
    // Flags
    // ------------------------------------------------------------------

    pub fn set_re_stake(&mut self, staker: &Address, re_stake: bool) -> Result<(), TesseraError> {
        let (_, current_period) = self.now();
        let staker = *staker;
        self.transact(&[staker], |this| {
            let record = this.state.stakers.entry(staker).or_default();
            if record.is_re_stake_locked(current_period) {
                return Err(TesseraError::StateConflict(format!(
                    "Re-stake is locked until period {}",
                    record.lock_re_stake_until_period
                )));
            }
            record.flags.re_stake_disabled = !re_stake;
            Ok(())
        })?;
        tracing::info!("Re-stake for {} set to {}", staker.short(), re_stake);
        Ok(())
    }

    /// Freeze the re-stake flag until `until_period`.
    pub fn lock_re_stake(&mut self, staker: &Address, until_period: Period) -> Result<(), TesseraError> {
        let (_, current_period) = self.now();
        let staker = *staker;
        self.transact(&[staker], |this| {
            let record = this.state.stakers.entry(staker).or_default();
            if record.is_re_stake_locked(current_period) {
                return Err(TesseraError::StateConflict(format!(
                    "Re-stake is already locked until period {}",
                    record.lock_re_stake_until_period
                )));
            }
            if until_period <= current_period {
                return Err(TesseraError::InvalidParameter(format!(
                    "Lock period {} is not in the future",
                    until_period
                )));
            }
            record.lock_re_stake_until_period = until_period;
            Ok(())
        })?;
        tracing::info!(
            "Re-stake for {} locked until period {}",
            staker.short(),
            until_period
        );
        Ok(())
    }

    pub fn set_wind_down(&mut self, staker: &Address, wind_down: bool) -> Result<(), TesseraError> {
        let (_, current_period) = self.now();
        let next_period = following_period(current_period)?;
        let staker = *staker;
        let changed = self.transact(&[staker], |this| {
            let record = this.state.stakers.entry(staker).or_default();
            if record.flags.wind_down == wind_down {
                return Ok(false);
            }
            record.flags.wind_down = wind_down;
            commitment::apply_wind_down_change(record, wind_down, next_period);
            Ok(true)
        })?;
        if changed {
            tracing::info!("Wind-down for {} set to {}", staker.short(), wind_down);
        }
        Ok(())
    }

    pub fn set_snapshots(&mut self, staker: &Address, enabled: bool) -> Result<(), TesseraError> {
        let (now, _) = self.now();
        let staker = *staker;
        let changed = self.transact(&[staker], |this| {
            let LedgerState {
                stakers,
                balance_history,
                ..
            } = &mut this.state;
            let record = stakers.entry(staker).or_default();
            if record.flags.snapshots_disabled != enabled {
                return Ok(false);
            }
            let global = balance_history.last_value();
            if enabled {
                record.history.add_snapshot(now, record.value);
                balance_history.add_snapshot(now, global.saturating_add(record.value));
            } else {
                record.history.add_snapshot(now, 0);
                balance_history.add_snapshot(now, global.saturating_sub(record.value));
            }
            record.flags.snapshots_disabled = !enabled;
            Ok(true)
        })?;
        if changed {
            tracing::info!("Snapshots for {} set to {}", staker.short(), enabled);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Worker
    // ------------------------------------------------------------------

    /// Bind `worker` to `staker`, or unbind with `None`.
    pub fn bond_worker(&mut self, staker: &Address, worker: Option<Address>) -> Result<(), TesseraError> {
        let (_, current_period) = self.now();
        let min_worker_periods = self.config.min_worker_periods;
        let staker = *staker;
        let mut touched = vec![staker];
        touched.extend(worker);

        self.transact(&touched, |this| {
            let worker_has_sub_stakes = worker
                .and_then(|w| this.state.stakers.get(&w))
                .map_or(false, |r| !r.sub_stakes.is_empty());
            let LedgerState {
                stakers, workers, ..
            } = &mut this.state;
            let record = active_record(stakers, &staker)?;
            workers.bond(
                &staker,
                record,
                worker,
                worker_has_sub_stakes,
                current_period,
                min_worker_periods,
            )
        })?;

        match worker {
            Some(worker) => tracing::info!(
                "Worker {} bonded to {} in period {}",
                worker.short(),
                staker.short(),
                current_period
            ),
            None => tracing::info!("Worker unbonded from {}", staker.short()),
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Privileged
    // ------------------------------------------------------------------

    /// Slash `staker` by `penalty`, paying up to `reward` of it to
    /// `investigator` and burning the rest.
    pub fn slash_staker(
        &mut self,
        caller: &Address,
        staker: &Address,
        penalty: Amount,
        investigator: &Address,
        reward: Amount,
    ) -> Result<SlashOutcome, TesseraError> {
        if self.config.slashing_authority != Some(*caller) {
            return Err(TesseraError::Unauthorized(format!(
                "{} may not slash",
                caller.short()
            )));
        }
        let (now, current_period) = self.now();
        let capacity = self.config.max_sub_stakes;
        let (staker, investigator) = (*staker, *investigator);

        let outcome = self.transact(&[staker], |this| {
            let LedgerState {
                stakers,
                locked_per_period,
                ..
            } = &mut this.state;
            let record = stakers.get_mut(&staker).ok_or_else(|| {
                TesseraError::InvalidParameter(format!("{} is not a staker", staker.short()))
            })?;
            let outcome = slashing::slash(
                record,
                locked_per_period,
                penalty,
                reward,
                current_period,
                capacity,
            )?;
            this.state.burned = this.state.burned.saturating_add(outcome.burned);
            this.add_snapshots(&staker, now, -i128::from(outcome.penalty));

            let escrow = this.escrow_account;
            this.custody.burn(&escrow, outcome.burned)?;
            this.custody.transfer(&escrow, &investigator, outcome.reward)?;
            Ok(outcome)
        })?;

        tracing::warn!(
            "Slashed {} by {} ({} to {}, {} burned)",
            staker.short(),
            outcome.penalty,
            outcome.reward,
            investigator.short(),
            outcome.burned
        );
        Ok(outcome)
    }

    /// Toggle work measurement; returns the staker's completed work.
    pub fn set_work_measurement(
        &mut self,
        caller: &Address,
        staker: &Address,
        measure_work: bool,
    ) -> Result<Amount, TesseraError> {
        if self.config.work_measurement_authority != Some(*caller) {
            return Err(TesseraError::Unauthorized(format!(
                "{} may not change work measurement",
                caller.short()
            )));
        }
        let staker = *staker;
        let completed = self.transact(&[staker], |this| {
            let record = this.state.stakers.entry(staker).or_default();
            record.flags.measure_work = measure_work;
            Ok(record.completed_work)
        })?;
        tracing::info!(
            "Work measurement for {} set to {} (completed {})",
            staker.short(),
            measure_work,
            completed
        );
        Ok(completed)
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub fn current_period(&self) -> Period {
        self.now().1
    }

    pub fn staker(&self, staker: &Address) -> Option<&StakerRecord> {
        self.state.stakers.get(staker)
    }

    /// Tokens `staker` has locked `offset` periods from now.
    pub fn locked_tokens(&self, staker: &Address, offset: Period) -> Amount {
        let current_period = self.current_period();
        self.staker(staker).map_or(0, |r| {
            r.locked_tokens(current_period, current_period.saturating_add(offset))
        })
    }

    /// Tokens `staker` had locked `offset` periods ago.
    pub fn locked_tokens_in_past(&self, staker: &Address, offset: Period) -> Amount {
        let current_period = self.current_period();
        self.staker(staker).map_or(0, |r| {
            r.locked_tokens(current_period, current_period.saturating_sub(offset))
        })
    }

    /// Tokens `staker` has locked in `period`, counted only if that period
    /// is committed and not yet settled.
    pub fn committed_locked_tokens(&self, staker: &Address, period: Period) -> Amount {
        let current_period = self.current_period();
        match self.staker(staker) {
            Some(r) if r.commitments.contains(period) => r.locked_tokens(current_period, period),
            _ => 0,
        }
    }

    pub fn locked_per_period(&self, period: Period) -> Amount {
        self.state.locked_per_period.get(period)
    }

    /// Stakers committed to the next period, paged over the stakers list,
    /// with what they keep locked `periods` from now.
    ///
    /// `max_stakers == 0` means no limit. Returns the total and the entries.
    pub fn active_stakers(
        &self,
        periods: Period,
        start_index: usize,
        max_stakers: usize,
    ) -> Result<(Amount, Vec<(Address, Amount)>), TesseraError> {
        if periods == 0 {
            return Err(TesseraError::InvalidParameter(
                "Periods must be greater than zero".to_string(),
            ));
        }
        let len = self.state.staker_list.len();
        if start_index >= len {
            return Err(TesseraError::InvalidParameter(format!(
                "Start index {} out of range ({} stakers)",
                start_index, len
            )));
        }
        let end = if max_stakers == 0 {
            len
        } else {
            start_index.saturating_add(max_stakers).min(len)
        };

        let current_period = self.current_period();
        let next_period = current_period.saturating_add(1);
        let target = current_period.saturating_add(periods);
        let mut total: Amount = 0;
        let mut active = Vec::new();
        for address in &self.state.staker_list[start_index..end] {
            let record = match self.state.stakers.get(address) {
                Some(record) if record.commitments.contains(next_period) => record,
                _ => continue,
            };
            let locked = record.locked_tokens(current_period, target);
            if locked == 0 {
                continue;
            }
            total = total.saturating_add(locked);
            active.push((*address, locked));
        }
        Ok((total, active))
    }

    pub fn sub_stakes(&self, staker: &Address) -> &[SubStake] {
        self.staker(staker)
            .map(|r| r.sub_stakes.as_slice())
            .unwrap_or(&[])
    }

    pub fn sub_stakes_length(&self, staker: &Address) -> usize {
        self.sub_stakes(staker).len()
    }

    pub fn past_downtime(&self, staker: &Address) -> &[Downtime] {
        self.staker(staker)
            .map(|r| r.past_downtime.as_slice())
            .unwrap_or(&[])
    }

    pub fn past_downtime_length(&self, staker: &Address) -> usize {
        self.past_downtime(staker).len()
    }

    pub fn worker_of(&self, staker: &Address) -> Option<Address> {
        self.staker(staker).and_then(|r| r.worker)
    }

    pub fn staker_of_worker(&self, worker: &Address) -> Option<Address> {
        self.state.workers.staker_of(worker)
    }

    pub fn last_committed_period(&self, staker: &Address) -> Option<Period> {
        self.staker(staker).and_then(|r| r.last_committed_period())
    }

    pub fn is_re_stake_locked(&self, staker: &Address) -> bool {
        let current_period = self.current_period();
        self.staker(staker)
            .map_or(false, |r| r.is_re_stake_locked(current_period))
    }

    pub fn flags(&self, staker: &Address) -> StakerFlags {
        self.staker(staker).map(|r| r.flags).unwrap_or_default()
    }

    pub fn completed_work(&self, staker: &Address) -> Amount {
        self.staker(staker).map_or(0, |r| r.completed_work)
    }

    /// Total balance (locked and free) held for `staker`.
    pub fn all_tokens(&self, staker: &Address) -> Amount {
        self.staker(staker).map_or(0, |r| r.value)
    }

    pub fn balance_at(&self, staker: &Address, index: Timestamp) -> Amount {
        self.staker(staker).map_or(0, |r| r.history.value_at(index))
    }

    pub fn global_balance_at(&self, index: Timestamp) -> Amount {
        self.state.balance_history.value_at(index)
    }

    pub fn stakers_length(&self) -> usize {
        self.state.staker_list.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::issuance::IssuanceCurve;
    use crate::period::ManualClock;
    use crate::policy::RecordingFeePolicy;
    use crate::token::TokenBank;

    type TestEscrow = StakingEscrow<TokenBank, RecordingFeePolicy, IssuanceCurve, ManualClock>;

    fn addr(label: &str) -> Address {
        Address::from_label(label)
    }

    fn escrow() -> (TestEscrow, ManualClock) {
        let config = EscrowConfig {
            seconds_per_period: 100,
            min_locked_periods: 2,
            min_allowable_locked_tokens: 100,
            max_allowable_locked_tokens: 100_000,
            ..EscrowConfig::default()
        };
        let clock = ManualClock::new(1_000);
        let mut bank = TokenBank::new();
        bank.mint_to(&addr("alice"), 50_000).unwrap();
        let escrow = StakingEscrow::new(
            config,
            bank,
            RecordingFeePolicy::new(),
            IssuanceCurve::default(),
            clock.clone(),
        )
        .unwrap();
        (escrow, clock)
    }

    #[test]
    fn test_failed_custody_rolls_back() {
        let (mut escrow, _) = escrow();
        // bob holds no tokens
        let err = escrow.deposit(&addr("bob"), &addr("bob"), 1_000, 5).unwrap_err();
        assert!(matches!(err, TesseraError::InsufficientBalance(_)));
        assert!(escrow.staker(&addr("bob")).is_none());
        assert_eq!(escrow.stakers_length(), 0);
        assert_eq!(escrow.global_balance_at(u64::MAX), 0);
        assert!(escrow.policy().events().is_empty());
    }

    #[test]
    fn test_deposit_registers_once() {
        let (mut escrow, _) = escrow();
        let alice = addr("alice");
        escrow.deposit(&alice, &alice, 1_000, 5).unwrap();
        escrow.deposit(&alice, &alice, 500, 5).unwrap();
        assert_eq!(escrow.stakers_length(), 1);
        assert_eq!(escrow.all_tokens(&alice), 1_500);
        assert_eq!(escrow.custody().balance_of(&escrow.escrow_account()), 1_500);
        assert_eq!(escrow.policy().events().len(), 1);
    }

    #[test]
    fn test_non_staker_is_unauthorized() {
        let (mut escrow, _) = escrow();
        assert!(matches!(
            escrow.lock_and_create(&addr("nobody"), 1_000, 5),
            Err(TesseraError::Unauthorized(_))
        ));
        assert!(matches!(
            escrow.commit_to_next_period(&addr("nobody")),
            Err(TesseraError::Unauthorized(_))
        ));
    }

    #[test]
    fn test_privileged_calls_check_caller() {
        let (mut escrow, _) = escrow();
        let alice = addr("alice");
        assert!(matches!(
            escrow.slash_staker(&alice, &alice, 10, &alice, 0),
            Err(TesseraError::Unauthorized(_))
        ));
        assert!(matches!(
            escrow.set_work_measurement(&alice, &alice, true),
            Err(TesseraError::Unauthorized(_))
        ));
    }

    #[test]
    fn test_increase_before_start_needs_no_fragment() {
        let (mut escrow, _) = escrow();
        let alice = addr("alice");
        escrow.deposit(&alice, &alice, 1_000, 5).unwrap();
        escrow.deposit_and_increase(&alice, &alice, 0, 400).unwrap();
        assert_eq!(escrow.sub_stakes_length(&alice), 1);
        assert_eq!(escrow.sub_stakes(&alice)[0].locked_value, 1_400);
        assert_eq!(escrow.locked_tokens(&alice, 1), 1_400);
        assert_eq!(escrow.all_tokens(&alice), 1_400);
    }

    #[test]
    fn test_lock_and_increase_needs_free_balance() {
        let (mut escrow, _) = escrow();
        let alice = addr("alice");
        escrow.deposit(&alice, &alice, 1_000, 5).unwrap();
        assert!(matches!(
            escrow.lock_and_increase(&alice, 0, 1),
            Err(TesseraError::InsufficientBalance(_))
        ));
        assert!(matches!(
            escrow.lock_and_increase(&alice, 3, 1),
            Err(TesseraError::InvalidParameter(_))
        ));
        assert_eq!(escrow.sub_stakes(&alice)[0].locked_value, 1_000);
    }

    #[test]
    fn test_re_stake_lock_freezes_flag() {
        let (mut escrow, clock) = escrow();
        let alice = addr("alice");
        escrow.deposit(&alice, &alice, 1_000, 5).unwrap();
        escrow.lock_re_stake(&alice, 12).unwrap();
        assert!(escrow.is_re_stake_locked(&alice));
        assert!(matches!(
            escrow.set_re_stake(&alice, false),
            Err(TesseraError::StateConflict(_))
        ));
        clock.advance(200);
        assert!(!escrow.is_re_stake_locked(&alice));
        escrow.set_re_stake(&alice, false).unwrap();
        assert!(escrow.flags(&alice).re_stake_disabled);
    }

    #[test]
    fn test_batch_count_overflow_is_rejected() {
        let (mut escrow, _) = escrow();
        let alice = addr("alice");
        let err = escrow
            .batch_deposit(
                &alice,
                &[addr("bob"), addr("carol")],
                &[usize::MAX, 2],
                &[1_000],
                &[5],
                0,
            )
            .unwrap_err();
        assert!(matches!(err, TesseraError::InvalidParameter(_)));
        assert_eq!(escrow.stakers_length(), 0);
    }

    #[test]
    fn test_current_period_follows_clock() {
        let (escrow, clock) = escrow();
        assert_eq!(escrow.current_period(), 10);
        clock.advance(250);
        assert_eq!(escrow.current_period(), 12);
    }
}
