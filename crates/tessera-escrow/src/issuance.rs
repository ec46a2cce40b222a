// crates/tessera-escrow/src/issuance.rs
//
// Reference reward curve with halving emission.
//
// Each period emits a fixed budget that halves every `halving_interval`
// periods. A sub-stake's share of a period's budget is proportional to its
// locked value over everything committed for that period, scaled up for
// longer remaining locks:
//
//   reward = emission(period) * value / total_locked
//            * (k1 + min(remaining, k2)) / (k1 + k2)
//
// where k1 = `lock_duration_coefficient`, k2 = `max_rewarded_periods`.
// A sub-stake locked for k2 or more periods earns its full pro-rata share.

use serde::{Deserialize, Serialize};

use tessera_core::{Amount, Period, RewardCurve, TesseraError};

/// Parameters of the reference reward curve. Pure and deterministic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuanceCurve {
    /// Emission of period 0, before any halving.
    #[serde(default = "default_initial_period_emission")]
    pub initial_period_emission: Amount,

    /// Number of periods between halvings.
    #[serde(default = "default_halving_interval")]
    pub halving_interval: Period,

    /// Base weight every locked token earns regardless of remaining duration.
    #[serde(default = "default_lock_duration_coefficient")]
    pub lock_duration_coefficient: Period,

    /// Remaining duration beyond which a longer lock earns nothing extra.
    #[serde(default = "default_max_rewarded_periods")]
    pub max_rewarded_periods: Period,
}

fn default_initial_period_emission() -> Amount {
    100_000
}

fn default_halving_interval() -> Period {
    1_460
}

fn default_lock_duration_coefficient() -> Period {
    365
}

fn default_max_rewarded_periods() -> Period {
    365
}

impl Default for IssuanceCurve {
    fn default() -> Self {
        Self {
            initial_period_emission: default_initial_period_emission(),
            halving_interval: default_halving_interval(),
            lock_duration_coefficient: default_lock_duration_coefficient(),
            max_rewarded_periods: default_max_rewarded_periods(),
        }
    }
}

impl IssuanceCurve {
    pub fn validate(&self) -> Result<(), TesseraError> {
        if self.halving_interval == 0 {
            return Err(TesseraError::Config(
                "issuance.halving_interval must be positive".to_string(),
            ));
        }
        if self.lock_duration_coefficient == 0 && self.max_rewarded_periods == 0 {
            return Err(TesseraError::Config(
                "issuance coefficients cannot both be zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Emission budget of a single period.
    ///
    /// Returns 0 once the halving number exceeds 63 (the budget underflows to zero).
    pub fn emission_at_period(&self, period: Period) -> Amount {
        if self.halving_interval == 0 {
            return 0;
        }
        let halving_number = period / self.halving_interval;
        if halving_number >= 64 {
            return 0;
        }
        self.initial_period_emission >> halving_number
    }
}

impl RewardCurve for IssuanceCurve {
    fn reward(
        &self,
        current_period: Period,
        sub_stake_value: Amount,
        total_locked: Amount,
        remaining_duration: Period,
    ) -> Amount {
        if total_locked == 0 || sub_stake_value == 0 {
            return 0;
        }
        let denominator_weight =
            self.lock_duration_coefficient as u128 + self.max_rewarded_periods as u128;
        if denominator_weight == 0 {
            return 0;
        }

        let emission = self.emission_at_period(current_period) as u128;
        // emission * value always fits in u128; the duration weight is applied after
        // dividing by the locked total.
        let share = emission * sub_stake_value as u128 / total_locked as u128;
        let weight = self.lock_duration_coefficient as u128
            + remaining_duration.min(self.max_rewarded_periods) as u128;
        let reward = share.saturating_mul(weight) / denominator_weight;

        reward.min(Amount::MAX as u128) as Amount
    }
}
