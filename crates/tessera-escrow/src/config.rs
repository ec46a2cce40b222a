// crates/tessera-escrow/src/config.rs
//
// Ledger configuration. Loaded from a TOML file or populated with defaults.
//
// Every bound the ledger enforces lives here: lock minimums and maximums,
// the minimum lock duration, the worker rebind interval, the sub-stake
// capacity, and the two privileged authorities.

use serde::{Deserialize, Serialize};
use std::fs;

use tessera_core::{Address, Amount, Period, TesseraError};

use crate::issuance::IssuanceCurve;

/// Runtime configuration for a `StakingEscrow`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowConfig {
    /// Length of one period in seconds of logical time.
    #[serde(default = "default_seconds_per_period")]
    pub seconds_per_period: u64,

    /// Minimum number of periods a new lock must cover.
    #[serde(default = "default_min_locked_periods")]
    pub min_locked_periods: Period,

    /// Minimum value of a single sub-stake.
    #[serde(default = "default_min_allowable_locked_tokens")]
    pub min_allowable_locked_tokens: Amount,

    /// Maximum tokens a staker may lock (and deposit).
    #[serde(default = "default_max_allowable_locked_tokens")]
    pub max_allowable_locked_tokens: Amount,

    /// Minimum number of periods between two worker bindings.
    #[serde(default = "default_min_worker_periods")]
    pub min_worker_periods: Period,

    /// Sub-stake arena capacity per staker.
    #[serde(default = "default_max_sub_stakes")]
    pub max_sub_stakes: usize,

    /// The only principal allowed to slash.
    #[serde(default)]
    pub slashing_authority: Option<Address>,

    /// The only principal allowed to toggle work measurement.
    #[serde(default)]
    pub work_measurement_authority: Option<Address>,

    /// Parameters of the reference reward curve.
    #[serde(default)]
    pub issuance: IssuanceCurve,

    /// Log level: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_seconds_per_period() -> u64 {
    86_400
}

fn default_min_locked_periods() -> Period {
    30
}

fn default_min_allowable_locked_tokens() -> Amount {
    15_000
}

fn default_max_allowable_locked_tokens() -> Amount {
    30_000_000
}

fn default_min_worker_periods() -> Period {
    2
}

fn default_max_sub_stakes() -> usize {
    30
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for EscrowConfig {
    fn default() -> Self {
        Self {
            seconds_per_period: default_seconds_per_period(),
            min_locked_periods: default_min_locked_periods(),
            min_allowable_locked_tokens: default_min_allowable_locked_tokens(),
            max_allowable_locked_tokens: default_max_allowable_locked_tokens(),
            min_worker_periods: default_min_worker_periods(),
            max_sub_stakes: default_max_sub_stakes(),
            slashing_authority: None,
            work_measurement_authority: None,
            issuance: IssuanceCurve::default(),
            log_level: default_log_level(),
        }
    }
}

impl EscrowConfig {
    /// Load configuration from a TOML file at the given path.
    ///
    /// Returns an error if the file cannot be read, parsed, or fails validation.
    pub fn load(path: &str) -> Result<Self, TesseraError> {
        let contents = fs::read_to_string(path)
            .map_err(|e| TesseraError::Config(format!("Failed to read {}: {}", path, e)))?;
        Self::from_toml_str(&contents)
    }

    /// Parse and validate configuration from TOML text.
    pub fn from_toml_str(contents: &str) -> Result<Self, TesseraError> {
        let config: EscrowConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the ledger cannot operate under.
    pub fn validate(&self) -> Result<(), TesseraError> {
        if self.seconds_per_period == 0 {
            return Err(TesseraError::Config(
                "seconds_per_period must be positive".to_string(),
            ));
        }
        if self.min_locked_periods == 0 {
            return Err(TesseraError::Config(
                "min_locked_periods must be positive".to_string(),
            ));
        }
        if self.min_allowable_locked_tokens == 0 {
            return Err(TesseraError::Config(
                "min_allowable_locked_tokens must be positive".to_string(),
            ));
        }
        if self.min_allowable_locked_tokens > self.max_allowable_locked_tokens {
            return Err(TesseraError::Config(format!(
                "min_allowable_locked_tokens ({}) exceeds max_allowable_locked_tokens ({})",
                self.min_allowable_locked_tokens, self.max_allowable_locked_tokens
            )));
        }
        if self.max_sub_stakes == 0 {
            return Err(TesseraError::Config(
                "max_sub_stakes must be positive".to_string(),
            ));
        }
        self.issuance.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = EscrowConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_sub_stakes, 30);
        assert_eq!(config.seconds_per_period, 86_400);
    }

    #[test]
    fn test_empty_toml_uses_defaults() {
        let config = EscrowConfig::from_toml_str("").unwrap();
        assert_eq!(config, EscrowConfig::default());
    }

    #[test]
    fn test_partial_toml_overrides() {
        let alice = Address::from_label("adjudicator");
        let toml = format!(
            "seconds_per_period = 3600\nmin_locked_periods = 4\nslashing_authority = \"{}\"\n\n[issuance]\ninitial_period_emission = 500\n",
            alice.to_hex()
        );
        let config = EscrowConfig::from_toml_str(&toml).unwrap();
        assert_eq!(config.seconds_per_period, 3600);
        assert_eq!(config.min_locked_periods, 4);
        assert_eq!(config.slashing_authority, Some(alice));
        assert_eq!(config.issuance.initial_period_emission, 500);
        // Untouched fields keep their defaults
        assert_eq!(config.max_sub_stakes, 30);
    }

    #[test]
    fn test_zero_period_length_rejected() {
        let result = EscrowConfig::from_toml_str("seconds_per_period = 0");
        assert!(matches!(result, Err(TesseraError::Config(_))));
    }

    #[test]
    fn test_min_above_max_rejected() {
        let config = EscrowConfig {
            min_allowable_locked_tokens: 10,
            max_allowable_locked_tokens: 5,
            ..EscrowConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_malformed_toml_rejected() {
        let result = EscrowConfig::from_toml_str("seconds_per_period = \"soon\"");
        assert!(matches!(result, Err(TesseraError::Config(_))));
    }
}
