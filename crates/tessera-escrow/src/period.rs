// crates/tessera-escrow/src/period.rs
//
// Period clock: converts logical time into period numbers.
//
// A period is `seconds_per_period` seconds long; period N covers
// [N * seconds_per_period, (N + 1) * seconds_per_period). The ledger reads
// its time source once per operation, so every read inside one operation
// sees the same period.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tessera_core::{Period, TesseraError, TimeSource, Timestamp, MAX_PERIOD};

/// Stateless period derivation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodClock {
    seconds_per_period: u64,
}

impl PeriodClock {
    /// # Errors
    /// Returns `TesseraError::Config` if `seconds_per_period` is zero.
    pub fn new(seconds_per_period: u64) -> Result<Self, TesseraError> {
        if seconds_per_period == 0 {
            return Err(TesseraError::Config(
                "seconds_per_period must be positive".to_string(),
            ));
        }
        Ok(Self { seconds_per_period })
    }

    pub fn seconds_per_period(&self) -> u64 {
        self.seconds_per_period
    }

    /// Period containing `now`. Saturates at `MAX_PERIOD`.
    pub fn period_at(&self, now: Timestamp) -> Period {
        let period = now / self.seconds_per_period;
        period.min(MAX_PERIOD as u64) as Period
    }

    /// First second of `period`.
    pub fn period_start(&self, period: Period) -> Timestamp {
        (period as u64).saturating_mul(self.seconds_per_period)
    }
}

/// A manually advanced time source.
///
/// Clones share the same underlying instant, so a test (or the CLI) can keep
/// one handle and advance time for a ledger that owns another.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new(now: Timestamp) -> Self {
        Self {
            now: Arc::new(AtomicU64::new(now)),
        }
    }

    pub fn set(&self, now: Timestamp) {
        self.now.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, seconds: u64) {
        self.now.fetch_add(seconds, Ordering::SeqCst);
    }
}

impl TimeSource for ManualClock {
    fn now(&self) -> Timestamp {
        self.now.load(Ordering::SeqCst)
    }
}

impl Serialize for ManualClock {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(self.now())
    }
}

impl<'de> Deserialize<'de> for ManualClock {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(ManualClock::new(Timestamp::deserialize(deserializer)?))
    }
}
