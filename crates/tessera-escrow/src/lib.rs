// crates/tessera-escrow/src/lib.rs
//
// tessera-escrow: periodic staking ledger. Sub-stake accounting, the
// commitment/mint engine, slashing, worker binding and balance snapshots,
// behind the atomic `StakingEscrow` facade.
//
// All amounts are integer base units (`tessera_core::Amount`).

pub mod commitment;
pub mod config;
pub mod escrow;
pub mod issuance;
pub mod period;
pub mod policy;
pub mod slashing;
pub mod snapshot;
pub mod staker;
pub mod state;
pub mod substake;
pub mod token;
pub mod worker;

// Re-export key types for ergonomic access from downstream crates.
pub use commitment::{CommitOutcome, CommitmentWindow, MintOutcome};
pub use config::EscrowConfig;
pub use escrow::{StakingEscrow, ESCROW_ACCOUNT_LABEL};
pub use issuance::IssuanceCurve;
pub use period::{ManualClock, PeriodClock};
pub use policy::{PolicyEvent, RecordingFeePolicy};
pub use slashing::SlashOutcome;
pub use snapshot::{History, Snapshot};
pub use staker::{Downtime, StakerFlags, StakerRecord};
pub use state::{LedgerState, LockedPerPeriod};
pub use substake::{SubStake, SubStakes};
pub use token::TokenBank;
pub use worker::WorkerRegistry;
