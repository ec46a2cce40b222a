// crates/tessera-core/src/lib.rs
//
// tessera-core: Core types, collaborator traits, and identity primitives for
// the Tessera periodic staking ledger.
//
// This is the leaf crate that all other crates in the workspace depend on.
// It defines the scalar units, the participant address, the error type, and
// the trait interfaces of everything the ledger consumes but does not own
// (token custody, fee policy, reward curve, time source).

pub mod error;
pub mod identity;
pub mod traits;
pub mod units;

// Re-export key types for ergonomic access from downstream crates.
// Usage: `use tessera_core::Address;`

pub use error::TesseraError;
pub use identity::Address;
pub use traits::{FeePolicy, RewardCurve, SystemTime, TimeSource, TokenCustody};
pub use units::{Amount, Period, Timestamp, MAX_PERIOD};
