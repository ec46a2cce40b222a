// crates/tessera-core/src/units.rs
//
// Scalar units shared by every crate in the workspace.
//
// Token amounts are integers in the smallest indivisible unit. Periods are
// integers derived from a fixed-length clock; period 0 is never committed.

/// Token amount in base units.
pub type Amount = u64;

/// Discrete period number.
pub type Period = u32;

/// Sentinel for "no end": effective last periods are capped here.
pub const MAX_PERIOD: Period = Period::MAX;

/// Logical time in seconds, as read from a `TimeSource`. Also the key of
/// every balance snapshot.
pub type Timestamp = u64;
