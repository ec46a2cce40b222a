use thiserror::Error;

/// Ledger-wide error types for Tessera.
///
/// Every failed operation surfaces exactly one of these. Operations that fail
/// leave the ledger unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TesseraError {
    /// A value or duration below the configured minimum, a zero value, an
    /// out-of-range index, or a malformed range.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// The caller is not the principal required for this operation.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// The staker's sub-stake arena is full.
    #[error("Capacity exceeded: {0}")]
    CapacityExceeded(String),

    /// The operation conflicts with existing state (duplicate initial deposit,
    /// worker already bound elsewhere, re-stake flag locked, ...).
    #[error("State conflict: {0}")]
    StateConflict(String),

    /// Requested amount exceeds what is available.
    #[error("Insufficient balance: {0}")]
    InsufficientBalance(String),

    /// Token custody collaborator failed.
    #[error("Custody error: {0}")]
    Custody(String),

    /// Configuration could not be loaded or is inconsistent.
    #[error("Config error: {0}")]
    Config(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for TesseraError {
    fn from(e: serde_json::Error) -> Self {
        TesseraError::Serialization(e.to_string())
    }
}

impl From<toml::de::Error> for TesseraError {
    fn from(e: toml::de::Error) -> Self {
        TesseraError::Config(e.to_string())
    }
}
