// crates/tessera-cli/src/state.rs
//
// On-disk ledger for the CLI.
//
// Everything the escrow needs to resume lives in one pretty-printed JSON file:
// the configuration, the logical clock reading, the ledger state, the token
// bank and the fee-policy log. Each invocation opens the file into a
// `StakingEscrow`, runs one command and writes the result back.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use tessera_core::{Address, TesseraError, TimeSource, Timestamp};
use tessera_escrow::{
    EscrowConfig, IssuanceCurve, LedgerState, ManualClock, RecordingFeePolicy, StakingEscrow,
    TokenBank,
};

/// The escrow as the CLI runs it.
pub type CliEscrow = StakingEscrow<TokenBank, RecordingFeePolicy, IssuanceCurve, ManualClock>;

/// Serialized form of a CLI ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerFile {
    pub config: EscrowConfig,
    /// Logical time in seconds.
    pub now: Timestamp,
    pub ledger: LedgerState,
    pub bank: TokenBank,
    #[serde(default)]
    pub policy: RecordingFeePolicy,
}

impl LedgerFile {
    /// A fresh ledger starting at `now`.
    pub fn new(config: EscrowConfig, now: Timestamp) -> Self {
        Self {
            config,
            now,
            ledger: LedgerState::default(),
            bank: TokenBank::new(),
            policy: RecordingFeePolicy::new(),
        }
    }

    pub fn load(path: &Path) -> Result<Self, TesseraError> {
        let contents = fs::read_to_string(path).map_err(|e| {
            TesseraError::Config(format!(
                "Failed to read {} ({}); run `tessera init` first",
                path.display(),
                e
            ))
        })?;
        let file: LedgerFile = serde_json::from_str(&contents)?;
        file.config.validate()?;
        Ok(file)
    }

    pub fn save(&self, path: &Path) -> Result<(), TesseraError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| {
                TesseraError::Config(format!("Failed to create {}: {}", parent.display(), e))
            })?;
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)
            .map_err(|e| TesseraError::Config(format!("Failed to write {}: {}", path.display(), e)))
    }

    /// Build a running escrow from the file contents.
    pub fn open(self) -> Result<CliEscrow, TesseraError> {
        let curve = self.config.issuance;
        StakingEscrow::with_state(
            self.config,
            self.ledger,
            self.bank,
            self.policy,
            curve,
            ManualClock::new(self.now),
        )
    }

    /// Capture a running escrow back into file form.
    pub fn close(escrow: CliEscrow) -> Self {
        let config = escrow.config().clone();
        let (ledger, bank, policy, _, clock) = escrow.into_parts();
        Self {
            config,
            now: clock.now(),
            ledger,
            bank,
            policy,
        }
    }
}

/// Expand `~` at the start of a path to the user's home directory.
pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

/// Parse a 64-character hex address, or hash anything else as a label.
pub fn parse_address(s: &str) -> Result<Address, TesseraError> {
    let hex = s.strip_prefix("0x").unwrap_or(s);
    if hex.len() == 64 && hex.chars().all(|c| c.is_ascii_hexdigit()) {
        Address::from_hex(hex)
    } else if s.is_empty() {
        Err(TesseraError::InvalidParameter(
            "Address must not be empty".to_string(),
        ))
    } else {
        Ok(Address::from_label(s))
    }
}
