// crates/tessera-cli/src/commands/init.rs
//
// `tessera init`: create a ledger state file.
//
// The escrow account pays minted rewards out of its own balance, so init
// funds it with a reserve up front.

use clap::Args;
use serde::Serialize;
use std::path::Path;

use tessera_core::{Address, Amount, Period, SystemTime, TimeSource, Timestamp};
use tessera_escrow::{EscrowConfig, PeriodClock, ESCROW_ACCOUNT_LABEL};

use super::CmdResult;
use crate::output::{emit, OutputFormat};
use crate::state::{expand_tilde, LedgerFile};

/// Options for `tessera init`.
#[derive(Debug, Args)]
pub struct InitCmd {
    /// TOML configuration file. Defaults are used when omitted.
    #[arg(long)]
    pub config: Option<String>,

    /// Tokens minted into the escrow account to pay rewards.
    #[arg(long, default_value = "1000000000")]
    pub reserve: Amount,

    /// Starting logical time in seconds (defaults to the wall clock).
    #[arg(long)]
    pub start: Option<Timestamp>,

    /// Overwrite an existing state file.
    #[arg(long)]
    pub force: bool,
}

#[derive(Serialize)]
struct InitSummary {
    state_file: String,
    escrow_account: Address,
    reserve: Amount,
    now: Timestamp,
    period: Period,
    seconds_per_period: u64,
}

/// Run the init command.
pub fn run(cmd: &InitCmd, path: &Path, format: OutputFormat) -> CmdResult {
    if path.exists() && !cmd.force {
        return Err(format!(
            "{} already exists; pass --force to overwrite it",
            path.display()
        )
        .into());
    }

    let config = match &cmd.config {
        Some(config_path) => {
            let config_path = expand_tilde(config_path);
            let config = EscrowConfig::load(&config_path.to_string_lossy())?;
            tracing::info!("Loaded configuration from {}", config_path.display());
            config
        }
        None => EscrowConfig::default(),
    };
    let clock = PeriodClock::new(config.seconds_per_period)?;
    let now = cmd.start.unwrap_or_else(|| SystemTime.now());

    let escrow_account = Address::from_label(ESCROW_ACCOUNT_LABEL);
    let mut file = LedgerFile::new(config, now);
    file.bank.mint_to(&escrow_account, cmd.reserve)?;
    file.save(path)?;
    tracing::info!("Initialized ledger at {}", path.display());

    let summary = InitSummary {
        state_file: path.display().to_string(),
        escrow_account,
        reserve: cmd.reserve,
        now,
        period: clock.period_at(now),
        seconds_per_period: clock.seconds_per_period(),
    };
    emit(format, &summary, |s| {
        format!(
            "Ledger created at {}\n  Escrow account: {}\n  Reward reserve: {}\n  Period:         {} ({} s per period)",
            s.state_file, s.escrow_account, s.reserve, s.period, s.seconds_per_period
        )
    });
    Ok(())
}
