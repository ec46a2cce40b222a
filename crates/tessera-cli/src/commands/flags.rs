// crates/tessera-cli/src/commands/flags.rs
//
// `tessera flags {re-stake, lock-re-stake, wind-down, snapshots}`.

use clap::{ArgAction, Subcommand};

use tessera_core::{Address, Period};

use super::CmdResult;
use crate::output::OutputFormat;
use crate::state::{parse_address, CliEscrow};

/// Flag subcommands.
#[derive(Debug, Subcommand)]
pub enum FlagsCmd {
    /// Compound minted rewards into locked value (true) or leave them free.
    ReStake {
        #[arg(long, value_parser = parse_address)]
        staker: Address,
        #[arg(long, action = ArgAction::Set)]
        enabled: bool,
    },
    /// Freeze the re-stake flag until a future period.
    LockReStake {
        #[arg(long, value_parser = parse_address)]
        staker: Address,
        #[arg(long)]
        until: Period,
    },
    /// Shrink open-ended lock durations on every commitment.
    WindDown {
        #[arg(long, value_parser = parse_address)]
        staker: Address,
        #[arg(long, action = ArgAction::Set)]
        enabled: bool,
    },
    /// Record balance snapshots for historical queries.
    Snapshots {
        #[arg(long, value_parser = parse_address)]
        staker: Address,
        #[arg(long, action = ArgAction::Set)]
        enabled: bool,
    },
}

/// Run the flags subcommand.
pub fn run(cmd: &FlagsCmd, escrow: &mut CliEscrow, _format: OutputFormat) -> CmdResult {
    match cmd {
        FlagsCmd::ReStake { staker, enabled } => {
            escrow.set_re_stake(staker, *enabled)?;
            println!("Re-stake for {}: {}", staker, enabled);
        }
        FlagsCmd::LockReStake { staker, until } => {
            escrow.lock_re_stake(staker, *until)?;
            println!("Re-stake for {} locked until period {}", staker, until);
        }
        FlagsCmd::WindDown { staker, enabled } => {
            escrow.set_wind_down(staker, *enabled)?;
            println!("Wind-down for {}: {}", staker, enabled);
        }
        FlagsCmd::Snapshots { staker, enabled } => {
            escrow.set_snapshots(staker, *enabled)?;
            println!("Snapshots for {}: {}", staker, enabled);
        }
    }
    Ok(())
}
