// crates/tessera-cli/src/commands/admin.rs
//
// `tessera admin {slash, measure-work}`: privileged operations. The caller
// must match the authority named in the ledger's configuration.

use clap::{ArgAction, Subcommand};
use serde::Serialize;

use tessera_core::{Address, Amount};

use super::CmdResult;
use crate::output::{emit, OutputFormat};
use crate::state::{parse_address, CliEscrow};

/// Admin subcommands.
#[derive(Debug, Subcommand)]
pub enum AdminCmd {
    /// Slash a staker, paying part of the penalty to an investigator.
    Slash {
        /// Slashing authority.
        #[arg(long, value_parser = parse_address)]
        caller: Address,
        #[arg(long, value_parser = parse_address)]
        staker: Address,
        #[arg(long)]
        penalty: Amount,
        #[arg(long, value_parser = parse_address)]
        investigator: Address,
        #[arg(long, default_value = "0")]
        reward: Amount,
    },
    /// Toggle work measurement for a staker.
    MeasureWork {
        /// Work-measurement authority.
        #[arg(long, value_parser = parse_address)]
        caller: Address,
        #[arg(long, value_parser = parse_address)]
        staker: Address,
        #[arg(long, action = ArgAction::Set)]
        enabled: bool,
    },
}

#[derive(Serialize)]
struct WorkView {
    staker: Address,
    measure_work: bool,
    completed_work: Amount,
}

/// Run the admin subcommand.
pub fn run(cmd: &AdminCmd, escrow: &mut CliEscrow, format: OutputFormat) -> CmdResult {
    match cmd {
        AdminCmd::Slash {
            caller,
            staker,
            penalty,
            investigator,
            reward,
        } => {
            let outcome = escrow.slash_staker(caller, staker, *penalty, investigator, *reward)?;
            emit(format, &outcome, |o| {
                format!(
                    "Slashed {} by {}\n  Investigator reward: {}\n  Burned:              {}",
                    staker, o.penalty, o.reward, o.burned
                )
            });
        }
        AdminCmd::MeasureWork {
            caller,
            staker,
            enabled,
        } => {
            let completed_work = escrow.set_work_measurement(caller, staker, *enabled)?;
            let view = WorkView {
                staker: *staker,
                measure_work: *enabled,
                completed_work,
            };
            emit(format, &view, |v| {
                format!(
                    "Work measurement for {}: {} (completed {})",
                    v.staker, v.measure_work, v.completed_work
                )
            });
        }
    }
    Ok(())
}
