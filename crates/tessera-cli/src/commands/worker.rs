// crates/tessera-cli/src/commands/worker.rs
//
// `tessera worker {bond, unbond, commit}`: worker binding and commitments.

use clap::Subcommand;

use tessera_core::Address;

use super::CmdResult;
use crate::output::{emit, OutputFormat};
use crate::state::{parse_address, CliEscrow};

/// Worker subcommands.
#[derive(Debug, Subcommand)]
pub enum WorkerCmd {
    /// Bind a worker to a staker.
    Bond {
        #[arg(long, value_parser = parse_address)]
        staker: Address,
        #[arg(long, value_parser = parse_address)]
        worker: Address,
    },
    /// Remove a staker's worker.
    Unbond {
        #[arg(long, value_parser = parse_address)]
        staker: Address,
    },
    /// Commit the worker's staker to the next period (settling owed rewards).
    Commit {
        #[arg(long, value_parser = parse_address)]
        worker: Address,
    },
}

/// Run the worker subcommand.
pub fn run(cmd: &WorkerCmd, escrow: &mut CliEscrow, format: OutputFormat) -> CmdResult {
    match cmd {
        WorkerCmd::Bond { staker, worker } => {
            escrow.bond_worker(staker, Some(*worker))?;
            println!("Bonded worker {} to {}", worker, staker);
        }
        WorkerCmd::Unbond { staker } => {
            escrow.bond_worker(staker, None)?;
            println!("Unbonded worker from {}", staker);
        }
        WorkerCmd::Commit { worker } => {
            let outcome = escrow.commit_to_next_period(worker)?;
            emit(format, &outcome, |o| {
                let mut lines = Vec::new();
                match o.committed {
                    Some((period, locked)) => {
                        lines.push(format!("Committed {} for period {}", locked, period))
                    }
                    None => lines.push("Already committed to the next period.".to_string()),
                }
                if !o.minted.is_noop() {
                    lines.push(format!(
                        "  Minted {} for periods {:?}",
                        o.minted.reward, o.minted.settled
                    ));
                }
                if let Some(gap) = o.downtime {
                    lines.push(format!(
                        "  Missed periods {}..={}",
                        gap.start_period, gap.end_period
                    ));
                }
                lines.join("\n")
            });
        }
    }
    Ok(())
}
