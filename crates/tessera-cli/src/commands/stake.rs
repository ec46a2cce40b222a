// crates/tessera-cli/src/commands/stake.rs
//
// `tessera stake {deposit, lock, divide, prolong, merge, remove-unused,
// withdraw, mint, batch, info}`: sub-stake management.

use clap::Subcommand;
use serde::{Deserialize, Serialize};
use std::fs;
use tabled::Tabled;

use tessera_core::{Address, Amount, Period};
use tessera_escrow::{StakerFlags, SubStake};

use super::CmdResult;
use crate::output::{emit, table_or, OutputFormat};
use crate::state::{expand_tilde, parse_address, CliEscrow};

/// Staking subcommands.
#[derive(Debug, Subcommand)]
pub enum StakeCmd {
    /// Deposit tokens and lock them as a new sub-stake, or into sub-stake --index.
    Deposit {
        /// Staker credited with the deposit.
        #[arg(long, value_parser = parse_address)]
        staker: Address,
        /// Account paying for the deposit (defaults to the staker).
        #[arg(long, value_parser = parse_address)]
        payer: Option<Address>,
        #[arg(long)]
        value: Amount,
        /// Lock duration in periods for a new sub-stake.
        #[arg(long, required_unless_present = "index", conflicts_with = "index")]
        periods: Option<Period>,
        /// Existing sub-stake to increase.
        #[arg(long)]
        index: Option<usize>,
    },
    /// Lock already deposited tokens, as a new sub-stake or into sub-stake --index.
    Lock {
        #[arg(long, value_parser = parse_address)]
        staker: Address,
        #[arg(long)]
        value: Amount,
        #[arg(long, required_unless_present = "index", conflicts_with = "index")]
        periods: Option<Period>,
        #[arg(long)]
        index: Option<usize>,
    },
    /// Split part of a sub-stake off into a longer one.
    Divide {
        #[arg(long, value_parser = parse_address)]
        staker: Address,
        #[arg(long)]
        index: usize,
        /// Value moved to the new sub-stake.
        #[arg(long)]
        value: Amount,
        /// Periods the new sub-stake outlasts the original.
        #[arg(long)]
        extra_periods: Period,
    },
    /// Extend a sub-stake's lock.
    Prolong {
        #[arg(long, value_parser = parse_address)]
        staker: Address,
        #[arg(long)]
        index: usize,
        #[arg(long)]
        extra_periods: Period,
    },
    /// Merge two sub-stakes that end in the same period.
    Merge {
        #[arg(long, value_parser = parse_address)]
        staker: Address,
        #[arg(long)]
        first: usize,
        #[arg(long)]
        second: usize,
    },
    /// Drop a settled sub-stake slot.
    RemoveUnused {
        #[arg(long, value_parser = parse_address)]
        staker: Address,
        #[arg(long)]
        index: usize,
    },
    /// Withdraw unlocked tokens.
    Withdraw {
        #[arg(long, value_parser = parse_address)]
        staker: Address,
        #[arg(long)]
        value: Amount,
    },
    /// Settle rewards owed for past committed periods.
    Mint {
        #[arg(long, value_parser = parse_address)]
        staker: Address,
    },
    /// Seed new stakers from a JSON file, paid for by one account.
    Batch {
        #[arg(long, value_parser = parse_address)]
        payer: Address,
        /// JSON list of {"staker": ..., "sub_stakes": [{"value": ..., "periods": ...}]}.
        #[arg(long)]
        file: String,
        /// Freeze the stakers' re-stake flag until this period.
        #[arg(long, default_value = "0")]
        lock_re_stake_until: Period,
    },
    /// Show a staker's balance, flags and sub-stakes.
    Info {
        #[arg(value_parser = parse_address)]
        staker: Address,
    },
}

#[derive(Debug, Deserialize)]
struct BatchEntry {
    staker: String,
    sub_stakes: Vec<BatchSubStake>,
}

#[derive(Debug, Deserialize)]
struct BatchSubStake {
    value: Amount,
    periods: Period,
}

#[derive(Serialize)]
struct StakeInfo {
    staker: Address,
    value: Amount,
    locked_now: Amount,
    locked_next: Amount,
    worker: Option<Address>,
    last_committed_period: Option<Period>,
    flags: StakerFlags,
    completed_work: Amount,
    sub_stakes: Vec<SubStake>,
}

#[derive(Tabled)]
struct SubStakeRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "First")]
    first_period: Period,
    #[tabled(rename = "Last")]
    last_period: String,
    #[tabled(rename = "Value")]
    value: Amount,
}

impl SubStakeRow {
    fn new(index: usize, sub_stake: &SubStake) -> Self {
        let last_period = match sub_stake.last_period {
            Some(last) if last < sub_stake.first_period => "settled".to_string(),
            Some(last) => last.to_string(),
            None => format!("open (+{})", sub_stake.periods),
        };
        Self {
            index,
            first_period: sub_stake.first_period,
            last_period,
            value: sub_stake.locked_value,
        }
    }
}

/// Run the stake subcommand.
pub fn run(cmd: &StakeCmd, escrow: &mut CliEscrow, format: OutputFormat) -> CmdResult {
    match cmd {
        StakeCmd::Deposit {
            staker,
            payer,
            value,
            periods,
            index,
        } => {
            let payer = payer.unwrap_or(*staker);
            match (index, periods) {
                (Some(index), _) => {
                    escrow.deposit_and_increase(staker, &payer, *index, *value)?;
                    println!("Deposited {} into sub-stake {}", value, index);
                }
                (None, Some(periods)) => {
                    let index = escrow.deposit(staker, &payer, *value, *periods)?;
                    println!("Deposited {} locked for {} periods as sub-stake {}", value, periods, index);
                }
                (None, None) => return Err("Pass --periods or --index".into()),
            }
        }
        StakeCmd::Lock {
            staker,
            value,
            periods,
            index,
        } => match (index, periods) {
            (Some(index), _) => {
                escrow.lock_and_increase(staker, *index, *value)?;
                println!("Locked {} into sub-stake {}", value, index);
            }
            (None, Some(periods)) => {
                let index = escrow.lock_and_create(staker, *value, *periods)?;
                println!("Locked {} for {} periods as sub-stake {}", value, periods, index);
            }
            (None, None) => return Err("Pass --periods or --index".into()),
        },
        StakeCmd::Divide {
            staker,
            index,
            value,
            extra_periods,
        } => {
            let new_index = escrow.divide_stake(staker, *index, *value, *extra_periods)?;
            println!("Moved {} from sub-stake {} to new sub-stake {}", value, index, new_index);
        }
        StakeCmd::Prolong {
            staker,
            index,
            extra_periods,
        } => {
            escrow.prolong_stake(staker, *index, *extra_periods)?;
            println!("Prolonged sub-stake {} by {} periods", index, extra_periods);
        }
        StakeCmd::Merge {
            staker,
            first,
            second,
        } => {
            escrow.merge_stake(staker, *first, *second)?;
            println!("Merged sub-stakes {} and {}", first, second);
        }
        StakeCmd::RemoveUnused { staker, index } => {
            let removed = escrow.remove_unused_sub_stake(staker, *index)?;
            emit(format, &removed, |r| {
                format!("Removed sub-stake {} (value {})", index, r.locked_value)
            });
        }
        StakeCmd::Withdraw { staker, value } => {
            escrow.withdraw(staker, *value)?;
            println!("Withdrew {} to {}", value, staker);
        }
        StakeCmd::Mint { staker } => {
            let outcome = escrow.mint(staker)?;
            emit(format, &outcome, |o| {
                if o.is_noop() {
                    "Nothing to mint.".to_string()
                } else {
                    format!("Minted {} for periods {:?}", o.reward, o.settled)
                }
            });
        }
        StakeCmd::Batch {
            payer,
            file,
            lock_re_stake_until,
        } => {
            let contents = fs::read_to_string(expand_tilde(file))?;
            let entries: Vec<BatchEntry> = serde_json::from_str(&contents)?;
            let mut stakers = Vec::with_capacity(entries.len());
            let mut counts = Vec::with_capacity(entries.len());
            let mut values = Vec::new();
            let mut periods = Vec::new();
            for entry in &entries {
                stakers.push(parse_address(&entry.staker)?);
                counts.push(entry.sub_stakes.len());
                for sub_stake in &entry.sub_stakes {
                    values.push(sub_stake.value);
                    periods.push(sub_stake.periods);
                }
            }
            let total = escrow.batch_deposit(
                payer,
                &stakers,
                &counts,
                &values,
                &periods,
                *lock_re_stake_until,
            )?;
            println!("Deposited {} for {} stakers", total, stakers.len());
        }
        StakeCmd::Info { staker } => {
            let info = StakeInfo {
                staker: *staker,
                value: escrow.all_tokens(staker),
                locked_now: escrow.locked_tokens(staker, 0),
                locked_next: escrow.locked_tokens(staker, 1),
                worker: escrow.worker_of(staker),
                last_committed_period: escrow.last_committed_period(staker),
                flags: escrow.flags(staker),
                completed_work: escrow.completed_work(staker),
                sub_stakes: escrow.sub_stakes(staker).to_vec(),
            };
            emit(format, &info, render_info);
        }
    }
    Ok(())
}

fn render_info(info: &StakeInfo) -> String {
    let rows: Vec<SubStakeRow> = info
        .sub_stakes
        .iter()
        .enumerate()
        .map(|(index, s)| SubStakeRow::new(index, s))
        .collect();
    let optional = |value: Option<String>| value.unwrap_or_else(|| "-".to_string());
    format!(
        "Staker {}\n  Balance:        {}\n  Locked now:     {}\n  Locked next:    {}\n  Worker:         {}\n  Last committed: {}\n  Re-stake:       {}\n  Wind-down:      {}\n  Snapshots:      {}\n  Completed work: {}\n\n{}",
        info.staker,
        info.value,
        info.locked_now,
        info.locked_next,
        optional(info.worker.map(|w| w.to_string())),
        optional(info.last_committed_period.map(|p| p.to_string())),
        info.flags.re_stake(),
        info.flags.wind_down,
        !info.flags.snapshots_disabled,
        info.completed_work,
        table_or(&rows, "No sub-stakes."),
    )
}
