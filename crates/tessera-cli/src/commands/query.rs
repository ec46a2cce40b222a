// crates/tessera-cli/src/commands/query.rs
//
// `tessera query {locked, active, history, downtime, period, events}`:
// read-only views of the ledger.

use clap::Subcommand;
use serde::Serialize;
use tabled::Tabled;

use tessera_core::{Address, Amount, Period, TimeSource, Timestamp};
use tessera_escrow::{Downtime, PolicyEvent, Snapshot};

use super::CmdResult;
use crate::output::{emit, table_or, OutputFormat};
use crate::state::{parse_address, CliEscrow};

/// Query subcommands.
#[derive(Debug, Subcommand)]
pub enum QueryCmd {
    /// Tokens a staker has locked some periods from now (or ago, with --past).
    Locked {
        #[arg(value_parser = parse_address)]
        staker: Address,
        #[arg(long, default_value = "0")]
        offset: Period,
        #[arg(long)]
        past: bool,
    },
    /// Stakers committed to the next period.
    Active {
        /// Report what each keeps locked this many periods ahead.
        #[arg(long, default_value = "1")]
        periods: Period,
        #[arg(long, default_value = "0")]
        start: usize,
        /// Page size; 0 means all.
        #[arg(long, default_value = "0")]
        max: usize,
    },
    /// Balance history of a staker, or of the whole ledger.
    History {
        #[arg(value_parser = parse_address)]
        staker: Option<Address>,
        /// Report only the balance at this time.
        #[arg(long)]
        at: Option<Timestamp>,
    },
    /// Periods a staker failed to commit.
    Downtime {
        #[arg(value_parser = parse_address)]
        staker: Address,
    },
    /// Current period and committed totals.
    Period {
        /// Also report this period's committed total.
        #[arg(long)]
        period: Option<Period>,
    },
    /// Fee-policy notifications, optionally for one staker.
    Events {
        #[arg(value_parser = parse_address)]
        staker: Option<Address>,
    },
}

#[derive(Serialize, Tabled)]
struct ActiveRow {
    #[tabled(rename = "Staker")]
    staker: Address,
    #[tabled(rename = "Locked")]
    locked: Amount,
}

#[derive(Serialize)]
struct ActiveView {
    total: Amount,
    stakers: Vec<ActiveRow>,
}

#[derive(Serialize, Tabled)]
struct SnapshotRow {
    #[tabled(rename = "Time")]
    index: Timestamp,
    #[tabled(rename = "Balance")]
    value: Amount,
}

impl From<&Snapshot> for SnapshotRow {
    fn from(s: &Snapshot) -> Self {
        Self {
            index: s.index,
            value: s.value,
        }
    }
}

#[derive(Serialize, Tabled)]
struct DowntimeRow {
    #[tabled(rename = "From")]
    start_period: Period,
    #[tabled(rename = "To")]
    end_period: Period,
}

impl From<&Downtime> for DowntimeRow {
    fn from(d: &Downtime) -> Self {
        Self {
            start_period: d.start_period,
            end_period: d.end_period,
        }
    }
}

#[derive(Serialize, Tabled)]
struct PeriodRow {
    #[tabled(rename = "Period")]
    period: Period,
    #[tabled(rename = "Committed")]
    committed: Amount,
}

#[derive(Serialize, Tabled)]
struct EventRow {
    #[tabled(rename = "Event")]
    kind: &'static str,
    #[tabled(rename = "Staker")]
    staker: Address,
    #[tabled(rename = "Period")]
    period: Period,
}

impl From<&PolicyEvent> for EventRow {
    fn from(event: &PolicyEvent) -> Self {
        let (kind, staker, period) = match *event {
            PolicyEvent::Register { staker, period } => ("register", staker, period),
            PolicyEvent::UpdateFee { staker, period } => ("update_fee", staker, period),
            PolicyEvent::DefaultFeeDelta { staker, period } => ("default_fee_delta", staker, period),
        };
        Self {
            kind,
            staker,
            period,
        }
    }
}

/// Run the query subcommand.
pub fn run(cmd: &QueryCmd, escrow: &CliEscrow, format: OutputFormat) -> CmdResult {
    match cmd {
        QueryCmd::Locked {
            staker,
            offset,
            past,
        } => {
            let locked = if *past {
                escrow.locked_tokens_in_past(staker, *offset)
            } else {
                escrow.locked_tokens(staker, *offset)
            };
            emit(format, &locked, |l| l.to_string());
        }
        QueryCmd::Active {
            periods,
            start,
            max,
        } => {
            let (total, stakers) = escrow.active_stakers(*periods, *start, *max)?;
            let view = ActiveView {
                total,
                stakers: stakers
                    .into_iter()
                    .map(|(staker, locked)| ActiveRow { staker, locked })
                    .collect(),
            };
            emit(format, &view, |v| {
                format!(
                    "{}\nTotal locked: {}",
                    table_or(&v.stakers, "No active stakers."),
                    v.total
                )
            });
        }
        QueryCmd::History {
            staker,
            at: Some(at),
        } => {
            let balance = match staker {
                Some(staker) => escrow.balance_at(staker, *at),
                None => escrow.global_balance_at(*at),
            };
            emit(format, &balance, |b| b.to_string());
        }
        QueryCmd::History { staker, at: None } => {
            let history = match staker {
                Some(staker) => escrow
                    .staker(staker)
                    .map(|r| r.history.as_slice())
                    .unwrap_or(&[]),
                None => escrow.state().balance_history.as_slice(),
            };
            let rows: Vec<SnapshotRow> = history.iter().map(SnapshotRow::from).collect();
            emit(format, &rows, |rows| table_or(rows, "No snapshots."));
        }
        QueryCmd::Downtime { staker } => {
            let rows: Vec<DowntimeRow> = escrow
                .past_downtime(staker)
                .iter()
                .map(DowntimeRow::from)
                .collect();
            emit(format, &rows, |rows| table_or(rows, "No downtime."));
        }
        QueryCmd::Period { period } => {
            let current = escrow.current_period();
            let mut periods = vec![current, current.saturating_add(1)];
            if let Some(period) = period {
                if !periods.contains(period) {
                    periods.push(*period);
                }
            }
            let rows: Vec<PeriodRow> = periods
                .into_iter()
                .map(|period| PeriodRow {
                    period,
                    committed: escrow.locked_per_period(period),
                })
                .collect();
            let now = escrow.time().now();
            emit(format, &rows, |rows| {
                format!(
                    "Current period {} (time {}), {} stakers\n{}",
                    current,
                    now,
                    escrow.stakers_length(),
                    table_or(rows, "")
                )
            });
        }
        QueryCmd::Events { staker } => {
            let rows: Vec<EventRow> = match staker {
                Some(staker) => escrow.policy().events_for(staker).map(EventRow::from).collect(),
                None => escrow.policy().events().iter().map(EventRow::from).collect(),
            };
            emit(format, &rows, |rows| table_or(rows, "No events."));
        }
    }
    Ok(())
}
