// crates/tessera-cli/src/commands/clock.rs
//
// `tessera clock {show, advance}`: the ledger's logical time.

use clap::Subcommand;
use serde::Serialize;

use tessera_core::{Period, TimeSource, Timestamp};
use tessera_escrow::PeriodClock;

use super::CmdResult;
use crate::output::{emit, OutputFormat};
use crate::state::CliEscrow;

/// Clock subcommands.
#[derive(Debug, Subcommand)]
pub enum ClockCmd {
    /// Show the current time and period.
    Show,
    /// Move time forward.
    Advance {
        /// Seconds to advance.
        #[arg(long, conflicts_with = "periods", required_unless_present = "periods")]
        seconds: Option<u64>,
        /// Whole periods to advance.
        #[arg(long)]
        periods: Option<Period>,
    },
}

#[derive(Serialize)]
struct ClockView {
    now: Timestamp,
    period: Period,
    period_start: Timestamp,
    next_period_start: Timestamp,
}

/// Run the clock subcommand.
pub fn run(cmd: &ClockCmd, escrow: &mut CliEscrow, format: OutputFormat) -> CmdResult {
    let clock = PeriodClock::new(escrow.config().seconds_per_period)?;
    if let ClockCmd::Advance { seconds, periods } = cmd {
        let seconds = match (seconds, periods) {
            (Some(seconds), _) => *seconds,
            (None, Some(periods)) => u64::from(*periods).saturating_mul(clock.seconds_per_period()),
            (None, None) => return Err("Pass --seconds or --periods".into()),
        };
        let before = escrow.current_period();
        escrow.time().advance(seconds);
        tracing::info!(
            "Clock advanced {} s: period {} -> {}",
            seconds,
            before,
            escrow.current_period()
        );
    }

    let now = escrow.time().now();
    let period = clock.period_at(now);
    let view = ClockView {
        now,
        period,
        period_start: clock.period_start(period),
        next_period_start: clock.period_start(period.saturating_add(1)),
    };
    emit(format, &view, |v| {
        format!(
            "Time:   {}\nPeriod: {} (started {}, next at {})",
            v.now, v.period, v.period_start, v.next_period_start
        )
    });
    Ok(())
}
