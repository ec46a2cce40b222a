// crates/tessera-cli/src/commands/token.rs
//
// `tessera token {mint, balance}`: the in-memory token bank.

use clap::Subcommand;
use serde::Serialize;
use tabled::Tabled;

use tessera_core::{Address, Amount};

use super::CmdResult;
use crate::output::{emit, table_or, OutputFormat};
use crate::state::{parse_address, CliEscrow};

/// Token subcommands.
#[derive(Debug, Subcommand)]
pub enum TokenCmd {
    /// Create new tokens for a holder.
    Mint {
        /// Recipient (hex address or label).
        #[arg(long, value_parser = parse_address)]
        to: Address,
        /// Amount in base units.
        #[arg(long)]
        amount: Amount,
    },
    /// Show one holder's balance, or every holder when none is given.
    Balance {
        /// Holder (hex address or label).
        #[arg(value_parser = parse_address)]
        holder: Option<Address>,
    },
}

#[derive(Serialize, Tabled)]
struct BalanceRow {
    #[tabled(rename = "Holder")]
    holder: Address,
    #[tabled(rename = "Balance")]
    balance: Amount,
}

/// Run the token subcommand.
pub fn run(cmd: &TokenCmd, escrow: &mut CliEscrow, format: OutputFormat) -> CmdResult {
    match cmd {
        TokenCmd::Mint { to, amount } => {
            escrow.custody_mut().mint_to(to, *amount)?;
            tracing::info!("Minted {} tokens to {}", amount, to.short());
            let row = BalanceRow {
                holder: *to,
                balance: escrow.custody().balance_of(to),
            };
            emit(format, &row, |r| format!("Minted {} to {}\n  Balance: {}", amount, r.holder, r.balance));
        }
        TokenCmd::Balance { holder: Some(holder) } => {
            let row = BalanceRow {
                holder: *holder,
                balance: escrow.custody().balance_of(holder),
            };
            emit(format, &row, |r| format!("{}: {}", r.holder, r.balance));
        }
        TokenCmd::Balance { holder: None } => {
            let rows: Vec<BalanceRow> = escrow
                .custody()
                .holders()
                .map(|(holder, balance)| BalanceRow {
                    holder: *holder,
                    balance: *balance,
                })
                .collect();
            let supply = escrow.custody().total_supply();
            emit(format, &rows, |rows| {
                format!("{}\nTotal supply: {}", table_or(rows, "No holders."), supply)
            });
        }
    }
    Ok(())
}
