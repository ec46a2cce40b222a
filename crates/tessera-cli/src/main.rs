// crates/tessera-cli/src/main.rs
//
// CLI entrypoint for the Tessera staking ledger.
//
// Every invocation loads the ledger from the state file, runs one command
// against it and writes it back. A failing command leaves the file untouched.

mod commands;
mod output;
mod state;

use clap::{Parser, Subcommand};
use commands::admin::AdminCmd;
use commands::clock::ClockCmd;
use commands::flags::FlagsCmd;
use commands::init::InitCmd;
use commands::query::QueryCmd;
use commands::stake::StakeCmd;
use commands::token::TokenCmd;
use commands::worker::WorkerCmd;
use output::OutputFormat;
use state::{expand_tilde, LedgerFile};

/// Tessera CLI: operate a periodic staking ledger from the command line.
#[derive(Parser, Debug)]
#[command(
    name = "tessera",
    version = "0.1.0",
    about = "Tessera CLI: sub-stakes, commitments, rewards and slashing on a local ledger"
)]
struct Cli {
    /// Path to the ledger state file.
    #[arg(long, global = true, default_value = "~/.tessera/state.json")]
    state: String,

    /// Print JSON instead of tables.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level subcommands.
#[derive(Debug, Subcommand)]
enum Commands {
    /// Create a new ledger state file.
    Init(InitCmd),

    /// Logical clock: show, advance.
    #[command(subcommand)]
    Clock(ClockCmd),

    /// Token bank: mint, balance.
    #[command(subcommand)]
    Token(TokenCmd),

    /// Sub-stake management: deposit, lock, divide, prolong, merge, withdraw, mint, info.
    #[command(subcommand)]
    Stake(StakeCmd),

    /// Worker binding and commitments.
    #[command(subcommand)]
    Worker(WorkerCmd),

    /// Per-staker switches: re-stake, wind-down, snapshots.
    #[command(subcommand)]
    Flags(FlagsCmd),

    /// Privileged operations: slash, measure-work.
    #[command(subcommand)]
    Admin(AdminCmd),

    /// Read-only ledger queries.
    #[command(subcommand)]
    Query(QueryCmd),
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let path = expand_tilde(&cli.state);
    let format = OutputFormat::from_flag(cli.json);

    let existing = if path.exists() {
        Some(LedgerFile::load(&path)?)
    } else {
        None
    };
    let level = existing
        .as_ref()
        .map(|file| file.config.log_level.clone())
        .unwrap_or_else(|| "info".to_string());

    // Logs go to stderr so that `--json` output stays machine-readable.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .init();

    if let Commands::Init(cmd) = &cli.command {
        return commands::init::run(cmd, &path, format);
    }

    let file = match existing {
        Some(file) => file,
        None => LedgerFile::load(&path)?,
    };
    let mut escrow = file.open()?;
    tracing::debug!(
        "Loaded {} (period {})",
        path.display(),
        escrow.current_period()
    );

    match &cli.command {
        Commands::Init(_) => {}
        Commands::Clock(cmd) => commands::clock::run(cmd, &mut escrow, format)?,
        Commands::Token(cmd) => commands::token::run(cmd, &mut escrow, format)?,
        Commands::Stake(cmd) => commands::stake::run(cmd, &mut escrow, format)?,
        Commands::Worker(cmd) => commands::worker::run(cmd, &mut escrow, format)?,
        Commands::Flags(cmd) => commands::flags::run(cmd, &mut escrow, format)?,
        Commands::Admin(cmd) => commands::admin::run(cmd, &mut escrow, format)?,
        Commands::Query(cmd) => commands::query::run(cmd, &escrow, format)?,
    }

    LedgerFile::close(escrow).save(&path)?;
    Ok(())
}
