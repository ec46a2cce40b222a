// crates/tessera-cli/src/commands/mod.rs
//
// Command module declarations for the Tessera CLI.

pub mod admin;
pub mod clock;
pub mod flags;
pub mod init;
pub mod query;
pub mod stake;
pub mod token;
pub mod worker;

/// Result type shared by every command.
pub type CmdResult = Result<(), Box<dyn std::error::Error>>;
