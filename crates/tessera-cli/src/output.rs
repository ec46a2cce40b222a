// crates/tessera-cli/src/output.rs
//
// Output formatting utilities for the Tessera CLI.
// Supports table and JSON output modes.

use serde::Serialize;
use tabled::{Table, Tabled};

/// Output format for CLI commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Pretty-printed table output (default).
    Table,
    /// JSON output for machine consumption.
    Json,
}

impl OutputFormat {
    pub fn from_flag(json: bool) -> Self {
        if json {
            OutputFormat::Json
        } else {
            OutputFormat::Table
        }
    }
}

/// Format a slice of Tabled items as a table string.
pub fn format_table<T: Tabled>(data: &[T]) -> String {
    Table::new(data).to_string()
}

/// Format a serializable value as a pretty-printed JSON string.
pub fn format_json<T: Serialize>(data: &T) -> String {
    serde_json::to_string_pretty(data).unwrap_or_else(|e| format!("JSON serialization error: {}", e))
}

/// Print `data` as JSON, or as the human rendering produced by `human`.
pub fn emit<T: Serialize>(format: OutputFormat, data: &T, human: impl FnOnce(&T) -> String) {
    match format {
        OutputFormat::Json => println!("{}", format_json(data)),
        OutputFormat::Table => println!("{}", human(data)),
    }
}

/// Rows of a table, or a placeholder line when there are none.
pub fn table_or<T: Tabled>(rows: &[T], empty: &str) -> String {
    if rows.is_empty() {
        empty.to_string()
    } else {
        format_table(rows)
    }
}
