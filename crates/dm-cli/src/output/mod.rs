//! Output formatting utilities for the CLI
//!
//! This module provides functions for formatting installation state as
//! human-readable tables, token details, and colored status messages.

mod progress;

pub use progress::ConsoleObserver;

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use tabled::{
    settings::{Style, Width},
    Table, Tabled,
};

use dm_core::token::TokenRecord;

/// One managed application as shown by `status`
#[derive(Debug, Clone)]
pub struct InstallationInfo {
    pub app: String,
    pub version: Option<String>,
    pub install_dir: PathBuf,
    pub executable_present: bool,
    pub backup_present: bool,
}

/// Format installations as an ASCII table
///
/// Missing versions show as "not installed".
pub fn format_installations(installations: &[InstallationInfo]) -> String {
    if installations.is_empty() {
        return "No applications configured".to_string();
    }

    #[derive(Tabled)]
    struct InstallationRow {
        #[tabled(rename = "APP")]
        app: String,
        #[tabled(rename = "VERSION")]
        version: String,
        #[tabled(rename = "EXECUTABLE")]
        executable: String,
        #[tabled(rename = "BACKUP")]
        backup: String,
        #[tabled(rename = "INSTALL DIR")]
        install_dir: String,
    }

    let rows: Vec<InstallationRow> = installations
        .iter()
        .map(|i| InstallationRow {
            app: i.app.clone(),
            version: i
                .version
                .clone()
                .unwrap_or_else(|| "not installed".to_string()),
            executable: yes_no(i.executable_present),
            backup: yes_no(i.backup_present),
            install_dir: i.install_dir.display().to_string(),
        })
        .collect();

    Table::new(rows)
        .with(Style::rounded())
        .with(Width::wrap(120))
        .to_string()
}

/// Format the persisted token slot
///
/// The hash is shortened; it identifies the slot but is not needed in full.
pub fn format_token_record(record: &TokenRecord, now: DateTime<Utc>) -> String {
    let state = if record.used {
        "used"
    } else if now >= record.expires_at {
        "expired"
    } else {
        "active"
    };

    let mut output = String::new();
    output.push_str(&format!("Token: {}\n", truncate(&record.token_hash, 12)));
    output.push_str(&format!("State: {}\n", state));
    output.push_str(&format!("Issued: {}\n", record.created_at.to_rfc3339()));
    output.push_str(&format!("Expires: {}\n", record.expires_at.to_rfc3339()));
    if let Some(used_at) = record.used_at {
        output.push_str(&format!("Used: {}\n", used_at.to_rfc3339()));
    }
    output
}

fn yes_no(value: bool) -> String {
    if value { "yes" } else { "no" }.to_string()
}

/// Truncate a string with ellipsis if too long
fn truncate(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        s.to_string()
    } else {
        format!("{}...", &s[..max_len.saturating_sub(3)])
    }
}

/// Print a success message in green with a checkmark prefix
///
/// Outputs to stdout with green coloring for positive feedback to the user.
pub fn print_success(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stdout = std::io::stdout();
    let _ = crossterm::execute!(
        stdout,
        SetForegroundColor(Color::Green),
        Print("✓ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print an error message in red with an X prefix
///
/// Outputs to stderr with red coloring for error feedback to the user.
pub fn print_error(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stderr = std::io::stderr();
    let _ = crossterm::execute!(
        stderr,
        SetForegroundColor(Color::Red),
        Print("✗ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print a warning message in yellow with a warning symbol prefix
///
/// Outputs to stderr with yellow coloring for cautionary feedback to the user.
pub fn print_warning(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stderr = std::io::stderr();
    let _ = crossterm::execute!(
        stderr,
        SetForegroundColor(Color::Yellow),
        Print("⚠ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print an informational message in cyan with an info symbol prefix
///
/// Outputs to stdout with cyan coloring for informational feedback to the user.
pub fn print_info(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stdout = std::io::stdout();
    let _ = crossterm::execute!(
        stdout,
        SetForegroundColor(Color::Cyan),
        Print("ℹ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}
