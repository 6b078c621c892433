//! Terminal formatting helpers

use colored::*;
use vigil_core::{BackendStatus, MigrationState};

pub fn status_label(status: BackendStatus) -> ColoredString {
    match status {
        BackendStatus::Healthy => "healthy".green().bold(),
        BackendStatus::Degraded => "degraded".yellow().bold(),
        BackendStatus::Failed => "failed".red().bold(),
    }
}

pub fn migration_icon(state: MigrationState) -> ColoredString {
    match state {
        MigrationState::Applied => "✓".green().bold(),
        MigrationState::Pending => "·".dimmed(),
        MigrationState::Modified => "✗".red().bold(),
        MigrationState::Missing => "⚠".yellow().bold(),
    }
}

pub fn header(title: &str) {
    println!();
    println!("{}", title.bold().underline());
    println!("{}", "=".repeat(50).dimmed());
}
