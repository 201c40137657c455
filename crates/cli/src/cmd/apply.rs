//! Change the candidate and commit it

use cli_lib::output::{colorize_commands, use_color};
use anyhow::{Context, Result};
use cli_lib::{CommitReport, CommitRequest, Session, Settings};
use owo_colors::OwoColorize;
use std::path::Path;

/// Apply a file of `set`/`delete` commands and commit
pub fn run(settings: &Settings, file: &Path, comment: Option<String>, dry_run: bool) -> Result<()> {
    let text = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;

    let mut session = Session::open(settings).context("Failed to open configuration session")?;
    let count = session
        .candidate_mut()
        .apply_commands(&text)
        .with_context(|| format!("Invalid command in {}", file.display()))?;
    tracing::debug!(count, "applied commands to candidate");

    let request = CommitRequest::new("cli").comment(comment).dry_run(dry_run);
    let report = session.commit(&request).context("Commit failed")?;
    print_report(&report, dry_run);
    Ok(())
}

/// Replace the candidate with a configuration file and commit
pub fn run_load(settings: &Settings, file: &Path, comment: Option<String>) -> Result<()> {
    let mut session = Session::open(settings).context("Failed to open configuration session")?;
    session
        .load(file)
        .with_context(|| format!("Failed to load {}", file.display()))?;
    let report = session
        .commit(&CommitRequest::new("load").comment(comment))
        .context("Commit failed")?;
    print_report(&report, false);
    Ok(())
}

pub(crate) fn print_report(report: &CommitReport, dry_run: bool) {
    if report.is_empty() {
        println!("No configuration changes to commit");
        return;
    }
    let commands: String = report.commands.iter().map(|c| format!("{}\n", c)).collect();
    print!("{}", colorize_commands(&commands, use_color()));
    if dry_run {
        println!("{}", "Dry run: nothing committed".yellow());
    } else if let Some(entry) = &report.revision {
        println!("{} revision {} ({} changes)", "Committed".green(), entry.seq, report.commands.len());
    }
}
