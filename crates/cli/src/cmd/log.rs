//! Archive history

use anyhow::{Context, Result};
use cli_lib::{Session, Settings};

/// List archived revisions, newest first
pub fn run(settings: &Settings) -> Result<()> {
    let session = Session::open(settings).context("Failed to open configuration session")?;
    print!("{}", session.archive().format_log());
    Ok(())
}

/// Print the stored text of one revision
pub fn run_show_revision(settings: &Settings, revision: usize) -> Result<()> {
    let session = Session::open(settings).context("Failed to open configuration session")?;
    let text = session
        .archive()
        .show_commit_file(revision)
        .with_context(|| format!("Failed to read revision {}", revision))?;
    print!("{}", text);
    Ok(())
}
