//! Roll back to an archived revision

use crate::cmd::apply::print_report;
use anyhow::{Context, Result};
use cli_lib::{CommitRequest, Session, Settings};

pub fn run(settings: &Settings, revision: usize, comment: Option<String>) -> Result<()> {
    let mut session = Session::open(settings).context("Failed to open configuration session")?;
    let comment = comment.or_else(|| Some(format!("rollback to revision {}", revision)));
    let report = session
        .rollback(revision, &CommitRequest::new("rollback").comment(comment))
        .with_context(|| format!("Rollback to revision {} failed", revision))?;
    print_report(&report, false);
    Ok(())
}
