//! Compare archived revisions

use cli_lib::output::{colorize_commands, colorize_diff, use_color};
use anyhow::{Context, Result};
use cli_lib::{Session, Settings};

/// Changes from `rev_a` to `rev_b` (default: the next newer revision)
pub fn run(settings: &Settings, rev_a: usize, rev_b: Option<usize>, commands: bool) -> Result<()> {
    let session = Session::open(settings).context("Failed to open configuration session")?;
    let text = session
        .archive()
        .show_commit_diff(rev_a, rev_b, commands)
        .context("Failed to compare revisions")?;

    if text.is_empty() {
        println!("No changes between revisions");
        return Ok(());
    }
    let color = use_color();
    let output = if commands {
        colorize_commands(&text, color)
    } else {
        colorize_diff(&text, color)
    };
    print!("{}", output);
    Ok(())
}
