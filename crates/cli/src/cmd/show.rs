//! Show the running configuration

use anyhow::{Context, Result};
use cfg_core::render_commands;
use cli_lib::{Session, Settings};

/// Output form of `rcfg show`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Text,
    Json,
    Commands,
}

pub fn run(settings: &Settings, path: &[String], format: Format) -> Result<()> {
    let session = Session::open(settings).context("Failed to open configuration session")?;
    let running = session.running();

    if !path.is_empty() && !running.exists(path) {
        anyhow::bail!("Configuration path does not exist: {}", path.join(" "));
    }

    let output = match format {
        Format::Json => {
            let value = running
                .to_dict(path, false)
                .context("Failed to export configuration")?;
            let mut text = serde_json::to_string_pretty(&value)?;
            text.push('\n');
            text
        }
        Format::Commands if path.is_empty() => running.to_commands(),
        Format::Commands => {
            let below: Vec<_> = running
                .to_command_list()
                .into_iter()
                .filter(|c| c.path.starts_with(path))
                .collect();
            render_commands(&below)
        }
        Format::Text if path.is_empty() => running.to_string(),
        Format::Text if running.is_leaf(path) => {
            let mut out = String::new();
            for value in running.return_values(path)? {
                out.push_str(&value);
                out.push('\n');
            }
            out
        }
        Format::Text => running.get_subtree(path)?.to_string(),
    };
    print!("{}", output);
    Ok(())
}
