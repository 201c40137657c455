//! Print the effective settings

use anyhow::{Context, Result};
use cli_lib::Settings;

pub fn run(settings: &Settings) -> Result<()> {
    let text = settings.to_toml().context("Failed to serialize settings")?;
    print!("{}", text);
    Ok(())
}
