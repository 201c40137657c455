//! Migrate a saved configuration file

use anyhow::{Context, Result};
use cfg_core::{Reference, VersionInfo};
use cli_lib::Settings;
use migrate::{ConfigMigrate, MigrateOutcome, MigrationRegistry, VirtualMigrator};
use owo_colors::OwoColorize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub fn run(
    settings: &Settings,
    file: &Path,
    force: bool,
    virtual_only: bool,
    output: Option<PathBuf>,
) -> Result<()> {
    if virtual_only {
        let mut migrator = VirtualMigrator::new(file);
        if let Some(out) = output {
            migrator = migrator.output(out);
        }
        match migrator.run()? {
            Some(backup) => println!(
                "{} legacy version trailer; original saved as {}",
                "Rewrote".green(),
                backup.display()
            ),
            None => println!("Version trailer already current"),
        }
        return Ok(());
    }

    let reference_path = settings
        .paths
        .reference
        .as_deref()
        .context("Migration needs a reference catalogue (paths.reference)")?;
    let reference = Arc::new(
        Reference::load(reference_path)
            .with_context(|| format!("Failed to load {}", reference_path.display()))?,
    );
    let registry = match &settings.paths.migration_dir {
        Some(dir) => MigrationRegistry::discover(dir)
            .with_context(|| format!("Failed to read migrations from {}", dir.display()))?,
        None => MigrationRegistry::new(),
    };
    let system = VersionInfo::new(
        reference.component_version().clone(),
        settings.system.release.clone(),
    );

    let mut migrator = ConfigMigrate::new(file, system, &registry)
        .force(force)
        .reference(reference);
    if let Some(out) = output {
        migrator = migrator.output(out);
    }

    match migrator
        .run()
        .with_context(|| format!("Migration of {} failed", file.display()))?
    {
        MigrateOutcome::Unchanged => println!("Configuration is current"),
        MigrateOutcome::TrailerUpdated => println!("{} version trailer", "Updated".green()),
        MigrateOutcome::Migrated { backup, applied } => {
            for name in &applied {
                println!("  applied {}", name.cyan());
            }
            println!(
                "{} {} ({} scripts); original saved as {}",
                "Migrated".green(),
                file.display(),
                applied.len(),
                backup.display()
            );
        }
    }
    Ok(())
}
