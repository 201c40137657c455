//! Upgrade a saved configuration to the running component versions

use crate::compose::ComposeConfig;
use crate::registry::MigrationRegistry;
use crate::{io_err, write_atomic, MigrationError, Result};
use cfg_core::{parse, strip_footer, Reference, VersionInfo, Vintage};
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info};

/// What [`ConfigMigrate::run`] did to the file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrateOutcome {
    /// File already current
    Unchanged,
    /// Only the trailer changed (release string or trailer spelling)
    TrailerUpdated,
    /// Component migrations ran; the original is kept at `backup`
    Migrated {
        backup: PathBuf,
        applied: Vec<String>,
    },
}

/// `<input>.<YYYY-MM-DD-HHMMSS>.pre-migration`
pub(crate) fn backup_path(input: &Path) -> PathBuf {
    let stamp = chrono::Local::now().format("%Y-%m-%d-%H%M%S");
    let mut name: OsString = input.as_os_str().to_owned();
    name.push(format!(".{}.pre-migration", stamp));
    PathBuf::from(name)
}

/// Migration driver for one configuration file
pub struct ConfigMigrate<'a> {
    config_file: PathBuf,
    system: VersionInfo,
    registry: &'a MigrationRegistry,
    force: bool,
    output: Option<PathBuf>,
    checkpoint: Option<PathBuf>,
    reference: Option<Arc<Reference>>,
}

impl<'a> ConfigMigrate<'a> {
    /// `system` holds the component versions and release of the running software
    pub fn new(
        config_file: impl Into<PathBuf>,
        system: VersionInfo,
        registry: &'a MigrationRegistry,
    ) -> Self {
        Self {
            config_file: config_file.into(),
            system,
            registry,
            force: false,
            output: None,
            checkpoint: None,
            reference: None,
        }
    }

    /// Rerun every script regardless of the recorded versions
    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// Write the result here instead of replacing the input
    pub fn output(mut self, path: impl Into<PathBuf>) -> Self {
        self.output = Some(path.into());
        self
    }

    /// Checkpoint file prefix; a failing script leaves its last good state
    /// at `<checkpoint>_<component>_<n-to-m>`
    pub fn checkpoint(mut self, path: impl Into<PathBuf>) -> Self {
        self.checkpoint = Some(path.into());
        self
    }

    /// Attach a reference so scripts create canonically spelled nodes
    pub fn reference(mut self, reference: Arc<Reference>) -> Self {
        self.reference = Some(reference);
        self
    }

    fn target(&self) -> &Path {
        self.output.as_deref().unwrap_or(&self.config_file)
    }

    fn read(&self) -> Result<(String, Option<VersionInfo>)> {
        let text = std::fs::read_to_string(&self.config_file).map_err(io_err(&self.config_file))?;
        let version = VersionInfo::from_config_text(&text)?;
        Ok((text, version))
    }

    fn compose_for(&self, body: &str) -> Result<ComposeConfig> {
        let mut tree = parse(body)?;
        if let Some(reference) = &self.reference {
            tree.set_reference(Some(Arc::clone(reference)));
        }
        Ok(ComposeConfig::new(tree, self.checkpoint.clone()))
    }

    /// Components already current: refresh the release string and spelling
    fn update_trailer(&self, text: &str, current: &VersionInfo) -> Result<MigrateOutcome> {
        let release_changed =
            self.system.release.is_some() && current.release != self.system.release;
        if !release_changed && current.vintage == Vintage::Vyos {
            debug!(file = %self.config_file.display(), "configuration is current");
            return Ok(MigrateOutcome::Unchanged);
        }
        let release = self.system.release.clone().or_else(|| current.release.clone());
        let updated = VersionInfo::new(current.components.clone(), release);
        let mut out = strip_footer(text);
        out.push_str(&updated.footer());
        write_atomic(self.target(), &out)?;
        info!(file = %self.target().display(), "updated version trailer");
        Ok(MigrateOutcome::TrailerUpdated)
    }

    /// Bring the file up to the system's component versions
    pub fn run(&self) -> Result<MigrateOutcome> {
        let (text, file_version) = self.read()?;

        match &file_version {
            Some(current) if !self.force && current.components == self.system.components => {
                return self.update_trailer(&text, current);
            }
            _ => {}
        }

        let backup = backup_path(&self.config_file);
        std::fs::copy(&self.config_file, &backup).map_err(io_err(&backup))?;
        debug!(backup = %backup.display(), "wrote pre-migration backup");

        if file_version.as_ref().map(|v| v.vintage) == Some(Vintage::Vyatta) {
            debug!("normalising legacy version trailer");
        }

        let mut compose = self.compose_for(&strip_footer(&text))?;

        // Retired components are dropped from the record
        let mut revision: BTreeMap<String, u32> = file_version
            .as_ref()
            .map(|v| v.components.clone())
            .unwrap_or_default();
        revision.retain(|name, _| self.system.components.contains_key(name));

        let mut applied = Vec::new();
        for (component, &target) in &self.system.components {
            let start = match &file_version {
                Some(v) if !self.force => Some(v.components.get(component).copied().unwrap_or(0)),
                _ => None,
            };
            let scripts: Vec<_> = self
                .registry
                .scripts_for(component)
                .iter()
                .filter(|m| start.map_or(true, |s| m.from_version() >= s) && m.to_version() <= target)
                .collect();

            if scripts.is_empty() {
                revision.insert(component.clone(), target);
                continue;
            }

            for migration in scripts {
                info!(script = %migration.name(), "applying migration");
                let step = compose.apply_migration(migration.as_ref(), migration.from_version());
                if let Err(e) = step {
                    error!(script = %migration.name(), error = %e, "migration failed");
                    if let Some(checkpoint) = &self.checkpoint {
                        let mut name: OsString = checkpoint.as_os_str().to_owned();
                        name.push(format!(
                            "_{}_{}-to-{}",
                            component,
                            migration.from_version(),
                            migration.to_version()
                        ));
                        let state = compose.to_string(false);
                        let version =
                            VersionInfo::new(revision.clone(), self.system.release.clone());
                        write_atomic(Path::new(&name), &(state + &version.footer()))?;
                    }
                    return Err(MigrationError::Script {
                        component: component.clone(),
                        from: migration.from_version(),
                        to: migration.to_version(),
                        source: e,
                    });
                }
                revision.insert(component.clone(), migration.to_version());
                applied.push(migration.name());
            }
        }

        if revision != self.system.components {
            let behind: Vec<String> = VersionInfo::new(revision, None).outdated(&self.system.components);
            return Err(MigrationError::Incomplete(behind.join(", ")));
        }

        let compose = compose.with_version(VersionInfo::new(revision, self.system.release.clone()));
        compose.write(self.target(), true)?;
        info!(
            file = %self.target().display(),
            scripts = applied.len(),
            "configuration migrated"
        );
        Ok(MigrateOutcome::Migrated { backup, applied })
    }

    /// Apply a single script file to the configuration, keeping its trailer
    pub fn run_script(&self, script: &Path) -> Result<()> {
        let (text, file_version) = self.read()?;
        let mut compose = self.compose_for(&strip_footer(&text))?;
        if let Err(e) = compose.apply_file(script) {
            error!(script = %script.display(), error = %e, "migration script failed");
            return Err(e.into());
        }
        compose.set_version(file_version);
        compose.write(self.target(), true)
    }
}
