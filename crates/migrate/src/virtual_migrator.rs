//! Rewrite the legacy version trailer in the modern form

use crate::migrate::backup_path;
use crate::{io_err, write_atomic, MigrationError, Result};
use cfg_core::{strip_footer, VersionInfo, Vintage};
use std::path::PathBuf;
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct VirtualMigrator {
    path: PathBuf,
    output: Option<PathBuf>,
}

impl VirtualMigrator {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            output: None,
        }
    }

    pub fn output(mut self, path: impl Into<PathBuf>) -> Self {
        self.output = Some(path.into());
        self
    }

    /// Normalise the trailer, returning the backup path when the file changed
    ///
    /// Files without any version information are rejected.
    pub fn run(&self) -> Result<Option<PathBuf>> {
        let text = std::fs::read_to_string(&self.path).map_err(io_err(&self.path))?;
        let version = VersionInfo::from_config_text(&text)?.ok_or_else(|| MigrationError::NoVersion {
            path: self.path.clone(),
        })?;
        if version.vintage == Vintage::Vyos {
            debug!(file = %self.path.display(), "trailer already in current form");
            return Ok(None);
        }

        let backup = backup_path(&self.path);
        std::fs::copy(&self.path, &backup).map_err(io_err(&backup))?;

        let mut out = strip_footer(&text);
        out.push_str(&version.footer_as(Vintage::Vyos));
        let target = self.output.as_ref().unwrap_or(&self.path);
        write_atomic(target, &out)?;
        info!(file = %target.display(), backup = %backup.display(), "rewrote legacy version trailer");
        Ok(Some(backup))
    }
}
