//! Configuration migration and composition
//!
//! This crate provides:
//! - The [`Migration`] capability and a registry discovering command scripts
//! - [`ComposeConfig`]: apply steps to a tree with rollback on failure
//! - [`ConfigMigrate`]: upgrade a saved configuration across component versions
//! - [`VirtualMigrator`]: rewrite the legacy version trailer in the modern form

pub mod compose;
pub mod migrate;
pub mod migration;
pub mod registry;
pub mod script;
pub mod virtual_migrator;

// Re-exports
pub use compose::{ComposeConfig, ComposeConfigError, FunctionRegistry};
pub use migrate::{ConfigMigrate, MigrateOutcome};
pub use migration::{FnMigration, Migration};
pub use registry::MigrationRegistry;
pub use script::{CommandScript, ScriptMigration};
pub use virtual_migrator::VirtualMigrator;

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Tree(#[from] cfg_core::TreeError),

    #[error("{path}: no version information, virtual migration not possible")]
    NoVersion { path: PathBuf },

    #[error("{path}:{line}: {message}")]
    InvalidScript {
        path: String,
        line: usize,
        message: String,
    },

    #[error("migration of {component} from {from} to {to} failed: {source}")]
    Script {
        component: String,
        from: u32,
        to: u32,
        #[source]
        source: ComposeConfigError,
    },

    #[error(transparent)]
    Compose(#[from] ComposeConfigError),

    #[error("incomplete migration, components not at target version: {0}")]
    Incomplete(String),
}

/// Result type for migration operations
pub type Result<T> = std::result::Result<T, MigrationError>;

pub(crate) fn io_err(path: &std::path::Path) -> impl FnOnce(std::io::Error) -> MigrationError + '_ {
    move |source| MigrationError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Write `data` to `target` through a temporary file in the same directory
pub(crate) fn write_atomic(target: &std::path::Path, data: &str) -> Result<()> {
    use std::io::Write;

    let dir = match target.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => std::path::Path::new("."),
    };
    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(io_err(dir))?;
    tmp.write_all(data.as_bytes()).map_err(io_err(target))?;
    tmp.persist(target).map_err(|e| MigrationError::Io {
        path: target.to_path_buf(),
        source: e.error,
    })?;
    Ok(())
}
