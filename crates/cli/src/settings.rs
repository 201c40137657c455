//! Front-end settings
//!
//! Layered with the `config` crate: built-in defaults, then a TOML file,
//! then `RCFG__<SECTION>__<KEY>` environment variables.
//!
//! ```toml
//! [paths]
//! running_config = "/config/config.boot"
//! archive_dir = "/config/archive"
//! lock_dir = "/run/rcfg"
//! reference = "/usr/share/rcfg/reference.json"
//! migration_dir = "/usr/share/rcfg/migrate"
//!
//! [archive]
//! max_revisions = 100
//!
//! [commit]
//! lock_timeout_secs = 30
//! ```

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming the settings file
pub const SETTINGS_ENV: &str = "RCFG_CONFIG";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub paths: PathSettings,
    pub archive: ArchiveSettings,
    pub commit: CommitSettings,
    pub system: SystemSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathSettings {
    /// Running configuration file
    pub running_config: PathBuf,
    /// Revision archive directory
    pub archive_dir: PathBuf,
    pub lock_dir: PathBuf,
    /// Reference catalogue (JSON)
    pub reference: Option<PathBuf>,
    /// Root of `<component>/<n>-to-<m>` migration scripts
    pub migration_dir: Option<PathBuf>,
    /// Directory for the log file; stderr only when unset
    pub log_dir: Option<PathBuf>,
}

impl Default for PathSettings {
    fn default() -> Self {
        Self {
            running_config: PathBuf::from("/config/config.boot"),
            archive_dir: PathBuf::from("/config/archive"),
            lock_dir: PathBuf::from(crate::lock::DEFAULT_LOCK_DIR),
            reference: None,
            migration_dir: None,
            log_dir: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveSettings {
    pub max_revisions: usize,
}

impl Default for ArchiveSettings {
    fn default() -> Self {
        Self { max_revisions: 100 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommitSettings {
    pub lock_timeout_secs: u64,
}

impl Default for CommitSettings {
    fn default() -> Self {
        Self {
            lock_timeout_secs: 30,
        }
    }
}

impl CommitSettings {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_timeout_secs)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemSettings {
    /// Release string written into version trailers
    pub release: Option<String>,
}

impl Settings {
    /// Default settings file: `$RCFG_CONFIG`, else `<config dir>/rcfg/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        if let Some(path) = std::env::var_os(SETTINGS_ENV) {
            return Some(PathBuf::from(path));
        }
        dirs::config_dir().map(|d| d.join("rcfg").join("config.toml"))
    }

    /// Load settings from `path` (or the default location) plus environment
    ///
    /// A missing default file is not an error; an explicit one must exist.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();
        match path {
            Some(p) => builder = builder.add_source(File::from(p).required(true)),
            None => {
                if let Some(p) = Self::default_path() {
                    builder = builder.add_source(File::from(p).required(false));
                }
            }
        }
        builder
            .add_source(
                Environment::with_prefix("RCFG")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    /// Effective settings as TOML
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let s = Settings::default();
        assert_eq!(s.archive.max_revisions, 100);
        assert_eq!(s.commit.lock_timeout(), Duration::from_secs(30));
        assert_eq!(s.paths.running_config, PathBuf::from("/config/config.boot"));
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("rcfg.toml");
        std::fs::write(
            &path,
            "[paths]\narchive_dir = \"/tmp/archive\"\n\n[archive]\nmax_revisions = 5\n",
        )
        .unwrap();

        let s = Settings::load(Some(&path)).unwrap();
        assert_eq!(s.paths.archive_dir, PathBuf::from("/tmp/archive"));
        assert_eq!(s.archive.max_revisions, 5);
        assert_eq!(s.commit.lock_timeout_secs, 30);
        assert_eq!(s.paths.running_config, PathBuf::from("/config/config.boot"));
    }

    #[test]
    fn test_explicit_file_must_exist() {
        let dir = TempDir::new().unwrap();
        assert!(Settings::load(Some(&dir.path().join("absent.toml"))).is_err());
    }

    #[test]
    fn test_toml_round_trip() {
        let mut s = Settings::default();
        s.paths.reference = Some(PathBuf::from("/usr/share/rcfg/reference.json"));
        s.system.release = Some("1.4.0".into());
        let text = s.to_toml().unwrap();
        assert!(text.contains("max_revisions = 100"));
        let back: Settings = toml::from_str(&text).unwrap();
        assert_eq!(back, s);
    }
}
