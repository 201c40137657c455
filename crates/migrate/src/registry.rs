//! Migration registry

use crate::migration::Migration;
use crate::script::{CommandScript, ScriptMigration};
use crate::Result;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Migrations grouped by component
#[derive(Default)]
pub struct MigrationRegistry {
    by_component: BTreeMap<String, Vec<Box<dyn Migration>>>,
}

impl MigrationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, migration: Box<dyn Migration>) {
        let list = self
            .by_component
            .entry(migration.component().to_string())
            .or_default();
        list.push(migration);
        list.sort_by_key(|m| (m.from_version(), m.to_version()));
    }

    /// Load every `<component>/<n>-to-<m>` script below `dir`
    ///
    /// Files that do not follow the naming scheme are skipped.
    pub fn discover(dir: &Path) -> Result<Self> {
        let mut registry = Self::new();
        if !dir.is_dir() {
            debug!(dir = %dir.display(), "no migration directory");
            return Ok(registry);
        }
        for entry in WalkDir::new(dir)
            .min_depth(2)
            .max_depth(2)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
        {
            let path = entry.path();
            let component = path
                .parent()
                .and_then(|p| p.file_name())
                .and_then(|n| n.to_str());
            let steps = entry
                .file_name()
                .to_str()
                .and_then(ScriptMigration::parse_file_name);
            let (Some(component), Some((from, to))) = (component, steps) else {
                warn!(path = %path.display(), "ignoring file in migration directory");
                continue;
            };
            let script = CommandScript::load(path)?;
            registry.register(Box::new(ScriptMigration::new(component, from, to, script)));
        }
        debug!(dir = %dir.display(), components = registry.by_component.len(), "discovered migrations");
        Ok(registry)
    }

    /// Migrations of `component`, ordered by version
    pub fn scripts_for(&self, component: &str) -> &[Box<dyn Migration>] {
        self.by_component
            .get(component)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn components(&self) -> impl Iterator<Item = &str> {
        self.by_component.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.by_component.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for MigrationRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut map = f.debug_map();
        for (component, list) in &self.by_component {
            let names: Vec<String> = list.iter().map(|m| m.name()).collect();
            map.entry(component, &names);
        }
        map.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FnMigration;
    use tempfile::TempDir;

    #[test]
    fn test_discover() {
        let dir = TempDir::new().unwrap();
        let system = dir.path().join("system");
        std::fs::create_dir(&system).unwrap();
        std::fs::write(system.join("4-to-5"), "set system option = on\n").unwrap();
        std::fs::write(system.join("3-to-4"), "rename system hostname => host-name\n").unwrap();
        std::fs::write(system.join("README"), "notes").unwrap();
        std::fs::write(dir.path().join("stray"), "").unwrap();

        let registry = MigrationRegistry::discover(dir.path()).unwrap();
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.components().collect::<Vec<_>>(), vec!["system"]);
        let names: Vec<String> = registry.scripts_for("system").iter().map(|m| m.name()).collect();
        assert_eq!(names, vec!["system/3-to-4", "system/4-to-5"]);
        assert!(registry.scripts_for("firewall").is_empty());
    }

    #[test]
    fn test_discover_missing_dir() {
        let dir = TempDir::new().unwrap();
        let registry = MigrationRegistry::discover(&dir.path().join("absent")).unwrap();
        assert!(registry.is_empty());
    }

    #[test]
    fn test_register_orders_by_version() {
        let mut registry = MigrationRegistry::new();
        registry.register(Box::new(FnMigration::new("nat", 2, 3, |_, _| Ok(()))));
        registry.register(Box::new(FnMigration::new("nat", 0, 1, |_, _| Ok(()))));
        let from: Vec<u32> = registry.scripts_for("nat").iter().map(|m| m.from_version()).collect();
        assert_eq!(from, vec![0, 2]);
    }
}
