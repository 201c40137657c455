//! Apply mutation steps to a tree with rollback
//!
//! Every step runs against a deep copy of the tree, which replaces the tree
//! only when the step succeeds. A step that fails or panics leaves the tree
//! untouched and is reported as [`ComposeConfigError`] carrying the step's
//! own error.
//!
//! With a checkpoint path configured, the tree is written there before the
//! first step and again after every successful one, so the file always
//! holds the most recent good state.

use crate::migration::Migration;
use crate::script::CommandScript;
use crate::write_atomic;
use cfg_core::{RenderOptions, Tree, VersionInfo};
use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

/// A compose step failed and the tree was rolled back
#[derive(Debug, Error)]
#[error("{step}: {source}")]
pub struct ComposeConfigError {
    step: String,
    #[source]
    source: anyhow::Error,
}

impl ComposeConfigError {
    /// Name of the failed step
    pub fn step(&self) -> &str {
        &self.step
    }

    /// The step's own error
    pub fn inner(&self) -> &anyhow::Error {
        &self.source
    }

    pub fn into_inner(self) -> anyhow::Error {
        self.source
    }
}

type ComposeFn = dyn Fn(&mut Tree) -> anyhow::Result<()> + Send + Sync;

/// Named mutation functions, registered in code
#[derive(Default)]
pub struct FunctionRegistry {
    funcs: BTreeMap<String, Box<ComposeFn>>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, name: impl Into<String>, func: F)
    where
        F: Fn(&mut Tree) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.funcs.insert(name.into(), Box::new(func));
    }

    pub fn get(&self, name: &str) -> Option<&ComposeFn> {
        self.funcs.get(name).map(|f| f.as_ref())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.funcs.keys().map(String::as_str)
    }
}

impl std::fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.funcs.keys()).finish()
    }
}

/// A tree under composition
#[derive(Debug)]
pub struct ComposeConfig {
    tree: Tree,
    checkpoint: Option<PathBuf>,
    checkpoint_started: bool,
    version: Option<VersionInfo>,
}

impl ComposeConfig {
    pub fn new(tree: Tree, checkpoint: Option<PathBuf>) -> Self {
        Self {
            tree,
            checkpoint,
            checkpoint_started: false,
            version: None,
        }
    }

    /// Attach the trailer used by `to_string(true)` and `write`
    pub fn with_version(mut self, version: VersionInfo) -> Self {
        self.version = Some(version);
        self
    }

    pub fn set_version(&mut self, version: Option<VersionInfo>) {
        self.version = version;
    }

    pub fn version(&self) -> Option<&VersionInfo> {
        self.version.as_ref()
    }

    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    pub fn into_tree(self) -> Tree {
        self.tree
    }

    pub fn checkpoint(&self) -> Option<&Path> {
        self.checkpoint.as_deref()
    }

    /// Run `func` on the tree, rolling back if it fails
    pub fn apply_func<F>(&mut self, step: &str, func: F) -> Result<(), ComposeConfigError>
    where
        F: FnOnce(&mut Tree) -> anyhow::Result<()>,
    {
        if !self.checkpoint_started {
            self.checkpoint_started = true;
            self.save_checkpoint();
        }

        let mut work = self.tree.deep_copy();
        let outcome = catch_unwind(AssertUnwindSafe(|| func(&mut work)))
            .unwrap_or_else(|payload| Err(anyhow::anyhow!("step panicked: {}", panic_message(&*payload))));
        match outcome {
            Ok(()) => {
                self.tree = work;
                debug!(step, "compose step applied");
                self.save_checkpoint();
                Ok(())
            }
            Err(source) => {
                debug!(step, error = %source, "compose step failed, tree kept");
                Err(ComposeConfigError {
                    step: step.to_string(),
                    source,
                })
            }
        }
    }

    /// Apply a command script file
    pub fn apply_file(&mut self, path: &Path) -> Result<(), ComposeConfigError> {
        let step = path.display().to_string();
        let script = CommandScript::load(path).map_err(|e| ComposeConfigError {
            step: step.clone(),
            source: e.into(),
        })?;
        self.apply_func(&step, |tree| script.apply(tree))
    }

    /// Apply a function looked up by name
    pub fn apply_named(
        &mut self,
        registry: &FunctionRegistry,
        name: &str,
    ) -> Result<(), ComposeConfigError> {
        let func = registry.get(name).ok_or_else(|| ComposeConfigError {
            step: name.to_string(),
            source: anyhow::anyhow!("no function registered under '{}'", name),
        })?;
        self.apply_func(name, func)
    }

    /// Apply one migration step from `previous`
    pub fn apply_migration(
        &mut self,
        migration: &dyn Migration,
        previous: u32,
    ) -> Result<(), ComposeConfigError> {
        self.apply_func(&migration.name(), |tree| migration.apply(tree, previous))
    }

    /// Render the tree, optionally followed by the version trailer
    pub fn to_string(&self, with_version: bool) -> String {
        let opts = RenderOptions {
            ordered_values: false,
            version: if with_version { self.version.clone() } else { None },
        };
        self.tree.render(&opts)
    }

    /// Write the rendered tree atomically to `path`
    pub fn write(&self, path: &Path, with_version: bool) -> crate::Result<()> {
        write_atomic(path, &self.to_string(with_version))
    }

    fn save_checkpoint(&self) {
        let Some(path) = &self.checkpoint else {
            return;
        };
        if let Err(e) = write_atomic(path, &self.to_string(true)) {
            warn!(path = %path.display(), error = %e, "failed to write compose checkpoint");
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "unknown panic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[derive(Debug, thiserror::Error)]
    #[error("boom")]
    struct Boom;

    fn base() -> Tree {
        "system {\n    host-name r1\n}\n".parse().unwrap()
    }

    #[test]
    fn test_rollback_on_failure() {
        let mut compose = ComposeConfig::new(base(), None);
        let err = compose
            .apply_func("bad-step", |tree| {
                tree.set_value(&["system", "domain-name"], "example.net")?;
                Err(Boom.into())
            })
            .unwrap_err();

        assert_eq!(err.step(), "bad-step");
        assert!(err.inner().downcast_ref::<Boom>().is_some());
        assert_eq!(compose.tree(), &base());
        assert!(!compose.tree().exists(&["system", "domain-name"]));
    }

    #[test]
    fn test_panicking_step_leaves_tree_intact() {
        let mut compose = ComposeConfig::new(base(), None);
        let err = compose
            .apply_func("panics", |tree| {
                tree.delete(&["system"])?;
                panic!("half way through");
            })
            .unwrap_err();

        assert_eq!(err.step(), "panics");
        assert!(err.inner().to_string().contains("half way through"));
        assert_eq!(compose.tree(), &base());

        compose
            .apply_func("after", |tree| Ok(tree.set_value(&["system", "time-zone"], "UTC")?))
            .unwrap();
        assert!(compose.tree().exists(&["system", "host-name"]));
    }

    #[test]
    fn test_steps_accumulate() {
        let mut compose = ComposeConfig::new(base(), None);
        compose
            .apply_func("one", |t| Ok(t.set_value(&["system", "time-zone"], "UTC")?))
            .unwrap();
        compose
            .apply_func("two", |t| Ok(t.delete(&["system", "host-name"])?))
            .unwrap();
        assert_eq!(compose.to_string(false), "system {\n    time-zone UTC\n}\n");
    }

    #[test]
    fn test_checkpoint_holds_last_good_state() {
        let dir = TempDir::new().unwrap();
        let checkpoint = dir.path().join("checkpoint");
        let mut compose = ComposeConfig::new(base(), Some(checkpoint.clone()));

        compose
            .apply_func("ok", |t| Ok(t.set_value(&["system", "time-zone"], "UTC")?))
            .unwrap();
        let good = std::fs::read_to_string(&checkpoint).unwrap();
        assert!(good.contains("time-zone UTC"));

        compose
            .apply_func("bad", |t| {
                t.delete(&["system"])?;
                anyhow::bail!("refused")
            })
            .unwrap_err();
        assert_eq!(std::fs::read_to_string(&checkpoint).unwrap(), good);
    }

    #[test]
    fn test_named_functions() {
        let mut registry = FunctionRegistry::new();
        registry.register("hostname", |t: &mut Tree| {
            Ok(t.set_value(&["system", "host-name"], "r2")?)
        });

        let mut compose = ComposeConfig::new(base(), None);
        compose.apply_named(&registry, "hostname").unwrap();
        assert_eq!(compose.tree().return_value(&["system", "host-name"]).unwrap(), "r2");

        let err = compose.apply_named(&registry, "missing").unwrap_err();
        assert_eq!(err.step(), "missing");
    }

    #[test]
    fn test_apply_file_and_write_with_version() {
        let dir = TempDir::new().unwrap();
        let script = dir.path().join("1-to-2");
        std::fs::write(&script, "set system time-zone = UTC\n").unwrap();

        let version = VersionInfo::new([("system".to_string(), 2)].into(), Some("1.4.0".into()));
        let mut compose = ComposeConfig::new(base(), None).with_version(version);
        compose.apply_file(&script).unwrap();

        let out = dir.path().join("config.boot");
        compose.write(&out, true).unwrap();
        let text = std::fs::read_to_string(&out).unwrap();
        assert!(text.contains("time-zone UTC"));
        assert!(text.contains("// vyos-config-version: \"system@2\""));
        assert!(!compose.to_string(false).contains("vyos-config-version"));

        assert!(compose.apply_file(&dir.path().join("absent")).is_err());
    }
}
