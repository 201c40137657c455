//! Migration capability

use cfg_core::Tree;

/// One step upgrading a component from `from_version` to `to_version`
///
/// Implementations must be idempotent on trees that are already migrated.
pub trait Migration: Send + Sync {
    /// Schema component this migration belongs to
    fn component(&self) -> &str;

    fn from_version(&self) -> u32;

    fn to_version(&self) -> u32 {
        self.from_version() + 1
    }

    /// Mutate `tree` in place; `previous` is the version being migrated from
    fn apply(&self, tree: &mut Tree, previous: u32) -> anyhow::Result<()>;

    /// `component/n-to-m`, used in logs and checkpoint names
    fn name(&self) -> String {
        format!("{}/{}-to-{}", self.component(), self.from_version(), self.to_version())
    }
}

type MigrateFn = dyn Fn(&mut Tree, u32) -> anyhow::Result<()> + Send + Sync;

/// Migration backed by a closure, for registries built in code
pub struct FnMigration {
    component: String,
    from: u32,
    to: u32,
    func: Box<MigrateFn>,
}

impl FnMigration {
    pub fn new<F>(component: impl Into<String>, from: u32, to: u32, func: F) -> Self
    where
        F: Fn(&mut Tree, u32) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self {
            component: component.into(),
            from,
            to,
            func: Box::new(func),
        }
    }
}

impl Migration for FnMigration {
    fn component(&self) -> &str {
        &self.component
    }

    fn from_version(&self) -> u32 {
        self.from
    }

    fn to_version(&self) -> u32 {
        self.to
    }

    fn apply(&self, tree: &mut Tree, previous: u32) -> anyhow::Result<()> {
        (self.func)(tree, previous)
    }
}

impl std::fmt::Debug for FnMigration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnMigration")
            .field("component", &self.component)
            .field("from", &self.from)
            .field("to", &self.to)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fn_migration() {
        let m = FnMigration::new("system", 3, 4, |tree, previous| {
            assert_eq!(previous, 3);
            if tree.exists(&["system", "hostname"]) {
                tree.rename(&["system", "hostname"], "host-name")?;
            }
            Ok(())
        });
        assert_eq!(m.name(), "system/3-to-4");

        let mut tree: Tree = "system {\n    hostname r1\n}\n".parse().unwrap();
        m.apply(&mut tree, 3).unwrap();
        assert_eq!(tree.return_value(&["system", "host-name"]).unwrap(), "r1");

        let once = tree.clone();
        m.apply(&mut tree, 3).unwrap();
        assert_eq!(tree, once);
    }
}
