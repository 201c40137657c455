//! Helpers driving the built `rcfg` binary against a scratch site

use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

/// Schema used by every test site
pub const REFERENCE: &str = r#"{
  "component_version": {"service": 1, "system": 2},
  "children": {
    "system": {
      "kind": "internal", "owner": "system", "priority": 100,
      "children": {
        "host-name": {"kind": "leaf"},
        "name-server": {"kind": "leaf_multi"}
      }
    },
    "service": {
      "kind": "internal", "owner": "service", "priority": 900,
      "children": {
        "ssh": {"kind": "internal", "children": {"port": {"kind": "leaf"}}}
      }
    }
  }
}"#;

/// Scratch directory holding a settings file, running config and archive
pub struct TestSite {
    dir: TempDir,
}

impl TestSite {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let root = dir.path();
        std::fs::write(root.join("reference.json"), REFERENCE).expect("Failed to write reference");
        let settings = format!(
            "[paths]\n\
             running_config = \"{}\"\n\
             archive_dir = \"{}\"\n\
             lock_dir = \"{}\"\n\
             reference = \"{}\"\n\
             migration_dir = \"{}\"\n\
             \n\
             [commit]\n\
             lock_timeout_secs = 1\n\
             \n\
             [system]\n\
             release = \"1.4.0\"\n",
            root.join("config.boot").display(),
            root.join("archive").display(),
            root.join("lock").display(),
            root.join("reference.json").display(),
            root.join("migrate").display(),
        );
        std::fs::write(root.join("rcfg.toml"), settings).expect("Failed to write settings");
        Self { dir }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn settings(&self) -> PathBuf {
        self.path().join("rcfg.toml")
    }

    pub fn running_config(&self) -> PathBuf {
        self.path().join("config.boot")
    }

    /// Write `contents` to a file in the site and return its path
    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.path().join(name);
        std::fs::write(&path, contents).expect("Failed to write file");
        path
    }

    /// Write a `<component>/<n>-to-<m>` migration script
    pub fn migration(&self, component: &str, name: &str, contents: &str) {
        let dir = self.path().join("migrate").join(component);
        std::fs::create_dir_all(&dir).expect("Failed to create migration dir");
        std::fs::write(dir.join(name), contents).expect("Failed to write migration");
    }

    pub fn rcfg(&self, args: &[&str]) -> RcfgCommand {
        let mut cmd = RcfgCommand::new(self.path());
        cmd.arg("--settings").arg(self.settings().to_str().expect("utf-8 path"));
        for a in args {
            cmd.arg(a);
        }
        cmd
    }
}

/// Command builder for the `rcfg` binary
pub struct RcfgCommand {
    working_dir: PathBuf,
    args: Vec<String>,
}

impl RcfgCommand {
    pub fn new(working_dir: impl AsRef<Path>) -> Self {
        Self {
            working_dir: working_dir.as_ref().to_path_buf(),
            args: Vec::new(),
        }
    }

    pub fn arg(&mut self, arg: &str) -> &mut Self {
        self.args.push(arg.to_string());
        self
    }

    pub fn execute(&self) -> CommandResult {
        let output = Command::new(env!("CARGO_BIN_EXE_rcfg"))
            .args(&self.args)
            .current_dir(&self.working_dir)
            .env("RUST_LOG", "warn")
            .output()
            .expect("Failed to execute rcfg");
        CommandResult {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_code: output.status.code().unwrap_or(-1),
        }
    }

    /// Execute and panic unless the command succeeded
    pub fn assert_success(&self) -> CommandResult {
        let result = self.execute();
        assert!(
            result.success(),
            "Command failed (exit code: {}):\nArgs: {:?}\nStdout: {}\nStderr: {}",
            result.exit_code,
            self.args,
            result.stdout,
            result.stderr
        );
        result
    }

    /// Execute and panic if the command succeeded
    pub fn assert_failure(&self) -> CommandResult {
        let result = self.execute();
        assert!(
            !result.success(),
            "Command should have failed:\nArgs: {:?}\nStdout: {}",
            self.args,
            result.stdout
        );
        result
    }
}

#[derive(Debug, Clone)]
pub struct CommandResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CommandResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}
