//! Declarative command scripts
//!
//! A script is a list of tree operations, one per line. Values follow a
//! standalone `=` (replace) or `+=` (append); renames and copies name their
//! target after `=>`. Words may be double- or single-quoted.
//!
//! ```text
//! # system/3-to-4
//! rename system hostname => host-name
//! set system name-server += 192.0.2.53
//! set system time-zone = UTC
//! set service ssh
//! delete system options legacy-flag
//! delete-value system name-server = 203.0.113.1
//! copy system login => system login-saved
//! comment system = "migrated from 3"
//! set-tag service dns forwarding listen-address
//! ```
//!
//! Operations whose source path is missing are skipped, so a script can run
//! on an already migrated tree without changing it.

use crate::migration::Migration;
use crate::{io_err, MigrationError, Result};
use cfg_core::{split_words, Tree};
use std::path::Path;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Op {
    Set { path: Vec<String>, value: Option<String>, append: bool },
    Delete { path: Vec<String> },
    DeleteValue { path: Vec<String>, value: String },
    Rename { path: Vec<String>, new_name: String },
    Copy { src: Vec<String>, dst: Vec<String> },
    Comment { path: Vec<String>, text: String },
    SetTag { path: Vec<String> },
}

/// A parsed command script
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandScript {
    name: String,
    ops: Vec<Op>,
}

/// Split `words` at the first standalone `sep`
fn split_at<'a>(words: &'a [String], sep: &str) -> Option<(&'a [String], &'a [String])> {
    let pos = words.iter().position(|w| w == sep)?;
    Some((&words[..pos], &words[pos + 1..]))
}

fn parse_line(words: &[String]) -> std::result::Result<Op, String> {
    let (op, rest) = words.split_first().ok_or("empty statement")?;
    let need_path = |p: &[String]| {
        if p.is_empty() {
            Err(format!("'{}' needs a path", op))
        } else {
            Ok(p.to_vec())
        }
    };
    let single = |v: &[String]| match v {
        [one] => Ok(one.clone()),
        _ => Err(format!("'{}' expects exactly one word after the separator", op)),
    };

    match op.as_str() {
        "set" => {
            if let Some((path, value)) = split_at(rest, "+=") {
                return Ok(Op::Set {
                    path: need_path(path)?,
                    value: Some(single(value)?),
                    append: true,
                });
            }
            match split_at(rest, "=") {
                Some((path, value)) => Ok(Op::Set {
                    path: need_path(path)?,
                    value: Some(single(value)?),
                    append: false,
                }),
                None => Ok(Op::Set {
                    path: need_path(rest)?,
                    value: None,
                    append: false,
                }),
            }
        }
        "delete" => Ok(Op::Delete { path: need_path(rest)? }),
        "delete-value" => {
            let (path, value) = split_at(rest, "=").ok_or("'delete-value' needs '= value'")?;
            Ok(Op::DeleteValue {
                path: need_path(path)?,
                value: single(value)?,
            })
        }
        "rename" => {
            let (path, name) = split_at(rest, "=>").ok_or("'rename' needs '=> new-name'")?;
            Ok(Op::Rename {
                path: need_path(path)?,
                new_name: single(name)?,
            })
        }
        "copy" => {
            let (src, dst) = split_at(rest, "=>").ok_or("'copy' needs '=> destination'")?;
            Ok(Op::Copy {
                src: need_path(src)?,
                dst: need_path(dst)?,
            })
        }
        "comment" => {
            let (path, text) = split_at(rest, "=").ok_or("'comment' needs '= text'")?;
            Ok(Op::Comment {
                path: need_path(path)?,
                text: text.join(" "),
            })
        }
        "set-tag" => Ok(Op::SetTag { path: need_path(rest)? }),
        other => Err(format!("unknown operation '{}'", other)),
    }
}

impl CommandScript {
    /// Parse script text; `name` is used in error messages
    pub fn parse(name: &str, text: &str) -> Result<Self> {
        let invalid = |line: usize, message: String| MigrationError::InvalidScript {
            path: name.to_string(),
            line,
            message,
        };
        let mut ops = Vec::new();
        for (idx, line) in text.lines().enumerate() {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let words = split_words(trimmed).map_err(|e| invalid(idx + 1, e.to_string()))?;
            ops.push(parse_line(&words).map_err(|m| invalid(idx + 1, m))?);
        }
        Ok(Self {
            name: name.to_string(),
            ops,
        })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(io_err(path))?;
        Self::parse(&path.display().to_string(), &text)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Run every operation against `tree`
    pub fn apply(&self, tree: &mut Tree) -> anyhow::Result<()> {
        for op in &self.ops {
            match op {
                Op::Set { path, value, append } => {
                    tree.set(path.as_slice(), value.as_deref(), !append)?;
                }
                Op::Delete { path } => {
                    if tree.exists(path.as_slice()) {
                        tree.delete(path.as_slice())?;
                    }
                }
                Op::DeleteValue { path, value } => {
                    let present = tree.is_leaf(path.as_slice())
                        && tree.return_values(path.as_slice())?.contains(value);
                    if present {
                        tree.delete_value(path.as_slice(), value)?;
                    }
                }
                Op::Rename { path, new_name } => {
                    if tree.exists(path.as_slice()) {
                        tree.rename(path.as_slice(), new_name)?;
                    }
                }
                Op::Copy { src, dst } => {
                    if tree.exists(src.as_slice()) && !tree.exists(dst.as_slice()) {
                        tree.copy(src.as_slice(), dst.as_slice())?;
                    }
                }
                Op::Comment { path, text } => {
                    if tree.exists(path.as_slice()) {
                        tree.set_comment(path.as_slice(), Some(text.as_str()))?;
                    }
                }
                Op::SetTag { path } => {
                    if tree.exists(path.as_slice()) && !tree.is_tag(path.as_slice()) {
                        tree.set_tag(path.as_slice())?;
                    }
                }
            }
        }
        debug!(script = %self.name, ops = self.ops.len(), "applied command script");
        Ok(())
    }
}

/// A command script bound to a component version step
#[derive(Debug, Clone)]
pub struct ScriptMigration {
    component: String,
    from: u32,
    to: u32,
    script: CommandScript,
}

impl ScriptMigration {
    pub fn new(component: impl Into<String>, from: u32, to: u32, script: CommandScript) -> Self {
        Self {
            component: component.into(),
            from,
            to,
            script,
        }
    }

    /// Parse `n-to-m` script file names
    pub fn parse_file_name(name: &str) -> Option<(u32, u32)> {
        let (from, to) = name.split_once("-to-")?;
        Some((from.parse().ok()?, to.parse().ok()?))
    }

    pub fn script(&self) -> &CommandScript {
        &self.script
    }
}

impl Migration for ScriptMigration {
    fn component(&self) -> &str {
        &self.component
    }

    fn from_version(&self) -> u32 {
        self.from
    }

    fn to_version(&self) -> u32 {
        self.to
    }

    fn apply(&self, tree: &mut Tree, _previous: u32) -> anyhow::Result<()> {
        self.script.apply(tree)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCRIPT: &str = "\
# system/3-to-4
rename system hostname => host-name
set system name-server += 192.0.2.53
set system time-zone = UTC
delete system options
delete-value system name-server = 203.0.113.1
copy system login => system login-saved
comment system = \"migrated from 3\"
set-tag service dns forwarding listen-address
";

    fn tree() -> Tree {
        "system {\n    hostname r1\n    name-server 203.0.113.1\n    options {\n        reboot-on-panic\n    }\n    login {\n        banner hello\n    }\n}\nservice {\n    dns {\n        forwarding {\n            listen-address 127.0.0.1\n        }\n    }\n}\n"
            .parse()
            .unwrap()
    }

    #[test]
    fn test_script_applies() {
        let script = CommandScript::parse("system/3-to-4", SCRIPT).unwrap();
        assert_eq!(script.len(), 8);

        let mut t = tree();
        script.apply(&mut t).unwrap();
        assert_eq!(t.return_value(&["system", "host-name"]).unwrap(), "r1");
        assert_eq!(t.return_values(&["system", "name-server"]).unwrap(), vec!["192.0.2.53"]);
        assert_eq!(t.return_value(&["system", "time-zone"]).unwrap(), "UTC");
        assert!(!t.exists(&["system", "options"]));
        assert_eq!(t.return_value(&["system", "login-saved", "banner"]).unwrap(), "hello");
        assert_eq!(t.get_comment(&["system"]).unwrap().as_deref(), Some("migrated from 3"));
        assert!(t.is_tag(&["service", "dns", "forwarding", "listen-address"]));
    }

    #[test]
    fn test_script_is_idempotent() {
        let script = CommandScript::parse("system/3-to-4", SCRIPT).unwrap();
        let mut t = tree();
        script.apply(&mut t).unwrap();
        let once = t.clone();
        script.apply(&mut t).unwrap();
        assert_eq!(t, once);
    }

    #[test]
    fn test_parse_errors() {
        let err = CommandScript::parse("bad", "set a = b\nfrobnicate x\n").unwrap_err();
        assert!(matches!(err, MigrationError::InvalidScript { line: 2, .. }));
        assert!(CommandScript::parse("bad", "rename a b\n").is_err());
        assert!(CommandScript::parse("bad", "set = v\n").is_err());
        assert!(CommandScript::parse("bad", "set a = one two\n").is_err());
    }

    #[test]
    fn test_file_name() {
        assert_eq!(ScriptMigration::parse_file_name("3-to-4"), Some((3, 4)));
        assert_eq!(ScriptMigration::parse_file_name("12-to-13"), Some((12, 13)));
        assert_eq!(ScriptMigration::parse_file_name("README"), None);
    }
}
