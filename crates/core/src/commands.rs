//! `set` / `delete` command lists
//!
//! Commands are the operational form of a configuration: a tree can be
//! flattened into `set` lines and a [`crate::Diff`] emits an ordered list of
//! `delete`s and `set`s that turns one tree into another.

use crate::error::{Result, TreeError};
use crate::render::quote;
use crate::tree::{Node, Tree};
use smallvec::SmallVec;
use std::fmt;

/// Path storage for commands; configuration paths are rarely deep
pub type CommandPath = SmallVec<[String; 8]>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CommandOp {
    Delete,
    Set,
}

impl CommandOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandOp::Delete => "delete",
            CommandOp::Set => "set",
        }
    }
}

/// One configuration command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub op: CommandOp,
    pub path: CommandPath,
    pub value: Option<String>,
}

impl Command {
    pub fn set<P: AsRef<str>>(path: &[P], value: Option<&str>) -> Self {
        Self {
            op: CommandOp::Set,
            path: path.iter().map(|p| p.as_ref().to_string()).collect(),
            value: value.map(str::to_string),
        }
    }

    pub fn delete<P: AsRef<str>>(path: &[P], value: Option<&str>) -> Self {
        Self {
            op: CommandOp::Delete,
            path: path.iter().map(|p| p.as_ref().to_string()).collect(),
            value: value.map(str::to_string),
        }
    }

    /// Parse one command line against `tree`
    ///
    /// The text form does not mark which word is a value. The attached
    /// reference decides when it knows the path; otherwise the last word is
    /// taken as a value only when the words before it name an existing leaf.
    pub fn parse(line: &str, tree: &Tree) -> Result<Option<Self>> {
        let words = split_words(line)?;
        let Some((op, mut path)) = words.split_first().map(|(op, rest)| (op.clone(), rest.to_vec())) else {
            return Ok(None);
        };
        let op = match op.as_str() {
            "set" => CommandOp::Set,
            "delete" => CommandOp::Delete,
            other => return Err(TreeError::parse(1, 1, format!("unknown command '{}'", other))),
        };
        if path.is_empty() {
            return Err(TreeError::parse(1, 1, format!("'{}' needs a path", op.as_str())));
        }

        let value_last = path.len() > 1 && {
            let prefix = &path[..path.len() - 1];
            match tree.reference() {
                Some(r) if r.exists(prefix) => r.is_leaf(prefix) && !r.is_valueless(prefix),
                _ => match tree.reference() {
                    Some(r) if r.exists(path.as_slice()) => false,
                    _ => tree.is_leaf(prefix) && !tree.is_valueless(prefix),
                },
            }
        };
        let value = if value_last { path.pop() } else { None };
        Ok(Some(Self {
            op,
            path: path.into_iter().collect(),
            value,
        }))
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.op.as_str())?;
        for p in &self.path {
            write!(f, " {}", quote(p))?;
        }
        if let Some(v) = &self.value {
            write!(f, " {}", quote(v))?;
        }
        Ok(())
    }
}

/// Split a command line into words, honouring double and single quotes
pub fn split_words(line: &str) -> Result<Vec<String>> {
    let mut words = Vec::new();
    let mut chars = line.trim().chars().peekable();
    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }
        let mut word = String::new();
        if c == '"' || c == '\'' {
            let delim = c;
            chars.next();
            let mut closed = false;
            while let Some(c) = chars.next() {
                match c {
                    '\\' if delim == '"' => match chars.next() {
                        Some('n') => word.push('\n'),
                        Some(e @ ('\\' | '"')) => word.push(e),
                        Some(e) => {
                            word.push('\\');
                            word.push(e);
                        }
                        None => break,
                    },
                    c if c == delim => {
                        closed = true;
                        break;
                    }
                    c => word.push(c),
                }
            }
            if !closed {
                return Err(TreeError::parse(1, 1, "unterminated quote in command"));
            }
        } else {
            while let Some(&c) = chars.peek() {
                if c.is_whitespace() {
                    break;
                }
                word.push(c);
                chars.next();
            }
        }
        words.push(word);
    }
    Ok(words)
}

fn flatten(node: &Node, path: &mut Vec<String>, out: &mut Vec<Command>) {
    if node.ephemeral {
        return;
    }
    if node.leaf {
        if node.values.is_empty() {
            out.push(Command::set(path.as_slice(), None));
        }
        for v in &node.values {
            out.push(Command::set(path.as_slice(), Some(v)));
        }
        return;
    }
    let visible = node.children.iter().filter(|c| !c.ephemeral);
    let mut any = false;
    for child in visible {
        any = true;
        path.push(child.name.clone());
        flatten(child, path, out);
        path.pop();
    }
    if !any && !path.is_empty() {
        out.push(Command::set(path.as_slice(), None));
    }
}

impl Tree {
    /// `set` commands that rebuild this tree from scratch
    pub fn to_command_list(&self) -> Vec<Command> {
        let mut out = Vec::new();
        flatten(&self.root, &mut Vec::new(), &mut out);
        out
    }

    /// Newline-terminated `set` lines
    pub fn to_commands(&self) -> String {
        self.to_command_list()
            .iter()
            .map(|c| format!("{}\n", c))
            .collect()
    }

    /// Apply one command
    ///
    /// A `set` with a value appends, unless the reference declares the leaf
    /// single-valued, in which case it replaces.
    pub fn apply_command(&mut self, cmd: &Command) -> Result<()> {
        match (cmd.op, cmd.value.as_deref()) {
            (CommandOp::Set, value) => {
                let replace = match (self.reference(), value) {
                    (Some(r), Some(_)) => {
                        r.exists(cmd.path.as_slice()) && !r.is_multi(cmd.path.as_slice())
                    }
                    _ => false,
                };
                self.set(cmd.path.as_slice(), value, replace)
            }
            (CommandOp::Delete, Some(v)) => self.delete_value(cmd.path.as_slice(), v),
            (CommandOp::Delete, None) => self.delete(cmd.path.as_slice()),
        }
    }

    pub fn apply_command_list(&mut self, cmds: &[Command]) -> Result<()> {
        cmds.iter().try_for_each(|c| self.apply_command(c))
    }

    /// Apply newline-separated command text; blank lines and `#` comments
    /// are skipped. Returns the number of commands applied.
    pub fn apply_commands(&mut self, text: &str) -> Result<usize> {
        let mut applied = 0;
        for (idx, line) in text.lines().enumerate() {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let cmd = Command::parse(trimmed, self)
                .map_err(|e| relocate(e, idx + 1))?;
            if let Some(cmd) = cmd {
                self.apply_command(&cmd)?;
                applied += 1;
            }
        }
        Ok(applied)
    }
}

fn relocate(err: TreeError, line: usize) -> TreeError {
    match err {
        TreeError::Parse { column, message, .. } => TreeError::Parse { line, column, message },
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    #[test]
    fn test_display_quotes() {
        let cmd = Command::set(&["system", "login", "banner"], Some("welcome home"));
        assert_eq!(cmd.to_string(), "set system login banner \"welcome home\"");
        let cmd = Command::delete(&["service", "ssh"], None);
        assert_eq!(cmd.to_string(), "delete service ssh");
    }

    #[test]
    fn test_to_commands() {
        let tree = parse("system {\n    host-name r1\n}\nservice {\n    ssh\n}\nempty {\n}\n").unwrap();
        assert_eq!(
            tree.to_commands(),
            "set system host-name r1\nset service ssh\nset empty\n"
        );
    }

    #[test]
    fn test_commands_rebuild_tree() {
        let tree = parse("a {\n    b 1\n    b 2\n    c\n}\n").unwrap();
        let mut rebuilt = Tree::new();
        rebuilt.apply_command_list(&tree.to_command_list()).unwrap();
        assert_eq!(rebuilt, tree);
    }

    #[test]
    fn test_apply_text_without_reference() {
        let mut tree = parse("system {\n    host-name r1\n}\n").unwrap();
        let n = tree
            .apply_commands("# rename\nset system host-name r2\n\nset service ssh\n")
            .unwrap();
        assert_eq!(n, 2);
        assert_eq!(
            tree.return_values(&["system", "host-name"]).unwrap(),
            vec!["r1", "r2"]
        );
        assert!(tree.is_valueless(&["service", "ssh"]));

        tree.apply_commands("delete system host-name r1\ndelete service").unwrap();
        assert_eq!(tree.return_value(&["system", "host-name"]).unwrap(), "r2");
        assert!(!tree.exists(&["service"]));
    }

    #[test]
    fn test_parse_errors_report_line() {
        let mut tree = Tree::new();
        match tree.apply_commands("set a\nfrobnicate a\n") {
            Err(TreeError::Parse { line, .. }) => assert_eq!(line, 2),
            other => panic!("unexpected {:?}", other),
        }
        assert!(tree.apply_commands("set \"open").is_err());
    }
}
