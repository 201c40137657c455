//! Three-way tree diff
//!
//! [`Diff::new`] walks two trees in lockstep and splits them into `sub`
//! (only in the left tree), `add` (only in the right tree) and `inter`
//! (shared). The command list derived from `sub` and `add` turns the left
//! tree into the right one.

use crate::commands::{Command, CommandOp};
use crate::reference::Reference;
use crate::render::RenderOptions;
use crate::tree::{Kind, Node, Tree};
use ahash::{AHashMap, AHashSet};
use similar::{ChangeTag, TextDiff};

#[derive(Debug, Clone)]
pub struct Diff {
    pub sub: Tree,
    pub add: Tree,
    pub inter: Tree,
    left: Tree,
    right: Tree,
}

/// Children of `node` by exact name; the first of equal names wins
fn child_index(node: Option<&Node>) -> AHashMap<&str, &Node> {
    node.map(|n| n.children.iter().rev().map(|c| (c.name.as_str(), c)).collect())
        .unwrap_or_default()
}

/// Split `a`'s and `b`'s children into the three output nodes
fn diff_children(a: &Node, b: &Node, sub: &mut Node, add: &mut Node, inter: &mut Node) {
    let in_a = child_index(Some(a));
    let in_b = child_index(Some(b));
    for ca in &a.children {
        let Some(&cb) = in_b.get(ca.name.as_str()) else {
            sub.children.push(ca.clone());
            continue;
        };
        if ca.kind() != cb.kind() {
            sub.children.push(ca.clone());
            add.children.push(cb.clone());
            continue;
        }
        if ca.leaf {
            let (s, a_only, i) = diff_values(ca, cb);
            if let Some(s) = s {
                sub.children.push(s);
            }
            if let Some(a_only) = a_only {
                add.children.push(a_only);
            }
            if let Some(i) = i {
                inter.children.push(i);
            }
            continue;
        }

        let (mut s, mut ad, mut i) = (ca.shell(), cb.shell(), ca.shell());
        diff_children(ca, cb, &mut s, &mut ad, &mut i);
        if !s.children.is_empty() {
            sub.children.push(s);
        }
        if !ad.children.is_empty() {
            add.children.push(ad);
        }
        inter.children.push(i);
    }

    for cb in &b.children {
        if !in_a.contains_key(cb.name.as_str()) {
            add.children.push(cb.clone());
        }
    }
}

/// Set-difference of leaf values; valueless leaves are wholly shared
fn diff_values(a: &Node, b: &Node) -> (Option<Node>, Option<Node>, Option<Node>) {
    if a.values.is_empty() && b.values.is_empty() {
        return (None, None, Some(a.shell()));
    }
    let in_a: AHashSet<&str> = a.values.iter().map(String::as_str).collect();
    let in_b: AHashSet<&str> = b.values.iter().map(String::as_str).collect();

    let with_values = |base: &Node, values: Vec<String>| {
        (!values.is_empty()).then(|| {
            let mut n = base.shell();
            n.values = values;
            n
        })
    };
    let sub = with_values(a, a.values.iter().filter(|v| !in_b.contains(v.as_str())).cloned().collect());
    let add = with_values(b, b.values.iter().filter(|v| !in_a.contains(v.as_str())).cloned().collect());
    let inter = with_values(a, a.values.iter().filter(|v| in_b.contains(v.as_str())).cloned().collect());
    (sub, add, inter)
}

fn merge_into(dst: &mut Node, src: &Node) {
    for v in &src.values {
        if !dst.values.contains(v) {
            dst.values.push(v.clone());
        }
    }
    dst.leaf |= src.leaf && dst.children.is_empty() && src.children.is_empty();
    dst.tag |= src.tag;
    if dst.comment.is_none() {
        dst.comment = src.comment.clone();
    }
    for child in &src.children {
        match dst.child_mut_exact(&child.name) {
            Some(existing) => merge_into(existing, child),
            None => dst.children.push(child.clone()),
        }
    }
}

/// Merge two trees; nodes of `x` come first
pub fn union(x: &Tree, y: &Tree) -> Tree {
    let mut root = x.root.clone();
    merge_into(&mut root, &y.root);
    Tree::from_root(root, x.reference.clone().or_else(|| y.reference.clone()))
}

struct Pending {
    priority: u32,
    command: Command,
}

impl Diff {
    pub fn new(a: &Tree, b: &Tree) -> Self {
        let reference = a.reference.clone().or_else(|| b.reference.clone());
        let (mut sub, mut add, mut inter) = (Node::default(), Node::default(), Node::default());
        diff_children(&a.root, &b.root, &mut sub, &mut add, &mut inter);
        Self {
            sub: Tree::from_root(sub, reference.clone()),
            add: Tree::from_root(add, reference.clone()),
            inter: Tree::from_root(inter, reference),
            left: a.clone(),
            right: b.clone(),
        }
    }

    /// True when both trees are equal
    pub fn is_empty(&self) -> bool {
        self.sub.is_empty() && self.add.is_empty()
    }

    /// True when anything at or below `path` was added or removed
    pub fn is_node_changed<P: AsRef<str>>(&self, path: &[P]) -> bool {
        self.sub.exists(path) || self.add.exists(path)
    }

    pub fn left(&self) -> &Tree {
        &self.left
    }

    pub fn right(&self) -> &Tree {
        &self.right
    }

    /// Ordered command list using the reference attached to the trees
    pub fn commands(&self) -> Vec<Command> {
        let reference = self.left.reference.clone().or_else(|| self.right.reference.clone());
        self.commands_with(reference.as_deref())
    }

    /// Ordered command list, prioritised by `reference`
    ///
    /// Commands sort by priority, then deletes before sets. Deletes run
    /// deepest-first, sets shallowest-first. A set below a replaced path is
    /// never scheduled before that path's delete.
    pub fn commands_with(&self, reference: Option<&Reference>) -> Vec<Command> {
        let prio = |path: &[String]| reference.and_then(|r| r.priority(path)).unwrap_or(0);
        let mut deletes = Vec::new();
        let mut replaced: Vec<(Vec<String>, u32)> = Vec::new();
        walk_sub(&self.sub.root, Some(&self.right.root), &mut Vec::new(), &prio, &mut deletes, &mut replaced);

        let mut sets = Vec::new();
        walk_add(&self.add.root, Some(&self.left.root), &mut Vec::new(), &prio, &mut sets);
        for pending in &mut sets {
            for (path, floor) in &replaced {
                if pending.command.path.starts_with(path) {
                    pending.priority = pending.priority.max(*floor);
                }
            }
        }

        let mut all: Vec<Pending> = deletes.into_iter().chain(sets).collect();
        all.sort_by(|x, y| {
            x.priority
                .cmp(&y.priority)
                .then(x.command.op.cmp(&y.command.op))
                .then_with(|| match x.command.op {
                    CommandOp::Delete => y.command.path.cmp(&x.command.path),
                    CommandOp::Set => x.command.path.cmp(&y.command.path),
                })
        });
        all.into_iter().map(|p| p.command).collect()
    }

    /// Newline-terminated command text
    pub fn to_commands(&self) -> String {
        render_commands(&self.commands())
    }

    /// Unified line diff of the rendered trees; empty when nothing changed
    pub fn show_diff(&self) -> String {
        let old = self.left.render(&RenderOptions::default());
        let new = self.right.render(&RenderOptions::default());
        if old == new {
            return String::new();
        }
        let diff = TextDiff::from_lines(&old, &new);
        let mut out = String::new();
        for group in diff.grouped_ops(3) {
            let (Some(first), Some(last)) = (group.first(), group.last()) else {
                continue;
            };
            let old_range = first.old_range().start..last.old_range().end;
            let new_range = first.new_range().start..last.new_range().end;
            out.push_str(&format!(
                "@@ -{},{} +{},{} @@\n",
                old_range.start + 1,
                old_range.len(),
                new_range.start + 1,
                new_range.len()
            ));
            for op in &group {
                for change in diff.iter_changes(op) {
                    let sign = match change.tag() {
                        ChangeTag::Delete => '-',
                        ChangeTag::Insert => '+',
                        ChangeTag::Equal => ' ',
                    };
                    out.push(sign);
                    out.push_str(change.value());
                    if change.missing_newline() {
                        out.push('\n');
                    }
                }
            }
        }
        out
    }

    /// Command text when `commands` is set, otherwise the line diff
    pub fn render(&self, commands: bool) -> String {
        if commands {
            self.to_commands()
        } else {
            self.show_diff()
        }
    }
}

pub fn render_commands(commands: &[Command]) -> String {
    commands.iter().map(|c| format!("{}\n", c)).collect()
}

fn walk_sub(
    node: &Node,
    right: Option<&Node>,
    path: &mut Vec<String>,
    prio: &dyn Fn(&[String]) -> u32,
    out: &mut Vec<Pending>,
    replaced: &mut Vec<(Vec<String>, u32)>,
) {
    let in_right = child_index(right);
    for child in &node.children {
        path.push(child.name.clone());
        let priority = prio(path);
        match in_right.get(child.name.as_str()).copied() {
            None => out.push(Pending {
                priority,
                command: Command::delete(path.as_slice(), None),
            }),
            Some(other) if other.kind() != child.kind() => {
                out.push(Pending {
                    priority,
                    command: Command::delete(path.as_slice(), None),
                });
                replaced.push((path.clone(), priority));
            }
            Some(_) if child.leaf => {
                for v in &child.values {
                    out.push(Pending {
                        priority,
                        command: Command::delete(path.as_slice(), Some(v)),
                    });
                }
            }
            Some(other) => walk_sub(child, Some(other), path, prio, out, replaced),
        }
        path.pop();
    }
}

fn walk_add(
    node: &Node,
    left: Option<&Node>,
    path: &mut Vec<String>,
    prio: &dyn Fn(&[String]) -> u32,
    out: &mut Vec<Pending>,
) {
    let in_left = child_index(left);
    for child in &node.children {
        path.push(child.name.clone());
        match in_left.get(child.name.as_str()).copied() {
            Some(existing) if existing.kind() == child.kind() => {
                if child.leaf {
                    let priority = prio(path);
                    for v in &child.values {
                        out.push(Pending {
                            priority,
                            command: Command::set(path.as_slice(), Some(v)),
                        });
                    }
                } else {
                    walk_add(child, Some(existing), path, prio, out);
                }
            }
            _ => emit_subtree(child, path, prio, out),
        }
        path.pop();
    }
}

/// `set` commands creating `node` and everything below it
fn emit_subtree(node: &Node, path: &mut Vec<String>, prio: &dyn Fn(&[String]) -> u32, out: &mut Vec<Pending>) {
    let priority = prio(path);
    match node.kind() {
        Kind::Valueless => out.push(Pending {
            priority,
            command: Command::set(path.as_slice(), None),
        }),
        Kind::Leaf => {
            for v in &node.values {
                out.push(Pending {
                    priority,
                    command: Command::set(path.as_slice(), Some(v)),
                });
            }
        }
        Kind::Internal | Kind::Tag if node.children.is_empty() => out.push(Pending {
            priority,
            command: Command::set(path.as_slice(), None),
        }),
        Kind::Internal | Kind::Tag => {
            for child in &node.children {
                path.push(child.name.clone());
                emit_subtree(child, path, prio, out);
                path.pop();
            }
        }
    }
}
