//! Text and JSON rendering
//!
//! The text form is the one accepted by [`crate::parser`]: four-space
//! indentation, one statement per line, every line newline-terminated.
//! Ephemeral nodes are never rendered.

use crate::error::{join_path, Result, TreeError};
use crate::tree::{mangle, Node, Tree};
use crate::version::VersionInfo;
use serde_json::{Map, Value};
use std::borrow::Cow;
use std::fmt;

const INDENT: &str = "    ";

/// Knobs for [`Tree::render`]
#[derive(Debug, Clone, Default)]
pub struct RenderOptions {
    /// Sort children and values lexically, giving a canonical form
    pub ordered_values: bool,
    /// Append a version trailer
    pub version: Option<VersionInfo>,
}

impl RenderOptions {
    pub fn ordered() -> Self {
        Self {
            ordered_values: true,
            version: None,
        }
    }
}

/// Quote a token when the parser would otherwise split or misread it
pub fn quote(token: &str) -> Cow<'_, str> {
    let needs_quotes = token.is_empty()
        || token.starts_with("//")
        || token.starts_with("/*")
        || token
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '"' | '{' | '}' | ';' | '\''));
    if !needs_quotes {
        return Cow::Borrowed(token);
    }
    let mut out = String::with_capacity(token.len() + 2);
    out.push('"');
    for c in token.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            c => out.push(c),
        }
    }
    out.push('"');
    Cow::Owned(out)
}

fn visible<'a>(nodes: &'a [Node], ordered: bool) -> Vec<&'a Node> {
    let mut out: Vec<&Node> = nodes.iter().filter(|n| !n.ephemeral).collect();
    if ordered {
        out.sort_by(|a, b| a.name.cmp(&b.name));
    }
    out
}

fn push_comment(out: &mut String, depth: usize, comment: Option<&str>) {
    if let Some(c) = comment {
        out.push_str(&INDENT.repeat(depth));
        out.push_str("/* ");
        out.push_str(c);
        out.push_str(" */\n");
    }
}

fn render_node(out: &mut String, node: &Node, depth: usize, ordered: bool) {
    let pad = INDENT.repeat(depth);
    let name = quote(&node.name);

    if node.tag {
        let instances = visible(&node.children, ordered);
        // Header block `name "" { }` carries the tag node's own comment and
        // keeps a tag node without instances a tag node
        if instances.is_empty() || node.comment.is_some() {
            push_comment(out, depth, node.comment());
            out.push_str(&format!("{}{} \"\" {{\n{}}}\n", pad, name, pad));
        }
        for inst in instances {
            push_comment(out, depth, inst.comment());
            out.push_str(&format!("{}{} {} {{\n", pad, name, quote(&inst.name)));
            for child in visible(&inst.children, ordered) {
                render_node(out, child, depth + 1, ordered);
            }
            out.push_str(&format!("{}}}\n", pad));
        }
        return;
    }

    push_comment(out, depth, node.comment());
    if node.leaf {
        if node.values.is_empty() {
            out.push_str(&format!("{}{}\n", pad, name));
            return;
        }
        let mut values: Vec<&String> = node.values.iter().collect();
        if ordered {
            values.sort();
        }
        for v in values {
            out.push_str(&format!("{}{} {}\n", pad, name, quote(v)));
        }
    } else {
        out.push_str(&format!("{}{} {{\n", pad, name));
        for child in visible(&node.children, ordered) {
            render_node(out, child, depth + 1, ordered);
        }
        out.push_str(&format!("{}}}\n", pad));
    }
}

impl Tree {
    /// Render the text form
    pub fn render(&self, opts: &RenderOptions) -> String {
        let mut out = String::new();
        for child in visible(&self.root.children, opts.ordered_values) {
            render_node(&mut out, child, 0, opts.ordered_values);
        }
        if let Some(version) = &opts.version {
            out.push_str(&version.footer());
        }
        out
    }

    /// Canonical text: children and values sorted
    pub fn to_string_ordered(&self) -> String {
        self.render(&RenderOptions::ordered())
    }

    fn json_is_multi(&self, path: &[String], node: &Node) -> bool {
        match self.reference.as_deref() {
            Some(r) if r.exists(path) => r.is_multi(path),
            _ => node.values.len() > 1,
        }
    }

    fn node_json(&self, node: &Node, path: &mut Vec<String>, mangle_keys: bool) -> Value {
        if node.leaf {
            if node.values.is_empty() {
                return Value::Object(Map::new());
            }
            if self.json_is_multi(path, node) {
                return Value::Array(node.values.iter().cloned().map(Value::String).collect());
            }
            return Value::String(node.values[0].clone());
        }

        let mut map = Map::new();
        for child in node.children.iter().filter(|c| !c.ephemeral) {
            path.push(child.name.clone());
            let key = if mangle_keys && !node.tag {
                mangle(&child.name)
            } else {
                child.name.clone()
            };
            let value = self.node_json(child, path, mangle_keys);
            path.pop();
            map.insert(key, value);
        }
        Value::Object(map)
    }

    /// JSON object mirroring the tree
    ///
    /// Internal and tag nodes become objects, multi leaves arrays, single
    /// leaves strings and valueless leaves empty objects.
    pub fn to_json_value(&self) -> Value {
        self.node_json(&self.root, &mut Vec::new(), false)
    }

    /// Compact JSON text, keys in insertion order
    pub fn to_json(&self) -> String {
        self.to_json_value().to_string()
    }

    /// Nested dictionary of the subtree at `path`
    ///
    /// With `mangle_keys`, hyphens in schema-named keys become underscores;
    /// tag instance keys are left as written.
    pub fn to_dict<P: AsRef<str>>(&self, path: &[P], mangle_keys: bool) -> Result<Value> {
        let node = self
            .lookup(path)
            .ok_or_else(|| TreeError::NoSuchPath(join_path(path)))?;
        let mut owned: Vec<String> = path.iter().map(|p| p.as_ref().to_string()).collect();
        Ok(self.node_json(node, &mut owned, mangle_keys))
    }
}

impl fmt::Display for Tree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render(&RenderOptions::default()))
    }
}
