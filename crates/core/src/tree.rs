//! In-memory configuration tree
//!
//! A [`Tree`] is a rooted tree of [`Node`]s. Every node is exactly one of:
//! - internal (children, no values)
//! - leaf (one or more values)
//! - valueless leaf (neither values nor children)
//! - tag (children are tag instances keyed by name)
//!
//! Paths are slices of names. Lookups accept underscored spellings of
//! hyphenated names, except below tag nodes where instance keys are taken
//! verbatim.

use crate::error::{join_path, Result, TreeError};
use crate::reference::Reference;
use std::sync::Arc;
use tracing::debug;

/// Structural kind of a node, derived from its flags and contents
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Internal,
    Leaf,
    Valueless,
    Tag,
}

/// A vertex of the configuration tree
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Node {
    pub(crate) name: String,
    pub(crate) values: Vec<String>,
    pub(crate) children: Vec<Node>,
    pub(crate) comment: Option<String>,
    pub(crate) tag: bool,
    pub(crate) leaf: bool,
    pub(crate) ephemeral: bool,
}

impl Node {
    /// Create an empty internal node
    pub fn internal(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Create a leaf node; an empty value list makes it valueless
    pub fn leaf(name: impl Into<String>, values: Vec<String>) -> Self {
        Self {
            name: name.into(),
            values,
            leaf: true,
            ..Default::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn values(&self) -> &[String] {
        &self.values
    }

    pub fn children(&self) -> &[Node] {
        &self.children
    }

    pub fn comment(&self) -> Option<&str> {
        self.comment.as_deref()
    }

    pub fn is_tag(&self) -> bool {
        self.tag
    }

    /// True for leaves with values and valueless leaves
    pub fn is_leaf(&self) -> bool {
        self.leaf
    }

    pub fn is_valueless(&self) -> bool {
        self.leaf && self.values.is_empty()
    }

    pub fn is_ephemeral(&self) -> bool {
        self.ephemeral
    }

    pub fn kind(&self) -> Kind {
        if self.tag {
            Kind::Tag
        } else if self.leaf && self.values.is_empty() {
            Kind::Valueless
        } else if self.leaf {
            Kind::Leaf
        } else {
            Kind::Internal
        }
    }

    /// Shallow copy: name and flags, no values or children
    pub(crate) fn shell(&self) -> Self {
        Self {
            name: self.name.clone(),
            values: Vec::new(),
            children: Vec::new(),
            comment: self.comment.clone(),
            tag: self.tag,
            leaf: self.leaf,
            ephemeral: self.ephemeral,
        }
    }

    pub(crate) fn child_mut_exact(&mut self, name: &str) -> Option<&mut Node> {
        self.children.iter_mut().find(|c| c.name == name)
    }

    /// Position of a child, honouring hyphen/underscore equivalence unless
    /// this node is a tag node
    pub(crate) fn child_position(&self, name: &str) -> Option<usize> {
        if let Some(pos) = self.children.iter().position(|c| c.name == name) {
            return Some(pos);
        }
        if self.tag {
            return None;
        }
        let wanted = mangle(name);
        self.children.iter().position(|c| mangle(&c.name) == wanted)
    }

    pub(crate) fn child(&self, name: &str) -> Option<&Node> {
        self.child_position(name).map(|i| &self.children[i])
    }

    pub(crate) fn child_mut(&mut self, name: &str) -> Option<&mut Node> {
        match self.child_position(name) {
            Some(i) => Some(&mut self.children[i]),
            None => None,
        }
    }

    /// True when the node carries neither values nor children
    pub(crate) fn is_bare(&self) -> bool {
        self.values.is_empty() && self.children.is_empty()
    }
}

/// Hyphens and underscores are interchangeable for schema-named nodes
pub(crate) fn mangle(name: &str) -> String {
    name.replace('-', "_")
}

/// Hierarchical configuration tree
///
/// Trees are value objects: cloning yields an independent copy. An optional
/// [`Reference`] attached to the tree is used as a schema hint when nodes
/// are created (tag marking, canonical spelling, single-valued leaves).
#[derive(Debug, Clone, Default)]
pub struct Tree {
    pub(crate) root: Node,
    pub(crate) reference: Option<Arc<Reference>>,
}

impl PartialEq for Tree {
    fn eq(&self, other: &Self) -> bool {
        self.root == other.root
    }
}

impl Eq for Tree {}

impl Tree {
    /// Create a new empty tree
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a schema reference used as a hint for later mutations
    pub fn with_reference(mut self, reference: Arc<Reference>) -> Self {
        self.reference = Some(reference);
        self
    }

    pub fn set_reference(&mut self, reference: Option<Arc<Reference>>) {
        self.reference = reference;
    }

    pub fn reference(&self) -> Option<&Arc<Reference>> {
        self.reference.as_ref()
    }

    pub fn root(&self) -> &Node {
        &self.root
    }

    /// True when the tree has no top-level nodes
    pub fn is_empty(&self) -> bool {
        self.root.children.is_empty()
    }

    /// Structural clone, independent of the original
    pub fn deep_copy(&self) -> Tree {
        self.clone()
    }

    pub(crate) fn from_root(root: Node, reference: Option<Arc<Reference>>) -> Self {
        Self { root, reference }
    }

    pub(crate) fn lookup<P: AsRef<str>>(&self, path: &[P]) -> Option<&Node> {
        let mut node = &self.root;
        for name in path {
            node = node.child(name.as_ref())?;
        }
        Some(node)
    }

    fn lookup_mut<P: AsRef<str>>(&mut self, path: &[P]) -> Option<&mut Node> {
        let mut node = &mut self.root;
        for name in path {
            node = node.child_mut(name.as_ref())?;
        }
        Some(node)
    }

    fn require<P: AsRef<str>>(&self, path: &[P]) -> Result<&Node> {
        self.lookup(path)
            .ok_or_else(|| TreeError::NoSuchPath(join_path(path)))
    }

    fn require_mut<P: AsRef<str>>(&mut self, path: &[P]) -> Result<&mut Node> {
        let joined = join_path(path);
        self.lookup_mut(path).ok_or(TreeError::NoSuchPath(joined))
    }

    /// True iff the path resolves to a node
    pub fn exists<P: AsRef<str>>(&self, path: &[P]) -> bool {
        self.lookup(path).is_some()
    }

    pub fn is_leaf<P: AsRef<str>>(&self, path: &[P]) -> bool {
        self.lookup(path).map(Node::is_leaf).unwrap_or(false)
    }

    pub fn is_tag<P: AsRef<str>>(&self, path: &[P]) -> bool {
        self.lookup(path).map(Node::is_tag).unwrap_or(false)
    }

    pub fn is_valueless<P: AsRef<str>>(&self, path: &[P]) -> bool {
        self.lookup(path).map(Node::is_valueless).unwrap_or(false)
    }

    pub fn is_ephemeral<P: AsRef<str>>(&self, path: &[P]) -> bool {
        self.lookup(path).map(Node::is_ephemeral).unwrap_or(false)
    }

    /// Multi-valued per the attached reference, or by carrying more than one
    /// value when no reference knows the path
    pub fn is_multi<P: AsRef<str>>(&self, path: &[P]) -> bool {
        if let Some(reference) = &self.reference {
            if reference.exists(path) {
                return reference.is_multi(path);
            }
        }
        self.lookup(path)
            .map(|n| n.leaf && n.values.len() > 1)
            .unwrap_or(false)
    }

    /// Children names in insertion order
    pub fn list_children<P: AsRef<str>>(&self, path: &[P]) -> Result<Vec<String>> {
        let node = self.require(path)?;
        if node.leaf {
            return Err(TreeError::NotInternal(join_path(path)));
        }
        Ok(node.children.iter().map(|c| c.name.clone()).collect())
    }

    /// The single value of a leaf
    pub fn return_value<P: AsRef<str>>(&self, path: &[P]) -> Result<String> {
        let node = self.require(path)?;
        if !node.leaf || node.values.is_empty() {
            return Err(TreeError::NotLeaf(join_path(path)));
        }
        if node.values.len() > 1 {
            return Err(TreeError::MultipleValues(join_path(path)));
        }
        Ok(node.values[0].clone())
    }

    /// All values of a leaf, in insertion order
    pub fn return_values<P: AsRef<str>>(&self, path: &[P]) -> Result<Vec<String>> {
        let node = self.require(path)?;
        if !node.leaf {
            return Err(TreeError::NotLeaf(join_path(path)));
        }
        Ok(node.values.clone())
    }

    /// Create the path (and any missing intermediate nodes), optionally
    /// setting a value
    ///
    /// With `replace` the value replaces existing values; without it the
    /// value is appended (multi semantics). Leaf values form an ordered set:
    /// appending a value the leaf already holds is a no-op, so diffs can
    /// treat values as sets. The tree is left untouched when an error is
    /// returned.
    pub fn set<P: AsRef<str>>(
        &mut self,
        path: &[P],
        value: Option<&str>,
        replace: bool,
    ) -> Result<()> {
        if path.is_empty() {
            return Err(TreeError::schema(path, "cannot set the root node"));
        }
        if path.iter().any(|p| p.as_ref().is_empty()) {
            return Err(TreeError::schema(path, "node names cannot be empty"));
        }
        self.check_set(path, value, replace)?;

        let reference = self.reference.clone();
        let mut node = &mut self.root;
        let last = path.len() - 1;

        for (depth, name) in path.iter().enumerate() {
            let name = name.as_ref();
            let parent_is_tag = node.tag;
            let idx = match node.child_position(name) {
                Some(i) => i,
                None => {
                    let prefix = &path[..=depth];
                    let stored = reference
                        .as_deref()
                        .and_then(|r| r.canonical_name(&path[..depth], name))
                        .unwrap_or_else(|| name.to_string());
                    let mut child = Node::internal(stored);
                    if depth == last {
                        child.leaf = terminal_is_leaf(reference.as_deref(), prefix, value, parent_is_tag);
                    }
                    if !child.leaf {
                        child.tag = reference
                            .as_deref()
                            .map(|r| r.is_tag(prefix))
                            .unwrap_or(false);
                    }
                    debug!(path = %join_path(prefix), "creating node");
                    node.children.push(child);
                    node.children.len() - 1
                }
            };
            node = &mut node.children[idx];
        }

        if let Some(value) = value {
            node.leaf = true;
            if replace {
                node.values = vec![value.to_string()];
            } else if !node.values.iter().any(|v| v == value) {
                node.values.push(value.to_string());
            }
        }
        Ok(())
    }

    /// Validate a `set` before mutating anything
    fn check_set<P: AsRef<str>>(&self, path: &[P], value: Option<&str>, replace: bool) -> Result<()> {
        let mut node = &self.root;
        for (depth, name) in path.iter().enumerate() {
            let is_last = depth + 1 == path.len();
            match node.child(name.as_ref()) {
                Some(child) => {
                    if !is_last && child.leaf {
                        return Err(TreeError::NotInternal(join_path(&path[..=depth])));
                    }
                    if is_last && value.is_some() && !child.children.is_empty() {
                        return Err(TreeError::NotLeaf(join_path(path)));
                    }
                    node = child;
                }
                None => {
                    if is_last && value.is_some() && node.tag {
                        return Err(TreeError::schema(path, "tag instances cannot carry a value"));
                    }
                    break;
                }
            }
        }

        if let (Some(reference), Some(value)) = (self.reference.as_deref(), value) {
            if reference.exists(path) {
                if !reference.is_leaf(path) || reference.is_valueless(path) {
                    return Err(TreeError::schema(path, "node does not accept a value"));
                }
                if !replace && !reference.is_multi(path) {
                    let existing = self.lookup(path).map(|n| n.values.as_slice()).unwrap_or(&[]);
                    if existing.iter().any(|v| v != value) {
                        return Err(TreeError::schema(path, "leaf is single-valued"));
                    }
                }
            }
        }
        Ok(())
    }

    /// Convenience for `set(path, Some(value), true)`
    pub fn set_value<P: AsRef<str>>(&mut self, path: &[P], value: &str) -> Result<()> {
        self.set(path, Some(value), true)
    }

    /// Convenience for `set(path, Some(value), false)`
    pub fn add_value<P: AsRef<str>>(&mut self, path: &[P], value: &str) -> Result<()> {
        self.set(path, Some(value), false)
    }

    /// Remove the subtree rooted at `path`; an empty path clears the tree
    pub fn delete<P: AsRef<str>>(&mut self, path: &[P]) -> Result<()> {
        let Some((name, parent)) = path.split_last() else {
            self.root.children.clear();
            return Ok(());
        };
        let joined = join_path(path);
        let parent = self.require_mut(parent)?;
        let idx = parent
            .child_position(name.as_ref())
            .ok_or(TreeError::NoSuchPath(joined))?;
        parent.children.remove(idx);
        Ok(())
    }

    /// Remove one value from a leaf; the leaf goes away with its last value
    pub fn delete_value<P: AsRef<str>>(&mut self, path: &[P], value: &str) -> Result<()> {
        let node = self.require(path)?;
        if !node.leaf {
            return Err(TreeError::NotLeaf(join_path(path)));
        }
        if !node.values.iter().any(|v| v == value) {
            return Err(TreeError::NoSuchPath(format!("{} {}", join_path(path), value)));
        }
        let emptied = node.values.iter().all(|v| v == value);
        if emptied {
            return self.delete(path);
        }
        let node = self.require_mut(path)?;
        node.values.retain(|v| v != value);
        Ok(())
    }

    /// Mark `path` as a tag node
    ///
    /// Children of an internal node become tag instances; the values of a
    /// leaf become empty tag instances.
    pub fn set_tag<P: AsRef<str>>(&mut self, path: &[P]) -> Result<()> {
        if path.is_empty() {
            return Err(TreeError::schema(path, "the root node cannot be a tag node"));
        }
        let node = self.require_mut(path)?;
        if node.leaf {
            let values = std::mem::take(&mut node.values);
            node.leaf = false;
            node.children = values.into_iter().map(Node::internal).collect();
        }
        node.tag = true;
        Ok(())
    }

    /// Attach or clear a comment; surrounding whitespace is dropped as the
    /// parser would drop it
    pub fn set_comment<P: AsRef<str>>(&mut self, path: &[P], comment: Option<&str>) -> Result<()> {
        if path.is_empty() {
            return Err(TreeError::schema(path, "the root node cannot carry a comment"));
        }
        if comment.is_some_and(|c| c.contains("*/")) {
            return Err(TreeError::schema(path, "comments cannot contain '*/'"));
        }
        let node = self.require_mut(path)?;
        node.comment = comment.map(|c| c.trim().to_string());
        Ok(())
    }

    pub fn get_comment<P: AsRef<str>>(&self, path: &[P]) -> Result<Option<String>> {
        Ok(self.require(path)?.comment.clone())
    }

    /// Mark a subtree as in-memory only
    pub fn set_ephemeral<P: AsRef<str>>(&mut self, path: &[P], ephemeral: bool) -> Result<()> {
        self.require_mut(path)?.ephemeral = ephemeral;
        Ok(())
    }

    /// Rename the last component of `path`
    pub fn rename<P: AsRef<str>>(&mut self, path: &[P], new_name: &str) -> Result<()> {
        let Some((name, parent_path)) = path.split_last() else {
            return Err(TreeError::schema(path, "cannot rename the root node"));
        };
        if new_name.is_empty() {
            return Err(TreeError::schema(path, "node names cannot be empty"));
        }
        let joined = join_path(path);
        let parent = self.require_mut(parent_path)?;
        let idx = parent
            .child_position(name.as_ref())
            .ok_or(TreeError::NoSuchPath(joined))?;
        if parent.children.iter().enumerate().any(|(i, c)| i != idx && c.name == new_name) {
            return Err(TreeError::schema(path, format!("sibling '{}' already exists", new_name)));
        }
        parent.children[idx].name = new_name.to_string();
        Ok(())
    }

    /// Duplicate the subtree at `src` as `dst`; the parent of `dst` must exist
    pub fn copy<P: AsRef<str>, Q: AsRef<str>>(&mut self, src: &[P], dst: &[Q]) -> Result<()> {
        let Some((new_name, dst_parent)) = dst.split_last() else {
            return Err(TreeError::schema(dst, "cannot copy onto the root node"));
        };
        if new_name.as_ref().is_empty() {
            return Err(TreeError::schema(dst, "node names cannot be empty"));
        }
        let mut node = self.require(src)?.clone();
        if self.exists(dst) {
            return Err(TreeError::schema(dst, "destination already exists"));
        }
        node.name = new_name.as_ref().to_string();
        self.require_mut(dst_parent)?.children.push(node);
        Ok(())
    }

    /// New tree whose top-level nodes are the children of `path`
    pub fn get_subtree<P: AsRef<str>>(&self, path: &[P]) -> Result<Tree> {
        let node = self.require(path)?;
        if node.leaf {
            return Err(TreeError::NotInternal(join_path(path)));
        }
        let mut root = Node::default();
        root.children = node.children.clone();
        Ok(Tree::from_root(root, self.reference.clone()))
    }

    pub(crate) fn root_mut(&mut self) -> &mut Node {
        &mut self.root
    }
}

/// Decide whether a freshly created terminal node is a leaf
fn terminal_is_leaf<P: AsRef<str>>(
    reference: Option<&Reference>,
    path: &[P],
    value: Option<&str>,
    parent_is_tag: bool,
) -> bool {
    if value.is_some() {
        return true;
    }
    if parent_is_tag {
        return false;
    }
    match reference {
        Some(r) if r.exists(path) => r.is_leaf(path),
        _ => true,
    }
}
