//! Read-only schema reference
//!
//! The reference describes which paths exist, their kinds, defaults, and
//! the owner/priority attributes used to order commit work. It is loaded
//! from JSON:
//!
//! ```json
//! {
//!   "component_version": {"system": 26},
//!   "children": {
//!     "system": {
//!       "kind": "internal",
//!       "owner": "system_config",
//!       "priority": 100,
//!       "children": {"host-name": {"kind": "leaf", "default": "vyos"}}
//!     }
//!   }
//! }
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum ReferenceError {
    #[error("failed to read reference {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed reference: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Internal,
    Leaf,
    LeafMulti,
    Valueless,
    Tag,
}

/// Default value as written in the reference
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DefaultValue {
    Single(String),
    Multi(Vec<String>),
}

/// Schema entry for one node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeMeta {
    pub kind: NodeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<DefaultValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<u32>,
    #[serde(default)]
    pub no_tag_node_value_mangle: bool,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub children: BTreeMap<String, NodeMeta>,
}

impl NodeMeta {
    fn is_leaf_kind(&self) -> bool {
        matches!(self.kind, NodeKind::Leaf | NodeKind::LeafMulti | NodeKind::Valueless)
    }

    /// Child by name, accepting the underscored spelling of hyphenated names
    fn child(&self, name: &str) -> Option<(&String, &NodeMeta)> {
        self.children.get_key_value(name).or_else(|| {
            let wanted = name.replace('-', "_");
            self.children
                .iter()
                .find(|(k, _)| k.replace('-', "_") == wanted)
        })
    }

    fn default_json(&self) -> Option<Value> {
        let default = self.default.as_ref()?;
        Some(match (default, self.kind) {
            (DefaultValue::Single(s), NodeKind::LeafMulti) => {
                Value::Array(s.split_whitespace().map(|v| Value::String(v.to_string())).collect())
            }
            (DefaultValue::Single(s), _) => Value::String(s.clone()),
            (DefaultValue::Multi(v), _) => Value::Array(v.iter().cloned().map(Value::String).collect()),
        })
    }
}

/// `(path, owner, priority)` row of the priority table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriorityEntry {
    pub path: Vec<String>,
    pub owner: String,
    pub priority: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ReferenceFile {
    #[serde(default)]
    component_version: BTreeMap<String, u32>,
    #[serde(default)]
    children: BTreeMap<String, NodeMeta>,
}

/// Where a path lands in the schema
struct Resolved<'a> {
    meta: &'a NodeMeta,
    /// The last path component was a tag instance key
    on_tag_value: bool,
    priority: Option<u32>,
    owner: Option<&'a str>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    root: NodeMeta,
    component_version: BTreeMap<String, u32>,
}

impl Reference {
    pub fn from_json(text: &str) -> Result<Self, ReferenceError> {
        let file: ReferenceFile = serde_json::from_str(text)?;
        Ok(Self {
            root: NodeMeta {
                kind: NodeKind::Internal,
                default: None,
                owner: None,
                priority: None,
                no_tag_node_value_mangle: false,
                children: file.children,
            },
            component_version: file.component_version,
        })
    }

    pub fn load(path: &Path) -> Result<Self, ReferenceError> {
        let text = std::fs::read_to_string(path).map_err(|source| ReferenceError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text)
    }

    /// Target version of every component
    pub fn component_version(&self) -> &BTreeMap<String, u32> {
        &self.component_version
    }

    /// Walk the schema; a component following a tag node is its instance key
    fn resolve<P: AsRef<str>>(&self, path: &[P]) -> Option<Resolved<'_>> {
        let mut node = &self.root;
        let mut priority = None;
        let mut owner = None;
        let mut on_tag_value = false;
        let mut i = 0;
        while i < path.len() {
            let (_, child) = node.child(path[i].as_ref())?;
            node = child;
            priority = node.priority.or(priority);
            owner = node.owner.as_deref().or(owner);
            on_tag_value = false;
            i += 1;
            if node.kind == NodeKind::Tag && i < path.len() {
                on_tag_value = true;
                i += 1;
            }
        }
        Some(Resolved {
            meta: node,
            on_tag_value,
            priority,
            owner,
        })
    }

    pub fn exists<P: AsRef<str>>(&self, path: &[P]) -> bool {
        self.resolve(path).is_some()
    }

    /// Schema entry of `path`; a tag instance path yields its tag node
    pub fn get<P: AsRef<str>>(&self, path: &[P]) -> Option<&NodeMeta> {
        self.resolve(path).map(|r| r.meta)
    }

    pub fn is_tag<P: AsRef<str>>(&self, path: &[P]) -> bool {
        self.resolve(path)
            .map(|r| r.meta.kind == NodeKind::Tag && !r.on_tag_value)
            .unwrap_or(false)
    }

    /// True when the last component is a tag instance key
    pub fn is_tag_value<P: AsRef<str>>(&self, path: &[P]) -> bool {
        self.resolve(path).map(|r| r.on_tag_value).unwrap_or(false)
    }

    pub fn is_leaf<P: AsRef<str>>(&self, path: &[P]) -> bool {
        self.resolve(path)
            .map(|r| !r.on_tag_value && r.meta.is_leaf_kind())
            .unwrap_or(false)
    }

    pub fn is_multi<P: AsRef<str>>(&self, path: &[P]) -> bool {
        self.resolve(path)
            .map(|r| !r.on_tag_value && r.meta.kind == NodeKind::LeafMulti)
            .unwrap_or(false)
    }

    pub fn is_valueless<P: AsRef<str>>(&self, path: &[P]) -> bool {
        self.resolve(path)
            .map(|r| !r.on_tag_value && r.meta.kind == NodeKind::Valueless)
            .unwrap_or(false)
    }

    /// Priority of `path`, inherited from the nearest ancestor declaring one
    pub fn priority<P: AsRef<str>>(&self, path: &[P]) -> Option<u32> {
        self.resolve(path).and_then(|r| r.priority)
    }

    /// Owner of `path`, inherited from the nearest ancestor declaring one
    pub fn owner<P: AsRef<str>>(&self, path: &[P]) -> Option<&str> {
        self.resolve(path).and_then(|r| r.owner)
    }

    /// Schema spelling of `name` below `parent`, unless `name` is a tag
    /// instance key
    pub fn canonical_name<P: AsRef<str>>(&self, parent: &[P], name: &str) -> Option<String> {
        let resolved = self.resolve(parent)?;
        if resolved.meta.kind == NodeKind::Tag && !resolved.on_tag_value {
            return None;
        }
        resolved.meta.child(name).map(|(k, _)| k.clone())
    }

    /// Names the schema allows below `path`
    pub fn child_names<P: AsRef<str>>(&self, path: &[P]) -> Vec<String> {
        match self.resolve(path) {
            Some(r) if r.meta.kind != NodeKind::Tag || r.on_tag_value => {
                r.meta.children.keys().cloned().collect()
            }
            _ => Vec::new(),
        }
    }

    /// Defaults of the schema subtree at `path`
    ///
    /// Keys are underscored. Tag nodes are not descended since their
    /// instances are not known. Unless `get_first_key` is set (or `path` is
    /// empty), the result is wrapped in an object keyed by the last path
    /// component.
    pub fn get_defaults<P: AsRef<str>>(&self, path: &[P], recursive: bool, get_first_key: bool) -> Value {
        let empty = Value::Object(Map::new());
        if self.is_tag(path) {
            return empty;
        }
        let Some(resolved) = self.resolve(path) else {
            return empty;
        };
        let meta = resolved.meta;
        let last = path.last().map(|p| {
            if resolved.on_tag_value {
                p.as_ref().to_string()
            } else {
                mangle_key(p.as_ref())
            }
        });

        if meta.is_leaf_kind() && !resolved.on_tag_value {
            return match (meta.default_json(), last) {
                (Some(v), Some(last)) => wrap(last, v),
                _ => empty,
            };
        }

        let mut res = Map::new();
        for (name, child) in &meta.children {
            if child.is_leaf_kind() {
                if let Some(v) = child.default_json() {
                    res.insert(mangle_key(name), v);
                }
            } else if child.kind == NodeKind::Tag {
                continue;
            } else if recursive {
                let mut sub: Vec<String> = path.iter().map(|p| p.as_ref().to_string()).collect();
                sub.push(name.clone());
                if let Value::Object(pos) = self.get_defaults(&sub, recursive, false) {
                    res.extend(pos);
                }
            }
        }

        if res.is_empty() {
            return empty;
        }
        match last {
            Some(last) if !get_first_key => wrap(last, Value::Object(res)),
            _ => Value::Object(res),
        }
    }

    fn well_defined(&self, path: &[String], conf: &Map<String, Value>) -> bool {
        let mut full: Vec<String> = path.to_vec();
        if let Some((k, v)) = conf.iter().next() {
            full.push(k.clone());
            if self.is_tag_value(&full) {
                match v {
                    Value::Object(inner) => full.extend(inner.keys().next().cloned()),
                    _ => return false,
                }
            }
        }
        self.exists(&full)
    }

    fn relative_inner(&self, path: &[String], conf: &Map<String, Value>, recursive: bool) -> Value {
        let mut res = match self.get_defaults(path, recursive, true) {
            Value::Object(m) => m,
            _ => Map::new(),
        };
        for (k, v) in conf {
            if let Value::Object(inner) = v {
                let mut sub = path.to_vec();
                sub.push(k.clone());
                if let Value::Object(step) = self.relative_inner(&sub, inner, recursive) {
                    res.extend(step);
                }
            }
        }
        if res.is_empty() {
            return Value::Object(Map::new());
        }
        match path.last() {
            Some(last) if self.is_tag_value(path) => wrap(last.clone(), Value::Object(res)),
            Some(last) => wrap(mangle_key(last), Value::Object(res)),
            None => Value::Object(res),
        }
    }

    /// Defaults for the nodes present in `conf`, including tag instances
    ///
    /// `conf` is a dictionary as produced by `Tree::to_dict` for `path`.
    pub fn relative_defaults<P: AsRef<str>>(
        &self,
        path: &[P],
        conf: &Value,
        get_first_key: bool,
        recursive: bool,
    ) -> Value {
        let path: Vec<String> = path.iter().map(|p| p.as_ref().to_string()).collect();
        let empty_map = Map::new();
        let mut conf = match conf {
            Value::Object(m) => m,
            _ => &empty_map,
        };
        if conf.is_empty() {
            return self.get_defaults(&path, recursive, get_first_key);
        }
        if !self.well_defined(&path, conf) {
            let nested = path
                .last()
                .and_then(|last| conf.get(last).or_else(|| conf.get(&mangle_key(last))));
            match nested {
                Some(Value::Object(inner)) if self.well_defined(&path, inner) => conf = inner,
                _ => {
                    warn!(path = %path.join(" "), "configuration dictionary does not match the reference");
                    return Value::Object(Map::new());
                }
            }
        }

        let res = self.relative_inner(&path, conf, recursive);
        if get_first_key && !path.is_empty() {
            if let Value::Object(m) = &res {
                return m.values().next().cloned().unwrap_or_else(|| Value::Object(Map::new()));
            }
        }
        res
    }

    /// `conf` overlaid on the defaults rooted at `path`
    ///
    /// Configured values win and lists are replaced, never concatenated.
    /// Merging twice yields the same result as merging once.
    pub fn merge_defaults<P: AsRef<str>>(
        &self,
        path: &[P],
        conf: &Value,
        get_first_key: bool,
        recursive: bool,
    ) -> Value {
        let defaults = self.relative_defaults(path, conf, get_first_key, recursive);
        dict_merge(&defaults, conf)
    }

    /// Every node declaring an owner, with its effective priority
    pub fn priority_table(&self) -> Vec<PriorityEntry> {
        let mut out = Vec::new();
        collect_priorities(&self.root, &mut Vec::new(), None, &mut out);
        out.sort_by(|a, b| a.path.cmp(&b.path));
        out.sort_by_key(|e| e.priority.map_or((1, 0), |p| (0, p)));
        out
    }

    /// Entries owned by any of `owners`, in non-decreasing priority
    ///
    /// Entries without a priority sort last and are reported.
    pub fn priority_sort<S: AsRef<str>>(&self, owners: &[S]) -> Vec<PriorityEntry> {
        let table = self.priority_table();
        for owner in owners {
            let owner = owner.as_ref();
            let rows: Vec<&PriorityEntry> = table.iter().filter(|e| e.owner == owner).collect();
            if rows.is_empty() {
                warn!(owner, "no reference entry for section");
            } else if rows.iter().any(|e| e.priority.is_none()) {
                warn!(owner, "no priority available for section");
            }
        }
        table
            .into_iter()
            .filter(|e| owners.iter().any(|o| o.as_ref() == e.owner))
            .collect()
    }
}

fn collect_priorities(node: &NodeMeta, path: &mut Vec<String>, inherited: Option<u32>, out: &mut Vec<PriorityEntry>) {
    for (name, child) in &node.children {
        let priority = child.priority.or(inherited);
        path.push(name.clone());
        if let Some(owner) = &child.owner {
            out.push(PriorityEntry {
                path: path.clone(),
                owner: owner.clone(),
                priority,
            });
        }
        collect_priorities(child, path, priority, out);
        path.pop();
    }
}

fn mangle_key(name: &str) -> String {
    name.replace('-', "_")
}

fn wrap(key: String, value: Value) -> Value {
    let mut m = Map::new();
    m.insert(key, value);
    Value::Object(m)
}

/// Recursively fill keys missing from `conf` with those from `defaults`
pub fn dict_merge(defaults: &Value, conf: &Value) -> Value {
    match (defaults, conf) {
        (Value::Object(d), Value::Object(c)) => {
            let mut out = c.clone();
            for (k, dv) in d {
                match out.get_mut(k) {
                    None => {
                        out.insert(k.clone(), dv.clone());
                    }
                    Some(cv) => {
                        if dv.is_object() && cv.is_object() {
                            *cv = dict_merge(dv, cv);
                        }
                    }
                }
            }
            Value::Object(out)
        }
        (_, conf) => conf.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    pub(crate) const REFERENCE: &str = r#"{
        "component_version": {"interfaces": 22, "system": 26},
        "children": {
            "interfaces": {
                "kind": "internal",
                "children": {
                    "ethernet": {
                        "kind": "tag",
                        "owner": "interfaces_ethernet",
                        "priority": 318,
                        "children": {
                            "address": {"kind": "leaf_multi"},
                            "mtu": {"kind": "leaf", "default": "1500"},
                            "description": {"kind": "leaf"},
                            "disable": {"kind": "valueless"}
                        }
                    }
                }
            },
            "system": {
                "kind": "internal",
                "owner": "system_config",
                "priority": 100,
                "children": {
                    "host-name": {"kind": "leaf", "default": "vyos"},
                    "name-server": {"kind": "leaf_multi", "default": "192.0.2.53 192.0.2.54"},
                    "login": {
                        "kind": "internal",
                        "owner": "system_login",
                        "children": {
                            "banner": {"kind": "leaf"},
                            "timeout": {"kind": "leaf", "default": "30"}
                        }
                    }
                }
            },
            "service": {
                "kind": "internal",
                "children": {
                    "ssh": {
                        "kind": "internal",
                        "owner": "service_ssh",
                        "children": {"port": {"kind": "leaf", "default": "22"}}
                    }
                }
            }
        }
    }"#;

    fn reference() -> Reference {
        Reference::from_json(REFERENCE).unwrap()
    }

    #[test]
    fn test_kinds() {
        let r = reference();
        assert!(r.is_tag(&["interfaces", "ethernet"]));
        assert!(!r.is_tag(&["interfaces", "ethernet", "eth0"]));
        assert!(r.is_tag_value(&["interfaces", "ethernet", "eth0"]));
        assert!(r.is_multi(&["interfaces", "ethernet", "eth0", "address"]));
        assert!(r.is_leaf(&["interfaces", "ethernet", "eth0", "mtu"]));
        assert!(r.is_valueless(&["interfaces", "ethernet", "eth0", "disable"]));
        assert!(r.exists(&["system", "host_name"]));
        assert!(!r.exists(&["system", "nope"]));
    }

    #[test]
    fn test_priority_inherited() {
        let r = reference();
        assert_eq!(r.priority(&["interfaces", "ethernet", "eth0", "address"]), Some(318));
        assert_eq!(r.priority(&["system", "login", "banner"]), Some(100));
        assert_eq!(r.priority(&["service", "ssh"]), None);
        assert_eq!(r.owner(&["system", "login", "banner"]), Some("system_login"));
    }

    #[test]
    fn test_canonical_name() {
        let r = reference();
        assert_eq!(r.canonical_name(&["system"], "host_name").as_deref(), Some("host-name"));
        assert_eq!(r.canonical_name(&["interfaces", "ethernet"], "eth_0"), None);
    }

    #[test]
    fn test_get_defaults() {
        let r = reference();
        assert_eq!(
            r.get_defaults(&["system"], false, false),
            json!({"system": {"host_name": "vyos", "name_server": ["192.0.2.53", "192.0.2.54"]}})
        );
        assert_eq!(
            r.get_defaults(&["system"], true, true),
            json!({"host_name": "vyos", "name_server": ["192.0.2.53", "192.0.2.54"], "login": {"timeout": "30"}})
        );
        assert_eq!(r.get_defaults(&["interfaces", "ethernet"], true, false), json!({}));
        assert_eq!(r.get_defaults(&["system", "host-name"], false, false), json!({"host_name": "vyos"}));
    }

    #[test]
    fn test_relative_defaults_fill_tag_instances() {
        let r = reference();
        let conf = json!({"ethernet": {"eth0": {"address": ["192.0.2.1/24"]}}});
        let defaults = r.relative_defaults(&["interfaces"], &conf, true, true);
        assert_eq!(defaults, json!({"ethernet": {"eth0": {"mtu": "1500"}}}));
    }

    #[test]
    fn test_merge_defaults_conf_wins_and_is_idempotent() {
        let r = reference();
        let conf = json!({"host_name": "r1", "name_server": ["198.51.100.1"]});
        let merged = r.merge_defaults(&["system"], &conf, true, true);
        assert_eq!(
            merged,
            json!({"host_name": "r1", "name_server": ["198.51.100.1"], "login": {"timeout": "30"}})
        );
        assert_eq!(r.merge_defaults(&["system"], &merged, true, true), merged);
    }

    #[test]
    fn test_priority_sort() {
        let r = reference();
        let sorted = r.priority_sort(&["service_ssh", "interfaces_ethernet", "system_login", "system_config"]);
        let owners: Vec<&str> = sorted.iter().map(|e| e.owner.as_str()).collect();
        assert_eq!(owners, vec!["system_config", "system_login", "interfaces_ethernet", "service_ssh"]);
        assert!(sorted.windows(2).all(|w| match (w[0].priority, w[1].priority) {
            (Some(a), Some(b)) => a <= b,
            (_, None) => true,
            (None, Some(_)) => false,
        }));
    }

    #[test]
    fn test_malformed_reference() {
        assert!(matches!(Reference::from_json("{\"children\": 3}"), Err(ReferenceError::Json(_))));
        assert!(matches!(
            Reference::load(Path::new("/nonexistent/reference.json")),
            Err(ReferenceError::Io { .. })
        ));
    }
}
