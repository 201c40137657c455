//! rcfg core - hierarchical configuration tree primitives
//!
//! This crate provides the foundational configuration layer:
//! - Configuration tree (nodes, values, tags, comments)
//! - Text format parser and canonical renderer
//! - JSON / config-dict export
//! - Three-way tree diff and ordered command lists
//! - Read-only schema reference (defaults, priorities, owners)
//! - Component version trailer handling

pub mod commands;
pub mod diff;
pub mod error;
pub mod parser;
pub mod reference;
pub mod render;
pub mod tree;
pub mod version;

// Re-export main types for convenience
pub use commands::{split_words, Command, CommandOp};
pub use diff::{render_commands, union, Diff};
pub use error::{Result, TreeError};
pub use reference::{DefaultValue, NodeKind, NodeMeta, PriorityEntry, Reference, ReferenceError};
pub use parser::parse;
pub use render::RenderOptions;
pub use tree::{Kind, Node, Tree};
pub use version::{strip_footer, VersionInfo, Vintage};
