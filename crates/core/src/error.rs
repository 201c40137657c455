//! Error kinds surfaced by tree operations

use thiserror::Error;

/// Errors raised by [`crate::Tree`] and the text parser
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TreeError {
    /// Malformed configuration text
    #[error("parse error at line {line}, column {column}: {message}")]
    Parse {
        line: usize,
        column: usize,
        message: String,
    },

    /// The operation contradicts the schema reference
    #[error("schema violation at [{path}]: {message}")]
    SchemaViolation { path: String, message: String },

    /// A leaf was expected
    #[error("path [{0}] is not a leaf node")]
    NotLeaf(String),

    /// An internal node was expected
    #[error("path [{0}] is not an internal node")]
    NotInternal(String),

    /// A single value was requested from a multi-valued leaf
    #[error("path [{0}] has multiple values")]
    MultipleValues(String),

    /// Path resolution failed where existence was required
    #[error("path [{0}] doesn't exist")]
    NoSuchPath(String),
}

impl TreeError {
    pub(crate) fn parse(line: usize, column: usize, message: impl Into<String>) -> Self {
        TreeError::Parse {
            line,
            column,
            message: message.into(),
        }
    }

    pub(crate) fn schema<P: AsRef<str>>(path: &[P], message: impl Into<String>) -> Self {
        TreeError::SchemaViolation {
            path: join_path(path),
            message: message.into(),
        }
    }
}

/// Result type for tree operations
pub type Result<T> = std::result::Result<T, TreeError>;

/// Space-joined path, as shown in error messages
pub fn join_path<P: AsRef<str>>(path: &[P]) -> String {
    path.iter()
        .map(|p| p.as_ref())
        .collect::<Vec<_>>()
        .join(" ")
}
