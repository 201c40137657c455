//! Commit revision archive
//!
//! This crate provides:
//! - Revision metadata and the sidecar commit log
//! - Gzip-compressed revision files written by atomic rename
//! - FIFO retention
//! - Text and command diffs between revisions

pub mod archive;
pub mod retention;
pub mod revision;

// Re-exports
pub use archive::Archive;
pub use retention::RetentionPolicy;
pub use revision::{LogEntry, Revision};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("no such revision: {0}")]
    NoSuchRevision(usize),

    #[error("archive I/O error on {path}: {source}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed commit log line {line}: {message}")]
    MalformedLog { line: usize, message: String },

    #[error(transparent)]
    Tree(#[from] cfg_core::TreeError),
}

/// Result type for archive operations
pub type Result<T> = std::result::Result<T, ArchiveError>;
