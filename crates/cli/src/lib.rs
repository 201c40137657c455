//! Front-end library for the `rcfg` command
//!
//! This crate provides:
//! - [`Lock`]: the cross-process commit lock
//! - [`Settings`]: layered front-end settings
//! - [`Session`]: running and candidate trees, commit, load and rollback

pub mod lock;
pub mod output;
pub mod session;
pub mod settings;

// Re-exports
pub use lock::{Lock, LockError};
pub use session::{CommitReport, CommitRequest, Renderer, Session, SessionError};
pub use settings::Settings;
