//! CLI command implementations

pub mod apply;
pub mod compare;
pub mod config;
pub mod log;
pub mod migrate;
pub mod rollback;
pub mod show;
