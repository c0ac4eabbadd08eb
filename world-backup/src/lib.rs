//! World Backup Library
//!
//! Incremental backups of a single world save file: full snapshots plus
//! rsync-style deltas, tiered retention, and a single IO worker that
//! serializes every repository mutation.

pub mod catalog;
pub mod config;
pub mod daemon;
pub mod repo;
pub mod service;
pub mod strategy;
pub mod sync;
pub mod utils;
pub mod worker;

// Re-export commonly used types
pub use config::Config;
pub use service::{BackupService, SaveOutcome};
pub use utils::errors::{BackupError, Result};
pub use worker::CancelScope;
