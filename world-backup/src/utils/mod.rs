//! Utility modules for the backup engine.

pub mod dates;
pub mod errors;
pub mod logger;

pub use errors::{BackupError, Result};
