//! Pluggable policy deciding what a save builds on and what cleanup removes.

pub mod retention;

pub use retention::DefaultStrategy;

use crate::catalog::BackupEntry;
use crate::repo::{Entry, Repository};
use crate::utils::errors::Result;
use chrono::NaiveDateTime;

pub trait BackupStrategy: Send + Sync {
    /// Full snapshot a save taken at `date` should diff against.
    ///
    /// `None` means the save must write a new full snapshot.
    fn select_reference(
        &self,
        repo: &Repository,
        date: NaiveDateTime,
    ) -> Result<Option<BackupEntry>>;

    /// Entries a cleanup at `date` should delete, sorted and without duplicates.
    fn list_expired(&self, repo: &Repository, date: NaiveDateTime) -> Result<Vec<Entry>>;
}
