//! A single file stored in a backup repository.

use crate::utils::errors::Result;
use chrono::{Local, NaiveDateTime, TimeZone, Utc};
use filetime::FileTime;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// A file below a repository root.
///
/// Content is written once at creation and never rewritten in place; size and
/// modification time are read from the filesystem on demand.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Entry {
    /// Path relative to the repository root
    repo_path: PathBuf,

    /// Absolute path of the backing file
    real_path: PathBuf,
}

impl Entry {
    pub(crate) fn new(repo_path: PathBuf, real_path: PathBuf) -> Self {
        Self {
            repo_path,
            real_path,
        }
    }

    pub fn repo_path(&self) -> &Path {
        &self.repo_path
    }

    pub fn real_path(&self) -> &Path {
        &self.real_path
    }

    /// File name without its folder
    pub fn name(&self) -> &str {
        self.repo_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
    }

    pub fn exists(&self) -> bool {
        self.real_path.is_file()
    }

    /// Size of the backing file in bytes
    pub fn len(&self) -> Result<u64> {
        Ok(fs::metadata(&self.real_path)?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    pub fn modified(&self) -> Result<SystemTime> {
        Ok(fs::metadata(&self.real_path)?.modified()?)
    }

    /// Last-write time as local wall-clock time
    pub fn modified_local(&self) -> Result<NaiveDateTime> {
        let modified: chrono::DateTime<Local> = self.modified()?.into();
        Ok(modified.naive_local())
    }

    /// Stamp the last-write time with a local wall-clock timestamp
    pub fn set_modified(&self, timestamp: NaiveDateTime) -> Result<()> {
        filetime::set_file_mtime(&self.real_path, to_file_time(timestamp))?;
        Ok(())
    }

    pub fn read(&self) -> Result<Vec<u8>> {
        Ok(fs::read(&self.real_path)?)
    }

    /// Replace the content of the entry and flush it to disk
    pub fn write(&self, data: &[u8]) -> Result<()> {
        let mut file = fs::OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(&self.real_path)?;
        file.write_all(data)?;
        file.sync_all()?;
        Ok(())
    }
}

impl std::fmt::Display for Entry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.repo_path.display())
    }
}

fn to_file_time(timestamp: NaiveDateTime) -> FileTime {
    // Nonexistent local times (DST gaps) are read as UTC.
    let utc = Local
        .from_local_datetime(&timestamp)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|| Utc.from_utc_datetime(&timestamp));
    FileTime::from_unix_time(utc.timestamp(), utc.timestamp_subsec_nanos())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn entry_in(dir: &TempDir, name: &str) -> Entry {
        let real = dir.path().join(name);
        fs::write(&real, b"").unwrap();
        Entry::new(PathBuf::from(name), real)
    }

    #[test]
    fn test_write_and_read() -> Result<()> {
        let dir = TempDir::new()?;
        let entry = entry_in(&dir, "10_00_00_abc.wld");

        entry.write(b"world bytes")?;
        assert_eq!(entry.read()?, b"world bytes");
        assert_eq!(entry.len()?, 11);
        assert_eq!(entry.name(), "10_00_00_abc.wld");

        entry.write(b"short")?;
        assert_eq!(entry.read()?, b"short");
        Ok(())
    }

    #[test]
    fn test_set_modified_round_trips_local_time() -> Result<()> {
        let dir = TempDir::new()?;
        let entry = entry_in(&dir, "stamped");
        let stamp = NaiveDateTime::parse_from_str("2020-06-29 16:00:00", "%Y-%m-%d %H:%M:%S").unwrap();

        entry.set_modified(stamp)?;
        assert_eq!(entry.modified_local()?, stamp);
        Ok(())
    }
}
