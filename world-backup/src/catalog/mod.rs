//! Classification of repository entries into full snapshots and diffs.

pub mod hash;
pub mod naming;

pub use naming::EntryKind;

use crate::repo::{Entry, Repository};
use crate::utils::errors::Result;
use chrono::{Duration, NaiveDateTime};
use std::collections::HashMap;
use tracing::debug;

/// An entry recognized as a snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupEntry {
    pub entry: Entry,
    pub kind: EntryKind,

    /// Logical timestamp from the name, or the file's mtime when the name carries none
    pub timestamp: NaiveDateTime,

    /// Content hash of the full snapshot (for a diff: of the full it applies to)
    pub hash: String,

    /// False for a diff whose full snapshot is missing
    pub valid: bool,
}

impl BackupEntry {
    pub fn is_full(&self) -> bool {
        self.kind == EntryKind::Full
    }

    pub fn is_diff(&self) -> bool {
        self.kind == EntryKind::Diff
    }
}

/// Snapshots of one repository, fulls first, each group in input order.
///
/// Diffs are linked to their full by hash; [`Catalog::reference`] resolves
/// the link against this catalog only.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    entries: Vec<BackupEntry>,
    fulls: HashMap<String, usize>,
}

impl Catalog {
    /// Classify `entries`.
    ///
    /// Names outside the grammar are skipped. Diffs whose full snapshot is
    /// absent are kept (with `valid == false`) only when `include_invalid`.
    pub fn classify<I>(entries: I, include_invalid: bool) -> Result<Self>
    where
        I: IntoIterator<Item = Entry>,
    {
        let mut diffs = Vec::new();
        let mut catalog = Catalog::default();

        for entry in entries {
            let parsed = match naming::parse_name(entry.name()) {
                Ok(parsed) => parsed,
                Err(e) => {
                    debug!("Skipping {}: {}", entry, e);
                    continue;
                }
            };

            let timestamp = match (naming::folder_date(entry.repo_path()), parsed.time) {
                (Some(date), Some(time)) => date.and_time(time),
                _ => entry.modified_local()?,
            };

            match parsed.kind {
                EntryKind::Full => {
                    catalog
                        .fulls
                        .insert(parsed.hash.clone(), catalog.entries.len());
                    catalog.entries.push(BackupEntry {
                        entry,
                        kind: EntryKind::Full,
                        timestamp,
                        hash: parsed.hash,
                        valid: true,
                    });
                }
                EntryKind::Diff => diffs.push((entry, timestamp, parsed.hash)),
            }
        }

        for (entry, timestamp, hash) in diffs {
            let valid = catalog.fulls.contains_key(&hash);
            if !valid && !include_invalid {
                debug!("Skipping {}: no full snapshot {}", entry, hash);
                continue;
            }
            catalog.entries.push(BackupEntry {
                entry,
                kind: EntryKind::Diff,
                timestamp,
                hash,
                valid,
            });
        }

        Ok(catalog)
    }

    /// Classify everything currently stored in `repo`.
    pub fn load(repo: &Repository, include_invalid: bool) -> Result<Self> {
        Self::classify(repo.list_entries()?, include_invalid)
    }

    pub fn entries(&self) -> &[BackupEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn fulls(&self) -> impl Iterator<Item = &BackupEntry> {
        self.entries.iter().filter(|e| e.is_full())
    }

    pub fn diffs(&self) -> impl Iterator<Item = &BackupEntry> {
        self.entries.iter().filter(|e| e.is_diff())
    }

    /// Full snapshot a diff applies to.
    pub fn reference(&self, diff: &BackupEntry) -> Option<&BackupEntry> {
        self.full_by_hash(&diff.hash)
    }

    pub fn full_by_hash(&self, hash: &str) -> Option<&BackupEntry> {
        self.fulls.get(hash).map(|&index| &self.entries[index])
    }

    /// The entry closest to `timestamp`, if it lies within `tolerance`.
    ///
    /// Ties go to the entry that comes first in the catalog.
    pub fn find_near(&self, timestamp: NaiveDateTime, tolerance: Duration) -> Option<&BackupEntry> {
        self.entries
            .iter()
            .filter(|e| e.valid)
            .map(|e| ((e.timestamp - timestamp).num_milliseconds().abs(), e))
            .filter(|(distance, _)| *distance <= tolerance.num_milliseconds())
            .min_by_key(|(distance, _)| *distance)
            .map(|(_, e)| e)
    }

    /// Logical timestamps of all valid snapshots, ascending.
    pub fn timestamps(&self) -> Vec<NaiveDateTime> {
        let mut timestamps: Vec<_> = self
            .entries
            .iter()
            .filter(|e| e.valid)
            .map(|e| e.timestamp)
            .collect();
        timestamps.sort();
        timestamps
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use tempfile::TempDir;

    fn at(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap()
    }

    fn setup() -> (TempDir, Repository) {
        let dir = TempDir::new().unwrap();
        let repo = Repository::open(&dir.path().join("w.wld.backups"), true).unwrap();
        (dir, repo)
    }

    fn put(repo: &Repository, path: &str) -> Entry {
        repo.create_entry(Path::new(path), false).unwrap()
    }

    #[test]
    fn test_classify_links_diffs() -> Result<()> {
        let (_dir, repo) = setup();
        put(&repo, "2020_06_29/10_00_00_aaaa.wld");
        put(&repo, "2020_06_29/10_05_00_aaaa.diff");
        put(&repo, "2020_06_29/10_10_00_aaaa.diff");
        put(&repo, "2020_06_30/09_00_00_bbbb.wld");

        let catalog = Catalog::load(&repo, false)?;
        assert_eq!(catalog.fulls().count(), 2);
        assert_eq!(catalog.diffs().count(), 2);

        for diff in catalog.diffs() {
            let full = catalog.reference(diff).unwrap();
            assert_eq!(full.timestamp, at("2020-06-29 10:00:00"));
            assert!(diff.valid);
        }
        assert_eq!(
            catalog.timestamps(),
            vec![
                at("2020-06-29 10:00:00"),
                at("2020-06-29 10:05:00"),
                at("2020-06-29 10:10:00"),
                at("2020-06-30 09:00:00"),
            ]
        );
        Ok(())
    }

    #[test]
    fn test_classification_is_idempotent() -> Result<()> {
        let (_dir, repo) = setup();
        put(&repo, "2020_06_29/10_00_00_aaaa.wld");
        put(&repo, "2020_06_29/11_00_00_aaaa.diff");
        put(&repo, "2020_06_29/12_00_00_cccc.diff");
        put(&repo, "notes.txt");

        let first = Catalog::load(&repo, true)?;
        let second = Catalog::load(&repo, true)?;
        assert_eq!(first.entries(), second.entries());
        Ok(())
    }

    #[test]
    fn test_invalid_diffs() -> Result<()> {
        let (_dir, repo) = setup();
        put(&repo, "2020_06_29/10_00_00_aaaa.wld");
        put(&repo, "2020_06_29/11_00_00_dead.diff");

        let strict = Catalog::load(&repo, false)?;
        assert_eq!(strict.len(), 1);

        let lenient = Catalog::load(&repo, true)?;
        assert_eq!(lenient.len(), 2);
        let orphan = lenient.diffs().next().unwrap();
        assert!(!orphan.valid);
        assert!(lenient.reference(orphan).is_none());

        // Orphans are never restore targets.
        assert!(lenient
            .find_near(at("2020-06-29 11:00:00"), Duration::seconds(1))
            .is_none());
        Ok(())
    }

    #[test]
    fn test_malformed_names_ignored() -> Result<()> {
        let (_dir, repo) = setup();
        put(&repo, "2020_06_29/10_00_00_aaaa.wld");
        put(&repo, "2020_06_29/readme.txt");
        put(&repo, "2020_06_29/nohash.wld");
        put(&repo, "2020_06_29/10_00_00_a-b.diff");

        let catalog = Catalog::load(&repo, true)?;
        assert_eq!(catalog.len(), 1);
        Ok(())
    }

    #[test]
    fn test_timestamp_falls_back_to_mtime() -> Result<()> {
        let (_dir, repo) = setup();
        let stamp = at("2019-01-02 03:04:05");

        let untimed = put(&repo, "2020_06_29/manual_aaaa.wld");
        untimed.set_modified(stamp)?;
        let unfoldered = put(&repo, "10_00_00_aaaa.diff");
        unfoldered.set_modified(stamp + Duration::minutes(1))?;

        let catalog = Catalog::load(&repo, false)?;
        let full = catalog.fulls().next().unwrap();
        assert_eq!(full.timestamp, stamp);
        let diff = catalog.diffs().next().unwrap();
        assert_eq!(diff.timestamp, stamp + Duration::minutes(1));
        assert!(diff.valid);
        Ok(())
    }

    #[test]
    fn test_find_near_tolerance() -> Result<()> {
        let (_dir, repo) = setup();
        put(&repo, "2020_06_29/10_00_00_aaaa.wld");
        put(&repo, "2020_06_29/10_00_02_aaaa.diff");

        let catalog = Catalog::load(&repo, false)?;
        let tolerance = Duration::seconds(1);

        let found = catalog.find_near(at("2020-06-29 10:00:01"), tolerance).unwrap();
        assert!(found.is_full());
        let found = catalog.find_near(at("2020-06-29 10:00:03"), tolerance).unwrap();
        assert!(found.is_diff());
        assert!(catalog.find_near(at("2020-06-29 10:00:05"), tolerance).is_none());
        Ok(())
    }
}
