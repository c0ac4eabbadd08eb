//! File naming grammar for snapshots.
//!
//! ```text
//! yyyy_MM_dd/HH_mm_ss_<hash>.wld    full snapshot
//! yyyy_MM_dd/HH_mm_ss_<hash>.diff   delta against the full with <hash>
//! ```

use crate::utils::errors::{BackupError, Result};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::Serialize;
use std::path::{Component, Path, PathBuf};

pub const FULL_EXTENSION: &str = "wld";
pub const DIFF_EXTENSION: &str = "diff";

const FOLDER_FORMAT: &str = "%Y_%m_%d";
const TIME_FORMAT: &str = "%H_%M_%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Full,
    Diff,
}

impl EntryKind {
    pub fn extension(self) -> &'static str {
        match self {
            EntryKind::Full => FULL_EXTENSION,
            EntryKind::Diff => DIFF_EXTENSION,
        }
    }
}

/// Pieces recovered from a snapshot file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedName {
    pub kind: EntryKind,
    pub hash: String,

    /// Time of day, when the prefix is a well-formed `HH_mm_ss`
    pub time: Option<NaiveTime>,
}

/// Parse a bare file name (no folder).
///
/// The hash is everything after the last `_` of the stem. A name whose
/// prefix is not a valid time still parses, with `time == None`.
pub fn parse_name(name: &str) -> Result<ParsedName> {
    let (stem, kind) = if let Some(stem) = name.strip_suffix(".wld") {
        (stem, EntryKind::Full)
    } else if let Some(stem) = name.strip_suffix(".diff") {
        (stem, EntryKind::Diff)
    } else {
        return Err(BackupError::Format(name.to_string()));
    };

    let (prefix, hash) = stem
        .rsplit_once('_')
        .ok_or_else(|| BackupError::Format(name.to_string()))?;

    if !is_word(prefix) || !is_word(hash) {
        return Err(BackupError::Format(name.to_string()));
    }

    Ok(ParsedName {
        kind,
        hash: hash.to_string(),
        time: NaiveTime::parse_from_str(prefix, TIME_FORMAT).ok(),
    })
}

/// Date encoded in the entry's folder, if it sits in exactly one `yyyy_MM_dd` folder.
pub fn folder_date(repo_path: &Path) -> Option<NaiveDate> {
    let parent = repo_path.parent()?;
    let mut components = parent.components();
    let folder = match (components.next(), components.next()) {
        (Some(Component::Normal(folder)), None) => folder.to_str()?,
        _ => return None,
    };
    NaiveDate::parse_from_str(folder, FOLDER_FORMAT).ok()
}

/// Repository path for a new snapshot taken at `timestamp`.
pub fn entry_path(kind: EntryKind, timestamp: NaiveDateTime, hash: &str) -> PathBuf {
    PathBuf::from(timestamp.format(FOLDER_FORMAT).to_string()).join(format!(
        "{}_{}.{}",
        timestamp.format(TIME_FORMAT),
        hash,
        kind.extension()
    ))
}

fn is_word(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_alphanumeric() || c == '_')
}
