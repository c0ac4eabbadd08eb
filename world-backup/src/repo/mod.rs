//! Filesystem-rooted backup repository.
//!
//! A repository is a directory that owns every file below it. Callers address
//! files by paths relative to the root; any path that normalizes outside the
//! root is rejected with [`BackupError::PathEscape`].

pub mod entry;

pub use entry::Entry;

use crate::utils::errors::{BackupError, Result};
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

/// Suffix appended to a world file path to name its repository.
const REPO_SUFFIX: &str = ".backups";

#[derive(Debug, Clone)]
pub struct Repository {
    root: PathBuf,
}

impl Repository {
    /// Open the repository rooted at `root`.
    ///
    /// A missing directory is created when `allow_creation` is set, otherwise
    /// this fails with `NotFound`.
    pub fn open(root: &Path, allow_creation: bool) -> Result<Self> {
        if !root.is_dir() {
            if !allow_creation {
                return Err(BackupError::NotFound(format!(
                    "missing repository directory {}",
                    root.display()
                )));
            }
            fs::create_dir_all(root)?;
        }

        Ok(Self {
            root: root.canonicalize()?,
        })
    }

    /// Open the repository that holds backups of `world_path`.
    pub fn for_world(world_path: &Path, allow_creation: bool) -> Result<Self> {
        Self::open(&repo_path_for(world_path), allow_creation)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map an absolute path below the root to a root-relative path.
    pub fn to_repo_path(&self, real_path: &Path) -> Result<PathBuf> {
        let absolute = if real_path.is_absolute() {
            normalize(real_path)
        } else {
            normalize(&std::env::current_dir()?.join(real_path))
        };
        self.check_contained(&absolute)?;
        Ok(absolute
            .strip_prefix(&self.root)
            .map(Path::to_path_buf)
            .unwrap_or_default())
    }

    /// Map a root-relative path to its absolute location.
    pub fn to_real_path(&self, repo_path: &Path) -> Result<PathBuf> {
        let real = normalize(&self.root.join(repo_path));
        self.check_contained(&real)?;
        Ok(real)
    }

    /// Create an empty entry, creating parent folders as needed.
    ///
    /// With `exists_ok` unset an existing file is an error; otherwise it is truncated.
    pub fn create_entry(&self, repo_path: &Path, exists_ok: bool) -> Result<Entry> {
        let real = self.to_real_path(repo_path)?;
        if real == self.root {
            return Err(BackupError::PathEscape(repo_path.to_path_buf()));
        }

        if let Some(parent) = real.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut options = fs::OpenOptions::new();
        options.write(true);
        if exists_ok {
            options.create(true).truncate(true);
        } else {
            options.create_new(true);
        }
        options.open(&real)?;

        self.entry_at(real)
    }

    /// Look up an entry; fails with `NotFound` when `must_exist` and it is absent.
    pub fn get_entry(&self, repo_path: &Path, must_exist: bool) -> Result<Entry> {
        let real = self.to_real_path(repo_path)?;
        if must_exist && !real.is_file() {
            return Err(BackupError::NotFound(format!(
                "entry {} not found",
                repo_path.display()
            )));
        }
        self.entry_at(real)
    }

    /// Lazily walk every file below the root.
    ///
    /// Each call starts a fresh walk, so the sequence can be restarted.
    pub fn entries(&self) -> Entries<'_> {
        Entries {
            repo: self,
            walker: WalkDir::new(&self.root)
                .follow_links(false)
                .sort_by_file_name()
                .into_iter(),
        }
    }

    /// Collect every entry, propagating the first walk error.
    pub fn list_entries(&self) -> Result<Vec<Entry>> {
        self.entries().collect()
    }

    /// Remove the file backing `entry`.
    pub fn delete(&self, entry: &Entry) -> Result<()> {
        self.check_contained(entry.real_path())?;
        fs::remove_file(entry.real_path())?;
        Ok(())
    }

    /// Remove `dir` and its ancestors below the root while they are empty.
    pub fn prune_empty_dirs(&self, mut dir: &Path) -> Result<usize> {
        let mut removed = 0;
        while dir != self.root && dir.starts_with(&self.root) {
            match fs::remove_dir(dir) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(_) => break,
            }
            match dir.parent() {
                Some(parent) => dir = parent,
                None => break,
            }
        }
        Ok(removed)
    }

    fn entry_at(&self, real: PathBuf) -> Result<Entry> {
        let repo_path = real
            .strip_prefix(&self.root)
            .map_err(|_| BackupError::PathEscape(real.clone()))?
            .to_path_buf();
        Ok(Entry::new(repo_path, real))
    }

    /// Segment-wise containment: `/data/world.backups-old` is not inside `/data/world.backups`.
    fn check_contained(&self, path: &Path) -> Result<()> {
        if path.starts_with(&self.root) {
            Ok(())
        } else {
            Err(BackupError::PathEscape(path.to_path_buf()))
        }
    }
}

/// Iterator over the files of a repository.
pub struct Entries<'a> {
    repo: &'a Repository,
    walker: walkdir::IntoIter,
}

impl Iterator for Entries<'_> {
    type Item = Result<Entry>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.walker.next()? {
                Ok(dir_entry) if dir_entry.file_type().is_file() => {
                    return Some(self.repo.entry_at(dir_entry.into_path()));
                }
                Ok(_) => continue,
                Err(e) => return Some(Err(e.into())),
            }
        }
    }
}

/// Repository directory for a world file: `<world>.backups`.
pub fn repo_path_for(world_path: &Path) -> PathBuf {
    let mut name = world_path.as_os_str().to_os_string();
    name.push(REPO_SUFFIX);
    PathBuf::from(name)
}

/// Lexically resolve `.` and `..` without touching the filesystem.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push(component);
                }
            }
            other => out.push(other),
        }
    }
    out
}
