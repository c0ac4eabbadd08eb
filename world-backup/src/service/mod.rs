//! Backup orchestration for world files.
//!
//! [`BackupService`] is the entry point host code talks to. Every disk
//! operation runs on the service's [`IoWorker`]; saves, restores and
//! cleanups additionally hold a service-wide gate so they never interleave.

mod scheduler;


use crate::catalog::{hash, naming, Catalog, EntryKind};
use crate::config::{RuntimeSettings, ServiceConfig};
use crate::repo::{Entry, Repository};
use crate::strategy::{BackupStrategy, DefaultStrategy};
use crate::sync::{delta::delta_compression_ratio, DeltaCodec, RsyncCodec};
use crate::utils::dates::{self, DISPLAY_FORMAT};
use crate::utils::errors::{BackupError, Result};
use crate::worker::{CancelScope, IoWorker};
use chrono::{NaiveDateTime, Timelike};
use std::collections::BTreeSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{Semaphore, SemaphorePermit};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Distance within which a restore target matches a snapshot timestamp.
const RESTORE_TOLERANCE_SECS: i64 = 1;

/// Result of a save request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    /// A new full snapshot was written
    Full(Entry),

    /// A diff against an existing full snapshot was written
    Diff(Entry),

    /// The previous save was too recent; nothing was written
    Throttled,
}

impl SaveOutcome {
    pub fn entry(&self) -> Option<&Entry> {
        match self {
            SaveOutcome::Full(entry) | SaveOutcome::Diff(entry) => Some(entry),
            SaveOutcome::Throttled => None,
        }
    }
}

pub struct BackupService {
    config: ServiceConfig,
    strategy: Arc<dyn BackupStrategy>,
    codec: Arc<dyn DeltaCodec>,
    worker: IoWorker,
    save_gate: Semaphore,
    settings: Arc<RuntimeSettings>,
    last_save: Mutex<Option<Instant>>,
    shutdown: CancellationToken,
}

impl BackupService {
    /// Service with the default strategy and rsync codec.
    pub fn new(config: ServiceConfig) -> Self {
        let settings = Arc::new(RuntimeSettings::from_config(&config));
        let strategy = Arc::new(DefaultStrategy::new(
            config.strategy.clone(),
            settings.clone(),
        ));
        Self::with_parts(config, strategy, Arc::new(RsyncCodec::new()), settings)
    }

    pub fn with_parts(
        config: ServiceConfig,
        strategy: Arc<dyn BackupStrategy>,
        codec: Arc<dyn DeltaCodec>,
        settings: Arc<RuntimeSettings>,
    ) -> Self {
        let worker = IoWorker::new(config.worker_join_timeout());
        Self {
            config,
            strategy,
            codec,
            worker,
            save_gate: Semaphore::new(1),
            settings,
            last_save: Mutex::new(None),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn settings(&self) -> &Arc<RuntimeSettings> {
        &self.settings
    }

    /// True while the last successful save is within the throttle window.
    pub fn should_throttle(&self) -> bool {
        let throttle = self.settings.throttle();
        if throttle.is_zero() {
            return false;
        }
        self.last_save_start()
            .is_some_and(|started| started.elapsed() < throttle)
    }

    /// Forget the last save so the next one is never throttled.
    pub fn reset_throttle(&self) {
        *self.last_save.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }

    pub fn set_throttle(&self, throttle: Duration) {
        self.settings.set_throttle(throttle);
    }

    pub fn set_fill_factor(&self, fill_factor: f64) {
        self.settings.set_fill_factor(fill_factor);
    }

    /// Snapshot the world file at `world`.
    ///
    /// Writes a full snapshot or a diff as the strategy decides, stamped with
    /// `timestamp` (default: now). Returns `Throttled` without touching the
    /// repository when the previous save is too recent.
    pub async fn start_backup(
        &self,
        world: &Path,
        timestamp: Option<NaiveDateTime>,
        token: &CancellationToken,
    ) -> Result<SaveOutcome> {
        let scope = self.scope(token);
        let _gate = self.enter(&scope).await?;

        if self.should_throttle() {
            warn!("Backup of {} throttled", world.display());
            return Ok(SaveOutcome::Throttled);
        }

        let started = Instant::now();
        let timestamp = whole_seconds(timestamp.unwrap_or_else(dates::now));
        let world = world.to_path_buf();
        let strategy = self.strategy.clone();
        let codec = self.codec.clone();

        let outcome = self
            .worker
            .schedule(
                move |scope| save_snapshot(&world, timestamp, strategy.as_ref(), codec.as_ref(), scope),
                &scope,
            )
            .await?;

        *self.last_save.lock().unwrap_or_else(|e| e.into_inner()) = Some(started);
        Ok(outcome)
    }

    /// Timestamps of all restorable snapshots, ascending.
    ///
    /// A world that was never backed up has none.
    pub async fn list_backups(
        &self,
        world: &Path,
        token: &CancellationToken,
    ) -> Result<Vec<NaiveDateTime>> {
        let world = world.to_path_buf();
        self.worker
            .schedule(
                move |scope| {
                    scope.check()?;
                    match Repository::for_world(&world, false) {
                        Ok(repo) => Ok(Catalog::load(&repo, false)?.timestamps()),
                        Err(BackupError::NotFound(_)) => Ok(Vec::new()),
                        Err(e) => Err(e),
                    }
                },
                &self.scope(token),
            )
            .await
    }

    /// Overwrite the world file with the snapshot taken at `timestamp` (±1s).
    pub async fn restore(
        &self,
        world: &Path,
        timestamp: NaiveDateTime,
        token: &CancellationToken,
    ) -> Result<bool> {
        let scope = self.scope(token);
        let _gate = self.enter(&scope).await?;

        let world = world.to_path_buf();
        let codec = self.codec.clone();
        let atomic = self.config.atomic_restore;

        self.worker
            .schedule(
                move |scope| restore_snapshot(&world, timestamp, codec.as_ref(), atomic, scope),
                &scope,
            )
            .await
    }

    /// Delete the snapshots retention no longer wants, as of now.
    pub async fn start_cleanup(
        &self,
        world: &Path,
        token: &CancellationToken,
    ) -> Result<Vec<Entry>> {
        self.cleanup_at(world, dates::now(), token).await
    }

    /// Delete the snapshots retention no longer wants as of `date`.
    ///
    /// Deletion failures only fail the call when nothing could be deleted.
    pub async fn cleanup_at(
        &self,
        world: &Path,
        date: NaiveDateTime,
        token: &CancellationToken,
    ) -> Result<Vec<Entry>> {
        let scope = self.scope(token);
        let _gate = self.enter(&scope).await?;

        let world = world.to_path_buf();
        let strategy = self.strategy.clone();

        self.worker
            .schedule(
                move |scope| remove_expired(&world, date, strategy.as_ref(), scope),
                &scope,
            )
            .await
    }

    /// Full snapshots whose bytes no longer match the hash in their name.
    pub async fn verify(&self, world: &Path, token: &CancellationToken) -> Result<Vec<Entry>> {
        let world = world.to_path_buf();
        self.worker
            .schedule(
                move |scope| {
                    let repo = Repository::for_world(&world, false)?;
                    let catalog = Catalog::load(&repo, false)?;

                    let mut corrupt = Vec::new();
                    for full in catalog.fulls() {
                        scope.check()?;
                        if !hash::matches(&full.entry.read()?, &full.hash) {
                            warn!("Snapshot {} does not match its hash", full.entry);
                            corrupt.push(full.entry.clone());
                        }
                    }
                    Ok(corrupt)
                },
                &self.scope(token),
            )
            .await
    }

    /// Token cancelled when the service is disposed. Cancelling it stops
    /// pending calls and the cleanup loop but leaves the worker running.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Stop the service: pending calls are cancelled, an in-flight job finishes.
    pub fn dispose(&self) {
        if !self.shutdown.is_cancelled() {
            debug!("Disposing backup service");
        }
        self.shutdown.cancel();
        self.save_gate.close();
        self.worker.shutdown();
    }

    fn scope(&self, token: &CancellationToken) -> CancelScope {
        let scope = CancelScope::from_token(token.clone()).with_token(self.shutdown.clone());
        match self.config.task_timeout() {
            timeout if timeout.is_zero() => scope,
            timeout => scope.with_timeout(timeout),
        }
    }

    async fn enter(&self, scope: &CancelScope) -> Result<SemaphorePermit<'_>> {
        scope.check()?;
        tokio::select! {
            biased;
            _ = scope.cancelled() => Err(BackupError::Canceled),
            permit = self.save_gate.acquire() => permit
                .map_err(|_| BackupError::Worker("service is disposed".to_string())),
        }
    }

    fn last_save_start(&self) -> Option<Instant> {
        *self.last_save.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for BackupService {
    fn drop(&mut self) {
        self.dispose();
    }
}

fn whole_seconds(timestamp: NaiveDateTime) -> NaiveDateTime {
    timestamp.with_nanosecond(0).unwrap_or(timestamp)
}

fn save_snapshot(
    world: &Path,
    timestamp: NaiveDateTime,
    strategy: &dyn BackupStrategy,
    codec: &dyn DeltaCodec,
    scope: &CancelScope,
) -> Result<SaveOutcome> {
    // Last point a save may stop; past here it always writes a whole entry.
    scope.check()?;

    let repo = Repository::for_world(world, true)?;

    match strategy.select_reference(&repo, timestamp)? {
        None => {
            let data = fs::read(world)?;
            let digest = hash::content_hash(&data);
            let entry = repo.create_entry(
                &naming::entry_path(EntryKind::Full, timestamp, &digest),
                true,
            )?;
            entry.write(&data)?;
            entry.set_modified(timestamp)?;

            info!("Saved world checkpoint {} ({} bytes)", entry, data.len());
            Ok(SaveOutcome::Full(entry))
        }
        Some(reference) => {
            debug!("Diffing {} against {}", world.display(), reference.entry);
            let old = reference.entry.read()?;
            let new = fs::read(world)?;
            let delta = codec.create(&old, &new)?;

            let entry = repo.create_entry(
                &naming::entry_path(EntryKind::Diff, timestamp, &reference.hash),
                false,
            )?;
            entry.write(&delta)?;
            entry.set_modified(timestamp)?;

            info!(
                "Saved world diff {} ({} bytes, {:.1}% of world)",
                entry,
                delta.len(),
                delta_compression_ratio(delta.len(), new.len()) * 100.0
            );
            Ok(SaveOutcome::Diff(entry))
        }
    }
}

fn restore_snapshot(
    world: &Path,
    timestamp: NaiveDateTime,
    codec: &dyn DeltaCodec,
    atomic: bool,
    scope: &CancelScope,
) -> Result<bool> {
    scope.check()?;

    let repo = Repository::for_world(world, false)?;
    let catalog = Catalog::load(&repo, false)?;
    let target = catalog
        .find_near(timestamp, chrono::Duration::seconds(RESTORE_TOLERANCE_SECS))
        .ok_or_else(|| {
            BackupError::NotFound(format!(
                "no backup of {} at {}",
                world.display(),
                timestamp.format(DISPLAY_FORMAT)
            ))
        })?;

    let data = match target.kind {
        EntryKind::Full => target.entry.read()?,
        EntryKind::Diff => {
            let reference = catalog.reference(target).ok_or_else(|| {
                BackupError::NotFound(format!("full snapshot {} for {}", target.hash, target.entry))
            })?;
            debug!("Applying {} to {}", target.entry, reference.entry);
            codec.apply(&reference.entry.read()?, &target.entry.read()?)?
        }
    };

    scope.check()?;
    if atomic {
        replace_file(world, &data)?;
    } else {
        overwrite_file(world, &data)?;
    }

    info!(
        "Restored {} from {}",
        world.display(),
        target.timestamp.format(DISPLAY_FORMAT)
    );
    Ok(true)
}

fn remove_expired(
    world: &Path,
    date: NaiveDateTime,
    strategy: &dyn BackupStrategy,
    scope: &CancelScope,
) -> Result<Vec<Entry>> {
    scope.check()?;

    let repo = match Repository::for_world(world, false) {
        Ok(repo) => repo,
        Err(BackupError::NotFound(_)) => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let expired = strategy.list_expired(&repo, date)?;
    scope.check()?;

    let total = expired.len();
    let mut deleted = Vec::new();
    let mut failures = Vec::new();
    for entry in expired {
        match repo.delete(&entry) {
            Ok(()) => deleted.push(entry),
            Err(e) => {
                warn!("Failed to delete {}: {}", entry, e);
                failures.push(e);
            }
        }
    }

    if deleted.is_empty() {
        if let Some(err) = BackupError::from_failures(failures) {
            return Err(err);
        }
    }

    let folders: BTreeSet<PathBuf> = deleted
        .iter()
        .filter_map(|entry| entry.real_path().parent().map(Path::to_path_buf))
        .collect();
    for folder in folders {
        if let Err(e) = repo.prune_empty_dirs(&folder) {
            debug!("Could not prune {}: {}", folder.display(), e);
        }
    }

    info!(
        "Cleanup of {} removed {} of {} expired entries",
        world.display(),
        deleted.len(),
        total
    );
    Ok(deleted)
}

/// Truncate and rewrite `path` in place.
fn overwrite_file(path: &Path, data: &[u8]) -> Result<()> {
    let mut file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)?;
    file.write_all(data)?;
    file.sync_all()?;
    Ok(())
}

/// Write `data` next to `path` and rename it over `path`.
fn replace_file(path: &Path, data: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));

    let mut temp = tempfile::NamedTempFile::new_in(dir)?;
    temp.write_all(data)?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| BackupError::Io(e.error))?;
    Ok(())
}
