//! Configuration management for the backup engine.
//!
//! Loads configuration from a TOML file with environment variable overrides.
//! Every field has a default, so a partial file (or none at all) is valid.

use crate::utils::errors::{BackupError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

const MINUTE: u64 = 60;
const HOUR: u64 = 60 * MINUTE;
const DAY: u64 = 24 * HOUR;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub service: ServiceConfig,

    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Minimum spacing between two saves (0 disables throttling)
    #[serde(default = "default_throttle_secs")]
    pub throttle_secs: u64,

    /// Deadline for a single save/restore/cleanup, including queueing
    #[serde(default = "default_task_timeout_secs")]
    pub task_timeout_secs: u64,

    /// How long disposal waits for the IO worker thread to exit
    #[serde(default = "default_worker_join_timeout_secs")]
    pub worker_join_timeout_secs: u64,

    /// Restore through a temp file + rename instead of overwriting in place
    #[serde(default)]
    pub atomic_restore: bool,

    #[serde(default)]
    pub strategy: StrategyConfig,

    #[serde(default)]
    pub cleanup: CleanupConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfig {
    /// Age past which a reference snapshot is no longer used (0 disables)
    #[serde(default = "default_force_full_after_secs")]
    pub force_full_after_secs: u64,

    /// Accumulated diff size / reference size that forces a new full snapshot (<= 0 disables)
    #[serde(default = "default_fill_factor")]
    pub fill_factor: f64,

    #[serde(default)]
    pub retention: RetentionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// Tiers applied to full snapshots, coarsest first
    #[serde(default = "default_full_rules")]
    pub full: Vec<RetentionRule>,

    /// Tiers applied to diff entries, coarsest first
    #[serde(default = "default_diff_rules")]
    pub diff: Vec<RetentionRule>,
}

/// Entries older than `age_secs` are thinned to one per `keep_every_secs`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionRule {
    pub name: String,

    /// 0 disables the rule
    pub age_secs: u64,

    pub keep_every_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupConfig {
    /// Period of the scheduled cleanup loop (0 disables it)
    #[serde(default = "default_cleanup_period_secs")]
    pub period_secs: u64,

    /// Upper bound of the random delay added before each scheduled run
    #[serde(default = "default_cleanup_jitter_secs")]
    pub jitter_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default values
fn default_throttle_secs() -> u64 {
    MINUTE
}

fn default_task_timeout_secs() -> u64 {
    3 * MINUTE
}

fn default_worker_join_timeout_secs() -> u64 {
    5
}

fn default_force_full_after_secs() -> u64 {
    7 * DAY
}

fn default_fill_factor() -> f64 {
    0.5
}

fn default_full_rules() -> Vec<RetentionRule> {
    vec![
        RetentionRule::new("yearly", 365 * DAY, 3 * DAY),
        RetentionRule::new("monthly", 30 * DAY, 12 * HOUR),
        RetentionRule::new("weekly", 7 * DAY, HOUR),
    ]
}

fn default_diff_rules() -> Vec<RetentionRule> {
    vec![
        RetentionRule::new("yearly", 365 * DAY, 365 * DAY),
        RetentionRule::new("monthly", 30 * DAY, 30 * MINUTE),
        RetentionRule::new("weekly", 7 * DAY, MINUTE),
    ]
}

fn default_cleanup_period_secs() -> u64 {
    12 * HOUR
}

fn default_cleanup_jitter_secs() -> u64 {
    5 * MINUTE
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            throttle_secs: default_throttle_secs(),
            task_timeout_secs: default_task_timeout_secs(),
            worker_join_timeout_secs: default_worker_join_timeout_secs(),
            atomic_restore: false,
            strategy: StrategyConfig::default(),
            cleanup: CleanupConfig::default(),
        }
    }
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            force_full_after_secs: default_force_full_after_secs(),
            fill_factor: default_fill_factor(),
            retention: RetentionConfig::default(),
        }
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            full: default_full_rules(),
            diff: default_diff_rules(),
        }
    }
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            period_secs: default_cleanup_period_secs(),
            jitter_secs: default_cleanup_jitter_secs(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl RetentionRule {
    pub fn new(name: &str, age_secs: u64, keep_every_secs: u64) -> Self {
        Self {
            name: name.to_string(),
            age_secs,
            keep_every_secs,
        }
    }

    pub fn age(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.age_secs as i64)
    }

    pub fn keep_every(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.keep_every_secs as i64)
    }

    pub fn is_enabled(&self) -> bool {
        self.age_secs > 0
    }
}

impl ServiceConfig {
    pub fn throttle(&self) -> Duration {
        Duration::from_secs(self.throttle_secs)
    }

    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_secs)
    }

    pub fn worker_join_timeout(&self) -> Duration {
        Duration::from_secs(self.worker_join_timeout_secs)
    }
}

impl CleanupConfig {
    pub fn period(&self) -> Duration {
        Duration::from_secs(self.period_secs)
    }

    pub fn jitter(&self) -> Duration {
        Duration::from_secs(self.jitter_secs)
    }
}

impl Config {
    /// Load configuration from a TOML file, then apply environment overrides
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&content)
            .map_err(|e| BackupError::Config(format!("{}: {}", path.display(), e)))?;
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Apply `WORLD_BACKUP_*` environment overrides.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("WORLD_BACKUP_THROTTLE_SECS") {
            self.service.throttle_secs = parse_override("WORLD_BACKUP_THROTTLE_SECS", &value)?;
        }

        if let Some(value) = lookup("WORLD_BACKUP_FORCE_FULL_DAYS") {
            let days: f64 = parse_override("WORLD_BACKUP_FORCE_FULL_DAYS", &value)?;
            self.service.strategy.force_full_after_secs = (days.max(0.0) * DAY as f64) as u64;
        }

        if let Some(value) = lookup("WORLD_BACKUP_FILL_FACTOR") {
            self.service.strategy.fill_factor = parse_override("WORLD_BACKUP_FILL_FACTOR", &value)?;
        }

        Ok(())
    }
}

fn parse_override<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| BackupError::Config(format!("invalid value for {}: {:?}", key, value)))
}

/// The few settings that may change while a service is running.
///
/// Stored as atomics so readers on the IO worker thread never block.
#[derive(Debug)]
pub struct RuntimeSettings {
    throttle_millis: AtomicU64,
    fill_factor_bits: AtomicU64,
}

impl RuntimeSettings {
    pub fn new(throttle: Duration, fill_factor: f64) -> Self {
        Self {
            throttle_millis: AtomicU64::new(throttle.as_millis() as u64),
            fill_factor_bits: AtomicU64::new(fill_factor.to_bits()),
        }
    }

    pub fn from_config(config: &ServiceConfig) -> Self {
        Self::new(config.throttle(), config.strategy.fill_factor)
    }

    pub fn throttle(&self) -> Duration {
        Duration::from_millis(self.throttle_millis.load(Ordering::Acquire))
    }

    pub fn set_throttle(&self, throttle: Duration) {
        self.throttle_millis
            .store(throttle.as_millis() as u64, Ordering::Release);
    }

    pub fn fill_factor(&self) -> f64 {
        f64::from_bits(self.fill_factor_bits.load(Ordering::Acquire))
    }

    pub fn set_fill_factor(&self, fill_factor: f64) {
        self.fill_factor_bits
            .store(fill_factor.to_bits(), Ordering::Release);
    }
}
