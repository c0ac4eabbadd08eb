//! Default reference selection and tiered retention.

use super::BackupStrategy;
use crate::catalog::{BackupEntry, Catalog, EntryKind};
use crate::config::{RetentionRule, RuntimeSettings, StrategyConfig};
use crate::repo::{Entry, Repository};
use crate::utils::errors::Result;
use chrono::{Duration, NaiveDateTime};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;

/// Diffs chain off the nearest earlier full snapshot until it is too old or
/// its diffs grow too large; cleanup thins old snapshots tier by tier.
pub struct DefaultStrategy {
    config: StrategyConfig,
    settings: Arc<RuntimeSettings>,
}

impl DefaultStrategy {
    pub fn new(config: StrategyConfig, settings: Arc<RuntimeSettings>) -> Self {
        Self { config, settings }
    }

    fn force_full_after(&self) -> Option<Duration> {
        (self.config.force_full_after_secs > 0)
            .then(|| Duration::seconds(self.config.force_full_after_secs as i64))
    }
}

impl BackupStrategy for DefaultStrategy {
    fn select_reference(
        &self,
        repo: &Repository,
        date: NaiveDateTime,
    ) -> Result<Option<BackupEntry>> {
        let catalog = Catalog::load(repo, false)?;

        // min_by_key keeps the first of equal candidates.
        let Some(full) = catalog
            .fulls()
            .filter(|e| e.timestamp <= date)
            .min_by_key(|e| date - e.timestamp)
        else {
            return Ok(None);
        };

        if let Some(limit) = self.force_full_after() {
            if date - full.timestamp > limit {
                debug!("Reference {} is older than {}s", full.entry, limit.num_seconds());
                return Ok(None);
            }
        }

        let fill_factor = self.settings.fill_factor();
        if fill_factor > 0.0 {
            let mut chained: u64 = 0;
            for diff in catalog
                .diffs()
                .filter(|d| d.timestamp > full.timestamp && d.timestamp <= date)
            {
                chained += diff.entry.len()?;
            }

            let full_len = full.entry.len()?;
            if chained as f64 > fill_factor * full_len as f64 {
                debug!(
                    "Diffs after {} total {} bytes (reference is {} bytes)",
                    full.entry, chained, full_len
                );
                return Ok(None);
            }
        }

        Ok(Some(full.clone()))
    }

    fn list_expired(&self, repo: &Repository, date: NaiveDateTime) -> Result<Vec<Entry>> {
        let catalog = Catalog::load(repo, true)?;
        let mut marked = BTreeSet::new();

        let tiers = [
            (EntryKind::Full, &self.config.retention.full),
            (EntryKind::Diff, &self.config.retention.diff),
        ];
        for (kind, rules) in tiers {
            for rule in rules.iter().filter(|r| r.is_enabled()) {
                let before = marked.len();
                thin(&catalog, kind, rule, date, &mut marked);
                debug!(
                    "Retention {:?}/{} marked {} entries",
                    kind,
                    rule.name,
                    marked.len() - before
                );
            }
        }

        for orphan in catalog.diffs().filter(|d| !d.valid) {
            marked.insert(orphan.entry.clone());
        }

        Ok(marked.into_iter().collect())
    }
}

/// Mark entries older than the rule's age that sit within `keep_every` of
/// the last kept one. The oldest candidate is always kept.
fn thin(
    catalog: &Catalog,
    kind: EntryKind,
    rule: &RetentionRule,
    date: NaiveDateTime,
    marked: &mut BTreeSet<Entry>,
) {
    let age = rule.age();
    let keep_every = rule.keep_every();

    let mut candidates: Vec<&BackupEntry> = catalog
        .entries()
        .iter()
        .filter(|e| e.kind == kind)
        .filter(|e| date - e.timestamp > age)
        .filter(|e| !marked.contains(&e.entry))
        .collect();
    candidates.sort_by_key(|e| e.timestamp);

    let mut candidates = candidates.into_iter();
    let Some(first) = candidates.next() else {
        return;
    };

    let mut last_kept = first.timestamp;
    for entry in candidates {
        if entry.timestamp - last_kept <= keep_every {
            marked.insert(entry.entry.clone());
        } else {
            last_kept = entry.timestamp;
        }
    }
}
