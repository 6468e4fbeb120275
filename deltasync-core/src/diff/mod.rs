//! Snapshot diffing.
//!
//! Both sides are keyed by date (first occurrence wins) and compared field by
//! field in canonical form, so every date present on either side lands in
//! exactly one of added, updated, removed or unchanged.

pub mod cache;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tracing::debug;

use crate::hash::{canonical_record, HashCalculator, DEFAULT_DECIMALS};
use crate::record::Record;

pub use cache::{CacheStats, DiffCache};

/// Default number of cached diff summaries.
pub const DEFAULT_CACHE_CAPACITY: usize = 50;

/// Outcome of comparing two snapshots, without timing information.
///
/// This is the part that is cached, logged and stored in metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffSummary {
    pub added: usize,
    pub updated: usize,
    pub removed: usize,
    pub unchanged: usize,
    /// Content hash of the new side.
    pub content_hash: String,
    pub is_significant: bool,
}

impl DiffSummary {
    /// Records that differ between the two sides.
    pub fn changed(&self) -> usize {
        self.added + self.updated + self.removed
    }

    /// Distinct dates across both sides.
    pub fn total(&self) -> usize {
        self.changed() + self.unchanged
    }
}

impl fmt::Display for DiffSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "+{} ~{} -{} ={}",
            self.added, self.updated, self.removed, self.unchanged
        )
    }
}

/// Diff summary plus how long producing it took.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiffResult {
    #[serde(flatten)]
    pub summary: DiffSummary,
    pub processing_time_ms: u64,
    /// The summary came out of the cache; the time is that of the original computation.
    #[serde(default)]
    pub from_cache: bool,
}

/// When a diff counts as worth persisting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignificancePolicy {
    pub min_changed_records: usize,
}

impl Default for SignificancePolicy {
    fn default() -> Self {
        Self {
            min_changed_records: 1,
        }
    }
}

impl SignificancePolicy {
    pub fn is_significant(&self, changed: usize) -> bool {
        changed > 0 && changed >= self.min_changed_records
    }
}

/// Engine construction options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiffOptions {
    pub cache_capacity: usize,
    pub decimals: u32,
    pub significance: SignificancePolicy,
}

impl Default for DiffOptions {
    fn default() -> Self {
        Self {
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            decimals: DEFAULT_DECIMALS,
            significance: SignificancePolicy::default(),
        }
    }
}

/// Differ with a per-instance result cache.
#[derive(Debug)]
pub struct DiffEngine {
    hasher: HashCalculator,
    significance: SignificancePolicy,
    cache: Mutex<DiffCache>,
}

impl Default for DiffEngine {
    fn default() -> Self {
        Self::new(DiffOptions::default())
    }
}

impl DiffEngine {
    pub fn new(options: DiffOptions) -> Self {
        Self {
            hasher: HashCalculator::new(options.decimals),
            significance: options.significance,
            cache: Mutex::new(DiffCache::new(options.cache_capacity)),
        }
    }

    pub fn hasher(&self) -> &HashCalculator {
        &self.hasher
    }

    pub fn significance(&self) -> SignificancePolicy {
        self.significance
    }

    /// Diff `old` against `new`, consulting the cache.
    ///
    /// The cache is skipped when either side has no content hash.
    pub fn diff(&self, old: &[Record], new: &[Record]) -> DiffResult {
        let old_hash = self.hasher.hash(old);
        let new_hash = self.hasher.hash(new);
        let cacheable = !old_hash.is_empty() && !new_hash.is_empty();

        if cacheable {
            if let Some((summary, processing_time_ms)) = self.lock_cache().get(&old_hash, &new_hash)
            {
                debug!(old = %old_hash, new = %new_hash, "diff cache hit");
                return DiffResult {
                    summary,
                    processing_time_ms,
                    from_cache: true,
                };
            }
        }

        let result = self.compute(old, new, new_hash.clone());

        if cacheable {
            let evicted = self.lock_cache().insert(
                &old_hash,
                &new_hash,
                result.summary.clone(),
                result.processing_time_ms,
            );
            if evicted > 0 {
                debug!(evicted, "diff cache evicted entries");
            }
        }
        result
    }

    /// Diff without reading or filling the cache.
    pub fn diff_uncached(&self, old: &[Record], new: &[Record]) -> DiffResult {
        let new_hash = self.hasher.hash(new);
        self.compute(old, new, new_hash)
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.lock_cache().stats()
    }

    pub fn clear_cache(&self) {
        self.lock_cache().clear();
    }

    fn compute(&self, old: &[Record], new: &[Record], content_hash: String) -> DiffResult {
        let started = Instant::now();
        let decimals = self.hasher.decimals();

        let old_by_date = by_date(old);
        let new_by_date = by_date(new);

        let mut summary = DiffSummary {
            content_hash,
            ..DiffSummary::default()
        };

        for (date, new_rec) in &new_by_date {
            match old_by_date.get(date) {
                None => summary.added += 1,
                Some(old_rec) if records_differ(old_rec, new_rec, decimals) => summary.updated += 1,
                Some(_) => summary.unchanged += 1,
            }
        }
        summary.removed = old_by_date
            .keys()
            .filter(|d| !new_by_date.contains_key(d))
            .count();
        summary.is_significant = self.significance.is_significant(summary.changed());

        DiffResult {
            summary,
            processing_time_ms: started.elapsed().as_millis() as u64,
            from_cache: false,
        }
    }

    fn lock_cache(&self) -> MutexGuard<'_, DiffCache> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn by_date(records: &[Record]) -> BTreeMap<NaiveDate, &Record> {
    let mut map = BTreeMap::new();
    for r in records {
        map.entry(r.date).or_insert(r);
    }
    map
}

/// Field-level comparison in canonical form.
///
/// Records without a canonical form (non-finite numbers) fall back to plain equality.
fn records_differ(old: &Record, new: &Record, decimals: u32) -> bool {
    match (canonical_record(old, decimals), canonical_record(new, decimals)) {
        (Some(a), Some(b)) => a != b,
        _ => old != new,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rec(day: u32, close: f64) -> Record {
        Record::new(
            NaiveDate::from_ymd_opt(2024, 1, day).unwrap(),
            "7203",
            100.0,
            110.0,
            90.0,
            close,
            1000.0,
        )
    }

    #[test]
    fn classifies_every_date_once() {
        let engine = DiffEngine::default();
        let old = vec![rec(1, 101.0), rec(2, 102.0), rec(3, 103.0)];
        let new = vec![rec(2, 102.0), rec(3, 199.0), rec(4, 104.0)];
        let s = engine.diff(&old, &new).summary;
        assert_eq!((s.added, s.updated, s.removed, s.unchanged), (1, 1, 1, 1));
        assert!(s.is_significant);
        assert_eq!(s.total(), 4);
        assert_eq!(s.to_string(), "+1 ~1 -1 =1");
    }

    #[test]
    fn identical_inputs_are_not_significant() {
        let engine = DiffEngine::default();
        let snap = vec![rec(1, 101.0), rec(2, 102.0)];
        let s = engine.diff(&snap, &snap).summary;
        assert_eq!((s.added, s.updated, s.removed, s.unchanged), (0, 0, 0, 2));
        assert!(!s.is_significant);
    }

    #[test]
    fn empty_sides() {
        let engine = DiffEngine::default();
        let snap = vec![rec(1, 101.0), rec(2, 102.0)];

        let added = engine.diff(&[], &snap).summary;
        assert_eq!(added.added, 2);
        assert!(added.is_significant);

        let removed = engine.diff(&snap, &[]).summary;
        assert_eq!(removed.removed, 2);

        let nothing = engine.diff(&[], &[]).summary;
        assert_eq!(nothing.total(), 0);
        assert!(!nothing.is_significant);
    }

    #[test]
    fn sub_precision_noise_is_unchanged() {
        let engine = DiffEngine::default();
        let s = engine
            .diff(&[rec(1, 101.0)], &[rec(1, 101.0 + 1e-9)])
            .summary;
        assert_eq!(s.unchanged, 1);
    }

    #[test]
    fn extension_field_on_one_side_is_an_update() {
        let engine = DiffEngine::default();
        let mut tagged = rec(1, 101.0);
        tagged.extra.insert("adj_close".into(), json!(100.0));
        let s = engine.diff(&[rec(1, 101.0)], &[tagged]).summary;
        assert_eq!(s.updated, 1);
    }

    #[test]
    fn duplicate_dates_first_occurrence_wins() {
        let engine = DiffEngine::default();
        let s = engine
            .diff(&[rec(1, 101.0)], &[rec(1, 101.0), rec(1, 555.0)])
            .summary;
        assert_eq!((s.unchanged, s.updated), (1, 0));
    }

    #[test]
    fn threshold_policy_gates_significance() {
        let engine = DiffEngine::new(DiffOptions {
            significance: SignificancePolicy {
                min_changed_records: 3,
            },
            ..DiffOptions::default()
        });
        let s = engine.diff(&[rec(1, 101.0)], &[rec(1, 101.0), rec(2, 102.0)]).summary;
        assert_eq!(s.added, 1);
        assert!(!s.is_significant);
    }

    #[test]
    fn cache_hit_returns_same_summary() {
        let engine = DiffEngine::default();
        let old = vec![rec(1, 101.0)];
        let new = vec![rec(1, 102.0), rec(2, 103.0)];

        let first = engine.diff(&old, &new);
        let second = engine.diff(&old, &new);
        assert!(!first.from_cache);
        assert!(second.from_cache);
        assert_eq!(first.summary, second.summary);
        assert_eq!(first.processing_time_ms, second.processing_time_ms);
        assert_eq!(engine.diff_uncached(&old, &new).summary, first.summary);

        let stats = engine.cache_stats();
        assert_eq!((stats.hits, stats.misses, stats.entries), (1, 1, 1));

        engine.clear_cache();
        assert_eq!(engine.cache_stats().entries, 0);
    }

    #[test]
    fn non_finite_input_bypasses_cache() {
        let engine = DiffEngine::default();
        let mut bad = rec(1, 101.0);
        bad.close = f64::NAN;
        let result = engine.diff(&[rec(1, 101.0)], &[bad]);
        assert_eq!(result.summary.updated, 1);
        assert_eq!(result.summary.content_hash, "");
        assert_eq!(engine.cache_stats().entries, 0);
    }

    #[test]
    fn disabled_cache_still_diffs() {
        let engine = DiffEngine::new(DiffOptions {
            cache_capacity: 0,
            ..DiffOptions::default()
        });
        let a = engine.diff(&[], &[rec(1, 1.0)]);
        let b = engine.diff(&[], &[rec(1, 1.0)]);
        assert_eq!(a.summary, b.summary);
        assert!(!b.from_cache);
        assert_eq!(engine.cache_stats().entries, 0);
    }
}
