//! The update pipeline: validate → read → diff → persist → report.
//!
//! Each call is one pass with no state carried between calls apart from the
//! diff cache and the running statistics, both owned by the updater instance.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use deltasync_core::store::{CleanupReport, DiffLogEntry, ExportSummary, StoreStatistics};
use deltasync_core::{
    canonical_snapshot, CacheStats, DiffEngine, DiffResult, IntegrityValidator, PersistentStore,
    RawRecord, StoreError, ValidationResult,
};

use crate::config::{ConfigError, UpdaterConfig};
use crate::stats::UpdaterStatistics;

/// Hard failures of an updater call.
///
/// Everything else (invalid data, a write that failed cleanly) is reported
/// through [`UpdateResult::status`].
#[derive(Debug, Error)]
pub enum UpdateError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateStatus {
    /// Significant changes were committed.
    Success,
    /// Nothing (or too little) changed; the store was not touched.
    NoChange,
    /// The batch failed validation; nothing was diffed or persisted.
    ValidationError,
    /// Reading or writing the store failed; the store is unchanged.
    Failed,
}

/// Structured outcome of one `apply_update` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateResult {
    pub symbol: String,
    pub source: String,
    pub status: UpdateStatus,
    pub message: String,
    pub diff: Option<DiffResult>,
    pub validation: ValidationResult,
    /// Records in the committed snapshot (0 unless `Success`).
    pub records_written: usize,
    pub timestamp: DateTime<Utc>,
    pub processing_time_ms: u64,
}

impl UpdateResult {
    /// Success or NoChange.
    pub fn is_success(&self) -> bool {
        matches!(self.status, UpdateStatus::Success | UpdateStatus::NoChange)
    }
}

/// One item of a batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateRequest {
    pub symbol: String,
    pub records: Vec<RawRecord>,
    pub source: String,
}

impl UpdateRequest {
    pub fn new(symbol: impl Into<String>, records: Vec<RawRecord>, source: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            records,
            source: source.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchResult {
    pub results: Vec<UpdateResult>,
    pub succeeded: usize,
    pub failed: usize,
    pub total: usize,
    pub processing_time_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptimizeReport {
    pub symbol: String,
    pub records_before: usize,
    pub records_after: usize,
    pub rewritten: bool,
}

impl OptimizeReport {
    pub fn duplicates_removed(&self) -> usize {
        self.records_before - self.records_after
    }
}

/// Updater, cache and store statistics together.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdaterReport {
    pub updater: UpdaterStatistics,
    pub cache: CacheStats,
    /// `None` when the store could not be read.
    pub store: Option<StoreStatistics>,
}

/// Differential updater for per-symbol daily snapshots.
///
/// `Send + Sync`; share it behind an `Arc`. Concurrent calls for different
/// symbols are safe. Calls for the same symbol must come from one writer.
#[derive(Debug)]
pub struct DifferentialUpdater {
    config: UpdaterConfig,
    validator: IntegrityValidator,
    engine: DiffEngine,
    store: PersistentStore,
    stats: Mutex<UpdaterStatistics>,
}

impl DifferentialUpdater {
    /// Validate the config and open the store it points at.
    pub fn open(config: UpdaterConfig) -> Result<Self, UpdateError> {
        config.validate()?;
        let store = PersistentStore::open(&config.store_root, config.store_options())?;
        info!(root = %config.store_root.display(), "updater ready");
        Ok(Self {
            validator: IntegrityValidator::new(config.validation_rules()),
            engine: DiffEngine::new(config.diff_options()),
            store,
            stats: Mutex::new(UpdaterStatistics::default()),
            config,
        })
    }

    pub fn config(&self) -> &UpdaterConfig {
        &self.config
    }

    pub fn store(&self) -> &PersistentStore {
        &self.store
    }

    pub fn engine(&self) -> &DiffEngine {
        &self.engine
    }

    fn lock_stats(&self) -> MutexGuard<'_, UpdaterStatistics> {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply one batch of raw records for `symbol`.
    ///
    /// Returns `Err` only for a blank symbol or when a failed commit could
    /// not be rolled back.
    pub fn apply_update(
        &self,
        symbol: &str,
        records: &[RawRecord],
        source: &str,
    ) -> Result<UpdateResult, UpdateError> {
        let started = Instant::now();
        let symbol = require_symbol(symbol)?;
        let call = Call {
            symbol,
            source,
            started,
        };

        let existing = self.store.read_snapshot(symbol, None);
        let report = self
            .validator
            .validate_for(symbol, records, existing.as_ref().ok().map(Vec::as_slice));

        if !report.result.is_valid {
            warn!(
                symbol,
                issues = report.result.issues.len(),
                "rejected batch: {}",
                report.result.summary()
            );
            let message = format!("validation failed: {}", report.result.summary());
            return Ok(self.finish(&call, UpdateStatus::ValidationError, message, None, report.result, 0));
        }
        if !report.result.warnings.is_empty() {
            debug!(symbol, warnings = report.result.warnings.len(), "batch has warnings");
        }

        let existing = match existing {
            Ok(existing) => existing,
            Err(e) => {
                warn!(symbol, error = %e, "could not read stored snapshot");
                let message = format!("failed to read stored snapshot: {e}");
                return Ok(self.finish(&call, UpdateStatus::Failed, message, None, report.result, 0));
            }
        };

        let diff = self.engine.diff(&existing, &report.records);

        if !diff.summary.is_significant {
            let message = if diff.summary.changed() == 0 {
                "no change"
            } else {
                "below significance threshold"
            };
            debug!(symbol, diff = %diff.summary, "{message}");
            return Ok(self.finish(
                &call,
                UpdateStatus::NoChange,
                message.to_string(),
                Some(diff),
                report.result,
                0,
            ));
        }

        let snapshot = canonical_snapshot(report.records);
        let written = snapshot.len();

        if self.config.backup_before_update && !existing.is_empty() {
            self.store.create_backup(symbol);
        }

        match self.store.commit_update(symbol, snapshot, source, &diff.summary) {
            Ok(()) => {
                let message = format!("applied {}", diff.summary);
                Ok(self.finish(&call, UpdateStatus::Success, message, Some(diff), report.result, written))
            }
            Err(e) if e.is_inconsistent() => {
                error!(symbol, error = %e, "store inconsistent after failed commit");
                self.finish(&call, UpdateStatus::Failed, e.to_string(), Some(diff), report.result, 0);
                Err(UpdateError::Store(e))
            }
            Err(e) => {
                warn!(symbol, error = %e, "commit failed, store unchanged");
                let message = format!("failed to persist update: {e}");
                Ok(self.finish(&call, UpdateStatus::Failed, message, Some(diff), report.result, 0))
            }
        }
    }

    fn finish(
        &self,
        call: &Call<'_>,
        status: UpdateStatus,
        message: String,
        diff: Option<DiffResult>,
        validation: ValidationResult,
        records_written: usize,
    ) -> UpdateResult {
        let processing_time_ms = call.started.elapsed().as_millis() as u64;
        let timestamp = Utc::now();
        self.lock_stats().record(
            status,
            diff.as_ref().map(|d| &d.summary),
            processing_time_ms,
            timestamp,
        );
        if status == UpdateStatus::Success {
            info!(symbol = call.symbol, source = call.source, records_written, processing_time_ms, "{message}");
        }
        UpdateResult {
            symbol: call.symbol.to_string(),
            source: call.source.to_string(),
            status,
            message,
            diff,
            validation,
            records_written,
            timestamp,
            processing_time_ms,
        }
    }

    /// Apply several requests one after another.
    ///
    /// Items are independent: a failing item, including a hard error, becomes
    /// a `Failed` result and the rest still run.
    pub fn batch_apply(&self, requests: Vec<UpdateRequest>) -> BatchResult {
        let started = Instant::now();
        let total = requests.len();
        let mut results = Vec::with_capacity(total);

        for request in requests {
            let item_started = Instant::now();
            match self.apply_update(&request.symbol, &request.records, &request.source) {
                Ok(result) => results.push(result),
                Err(e) => {
                    warn!(symbol = %request.symbol, error = %e, "batch item failed");
                    results.push(UpdateResult {
                        symbol: request.symbol,
                        source: request.source,
                        status: UpdateStatus::Failed,
                        message: e.to_string(),
                        diff: None,
                        validation: not_validated(),
                        records_written: 0,
                        timestamp: Utc::now(),
                        processing_time_ms: item_started.elapsed().as_millis() as u64,
                    });
                }
            }
        }

        let succeeded = results.iter().filter(|r| r.is_success()).count();
        let batch = BatchResult {
            failed: total - succeeded,
            succeeded,
            total,
            results,
            processing_time_ms: started.elapsed().as_millis() as u64,
        };
        info!(
            total = batch.total,
            succeeded = batch.succeeded,
            failed = batch.failed,
            "batch finished"
        );
        batch
    }

    /// Deduplicate (first occurrence wins) and re-sort a stored snapshot.
    ///
    /// Only rewrites the file when something changed.
    pub fn optimize_snapshot(&self, symbol: &str) -> Result<OptimizeReport, UpdateError> {
        let symbol = require_symbol(symbol)?;
        let records = self.store.read_snapshot(symbol, None)?;
        let before = records.len();
        let optimized = canonical_snapshot(records.clone());
        let rewritten = optimized != records;
        let after = optimized.len();
        if rewritten {
            self.store.save_snapshot(symbol, optimized)?;
            info!(symbol, before, after, "optimized snapshot");
        }
        Ok(OptimizeReport {
            symbol: symbol.to_string(),
            records_before: before,
            records_after: after,
            rewritten,
        })
    }

    /// Updater counters, cache counters and (best-effort) store statistics.
    pub fn statistics(&self) -> UpdaterReport {
        let store = match self.store.statistics() {
            Ok(stats) => Some(stats),
            Err(e) => {
                warn!(error = %e, "store statistics unavailable");
                None
            }
        };
        UpdaterReport {
            updater: self.lock_stats().clone(),
            cache: self.engine.cache_stats(),
            store,
        }
    }

    pub fn reset_statistics(&self) {
        *self.lock_stats() = UpdaterStatistics::default();
    }

    /// Diff log entries, newest first, optionally for one symbol.
    pub fn history(&self, symbol: Option<&str>, limit: usize) -> Result<Vec<DiffLogEntry>, UpdateError> {
        let log = self.store.diff_log()?;
        Ok(log
            .into_iter()
            .rev()
            .filter(|e| symbol.map_or(true, |s| e.symbol == s))
            .take(limit)
            .collect())
    }

    pub fn create_backup(&self, symbol: &str) -> Option<PathBuf> {
        self.store.create_backup(symbol)
    }

    pub fn export_snapshot(&self, symbol: &str, destination: &Path) -> Result<ExportSummary, UpdateError> {
        let symbol = require_symbol(symbol)?;
        Ok(self.store.export_snapshot(symbol, destination)?)
    }

    /// Drop stored records dated before `cutoff`.
    pub fn cleanup_before(&self, cutoff: NaiveDate) -> Result<CleanupReport, UpdateError> {
        Ok(self.store.cleanup(cutoff)?)
    }

    /// Keep only the last `days` days of records, counting from today (UTC).
    ///
    /// A span past the earliest representable date removes nothing.
    pub fn cleanup_older_than(&self, days: i64) -> Result<CleanupReport, UpdateError> {
        if days < 0 {
            return Err(UpdateError::InvalidArgument(format!(
                "retention days must be non-negative, got {days}"
            )));
        }
        // Past the earliest representable day nothing can be old enough to drop.
        let cutoff = Duration::try_days(days)
            .and_then(|span| Utc::now().date_naive().checked_sub_signed(span))
            .unwrap_or(NaiveDate::MIN);
        self.cleanup_before(cutoff)
    }
}

struct Call<'a> {
    symbol: &'a str,
    source: &'a str,
    started: Instant,
}

fn require_symbol(symbol: &str) -> Result<&str, UpdateError> {
    let trimmed = symbol.trim();
    if trimmed.is_empty() {
        return Err(UpdateError::InvalidArgument("symbol must not be empty".into()));
    }
    Ok(trimmed)
}

fn not_validated() -> ValidationResult {
    ValidationResult {
        is_valid: false,
        issues: Vec::new(),
        warnings: Vec::new(),
        quality_score: 0.0,
    }
}
