//! JSON-file persistence for snapshots, metadata and the diff log.
//!
//! Layout under the store root:
//!
//! ```text
//! {root}/stock_data.json                         symbol -> [Record]
//! {root}/metadata.json                           Metadata
//! {root}/diff_log.json                           [DiffLogEntry], newest last
//! {root}/backups/{symbol}/backup_{YYYYMMDD_HHMMSS}.json
//! ```
//!
//! Every write goes through a temp file and a rename, so a reader never sees a
//! half-written file. [`PersistentStore::commit_update`] stages all three
//! primary files before renaming any of them and rolls back on a failed rename.

mod atomic;
pub mod error;
pub mod metadata;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, error, info, warn};

use crate::diff::DiffSummary;
use crate::record::{canonical_snapshot, DateRange, Record};
use atomic::{read_optional, remove_stale_temps, restore, write_atomic, StagedFile};

pub use error::{StoreError, StoreResult};
pub use metadata::{DataSourceInfo, DiffLogEntry, Metadata, UpdateHistoryEntry};

pub const DATA_FILE: &str = "stock_data.json";
pub const METADATA_FILE: &str = "metadata.json";
pub const DIFF_LOG_FILE: &str = "diff_log.json";
pub const BACKUP_DIR: &str = "backups";

type SnapshotMap = BTreeMap<String, Vec<Record>>;

/// Retention and window settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreOptions {
    pub diff_log_capacity: usize,
    pub history_capacity: usize,
    pub max_backups_per_symbol: usize,
    /// Window for counting "recent" diff log entries in statistics.
    pub recent_window_hours: i64,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            diff_log_capacity: 1000,
            history_capacity: 100,
            max_backups_per_symbol: 10,
            recent_window_hours: 24,
        }
    }
}

/// Per-symbol numbers for [`StoreStatistics`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolStatistics {
    pub records: usize,
    pub first_date: Option<NaiveDate>,
    pub last_date: Option<NaiveDate>,
    pub source: Option<String>,
    pub last_updated: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreStatistics {
    pub total_symbols: usize,
    pub total_records: usize,
    pub last_updated: Option<DateTime<Utc>>,
    /// Diff log entries inside the recent window.
    pub recent_updates: usize,
    pub symbols: BTreeMap<String, SymbolStatistics>,
    /// Size in bytes of each primary file that exists.
    pub file_sizes: BTreeMap<String, u64>,
}

/// What a retention cleanup did.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CleanupReport {
    pub cutoff: NaiveDate,
    pub symbols_checked: usize,
    pub symbols_cleaned: usize,
    pub records_removed: usize,
    /// `(symbol, reason)` for every symbol that could not be rewritten.
    pub failures: Vec<(String, String)>,
}

/// Document written by export and backup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportDocument {
    pub symbol: String,
    pub exported_at: DateTime<Utc>,
    pub source_info: Option<DataSourceInfo>,
    pub records: Vec<Record>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportSummary {
    pub symbol: String,
    pub destination: PathBuf,
    pub records: usize,
}

/// The on-disk store.
///
/// Reads take no lock. Every read-modify-write of the shared files runs under
/// one store-level lock, so concurrent updates to different symbols never lose
/// each other's writes.
#[derive(Debug)]
pub struct PersistentStore {
    root: PathBuf,
    options: StoreOptions,
    write_lock: Mutex<()>,
}

impl PersistentStore {
    /// Open (creating if needed) a store rooted at `root`.
    ///
    /// Missing files are treated as empty. Temp files from an interrupted
    /// write are removed.
    pub fn open(root: impl Into<PathBuf>, options: StoreOptions) -> StoreResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| StoreError::io(&root, e))?;
        let stale = remove_stale_temps(&root);
        info!(root = %root.display(), stale_temps = stale, "opened store");
        Ok(Self {
            root,
            options,
            write_lock: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn options(&self) -> &StoreOptions {
        &self.options
    }

    fn path(&self, file: &str) -> PathBuf {
        self.root.join(file)
    }

    fn backup_dir(&self, symbol: &str) -> PathBuf {
        self.root.join(BACKUP_DIR).join(sanitize_symbol(symbol))
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        self.write_lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ----- reads -----

    /// Snapshot for `symbol`, optionally restricted to a date range.
    ///
    /// A missing file or symbol yields an empty snapshot.
    pub fn read_snapshot(&self, symbol: &str, range: Option<DateRange>) -> StoreResult<Vec<Record>> {
        let mut data = self.load_data()?;
        let records = data.remove(symbol).unwrap_or_default();
        Ok(match range {
            Some(range) => records.into_iter().filter(|r| range.contains(r.date)).collect(),
            None => records,
        })
    }

    /// Symbols with a stored snapshot, sorted.
    pub fn symbols(&self) -> StoreResult<Vec<String>> {
        Ok(self.load_data()?.into_keys().collect())
    }

    pub fn metadata(&self) -> StoreResult<Metadata> {
        let path = self.path(METADATA_FILE);
        let bytes = read_optional(&path)?;
        parse_or(&path, bytes.as_deref(), || Metadata::new(Utc::now()))
    }

    /// The diff log, oldest first.
    pub fn diff_log(&self) -> StoreResult<Vec<DiffLogEntry>> {
        let path = self.path(DIFF_LOG_FILE);
        let bytes = read_optional(&path)?;
        parse_or(&path, bytes.as_deref(), Vec::new)
    }

    fn load_data(&self) -> StoreResult<SnapshotMap> {
        let path = self.path(DATA_FILE);
        let bytes = read_optional(&path)?;
        parse_or(&path, bytes.as_deref(), SnapshotMap::new)
    }

    // ----- single-file writes -----

    /// Replace the snapshot for `symbol` (deduplicated by date, sorted).
    pub fn save_snapshot(&self, symbol: &str, records: Vec<Record>) -> StoreResult<()> {
        let _guard = self.lock();
        let mut data = self.load_data()?;
        let snapshot = canonical_snapshot(records);
        let count = snapshot.len();
        data.insert(symbol.to_string(), snapshot);
        write_atomic(&self.path(DATA_FILE), &to_json(&data, "snapshot data")?)?;
        debug!(symbol, records = count, "saved snapshot");
        Ok(())
    }

    pub fn append_diff_log(&self, entry: DiffLogEntry) -> StoreResult<()> {
        let _guard = self.lock();
        let mut log = self.diff_log()?;
        metadata::push_bounded(&mut log, entry, self.options.diff_log_capacity);
        write_atomic(&self.path(DIFF_LOG_FILE), &to_json(&log, "diff log")?)
    }

    pub fn update_metadata(
        &self,
        symbol: &str,
        source: &str,
        diff: &DiffSummary,
        total_records: usize,
    ) -> StoreResult<()> {
        let _guard = self.lock();
        let mut meta = self.metadata()?;
        meta.record_update(
            symbol,
            source,
            diff,
            total_records,
            Utc::now(),
            self.options.history_capacity,
        );
        write_atomic(&self.path(METADATA_FILE), &to_json(&meta, "metadata")?)
    }

    // ----- committed update -----

    /// Persist a significant update: new snapshot, diff log entry and
    /// metadata, all or nothing.
    ///
    /// All three files are staged first; a staging failure commits nothing.
    /// If a rename fails, files already renamed are restored from their prior
    /// bytes. [`StoreError::Inconsistent`] is returned only when that
    /// restoration fails too.
    pub fn commit_update(
        &self,
        symbol: &str,
        records: Vec<Record>,
        source: &str,
        diff: &DiffSummary,
    ) -> StoreResult<()> {
        let _guard = self.lock();
        let now = Utc::now();

        let data_path = self.path(DATA_FILE);
        let meta_path = self.path(METADATA_FILE);
        let log_path = self.path(DIFF_LOG_FILE);

        let prior_data = read_optional(&data_path)?;
        let prior_meta = read_optional(&meta_path)?;
        let prior_log = read_optional(&log_path)?;

        let mut data: SnapshotMap = parse_or(&data_path, prior_data.as_deref(), SnapshotMap::new)?;
        let mut meta: Metadata = parse_or(&meta_path, prior_meta.as_deref(), || Metadata::new(now))?;
        let mut log: Vec<DiffLogEntry> = parse_or(&log_path, prior_log.as_deref(), Vec::new)?;

        let snapshot = canonical_snapshot(records);
        let total_records = snapshot.len();
        data.insert(symbol.to_string(), snapshot);
        meta.record_update(
            symbol,
            source,
            diff,
            total_records,
            now,
            self.options.history_capacity,
        );
        metadata::push_bounded(
            &mut log,
            DiffLogEntry::new(symbol, diff, now),
            self.options.diff_log_capacity,
        );

        let mut staged = vec![
            (StagedFile::stage(&data_path, &to_json(&data, "snapshot data")?)?, prior_data),
            (StagedFile::stage(&log_path, &to_json(&log, "diff log")?)?, prior_log),
            (StagedFile::stage(&meta_path, &to_json(&meta, "metadata")?)?, prior_meta),
        ];

        for i in 0..staged.len() {
            if let Err(err) = staged[i].0.commit() {
                warn!(symbol, error = %err, "commit failed, rolling back");
                let mut rollback_failures = Vec::new();
                for (file, prior) in staged[..i].iter().rev() {
                    if let Err(e) = restore(file.target(), prior.as_deref()) {
                        rollback_failures.push(format!("{}: {e}", file.target().display()));
                    }
                }
                if rollback_failures.is_empty() {
                    return Err(err);
                }
                let message = format!(
                    "update of {symbol} failed ({err}) and rollback failed: {}",
                    rollback_failures.join("; ")
                );
                error!("{message}");
                return Err(StoreError::Inconsistent(message));
            }
        }

        info!(symbol, source, diff = %diff, total_records, "committed update");
        Ok(())
    }

    // ----- statistics -----

    pub fn statistics(&self) -> StoreResult<StoreStatistics> {
        let data = self.load_data()?;
        let meta = self.metadata()?;
        let log = self.diff_log()?;

        // A window reaching past the representable range counts everything.
        let window_start = Duration::try_hours(self.options.recent_window_hours)
            .and_then(|window| Utc::now().checked_sub_signed(window));
        let recent_updates = match window_start {
            Some(start) => log.iter().filter(|e| e.timestamp >= start).count(),
            None => log.len(),
        };

        let symbols: BTreeMap<String, SymbolStatistics> = data
            .iter()
            .map(|(symbol, records)| {
                let info = meta.data_sources.get(symbol);
                let stats = SymbolStatistics {
                    records: records.len(),
                    first_date: records.iter().map(|r| r.date).min(),
                    last_date: records.iter().map(|r| r.date).max(),
                    source: info.map(|i| i.source.clone()),
                    last_updated: info.map(|i| i.last_updated),
                };
                (symbol.clone(), stats)
            })
            .collect();

        let mut file_sizes = BTreeMap::new();
        for file in [DATA_FILE, METADATA_FILE, DIFF_LOG_FILE] {
            if let Ok(m) = fs::metadata(self.path(file)) {
                file_sizes.insert(file.to_string(), m.len());
            }
        }

        Ok(StoreStatistics {
            total_symbols: symbols.len(),
            total_records: symbols.values().map(|s| s.records).sum(),
            last_updated: meta.data_sources.values().map(|i| i.last_updated).max(),
            recent_updates,
            symbols,
            file_sizes,
        })
    }

    // ----- export / backup / retention -----

    /// Write one symbol's snapshot and provenance to `destination`.
    ///
    /// The primary store files are only read.
    pub fn export_snapshot(&self, symbol: &str, destination: &Path) -> StoreResult<ExportSummary> {
        let document = self.export_document(symbol)?;
        if let Some(parent) = destination.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
        }
        write_atomic(destination, &to_json(&document, "export")?)?;
        info!(symbol, destination = %destination.display(), records = document.records.len(), "exported snapshot");
        Ok(ExportSummary {
            symbol: symbol.to_string(),
            destination: destination.to_path_buf(),
            records: document.records.len(),
        })
    }

    fn export_document(&self, symbol: &str) -> StoreResult<ExportDocument> {
        let mut data = self.load_data()?;
        let records = data
            .remove(symbol)
            .ok_or_else(|| StoreError::NotFound(format!("symbol {symbol}")))?;
        let source_info = self.metadata()?.data_sources.remove(symbol);
        Ok(ExportDocument {
            symbol: symbol.to_string(),
            exported_at: Utc::now(),
            source_info,
            records,
        })
    }

    /// Timestamped copy of one symbol's snapshot under `backups/{symbol}/`.
    ///
    /// Best-effort: failures are logged and yield `None`. Older backups beyond
    /// `max_backups_per_symbol` are pruned.
    pub fn create_backup(&self, symbol: &str) -> Option<PathBuf> {
        match self.try_create_backup(symbol) {
            Ok(path) => {
                info!(symbol, path = %path.display(), "created backup");
                if let Err(e) = self.prune_backups(symbol) {
                    warn!(symbol, error = %e, "backup pruning failed");
                }
                Some(path)
            }
            Err(e) => {
                warn!(symbol, error = %e, "backup failed");
                None
            }
        }
    }

    fn try_create_backup(&self, symbol: &str) -> StoreResult<PathBuf> {
        let document = self.export_document(symbol)?;
        let dir = self.backup_dir(symbol);
        fs::create_dir_all(&dir).map_err(|e| StoreError::io(&dir, e))?;

        let stamp = document.exported_at.format("%Y%m%d_%H%M%S").to_string();
        let mut path = dir.join(format!("backup_{stamp}.json"));
        let mut suffix = 1;
        while path.exists() {
            path = dir.join(format!("backup_{stamp}_{suffix}.json"));
            suffix += 1;
        }
        write_atomic(&path, &to_json(&document, "backup")?)?;
        Ok(path)
    }

    fn prune_backups(&self, symbol: &str) -> StoreResult<()> {
        let backups = self.list_backups(symbol)?;
        let excess = backups.len().saturating_sub(self.options.max_backups_per_symbol);
        for old in &backups[..excess] {
            fs::remove_file(old).map_err(|e| StoreError::io(old, e))?;
            debug!(symbol, path = %old.display(), "pruned backup");
        }
        Ok(())
    }

    /// Backup files for `symbol`, oldest first.
    pub fn list_backups(&self, symbol: &str) -> StoreResult<Vec<PathBuf>> {
        let dir = self.backup_dir(symbol);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::io(&dir, e)),
        };
        let mut backups: Vec<PathBuf> = entries
            .flatten()
            .map(|e| e.path())
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with("backup_") && n.ends_with(".json"))
            })
            .collect();
        backups.sort();
        Ok(backups)
    }

    /// Drop records dated before `cutoff` from every symbol.
    ///
    /// Each symbol is rewritten on its own; a symbol that fails is recorded in
    /// the report and the rest continue.
    /// Symbols left without records are removed from the snapshot file; their
    /// provenance stays in metadata with a record count of zero.
    pub fn cleanup(&self, cutoff: NaiveDate) -> StoreResult<CleanupReport> {
        let _guard = self.lock();
        let data_path = self.path(DATA_FILE);
        let mut data = self.load_data()?;

        let mut report = CleanupReport {
            cutoff,
            symbols_checked: data.len(),
            symbols_cleaned: 0,
            records_removed: 0,
            failures: Vec::new(),
        };
        let mut cleaned: Vec<(String, usize)> = Vec::new();

        let symbols: Vec<String> = data.keys().cloned().collect();
        for symbol in symbols {
            let Some(records) = data.get(&symbol) else {
                continue;
            };
            let kept: Vec<Record> = records.iter().filter(|r| r.date >= cutoff).cloned().collect();
            let removed = records.len() - kept.len();
            if removed == 0 {
                continue;
            }

            // A symbol with nothing left is dropped from the snapshot file.
            let previous = if kept.is_empty() {
                data.remove(&symbol)
            } else {
                data.insert(symbol.clone(), kept)
            };
            let written = to_json(&data, "snapshot data").and_then(|bytes| write_atomic(&data_path, &bytes));
            match written {
                Ok(()) => {
                    report.symbols_cleaned += 1;
                    report.records_removed += removed;
                    let remaining = data.get(&symbol).map_or(0, Vec::len);
                    cleaned.push((symbol.clone(), remaining));
                    debug!(symbol = %symbol, removed, "cleaned old records");
                }
                Err(e) => {
                    warn!(symbol = %symbol, error = %e, "cleanup failed for symbol");
                    if let Some(previous) = previous {
                        data.insert(symbol.clone(), previous);
                    }
                    report.failures.push((symbol, e.to_string()));
                }
            }
        }

        if !cleaned.is_empty() {
            if let Err(e) = self.sync_record_counts(&cleaned) {
                warn!(error = %e, "could not update metadata after cleanup");
                report.failures.push((METADATA_FILE.to_string(), e.to_string()));
            }
        }

        info!(
            %cutoff,
            cleaned = report.symbols_cleaned,
            removed = report.records_removed,
            failed = report.failures.len(),
            "cleanup finished"
        );
        Ok(report)
    }

    fn sync_record_counts(&self, counts: &[(String, usize)]) -> StoreResult<()> {
        let mut meta = self.metadata()?;
        for (symbol, remaining) in counts {
            if let Some(info) = meta.data_sources.get_mut(symbol) {
                info.total_records = *remaining;
            }
        }
        write_atomic(&self.path(METADATA_FILE), &to_json(&meta, "metadata")?)
    }
}

fn to_json<T: Serialize>(value: &T, what: &'static str) -> StoreResult<Vec<u8>> {
    serde_json::to_vec_pretty(value).map_err(|source| StoreError::Serialize { what, source })
}

fn parse_or<T: DeserializeOwned>(
    path: &Path,
    bytes: Option<&[u8]>,
    default: impl FnOnce() -> T,
) -> StoreResult<T> {
    match bytes {
        None => Ok(default()),
        Some(bytes) => serde_json::from_slice(bytes).map_err(|source| StoreError::Corrupt {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Directory-safe form of a symbol code.
fn sanitize_symbol(symbol: &str) -> String {
    let cleaned: String = symbol
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() || cleaned.chars().all(|c| c == '.') {
        "_".to_string()
    } else {
        cleaned
    }
}
