//! Store-wide metadata and the diff log entry format.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::diff::DiffSummary;

/// Format version written into `metadata.json`.
pub const METADATA_VERSION: &str = "1.0";

/// Per-symbol provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSourceInfo {
    pub source: String,
    pub last_updated: DateTime<Utc>,
    pub total_records: usize,
    pub last_diff: DiffSummary,
}

/// One committed update, as kept in the metadata history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateHistoryEntry {
    pub timestamp: DateTime<Utc>,
    pub symbol: String,
    pub source: String,
    pub diff: DiffSummary,
    pub total_records: usize,
}

/// Contents of `metadata.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub version: String,
    #[serde(default)]
    pub data_sources: BTreeMap<String, DataSourceInfo>,
    /// Most recent first.
    #[serde(default)]
    pub update_history: Vec<UpdateHistoryEntry>,
}

impl Metadata {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            created_at: now,
            last_updated: now,
            version: METADATA_VERSION.to_string(),
            data_sources: BTreeMap::new(),
            update_history: Vec::new(),
        }
    }

    /// Record a committed update for `symbol`, keeping at most `history_capacity` history entries.
    pub fn record_update(
        &mut self,
        symbol: &str,
        source: &str,
        diff: &DiffSummary,
        total_records: usize,
        now: DateTime<Utc>,
        history_capacity: usize,
    ) {
        self.last_updated = now;
        self.data_sources.insert(
            symbol.to_string(),
            DataSourceInfo {
                source: source.to_string(),
                last_updated: now,
                total_records,
                last_diff: diff.clone(),
            },
        );
        self.update_history.insert(
            0,
            UpdateHistoryEntry {
                timestamp: now,
                symbol: symbol.to_string(),
                source: source.to_string(),
                diff: diff.clone(),
                total_records,
            },
        );
        self.update_history.truncate(history_capacity);
    }
}

/// One line of the global diff log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiffLogEntry {
    pub timestamp: DateTime<Utc>,
    pub symbol: String,
    pub diff: DiffSummary,
    pub content_hash: String,
}

impl DiffLogEntry {
    pub fn new(symbol: &str, diff: &DiffSummary, timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            symbol: symbol.to_string(),
            diff: diff.clone(),
            content_hash: diff.content_hash.clone(),
        }
    }
}

/// Append to a bounded FIFO log, dropping the oldest entries beyond `capacity`.
pub(crate) fn push_bounded(log: &mut Vec<DiffLogEntry>, entry: DiffLogEntry, capacity: usize) {
    log.push(entry);
    if log.len() > capacity {
        let excess = log.len() - capacity;
        log.drain(..excess);
    }
}
