//! Record — one symbol's market data for one calendar day.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};

/// Caller-supplied record before canonicalization.
///
/// Keys are matched case-insensitively; values may be numbers or numeric strings.
pub type RawRecord = serde_json::Map<String, Value>;

/// Field names of the fixed record schema, in on-disk order.
pub const CORE_FIELDS: [&str; 7] = ["date", "code", "open", "high", "low", "close", "volume"];

/// Canonical daily record.
///
/// Only produced by the normalizer (or read back from the store), so every key
/// is lower-case and every numeric field is finite.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub date: NaiveDate,
    pub code: String,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    /// Extension fields, carried through untouched apart from key case.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Record {
    /// Plain OHLCV record with no extension fields.
    pub fn new(
        date: NaiveDate,
        code: impl Into<String>,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    ) -> Self {
        Self {
            date,
            code: code.into(),
            open,
            high,
            low,
            close,
            volume,
            extra: BTreeMap::new(),
        }
    }

    /// The date formatted as the snapshot key (`YYYY-MM-DD`).
    pub fn date_key(&self) -> String {
        self.date.format("%Y-%m-%d").to_string()
    }
}

/// Inclusive date window used when reading snapshots.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

impl DateRange {
    pub fn new(start: Option<NaiveDate>, end: Option<NaiveDate>) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start.map_or(true, |s| date >= s) && self.end.map_or(true, |e| date <= e)
    }
}

/// Turn an arbitrary record sequence into a snapshot: unique dates, ascending.
///
/// When a date repeats, the first occurrence wins.
pub fn canonical_snapshot(records: Vec<Record>) -> Vec<Record> {
    let mut seen = HashSet::with_capacity(records.len());
    let mut out: Vec<Record> = records
        .into_iter()
        .filter(|r| seen.insert(r.date))
        .collect();
    out.sort_by_key(|r| r.date);
    out
}

/// Parse the date spellings accepted at the ingest boundary.
///
/// Accepts `YYYY-MM-DD`, `YYYY/MM/DD`, `YYYYMMDD`, RFC 3339 timestamps and
/// `YYYY-MM-DD HH:MM:SS`; any time-of-day component is discarded.
pub fn parse_date(input: &str) -> Option<NaiveDate> {
    let s = input.trim();
    if s.is_empty() {
        return None;
    }
    for fmt in ["%Y-%m-%d", "%Y/%m/%d", "%Y%m%d"] {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return Some(d);
        }
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.date_naive());
    }
    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt.date());
        }
    }
    None
}

/// Round to `decimals` places, folding `-0.0` into `0.0`.
pub fn round_to(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    let rounded = (value * factor).round() / factor;
    if rounded == 0.0 {
        0.0
    } else {
        rounded
    }
}
