//! Content hashing of canonicalized record batches.
//!
//! The one hash in the crate: SHA-256 over the date-sorted canonical JSON form.
//! Each record becomes a key-sorted object of lower-case keys with every number
//! rounded to a fixed precision, so key case, record order and floating-point
//! noise below the precision never change the digest.
//!
//! Used only as a cache/dedup key, not for anything security-relevant.

use serde_json::{Map, Number, Value};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use crate::record::{round_to, Record};

/// Default rounding precision for hashing and comparison.
pub const DEFAULT_DECIMALS: u32 = 6;

/// Canonical form of one record: sorted lower-case keys, rounded numbers.
pub type CanonicalRecord = BTreeMap<String, Value>;

/// Deterministic hasher for record batches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashCalculator {
    decimals: u32,
}

impl Default for HashCalculator {
    fn default() -> Self {
        Self::new(DEFAULT_DECIMALS)
    }
}

impl HashCalculator {
    pub fn new(decimals: u32) -> Self {
        Self { decimals }
    }

    pub fn decimals(&self) -> u32 {
        self.decimals
    }

    /// Hex SHA-256 of the canonical form, or `""` if the batch holds a
    /// non-finite number and therefore has no canonical form.
    pub fn hash(&self, records: &[Record]) -> String {
        match self.canonical_json(records) {
            Some(json) => hex_digest(json.as_bytes()),
            None => String::new(),
        }
    }

    /// Canonical JSON text that [`hash`](Self::hash) digests.
    pub fn canonical_json(&self, records: &[Record]) -> Option<String> {
        let mut sorted: Vec<&Record> = records.iter().collect();
        sorted.sort_by_key(|r| r.date);

        let canonical = sorted
            .into_iter()
            .map(|r| canonical_record(r, self.decimals))
            .collect::<Option<Vec<_>>>()?;

        serde_json::to_string(&canonical).ok()
    }
}

/// Canonical form of a single record.
///
/// Core fields override any same-named extension key.
pub fn canonical_record(record: &Record, decimals: u32) -> Option<CanonicalRecord> {
    let mut out = CanonicalRecord::new();
    for (key, value) in &record.extra {
        out.insert(key.to_ascii_lowercase(), canonical_value(value, decimals)?);
    }
    out.insert("date".into(), Value::String(record.date_key()));
    out.insert("code".into(), Value::String(record.code.clone()));
    out.insert("open".into(), rounded_number(record.open, decimals)?);
    out.insert("high".into(), rounded_number(record.high, decimals)?);
    out.insert("low".into(), rounded_number(record.low, decimals)?);
    out.insert("close".into(), rounded_number(record.close, decimals)?);
    out.insert("volume".into(), rounded_number(record.volume, decimals)?);
    Some(out)
}

/// Canonicalize an arbitrary JSON value: numbers rounded, object keys lower-cased and sorted.
pub fn canonical_value(value: &Value, decimals: u32) -> Option<Value> {
    match value {
        Value::Number(n) => rounded_number(n.as_f64()?, decimals),
        Value::Array(items) => items
            .iter()
            .map(|v| canonical_value(v, decimals))
            .collect::<Option<Vec<_>>>()
            .map(Value::Array),
        Value::Object(map) => {
            let sorted = map
                .iter()
                .map(|(k, v)| Some((k.to_ascii_lowercase(), canonical_value(v, decimals)?)))
                .collect::<Option<BTreeMap<_, _>>>()?;
            Some(Value::Object(sorted.into_iter().collect::<Map<_, _>>()))
        }
        other => Some(other.clone()),
    }
}

fn rounded_number(value: f64, decimals: u32) -> Option<Value> {
    if !value.is_finite() {
        return None;
    }
    Number::from_f64(round_to(value, decimals)).map(Value::Number)
}

fn hex_digest(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}
