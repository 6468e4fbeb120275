//! Ingest-boundary canonicalization.
//!
//! Every caller-supplied record passes through here exactly once. Keys are
//! matched case-insensitively and rewritten to the fixed lower-case schema;
//! downstream code (hashing, diffing, persistence) only ever sees [`Record`].
//!
//! Conversion never panics and never uses errors to skip records: each raw
//! record yields either a `Record` or a `ConversionFailure` listing every field
//! that could not be converted.

use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

use crate::record::{parse_date, RawRecord, Record};

/// Accepted spellings of the symbol-code field, in priority order.
pub const CODE_ALIASES: [&str; 5] = ["code", "symbol", "symbol_code", "symbolcode", "ticker"];

const PRICE_FIELDS: [&str; 4] = ["open", "high", "low", "close"];

/// Why a single field could not be converted.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FieldError {
    #[error("missing required field '{0}'")]
    Missing(&'static str),

    #[error("unparseable date '{0}'")]
    InvalidDate(String),

    #[error("field '{field}' is not a finite number: {value}")]
    NonNumeric { field: &'static str, value: String },

    #[error("symbol code must be a non-empty string or number, got {0}")]
    InvalidCode(String),
}

/// A raw record that could not be converted, with every reason found.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversionFailure {
    pub index: usize,
    pub date: Option<String>,
    pub errors: Vec<FieldError>,
    /// Numeric fields that did convert.
    pub parsed: ParsedFields,
}

/// Numeric fields of one record, each present only if it converted.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ParsedFields {
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub close: Option<f64>,
    pub volume: Option<f64>,
}

impl From<&Record> for ParsedFields {
    fn from(r: &Record) -> Self {
        Self {
            open: Some(r.open),
            high: Some(r.high),
            low: Some(r.low),
            close: Some(r.close),
            volume: Some(r.volume),
        }
    }
}

/// Outcome of normalizing a whole batch: successes and failures side by side.
#[derive(Debug, Clone, Default)]
pub struct NormalizedBatch {
    /// `(input index, record)` for every record that converted.
    pub records: Vec<(usize, Record)>,
    pub failures: Vec<ConversionFailure>,
}

impl NormalizedBatch {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    /// Converted records in input order, without their indices.
    pub fn into_records(self) -> Vec<Record> {
        self.records.into_iter().map(|(_, r)| r).collect()
    }
}

/// Normalize every record of a batch.
pub fn normalize_batch(batch: &[RawRecord]) -> NormalizedBatch {
    let mut out = NormalizedBatch::default();
    for (index, raw) in batch.iter().enumerate() {
        match normalize_record(index, raw) {
            Ok(record) => out.records.push((index, record)),
            Err(failure) => out.failures.push(failure),
        }
    }
    out
}

/// Convert one raw record to the fixed schema.
pub fn normalize_record(index: usize, raw: &RawRecord) -> Result<Record, ConversionFailure> {
    // One lower-casing pass; when two keys collide the first in map order wins.
    let mut fields: BTreeMap<String, &Value> = BTreeMap::new();
    for (key, value) in raw {
        fields.entry(key.to_ascii_lowercase()).or_insert(value);
    }

    let mut errors = Vec::new();

    let date_value = present(&fields, "date");
    let date = match date_value {
        None => {
            errors.push(FieldError::Missing("date"));
            None
        }
        Some(v) => {
            let text = scalar_text(v);
            let parsed = text.as_deref().and_then(parse_date);
            if parsed.is_none() {
                errors.push(FieldError::InvalidDate(
                    text.unwrap_or_else(|| v.to_string()),
                ));
            }
            parsed
        }
    };

    let code_key = CODE_ALIASES
        .iter()
        .copied()
        .find(|alias| present(&fields, alias).is_some());
    let code = match code_key.and_then(|k| present(&fields, k)) {
        None => {
            errors.push(FieldError::Missing("code"));
            None
        }
        Some(v) => match v {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            other => {
                errors.push(FieldError::InvalidCode(other.to_string()));
                None
            }
        },
    };

    let mut prices: [Option<f64>; 4] = [None; 4];
    for (slot, field) in prices.iter_mut().zip(PRICE_FIELDS) {
        match numeric_field(&fields, field) {
            Ok(v) => *slot = Some(v),
            Err(e) => errors.push(e),
        }
    }
    let volume = match numeric_field(&fields, "volume") {
        Ok(v) => Some(v),
        Err(e) => {
            errors.push(e);
            None
        }
    };

    let date_text = date_value.and_then(scalar_text);
    let [open, high, low, close] = prices;
    let parsed = ParsedFields {
        open,
        high,
        low,
        close,
        volume,
    };

    match (date, code, prices, volume) {
        (Some(date), Some(code), [Some(open), Some(high), Some(low), Some(close)], Some(volume))
            if errors.is_empty() =>
        {
            let mut consumed: Vec<&str> = crate::record::CORE_FIELDS.to_vec();
            if let Some(k) = code_key {
                consumed.push(k);
            }
            let extra = fields
                .iter()
                .filter(|(k, _)| !consumed.contains(&k.as_str()))
                .map(|(k, v)| (k.clone(), (*v).clone()))
                .collect();
            Ok(Record {
                date,
                code,
                open,
                high,
                low,
                close,
                volume,
                extra,
            })
        }
        _ => Err(ConversionFailure {
            index,
            date: date_text,
            errors,
            parsed,
        }),
    }
}

/// Non-null value for a lower-case key.
fn present<'a>(fields: &BTreeMap<String, &'a Value>, key: &str) -> Option<&'a Value> {
    fields.get(key).copied().filter(|v| !v.is_null())
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn numeric_field(
    fields: &BTreeMap<String, &Value>,
    field: &'static str,
) -> Result<f64, FieldError> {
    let value = present(fields, field).ok_or(FieldError::Missing(field))?;
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match parsed {
        Some(v) if v.is_finite() => Ok(v),
        _ => Err(FieldError::NonNumeric {
            field,
            value: value.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use serde_json::json;

    fn raw(v: Value) -> RawRecord {
        v.as_object().unwrap().clone()
    }

    #[test]
    fn mixed_case_keys_normalize_to_fixed_schema() {
        let r = raw(json!({
            "Date": "2024-01-01", "CODE": "7203", "Open": 100, "HIGH": "105.5",
            "low": 98, "Close": 103, "Volume": 1000000, "Adj_Close": 102.9
        }));
        let rec = normalize_record(0, &r).unwrap();
        assert_eq!(rec.date, NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
        assert_eq!(rec.code, "7203");
        assert_eq!(rec.high, 105.5);
        assert_eq!(rec.volume, 1_000_000.0);
        assert_eq!(rec.extra.get("adj_close"), Some(&json!(102.9)));
        assert_eq!(rec.extra.len(), 1);
    }

    #[test]
    fn numeric_code_and_symbol_alias_accepted() {
        let r = raw(json!({
            "date": "2024-01-01", "symbol": 7203, "open": 1, "high": 1, "low": 1,
            "close": 1, "volume": 0
        }));
        let rec = normalize_record(0, &r).unwrap();
        assert_eq!(rec.code, "7203");
        assert!(rec.extra.is_empty());
    }

    #[test]
    fn every_bad_field_is_reported() {
        let r = raw(json!({
            "date": "not-a-date", "open": "abc", "high": 1, "low": 1, "close": null
        }));
        let failure = normalize_record(3, &r).unwrap_err();
        assert_eq!(failure.index, 3);
        assert_eq!(failure.date.as_deref(), Some("not-a-date"));
        assert!(failure
            .errors
            .contains(&FieldError::InvalidDate("not-a-date".into())));
        assert!(failure.errors.contains(&FieldError::Missing("code")));
        assert!(failure.errors.contains(&FieldError::Missing("close")));
        assert!(failure.errors.contains(&FieldError::Missing("volume")));
        assert!(failure
            .errors
            .iter()
            .any(|e| matches!(e, FieldError::NonNumeric { field: "open", .. })));
        assert_eq!(
            failure.parsed,
            ParsedFields {
                high: Some(1.0),
                low: Some(1.0),
                ..ParsedFields::default()
            }
        );
    }

    #[test]
    fn nan_string_is_not_numeric() {
        let r = raw(json!({
            "date": "2024-01-01", "code": "A", "open": "NaN", "high": 1, "low": 1,
            "close": 1, "volume": 1
        }));
        let failure = normalize_record(0, &r).unwrap_err();
        assert_eq!(failure.errors.len(), 1);
    }

    #[test]
    fn batch_collects_successes_and_failures() {
        let batch = vec![
            raw(json!({"date": "2024-01-01", "code": "A", "open": 1, "high": 1, "low": 1, "close": 1, "volume": 1})),
            raw(json!({"date": "2024-01-02"})),
        ];
        let out = normalize_batch(&batch);
        assert_eq!(out.records.len(), 1);
        assert_eq!(out.failures.len(), 1);
        assert_eq!(out.failures[0].index, 1);
        assert!(!out.is_complete());
    }
}
