//! Batch integrity validation.
//!
//! Validation is also the canonicalization boundary: the report carries the
//! normalized records so nothing downstream has to look at raw input again.
//!
//! Issues make a batch invalid. Warnings are advisory and never flip validity.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::normalize::{normalize_record, FieldError, ParsedFields};
use crate::record::{RawRecord, Record};

/// What a validation finding is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    EmptyBatch,
    MissingField,
    InvalidDate,
    NonNumeric,
    InvalidCode,
    NonPositivePrice,
    NegativeVolume,
    ZeroVolume,
    HighBelowLow,
    HighBelowBody,
    LowAboveBody,
    LargePriceMove,
    DuplicateDate,
    CodeMismatch,
}

/// A single issue or warning, located by input index where possible.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub index: Option<usize>,
    pub date: Option<String>,
    pub kind: IssueKind,
    pub message: String,
}

impl ValidationIssue {
    fn at(index: usize, date: Option<String>, kind: IssueKind, message: impl Into<String>) -> Self {
        Self {
            index: Some(index),
            date,
            kind,
            message: message.into(),
        }
    }
}

/// Outcome of validating one batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub issues: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
    /// 1.0 for a clean batch, lowered by records with issues and (less) by warnings.
    pub quality_score: f64,
}

impl ValidationResult {
    /// Whether any finding (issue or warning) has the given kind.
    pub fn has(&self, kind: IssueKind) -> bool {
        self.issues.iter().chain(&self.warnings).any(|i| i.kind == kind)
    }

    /// One-line summary of the issues, for result messages.
    pub fn summary(&self) -> String {
        if self.issues.is_empty() {
            return format!("valid ({} warnings)", self.warnings.len());
        }
        let first: Vec<&str> = self.issues.iter().take(3).map(|i| i.message.as_str()).collect();
        let more = self.issues.len().saturating_sub(first.len());
        if more > 0 {
            format!("{} (+{more} more)", first.join("; "))
        } else {
            first.join("; ")
        }
    }
}

/// Validation result plus the canonicalized records, in input order.
#[derive(Debug, Clone)]
pub struct ValidationReport {
    pub result: ValidationResult,
    pub records: Vec<Record>,
}

/// Tunable thresholds for the validator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationRules {
    /// Relative close move against the prior record on the same date that
    /// triggers a `LargePriceMove` warning (0.5 = 50%).
    pub max_close_move: f64,
    pub warn_on_zero_volume: bool,
    pub warn_on_duplicate_dates: bool,
}

impl Default for ValidationRules {
    fn default() -> Self {
        Self {
            max_close_move: 0.5,
            warn_on_zero_volume: true,
            warn_on_duplicate_dates: true,
        }
    }
}

/// Field- and cross-record checks on an incoming batch.
#[derive(Debug, Clone, Default)]
pub struct IntegrityValidator {
    rules: ValidationRules,
}

impl IntegrityValidator {
    pub fn new(rules: ValidationRules) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &ValidationRules {
        &self.rules
    }

    /// Validate `batch`, comparing closes against `prior` where dates overlap.
    ///
    /// One pass over `prior` to build the date lookup, one pass over the batch.
    pub fn validate(&self, batch: &[RawRecord], prior: Option<&[Record]>) -> ValidationReport {
        self.run(batch, prior, None)
    }

    /// Like [`validate`](Self::validate), and also warns about records whose
    /// code differs from `symbol`.
    pub fn validate_for(
        &self,
        symbol: &str,
        batch: &[RawRecord],
        prior: Option<&[Record]>,
    ) -> ValidationReport {
        self.run(batch, prior, Some(symbol))
    }

    fn run(
        &self,
        batch: &[RawRecord],
        prior: Option<&[Record]>,
        symbol: Option<&str>,
    ) -> ValidationReport {
        let mut issues = Vec::new();
        let mut warnings = Vec::new();

        if batch.is_empty() {
            issues.push(ValidationIssue {
                index: None,
                date: None,
                kind: IssueKind::EmptyBatch,
                message: "batch contains no records".into(),
            });
            return ValidationReport {
                result: ValidationResult {
                    is_valid: false,
                    issues,
                    warnings,
                    quality_score: 0.0,
                },
                records: Vec::new(),
            };
        }

        let mut prior_close: HashMap<NaiveDate, f64> = HashMap::new();
        for r in prior.unwrap_or_default() {
            prior_close.entry(r.date).or_insert(r.close);
        }

        let mut records = Vec::with_capacity(batch.len());
        let mut seen_dates = HashSet::with_capacity(batch.len());
        let mut records_with_issues = 0usize;
        let mut records_with_warnings = 0usize;

        for (index, raw) in batch.iter().enumerate() {
            let issues_before = issues.len();
            let warnings_before = warnings.len();

            match normalize_record(index, raw) {
                Err(failure) => {
                    for err in &failure.errors {
                        issues.push(ValidationIssue::at(
                            index,
                            failure.date.clone(),
                            field_error_kind(err),
                            format!("record {index}: {err}"),
                        ));
                    }
                    self.check_fields(index, &failure.date, failure.parsed, &mut issues, &mut warnings);
                }
                Ok(record) => {
                    let date = Some(record.date_key());
                    self.check_fields(index, &date, ParsedFields::from(&record), &mut issues, &mut warnings);

                    if let Some(symbol) = symbol.filter(|s| !record.code.eq_ignore_ascii_case(s)) {
                        warnings.push(ValidationIssue::at(
                            index,
                            date,
                            IssueKind::CodeMismatch,
                            format!("record {index}: code {} stored under symbol {symbol}", record.code),
                        ));
                    }

                    if let Some(&prev) = prior_close.get(&record.date) {
                        self.check_price_move(index, &record, prev, &mut warnings);
                    }

                    if !seen_dates.insert(record.date) && self.rules.warn_on_duplicate_dates {
                        warnings.push(ValidationIssue::at(
                            index,
                            Some(record.date_key()),
                            IssueKind::DuplicateDate,
                            format!(
                                "record {index}: duplicate date {}, first occurrence wins",
                                record.date_key()
                            ),
                        ));
                    }
                    records.push(record);
                }
            }

            if issues.len() > issues_before {
                records_with_issues += 1;
            }
            if warnings.len() > warnings_before {
                records_with_warnings += 1;
            }
        }

        let total = batch.len() as f64;
        let clean = (batch.len() - records_with_issues) as f64 / total;
        let quality_score = (clean - 0.1 * records_with_warnings as f64 / total).clamp(0.0, 1.0);

        ValidationReport {
            result: ValidationResult {
                is_valid: issues.is_empty(),
                issues,
                warnings,
                quality_score,
            },
            records,
        }
    }

    /// Price, volume and OHLC checks. Each runs when the fields it needs
    /// converted, so a record with a bad field still gets the others checked.
    fn check_fields(
        &self,
        index: usize,
        date: &Option<String>,
        f: ParsedFields,
        issues: &mut Vec<ValidationIssue>,
        warnings: &mut Vec<ValidationIssue>,
    ) {
        for (name, price) in [("open", f.open), ("high", f.high), ("low", f.low), ("close", f.close)] {
            if let Some(price) = price.filter(|p| *p <= 0.0) {
                issues.push(ValidationIssue::at(
                    index,
                    date.clone(),
                    IssueKind::NonPositivePrice,
                    format!("record {index}: {name} price must be positive, got {price}"),
                ));
            }
        }

        match f.volume {
            Some(volume) if volume < 0.0 => issues.push(ValidationIssue::at(
                index,
                date.clone(),
                IssueKind::NegativeVolume,
                format!("record {index}: negative volume {volume}"),
            )),
            Some(volume) if volume == 0.0 && self.rules.warn_on_zero_volume => {
                warnings.push(ValidationIssue::at(
                    index,
                    date.clone(),
                    IssueKind::ZeroVolume,
                    format!("record {index}: zero volume"),
                ))
            }
            _ => {}
        }

        if let (Some(high), Some(low)) = (f.high, f.low) {
            if high < low {
                issues.push(ValidationIssue::at(
                    index,
                    date.clone(),
                    IssueKind::HighBelowLow,
                    format!("record {index}: high {high} below low {low}"),
                ));
            }
        }
        let (Some(open), Some(close)) = (f.open, f.close) else {
            return;
        };
        let body_top = open.max(close);
        let body_bottom = open.min(close);
        if let Some(high) = f.high.filter(|h| *h < body_top) {
            issues.push(ValidationIssue::at(
                index,
                date.clone(),
                IssueKind::HighBelowBody,
                format!("record {index}: high {high} below max(open, close) {body_top}"),
            ));
        }
        if let Some(low) = f.low.filter(|l| *l > body_bottom) {
            issues.push(ValidationIssue::at(
                index,
                date.clone(),
                IssueKind::LowAboveBody,
                format!("record {index}: low {low} above min(open, close) {body_bottom}"),
            ));
        }
    }

    fn check_price_move(
        &self,
        index: usize,
        r: &Record,
        prior_close: f64,
        warnings: &mut Vec<ValidationIssue>,
    ) {
        if prior_close <= 0.0 {
            return;
        }
        let change = (r.close - prior_close).abs() / prior_close;
        if change > self.rules.max_close_move {
            warnings.push(ValidationIssue::at(
                index,
                Some(r.date_key()),
                IssueKind::LargePriceMove,
                format!(
                    "record {index}: close moved {:.1}% against stored value {prior_close}",
                    change * 100.0
                ),
            ));
        }
    }
}

fn field_error_kind(err: &FieldError) -> IssueKind {
    match err {
        FieldError::Missing(_) => IssueKind::MissingField,
        FieldError::InvalidDate(_) => IssueKind::InvalidDate,
        FieldError::NonNumeric { .. } => IssueKind::NonNumeric,
        FieldError::InvalidCode(_) => IssueKind::InvalidCode,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn raw(v: Value) -> RawRecord {
        v.as_object().unwrap().clone()
    }

    fn good(date: &str, close: f64) -> RawRecord {
        raw(json!({
            "date": date, "code": "7203", "open": 100.0, "high": 110.0,
            "low": 90.0, "close": close, "volume": 1_000_000
        }))
    }

    fn validate(batch: Vec<RawRecord>) -> ValidationReport {
        IntegrityValidator::default().validate(&batch, None)
    }

    #[test]
    fn clean_batch_is_valid_with_full_score() {
        let report = validate(vec![good("2024-01-01", 103.0), good("2024-01-02", 104.0)]);
        assert!(report.result.is_valid);
        assert!(report.result.issues.is_empty());
        assert!(report.result.warnings.is_empty());
        assert_eq!(report.result.quality_score, 1.0);
        assert_eq!(report.records.len(), 2);
    }

    #[test]
    fn empty_batch_is_invalid() {
        let report = validate(vec![]);
        assert!(!report.result.is_valid);
        assert!(report.result.has(IssueKind::EmptyBatch));
    }

    #[test]
    fn negative_price_is_an_issue() {
        let mut r = good("2024-01-01", 103.0);
        r.insert("open".into(), json!(-5.0));
        let report = validate(vec![r]);
        assert!(!report.result.is_valid);
        assert!(report.result.has(IssueKind::NonPositivePrice));
    }

    #[test]
    fn high_below_low_is_an_issue() {
        let mut r = good("2024-01-01", 95.0);
        r.insert("high".into(), json!(80.0));
        r.insert("open".into(), json!(85.0));
        r.insert("close".into(), json!(85.0));
        let report = validate(vec![r]);
        assert!(!report.result.is_valid);
        assert!(report.result.has(IssueKind::HighBelowLow));
    }

    #[test]
    fn body_outside_range_is_an_issue() {
        let mut r = good("2024-01-01", 120.0);
        r.insert("low".into(), json!(101.0));
        let report = validate(vec![r]);
        assert!(report.result.has(IssueKind::HighBelowBody));
        assert!(report.result.has(IssueKind::LowAboveBody));
        assert!(!report.result.is_valid);
    }

    #[test]
    fn malformed_date_is_an_issue() {
        let report = validate(vec![good("2024-13-45", 103.0)]);
        assert!(!report.result.is_valid);
        assert!(report.result.has(IssueKind::InvalidDate));
        assert_eq!(report.result.issues[0].index, Some(0));
    }

    #[test]
    fn missing_required_field_is_an_issue() {
        let mut r = good("2024-01-01", 103.0);
        r.remove("volume");
        let report = validate(vec![r]);
        assert!(!report.result.is_valid);
        assert!(report.result.has(IssueKind::MissingField));
    }

    #[test]
    fn field_failure_does_not_hide_other_checks() {
        let mut r = good("2024-01-01", 95.0);
        r.remove("volume");
        r.insert("open".into(), json!(-5.0));
        r.insert("high".into(), json!(80.0));
        let report = validate(vec![r]);
        assert!(!report.result.is_valid);
        assert!(report.result.has(IssueKind::MissingField));
        assert!(report.result.has(IssueKind::NonPositivePrice));
        assert!(report.result.has(IssueKind::HighBelowLow));
        assert!(report.result.issues.iter().all(|i| i.index == Some(0)));
        assert!(report.records.is_empty());
        assert_eq!(report.result.quality_score, 0.0);
    }

    #[test]
    fn unparsed_fields_are_skipped_by_range_checks() {
        let mut r = good("2024-01-01", 103.0);
        r.insert("high".into(), json!("n/a"));
        let report = validate(vec![r]);
        assert!(report.result.has(IssueKind::NonNumeric));
        assert!(!report.result.has(IssueKind::HighBelowLow));
        assert!(!report.result.has(IssueKind::HighBelowBody));
    }

    #[test]
    fn code_differing_from_symbol_warns() {
        let mut other = good("2024-01-02", 104.0);
        other.insert("code".into(), json!("6758"));
        let batch = vec![good("2024-01-01", 103.0), other];
        let report = IntegrityValidator::default().validate_for("7203", &batch, None);
        assert!(report.result.is_valid);
        assert_eq!(report.result.warnings.len(), 1);
        assert_eq!(report.result.warnings[0].kind, IssueKind::CodeMismatch);
        assert_eq!(report.result.warnings[0].index, Some(1));

        let plain = IntegrityValidator::default().validate(&batch, None);
        assert!(!plain.result.has(IssueKind::CodeMismatch));
    }

    #[test]
    fn negative_volume_is_issue_zero_volume_is_warning() {
        let mut neg = good("2024-01-01", 103.0);
        neg.insert("volume".into(), json!(-1));
        assert!(!validate(vec![neg]).result.is_valid);

        let mut zero = good("2024-01-01", 103.0);
        zero.insert("volume".into(), json!(0));
        let report = validate(vec![zero]);
        assert!(report.result.is_valid);
        assert!(report.result.has(IssueKind::ZeroVolume));
        assert!(report.result.quality_score < 1.0);
    }

    #[test]
    fn large_close_move_against_prior_is_only_a_warning() {
        let prior = vec![Record::new(
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            "7203",
            100.0,
            110.0,
            90.0,
            100.0,
            1000.0,
        )];
        let mut moved = good("2024-01-01", 160.0);
        moved.insert("high".into(), json!(170.0));
        let report = IntegrityValidator::default().validate(&[moved], Some(&prior));
        assert!(report.result.is_valid);
        assert!(report.result.issues.is_empty());
        assert_eq!(report.result.warnings.len(), 1);
        assert_eq!(report.result.warnings[0].kind, IssueKind::LargePriceMove);
    }

    #[test]
    fn moderate_close_move_is_silent() {
        let prior = vec![Record::new(
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            "7203",
            100.0,
            110.0,
            90.0,
            100.0,
            1000.0,
        )];
        let report =
            IntegrityValidator::default().validate(&[good("2024-01-01", 105.0)], Some(&prior));
        assert!(report.result.warnings.is_empty());
    }

    #[test]
    fn duplicate_dates_warn() {
        let report = validate(vec![good("2024-01-01", 103.0), good("2024-01-01", 104.0)]);
        assert!(report.result.is_valid);
        assert!(report.result.has(IssueKind::DuplicateDate));
    }

    #[test]
    fn each_failing_check_is_reported_independently() {
        let mut r = good("2024-01-01", 103.0);
        r.insert("open".into(), json!(-1.0));
        r.insert("volume".into(), json!(-10));
        let report = validate(vec![r]);
        assert!(report.result.has(IssueKind::NonPositivePrice));
        assert!(report.result.has(IssueKind::NegativeVolume));
        assert_eq!(report.result.quality_score, 0.0);
    }

    #[test]
    fn summary_lists_first_issues() {
        let mut r = good("2024-01-01", 103.0);
        r.remove("open");
        let report = validate(vec![r]);
        assert!(report.result.summary().contains("open"));
    }
}
