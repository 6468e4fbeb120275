//! deltasync core — canonical records, content hashing, validation, diffing and persistence.
//!
//! This crate holds everything below the update pipeline:
//! - Record model and the single canonicalization pass at the ingest boundary
//! - SHA-256 content hash over the date-sorted canonical form
//! - Batch integrity validation with issues, warnings and a quality score
//! - Date-keyed snapshot diffing with a bounded, per-engine result cache
//! - JSON-file store with atomic multi-file commits, backups and retention

pub mod diff;
pub mod hash;
pub mod normalize;
pub mod record;
pub mod store;
pub mod validate;

pub use diff::{CacheStats, DiffEngine, DiffOptions, DiffResult, DiffSummary, SignificancePolicy};
pub use hash::HashCalculator;
pub use normalize::{
    normalize_batch, normalize_record, ConversionFailure, FieldError, ParsedFields,
};
pub use record::{canonical_snapshot, DateRange, RawRecord, Record};
pub use store::{PersistentStore, StoreError, StoreOptions};
pub use validate::{
    IntegrityValidator, IssueKind, ValidationIssue, ValidationReport, ValidationResult,
    ValidationRules,
};
