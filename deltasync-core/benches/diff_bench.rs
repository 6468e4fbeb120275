//! Criterion benchmarks for the update hot paths.
//!
//! Benchmarks:
//! 1. Content hashing of a snapshot
//! 2. Uncached diff of two overlapping snapshots
//! 3. Cached diff (hash pair already seen)
//! 4. Batch validation of raw records

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use serde_json::json;

use deltasync_core::{
    DiffEngine, DiffOptions, HashCalculator, IntegrityValidator, RawRecord, Record,
};

// ── Helpers ──────────────────────────────────────────────────────────

fn make_records(n: usize, offset: f64) -> Vec<Record> {
    let base_date = chrono::NaiveDate::from_ymd_opt(2020, 1, 2).unwrap();
    (0..n)
        .map(|i| {
            let close = 100.0 + (i as f64 * 0.1).sin() * 10.0 + offset;
            Record::new(
                base_date + chrono::Duration::days(i as i64),
                "7203",
                close - 0.3,
                close + 1.5,
                close - 1.5,
                close,
                1_000_000.0 + (i % 500) as f64,
            )
        })
        .collect()
}

fn make_raw(n: usize) -> Vec<RawRecord> {
    make_records(n, 0.0)
        .iter()
        .map(|r| {
            json!({
                "Date": r.date_key(), "Code": r.code, "Open": r.open, "High": r.high,
                "Low": r.low, "Close": r.close, "Volume": r.volume
            })
            .as_object()
            .cloned()
            .unwrap_or_default()
        })
        .collect()
}

// ── Benchmarks ───────────────────────────────────────────────────────

fn bench_hash(c: &mut Criterion) {
    let mut group = c.benchmark_group("hash");
    let hasher = HashCalculator::default();
    for n in [250, 2500] {
        let records = make_records(n, 0.0);
        group.bench_with_input(BenchmarkId::from_parameter(n), &records, |b, records| {
            b.iter(|| hasher.hash(black_box(records)))
        });
    }
    group.finish();
}

fn bench_diff(c: &mut Criterion) {
    let mut group = c.benchmark_group("diff");
    for n in [250, 2500] {
        let old = make_records(n, 0.0);
        let mut new = make_records(n, 0.0);
        // Touch every tenth record and append a week.
        for r in new.iter_mut().step_by(10) {
            r.close += 0.5;
            r.high += 0.5;
        }
        new.extend(make_records(n + 5, 0.0).into_iter().skip(n));

        let uncached = DiffEngine::new(DiffOptions {
            cache_capacity: 0,
            ..DiffOptions::default()
        });
        group.bench_with_input(BenchmarkId::new("uncached", n), &n, |b, _| {
            b.iter(|| uncached.diff(black_box(&old), black_box(&new)))
        });

        let cached = DiffEngine::default();
        cached.diff(&old, &new);
        group.bench_with_input(BenchmarkId::new("cached", n), &n, |b, _| {
            b.iter(|| cached.diff(black_box(&old), black_box(&new)))
        });
    }
    group.finish();
}

fn bench_validate(c: &mut Criterion) {
    let validator = IntegrityValidator::default();
    let prior = make_records(2500, 0.0);
    let batch = make_raw(2500);
    c.bench_function("validate_2500", |b| {
        b.iter(|| validator.validate(black_box(&batch), Some(&prior)))
    });
}

criterion_group!(benches, bench_hash, bench_diff, bench_validate);
criterion_main!(benches);
