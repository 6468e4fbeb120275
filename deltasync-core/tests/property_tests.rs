//! Property tests for hashing, diffing and cache invariants.
//!
//! Uses proptest to verify:
//! 1. Partition: added + updated + unchanged = |new dates|, removed + updated + unchanged = |old dates|
//! 2. Hash determinism under key case, record order and sub-precision noise
//! 3. Cache transparency: cached and uncached diffs agree
//! 4. Cache bound: entries never exceed capacity

use chrono::NaiveDate;
use proptest::prelude::*;
use serde_json::{json, Value};
use std::collections::HashSet;

use deltasync_core::{normalize_record, DiffEngine, DiffOptions, HashCalculator, Record};

// ── Strategies (proptest) ────────────────────────────────────────────

fn arb_price() -> impl Strategy<Value = f64> {
    (10.0..500.0_f64).prop_map(|p| (p * 100.0).round() / 100.0)
}

fn arb_record() -> impl Strategy<Value = Record> {
    (0u32..60, arb_price(), arb_price(), 0u32..1_000_000).prop_map(|(day, a, b, volume)| {
        let date = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + chrono::Duration::days(day as i64);
        let (low, high) = if a <= b { (a, b) } else { (b, a) };
        Record::new(date, "7203", low, high, low, high, volume as f64)
    })
}

fn arb_snapshot() -> impl Strategy<Value = Vec<Record>> {
    prop::collection::vec(arb_record(), 0..40)
}

fn unique_dates(records: &[Record]) -> usize {
    records.iter().map(|r| r.date).collect::<HashSet<_>>().len()
}

fn raw_json(r: &Record, upper: bool) -> Value {
    let key = |k: &str| if upper { k.to_ascii_uppercase() } else { k.to_string() };
    let mut map = serde_json::Map::new();
    map.insert(key("date"), json!(r.date_key()));
    map.insert(key("code"), json!(r.code));
    map.insert(key("open"), json!(r.open));
    map.insert(key("high"), json!(r.high));
    map.insert(key("low"), json!(r.low));
    map.insert(key("close"), json!(r.close));
    map.insert(key("volume"), json!(r.volume));
    Value::Object(map)
}

// ── 1. Partition ─────────────────────────────────────────────────────

proptest! {
    #[test]
    fn diff_partitions_both_sides(old in arb_snapshot(), new in arb_snapshot()) {
        let engine = DiffEngine::default();
        let s = engine.diff(&old, &new).summary;
        prop_assert_eq!(s.added + s.updated + s.unchanged, unique_dates(&new));
        prop_assert_eq!(s.removed + s.updated + s.unchanged, unique_dates(&old));
        prop_assert_eq!(s.is_significant, s.changed() > 0);
    }

    #[test]
    fn diff_of_snapshot_with_itself_is_empty(snap in arb_snapshot()) {
        let s = DiffEngine::default().diff(&snap, &snap).summary;
        prop_assert_eq!(s.changed(), 0);
        prop_assert_eq!(s.unchanged, unique_dates(&snap));
        prop_assert!(!s.is_significant);
    }
}

// ── 2. Hash determinism ──────────────────────────────────────────────

proptest! {
    #[test]
    fn hash_ignores_order(snap in arb_snapshot(), seed in any::<u64>()) {
        // Same-date records keep input order under the stable sort, so use unique dates.
        let snap = deltasync_core::canonical_snapshot(snap);
        let mut shuffled = snap.clone();
        shuffled.reverse();
        if !shuffled.is_empty() {
            let k = (seed as usize) % shuffled.len();
            shuffled.rotate_left(k);
        }
        let h = HashCalculator::default();
        prop_assert_eq!(h.hash(&snap), h.hash(&shuffled));
    }

    #[test]
    fn hash_ignores_key_case(r in arb_record()) {
        let lower = raw_json(&r, false);
        let upper = raw_json(&r, true);
        let a = normalize_record(0, lower.as_object().unwrap()).unwrap();
        let b = normalize_record(0, upper.as_object().unwrap()).unwrap();
        let h = HashCalculator::default();
        prop_assert_eq!(h.hash(&[a]), h.hash(&[b]));
    }

    #[test]
    fn hash_ignores_noise_below_precision(r in arb_record(), noise in -4e-8..4e-8_f64) {
        let mut noisy = r.clone();
        noisy.close += noise;
        noisy.open += noise;
        let h = HashCalculator::default();
        prop_assert_eq!(h.hash(&[r]), h.hash(&[noisy]));
    }
}

// ── 3. Cache transparency / 4. Cache bound ───────────────────────────

proptest! {
    #[test]
    fn cache_never_changes_the_summary(pairs in prop::collection::vec((arb_snapshot(), arb_snapshot()), 1..8)) {
        let cached = DiffEngine::new(DiffOptions { cache_capacity: 3, ..DiffOptions::default() });
        let uncached = DiffEngine::new(DiffOptions { cache_capacity: 0, ..DiffOptions::default() });
        // Each pair twice, so hits actually happen.
        for (old, new) in pairs.iter().chain(pairs.iter()) {
            let a = cached.diff(old, new).summary;
            let b = uncached.diff(old, new).summary;
            prop_assert_eq!(a, b);
        }
    }

    #[test]
    fn cache_size_stays_within_capacity(
        capacity in 1usize..8,
        pairs in prop::collection::vec((arb_snapshot(), arb_snapshot()), 1..20),
    ) {
        let engine = DiffEngine::new(DiffOptions { cache_capacity: capacity, ..DiffOptions::default() });
        for (old, new) in &pairs {
            engine.diff(old, new);
            prop_assert!(engine.cache_stats().entries <= capacity);
        }
    }
}
