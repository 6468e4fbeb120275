//! Bounded diff-result cache keyed by content-hash pairs.
//!
//! Eviction is frequency-based: once the cache grows past capacity, the half of
//! the entries with the fewest hits is dropped (oldest first among equals).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::DiffSummary;

/// Point-in-time cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub entries: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let lookups = self.hits + self.misses;
        if lookups == 0 {
            0.0
        } else {
            self.hits as f64 / lookups as f64
        }
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    summary: DiffSummary,
    processing_time_ms: u64,
    accesses: u64,
    inserted: u64,
}

/// `(old_hash, new_hash)` → summary, with access counting.
#[derive(Debug)]
pub struct DiffCache {
    capacity: usize,
    entries: HashMap<(String, String), CacheEntry>,
    next_seq: u64,
    hits: u64,
    misses: u64,
    evictions: u64,
}

impl DiffCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: HashMap::with_capacity(capacity.min(1024)),
            next_seq: 0,
            hits: 0,
            misses: 0,
            evictions: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up a pair, counting the access. Returns the stored summary and
    /// the processing time of the computation that produced it.
    pub fn get(&mut self, old_hash: &str, new_hash: &str) -> Option<(DiffSummary, u64)> {
        let key = (old_hash.to_string(), new_hash.to_string());
        match self.entries.get_mut(&key) {
            Some(entry) => {
                entry.accesses += 1;
                self.hits += 1;
                Some((entry.summary.clone(), entry.processing_time_ms))
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    /// Insert (or overwrite) a pair and evict if over capacity.
    ///
    /// Returns the number of evicted entries.
    pub fn insert(
        &mut self,
        old_hash: &str,
        new_hash: &str,
        summary: DiffSummary,
        processing_time_ms: u64,
    ) -> usize {
        if self.capacity == 0 {
            return 0;
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.insert(
            (old_hash.to_string(), new_hash.to_string()),
            CacheEntry {
                summary,
                processing_time_ms,
                accesses: 0,
                inserted: seq,
            },
        );
        if self.entries.len() > self.capacity {
            self.evict()
        } else {
            0
        }
    }

    fn evict(&mut self) -> usize {
        let len = self.entries.len();
        let count = (len / 2).max(len - self.capacity);

        let mut ranked: Vec<((String, String), u64, u64)> = self
            .entries
            .iter()
            .map(|(k, e)| (k.clone(), e.accesses, e.inserted))
            .collect();
        ranked.sort_by_key(|(_, accesses, inserted)| (*accesses, *inserted));

        for (key, _, _) in ranked.into_iter().take(count) {
            self.entries.remove(&key);
        }
        self.evictions += count as u64;
        count
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            capacity: self.capacity,
            hits: self.hits,
            misses: self.misses,
            evictions: self.evictions,
        }
    }
}
