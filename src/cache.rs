// Copyright (c) 2025 HypercubeDB Contributors
// Licensed under the GPL-3.0 License. See LICENSE file for details.

//! Query result cache.
//!
//! Results of `select` are memoized per `(qualified table, canonical
//! predicate)`. Any write to a table drops every entry of that table before
//! the writer releases its lock, so a cached result is never served after a
//! mutation of its table. The cache is bounded and evicts the least recently
//! used entry.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::types::Record;

/// Counters for cache operations.
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    inserts: AtomicU64,
    evictions: AtomicU64,
    invalidations: AtomicU64,
}

impl CacheStats {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    fn record_insert(&self) {
        self.inserts.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    fn record_evictions(&self, n: u64) {
        self.evictions.fetch_add(n, Ordering::Relaxed);
    }

    #[inline]
    fn record_invalidations(&self, n: u64) {
        self.invalidations.fetch_add(n, Ordering::Relaxed);
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn inserts(&self) -> u64 {
        self.inserts.load(Ordering::Relaxed)
    }

    /// Entries dropped to respect the capacity.
    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    /// Entries dropped because their table was written.
    pub fn invalidations(&self) -> u64 {
        self.invalidations.load(Ordering::Relaxed)
    }

    /// Returns the hit ratio (0.0 to 1.0).
    pub fn hit_ratio(&self) -> f64 {
        let accesses = self.hits() + self.misses();
        if accesses == 0 {
            0.0
        } else {
            self.hits() as f64 / accesses as f64
        }
    }
}

impl Clone for CacheStats {
    fn clone(&self) -> Self {
        Self {
            hits: AtomicU64::new(self.hits()),
            misses: AtomicU64::new(self.misses()),
            inserts: AtomicU64::new(self.inserts()),
            evictions: AtomicU64::new(self.evictions()),
            invalidations: AtomicU64::new(self.invalidations()),
        }
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CacheStats {{ hits: {}, misses: {}, hit_ratio: {:.2}%, inserts: {}, evictions: {}, invalidations: {} }}",
            self.hits(),
            self.misses(),
            self.hit_ratio() * 100.0,
            self.inserts(),
            self.evictions(),
            self.invalidations()
        )
    }
}

#[derive(Debug)]
struct CacheEntry {
    records: Arc<Vec<Record>>,
    tick: u64,
}

#[derive(Debug, Default)]
struct CacheInner {
    /// table → canonical predicate → entry
    tables: HashMap<String, HashMap<String, CacheEntry>>,
    /// tick → (table, predicate); smallest tick is least recently used
    recency: BTreeMap<u64, (String, String)>,
    next_tick: u64,
}

impl CacheInner {
    fn bump(&mut self) -> u64 {
        self.next_tick += 1;
        self.next_tick
    }

    fn drop_table(&mut self, table: &str) -> usize {
        let Some(entries) = self.tables.remove(table) else {
            return 0;
        };
        for entry in entries.values() {
            self.recency.remove(&entry.tick);
        }
        entries.len()
    }
}

/// Bounded LRU cache of `select` results.
#[derive(Debug)]
pub struct QueryCache {
    inner: Mutex<CacheInner>,
    capacity: usize,
    stats: CacheStats,
}

impl QueryCache {
    /// Creates a cache holding at most `capacity` results. Zero disables it.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(CacheInner::default()),
            capacity,
            stats: CacheStats::new(),
        }
    }

    /// Returns the cached result for `(table, predicate_key)`.
    pub fn get(&self, table: &str, predicate_key: &str) -> Option<Arc<Vec<Record>>> {
        let mut inner = self.inner.lock();
        let tick = inner.bump();
        let hit = inner
            .tables
            .get_mut(table)
            .and_then(|entries| entries.get_mut(predicate_key))
            .map(|entry| {
                let old = std::mem::replace(&mut entry.tick, tick);
                (old, Arc::clone(&entry.records))
            });
        match hit {
            Some((old, records)) => {
                if let Some(slot) = inner.recency.remove(&old) {
                    inner.recency.insert(tick, slot);
                }
                self.stats.record_hit();
                debug!(table, "query cache hit");
                Some(records)
            }
            None => {
                self.stats.record_miss();
                None
            }
        }
    }

    /// Stores a result, evicting least recently used entries when full.
    pub fn put(&self, table: &str, predicate_key: &str, records: Arc<Vec<Record>>) {
        if self.capacity == 0 {
            return;
        }
        let mut inner = self.inner.lock();
        let tick = inner.bump();
        let previous = inner
            .tables
            .entry(table.to_string())
            .or_default()
            .insert(predicate_key.to_string(), CacheEntry { records, tick });
        if let Some(prev) = previous {
            inner.recency.remove(&prev.tick);
        }
        inner
            .recency
            .insert(tick, (table.to_string(), predicate_key.to_string()));
        self.stats.record_insert();

        let mut evicted = 0;
        while inner.recency.len() > self.capacity {
            let Some((_, (t, p))) = inner.recency.pop_first() else {
                break;
            };
            if let Some(entries) = inner.tables.get_mut(&t) {
                entries.remove(&p);
                if entries.is_empty() {
                    inner.tables.remove(&t);
                }
            }
            evicted += 1;
        }
        if evicted > 0 {
            self.stats.record_evictions(evicted);
        }
    }

    /// Drops every entry of `table`.
    pub fn invalidate(&self, table: &str) {
        let dropped = self.inner.lock().drop_table(table);
        if dropped > 0 {
            self.stats.record_invalidations(dropped as u64);
            debug!(table, dropped, "query cache invalidated");
        }
    }

    /// Drops every entry whose table name starts with `prefix`.
    pub fn invalidate_prefix(&self, prefix: &str) {
        let mut inner = self.inner.lock();
        let tables: Vec<String> = inner
            .tables
            .keys()
            .filter(|t| t.starts_with(prefix))
            .cloned()
            .collect();
        let dropped: usize = tables.iter().map(|t| inner.drop_table(t)).sum();
        if dropped > 0 {
            self.stats.record_invalidations(dropped as u64);
        }
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.tables.clear();
        inner.recency.clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().recency.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns a copy of the counters.
    pub fn stats(&self) -> CacheStats {
        self.stats.clone()
    }
}
