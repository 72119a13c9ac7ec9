// Copyright (c) 2025 HypercubeDB Contributors
// Licensed under the GPL-3.0 License. See LICENSE file for details.

//! Hash-partitioned record storage.
//!
//! A [`PartitionedTable`] owns the records of one table. Each record is
//! routed to `partition_hash(key) % partition_count`, where `key` is the
//! string form of the record's partition-key field. The partition count is
//! fixed when the table is created.
//!
//! Partitions are slot arenas: a record keeps its slot for its whole life, so
//! iteration follows insertion order and an overwrite does not move the
//! record. Removed slots become tombstones and are compacted once they
//! outnumber live records.

use std::collections::HashMap;

use crate::error::{HyperError, Result};
use crate::predicate::Matcher;
use crate::types::Record;

/// Tombstones tolerated before a partition compacts its slots.
const COMPACT_MIN_TOMBSTONES: usize = 32;

/// 32-bit polynomial rolling hash over UTF-16 code units (`h = h*31 + c`,
/// wrapping), folded to its absolute value.
///
/// The function is stable across runs and platforms, so persisted partition
/// assignments remain valid.
///
/// ```rust
/// use hypercubedb::partition::partition_hash;
///
/// assert_eq!(partition_hash(""), 0);
/// assert_eq!(partition_hash("a"), 97);
/// assert_eq!(partition_hash("ab"), 97 * 31 + 98);
/// ```
pub fn partition_hash(key: &str) -> u32 {
    let mut h: i32 = 0;
    for unit in key.encode_utf16() {
        h = h.wrapping_shl(5).wrapping_sub(h).wrapping_add(i32::from(unit));
    }
    h.unsigned_abs()
}

/// One partition: insertion-ordered slots plus a key → slot map.
#[derive(Debug, Clone, Default)]
pub struct Partition {
    slots: Vec<Option<(String, Record)>>,
    positions: HashMap<String, usize>,
}

impl Partition {
    fn insert(&mut self, key: String, record: Record) -> Option<Record> {
        if let Some(&pos) = self.positions.get(&key) {
            if let Some((_, existing)) = self.slots[pos].as_mut() {
                return Some(std::mem::replace(existing, record));
            }
        }
        self.positions.insert(key.clone(), self.slots.len());
        self.slots.push(Some((key, record)));
        None
    }

    fn get(&self, key: &str) -> Option<&Record> {
        let pos = *self.positions.get(key)?;
        self.slots[pos].as_ref().map(|(_, r)| r)
    }

    fn get_mut(&mut self, key: &str) -> Option<&mut Record> {
        let pos = *self.positions.get(key)?;
        self.slots[pos].as_mut().map(|(_, r)| r)
    }

    fn remove(&mut self, key: &str) -> Option<Record> {
        let pos = self.positions.remove(key)?;
        let removed = self.slots[pos].take().map(|(_, r)| r);
        let tombstones = self.slots.len() - self.positions.len();
        if tombstones >= COMPACT_MIN_TOMBSTONES && tombstones > self.positions.len() {
            self.compact();
        }
        removed
    }

    fn compact(&mut self) {
        self.slots.retain(Option::is_some);
        self.positions.clear();
        for (pos, slot) in self.slots.iter().enumerate() {
            if let Some((key, _)) = slot {
                self.positions.insert(key.clone(), pos);
            }
        }
    }

    /// Number of live records.
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Live `(key, record)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Record)> {
        self.slots
            .iter()
            .flatten()
            .map(|(k, r)| (k.as_str(), r))
    }

    fn iter_mut(&mut self) -> impl Iterator<Item = (&str, &mut Record)> {
        self.slots
            .iter_mut()
            .flatten()
            .map(|(k, r)| (k.as_str(), r))
    }
}

/// Records of one table spread over a fixed set of partitions.
#[derive(Debug, Clone)]
pub struct PartitionedTable {
    partition_key: String,
    partitions: Vec<Partition>,
}

impl PartitionedTable {
    /// Creates an empty table with `partition_count` partitions.
    pub fn new(partition_key: impl Into<String>, partition_count: usize) -> Result<Self> {
        let partition_key = partition_key.into();
        if partition_key.trim().is_empty() {
            return Err(HyperError::validation("partition key field is empty"));
        }
        if partition_count == 0 {
            return Err(HyperError::validation("partition count must be at least 1"));
        }
        Ok(Self {
            partition_key,
            partitions: vec![Partition::default(); partition_count],
        })
    }

    /// Rebuilds a table from persisted partitions.
    ///
    /// Entries are re-routed through the hash, so a snapshot written with the
    /// same partition count lands in the same partitions and order.
    pub fn from_partitions(
        partition_key: impl Into<String>,
        partition_count: usize,
        partitions: Vec<Vec<(String, Record)>>,
    ) -> Result<Self> {
        let mut table = Self::new(partition_key, partition_count)?;
        for (key, record) in partitions.into_iter().flatten() {
            let idx = table.partition_for(&key);
            table.partitions[idx].insert(key, record);
        }
        Ok(table)
    }

    pub fn partition_key(&self) -> &str {
        &self.partition_key
    }

    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }

    /// Partition index for a key string.
    pub fn partition_for(&self, key: &str) -> usize {
        (partition_hash(key) as usize) % self.partitions.len()
    }

    /// Extracts and validates the partition-key value of `record`.
    pub fn key_of(&self, record: &Record) -> Result<String> {
        let value = record.get(&self.partition_key).ok_or_else(|| {
            HyperError::validation(format!(
                "record is missing partition key '{}'",
                self.partition_key
            ))
        })?;
        value.to_key_string().ok_or_else(|| {
            HyperError::validation(format!(
                "partition key '{}' has unusable value '{}'",
                self.partition_key, value
            ))
        })
    }

    /// Stores `record`, returning its key and the record it replaced.
    pub fn insert(&mut self, record: Record) -> Result<(String, Option<Record>)> {
        let key = self.key_of(&record)?;
        let idx = self.partition_for(&key);
        let previous = self.partitions[idx].insert(key.clone(), record);
        Ok((key, previous))
    }

    pub fn get(&self, key: &str) -> Option<&Record> {
        self.partitions[self.partition_for(key)].get(key)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Record> {
        let idx = self.partition_for(key);
        self.partitions[idx].get_mut(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<Record> {
        let idx = self.partition_for(key);
        self.partitions[idx].remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// `(partition, slot)` of a live key. Sorting by it reproduces scan order.
    pub fn locate(&self, key: &str) -> Option<(usize, usize)> {
        let idx = self.partition_for(key);
        let slot = *self.partitions[idx].positions.get(key)?;
        Some((idx, slot))
    }

    /// Records matching `matcher`, in partition-then-insertion order.
    pub fn query(&self, matcher: &Matcher<'_>) -> Vec<Record> {
        self.iter()
            .filter(|(_, r)| matcher.matches(r))
            .map(|(_, r)| r.clone())
            .collect()
    }

    /// Keys of the records matching `matcher`.
    pub fn matching_keys(&self, matcher: &Matcher<'_>) -> Vec<String> {
        self.iter()
            .filter(|(_, r)| matcher.matches(r))
            .map(|(k, _)| k.to_string())
            .collect()
    }

    /// All live records in partition-then-insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Record)> {
        self.partitions.iter().flat_map(Partition::iter)
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = (&str, &mut Record)> {
        self.partitions.iter_mut().flat_map(Partition::iter_mut)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.iter().map(|(k, _)| k)
    }

    pub fn partitions(&self) -> &[Partition] {
        &self.partitions
    }

    pub fn partition_sizes(&self) -> Vec<usize> {
        self.partitions.iter().map(Partition::len).collect()
    }

    pub fn len(&self) -> usize {
        self.partitions.iter().map(Partition::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.partitions.iter().all(Partition::is_empty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::predicate::Predicate;
    use crate::record;

    #[test]
    fn test_hash_wraps_like_i32() {
        // Long keys overflow i32 and must wrap rather than saturate.
        let key = "a-rather-long-partition-key-value-0123456789";
        let mut expected: i64 = 0;
        for unit in key.encode_utf16() {
            expected = ((expected * 31 + i64::from(unit)) as i32) as i64;
        }
        assert_eq!(partition_hash(key), (expected as i32).unsigned_abs());
    }

    #[test]
    fn test_hash_uses_utf16_units() {
        // U+1F600 is a surrogate pair: 0xD83D, 0xDE00
        let expected = ((0xD83Di32).wrapping_mul(31)).wrapping_add(0xDE00);
        assert_eq!(partition_hash("\u{1F600}"), expected.unsigned_abs());
    }

    #[test]
    fn test_missing_key_rejected() {
        let mut table = PartitionedTable::new("id", 4).unwrap();
        assert!(matches!(
            table.insert(record! { "name" => "x" }),
            Err(HyperError::Validation(_))
        ));
        assert!(matches!(
            table.insert(record! { "id" => "" }),
            Err(HyperError::Validation(_))
        ));
        assert!(matches!(
            table.insert(record! { "id" => vec![1.0] }),
            Err(HyperError::Validation(_))
        ));
        assert!(table.is_empty());
    }

    #[test]
    fn test_zero_partitions_rejected() {
        assert!(PartitionedTable::new("id", 0).is_err());
    }

    #[test]
    fn test_overwrite_keeps_slot() {
        let mut table = PartitionedTable::new("id", 1).unwrap();
        table.insert(record! { "id" => "a", "v" => 1 }).unwrap();
        table.insert(record! { "id" => "b", "v" => 2 }).unwrap();
        let (_, prev) = table.insert(record! { "id" => "a", "v" => 3 }).unwrap();

        assert_eq!(prev.unwrap().get("v").and_then(|v| v.as_number()), Some(1.0));
        let keys: Vec<&str> = table.keys().collect();
        assert_eq!(keys, vec!["a", "b"]);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_numeric_key_is_stringified() {
        let mut table = PartitionedTable::new("id", 3).unwrap();
        let (key, _) = table.insert(record! { "id" => 42 }).unwrap();
        assert_eq!(key, "42");
        assert!(table.contains("42"));
    }

    #[test]
    fn test_remove_and_compaction() {
        let mut table = PartitionedTable::new("id", 1).unwrap();
        for i in 0..100 {
            table.insert(record! { "id" => i }).unwrap();
        }
        for i in 0..80 {
            assert!(table.remove(&i.to_string()).is_some());
        }
        assert!(table.remove("0").is_none());
        assert_eq!(table.len(), 20);
        let keys: Vec<String> = table.keys().map(str::to_string).collect();
        let expected: Vec<String> = (80..100).map(|i: i32| i.to_string()).collect();
        assert_eq!(keys, expected);
        assert!(table.get("99").is_some());
    }

    #[test]
    fn test_query_and_sizes() {
        let mut table = PartitionedTable::new("id", 4).unwrap();
        for i in 0..20 {
            table.insert(record! { "id" => i, "even" => i32::from(i % 2 == 0) }).unwrap();
        }
        let matcher_pred = Predicate::new().eq("even", 1);
        let matcher = matcher_pred.compile().unwrap();
        assert_eq!(table.query(&matcher).len(), 10);
        assert_eq!(table.partition_sizes().iter().sum::<usize>(), 20);
    }

    #[test]
    fn test_from_partitions_preserves_layout() {
        let mut table = PartitionedTable::new("id", 5).unwrap();
        for i in 0..30 {
            table.insert(record! { "id" => format!("k{}", i) }).unwrap();
        }
        let persisted: Vec<Vec<(String, Record)>> = table
            .partitions()
            .iter()
            .map(|p| p.iter().map(|(k, r)| (k.to_string(), r.clone())).collect())
            .collect();
        let restored = PartitionedTable::from_partitions("id", 5, persisted).unwrap();
        assert_eq!(restored.partition_sizes(), table.partition_sizes());
        let a: Vec<&str> = table.keys().collect();
        let b: Vec<&str> = restored.keys().collect();
        assert_eq!(a, b);
    }
}
