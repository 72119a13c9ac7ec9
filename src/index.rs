// Copyright (c) 2025 HypercubeDB Contributors
// Licensed under the GPL-3.0 License. See LICENSE file for details.

//! Secondary indexes.
//!
//! Two index shapes are maintained per table:
//!
//! - [`DimensionIndex`] - an ordered map from field value to the partition
//!   keys of the records holding it. Supports equality and numeric ranges.
//! - [`CompositeIndex`] - a trie over an ordered tuple of fields. Level `i`
//!   branches on the value of `fields[i]`; leaves hold partition keys.
//!   Lookups by an equality prefix or by per-level ranges prune the trie.
//!
//! Indexes refer to records by partition key only and are never persisted.
//!
//! Values are keyed through [`ValueKey`], which folds numeric text onto its
//! numeric value so that an index lookup returns a superset of what loose
//! equality would match. Callers that need exact semantics re-evaluate the
//! predicate on the candidates.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;

use crate::error::{HyperError, Result};
use crate::partition::PartitionedTable;
use crate::predicate::{CompareOp, Predicate};
use crate::types::{Record, Value};

/// Totally ordered index key derived from a [`Value`].
///
/// Ordering: all numbers, then all text, then all vectors.
#[derive(Debug, Clone)]
pub enum ValueKey {
    Number(f64),
    Text(String),
    Vector(Vec<f64>),
}

impl ValueKey {
    /// Returns `None` for NaN numbers, which never compare equal to anything.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) if n.is_nan() => None,
            Value::Number(n) => Some(ValueKey::Number(zero_sign(*n))),
            Value::Text(s) => match s.trim().parse::<f64>() {
                Ok(n) if !n.is_nan() => Some(ValueKey::Number(zero_sign(n))),
                _ => Some(ValueKey::Text(s.clone())),
            },
            Value::Vector(v) => Some(ValueKey::Vector(v.iter().map(|c| zero_sign(*c)).collect())),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            ValueKey::Number(_) => 0,
            ValueKey::Text(_) => 1,
            ValueKey::Vector(_) => 2,
        }
    }
}

fn zero_sign(n: f64) -> f64 {
    if n == 0.0 {
        0.0
    } else {
        n
    }
}

impl Ord for ValueKey {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (ValueKey::Number(a), ValueKey::Number(b)) => a.total_cmp(b),
            (ValueKey::Text(a), ValueKey::Text(b)) => a.cmp(b),
            (ValueKey::Vector(a), ValueKey::Vector(b)) => {
                for (x, y) in a.iter().zip(b.iter()) {
                    match x.total_cmp(y) {
                        Ordering::Equal => continue,
                        other => return other,
                    }
                }
                a.len().cmp(&b.len())
            }
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialOrd for ValueKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for ValueKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ValueKey {}

/// Converts numeric bounds into key bounds confined to the number section.
fn numeric_bounds(lower: Bound<f64>, upper: Bound<f64>) -> Option<(Bound<ValueKey>, Bound<ValueKey>)> {
    let lo = match lower {
        Bound::Unbounded => Bound::Included(f64::NEG_INFINITY),
        b => b,
    };
    let hi = match upper {
        Bound::Unbounded => Bound::Included(f64::INFINITY),
        b => b,
    };
    let (lv, l_incl) = match lo {
        Bound::Included(v) => (v, true),
        Bound::Excluded(v) => (v, false),
        Bound::Unbounded => return None,
    };
    let (hv, h_incl) = match hi {
        Bound::Included(v) => (v, true),
        Bound::Excluded(v) => (v, false),
        Bound::Unbounded => return None,
    };
    if lv.is_nan() || hv.is_nan() {
        return None;
    }
    let (lv, hv) = (zero_sign(lv), zero_sign(hv));
    match lv.total_cmp(&hv) {
        Ordering::Greater => return None,
        Ordering::Equal if !(l_incl && h_incl) => return None,
        _ => {}
    }
    let wrap = |v: f64, incl: bool| {
        if incl {
            Bound::Included(ValueKey::Number(v))
        } else {
            Bound::Excluded(ValueKey::Number(v))
        }
    };
    Some((wrap(lv, l_incl), wrap(hv, h_incl)))
}

/// Inverted index over one field.
#[derive(Debug, Clone)]
pub struct DimensionIndex {
    field: String,
    entries: BTreeMap<ValueKey, BTreeSet<String>>,
}

impl DimensionIndex {
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            entries: BTreeMap::new(),
        }
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    fn insert(&mut self, key: &str, record: &Record) {
        if let Some(vk) = record.get(&self.field).and_then(ValueKey::from_value) {
            self.entries.entry(vk).or_default().insert(key.to_string());
        }
    }

    fn remove(&mut self, key: &str, record: &Record) {
        let Some(vk) = record.get(&self.field).and_then(ValueKey::from_value) else {
            return;
        };
        if let Some(keys) = self.entries.get_mut(&vk) {
            keys.remove(key);
            if keys.is_empty() {
                self.entries.remove(&vk);
            }
        }
    }

    /// Keys whose value equals `value` under index canonicalization.
    pub fn lookup(&self, value: &Value) -> Vec<String> {
        ValueKey::from_value(value)
            .and_then(|vk| self.entries.get(&vk))
            .map(|keys| keys.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Keys whose numeric value lies within the bounds, in value order.
    pub fn range(&self, lower: Bound<f64>, upper: Bound<f64>) -> Vec<String> {
        let Some(bounds) = numeric_bounds(lower, upper) else {
            return Vec::new();
        };
        self.entries
            .range(bounds)
            .flat_map(|(_, keys)| keys.iter().cloned())
            .collect()
    }

    /// Number of distinct indexed values.
    pub fn distinct_values(&self) -> usize {
        self.entries.len()
    }

    /// Total `(value, key)` entries.
    pub fn entry_count(&self) -> usize {
        self.entries.values().map(BTreeSet::len).sum()
    }
}

#[derive(Debug, Clone, Default)]
struct TrieNode {
    children: BTreeMap<ValueKey, TrieNode>,
    keys: BTreeSet<String>,
}

impl TrieNode {
    fn is_empty(&self) -> bool {
        self.children.is_empty() && self.keys.is_empty()
    }

    fn collect(&self, out: &mut Vec<String>) {
        out.extend(self.keys.iter().cloned());
        for child in self.children.values() {
            child.collect(out);
        }
    }

    fn remove_path(&mut self, path: &[ValueKey], key: &str) {
        match path.split_first() {
            None => {
                self.keys.remove(key);
            }
            Some((head, rest)) => {
                if let Some(child) = self.children.get_mut(head) {
                    child.remove_path(rest, key);
                    if child.is_empty() {
                        self.children.remove(head);
                    }
                }
            }
        }
    }

    fn collect_ranges(&self, ranges: &[(f64, f64)], out: &mut Vec<String>) {
        let Some(((lo, hi), rest)) = ranges.split_first() else {
            self.collect(out);
            return;
        };
        let Some(bounds) = numeric_bounds(Bound::Included(*lo), Bound::Included(*hi)) else {
            return;
        };
        for (_, child) in self.children.range(bounds) {
            child.collect_ranges(rest, out);
        }
    }
}

/// Trie over an ordered tuple of fields.
#[derive(Debug, Clone)]
pub struct CompositeIndex {
    fields: Vec<String>,
    root: TrieNode,
}

impl CompositeIndex {
    pub fn new(fields: Vec<String>) -> Self {
        Self {
            fields,
            root: TrieNode::default(),
        }
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    /// Path of keys for `record`, or `None` if any field is missing.
    fn path(&self, record: &Record) -> Option<Vec<ValueKey>> {
        self.fields
            .iter()
            .map(|f| record.get(f).and_then(ValueKey::from_value))
            .collect()
    }

    fn insert(&mut self, key: &str, record: &Record) {
        let Some(path) = self.path(record) else {
            return;
        };
        let mut node = &mut self.root;
        for vk in path {
            node = node.children.entry(vk).or_default();
        }
        node.keys.insert(key.to_string());
    }

    fn remove(&mut self, key: &str, record: &Record) {
        if let Some(path) = self.path(record) {
            self.root.remove_path(&path, key);
        }
    }

    /// Keys whose leading fields equal `prefix` element-wise.
    pub fn lookup_prefix(&self, prefix: &[Value]) -> Vec<String> {
        let mut node = &self.root;
        for value in prefix {
            let next = ValueKey::from_value(value).and_then(|vk| node.children.get(&vk));
            match next {
                Some(child) => node = child,
                None => return Vec::new(),
            }
        }
        let mut out = Vec::new();
        node.collect(&mut out);
        out
    }

    /// Keys whose field at each level lies in the inclusive `(min, max)` of
    /// that level. Levels past `ranges.len()` are unconstrained.
    pub fn range(&self, ranges: &[(f64, f64)]) -> Vec<String> {
        let mut out = Vec::new();
        self.root.collect_ranges(ranges, &mut out);
        out
    }

    /// Number of keys stored at the leaves.
    pub fn len(&self) -> usize {
        let mut out = Vec::new();
        self.root.collect(&mut out);
        out.len()
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }
}

/// All indexes of one table.
#[derive(Debug, Clone, Default)]
pub struct IndexManager {
    dimensions: BTreeMap<String, DimensionIndex>,
    composites: Vec<CompositeIndex>,
}

impl IndexManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the index for `field` from the current records.
    ///
    /// Re-adding an existing dimension rebuilds it.
    pub fn add_dimension(&mut self, field: &str, table: &PartitionedTable) -> Result<()> {
        let field = field.trim();
        if field.is_empty() {
            return Err(HyperError::validation("dimension name is empty"));
        }
        let mut index = DimensionIndex::new(field);
        for (key, record) in table.iter() {
            index.insert(key, record);
        }
        self.dimensions.insert(field.to_string(), index);
        Ok(())
    }

    /// Drops the index for `field`, every composite containing it, and
    /// strips the field from every record of `table`.
    pub fn remove_dimension(&mut self, field: &str, table: &mut PartitionedTable) -> Result<()> {
        if self.dimensions.remove(field).is_none() {
            return Err(HyperError::not_found(format!("dimension '{}'", field)));
        }
        self.composites
            .retain(|c| !c.fields.iter().any(|f| f == field));
        for (_, record) in table.iter_mut() {
            record.remove(field);
        }
        Ok(())
    }

    /// Builds a composite index over `fields`, in that level order.
    pub fn create_composite(&mut self, fields: &[&str], table: &PartitionedTable) -> Result<()> {
        let fields: Vec<String> = fields.iter().map(|f| f.trim().to_string()).collect();
        if fields.is_empty() || fields.iter().any(String::is_empty) {
            return Err(HyperError::validation("composite index needs non-empty field names"));
        }
        let distinct: BTreeSet<&String> = fields.iter().collect();
        if distinct.len() != fields.len() {
            return Err(HyperError::validation("composite index repeats a field"));
        }
        if self.composites.iter().any(|c| c.fields == fields) {
            return Err(HyperError::AlreadyExists(format!(
                "composite index ({})",
                fields.join(", ")
            )));
        }
        let mut index = CompositeIndex::new(fields);
        for (key, record) in table.iter() {
            index.insert(key, record);
        }
        self.composites.push(index);
        Ok(())
    }

    pub fn on_insert(&mut self, key: &str, record: &Record) {
        for index in self.dimensions.values_mut() {
            index.insert(key, record);
        }
        for index in &mut self.composites {
            index.insert(key, record);
        }
    }

    pub fn on_remove(&mut self, key: &str, record: &Record) {
        for index in self.dimensions.values_mut() {
            index.remove(key, record);
        }
        for index in &mut self.composites {
            index.remove(key, record);
        }
    }

    /// Moves `key` from the entries of `old` to those of `new`.
    pub fn on_update(&mut self, key: &str, old: &Record, new: &Record) {
        self.on_remove(key, old);
        self.on_insert(key, new);
    }

    /// Rebuilds every index from `table`.
    pub fn rebuild(&mut self, table: &PartitionedTable) {
        for index in self.dimensions.values_mut() {
            index.entries.clear();
            for (key, record) in table.iter() {
                index.insert(key, record);
            }
        }
        for index in &mut self.composites {
            index.root = TrieNode::default();
            for (key, record) in table.iter() {
                index.insert(key, record);
            }
        }
    }

    pub fn has_dimension(&self, field: &str) -> bool {
        self.dimensions.contains_key(field)
    }

    pub fn dimension(&self, field: &str) -> Option<&DimensionIndex> {
        self.dimensions.get(field)
    }

    pub fn dimensions(&self) -> Vec<String> {
        self.dimensions.keys().cloned().collect()
    }

    pub fn composites(&self) -> Vec<Vec<String>> {
        self.composites.iter().map(|c| c.fields.clone()).collect()
    }

    fn dimension_or_err(&self, field: &str) -> Result<&DimensionIndex> {
        self.dimensions
            .get(field)
            .ok_or_else(|| HyperError::not_found(format!("dimension '{}'", field)))
    }

    fn composite_or_err(&self, fields: &[&str]) -> Result<&CompositeIndex> {
        self.composites
            .iter()
            .find(|c| c.fields.iter().map(String::as_str).eq(fields.iter().copied()))
            .ok_or_else(|| {
                HyperError::not_found(format!("composite index ({})", fields.join(", ")))
            })
    }

    pub fn lookup(&self, field: &str, value: &Value) -> Result<Vec<String>> {
        Ok(self.dimension_or_err(field)?.lookup(value))
    }

    pub fn lookup_range(
        &self,
        field: &str,
        lower: Bound<f64>,
        upper: Bound<f64>,
    ) -> Result<Vec<String>> {
        Ok(self.dimension_or_err(field)?.range(lower, upper))
    }

    pub fn composite_lookup(&self, fields: &[&str], prefix: &[Value]) -> Result<Vec<String>> {
        let index = self.composite_or_err(fields)?;
        if prefix.len() > fields.len() {
            return Err(HyperError::validation(format!(
                "prefix has {} values for {} fields",
                prefix.len(),
                fields.len()
            )));
        }
        Ok(index.lookup_prefix(prefix))
    }

    pub fn composite_range(&self, fields: &[&str], ranges: &[(f64, f64)]) -> Result<Vec<String>> {
        let index = self.composite_or_err(fields)?;
        if ranges.len() > fields.len() {
            return Err(HyperError::validation(format!(
                "{} ranges for {} fields",
                ranges.len(),
                fields.len()
            )));
        }
        Ok(index.range(ranges))
    }

    /// Candidate keys for `predicate` drawn from the indexes.
    ///
    /// Returns `None` when no index applies and a full scan is required. The
    /// candidates are a superset of the matching records.
    pub fn candidates(&self, predicate: &Predicate) -> Option<BTreeSet<String>> {
        let mut result: Option<BTreeSet<String>> = None;
        for (field, cond) in predicate.conditions() {
            let Some(index) = self.dimensions.get(field) else {
                continue;
            };
            let (op, value) = cond.parts();
            let keys: Vec<String> = match op {
                CompareOp::Eq => index.lookup(value),
                CompareOp::Gt | CompareOp::Lt | CompareOp::Ge | CompareOp::Le => {
                    match value.to_number() {
                        Some(n) => {
                            let (lo, hi) = match op {
                                CompareOp::Gt => (Bound::Excluded(n), Bound::Unbounded),
                                CompareOp::Ge => (Bound::Included(n), Bound::Unbounded),
                                CompareOp::Lt => (Bound::Unbounded, Bound::Excluded(n)),
                                _ => (Bound::Unbounded, Bound::Included(n)),
                            };
                            index.range(lo, hi)
                        }
                        None => Vec::new(),
                    }
                }
                CompareOp::Ne | CompareOp::Match => continue,
            };
            let keys: BTreeSet<String> = keys.into_iter().collect();
            result = Some(match result {
                None => keys,
                Some(acc) => acc.intersection(&keys).cloned().collect(),
            });
        }
        if result.is_some() {
            return result;
        }

        // Longest equality prefix over any composite index.
        let mut best: Option<(usize, &CompositeIndex, Vec<Value>)> = None;
        for index in &self.composites {
            let prefix: Vec<Value> = index
                .fields
                .iter()
                .map_while(|f| match predicate.get(f).map(|c| c.parts()) {
                    Some((CompareOp::Eq, v)) => Some(v.clone()),
                    _ => None,
                })
                .collect();
            if !prefix.is_empty() && best.as_ref().map_or(true, |(n, _, _)| prefix.len() > *n) {
                best = Some((prefix.len(), index, prefix));
            }
        }
        best.map(|(_, index, prefix)| index.lookup_prefix(&prefix).into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record;

    fn items() -> PartitionedTable {
        let mut table = PartitionedTable::new("id", 4).unwrap();
        let rows = [
            record! { "id" => "1", "price" => 10, "color" => "red", "x" => 1, "y" => 1 },
            record! { "id" => "2", "price" => 15, "color" => "blue", "x" => 1, "y" => 2 },
            record! { "id" => "3", "price" => "15", "color" => "red", "x" => 2, "y" => 1 },
            record! { "id" => "4", "color" => "green", "x" => 3 },
        ];
        for row in rows {
            table.insert(row).unwrap();
        }
        table
    }

    fn sorted(mut keys: Vec<String>) -> Vec<String> {
        keys.sort();
        keys
    }

    #[test]
    fn test_value_key_canonicalizes_numeric_text() {
        assert_eq!(
            ValueKey::from_value(&Value::from(" 15 ")),
            ValueKey::from_value(&Value::from(15))
        );
        assert_eq!(
            ValueKey::from_value(&Value::from(-0.0)),
            ValueKey::from_value(&Value::from(0.0))
        );
        assert!(ValueKey::from_value(&Value::from(f64::NAN)).is_none());
        assert!(ValueKey::Number(1e9) < ValueKey::Text("a".into()));
        assert!(ValueKey::Text("z".into()) < ValueKey::Vector(vec![]));
    }

    #[test]
    fn test_dimension_lookup_and_range() {
        let table = items();
        let mut idx = IndexManager::new();
        idx.add_dimension("price", &table).unwrap();

        assert_eq!(sorted(idx.lookup("price", &Value::from(15)).unwrap()), vec!["2", "3"]);
        let range = idx
            .lookup_range("price", Bound::Excluded(10.0), Bound::Unbounded)
            .unwrap();
        assert_eq!(sorted(range), vec!["2", "3"]);
        let empty = idx
            .lookup_range("price", Bound::Excluded(10.0), Bound::Excluded(10.0))
            .unwrap();
        assert!(empty.is_empty());
        assert!(matches!(
            idx.lookup("color", &Value::from("red")),
            Err(HyperError::NotFound(_))
        ));
    }

    #[test]
    fn test_incremental_maintenance() {
        let mut table = items();
        let mut idx = IndexManager::new();
        idx.add_dimension("color", &table).unwrap();

        let old = table.get("1").unwrap().clone();
        let mut new = old.clone();
        new.set("color", "blue");
        *table.get_mut("1").unwrap() = new.clone();
        idx.on_update("1", &old, &new);
        assert_eq!(sorted(idx.lookup("color", &Value::from("blue")).unwrap()), vec!["1", "2"]);
        assert_eq!(idx.lookup("color", &Value::from("red")).unwrap(), vec!["3"]);

        let gone = table.remove("3").unwrap();
        idx.on_remove("3", &gone);
        assert!(idx.lookup("color", &Value::from("red")).unwrap().is_empty());
        assert_eq!(idx.dimension("color").unwrap().entry_count(), 3);
    }

    #[test]
    fn test_remove_dimension_strips_field() {
        let mut table = items();
        let mut idx = IndexManager::new();
        idx.add_dimension("x", &table).unwrap();
        idx.create_composite(&["x", "y"], &table).unwrap();
        idx.remove_dimension("x", &mut table).unwrap();

        assert!(table.iter().all(|(_, r)| !r.contains("x")));
        assert!(idx.composites().is_empty());
        assert!(matches!(
            idx.remove_dimension("x", &mut table),
            Err(HyperError::NotFound(_))
        ));
    }

    #[test]
    fn test_composite_prefix_and_range() {
        let table = items();
        let mut idx = IndexManager::new();
        idx.create_composite(&["x", "y"], &table).unwrap();

        // Record 4 lacks y and is not in the trie.
        assert_eq!(sorted(idx.composite_lookup(&["x", "y"], &[Value::from(1)]).unwrap()), vec!["1", "2"]);
        assert_eq!(
            idx.composite_lookup(&["x", "y"], &[Value::from(1), Value::from(2)]).unwrap(),
            vec!["2"]
        );
        assert!(idx.composite_lookup(&["x", "y"], &[Value::from(3)]).unwrap().is_empty());
        assert_eq!(
            sorted(idx.composite_range(&["x", "y"], &[(1.0, 2.0), (1.0, 1.0)]).unwrap()),
            vec!["1", "3"]
        );
        assert!(matches!(
            idx.composite_lookup(&["y", "x"], &[]),
            Err(HyperError::NotFound(_))
        ));
        assert!(matches!(
            idx.create_composite(&["x", "y"], &table),
            Err(HyperError::AlreadyExists(_))
        ));
    }

    #[test]
    fn test_composite_prunes_empty_branches() {
        let mut table = items();
        let mut idx = IndexManager::new();
        idx.create_composite(&["x", "y"], &table).unwrap();
        for key in ["1", "2", "3"] {
            let rec = table.remove(key).unwrap();
            idx.on_remove(key, &rec);
        }
        assert!(idx.composites[0].is_empty());
    }

    #[test]
    fn test_candidates_access_path() {
        let table = items();
        let mut idx = IndexManager::new();
        assert!(idx.candidates(&Predicate::new().eq("price", 15)).is_none());

        idx.add_dimension("price", &table).unwrap();
        let pred = Predicate::new()
            .compare("price", CompareOp::Ge, 15)
            .unwrap()
            .eq("color", "red");
        let keys: Vec<String> = idx.candidates(&pred).unwrap().into_iter().collect();
        assert_eq!(keys, vec!["2", "3"]);

        idx.create_composite(&["color", "x"], &table).unwrap();
        let pred = Predicate::new().eq("color", "red");
        let keys: Vec<String> = idx.candidates(&pred).unwrap().into_iter().collect();
        assert_eq!(keys, vec!["1", "3"]);

        let pred = Predicate::new().compare("price", CompareOp::Gt, "abc").unwrap();
        assert!(idx.candidates(&pred).unwrap().is_empty());
    }

    #[test]
    fn test_composite_needs_leading_equality() {
        let table = items();
        let mut idx = IndexManager::new();
        idx.create_composite(&["color", "price"], &table).unwrap();

        assert!(idx.candidates(&Predicate::new().eq("price", 15)).is_none());
        assert!(idx
            .candidates(&Predicate::new().eq("price", 15).eq("x", 1))
            .is_none());
        let ranged = Predicate::new()
            .compare("color", CompareOp::Ge, "red")
            .unwrap()
            .eq("price", 15);
        assert!(idx.candidates(&ranged).is_none());

        // Only the equality on `color` narrows; the range is left to the matcher.
        let pred = Predicate::new()
            .eq("color", "red")
            .compare("price", CompareOp::Le, 12)
            .unwrap();
        let keys: Vec<String> = idx.candidates(&pred).unwrap().into_iter().collect();
        assert_eq!(keys, vec!["1", "3"]);

        let pred = Predicate::new().eq("color", "red").eq("price", 15);
        let keys: Vec<String> = idx.candidates(&pred).unwrap().into_iter().collect();
        assert_eq!(keys, vec!["3"]);
    }
}
