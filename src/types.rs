// Copyright (c) 2025 HypercubeDB Contributors
// Licensed under the GPL-3.0 License. See LICENSE file for details.

//! Core data types for HypercubeDB.
//!
//! This module defines the record model shared by every layer of the engine:
//! - [`Value`] - The tagged union stored in record fields
//! - [`Record`] - A field-name to [`Value`] mapping
//! - [`record!`](crate::record) - Convenience constructor for records

use std::collections::btree_map;
use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A typed field value.
///
/// Records are schema-free, so every field carries its own type tag:
/// - `Text(String)` - UTF-8 strings
/// - `Number(f64)` - 64-bit floating point numbers (integers included)
/// - `Vector(Vec<f64>)` - Numeric vectors, eligible for lossy projection
///
/// # Examples
///
/// ```rust
/// use hypercubedb::Value;
///
/// let name: Value = "sensor-1".into();
/// let price: Value = 10.into();
/// let point: Value = vec![1.0, 2.0, 3.0].into();
///
/// assert_eq!(price.as_number(), Some(10.0));
/// assert_eq!(name.type_name(), "Text");
/// assert!(point.is_vector());
/// ```
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum Value {
    /// UTF-8 encoded string.
    Text(String),
    /// 64-bit floating point number.
    Number(f64),
    /// Numeric vector.
    Vector(Vec<f64>),
}

impl Value {
    /// Returns the type name as a static string for debugging.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Text(_) => "Text",
            Value::Number(_) => "Number",
            Value::Vector(_) => "Vector",
        }
    }

    /// Returns the string if this is a [`Text`](Value::Text) variant.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the number if this is a [`Number`](Value::Number) variant.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Returns `true` if this is a [`Vector`](Value::Vector) variant.
    pub fn is_vector(&self) -> bool {
        matches!(self, Value::Vector(_))
    }

    /// Returns the components if this is a [`Vector`](Value::Vector) variant.
    pub fn as_vector(&self) -> Option<&[f64]> {
        match self {
            Value::Vector(v) => Some(v),
            _ => None,
        }
    }

    /// Numeric view of the value used by comparison operators.
    ///
    /// Text is parsed after trimming surrounding whitespace; vectors and
    /// unparsable text have no numeric view.
    ///
    /// ```rust
    /// use hypercubedb::Value;
    ///
    /// assert_eq!(Value::from(" 42 ").to_number(), Some(42.0));
    /// assert_eq!(Value::from("abc").to_number(), None);
    /// ```
    pub fn to_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::Text(s) => s.trim().parse::<f64>().ok(),
            Value::Vector(_) => None,
        }
    }

    /// String form used as a partition key.
    ///
    /// Returns `None` for values that cannot identify a record: empty text,
    /// non-finite numbers and vectors.
    pub fn to_key_string(&self) -> Option<String> {
        match self {
            Value::Text(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) if n.is_finite() => Some(format_number(*n)),
            _ => None,
        }
    }

    /// Loose equality: identical variants compare directly, while a number
    /// and a numeric string compare by numeric value.
    ///
    /// ```rust
    /// use hypercubedb::Value;
    ///
    /// assert!(Value::from(10).loose_eq(&Value::from("10")));
    /// assert!(!Value::from("ten").loose_eq(&Value::from(10)));
    /// ```
    pub fn loose_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Text(a), Value::Text(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Vector(a), Value::Vector(b)) => a == b,
            (Value::Number(_), Value::Text(_)) | (Value::Text(_), Value::Number(_)) => {
                matches!((self.to_number(), other.to_number()), (Some(a), Some(b)) if a == b)
            }
            _ => false,
        }
    }
}

/// Formats a number the way keys and regex matching see it: integral values
/// without a trailing `.0`.
pub(crate) fn format_number(n: f64) -> String {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Text(s) => f.write_str(s),
            Value::Number(n) => f.write_str(&format_number(*n)),
            Value::Vector(v) => {
                let parts: Vec<String> = v.iter().map(|c| format_number(*c)).collect();
                f.write_str(&parts.join(","))
            }
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Number(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Number(value as f64)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Number(value as f64)
    }
}

impl From<Vec<f64>> for Value {
    fn from(value: Vec<f64>) -> Self {
        Value::Vector(value)
    }
}

impl From<&[f64]> for Value {
    fn from(value: &[f64]) -> Self {
        Value::Vector(value.to_vec())
    }
}

/// A schema-free record: an ordered mapping from field name to [`Value`].
///
/// Field order is canonical (sorted by name), which keeps snapshot bytes and
/// cache keys deterministic.
///
/// # Examples
///
/// ```rust
/// use hypercubedb::{record, Record, Value};
///
/// let rec = record! { "id" => "1", "price" => 10 };
/// assert_eq!(rec.get("price"), Some(&Value::Number(10.0)));
///
/// let mut other = Record::new();
/// other.set("id", "1");
/// other.set("price", 10);
/// assert_eq!(rec, other);
/// ```
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(transparent)]
pub struct Record {
    fields: BTreeMap<String, Value>,
}

impl Record {
    /// Creates an empty record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style field assignment.
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(field, value);
        self
    }

    /// Sets a field, returning the previous value.
    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.fields.insert(field.into(), value.into())
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.fields.remove(field)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Iterates fields in name order.
    pub fn iter(&self) -> btree_map::Iter<'_, String, Value> {
        self.fields.iter()
    }

    /// Field names in name order.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(|k| k.as_str())
    }

    /// Applies every field of `patch` on top of this record.
    pub fn merge(&mut self, patch: &Record) {
        for (field, value) in patch.iter() {
            self.fields.insert(field.clone(), value.clone());
        }
    }

    /// Returns a copy with blank field names dropped and names trimmed.
    pub(crate) fn normalized(&self) -> Record {
        let fields = self
            .fields
            .iter()
            .filter_map(|(k, v)| {
                let name = k.trim();
                (!name.is_empty()).then(|| (name.to_string(), v.clone()))
            })
            .collect();
        Record { fields }
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Record {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Record {
            fields: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

impl IntoIterator for Record {
    type Item = (String, Value);
    type IntoIter = btree_map::IntoIter<String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.into_iter()
    }
}

impl<'a> IntoIterator for &'a Record {
    type Item = (&'a String, &'a Value);
    type IntoIter = btree_map::Iter<'a, String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.iter()
    }
}

/// Builds a [`Record`] from `field => value` pairs.
///
/// ```rust
/// use hypercubedb::record;
///
/// let rec = record! { "id" => "7", "pos" => vec![0.0, 1.0, 0.0] };
/// assert_eq!(rec.len(), 2);
/// ```
#[macro_export]
macro_rules! record {
    () => { $crate::Record::new() };
    ($($field:expr => $value:expr),+ $(,)?) => {{
        let mut rec = $crate::Record::new();
        $( rec.set($field, $value); )+
        rec
    }};
}
