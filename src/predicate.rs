// Copyright (c) 2025 HypercubeDB Contributors
// Licensed under the GPL-3.0 License. See LICENSE file for details.

//! Predicate language for record selection.
//!
//! A [`Predicate`] maps field names to [`Condition`]s. Every condition must
//! hold for a record to match (logical AND); an empty predicate matches every
//! record. The operator set is fixed:
//!
//! | Operator | Meaning |
//! |----------|---------|
//! | `=`  | loose equality (numbers and numeric strings compare by value) |
//! | `>` `<` `>=` `<=` | numeric comparison, both sides coerced to numbers |
//! | `<>` | negation of `=` |
//! | `=~` | regex match against the stringified field value |
//!
//! A field absent from the record fails its condition, whatever the operator.
//!
//! Regex patterns are compiled once per evaluation pass by
//! [`Predicate::compile`]; an invalid pattern is a validation error.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{HyperError, Result};
use crate::types::{Record, Value};

/// Comparison operator of a [`Condition`].
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareOp {
    /// `=`
    Eq,
    /// `>`
    Gt,
    /// `<`
    Lt,
    /// `>=`
    Ge,
    /// `<=`
    Le,
    /// `<>`
    Ne,
    /// `=~`
    Match,
}

impl CompareOp {
    /// Returns the textual operator.
    pub fn symbol(&self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::Gt => ">",
            CompareOp::Lt => "<",
            CompareOp::Ge => ">=",
            CompareOp::Le => "<=",
            CompareOp::Ne => "<>",
            CompareOp::Match => "=~",
        }
    }
}

impl FromStr for CompareOp {
    type Err = HyperError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "=" => Ok(CompareOp::Eq),
            ">" => Ok(CompareOp::Gt),
            "<" => Ok(CompareOp::Lt),
            ">=" => Ok(CompareOp::Ge),
            "<=" => Ok(CompareOp::Le),
            "<>" => Ok(CompareOp::Ne),
            "=~" => Ok(CompareOp::Match),
            other => Err(HyperError::validation(format!(
                "unknown operator '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// A single field condition.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum Condition {
    /// Bare literal: loose equality.
    Equals(Value),
    /// Operator/value pair.
    Compare { op: CompareOp, value: Value },
}

impl Condition {
    /// Operator and operand of this condition, with bare literals reported as `=`.
    pub fn parts(&self) -> (CompareOp, &Value) {
        match self {
            Condition::Equals(v) => (CompareOp::Eq, v),
            Condition::Compare { op, value } => (*op, value),
        }
    }
}

/// Conjunction of per-field conditions.
///
/// # Examples
///
/// ```rust
/// use hypercubedb::{record, CompareOp, Predicate};
///
/// let pred = Predicate::new()
///     .eq("color", "red")
///     .compare("price", CompareOp::Ge, 10)
///     .unwrap();
///
/// let matcher = pred.compile().unwrap();
/// assert!(matcher.matches(&record! { "color" => "red", "price" => 12 }));
/// assert!(!matcher.matches(&record! { "color" => "red", "price" => 8 }));
/// assert!(!matcher.matches(&record! { "price" => 12 }));
/// ```
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct Predicate {
    conditions: BTreeMap<String, Condition>,
}

impl Predicate {
    /// Creates an empty predicate, matching every record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Alias for [`Predicate::new`] that reads better at call sites.
    pub fn all() -> Self {
        Self::default()
    }

    /// Adds a bare-literal equality condition on `field`.
    pub fn eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions
            .insert(field.into(), Condition::Equals(value.into()));
        self
    }

    /// Adds an operator condition on `field`.
    ///
    /// Fails when `field` is blank.
    pub fn compare(
        mut self,
        field: impl Into<String>,
        op: CompareOp,
        value: impl Into<Value>,
    ) -> Result<Self> {
        let field = field.into();
        if field.trim().is_empty() {
            return Err(HyperError::validation("predicate field name is empty"));
        }
        self.conditions.insert(
            field,
            Condition::Compare {
                op,
                value: value.into(),
            },
        );
        Ok(self)
    }

    /// Builds a predicate from textual `(field, operator, value)` triples.
    pub fn from_triples<I, F, O, V>(triples: I) -> Result<Self>
    where
        I: IntoIterator<Item = (F, O, V)>,
        F: Into<String>,
        O: AsRef<str>,
        V: Into<Value>,
    {
        triples
            .into_iter()
            .try_fold(Predicate::new(), |pred, (field, op, value)| {
                pred.compare(field, op.as_ref().parse()?, value)
            })
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.conditions.len()
    }

    pub fn get(&self, field: &str) -> Option<&Condition> {
        self.conditions.get(field)
    }

    /// Iterates conditions in field-name order.
    pub fn conditions(&self) -> impl Iterator<Item = (&str, &Condition)> {
        self.conditions.iter().map(|(k, c)| (k.as_str(), c))
    }

    /// Canonical serialization used as the query cache key.
    ///
    /// Returns `None` when an operand holds a non-finite number: JSON writes
    /// NaN and both infinities as `null`, so such predicates have no
    /// distinct key and must not be cached.
    pub fn canonical(&self) -> Result<Option<String>> {
        let finite = self
            .conditions
            .values()
            .all(|cond| is_finite_operand(cond.parts().1));
        if !finite {
            return Ok(None);
        }
        Ok(Some(serde_json::to_string(self)?))
    }

    /// Compiles regex operands so the predicate can be evaluated repeatedly.
    pub fn compile(&self) -> Result<Matcher<'_>> {
        let mut regexes = BTreeMap::new();
        for (field, cond) in &self.conditions {
            if let (CompareOp::Match, pattern) = cond.parts() {
                let re = Regex::new(&pattern.to_string()).map_err(|e| {
                    HyperError::validation(format!("invalid pattern for '{}': {}", field, e))
                })?;
                regexes.insert(field.as_str(), re);
            }
        }
        Ok(Matcher {
            predicate: self,
            regexes,
        })
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Predicate {
    /// Collects bare-literal equality conditions.
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        iter.into_iter()
            .fold(Predicate::new(), |pred, (k, v)| pred.eq(k, v))
    }
}

/// A predicate with its regex operands compiled.
pub struct Matcher<'a> {
    predicate: &'a Predicate,
    regexes: BTreeMap<&'a str, Regex>,
}

impl Matcher<'_> {
    /// Returns `true` if every condition holds for `record`.
    pub fn matches(&self, record: &Record) -> bool {
        self.predicate.conditions.iter().all(|(field, cond)| {
            let Some(actual) = record.get(field) else {
                return false;
            };
            let (op, expected) = cond.parts();
            match op {
                CompareOp::Eq => actual.loose_eq(expected),
                CompareOp::Ne => !actual.loose_eq(expected),
                CompareOp::Gt => numeric(actual, expected, |a, b| a > b),
                CompareOp::Lt => numeric(actual, expected, |a, b| a < b),
                CompareOp::Ge => numeric(actual, expected, |a, b| a >= b),
                CompareOp::Le => numeric(actual, expected, |a, b| a <= b),
                CompareOp::Match => self
                    .regexes
                    .get(field.as_str())
                    .map_or(false, |re| re.is_match(&actual.to_string())),
            }
        })
    }
}

fn is_finite_operand(value: &Value) -> bool {
    match value {
        Value::Number(n) => n.is_finite(),
        Value::Vector(v) => v.iter().all(|c| c.is_finite()),
        Value::Text(_) => true,
    }
}

fn numeric(actual: &Value, expected: &Value, cmp: impl Fn(f64, f64) -> bool) -> bool {
    match (actual.to_number(), expected.to_number()) {
        (Some(a), Some(b)) => cmp(a, b),
        _ => false,
    }
}
