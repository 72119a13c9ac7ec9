// Copyright (c) 2025 HypercubeDB Contributors
// Licensed under the GPL-3.0 License. See LICENSE file for details.

//! Named extensions invoked through the catalog.
//!
//! An [`Extension`] receives the [`Catalog`] handle and string arguments. It
//! reads through `select`, `table_snapshot` or the index lookups and may write
//! through the CRUD methods; it gets no other access to engine internals.
//! Heavy computations should work on a `table_snapshot` copy so no table lock
//! is held while they run.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::info;

use crate::catalog::Catalog;
use crate::error::{HyperError, Result};
use crate::types::Record;

/// Value returned by an extension.
#[derive(Debug, Clone, PartialEq)]
pub enum ExtensionOutput {
    None,
    Text(String),
    Number(f64),
    Records(Vec<Record>),
}

/// A named operation that runs against a catalog.
pub trait Extension: Send + Sync {
    fn name(&self) -> &str;

    fn execute(&self, catalog: &Catalog, args: &[String]) -> Result<ExtensionOutput>;
}

/// Extensions by name. Registering an existing name replaces it.
#[derive(Default)]
pub struct ExtensionRegistry {
    extensions: RwLock<BTreeMap<String, Arc<dyn Extension>>>,
}

impl ExtensionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, extension: Arc<dyn Extension>) -> Result<()> {
        let name = extension.name().trim().to_string();
        if name.is_empty() {
            return Err(HyperError::validation("extension name is empty"));
        }
        let replaced = self
            .extensions
            .write()
            .insert(name.clone(), extension)
            .is_some();
        info!(extension = %name, replaced, "extension registered");
        Ok(())
    }

    /// Returns the extension so it can run without holding the registry lock.
    pub fn get(&self, name: &str) -> Result<Arc<dyn Extension>> {
        self.extensions
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| HyperError::not_found(format!("extension '{}'", name)))
    }

    pub fn names(&self) -> Vec<String> {
        self.extensions.read().keys().cloned().collect()
    }
}

/// Built-in `summary` extension: count, min, max and mean of a numeric field.
///
/// Arguments: `[table, field]`. Records whose field has no numeric view are
/// ignored. Returns one record with `count`, `min`, `max` and `mean` (the
/// last three are absent when no value was numeric).
pub struct FieldSummary;

impl Extension for FieldSummary {
    fn name(&self) -> &str {
        "summary"
    }

    fn execute(&self, catalog: &Catalog, args: &[String]) -> Result<ExtensionOutput> {
        let [table, field] = args else {
            return Err(HyperError::Parse(format!(
                "summary expects <table> <field>, got {} argument(s)",
                args.len()
            )));
        };

        let values: Vec<f64> = catalog
            .table_snapshot(table)?
            .iter()
            .filter_map(|r| r.get(field).and_then(|v| v.to_number()))
            .filter(|n| !n.is_nan())
            .collect();

        let mut out = Record::new().with("count", values.len() as f64);
        if !values.is_empty() {
            let min = values.iter().copied().fold(f64::INFINITY, f64::min);
            let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            let mean = values.iter().sum::<f64>() / values.len() as f64;
            out.set("min", min);
            out.set("max", max);
            out.set("mean", mean);
        }
        Ok(ExtensionOutput::Records(vec![out]))
    }
}
