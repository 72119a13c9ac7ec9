// Copyright (c) 2025 HypercubeDB Contributors
// Licensed under the GPL-3.0 License. See LICENSE file for details.

//! # HypercubeDB
//!
//! An embedded, file-backed multi-dimensional record store written in Rust.
//!
//! Records are schema-free field/value mappings grouped into tables and
//! databases. Clients address them through per-dimension equality, range and
//! regex predicates rather than a fixed relational schema.
//!
//! ## Features
//!
//! - **Partitioned tables** - records are hash-partitioned on a partition key
//!   with a hash that stays stable across runs
//! - **Secondary indexes** - per-dimension inverted indexes and composite
//!   trie indexes, maintained incrementally on every write
//! - **Non-blocking table locks** - a locked table fails fast with
//!   [`HyperError::Busy`]; retry policy belongs to the caller
//!   ([`retry_on_busy`])
//! - **Query cache** - `select` results are memoized until the next write to
//!   the table
//! - **Crash-safe snapshots** - one LZ4-compressed file per database,
//!   replaced atomically through a temporary file
//! - **Lossy vector compression** - optional spherical projection of vector
//!   fields into a fixed four-field encoding
//!
//! ## Architecture
//!
//! | Component | Purpose |
//! |-----------|---------|
//! | [`Catalog`] | Databases, tables and every public operation |
//! | [`partition::PartitionedTable`] | Hash-partitioned record storage |
//! | [`index::IndexManager`] | Dimension and composite indexes |
//! | [`lock::LockManager`] | Per-table mutual exclusion |
//! | [`cache::QueryCache`] | LRU cache of `select` results |
//! | [`persistence::SnapshotWriter`] | Background snapshot writes |
//! | [`projection`] | Spherical projection of vectors |
//!
//! ## Quick Start
//!
//! ```rust
//! use hypercubedb::{record, Catalog, CatalogConfig, CompareOp, Predicate, Result};
//!
//! fn main() -> Result<()> {
//!     let dir = tempfile::tempdir()?;
//!     let catalog = Catalog::open(CatalogConfig::in_dir(dir.path()))?;
//!
//!     catalog.create_database("shop")?;
//!     catalog.use_database("shop")?;
//!     catalog.create_table("items", &["id", "name", "price"], "id")?;
//!
//!     catalog.insert("items", record! { "id" => "1", "name" => "Widget", "price" => 10 })?;
//!     catalog.insert("items", record! { "id" => "2", "name" => "Gadget", "price" => 15 })?;
//!
//!     catalog.add_dimension("items", "price")?;
//!     let pricey = catalog.select(
//!         "items",
//!         &Predicate::new().compare("price", CompareOp::Gt, 12)?,
//!     )?;
//!     assert_eq!(pricey.len(), 1);
//!
//!     // Wait for the background writer before the directory goes away.
//!     catalog.flush()?;
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod catalog;
pub mod compression;
pub mod error;
pub mod extension;
pub mod index;
pub mod lock;
pub mod partition;
pub mod persistence;
pub mod predicate;
pub mod projection;
pub mod types;

// Re-export main types for convenience
pub use catalog::{Catalog, CatalogConfig, TableInfo, DEFAULT_PARTITIONS};
pub use error::{HyperError, Result};
pub use types::{Record, Value};

pub use predicate::{CompareOp, Condition, Matcher, Predicate};

pub use lock::{retry_on_busy, LockManager, TableGuard};

pub use cache::{CacheStats, QueryCache};

pub use extension::{Extension, ExtensionOutput, FieldSummary};

pub use projection::ProjectedVector;
