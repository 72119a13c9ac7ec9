// Copyright (c) 2025 HypercubeDB Contributors
// Licensed under the GPL-3.0 License. See LICENSE file for details.

//! The catalog: databases, tables and every public operation.
//!
//! A [`Catalog`] owns the database → table map, the current-database
//! context, the table locks, the query cache and the snapshot writer.
//!
//! Every table operation follows the same envelope:
//!
//! 1. resolve the table in the current database (`Validation` / `NotFound`)
//! 2. take the table lock without waiting (`Busy` if held)
//! 3. run the operation against partitions and indexes
//! 4. for writes: drop the table's cached results, stage a new table image
//!    and schedule a snapshot of the database
//! 5. release the lock (guard drop, on every exit path)
//!
//! In-memory state and indexes are final when the call returns; the snapshot
//! write may still be queued on the background writer. Use
//! [`Catalog::flush`] to wait for it.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{info, warn};

use crate::cache::{CacheStats, QueryCache};
use crate::error::{HyperError, Result};
use crate::extension::{Extension, ExtensionOutput, ExtensionRegistry};
use crate::index::IndexManager;
use crate::lock::{LockManager, TableGuard};
use crate::partition::PartitionedTable;
use crate::persistence::{load_dir, snapshot_path, SnapshotWriter, TableImage};
use crate::predicate::Predicate;
use crate::types::{Record, Value};

/// Partition count used when a table is created without one.
pub const DEFAULT_PARTITIONS: usize = 10;

/// Configuration options for a [`Catalog`].
///
/// # Examples
///
/// ```rust
/// use hypercubedb::CatalogConfig;
///
/// let config = CatalogConfig {
///     default_partitions: 16,
///     background_writes: false,
///     ..CatalogConfig::in_dir("/tmp/hypercube")
/// };
/// assert_eq!(config.cache_capacity, 1024);
/// ```
#[derive(Debug, Clone)]
pub struct CatalogConfig {
    /// Directory holding one `<database>.db` snapshot per database.
    pub data_dir: PathBuf,

    /// Partition count for new tables (default: 10).
    pub default_partitions: usize,

    /// Write snapshots on a background thread (default: true).
    /// When false, every mutation writes its snapshot before returning.
    pub background_writes: bool,

    /// fsync the temporary file before renaming it (default: true).
    pub sync_on_write: bool,

    /// Maximum cached `select` results; 0 disables the cache (default: 1024).
    pub cache_capacity: usize,

    /// Load existing snapshots when opening (default: true).
    pub load_on_open: bool,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            default_partitions: DEFAULT_PARTITIONS,
            background_writes: true,
            sync_on_write: true,
            cache_capacity: 1024,
            load_on_open: true,
        }
    }
}

impl CatalogConfig {
    /// Default configuration rooted at `dir`.
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: dir.into(),
            ..Self::default()
        }
    }
}

/// Public metadata of a table.
#[derive(Debug, Clone, PartialEq)]
pub struct TableInfo {
    pub database: String,
    pub name: String,
    /// Declared fields, informational only.
    pub schema: Vec<String>,
    pub partition_key: String,
    pub partition_count: usize,
    /// Vector fields are stored through the lossy spherical projection.
    pub compressed: bool,
    pub record_count: usize,
    pub partition_sizes: Vec<usize>,
    pub dimensions: Vec<String>,
    pub composites: Vec<Vec<String>>,
}

struct TableState {
    storage: PartitionedTable,
    indexes: IndexManager,
    schema: Vec<String>,
    compressed: bool,
}

impl TableState {
    fn image(&self) -> TableImage {
        TableImage::capture(&self.storage, &self.schema, self.compressed)
    }

    /// Records for `keys`, in scan order.
    fn records_for<I: IntoIterator<Item = String>>(&self, keys: I) -> Vec<Record> {
        let mut located: Vec<((usize, usize), &Record)> = keys
            .into_iter()
            .filter_map(|k| Some((self.storage.locate(&k)?, self.storage.get(&k)?)))
            .collect();
        located.sort_by_key(|(pos, _)| *pos);
        located.into_iter().map(|(_, r)| r.clone()).collect()
    }
}

struct Table {
    qualified: String,
    state: Mutex<TableState>,
}

#[derive(Default)]
struct Staged {
    images: BTreeMap<String, Arc<TableImage>>,
    dropped: bool,
}

struct Database {
    name: String,
    tables: RwLock<BTreeMap<String, Arc<Table>>>,
    staged: Mutex<Staged>,
}

impl Database {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            tables: RwLock::new(BTreeMap::new()),
            staged: Mutex::new(Staged::default()),
        }
    }

    /// Replaces (or removes) the staged image of `table` and schedules a
    /// snapshot of every staged table.
    ///
    /// Staging and submission happen under one lock so snapshots of a
    /// database are submitted in staging order.
    fn stage(&self, writer: &SnapshotWriter, table: &str, image: Option<TableImage>) -> Result<()> {
        let mut staged = self.staged.lock();
        if staged.dropped {
            return Err(HyperError::not_found(format!("database '{}'", self.name)));
        }
        match image {
            Some(image) => {
                staged.images.insert(table.to_string(), Arc::new(image));
            }
            None => {
                staged.images.remove(table);
            }
        }
        let tables = staged
            .images
            .iter()
            .map(|(name, image)| (name.clone(), Arc::clone(image)))
            .collect();
        writer.save(&self.name, tables);
        Ok(())
    }
}

/// Rejects names that cannot be used as file names or qualified names.
pub(crate) fn validate_name(kind: &str, name: &str) -> Result<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(HyperError::validation(format!("{} name is empty", kind)));
    }
    if !name
        .chars()
        .all(|c| c.is_alphanumeric() || c == '_' || c == '-')
    {
        return Err(HyperError::validation(format!(
            "{} name '{}' may only contain letters, digits, '_' and '-'",
            kind, name
        )));
    }
    Ok(name.to_string())
}

fn qualified(database: &str, table: &str) -> String {
    format!("{}.{}", database, table)
}

/// Embedded multi-dimensional record store.
///
/// `Catalog` is `Send + Sync`; share it with `Arc` across threads. Table
/// operations never block on each other: a call that finds its table locked
/// fails with [`HyperError::Busy`].
///
/// # Examples
///
/// ```rust
/// use hypercubedb::{record, Catalog, CatalogConfig, Predicate};
///
/// let dir = tempfile::tempdir().unwrap();
/// let catalog = Catalog::open(CatalogConfig::in_dir(dir.path())).unwrap();
///
/// catalog.create_database("shop").unwrap();
/// catalog.use_database("shop").unwrap();
/// catalog.create_table("items", &["id", "name", "price"], "id").unwrap();
///
/// catalog.insert("items", record! { "id" => "1", "name" => "Widget", "price" => 10 }).unwrap();
/// let rows = catalog.select("items", &Predicate::new().eq("id", "1")).unwrap();
/// assert_eq!(rows.len(), 1);
///
/// catalog.close().unwrap();
/// ```
pub struct Catalog {
    config: CatalogConfig,
    databases: RwLock<BTreeMap<String, Arc<Database>>>,
    current: RwLock<Option<String>>,
    locks: LockManager,
    cache: QueryCache,
    extensions: ExtensionRegistry,
    skipped: Vec<PathBuf>,
    writer: SnapshotWriter,
}

impl Catalog {
    /// Opens a catalog over `config.data_dir`, creating the directory and
    /// loading existing snapshots.
    ///
    /// A snapshot that cannot be read or decoded is logged and skipped; its
    /// file is left in place. See [`Catalog::skipped_snapshots`].
    pub fn open(config: CatalogConfig) -> Result<Self> {
        if config.default_partitions == 0 {
            return Err(HyperError::validation("default_partitions must be at least 1"));
        }
        let writer = SnapshotWriter::start(
            &config.data_dir,
            config.sync_on_write,
            config.background_writes,
        )?;

        let mut databases = BTreeMap::new();
        let mut skipped = Vec::new();
        if config.load_on_open {
            let outcome = load_dir(&config.data_dir)?;
            skipped.extend(outcome.skipped.into_iter().map(|(path, _)| path));

            for (name, doc) in outcome.loaded {
                match Self::restore_database(&name, doc.tables) {
                    Ok(db) => {
                        databases.insert(name, Arc::new(db));
                    }
                    Err(e) => {
                        warn!(database = %name, error = %e, "skipping database with invalid tables");
                        skipped.push(snapshot_path(&config.data_dir, &name));
                    }
                }
            }
        }

        info!(
            data_dir = %config.data_dir.display(),
            databases = databases.len(),
            skipped = skipped.len(),
            "catalog opened"
        );

        Ok(Self {
            cache: QueryCache::new(config.cache_capacity),
            config,
            databases: RwLock::new(databases),
            current: RwLock::new(None),
            locks: LockManager::new(),
            extensions: ExtensionRegistry::new(),
            skipped,
            writer,
        })
    }

    fn restore_database(name: &str, images: BTreeMap<String, TableImage>) -> Result<Database> {
        let db = Database::new(name);
        {
            let mut tables = db.tables.write();
            let mut staged = db.staged.lock();
            for (table_name, image) in images {
                let restored = image.clone().restore()?;
                let table = Table {
                    qualified: qualified(name, &table_name),
                    state: Mutex::new(TableState {
                        storage: restored.storage,
                        indexes: IndexManager::new(),
                        schema: restored.schema,
                        compressed: restored.compressed,
                    }),
                };
                staged.images.insert(table_name.clone(), Arc::new(image));
                tables.insert(table_name, Arc::new(table));
            }
        }
        Ok(db)
    }

    pub fn config(&self) -> &CatalogConfig {
        &self.config
    }

    pub fn data_dir(&self) -> &Path {
        &self.config.data_dir
    }

    /// Snapshot files that were present but not loaded.
    pub fn skipped_snapshots(&self) -> &[PathBuf] {
        &self.skipped
    }

    // ------------------------------------------------------------------
    // Databases
    // ------------------------------------------------------------------

    pub fn create_database(&self, name: &str) -> Result<()> {
        let name = validate_name("database", name)?;
        let db = {
            let mut dbs = self.databases.write();
            if dbs.contains_key(&name) {
                return Err(HyperError::AlreadyExists(format!("database '{}'", name)));
            }
            let db = Arc::new(Database::new(&name));
            dbs.insert(name.clone(), Arc::clone(&db));
            db
        };
        // Persist the empty database so it survives a restart.
        let staged = db.staged.lock();
        self.writer.save(&name, Vec::new());
        drop(staged);
        info!(database = %name, "database created");
        Ok(())
    }

    /// Drops a database, its tables and its snapshot file.
    ///
    /// Fails with `Busy` if any of its tables is locked.
    pub fn drop_database(&self, name: &str) -> Result<()> {
        let mut dbs = self.databases.write();
        let db = dbs
            .get(name)
            .cloned()
            .ok_or_else(|| HyperError::not_found(format!("database '{}'", name)))?;

        let _guards: Vec<TableGuard<'_>> = db
            .tables
            .read()
            .values()
            .map(|t| self.locks.guard(&t.qualified))
            .collect::<Result<_>>()?;

        dbs.remove(name);
        {
            let mut staged = db.staged.lock();
            staged.dropped = true;
            staged.images.clear();
            self.writer.purge(name);
        }
        self.cache.invalidate_prefix(&format!("{}.", name));

        let mut current = self.current.write();
        if current.as_deref() == Some(name) {
            *current = None;
        }
        info!(database = %name, "database dropped");
        Ok(())
    }

    pub fn use_database(&self, name: &str) -> Result<()> {
        if !self.databases.read().contains_key(name) {
            return Err(HyperError::not_found(format!("database '{}'", name)));
        }
        *self.current.write() = Some(name.to_string());
        info!(database = %name, "database selected");
        Ok(())
    }

    pub fn current_database(&self) -> Option<String> {
        self.current.read().clone()
    }

    pub fn list_databases(&self) -> Vec<String> {
        self.databases.read().keys().cloned().collect()
    }

    /// Tables of the current database.
    pub fn list_tables(&self) -> Result<Vec<String>> {
        let db = self.current_db()?;
        let tables = db.tables.read().keys().cloned().collect();
        Ok(tables)
    }

    fn current_db(&self) -> Result<Arc<Database>> {
        let name = self
            .current
            .read()
            .clone()
            .ok_or_else(|| HyperError::validation("no database selected"))?;
        self.database(&name)
    }

    fn database(&self, name: &str) -> Result<Arc<Database>> {
        self.databases
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| HyperError::not_found(format!("database '{}'", name)))
    }

    fn table_in(db: &Database, table: &str) -> Result<Arc<Table>> {
        db.tables
            .read()
            .get(table)
            .cloned()
            .ok_or_else(|| HyperError::not_found(format!("table '{}.{}'", db.name, table)))
    }

    // ------------------------------------------------------------------
    // Tables
    // ------------------------------------------------------------------

    /// Creates a table with the configured default partition count.
    pub fn create_table(&self, name: &str, schema: &[&str], partition_key: &str) -> Result<()> {
        self.create_table_with_partitions(name, schema, partition_key, self.config.default_partitions)
    }

    /// Creates a table with an explicit partition count, fixed for its life.
    pub fn create_table_with_partitions(
        &self,
        name: &str,
        schema: &[&str],
        partition_key: &str,
        partitions: usize,
    ) -> Result<()> {
        let db = self.current_db()?;
        let name = validate_name("table", name)?;
        let storage = PartitionedTable::new(partition_key.trim(), partitions)?;
        let schema: Vec<String> = schema
            .iter()
            .map(|f| f.trim())
            .filter(|f| !f.is_empty())
            .map(str::to_string)
            .collect();

        let state = TableState {
            storage,
            indexes: IndexManager::new(),
            schema,
            compressed: false,
        };
        let image = state.image();
        {
            let mut tables = db.tables.write();
            if tables.contains_key(&name) {
                return Err(HyperError::AlreadyExists(format!(
                    "table '{}.{}'",
                    db.name, name
                )));
            }
            tables.insert(
                name.clone(),
                Arc::new(Table {
                    qualified: qualified(&db.name, &name),
                    state: Mutex::new(state),
                }),
            );
        }
        db.stage(&self.writer, &name, Some(image))?;
        info!(database = %db.name, table = %name, partitions, "table created");
        Ok(())
    }

    /// Drops a table with its indexes, cached results and lock.
    pub fn drop_table(&self, name: &str) -> Result<()> {
        let db = self.current_db()?;
        let table = Self::table_in(&db, name)?;
        let _guard = self.locks.guard(&table.qualified)?;

        if db.tables.write().remove(name).is_none() {
            return Err(HyperError::not_found(format!("table '{}.{}'", db.name, name)));
        }
        self.cache.invalidate(&table.qualified);
        db.stage(&self.writer, name, None)?;
        info!(database = %db.name, table = %name, "table dropped");
        Ok(())
    }

    pub fn table_info(&self, table: &str) -> Result<TableInfo> {
        self.read_table(table, |db, name, state| {
            Ok(TableInfo {
                database: db.to_string(),
                name: name.to_string(),
                schema: state.schema.clone(),
                partition_key: state.storage.partition_key().to_string(),
                partition_count: state.storage.partition_count(),
                compressed: state.compressed,
                record_count: state.storage.len(),
                partition_sizes: state.storage.partition_sizes(),
                dimensions: state.indexes.dimensions(),
                composites: state.indexes.composites(),
            })
        })
    }

    // ------------------------------------------------------------------
    // Envelope
    // ------------------------------------------------------------------

    /// Resolves `table`, locks it and re-resolves it under the lock so a
    /// concurrent drop is observed as `NotFound`.
    fn lock_table(&self, table: &str) -> Result<(Arc<Database>, Arc<Table>, TableGuard<'_>)> {
        let db = self.current_db()?;
        let qualified_name = Self::table_in(&db, table)?.qualified.clone();
        let guard = self.locks.guard(&qualified_name)?;
        let db = self.database(&db.name)?;
        let resolved = Self::table_in(&db, table)?;
        Ok((db, resolved, guard))
    }

    fn read_table<T>(
        &self,
        table: &str,
        f: impl FnOnce(&str, &str, &TableState) -> Result<T>,
    ) -> Result<T> {
        let (db, t, _guard) = self.lock_table(table)?;
        let state = t.state.lock();
        f(&db.name, table, &*state)
    }

    /// Runs a mutation. The closure returns its output and whether anything
    /// changed; only changes invalidate the cache and schedule a snapshot.
    fn write_table<T>(
        &self,
        table: &str,
        f: impl FnOnce(&mut TableState) -> Result<(T, bool)>,
    ) -> Result<T> {
        let (db, t, _guard) = self.lock_table(table)?;
        let mut state = t.state.lock();
        let (out, changed) = f(&mut *state)?;
        if changed {
            self.cache.invalidate(&t.qualified);
            let image = state.image();
            drop(state);
            db.stage(&self.writer, table, Some(image))?;
        }
        Ok(out)
    }

    // ------------------------------------------------------------------
    // Records
    // ------------------------------------------------------------------

    /// Inserts `record`, overwriting any record with the same partition key.
    pub fn insert(&self, table: &str, record: Record) -> Result<()> {
        self.write_table(table, |state| {
            let record = record.normalized();
            let (key, previous) = state.storage.insert(record.clone())?;
            match previous {
                Some(old) => state.indexes.on_update(&key, &old, &record),
                None => state.indexes.on_insert(&key, &record),
            }
            Ok(((), true))
        })
    }

    /// Inserts every record under one lock and one snapshot.
    ///
    /// All partition keys are validated first; if any is invalid nothing is
    /// inserted.
    pub fn insert_batch(&self, table: &str, records: Vec<Record>) -> Result<usize> {
        self.write_table(table, |state| {
            let records: Vec<Record> = records.iter().map(Record::normalized).collect();
            for record in &records {
                state.storage.key_of(record)?;
            }
            let count = records.len();
            for record in records {
                let (key, previous) = state.storage.insert(record.clone())?;
                match previous {
                    Some(old) => state.indexes.on_update(&key, &old, &record),
                    None => state.indexes.on_insert(&key, &record),
                }
            }
            Ok((count, count > 0))
        })
    }

    fn check_patch(state: &TableState, patch: &Record) -> Result<()> {
        let key_field = state.storage.partition_key();
        if patch.contains(key_field) {
            return Err(HyperError::validation(format!(
                "cannot update partition key '{}'",
                key_field
            )));
        }
        Ok(())
    }

    fn apply_patch(state: &mut TableState, key: &str, patch: &Record) -> bool {
        let Some(record) = state.storage.get_mut(key) else {
            return false;
        };
        let old = record.clone();
        record.merge(patch);
        let new = record.clone();
        state.indexes.on_update(key, &old, &new);
        true
    }

    /// Applies `patch` to every record matching `predicate`. Returns the
    /// number of records updated.
    pub fn update(&self, table: &str, predicate: &Predicate, patch: Record) -> Result<usize> {
        self.write_table(table, |state| {
            let patch = patch.normalized();
            Self::check_patch(state, &patch)?;
            let matcher = predicate.compile()?;
            let keys = state.storage.matching_keys(&matcher);
            let updated = keys
                .iter()
                .filter(|key| Self::apply_patch(state, key, &patch))
                .count();
            Ok((updated, updated > 0))
        })
    }

    /// Applies each patch to the record with the given partition key.
    /// Missing keys are skipped. Returns the number of records updated.
    pub fn update_batch(&self, table: &str, updates: Vec<(String, Record)>) -> Result<usize> {
        self.write_table(table, |state| {
            let updates: Vec<(String, Record)> = updates
                .into_iter()
                .map(|(k, p)| (k, p.normalized()))
                .collect();
            for (_, patch) in &updates {
                Self::check_patch(state, patch)?;
            }
            let updated = updates
                .iter()
                .filter(|(key, patch)| Self::apply_patch(state, key, patch))
                .count();
            Ok((updated, updated > 0))
        })
    }

    /// Removes every record matching `predicate`. Returns the number removed.
    pub fn delete(&self, table: &str, predicate: &Predicate) -> Result<usize> {
        self.write_table(table, |state| {
            let matcher = predicate.compile()?;
            let keys = state.storage.matching_keys(&matcher);
            let mut removed = 0;
            for key in keys {
                if let Some(record) = state.storage.remove(&key) {
                    state.indexes.on_remove(&key, &record);
                    removed += 1;
                }
            }
            Ok((removed, removed > 0))
        })
    }

    /// Strips `field` from every record matching `predicate`. Returns the
    /// number of records that carried the field.
    pub fn delete_field(&self, table: &str, field: &str, predicate: &Predicate) -> Result<usize> {
        self.write_table(table, |state| {
            if field == state.storage.partition_key() {
                return Err(HyperError::validation(format!(
                    "cannot delete partition key '{}'",
                    field
                )));
            }
            let matcher = predicate.compile()?;
            let keys = state.storage.matching_keys(&matcher);
            let mut stripped = 0;
            for key in keys {
                let Some(record) = state.storage.get_mut(&key) else {
                    continue;
                };
                let old = record.clone();
                if record.remove(field).is_some() {
                    let new = record.clone();
                    state.indexes.on_update(&key, &old, &new);
                    stripped += 1;
                }
            }
            Ok((stripped, stripped > 0))
        })
    }

    /// Returns the records matching `predicate`, in partition then insertion
    /// order.
    ///
    /// Results are cached until the next write to the table, except for
    /// predicates with non-finite numeric operands. When the
    /// predicate constrains an indexed dimension (or an equality prefix of a
    /// composite index) the candidates come from the index.
    pub fn select(&self, table: &str, predicate: &Predicate) -> Result<Vec<Record>> {
        let (_db, t, _guard) = self.lock_table(table)?;
        let cache_key = predicate.canonical()?;
        if let Some(key) = &cache_key {
            if let Some(hit) = self.cache.get(&t.qualified, key) {
                return Ok(hit.as_ref().clone());
            }
        }

        let matcher = predicate.compile()?;
        let state = t.state.lock();
        let records = match state.indexes.candidates(predicate) {
            Some(keys) => state
                .records_for(keys)
                .into_iter()
                .filter(|r| matcher.matches(r))
                .collect(),
            None => state.storage.query(&matcher),
        };
        drop(state);

        let Some(key) = cache_key else {
            return Ok(records);
        };
        let records = Arc::new(records);
        self.cache.put(&t.qualified, &key, Arc::clone(&records));
        Ok(Arc::try_unwrap(records).unwrap_or_else(|shared| shared.as_ref().clone()))
    }

    /// Copies every record of `table` for work that should not hold the lock.
    pub fn table_snapshot(&self, table: &str) -> Result<Vec<Record>> {
        self.read_table(table, |_, _, state| {
            Ok(state.storage.iter().map(|(_, r)| r.clone()).collect())
        })
    }

    // ------------------------------------------------------------------
    // Indexes
    // ------------------------------------------------------------------

    /// Indexes `field`. Re-adding an existing dimension rebuilds it.
    pub fn add_dimension(&self, table: &str, field: &str) -> Result<()> {
        self.write_table(table, |state| {
            state.indexes.add_dimension(field, &state.storage)?;
            Ok(((), false))
        })?;
        info!(table, field, "dimension added");
        Ok(())
    }

    /// Drops the index on `field` and strips the field from every record.
    pub fn remove_dimension(&self, table: &str, field: &str) -> Result<()> {
        self.write_table(table, |state| {
            if field == state.storage.partition_key() {
                return Err(HyperError::validation(format!(
                    "cannot remove partition key '{}'",
                    field
                )));
            }
            state.indexes.remove_dimension(field, &mut state.storage)?;
            Ok(((), true))
        })?;
        info!(table, field, "dimension removed");
        Ok(())
    }

    pub fn create_composite_index(&self, table: &str, fields: &[&str]) -> Result<()> {
        self.write_table(table, |state| {
            state.indexes.create_composite(fields, &state.storage)?;
            Ok(((), false))
        })?;
        info!(table, fields = ?fields, "composite index created");
        Ok(())
    }

    /// Rebuilds every index of `table` from its records.
    pub fn rebuild_indexes(&self, table: &str) -> Result<()> {
        self.write_table(table, |state| {
            state.indexes.rebuild(&state.storage);
            Ok(((), false))
        })
    }

    pub fn index_lookup(&self, table: &str, field: &str, value: impl Into<Value>) -> Result<Vec<Record>> {
        let value = value.into();
        self.read_table(table, |_, _, state| {
            let keys = state.indexes.lookup(field, &value)?;
            Ok(state.records_for(keys))
        })
    }

    pub fn index_range(
        &self,
        table: &str,
        field: &str,
        lower: Bound<f64>,
        upper: Bound<f64>,
    ) -> Result<Vec<Record>> {
        self.read_table(table, |_, _, state| {
            let keys = state.indexes.lookup_range(field, lower, upper)?;
            Ok(state.records_for(keys))
        })
    }

    pub fn composite_lookup(&self, table: &str, fields: &[&str], prefix: &[Value]) -> Result<Vec<Record>> {
        self.read_table(table, |_, _, state| {
            let keys = state.indexes.composite_lookup(fields, prefix)?;
            Ok(state.records_for(keys))
        })
    }

    /// Records whose composite fields fall in the inclusive per-level ranges.
    pub fn composite_range(
        &self,
        table: &str,
        fields: &[&str],
        ranges: &[(f64, f64)],
    ) -> Result<Vec<Record>> {
        self.read_table(table, |_, _, state| {
            let keys = state.indexes.composite_range(fields, ranges)?;
            Ok(state.records_for(keys))
        })
    }

    // ------------------------------------------------------------------
    // Compression
    // ------------------------------------------------------------------

    /// Stores vector fields of `table` through the lossy projection from the
    /// next snapshot on. In-memory values stay exact until reloaded.
    pub fn enable_compression(&self, table: &str) -> Result<()> {
        self.set_compression(table, true)
    }

    pub fn disable_compression(&self, table: &str) -> Result<()> {
        self.set_compression(table, false)
    }

    fn set_compression(&self, table: &str, on: bool) -> Result<()> {
        self.write_table(table, |state| {
            let changed = state.compressed != on;
            state.compressed = on;
            Ok(((), changed))
        })?;
        info!(table, compressed = on, "table compression set");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Extensions
    // ------------------------------------------------------------------

    pub fn register_extension(&self, extension: Arc<dyn Extension>) -> Result<()> {
        self.extensions.register(extension)
    }

    pub fn execute_extension(&self, name: &str, args: &[String]) -> Result<ExtensionOutput> {
        let extension = self.extensions.get(name)?;
        extension.execute(self, args)
    }

    pub fn extension_names(&self) -> Vec<String> {
        self.extensions.names()
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Tables currently locked by in-flight operations.
    pub fn locked_tables(&self) -> Vec<String> {
        self.locks.locked_tables()
    }

    /// Blocks until every scheduled snapshot is on disk.
    pub fn flush(&self) -> Result<()> {
        self.writer.flush()
    }

    /// Flushes pending snapshots and stops the writer thread. Later
    /// mutations write their snapshots inline.
    pub fn close(&self) -> Result<()> {
        self.writer.close()?;
        info!(data_dir = %self.config.data_dir.display(), "catalog closed");
        Ok(())
    }
}

impl std::fmt::Debug for Catalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Catalog")
            .field("data_dir", &self.config.data_dir)
            .field("databases", &self.list_databases())
            .field("current", &self.current_database())
            .finish()
    }
}
