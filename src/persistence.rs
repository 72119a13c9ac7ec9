// Copyright (c) 2025 HypercubeDB Contributors
// Licensed under the GPL-3.0 License. See LICENSE file for details.

//! Snapshot persistence.
//!
//! Each database is stored as one file, `<data_dir>/<database>.db`, holding a
//! [`SnapshotDocument`] encoded with bincode inside an LZ4 frame (see
//! [`compression`](crate::compression)).
//!
//! Writes go through a temporary sibling `<database>.db.tmp` which is
//! fsynced, closed and then renamed over the target, so a crash at any point
//! leaves either the previous snapshot or the new one on disk, never a torn
//! file. Leftover temporary files are ignored when loading.
//!
//! Snapshot jobs run on a [`SnapshotWriter`], which either writes inline or
//! hands jobs to a dedicated thread.

use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::catalog::validate_name;
use crate::compression::{decode_frame, encode_frame};
use crate::error::{HyperError, Result};
use crate::partition::PartitionedTable;
use crate::projection::{project, unproject, ProjectedVector};
use crate::types::{Record, Value};

/// Snapshot file extension.
pub const SNAPSHOT_EXT: &str = "db";

/// On-disk form of a field value.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum EncodedValue {
    /// Stored verbatim.
    Plain(Value),
    /// Vector stored through the lossy spherical projection.
    Projected(ProjectedVector),
}

/// On-disk form of a record.
pub type EncodedRecord = BTreeMap<String, EncodedValue>;

/// Persisted state of one table.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TableImage {
    pub partition_key: String,
    pub partition_count: usize,
    pub schema: Vec<String>,
    pub compressed: bool,
    /// One inner sequence per partition, in insertion order.
    pub partitions: Vec<Vec<(String, EncodedRecord)>>,
}

/// A table restored from a [`TableImage`].
#[derive(Debug)]
pub struct RestoredTable {
    pub storage: PartitionedTable,
    pub schema: Vec<String>,
    pub compressed: bool,
}

fn encode_record(record: &Record, compressed: bool) -> EncodedRecord {
    record
        .iter()
        .map(|(field, value)| {
            let encoded = match value {
                Value::Vector(v) if compressed => EncodedValue::Projected(project(v)),
                other => EncodedValue::Plain(other.clone()),
            };
            (field.clone(), encoded)
        })
        .collect()
}

fn decode_record(encoded: EncodedRecord) -> Record {
    encoded
        .into_iter()
        .map(|(field, value)| {
            let value = match value {
                EncodedValue::Plain(v) => v,
                EncodedValue::Projected(p) => Value::Vector(unproject(&p)),
            };
            (field, value)
        })
        .collect()
}

impl TableImage {
    /// Captures the current contents of `storage`.
    pub fn capture(storage: &PartitionedTable, schema: &[String], compressed: bool) -> Self {
        let partitions = storage
            .partitions()
            .iter()
            .map(|p| {
                p.iter()
                    .map(|(key, record)| (key.to_string(), encode_record(record, compressed)))
                    .collect()
            })
            .collect();
        Self {
            partition_key: storage.partition_key().to_string(),
            partition_count: storage.partition_count(),
            schema: schema.to_vec(),
            compressed,
            partitions,
        }
    }

    /// Rebuilds partitioned storage from the image.
    pub fn restore(self) -> Result<RestoredTable> {
        let partitions = self
            .partitions
            .into_iter()
            .map(|p| {
                p.into_iter()
                    .map(|(key, rec)| (key, decode_record(rec)))
                    .collect()
            })
            .collect();
        let storage =
            PartitionedTable::from_partitions(self.partition_key, self.partition_count, partitions)?;
        Ok(RestoredTable {
            storage,
            schema: self.schema,
            compressed: self.compressed,
        })
    }

    pub fn record_count(&self) -> usize {
        self.partitions.iter().map(Vec::len).sum()
    }
}

/// Everything persisted for one database.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct SnapshotDocument {
    pub tables: BTreeMap<String, TableImage>,
}

/// Borrowed twin of [`SnapshotDocument`]; serializes to identical bytes.
#[derive(Serialize)]
struct SnapshotDocumentRef<'a> {
    tables: BTreeMap<&'a str, &'a TableImage>,
}

impl SnapshotDocument {
    pub fn from_bytes(frame: &[u8]) -> Result<Self> {
        let body = decode_frame(frame)?;
        Ok(bincode::deserialize(&body)?)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let body = bincode::serialize(self)?;
        Ok(encode_frame(&body))
    }
}

fn encode_tables(tables: &[(String, Arc<TableImage>)]) -> Result<Vec<u8>> {
    let doc = SnapshotDocumentRef {
        tables: tables
            .iter()
            .map(|(name, image)| (name.as_str(), image.as_ref()))
            .collect(),
    };
    let body = bincode::serialize(&doc)?;
    Ok(encode_frame(&body))
}

/// Path of the snapshot file for `database`.
pub fn snapshot_path(dir: &Path, database: &str) -> PathBuf {
    dir.join(format!("{}.{}", database, SNAPSHOT_EXT))
}

/// Path of the temporary file used while replacing the snapshot.
pub fn temp_path(dir: &Path, database: &str) -> PathBuf {
    dir.join(format!("{}.{}.tmp", database, SNAPSHOT_EXT))
}

/// Writes `bytes` to `target` through `tmp` and an atomic rename.
///
/// On failure the temporary file is removed and `target` is untouched.
pub fn write_atomic(target: &Path, tmp: &Path, bytes: &[u8], sync: bool) -> Result<()> {
    let result = (|| -> io::Result<()> {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(tmp)?;
        file.write_all(bytes)?;
        file.flush()?;
        if sync {
            file.sync_all()?;
        }
        // Close before rename.
        drop(file);
        atomic_replace(tmp, target)
    })();

    if let Err(e) = result {
        let _ = fs::remove_file(tmp);
        return Err(HyperError::Io(e));
    }
    Ok(())
}

/// Atomically replaces `dst` with `src`.
/// On Unix, this uses rename() which is atomic.
/// On Windows, this uses a rename with retry strategy.
#[cfg(unix)]
fn atomic_replace(src: &Path, dst: &Path) -> io::Result<()> {
    fs::rename(src, dst)
}

#[cfg(windows)]
fn atomic_replace(src: &Path, dst: &Path) -> io::Result<()> {
    // rename fails on Windows while the destination exists or is open
    const MAX_RETRIES: u32 = 3;

    for attempt in 0..MAX_RETRIES {
        match fs::rename(src, dst) {
            Ok(()) => return Ok(()),
            Err(_) if attempt < MAX_RETRIES - 1 => {
                let _ = fs::remove_file(dst);
                thread::sleep(std::time::Duration::from_millis(10));
            }
            Err(e) => return Err(e),
        }
    }

    fs::rename(src, dst)
}

/// Encodes and atomically writes one database snapshot.
pub fn save_database(
    dir: &Path,
    database: &str,
    tables: &[(String, Arc<TableImage>)],
    sync: bool,
) -> Result<()> {
    let bytes = encode_tables(tables)?;
    write_atomic(
        &snapshot_path(dir, database),
        &temp_path(dir, database),
        &bytes,
        sync,
    )?;
    debug!(database, tables = tables.len(), bytes = bytes.len(), "snapshot written");
    Ok(())
}

/// Deletes the snapshot and any leftover temporary file of `database`.
pub fn purge_database(dir: &Path, database: &str) -> Result<()> {
    for path in [snapshot_path(dir, database), temp_path(dir, database)] {
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(HyperError::Io(e)),
        }
    }
    Ok(())
}

/// Reads one snapshot file.
pub fn load_file(path: &Path) -> Result<SnapshotDocument> {
    let bytes = fs::read(path)?;
    SnapshotDocument::from_bytes(&bytes)
}

/// Result of scanning a data directory.
#[derive(Debug, Default)]
pub struct LoadOutcome {
    /// Successfully decoded databases, sorted by name.
    pub loaded: Vec<(String, SnapshotDocument)>,
    /// Files that could not be read or decoded.
    pub skipped: Vec<(PathBuf, HyperError)>,
}

/// Reads every `*.db` file in `dir`.
///
/// A file that fails to read or decode, or whose stem is not a valid
/// database name, is recorded in [`LoadOutcome::skipped`] and left on disk;
/// the others still load.
pub fn load_dir(dir: &Path) -> Result<LoadOutcome> {
    let mut outcome = LoadOutcome::default();
    if !dir.exists() {
        return Ok(outcome);
    }

    let mut paths: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && p.extension().map_or(false, |ext| ext == SNAPSHOT_EXT))
        .collect();
    paths.sort();

    for path in paths {
        let Some(name) = path.file_stem().and_then(|s| s.to_str()).map(str::to_string) else {
            continue;
        };
        if let Err(e) = check_database_name(&name) {
            warn!(path = %path.display(), error = %e, "skipping snapshot with invalid database name");
            outcome.skipped.push((path, e));
            continue;
        }
        match load_file(&path) {
            Ok(doc) => {
                info!(database = %name, tables = doc.tables.len(), "snapshot loaded");
                outcome.loaded.push((name, doc));
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "skipping unreadable snapshot");
                outcome.skipped.push((path, e));
            }
        }
    }
    Ok(outcome)
}

/// A file stem must be usable verbatim as a database name.
fn check_database_name(stem: &str) -> Result<()> {
    let name = validate_name("database", stem)?;
    if name != stem {
        return Err(HyperError::validation(format!(
            "database name '{}' has surrounding whitespace",
            stem
        )));
    }
    Ok(())
}

enum Job {
    Save {
        database: String,
        tables: Vec<(String, Arc<TableImage>)>,
    },
    Purge {
        database: String,
    },
    Flush(Sender<()>),
}

impl Job {
    fn database(&self) -> Option<&str> {
        match self {
            Job::Save { database, .. } | Job::Purge { database } => Some(database.as_str()),
            Job::Flush(_) => None,
        }
    }
}

/// Executes snapshot jobs, inline or on a background thread.
///
/// Background mode coalesces queued saves of the same database: when several
/// are waiting, only the newest is written. Jobs are otherwise applied in
/// submission order, so a purge never overtakes an earlier save.
pub struct SnapshotWriter {
    dir: PathBuf,
    sync: bool,
    sender: Mutex<Option<Sender<Job>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl SnapshotWriter {
    /// Creates the data directory and, when `background` is set, starts the
    /// writer thread.
    pub fn start(dir: impl Into<PathBuf>, sync: bool, background: bool) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;

        let (sender, handle) = if background {
            let (tx, rx) = mpsc::channel();
            let thread_dir = dir.clone();
            let handle = thread::Builder::new()
                .name("hypercubedb-writer".to_string())
                .spawn(move || Self::writer_loop(thread_dir, sync, rx))?;
            (Some(tx), Some(handle))
        } else {
            (None, None)
        };

        Ok(Self {
            dir,
            sync,
            sender: Mutex::new(sender),
            handle: Mutex::new(handle),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn is_background(&self) -> bool {
        self.sender.lock().is_some()
    }

    /// Schedules a snapshot of `database`. Failures are logged.
    pub fn save(&self, database: &str, tables: Vec<(String, Arc<TableImage>)>) {
        let job = Job::Save {
            database: database.to_string(),
            tables,
        };
        self.submit(job);
    }

    /// Schedules removal of the on-disk state of `database`.
    pub fn purge(&self, database: &str) {
        self.submit(Job::Purge {
            database: database.to_string(),
        });
    }

    fn submit(&self, job: Job) {
        let pending = {
            let sender = self.sender.lock();
            match sender.as_ref() {
                Some(tx) => match tx.send(job) {
                    Ok(()) => None,
                    Err(mpsc::SendError(job)) => Some(job),
                },
                None => Some(job),
            }
        };
        // Inline mode, or the writer thread is gone.
        if let Some(job) = pending {
            Self::run(&self.dir, self.sync, job);
        }
    }

    /// Blocks until every job submitted so far has been applied.
    pub fn flush(&self) -> Result<()> {
        let (tx, rx) = mpsc::channel();
        {
            let sender = self.sender.lock();
            let Some(jobs) = sender.as_ref() else {
                return Ok(());
            };
            if jobs.send(Job::Flush(tx)).is_err() {
                return Err(writer_gone());
            }
        }
        rx.recv().map_err(|_| writer_gone())
    }

    /// Drains pending jobs and stops the writer thread.
    pub fn close(&self) -> Result<()> {
        // Dropping the sender lets the thread drain and exit.
        drop(self.sender.lock().take());
        if let Some(handle) = self.handle.lock().take() {
            handle.join().map_err(|_| writer_gone())?;
            debug!(dir = %self.dir.display(), "snapshot writer stopped");
        }
        Ok(())
    }

    fn writer_loop(dir: PathBuf, sync: bool, rx: Receiver<Job>) {
        while let Ok(first) = rx.recv() {
            let mut batch = vec![first];
            batch.extend(rx.try_iter());

            let mut jobs: Vec<Option<Job>> = batch.into_iter().map(Some).collect();
            for i in 0..jobs.len() {
                if Self::superseded(&jobs, i) {
                    debug!("coalesced queued snapshot");
                    jobs[i] = None;
                    continue;
                }
                if let Some(job) = jobs[i].take() {
                    Self::run(&dir, sync, job);
                }
            }
        }
    }

    /// A save is superseded by a later job on the same database queued
    /// before the next flush barrier.
    fn superseded(jobs: &[Option<Job>], i: usize) -> bool {
        let Some(Job::Save { database, .. }) = jobs[i].as_ref() else {
            return false;
        };
        for later in jobs[i + 1..].iter().flatten() {
            match later {
                Job::Flush(_) => return false,
                other if other.database() == Some(database.as_str()) => return true,
                _ => {}
            }
        }
        false
    }

    fn run(dir: &Path, sync: bool, job: Job) {
        match job {
            Job::Save { database, tables } => {
                if let Err(e) = save_database(dir, &database, &tables, sync) {
                    error!(database = %database, error = %e, "snapshot write failed");
                }
            }
            Job::Purge { database } => match purge_database(dir, &database) {
                Ok(()) => debug!(database = %database, "snapshot purged"),
                Err(e) => error!(database = %database, error = %e, "snapshot purge failed"),
            },
            Job::Flush(reply) => {
                let _ = reply.send(());
            }
        }
    }
}

impl Drop for SnapshotWriter {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            error!(error = %e, "snapshot writer did not shut down cleanly");
        }
    }
}

fn writer_gone() -> HyperError {
    HyperError::Io(io::Error::new(
        io::ErrorKind::Other,
        "snapshot writer thread stopped",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record;
    use tempfile::tempdir;

    fn sample_table(compressed: bool) -> TableImage {
        let mut storage = PartitionedTable::new("id", 3).unwrap();
        for i in 0..10 {
            storage
                .insert(record! { "id" => i, "name" => format!("n{}", i), "v" => vec![1.0, 2.0, 2.0] })
                .unwrap();
        }
        TableImage::capture(&storage, &["id".into(), "name".into()], compressed)
    }

    #[test]
    fn test_capture_restore_plain() {
        let image = sample_table(false);
        assert_eq!(image.record_count(), 10);
        let restored = image.clone().restore().unwrap();
        assert_eq!(restored.storage.len(), 10);
        assert_eq!(
            restored.storage.get("3").unwrap().get("v"),
            Some(&Value::Vector(vec![1.0, 2.0, 2.0]))
        );
        assert!(!restored.compressed);
    }

    #[test]
    fn test_compressed_vectors_are_projected() {
        let image = sample_table(true);
        let (_, rec) = image.partitions.iter().flatten().next().unwrap();
        assert!(matches!(rec.get("v"), Some(EncodedValue::Projected(_))));
        assert!(matches!(rec.get("name"), Some(EncodedValue::Plain(_))));
    }

    #[test]
    fn test_document_bytes_match_borrowed_encoding() {
        let image = Arc::new(sample_table(false));
        let mut doc = SnapshotDocument::default();
        doc.tables.insert("items".into(), (*image).clone());
        let owned = doc.to_bytes().unwrap();
        let borrowed = encode_tables(&[("items".into(), image)]).unwrap();
        assert_eq!(owned, borrowed);
        assert_eq!(SnapshotDocument::from_bytes(&owned).unwrap(), doc);
    }

    #[test]
    fn test_write_atomic_replaces() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("a.db");
        let tmp = dir.path().join("a.db.tmp");
        write_atomic(&target, &tmp, b"one", true).unwrap();
        write_atomic(&target, &tmp, b"two", true).unwrap();
        assert_eq!(fs::read(&target).unwrap(), b"two");
        assert!(!tmp.exists());
    }

    #[test]
    fn test_load_dir_skips_corrupt_and_temp_files() {
        let dir = tempdir().unwrap();
        let tables = vec![("items".to_string(), Arc::new(sample_table(false)))];
        save_database(dir.path(), "good", &tables, true).unwrap();
        fs::write(dir.path().join("bad.db"), b"not a snapshot").unwrap();
        fs::write(dir.path().join("stale.db.tmp"), b"partial").unwrap();

        let outcome = load_dir(dir.path()).unwrap();
        assert_eq!(outcome.loaded.len(), 1);
        assert_eq!(outcome.loaded[0].0, "good");
        assert_eq!(outcome.skipped.len(), 1);
        assert!(dir.path().join("bad.db").exists());
    }

    #[test]
    fn test_load_dir_skips_invalid_database_names() {
        let dir = tempdir().unwrap();
        let tables = vec![("items".to_string(), Arc::new(sample_table(false)))];
        save_database(dir.path(), "good", &tables, true).unwrap();
        let bytes = fs::read(snapshot_path(dir.path(), "good")).unwrap();
        for stray in ["a.b.db", " padded.db", "sp ace.db"] {
            fs::write(dir.path().join(stray), &bytes).unwrap();
        }

        let outcome = load_dir(dir.path()).unwrap();
        let loaded: Vec<&str> = outcome.loaded.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(loaded, vec!["good"]);
        assert_eq!(outcome.skipped.len(), 3);
        assert!(outcome
            .skipped
            .iter()
            .all(|(_, e)| matches!(e, HyperError::Validation(_))));
        assert!(dir.path().join("a.b.db").exists());
    }

    #[test]
    fn test_purge_removes_both_files() {
        let dir = tempdir().unwrap();
        fs::write(snapshot_path(dir.path(), "x"), b"a").unwrap();
        fs::write(temp_path(dir.path(), "x"), b"b").unwrap();
        purge_database(dir.path(), "x").unwrap();
        purge_database(dir.path(), "x").unwrap();
        assert!(!snapshot_path(dir.path(), "x").exists());
        assert!(!temp_path(dir.path(), "x").exists());
    }

    #[test]
    fn test_background_writer_flush_and_order() {
        let dir = tempdir().unwrap();
        let writer = SnapshotWriter::start(dir.path(), false, true).unwrap();
        assert!(writer.is_background());

        let tables = vec![("items".to_string(), Arc::new(sample_table(false)))];
        for _ in 0..5 {
            writer.save("shop", tables.clone());
        }
        writer.flush().unwrap();
        assert!(snapshot_path(dir.path(), "shop").exists());

        writer.purge("shop");
        writer.save("other", tables);
        writer.close().unwrap();
        assert!(!snapshot_path(dir.path(), "shop").exists());
        assert!(snapshot_path(dir.path(), "other").exists());
    }

    #[test]
    fn test_inline_writer() {
        let dir = tempdir().unwrap();
        let writer = SnapshotWriter::start(dir.path().join("nested"), true, false).unwrap();
        assert!(!writer.is_background());
        writer.save("db", vec![]);
        assert!(snapshot_path(&dir.path().join("nested"), "db").exists());
        writer.flush().unwrap();
    }
}
