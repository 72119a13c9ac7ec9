//! Concurrent access to a shared catalog.
//!
//! Operations on one table exclude each other without waiting: a loser gets
//! `Busy` and nothing partial is applied. Operations on different tables
//! proceed independently.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use hypercubedb::{record, retry_on_busy, Catalog, CatalogConfig, HyperError, Predicate, Record};
use tempfile::{tempdir, TempDir};

fn shared_catalog(tables: &[&str]) -> (TempDir, Arc<Catalog>) {
    let dir = tempdir().expect("failed to create temp dir");
    let catalog = Catalog::open(CatalogConfig {
        sync_on_write: false,
        ..CatalogConfig::in_dir(dir.path())
    })
    .expect("failed to open catalog");
    catalog.create_database("db").unwrap();
    catalog.use_database("db").unwrap();
    for table in tables {
        catalog.create_table(table, &["id", "writer"], "id").unwrap();
    }
    (dir, Arc::new(catalog))
}

fn batch(writer: usize, size: usize) -> Vec<Record> {
    (0..size)
        .map(|i| record! { "id" => format!("w{}-{}", writer, i), "writer" => writer as i64 })
        .collect()
}

#[test]
fn test_contending_writers_apply_whole_batches() {
    let (_dir, catalog) = shared_catalog(&["t"]);
    let threads = 8;
    let per_batch = 200;
    let applied = Arc::new(AtomicUsize::new(0));
    let busy = Arc::new(AtomicUsize::new(0));
    let barrier = Arc::new(Barrier::new(threads));

    let handles: Vec<_> = (0..threads)
        .map(|w| {
            let catalog = Arc::clone(&catalog);
            let applied = Arc::clone(&applied);
            let busy = Arc::clone(&busy);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                match catalog.insert_batch("t", batch(w, per_batch)) {
                    Ok(n) => {
                        assert_eq!(n, per_batch);
                        applied.fetch_add(1, Ordering::SeqCst);
                    }
                    Err(HyperError::Busy(table)) => {
                        assert_eq!(table, "db.t");
                        busy.fetch_add(1, Ordering::SeqCst);
                    }
                    Err(e) => panic!("unexpected error: {}", e),
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    let applied = applied.load(Ordering::SeqCst);
    assert!(applied >= 1);
    assert_eq!(applied + busy.load(Ordering::SeqCst), threads);

    // Every batch is either fully present or fully absent.
    let rows = catalog.table_snapshot("t").unwrap();
    assert_eq!(rows.len(), applied * per_batch);
    for w in 0..threads {
        let count = catalog
            .select("t", &Predicate::new().eq("writer", w as i64))
            .unwrap()
            .len();
        assert!(count == 0 || count == per_batch, "writer {} left {} rows", w, count);
    }
    assert!(catalog.locked_tables().is_empty());
    catalog.close().unwrap();
}

#[test]
fn test_retrying_writers_all_succeed() {
    let (_dir, catalog) = shared_catalog(&["t"]);
    let threads = 6;
    let handles: Vec<_> = (0..threads)
        .map(|w| {
            let catalog = Arc::clone(&catalog);
            thread::spawn(move || {
                for i in 0..25 {
                    let rec = record! { "id" => format!("w{}-{}", w, i), "writer" => w as i64 };
                    retry_on_busy(10_000, Duration::from_micros(50), || {
                        catalog.insert("t", rec.clone())
                    })
                    .expect("insert should eventually succeed");
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
    assert_eq!(catalog.table_info("t").unwrap().record_count, threads * 25);
    catalog.flush().unwrap();
}

#[test]
fn test_different_tables_are_independent() {
    let tables = ["t0", "t1", "t2", "t3"];
    let (_dir, catalog) = shared_catalog(&tables);

    let handles: Vec<_> = tables
        .iter()
        .enumerate()
        .map(|(w, table)| {
            let catalog = Arc::clone(&catalog);
            let table = table.to_string();
            thread::spawn(move || {
                // Sole writer of its table: never Busy.
                for i in 0..100 {
                    catalog
                        .insert(&table, record! { "id" => i, "writer" => w as i64 })
                        .unwrap();
                    catalog
                        .select(&table, &Predicate::new().eq("id", i))
                        .unwrap();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    for table in tables {
        assert_eq!(catalog.table_info(table).unwrap().record_count, 100);
    }
    catalog.close().unwrap();
}

#[test]
fn test_readers_and_writers_on_shared_table() {
    let (_dir, catalog) = shared_catalog(&["t"]);
    catalog.add_dimension("t", "writer").unwrap();
    let stop = Arc::new(AtomicUsize::new(0));

    let reader = {
        let catalog = Arc::clone(&catalog);
        let stop = Arc::clone(&stop);
        thread::spawn(move || {
            let mut seen = 0;
            while stop.load(Ordering::SeqCst) == 0 {
                match catalog.select("t", &Predicate::new().eq("writer", 1)) {
                    Ok(rows) => {
                        assert!(rows.len() >= seen, "rows never disappear");
                        seen = rows.len();
                    }
                    Err(e) => assert!(e.is_busy()),
                }
            }
        })
    };

    for i in 0..200 {
        retry_on_busy(10_000, Duration::from_micros(50), || {
            catalog.insert("t", record! { "id" => i, "writer" => 1 })
        })
        .unwrap();
    }
    stop.store(1, Ordering::SeqCst);
    reader.join().unwrap();

    assert_eq!(catalog.index_lookup("t", "writer", 1).unwrap().len(), 200);
}
