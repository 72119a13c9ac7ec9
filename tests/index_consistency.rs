//! Property-based tests for index maintenance.
//!
//! After any sequence of inserts, updates and deletes, every dimension index
//! and composite index must agree with a full scan of the table.

use std::collections::BTreeSet;

use hypercubedb::partition::partition_hash;
use hypercubedb::{record, Catalog, CatalogConfig, Predicate, Record, Value};
use proptest::prelude::*;
use tempfile::tempdir;

#[derive(Debug, Clone)]
enum Op {
    Insert { id: u8, color: u8, size: u8 },
    Recolor { color: u8, to: u8 },
    Delete { id: u8 },
    DropSize { id: u8 },
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        6 => (0..20u8, 0..4u8, 0..5u8).prop_map(|(id, color, size)| Op::Insert { id, color, size }),
        2 => (0..4u8, 0..4u8).prop_map(|(color, to)| Op::Recolor { color, to }),
        2 => (0..20u8).prop_map(|id| Op::Delete { id }),
        1 => (0..20u8).prop_map(|id| Op::DropSize { id }),
    ]
}

fn color(c: u8) -> String {
    format!("c{}", c)
}

fn key_set(records: &[Record]) -> BTreeSet<String> {
    records
        .iter()
        .filter_map(|r| r.get("id").map(|v| v.to_string()))
        .collect()
}

fn apply(catalog: &Catalog, op: &Op) {
    match op {
        Op::Insert { id, color: c, size } => {
            catalog
                .insert(
                    "t",
                    record! { "id" => i32::from(*id), "color" => color(*c), "size" => i32::from(*size) },
                )
                .unwrap();
        }
        Op::Recolor { color: c, to } => {
            catalog
                .update("t", &Predicate::new().eq("color", color(*c)), record! { "color" => color(*to) })
                .unwrap();
        }
        Op::Delete { id } => {
            catalog
                .delete("t", &Predicate::new().eq("id", i32::from(*id)))
                .unwrap();
        }
        Op::DropSize { id } => {
            catalog
                .delete_field("t", "size", &Predicate::new().eq("id", i32::from(*id)))
                .unwrap();
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Index lookups return exactly the records a scan finds.
    #[test]
    fn prop_indexes_match_scan(ops in prop::collection::vec(arb_op(), 1..60)) {
        let dir = tempdir().expect("failed to create temp dir");
        let catalog = Catalog::open(CatalogConfig {
            background_writes: false,
            sync_on_write: false,
            ..CatalogConfig::in_dir(dir.path())
        }).expect("failed to open catalog");
        catalog.create_database("db").unwrap();
        catalog.use_database("db").unwrap();
        catalog.create_table_with_partitions("t", &["id", "color", "size"], "id", 3).unwrap();
        catalog.add_dimension("t", "color").unwrap();
        catalog.add_dimension("t", "size").unwrap();
        catalog.create_composite_index("t", &["color", "size"]).unwrap();

        for op in &ops {
            apply(&catalog, op);
        }

        let all = catalog.table_snapshot("t").unwrap();
        for c in 0..4u8 {
            let expected: BTreeSet<String> = all
                .iter()
                .filter(|r| r.get("color") == Some(&Value::from(color(c))))
                .filter_map(|r| r.get("id").map(|v| v.to_string()))
                .collect();
            let indexed = key_set(&catalog.index_lookup("t", "color", color(c)).unwrap());
            prop_assert_eq!(&indexed, &expected);

            for s in 0..5i32 {
                let expected: BTreeSet<String> = all
                    .iter()
                    .filter(|r| r.get("color") == Some(&Value::from(color(c))))
                    .filter(|r| r.get("size") == Some(&Value::from(s)))
                    .filter_map(|r| r.get("id").map(|v| v.to_string()))
                    .collect();
                let composite = key_set(
                    &catalog
                        .composite_lookup("t", &["color", "size"], &[Value::from(color(c)), Value::from(s)])
                        .unwrap(),
                );
                prop_assert_eq!(composite, expected);
            }
        }

        let sized: BTreeSet<String> = all
            .iter()
            .filter(|r| r.contains("size"))
            .filter_map(|r| r.get("id").map(|v| v.to_string()))
            .collect();
        let by_range = key_set(
            &catalog
                .index_range("t", "size", std::ops::Bound::Unbounded, std::ops::Bound::Unbounded)
                .unwrap(),
        );
        prop_assert_eq!(by_range, sized);
    }

    /// Partition assignment depends only on the key.
    #[test]
    fn prop_partition_hash_is_deterministic(key in ".{0,40}", n in 1usize..64) {
        let a = partition_hash(&key) as usize % n;
        let b = partition_hash(&key.clone()) as usize % n;
        prop_assert_eq!(a, b);
        prop_assert!(a < n);
    }

    /// Re-inserting a key never creates a second record.
    #[test]
    fn prop_partition_key_is_unique(writes in prop::collection::vec((0..10u8, any::<i32>()), 1..40)) {
        let dir = tempdir().expect("failed to create temp dir");
        let catalog = Catalog::open(CatalogConfig {
            background_writes: false,
            sync_on_write: false,
            ..CatalogConfig::in_dir(dir.path())
        }).expect("failed to open catalog");
        catalog.create_database("db").unwrap();
        catalog.use_database("db").unwrap();
        catalog.create_table("t", &[], "id").unwrap();

        let mut last = std::collections::BTreeMap::new();
        for (id, v) in &writes {
            catalog.insert("t", record! { "id" => format!("k{}", id), "v" => *v }).unwrap();
            last.insert(format!("k{}", id), *v);
        }

        let all = catalog.table_snapshot("t").unwrap();
        prop_assert_eq!(all.len(), last.len());
        for (id, v) in last {
            let rows = catalog.select("t", &Predicate::new().eq("id", id.as_str())).unwrap();
            prop_assert_eq!(rows.len(), 1);
            prop_assert_eq!(rows[0].get("v"), Some(&Value::from(v)));
        }
    }
}

#[test]
fn test_known_hash_values() {
    assert_eq!(partition_hash("id"), 3355);
    assert_eq!(partition_hash("hello"), 99162322);
}
