//! Integration test: inbound index construction.
//!
//! Validates that:
//! - Each object's inbound list is the deduplicated set of its referrers,
//!   pseudo referrers first
//! - The result does not depend on bucket or sub-bucket partitioning
//! - Stored keys address exactly the pseudo referrers
//! - Cancellation leaves neither logs nor the index file behind

use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use heapdex::cancel::{CancelFlag, ProgressListener, Silent};
use heapdex::index::{InboundKey, InboundReader, InboundWriter};
use heapdex::{IndexConfig, IndexError, One2ManyIndex, One2ManyObjectsIndex};
use proptest::prelude::*;
use tempfile::TempDir;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

type Edge = (usize, usize, bool);

/// Expected inbound list: distinct pseudo referrers ascending, then distinct
/// ordinary referrers not already listed.
fn expected(edges: &[Edge], object: usize) -> Vec<i32> {
    let pseudo: BTreeSet<usize> = edges
        .iter()
        .filter(|e| e.0 == object && e.2)
        .map(|e| e.1)
        .collect();
    let ordinary: BTreeSet<usize> = edges
        .iter()
        .filter(|e| e.0 == object && !e.2 && !pseudo.contains(&e.1))
        .map(|e| e.1)
        .collect();
    pseudo.into_iter().chain(ordinary).map(|r| r as i32).collect()
}

fn build(
    path: &Path,
    size: usize,
    edges: &[Edge],
    config: &IndexConfig,
) -> (InboundReader, HashMap<usize, InboundKey>) {
    let mut writer = InboundWriter::new(size, path, config).unwrap();
    for &(object, referrer, pseudo) in edges {
        writer.log(object, referrer, pseudo).unwrap();
    }
    let mut keys = HashMap::new();
    let reader = writer.flush(&Silent, &mut keys).unwrap();
    (reader, keys)
}

fn partitionings() -> Vec<IndexConfig> {
    vec![
        IndexConfig::default(),
        IndexConfig {
            inbound_bucket_ids: 7,
            inbound_sub_bucket_edges: 1_000_000,
            page_size_int: 5,
            ..IndexConfig::default()
        },
        IndexConfig {
            inbound_bucket_ids: 16,
            inbound_sub_bucket_edges: 6,
            page_size_int: 3,
            ..IndexConfig::default()
        },
        IndexConfig {
            inbound_bucket_ids: 1,
            inbound_sub_bucket_edges: 1,
            inbound_narrow_key_max: 4,
            header_narrow_max: 8,
            page_size_int: 2,
            ..IndexConfig::default()
        },
    ]
}

fn leftover_logs(dir: &Path) -> Vec<String> {
    std::fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|n| n.ends_with(".log"))
        .collect()
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[test]
fn test_duplicates_and_pseudo_overlap() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("heap.inbound.index");
    let edges = vec![
        (3, 1, false),
        (3, 1, false),
        (3, 2, true),
        (3, 2, false),
        (3, 0, true),
        (3, 0, true),
        (0, 3, false),
    ];
    let (reader, keys) = build(&path, 4, &edges, &IndexConfig::default());

    assert_eq!(reader.get(3).unwrap(), vec![0, 2, 1]);
    assert_eq!(reader.get(0).unwrap(), vec![3]);
    assert!(reader.get(1).unwrap().is_empty());
    assert_eq!(reader.get_objects_of(&keys[&3]).unwrap(), vec![0, 2]);
    assert!(!keys.contains_key(&0));
    assert!(leftover_logs(dir.path()).is_empty());
}

#[test]
fn test_giant_bucket_matches_default() {
    let size = 40;
    let edges: Vec<Edge> = (0..size * 10)
        .map(|i| ((i * 7) % size, (i * 13 + 5) % size, i % 11 == 0))
        .collect();
    let dir = TempDir::new().unwrap();

    let (plain, _) = build(&dir.path().join("a.index"), size, &edges, &IndexConfig::default());
    let split_cfg = IndexConfig {
        inbound_bucket_ids: 40,
        inbound_sub_bucket_edges: 25,
        ..IndexConfig::default()
    };
    let (split, _) = build(&dir.path().join("b.index"), size, &edges, &split_cfg);

    for object in 0..size {
        let want = expected(&edges, object);
        assert_eq!(plain.get(object).unwrap(), want);
        assert_eq!(split.get(object).unwrap(), want);
    }
    assert!(leftover_logs(dir.path()).is_empty());
}

#[test]
fn test_canceled_build_leaves_nothing() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("heap.inbound.index");
    let cfg = IndexConfig {
        inbound_bucket_ids: 2,
        inbound_sub_bucket_edges: 3,
        ..IndexConfig::default()
    };
    let mut writer = InboundWriter::new(10, &path, &cfg).unwrap();
    for i in 0..50 {
        writer.log(i % 10, (i * 3) % 10, i % 4 == 0).unwrap();
    }
    assert!(!leftover_logs(dir.path()).is_empty());

    /// Cancels after the first bucket completes.
    struct CancelAfterFirst(CancelFlag);

    impl ProgressListener for CancelAfterFirst {
        fn is_canceled(&self) -> bool {
            self.0.is_canceled()
        }

        fn worked(&self, _units: u64) {
            self.0.cancel();
        }
    }

    let listener = CancelAfterFirst(CancelFlag::new());
    let mut keys = HashMap::new();
    let err = writer.flush(&listener, &mut keys).unwrap_err();
    assert!(matches!(err, IndexError::Canceled));
    assert!(leftover_logs(dir.path()).is_empty());
    assert!(!path.exists());
}

#[test]
fn test_explicit_cancel_removes_logs() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("heap.inbound.index");
    let mut writer = InboundWriter::new(5, &path, &IndexConfig::default()).unwrap();
    writer.log(4, 0, false).unwrap();
    writer.cancel();
    assert!(leftover_logs(dir.path()).is_empty());
    assert!(!path.exists());
}

#[test]
fn test_keys_through_closure() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("heap.inbound.index");
    let mut writer = InboundWriter::new(3, &path, &IndexConfig::default()).unwrap();
    writer.log(1, 2, true).unwrap();
    writer.log(1, 0, false).unwrap();

    let mut seen = Vec::new();
    let mut sink = |object: usize, key: InboundKey| -> heapdex::Result<()> {
        seen.push((object, key));
        Ok(())
    };
    let reader = writer.flush(&Silent, &mut sink).unwrap();
    assert_eq!(seen, vec![(1, InboundKey::Narrow { offset: 0, len: 1 })]);
    assert_eq!(reader.get(1).unwrap(), vec![2, 0]);
}

// ---------------------------------------------------------------------------
// Properties
// ---------------------------------------------------------------------------

fn edges_strategy() -> impl Strategy<Value = (usize, Vec<Edge>)> {
    (1usize..50).prop_flat_map(|size| {
        let edge = (0..size, 0..size, proptest::bool::weighted(0.2));
        (Just(size), proptest::collection::vec(edge, 0..200))
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn inbound_partition_independent_prop((size, base) in edges_strategy()) {
        // inject duplicates of every third edge
        let mut edges = base.clone();
        edges.extend(base.iter().step_by(3).copied());

        for (n, cfg) in partitionings().iter().enumerate() {
            let dir = TempDir::new().unwrap();
            let path = dir.path().join(format!("inbound{}.index", n));
            let (reader, keys) = build(&path, size, &edges, cfg);

            for object in 0..size {
                let want = expected(&edges, object);
                let got = reader.get(object).unwrap();
                prop_assert_eq!(&got, &want);

                let pseudo: BTreeSet<usize> = edges
                    .iter()
                    .filter(|e| e.0 == object && e.2)
                    .map(|e| e.1)
                    .collect();
                match keys.get(&object) {
                    Some(key) => {
                        prop_assert_eq!(key.len(), pseudo.len());
                        prop_assert_eq!(
                            reader.get_objects_of(key).unwrap(),
                            want[..pseudo.len()].to_vec()
                        );
                    }
                    None => prop_assert!(pseudo.is_empty()),
                }
            }
            prop_assert!(leftover_logs(dir.path()).is_empty());
        }
    }
}
