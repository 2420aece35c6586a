//! Integration test: one-to-one paged indices written by the streamer and
//! read back through the page cache.
//!
//! Covers:
//! - The four-value two-page scenario, including close + delete
//! - Huge-index trailer encoding just above the plain-count threshold
//! - unload() idempotence
//! - Randomized int/long round-trips across page sizes

use heapdex::index::format::Trailer;
use heapdex::index::streamer::{write_int_index, write_long_index};
use heapdex::index::{IntIndexCollector, IntIndexReader, LongIndexReader, PagedReader};
use heapdex::{IndexConfig, IndexReader, One2OneIndex};
use proptest::prelude::*;
use tempfile::TempDir;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn config(page_size: usize) -> IndexConfig {
    IndexConfig {
        page_size_int: page_size,
        page_size_long: page_size,
        ..IndexConfig::default()
    }
}

fn raw_count_field(path: &std::path::Path) -> i32 {
    let bytes = std::fs::read(path).unwrap();
    i32::from_le_bytes(bytes[bytes.len() - 4..].try_into().unwrap())
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[test]
fn test_four_values_two_pages() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("o2c.index");
    let cfg = config(2);
    write_int_index(&path, &[10, 1_000_000, 3, 42], &cfg).unwrap();

    let reader = IntIndexReader::open(&path, &cfg).unwrap();
    assert_eq!(reader.size(), 4);
    assert_eq!(reader.trailer().page_count(), 2);
    assert_eq!(reader.get(2).unwrap(), 3);
    assert_eq!(reader.get_next(1, 2).unwrap(), vec![1_000_000, 3]);
    assert_eq!(reader.get_all(&[3, 0]).unwrap(), vec![42, 10]);
    assert!(reader.get(4).is_err());

    reader.close();
    reader.delete().unwrap();
    assert!(!path.exists());
}

#[test]
fn test_plain_count_at_threshold() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("plain.index");
    let cfg = IndexConfig {
        plain_size_max: 10,
        ..config(4)
    };
    let values: Vec<i32> = (0..10).map(|i| i * 7).collect();
    write_int_index(&path, &values, &cfg).unwrap();

    assert_eq!(raw_count_field(&path), 10);
    let reader = IntIndexReader::open(&path, &cfg).unwrap();
    assert_eq!(reader.size(), 10);
    assert_eq!(reader.get(9).unwrap(), 63);
}

#[test]
fn test_huge_encoding_above_threshold() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("huge.index");
    let cfg = IndexConfig {
        plain_size_max: 10,
        ..config(4)
    };
    let values: Vec<i64> = (0..11).map(|i| (i as i64) << 33).collect();
    write_long_index(&path, &values, &cfg).unwrap();

    // 11 values in pages of 4: last page holds 3
    assert_eq!(raw_count_field(&path), -3);
    let reader = LongIndexReader::open(&path, &cfg).unwrap();
    assert_eq!(reader.size(), 11);
    assert_eq!(reader.trailer().page_count(), 3);
    for (i, &v) in values.iter().enumerate() {
        assert_eq!(reader.get(i).unwrap(), v);
    }
}

#[test]
fn test_huge_encoding_full_last_page() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("huge_full.index");
    let cfg = IndexConfig {
        plain_size_max: 5,
        ..config(4)
    };
    let values: Vec<i32> = (0..8).collect();
    write_int_index(&path, &values, &cfg).unwrap();

    assert_eq!(raw_count_field(&path), -4);
    let reader = IntIndexReader::open(&path, &cfg).unwrap();
    assert_eq!(reader.size(), 8);
    assert_eq!(reader.get_next(0, 8).unwrap(), values);
}

#[test]
fn test_unload_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("unload.index");
    let cfg = config(3);
    let values: Vec<i32> = (0..50).map(|i| i * i - 100).collect();
    let reader = write_int_index(&path, &values, &cfg).unwrap();

    let before = reader.get_next(0, values.len()).unwrap();
    reader.unload();
    reader.unload();
    assert_eq!(reader.cached_pages(), 0);
    assert_eq!(reader.get_next(0, values.len()).unwrap(), before);
    assert_eq!(before, values);
}

#[test]
fn test_collector_written_through_trait() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("domIn.index");
    let cfg = config(8);
    let collector = IntIndexCollector::new(20, 19, &cfg);
    for i in 0..20 {
        collector.set(i, (19 - i) as i32).unwrap();
    }
    let reader: Box<dyn One2OneIndex> = Box::new(collector.write_to(&path, &cfg).unwrap());
    assert_eq!(reader.size(), 20);
    assert_eq!(reader.get(0).unwrap(), 19);
    assert_eq!(reader.get_next(17, 3).unwrap(), vec![2, 1, 0]);
}

#[test]
fn test_trailer_parse_rejects_garbage() {
    let data = vec![0xffu8; 40];
    assert!(Trailer::parse(&data, data.len()).is_err());
}

// ---------------------------------------------------------------------------
// Properties
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn int_roundtrip_prop(
        values in proptest::collection::vec(any::<i32>(), 0..300),
        page_size in 1usize..40,
    ) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("p.index");
        let cfg = config(page_size);
        write_int_index(&path, &values, &cfg).unwrap();

        let reader = PagedReader::<i32>::open(&path, &cfg).unwrap();
        prop_assert_eq!(reader.size(), values.len());
        for (i, &v) in values.iter().enumerate() {
            prop_assert_eq!(reader.get(i).unwrap(), v);
        }
        let all: Vec<i32> = reader.iter().collect::<heapdex::Result<_>>().unwrap();
        prop_assert_eq!(all, values);
    }

    #[test]
    fn long_roundtrip_prop(
        values in proptest::collection::vec(any::<i64>(), 1..300),
        page_size in 1usize..40,
        start in 0usize..300,
    ) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("p.index");
        let cfg = config(page_size);
        write_long_index(&path, &values, &cfg).unwrap();

        let reader = PagedReader::<i64>::open(&path, &cfg).unwrap();
        let start = start % values.len();
        let len = values.len() - start;
        prop_assert_eq!(reader.get_next(start, len).unwrap(), values[start..].to_vec());
    }
}
