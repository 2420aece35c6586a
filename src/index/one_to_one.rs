//! One-to-one readers with value semantics on top of a paged index.

use std::path::Path;

use crate::config::IndexConfig;
use crate::error::Result;
use crate::index::reader::{PagedReader, ReverseProbeCache};
use crate::index::{IndexReader, One2LongIndex, One2OneIndex, One2SizeIndex};

// ── Size compression ────────────────────────────────────────────────

/// Sizes above this are stored in units of 8 bytes.
const SIZE_EXACT_MAX: i64 = i32::MAX as i64;
/// Largest size representable; larger values saturate to it.
const SIZE_MAX: i64 = 0x4_0000_0000;
/// Compressed marker of `SIZE_MAX`.
const SIZE_SATURATED: i32 = 0xf000_0000u32 as i32;

/// Fold a size into 32 bits.
///
/// `0..=i32::MAX` is stored as is; `(i32::MAX, 16 GiB]` is stored in units
/// of 8 bytes in the negative range below `-1`; negatives become `-1` and
/// anything larger saturates.
pub fn compress_size(size: i64) -> i32 {
    if size < 0 {
        -1
    } else if size <= SIZE_EXACT_MAX {
        size as i32
    } else if size <= SIZE_MAX {
        ((size / 8) as i32).wrapping_add(0x7000_0000)
    } else {
        SIZE_SATURATED
    }
}

/// Inverse of [`compress_size`]; exact below 2 GiB, 8-byte granular above.
pub fn expand_size(stored: i32) -> i64 {
    if stored >= -1 {
        stored as i64
    } else if stored < SIZE_SATURATED {
        (stored as i64 & 0x7fff_ffff) * 8 + 0x8000_0000
    } else {
        SIZE_MAX
    }
}

// ── SizeIndexReader ─────────────────────────────────────────────────

#[derive(Debug)]
pub struct SizeIndexReader {
    inner: PagedReader<i32>,
}

impl SizeIndexReader {
    pub fn new(inner: PagedReader<i32>) -> Self {
        Self { inner }
    }

    pub fn open(path: &Path, config: &IndexConfig) -> Result<Self> {
        Ok(Self::new(PagedReader::open(path, config)?))
    }

    pub fn inner(&self) -> &PagedReader<i32> {
        &self.inner
    }
}

impl IndexReader for SizeIndexReader {
    fn size(&self) -> usize {
        self.inner.size()
    }

    fn unload(&self) {
        self.inner.unload()
    }

    fn close(&self) {
        self.inner.close()
    }

    fn delete(&self) -> Result<()> {
        self.inner.delete()
    }
}

/// Raw access yields the compressed form.
impl One2OneIndex for SizeIndexReader {
    fn get(&self, index: usize) -> Result<i32> {
        self.inner.get(index)
    }

    fn get_all(&self, indices: &[usize]) -> Result<Vec<i32>> {
        self.inner.get_all(indices)
    }

    fn get_next(&self, index: usize, len: usize) -> Result<Vec<i32>> {
        self.inner.get_next(index, len)
    }
}

impl One2SizeIndex for SizeIndexReader {
    fn get_size(&self, index: usize) -> Result<i64> {
        Ok(expand_size(self.inner.get(index)?))
    }
}

// ── LongIndex ───────────────────────────────────────────────────────

/// Long index with memoized binary-search probes for `reverse`.
#[derive(Debug)]
pub struct LongIndex {
    inner: PagedReader<i64>,
    probes: ReverseProbeCache,
}

impl LongIndex {
    pub fn new(inner: PagedReader<i64>) -> Self {
        Self {
            inner,
            probes: ReverseProbeCache::default(),
        }
    }

    pub fn open(path: &Path, config: &IndexConfig) -> Result<Self> {
        Ok(Self::new(PagedReader::open(path, config)?))
    }

    pub fn inner(&self) -> &PagedReader<i64> {
        &self.inner
    }
}

impl IndexReader for LongIndex {
    fn size(&self) -> usize {
        self.inner.size()
    }

    fn unload(&self) {
        self.inner.unload()
    }

    fn close(&self) {
        self.probes.clear();
        self.inner.close()
    }

    fn delete(&self) -> Result<()> {
        self.probes.clear();
        self.inner.delete()
    }
}

impl One2LongIndex for LongIndex {
    fn get(&self, index: usize) -> Result<i64> {
        self.inner.get(index)
    }

    fn get_next(&self, index: usize, len: usize) -> Result<Vec<i64>> {
        self.inner.get_next(index, len)
    }

    fn reverse(&self, value: i64) -> Result<i64> {
        self.inner.reverse_with(value, Some(&self.probes))
    }
}

// ── Tests ───────────────────────────────────────────────────────────
