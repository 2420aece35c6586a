//! In-memory builders used while a dump is being parsed.
//!
//! The compressed collectors accept concurrent `set` calls from parser
//! threads: pages are created on first touch, and writes to one page are
//! serialized on that page's mutex. `write_to` re-compresses every page with
//! its minimal width through a streamer.

use std::path::Path;
use std::sync::OnceLock;

use parking_lot::Mutex;
use rayon::slice::ParallelSliceMut;

use crate::codec::{CompressedPage, PackedValue, PageElement};
use crate::config::IndexConfig;
use crate::error::{IndexError, Result};
use crate::index::one_to_one::{compress_size, expand_size, LongIndex, SizeIndexReader};
use crate::index::reader::PagedReader;
use crate::index::streamer::PagedStreamer;
use crate::index::{IndexReader, One2LongIndex};

// ── Concurrent compressed collectors ────────────────────────────────

pub struct PagedCollector<T: PackedValue> {
    size: usize,
    page_size: usize,
    width: u32,
    pages: Vec<OnceLock<Mutex<CompressedPage<T>>>>,
}

pub type IntIndexCollector = PagedCollector<i32>;
pub type LongIndexCollector = PagedCollector<i64>;

impl<T: PackedValue> PagedCollector<T> {
    /// Collector for `size` values in `0..=max_value`; unset entries read 0.
    pub fn with_page_size(size: usize, max_value: T, page_size: usize) -> Self {
        let page_size = page_size.max(1);
        let pages = (size + page_size - 1) / page_size;
        Self {
            size,
            page_size,
            width: CompressedPage::<T>::width_for_max(max_value),
            pages: (0..pages).map(|_| OnceLock::new()).collect(),
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    fn page(&self, page: usize) -> &Mutex<CompressedPage<T>> {
        self.pages[page].get_or_init(|| {
            let len = (self.size - page * self.page_size).min(self.page_size);
            Mutex::new(CompressedPage::with_width(self.width, len))
        })
    }

    fn check(&self, index: usize) -> Result<()> {
        if index >= self.size {
            return Err(IndexError::OutOfBounds {
                index: index as u64,
                size: self.size as u64,
            });
        }
        Ok(())
    }

    pub fn set(&self, index: usize, value: T) -> Result<()> {
        self.check(index)?;
        self.page(index / self.page_size)
            .lock()
            .set(index % self.page_size, value)
    }

    pub fn get(&self, index: usize) -> Result<T> {
        self.check(index)?;
        match self.pages[index / self.page_size].get() {
            Some(page) => Ok(page.lock().get(index % self.page_size)),
            None => Ok(T::default()),
        }
    }

    /// Stream every value into `streamer`, page by page.
    pub fn stream_into<W>(&self, streamer: &mut PagedStreamer<T, W>) -> Result<()>
    where
        W: std::io::Write + Send + 'static,
    {
        for (n, slot) in self.pages.iter().enumerate() {
            match slot.get() {
                Some(page) => {
                    streamer.add_all(&page.lock().decode_all())?;
                }
                None => {
                    let len = (self.size - n * self.page_size).min(self.page_size);
                    streamer.add_all(&vec![T::default(); len])?;
                }
            }
        }
        Ok(())
    }
}

impl<T> PagedCollector<T>
where
    T: PackedValue + PageElement<Page = CompressedPage<T>>,
{
    pub fn write_to(&self, path: &Path, config: &IndexConfig) -> Result<PagedReader<T>> {
        let page_size = match T::KIND {
            crate::codec::PageKind::Narrow => config.page_size_int,
            crate::codec::PageKind::Wide => config.page_size_long,
        };
        let mut streamer = PagedStreamer::create(path, page_size, config)?;
        self.stream_into(&mut streamer)?;
        streamer.finish()
    }
}

impl IntIndexCollector {
    pub fn new(size: usize, max_value: i32, config: &IndexConfig) -> Self {
        Self::with_page_size(size, max_value, config.page_size_int)
    }
}

impl LongIndexCollector {
    pub fn new(size: usize, max_value: i64, config: &IndexConfig) -> Self {
        Self::with_page_size(size, max_value, config.page_size_long)
    }
}

// ── Uncompressed collectors ─────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct IntIndexCollectorUncompressed {
    data: Vec<i32>,
}

impl IntIndexCollectorUncompressed {
    pub fn new(size: usize) -> Self {
        Self {
            data: vec![0; size],
        }
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn set(&mut self, index: usize, value: i32) -> Result<()> {
        let size = self.data.len();
        let slot = self.data.get_mut(index).ok_or(IndexError::OutOfBounds {
            index: index as u64,
            size: size as u64,
        })?;
        *slot = value;
        Ok(())
    }

    pub fn get(&self, index: usize) -> Result<i32> {
        self.data.get(index).copied().ok_or(IndexError::OutOfBounds {
            index: index as u64,
            size: self.data.len() as u64,
        })
    }

    pub fn as_slice(&self) -> &[i32] {
        &self.data
    }

    pub fn write_to(&self, path: &Path, config: &IndexConfig) -> Result<PagedReader<i32>> {
        crate::index::streamer::write_int_index(path, &self.data, config)
    }
}

#[derive(Debug, Clone)]
pub struct LongIndexCollectorUncompressed {
    data: Vec<i64>,
}

impl LongIndexCollectorUncompressed {
    pub fn new(size: usize) -> Self {
        Self {
            data: vec![0; size],
        }
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn set(&mut self, index: usize, value: i64) -> Result<()> {
        let size = self.data.len();
        let slot = self.data.get_mut(index).ok_or(IndexError::OutOfBounds {
            index: index as u64,
            size: size as u64,
        })?;
        *slot = value;
        Ok(())
    }

    pub fn get(&self, index: usize) -> Result<i64> {
        self.data.get(index).copied().ok_or(IndexError::OutOfBounds {
            index: index as u64,
            size: self.data.len() as u64,
        })
    }

    pub fn write_to(&self, path: &Path, config: &IndexConfig) -> Result<LongIndex> {
        let reader = crate::index::streamer::write_long_index(path, &self.data, config)?;
        Ok(LongIndex::new(reader))
    }
}

/// Object sizes folded into 32 bits on `set`.
#[derive(Debug, Clone)]
pub struct SizeIndexCollectorUncompressed {
    inner: IntIndexCollectorUncompressed,
}

impl SizeIndexCollectorUncompressed {
    pub fn new(size: usize) -> Self {
        Self {
            inner: IntIndexCollectorUncompressed::new(size),
        }
    }

    pub fn set(&mut self, index: usize, size: i64) -> Result<()> {
        self.inner.set(index, compress_size(size))
    }

    pub fn get_size(&self, index: usize) -> Result<i64> {
        Ok(expand_size(self.inner.get(index)?))
    }

    pub fn write_to(&self, path: &Path, config: &IndexConfig) -> Result<SizeIndexReader> {
        Ok(SizeIndexReader::new(self.inner.write_to(path, config)?))
    }
}

// ── Identifier ──────────────────────────────────────────────────────

const IDENTIFIER_INITIAL_CAPACITY: usize = 10_000;

/// Object addresses in discovery order; after `sort` the position of an
/// address is its object id.
#[derive(Debug)]
pub struct Identifier {
    ids: Vec<i64>,
    max_len: usize,
}

impl Default for Identifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Identifier {
    pub fn new() -> Self {
        Self::with_limit(i32::MAX as usize)
    }

    /// Identifier refusing to grow past `max_len` entries.
    pub fn with_limit(max_len: usize) -> Self {
        Self {
            ids: Vec::new(),
            max_len,
        }
    }

    pub fn add(&mut self, address: i64) -> Result<()> {
        if self.ids.len() >= self.max_len {
            return Err(IndexError::CapacityExceeded {
                attempted: self.ids.len() as u64 + 1,
                max: self.max_len as u64,
            });
        }
        if self.ids.len() == self.ids.capacity() {
            let grown = (self.ids.capacity() + (self.ids.capacity() >> 1))
                .max(IDENTIFIER_INITIAL_CAPACITY)
                .min(self.max_len);
            self.ids.reserve_exact(grown - self.ids.len());
        }
        self.ids.push(address);
        Ok(())
    }

    pub fn sort(&mut self) {
        self.ids.par_sort_unstable();
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = i64> + '_ {
        self.ids.iter().copied()
    }

    /// Persist the sorted addresses as the object-to-address index.
    pub fn write_to(&self, path: &Path, config: &IndexConfig) -> Result<LongIndex> {
        let reader = crate::index::streamer::write_long_index(path, &self.ids, config)?;
        Ok(LongIndex::new(reader))
    }

    fn out_of_bounds(&self, index: usize) -> IndexError {
        IndexError::OutOfBounds {
            index: index as u64,
            size: self.ids.len() as u64,
        }
    }
}

impl IndexReader for Identifier {
    fn size(&self) -> usize {
        self.ids.len()
    }

    fn unload(&self) {}

    fn close(&self) {}

    fn delete(&self) -> Result<()> {
        Ok(())
    }
}

impl One2LongIndex for Identifier {
    fn get(&self, index: usize) -> Result<i64> {
        self.ids.get(index).copied().ok_or_else(|| self.out_of_bounds(index))
    }

    fn get_next(&self, index: usize, len: usize) -> Result<Vec<i64>> {
        let end = index.checked_add(len).filter(|&e| e <= self.ids.len());
        match end {
            Some(end) => Ok(self.ids[index..end].to_vec()),
            None => Err(self.out_of_bounds(index.saturating_add(len))),
        }
    }

    fn reverse(&self, value: i64) -> Result<i64> {
        Ok(match self.ids.binary_search(&value) {
            Ok(i) => i as i64,
            Err(i) => -(i as i64) - 1,
        })
    }
}

// ── Tests ───────────────────────────────────────────────────────────
