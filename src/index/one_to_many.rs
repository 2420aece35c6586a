//! One-to-many indices: a body of concatenated value runs plus a header
//! mapping each key to its run.
//!
//! # File Layout
//!
//! ```text
//! [body paged index]      value runs; starts at 0, ends at `divider`
//! [header paged index]    one position per key; ends at len - 8
//! divider: u64
//! ```
//!
//! Header values are `position + 1`, so 0 marks a key without a run. In the
//! basic layout the run starts with its length. In the sorted layout there is
//! no length: a run ends where the next greater header position begins.
//!
//! Headers hold 32-bit positions until a position passes the configured
//! narrow threshold; from then on a high byte array is kept alongside and the
//! header is written with 64-bit pages.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::codec::{CompressedPage, PackedValue, PageElement};
use crate::config::IndexConfig;
use crate::error::{IndexError, Result};
use crate::index::reader::{PagedReader, PositionIndexReader};
use crate::index::source::IndexFile;
use crate::index::streamer::PagedStreamer;
use crate::index::{IndexReader, One2LongIndex, One2ManyIndex, One2ManyLongIndex};

/// Largest position a promoted header can hold (40 bits).
const HEADER_WIDE_MAX: u64 = (1 << 40) - 1;

// ── Header array ────────────────────────────────────────────────────

#[derive(Debug)]
pub(crate) struct HeaderArray {
    low: Vec<u32>,
    high: Option<Vec<u8>>,
    narrow_max: u64,
}

impl HeaderArray {
    /// `narrow_max` is capped at `u32::MAX`: the low array cannot hold more.
    pub(crate) fn new(size: usize, narrow_max: u64) -> Self {
        Self {
            low: vec![0; size],
            high: None,
            narrow_max: narrow_max.min(u32::MAX as u64),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.low.len()
    }

    pub(crate) fn is_wide(&self) -> bool {
        self.high.is_some()
    }

    pub(crate) fn check(&self, index: usize) -> Result<()> {
        if index >= self.low.len() {
            return Err(IndexError::OutOfBounds {
                index: index as u64,
                size: self.low.len() as u64,
            });
        }
        Ok(())
    }

    pub(crate) fn set(&mut self, index: usize, value: u64) -> Result<()> {
        self.check(index)?;
        if value > HEADER_WIDE_MAX {
            return Err(IndexError::CapacityExceeded {
                attempted: value,
                max: HEADER_WIDE_MAX,
            });
        }
        if value > self.narrow_max && self.high.is_none() {
            tracing::debug!(value, "header promoted to 40-bit positions");
            self.high = Some(vec![0; self.low.len()]);
        }
        self.low[index] = value as u32;
        if let Some(high) = self.high.as_mut() {
            high[index] = (value >> 32) as u8;
        }
        Ok(())
    }

    pub(crate) fn get(&self, index: usize) -> u64 {
        let hi = self.high.as_ref().map_or(0, |h| h[index] as u64);
        (hi << 32) | self.low[index] as u64
    }

    /// Append the header index after the body; returns the sink and the end
    /// position of the header.
    pub(crate) fn write<W>(&self, sink: W, start: u64, config: &IndexConfig) -> Result<(W, u64)>
    where
        W: Write + Send + 'static,
    {
        if self.is_wide() {
            let mut s = PagedStreamer::<i64, W>::new(sink, start, config.page_size_long, config)?;
            for i in 0..self.len() {
                s.add(self.get(i) as i64)?;
            }
            let end = s.close_stream()?;
            Ok((end.sink, end.end))
        } else {
            let mut s = PagedStreamer::<i32, W>::new(sink, start, config.page_size_int, config)?;
            s.add_iter(self.low.iter().map(|&v| v as i32))?;
            let end = s.close_stream()?;
            Ok((end.sink, end.end))
        }
    }
}

// ── Shared writer plumbing ──────────────────────────────────────────

struct BodyWriter<T: PackedValue> {
    path: PathBuf,
    config: IndexConfig,
    header: HeaderArray,
    body: PagedStreamer<T, BufWriter<File>>,
}

/// Pieces of a flushed one-to-many file.
pub(crate) struct Flushed<T: PageElement> {
    pub(crate) file: Arc<IndexFile>,
    pub(crate) header: PositionIndexReader,
    pub(crate) body: PagedReader<T>,
}

/// Close the body, append header and divider, and reopen the file.
pub(crate) fn finish_file<T>(
    path: &Path,
    config: &IndexConfig,
    header: &HeaderArray,
    body: PagedStreamer<T, BufWriter<File>>,
) -> Result<Flushed<T>>
where
    T: PackedValue + PageElement<Page = CompressedPage<T>>,
{
    let body_end = body.close_stream()?;
    let divider = body_end.end;
    let (mut sink, _) = header.write(body_end.sink, divider, config)?;
    sink.write_all(&divider.to_le_bytes())?;
    sink.flush()?;
    let file = sink.into_inner().map_err(|e| e.into_error())?;
    file.sync_data()?;
    drop(file);

    let index_file = IndexFile::open(path)?;
    let len = index_file.len()? as usize;
    let header = PositionIndexReader::open_region(Arc::clone(&index_file), len - 8, config)?;
    let body = PagedReader::with_cache(Arc::clone(&index_file), divider as usize, body_end.cache)?;
    tracing::debug!(
        path = %path.display(),
        keys = header.size(),
        values = body.size(),
        wide_header = header_is_wide(&header),
        "one-to-many index flushed"
    );
    Ok(Flushed {
        file: index_file,
        header,
        body,
    })
}

impl<T> BodyWriter<T>
where
    T: PackedValue + PageElement<Page = CompressedPage<T>>,
{
    fn create(path: &Path, size: usize, page_size: usize, config: &IndexConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            path: path.to_path_buf(),
            config: config.clone(),
            header: HeaderArray::new(size, config.header_narrow_max),
            body: PagedStreamer::create(path, page_size, config)?,
        })
    }

    fn flush(self) -> Result<Flushed<T>> {
        finish_file(&self.path, &self.config, &self.header, self.body)
    }

    fn cancel(self) {
        let path = self.path.clone();
        drop(self.body.close_stream());
        if let Err(e) = std::fs::remove_file(&path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!("failed to remove canceled index {}: {}", path.display(), e);
            }
        }
    }
}

fn header_is_wide(header: &PositionIndexReader) -> bool {
    header
        .page(0)
        .map(|p| matches!(*p, crate::codec::AnyPage::Wide(_)))
        .unwrap_or(false)
}

/// Split a one-to-many file into its header and body readers.
pub(crate) fn open_parts<T: PageElement>(path: &Path, config: &IndexConfig) -> Result<Flushed<T>> {
    let file = IndexFile::open(path)?;
    let (len, divider) = {
        let data = file.data()?;
        if data.len() < 8 {
            return Err(IndexError::InvalidFormat(format!(
                "{} is too short for a one-to-many index",
                path.display()
            )));
        }
        let divider = u64::from_le_bytes(data[data.len() - 8..].try_into().unwrap());
        (data.len(), divider)
    };
    if divider as usize > len - 8 {
        return Err(IndexError::InvalidFormat(format!(
            "divider {} past end of {}",
            divider,
            path.display()
        )));
    }
    let header = PositionIndexReader::open_region(Arc::clone(&file), len - 8, config)?;
    let body = PagedReader::open_region(Arc::clone(&file), divider as usize, config)?;
    Ok(Flushed { file, header, body })
}

/// Convert raw addresses to object ids, dropping unknown and duplicate
/// addresses. The id of the first address (the class or pseudo reference)
/// stays first; the rest follow in ascending address order.
pub fn references_to_ids(identifier: &dyn One2LongIndex, addresses: &[i64]) -> Result<Vec<i32>> {
    let Some(&first) = addresses.first() else {
        return Ok(Vec::new());
    };
    let mut sorted = addresses.to_vec();
    sorted.sort_unstable();
    sorted.dedup();

    let mut lead = None;
    let mut rest = Vec::with_capacity(sorted.len());
    for address in sorted {
        let id = identifier.reverse(address)?;
        if id < 0 {
            continue;
        }
        if address == first {
            lead = Some(id as i32);
        } else {
            rest.push(id as i32);
        }
    }
    let mut ids = Vec::with_capacity(rest.len() + 1);
    ids.extend(lead);
    ids.extend(rest);
    Ok(ids)
}

// ── IntArray1NWriter ────────────────────────────────────────────────

/// Basic layout writer. `log` may be called from several threads.
pub struct IntArray1NWriter {
    inner: Mutex<BodyWriter<i32>>,
}

impl IntArray1NWriter {
    pub fn new(size: usize, path: &Path, config: &IndexConfig) -> Result<Self> {
        Ok(Self {
            inner: Mutex::new(BodyWriter::create(path, size, config.page_size_int, config)?),
        })
    }

    pub fn log(&self, index: usize, values: &[i32]) -> Result<()> {
        let mut w = self.inner.lock();
        let position = w.body.add_run_with_length(values)?;
        w.header.set(index, position + 1)
    }

    /// Log outbound references given as addresses.
    pub fn log_references(
        &self,
        identifier: &dyn One2LongIndex,
        index: usize,
        addresses: &[i64],
    ) -> Result<()> {
        let ids = references_to_ids(identifier, addresses)?;
        self.log(index, &ids)
    }

    pub fn flush(self) -> Result<IntIndex1NReader> {
        let parts = self.inner.into_inner().flush()?;
        Ok(IntIndex1NReader::from_parts(parts))
    }

    /// Abandon the index and remove its file.
    pub fn cancel(self) {
        self.inner.into_inner().cancel()
    }
}

// ── IntArray1NSortedWriter ──────────────────────────────────────────

/// Sorted layout writer; keys must be logged in ascending order.
pub struct IntArray1NSortedWriter {
    inner: BodyWriter<i32>,
    last: Option<usize>,
}

impl IntArray1NSortedWriter {
    pub fn new(size: usize, path: &Path, config: &IndexConfig) -> Result<Self> {
        Ok(Self {
            inner: BodyWriter::create(path, size, config.page_size_int, config)?,
            last: None,
        })
    }

    /// Keys must be logged in strictly ascending order; anything else would
    /// let one key's run absorb another's. An empty list leaves the header
    /// slot at 0.
    pub fn log(&mut self, index: usize, values: &[i32]) -> Result<()> {
        self.inner.header.check(index)?;
        if let Some(last) = self.last {
            if index <= last {
                return Err(IndexError::InvalidFormat(format!(
                    "sorted one-to-many key {} logged after key {}",
                    index, last
                )));
            }
        }
        self.last = Some(index);
        if values.is_empty() {
            return Ok(());
        }
        let position = self.inner.body.size();
        self.inner.header.set(index, position + 1)?;
        self.inner.body.add_all(values)?;
        Ok(())
    }

    pub fn log_references(
        &mut self,
        identifier: &dyn One2LongIndex,
        index: usize,
        addresses: &[i64],
    ) -> Result<()> {
        let ids = references_to_ids(identifier, addresses)?;
        self.log(index, &ids)
    }

    pub fn flush(self) -> Result<IntIndex1NSortedReader> {
        Ok(IntIndex1NSortedReader::from_parts(self.inner.flush()?))
    }

    pub fn cancel(self) {
        self.inner.cancel()
    }
}

// ── LongArray1NWriter ───────────────────────────────────────────────

pub struct LongArray1NWriter {
    inner: BodyWriter<i64>,
}

impl LongArray1NWriter {
    pub fn new(size: usize, path: &Path, config: &IndexConfig) -> Result<Self> {
        Ok(Self {
            inner: BodyWriter::create(path, size, config.page_size_long, config)?,
        })
    }

    pub fn log(&mut self, index: usize, values: &[i64]) -> Result<()> {
        let position = self.inner.body.add_run_with_length(values)?;
        self.inner.header.set(index, position + 1)
    }

    pub fn flush(self) -> Result<LongIndex1NReader> {
        Ok(LongIndex1NReader::from_parts(self.inner.flush()?))
    }

    pub fn cancel(self) {
        self.inner.cancel()
    }
}

// ── IntArray1NUncompressedCollector ─────────────────────────────────

/// Collects small per-key lists in memory, then writes them sorted.
#[derive(Debug)]
pub struct IntArray1NUncompressedCollector {
    lists: Vec<Vec<i32>>,
    path: PathBuf,
}

impl IntArray1NUncompressedCollector {
    pub fn new(size: usize, path: &Path) -> Self {
        Self {
            lists: vec![Vec::new(); size],
            path: path.to_path_buf(),
        }
    }

    pub fn log(&mut self, index: usize, value: i32) -> Result<()> {
        let size = self.lists.len();
        self.lists
            .get_mut(index)
            .ok_or(IndexError::OutOfBounds {
                index: index as u64,
                size: size as u64,
            })?
            .push(value);
        Ok(())
    }

    pub fn flush(self, config: &IndexConfig) -> Result<IntIndex1NSortedReader> {
        let mut writer = IntArray1NSortedWriter::new(self.lists.len(), &self.path, config)?;
        for (index, list) in self.lists.iter().enumerate() {
            if !list.is_empty() {
                writer.log(index, list)?;
            }
        }
        writer.flush()
    }
}

// ── Readers ─────────────────────────────────────────────────────────

macro_rules! one_to_many_lifecycle {
    ($reader:ty) => {
        impl IndexReader for $reader {
            fn size(&self) -> usize {
                self.header.size()
            }

            fn unload(&self) {
                self.header.unload();
                self.body.unload();
            }

            fn close(&self) {
                self.header.unload();
                self.body.unload();
                self.file.close();
            }

            fn delete(&self) -> Result<()> {
                self.header.unload();
                self.body.unload();
                self.file.delete()
            }
        }
    };
}

/// Reader for the basic layout.
#[derive(Debug)]
pub struct IntIndex1NReader {
    file: Arc<IndexFile>,
    header: PositionIndexReader,
    body: PagedReader<i32>,
}

impl IntIndex1NReader {
    fn from_parts(parts: Flushed<i32>) -> Self {
        Self {
            file: parts.file,
            header: parts.header,
            body: parts.body,
        }
    }

    pub fn open(path: &Path, config: &IndexConfig) -> Result<Self> {
        Ok(Self::from_parts(open_parts(path, config)?))
    }

    pub fn header(&self) -> &PositionIndexReader {
        &self.header
    }

    pub fn body(&self) -> &PagedReader<i32> {
        &self.body
    }
}

one_to_many_lifecycle!(IntIndex1NReader);

impl One2ManyIndex for IntIndex1NReader {
    fn get(&self, index: usize) -> Result<Vec<i32>> {
        let p = self.header.get(index)? as usize;
        if p == 0 {
            return Ok(Vec::new());
        }
        let len = self.body.get(p - 1)?;
        if len < 0 {
            return Err(IndexError::InvalidFormat(format!(
                "negative run length {} for key {}",
                len, index
            )));
        }
        self.body.get_next(p, len as usize)
    }
}

/// Reader for the sorted layout.
#[derive(Debug)]
pub struct IntIndex1NSortedReader {
    file: Arc<IndexFile>,
    header: PositionIndexReader,
    body: PagedReader<i32>,
}

impl IntIndex1NSortedReader {
    pub(crate) fn from_parts(parts: Flushed<i32>) -> Self {
        Self {
            file: parts.file,
            header: parts.header,
            body: parts.body,
        }
    }

    pub fn open(path: &Path, config: &IndexConfig) -> Result<Self> {
        Ok(Self::from_parts(open_parts(path, config)?))
    }

    pub fn header(&self) -> &PositionIndexReader {
        &self.header
    }

    pub fn body(&self) -> &PagedReader<i32> {
        &self.body
    }

    /// Body range `[start, end)` of key `index`, if it has a run.
    fn run(&self, index: usize) -> Result<Option<(usize, usize)>> {
        let p0 = self.header.get(index)?;
        if p0 == 0 {
            return Ok(None);
        }
        // The run ends at the next strictly greater header position; keys in
        // between were never logged (0).
        let mut p1 = None;
        let mut next = index + 1;
        let size = self.header.size();
        while next < size {
            let p = self.header.get(next)?;
            if p > p0 {
                p1 = Some(p);
                break;
            }
            next += 1;
        }
        let p1 = p1.unwrap_or(self.body.size() as u64 + 1);
        Ok(Some(((p0 - 1) as usize, (p1 - 1) as usize)))
    }
}

one_to_many_lifecycle!(IntIndex1NSortedReader);

impl One2ManyIndex for IntIndex1NSortedReader {
    fn get(&self, index: usize) -> Result<Vec<i32>> {
        match self.run(index)? {
            Some((start, end)) => self.body.get_next(start, end - start),
            None => Ok(Vec::new()),
        }
    }
}

/// Reader for long-valued lists.
#[derive(Debug)]
pub struct LongIndex1NReader {
    file: Arc<IndexFile>,
    header: PositionIndexReader,
    body: PagedReader<i64>,
}

impl LongIndex1NReader {
    fn from_parts(parts: Flushed<i64>) -> Self {
        Self {
            file: parts.file,
            header: parts.header,
            body: parts.body,
        }
    }

    pub fn open(path: &Path, config: &IndexConfig) -> Result<Self> {
        Ok(Self::from_parts(open_parts(path, config)?))
    }
}

one_to_many_lifecycle!(LongIndex1NReader);

impl One2ManyLongIndex for LongIndex1NReader {
    fn get(&self, index: usize) -> Result<Vec<i64>> {
        let p = self.header.get(index)? as usize;
        if p == 0 {
            return Ok(Vec::new());
        }
        let len = self.body.get(p - 1)?;
        if len < 0 || len > i32::MAX as i64 {
            return Err(IndexError::InvalidFormat(format!(
                "bad run length {} for key {}",
                len, index
            )));
        }
        self.body.get_next(p, len as usize)
    }
}

// ── Tests ───────────────────────────────────────────────────────────
