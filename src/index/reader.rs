//! Random-access reader over a paged index.

use std::path::Path;
use std::sync::Arc;

use crate::codec::PageElement;
use crate::config::IndexConfig;
use crate::error::{IndexError, Result};
use crate::index::format::Trailer;
use crate::index::page_cache::PageCache;
use crate::index::source::IndexFile;

pub type IntIndexReader = PagedReader<i32>;
pub type LongIndexReader = PagedReader<i64>;
/// Header pages read as unsigned positions, written narrow or wide.
pub type PositionIndexReader = PagedReader<u64>;

pub struct PagedReader<T: PageElement> {
    file: Arc<IndexFile>,
    trailer: Trailer,
    cache: Arc<PageCache<T::Page>>,
}

impl<T: PageElement> PagedReader<T> {
    /// Open an index occupying a whole file.
    pub fn open(path: &Path, config: &IndexConfig) -> Result<Self> {
        let file = IndexFile::open(path)?;
        let end = file.len()? as usize;
        Self::open_region(file, end, config)
    }

    /// Open the index whose trailer ends at `end` inside a shared file.
    pub fn open_region(file: Arc<IndexFile>, end: usize, config: &IndexConfig) -> Result<Self> {
        Self::with_cache(file, end, Arc::new(PageCache::from_config(config)))
    }

    pub(crate) fn with_cache(
        file: Arc<IndexFile>,
        end: usize,
        cache: Arc<PageCache<T::Page>>,
    ) -> Result<Self> {
        let trailer = {
            let data = file.data()?;
            Trailer::parse(&data, end)?
        };
        Ok(Self {
            file,
            trailer,
            cache,
        })
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.trailer.size as usize
    }

    pub fn page_size(&self) -> usize {
        self.trailer.page_size
    }

    pub fn trailer(&self) -> &Trailer {
        &self.trailer
    }

    pub fn file(&self) -> &Arc<IndexFile> {
        &self.file
    }

    pub fn cached_pages(&self) -> usize {
        self.cache.len()
    }

    /// Decoded page `page`, from cache or disk.
    pub fn page(&self, page: usize) -> Result<Arc<T::Page>> {
        if page >= self.trailer.page_count() {
            return Err(IndexError::OutOfBounds {
                index: page as u64,
                size: self.trailer.page_count() as u64,
            });
        }
        self.cache.get_or_load(page as u32, || {
            let data = self.file.data()?;
            let (start, end) = self.trailer.page_range(page);
            let decoded = T::decode_page(&data[start..end])?;
            if T::page_len(&decoded) != self.trailer.page_len(page) {
                return Err(IndexError::InvalidFormat(format!(
                    "page {} holds {} elements, trailer expects {}",
                    page,
                    T::page_len(&decoded),
                    self.trailer.page_len(page)
                )));
            }
            Ok(decoded)
        })
    }

    #[inline]
    fn check(&self, index: usize, len: usize) -> Result<()> {
        if index.checked_add(len).map_or(true, |end| end > self.size()) {
            return Err(IndexError::OutOfBounds {
                index: (index as u64).saturating_add(len as u64),
                size: self.size() as u64,
            });
        }
        Ok(())
    }

    pub fn get(&self, index: usize) -> Result<T> {
        self.check(index, 1)?;
        let ps = self.trailer.page_size;
        let page = self.page(index / ps)?;
        Ok(T::page_get(&page, index % ps))
    }

    /// `len` consecutive elements starting at `index`, crossing pages as needed.
    pub fn get_next(&self, index: usize, len: usize) -> Result<Vec<T>> {
        self.check(index, len)?;
        let mut out = Vec::with_capacity(len);
        self.for_each_in(index, len, |v| out.push(v))?;
        Ok(out)
    }

    /// Visit `len` consecutive elements without collecting them.
    pub fn for_each_in<F: FnMut(T)>(&self, index: usize, len: usize, mut f: F) -> Result<()> {
        self.check(index, len)?;
        let ps = self.trailer.page_size;
        let mut pos = index;
        let end = index + len;
        while pos < end {
            let page_no = pos / ps;
            let page = self.page(page_no)?;
            let page_end = ((page_no + 1) * ps).min(end);
            for i in pos..page_end {
                f(T::page_get(&page, i - page_no * ps));
            }
            pos = page_end;
        }
        Ok(())
    }

    /// Batched lookup; consecutive ids on one page reuse the decoded page.
    pub fn get_all(&self, indices: &[usize]) -> Result<Vec<T>> {
        let ps = self.trailer.page_size;
        let mut out = Vec::with_capacity(indices.len());
        let mut active: Option<(usize, Arc<T::Page>)> = None;
        for &index in indices {
            self.check(index, 1)?;
            let page_no = index / ps;
            let page = match &active {
                Some((n, p)) if *n == page_no => Arc::clone(p),
                _ => {
                    let p = self.page(page_no)?;
                    active = Some((page_no, Arc::clone(&p)));
                    p
                }
            };
            out.push(T::page_get(&page, index % ps));
        }
        Ok(out)
    }

    /// Every element in order.
    pub fn iter(&self) -> PagedIter<'_, T> {
        PagedIter {
            reader: self,
            pos: 0,
            page: None,
        }
    }

    pub fn unload(&self) {
        self.cache.clear();
    }

    /// Drop the cache and the mapping. Later reads reopen the file.
    pub fn close(&self) {
        self.cache.clear();
        self.file.close();
    }

    pub fn delete(&self) -> Result<()> {
        self.cache.clear();
        self.file.delete()
    }
}

impl<T: PageElement> std::fmt::Debug for PagedReader<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PagedReader")
            .field("path", &self.file.path())
            .field("size", &self.trailer.size)
            .field("page_size", &self.trailer.page_size)
            .field("pages", &self.trailer.page_count())
            .finish()
    }
}

pub struct PagedIter<'a, T: PageElement> {
    reader: &'a PagedReader<T>,
    pos: usize,
    page: Option<(usize, Arc<T::Page>)>,
}

impl<T: PageElement> Iterator for PagedIter<'_, T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.reader.size() {
            return None;
        }
        let ps = self.reader.page_size();
        let page_no = self.pos / ps;
        if self.page.as_ref().map(|(n, _)| *n) != Some(page_no) {
            match self.reader.page(page_no) {
                Ok(p) => self.page = Some((page_no, p)),
                Err(e) => {
                    self.pos = self.reader.size();
                    return Some(Err(e));
                }
            }
        }
        let page = &self.page.as_ref()?.1;
        let value = T::page_get(page, self.pos % ps);
        self.pos += 1;
        Some(Ok(value))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.reader.size() - self.pos;
        (left, Some(left))
    }
}

// ── Long index reverse lookup ───────────────────────────────────────

/// Levels of the binary search whose probe values are memoized.
const REVERSE_CACHE_DEPTH: u32 = 10;

impl PagedReader<i64> {
    /// Position of `value` in an ascending long index, or
    /// `-(insertion point) - 1` when absent.
    pub fn reverse(&self, value: i64) -> Result<i64> {
        self.reverse_with(value, None)
    }

    pub(crate) fn reverse_with(&self, value: i64, probes: Option<&ReverseProbeCache>) -> Result<i64> {
        let mut low = 0usize;
        let mut high = self.size();
        let mut depth = 0u32;
        while low < high {
            let mid = low + (high - low) / 2;
            let probe = match probes {
                Some(cache) if depth < REVERSE_CACHE_DEPTH => cache.probe(mid, || self.get(mid))?,
                _ => self.get(mid)?,
            };
            depth += 1;
            if probe < value {
                low = mid + 1;
            } else if probe > value {
                high = mid;
            } else {
                return Ok(mid as i64);
            }
        }
        Ok(-(low as i64) - 1)
    }
}

/// Values at the midpoints visited by the first levels of every binary
/// search. The first levels always probe the same positions, so they stay
/// resident even after the page cache drops their pages.
#[derive(Debug, Default)]
pub(crate) struct ReverseProbeCache {
    probes: parking_lot::Mutex<std::collections::HashMap<usize, i64>>,
}

impl ReverseProbeCache {
    fn probe<F: FnOnce() -> Result<i64>>(&self, mid: usize, load: F) -> Result<i64> {
        if let Some(v) = self.probes.lock().get(&mid) {
            return Ok(*v);
        }
        let v = load()?;
        self.probes.lock().insert(mid, v);
        Ok(v)
    }

    pub(crate) fn clear(&self) {
        self.probes.lock().clear();
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.probes.lock().len()
    }
}
