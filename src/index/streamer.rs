//! Sequential writer for paged indices.
//!
//! Values are buffered into pages; each full page travels through two
//! single-threaded stages connected by bounded channels:
//!
//! ```text
//! producer --pages--> compress --blobs--> write (records offsets)
//! ```
//!
//! Both stages consume FIFO channels, so blobs land on disk in page order.
//! A write failure is recorded and surfaced on the next `add` or at close.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Sender};
use parking_lot::Mutex;

use crate::codec::{CompressedPage, PackedValue, PageElement};
use crate::config::IndexConfig;
use crate::error::{IndexError, Result};
use crate::index::format::Trailer;
use crate::index::page_cache::PageCache;
use crate::index::reader::PagedReader;
use crate::index::source::IndexFile;

pub type IntIndexStreamer = PagedStreamer<i32, BufWriter<File>>;
pub type LongIndexStreamer = PagedStreamer<i64, BufWriter<File>>;

type Failure = Arc<Mutex<Option<String>>>;

/// What the write stage hands back once every page is on disk.
struct Written<W> {
    sink: W,
    page_starts: Vec<u64>,
    position: u64,
}

struct Pipeline<T: PackedValue, W> {
    pages: Option<Sender<(u32, Vec<T>)>>,
    compress: Option<JoinHandle<()>>,
    write: Option<JoinHandle<Option<Written<W>>>>,
    failure: Failure,
}

impl<T: PackedValue, W: Write + Send + 'static> Pipeline<T, W> {
    fn start(
        mut sink: W,
        start: u64,
        depth: usize,
        cache: Arc<PageCache<CompressedPage<T>>>,
    ) -> Result<Self> {
        let (page_tx, page_rx) = bounded::<(u32, Vec<T>)>(depth);
        let (blob_tx, blob_rx) = bounded::<Vec<u8>>(depth);
        let failure: Failure = Arc::new(Mutex::new(None));

        let compress = thread::Builder::new()
            .name("heapdex-compress".into())
            .spawn(move || {
                for (page_no, values) in page_rx {
                    let page = CompressedPage::encode(&values);
                    let blob = page.to_bytes();
                    cache.insert(page_no, Arc::new(page));
                    if blob_tx.send(blob).is_err() {
                        break;
                    }
                }
            })?;

        let write_failure = Arc::clone(&failure);
        let write = thread::Builder::new()
            .name("heapdex-write".into())
            .spawn(move || {
                let mut page_starts = Vec::new();
                let mut position = start;
                for blob in blob_rx {
                    if let Err(e) = sink.write_all(&blob) {
                        *write_failure.lock() = Some(e.to_string());
                        return None;
                    }
                    page_starts.push(position);
                    position += blob.len() as u64;
                }
                Some(Written {
                    sink,
                    page_starts,
                    position,
                })
            })?;

        Ok(Self {
            pages: Some(page_tx),
            compress: Some(compress),
            write: Some(write),
            failure,
        })
    }

    fn failed(&self) -> Result<()> {
        match self.failure.lock().as_ref() {
            Some(msg) => Err(IndexError::Pipeline(msg.clone())),
            None => Ok(()),
        }
    }

    fn send(&self, page_no: u32, values: Vec<T>) -> Result<()> {
        self.failed()?;
        let tx = self.pages.as_ref().ok_or_else(|| {
            IndexError::Pipeline("stream already closed".into())
        })?;
        if tx.send((page_no, values)).is_err() {
            self.failed()?;
            return Err(IndexError::Pipeline("write stage terminated".into()));
        }
        Ok(())
    }

    /// Drain both stages and take back the sink.
    fn finish(&mut self) -> Result<Written<W>> {
        self.pages.take();
        if let Some(h) = self.compress.take() {
            h.join()
                .map_err(|_| IndexError::Pipeline("compress stage panicked".into()))?;
        }
        let written = match self.write.take() {
            Some(h) => h
                .join()
                .map_err(|_| IndexError::Pipeline("write stage panicked".into()))?,
            None => None,
        };
        self.failed()?;
        written.ok_or_else(|| IndexError::Pipeline("write stage produced no output".into()))
    }
}

impl<T: PackedValue, W> Drop for Pipeline<T, W> {
    fn drop(&mut self) {
        self.pages.take();
        if let Some(h) = self.compress.take() {
            let _ = h.join();
        }
        if let Some(h) = self.write.take() {
            let _ = h.join();
        }
    }
}

/// Result of closing a stream.
pub struct StreamEnd<T: PackedValue, W> {
    pub sink: W,
    /// Bytes from the first page through the end of the trailer.
    pub bytes_written: u64,
    /// Position just past the trailer.
    pub end: u64,
    pub pages: usize,
    pub cache: Arc<PageCache<CompressedPage<T>>>,
}

// ── PagedStreamer ───────────────────────────────────────────────────

pub struct PagedStreamer<T: PackedValue, W: Write + Send + 'static> {
    page_size: usize,
    plain_size_max: u64,
    start: u64,
    buffer: Vec<T>,
    size: u64,
    pages_sent: u32,
    cache: Arc<PageCache<CompressedPage<T>>>,
    pipeline: Pipeline<T, W>,
    path: Option<PathBuf>,
}

impl<T: PackedValue, W: Write + Send + 'static> PagedStreamer<T, W> {
    /// Stream into `sink`, whose current position is `start`.
    pub fn new(sink: W, start: u64, page_size: usize, config: &IndexConfig) -> Result<Self> {
        if page_size == 0 || page_size > i32::MAX as usize {
            return Err(IndexError::Config(format!("bad page size {}", page_size)));
        }
        let cache = Arc::new(PageCache::from_config(config));
        let pipeline = Pipeline::start(sink, start, config.pipeline_depth, Arc::clone(&cache))?;
        Ok(Self {
            page_size,
            plain_size_max: config.plain_size_max,
            start,
            buffer: Vec::with_capacity(page_size),
            size: 0,
            pages_sent: 0,
            cache,
            pipeline,
            path: None,
        })
    }

    /// Elements added so far.
    #[inline]
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn start(&self) -> u64 {
        self.start
    }

    pub fn add(&mut self, value: T) -> Result<()> {
        self.buffer.push(value);
        self.size += 1;
        if self.buffer.len() == self.page_size {
            self.send_page()?;
        }
        Ok(())
    }

    /// Append all `values`; returns the position of the first one.
    pub fn add_all(&mut self, values: &[T]) -> Result<u64> {
        let position = self.size;
        let mut rest = values;
        while !rest.is_empty() {
            let room = self.page_size - self.buffer.len();
            let take = room.min(rest.len());
            self.buffer.extend_from_slice(&rest[..take]);
            self.size += take as u64;
            rest = &rest[take..];
            if self.buffer.len() == self.page_size {
                self.send_page()?;
            }
        }
        Ok(position)
    }

    pub fn add_iter<I: IntoIterator<Item = T>>(&mut self, values: I) -> Result<u64> {
        let position = self.size;
        for v in values {
            self.add(v)?;
        }
        Ok(position)
    }

    /// Append the run length, then the run; returns the position of the length.
    pub fn add_run_with_length(&mut self, values: &[T]) -> Result<u64> {
        let position = self.size;
        self.add(T::from_i64(values.len() as i64))?;
        self.add_all(values)?;
        Ok(position)
    }

    fn send_page(&mut self) -> Result<()> {
        let page = std::mem::replace(&mut self.buffer, Vec::with_capacity(self.page_size));
        let page_no = self.pages_sent;
        self.pages_sent = self.pages_sent.checked_add(1).ok_or(IndexError::CapacityExceeded {
            attempted: page_no as u64 + 1,
            max: u32::MAX as u64,
        })?;
        self.pipeline.send(page_no, page)
    }

    /// Flush the last page, write the trailer and return the sink.
    pub fn close_stream(mut self) -> Result<StreamEnd<T, W>> {
        if !self.buffer.is_empty() {
            self.send_page()?;
        }
        let written = self.pipeline.finish()?;
        let mut sink = written.sink;
        let mut offsets = written.page_starts;
        offsets.push(written.position);
        if offsets.len() == 1 {
            offsets[0] = self.start;
        }

        let trailer = Trailer {
            offsets,
            page_size: self.page_size,
            size: self.size,
        };
        let tail = trailer.write_to(&mut sink, self.plain_size_max)?;
        sink.flush()?;

        let end = written.position + tail;
        tracing::debug!(
            elements = self.size,
            pages = trailer.page_count(),
            bytes = end - self.start,
            "paged stream closed"
        );
        Ok(StreamEnd {
            sink,
            bytes_written: end - self.start,
            end,
            pages: trailer.page_count(),
            cache: Arc::clone(&self.cache),
        })
    }
}

impl<T> PagedStreamer<T, BufWriter<File>>
where
    T: PackedValue + PageElement<Page = CompressedPage<T>>,
{
    /// Stream into a new file at `path`.
    pub fn create(path: &Path, page_size: usize, config: &IndexConfig) -> Result<Self> {
        let file = File::create(path)?;
        let mut streamer = Self::new(BufWriter::new(file), 0, page_size, config)?;
        streamer.path = Some(path.to_path_buf());
        Ok(streamer)
    }

    /// Close the file and open a reader whose cache already holds the
    /// pages just written.
    pub fn finish(self) -> Result<PagedReader<T>> {
        let path = self
            .path
            .clone()
            .ok_or_else(|| IndexError::Config("streamer was not created from a path".into()))?;
        let end = self.close_stream()?;
        let file = end.sink.into_inner().map_err(|e| e.into_error())?;
        file.sync_data()?;
        drop(file);

        let index_file = IndexFile::open(&path)?;
        PagedReader::with_cache(index_file, end.end as usize, end.cache)
    }
}

impl IntIndexStreamer {
    pub fn create_int(path: &Path, config: &IndexConfig) -> Result<Self> {
        Self::create(path, config.page_size_int, config)
    }
}

impl LongIndexStreamer {
    pub fn create_long(path: &Path, config: &IndexConfig) -> Result<Self> {
        Self::create(path, config.page_size_long, config)
    }
}

/// Write `values` as a complete int index file.
pub fn write_int_index(path: &Path, values: &[i32], config: &IndexConfig) -> Result<PagedReader<i32>> {
    let mut streamer = IntIndexStreamer::create_int(path, config)?;
    streamer.add_all(values)?;
    streamer.finish()
}

/// Write `values` as a complete long index file.
pub fn write_long_index(path: &Path, values: &[i64], config: &IndexConfig) -> Result<PagedReader<i64>> {
    let mut streamer = LongIndexStreamer::create_long(path, config)?;
    streamer.add_all(values)?;
    streamer.finish()
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use tempfile::TempDir;

    fn small_config(page_size: usize) -> IndexConfig {
        IndexConfig {
            page_size_int: page_size,
            page_size_long: page_size,
            ..IndexConfig::default()
        }
    }

    #[test]
    fn test_four_values_two_pages() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("four.index");
        let reader = write_int_index(&path, &[10, 1_000_000, 3, 42], &small_config(2)).unwrap();

        assert_eq!(reader.size(), 4);
        assert_eq!(reader.trailer().page_count(), 2);
        assert_eq!(reader.get(2).unwrap(), 3);
        assert_eq!(reader.get_next(1, 2).unwrap(), vec![1_000_000, 3]);
    }

    #[test]
    fn test_fresh_reader_is_warm() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("warm.index");
        let values: Vec<i64> = (0..100).map(|i| i * i).collect();
        let reader = write_long_index(&path, &values, &small_config(10)).unwrap();
        assert_eq!(reader.cached_pages(), 10);
        reader.unload();
        assert_eq!(reader.cached_pages(), 0);
        assert_eq!(reader.get(99).unwrap(), 99 * 99);
    }

    #[test]
    fn test_embedded_stream_reports_length() {
        let config = small_config(3);
        let mut out = Vec::new();
        out.extend_from_slice(b"prefix");
        let mut streamer = PagedStreamer::<i32, Vec<u8>>::new(out, 6, 3, &config).unwrap();
        let p = streamer.add_run_with_length(&[5, 6, 7, 8]).unwrap();
        assert_eq!(p, 0);
        let end = streamer.close_stream().unwrap();
        assert_eq!(end.end as usize, end.sink.len());
        assert_eq!(end.bytes_written as usize, end.sink.len() - 6);

        let trailer = Trailer::parse(&end.sink, end.end as usize).unwrap();
        assert_eq!(trailer.first_offset(), 6);
        assert_eq!(trailer.size, 5);
    }

    #[test]
    fn test_empty_stream() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("empty.index");
        let reader = write_int_index(&path, &[], &small_config(4)).unwrap();
        assert_eq!(reader.size(), 0);
        assert!(reader.get(0).is_err());
        assert_eq!(reader.iter().count(), 0);
    }

    struct FailingSink {
        budget: usize,
    }

    impl Write for FailingSink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if buf.len() > self.budget {
                return Err(io::Error::new(io::ErrorKind::Other, "disk full"));
            }
            self.budget -= buf.len();
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_write_failure_surfaces() {
        let config = small_config(4);
        let mut streamer =
            PagedStreamer::<i64, FailingSink>::new(FailingSink { budget: 40 }, 0, 4, &config)
                .unwrap();
        let mut result = Ok(0);
        for i in 0..1000i64 {
            result = streamer.add_all(&[i * 1_000_003, -i, i << 20, 7]);
            if result.is_err() {
                break;
            }
        }
        let err = match result {
            Err(e) => e,
            Ok(_) => streamer.close_stream().err().unwrap(),
        };
        assert!(matches!(err, IndexError::Pipeline(msg) if msg.contains("disk full")));
    }
}
