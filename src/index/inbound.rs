//! Inbound reference index: inverts the forward edge stream.
//!
//! Edges are appended to per-bucket bit-packed logs while the dump is parsed
//! (`<index>N.log`, one pseudo bit plus object and referrer ids of
//! `bits_for(size)` bits each). `flush` then sorts one bucket at a time, so
//! memory is bounded by the largest bucket. A bucket with too many edges is
//! first split by greedy bin-packing of its objects into sub-bucket logs
//! (`<index>N.M.log`).
//!
//! Per object the output run holds the distinct pseudo referrers first, then
//! the distinct ordinary referrers that are not also pseudo referrers, each
//! group ascending. The result is the sorted one-to-many layout.

use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use rayon::slice::ParallelSliceMut;
use serde::{Deserialize, Serialize};

use crate::cancel::ProgressListener;
use crate::codec::{bits_for, BitReader, BitWriter};
use crate::config::IndexConfig;
use crate::error::{IndexError, Result};
use crate::index::one_to_many::{finish_file, open_parts, HeaderArray, IntIndex1NSortedReader};
use crate::index::streamer::{IntIndexStreamer, PagedStreamer};
use crate::index::{IndexReader, One2ManyIndex, One2ManyObjectsIndex};

const LOG_BUFFER: usize = 256 * 1024;
const CANCEL_POLL_ROWS: u64 = 1000;

// ── Keys ────────────────────────────────────────────────────────────

/// Location of an object's pseudo referrers in the inbound body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InboundKey {
    Narrow { offset: u32, len: u32 },
    Wide { offset: u64, len: u32 },
}

impl InboundKey {
    pub fn offset(&self) -> u64 {
        match *self {
            InboundKey::Narrow { offset, .. } => offset as u64,
            InboundKey::Wide { offset, .. } => offset,
        }
    }

    pub fn len(&self) -> usize {
        match *self {
            InboundKey::Narrow { len, .. } | InboundKey::Wide { len, .. } => len as usize,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Receives the key of every object that has pseudo referrers.
pub trait KeyWriter {
    fn store_key(&mut self, object: usize, key: InboundKey) -> Result<()>;
}

impl<F> KeyWriter for F
where
    F: FnMut(usize, InboundKey) -> Result<()>,
{
    fn store_key(&mut self, object: usize, key: InboundKey) -> Result<()> {
        self(object, key)
    }
}

impl KeyWriter for std::collections::HashMap<usize, InboundKey> {
    fn store_key(&mut self, object: usize, key: InboundKey) -> Result<()> {
        self.insert(object, key);
        Ok(())
    }
}

// ── Edge records ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct Edge {
    object: u32,
    /// Pseudo edges sort before ordinary ones of the same object.
    ordinary: bool,
    referrer: u32,
}

type LogWriter = BitWriter<BufWriter<File>>;

fn log_path(index: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = index.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

fn bucket_log(index: &Path, bucket: usize) -> PathBuf {
    log_path(index, &format!("{}.log", bucket))
}

fn sub_bucket_log(index: &Path, bucket: usize, sub: usize) -> PathBuf {
    log_path(index, &format!("{}.{}.log", bucket, sub))
}

fn create_log(path: &Path) -> Result<LogWriter> {
    let file = File::create(path)?;
    Ok(BitWriter::new(BufWriter::with_capacity(LOG_BUFFER, file)))
}

fn open_log(path: &Path) -> Result<BitReader<BufReader<File>>> {
    let file = File::open(path)?;
    sequential_hint(&file);
    Ok(BitReader::new(BufReader::with_capacity(LOG_BUFFER, file)))
}

#[cfg(target_os = "linux")]
fn sequential_hint(file: &File) {
    use std::os::unix::io::AsRawFd;
    // SAFETY: advisory only; the descriptor is valid for the file's lifetime.
    unsafe {
        libc::posix_fadvise(file.as_raw_fd(), 0, 0, libc::POSIX_FADV_SEQUENTIAL);
    }
}

#[cfg(not(target_os = "linux"))]
fn sequential_hint(_file: &File) {}

fn remove_quietly(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!("failed to remove {}: {}", path.display(), e),
    }
}

// ── InboundWriter ───────────────────────────────────────────────────

pub struct InboundWriter {
    size: usize,
    path: PathBuf,
    config: IndexConfig,
    bit_length: u32,
    bucket_ids: usize,
    logs: Vec<Option<LogWriter>>,
    edges: Vec<u64>,
    sub_logs: Vec<PathBuf>,
}

impl InboundWriter {
    pub fn new(size: usize, path: &Path, config: &IndexConfig) -> Result<Self> {
        config.validate()?;
        if size > u32::MAX as usize {
            return Err(IndexError::CapacityExceeded {
                attempted: size as u64,
                max: u32::MAX as u64,
            });
        }
        let buckets = (size / config.inbound_bucket_ids.max(1) + 1).next_power_of_two();
        Ok(Self {
            size,
            path: path.to_path_buf(),
            config: config.clone(),
            bit_length: bits_for(size as u64),
            bucket_ids: size / buckets + 1,
            logs: (0..buckets).map(|_| None).collect(),
            edges: vec![0; buckets],
            sub_logs: Vec::new(),
        })
    }

    pub fn bucket_count(&self) -> usize {
        self.logs.len()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record that `referrer` points at `object`.
    pub fn log(&mut self, object: usize, referrer: usize, pseudo: bool) -> Result<()> {
        for id in [object, referrer] {
            if id >= self.size {
                return Err(IndexError::OutOfBounds {
                    index: id as u64,
                    size: self.size as u64,
                });
            }
        }
        let bucket = object / self.bucket_ids;
        let log = match &mut self.logs[bucket] {
            Some(log) => log,
            slot => slot.insert(create_log(&bucket_log(&self.path, bucket))?),
        };
        log.write_bit(pseudo)?;
        log.write(object as u64, self.bit_length)?;
        log.write(referrer as u64, self.bit_length)?;
        self.edges[bucket] += 1;
        Ok(())
    }

    fn close_logs(&mut self) -> Result<()> {
        let mut first_error = None;
        for slot in self.logs.iter_mut() {
            if let Some(log) = slot.take() {
                if let Err(e) = log.finish() {
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    /// Build the index. Objects with pseudo referrers get their key handed
    /// to `keys`. On any failure, including cancellation, every log and the
    /// partial index file are removed.
    pub fn flush(
        mut self,
        listener: &dyn ProgressListener,
        keys: &mut dyn KeyWriter,
    ) -> Result<InboundReader> {
        let result = self.close_logs().and_then(|_| self.build(listener, keys));
        match result {
            Ok(reader) => Ok(reader),
            Err(e) => {
                if e.is_canceled() {
                    tracing::info!("inbound index build canceled, removing {}", self.path.display());
                } else {
                    tracing::warn!("inbound index build failed: {}", e);
                }
                self.remove_files();
                Err(e)
            }
        }
    }

    /// Abandon the build and remove all files.
    pub fn cancel(mut self) {
        if let Err(e) = self.close_logs() {
            tracing::warn!("closing inbound logs failed: {}", e);
        }
        self.remove_files();
    }

    fn remove_files(&self) {
        for bucket in 0..self.logs.len() {
            remove_quietly(&bucket_log(&self.path, bucket));
        }
        for sub in &self.sub_logs {
            remove_quietly(sub);
        }
        remove_quietly(&self.path);
    }

    fn build(
        &mut self,
        listener: &dyn ProgressListener,
        keys: &mut dyn KeyWriter,
    ) -> Result<InboundReader> {
        listener.begin_task("inbound index", self.logs.len() as u64);
        let mut body = IntIndexStreamer::create_int(&self.path, &self.config)?;
        let mut header = HeaderArray::new(self.size, self.config.header_narrow_max);

        for bucket in 0..self.logs.len() {
            listener.check_canceled()?;
            let mut sink = RunSink {
                body: &mut body,
                header: &mut header,
                keys: &mut *keys,
                narrow_key_max: self.config.inbound_narrow_key_max.min(u32::MAX as u64),
            };
            self.process_bucket(listener, &mut sink, bucket)?;
            listener.worked(1);
        }

        let parts = finish_file(&self.path, &self.config, &header, body)?;
        Ok(InboundReader {
            inner: IntIndex1NSortedReader::from_parts(parts),
        })
    }

    fn process_bucket(
        &mut self,
        listener: &dyn ProgressListener,
        sink: &mut RunSink<'_>,
        bucket: usize,
    ) -> Result<()> {
        let log = bucket_log(&self.path, bucket);
        let edges = self.edges[bucket];
        if edges == 0 {
            return Ok(());
        }
        if edges < self.config.inbound_sub_bucket_edges as u64 {
            return self.process_log(listener, sink, &log, edges);
        }

        // Count edges per object, then bin-pack objects into sub-buckets.
        let start = bucket * self.bucket_ids;
        let mut counts = vec![0u64; self.bucket_ids];
        {
            let mut input = open_log(&log)?;
            for _ in 0..edges {
                input.read_bit()?;
                let object = input.read(self.bit_length)? as usize;
                input.read(self.bit_length)?;
                counts[object - start] += 1;
            }
        }
        listener.check_canceled()?;

        let cap = self.config.inbound_sub_bucket_edges as u64;
        let mut sub_of = vec![0usize; self.bucket_ids];
        let mut filled = cap;
        let mut subs = 0usize;
        for (j, &count) in counts.iter().enumerate() {
            if count > 0 && filled + count > cap {
                filled = 0;
                subs += 1;
            }
            filled += count;
            sub_of[j] = subs.saturating_sub(1);
        }
        if subs <= 1 {
            return self.process_log(listener, sink, &log, edges);
        }
        tracing::debug!(bucket, edges, sub_buckets = subs, "splitting inbound bucket");

        let paths: Vec<PathBuf> = (0..subs).map(|s| sub_bucket_log(&self.path, bucket, s)).collect();
        self.sub_logs.extend(paths.iter().cloned());
        let mut sub_edges = vec![0u64; subs];
        {
            let mut outputs = paths
                .iter()
                .map(|p| create_log(p))
                .collect::<Result<Vec<_>>>()?;
            let mut input = open_log(&log)?;
            for row in 0..edges {
                if row % CANCEL_POLL_ROWS == 0 {
                    listener.check_canceled()?;
                }
                let pseudo = input.read_bit()?;
                let object = input.read(self.bit_length)?;
                let referrer = input.read(self.bit_length)?;
                let sub = sub_of[object as usize - start];
                let out = &mut outputs[sub];
                out.write_bit(pseudo)?;
                out.write(object, self.bit_length)?;
                out.write(referrer, self.bit_length)?;
                sub_edges[sub] += 1;
            }
            for out in outputs {
                out.finish()?;
            }
        }
        fs::remove_file(&log)?;

        for (path, count) in paths.iter().zip(sub_edges) {
            self.process_log(listener, sink, path, count)?;
        }
        Ok(())
    }

    fn process_log(
        &self,
        listener: &dyn ProgressListener,
        sink: &mut RunSink<'_>,
        path: &Path,
        edges: u64,
    ) -> Result<()> {
        if edges == 0 {
            remove_quietly(path);
            return Ok(());
        }
        let mut rows = Vec::with_capacity(edges as usize);
        {
            let mut input = open_log(path)?;
            for _ in 0..edges {
                let pseudo = input.read_bit()?;
                let object = input.read(self.bit_length)? as u32;
                let referrer = input.read(self.bit_length)? as u32;
                rows.push(Edge {
                    object,
                    ordinary: !pseudo,
                    referrer,
                });
            }
        }
        listener.check_canceled()?;
        fs::remove_file(path)?;

        rows.par_sort_unstable();

        let mut start = 0;
        while start < rows.len() {
            listener.check_canceled()?;
            let object = rows[start].object;
            let end = start + rows[start..].iter().take_while(|e| e.object == object).count();
            sink.emit(object as usize, &rows[start..end])?;
            start = end;
        }
        Ok(())
    }
}

impl Drop for InboundWriter {
    fn drop(&mut self) {
        // Logs still open here belong to a writer that was never flushed.
        if self.logs.iter().any(Option::is_some) {
            let _ = self.close_logs();
        }
    }
}

/// Writes per-object runs into the body and header.
struct RunSink<'a> {
    body: &'a mut PagedStreamer<i32, BufWriter<File>>,
    header: &'a mut HeaderArray,
    keys: &'a mut dyn KeyWriter,
    narrow_key_max: u64,
}

impl RunSink<'_> {
    /// `rows` are the sorted edges of one object.
    fn emit(&mut self, object: usize, rows: &[Edge]) -> Result<()> {
        let h = self.body.size() + 1;
        self.header.set(object, h)?;

        let split = rows.iter().take_while(|e| !e.ordinary).count();
        let (pseudo, ordinary) = rows.split_at(split);

        let mut pseudo_ids: Vec<u32> = pseudo.iter().map(|e| e.referrer).collect();
        pseudo_ids.dedup();
        for &id in &pseudo_ids {
            self.body.add(id as i32)?;
        }

        let mut last = None;
        for e in ordinary {
            if last == Some(e.referrer) {
                continue;
            }
            last = Some(e.referrer);
            if pseudo_ids.binary_search(&e.referrer).is_err() {
                self.body.add(e.referrer as i32)?;
            }
        }

        if !pseudo_ids.is_empty() {
            let len = pseudo_ids.len() as u32;
            let offset = h - 1;
            let key = if h > self.narrow_key_max {
                InboundKey::Wide { offset, len }
            } else {
                InboundKey::Narrow {
                    offset: offset as u32,
                    len,
                }
            };
            self.keys.store_key(object, key)?;
        }
        Ok(())
    }
}

// ── InboundReader ───────────────────────────────────────────────────

#[derive(Debug)]
pub struct InboundReader {
    inner: IntIndex1NSortedReader,
}

impl InboundReader {
    pub fn open(path: &Path, config: &IndexConfig) -> Result<Self> {
        Ok(Self {
            inner: IntIndex1NSortedReader::from_parts(open_parts(path, config)?),
        })
    }

    pub fn as_sorted(&self) -> &IntIndex1NSortedReader {
        &self.inner
    }
}

impl IndexReader for InboundReader {
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

impl One2ManyIndex for InboundReader {
    fn get(&self, index: usize) -> Result<Vec<i32>> {
        self.inner.get(index)
    }
}

impl One2ManyObjectsIndex for InboundReader {
    fn get_objects_of(&self, key: &InboundKey) -> Result<Vec<i32>> {
        self.inner.body().get_next(key.offset() as usize, key.len())
    }
}

// ── Tests ───────────────────────────────────────────────────────────
