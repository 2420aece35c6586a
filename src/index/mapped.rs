//! Fixed-width arrays backed by a growable memory-mapped file.
//!
//! The logical array is split into windows of `mapped_window_bytes`, each
//! mapped on first touch, so the total size is not bound by what a single
//! mapping can address. The file grows in `mapped_extend_bytes` steps.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use memmap2::{MmapMut, MmapOptions};
use parking_lot::Mutex;

use crate::config::IndexConfig;
use crate::error::{IndexError, Result};
use crate::index::IndexReader;

/// Element stored in a [`MappedArray`].
pub trait MappedElement: Copy + Default + Send + Sync + 'static {
    const BYTES: usize;

    fn read(bytes: &[u8]) -> Self;

    fn write(self, bytes: &mut [u8]);
}

impl MappedElement for i32 {
    const BYTES: usize = 4;

    fn read(bytes: &[u8]) -> Self {
        i32::from_le_bytes(bytes[..4].try_into().unwrap())
    }

    fn write(self, bytes: &mut [u8]) {
        bytes[..4].copy_from_slice(&self.to_le_bytes());
    }
}

impl MappedElement for i64 {
    const BYTES: usize = 8;

    fn read(bytes: &[u8]) -> Self {
        i64::from_le_bytes(bytes[..8].try_into().unwrap())
    }

    fn write(self, bytes: &mut [u8]) {
        bytes[..8].copy_from_slice(&self.to_le_bytes());
    }
}

static SCRATCH_SEQ: AtomicU64 = AtomicU64::new(0);

fn scratch_path() -> PathBuf {
    let seq = SCRATCH_SEQ.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir().join(format!("heapdex-{}-{}.array", std::process::id(), seq))
}

struct Inner {
    file: Option<File>,
    file_len: u64,
    windows: Vec<Option<MmapMut>>,
    /// Highest touched index + 1. A reopened file only knows its byte
    /// length, so this starts at the slot count the file covers, growth
    /// padding included.
    len: usize,
}

pub struct MappedArray<T: MappedElement> {
    path: PathBuf,
    scratch: bool,
    window_bytes: u64,
    extend_bytes: u64,
    max_capacity: usize,
    inner: Mutex<Inner>,
    _marker: std::marker::PhantomData<T>,
}

impl<T: MappedElement> MappedArray<T> {
    /// Open or create the backing file. `None` uses a scratch file that is
    /// removed on close.
    pub fn new(path: Option<&Path>, max_capacity: usize, config: &IndexConfig) -> Result<Self> {
        config.validate()?;
        if config.mapped_window_bytes % T::BYTES as u64 != 0 {
            return Err(IndexError::Config(format!(
                "mapped_window_bytes {} is not a multiple of the {}-byte element",
                config.mapped_window_bytes,
                T::BYTES
            )));
        }
        let (path, scratch) = match path {
            Some(p) => (p.to_path_buf(), false),
            None => (scratch_path(), true),
        };
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(scratch)
            .open(&path)?;
        let file_len = file.metadata()?.len();
        let window_bytes = config.mapped_window_bytes;
        tracing::debug!(path = %path.display(), scratch, file_len, "mapped array opened");
        Ok(Self {
            path,
            scratch,
            window_bytes,
            extend_bytes: config.mapped_extend_bytes.max(T::BYTES as u64),
            max_capacity,
            inner: Mutex::new(Inner {
                file: Some(file),
                file_len,
                windows: Vec::new(),
                len: (file_len / T::BYTES as u64) as usize,
            }),
            _marker: std::marker::PhantomData,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn max_capacity(&self) -> usize {
        self.max_capacity
    }

    /// Highest index written through this handle + 1, or, for a reopened
    /// file, at least the number of slots the file covers (padding from
    /// growth steps included).
    pub fn len(&self) -> usize {
        self.inner.lock().len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of windows currently mapped.
    pub fn mapped_windows(&self) -> usize {
        self.inner.lock().windows.iter().filter(|w| w.is_some()).count()
    }

    fn check_capacity(&self, index: usize) -> Result<()> {
        if index >= self.max_capacity {
            return Err(IndexError::CapacityExceeded {
                attempted: index as u64 + 1,
                max: self.max_capacity as u64,
            });
        }
        Ok(())
    }

    fn locate(&self, index: usize) -> (usize, usize) {
        let byte = index as u64 * T::BYTES as u64;
        (
            (byte / self.window_bytes) as usize,
            (byte % self.window_bytes) as usize,
        )
    }

    /// Value at `index`; untouched slots read as zero.
    pub fn get(&self, index: usize) -> Result<T> {
        self.check_capacity(index)?;
        let mut inner = self.inner.lock();
        if inner.file.is_none() {
            return Err(IndexError::Closed);
        }
        let end = (index as u64 + 1) * T::BYTES as u64;
        if end > inner.file_len {
            return Ok(T::default());
        }
        let (window, offset) = self.locate(index);
        let map = self.window(&mut inner, window)?;
        Ok(T::read(&map[offset..offset + T::BYTES]))
    }

    pub fn set(&self, index: usize, value: T) -> Result<()> {
        self.check_capacity(index)?;
        let mut inner = self.inner.lock();
        if inner.file.is_none() {
            return Err(IndexError::Closed);
        }
        let end = (index as u64 + 1) * T::BYTES as u64;
        if end > inner.file_len {
            let grown = end.div_ceil(self.extend_bytes) * self.extend_bytes;
            if let Some(file) = inner.file.as_ref() {
                file.set_len(grown)?;
            }
            inner.file_len = grown;
        }
        let (window, offset) = self.locate(index);
        let map = self.window(&mut inner, window)?;
        value.write(&mut map[offset..offset + T::BYTES]);
        inner.len = inner.len.max(index + 1);
        Ok(())
    }

    /// Mapping of `window`, created or remapped to cover the current file.
    fn window<'a>(&self, inner: &'a mut Inner, window: usize) -> Result<&'a mut MmapMut> {
        let start = window as u64 * self.window_bytes;
        let want = (inner.file_len - start).min(self.window_bytes) as usize;
        if inner.windows.len() <= window {
            inner.windows.resize_with(window + 1, || None);
        }
        let stale = inner.windows[window]
            .as_ref()
            .map_or(true, |m| m.len() < want);
        if stale {
            let file = inner.file.as_ref().ok_or(IndexError::Closed)?;
            // SAFETY: the file is private to this array and only grows while
            // mapped.
            let map = unsafe { MmapOptions::new().offset(start).len(want).map_mut(file)? };
            inner.windows[window] = Some(map);
        }
        inner.windows[window].as_mut().ok_or(IndexError::Closed)
    }

    /// Flush every mapped window to the file.
    pub fn flush(&self) -> Result<()> {
        let inner = self.inner.lock();
        for map in inner.windows.iter().flatten() {
            map.flush()?;
        }
        Ok(())
    }

    fn release(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        let mut result = Ok(());
        for map in inner.windows.drain(..).flatten() {
            if let Err(e) = map.flush() {
                result = Err(e.into());
            }
        }
        inner.file = None;
        result
    }

    fn remove_file(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

impl<T: MappedElement> IndexReader for MappedArray<T> {
    fn size(&self) -> usize {
        self.len()
    }

    /// Drops the window mappings; the file stays open.
    fn unload(&self) {
        let mut inner = self.inner.lock();
        for map in inner.windows.drain(..).flatten() {
            if let Err(e) = map.flush() {
                tracing::warn!("flushing {} failed: {}", self.path.display(), e);
            }
        }
    }

    fn close(&self) {
        if let Err(e) = self.release() {
            tracing::warn!("closing {} failed: {}", self.path.display(), e);
        }
        if self.scratch {
            if let Err(e) = self.remove_file() {
                tracing::warn!("removing scratch array {} failed: {}", self.path.display(), e);
            }
        }
    }

    fn delete(&self) -> Result<()> {
        self.release()?;
        self.remove_file()
    }
}

impl<T: MappedElement> Drop for MappedArray<T> {
    fn drop(&mut self) {
        if self.scratch {
            let _ = self.release();
            let _ = self.remove_file();
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn small() -> IndexConfig {
        IndexConfig {
            mapped_window_bytes: 64 * 1024,
            mapped_extend_bytes: 16 * 1024,
            ..IndexConfig::default()
        }
    }

    #[test]
    fn test_spans_several_windows() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("retained.array");
        let array = MappedArray::<i64>::new(Some(&path), 1 << 20, &small()).unwrap();
        // 8192 longs per window
        let indices = [0usize, 8191, 8192, 20_000, 50_000];
        for &i in &indices {
            array.set(i, i as i64 * 3 - 7).unwrap();
        }
        assert!(array.mapped_windows() >= 3);
        for &i in &indices {
            assert_eq!(array.get(i).unwrap(), i as i64 * 3 - 7);
        }
        assert_eq!(array.get(1).unwrap(), 0);
        assert_eq!(array.len(), 50_001);
        assert_eq!(std::fs::metadata(&path).unwrap().len() % (16 * 1024), 0);
    }

    #[test]
    fn test_window_remapped_after_growth() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("grow.array");
        let array = MappedArray::<i32>::new(Some(&path), 1 << 20, &small()).unwrap();
        array.set(0, 1).unwrap();
        // second extend step lands in the same window
        array.set(5000, 2).unwrap();
        assert_eq!(array.get(0).unwrap(), 1);
        assert_eq!(array.get(5000).unwrap(), 2);
    }

    #[test]
    fn test_unload_keeps_values() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("u.array");
        let array = MappedArray::<i32>::new(Some(&path), 100_000, &small()).unwrap();
        array.set(42, -9).unwrap();
        array.unload();
        assert_eq!(array.mapped_windows(), 0);
        assert_eq!(array.get(42).unwrap(), -9);
    }

    #[test]
    fn test_close_and_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("c.array");
        {
            let array = MappedArray::<i64>::new(Some(&path), 1000, &small()).unwrap();
            array.set(999, 1 << 50).unwrap();
            assert_eq!(array.len(), 1000);
            array.close();
            assert!(matches!(array.get(999), Err(IndexError::Closed)));
        }
        let array = MappedArray::<i64>::new(Some(&path), 1000, &small()).unwrap();
        assert_eq!(array.get(999).unwrap(), 1 << 50);
        // one 16 KiB growth step of longs
        assert_eq!(array.len(), 2048);
        array.delete().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_invalid_window_rejected() {
        let zero = IndexConfig {
            mapped_window_bytes: 0,
            ..small()
        };
        assert!(matches!(
            MappedArray::<i32>::new(None, 10, &zero),
            Err(IndexError::Config(_))
        ));

        let unaligned = IndexConfig {
            mapped_window_bytes: 64 * 1024 + 4,
            ..small()
        };
        assert!(matches!(
            MappedArray::<i64>::new(None, 10, &unaligned),
            Err(IndexError::Config(_))
        ));
    }

    #[test]
    fn test_capacity_exceeded() {
        let array = MappedArray::<i32>::new(None, 10, &small()).unwrap();
        assert!(matches!(
            array.set(10, 1),
            Err(IndexError::CapacityExceeded { attempted: 11, max: 10 })
        ));
        assert!(array.get(10).is_err());
    }

    #[test]
    fn test_scratch_file_removed() {
        let array = MappedArray::<i32>::new(None, 100, &small()).unwrap();
        array.set(3, 3).unwrap();
        let path = array.path().to_path_buf();
        assert!(path.exists());
        drop(array);
        assert!(!path.exists());
    }
}
