//! Persistent cache of retained sizes computed on demand per class.
//!
//! The file is a flat sequence of `(key: i32, value: i64)` little-endian
//! records. A legacy variant stores not-yet-exact values as negatives
//! offset from `i64::MIN`; those are converted on load.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::error::{IndexError, Result};
use crate::index::IndexReader;

const RECORD_LEN: usize = 12;

/// File name suffix of the current format.
pub const RETAINED_FILE: &str = "i2sv2.index";
/// File name suffix of the legacy format.
pub const RETAINED_LEGACY_FILE: &str = "i2s.index";

#[derive(Debug, Default)]
struct State {
    values: HashMap<i32, i64>,
    dirty: bool,
}

#[derive(Debug)]
pub struct RetainedSizeCache {
    path: PathBuf,
    state: Mutex<State>,
}

fn with_suffix(prefix: &Path, suffix: &str) -> PathBuf {
    let mut name = prefix.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

impl RetainedSizeCache {
    /// Open the cache belonging to a snapshot prefix. Falls back to the
    /// legacy file when only that exists; the result is saved in the current
    /// format.
    pub fn open_prefix(prefix: &Path) -> Self {
        let path = with_suffix(prefix, RETAINED_FILE);
        if path.exists() {
            return Self::open(&path);
        }
        let legacy = with_suffix(prefix, RETAINED_LEGACY_FILE);
        let mut values = HashMap::new();
        if legacy.exists() {
            match read_records(&legacy) {
                Ok(records) => {
                    for (key, value) in records {
                        values.insert(key, from_legacy(value));
                    }
                    tracing::debug!(entries = values.len(), "converted legacy retained size cache");
                }
                Err(e) => tracing::warn!(
                    "ignoring unreadable legacy retained size cache {}: {}",
                    legacy.display(),
                    e
                ),
            }
        }
        let dirty = !values.is_empty();
        Self {
            path,
            state: Mutex::new(State { values, dirty }),
        }
    }

    /// Open `path`, starting empty if it is missing. A corrupt file is
    /// discarded.
    pub fn open(path: &Path) -> Self {
        let values = if path.exists() {
            match read_records(path) {
                Ok(records) => records.into_iter().collect(),
                Err(e) => {
                    tracing::warn!(
                        "discarding corrupt retained size cache {}: {}",
                        path.display(),
                        e
                    );
                    if let Err(e) = fs::remove_file(path) {
                        tracing::warn!("failed to remove {}: {}", path.display(), e);
                    }
                    HashMap::new()
                }
            }
        } else {
            HashMap::new()
        };
        Self {
            path: path.to_path_buf(),
            state: Mutex::new(State {
                values,
                dirty: false,
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Cached value, or 0 when unknown.
    pub fn get(&self, key: i32) -> i64 {
        self.state.lock().values.get(&key).copied().unwrap_or(0)
    }

    pub fn contains(&self, key: i32) -> bool {
        self.state.lock().values.contains_key(&key)
    }

    pub fn put(&self, key: i32, value: i64) {
        let mut state = self.state.lock();
        state.values.insert(key, value);
        state.dirty = true;
    }

    pub fn len(&self) -> usize {
        self.state.lock().values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Write the cache if it changed since the last save.
    pub fn save(&self) -> Result<()> {
        let mut state = self.state.lock();
        if !state.dirty {
            return Ok(());
        }
        let mut keys: Vec<i32> = state.values.keys().copied().collect();
        keys.sort_unstable();
        let mut out = BufWriter::new(File::create(&self.path)?);
        for key in keys {
            out.write_all(&key.to_le_bytes())?;
            out.write_all(&state.values[&key].to_le_bytes())?;
        }
        out.flush()?;
        state.dirty = false;
        Ok(())
    }

    fn save_logged(&self) {
        if let Err(e) = self.save() {
            tracing::warn!(
                "failed to write retained size cache {}: {}",
                self.path.display(),
                e
            );
        }
    }
}

fn read_records(path: &Path) -> Result<Vec<(i32, i64)>> {
    let mut bytes = Vec::new();
    BufReader::new(File::open(path)?).read_to_end(&mut bytes)?;
    if bytes.len() % RECORD_LEN != 0 {
        return Err(IndexError::InvalidFormat(format!(
            "{} bytes is not a whole number of records",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(RECORD_LEN)
        .map(|r| {
            let key = i32::from_le_bytes(r[..4].try_into().unwrap());
            let value = i64::from_le_bytes(r[4..].try_into().unwrap());
            (key, value)
        })
        .collect())
}

/// Legacy files mark approximate values by storing them below zero.
fn from_legacy(value: i64) -> i64 {
    if value < 0 {
        -(value - (i64::MIN + 1))
    } else {
        value
    }
}

impl IndexReader for RetainedSizeCache {
    fn size(&self) -> usize {
        self.len()
    }

    fn unload(&self) {
        self.save_logged();
    }

    fn close(&self) {
        self.save_logged();
    }

    fn delete(&self) -> Result<()> {
        {
            let mut state = self.state.lock();
            state.values.clear();
            state.dirty = false;
        }
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_put_close_reopen() {
        let dir = TempDir::new().unwrap();
        let prefix = dir.path().join("dump.");
        let cache = RetainedSizeCache::open_prefix(&prefix);
        assert_eq!(cache.get(7), 0);
        cache.put(7, 4096);
        cache.put(-3, 1 << 40);
        cache.close();

        let reopened = RetainedSizeCache::open_prefix(&prefix);
        assert_eq!(reopened.get(7), 4096);
        assert_eq!(reopened.get(-3), 1 << 40);
        assert_eq!(reopened.size(), 2);
        assert_eq!(fs::metadata(reopened.path()).unwrap().len(), 24);
    }

    #[test]
    fn test_clean_cache_not_rewritten() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("x.i2sv2.index");
        let cache = RetainedSizeCache::open(&path);
        cache.close();
        assert!(!path.exists());
    }

    #[test]
    fn test_corrupt_file_discarded() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("x.i2sv2.index");
        fs::write(&path, [1u8, 2, 3, 4, 5]).unwrap();
        let cache = RetainedSizeCache::open(&path);
        assert!(cache.is_empty());
        assert!(!path.exists());
    }

    #[test]
    fn test_legacy_values_converted() {
        let dir = TempDir::new().unwrap();
        let prefix = dir.path().join("dump.");
        let mut bytes = Vec::new();
        for (key, value) in [(1i32, 500i64), (2, -800), (3, 0)] {
            bytes.extend_from_slice(&key.to_le_bytes());
            bytes.extend_from_slice(&value.to_le_bytes());
        }
        fs::write(with_suffix(&prefix, RETAINED_LEGACY_FILE), bytes).unwrap();

        let cache = RetainedSizeCache::open_prefix(&prefix);
        assert_eq!(cache.get(1), 500);
        assert_eq!(cache.get(2), i64::MIN + 801);
        assert!(cache.contains(3));
        assert_eq!(cache.get(3), 0);
        cache.close();
        assert!(with_suffix(&prefix, RETAINED_FILE).exists());

        let reopened = RetainedSizeCache::open_prefix(&prefix);
        assert_eq!(reopened.get(1), 500);
        assert_eq!(reopened.get(2), i64::MIN + 801);
    }

    #[test]
    fn test_delete_removes_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("x.i2sv2.index");
        let cache = RetainedSizeCache::open(&path);
        cache.put(1, 2);
        cache.unload();
        assert!(path.exists());
        cache.delete().unwrap();
        assert!(!path.exists());
        assert_eq!(cache.get(1), 0);
    }
}
