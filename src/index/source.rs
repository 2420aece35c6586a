//! Shared memory-mapped handle to an index file.
//!
//! Several readers may sit on one file (the header and body of a one-to-many
//! index). Closing drops the mapping; the next read maps the file again.

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use memmap2::Mmap;
use parking_lot::RwLock;

use crate::error::Result;

#[derive(Debug)]
pub struct IndexFile {
    path: PathBuf,
    map: RwLock<Option<Arc<Mmap>>>,
}

impl IndexFile {
    pub fn open(path: &Path) -> Result<Arc<Self>> {
        let file = Self {
            path: path.to_path_buf(),
            map: RwLock::new(None),
        };
        file.data()?;
        Ok(Arc::new(file))
    }

    fn map_file(path: &Path) -> Result<Mmap> {
        let file = File::open(path)?;
        // SAFETY: index files are immutable once their writer has flushed.
        let mmap = unsafe { Mmap::map(&file)? };
        #[cfg(unix)]
        {
            let _ = mmap.advise(memmap2::Advice::Random);
        }
        Ok(mmap)
    }

    /// Current mapping, reopening the file if it was closed.
    pub fn data(&self) -> Result<Arc<Mmap>> {
        if let Some(map) = self.map.read().as_ref() {
            return Ok(Arc::clone(map));
        }
        let mut slot = self.map.write();
        if let Some(map) = slot.as_ref() {
            return Ok(Arc::clone(map));
        }
        let map = Arc::new(Self::map_file(&self.path)?);
        *slot = Some(Arc::clone(&map));
        Ok(map)
    }

    pub fn len(&self) -> Result<u64> {
        Ok(self.data()?.len() as u64)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    pub fn is_open(&self) -> bool {
        self.map.read().is_some()
    }

    pub fn close(&self) {
        self.map.write().take();
    }

    /// Close and remove the file. A file that is already gone is not an error.
    pub fn delete(&self) -> Result<()> {
        self.close();
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
