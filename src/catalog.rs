//! Catalog of the named indices belonging to one open heap dump.
//!
//! Every role maps to exactly one reader type. Files are named
//! `<prefix><role>.index`.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::config::IndexConfig;
use crate::error::Result;
use crate::index::retained::RETAINED_LEGACY_FILE;
use crate::index::{
    InboundReader, IndexReader, IntIndex1NReader, IntIndex1NSortedReader, IntIndexReader,
    LongIndex, One2LongIndex, One2ManyIndex, One2ManyObjectsIndex, One2OneIndex, One2SizeIndex,
    RetainedSizeCache, SizeIndexReader,
};

// ── Roles ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum IndexRole {
    /// object -> referrers
    Inbound,
    /// object -> referenced objects
    Outbound,
    /// object -> class id
    O2Class,
    /// object -> address
    O2Address,
    /// array or variable-size object -> compressed size
    A2Size,
    /// object -> objects it dominates
    Dominated,
    /// object -> retained size
    O2Retained,
    /// object -> its dominator
    Dominator,
    /// class or loader -> cached retained size
    I2Retained,
}

impl IndexRole {
    pub const ALL: [IndexRole; 9] = [
        IndexRole::Inbound,
        IndexRole::Outbound,
        IndexRole::O2Class,
        IndexRole::O2Address,
        IndexRole::A2Size,
        IndexRole::Dominated,
        IndexRole::O2Retained,
        IndexRole::Dominator,
        IndexRole::I2Retained,
    ];

    pub fn filename(self) -> &'static str {
        match self {
            IndexRole::Inbound => "inbound",
            IndexRole::Outbound => "outbound",
            IndexRole::O2Class => "o2c",
            IndexRole::O2Address => "idx",
            IndexRole::A2Size => "a2s",
            IndexRole::Dominated => "domOut",
            IndexRole::O2Retained => "o2ret",
            IndexRole::Dominator => "domIn",
            IndexRole::I2Retained => "i2sv2",
        }
    }

    pub fn from_filename(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|r| r.filename() == name)
    }

    /// `<prefix><role>.index`
    pub fn file(self, prefix: &Path) -> PathBuf {
        let mut name = prefix.as_os_str().to_owned();
        name.push(self.filename());
        name.push(".index");
        PathBuf::from(name)
    }

    fn exists(self, prefix: &Path) -> bool {
        if self.file(prefix).exists() {
            return true;
        }
        if self == IndexRole::I2Retained {
            let mut legacy = prefix.as_os_str().to_owned();
            legacy.push(RETAINED_LEGACY_FILE);
            return Path::new(&legacy).exists();
        }
        false
    }

    /// Open the reader for this role from its file.
    pub fn open(self, prefix: &Path, config: &IndexConfig) -> Result<AnyIndex> {
        let path = self.file(prefix);
        Ok(match self {
            IndexRole::Inbound => AnyIndex::Inbound(InboundReader::open(&path, config)?),
            IndexRole::Outbound => AnyIndex::Outbound(IntIndex1NSortedReader::open(&path, config)?),
            IndexRole::O2Class => AnyIndex::O2Class(IntIndexReader::open(&path, config)?),
            IndexRole::O2Address => AnyIndex::O2Address(LongIndex::open(&path, config)?),
            IndexRole::A2Size => AnyIndex::A2Size(SizeIndexReader::open(&path, config)?),
            IndexRole::Dominated => AnyIndex::Dominated(IntIndex1NReader::open(&path, config)?),
            IndexRole::O2Retained => AnyIndex::O2Retained(LongIndex::open(&path, config)?),
            IndexRole::Dominator => AnyIndex::Dominator(IntIndexReader::open(&path, config)?),
            IndexRole::I2Retained => AnyIndex::RetainedCache(RetainedSizeCache::open_prefix(prefix)),
        })
    }
}

impl fmt::Display for IndexRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.filename())
    }
}

// ── AnyIndex ────────────────────────────────────────────────────────

/// A reader of whichever concrete type a role requires.
#[derive(Debug)]
pub enum AnyIndex {
    Inbound(InboundReader),
    Outbound(IntIndex1NSortedReader),
    O2Class(IntIndexReader),
    O2Address(LongIndex),
    A2Size(SizeIndexReader),
    Dominated(IntIndex1NReader),
    O2Retained(LongIndex),
    Dominator(IntIndexReader),
    RetainedCache(RetainedSizeCache),
}

impl AnyIndex {
    pub fn role(&self) -> IndexRole {
        match self {
            AnyIndex::Inbound(_) => IndexRole::Inbound,
            AnyIndex::Outbound(_) => IndexRole::Outbound,
            AnyIndex::O2Class(_) => IndexRole::O2Class,
            AnyIndex::O2Address(_) => IndexRole::O2Address,
            AnyIndex::A2Size(_) => IndexRole::A2Size,
            AnyIndex::Dominated(_) => IndexRole::Dominated,
            AnyIndex::O2Retained(_) => IndexRole::O2Retained,
            AnyIndex::Dominator(_) => IndexRole::Dominator,
            AnyIndex::RetainedCache(_) => IndexRole::I2Retained,
        }
    }

    pub fn as_reader(&self) -> &dyn IndexReader {
        match self {
            AnyIndex::Inbound(r) => r,
            AnyIndex::Outbound(r) => r,
            AnyIndex::O2Class(r) => r,
            AnyIndex::O2Address(r) => r,
            AnyIndex::A2Size(r) => r,
            AnyIndex::Dominated(r) => r,
            AnyIndex::O2Retained(r) => r,
            AnyIndex::Dominator(r) => r,
            AnyIndex::RetainedCache(r) => r,
        }
    }
}

// ── IndexManager ────────────────────────────────────────────────────

pub struct IndexManager {
    prefix: PathBuf,
    config: IndexConfig,
    readers: HashMap<IndexRole, AnyIndex>,
}

impl IndexManager {
    /// Empty catalog for `prefix`; readers are installed by the importer.
    pub fn new(prefix: &Path, config: &IndexConfig) -> Self {
        Self {
            prefix: prefix.to_path_buf(),
            config: config.clone(),
            readers: HashMap::new(),
        }
    }

    /// Open every role whose file exists and is not populated yet.
    ///
    /// Any failure is reported as an I/O error naming the role, so the
    /// caller can fall back to re-parsing the dump.
    pub fn init(&mut self) -> Result<()> {
        for role in IndexRole::ALL {
            if self.readers.contains_key(&role) || !role.exists(&self.prefix) {
                continue;
            }
            let reader = role
                .open(&self.prefix, &self.config)
                .map_err(|e| e.into_io(&format!("{} index", role)))?;
            tracing::debug!(role = %role, size = reader.as_reader().size(), "index opened");
            self.readers.insert(role, reader);
        }
        tracing::info!(
            prefix = %self.prefix.display(),
            indices = self.readers.len(),
            "index catalog ready"
        );
        Ok(())
    }

    /// Shorthand for `new` followed by `init`.
    pub fn open(prefix: &Path, config: &IndexConfig) -> Result<Self> {
        let mut manager = Self::new(prefix, config);
        manager.init()?;
        Ok(manager)
    }

    pub fn prefix(&self) -> &Path {
        &self.prefix
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    /// Install a reader under its own role, returning the one it replaces.
    pub fn set_reader(&mut self, reader: AnyIndex) -> Option<AnyIndex> {
        self.readers.insert(reader.role(), reader)
    }

    pub fn reader(&self, role: IndexRole) -> Option<&AnyIndex> {
        self.readers.get(&role)
    }

    pub fn take_reader(&mut self, role: IndexRole) -> Option<AnyIndex> {
        self.readers.remove(&role)
    }

    pub fn roles(&self) -> Vec<IndexRole> {
        let mut roles: Vec<IndexRole> = self.readers.keys().copied().collect();
        roles.sort();
        roles
    }

    // ── Typed accessors ─────────────────────────────────────────────

    pub fn inbound(&self) -> Option<&dyn One2ManyObjectsIndex> {
        match self.reader(IndexRole::Inbound)? {
            AnyIndex::Inbound(r) => Some(r),
            _ => None,
        }
    }

    pub fn outbound(&self) -> Option<&dyn One2ManyIndex> {
        match self.reader(IndexRole::Outbound)? {
            AnyIndex::Outbound(r) => Some(r),
            _ => None,
        }
    }

    pub fn o2class(&self) -> Option<&dyn One2OneIndex> {
        match self.reader(IndexRole::O2Class)? {
            AnyIndex::O2Class(r) => Some(r),
            _ => None,
        }
    }

    /// Objects of a class, looked up by the key stored with the class.
    pub fn c2objects(&self) -> Option<&dyn One2ManyObjectsIndex> {
        self.inbound()
    }

    pub fn o2address(&self) -> Option<&dyn One2LongIndex> {
        match self.reader(IndexRole::O2Address)? {
            AnyIndex::O2Address(r) => Some(r),
            _ => None,
        }
    }

    pub fn a2size(&self) -> Option<&dyn One2SizeIndex> {
        match self.reader(IndexRole::A2Size)? {
            AnyIndex::A2Size(r) => Some(r),
            _ => None,
        }
    }

    pub fn dominated(&self) -> Option<&dyn One2ManyIndex> {
        match self.reader(IndexRole::Dominated)? {
            AnyIndex::Dominated(r) => Some(r),
            _ => None,
        }
    }

    pub fn o2retained(&self) -> Option<&dyn One2LongIndex> {
        match self.reader(IndexRole::O2Retained)? {
            AnyIndex::O2Retained(r) => Some(r),
            _ => None,
        }
    }

    pub fn dominator(&self) -> Option<&dyn One2OneIndex> {
        match self.reader(IndexRole::Dominator)? {
            AnyIndex::Dominator(r) => Some(r),
            _ => None,
        }
    }

    pub fn retained_size_cache(&self) -> Option<&RetainedSizeCache> {
        match self.reader(IndexRole::I2Retained)? {
            AnyIndex::RetainedCache(r) => Some(r),
            _ => None,
        }
    }

    // ── Lifecycle ───────────────────────────────────────────────────

    /// Drop the page caches of every reader.
    pub fn unload_all(&self) {
        for reader in self.readers.values() {
            reader.as_reader().unload();
        }
    }

    /// Release every file handle. Readers stay installed and reopen on use.
    pub fn close(&self) {
        for role in self.roles() {
            if let Some(reader) = self.readers.get(&role) {
                reader.as_reader().close();
            }
        }
        tracing::debug!(prefix = %self.prefix.display(), "index catalog closed");
    }

    /// Remove every index file and empty the catalog. All roles are visited
    /// even if one fails; the first error is returned.
    pub fn delete(&mut self) -> Result<()> {
        let mut first_error = None;
        for (role, reader) in self.readers.drain() {
            if let Err(e) = reader.as_reader().delete() {
                tracing::warn!("failed to delete {} index: {}", role, e);
                first_error.get_or_insert(e);
            }
        }
        tracing::info!(prefix = %self.prefix.display(), "index files deleted");
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────
