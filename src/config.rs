//! Index engine configuration.
//!
//! Every size threshold the on-disk formats depend on lives here so that the
//! boundaries (huge trailer encoding, wide headers, wide inbound keys, bucket
//! splitting) can be exercised with small data sets.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{IndexError, Result};
use crate::resource::{CacheBudget, SystemResources};

// ── Defaults ────────────────────────────────────────────────────────

/// Elements per page of a 32-bit index.
pub const PAGE_SIZE_INT: usize = 1_000_000;

/// Elements per page of a 64-bit index.
pub const PAGE_SIZE_LONG: usize = 500_000;

/// Largest element count written with the plain trailer encoding.
pub const PLAIN_SIZE_MAX: u64 = i32::MAX as u64;

/// Largest header position that fits the narrow (32-bit) header.
pub const HEADER_NARROW_MAX: u64 = 0xffff_ffff;

/// Largest inbound body offset handed out as a narrow key.
pub const INBOUND_NARROW_KEY_MAX: u64 = i32::MAX as u64;

/// Object ids covered by one inbound bucket (target).
pub const INBOUND_BUCKET_IDS: usize = 500_000;

/// Edges a single inbound bucket may hold before it is split.
pub const INBOUND_SUB_BUCKET_EDGES: usize = INBOUND_BUCKET_IDS * 16;

/// Mapping granularity required by mmap offsets.
pub const MAP_ALIGNMENT: u64 = 64 * 1024;

// ── IndexConfig ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    pub page_size_int: usize,
    pub page_size_long: usize,
    /// Element counts above this switch the trailer to the huge encoding.
    pub plain_size_max: u64,
    /// One-to-many header positions above this promote the header to 40 bits.
    pub header_narrow_max: u64,
    /// Inbound offsets above this produce wide keys.
    pub inbound_narrow_key_max: u64,
    pub inbound_bucket_ids: usize,
    pub inbound_sub_bucket_edges: usize,
    /// Bounded channel depth between pipeline stages.
    pub pipeline_depth: usize,
    /// Decoded pages kept per reader.
    pub cache_pages: usize,
    pub cache_shards: usize,
    /// Bytes addressed by one mapped window.
    pub mapped_window_bytes: u64,
    /// Increment by which a mapped array file grows.
    pub mapped_extend_bytes: u64,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            page_size_int: PAGE_SIZE_INT,
            page_size_long: PAGE_SIZE_LONG,
            plain_size_max: PLAIN_SIZE_MAX,
            header_narrow_max: HEADER_NARROW_MAX,
            inbound_narrow_key_max: INBOUND_NARROW_KEY_MAX,
            inbound_bucket_ids: INBOUND_BUCKET_IDS,
            inbound_sub_bucket_edges: INBOUND_SUB_BUCKET_EDGES,
            pipeline_depth: 2,
            cache_pages: CacheBudget::default().pages_per_reader,
            cache_shards: 8,
            mapped_window_bytes: 1 << 30,
            mapped_extend_bytes: 64 << 20,
        }
    }
}

impl IndexConfig {
    /// Defaults with the page cache sized from the host's available memory.
    pub fn auto_tune() -> Self {
        let budget = CacheBudget::from_resources(&SystemResources::detect());
        Self {
            cache_pages: budget.pages_per_reader,
            ..Self::default()
        }
    }

    /// Load a config from a JSON file. Missing fields take their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        let config: IndexConfig = serde_json::from_slice(&bytes)?;
        config.validate()?;
        Ok(config)
    }

    /// Shrink every format threshold by `2^shift`, keeping them at least 1.
    ///
    /// Used by tests to hit huge-index, wide-header and bucket-split paths
    /// without gigabytes of input.
    pub fn scaled_down(shift: u32) -> Self {
        let d = Self::default();
        let s = |v: u64| (v >> shift).max(1);
        Self {
            page_size_int: s(d.page_size_int as u64) as usize,
            page_size_long: s(d.page_size_long as u64) as usize,
            plain_size_max: s(d.plain_size_max),
            header_narrow_max: s(d.header_narrow_max),
            inbound_narrow_key_max: s(d.inbound_narrow_key_max),
            inbound_bucket_ids: s(d.inbound_bucket_ids as u64) as usize,
            inbound_sub_bucket_edges: s(d.inbound_sub_bucket_edges as u64) as usize,
            ..d
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.page_size_int == 0 || self.page_size_long == 0 {
            return Err(IndexError::Config("page size must be positive".into()));
        }
        if self.page_size_int > i32::MAX as usize || self.page_size_long > i32::MAX as usize {
            return Err(IndexError::Config("page size must fit in i32".into()));
        }
        if self.plain_size_max > i32::MAX as u64 {
            return Err(IndexError::Config(format!(
                "plain_size_max {} does not fit the trailer count field",
                self.plain_size_max
            )));
        }
        if self.header_narrow_max > u32::MAX as u64 {
            return Err(IndexError::Config(format!(
                "header_narrow_max {} does not fit a 32-bit header",
                self.header_narrow_max
            )));
        }
        if self.inbound_narrow_key_max > u32::MAX as u64 {
            return Err(IndexError::Config(format!(
                "inbound_narrow_key_max {} does not fit a narrow key",
                self.inbound_narrow_key_max
            )));
        }
        if self.inbound_bucket_ids == 0 || self.inbound_sub_bucket_edges == 0 {
            return Err(IndexError::Config("inbound bucket sizes must be positive".into()));
        }
        if self.pipeline_depth == 0 || self.cache_pages == 0 || self.cache_shards == 0 {
            return Err(IndexError::Config(
                "pipeline depth and cache sizes must be positive".into(),
            ));
        }
        if self.mapped_window_bytes == 0 || self.mapped_window_bytes % MAP_ALIGNMENT != 0 {
            return Err(IndexError::Config(format!(
                "mapped_window_bytes must be a positive multiple of {}",
                MAP_ALIGNMENT
            )));
        }
        if self.mapped_extend_bytes == 0 {
            return Err(IndexError::Config("mapped_extend_bytes must be positive".into()));
        }
        Ok(())
    }
}

// ── Tests ───────────────────────────────────────────────────────────
