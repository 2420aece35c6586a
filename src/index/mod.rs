//! Paged compressed indices over object ids.
//!
//! Writers stream values into immutable files during import; readers give
//! random access through a bounded page cache. Downstream code sees readers
//! only through the traits below.

pub mod collector;
pub mod format;
pub mod inbound;
pub mod mapped;
pub mod one_to_many;
pub mod one_to_one;
pub mod page_cache;
pub mod reader;
pub mod retained;
pub mod source;
pub mod streamer;

pub use collector::{
    Identifier, IntIndexCollector, IntIndexCollectorUncompressed, LongIndexCollector,
    LongIndexCollectorUncompressed, SizeIndexCollectorUncompressed,
};
pub use inbound::{InboundKey, InboundReader, InboundWriter, KeyWriter};
pub use mapped::MappedArray;
pub use one_to_many::{
    IntArray1NSortedWriter, IntArray1NUncompressedCollector, IntArray1NWriter, IntIndex1NReader,
    IntIndex1NSortedReader, LongArray1NWriter, LongIndex1NReader,
};
pub use one_to_one::{compress_size, expand_size, LongIndex, SizeIndexReader};
pub use reader::{IntIndexReader, LongIndexReader, PagedReader, PositionIndexReader};
pub use retained::RetainedSizeCache;
pub use streamer::{IntIndexStreamer, LongIndexStreamer, PagedStreamer, StreamEnd};

use crate::error::Result;

// ── Reader traits ───────────────────────────────────────────────────

/// Lifecycle shared by every index reader.
pub trait IndexReader: Send + Sync {
    /// Number of keys.
    fn size(&self) -> usize;

    /// Drop cached pages; the file stays open.
    fn unload(&self);

    /// Release the file handle. A later read reopens it.
    fn close(&self);

    /// Close and remove the backing file.
    fn delete(&self) -> Result<()>;
}

/// int -> int
pub trait One2OneIndex: IndexReader {
    fn get(&self, index: usize) -> Result<i32>;

    fn get_all(&self, indices: &[usize]) -> Result<Vec<i32>>;

    fn get_next(&self, index: usize, len: usize) -> Result<Vec<i32>>;
}

/// int -> size, stored compressed in 32 bits.
pub trait One2SizeIndex: One2OneIndex {
    fn get_size(&self, index: usize) -> Result<i64>;
}

/// int -> long, ascending when used for address lookup.
pub trait One2LongIndex: IndexReader {
    fn get(&self, index: usize) -> Result<i64>;

    fn get_next(&self, index: usize, len: usize) -> Result<Vec<i64>>;

    /// Position of `value`, or `-(insertion point) - 1` when absent.
    fn reverse(&self, value: i64) -> Result<i64>;
}

/// int -> int[]
pub trait One2ManyIndex: IndexReader {
    fn get(&self, index: usize) -> Result<Vec<i32>>;
}

/// Inbound references, plus lookup of the objects behind a stored key.
pub trait One2ManyObjectsIndex: One2ManyIndex {
    fn get_objects_of(&self, key: &InboundKey) -> Result<Vec<i32>>;
}

/// int -> long[]
pub trait One2ManyLongIndex: IndexReader {
    fn get(&self, index: usize) -> Result<Vec<i64>>;
}

// ── Plain paged readers ─────────────────────────────────────────────

impl IndexReader for PagedReader<i32> {
    fn size(&self) -> usize {
        PagedReader::size(self)
    }

    fn unload(&self) {
        PagedReader::unload(self)
    }

    fn close(&self) {
        PagedReader::close(self)
    }

    fn delete(&self) -> Result<()> {
        PagedReader::delete(self)
    }
}

impl One2OneIndex for PagedReader<i32> {
    fn get(&self, index: usize) -> Result<i32> {
        PagedReader::get(self, index)
    }

    fn get_all(&self, indices: &[usize]) -> Result<Vec<i32>> {
        PagedReader::get_all(self, indices)
    }

    fn get_next(&self, index: usize, len: usize) -> Result<Vec<i32>> {
        PagedReader::get_next(self, index, len)
    }
}
