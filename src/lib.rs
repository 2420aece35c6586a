//! heapdex - paged compressed index storage for heap-dump object graphs.
//!
//! Object graphs with hundreds of millions of objects are persisted as
//! integer-keyed indices: one value per object (class, address, size,
//! dominator) or a list per object (outbound and inbound references,
//! dominated objects). Values are stored in independently compressed pages
//! and read back through a bounded page cache.

pub mod cancel;
pub mod catalog;
pub mod codec;
pub mod config;
pub mod error;
pub mod index;
pub mod resource;

pub use cancel::{CancelFlag, ProgressListener, Silent};
pub use catalog::{AnyIndex, IndexManager, IndexRole};
pub use config::IndexConfig;
pub use error::{IndexError, Result};
pub use index::{
    IndexReader, One2LongIndex, One2ManyIndex, One2ManyLongIndex, One2ManyObjectsIndex,
    One2OneIndex, One2SizeIndex,
};
