//! Page codec and bit streams.

pub mod bits;
pub mod compressed;

pub use bits::{BitReader, BitWriter};
pub use compressed::{
    bits_for, AnyPage, CompressedPage, PackedValue, PageElement, PageKind, PAGE_HEADER_LEN,
};
