//! Fixed-bit compressed pages.
//!
//! A page stores `count` values as `value - base` deltas with the common
//! trailing zero bits removed, each packed into `width` bits. Random access
//! to any element is O(1).
//!
//! # Blob layout
//!
//! ```text
//! Offset  Size  Field
//! 0       1     kind: 0 = narrow (i32), 1 = wide (i64)
//! 1       1     width: bits per element (0..=64)
//! 2       1     shift: trailing zero bits removed from each delta
//! 3       1     reserved
//! 4       4     count: u32
//! 8       8     base: i64
//! 16      8*W   packed words, u64 little-endian
//! ```

use std::fmt::Debug;
use std::marker::PhantomData;

use crate::error::{IndexError, Result};

pub const PAGE_HEADER_LEN: usize = 16;

// ── Element kinds ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PageKind {
    Narrow = 0,
    Wide = 1,
}

impl PageKind {
    pub fn from_byte(b: u8) -> Result<Self> {
        match b {
            0 => Ok(PageKind::Narrow),
            1 => Ok(PageKind::Wide),
            other => Err(IndexError::InvalidFormat(format!(
                "unknown page kind {}",
                other
            ))),
        }
    }
}

/// Integer types a page can be packed from.
pub trait PackedValue: Copy + Default + Debug + Send + Sync + 'static {
    const KIND: PageKind;
    /// Largest value, widened.
    const MAX: i64;
    const MIN: i64;

    fn to_i64(self) -> i64;
    fn from_i64(v: i64) -> Self;
}

impl PackedValue for i32 {
    const KIND: PageKind = PageKind::Narrow;
    const MAX: i64 = i32::MAX as i64;
    const MIN: i64 = i32::MIN as i64;

    #[inline]
    fn to_i64(self) -> i64 {
        self as i64
    }

    #[inline]
    fn from_i64(v: i64) -> Self {
        v as i32
    }
}

impl PackedValue for i64 {
    const KIND: PageKind = PageKind::Wide;
    const MAX: i64 = i64::MAX;
    const MIN: i64 = i64::MIN;

    #[inline]
    fn to_i64(self) -> i64 {
        self
    }

    #[inline]
    fn from_i64(v: i64) -> Self {
        v
    }
}

/// Bits needed to represent `v` (0 for 0).
#[inline]
pub fn bits_for(v: u64) -> u32 {
    64 - v.leading_zeros()
}

#[inline]
fn mask(width: u32) -> u64 {
    if width >= 64 {
        u64::MAX
    } else {
        (1u64 << width) - 1
    }
}

#[inline]
fn words_for(count: usize, width: u32) -> usize {
    (count * width as usize + 63) / 64
}

// ── CompressedPage ──────────────────────────────────────────────────

#[derive(Clone, PartialEq, Eq)]
pub struct CompressedPage<T: PackedValue> {
    width: u8,
    shift: u8,
    count: usize,
    base: i64,
    words: Vec<u64>,
    _marker: PhantomData<T>,
}

impl<T: PackedValue> Debug for CompressedPage<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompressedPage")
            .field("kind", &T::KIND)
            .field("width", &self.width)
            .field("shift", &self.shift)
            .field("count", &self.count)
            .field("base", &self.base)
            .finish()
    }
}

impl<T: PackedValue> CompressedPage<T> {
    /// Pack `values` with the minimal width for their range.
    pub fn encode(values: &[T]) -> Self {
        if values.is_empty() {
            return Self::with_width(0, 0);
        }

        let mut min = i64::MAX;
        let mut max = i64::MIN;
        for v in values {
            let v = v.to_i64();
            min = min.min(v);
            max = max.max(v);
        }

        let mut any = 0u64;
        for v in values {
            any |= v.to_i64().wrapping_sub(min) as u64;
        }
        let shift = if any == 0 { 0 } else { any.trailing_zeros() };
        let range = (max.wrapping_sub(min) as u64) >> shift;
        let width = bits_for(range);

        let mut page = Self {
            width: width as u8,
            shift: shift as u8,
            count: values.len(),
            base: min,
            words: vec![0u64; words_for(values.len(), width)],
            _marker: PhantomData,
        };
        if width > 0 {
            for (i, v) in values.iter().enumerate() {
                let delta = (v.to_i64().wrapping_sub(min) as u64) >> shift;
                page.put_bits(i, delta);
            }
        }
        page
    }

    /// Zeroed fixed-width page for in-place `set`. Base and shift are zero,
    /// so only non-negative values below `2^width` can be stored.
    pub fn with_width(width: u32, count: usize) -> Self {
        let width = width.min(64);
        Self {
            width: width as u8,
            shift: 0,
            count,
            base: 0,
            words: vec![0u64; words_for(count, width)],
            _marker: PhantomData,
        }
    }

    /// Width needed by a fixed-width page holding values in `0..=max`.
    pub fn width_for_max(max: T) -> u32 {
        bits_for(max.to_i64().max(0) as u64)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.count
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn width(&self) -> u32 {
        self.width as u32
    }

    #[inline]
    pub fn get(&self, index: usize) -> T {
        debug_assert!(index < self.count);
        let width = self.width as u32;
        if width == 0 {
            return T::from_i64(self.base);
        }
        let bit = index * width as usize;
        let word = bit / 64;
        let off = (bit % 64) as u32;
        let mut raw = self.words[word] >> off;
        if off + width > 64 {
            raw |= self.words[word + 1] << (64 - off);
        }
        let delta = (raw & mask(width)) << self.shift;
        T::from_i64(self.base.wrapping_add(delta as i64))
    }

    /// Store `value` into a fixed-width page.
    pub fn set(&mut self, index: usize, value: T) -> Result<()> {
        if index >= self.count {
            return Err(IndexError::OutOfBounds {
                index: index as u64,
                size: self.count as u64,
            });
        }
        let v = value.to_i64();
        let width = self.width as u32;
        if self.base != 0 || self.shift != 0 || v < 0 || (v as u64) & !mask(width) != 0 {
            return Err(IndexError::CapacityExceeded {
                attempted: v as u64,
                max: mask(width),
            });
        }
        if width > 0 {
            self.put_bits(index, v as u64);
        }
        Ok(())
    }

    fn put_bits(&mut self, index: usize, value: u64) {
        let width = self.width as u32;
        let bit = index * width as usize;
        let word = bit / 64;
        let off = (bit % 64) as u32;
        let m = mask(width);
        self.words[word] = (self.words[word] & !(m << off)) | ((value & m) << off);
        if off + width > 64 {
            let spill = 64 - off;
            let hi_mask = m >> spill;
            self.words[word + 1] = (self.words[word + 1] & !hi_mask) | ((value & m) >> spill);
        }
    }

    pub fn decode_all(&self) -> Vec<T> {
        (0..self.count).map(|i| self.get(i)).collect()
    }

    /// Append the blob encoding to `out`.
    pub fn write_bytes(&self, out: &mut Vec<u8>) {
        out.reserve(PAGE_HEADER_LEN + self.words.len() * 8);
        out.push(T::KIND as u8);
        out.push(self.width);
        out.push(self.shift);
        out.push(0);
        out.extend_from_slice(&(self.count as u32).to_le_bytes());
        out.extend_from_slice(&self.base.to_le_bytes());
        for w in &self.words {
            out.extend_from_slice(&w.to_le_bytes());
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.write_bytes(&mut out);
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let header = BlobHeader::parse(bytes)?;
        if header.kind != T::KIND {
            return Err(IndexError::InvalidFormat(format!(
                "page kind {:?} cannot be read as {:?}",
                header.kind,
                T::KIND
            )));
        }
        let n_words = words_for(header.count, header.width as u32);
        let needed = PAGE_HEADER_LEN + n_words * 8;
        if bytes.len() < needed {
            return Err(IndexError::InvalidFormat(format!(
                "page blob truncated: {} bytes, need {}",
                bytes.len(),
                needed
            )));
        }
        let words = bytes[PAGE_HEADER_LEN..needed]
            .chunks_exact(8)
            .map(|c| u64::from_le_bytes(c.try_into().unwrap()))
            .collect();
        Ok(Self {
            width: header.width,
            shift: header.shift,
            count: header.count,
            base: header.base,
            words,
            _marker: PhantomData,
        })
    }
}

// ── Blob header ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub struct BlobHeader {
    pub kind: PageKind,
    pub width: u8,
    pub shift: u8,
    pub count: usize,
    pub base: i64,
}

impl BlobHeader {
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < PAGE_HEADER_LEN {
            return Err(IndexError::InvalidFormat(format!(
                "page blob too short: {} bytes",
                bytes.len()
            )));
        }
        let kind = PageKind::from_byte(bytes[0])?;
        let width = bytes[1];
        let shift = bytes[2];
        if width > 64 || shift > 63 {
            return Err(IndexError::InvalidFormat(format!(
                "bad page width {} / shift {}",
                width, shift
            )));
        }
        Ok(Self {
            kind,
            width,
            shift,
            count: u32::from_le_bytes(bytes[4..8].try_into().unwrap()) as usize,
            base: i64::from_le_bytes(bytes[8..16].try_into().unwrap()),
        })
    }
}

// ── Decoding side ───────────────────────────────────────────────────

/// Position pages may be written narrow or wide; the stored kind decides.
#[derive(Debug, Clone)]
pub enum AnyPage {
    Narrow(CompressedPage<i32>),
    Wide(CompressedPage<i64>),
}

impl AnyPage {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        match BlobHeader::parse(bytes)?.kind {
            PageKind::Narrow => Ok(AnyPage::Narrow(CompressedPage::from_bytes(bytes)?)),
            PageKind::Wide => Ok(AnyPage::Wide(CompressedPage::from_bytes(bytes)?)),
        }
    }

    /// Narrow values are reinterpreted as unsigned 32-bit.
    #[inline]
    pub fn get(&self, index: usize) -> u64 {
        match self {
            AnyPage::Narrow(p) => p.get(index) as u32 as u64,
            AnyPage::Wide(p) => p.get(index) as u64,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            AnyPage::Narrow(p) => p.len(),
            AnyPage::Wide(p) => p.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Element types a paged reader can produce.
pub trait PageElement: Copy + Send + Sync + 'static {
    type Page: Send + Sync + 'static;

    fn decode_page(bytes: &[u8]) -> Result<Self::Page>;
    fn page_get(page: &Self::Page, index: usize) -> Self;
    fn page_len(page: &Self::Page) -> usize;
}

impl PageElement for i32 {
    type Page = CompressedPage<i32>;

    fn decode_page(bytes: &[u8]) -> Result<Self::Page> {
        CompressedPage::from_bytes(bytes)
    }

    #[inline]
    fn page_get(page: &Self::Page, index: usize) -> Self {
        page.get(index)
    }

    fn page_len(page: &Self::Page) -> usize {
        page.len()
    }
}

impl PageElement for i64 {
    type Page = CompressedPage<i64>;

    fn decode_page(bytes: &[u8]) -> Result<Self::Page> {
        CompressedPage::from_bytes(bytes)
    }

    #[inline]
    fn page_get(page: &Self::Page, index: usize) -> Self {
        page.get(index)
    }

    fn page_len(page: &Self::Page) -> usize {
        page.len()
    }
}

impl PageElement for u64 {
    type Page = AnyPage;

    fn decode_page(bytes: &[u8]) -> Result<Self::Page> {
        AnyPage::from_bytes(bytes)
    }

    #[inline]
    fn page_get(page: &Self::Page, index: usize) -> Self {
        page.get(index)
    }

    fn page_len(page: &Self::Page) -> usize {
        page.len()
    }
}

// ── Tests ───────────────────────────────────────────────────────────
