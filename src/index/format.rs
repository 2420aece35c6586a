//! Trailer of a paged index.
//!
//! # File Layout
//!
//! ```text
//! [page 0 blob][page 1 blob] ... [page N-1 blob]
//! offset_0: i64 ... offset_N: i64   offset_0 = first page, offset_N = this table
//! page_size: i32
//! size: i32                         >= 0 plain element count
//!                                   <  0 huge encoding: -(occupancy of last page)
//! ```
//!
//! Offsets are absolute positions in the file, so an index may start at any
//! position of a larger composite file. In the huge encoding the number of
//! offsets is recovered from the distance between `offset_N` and the end of
//! the region, and the element count is `(offsets - 2) * page_size - size`.

use std::io::Write;

use crate::error::{IndexError, Result};

/// Bytes after the offsets table (page size + size).
pub const TRAILER_TAIL_LEN: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trailer {
    /// Start of every page plus the start of the offsets table.
    pub offsets: Vec<u64>,
    pub page_size: usize,
    pub size: u64,
}

impl Trailer {
    pub fn page_count(&self) -> usize {
        self.offsets.len().saturating_sub(1)
    }

    /// Byte range `[start, end)` of page `page`.
    #[inline]
    pub fn page_range(&self, page: usize) -> (usize, usize) {
        (self.offsets[page] as usize, self.offsets[page + 1] as usize)
    }

    /// Elements stored in page `page`.
    pub fn page_len(&self, page: usize) -> usize {
        let before = page as u64 * self.page_size as u64;
        (self.size - before).min(self.page_size as u64) as usize
    }

    pub fn first_offset(&self) -> u64 {
        self.offsets[0]
    }

    /// Total bytes from the first page to the end of the trailer.
    pub fn stream_len(&self) -> u64 {
        let table = *self.offsets.last().unwrap_or(&0);
        table + 8 * self.offsets.len() as u64 + TRAILER_TAIL_LEN as u64 - self.first_offset()
    }

    /// Count field as written: plain, or the negated occupancy of the last page.
    pub fn encoded_size(&self, plain_size_max: u64) -> Result<i32> {
        if self.size <= plain_size_max {
            return i32::try_from(self.size).map_err(|_| IndexError::CapacityExceeded {
                attempted: self.size,
                max: i32::MAX as u64,
            });
        }
        let ps = self.page_size as u64;
        let occupancy = (self.size + ps - 1) % ps + 1;
        Ok(-(occupancy as i32))
    }

    /// Write the offsets table and tail; returns the bytes written.
    pub fn write_to<W: Write>(&self, w: &mut W, plain_size_max: u64) -> Result<u64> {
        let size = self.encoded_size(plain_size_max)?;
        let page_size = i32::try_from(self.page_size).map_err(|_| IndexError::CapacityExceeded {
            attempted: self.page_size as u64,
            max: i32::MAX as u64,
        })?;
        for off in &self.offsets {
            w.write_all(&(*off as i64).to_le_bytes())?;
        }
        w.write_all(&page_size.to_le_bytes())?;
        w.write_all(&size.to_le_bytes())?;
        Ok(8 * self.offsets.len() as u64 + TRAILER_TAIL_LEN as u64)
    }

    /// Parse the trailer of the index whose region ends at `end` in `data`.
    pub fn parse(data: &[u8], end: usize) -> Result<Self> {
        if end > data.len() || end < 16 {
            return Err(IndexError::InvalidFormat(format!(
                "index region end {} invalid for file of {} bytes",
                end,
                data.len()
            )));
        }
        let read_i64 = |pos: usize| i64::from_le_bytes(data[pos..pos + 8].try_into().unwrap());
        let read_i32 = |pos: usize| i32::from_le_bytes(data[pos..pos + 4].try_into().unwrap());

        let last_offset = read_i64(end - 16);
        let page_size = read_i32(end - 8);
        let raw_size = read_i32(end - 4);

        if page_size <= 0 {
            return Err(IndexError::InvalidFormat(format!(
                "bad page size {}",
                page_size
            )));
        }
        let ps = page_size as u64;

        let (count, size) = if raw_size >= 0 {
            let s = raw_size as u64;
            let count = s / ps + if s % ps > 0 { 2 } else { 1 };
            (count, s)
        } else {
            if last_offset < 0 || (last_offset as u64 + 8) > end as u64 {
                return Err(IndexError::InvalidFormat(format!(
                    "bad offsets table position {}",
                    last_offset
                )));
            }
            let count = (end as u64 - TRAILER_TAIL_LEN as u64 - last_offset as u64) / 8;
            let last = (-(raw_size as i64)) as u64;
            if count < 2 || last > ps {
                return Err(IndexError::InvalidFormat(format!(
                    "bad huge index trailer: {} offsets, last page {}",
                    count, last
                )));
            }
            (count, (count - 2) * ps + last)
        };

        let table_len = count
            .checked_mul(8)
            .filter(|len| len + TRAILER_TAIL_LEN as u64 <= end as u64)
            .ok_or_else(|| {
                IndexError::InvalidFormat(format!("offsets table of {} entries overflows", count))
            })?;
        let table_start = end - TRAILER_TAIL_LEN - table_len as usize;

        let mut offsets = Vec::with_capacity(count as usize);
        for i in 0..count as usize {
            let off = read_i64(table_start + 8 * i);
            if off < 0 || off as usize > table_start {
                return Err(IndexError::InvalidFormat(format!(
                    "page offset {} outside the index body",
                    off
                )));
            }
            if let Some(&prev) = offsets.last() {
                if (off as u64) < prev {
                    return Err(IndexError::InvalidFormat(format!(
                        "page offsets not increasing at page {}",
                        i
                    )));
                }
            }
            offsets.push(off as u64);
        }
        if offsets.last().copied() != Some(table_start as u64) || last_offset as u64 != table_start as u64 {
            return Err(IndexError::InvalidFormat(format!(
                "offsets table expected at {}, last offset is {}",
                table_start, last_offset
            )));
        }

        Ok(Self {
            offsets,
            page_size: page_size as usize,
            size,
        })
    }
}
