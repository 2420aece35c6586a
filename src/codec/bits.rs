//! Bit-granular streams, least significant bit first.

use std::io::{self, Read, Write};

pub struct BitWriter<W: Write> {
    inner: W,
    acc: u128,
    pending: u32,
}

impl<W: Write> BitWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            acc: 0,
            pending: 0,
        }
    }

    /// Append the low `bits` bits of `value` (`bits <= 64`).
    pub fn write(&mut self, value: u64, bits: u32) -> io::Result<()> {
        debug_assert!(bits <= 64);
        let value = if bits == 64 {
            value
        } else {
            value & ((1u64 << bits) - 1)
        };
        self.acc |= (value as u128) << self.pending;
        self.pending += bits;

        let whole = (self.pending / 8) as usize;
        if whole > 0 {
            let bytes = self.acc.to_le_bytes();
            self.inner.write_all(&bytes[..whole])?;
            self.acc >>= whole * 8;
            self.pending -= whole as u32 * 8;
        }
        Ok(())
    }

    pub fn write_bit(&mut self, bit: bool) -> io::Result<()> {
        self.write(bit as u64, 1)
    }

    /// Pad the last partial byte with zeros, flush, and return the sink.
    pub fn finish(mut self) -> io::Result<W> {
        if self.pending > 0 {
            self.inner.write_all(&[self.acc as u8])?;
            self.acc = 0;
            self.pending = 0;
        }
        self.inner.flush()?;
        Ok(self.inner)
    }
}

pub struct BitReader<R: Read> {
    inner: R,
    acc: u128,
    available: u32,
}

impl<R: Read> BitReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            acc: 0,
            available: 0,
        }
    }

    pub fn read(&mut self, bits: u32) -> io::Result<u64> {
        debug_assert!(bits <= 64);
        while self.available < bits {
            let mut byte = [0u8; 1];
            self.inner.read_exact(&mut byte)?;
            self.acc |= (byte[0] as u128) << self.available;
            self.available += 8;
        }
        let value = if bits == 64 {
            self.acc as u64
        } else {
            (self.acc as u64) & ((1u64 << bits) - 1)
        };
        self.acc >>= bits;
        self.available -= bits;
        Ok(value)
    }

    pub fn read_bit(&mut self) -> io::Result<bool> {
        Ok(self.read(1)? == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mixed_widths() {
        let mut w = BitWriter::new(Vec::new());
        w.write_bit(true).unwrap();
        w.write(0x1234, 13).unwrap();
        w.write(u64::MAX, 64).unwrap();
        w.write(5, 3).unwrap();
        w.write_bit(false).unwrap();
        let bytes = w.finish().unwrap();
        assert_eq!(bytes.len(), (1 + 13 + 64 + 3 + 1 + 7) / 8);

        let mut r = BitReader::new(bytes.as_slice());
        assert!(r.read_bit().unwrap());
        assert_eq!(r.read(13).unwrap(), 0x1234 & 0x1fff);
        assert_eq!(r.read(64).unwrap(), u64::MAX);
        assert_eq!(r.read(3).unwrap(), 5);
        assert!(!r.read_bit().unwrap());
    }

    #[test]
    fn test_read_past_end_fails() {
        let mut w = BitWriter::new(Vec::new());
        w.write(3, 2).unwrap();
        let bytes = w.finish().unwrap();
        let mut r = BitReader::new(bytes.as_slice());
        r.read(8).unwrap();
        assert!(r.read(1).is_err());
    }
}
