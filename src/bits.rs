//! Bit-level I/O over a byte buffer, for uncompressed and compressed BUFR.

use crate::error::Error;

/// Reads big-endian, MSB-first bits out of a borrowed byte buffer.
///
/// Absolute bit-offset design (no separate partial-byte accumulator is
/// needed for a read-only cursor), with a `read`/`peek` split and a
/// shift-and-mask core.
#[derive(Debug, Clone)]
pub struct BitReader<'input> {
    buffer: &'input [u8],
    offset: usize,
}

impl<'input> BitReader<'input> {
    #[must_use]
    pub fn new(buffer: &'input [u8]) -> Self {
        Self { buffer, offset: 0 }
    }

    #[must_use]
    pub fn bits_left(&self) -> usize {
        (self.buffer.len() << 3).saturating_sub(self.offset)
    }

    #[must_use]
    pub fn byte_offset(&self) -> usize {
        self.offset >> 3
    }

    #[must_use]
    pub fn bit_offset(&self) -> usize {
        self.offset
    }

    /// Read the next `n` bits (`1..=32`) MSB-first, advancing the cursor.
    pub fn get_bits(&mut self, n: u8) -> Result<u32, Error> {
        if !(1..=32).contains(&n) {
            return Err(Error::consistency(format!(
                "get_bits: width {n} out of range 1..=32"
            )));
        }
        let value = self.peek_bits(n)?;
        self.offset += n as usize;
        Ok(value as u32)
    }

    /// Read `n` bits (`1..=64`) without consuming any, for lookahead.
    pub fn peek_bits(&self, n: u8) -> Result<u64, Error> {
        self.read_bits_at(self.offset, n)
            .ok_or_else(|| Error::parse("end of buffer"))
    }

    /// BUFR packs bits MSB-first within each byte and across byte
    /// boundaries, so this walks bit by bit rather than shifting whole
    /// bytes, staying obviously correct at a small, bounded (`count <= 64`)
    /// cost.
    fn read_bits_at(&self, offset: usize, count: u8) -> Option<u64> {
        let upper_bound = offset + count as usize;
        if upper_bound > self.buffer.len() << 3 {
            return None;
        }
        let mut res: u64 = 0;
        for bitpos in offset..upper_bound {
            let byte = self.buffer[bitpos >> 3];
            let bit = (byte >> (7 - (bitpos & 7))) & 1;
            res = (res << 1) | u64::from(bit);
        }
        Some(res)
    }

    /// Absolute big-endian read of `byte_len` bytes (`1..=4`) starting at
    /// byte `pos`; does not touch the bit cursor.
    pub fn read_number(&self, pos: usize, byte_len: u8) -> Result<u32, Error> {
        if !(1..=4).contains(&byte_len) {
            return Err(Error::consistency(format!(
                "read_number: byte_len {byte_len} out of range 1..=4"
            )));
        }
        let bytes = self
            .buffer
            .get(pos..pos + byte_len as usize)
            .ok_or_else(|| Error::parse("end of buffer"))?;
        let mut value: u32 = 0;
        for &b in bytes {
            value = (value << 8) | u32::from(b);
        }
        Ok(value)
    }

    /// Read `byte_len` raw, byte-aligned bytes. Errors if the cursor isn't
    /// byte-aligned.
    pub fn read_bytes(&mut self, byte_len: usize) -> Result<&'input [u8], Error> {
        if self.offset % 8 != 0 {
            return Err(Error::consistency("read_bytes: cursor not byte-aligned"));
        }
        let start = self.offset >> 3;
        let end = start + byte_len;
        let bytes = self
            .buffer
            .get(start..end)
            .ok_or_else(|| Error::parse("end of buffer"))?;
        self.offset = end << 3;
        Ok(bytes)
    }

    /// Read `bit_len` bits as a raw byte string (string/binary fields),
    /// left-justified: a trailing partial byte is padded with low zero
    /// bits, mirroring `BitWriter::append_string`/`append_binary`.
    pub fn read_raw(&mut self, bit_len: u32) -> Result<Vec<u8>, Error> {
        let mut out = Vec::with_capacity(bit_len.div_ceil(8) as usize);
        let mut remaining = bit_len;
        while remaining >= 8 {
            out.push(self.get_bits(8)? as u8);
            remaining -= 8;
        }
        if remaining > 0 {
            let v = self.get_bits(remaining as u8)?;
            out.push((v << (8 - remaining)) as u8);
        }
        Ok(out)
    }

    pub fn skip_bits(&mut self, n: usize) -> Result<(), Error> {
        if self.offset + n > self.buffer.len() << 3 {
            return Err(Error::parse("end of buffer"));
        }
        self.offset += n;
        Ok(())
    }
}

/// Growable big-endian, MSB-first bit writer.
#[derive(Debug, Clone, Default)]
pub struct BitWriter {
    buffer: Vec<u8>,
    pbyte: u8,
    pbyte_len: u8,
}

impl BitWriter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn bits_written(&self) -> usize {
        self.buffer.len() * 8 + self.pbyte_len as usize
    }

    /// Append `v`'s low `n` bits (`1..=32`) MSB-first, flushing complete
    /// bytes into the buffer as they accumulate.
    pub fn add_bits(&mut self, v: u32, n: u8) {
        debug_assert!((1..=32).contains(&n));
        for i in (0..n).rev() {
            let bit = ((v >> i) & 1) as u8;
            self.pbyte = (self.pbyte << 1) | bit;
            self.pbyte_len += 1;
            if self.pbyte_len == 8 {
                self.buffer.push(self.pbyte);
                self.pbyte = 0;
                self.pbyte_len = 0;
            }
        }
    }

    /// Write a "missing" numeric field of `n` bits: all ones.
    pub fn add_missing(&mut self, n: u8) {
        self.add_bits(u32::MAX, n);
    }

    pub fn append_byte(&mut self, v: u8) {
        self.add_bits(u32::from(v), 8);
    }

    pub fn append_short(&mut self, v: u16) {
        self.add_bits(u32::from(v), 16);
    }

    pub fn raw_append(&mut self, bytes: &[u8]) {
        debug_assert_eq!(self.pbyte_len, 0, "raw_append requires byte alignment");
        self.buffer.extend_from_slice(bytes);
    }

    /// Write `chars` into a `bit_len`-bit field, space-padding a short
    /// string; if `bit_len` isn't a multiple of 8 the remainder is zero.
    pub fn append_string(&mut self, chars: &[u8], bit_len: u32) {
        let total_bytes = (bit_len / 8) as usize;
        for i in 0..total_bytes {
            let byte = chars.get(i).copied().unwrap_or(b' ');
            self.append_byte(byte);
        }
        let rem_bits = bit_len % 8;
        if rem_bits > 0 {
            self.add_bits(0, rem_bits as u8);
        }
    }

    /// Write `bytes` into a `bit_len`-bit field, zero-padding a short
    /// binary value; the bit remainder (if any) is zero.
    pub fn append_binary(&mut self, bytes: &[u8], bit_len: u32) {
        let total_bytes = (bit_len / 8) as usize;
        for i in 0..total_bytes {
            let byte = bytes.get(i).copied().unwrap_or(0);
            self.append_byte(byte);
        }
        let rem_bits = bit_len % 8;
        if rem_bits > 0 {
            self.add_bits(0, rem_bits as u8);
        }
    }

    /// Pad the current partial byte with zero bits.
    pub fn flush(&mut self) {
        if self.pbyte_len > 0 {
            let pad = 8 - self.pbyte_len;
            self.pbyte <<= pad;
            self.buffer.push(self.pbyte);
            self.pbyte = 0;
            self.pbyte_len = 0;
        }
    }

    #[must_use]
    pub fn into_bytes(mut self) -> Vec<u8> {
        self.flush();
        self.buffer
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        debug_assert_eq!(self.pbyte_len, 0, "as_bytes requires a prior flush()");
        &self.buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reader_reads_msb_first() {
        let mut r = BitReader::new(&[0b1011_0000]);
        assert_eq!(r.get_bits(1).unwrap(), 1);
        assert_eq!(r.get_bits(3).unwrap(), 0b011);
        assert_eq!(r.get_bits(4).unwrap(), 0b0000);
    }

    #[test]
    fn reader_errors_past_end() {
        let mut r = BitReader::new(&[0xFF]);
        r.get_bits(8).unwrap();
        assert!(r.get_bits(1).is_err());
    }

    #[test]
    fn writer_roundtrips_through_reader() {
        let mut w = BitWriter::new();
        w.add_bits(0b101, 3);
        w.add_bits(0xABCD, 16);
        w.add_bits(0b1, 1);
        let bytes = w.into_bytes();
        let mut r = BitReader::new(&bytes);
        assert_eq!(r.get_bits(3).unwrap(), 0b101);
        assert_eq!(r.get_bits(16).unwrap(), 0xABCD);
        assert_eq!(r.get_bits(1).unwrap(), 1);
    }

    #[test]
    fn flush_pads_to_byte_boundary() {
        let mut w = BitWriter::new();
        w.add_bits(0b1, 1);
        assert_eq!(w.bits_written(), 1);
        let bytes = w.into_bytes();
        assert_eq!(bytes.len(), 1);
        assert_eq!(bytes[0], 0b1000_0000);
    }

    #[test]
    fn missing_numeric_is_all_ones() {
        let mut w = BitWriter::new();
        w.add_missing(10);
        let bytes = w.into_bytes();
        let mut r = BitReader::new(&bytes);
        assert_eq!(r.get_bits(10).unwrap(), (1 << 10) - 1);
    }

    #[test]
    fn read_raw_roundtrips_with_append_string() {
        let mut w = BitWriter::new();
        w.append_string(b"ab", 16);
        let bytes = w.into_bytes();
        let mut r = BitReader::new(&bytes);
        assert_eq!(r.read_raw(16).unwrap(), b"ab");
    }

    #[test]
    fn append_string_pads_with_spaces() {
        let mut w = BitWriter::new();
        w.append_string(b"hi", 40);
        let bytes = w.into_bytes();
        assert_eq!(&bytes, b"hi   ");
    }
}
