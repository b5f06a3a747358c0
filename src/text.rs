//! Token-level I/O over a character buffer, for CREX.

use crate::error::Error;

/// Reads whitespace-separated, fixed-width lexemes from CREX section text,
/// with optional rotating check-digit verification.
#[derive(Debug, Clone)]
pub struct TextReader<'input> {
    buffer: &'input [u8],
    pos: usize,
    check_digit_mode: bool,
    next_check_digit: u8,
}

/// A field read from CREX text: either a value or the all-slashes missing
/// sentinel.
#[derive(Debug, Clone, PartialEq)]
pub enum TextField {
    Missing,
    Text(Vec<u8>),
}

impl<'input> TextReader<'input> {
    #[must_use]
    pub fn new(buffer: &'input [u8], check_digit_mode: bool) -> Self {
        Self {
            buffer,
            pos: 0,
            check_digit_mode,
            next_check_digit: 1,
        }
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.buffer.get(self.pos), Some(b) if b.is_ascii_whitespace()) {
            self.pos += 1;
        }
    }

    fn peek(&self) -> Option<u8> {
        self.buffer.get(self.pos).copied()
    }

    /// Read and verify the rotating check digit preceding a data field,
    /// when check-digit mode is enabled. The digit increments modulo 10
    /// after each data field.
    fn consume_check_digit(&mut self) -> Result<(), Error> {
        if !self.check_digit_mode {
            return Ok(());
        }
        self.skip_whitespace();
        let got = self
            .peek()
            .filter(u8::is_ascii_digit)
            .ok_or_else(|| Error::parse("expected check digit"))?;
        self.pos += 1;
        let expected = self.next_check_digit % 10;
        if got - b'0' != expected {
            return Err(Error::parse(format!(
                "check digit mismatch: expected {expected}, got {}",
                got - b'0'
            )));
        }
        self.next_check_digit = (self.next_check_digit + 1) % 10;
        Ok(())
    }

    /// Read a field of exactly `len` characters. All-slashes is missing;
    /// otherwise digits (optionally `-`-prefixed) or free text.
    pub fn read_field(&mut self, len: usize) -> Result<TextField, Error> {
        self.consume_check_digit()?;
        self.skip_whitespace();
        let start = self.pos;
        let end = start + len;
        let raw = self
            .buffer
            .get(start..end)
            .ok_or_else(|| Error::parse("end of buffer reading CREX field"))?;
        self.pos = end;
        if raw.iter().all(|&b| b == b'/') {
            Ok(TextField::Missing)
        } else {
            Ok(TextField::Text(raw.to_vec()))
        }
    }

    pub fn read_int(&mut self, len: usize) -> Result<Option<i64>, Error> {
        match self.read_field(len)? {
            TextField::Missing => Ok(None),
            TextField::Text(bytes) => {
                let text = std::str::from_utf8(&bytes)
                    .map_err(|_| Error::parse("non-UTF8 CREX numeric field"))?
                    .trim();
                text.parse::<i64>()
                    .map(Some)
                    .map_err(|_| Error::parse(format!("malformed CREX numeric field `{text}`")))
            }
        }
    }

    pub fn read_token(&mut self) -> Result<Vec<u8>, Error> {
        self.skip_whitespace();
        let start = self.pos;
        while matches!(self.peek(), Some(b) if !b.is_ascii_whitespace()) {
            self.pos += 1;
        }
        if self.pos == start {
            return Err(Error::parse("expected token, found end of input"));
        }
        Ok(self.buffer[start..self.pos].to_vec())
    }

    #[must_use]
    pub fn is_at_end(&self) -> bool {
        let mut p = self.pos;
        while matches!(self.buffer.get(p), Some(b) if b.is_ascii_whitespace()) {
            p += 1;
        }
        p >= self.buffer.len()
    }

    #[must_use]
    pub fn byte_offset(&self) -> usize {
        self.pos
    }
}

/// Writes CREX text fields with exactly one space between fields.
#[derive(Debug, Clone, Default)]
pub struct TextWriter {
    buffer: String,
    check_digit_mode: bool,
    next_check_digit: u8,
    wrote_any: bool,
}

impl TextWriter {
    #[must_use]
    pub fn new(check_digit_mode: bool) -> Self {
        Self {
            check_digit_mode,
            next_check_digit: 1,
            ..Default::default()
        }
    }

    fn write_separator(&mut self) {
        if self.wrote_any {
            self.buffer.push(' ');
        }
        self.wrote_any = true;
    }

    fn write_check_digit(&mut self) {
        if !self.check_digit_mode {
            return;
        }
        self.write_separator();
        self.buffer
            .push((b'0' + self.next_check_digit % 10) as char);
        self.next_check_digit = (self.next_check_digit + 1) % 10;
    }

    /// Write a missing field: `len` slash characters.
    pub fn write_missing(&mut self, len: usize) {
        self.write_check_digit();
        self.write_separator();
        self.buffer.push_str(&"/".repeat(len));
    }

    pub fn write_text(&mut self, text: &[u8], len: usize) -> Result<(), Error> {
        self.write_check_digit();
        self.write_separator();
        if text.len() > len {
            return Err(Error::domain(format!(
                "CREX text field of length {len} cannot hold {} bytes",
                text.len()
            )));
        }
        let s = std::str::from_utf8(text).map_err(|_| Error::domain("non-UTF8 CREX text"))?;
        self.buffer.push_str(s);
        Ok(())
    }

    /// Numeric width rule: if negative, one extra character holds the
    /// sign; domain check is "absolute value fits in `len` decimal digits".
    pub fn write_int(&mut self, value: i64, len: usize) -> Result<(), Error> {
        self.write_check_digit();
        self.write_separator();
        let digits = value.unsigned_abs().to_string();
        if digits.len() > len {
            return Err(Error::domain(format!(
                "value {value} does not fit in {len} decimal digits"
            )));
        }
        if value < 0 {
            self.buffer.push('-');
        }
        self.buffer
            .push_str(&"0".repeat(len - digits.len()));
        self.buffer.push_str(&digits);
        Ok(())
    }

    #[must_use]
    pub fn into_string(self) -> String {
        self.buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_field_is_all_slashes() {
        let mut r = TextReader::new(b"///// 12345", false);
        assert_eq!(r.read_field(5).unwrap(), TextField::Missing);
    }

    #[test]
    fn check_digit_rotates_mod_10() {
        let mut w = TextWriter::new(true);
        w.write_int(1, 2).unwrap();
        w.write_int(2, 2).unwrap();
        w.write_int(3, 2).unwrap();
        let text = w.into_string();
        assert_eq!(text, "1 01 2 02 3 03");

        let mut r = TextReader::new(text.as_bytes(), true);
        assert_eq!(r.read_int(2).unwrap(), Some(1));
        assert_eq!(r.read_int(2).unwrap(), Some(2));
        assert_eq!(r.read_int(2).unwrap(), Some(3));
    }

    #[test]
    fn negative_numeric_uses_extra_sign_char() {
        let mut w = TextWriter::new(false);
        w.write_int(-5, 3).unwrap();
        assert_eq!(w.into_string(), "-005");
    }
}
