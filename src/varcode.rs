//! Identity of a single Table B/C/D entry: `(F, X, Y)`.

use std::fmt;
use std::str::FromStr;

use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::error::Error;

/// `F` category of a [`Varcode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum Category {
    /// `F=0`: element (Table B) descriptor.
    Element = 0,
    /// `F=1`: replication descriptor.
    Replication = 1,
    /// `F=2`: operator / "C modifier" descriptor.
    Operator = 2,
    /// `F=3`: sequence (Table D) descriptor.
    Sequence = 3,
}

impl Category {
    fn from_f(f: u8) -> Self {
        Category::try_from_primitive(f).expect("f is masked to 2 bits at construction")
    }
}

/// A 16-bit identity `(F, X, Y)`: `F` in `0..=3`, `X` in `0..=63`, `Y` in
/// `0..=255`, packed as `(F<<14)|(X<<8)|Y`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Varcode(u16);

impl Varcode {
    /// Construct from `(F, X, Y)`, masking out-of-range bits per the wire
    /// layout (`F` 2 bits, `X` 6 bits, `Y` 8 bits), as the invariant in the
    /// spec requires those ranges to be enforced at construction.
    pub fn new(f: u8, x: u8, y: u8) -> Result<Self, Error> {
        if f > 3 {
            return Err(Error::parse(format!("varcode F={f} out of range 0..=3")));
        }
        if x > 63 {
            return Err(Error::parse(format!("varcode X={x} out of range 0..=63")));
        }
        Ok(Varcode(((f as u16) << 14) | ((x as u16) << 8) | (y as u16)))
    }

    #[must_use]
    pub fn from_raw(code: u16) -> Self {
        Varcode(code)
    }

    #[must_use]
    pub fn raw(self) -> u16 {
        self.0
    }

    #[must_use]
    pub fn f(self) -> u8 {
        (self.0 >> 14) as u8 & 0b11
    }

    #[must_use]
    pub fn x(self) -> u8 {
        (self.0 >> 8) as u8 & 0b0011_1111
    }

    #[must_use]
    pub fn y(self) -> u8 {
        (self.0 & 0xFF) as u8
    }

    #[must_use]
    pub fn category(self) -> Category {
        Category::from_f(self.f())
    }

    pub fn b(x: u8, y: u8) -> Result<Self, Error> {
        Self::new(0, x, y)
    }

    pub fn r(x: u8, y: u8) -> Result<Self, Error> {
        Self::new(1, x, y)
    }

    pub fn c(x: u8, y: u8) -> Result<Self, Error> {
        Self::new(2, x, y)
    }

    pub fn d(x: u8, y: u8) -> Result<Self, Error> {
        Self::new(3, x, y)
    }
}

impl fmt::Display for Varcode {
    /// Canonical text form `FXXYYY`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{:02}{:03}", self.f(), self.x(), self.y())
    }
}

impl FromStr for Varcode {
    type Err = Error;

    /// Parse the canonical `FXXYYY` text form.
    fn from_str(s: &str) -> Result<Self, Error> {
        if s.len() != 6 || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(Error::parse(format!("malformed varcode text `{s}`")));
        }
        let f: u8 = s[0..1].parse().unwrap();
        let x: u8 = s[1..3].parse().unwrap();
        let y: u8 = s[3..6].parse().unwrap();
        Varcode::new(f, x, y)
    }
}
