//! The full message: header metadata, descriptor sequence and subsets.

use crate::subset::Subset;
use crate::varcode::Varcode;

/// BUFR §3 flag byte: bit 6 = observed data, bit 7 = compression.
bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SectionThreeFlags: u8 {
        const OBSERVED    = 0b0100_0000;
        const COMPRESSED  = 0b1000_0000;
    }
}

/// A reference date/time as carried in BUFR §1 / CREX section 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReferenceDateTime {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

/// Message header fields, common to both wire formats where they overlap.
#[derive(Debug, Clone, Default)]
pub struct Header {
    pub edition: u8,
    pub master_table: u8,
    pub centre: u16,
    pub subcentre: u16,
    pub update_sequence_number: u8,
    pub data_category: u8,
    pub data_subcategory: u8,
    pub local_subcategory: u8,
    pub master_table_version: u8,
    pub local_table_version: u8,
    pub reference: ReferenceDateTime,
    pub optional_section_present: bool,
    pub compressed: bool,
}

/// A full message: header, descriptor sequence, and one `Subset` per
/// observation.
#[derive(Debug, Clone, Default)]
pub struct Bulletin {
    pub header: Header,
    pub datadesc: Vec<Varcode>,
    pub subsets: Vec<Subset>,
}

impl Bulletin {
    #[must_use]
    pub fn new(header: Header, datadesc: Vec<Varcode>, subset_count: usize) -> Self {
        Self {
            header,
            datadesc,
            subsets: (0..subset_count).map(|_| Subset::new()).collect(),
        }
    }

    #[must_use]
    pub fn subset_count(&self) -> usize {
        self.subsets.len()
    }
}
