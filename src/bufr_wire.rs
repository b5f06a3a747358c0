//! BUFR wire framing: sections 0 (indicator), 1 (identification), 2
//! (optional, opaque), 3 (data descriptors), 4 (data) and 5 (`"7777"`).
//!
//! Table loading and caching are out of scope; this module
//! only concerns itself with the byte layout around the descriptor
//! section and data section that [`crate::interp`] and
//! [`crate::decode`]/[`crate::encode`]/[`crate::compressed`] drive.

use crate::bits::{BitReader, BitWriter};
use crate::bulletin::{Bulletin, Header, ReferenceDateTime, SectionThreeFlags};
use crate::compressed::{CompressedDecoder, CompressedEncoder};
use crate::decode::UncompressedDecoder;
use crate::encode::UncompressedEncoder;
use crate::error::Error;
use crate::interp::DDSInterpreter;
use crate::options::{DecodeOptions, EncodeOptions};
use crate::state::InterpreterState;
use crate::subset::Subset;
use crate::tableset::TableSet;
use crate::varcode::Varcode;

const MIN_SECTION0_LEN: usize = 8;
const MIN_SECTION1_LEN_EDITION3: usize = 7;

struct ByteCursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteCursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], Error> {
        let end = self.pos + n;
        let slice = self
            .buf
            .get(self.pos..end)
            .ok_or_else(|| Error::parse("unexpected end of BUFR message").with_location(0, self.pos))?;
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, Error> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, Error> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u24(&mut self) -> Result<usize, Error> {
        let b = self.take(3)?;
        Ok(((b[0] as usize) << 16) | ((b[1] as usize) << 8) | b[2] as usize)
    }
}

/// Parse just enough of a message to describe it, without touching
/// section 4's payload: edition, counts, compression flag.
pub fn decode_bufr_header(data: &[u8]) -> Result<Header, Error> {
    let mut c = ByteCursor::new(data);
    parse_section0_and_1(&mut c)
}

fn parse_section0_and_1(c: &mut ByteCursor<'_>) -> Result<Header, Error> {
    if c.buf.len() < MIN_SECTION0_LEN {
        return Err(Error::parse(format!(
            "looking for section 0 of BUFR message: message is only {} bytes long, but it must be at least {MIN_SECTION0_LEN}",
            c.buf.len()
        ))
        .with_location(0, 0));
    }
    let magic = c.take(4)?;
    if magic != b"BUFR" {
        return Err(Error::parse("missing \"BUFR\" indicator").with_location(0, 0));
    }
    let _total_len = c.u24()?;
    let edition = c.u8()?;
    if !(2..=4).contains(&edition) {
        return Err(Error::parse(format!("unsupported BUFR edition {edition}")).with_location(0, 7));
    }

    let section1_start = c.pos;
    let section1_len = c.u24()?;
    if edition == 4 {
        if section1_len < 22 {
            return Err(Error::parse(format!(
                "section 1 length is {section1_len} but it must be at least 22"
            ))
            .with_location(1, section1_start));
        }
    } else if section1_len < MIN_SECTION1_LEN_EDITION3 {
        return Err(Error::parse(format!(
            "section 1 length is {section1_len} but it must be at least {MIN_SECTION1_LEN_EDITION3}"
        ))
        .with_location(1, section1_start));
    }

    let master_table = c.u8()?;
    let header = if edition == 4 {
        let centre = c.u16()?;
        let subcentre = c.u16()?;
        let update_sequence_number = c.u8()?;
        let flag = c.u8()?;
        let data_category = c.u8()?;
        let local_subcategory_marker = c.u8()?; // international subcategory, byte 13 of the layout used here
        let data_subcategory = c.u8()?;
        let master_table_version = c.u8()?;
        let local_table_version = c.u8()?;
        let year = c.u16()?;
        let month = c.u8()?;
        let day = c.u8()?;
        let hour = c.u8()?;
        let minute = c.u8()?;
        let second = c.u8()?;
        Header {
            edition,
            master_table,
            centre,
            subcentre,
            update_sequence_number,
            data_category,
            data_subcategory,
            local_subcategory: local_subcategory_marker,
            master_table_version,
            local_table_version,
            reference: ReferenceDateTime {
                year,
                month,
                day,
                hour,
                minute,
                second,
            },
            optional_section_present: flag & 0b1000_0000 != 0,
            compressed: false,
        }
    } else {
        let centre = u16::from(c.u8()?);
        let subcentre = u16::from(c.u8()?);
        let update_sequence_number = c.u8()?;
        let flag = c.u8()?;
        let data_category = c.u8()?;
        let data_subcategory = c.u8()?;
        let master_table_version = c.u8()?;
        let local_table_version = c.u8()?;
        let year = u16::from(c.u8()?);
        let month = c.u8()?;
        let day = c.u8()?;
        let hour = c.u8()?;
        let minute = c.u8()?;
        Header {
            edition,
            master_table,
            centre,
            subcentre,
            update_sequence_number,
            data_category,
            data_subcategory,
            local_subcategory: 0,
            master_table_version,
            local_table_version,
            reference: ReferenceDateTime {
                year,
                month,
                day,
                hour,
                minute,
                second: 0,
            },
            optional_section_present: flag & 0b1000_0000 != 0,
            compressed: false,
        }
    };

    // Skip any trailing reserved/local-use bytes of section 1 not consumed above.
    let consumed = c.pos - section1_start;
    if consumed < section1_len {
        c.take(section1_len - consumed)?;
    }

    if header.optional_section_present {
        let sec2_start = c.pos;
        let sec2_len = c.u24()?;
        if sec2_len < 4 {
            return Err(Error::parse(format!(
                "optional section length is {sec2_len} but it must be at least 4"
            ))
            .with_location(2, sec2_start));
        }
        c.take(sec2_len - 3)?;
    }

    Ok(header)
}

/// Decode a full BUFR message, including its data section.
pub fn decode_bufr(
    data: &[u8],
    tables: &dyn TableSet,
    options: &DecodeOptions,
) -> Result<Bulletin, Error> {
    let mut c = ByteCursor::new(data);
    let mut header = parse_section0_and_1(&mut c)?;

    let sec3_start = c.pos;
    let sec3_len = c.u24()?;
    let _reserved = c.u8()?;
    let n_subsets = c.u16()? as usize;
    let flags_byte = c.u8()?;
    let flags = SectionThreeFlags::from_bits_truncate(flags_byte);
    header.compressed = flags.contains(SectionThreeFlags::COMPRESSED);

    let descriptors_start = c.pos;
    let descriptors_len = sec3_len.checked_sub(descriptors_start - sec3_start).ok_or_else(|| {
        Error::parse("section 3 length too small for its own fixed header").with_location(3, sec3_start)
    })?;
    if descriptors_len % 2 != 0 {
        return Err(Error::parse("section 3 descriptor bytes not a multiple of 2").with_location(3, sec3_start));
    }
    let raw_desc = c.take(descriptors_len)?;
    let datadesc: Vec<Varcode> = raw_desc
        .chunks_exact(2)
        .map(|pair| Varcode::from_raw(u16::from_be_bytes([pair[0], pair[1]])))
        .collect();

    let sec4_start = c.pos;
    let sec4_len = c.u24()?;
    let _reserved = c.u8()?;
    let payload_len = sec4_len.checked_sub(4).ok_or_else(|| {
        Error::parse("section 4 length too small for its own fixed header").with_location(4, sec4_start)
    })?;
    let payload = c.take(payload_len)?;

    let end_marker = c.take(4)?;
    if end_marker != b"7777" {
        return Err(Error::parse("missing \"7777\" end marker").with_location(5, c.pos - 4));
    }

    let interp = DDSInterpreter::new(tables);
    let mut bulletin = Bulletin::new(header, datadesc, n_subsets);

    if bulletin.header.compressed {
        let mut state = InterpreterState::new();
        let mut handler = CompressedDecoder::new(BitReader::new(payload), n_subsets, *options);
        interp.run(&bulletin.datadesc, &mut state, &mut handler)?;
        let (subsets, _) = handler.into_parts();
        bulletin.subsets = subsets;
    } else {
        let mut reader = BitReader::new(payload);
        let mut subsets = Vec::with_capacity(n_subsets);
        for _ in 0..n_subsets {
            let mut state = InterpreterState::new();
            let mut handler = UncompressedDecoder::new(reader, *options);
            interp.run(&bulletin.datadesc, &mut state, &mut handler)?;
            let (subset, returned_reader) = handler.into_parts();
            reader = returned_reader;
            subsets.push(subset);
        }
        bulletin.subsets = subsets;
    }

    Ok(bulletin)
}

/// Encode a [`Bulletin`] back into a BUFR message.
pub fn encode_bufr(
    bulletin: &Bulletin,
    tables: &dyn TableSet,
    options: &EncodeOptions,
) -> Result<Vec<u8>, Error> {
    let _ = options;
    let interp = DDSInterpreter::new(tables);

    let data_payload = if bulletin.header.compressed {
        let mut state = InterpreterState::new();
        let mut handler = CompressedEncoder::new(&bulletin.subsets);
        interp.run(&bulletin.datadesc, &mut state, &mut handler)?;
        handler.into_writer().into_bytes()
    } else {
        let mut out = BitWriter::new();
        for subset in &bulletin.subsets {
            let mut state = InterpreterState::new();
            let mut handler = UncompressedEncoder::new(subset, EncodeOptions::new());
            interp.run(&bulletin.datadesc, &mut state, &mut handler)?;
            out.raw_append(&handler.into_writer().into_bytes());
        }
        out.into_bytes()
    };

    let mut body = Vec::new();
    write_section1(&mut body, &bulletin.header);

    let mut section3 = Vec::new();
    section3.push(0u8); // reserved
    section3.extend_from_slice(&(bulletin.subsets.len() as u16).to_be_bytes());
    let mut flags = SectionThreeFlags::empty();
    if bulletin.header.compressed {
        flags |= SectionThreeFlags::COMPRESSED;
    }
    section3.push(flags.bits());
    for code in &bulletin.datadesc {
        section3.extend_from_slice(&code.raw().to_be_bytes());
    }
    write_section(&mut body, &section3);

    let mut section4 = Vec::new();
    section4.push(0u8); // reserved
    section4.extend_from_slice(&data_payload);
    write_section(&mut body, &section4);

    let mut out = Vec::new();
    out.extend_from_slice(b"BUFR");
    let total_len = 4 + 3 + 1 + body.len() + 4; // "BUFR" + length field + edition + sections 1..4 + "7777"
    out.extend_from_slice(&u24_be(total_len));
    out.push(bulletin.header.edition);
    out.extend_from_slice(&body);
    out.extend_from_slice(b"7777");
    Ok(out)
}

fn write_section1(out: &mut Vec<u8>, header: &Header) {
    let mut section1 = Vec::new();
    section1.push(header.master_table);
    if header.edition == 4 {
        section1.extend_from_slice(&header.centre.to_be_bytes());
        section1.extend_from_slice(&header.subcentre.to_be_bytes());
        section1.push(header.update_sequence_number);
        section1.push(if header.optional_section_present { 0b1000_0000 } else { 0 });
        section1.push(header.data_category);
        section1.push(header.local_subcategory);
        section1.push(header.data_subcategory);
        section1.push(header.master_table_version);
        section1.push(header.local_table_version);
        section1.extend_from_slice(&header.reference.year.to_be_bytes());
        section1.push(header.reference.month);
        section1.push(header.reference.day);
        section1.push(header.reference.hour);
        section1.push(header.reference.minute);
        section1.push(header.reference.second);
    } else {
        section1.push(header.centre as u8);
        section1.push(header.subcentre as u8);
        section1.push(header.update_sequence_number);
        section1.push(if header.optional_section_present { 0b1000_0000 } else { 0 });
        section1.push(header.data_category);
        section1.push(header.data_subcategory);
        section1.push(header.master_table_version);
        section1.push(header.local_table_version);
        section1.push(header.reference.year as u8);
        section1.push(header.reference.month);
        section1.push(header.reference.day);
        section1.push(header.reference.hour);
        section1.push(header.reference.minute);
    }
    write_section(out, &section1);
}

/// Prefix `contents` with its own 3-byte length (length field included)
/// and append to `out`.
fn write_section(out: &mut Vec<u8>, contents: &[u8]) {
    let len = contents.len() + 3;
    out.extend_from_slice(&u24_be(len));
    out.extend_from_slice(contents);
}

fn u24_be(v: usize) -> [u8; 3] {
    [((v >> 16) & 0xFF) as u8, ((v >> 8) & 0xFF) as u8, (v & 0xFF) as u8]
}
