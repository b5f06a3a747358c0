//! CREX wire framing: the `CREX++` header, section 1 (table versions,
//! category, descriptor list, optional check-digit flag), section 2
//! (one `+`-separated data block per subset), an optional `SUPP` section
//! 3, and the `"7777"` terminator.

use crate::bulletin::{Bulletin, Header, ReferenceDateTime};
use crate::crex_codec::{CrexDecoder, CrexEncoder};
use crate::error::Error;
use crate::interp::DDSInterpreter;
use crate::options::{DecodeOptions, EncodeOptions};
use crate::state::InterpreterState;
use crate::tableset::TableSet;
use crate::text::TextReader;
use crate::varcode::Varcode;

fn parse_ascii_digits(bytes: &[u8]) -> Result<u8, Error> {
    std::str::from_utf8(bytes)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| Error::parse(format!("malformed CREX digit group `{}`", String::from_utf8_lossy(bytes))))
}

/// `Ttteevv`: master table version, local table version, edition — each
/// two ASCII digits.
fn parse_version_token(tok: &[u8]) -> Result<(u8, u8, u8), Error> {
    if tok.len() != 7 || tok[0] != b'T' {
        return Err(Error::parse(format!(
            "malformed CREX version token `{}`",
            String::from_utf8_lossy(tok)
        )));
    }
    let master_table_version = parse_ascii_digits(&tok[1..3])?;
    let local_table_version = parse_ascii_digits(&tok[3..5])?;
    let edition = parse_ascii_digits(&tok[5..7])?;
    Ok((master_table_version, local_table_version, edition))
}

/// `Accc` or `Acccsss`: data category, optionally followed by subcategory.
fn parse_category_token(tok: &[u8]) -> Result<(u8, u8), Error> {
    if tok.first() != Some(&b'A') {
        return Err(Error::parse(format!(
            "malformed CREX category token `{}`",
            String::from_utf8_lossy(tok)
        )));
    }
    let digits = &tok[1..];
    match digits.len() {
        3 => Ok((parse_ascii_digits(digits)?, 0)),
        6 => Ok((parse_ascii_digits(&digits[0..3])?, parse_ascii_digits(&digits[3..6])?)),
        _ => Err(Error::parse(format!(
            "malformed CREX category token `{}`",
            String::from_utf8_lossy(tok)
        ))),
    }
}

/// `Bxxyyy` / `Rxxyyy` / `Cxxyyy` / `Dxxyyy`: an `F` letter plus `X` (2
/// digits) and `Y` (3 digits).
fn parse_descriptor_token(tok: &[u8]) -> Result<Varcode, Error> {
    if tok.len() != 6 {
        return Err(Error::parse(format!(
            "malformed CREX descriptor token `{}`",
            String::from_utf8_lossy(tok)
        )));
    }
    let f: u8 = match tok[0] {
        b'B' => 0,
        b'R' => 1,
        b'C' => 2,
        b'D' => 3,
        other => {
            return Err(Error::parse(format!(
                "unknown CREX descriptor prefix `{}`",
                other as char
            )))
        }
    };
    let x = parse_ascii_digits(&tok[1..3])?;
    let y = parse_ascii_digits(&tok[3..6])?;
    Varcode::new(f, x, y)
}

fn format_descriptor_token(code: Varcode) -> String {
    let letter = match code.f() {
        0 => 'B',
        1 => 'R',
        2 => 'C',
        _ => 'D',
    };
    format!("{letter}{:02}{:03}", code.x(), code.y())
}

/// Decode a full CREX message.
pub fn decode_crex(text: &str, tables: &dyn TableSet, options: &DecodeOptions) -> Result<Bulletin, Error> {
    let bytes = text.as_bytes();
    let mut reader = TextReader::new(bytes, false);

    let header_token = reader.read_token()?;
    if header_token != b"CREX++" {
        return Err(Error::parse("missing \"CREX++\" header").with_location(0, 0));
    }

    let version_token = reader.read_token()?;
    let (master_table_version, local_table_version, edition) = parse_version_token(&version_token)?;

    let category_token = reader.read_token()?;
    let (data_category, data_subcategory) = parse_category_token(&category_token)?;

    let mut datadesc = Vec::new();
    let mut check_digit_mode = false;
    loop {
        let tok = reader.read_token()?;
        if tok == b"++" {
            break;
        }
        if tok == b"E" {
            check_digit_mode = true;
            continue;
        }
        datadesc.push(parse_descriptor_token(&tok)?);
    }

    let mut reader = TextReader::new(&bytes[reader.byte_offset()..], check_digit_mode);

    let interp = DDSInterpreter::new(tables);
    let mut subsets = Vec::new();
    loop {
        let mut state = InterpreterState::new();
        let mut decoder = CrexDecoder::new(reader, *options);
        interp.run(&datadesc, &mut state, &mut decoder)?;
        let (subset, returned_reader) = decoder.into_parts();
        subsets.push(subset);
        reader = returned_reader;

        let sep = reader.read_token()?;
        if sep == b"++" {
            break;
        }
        if sep != b"+" {
            return Err(Error::parse(
                "expected \"+\" subset separator or \"++\" end of section 2",
            ));
        }
    }

    let marker = reader.read_token()?;
    let end_marker = if marker == b"SUPP" {
        loop {
            let t = reader.read_token()?;
            if t == b"++" {
                break;
            }
        }
        reader.read_token()?
    } else {
        marker
    };
    if end_marker != b"7777" {
        return Err(Error::parse("missing \"7777\" end marker"));
    }

    let header = Header {
        edition,
        master_table: 0,
        centre: 0,
        subcentre: 0,
        update_sequence_number: 0,
        data_category,
        data_subcategory,
        local_subcategory: 0,
        master_table_version,
        local_table_version,
        reference: ReferenceDateTime::default(),
        optional_section_present: false,
        compressed: false,
    };

    Ok(Bulletin {
        header,
        datadesc,
        subsets,
    })
}

/// Encode a [`Bulletin`] as CREX text. Always writes with check digits
/// disabled; the decoder still accepts either form.
pub fn encode_crex(bulletin: &Bulletin, tables: &dyn TableSet, options: &EncodeOptions) -> Result<String, Error> {
    let _ = options;
    let mut out = String::from("CREX++\r\r\n");
    out.push_str(&format!(
        "T{:02}{:02}{:02} ",
        bulletin.header.master_table_version, bulletin.header.local_table_version, bulletin.header.edition
    ));
    if bulletin.header.data_subcategory == 0 {
        out.push_str(&format!("A{:03} ", bulletin.header.data_category));
    } else {
        out.push_str(&format!(
            "A{:03}{:03} ",
            bulletin.header.data_category, bulletin.header.data_subcategory
        ));
    }
    for code in &bulletin.datadesc {
        out.push_str(&format_descriptor_token(*code));
        out.push(' ');
    }
    out.push_str("++\r\r\n");

    let interp = DDSInterpreter::new(tables);
    let mut subset_texts = Vec::with_capacity(bulletin.subsets.len());
    for subset in &bulletin.subsets {
        let mut state = InterpreterState::new();
        let mut encoder = CrexEncoder::new(subset, false, EncodeOptions::new());
        interp.run(&bulletin.datadesc, &mut state, &mut encoder)?;
        subset_texts.push(encoder.into_string());
    }
    out.push_str(&subset_texts.join(" + "));
    out.push_str(" ++\r\r\n7777");
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tableset::StaticTableSet;
    use crate::var::{DomainPolicy, Var};
    use crate::varinfo::{VarType, VarinfoData};

    fn header() -> Header {
        Header {
            edition: 2,
            master_table: 0,
            centre: 0,
            subcentre: 0,
            update_sequence_number: 0,
            data_category: 1,
            data_subcategory: 0,
            local_subcategory: 0,
            master_table_version: 13,
            local_table_version: 0,
            reference: ReferenceDateTime::default(),
            optional_section_present: false,
            compressed: false,
        }
    }

    #[test]
    fn roundtrips_a_single_subset_message() {
        let mut tables = StaticTableSet::new();
        let code = Varcode::b(12, 101).unwrap();
        tables.insert_b(VarinfoData::new_element(code, "t", "K", VarType::Integer, 0, 0, 5, 0, 12));
        let info = tables.lookup_b(code).unwrap();

        let mut subset = crate::subset::Subset::new();
        subset.push(Var::new_int(info, 273, DomainPolicy::default()).unwrap());
        let bulletin = Bulletin {
            header: header(),
            datadesc: vec![code],
            subsets: vec![subset],
        };

        let text = encode_crex(&bulletin, &tables, &EncodeOptions::new()).unwrap();
        let decoded = decode_crex(&text, &tables, &DecodeOptions::new()).unwrap();
        assert_eq!(decoded.subsets[0].get(0).unwrap().as_int(), Some(273));
        assert_eq!(decoded.header.master_table_version, 13);
        assert_eq!(decoded.header.data_category, 1);
    }
}
