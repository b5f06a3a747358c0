//! End-to-end round trips through the public wire-framing API: build a
//! `Bulletin` by hand, encode it, decode the bytes/text back, and check the
//! result against what went in.

use wreport_dds::{
    decode_bufr, decode_crex, diff, encode_bufr, encode_crex, Bulletin, DecodeOptions,
    DomainPolicy, EncodeOptions, Header, ReferenceDateTime, StaticTableSet, Subset, Var, VarType,
    Varcode, VarinfoData,
};

fn bufr_header(edition: u8, compressed: bool) -> Header {
    Header {
        edition,
        master_table: 0,
        centre: 200,
        subcentre: 0,
        update_sequence_number: 0,
        data_category: 0,
        data_subcategory: 0,
        local_subcategory: 0,
        master_table_version: 30,
        local_table_version: 0,
        reference: ReferenceDateTime {
            year: 2026,
            month: 7,
            day: 28,
            hour: 12,
            minute: 0,
            second: 0,
        },
        optional_section_present: false,
        compressed,
    }
}

fn crex_header() -> Header {
    Header {
        edition: 2,
        master_table: 0,
        centre: 0,
        subcentre: 0,
        update_sequence_number: 0,
        data_category: 12,
        data_subcategory: 0,
        local_subcategory: 0,
        master_table_version: 13,
        local_table_version: 0,
        reference: ReferenceDateTime::default(),
        optional_section_present: false,
        compressed: false,
    }
}

fn temperature_tables() -> (StaticTableSet, Varcode) {
    let mut tables = StaticTableSet::new();
    let code = Varcode::b(12, 101).unwrap();
    tables.insert_b(VarinfoData::new_element(
        code,
        "temperature",
        "K",
        VarType::Integer,
        1,
        0,
        5,
        0,
        15,
    ));
    (tables, code)
}

#[test]
fn associated_field_attaches_quality_flag_as_attribute() {
    let (mut tables, temp) = temperature_tables();
    let significance = Varcode::b(31, 21).unwrap();
    tables.insert_b(VarinfoData::new_element(
        significance,
        "associated field significance",
        "Code table",
        VarType::Integer,
        0,
        0,
        2,
        0,
        6,
    ));
    let datadesc = vec![Varcode::c(4, 4).unwrap(), significance, temp, Varcode::c(4, 0).unwrap()];

    let sig_info = tables.lookup_b(significance).unwrap();
    let temp_info = tables.lookup_b(temp).unwrap();
    // Significance 1 maps to attribute code B33002.
    let assoc_info = std::sync::Arc::new(VarinfoData::new_element(
        Varcode::b(33, 2).unwrap(),
        "associated field value",
        "Numeric",
        VarType::Integer,
        0,
        0,
        1,
        0,
        4,
    ));

    let mut temp_var = Var::new_int(temp_info, 273, DomainPolicy::default()).unwrap();
    temp_var.set_attr(Var::new_int(assoc_info, 5, DomainPolicy::default()).unwrap());

    let mut subset = Subset::new();
    subset.push(Var::new_int(sig_info, 1, DomainPolicy::default()).unwrap());
    subset.push(temp_var);

    let bulletin = Bulletin {
        header: bufr_header(4, false),
        datadesc,
        subsets: vec![subset],
    };

    let bytes = encode_bufr(&bulletin, &tables, &EncodeOptions::new()).unwrap();
    let decoded = decode_bufr(&bytes, &tables, &DecodeOptions::new()).unwrap();

    let decoded_subset = &decoded.subsets[0];
    assert_eq!(decoded_subset.get(0).unwrap().as_int(), Some(1));
    let decoded_temp = decoded_subset.get(1).unwrap();
    assert_eq!(decoded_temp.as_int(), Some(273));
    assert_eq!(
        decoded_temp.get_attr(Varcode::b(33, 2).unwrap()).unwrap().as_int(),
        Some(5)
    );
}

#[test]
fn compressed_strings_roundtrip_with_one_subset_missing() {
    let mut tables = StaticTableSet::new();
    let code = Varcode::b(1, 19).unwrap();
    tables.insert_b(VarinfoData::new_element(
        code,
        "station or site name",
        "CCITT IA5",
        VarType::String,
        0,
        0,
        3,
        0,
        24,
    ));
    let info = tables.lookup_b(code).unwrap();

    let mut first = Subset::new();
    first.push(Var::new_string(info.clone(), b"AAA".to_vec()));
    let mut second = Subset::new();
    second.push(Var::new_unset(info.clone()));
    let mut third = Subset::new();
    third.push(Var::new_string(info.clone(), b"BBB".to_vec()));

    let bulletin = Bulletin {
        header: bufr_header(4, true),
        datadesc: vec![code],
        subsets: vec![first, second, third],
    };

    let bytes = encode_bufr(&bulletin, &tables, &EncodeOptions::new()).unwrap();
    let decoded = decode_bufr(&bytes, &tables, &DecodeOptions::new()).unwrap();

    assert_eq!(decoded.subsets.len(), 3);
    assert_eq!(decoded.subsets[0].get(0).unwrap().value(), &wreport_dds::Value::String(b"AAA".to_vec()));
    assert!(decoded.subsets[1].get(0).unwrap().is_unset());
    assert_eq!(decoded.subsets[2].get(0).unwrap().value(), &wreport_dds::Value::String(b"BBB".to_vec()));
}

#[test]
fn delayed_replication_reads_count_from_leading_b31_factor() {
    let (mut tables, temp) = temperature_tables();
    let factor = Varcode::b(31, 1).unwrap();
    tables.insert_b(VarinfoData::new_element(
        factor,
        "delayed replication factor",
        "Numeric",
        VarType::Integer,
        0,
        0,
        3,
        0,
        8,
    ));
    let datadesc = vec![Varcode::r(2, 0).unwrap(), factor, temp];

    let factor_info = tables.lookup_b(factor).unwrap();
    let temp_info = tables.lookup_b(temp).unwrap();
    let mut subset = Subset::new();
    subset.push(Var::new_int(factor_info, 3, DomainPolicy::default()).unwrap());
    for value in [270, 271, 272] {
        subset.push(Var::new_int(temp_info.clone(), value, DomainPolicy::default()).unwrap());
    }

    let bulletin = Bulletin {
        header: bufr_header(4, false),
        datadesc,
        subsets: vec![subset],
    };

    let bytes = encode_bufr(&bulletin, &tables, &EncodeOptions::new()).unwrap();
    let decoded = decode_bufr(&bytes, &tables, &DecodeOptions::new()).unwrap();

    let decoded_subset = &decoded.subsets[0];
    assert_eq!(decoded_subset.get(0).unwrap().as_int(), Some(3));
    assert_eq!(decoded_subset.get(1).unwrap().as_int(), Some(270));
    assert_eq!(decoded_subset.get(2).unwrap().as_int(), Some(271));
    assert_eq!(decoded_subset.get(3).unwrap().as_int(), Some(272));
}

/// Covers the `(0,31,31)` data-present bitmap together with both a bitmap
/// attribute (C22000-style) and a single substituted value (C23255), which
/// both walk `bitmap_cursor` over the same target list. Regression test for
/// the `bitmap_bit` candidate-index fix: the two candidate positions here
/// are at the *start* of the subset, not its end, so a handler that tracked
/// its own running position instead of the `base + i` index the
/// interpreter computes would have queried the wrong variables.
#[test]
fn bitmap_and_substituted_value_roundtrip() {
    let (tables, temp) = temperature_tables();
    let pct = Varcode::b(33, 7).unwrap();
    let bitmap_body = Varcode::b(31, 31).unwrap();

    let mut tables_with_pct = tables;
    tables_with_pct.insert_b(VarinfoData::new_element(
        pct,
        "% confidence",
        "%",
        VarType::Integer,
        0,
        0,
        3,
        0,
        7,
    ));

    let datadesc = vec![
        temp,
        temp,
        Varcode::c(22, 0).unwrap(),
        Varcode::r(1, 2).unwrap(),
        bitmap_body,
        pct,
        Varcode::c(23, 255).unwrap(),
        temp,
    ];

    let temp_info = tables_with_pct.lookup_b(temp).unwrap();
    let pct_info = tables_with_pct.lookup_b(pct).unwrap();

    let mut first = Var::new_int(temp_info.clone(), 270, DomainPolicy::default()).unwrap();
    first.set_attr(Var::new_int(pct_info, 70, DomainPolicy::default()).unwrap());

    let mut second = Var::new_int(temp_info.clone(), 280, DomainPolicy::default()).unwrap();
    second.set_attr(Var::new_int(temp_info.clone(), 999, DomainPolicy::default()).unwrap());

    let mut subset = Subset::new();
    subset.push(first);
    subset.push(second);

    let bulletin = Bulletin {
        header: bufr_header(4, false),
        datadesc,
        subsets: vec![subset],
    };

    let bytes = encode_bufr(&bulletin, &tables_with_pct, &EncodeOptions::new()).unwrap();
    let decoded = decode_bufr(&bytes, &tables_with_pct, &DecodeOptions::new()).unwrap();

    let decoded_subset = &decoded.subsets[0];
    let decoded_first = decoded_subset.get(0).unwrap();
    assert_eq!(decoded_first.as_int(), Some(270));
    assert_eq!(decoded_first.get_attr(pct).unwrap().as_int(), Some(70));

    let decoded_second = decoded_subset.get(1).unwrap();
    assert_eq!(decoded_second.as_int(), Some(280));
    assert_eq!(decoded_second.get_attr(temp).unwrap().as_int(), Some(999));
}

#[test]
fn crex_roundtrips_multiple_subsets() {
    let (tables, temp) = temperature_tables();
    let mut first = Subset::new();
    first.push(Var::new_int(tables.lookup_b(temp).unwrap(), 270, DomainPolicy::default()).unwrap());
    let mut second = Subset::new();
    second.push(Var::new_int(tables.lookup_b(temp).unwrap(), 281, DomainPolicy::default()).unwrap());

    let bulletin = Bulletin {
        header: crex_header(),
        datadesc: vec![temp],
        subsets: vec![first, second],
    };

    let text = encode_crex(&bulletin, &tables, &EncodeOptions::new()).unwrap();
    assert!(text.starts_with("CREX++"));
    assert!(text.trim_end().ends_with("7777"));

    let decoded = decode_crex(&text, &tables, &DecodeOptions::new()).unwrap();
    assert_eq!(decoded.subsets.len(), 2);
    assert_eq!(decoded.subsets[0].get(0).unwrap().as_int(), Some(270));
    assert_eq!(decoded.subsets[1].get(0).unwrap().as_int(), Some(281));
    assert_eq!(decoded.header.data_category, 12);
    assert_eq!(diff(&bulletin, &decoded), 0);
}

#[test]
fn diff_counts_value_mismatches_between_bulletins() {
    let (tables, temp) = temperature_tables();
    let mut a_subset = Subset::new();
    a_subset.push(Var::new_int(tables.lookup_b(temp).unwrap(), 270, DomainPolicy::default()).unwrap());
    let mut b_subset = Subset::new();
    b_subset.push(Var::new_int(tables.lookup_b(temp).unwrap(), 271, DomainPolicy::default()).unwrap());

    let a = Bulletin {
        header: bufr_header(4, false),
        datadesc: vec![temp],
        subsets: vec![a_subset],
    };
    let b = Bulletin {
        header: bufr_header(4, false),
        datadesc: vec![temp],
        subsets: vec![b_subset],
    };

    assert_eq!(diff(&a, &a), 0);
    assert_eq!(diff(&a, &b), 1);
}

#[test]
fn decode_bufr_rejects_unsupported_edition() {
    let tables = StaticTableSet::new();
    let mut data = Vec::new();
    data.extend_from_slice(b"BUFR");
    data.extend_from_slice(&[0, 0, 12]);
    data.push(47);
    data.extend_from_slice(&[0u8; 4]);
    assert!(decode_bufr(&data, &tables, &DecodeOptions::new()).is_err());
}

#[test]
fn decode_crex_rejects_missing_end_marker() {
    let tables = StaticTableSet::new();
    let text = "CREX++\r\r\nT130002 A012 B12101 ++\r\r\n00270 ++\r\r\n";
    assert!(decode_crex(text, &tables, &DecodeOptions::new()).is_err());
}
