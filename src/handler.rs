//! The callback surface the [`crate::interp::DDSInterpreter`] drives.
//!
//! Rather than branch on "are we decoding or encoding, compressed or not"
//! throughout the descriptor walk, the walk is written once against this
//! trait and each wire format/mode supplies its own implementation: a
//! visitor generalized from "visit one block/record" to "visit one
//! resolved B descriptor".

use std::sync::Arc;

use crate::error::Error;
use crate::varcode::Varcode;
use crate::varinfo::{VarType, Varinfo, VarinfoData};

/// Per-visit context the interpreter has already resolved from
/// [`crate::state::InterpreterState`] before calling [`Handler::visit_b`],
/// so the handler doesn't need to re-derive it.
#[derive(Debug, Clone, Default)]
pub struct VisitCtx {
    /// Set whenever an associated field is active and this isn't the
    /// B31021 that just defined its significance.
    pub associated_field: Option<AssociatedField>,
    /// Set when this descriptor is `(0,33,*)` while a bitmap is active:
    /// the value is an attribute of `subset[target]`, not a standalone
    /// variable.
    pub bitmap_attribute_target: Option<usize>,
    /// Set by a preceding C23255: this value replaces/attaches to
    /// `subset[target]` using that variable's own `Varinfo`, not the
    /// descriptor's.
    pub substituted_value_target: Option<usize>,
}

#[derive(Debug, Clone, Copy)]
pub struct AssociatedField {
    pub bits: u32,
    pub significance: u32,
}

impl VisitCtx {
    #[must_use]
    pub fn is_plain(&self) -> bool {
        self.associated_field.is_none()
            && self.bitmap_attribute_target.is_none()
            && self.substituted_value_target.is_none()
    }
}

/// Resolve a B31021 significance code to the attribute code it produces,
/// mirroring `wreport::Var::enqa_by_associated_field_significance`:
/// `1`→B33002, `2`→B33003, `6`→B33050; `3..=5`, `9..=20`, `22..=62` and `63`
/// are documented reserved/no-meaning values, logged and ignored; anything
/// else is an unsupported C04 modifier.
pub fn associated_field_attribute_code(significance: u32) -> Result<Option<Varcode>, Error> {
    match significance {
        1 => Ok(Some(Varcode::b(33, 2)?)),
        2 => Ok(Some(Varcode::b(33, 3)?)),
        6 => Ok(Some(Varcode::b(33, 50)?)),
        3..=5 | 9..=20 => {
            tracing::warn!(significance, "ignoring B31021 value, documented as reserved");
            Ok(None)
        }
        22..=62 => {
            tracing::warn!(
                significance,
                "ignoring B31021 value, documented as reserved for local use"
            );
            Ok(None)
        }
        63 => Ok(None),
        other => Err(Error::unimplemented(format!(
            "C04 modifiers with B31021={other} are not supported"
        ))),
    }
}

/// Build the `Varinfo` an associated-field attribute is decoded/encoded
/// against: always `Integer`, `bits` wide, carrying the resolved attribute
/// code.
#[must_use]
pub fn associated_field_varinfo(code: Varcode, bits: u32) -> Varinfo {
    Arc::new(VarinfoData::new_element(
        code,
        "associated field value",
        "Numeric",
        VarType::Integer,
        0,
        0,
        bits.div_ceil(8),
        0,
        bits,
    ))
}

/// Callbacks invoked while walking a descriptor sequence. One
/// implementation per (wire format, direction, compression) combination;
/// see `decode.rs`, `compressed.rs`, `encode.rs` and `crex.rs`.
pub trait Handler {
    /// Visit a fully resolved B descriptor: `info` already reflects any
    /// C-modifier alteration and any C06/substituted-value override.
    fn visit_b(&mut self, info: &Varinfo, ctx: &VisitCtx) -> Result<(), Error>;

    /// Read (decode) or derive (encode) one bit of a bitmap body
    /// `(0,31,31)` for candidate subset position `target`. `true` means
    /// the position is present (`+`).
    fn bitmap_bit(&mut self, target: usize) -> Result<bool, Error>;

    /// Read (decode) or derive (encode) a delayed-replication count when
    /// no explicit B31 descriptor precedes it (the CREX fallback).
    fn raw_replication_count(&mut self) -> Result<u32, Error>;

    /// The integer value of the most recently visited B descriptor, used
    /// to read back a just-decoded/encoded replication factor or
    /// associated-field significance code.
    fn last_int_value(&self) -> Result<i32, Error>;

    /// Number of variables materialized so far in the current subset
    /// (bitmap candidate-range sizing).
    fn subset_len(&self) -> usize;

    /// `Varinfo` of the variable already at subset position `pos`, needed
    /// by a substituted value (C23255), which is read/written using the
    /// target's own metadata rather than a fresh table lookup.
    fn var_info_at(&self, pos: usize) -> Result<Varinfo, Error>;

    /// Whether C05yyy (inline fixed-length octet string, not a table
    /// lookup) is supported by this handler. Compressed decoding can't
    /// express it per subset and reports `false`.
    fn supports_inline_octets(&self) -> bool {
        true
    }
}
