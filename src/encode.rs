//! Uncompressed BUFR encoding: the mirror image of [`crate::decode`], one
//! [`DDSInterpreter`](crate::interp::DDSInterpreter) run per subset writing
//! into a single bit stream.

use std::sync::Arc;

use crate::bits::BitWriter;
use crate::error::Error;
use crate::handler::{associated_field_attribute_code, AssociatedField, Handler, VisitCtx};
use crate::options::EncodeOptions;
use crate::subset::Subset;
use crate::var::{Value, Var};
use crate::varcode::Varcode;
use crate::varinfo::{VarType, Varinfo, VarinfoData};

/// `Handler` that encodes one subset's already-decoded `Var`s against a
/// descriptor sequence, writing into a shared [`BitWriter`].
pub struct UncompressedEncoder<'s> {
    writer: BitWriter,
    subset: &'s Subset,
    pos: usize,
    options: EncodeOptions,
    last_value: Option<Value>,
}

impl<'s> UncompressedEncoder<'s> {
    #[must_use]
    pub fn new(subset: &'s Subset, options: EncodeOptions) -> Self {
        Self {
            writer: BitWriter::new(),
            subset,
            pos: 0,
            options,
            last_value: None,
        }
    }

    #[must_use]
    pub fn into_writer(self) -> BitWriter {
        self.writer
    }

    fn write_associated_field(&mut self, var: &Var, af: &AssociatedField) -> Result<(), Error> {
        let bits = af.bits.min(32) as u8;
        match associated_field_attribute_code(af.significance)? {
            Some(code) => match var.get_attr(code) {
                Some(attr) if !attr.is_unset() => {
                    let value = attr.as_int().ok_or_else(|| {
                        Error::consistency("associated field attribute is not integer-valued")
                    })?;
                    self.writer.add_bits(value as u32, bits);
                }
                _ => self.writer.add_missing(bits),
            },
            None => self.writer.add_missing(bits),
        }
        Ok(())
    }

    fn write_value(&mut self, info: &Varinfo, var: &Var) -> Result<(), Error> {
        match (info.var_type, var.value()) {
            (VarType::Integer | VarType::Decimal, Value::Unset) => {
                self.writer.add_missing(info.bit_len.min(32) as u8);
            }
            (VarType::Integer, Value::Int(v)) => {
                let raw = v.checked_sub(info.bit_ref).ok_or_else(|| {
                    Error::domain(format!("{} value {v} underflows its reference", info.code))
                })?;
                self.writer.add_bits(raw as u32, info.bit_len.min(32) as u8);
            }
            (VarType::Decimal, Value::Double(v)) => {
                let raw = (v * 10f64.powi(info.scale)).round() as i32 - info.bit_ref;
                self.writer.add_bits(raw as u32, info.bit_len.min(32) as u8);
            }
            (VarType::String, Value::Unset) => {
                self.writer.append_binary(&vec![0xFF; info.bit_len.div_ceil(8) as usize], info.bit_len);
            }
            (VarType::String, Value::String(bytes)) => {
                self.writer.append_string(bytes, info.bit_len);
            }
            (VarType::Binary, Value::Unset) => {
                self.writer.append_binary(&vec![0xFF; info.bit_len.div_ceil(8) as usize], info.bit_len);
            }
            (VarType::Binary, Value::Binary(bytes)) => {
                self.writer.append_binary(bytes, info.bit_len);
            }
            (want, got) => {
                return Err(Error::consistency(format!(
                    "{}: value {got:?} does not match declared type {want:?}",
                    info.code
                )))
            }
        }
        Ok(())
    }
}

impl Handler for UncompressedEncoder<'_> {
    fn visit_b(&mut self, info: &Varinfo, ctx: &VisitCtx) -> Result<(), Error> {
        if let Some(target) = ctx.bitmap_attribute_target.or(ctx.substituted_value_target) {
            let owner = self
                .subset
                .get(target)
                .ok_or_else(|| Error::consistency("bitmap/substituted target out of range"))?;
            let attr = owner
                .get_attr(info.code)
                .cloned()
                .unwrap_or_else(|| Var::new_unset(info.clone()));
            self.write_value(info, &attr)?;
            self.last_value = Some(attr.value().clone());
            return Ok(());
        }

        let var = self
            .subset
            .get(self.pos)
            .ok_or_else(|| Error::consistency("subset has fewer variables than the descriptor sequence expects"))?;
        self.pos += 1;

        if let Some(af) = &ctx.associated_field {
            self.write_associated_field(var, af)?;
        }
        self.write_value(info, var)?;
        self.last_value = Some(var.value().clone());
        Ok(())
    }

    fn bitmap_bit(&mut self, target: usize) -> Result<bool, Error> {
        // Derived from whether the candidate position ends up carrying any
        // attributes at all; see DESIGN.md for the tradeoffs of this
        // approximation versus a full lookahead at the attribute codes that
        // follow the bitmap declaration.
        let present = self
            .subset
            .get(target)
            .map(|v| !v.attrs().is_empty())
            .unwrap_or(false);
        self.writer.add_bits(u32::from(!present), 1);
        Ok(present)
    }

    fn raw_replication_count(&mut self) -> Result<u32, Error> {
        Err(Error::unimplemented(
            "BUFR delayed replication without a B31 factor descriptor is not supported",
        ))
    }

    fn last_int_value(&self) -> Result<i32, Error> {
        match &self.last_value {
            Some(Value::Int(v)) => Ok(*v),
            Some(Value::Unset) => {
                Err(Error::consistency("expected a replication/significance value, found missing"))
            }
            Some(_) => Err(Error::consistency("expected an integer value")),
            None => Err(Error::consistency("no value encoded yet")),
        }
    }

    fn subset_len(&self) -> usize {
        self.pos
    }

    fn var_info_at(&self, pos: usize) -> Result<Varinfo, Error> {
        self.subset
            .get(pos)
            .map(|v| v.info().clone())
            .ok_or_else(|| Error::consistency("substituted value target out of range"))
    }
}

#[allow(dead_code)]
fn opaque_binary_info(code: Varcode, bit_len: u32) -> Varinfo {
    Arc::new(VarinfoData::new_element(
        code,
        "local override",
        "",
        VarType::Binary,
        0,
        0,
        bit_len / 8,
        0,
        bit_len,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bits::BitReader;
    use crate::decode::UncompressedDecoder;
    use crate::interp::DDSInterpreter;
    use crate::options::DecodeOptions;
    use crate::state::InterpreterState;
    use crate::tableset::StaticTableSet;
    use crate::varinfo::VarinfoData;

    #[test]
    fn roundtrips_a_single_integer_value() {
        let mut tables = StaticTableSet::new();
        let code = Varcode::b(12, 101).unwrap();
        tables.insert_b(VarinfoData::new_element(
            code,
            "temperature",
            "K",
            VarType::Integer,
            0,
            0,
            5,
            0,
            12,
        ));

        let info = tables.lookup_b(code).unwrap();
        let mut subset = Subset::new();
        subset.push(Var::new_int(info, 273, crate::var::DomainPolicy::default()).unwrap());

        let interp = DDSInterpreter::new(&tables);
        let mut state = InterpreterState::new();
        let mut encoder = UncompressedEncoder::new(&subset, EncodeOptions::new());
        interp.run(&[code], &mut state, &mut encoder).unwrap();
        let bytes = encoder.into_writer().into_bytes();

        let mut state = InterpreterState::new();
        let mut decoder = UncompressedDecoder::new(BitReader::new(&bytes), DecodeOptions::new());
        interp.run(&[code], &mut state, &mut decoder).unwrap();
        let (decoded, _) = decoder.into_parts();
        assert_eq!(decoded.get(0).unwrap().as_int(), Some(273));
    }
}
