//! Uncompressed BUFR decoding: one [`DDSInterpreter`](crate::interp::DDSInterpreter)
//! run per subset against a single bit cursor.

use crate::bits::BitReader;
use crate::error::Error;
use crate::handler::{associated_field_attribute_code, associated_field_varinfo, AssociatedField, Handler, VisitCtx};
use crate::options::DecodeOptions;
use crate::subset::Subset;
use crate::var::Var;
use crate::varcode::Varcode;
use crate::varinfo::{VarType, Varinfo};

/// `Handler` that decodes one subset from an uncompressed BUFR data
/// section: a cursor plus an accumulator, advanced one descriptor at a
/// time.
pub struct UncompressedDecoder<'input> {
    reader: BitReader<'input>,
    subset: Subset,
    options: DecodeOptions,
    last_value: Option<crate::var::Value>,
}

impl<'input> UncompressedDecoder<'input> {
    #[must_use]
    pub fn new(reader: BitReader<'input>, options: DecodeOptions) -> Self {
        Self {
            reader,
            subset: Subset::new(),
            options,
            last_value: None,
        }
    }

    #[must_use]
    pub fn into_parts(self) -> (Subset, BitReader<'input>) {
        (self.subset, self.reader)
    }

    fn read_associated_field(
        &mut self,
        af: Option<AssociatedField>,
    ) -> Result<Option<Var>, Error> {
        let Some(af) = af else { return Ok(None) };
        let bits = af.bits.min(32) as u8;
        let raw = self.reader.get_bits(bits)?;
        let Some(code) = associated_field_attribute_code(af.significance)? else {
            return Ok(None);
        };
        let missing_raw = if af.bits >= 32 { u32::MAX } else { (1u32 << af.bits) - 1 };
        let info: Varinfo = associated_field_varinfo(code, af.bits);
        if raw == missing_raw {
            Ok(Some(Var::new_unset(info)))
        } else {
            Ok(Some(Var::new_int(info, raw as i32, self.options.domain_policy())?))
        }
    }

    fn decode_value(&mut self, info: &Varinfo) -> Result<Var, Error> {
        match info.var_type {
            VarType::Integer | VarType::Decimal => {
                let bits = info.bit_len.min(32) as u8;
                let raw = self.reader.get_bits(bits)?;
                if u64::from(raw) == info.missing_raw() && !info.never_missing() {
                    return Ok(Var::new_unset(info.clone()));
                }
                let actual = info.bit_ref.saturating_add(raw as i32);
                if info.var_type == VarType::Integer {
                    Var::new_int(info.clone(), actual, self.options.domain_policy())
                } else {
                    let scaled = actual as f64 * 10f64.powi(-info.scale);
                    Var::new_double(info.clone(), scaled, self.options.domain_policy())
                }
            }
            VarType::String => {
                let bytes = self.reader.read_raw(info.bit_len)?;
                if bytes.iter().all(|&b| b == 0xFF) {
                    Ok(Var::new_unset(info.clone()))
                } else {
                    Ok(Var::new_string(info.clone(), bytes))
                }
            }
            VarType::Binary => {
                let bytes = self.reader.read_raw(info.bit_len)?;
                if bytes.iter().all(|&b| b == 0xFF) {
                    Ok(Var::new_unset(info.clone()))
                } else {
                    Ok(Var::new_binary(info.clone(), bytes))
                }
            }
        }
    }
}

impl Handler for UncompressedDecoder<'_> {
    fn visit_b(&mut self, info: &Varinfo, ctx: &VisitCtx) -> Result<(), Error> {
        let assoc_attr = self.read_associated_field(ctx.associated_field)?;
        let mut var = self.decode_value(info)?;
        if let Some(attr) = assoc_attr {
            var.set_attr(attr);
        }
        self.last_value = Some(var.value().clone());

        if let Some(target) = ctx.bitmap_attribute_target.or(ctx.substituted_value_target) {
            let owner = self
                .subset
                .get_mut(target)
                .ok_or_else(|| Error::consistency("bitmap/substituted target out of range"))?;
            owner.set_attr(var);
        } else {
            self.subset.push(var);
        }
        Ok(())
    }

    fn bitmap_bit(&mut self, _target: usize) -> Result<bool, Error> {
        Ok(self.reader.get_bits(1)? == 0)
    }

    fn raw_replication_count(&mut self) -> Result<u32, Error> {
        Err(Error::unimplemented(
            "BUFR delayed replication without a B31 factor descriptor is not supported",
        ))
    }

    fn last_int_value(&self) -> Result<i32, Error> {
        match &self.last_value {
            Some(crate::var::Value::Int(v)) => Ok(*v),
            Some(crate::var::Value::Unset) => {
                Err(Error::consistency("expected a replication/significance value, found missing"))
            }
            Some(_) => Err(Error::consistency("expected an integer value")),
            None => Err(Error::consistency("no value decoded yet")),
        }
    }

    fn subset_len(&self) -> usize {
        self.subset.len()
    }

    fn var_info_at(&self, pos: usize) -> Result<Varinfo, Error> {
        self.subset
            .get(pos)
            .map(|v| v.info().clone())
            .ok_or_else(|| Error::consistency("substituted value target out of range"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bits::BitWriter;
    use crate::interp::DDSInterpreter;
    use crate::state::InterpreterState;
    use crate::tableset::StaticTableSet;

    #[test]
    fn decodes_a_single_integer_value() {
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

        let mut w = BitWriter::new();
        w.add_bits(273, 12);
        let bytes = w.into_bytes();

        let interp = DDSInterpreter::new(&tables);
        let mut state = InterpreterState::new();
        let mut handler = UncompressedDecoder::new(BitReader::new(&bytes), DecodeOptions::new());
        interp.run(&[code], &mut state, &mut handler).unwrap();

        let (subset, _) = handler.into_parts();
        assert_eq!(subset.get(0).unwrap().as_int(), Some(273));
    }

    #[test]
    fn missing_value_decodes_to_unset() {
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

        let mut w = BitWriter::new();
        w.add_missing(12);
        let bytes = w.into_bytes();

        let interp = DDSInterpreter::new(&tables);
        let mut state = InterpreterState::new();
        let mut handler = UncompressedDecoder::new(BitReader::new(&bytes), DecodeOptions::new());
        interp.run(&[code], &mut state, &mut handler).unwrap();

        let (subset, _) = handler.into_parts();
        assert!(subset.get(0).unwrap().is_unset());
    }
}
