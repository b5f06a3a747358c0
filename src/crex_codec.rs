//! CREX (character form) decoding and encoding, over the same descriptor
//! walk as BUFR, reading/writing through [`TextReader`]/[`TextWriter`]
//! instead of a bit cursor. CREX has no compressed form.

use std::sync::Arc;

use crate::error::Error;
use crate::handler::{associated_field_attribute_code, Handler, VisitCtx};
use crate::options::{DecodeOptions, EncodeOptions};
use crate::subset::Subset;
use crate::text::{TextField, TextReader, TextWriter};
use crate::var::{Value, Var};
use crate::varcode::Varcode;
use crate::varinfo::{VarType, Varinfo, VarinfoData};

/// Decimal digits needed to hold an unsigned value up to `2^bits - 1`.
fn digits_for_bits(bits: u32) -> usize {
    ((f64::from(bits) * std::f64::consts::LOG10_2).ceil() as usize).max(1)
}

pub struct CrexDecoder<'input> {
    reader: TextReader<'input>,
    subset: Subset,
    options: DecodeOptions,
    last_value: Option<Value>,
}

impl<'input> CrexDecoder<'input> {
    #[must_use]
    pub fn new(reader: TextReader<'input>, options: DecodeOptions) -> Self {
        Self {
            reader,
            subset: Subset::new(),
            options,
            last_value: None,
        }
    }

    #[must_use]
    pub fn into_parts(self) -> (Subset, TextReader<'input>) {
        (self.subset, self.reader)
    }

    fn decode_value(&mut self, info: &Varinfo) -> Result<Var, Error> {
        match info.var_type {
            VarType::Integer => match self.reader.read_int(info.len as usize)? {
                None => Ok(Var::new_unset(info.clone())),
                Some(v) => Var::new_int(info.clone(), v as i32, self.options.domain_policy()),
            },
            VarType::Decimal => match self.reader.read_int(info.len as usize)? {
                None => Ok(Var::new_unset(info.clone())),
                Some(v) => {
                    let scaled = v as f64 * 10f64.powi(-info.scale);
                    Var::new_double(info.clone(), scaled, self.options.domain_policy())
                }
            },
            VarType::String | VarType::Binary => match self.reader.read_field(info.len as usize)? {
                TextField::Missing => Ok(Var::new_unset(info.clone())),
                TextField::Text(bytes) => Ok(if info.var_type == VarType::String {
                    Var::new_string(info.clone(), bytes)
                } else {
                    Var::new_binary(info.clone(), bytes)
                }),
            },
        }
    }
}

impl Handler for CrexDecoder<'_> {
    fn visit_b(&mut self, info: &Varinfo, ctx: &VisitCtx) -> Result<(), Error> {
        let assoc = match &ctx.associated_field {
            Some(af) => {
                let digits = digits_for_bits(af.bits);
                let value = self.reader.read_int(digits)?;
                match associated_field_attribute_code(af.significance)? {
                    Some(code) => {
                        let af_info: Varinfo = Arc::new(VarinfoData::new_element(
                            code,
                            "associated field value",
                            "Numeric",
                            VarType::Integer,
                            0,
                            0,
                            digits as u32,
                            0,
                            af.bits,
                        ));
                        match value {
                            None => Some(Var::new_unset(af_info)),
                            Some(v) => Some(Var::new_int(af_info, v as i32, self.options.domain_policy())?),
                        }
                    }
                    None => None,
                }
            }
            None => None,
        };

        let mut var = self.decode_value(info)?;
        if let Some(attr) = assoc {
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
        Ok(self.reader.read_int(1)?.unwrap_or(1) == 0)
    }

    fn raw_replication_count(&mut self) -> Result<u32, Error> {
        Ok(self.reader.read_int(3)?.unwrap_or(0).max(0) as u32)
    }

    fn last_int_value(&self) -> Result<i32, Error> {
        match &self.last_value {
            Some(Value::Int(v)) => Ok(*v),
            Some(Value::Unset) => {
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

pub struct CrexEncoder<'s> {
    writer: TextWriter,
    subset: &'s Subset,
    pos: usize,
    #[allow(dead_code)]
    options: EncodeOptions,
    last_value: Option<Value>,
}

impl<'s> CrexEncoder<'s> {
    #[must_use]
    pub fn new(subset: &'s Subset, check_digit_mode: bool, options: EncodeOptions) -> Self {
        Self {
            writer: TextWriter::new(check_digit_mode),
            subset,
            pos: 0,
            options,
            last_value: None,
        }
    }

    #[must_use]
    pub fn into_string(self) -> String {
        self.writer.into_string()
    }

    fn encode_value(&mut self, info: &Varinfo, var: &Var) -> Result<(), Error> {
        match (info.var_type, var.value()) {
            (VarType::Integer | VarType::Decimal, Value::Unset) => {
                self.writer.write_missing(info.len as usize);
            }
            (VarType::Integer, Value::Int(v)) => {
                self.writer.write_int(i64::from(*v), info.len as usize)?;
            }
            (VarType::Decimal, Value::Double(v)) => {
                let raw = (v * 10f64.powi(info.scale)).round() as i64;
                self.writer.write_int(raw, info.len as usize)?;
            }
            (VarType::String | VarType::Binary, Value::Unset) => {
                self.writer.write_missing(info.len as usize);
            }
            (VarType::String, Value::String(bytes)) => {
                self.writer.write_text(bytes, info.len as usize)?;
            }
            (VarType::Binary, Value::Binary(bytes)) => {
                self.writer.write_text(bytes, info.len as usize)?;
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

impl Handler for CrexEncoder<'_> {
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
            self.encode_value(info, &attr)?;
            self.last_value = Some(attr.value().clone());
            return Ok(());
        }

        let var = self
            .subset
            .get(self.pos)
            .ok_or_else(|| Error::consistency("subset has fewer variables than the descriptor sequence expects"))?;
        self.pos += 1;

        if let Some(af) = &ctx.associated_field {
            let digits = digits_for_bits(af.bits);
            match associated_field_attribute_code(af.significance)? {
                Some(code) => match var.get_attr(code) {
                    Some(attr) if !attr.is_unset() => {
                        let v = attr.as_int().ok_or_else(|| {
                            Error::consistency("associated field attribute is not integer-valued")
                        })?;
                        self.writer.write_int(i64::from(v), digits)?;
                    }
                    _ => self.writer.write_missing(digits),
                },
                None => self.writer.write_missing(digits),
            }
        }

        self.encode_value(info, var)?;
        self.last_value = Some(var.value().clone());
        Ok(())
    }

    fn bitmap_bit(&mut self, target: usize) -> Result<bool, Error> {
        let present = self
            .subset
            .get(target)
            .map(|v| !v.attrs().is_empty())
            .unwrap_or(false);
        self.writer.write_int(i64::from(!present), 1)?;
        Ok(present)
    }

    fn raw_replication_count(&mut self) -> Result<u32, Error> {
        let candidate = self.pos;
        let count = self
            .subset
            .get(candidate)
            .and_then(Var::as_int)
            .unwrap_or(0)
            .max(0) as u32;
        self.writer.write_int(i64::from(count), 3)?;
        Ok(count)
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
