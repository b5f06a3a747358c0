//! Compressed BUFR: a single `DDSInterpreter` run produces or consumes all
//! `N` subsets together, one base value plus one per-subset difference per
//! descriptor (WMO Regulation 94.6.2).

use crate::error::Error;
use crate::bits::{BitReader, BitWriter};
use crate::handler::{
    associated_field_attribute_code, associated_field_varinfo, AssociatedField, Handler, VisitCtx,
};
use crate::options::DecodeOptions;
use crate::subset::Subset;
use crate::var::{Value, Var};
use crate::varcode::Varcode;
use crate::varinfo::{VarType, Varinfo};

/// Base value and diff width shared by every subset of one numeric field,
/// decoded or about to be encoded.
struct NumericHeader {
    base_raw: u32,
    base_missing: bool,
    diff_width: u32,
}

/// Base string/binary value and per-subset diff byte width.
struct BytesHeader {
    base: Vec<u8>,
    diff_width_bytes: u32,
}

/// `Handler` that decodes `n` subsets at once from a compressed BUFR data
/// section.
pub struct CompressedDecoder<'input> {
    reader: BitReader<'input>,
    subsets: Vec<Subset>,
    options: DecodeOptions,
    last_common_value: Option<i32>,
}

impl<'input> CompressedDecoder<'input> {
    #[must_use]
    pub fn new(reader: BitReader<'input>, n: usize, options: DecodeOptions) -> Self {
        Self {
            reader,
            subsets: (0..n).map(|_| Subset::new()).collect(),
            options,
            last_common_value: None,
        }
    }

    #[must_use]
    pub fn into_parts(self) -> (Vec<Subset>, BitReader<'input>) {
        (self.subsets, self.reader)
    }

    fn n(&self) -> usize {
        self.subsets.len()
    }

    /// Read the `[base : bit_len bits][diff width : 6 bits]` header shared
    /// by every subset of one numeric field (WMO Regulation 94.6.2).
    fn read_numeric_header(&mut self, info: &Varinfo) -> Result<NumericHeader, Error> {
        let base_bits = info.bit_len.min(32) as u8;
        let base_raw = self.reader.get_bits(base_bits)?;
        let diff_width = self.reader.get_bits(6)?;
        let base_missing = u64::from(base_raw) == info.missing_raw() && !info.never_missing();
        Ok(NumericHeader {
            base_raw,
            base_missing,
            diff_width,
        })
    }

    /// Read one subset's difference against an already-read header.
    fn read_numeric_diff(&mut self, info: &Varinfo, header: &NumericHeader) -> Result<Var, Error> {
        if header.diff_width == 0 {
            return self.build_numeric(info, header.base_raw, header.base_missing);
        }
        let missing_diff = if header.diff_width >= 32 {
            u32::MAX
        } else {
            (1u32 << header.diff_width) - 1
        };
        let diff = self.reader.get_bits(header.diff_width.min(32) as u8)?;
        if diff == missing_diff {
            Ok(Var::new_unset(info.clone()))
        } else {
            self.build_numeric(info, header.base_raw.saturating_add(diff), false)
        }
    }

    fn build_numeric(&self, info: &Varinfo, raw: u32, missing: bool) -> Result<Var, Error> {
        if missing {
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

    /// Character/binary fields compress by byte count rather than
    /// arithmetic difference: width 0 means every subset equals the
    /// reference string; otherwise each subset supplies its own full value.
    fn read_bytes_header(&mut self, info: &Varinfo) -> Result<BytesHeader, Error> {
        let base = self.reader.read_raw(info.bit_len)?;
        let diff_width_bytes = self.reader.get_bits(6)?;
        Ok(BytesHeader { base, diff_width_bytes })
    }

    fn read_bytes_diff(&mut self, header: &BytesHeader) -> Result<Vec<u8>, Error> {
        if header.diff_width_bytes == 0 {
            Ok(header.base.clone())
        } else {
            self.reader.read_raw(header.diff_width_bytes * 8)
        }
    }

    fn build_bytes(info: &Varinfo, bytes: Vec<u8>) -> Var {
        if bytes.iter().all(|&b| b == 0xFF) {
            Var::new_unset(info.clone())
        } else if info.var_type == VarType::String {
            Var::new_string(info.clone(), bytes)
        } else {
            Var::new_binary(info.clone(), bytes)
        }
    }

    /// Read the associated field's own header (`af_base`/`af_dw`), ahead of
    /// the main field's: `[af_base][af_dw][base][main_dw]` then per subset
    /// `[af_diff][main_diff]`.
    fn read_associated_header(
        &mut self,
        af: AssociatedField,
    ) -> Result<(NumericHeader, Option<Varcode>), Error> {
        let placeholder = associated_field_varinfo(Varcode::b(33, 0)?, af.bits);
        let header = self.read_numeric_header(&placeholder)?;
        let code = associated_field_attribute_code(af.significance)?;
        Ok((header, code))
    }

    /// Read one subset's associated-field difference, returning `None` when
    /// the significance maps to "no attribute" (still consumes the bits).
    fn read_associated_diff(
        &mut self,
        af: AssociatedField,
        header: &NumericHeader,
        code: Option<Varcode>,
    ) -> Result<Option<Var>, Error> {
        let info = associated_field_varinfo(code.unwrap_or(Varcode::b(33, 0)?), af.bits);
        let var = self.read_numeric_diff(&info, header)?;
        Ok(code.map(|_| var))
    }
}

impl Handler for CompressedDecoder<'_> {
    fn visit_b(&mut self, info: &Varinfo, ctx: &VisitCtx) -> Result<(), Error> {
        let af_setup = match ctx.associated_field {
            Some(af) => Some((af, self.read_associated_header(af)?)),
            None => None,
        };

        let mut vars: Vec<Var> = Vec::with_capacity(self.n());
        let mut af_attrs: Vec<Option<Var>> = Vec::with_capacity(self.n());

        match info.var_type {
            VarType::Integer | VarType::Decimal => {
                let header = self.read_numeric_header(info)?;
                for _ in 0..self.n() {
                    let af_attr = match af_setup {
                        Some((af, (ref af_header, code))) => self.read_associated_diff(af, af_header, code)?,
                        None => None,
                    };
                    af_attrs.push(af_attr);
                    vars.push(self.read_numeric_diff(info, &header)?);
                }
            }
            VarType::String | VarType::Binary => {
                let header = self.read_bytes_header(info)?;
                for _ in 0..self.n() {
                    let af_attr = match af_setup {
                        Some((af, (ref af_header, code))) => self.read_associated_diff(af, af_header, code)?,
                        None => None,
                    };
                    af_attrs.push(af_attr);
                    vars.push(Self::build_bytes(info, self.read_bytes_diff(&header)?));
                }
            }
        }

        for (var, af_attr) in vars.iter_mut().zip(af_attrs) {
            if let Some(attr) = af_attr {
                var.set_attr(attr);
            }
        }

        self.last_common_value = vars
            .first()
            .and_then(Var::as_int)
            .filter(|_| vars.iter().all(|v| v.as_int() == vars[0].as_int()));

        if let Some(target) = ctx.bitmap_attribute_target.or(ctx.substituted_value_target) {
            for (subset, var) in self.subsets.iter_mut().zip(vars) {
                let owner = subset
                    .get_mut(target)
                    .ok_or_else(|| Error::consistency("bitmap/substituted target out of range"))?;
                owner.set_attr(var);
            }
        } else {
            for (subset, var) in self.subsets.iter_mut().zip(vars) {
                subset.push(var);
            }
        }
        Ok(())
    }

    fn bitmap_bit(&mut self, _target: usize) -> Result<bool, Error> {
        let base = self.reader.get_bits(1)?;
        let diff_width = self.reader.get_bits(6)?;
        if diff_width != 0 {
            return Err(Error::consistency(
                "a compressed bitmap must be identical across all subsets",
            ));
        }
        Ok(base == 0)
    }

    fn raw_replication_count(&mut self) -> Result<u32, Error> {
        Err(Error::unimplemented(
            "BUFR delayed replication without a B31 factor descriptor is not supported",
        ))
    }

    fn last_int_value(&self) -> Result<i32, Error> {
        self.last_common_value
            .ok_or_else(|| Error::consistency("compressed subsets disagree on a replication/significance value"))
    }

    fn subset_len(&self) -> usize {
        self.subsets[0].len()
    }

    fn var_info_at(&self, pos: usize) -> Result<Varinfo, Error> {
        self.subsets[0]
            .get(pos)
            .map(|v| v.info().clone())
            .ok_or_else(|| Error::consistency("substituted value target out of range"))
    }
}

/// `Handler` that encodes `n` already-decoded subsets together into a
/// compressed data section.
pub struct CompressedEncoder<'s> {
    writer: BitWriter,
    subsets: &'s [Subset],
    pos: usize,
    last_common_value: Option<i32>,
}

/// A numeric field's base/diff-width decision plus each subset's relative
/// difference (`None` stands for that subset's missing sentinel).
struct NumericPlan {
    base: u32,
    diff_width: u32,
    diffs: Vec<Option<u32>>,
}

/// A string/binary field's shared reference plus each subset's own bytes
/// (`None` when every subset matches the reference, i.e. `diff_width_bytes == 0`).
struct BytesPlan {
    reference: Vec<u8>,
    width_bytes: u32,
    per_subset: Option<Vec<Vec<u8>>>,
}

impl<'s> CompressedEncoder<'s> {
    #[must_use]
    pub fn new(subsets: &'s [Subset]) -> Self {
        Self {
            writer: BitWriter::new(),
            subsets,
            pos: 0,
            last_common_value: None,
        }
    }

    #[must_use]
    pub fn into_writer(self) -> BitWriter {
        self.writer
    }

    fn n(&self) -> usize {
        self.subsets.len()
    }

    fn plan_numeric(&self, info: &Varinfo, vars: &[&Var]) -> NumericPlan {
        let raws: Vec<Option<u32>> = vars
            .iter()
            .map(|v| match v.value() {
                Value::Unset => None,
                Value::Int(x) => Some((x - info.bit_ref) as u32),
                Value::Double(x) => {
                    Some(((x * 10f64.powi(info.scale)).round() as i32 - info.bit_ref) as u32)
                }
                _ => None,
            })
            .collect();

        let present_min = raws.iter().filter_map(|r| *r).min();
        let all_present_equal = raws.iter().all(|r| *r == present_min) && present_min.is_some();
        let all_missing = raws.iter().all(Option::is_none);

        let base = present_min.unwrap_or_else(|| info.missing_raw() as u32);

        if all_present_equal || all_missing {
            return NumericPlan {
                base,
                diff_width: 0,
                diffs: Vec::new(),
            };
        }

        let max_diff = raws.iter().filter_map(|r| r.map(|v| v.saturating_sub(base))).max().unwrap_or(0);
        let mut diff_width = 1u32;
        while (1u64 << diff_width) - 2 < u64::from(max_diff) && diff_width < 31 {
            diff_width += 1;
        }
        let diffs = raws.iter().map(|r| r.map(|v| v.saturating_sub(base))).collect();

        NumericPlan { base, diff_width, diffs }
    }

    fn write_numeric_header(&mut self, info: &Varinfo, plan: &NumericPlan) {
        self.writer.add_bits(plan.base, info.bit_len.min(32) as u8);
        self.writer.add_bits(plan.diff_width, 6);
    }

    fn write_numeric_diff(&mut self, plan: &NumericPlan, idx: usize) {
        if plan.diff_width == 0 {
            return;
        }
        let missing_diff = if plan.diff_width >= 32 {
            u32::MAX
        } else {
            (1u32 << plan.diff_width) - 1
        };
        match plan.diffs[idx] {
            Some(v) => self.writer.add_bits(v, plan.diff_width.min(32) as u8),
            None => self.writer.add_bits(missing_diff, plan.diff_width.min(32) as u8),
        }
    }

    fn plan_bytes(&self, info: &Varinfo, vars: &[&Var]) -> BytesPlan {
        let missing_sentinel = vec![0xFFu8; info.bit_len.div_ceil(8) as usize];
        let bytes_of = |v: &Var| -> Vec<u8> {
            match v.value() {
                Value::String(b) | Value::Binary(b) => b.clone(),
                _ => missing_sentinel.clone(),
            }
        };
        let reference = vars.first().map(|v| bytes_of(v)).unwrap_or_else(|| missing_sentinel.clone());
        let all_equal = vars.iter().all(|v| bytes_of(v) == reference);

        if all_equal {
            return BytesPlan {
                reference,
                width_bytes: 0,
                per_subset: None,
            };
        }

        let width_bytes = info.bit_len / 8;
        let per_subset = vars.iter().map(|v| bytes_of(v)).collect();
        BytesPlan {
            reference,
            width_bytes,
            per_subset: Some(per_subset),
        }
    }

    fn write_bytes_header(&mut self, info: &Varinfo, plan: &BytesPlan) {
        self.writer.append_binary(&plan.reference, info.bit_len);
        self.writer.add_bits(plan.width_bytes, 6);
    }

    fn write_bytes_diff(&mut self, plan: &BytesPlan, idx: usize) {
        if let Some(per_subset) = &plan.per_subset {
            self.writer.append_binary(&per_subset[idx], plan.width_bytes * 8);
        }
    }

    fn encode_numeric(&mut self, info: &Varinfo, vars: &[&Var]) -> Result<(), Error> {
        let plan = self.plan_numeric(info, vars);
        self.write_numeric_header(info, &plan);
        for i in 0..vars.len() {
            self.write_numeric_diff(&plan, i);
        }
        Ok(())
    }

    fn encode_bytes(&mut self, info: &Varinfo, vars: &[&Var]) -> Result<(), Error> {
        let plan = self.plan_bytes(info, vars);
        self.write_bytes_header(info, &plan);
        for i in 0..vars.len() {
            self.write_bytes_diff(&plan, i);
        }
        Ok(())
    }
}

impl Handler for CompressedEncoder<'_> {
    fn visit_b(&mut self, info: &Varinfo, ctx: &VisitCtx) -> Result<(), Error> {
        if let Some(target) = ctx.bitmap_attribute_target.or(ctx.substituted_value_target) {
            let fallback = Var::new_unset(info.clone());
            let vars: Vec<&Var> = self
                .subsets
                .iter()
                .map(|s| {
                    s.get(target)
                        .and_then(|owner| owner.get_attr(info.code))
                        .unwrap_or(&fallback)
                })
                .collect();
            match info.var_type {
                VarType::Integer | VarType::Decimal => self.encode_numeric(info, &vars)?,
                VarType::String | VarType::Binary => self.encode_bytes(info, &vars)?,
            }
            self.last_common_value = vars.first().and_then(|v| v.as_int());
            return Ok(());
        }

        let vars: Vec<&Var> = self
            .subsets
            .iter()
            .map(|s| {
                s.get(self.pos)
                    .expect("subset has fewer variables than the descriptor sequence expects")
            })
            .collect();
        self.pos += 1;

        // Wire order is `[af_base][af_dw][base][main_dw]` then per subset
        // `[af_diff][main_diff]`, so both headers are planned and written
        // before any subset's differences.
        let af_plan = match ctx.associated_field {
            Some(af) => {
                let code = associated_field_attribute_code(af.significance)?;
                let af_info = associated_field_varinfo(code.unwrap_or(Varcode::b(33, 0)?), af.bits);
                let fallback = Var::new_unset(af_info.clone());
                let af_vars: Vec<&Var> = match code {
                    Some(c) => vars.iter().map(|v| v.get_attr(c).unwrap_or(&fallback)).collect(),
                    None => vars.iter().map(|_| &fallback).collect(),
                };
                let plan = self.plan_numeric(&af_info, &af_vars);
                self.write_numeric_header(&af_info, &plan);
                Some(plan)
            }
            None => None,
        };

        match info.var_type {
            VarType::Integer | VarType::Decimal => {
                let plan = self.plan_numeric(info, &vars);
                self.write_numeric_header(info, &plan);
                for i in 0..vars.len() {
                    if let Some(af) = &af_plan {
                        self.write_numeric_diff(af, i);
                    }
                    self.write_numeric_diff(&plan, i);
                }
            }
            VarType::String | VarType::Binary => {
                let plan = self.plan_bytes(info, &vars);
                self.write_bytes_header(info, &plan);
                for i in 0..vars.len() {
                    if let Some(af) = &af_plan {
                        self.write_numeric_diff(af, i);
                    }
                    self.write_bytes_diff(&plan, i);
                }
            }
        }
        self.last_common_value = vars.first().and_then(|v| v.as_int());
        Ok(())
    }

    fn bitmap_bit(&mut self, target: usize) -> Result<bool, Error> {
        let present = self
            .subsets
            .iter()
            .all(|s| s.get(target).is_some_and(|v| !v.attrs().is_empty()));
        self.writer.add_bits(u32::from(!present), 1);
        self.writer.add_bits(0, 6);
        Ok(present)
    }

    fn raw_replication_count(&mut self) -> Result<u32, Error> {
        Err(Error::unimplemented(
            "BUFR delayed replication without a B31 factor descriptor is not supported",
        ))
    }

    fn last_int_value(&self) -> Result<i32, Error> {
        self.last_common_value
            .ok_or_else(|| Error::consistency("no common replication/significance value available"))
    }

    fn subset_len(&self) -> usize {
        self.pos
    }

    fn var_info_at(&self, pos: usize) -> Result<Varinfo, Error> {
        self.subsets[0]
            .get(pos)
            .map(|v| v.info().clone())
            .ok_or_else(|| Error::consistency("substituted value target out of range"))
    }

    fn supports_inline_octets(&self) -> bool {
        false
    }
}
