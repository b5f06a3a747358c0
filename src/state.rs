//! Mutable codec state carried through one DDS traversal.

use crate::var::Var;
use crate::varinfo::{Varinfo, VarinfoData};

/// The list of subset positions a data-present bitmap refers to, plus a
/// cursor into that list.
#[derive(Debug, Clone)]
pub struct Bitmap {
    /// Subset positions of the `+` entries, in order.
    pub targets: Vec<usize>,
    /// The decoded/encoded bitmap variable itself (for round-tripping).
    pub var: Var,
}

/// Mutable state mutated by C-modifier ("operator") descriptors, resolved
/// against each B descriptor as it's visited.
#[derive(Debug, Clone, Default)]
pub struct InterpreterState {
    pub c_scale_change: i32,
    pub c_width_change: i32,
    pub c_ref_change: i32,
    pub c_string_len_override: u32,
    pub associated_field_bits: u32,
    pub associated_field_significance: u32,
    pub bitmap_pending: bool,
    pub bitmap: Option<Bitmap>,
    pub bitmap_cursor: usize,
    /// Set by C23255 ("substituted value"): the next variable read/written
    /// is an attribute of the subset variable the bitmap cursor points to,
    /// using that variable's own `Varinfo`.
    pub substituted_value_pending: bool,
    /// Set by C37000 ("reuse the last bitmap").
    pub reuse_last_bitmap: bool,

    /// Set by C06yyy for the immediately following descriptor only:
    /// decode it as `Y` bits of opaque data if Table B disagrees with the
    /// declared width. Implementation scaffolding, not itself named in the
    /// state table, but needed to carry the one-shot override across the
    /// single opcode it applies to.
    pub c06_pending_bits: Option<u32>,

    /// Set by C05yyy for the immediately following descriptor only: read
    /// `Y` raw octets as a character string, independent of any table
    /// entry.
    pub c05_pending_bytes: Option<u32>,

    /// True for exactly the one B descriptor immediately after a
    /// `C04yyy` with `Y>0` (which must be B31021): that descriptor itself
    /// does not receive the associated field prefix it is about to define.
    pub assoc_field_just_set: bool,

    /// C07yyy's `Y` (0 = inactive): adds `Y` to scale and bit width, and
    /// `10^Y - 1` times the reference value of every following B
    /// descriptor.
    pub c07_y: i32,
}

impl InterpreterState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the flags that are transient per replication iteration
    /// (C04/C08/C22/C23 family), to be restored when an entire replication
    /// block is exited: leaving one iteration does not reset state, but
    /// leaving the whole block does.
    #[must_use]
    pub fn snapshot_transient(&self) -> TransientFlags {
        TransientFlags {
            c_string_len_override: self.c_string_len_override,
            associated_field_bits: self.associated_field_bits,
            associated_field_significance: self.associated_field_significance,
            bitmap_pending: self.bitmap_pending,
            substituted_value_pending: self.substituted_value_pending,
        }
    }

    pub fn restore_transient(&mut self, snapshot: TransientFlags) {
        self.c_string_len_override = snapshot.c_string_len_override;
        self.associated_field_bits = snapshot.associated_field_bits;
        self.associated_field_significance = snapshot.associated_field_significance;
        self.bitmap_pending = snapshot.bitmap_pending;
        self.substituted_value_pending = snapshot.substituted_value_pending;
    }

    /// Resolve a base `Varinfo` against the current state, applying the
    /// `c_scale_change` / `c_width_change` / `c_ref_change` overrides.
    /// Returns `None` when no alteration is needed (the base is used
    /// as-is), matching the "altered derivatives are memoized, originals
    /// are shared" lifecycle rule.
    #[must_use]
    pub fn alteration_for(&self, base: &Varinfo) -> Option<(i32, u32)> {
        if base.is_string() && self.c_string_len_override > 0 {
            return Some((base.scale, self.c_string_len_override * 8));
        }
        if self.c_scale_change == 0 && self.c_width_change == 0 && self.c_ref_change == 0 {
            return None;
        }
        let new_scale = base.scale + self.c_scale_change;
        let new_bit_len = if self.c_width_change >= 0 {
            base.bit_len + self.c_width_change as u32
        } else {
            base.bit_len.saturating_sub((-self.c_width_change) as u32)
        };
        Some((new_scale, new_bit_len))
    }
}

/// Flags scoped to one replication iteration; see
/// [`InterpreterState::snapshot_transient`].
#[derive(Debug, Clone, Copy, Default)]
pub struct TransientFlags {
    c_string_len_override: u32,
    associated_field_bits: u32,
    associated_field_significance: u32,
    bitmap_pending: bool,
    substituted_value_pending: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::varcode::Varcode;
    use crate::varinfo::VarType;

    fn base() -> Varinfo {
        std::sync::Arc::new(VarinfoData::new_element(
            Varcode::b(12, 101).unwrap(),
            "t",
            "K",
            VarType::Decimal,
            1,
            0,
            5,
            0,
            12,
        ))
    }

    #[test]
    fn no_change_means_no_alteration() {
        let s = InterpreterState::new();
        assert!(s.alteration_for(&base()).is_none());
    }

    #[test]
    fn scale_and_width_changes_combine() {
        let mut s = InterpreterState::new();
        s.c_scale_change = 2;
        s.c_width_change = -3;
        let (scale, bits) = s.alteration_for(&base()).unwrap();
        assert_eq!(scale, 3);
        assert_eq!(bits, 9);
    }

    #[test]
    fn transient_flags_restore_on_block_exit() {
        let mut s = InterpreterState::new();
        let snap = s.snapshot_transient();
        s.associated_field_bits = 6;
        s.bitmap_pending = true;
        s.restore_transient(snap);
        assert_eq!(s.associated_field_bits, 0);
        assert!(!s.bitmap_pending);
    }
}
