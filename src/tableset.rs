//! External collaborator: Table B / Table D lookup, modeled as a trait.
//!
//! Table loading, on-disk search, caching and versioned-table selection are
//! explicitly out of scope for this crate — callers provide their own
//! `TableSet` implementation, typically backed by the WMO's published table
//! files.

use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};

use crate::error::Error;
use crate::varcode::Varcode;
use crate::varinfo::{Varinfo, VarinfoData};

/// Lookup service consulted by the interpreter. Implementations must be
/// safe to share read-only across threads processing independent
/// bulletins concurrently.
pub trait TableSet: Send + Sync {
    /// Look up a Table B element definition.
    fn lookup_b(&self, code: Varcode) -> Result<Varinfo, Error>;

    /// Expand a Table D sequence into its opcode list.
    fn expand_d(&self, code: Varcode) -> Result<Vec<Varcode>, Error>;

    /// Derive (and memoize) a scale/width-altered copy of `base`. The
    /// default implementation delegates to an internal [`AlterationCache`]
    /// keyed by `(base.code, new_scale, new_bit_len)`, which is enough for
    /// most implementations; override only if alterations must be scoped
    /// per table version.
    fn altered(&self, base: &Varinfo, new_scale: i32, new_bit_len: u32) -> Varinfo {
        self.alteration_cache()
            .get_or_insert(base, new_scale, new_bit_len)
    }

    /// Backing store for the default `altered` implementation.
    fn alteration_cache(&self) -> &AlterationCache;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct AlterationKey {
    base: Varcode,
    scale: i32,
    bit_len: u32,
    alteration: u16,
}

/// Memoization table for `TableSet::altered`, keyed by
/// `(base_code, scale, bit_len)` as described in the design notes.
#[derive(Debug, Default)]
pub struct AlterationCache {
    entries: OnceLock<Mutex<HashMap<AlterationKey, Varinfo>>>,
    next_alteration: Mutex<u16>,
}

impl AlterationCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn map(&self) -> &Mutex<HashMap<AlterationKey, Varinfo>> {
        self.entries.get_or_init(|| Mutex::new(HashMap::new()))
    }

    /// Return the memoized alteration for `(base.code, new_scale,
    /// new_bit_len)`, creating it if needed. Altered `Varinfo`s compare
    /// distinct from their base because each gets a fresh, nonzero
    /// `alteration` tag.
    pub fn get_or_insert(&self, base: &Varinfo, new_scale: i32, new_bit_len: u32) -> Varinfo {
        let key = AlterationKey {
            base: base.code,
            scale: new_scale,
            bit_len: new_bit_len,
            alteration: 0,
        };
        let mut map = self.map().lock().expect("alteration cache poisoned");
        if let Some(existing) = map.get(&key) {
            return existing.clone();
        }
        let mut next = self.next_alteration.lock().expect("alteration counter poisoned");
        *next += 1;
        let mut data = (**base).clone();
        data.scale = new_scale;
        data.bit_len = new_bit_len;
        data.alteration = *next;
        let imin = data.bit_ref;
        let imax = data.bit_ref.saturating_add(domain_span(new_bit_len));
        data.imin = imin;
        data.imax = imax;
        data.dmin = imin as f64 * 10f64.powi(-new_scale);
        data.dmax = imax as f64 * 10f64.powi(-new_scale);
        let altered = std::sync::Arc::new(data);
        map.insert(key, altered.clone());
        altered
    }
}

fn domain_span(bit_len: u32) -> i32 {
    if bit_len == 0 {
        0
    } else if bit_len >= 31 {
        i32::MAX
    } else {
        (1i64 << bit_len) as i32 - 2
    }
}

/// A trivial in-memory [`TableSet`] useful for tests and small embedded
/// tables: callers populate `b`/`d` directly instead of parsing WMO table
/// files (that parsing is out of scope).
#[derive(Default)]
pub struct StaticTableSet {
    b: HashMap<Varcode, Varinfo>,
    d: HashMap<Varcode, Vec<Varcode>>,
    cache: AlterationCache,
}

impl StaticTableSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_b(&mut self, info: VarinfoData) {
        self.b.insert(info.code, std::sync::Arc::new(info));
    }

    pub fn insert_d(&mut self, code: Varcode, expansion: Vec<Varcode>) {
        self.d.insert(code, expansion);
    }
}

impl TableSet for StaticTableSet {
    fn lookup_b(&self, code: Varcode) -> Result<Varinfo, Error> {
        self.b.get(&code).cloned().ok_or_else(|| Error::not_found(code))
    }

    fn expand_d(&self, code: Varcode) -> Result<Vec<Varcode>, Error> {
        self.d.get(&code).cloned().ok_or_else(|| Error::not_found(code))
    }

    fn alteration_cache(&self) -> &AlterationCache {
        &self.cache
    }
}
