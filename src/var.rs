//! A decoded value plus its attribute chain.

use crate::error::Error;
use crate::varcode::Varcode;
use crate::varinfo::{VarType, Varinfo};

/// A typed value, stored in the form dictated by `info.var_type`.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Unset,
    Int(i32),
    Double(f64),
    String(Vec<u8>),
    Binary(Vec<u8>),
}

/// Options controlling how out-of-domain values are handled when setting a
/// `Var`'s value. Passed by value, per the "no thread-local options" design
/// note.
#[derive(Debug, Clone, Copy, Default)]
pub struct DomainPolicy {
    pub silent: bool,
    pub clamp: bool,
}

/// A decoded value with metadata and an attribute chain, ordered strictly
/// increasing by `Varcode`.
#[derive(Debug, Clone)]
pub struct Var {
    info: Varinfo,
    value: Value,
    attrs: Vec<Var>,
}

impl Var {
    #[must_use]
    pub fn new_unset(info: Varinfo) -> Self {
        Var {
            info,
            value: Value::Unset,
            attrs: Vec::new(),
        }
    }

    pub fn new_int(info: Varinfo, value: i32, policy: DomainPolicy) -> Result<Self, Error> {
        let mut var = Var::new_unset(info);
        var.set_int(value, policy)?;
        Ok(var)
    }

    pub fn new_double(info: Varinfo, value: f64, policy: DomainPolicy) -> Result<Self, Error> {
        let mut var = Var::new_unset(info);
        var.set_double(value, policy)?;
        Ok(var)
    }

    pub fn new_string(info: Varinfo, value: Vec<u8>) -> Self {
        let mut var = Var::new_unset(info);
        var.value = Value::String(value);
        var
    }

    pub fn new_binary(info: Varinfo, value: Vec<u8>) -> Self {
        let mut var = Var::new_unset(info);
        var.value = Value::Binary(value);
        var
    }

    #[must_use]
    pub fn info(&self) -> &Varinfo {
        &self.info
    }

    #[must_use]
    pub fn code(&self) -> Varcode {
        self.info.code
    }

    #[must_use]
    pub fn value(&self) -> &Value {
        &self.value
    }

    #[must_use]
    pub fn is_unset(&self) -> bool {
        matches!(self.value, Value::Unset)
    }

    #[must_use]
    pub fn as_int(&self) -> Option<i32> {
        match self.value {
            Value::Int(v) => Some(v),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_double(&self) -> Option<f64> {
        match self.value {
            Value::Double(v) => Some(v),
            Value::Int(v) => Some(v as f64 * 10f64.powi(-self.info.scale)),
            _ => None,
        }
    }

    /// Set an integer value, enforcing `[imin, imax]` and raising
    /// `DomainError` on violation, honoring `silent`/`clamp` policy.
    pub fn set_int(&mut self, value: i32, policy: DomainPolicy) -> Result<(), Error> {
        debug_assert!(matches!(self.info.var_type, VarType::Integer));
        if value >= self.info.imin && value <= self.info.imax {
            self.value = Value::Int(value);
            return Ok(());
        }
        if policy.clamp {
            self.value = Value::Int(value.clamp(self.info.imin, self.info.imax));
            return Ok(());
        }
        self.value = Value::Unset;
        if policy.silent {
            Ok(())
        } else {
            Err(Error::domain(format!(
                "{} value {value} out of domain [{}, {}]",
                self.info.code, self.info.imin, self.info.imax
            )))
        }
    }

    /// Set a decimal value, enforcing `[dmin, dmax]`.
    pub fn set_double(&mut self, value: f64, policy: DomainPolicy) -> Result<(), Error> {
        debug_assert!(matches!(self.info.var_type, VarType::Decimal));
        if value >= self.info.dmin && value <= self.info.dmax {
            self.value = Value::Double(value);
            return Ok(());
        }
        if policy.clamp {
            self.value = Value::Double(value.clamp(self.info.dmin, self.info.dmax));
            return Ok(());
        }
        self.value = Value::Unset;
        if policy.silent {
            Ok(())
        } else {
            Err(Error::domain(format!(
                "{} value {value} out of domain [{}, {}]",
                self.info.code, self.info.dmin, self.info.dmax
            )))
        }
    }

    /// Attributes, strictly increasing by `Varcode`.
    #[must_use]
    pub fn attrs(&self) -> &[Var] {
        &self.attrs
    }

    #[must_use]
    pub fn get_attr(&self, code: Varcode) -> Option<&Var> {
        self.attrs
            .binary_search_by_key(&code, Var::code)
            .ok()
            .map(|i| &self.attrs[i])
    }

    /// Insert or replace an attribute, keeping `attrs` sorted. An attribute
    /// may not itself carry attributes.
    pub fn set_attr(&mut self, mut attr: Var) {
        attr.attrs.clear();
        match self.attrs.binary_search_by_key(&attr.code(), Var::code) {
            Ok(i) => self.attrs[i] = attr,
            Err(i) => self.attrs.insert(i, attr),
        }
    }

    pub fn unset_attr(&mut self, code: Varcode) {
        if let Ok(i) = self.attrs.binary_search_by_key(&code, Var::code) {
            self.attrs.remove(i);
        }
    }
}

impl PartialEq for Var {
    fn eq(&self, other: &Self) -> bool {
        self.info.code == other.info.code && self.value == other.value && self.attrs == other.attrs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::varinfo::VarinfoData;
    use std::sync::Arc;

    fn int_info() -> Varinfo {
        Arc::new(VarinfoData::new_element(
            Varcode::b(12, 101).unwrap(),
            "temperature",
            "K",
            VarType::Integer,
            0,
            0,
            5,
            0,
            16,
        ))
    }

    #[test]
    fn set_int_in_domain() {
        let mut v = Var::new_unset(int_info());
        v.set_int(100, DomainPolicy::default()).unwrap();
        assert_eq!(v.as_int(), Some(100));
    }

    #[test]
    fn set_int_out_of_domain_errors_and_unsets() {
        let mut v = Var::new_unset(int_info());
        let err = v.set_int(-5, DomainPolicy::default());
        assert!(err.is_err());
        assert!(v.is_unset());
    }

    #[test]
    fn silent_domain_errors_do_not_raise() {
        let mut v = Var::new_unset(int_info());
        let policy = DomainPolicy {
            silent: true,
            clamp: false,
        };
        v.set_int(-5, policy).unwrap();
        assert!(v.is_unset());
    }

    #[test]
    fn clamp_domain_errors_clamp() {
        let mut v = Var::new_unset(int_info());
        let policy = DomainPolicy {
            silent: false,
            clamp: true,
        };
        v.set_int(1_000_000, policy).unwrap();
        assert_eq!(v.as_int(), Some(v.info().imax));
    }

    #[test]
    fn attrs_stay_sorted_and_replace_on_same_code() {
        let mut v = Var::new_unset(int_info());
        let attr_info = Arc::new(VarinfoData::new_element(
            Varcode::b(33, 7).unwrap(),
            "% confidence",
            "%",
            VarType::Integer,
            0,
            0,
            3,
            0,
            7,
        ));
        v.set_attr(Var::new_int(attr_info.clone(), 70, DomainPolicy::default()).unwrap());
        v.set_attr(Var::new_int(attr_info.clone(), 80, DomainPolicy::default()).unwrap());
        assert_eq!(v.attrs().len(), 1);
        assert_eq!(v.get_attr(Varcode::b(33, 7).unwrap()).unwrap().as_int(), Some(80));
    }
}
