//! `diff`: a testing utility that counts the structural differences
//! between two bulletins, for round-trip assertions that should tolerate
//! attribute ordering and encoder-chosen compression widths.

use crate::bulletin::Bulletin;
use crate::subset::Subset;
use crate::var::Var;

/// Count of mismatched header fields, datadesc entries, subset counts,
/// and variable values/attributes between `a` and `b`.
#[must_use]
pub fn diff(a: &Bulletin, b: &Bulletin) -> usize {
    let mut count = 0;

    if a.header.edition != b.header.edition {
        count += 1;
    }
    if a.header.master_table_version != b.header.master_table_version {
        count += 1;
    }
    if a.header.data_category != b.header.data_category {
        count += 1;
    }
    if a.header.data_subcategory != b.header.data_subcategory {
        count += 1;
    }

    if a.datadesc != b.datadesc {
        count += a.datadesc.len().abs_diff(b.datadesc.len()).max(1);
    }

    count += diff_subsets(&a.subsets, &b.subsets);
    count
}

fn diff_subsets(a: &[Subset], b: &[Subset]) -> usize {
    if a.len() != b.len() {
        return a.len().abs_diff(b.len());
    }
    a.iter().zip(b).map(|(sa, sb)| diff_subset(sa, sb)).sum()
}

fn diff_subset(a: &Subset, b: &Subset) -> usize {
    if a.len() != b.len() {
        return a.len().abs_diff(b.len());
    }
    a.iter().zip(b.iter()).map(|(va, vb)| diff_var(va, vb)).sum()
}

fn diff_var(a: &Var, b: &Var) -> usize {
    let mut count = usize::from(a.code() != b.code() || a.value() != b.value());
    let (mut ia, mut ib) = (a.attrs().iter(), b.attrs().iter());
    loop {
        match (ia.next(), ib.next()) {
            (Some(x), Some(y)) => count += diff_var(x, y),
            (Some(_), None) | (None, Some(_)) => {
                count += 1;
            }
            (None, None) => break,
        }
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bulletin::Header;
    use crate::var::DomainPolicy;
    use crate::varinfo::{VarType, VarinfoData};
    use crate::varcode::Varcode;

    fn bulletin_with(value: i32) -> Bulletin {
        let code = Varcode::b(12, 101).unwrap();
        let info = std::sync::Arc::new(VarinfoData::new_element(code, "t", "K", VarType::Integer, 0, 0, 5, 0, 12));
        let mut subset = Subset::new();
        subset.push(Var::new_int(info, value, DomainPolicy::default()).unwrap());
        Bulletin {
            header: Header::default(),
            datadesc: vec![code],
            subsets: vec![subset],
        }
    }

    #[test]
    fn identical_bulletins_have_no_diff() {
        let a = bulletin_with(273);
        let b = bulletin_with(273);
        assert_eq!(diff(&a, &b), 0);
    }

    #[test]
    fn differing_values_count_as_one_diff() {
        let a = bulletin_with(273);
        let b = bulletin_with(280);
        assert_eq!(diff(&a, &b), 1);
    }
}
