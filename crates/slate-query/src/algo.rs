use std::cmp::Ordering;

use bson::Bson;

use crate::compare::{canonical_type, compare_values};
use crate::expression::{CmpOp, MatchExpression, MatchKind};

/// Whether every document matching `lhs` also matches `rhs`.
///
/// Conservative: `false` means "could not prove it", not "disjoint".
pub fn is_subset_of(lhs: &MatchExpression, rhs: &MatchExpression) -> bool {
    if lhs == rhs || same_predicate(lhs, rhs) {
        return true;
    }

    match (&lhs.kind, &rhs.kind) {
        (_, MatchKind::And(rc)) => rc.iter().all(|r| is_subset_of(lhs, r)),
        (MatchKind::And(lc), _) => lc.iter().any(|l| is_subset_of(l, rhs)),
        (MatchKind::Or(lc), _) => lc.iter().all(|l| is_subset_of(l, rhs)),
        (_, MatchKind::Or(rc)) => rc.iter().any(|r| is_subset_of(lhs, r)),
        (
            MatchKind::Compare {
                op: lop,
                path: lpath,
                value: lval,
            },
            MatchKind::Compare {
                op: rop,
                path: rpath,
                value: rval,
            },
        ) if lpath == rpath => compare_implies(*lop, lval, *rop, rval),
        (MatchKind::In { path: lpath, values }, MatchKind::Compare { op, path: rpath, value })
            if lpath == rpath && !values.is_empty() =>
        {
            values
                .iter()
                .all(|v| compare_implies(CmpOp::Eq, v, *op, value))
        }
        (
            MatchKind::Compare { path: lpath, value, .. },
            MatchKind::Exists { path: rpath, exists: true },
        ) if lpath == rpath => *value != Bson::Null,
        (MatchKind::In { path: lpath, values }, MatchKind::Exists { path: rpath, exists: true })
            if lpath == rpath =>
        {
            !values.contains(&Bson::Null)
        }
        (
            MatchKind::Regex { path: lpath, .. },
            MatchKind::Exists { path: rpath, exists: true },
        ) if lpath == rpath => true,
        _ => false,
    }
}

/// Same predicate, ignoring node ids.
fn same_predicate(a: &MatchExpression, b: &MatchExpression) -> bool {
    match (&a.kind, &b.kind) {
        (MatchKind::And(x), MatchKind::And(y))
        | (MatchKind::Or(x), MatchKind::Or(y))
        | (MatchKind::Nor(x), MatchKind::Nor(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(l, r)| same_predicate(l, r))
        }
        (MatchKind::Not(x), MatchKind::Not(y)) => same_predicate(x, y),
        (x, y) => x == y,
    }
}

/// Whether `path <lop> lval` implies `path <rop> rval`.
fn compare_implies(lop: CmpOp, lval: &Bson, rop: CmpOp, rval: &Bson) -> bool {
    // Ranges only contain values of their own type bracket.
    if canonical_type(lval) != canonical_type(rval) {
        return false;
    }
    let ord = compare_values(lval, rval, None);

    match (lop, rop) {
        (CmpOp::Eq, CmpOp::Eq) => ord == Ordering::Equal,
        (CmpOp::Eq, CmpOp::Lt) => ord == Ordering::Less,
        (CmpOp::Eq, CmpOp::Lte) => ord != Ordering::Greater,
        (CmpOp::Eq, CmpOp::Gt) => ord == Ordering::Greater,
        (CmpOp::Eq, CmpOp::Gte) => ord != Ordering::Less,
        (CmpOp::Lt, CmpOp::Lt) | (CmpOp::Lt, CmpOp::Lte) | (CmpOp::Lte, CmpOp::Lte) => {
            ord != Ordering::Greater
        }
        (CmpOp::Lte, CmpOp::Lt) => ord == Ordering::Less,
        (CmpOp::Gt, CmpOp::Gt) | (CmpOp::Gt, CmpOp::Gte) | (CmpOp::Gte, CmpOp::Gte) => {
            ord != Ordering::Less
        }
        (CmpOp::Gte, CmpOp::Gt) => ord == Ordering::Greater,
        _ => false,
    }
}
