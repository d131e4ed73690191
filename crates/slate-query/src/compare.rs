//! Collation-aware ordering of BSON values, documents and index keys.

use std::cmp::Ordering;

use bson::{Bson, Document};

use crate::collation::Collator;

/// Compares values under an optional collator.
///
/// `Comparator::SIMPLE` performs binary string comparison and is used
/// wherever no collation applies (hint matching, bounds already translated
/// to comparison keys).
#[derive(Debug, Clone, Copy)]
pub struct Comparator<'a> {
    collator: Option<&'a Collator>,
}

impl<'a> Comparator<'a> {
    pub const SIMPLE: Comparator<'static> = Comparator { collator: None };

    pub fn new(collator: Option<&'a Collator>) -> Self {
        Self { collator }
    }

    pub fn compare(&self, a: &Bson, b: &Bson) -> Ordering {
        compare_values(a, b, self.collator)
    }

    pub fn compare_documents(&self, a: &Document, b: &Document) -> Ordering {
        compare_docs(a, b, self.collator)
    }

    pub fn documents_equal(&self, a: &Document, b: &Document) -> bool {
        self.compare_documents(a, b) == Ordering::Equal
    }
}

/// Rank of a value's type in the cross-type sort order.
pub fn canonical_type(value: &Bson) -> i32 {
    match value {
        Bson::MinKey => -1,
        Bson::Undefined => 0,
        Bson::Null => 5,
        Bson::Double(_) | Bson::Int32(_) | Bson::Int64(_) | Bson::Decimal128(_) => 10,
        Bson::String(_) | Bson::Symbol(_) => 15,
        Bson::Document(_) => 20,
        Bson::Array(_) => 25,
        Bson::Binary(_) => 30,
        Bson::ObjectId(_) => 35,
        Bson::Boolean(_) => 40,
        Bson::DateTime(_) => 45,
        Bson::Timestamp(_) => 47,
        Bson::RegularExpression(_) => 50,
        Bson::DbPointer(_) => 55,
        Bson::JavaScriptCode(_) => 60,
        Bson::JavaScriptCodeWithScope(_) => 65,
        Bson::MaxKey => 127,
    }
}

/// Numeric view of a value, if it is a number.
pub fn as_f64(value: &Bson) -> Option<f64> {
    match value {
        Bson::Double(d) => Some(*d),
        Bson::Int32(i) => Some(f64::from(*i)),
        Bson::Int64(i) => Some(*i as f64),
        Bson::Decimal128(d) => d.to_string().parse().ok(),
        _ => None,
    }
}

fn compare_numbers(a: &Bson, b: &Bson) -> Ordering {
    match (a, b) {
        (Bson::Int32(x), Bson::Int32(y)) => x.cmp(y),
        (Bson::Int64(x), Bson::Int64(y)) => x.cmp(y),
        (Bson::Int32(x), Bson::Int64(y)) => i64::from(*x).cmp(y),
        (Bson::Int64(x), Bson::Int32(y)) => x.cmp(&i64::from(*y)),
        _ => {
            let x = as_f64(a).unwrap_or(f64::NAN);
            let y = as_f64(b).unwrap_or(f64::NAN);
            // NaN sorts before every other number.
            match (x.is_nan(), y.is_nan()) {
                (true, true) => Ordering::Equal,
                (true, false) => Ordering::Less,
                (false, true) => Ordering::Greater,
                (false, false) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
            }
        }
    }
}

fn compare_strings(a: &str, b: &str, collator: Option<&Collator>) -> Ordering {
    match collator {
        Some(c) => c.comparison_key(a).cmp(&c.comparison_key(b)),
        None => a.cmp(b),
    }
}

/// Total order over BSON values: by canonical type, then by value.
pub fn compare_values(a: &Bson, b: &Bson, collator: Option<&Collator>) -> Ordering {
    let by_type = canonical_type(a).cmp(&canonical_type(b));
    if by_type != Ordering::Equal {
        return by_type;
    }

    match (a, b) {
        (Bson::String(x) | Bson::Symbol(x), Bson::String(y) | Bson::Symbol(y)) => {
            compare_strings(x, y, collator)
        }
        (Bson::Document(x), Bson::Document(y)) => compare_docs(x, y, collator),
        (Bson::Array(x), Bson::Array(y)) => {
            for (l, r) in x.iter().zip(y.iter()) {
                let ord = compare_values(l, r, collator);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        (Bson::Binary(x), Bson::Binary(y)) => x
            .bytes
            .len()
            .cmp(&y.bytes.len())
            .then_with(|| u8::from(x.subtype).cmp(&u8::from(y.subtype)))
            .then_with(|| x.bytes.cmp(&y.bytes)),
        (Bson::ObjectId(x), Bson::ObjectId(y)) => x.bytes().cmp(&y.bytes()),
        (Bson::Boolean(x), Bson::Boolean(y)) => x.cmp(y),
        (Bson::DateTime(x), Bson::DateTime(y)) => {
            x.timestamp_millis().cmp(&y.timestamp_millis())
        }
        (Bson::Timestamp(x), Bson::Timestamp(y)) => {
            (x.time, x.increment).cmp(&(y.time, y.increment))
        }
        (Bson::RegularExpression(x), Bson::RegularExpression(y)) => x
            .pattern
            .as_str()
            .cmp(y.pattern.as_str())
            .then_with(|| x.options.as_str().cmp(y.options.as_str())),
        (Bson::JavaScriptCode(x), Bson::JavaScriptCode(y)) => x.cmp(y),
        _ if canonical_type(a) == 10 => compare_numbers(a, b),
        _ => Ordering::Equal,
    }
}

/// Field-by-field comparison considering field names.
pub fn compare_docs(a: &Document, b: &Document, collator: Option<&Collator>) -> Ordering {
    let mut left = a.iter();
    let mut right = b.iter();
    loop {
        match (left.next(), right.next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some((lk, lv)), Some((rk, rv))) => {
                let ord = canonical_type(lv)
                    .cmp(&canonical_type(rv))
                    .then_with(|| lk.cmp(rk))
                    .then_with(|| compare_values(lv, rv, collator));
                if ord != Ordering::Equal {
                    return ord;
                }
            }
        }
    }
}

/// Whether key pattern element `value` describes a descending field.
pub fn is_descending(value: &Bson) -> bool {
    as_f64(value).is_some_and(|d| d < 0.0)
}

/// Compare two index keys (field names already stripped) under the
/// ordering of `key_pattern`: descending fields invert the comparison.
pub fn compare_keys(a: &[Bson], b: &[Bson], key_pattern: &Document) -> Ordering {
    let mut directions = key_pattern.values().map(is_descending);
    let mut i = 0;
    loop {
        let descending = directions.next().unwrap_or(false);
        match (a.get(i), b.get(i)) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(l), Some(r)) => {
                let ord = compare_values(l, r, None);
                let ord = if descending { ord.reverse() } else { ord };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
        }
        i += 1;
    }
}

/// Drop field names from `obj`, translating strings to the collator's
/// comparison keys so the result compares like index keys.
pub fn strip_field_names_and_apply_collation(
    obj: &Document,
    collator: Option<&Collator>,
) -> Vec<Bson> {
    obj.values()
        .map(|v| crate::collation::apply_collation(v, collator))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn numbers_compare_across_types() {
        assert_eq!(compare_values(&Bson::Int32(1), &Bson::Double(1.0), None), Ordering::Equal);
        assert_eq!(compare_values(&Bson::Int64(2), &Bson::Double(1.5), None), Ordering::Greater);
        assert_eq!(
            compare_values(&Bson::Double(f64::NEG_INFINITY), &Bson::Int32(-7), None),
            Ordering::Less
        );
    }

    #[test]
    fn type_order_dominates() {
        assert_eq!(compare_values(&Bson::MinKey, &Bson::Null, None), Ordering::Less);
        assert_eq!(
            compare_values(&Bson::Int32(100), &Bson::String("".into()), None),
            Ordering::Less
        );
        assert_eq!(
            compare_values(&Bson::String("zzz".into()), &Bson::Document(doc! {}), None),
            Ordering::Less
        );
        assert_eq!(compare_values(&Bson::MaxKey, &Bson::Boolean(true), None), Ordering::Greater);
    }

    #[test]
    fn collator_changes_string_order() {
        let a = Bson::String("ab".into());
        let b = Bson::String("ba".into());
        assert_eq!(compare_values(&a, &b, None), Ordering::Less);
        assert_eq!(compare_values(&a, &b, Some(&Collator::ReverseString)), Ordering::Greater);
    }

    #[test]
    fn hint_style_document_equality() {
        let c = Comparator::SIMPLE;
        assert!(c.documents_equal(&doc! { "a": 1_i32 }, &doc! { "a": 1.0 }));
        assert!(!c.documents_equal(&doc! { "a": 1_i32 }, &doc! { "b": 1_i32 }));
        assert!(!c.documents_equal(&doc! { "a": 1_i32 }, &doc! { "a": 1_i32, "b": 1_i32 }));
    }

    #[test]
    fn descending_key_field_inverts() {
        let kp = doc! { "a": -1_i32 };
        let min = [Bson::Int32(1)];
        let max = [Bson::Int32(5)];
        assert_eq!(compare_keys(&min, &max, &kp), Ordering::Greater);
        assert_eq!(compare_keys(&[Bson::MinKey], &max, &kp), Ordering::Greater);
    }

    #[test]
    fn stripping_applies_collation() {
        let keys = strip_field_names_and_apply_collation(
            &doc! { "a": "foo", "b": 2_i32 },
            Some(&Collator::ReverseString),
        );
        assert_eq!(keys, vec![Bson::String("oof".into()), Bson::Int32(2)]);
    }
}
