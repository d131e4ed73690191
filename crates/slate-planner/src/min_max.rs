//! Index selection and key finishing for `min`/`max` queries.

use std::cmp::Ordering;

use bson::{Bson, Document};
use slate_query::{
    Collator, collators_match, compare_keys, is_collatable, strip_field_names_and_apply_collation,
};

use crate::index::IndexEntry;

/// Whether `obj` names exactly the key pattern's fields, in order, and its
/// values can be compared under the index collation.
pub fn index_compatible_max_min(
    obj: &Document,
    query_collator: Option<&Collator>,
    index: &IndexEntry,
) -> bool {
    if obj.len() != index.key_pattern.len() {
        return false;
    }
    let same_collation = collators_match(query_collator, index.collator.as_ref());
    for ((kp_field, _), (field, value)) in index.key_pattern.iter().zip(obj.iter()) {
        if kp_field != field {
            return false;
        }
        if !same_collation && is_collatable(value) {
            return false;
        }
    }
    true
}

fn values(obj: &Document) -> Vec<Bson> {
    obj.values().cloned().collect()
}

/// The start key of a min/max scan.
///
/// An empty `min` becomes whichever of MinKey and MaxKey sorts before
/// `max` under the key pattern, so descending fields scan from MaxKey.
pub fn finish_min_obj(index: &IndexEntry, min: &Document, max: &Document) -> Vec<Bson> {
    if !min.is_empty() {
        return strip_field_names_and_apply_collation(min, index.collator.as_ref());
    }
    let min_key = [Bson::MinKey];
    if compare_keys(&min_key, &values(max), &index.key_pattern) == Ordering::Less {
        vec![Bson::MinKey]
    } else {
        vec![Bson::MaxKey]
    }
}

/// The end key of a min/max scan, finished like [`finish_min_obj`].
pub fn finish_max_obj(index: &IndexEntry, min: &Document, max: &Document) -> Vec<Bson> {
    if !max.is_empty() {
        return strip_field_names_and_apply_collation(max, index.collator.as_ref());
    }
    let max_key = [Bson::MaxKey];
    if compare_keys(&max_key, &values(min), &index.key_pattern) == Ordering::Greater {
        vec![Bson::MaxKey]
    } else {
        vec![Bson::MinKey]
    }
}

/// Finished keys for `index`, if the range they span is non-empty.
pub fn finished_range(
    index: &IndexEntry,
    min: &Document,
    max: &Document,
) -> Option<(Vec<Bson>, Vec<Bson>)> {
    let start = finish_min_obj(index, min, max);
    let end = finish_max_obj(index, min, max);
    (compare_keys(&start, &end, &index.key_pattern) == Ordering::Less).then_some((start, end))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn field_names_and_order_must_match() {
        let index = IndexEntry::new(doc! { "a": 1_i32, "b": 1_i32 });
        assert!(index_compatible_max_min(&doc! { "a": 1_i32, "b": 2_i32 }, None, &index));
        assert!(!index_compatible_max_min(&doc! { "b": 1_i32, "a": 2_i32 }, None, &index));
        assert!(!index_compatible_max_min(&doc! { "a": 1_i32 }, None, &index));
    }

    #[test]
    fn collation_mismatch_rejects_string_bounds_only() {
        let index = IndexEntry::new(doc! { "a": 1_i32 }).with_collator(Collator::ReverseString);
        assert!(index_compatible_max_min(&doc! { "a": 1_i32 }, None, &index));
        assert!(!index_compatible_max_min(&doc! { "a": "x" }, None, &index));
        assert!(index_compatible_max_min(
            &doc! { "a": "x" },
            Some(&Collator::ReverseString),
            &index
        ));
    }

    #[test]
    fn empty_min_on_ascending_index_starts_at_min_key() {
        let index = IndexEntry::new(doc! { "a": 1_i32 });
        let (start, end) = finished_range(&index, &doc! {}, &doc! { "a": 3_i32 }).unwrap();
        assert_eq!(start, vec![Bson::MinKey]);
        assert_eq!(end, vec![Bson::Int32(3)]);
    }

    #[test]
    fn empty_min_on_descending_index_starts_at_max_key() {
        let index = IndexEntry::new(doc! { "a": -1_i32 });
        let (start, end) = finished_range(&index, &doc! {}, &doc! { "a": 3_i32 }).unwrap();
        assert_eq!(start, vec![Bson::MaxKey]);
        assert_eq!(end, vec![Bson::Int32(3)]);
    }

    #[test]
    fn empty_max_on_descending_index_ends_at_min_key() {
        let index = IndexEntry::new(doc! { "a": -1_i32 });
        let end = finish_max_obj(&index, &doc! { "a": 3_i32 }, &doc! {});
        assert_eq!(end, vec![Bson::MinKey]);
    }

    #[test]
    fn inverted_range_is_rejected() {
        let index = IndexEntry::new(doc! { "a": 1_i32, "b": 1_i32 });
        assert!(finished_range(&index, &doc! { "a": 2_i32, "b": 1_i32 }, &doc! { "a": 1_i32, "b": 2_i32 }).is_none());
        assert!(finished_range(&index, &doc! { "a": 1_i32, "b": 2_i32 }, &doc! { "a": 2_i32, "b": 1_i32 }).is_some());
    }

    #[test]
    fn string_bounds_take_index_collation() {
        let index = IndexEntry::new(doc! { "a": 1_i32 }).with_collator(Collator::ReverseString);
        let start = finish_min_obj(&index, &doc! { "a": "foo" }, &doc! {});
        assert_eq!(start, vec![Bson::String("oof".into())]);
    }
}
