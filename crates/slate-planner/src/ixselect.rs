//! Index selection: which indices could serve which predicates.
//!
//! Rating hangs a [`RelevantTag`] on every bounds-generating node; the
//! strip passes then remove assignments that would produce wrong or
//! pointless plans. Index numbers in tags refer to the slice of relevant
//! indices passed in, not to the full catalog.

use std::collections::BTreeSet;

use bson::Bson;
use slate_query::{
    Collator, Crs, GeoPredicate, GeoShape, MatchExpression, MatchKind, collators_match,
    is_collatable, is_subset_of,
};
use tracing::trace;

use crate::index::{IndexRef, IndexType};
use crate::tag::{RelevantTag, Tag, TagMap};

/// Collect every field path a leaf predicate in `node` references.
pub fn get_fields(node: &MatchExpression, out: &mut BTreeSet<String>) {
    if let Some(path) = node.path() {
        out.insert(path.to_string());
        return;
    }
    match &node.kind {
        MatchKind::Nor(_) => {}
        _ => {
            for child in node.children() {
                get_fields(child, out);
            }
        }
    }
}

/// Keep the indices whose key pattern shares at least one field with `fields`.
pub fn find_relevant_indices<'a>(
    fields: &BTreeSet<String>,
    all: &[IndexRef<'a>],
) -> Vec<IndexRef<'a>> {
    all.iter()
        .filter(|idx| idx.entry.key_pattern.keys().any(|k| fields.contains(k)))
        .copied()
        .collect()
}

/// Whether `node` compares against a value a collator could reorder.
fn contains_collatable_comparison(node: &MatchExpression) -> bool {
    match &node.kind {
        MatchKind::Compare { value, .. } => is_collatable(value),
        MatchKind::In { values, .. } => values.iter().any(is_collatable),
        MatchKind::Not(child) => contains_collatable_comparison(child),
        _ => false,
    }
}

/// A spherical query wraps when its cap crosses the poles or the
/// antimeridian; a flat `2d` index cannot answer it.
pub fn is_wrapping(center: [f64; 2], radius_radians: f64) -> bool {
    let radius_degrees = radius_radians.to_degrees();
    center[0] - radius_degrees < -180.0
        || center[0] + radius_degrees > 180.0
        || center[1] - radius_degrees < -90.0
        || center[1] + radius_degrees > 90.0
}

/// Whether index field `key_value` of `index` can answer `node`.
///
/// The caller already knows the key field's name equals the node's path.
pub fn compatible(
    key_value: &Bson,
    index: &IndexRef<'_>,
    node: &MatchExpression,
    collator: Option<&Collator>,
) -> bool {
    let entry = index.entry;
    if contains_collatable_comparison(node)
        && !collators_match(collator, entry.collator.as_ref())
    {
        return false;
    }

    // An old index may spell a plugin name but still be a plain btree.
    let field_type = match key_value {
        Bson::String(s) if entry.index_type != IndexType::BTree => s.as_str(),
        _ => "",
    };

    match field_type {
        "" => {
            match &node.kind {
                MatchKind::Compare { value: Bson::Null, .. } if entry.sparse => return false,
                MatchKind::In { values, .. } if entry.sparse && values.contains(&Bson::Null) => {
                    return false;
                }
                MatchKind::Geo { .. } | MatchKind::GeoNear { .. } => return false,
                MatchKind::Not(child) => {
                    if entry.index_type != IndexType::BTree || entry.sparse {
                        return false;
                    }
                    if matches!(child.kind, MatchKind::Regex { .. }) {
                        return false;
                    }
                }
                _ => {}
            }

            if entry.index_type != IndexType::Text {
                return true;
            }

            // Text indices answer equality anywhere, anything else only in
            // the suffix after the text fields.
            if matches!(node.kind, MatchKind::Compare { op: slate_query::CmpOp::Eq, .. }) {
                return true;
            }
            for (field, value) in &entry.key_pattern {
                if matches!(value, Bson::String(_)) {
                    return true;
                }
                if node.path() == Some(field.as_str()) {
                    return false;
                }
            }
            true
        }
        "hashed" => matches!(
            node.kind,
            MatchKind::Compare { op: slate_query::CmpOp::Eq, .. } | MatchKind::In { .. }
        ),
        "2dsphere" => match &node.kind {
            MatchKind::Geo { shape, .. } => shape.is_spherical(),
            MatchKind::GeoNear { crs, .. } => *crs == Crs::Sphere,
            _ => false,
        },
        "2d" => match &node.kind {
            MatchKind::GeoNear {
                crs,
                point,
                max_distance,
                ..
            } => {
                *crs == Crs::Flat
                    || max_distance.is_some_and(|d| !is_wrapping(*point, d))
            }
            MatchKind::Geo {
                predicate: GeoPredicate::Within,
                shape,
                ..
            } => match shape {
                GeoShape::CenterSphere { center, radius } => !is_wrapping(*center, *radius),
                s => s.is_flat(),
            },
            _ => false,
        },
        "text" => node.is_text(),
        _ => false,
    }
}

/// Attach a [`RelevantTag`] to every bounds-generating node of `node`.
///
/// Every such node is tagged, even when no index is compatible.
pub fn rate_indices(
    node: &MatchExpression,
    indices: &[IndexRef<'_>],
    collator: Option<&Collator>,
    tags: &mut TagMap,
) {
    if matches!(node.kind, MatchKind::Nor(_)) {
        return;
    }

    if node.is_bounds_generating() {
        let path = match &node.kind {
            MatchKind::Not(child) => child.path(),
            _ => node.path(),
        }
        .unwrap_or_default()
        .to_string();

        let mut rt = RelevantTag {
            path,
            ..Default::default()
        };
        for (i, idx) in indices.iter().enumerate() {
            for (pos, (field, value)) in idx.entry.key_pattern.iter().enumerate() {
                if *field != rt.path || !compatible(value, idx, node, collator) {
                    continue;
                }
                if pos == 0 {
                    rt.first.push(i);
                } else {
                    rt.not_first.push(i);
                }
            }
        }
        trace!(node = %node, first = ?rt.first, not_first = ?rt.not_first, "rated");
        tags.insert(node.id, Tag::Relevant(rt));
    } else {
        for child in node.children() {
            rate_indices(child, indices, collator, tags);
        }
    }
}

fn remove_index(tags: &mut TagMap, node: &MatchExpression, idx: usize) {
    if let Some(rt) = tags.relevant_mut(node.id) {
        rt.first.retain(|&i| i != idx);
        rt.not_first.retain(|&i| i != idx);
    }
}

fn assigned_to(tags: &TagMap, node: &MatchExpression, idx: usize) -> bool {
    tags.relevant(node.id)
        .is_some_and(|rt| rt.first.contains(&idx) || rt.not_first.contains(&idx))
}

/// Leaves that predicate on their own field.
fn uses_own_field(node: &MatchExpression) -> bool {
    node.path().is_some()
}

/// Remove assignments that would produce incorrect plans.
pub fn strip_invalid_assignments(root: &MatchExpression, indices: &[IndexRef<'_>], tags: &mut TagMap) {
    strip_invalid_assignments_to_text_indices(root, indices, tags);
    if !matches!(root.kind, MatchKind::Geo { .. } | MatchKind::GeoNear { .. }) {
        strip_invalid_assignments_to_2dsphere_indices(root, indices, tags);
    }
    strip_invalid_assignments_to_partial_indices(root, indices, tags);
}

// ── Text index prefixes ────────────────────────────────────────

fn strip_invalid_assignments_to_text_indices(
    root: &MatchExpression,
    indices: &[IndexRef<'_>],
    tags: &mut TagMap,
) {
    for (i, idx) in indices.iter().enumerate() {
        if idx.entry.index_type != IndexType::Text {
            continue;
        }
        // Prefix fields precede the first string-valued field.
        let prefix: BTreeSet<String> = idx
            .entry
            .key_pattern
            .iter()
            .take_while(|(_, v)| !matches!(v, Bson::String(_)))
            .map(|(k, _)| k.clone())
            .collect();
        if !prefix.is_empty() {
            strip_text_node(root, i, &prefix, tags);
        }
    }
}

fn strip_text_node(node: &MatchExpression, idx: usize, prefix: &BTreeSet<String>, tags: &mut TagMap) {
    // A text pred with nothing over its prefix, or a prefix pred without
    // an AND-related text pred.
    if uses_own_field(node) {
        remove_index(tags, node, idx);
        return;
    }

    match &node.kind {
        MatchKind::Not(_) | MatchKind::Nor(_) => {}
        MatchKind::And(children) => {
            let mut has_text = false;
            let mut missing = prefix.clone();
            for child in children {
                if tags.relevant(child.id).is_none() {
                    strip_text_node(child, idx, prefix, tags);
                    continue;
                }
                if assigned_to(tags, child, idx) {
                    if child.is_text() {
                        has_text = true;
                    } else if let Some(path) = child.path() {
                        missing.remove(path);
                    }
                } else {
                    strip_text_node(child, idx, prefix, tags);
                }
            }
            if !has_text || !missing.is_empty() {
                for child in children {
                    strip_text_node(child, idx, prefix, tags);
                }
            }
        }
        _ => {
            for child in node.children() {
                strip_text_node(child, idx, prefix, tags);
            }
        }
    }
}

// ── 2dsphere v2 sparseness ─────────────────────────────────────

fn strip_invalid_assignments_to_2dsphere_indices(
    root: &MatchExpression,
    indices: &[IndexRef<'_>],
    tags: &mut TagMap,
) {
    for (i, idx) in indices.iter().enumerate() {
        // Version 1 indices index documents without the geo field too.
        if idx.entry.is_2dsphere_v2_or_later() {
            strip_2dsphere_node(root, i, tags);
        }
    }
}

fn partition_and_related<'e>(
    node: &'e MatchExpression,
    and_related: &mut Vec<&'e MatchExpression>,
    other: &mut Vec<&'e MatchExpression>,
) {
    for child in node.children() {
        if child.is_bounds_generating() {
            and_related.push(child);
        } else if child.is_and() {
            partition_and_related(child, and_related, other);
        } else {
            other.push(child);
        }
    }
}

fn strip_2dsphere_node(node: &MatchExpression, idx: usize, tags: &mut TagMap) {
    if uses_own_field(node) && !matches!(node.kind, MatchKind::Geo { .. } | MatchKind::GeoNear { .. }) {
        remove_index(tags, node, idx);
        return;
    }

    match &node.kind {
        MatchKind::Not(_) | MatchKind::Nor(_) => {}
        MatchKind::And(_) => {
            let mut and_related = Vec::new();
            let mut other = Vec::new();
            partition_and_related(node, &mut and_related, &mut other);

            for child in other {
                strip_2dsphere_node(child, idx, tags);
            }

            let has_geo = and_related.iter().any(|c| {
                assigned_to(tags, c, idx)
                    && matches!(c.kind, MatchKind::Geo { .. } | MatchKind::GeoNear { .. })
            });
            if !has_geo {
                for child in and_related {
                    strip_2dsphere_node(child, idx, tags);
                }
            }
        }
        _ => {
            for child in node.children() {
                strip_2dsphere_node(child, idx, tags);
            }
        }
    }
}

// ── Partial indices ────────────────────────────────────────────

fn strip_invalid_assignments_to_partial_indices(
    root: &MatchExpression,
    indices: &[IndexRef<'_>],
    tags: &mut TagMap,
) {
    for (i, idx) in indices.iter().enumerate() {
        let Some(filter) = &idx.entry.filter_expr else {
            continue;
        };
        if is_subset_of(root, filter) {
            continue;
        }
        let negated = matches!(root.kind, MatchKind::Not(_) | MatchKind::Nor(_));
        strip_partial_node(root, i, filter, negated, tags);
    }
}

fn strip_partial_node(
    node: &MatchExpression,
    idx: usize,
    filter: &MatchExpression,
    negated: bool,
    tags: &mut TagMap,
) {
    remove_index(tags, node, idx);
    let negated = negated || matches!(node.kind, MatchKind::Not(_) | MatchKind::Nor(_));
    for child in node.children() {
        // An OR clause that alone satisfies the filter may keep the index.
        if !negated && node.is_or() && is_subset_of(child, filter) {
            continue;
        }
        strip_partial_node(child, idx, filter, negated, tags);
    }
}

// ── Unneeded assignments ───────────────────────────────────────

/// When an AND holds an equality answerable by a single-field unique
/// index, that index alone is assigned within the AND's subtree.
pub fn strip_unneeded_assignments(node: &MatchExpression, indices: &[IndexRef<'_>], tags: &mut TagMap) {
    if let MatchKind::And(children) = &node.kind {
        for child in children {
            if !matches!(child.kind, MatchKind::Compare { op: slate_query::CmpOp::Eq, .. }) {
                continue;
            }
            let Some(rt) = tags.relevant(child.id) else {
                continue;
            };
            let unique = rt.first.iter().copied().find(|&i| {
                let entry = indices[i].entry;
                entry.unique && entry.num_fields() == 1
            });
            if let Some(i) = unique {
                clear_assignments(node, tags);
                if let Some(rt) = tags.relevant_mut(child.id) {
                    rt.first.push(i);
                }
                trace!(index = %indices[i].entry.name, "unique equality, other assignments stripped");
                return;
            }
        }
    }

    for child in node.children() {
        strip_unneeded_assignments(child, indices, tags);
    }
}

fn clear_assignments(node: &MatchExpression, tags: &mut TagMap) {
    if let Some(rt) = tags.relevant_mut(node.id) {
        rt.first.clear();
        rt.not_first.clear();
    }
    for child in node.children() {
        clear_assignments(child, tags);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::IndexEntry;
    use bson::doc;
    use slate_query::CanonicalQuery;

    fn query(filter: bson::Document) -> CanonicalQuery {
        CanonicalQuery::from_filter(filter).unwrap()
    }

    fn rate(q: &CanonicalQuery, entries: &[IndexEntry]) -> TagMap {
        let refs = IndexRef::all(entries);
        let mut tags = TagMap::new();
        rate_indices(q.root(), &refs, q.collator(), &mut tags);
        tags
    }

    #[test]
    fn fields_skip_nor() {
        let q = query(doc! { "a": 1_i32, "$or": [{ "b": 1_i32 }, { "c": 1_i32 }], "$nor": [{ "d": 1_i32 }] });
        let mut fields = BTreeSet::new();
        get_fields(q.root(), &mut fields);
        assert_eq!(fields.into_iter().collect::<Vec<_>>(), vec!["a", "b", "c"]);
    }

    #[test]
    fn relevant_indices_share_a_field() {
        let entries = vec![
            IndexEntry::new(doc! { "a": 1_i32 }),
            IndexEntry::new(doc! { "x": 1_i32, "b": 1_i32 }),
            IndexEntry::new(doc! { "z": 1_i32 }),
        ];
        let refs = IndexRef::all(&entries);
        let fields: BTreeSet<String> = ["a".to_string(), "b".to_string()].into();
        let relevant = find_relevant_indices(&fields, &refs);
        let ordinals: Vec<_> = relevant.iter().map(|r| r.ordinal).collect();
        assert_eq!(ordinals, vec![0, 1]);
    }

    #[test]
    fn rating_distinguishes_first_and_not_first() {
        let q = query(doc! { "a": 1_i32, "b": 2_i32 });
        let entries = vec![IndexEntry::new(doc! { "a": 1_i32, "b": 1_i32 })];
        let tags = rate(&q, &entries);
        let a = &q.root().children()[0];
        let b = &q.root().children()[1];
        assert_eq!(tags.relevant(a.id).unwrap().first, vec![0]);
        assert_eq!(tags.relevant(b.id).unwrap().not_first, vec![0]);
    }

    #[test]
    fn sparse_index_rejects_null_equality() {
        let q = query(doc! { "a": bson::Bson::Null });
        let entries = vec![IndexEntry::new(doc! { "a": 1_i32 }).sparse(true)];
        let tags = rate(&q, &entries);
        assert!(tags.relevant(q.root().id).unwrap().first.is_empty());
    }

    #[test]
    fn collation_mismatch_only_matters_for_strings() {
        let entries = vec![IndexEntry::new(doc! { "a": 1_i32 }).with_collator(Collator::ReverseString)];
        let strings = query(doc! { "a": "foo" });
        assert!(rate(&strings, &entries).relevant(strings.root().id).unwrap().first.is_empty());
        let numbers = query(doc! { "a": 3_i32 });
        assert_eq!(rate(&numbers, &entries).relevant(numbers.root().id).unwrap().first, vec![0]);
    }

    #[test]
    fn hashed_only_equality() {
        let entries = vec![IndexEntry::new(doc! { "a": "hashed" })];
        let eq = query(doc! { "a": 1_i32 });
        assert_eq!(rate(&eq, &entries).relevant(eq.root().id).unwrap().first, vec![0]);
        let range = query(doc! { "a": { "$gt": 1_i32 } });
        assert!(rate(&range, &entries).relevant(range.root().id).unwrap().first.is_empty());
    }

    #[test]
    fn two_d_box_is_compatible() {
        let entries = vec![IndexEntry::new(doc! { "a": "2d" })];
        let q = query(doc! { "a": { "$within": { "$box": [[0_i32, 0_i32], [9_i32, 9_i32]] } } });
        assert_eq!(rate(&q, &entries).relevant(q.root().id).unwrap().first, vec![0]);
    }

    #[test]
    fn text_prefix_requires_equality() {
        let entries = vec![IndexEntry::new(doc! { "a": 1_i32, "_fts": "text", "_ftsx": 1_i32 })];
        let refs = IndexRef::all(&entries);

        let without = query(doc! { "$text": { "$search": "s" } });
        let mut tags = rate(&without, &entries);
        assert_eq!(tags.relevant(without.root().id).unwrap().not_first, vec![0]);
        strip_invalid_assignments(without.root(), &refs, &mut tags);
        assert!(tags.relevant(without.root().id).unwrap().not_first.is_empty());

        let with = query(doc! { "a": 1_i32, "$text": { "$search": "s" } });
        let mut tags = rate(&with, &entries);
        strip_invalid_assignments(with.root(), &refs, &mut tags);
        let text = with.root().find(&MatchExpression::is_text).unwrap();
        assert_eq!(tags.relevant(text.id).unwrap().not_first, vec![0]);
    }

    #[test]
    fn partial_index_stripped_when_query_not_subset() {
        let entries = vec![IndexEntry::new(doc! { "a": 1_i32 })
            .with_partial_filter(&doc! { "a": { "$gt": 0_i32 } })
            .unwrap()];
        let refs = IndexRef::all(&entries);

        let inside = query(doc! { "a": 5_i32 });
        let mut tags = rate(&inside, &entries);
        strip_invalid_assignments(inside.root(), &refs, &mut tags);
        assert_eq!(tags.relevant(inside.root().id).unwrap().first, vec![0]);

        let outside = query(doc! { "a": -5_i32 });
        let mut tags = rate(&outside, &entries);
        strip_invalid_assignments(outside.root(), &refs, &mut tags);
        assert!(tags.relevant(outside.root().id).unwrap().first.is_empty());
    }

    #[test]
    fn unique_equality_wins() {
        let entries = vec![
            IndexEntry::new(doc! { "a": 1_i32 }).unique(true),
            IndexEntry::new(doc! { "b": 1_i32 }),
        ];
        let refs = IndexRef::all(&entries);
        let q = query(doc! { "a": 1_i32, "b": 1_i32 });
        let mut tags = rate(&q, &entries);
        strip_unneeded_assignments(q.root(), &refs, &mut tags);
        let a = &q.root().children()[0];
        let b = &q.root().children()[1];
        assert_eq!(tags.relevant(a.id).unwrap().first, vec![0]);
        assert!(tags.relevant(b.id).unwrap().first.is_empty());
    }
}
