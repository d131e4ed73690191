//! Access-path building: turning a tagged predicate tree into a tree of
//! physical scan nodes.

use bson::{Bson, Document};
use slate_query::{
    CanonicalQuery, CmpOp, MatchExpression, MatchKind, NATURAL, NodeId, SortDirection, as_f64,
    is_descending, natural_direction,
};
use tracing::trace;

use crate::bounds::{BoundsTightness, IndexBounds, OrderedIntervalList, translate};
use crate::index::{IndexEntry, IndexRef, IndexType};
use crate::params::QueryPlannerParams;
use crate::solution::{
    AndNode, CollectionScanNode, GeoNearNode, IndexScanNode, MergeSortNode, OrNode,
    QuerySolutionNode, TextNode,
};
use crate::tag::{IndexTag, Tag, TagMap};

/// The query filter, unless it matches everything.
fn root_filter(query: &CanonicalQuery) -> Option<MatchExpression> {
    let root = query.root();
    (!root.is_trivially_true()).then(|| root.clone())
}

/// Full collection scan. A `$natural` sort sets the direction; failing
/// that, a `$natural` hint does.
pub fn make_collection_scan(
    query: &CanonicalQuery,
    tailable: bool,
    params: &QueryPlannerParams,
) -> QuerySolutionNode {
    let direction = match natural_direction(query.sort()) {
        Some(SortDirection::Desc) => -1,
        Some(SortDirection::Asc) => 1,
        None => query
            .request()
            .hint
            .get(NATURAL)
            .and_then(as_f64)
            .map_or(1, |d| if d < 0.0 { -1 } else { 1 }),
    };

    QuerySolutionNode::CollectionScan(CollectionScanNode {
        filter: root_filter(query),
        direction,
        tailable,
        track_latest_oplog_ts: params.options.track_latest_oplog_ts,
        wait_for_visible: params.options.oplog_scan_wait_for_visible,
    })
}

/// Unbounded scan of `index` in `direction`, fetching and filtering when the
/// query has a filter.
pub fn scan_whole_index(
    index: IndexRef<'_>,
    query: &CanonicalQuery,
    _params: &QueryPlannerParams,
    direction: i32,
) -> QuerySolutionNode {
    let mut bounds = IndexBounds::all_values_for(&index.entry.key_pattern);
    bounds.align(&index.entry.key_pattern, direction);
    let scan = QuerySolutionNode::IndexScan(IndexScanNode {
        index: index.entry.clone(),
        ordinal: index.ordinal,
        bounds,
        direction,
        filter: None,
        query_collator: query.collator().cloned(),
    });
    match root_filter(query) {
        Some(filter) => QuerySolutionNode::fetch(scan, Some(filter)),
        None => scan,
    }
}

/// Scan of `index` between two finished min/max keys, end exclusive.
pub fn make_index_scan(
    index: IndexRef<'_>,
    query: &CanonicalQuery,
    _params: &QueryPlannerParams,
    start_key: Vec<Bson>,
    end_key: Vec<Bson>,
) -> QuerySolutionNode {
    let scan = QuerySolutionNode::IndexScan(IndexScanNode {
        index: index.entry.clone(),
        ordinal: index.ordinal,
        bounds: IndexBounds::SimpleRange {
            start_key,
            end_key,
            end_inclusive: false,
        },
        direction: 1,
        filter: None,
        query_collator: query.collator().cloned(),
    });
    match root_filter(query) {
        Some(filter) => QuerySolutionNode::fetch(scan, Some(filter)),
        None => scan,
    }
}

// ── Preparation ────────────────────────────────────────────────

/// Rewrite a tagged tree into the shape the builder expects: OR-pushdown
/// tags are resolved into predicate copies inside the OR branches, then
/// the children of every AND and OR are ordered by the index and key
/// position they are tagged with.
pub fn prepare_for_access_planning(root: &mut MatchExpression, tags: &mut TagMap) {
    let mut next_id = root.max_id().0 + 1;
    resolve_or_pushdowns(root, tags, &mut next_id);
    sort_for_access(root, tags);
}

fn resolve_or_pushdowns(node: &mut MatchExpression, tags: &mut TagMap, next_id: &mut usize) {
    if node.is_and() {
        let mut pushes = Vec::new();
        for child in node.children() {
            let Some(Tag::OrPushdown(t)) = tags.get(child.id) else {
                continue;
            };
            for dest in &t.destinations {
                pushes.push((child.clone(), dest.clone()));
            }
            let own = t.index_tag;
            tags.remove(child.id);
            if let Some(own) = own {
                tags.insert(child.id, Tag::Index(own));
            }
        }

        for (pred, dest) in pushes {
            let mut copy = pred;
            copy.assign_ids_from(next_id);
            tags.insert(copy.id, Tag::Index(dest.tag));
            if let Some(target) = follow_route(node, &dest.route) {
                push_into(target, copy, next_id);
            }
        }
    }

    for child in node.children_mut() {
        resolve_or_pushdowns(child, tags, next_id);
    }
}

fn follow_route<'a>(node: &'a mut MatchExpression, route: &[usize]) -> Option<&'a mut MatchExpression> {
    let mut current = node;
    for &i in route {
        current = current.children_mut().get_mut(i)?;
    }
    Some(current)
}

/// Add `pred` as a conjunct of `target`.
fn push_into(target: &mut MatchExpression, pred: MatchExpression, next_id: &mut usize) {
    if let MatchKind::And(children) = &mut target.kind {
        children.push(pred);
        return;
    }
    let leaf = std::mem::replace(target, MatchExpression::and(Vec::new()));
    target.kind = MatchKind::And(vec![pred, leaf]);
    target.id = NodeId(*next_id);
    *next_id += 1;
}

fn access_order(node: &MatchExpression, tags: &TagMap) -> (u8, usize, usize) {
    match tags.index_tag(node.id) {
        Some(t) => (0, t.index, t.pos),
        None if node.is_logical() && tags.has_index_tag_in(node) => (1, 0, 0),
        None => (2, 0, 0),
    }
}

fn sort_for_access(node: &mut MatchExpression, tags: &TagMap) {
    for child in node.children_mut() {
        sort_for_access(child, tags);
    }
    if let MatchKind::And(children) | MatchKind::Or(children) = &mut node.kind {
        children.sort_by_key(|c| access_order(c, tags));
    }
}

// ── Building ───────────────────────────────────────────────────

/// Build the access path for a prepared tagged tree. Tag index numbers
/// refer to `indices`. Returns `None` when the tagging cannot be turned
/// into a plan.
pub fn build_indexed_data_access(
    query: &CanonicalQuery,
    root: &MatchExpression,
    tags: &TagMap,
    indices: &[IndexRef<'_>],
    params: &QueryPlannerParams,
) -> Option<QuerySolutionNode> {
    let builder = AccessBuilder {
        query,
        tags,
        indices,
        params,
    };
    let node = builder.build(root)?;
    trace!(solution = %node, "built access path");
    Some(node)
}

struct AccessBuilder<'a> {
    query: &'a CanonicalQuery,
    tags: &'a TagMap,
    indices: &'a [IndexRef<'a>],
    params: &'a QueryPlannerParams,
}

impl AccessBuilder<'_> {
    fn build(&self, node: &MatchExpression) -> Option<QuerySolutionNode> {
        match &node.kind {
            MatchKind::And(children) => self.process_and(children),
            MatchKind::Or(children) => self.process_or(children),
            _ => self.process_and(std::slice::from_ref(node)),
        }
    }

    fn process_and(&self, children: &[MatchExpression]) -> Option<QuerySolutionNode> {
        let mut scans: Vec<QuerySolutionNode> = Vec::new();
        let mut residual: Vec<MatchExpression> = Vec::new();
        let mut current: Option<ScanBuilder<'_>> = None;

        for child in children {
            if let Some(tag) = self.tags.index_tag(child.id) {
                let tag = *tag;
                let index = *self.indices.get(tag.index)?;
                if current.as_ref().is_some_and(|b| b.index.ordinal != index.ordinal) {
                    if let Some(done) = current.take() {
                        scans.push(done.finish(self.query)?);
                    }
                }
                let builder = current.get_or_insert_with(|| ScanBuilder::new(index));
                if let Some(leftover) = builder.add(child, tag) {
                    residual.push(leftover);
                }
            } else if child.is_logical() && self.tags.has_index_tag_in(child) {
                scans.push(self.build(child)?);
            } else {
                residual.push(child.clone());
            }
        }
        if let Some(done) = current.take() {
            scans.push(done.finish(self.query)?);
        }

        let node = match scans.len() {
            0 => return None,
            1 => scans.pop()?,
            _ => {
                if !self.params.options.index_intersection {
                    return None;
                }
                intersect(scans)
            }
        };
        Some(attach_filter(node, conjunction(residual)))
    }

    fn process_or(&self, children: &[MatchExpression]) -> Option<QuerySolutionNode> {
        let mut branches = Vec::with_capacity(children.len());
        for child in children {
            if !self.tags.has_index_tag_in(child) {
                trace!(branch = %child, "OR branch has no index");
                return None;
            }
            branches.push(self.build(child)?);
        }
        if let Some(merged) = merge_or_scans(&branches) {
            return Some(merged);
        }

        let sort = self.query.sort();
        let sorted_branches = !sort.is_empty()
            && natural_direction(sort).is_none()
            && branches
                .iter()
                .all(|b| b.provided_sorts().iter().any(|s| s.as_slice() == sort));
        if sorted_branches {
            trace!("every OR branch is sorted, merging");
            return Some(QuerySolutionNode::MergeSort(MergeSortNode {
                pattern: sort.to_vec(),
                children: branches,
                dedup: true,
            }));
        }
        Some(QuerySolutionNode::Or(OrNode {
            children: branches,
            filter: None,
            dedup: true,
        }))
    }
}

/// Intersection of index-produced children. Point-only scans produce
/// record ids in order and can be merged without hashing.
fn intersect(children: Vec<QuerySolutionNode>) -> QuerySolutionNode {
    let all_points = children.iter().all(|c| match c {
        QuerySolutionNode::IndexScan(n) => {
            let fields = n.bounds.fields();
            !fields.is_empty() && fields.iter().all(OrderedIntervalList::is_single_point)
        }
        _ => false,
    });
    let node = AndNode {
        children,
        filter: None,
    };
    if all_points {
        QuerySolutionNode::AndSorted(node)
    } else {
        QuerySolutionNode::AndHash(node)
    }
}

fn conjunction(mut preds: Vec<MatchExpression>) -> Option<MatchExpression> {
    match preds.len() {
        0 => None,
        1 => preds.pop(),
        _ => Some(MatchExpression::and(preds)),
    }
}

fn and_filters(existing: Option<MatchExpression>, extra: MatchExpression) -> MatchExpression {
    match existing {
        None => extra,
        Some(MatchExpression {
            kind: MatchKind::And(mut children),
            id,
        }) => {
            children.push(extra);
            MatchExpression {
                id,
                kind: MatchKind::And(children),
            }
        }
        Some(e) => MatchExpression::and(vec![e, extra]),
    }
}

/// Apply `filter` to full documents coming out of `node`, fetching them
/// first when needed.
fn attach_filter(mut node: QuerySolutionNode, filter: Option<MatchExpression>) -> QuerySolutionNode {
    let Some(filter) = filter else {
        return node;
    };
    if node.fetched() {
        if let Some(slot) = node.filter_mut() {
            let existing = slot.take();
            *slot = Some(and_filters(existing, filter));
            return node;
        }
    }
    QuerySolutionNode::fetch(node, Some(filter))
}

/// OR branches that are plain scans of the same index, differing in at
/// most one field, collapse into one scan over the union of that field.
fn merge_or_scans(branches: &[QuerySolutionNode]) -> Option<QuerySolutionNode> {
    let mut scans = Vec::with_capacity(branches.len());
    for branch in branches {
        match branch {
            QuerySolutionNode::IndexScan(n) if n.filter.is_none() && !n.bounds.is_simple_range() => {
                scans.push(n)
            }
            _ => return None,
        }
    }
    let (first, rest) = scans.split_first()?;
    if rest.is_empty() {
        return None;
    }

    let mut differing: Option<usize> = None;
    for other in rest {
        if other.ordinal != first.ordinal || other.direction != first.direction {
            return None;
        }
        for (pos, (a, b)) in first.bounds.fields().iter().zip(other.bounds.fields()).enumerate() {
            if a == b {
                continue;
            }
            match differing {
                Some(d) if d != pos => return None,
                _ => differing = Some(pos),
            }
        }
    }

    let mut merged = (*first).clone();
    if let Some(pos) = differing {
        let descending = merged.index.field_at(pos).is_some_and(|(_, v)| is_descending(v));
        if let IndexBounds::Fields(fields) = &mut merged.bounds {
            let mut union = ascending(&fields[pos], descending);
            for other in rest {
                union = union.union(&ascending(&other.bounds.fields()[pos], descending));
            }
            if descending {
                union.reverse();
            }
            fields[pos] = union;
        }
    }
    Some(QuerySolutionNode::IndexScan(merged))
}

fn ascending(oil: &OrderedIntervalList, descending: bool) -> OrderedIntervalList {
    let mut oil = oil.clone();
    if descending {
        oil.reverse();
    }
    oil
}

// ── Per-index scan assembly ────────────────────────────────────

/// Accumulates the predicates assigned to one index within an AND.
struct ScanBuilder<'a> {
    index: IndexRef<'a>,
    fields: Vec<Option<OrderedIntervalList>>,
    /// Predicates re-checked against index keys.
    key_filter: Vec<MatchExpression>,
    text: Option<(String, Option<String>)>,
    near: Option<(usize, MatchExpression)>,
    /// Equality values for text index prefix fields.
    prefix: Document,
}

impl<'a> ScanBuilder<'a> {
    fn new(index: IndexRef<'a>) -> Self {
        Self {
            index,
            fields: vec![None; index.entry.num_fields()],
            key_filter: Vec::new(),
            text: None,
            near: None,
            prefix: Document::new(),
        }
    }

    fn entry(&self) -> &'a IndexEntry {
        self.index.entry
    }

    /// Fold `pred` into the scan. Returns the predicate back when it must
    /// still be applied to fetched documents.
    fn add(&mut self, pred: &MatchExpression, tag: IndexTag) -> Option<MatchExpression> {
        let entry = self.entry();
        let Some((field, key_value)) = entry.field_at(tag.pos) else {
            return Some(pred.clone());
        };

        match &pred.kind {
            MatchKind::Text { query, language } => {
                self.text = Some((query.clone(), language.clone()));
                return None;
            }
            MatchKind::GeoNear { .. } => {
                self.near = Some((tag.pos, pred.clone()));
                return None;
            }
            _ => {}
        }

        if entry.index_type == IndexType::Text {
            return self.add_text_prefix(pred, field);
        }
        if matches!(key_value, Bson::String(s) if s == "2d" || s == "2dsphere") {
            // Geo fields are searched by the geo predicate itself.
            return Some(pred.clone());
        }

        if !tag.can_combine_bounds && self.fields[tag.pos].is_some() {
            return Some(pred.clone());
        }

        let (oil, tightness) = translate(pred, field, key_value, entry);
        let slot = &mut self.fields[tag.pos];
        *slot = Some(match slot.take() {
            Some(existing) => existing.intersect(&oil),
            None => oil,
        });

        match tightness {
            BoundsTightness::Exact => None,
            BoundsTightness::InexactCovered
                if !entry.multikey
                    && entry.index_type == IndexType::BTree
                    && entry.collator.is_none() =>
            {
                self.key_filter.push(pred.clone());
                None
            }
            _ => Some(pred.clone()),
        }
    }

    fn add_text_prefix(&mut self, pred: &MatchExpression, field: &str) -> Option<MatchExpression> {
        let text_pos = self
            .entry()
            .key_pattern
            .values()
            .position(|v| matches!(v, Bson::String(s) if s == "text"))?;
        let before_text = self.entry().position_of(field).is_some_and(|p| p < text_pos);
        match &pred.kind {
            MatchKind::Compare {
                op: CmpOp::Eq,
                value,
                ..
            } if before_text => {
                self.prefix.insert(field, value.clone());
                None
            }
            _ => Some(pred.clone()),
        }
    }

    fn base_bounds(&self, direction: i32) -> IndexBounds {
        let key_pattern = &self.entry().key_pattern;
        let fields = key_pattern
            .keys()
            .zip(&self.fields)
            .map(|(name, oil)| {
                oil.clone()
                    .unwrap_or_else(|| OrderedIntervalList::all_values(name.clone()))
            })
            .collect();
        let mut bounds = IndexBounds::Fields(fields);
        bounds.align(key_pattern, direction);
        bounds
    }

    fn finish(self, query: &CanonicalQuery) -> Option<QuerySolutionNode> {
        let entry = self.entry();
        let ordinal = self.index.ordinal;

        if let Some((query_text, language)) = self.text.clone() {
            return Some(QuerySolutionNode::Text(TextNode {
                index: entry.clone(),
                ordinal,
                query: query_text,
                language,
                index_prefix: self.prefix,
                filter: None,
            }));
        }

        if let Some((_, near)) = self.near.clone() {
            let node = GeoNearNode {
                index: entry.clone(),
                ordinal,
                near,
                base_bounds: self.base_bounds(1),
                filter: None,
            };
            return Some(match entry.index_type {
                IndexType::TwoD => QuerySolutionNode::GeoNear2D(node),
                IndexType::TwoDSphere => QuerySolutionNode::GeoNear2DSphere(node),
                _ => return None,
            });
        }

        if entry.index_type == IndexType::Text {
            // Prefix predicates without the $text predicate itself.
            return None;
        }

        Some(QuerySolutionNode::IndexScan(IndexScanNode {
            bounds: self.base_bounds(1),
            index: entry.clone(),
            ordinal,
            direction: 1,
            filter: conjunction(self.key_filter),
            query_collator: query.collator().cloned(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enumerator::PlanEnumerator;
    use crate::ixselect::{rate_indices, strip_invalid_assignments};
    use bson::doc;
    use slate_query::QueryRequest;

    fn query(filter: Document) -> CanonicalQuery {
        CanonicalQuery::from_filter(filter).unwrap()
    }

    /// Every built access path for `q`, in enumeration order.
    fn build_all(q: &CanonicalQuery, entries: &[IndexEntry], params: &QueryPlannerParams) -> Vec<String> {
        let refs = IndexRef::all(entries);
        let mut rated = TagMap::new();
        rate_indices(q.root(), &refs, q.collator(), &mut rated);
        strip_invalid_assignments(q.root(), &refs, &mut rated);
        PlanEnumerator::new(q.root(), &refs, &rated, params)
            .filter_map(|mut tree| {
                prepare_for_access_planning(&mut tree.root, &mut tree.tags);
                build_indexed_data_access(q, &tree.root, &tree.tags, &refs, params)
            })
            .map(|n| n.to_string())
            .collect()
    }

    fn only_scan(node: &QuerySolutionNode) -> &IndexScanNode {
        node.first_index_scan().expect("an index scan")
    }

    #[test]
    fn collscan_follows_natural_sort() {
        let mut request = QueryRequest::with_filter(doc! { "a": 1_i32 });
        request.sort = doc! { "$natural": -1_i32 };
        let q = CanonicalQuery::canonicalize(request).unwrap();
        match make_collection_scan(&q, false, &QueryPlannerParams::default()) {
            QuerySolutionNode::CollectionScan(n) => {
                assert_eq!(n.direction, -1);
                assert!(n.filter.is_some());
            }
            other => panic!("expected collscan, got {:?}", other),
        }
    }

    #[test]
    fn whole_index_scan_skips_fetch_for_empty_filter() {
        let q = query(doc! {});
        let entries = vec![IndexEntry::new(doc! { "a": 1_i32, "b": -1_i32 })];
        let node = scan_whole_index(IndexRef::all(&entries)[0], &q, &QueryPlannerParams::default(), -1);
        assert_eq!(node.to_string(), "IXSCAN[a_1_b_-1][dir=-1]");
    }

    #[test]
    fn equality_becomes_point_bounds() {
        let q = query(doc! { "a": 5_i32 });
        let entries = vec![IndexEntry::new(doc! { "a": 1_i32 })];
        let built = build_all(&q, &entries, &QueryPlannerParams::default());
        assert_eq!(built, vec!["IXSCAN[a_1]"]);
    }

    #[test]
    fn compound_index_intersects_ranges_and_fetches_residual() {
        let q = query(doc! { "a": { "$gt": 1_i32, "$lt": 9_i32 }, "c": 3_i32 });
        let entries = vec![IndexEntry::new(doc! { "a": 1_i32, "b": 1_i32 })];
        let refs = IndexRef::all(&entries);
        let mut rated = TagMap::new();
        rate_indices(q.root(), &refs, None, &mut rated);
        let params = QueryPlannerParams::default();
        let mut tree = PlanEnumerator::new(q.root(), &refs, &rated, &params).next().unwrap();
        prepare_for_access_planning(&mut tree.root, &mut tree.tags);
        let node = build_indexed_data_access(&q, &tree.root, &tree.tags, &refs, &params).unwrap();

        assert_eq!(node.to_string(), "FETCH(IXSCAN[a_1_b_1])");
        assert_eq!(node.filter().and_then(MatchExpression::path), Some("c"));
        assert_eq!(
            only_scan(&node).bounds.to_string(),
            "{a: [[1, 9, false, false]], b: [[MinKey, MaxKey, true, true]]}"
        );
    }

    #[test]
    fn multikey_second_range_stays_in_fetch_filter() {
        let q = query(doc! { "a": { "$gt": 1_i32, "$lt": 9_i32 } });
        let entries = vec![IndexEntry::new(doc! { "a": 1_i32 }).multikey(true)];
        let refs = IndexRef::all(&entries);
        let mut rated = TagMap::new();
        rate_indices(q.root(), &refs, None, &mut rated);
        let params = QueryPlannerParams::default();
        let mut tree = PlanEnumerator::new(q.root(), &refs, &rated, &params).next().unwrap();
        prepare_for_access_planning(&mut tree.root, &mut tree.tags);
        let node = build_indexed_data_access(&q, &tree.root, &tree.tags, &refs, &params).unwrap();
        assert_eq!(node.to_string(), "FETCH(IXSCAN[a_1])");
        assert!(node.filter().is_some());
    }

    #[test]
    fn or_of_same_index_points_merges() {
        let q = query(doc! { "$or": [{ "a": 1_i32 }, { "a": 5_i32 }] });
        let entries = vec![IndexEntry::new(doc! { "a": 1_i32 })];
        let built = build_all(&q, &entries, &QueryPlannerParams::default());
        assert_eq!(built, vec!["IXSCAN[a_1]"]);
    }

    #[test]
    fn or_over_different_indices_dedups() {
        let q = query(doc! { "$or": [{ "a": 1_i32 }, { "b": 5_i32 }] });
        let entries = vec![IndexEntry::new(doc! { "a": 1_i32 }), IndexEntry::new(doc! { "b": 1_i32 })];
        let built = build_all(&q, &entries, &QueryPlannerParams::default());
        assert_eq!(built, vec!["OR(IXSCAN[a_1], IXSCAN[b_1])"]);
    }

    #[test]
    fn or_of_sorted_branches_merge_sorts() {
        let mut request = QueryRequest::with_filter(doc! { "$or": [{ "a": 1_i32 }, { "b": 1_i32 }] });
        request.sort = doc! { "c": 1_i32 };
        let q = CanonicalQuery::canonicalize(request).unwrap();
        let entries = vec![
            IndexEntry::new(doc! { "a": 1_i32, "c": 1_i32 }),
            IndexEntry::new(doc! { "b": 1_i32, "c": 1_i32 }),
        ];
        let built = build_all(&q, &entries, &QueryPlannerParams::default());
        assert_eq!(built, vec!["MERGE_SORT(IXSCAN[a_1_c_1], IXSCAN[b_1_c_1])"]);

        let unsorted = query(doc! { "$or": [{ "a": 1_i32 }, { "b": 1_i32 }] });
        let built = build_all(&unsorted, &entries, &QueryPlannerParams::default());
        assert_eq!(built, vec!["OR(IXSCAN[a_1_c_1], IXSCAN[b_1_c_1])"]);
    }

    #[test]
    fn intersection_of_points_is_sorted() {
        let q = query(doc! { "a": 1_i32, "b": 2_i32 });
        let entries = vec![IndexEntry::new(doc! { "a": 1_i32 }), IndexEntry::new(doc! { "b": 1_i32 })];
        let mut params = QueryPlannerParams::default();
        params.options.index_intersection = true;
        let built = build_all(&q, &entries, &params);
        assert_eq!(
            built,
            vec![
                "FETCH(IXSCAN[a_1])",
                "FETCH(IXSCAN[b_1])",
                "AND_SORTED(IXSCAN[a_1], IXSCAN[b_1])",
            ]
        );
    }

    #[test]
    fn pushdown_copies_outside_predicate_into_branches() {
        let q = query(doc! { "a": 1_i32, "$or": [{ "b": 1_i32 }, { "c": 1_i32 }] });
        let entries = vec![
            IndexEntry::new(doc! { "a": 1_i32, "b": 1_i32 }),
            IndexEntry::new(doc! { "a": 1_i32, "c": 1_i32 }),
        ];
        let built = build_all(&q, &entries, &QueryPlannerParams::default());
        assert_eq!(built.len(), 3);
        assert_eq!(built[2], "FETCH(OR(IXSCAN[a_1_b_1], IXSCAN[a_1_c_1]))");
    }

    #[test]
    fn prepare_orders_children_by_index_position() {
        let q = query(doc! { "a": 1_i32, "b": 2_i32 });
        let mut root = q.root().clone();
        let (a, b) = (root.children()[0].id, root.children()[1].id);
        let mut tags = TagMap::new();
        tags.insert(a, Tag::Index(IndexTag { index: 0, pos: 1, can_combine_bounds: true }));
        tags.insert(b, Tag::Index(IndexTag { index: 0, pos: 0, can_combine_bounds: true }));
        prepare_for_access_planning(&mut root, &mut tags);
        let order: Vec<_> = root.children().iter().map(|c| c.id).collect();
        assert_eq!(order, vec![b, a]);
    }

    #[test]
    fn text_prefix_equalities_fill_index_prefix() {
        let q = query(doc! { "a": 3_i32, "$text": { "$search": "blah" } });
        let entries = vec![IndexEntry::new(doc! { "a": 1_i32, "_fts": "text", "_ftsx": 1_i32 })];
        let refs = IndexRef::all(&entries);
        let mut rated = TagMap::new();
        rate_indices(q.root(), &refs, None, &mut rated);
        strip_invalid_assignments(q.root(), &refs, &mut rated);
        let params = QueryPlannerParams::default();
        let mut tree = PlanEnumerator::new(q.root(), &refs, &rated, &params).next().unwrap();
        prepare_for_access_planning(&mut tree.root, &mut tree.tags);
        match build_indexed_data_access(&q, &tree.root, &tree.tags, &refs, &params) {
            Some(QuerySolutionNode::Text(n)) => {
                assert_eq!(n.query, "blah");
                assert_eq!(n.index_prefix, doc! { "a": 3_i32 });
                assert!(n.filter.is_none());
            }
            other => panic!("expected text node, got {:?}", other),
        }
    }
}
