//! Physical plan trees produced by the planner.

use std::fmt;

use bson::Document;
use slate_query::{
    Collator, MatchExpression, Projection, Sort, collators_match, reverse_sort,
    sort_from_key_pattern,
};

use crate::bounds::IndexBounds;
use crate::index::{IndexEntry, IndexType};
use crate::plan_cache::SolutionCacheData;

#[derive(Debug, Clone, PartialEq)]
pub struct CollectionScanNode {
    pub filter: Option<MatchExpression>,
    /// `1` forward, `-1` backward.
    pub direction: i32,
    pub tailable: bool,
    pub track_latest_oplog_ts: bool,
    pub wait_for_visible: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndexScanNode {
    pub index: IndexEntry,
    /// Position of `index` in the catalog of the plan call.
    pub ordinal: usize,
    pub bounds: IndexBounds,
    pub direction: i32,
    /// Predicates re-checked against index keys.
    pub filter: Option<MatchExpression>,
    pub query_collator: Option<Collator>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FetchNode {
    pub filter: Option<MatchExpression>,
    pub child: Box<QuerySolutionNode>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrNode {
    pub children: Vec<QuerySolutionNode>,
    pub filter: Option<MatchExpression>,
    pub dedup: bool,
}

/// Union of children that each produce `pattern` order.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeSortNode {
    pub pattern: Vec<Sort>,
    pub children: Vec<QuerySolutionNode>,
    pub dedup: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AndNode {
    pub children: Vec<QuerySolutionNode>,
    pub filter: Option<MatchExpression>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SortNode {
    pub pattern: Vec<Sort>,
    /// `0` means unlimited.
    pub limit: u64,
    pub child: Box<QuerySolutionNode>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SkipNode {
    pub skip: u64,
    pub child: Box<QuerySolutionNode>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LimitNode {
    pub limit: u64,
    pub child: Box<QuerySolutionNode>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProjectionNode {
    pub projection: Projection,
    /// Whether the projection reads from index keys only.
    pub covered: bool,
    pub child: Box<QuerySolutionNode>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GeoNearNode {
    pub index: IndexEntry,
    pub ordinal: usize,
    /// The `$near` predicate driving the search.
    pub near: MatchExpression,
    /// Bounds on the non-geo key fields.
    pub base_bounds: IndexBounds,
    pub filter: Option<MatchExpression>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextNode {
    pub index: IndexEntry,
    pub ordinal: usize,
    pub query: String,
    pub language: Option<String>,
    /// Equality values for the key fields preceding the text fields.
    pub index_prefix: Document,
    pub filter: Option<MatchExpression>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ShardingFilterNode {
    pub shard_key: Document,
    pub child: Box<QuerySolutionNode>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct KeepMutationsNode {
    pub filter: Option<MatchExpression>,
    pub child: Box<QuerySolutionNode>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum QuerySolutionNode {
    /// Full collection traversal in storage order.
    CollectionScan(CollectionScanNode),
    /// Bounded traversal of one index.
    IndexScan(IndexScanNode),
    /// Load documents for the record ids below, optionally filtering them.
    Fetch(FetchNode),
    /// Union of children.
    Or(OrNode),
    /// Order-preserving union of sorted children.
    MergeSort(MergeSortNode),
    /// Intersection of children by hashing record ids.
    AndHash(AndNode),
    /// Intersection of children already ordered by record id.
    AndSorted(AndNode),
    /// In-memory sort.
    Sort(SortNode),
    Skip(SkipNode),
    Limit(LimitNode),
    Projection(ProjectionNode),
    GeoNear2D(GeoNearNode),
    GeoNear2DSphere(GeoNearNode),
    Text(TextNode),
    ShardingFilter(ShardingFilterNode),
    KeepMutations(KeepMutationsNode),
}

impl QuerySolutionNode {
    pub fn fetch(child: QuerySolutionNode, filter: Option<MatchExpression>) -> Self {
        QuerySolutionNode::Fetch(FetchNode {
            filter,
            child: Box::new(child),
        })
    }

    pub fn children(&self) -> Vec<&QuerySolutionNode> {
        match self {
            QuerySolutionNode::CollectionScan(_)
            | QuerySolutionNode::IndexScan(_)
            | QuerySolutionNode::GeoNear2D(_)
            | QuerySolutionNode::GeoNear2DSphere(_)
            | QuerySolutionNode::Text(_) => Vec::new(),
            QuerySolutionNode::Or(n) => n.children.iter().collect(),
            QuerySolutionNode::MergeSort(n) => n.children.iter().collect(),
            QuerySolutionNode::AndHash(n) | QuerySolutionNode::AndSorted(n) => {
                n.children.iter().collect()
            }
            QuerySolutionNode::Fetch(n) => vec![n.child.as_ref()],
            QuerySolutionNode::Sort(n) => vec![n.child.as_ref()],
            QuerySolutionNode::Skip(n) => vec![n.child.as_ref()],
            QuerySolutionNode::Limit(n) => vec![n.child.as_ref()],
            QuerySolutionNode::Projection(n) => vec![n.child.as_ref()],
            QuerySolutionNode::ShardingFilter(n) => vec![n.child.as_ref()],
            QuerySolutionNode::KeepMutations(n) => vec![n.child.as_ref()],
        }
    }

    /// The node's own filter slot, for nodes that have one.
    pub fn filter_mut(&mut self) -> Option<&mut Option<MatchExpression>> {
        match self {
            QuerySolutionNode::CollectionScan(n) => Some(&mut n.filter),
            QuerySolutionNode::IndexScan(n) => Some(&mut n.filter),
            QuerySolutionNode::Fetch(n) => Some(&mut n.filter),
            QuerySolutionNode::Or(n) => Some(&mut n.filter),
            QuerySolutionNode::AndHash(n) | QuerySolutionNode::AndSorted(n) => Some(&mut n.filter),
            QuerySolutionNode::GeoNear2D(n) | QuerySolutionNode::GeoNear2DSphere(n) => {
                Some(&mut n.filter)
            }
            QuerySolutionNode::Text(n) => Some(&mut n.filter),
            QuerySolutionNode::KeepMutations(n) => Some(&mut n.filter),
            _ => None,
        }
    }

    pub fn filter(&self) -> Option<&MatchExpression> {
        match self {
            QuerySolutionNode::CollectionScan(n) => n.filter.as_ref(),
            QuerySolutionNode::IndexScan(n) => n.filter.as_ref(),
            QuerySolutionNode::Fetch(n) => n.filter.as_ref(),
            QuerySolutionNode::Or(n) => n.filter.as_ref(),
            QuerySolutionNode::AndHash(n) | QuerySolutionNode::AndSorted(n) => n.filter.as_ref(),
            QuerySolutionNode::GeoNear2D(n) | QuerySolutionNode::GeoNear2DSphere(n) => {
                n.filter.as_ref()
            }
            QuerySolutionNode::Text(n) => n.filter.as_ref(),
            QuerySolutionNode::KeepMutations(n) => n.filter.as_ref(),
            _ => None,
        }
    }

    /// Whether full documents flow out of this node.
    pub fn fetched(&self) -> bool {
        match self {
            QuerySolutionNode::CollectionScan(_)
            | QuerySolutionNode::Fetch(_)
            | QuerySolutionNode::GeoNear2D(_)
            | QuerySolutionNode::GeoNear2DSphere(_)
            | QuerySolutionNode::Text(_) => true,
            QuerySolutionNode::IndexScan(_) => false,
            QuerySolutionNode::Or(n) => n.children.iter().all(QuerySolutionNode::fetched),
            QuerySolutionNode::MergeSort(n) => n.children.iter().all(QuerySolutionNode::fetched),
            QuerySolutionNode::AndHash(n) | QuerySolutionNode::AndSorted(n) => {
                n.children.iter().any(QuerySolutionNode::fetched)
            }
            other => other.children().iter().all(|c| c.fetched()),
        }
    }

    /// Whether `field` can be read from this node's output without a fetch.
    pub fn has_field(&self, field: &str) -> bool {
        match self {
            QuerySolutionNode::IndexScan(n) => {
                !n.index.multikey
                    && n.index.index_type == IndexType::BTree
                    && n.index.key_pattern.contains_key(field)
                    && !(n.index.collator.is_some() && bounds_may_hold_strings(&n.bounds, field))
            }
            QuerySolutionNode::Or(n) => n.children.iter().all(|c| c.has_field(field)),
            QuerySolutionNode::MergeSort(n) => n.children.iter().all(|c| c.has_field(field)),
            QuerySolutionNode::AndHash(n) | QuerySolutionNode::AndSorted(n) => {
                n.children.iter().any(|c| c.has_field(field))
            }
            other if other.fetched() => true,
            other => other.children().iter().any(|c| c.has_field(field)),
        }
    }

    /// Orders this node's output is known to follow.
    pub fn provided_sorts(&self) -> Vec<Vec<Sort>> {
        match self {
            QuerySolutionNode::IndexScan(n) => index_scan_sorts(n),
            QuerySolutionNode::Sort(n) => vec![n.pattern.clone()],
            QuerySolutionNode::MergeSort(n) => vec![n.pattern.clone()],
            QuerySolutionNode::Fetch(n) => n.child.provided_sorts(),
            QuerySolutionNode::Skip(n) => n.child.provided_sorts(),
            QuerySolutionNode::Limit(n) => n.child.provided_sorts(),
            QuerySolutionNode::Projection(n) => n.child.provided_sorts(),
            QuerySolutionNode::ShardingFilter(n) => n.child.provided_sorts(),
            QuerySolutionNode::KeepMutations(n) => n.child.provided_sorts(),
            _ => Vec::new(),
        }
    }

    /// Flip every scan below so the node produces the reverse order.
    pub fn reverse_scans(&mut self) {
        match self {
            QuerySolutionNode::IndexScan(n) => {
                n.direction = -n.direction;
                n.bounds.reverse();
            }
            QuerySolutionNode::CollectionScan(n) => n.direction = -n.direction,
            QuerySolutionNode::Or(n) => n.children.iter_mut().for_each(Self::reverse_scans),
            QuerySolutionNode::MergeSort(n) => {
                n.children.iter_mut().for_each(Self::reverse_scans);
                n.pattern = reverse_sort(&n.pattern);
            }
            QuerySolutionNode::AndHash(n) | QuerySolutionNode::AndSorted(n) => {
                n.children.iter_mut().for_each(Self::reverse_scans)
            }
            QuerySolutionNode::Fetch(n) => n.child.reverse_scans(),
            QuerySolutionNode::Skip(n) => n.child.reverse_scans(),
            QuerySolutionNode::Limit(n) => n.child.reverse_scans(),
            QuerySolutionNode::Projection(n) => n.child.reverse_scans(),
            QuerySolutionNode::ShardingFilter(n) => n.child.reverse_scans(),
            QuerySolutionNode::KeepMutations(n) => n.child.reverse_scans(),
            QuerySolutionNode::Sort(_)
            | QuerySolutionNode::GeoNear2D(_)
            | QuerySolutionNode::GeoNear2DSphere(_)
            | QuerySolutionNode::Text(_) => {}
        }
    }

    /// Pre-order search for the first index scan.
    pub fn first_index_scan(&self) -> Option<&IndexScanNode> {
        if let QuerySolutionNode::IndexScan(n) = self {
            return Some(n);
        }
        self.children().into_iter().find_map(|c| c.first_index_scan())
    }

    /// Every catalog ordinal read by this tree.
    pub fn index_ordinals(&self) -> Vec<usize> {
        let own = match self {
            QuerySolutionNode::IndexScan(n) => Some(n.ordinal),
            QuerySolutionNode::GeoNear2D(n) | QuerySolutionNode::GeoNear2DSphere(n) => {
                Some(n.ordinal)
            }
            QuerySolutionNode::Text(n) => Some(n.ordinal),
            _ => None,
        };
        let mut out: Vec<usize> = own.into_iter().collect();
        for child in self.children() {
            out.extend(child.index_ordinals());
        }
        out
    }

    /// Multi-line dump including bounds and filters.
    pub fn to_tree_string(&self) -> String {
        let mut out = String::new();
        self.write_tree(&mut out, 0);
        out
    }

    fn write_tree(&self, out: &mut String, depth: usize) {
        let pad = "  ".repeat(depth);
        let label = match self {
            QuerySolutionNode::IndexScan(n) => {
                format!("IXSCAN {} bounds={} dir={}", n.index.name, n.bounds, n.direction)
            }
            QuerySolutionNode::Sort(n) => format!("SORT {} limit={}", fmt_sort(&n.pattern), n.limit),
            QuerySolutionNode::MergeSort(n) => format!("MERGE_SORT {}", fmt_sort(&n.pattern)),
            QuerySolutionNode::Skip(n) => format!("SKIP {}", n.skip),
            QuerySolutionNode::Limit(n) => format!("LIMIT {}", n.limit),
            QuerySolutionNode::Projection(n) => format!("PROJ {} covered={}", n.projection.spec(), n.covered),
            other => other.name(),
        };
        out.push_str(&pad);
        out.push_str(&label);
        if let Some(filter) = self.filter() {
            out.push_str(&format!(" filter={filter}"));
        }
        out.push('\n');
        for child in self.children() {
            child.write_tree(out, depth + 1);
        }
    }

    fn name(&self) -> String {
        match self {
            QuerySolutionNode::CollectionScan(n) if n.direction < 0 => "COLLSCAN[dir=-1]".into(),
            QuerySolutionNode::CollectionScan(_) => "COLLSCAN".into(),
            QuerySolutionNode::IndexScan(n) if n.direction < 0 => {
                format!("IXSCAN[{}][dir=-1]", n.index.name)
            }
            QuerySolutionNode::IndexScan(n) => format!("IXSCAN[{}]", n.index.name),
            QuerySolutionNode::Fetch(_) => "FETCH".into(),
            QuerySolutionNode::Or(_) => "OR".into(),
            QuerySolutionNode::MergeSort(_) => "MERGE_SORT".into(),
            QuerySolutionNode::AndHash(_) => "AND_HASH".into(),
            QuerySolutionNode::AndSorted(_) => "AND_SORTED".into(),
            QuerySolutionNode::Sort(_) => "SORT".into(),
            QuerySolutionNode::Skip(_) => "SKIP".into(),
            QuerySolutionNode::Limit(_) => "LIMIT".into(),
            QuerySolutionNode::Projection(_) => "PROJ".into(),
            QuerySolutionNode::GeoNear2D(n) => format!("GEO_NEAR_2D[{}]", n.index.name),
            QuerySolutionNode::GeoNear2DSphere(n) => format!("GEO_NEAR_2DSPHERE[{}]", n.index.name),
            QuerySolutionNode::Text(n) => format!("TEXT[{}]", n.index.name),
            QuerySolutionNode::ShardingFilter(_) => "SHARDING_FILTER".into(),
            QuerySolutionNode::KeepMutations(_) => "KEEP_MUTATIONS".into(),
        }
    }
}

fn fmt_sort(sort: &[Sort]) -> String {
    let fields: Vec<String> = sort
        .iter()
        .map(|s| format!("{}: {}", s.field, s.direction.as_i32()))
        .collect();
    format!("{{{}}}", fields.join(", "))
}

fn push_unique(out: &mut Vec<Vec<Sort>>, sort: Vec<Sort>) {
    if !sort.is_empty() && !out.contains(&sort) {
        out.push(sort);
    }
}

/// Collated keys are not the stored strings, so such fields need a fetch.
/// A min/max range does not say which types it spans.
fn bounds_may_hold_strings(bounds: &IndexBounds, field: &str) -> bool {
    match bounds {
        IndexBounds::SimpleRange { .. } => true,
        IndexBounds::Fields(fields) => fields
            .iter()
            .find(|oil| oil.name == field)
            .is_none_or(|oil| oil.may_contain_strings()),
    }
}

/// Sorts an index scan provides: the key pattern order and its prefixes,
/// also with point-bound fields dropped. Fields whose bounds may hold
/// strings stop the order when the index and query collations differ.
fn index_scan_sorts(n: &IndexScanNode) -> Vec<Vec<Sort>> {
    let mut base = sort_from_key_pattern(&n.index.key_pattern);
    let fields = n.bounds.fields();
    let same_collation = collators_match(n.index.collator.as_ref(), n.query_collator.as_ref());

    let mut points = vec![false; base.len()];
    for (i, oil) in fields.iter().enumerate().take(base.len()) {
        points[i] = oil.is_single_point();
        if !same_collation && !points[i] && oil.may_contain_strings() {
            base.truncate(i);
            points.truncate(i);
            break;
        }
    }

    if n.direction < 0 {
        base = reverse_sort(&base);
    }

    let mut out = Vec::new();
    for len in 1..=base.len() {
        push_unique(&mut out, base[..len].to_vec());
    }

    let reduced: Vec<Sort> = base
        .iter()
        .zip(&points)
        .filter(|(_, point)| !**point)
        .map(|(s, _)| s.clone())
        .collect();
    if reduced.len() < base.len() {
        for len in 1..=reduced.len() {
            push_unique(&mut out, reduced[..len].to_vec());
        }
    }
    out
}

impl fmt::Display for QuerySolutionNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())?;
        let children = self.children();
        if !children.is_empty() {
            write!(f, "(")?;
            for (i, child) in children.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{child}")?;
            }
            write!(f, ")")?;
        }
        Ok(())
    }
}

/// A complete candidate plan.
#[derive(Debug, Clone, PartialEq)]
pub struct QuerySolution {
    pub root: QuerySolutionNode,
    /// Whether some stage must consume all input before producing output.
    pub has_blocking_stage: bool,
    /// How to rebuild this plan from a cache entry.
    pub cache_data: Option<SolutionCacheData>,
    pub index_filter_applied: bool,
}

impl QuerySolution {
    pub fn new(root: QuerySolutionNode) -> Self {
        Self {
            root,
            has_blocking_stage: false,
            cache_data: None,
            index_filter_applied: false,
        }
    }
}

impl fmt::Display for QuerySolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.root)
    }
}
