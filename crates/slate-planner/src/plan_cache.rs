//! Conversion between tagged predicate trees and their cacheable form.
//!
//! A cache tree mirrors the shape of the predicate tree it was built from
//! and records, per node, the index that served it. Indices are stored by
//! value and resolved by name on replay; catalog ordinals are only valid
//! within a single plan call.

use std::collections::HashMap;
use std::fmt;

use slate_query::MatchExpression;

use crate::error::{PlannerError, Result};
use crate::index::{IndexEntry, IndexRef};
use crate::tag::{Destination, IndexTag, OrPushdownTag, Tag, TagMap};

/// How a cached plan is rebuilt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolutionType {
    /// Retag the predicate tree and run access planning.
    UseIndexTags,
    /// Scan one whole index, for sort or covering.
    WholeIxscan,
    Collscan,
}

/// A predicate copy that must be pushed into an OR branch on replay.
#[derive(Debug, Clone, PartialEq)]
pub struct OrPushdown {
    pub index_name: String,
    pub position: usize,
    pub can_combine_bounds: bool,
    /// Child indices from the predicate's parent to the target node.
    pub route: Vec<usize>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlanCacheIndexTree {
    pub entry: Option<IndexEntry>,
    pub index_pos: usize,
    pub can_combine_bounds: bool,
    pub or_pushdowns: Vec<OrPushdown>,
    pub children: Vec<PlanCacheIndexTree>,
}

impl PlanCacheIndexTree {
    fn write_indented(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        let pad = "---".repeat(depth);
        if self.children.is_empty() {
            write!(f, "{pad}Leaf ")?;
            match &self.entry {
                Some(entry) => write!(f, "{}, pos: {}", entry.name, self.index_pos)?,
                None => write!(f, "(no index)")?,
            }
            if !self.can_combine_bounds {
                write!(f, ", cannot combine")?;
            }
        } else {
            write!(f, "{pad}Node")?;
        }
        for pushdown in &self.or_pushdowns {
            write!(
                f,
                " [pushdown {} pos {} route {:?}]",
                pushdown.index_name, pushdown.position, pushdown.route
            )?;
        }
        writeln!(f)?;
        for child in &self.children {
            child.write_indented(f, depth + 1)?;
        }
        Ok(())
    }
}

impl fmt::Display for PlanCacheIndexTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_indented(f, 0)
    }
}

/// What the cache stores for one solution.
#[derive(Debug, Clone, PartialEq)]
pub struct SolutionCacheData {
    pub tree: Option<PlanCacheIndexTree>,
    pub soln_type: SolutionType,
    /// Scan direction for whole-index scans.
    pub whole_ix_soln_dir: i32,
    pub index_filter_applied: bool,
}

impl SolutionCacheData {
    pub fn use_index_tags(tree: PlanCacheIndexTree) -> Self {
        Self {
            tree: Some(tree),
            soln_type: SolutionType::UseIndexTags,
            whole_ix_soln_dir: 1,
            index_filter_applied: false,
        }
    }

    pub fn whole_ixscan(entry: IndexEntry, direction: i32) -> Self {
        Self {
            tree: Some(PlanCacheIndexTree {
                entry: Some(entry),
                can_combine_bounds: true,
                ..Default::default()
            }),
            soln_type: SolutionType::WholeIxscan,
            whole_ix_soln_dir: direction,
            index_filter_applied: false,
        }
    }

    pub fn collscan() -> Self {
        Self {
            tree: None,
            soln_type: SolutionType::Collscan,
            whole_ix_soln_dir: 1,
            index_filter_applied: false,
        }
    }
}

/// A cache hit as handed back to the planner.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedSolution {
    /// Cache data of the winning plan first.
    pub planner_data: Vec<SolutionCacheData>,
}

/// Convert a tagged tree to cache form. Tag index numbers refer to
/// `relevant`.
pub fn cache_data_from_tagged_tree(
    root: &MatchExpression,
    tags: &TagMap,
    relevant: &[IndexRef<'_>],
) -> Result<PlanCacheIndexTree> {
    let resolve = |index: usize| -> Result<&IndexEntry> {
        let entry = relevant.get(index).map(|r| r.entry).ok_or_else(|| {
            PlannerError::Internal(format!(
                "Index number is {index} but there are only {} relevant indices.",
                relevant.len()
            ))
        })?;
        // 2d bounds depend on whether the query shape wraps.
        if entry.has_2d_field() {
            return Err(PlannerError::bad_value("can't cache '2d' index"));
        }
        Ok(entry)
    };

    let mut tree = PlanCacheIndexTree {
        can_combine_bounds: true,
        ..Default::default()
    };

    match tags.get(root.id) {
        Some(Tag::Index(t)) => {
            tree.entry = Some(resolve(t.index)?.clone());
            tree.index_pos = t.pos;
            tree.can_combine_bounds = t.can_combine_bounds;
        }
        Some(Tag::OrPushdown(t)) => {
            if let Some(own) = &t.index_tag {
                tree.entry = Some(resolve(own.index)?.clone());
                tree.index_pos = own.pos;
                tree.can_combine_bounds = own.can_combine_bounds;
            }
            for dest in &t.destinations {
                tree.or_pushdowns.push(OrPushdown {
                    index_name: resolve(dest.tag.index)?.name.clone(),
                    position: dest.tag.pos,
                    can_combine_bounds: dest.tag.can_combine_bounds,
                    route: dest.route.clone(),
                });
            }
        }
        Some(Tag::Relevant(_)) | None => {}
    }

    for child in root.children() {
        tree.children.push(cache_data_from_tagged_tree(child, tags, relevant)?);
    }
    Ok(tree)
}

fn lookup(name: &str, index_map: &HashMap<String, usize>) -> Result<usize> {
    index_map
        .get(name)
        .copied()
        .ok_or_else(|| PlannerError::bad_value(format!("Did not find index with name: {name}")))
}

/// Rebuild tags for `filter` from a cache tree. Tag index numbers in the
/// result are catalog ordinals from `index_map`.
pub fn tag_according_to_cache(
    filter: &MatchExpression,
    tree: &PlanCacheIndexTree,
    index_map: &HashMap<String, usize>,
) -> Result<TagMap> {
    let mut tags = TagMap::new();
    tag_node(filter, tree, index_map, &mut tags)?;
    Ok(tags)
}

fn tag_node(
    filter: &MatchExpression,
    tree: &PlanCacheIndexTree,
    index_map: &HashMap<String, usize>,
    tags: &mut TagMap,
) -> Result<()> {
    let children = filter.children();
    if children.len() != tree.children.len() {
        return Err(PlannerError::Internal(format!(
            "Cache topology and query did not match: query has {} children and cache has {} children.",
            children.len(),
            tree.children.len()
        )));
    }
    for (child, child_tree) in children.iter().zip(&tree.children) {
        tag_node(child, child_tree, index_map, tags)?;
    }

    let own = match &tree.entry {
        Some(entry) => Some(IndexTag {
            index: lookup(&entry.name, index_map)?,
            pos: tree.index_pos,
            can_combine_bounds: tree.can_combine_bounds,
        }),
        None => None,
    };

    if tree.or_pushdowns.is_empty() {
        if let Some(tag) = own {
            tags.insert(filter.id, Tag::Index(tag));
        }
        return Ok(());
    }

    let mut pushdown = OrPushdownTag {
        destinations: Vec::with_capacity(tree.or_pushdowns.len()),
        index_tag: own,
    };
    for p in &tree.or_pushdowns {
        pushdown.destinations.push(Destination {
            route: p.route.clone(),
            tag: IndexTag {
                index: lookup(&p.index_name, index_map)?,
                pos: p.position,
                can_combine_bounds: p.can_combine_bounds,
            },
        });
    }
    tags.insert(filter.id, Tag::OrPushdown(pushdown));
    Ok(())
}
