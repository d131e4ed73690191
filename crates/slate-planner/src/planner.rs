//! The planning entry points: full planning of a canonical query and
//! replay of a cached plan.

use std::collections::{BTreeSet, HashMap};

use bson::{Bson, Document};
use slate_query::{
    CanonicalQuery, Comparator, MatchExpression, NATURAL, collators_match, is_subset_of,
    is_sort_prefix, natural_direction, reverse_sort, sort_from_key_pattern,
};
use tracing::{debug, trace, warn};

use crate::access::{
    build_indexed_data_access, make_collection_scan, make_index_scan, prepare_for_access_planning,
    scan_whole_index,
};
use crate::analysis::analyze_data_access;
use crate::enumerator::PlanEnumerator;
use crate::error::{PlannerError, Result};
use crate::index::{IndexRef, IndexType};
use crate::ixselect::{
    find_relevant_indices, get_fields, rate_indices, strip_invalid_assignments,
    strip_unneeded_assignments,
};
use crate::min_max::{finished_range, index_compatible_max_min};
use crate::params::QueryPlannerParams;
use crate::plan_cache::{
    CachedSolution, SolutionCacheData, SolutionType, cache_data_from_tagged_tree,
    tag_according_to_cache,
};
use crate::solution::QuerySolution;
use crate::tag::TagMap;

/// A collection scan, finished with sort/projection/skip/limit stages.
pub fn build_collscan_soln(
    query: &CanonicalQuery,
    tailable: bool,
    params: &QueryPlannerParams,
) -> Option<QuerySolution> {
    let root = make_collection_scan(query, tailable, params);
    analyze_data_access(query, params, root)
}

/// A whole-index scan of `index` in `direction`, finished like any other
/// access path.
pub fn build_whole_ix_soln(
    index: IndexRef<'_>,
    query: &CanonicalQuery,
    params: &QueryPlannerParams,
    direction: i32,
) -> Option<QuerySolution> {
    let root = scan_whole_index(index, query, params, direction);
    analyze_data_access(query, params, root)
}

fn attach_cache_data(
    soln: &mut QuerySolution,
    mut data: SolutionCacheData,
    params: &QueryPlannerParams,
) {
    data.index_filter_applied = params.index_filters_applied;
    soln.cache_data = Some(data);
}

pub struct QueryPlanner;

impl QueryPlanner {
    /// Produce every candidate solution for `query`, in discovery order.
    ///
    /// Zero solutions is a valid outcome; errors are reserved for queries
    /// that cannot be planned as asked.
    pub fn plan(query: &CanonicalQuery, params: &QueryPlannerParams) -> Result<Vec<QuerySolution>> {
        debug!(
            query = %query.root(),
            options = %params.options,
            indices = params.indices.len(),
            "planning query"
        );
        let request = query.request();
        let can_table_scan = !params.options.no_table_scan;
        let all = IndexRef::all(&params.indices);

        if request.tailable {
            if query.is_geo_near() || !can_table_scan {
                return Ok(Vec::new());
            }
            debug!("tailable cursor, planning collection scan");
            return Ok(build_collscan_soln(query, true, params).into_iter().collect());
        }

        // $natural reads the hint as sent, even under index filters.
        let natural_sort = natural_direction(query.sort()).is_some();
        if request.hint.contains_key(NATURAL) || (natural_sort && request.hint.is_empty()) {
            debug!("$natural requested, planning collection scan");
            // min/max need an index.
            if !can_table_scan || !request.min.is_empty() || !request.max.is_empty() {
                return Ok(Vec::new());
            }
            return Ok(build_collscan_soln(query, false, params).into_iter().collect());
        }

        // Index filters already pinned the index set; any other hint is ignored.
        let hint = if params.index_filters_applied {
            Document::new()
        } else {
            request.hint.clone()
        };
        let hinted = resolve_hint(&hint, params)?;

        if !request.min.is_empty() || !request.max.is_empty() {
            return plan_min_max(query, params, &all, hinted);
        }

        let mut fields = BTreeSet::new();
        get_fields(query.root(), &mut fields);
        let relevant: Vec<IndexRef<'_>> = match hinted {
            Some(i) => vec![all[i]],
            None => find_relevant_indices(&fields, &all),
        };
        for idx in &relevant {
            trace!(ordinal = idx.ordinal, index = %idx.entry, "relevant index");
        }

        let is_geo_near = query.is_geo_near();
        let is_text = query.is_text();

        let mut rated = TagMap::new();
        rate_indices(query.root(), &relevant, query.collator(), &mut rated);
        strip_invalid_assignments(query.root(), &relevant, &mut rated);
        // Mandatory text and $near assignments must survive, and a
        // projection may be covered by an otherwise unneeded index.
        if query.projection().is_none() && !is_geo_near && !is_text {
            strip_unneeded_assignments(query.root(), &relevant, &mut rated);
        }
        trace!(tags = %rated, "rated tree");

        if is_geo_near && !has_any_index(query.root(), &rated, MatchExpression::is_geo_near) {
            return Err(PlannerError::bad_value("unable to find index for $geoNear query"));
        }

        if is_text {
            let text_indices = params
                .indices
                .iter()
                .filter(|i| i.index_type == IndexType::Text)
                .count();
            if text_indices != 1 {
                return Err(PlannerError::bad_value("need exactly one text index for $text query"));
            }
            if !has_any_index(query.root(), &rated, MatchExpression::is_text) {
                return Err(PlannerError::bad_value(
                    "failed to use text index to satisfy $text query (if text index is compound, are equality predicates given for all prefix fields?)",
                ));
            }
        }

        let mut out = Vec::new();
        if !relevant.is_empty() {
            for mut tree in PlanEnumerator::new(query.root(), &relevant, &rated, params) {
                if out.len() >= params.max_indexed_solutions {
                    break;
                }
                let cache_tree = match cache_data_from_tagged_tree(&tree.root, &tree.tags, &relevant) {
                    Ok(t) => Some(t),
                    Err(e) => {
                        debug!(error = %e, "solution will not be cached");
                        None
                    }
                };

                prepare_for_access_planning(&mut tree.root, &mut tree.tags);
                let Some(access) =
                    build_indexed_data_access(query, &tree.root, &tree.tags, &relevant, params)
                else {
                    warn!(tree = %tree.root, tags = %tree.tags, "could not build access path");
                    continue;
                };
                let Some(mut soln) = analyze_data_access(query, params, access) else {
                    warn!(tree = %tree.root, "candidate rejected by analysis");
                    continue;
                };
                if let Some(cache_tree) = cache_tree {
                    attach_cache_data(&mut soln, SolutionCacheData::use_index_tags(cache_tree), params);
                }
                trace!(solution = %soln, "indexed solution");
                out.push(soln);
            }
        }
        debug!(count = out.len(), "indexed solutions");

        if out.is_empty() && is_text {
            let root = query.root();
            if root.is_or() && root.children().iter().any(MatchExpression::is_text) {
                return Err(PlannerError::bad_value(
                    "Failed to produce a solution for TEXT under OR - other non-TEXT clauses under OR have to be indexed as well.",
                ));
            }
        }

        // A hinted index is always used, if need be by scanning all of it.
        if let Some(i) = hinted {
            if out.is_empty() {
                debug!(index = %all[i].entry.name, "scanning whole hinted index");
                out.extend(build_whole_ix_soln(all[i], query, params, 1));
            }
            return Ok(out);
        }

        if !query.sort().is_empty() && !is_geo_near && !is_text {
            let using_index_to_sort = out.iter().any(|s| !s.has_blocking_stage);
            if !using_index_to_sort {
                if let Some(soln) = sort_providing_soln(query, params, &all) {
                    out.push(soln);
                }
            }
        }

        if params.options.generate_covered_ixscans
            && out.is_empty()
            && query.root().is_trivially_true()
            && query.projection().is_some_and(|p| !p.requires_document())
        {
            if let Some(soln) = covered_soln(query, params, &all) {
                out.push(soln);
            }
        }

        let possible_to_collscan = !is_geo_near && !is_text;
        let collscan_requested = params.options.include_collscan;
        let collscan_needed = out.is_empty() && can_table_scan;
        if possible_to_collscan && (collscan_requested || collscan_needed) {
            if let Some(mut soln) = build_collscan_soln(query, false, params) {
                attach_cache_data(&mut soln, SolutionCacheData::collscan(), params);
                debug!("adding collection scan");
                out.push(soln);
            }
        }

        debug!(count = out.len(), "planning finished");
        Ok(out)
    }

    /// Rebuild the winning plan of `cached` for `query` without enumerating.
    pub fn plan_from_cache(
        query: &CanonicalQuery,
        params: &QueryPlannerParams,
        cached: &CachedSolution,
    ) -> Result<QuerySolution> {
        let data = cached
            .planner_data
            .first()
            .ok_or_else(|| PlannerError::Internal("cached solution has no planner data".into()))?;
        let all = IndexRef::all(&params.indices);

        match data.soln_type {
            SolutionType::WholeIxscan => {
                let entry = data
                    .tree
                    .as_ref()
                    .and_then(|t| t.entry.as_ref())
                    .ok_or_else(|| PlannerError::Internal("No index tags found for index tree".into()))?;
                let index = all
                    .iter()
                    .find(|i| i.entry.name == entry.name)
                    .copied()
                    .ok_or_else(|| {
                        PlannerError::bad_value(format!("Did not find index with name: {}", entry.name))
                    })?;
                build_whole_ix_soln(index, query, params, data.whole_ix_soln_dir).ok_or_else(|| {
                    PlannerError::bad_value("plan cache error: soln that uses index to provide sort")
                })
            }
            SolutionType::Collscan => build_collscan_soln(query, false, params)
                .ok_or_else(|| PlannerError::bad_value("plan cache error: collection scan soln")),
            SolutionType::UseIndexTags => {
                let tree = data
                    .tree
                    .as_ref()
                    .ok_or_else(|| PlannerError::Internal("No index tags found for index tree".into()))?;
                let index_map: HashMap<String, usize> = params
                    .indices
                    .iter()
                    .enumerate()
                    .map(|(i, e)| (e.name.clone(), i))
                    .collect();

                let mut root = query.root().clone();
                let mut tags = tag_according_to_cache(&root, tree, &index_map)?;
                trace!(tags = %tags, "retagged from cache");
                prepare_for_access_planning(&mut root, &mut tags);

                let access = build_indexed_data_access(query, &root, &tags, &all, params)
                    .ok_or_else(|| {
                        PlannerError::bad_value(format!(
                            "Failed to create data access plan from cache. Query: {}",
                            query.root()
                        ))
                    })?;
                let soln = analyze_data_access(query, params, access).ok_or_else(|| {
                    PlannerError::bad_value(format!(
                        "Failed to analyze plan from cache. Query: {}",
                        query.root()
                    ))
                })?;
                debug!(solution = %soln, "planned from cache");
                Ok(soln)
            }
        }
    }
}

/// Catalog ordinal of the hinted index. `{$hint: name}` matches by name,
/// anything else by key pattern.
fn resolve_hint(hint: &Document, params: &QueryPlannerParams) -> Result<Option<usize>> {
    if hint.is_empty() {
        return Ok(None);
    }

    let mut hinted: Option<usize> = None;
    match hint.get("$hint") {
        Some(Bson::String(name)) => hinted = params.indices.iter().position(|i| i.name == *name),
        Some(_) => {}
        None => {
            for (i, entry) in params.indices.iter().enumerate() {
                if !Comparator::SIMPLE.documents_equal(&entry.key_pattern, hint) {
                    continue;
                }
                if let Some(prev) = hinted {
                    return Err(PlannerError::IndexNotFound(format!(
                        "Hint matched multiple indexes, must hint by index name. Matched: {} and {}",
                        params.indices[prev], entry
                    )));
                }
                hinted = Some(i);
            }
        }
    }

    match hinted {
        Some(i) => {
            debug!(index = %params.indices[i].name, "hint resolved");
            Ok(Some(i))
        }
        None => Err(PlannerError::bad_value("bad hint")),
    }
}

/// Whether the first node matching `pred` kept any index after stripping.
fn has_any_index(root: &MatchExpression, rated: &TagMap, pred: fn(&MatchExpression) -> bool) -> bool {
    root.find(&pred)
        .and_then(|n| rated.relevant(n.id))
        .is_some_and(|rt| !rt.first.is_empty() || !rt.not_first.is_empty())
}

fn plan_min_max(
    query: &CanonicalQuery,
    params: &QueryPlannerParams,
    all: &[IndexRef<'_>],
    hinted: Option<usize>,
) -> Result<Vec<QuerySolution>> {
    let request = query.request();
    let (min, max) = (&request.min, &request.max);

    let chosen = match hinted {
        Some(i) => {
            let entry = all[i].entry;
            if !min.is_empty() && !index_compatible_max_min(min, query.collator(), entry) {
                return Err(PlannerError::bad_value("hint provided does not work with min query"));
            }
            if !max.is_empty() && !index_compatible_max_min(max, query.collator(), entry) {
                return Err(PlannerError::bad_value("hint provided does not work with max query"));
            }
            let range = finished_range(entry, min, max).ok_or_else(|| {
                PlannerError::bad_value("hint provided does not work with min/max query")
            })?;
            Some((all[i], range))
        }
        None => {
            let probe = if min.is_empty() { max } else { min };
            all.iter().find_map(|idx| {
                if !index_compatible_max_min(probe, query.collator(), idx.entry) {
                    return None;
                }
                finished_range(idx.entry, min, max).map(|range| (*idx, range))
            })
        }
    };

    let Some((index, (start, end))) = chosen else {
        return Err(PlannerError::bad_value("unable to find relevant index for max/min query"));
    };
    debug!(index = %index.entry.name, "min/max query");

    let root = make_index_scan(index, query, params, start, end);
    Ok(analyze_data_access(query, params, root).into_iter().collect())
}

/// A whole-index scan whose key order satisfies the requested sort.
fn sort_providing_soln(
    query: &CanonicalQuery,
    params: &QueryPlannerParams,
    all: &[IndexRef<'_>],
) -> Option<QuerySolution> {
    let sort = query.sort();
    for idx in all {
        let entry = idx.entry;
        if entry.index_type != IndexType::BTree || entry.sparse {
            continue;
        }
        // Strings would come back in the index collation's order.
        if !collators_match(entry.collator.as_ref(), query.collator()) {
            continue;
        }
        if let Some(filter) = &entry.filter_expr {
            if !is_subset_of(query.root(), filter) {
                continue;
            }
        }

        let key_sort = sort_from_key_pattern(&entry.key_pattern);
        for direction in [1, -1] {
            let provided = if direction == 1 {
                key_sort.clone()
            } else {
                reverse_sort(&key_sort)
            };
            if !is_sort_prefix(sort, &provided) {
                continue;
            }
            if let Some(mut soln) = build_whole_ix_soln(*idx, query, params, direction) {
                debug!(index = %entry.name, direction, "index provides sort");
                attach_cache_data(
                    &mut soln,
                    SolutionCacheData::whole_ixscan(entry.clone(), direction),
                    params,
                );
                return Some(soln);
            }
        }
    }
    None
}

/// A whole-index scan that answers a filterless projected query from
/// index keys.
fn covered_soln(
    query: &CanonicalQuery,
    params: &QueryPlannerParams,
    all: &[IndexRef<'_>],
) -> Option<QuerySolution> {
    let mut covered_params = params.clone();
    covered_params.options.no_uncovered_projections = true;

    for idx in all {
        let entry = idx.entry;
        if entry.index_type != IndexType::BTree
            || entry.multikey
            || entry.sparse
            || entry.filter_expr.is_some()
            || !collators_match(entry.collator.as_ref(), query.collator())
        {
            continue;
        }
        if let Some(mut soln) = build_whole_ix_soln(*idx, query, &covered_params, 1) {
            debug!(index = %entry.name, "covered whole-index scan");
            attach_cache_data(&mut soln, SolutionCacheData::whole_ixscan(entry.clone(), 1), params);
            return Some(soln);
        }
    }
    None
}
