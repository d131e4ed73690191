//! Wrapping a raw access path with the stages the query still needs:
//! fetch, sort, projection, skip and limit.

use slate_query::{CanonicalQuery, Projection, Sort, natural_direction, reverse_sort};
use tracing::trace;

use crate::params::QueryPlannerParams;
use crate::solution::{
    KeepMutationsNode, LimitNode, OrNode, ProjectionNode, QuerySolution, QuerySolutionNode,
    ShardingFilterNode, SkipNode, SortNode,
};

/// Whether `root` can answer `projection` from index keys alone.
fn covers(root: &QuerySolutionNode, projection: &Projection) -> bool {
    projection.is_inclusion()
        && !projection.requires_document()
        && projection.required_fields().iter().all(|f| root.has_field(f))
}

/// Finish `root` into a complete solution. Returns `None` when the options
/// rule out the plan this access path would need.
pub fn analyze_data_access(
    query: &CanonicalQuery,
    params: &QueryPlannerParams,
    root: QuerySolutionNode,
) -> Option<QuerySolution> {
    let options = &params.options;
    let mut root = root;

    if options.include_shard_filter {
        if !root.fetched() {
            root = QuerySolutionNode::fetch(root, None);
        }
        root = QuerySolutionNode::ShardingFilter(ShardingFilterNode {
            shard_key: params.shard_key.clone(),
            child: Box::new(root),
        });
    }

    let projection = query.projection();
    let covered = !root.fetched()
        && match projection {
            Some(p) => covers(&root, p),
            None => options.is_count,
        };
    if projection.is_some() && !covered && options.no_uncovered_projections {
        trace!("projection not covered");
        return None;
    }
    if !covered && !root.fetched() {
        root = QuerySolutionNode::fetch(root, None);
    }

    let request = query.request();
    let skip = request.skip.unwrap_or(0);
    let (mut root, blocking) = analyze_sort(query, params, root, skip)?;

    if let Some(p) = projection {
        root = QuerySolutionNode::Projection(ProjectionNode {
            projection: p.clone(),
            covered,
            child: Box::new(root),
        });
    }

    if skip > 0 {
        root = QuerySolutionNode::Skip(SkipNode {
            skip,
            child: Box::new(root),
        });
    }
    // A blocking sort already stops after skip + limit results.
    if let Some(limit) = request.limit {
        if !blocking && limit > 0 {
            root = QuerySolutionNode::Limit(LimitNode {
                limit,
                child: Box::new(root),
            });
        }
    }

    let mut solution = QuerySolution::new(root);
    solution.has_blocking_stage = blocking;
    solution.index_filter_applied = params.index_filters_applied;
    trace!(solution = %solution, blocking, "analyzed");
    Some(solution)
}

/// Add a blocking sort unless `root` already produces the requested
/// order, possibly by scanning backwards. Returns the new root and whether
/// it sorts in memory.
fn analyze_sort(
    query: &CanonicalQuery,
    params: &QueryPlannerParams,
    mut root: QuerySolutionNode,
    skip: u64,
) -> Option<(QuerySolutionNode, bool)> {
    let sort = query.sort();
    if sort.is_empty() || natural_direction(sort).is_some() {
        return Some((root, false));
    }

    let provided = root.provided_sorts();
    if provided.iter().any(|s| s.as_slice() == sort) {
        return Some((root, false));
    }
    let reversed = reverse_sort(sort);
    if provided.contains(&reversed) {
        root.reverse_scans();
        return Some((root, false));
    }

    let options = &params.options;
    if options.no_blocking_sort {
        trace!("plan needs a blocking sort");
        return None;
    }

    if !root.fetched() && !sort.iter().all(|s| root.has_field(&s.field)) {
        root = QuerySolutionNode::fetch(root, None);
    }

    let limit = query.request().limit.filter(|l| *l > 0).map_or(0, |l| l + skip);
    let mut sorted = if options.split_limited_sort && limit > 0 {
        QuerySolutionNode::Or(OrNode {
            children: vec![sort_node(sort, limit, root.clone()), sort_node(sort, 0, root)],
            filter: None,
            dedup: true,
        })
    } else {
        sort_node(sort, limit, root)
    };

    if options.keep_mutations {
        sorted = QuerySolutionNode::KeepMutations(KeepMutationsNode {
            filter: (!query.root().is_trivially_true()).then(|| query.root().clone()),
            child: Box::new(sorted),
        });
    }
    Some((sorted, true))
}

fn sort_node(pattern: &[Sort], limit: u64, child: QuerySolutionNode) -> QuerySolutionNode {
    QuerySolutionNode::Sort(SortNode {
        pattern: pattern.to_vec(),
        limit,
        child: Box::new(child),
    })
}
