//! Query planner: turns a canonical query and an index catalog into
//! candidate query solutions, and replays cached plans.

mod access;
mod analysis;
mod bounds;
mod enumerator;
mod error;
mod index;
mod ixselect;
mod min_max;
mod params;
mod plan_cache;
mod planner;
mod solution;
mod tag;

pub use access::{
    build_indexed_data_access, make_collection_scan, make_index_scan, prepare_for_access_planning,
    scan_whole_index,
};
pub use analysis::analyze_data_access;
pub use bounds::{BoundsTightness, IndexBounds, Interval, OrderedIntervalList};
pub use enumerator::{PlanEnumerator, TaggedTree};
pub use error::{ErrorCode, PlannerError, Result};
pub use index::{IndexEntry, IndexRef, IndexType, default_index_name};
pub use ixselect::{
    find_relevant_indices, get_fields, rate_indices, strip_invalid_assignments,
    strip_unneeded_assignments,
};
pub use min_max::{finish_max_obj, finish_min_obj, index_compatible_max_min};
pub use params::{PlannerOptions, QueryPlannerParams};
pub use plan_cache::{
    CachedSolution, OrPushdown, PlanCacheIndexTree, SolutionCacheData, SolutionType,
    cache_data_from_tagged_tree, tag_according_to_cache,
};
pub use planner::{QueryPlanner, build_collscan_soln, build_whole_ix_soln};
pub use solution::{
    AndNode, CollectionScanNode, FetchNode, GeoNearNode, IndexScanNode, KeepMutationsNode,
    LimitNode, MergeSortNode, OrNode, ProjectionNode, QuerySolution, QuerySolutionNode,
    ShardingFilterNode, SkipNode, SortNode, TextNode,
};
pub use tag::{IndexTag, RelevantTag, Tag, TagMap};
