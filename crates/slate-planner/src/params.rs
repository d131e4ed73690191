use std::fmt;

use bson::Document;
use serde::{Deserialize, Serialize};

use crate::index::IndexEntry;

/// Planner behavior switches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerOptions {
    /// Never fall back to a collection scan.
    pub no_table_scan: bool,
    /// Always add a collection scan candidate.
    pub include_collscan: bool,
    /// Add a shard-filter stage over fetched documents.
    pub include_shard_filter: bool,
    /// Reject plans that need an in-memory sort.
    pub no_blocking_sort: bool,
    /// Allow plans that AND two index scans.
    pub index_intersection: bool,
    pub keep_mutations: bool,
    /// The query only counts; skip fetches that filter nothing.
    pub is_count: bool,
    /// Answer sort+limit with an OR of a limited and an unlimited sort.
    pub split_limited_sort: bool,
    pub cannot_trim_ixisect: bool,
    /// Reject plans whose projection needs a fetch.
    pub no_uncovered_projections: bool,
    /// Look for an index covering a filterless projected query.
    pub generate_covered_ixscans: bool,
    pub track_latest_oplog_ts: bool,
    pub oplog_scan_wait_for_visible: bool,
}

impl fmt::Display for PlannerOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let flags = [
            (self.no_table_scan, "NO_TABLE_SCAN"),
            (self.include_collscan, "INCLUDE_COLLSCAN"),
            (self.include_shard_filter, "INCLUDE_SHARD_FILTER"),
            (self.no_blocking_sort, "NO_BLOCKING_SORT"),
            (self.index_intersection, "INDEX_INTERSECTION"),
            (self.keep_mutations, "KEEP_MUTATIONS"),
            (self.is_count, "IS_COUNT"),
            (self.split_limited_sort, "SPLIT_LIMITED_SORT"),
            (self.cannot_trim_ixisect, "CANNOT_TRIM_IXISECT"),
            (self.no_uncovered_projections, "NO_UNCOVERED_PROJECTIONS"),
            (self.generate_covered_ixscans, "GENERATE_COVERED_IXSCANS"),
            (self.track_latest_oplog_ts, "TRACK_LATEST_OPLOG_TS"),
            (self.oplog_scan_wait_for_visible, "OPLOG_SCAN_WAIT_FOR_VISIBLE"),
        ];
        let set: Vec<&str> = flags.iter().filter(|(on, _)| *on).map(|(_, n)| *n).collect();
        if set.is_empty() {
            write!(f, "DEFAULT")
        } else {
            write!(f, "{}", set.join(" "))
        }
    }
}

/// Everything one `plan()` call needs besides the query.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryPlannerParams {
    pub options: PlannerOptions,
    #[serde(skip)]
    pub indices: Vec<IndexEntry>,
    /// Upper bound on enumerated indexed solutions.
    pub max_indexed_solutions: usize,
    /// Index filters already pinned the index set; ignore `$hint`.
    pub index_filters_applied: bool,
    /// Shard key used when `include_shard_filter` is set.
    pub shard_key: Document,
}

impl Default for QueryPlannerParams {
    fn default() -> Self {
        Self {
            options: PlannerOptions::default(),
            indices: Vec::new(),
            max_indexed_solutions: 64,
            index_filters_applied: false,
            shard_key: Document::new(),
        }
    }
}

impl QueryPlannerParams {
    pub fn with_indices(indices: Vec<IndexEntry>) -> Self {
        Self {
            indices,
            ..Default::default()
        }
    }
}
