#![allow(dead_code)]

use bson::Document;
use slate_planner::{
    CachedSolution, IndexEntry, IndexScanNode, PlannerError, QueryPlanner, QueryPlannerParams,
    QuerySolution,
};
use slate_query::{CanonicalQuery, QueryRequest};

/// Holds an index catalog and planner options across one test.
pub struct PlannerFixture {
    pub params: QueryPlannerParams,
}

impl Default for PlannerFixture {
    fn default() -> Self {
        Self::new()
    }
}

impl PlannerFixture {
    /// Collection scans are always listed so tests can count them.
    pub fn new() -> Self {
        init_tracing();
        let mut params = QueryPlannerParams::default();
        params.options.include_collscan = true;
        Self { params }
    }

    pub fn add_index(&mut self, key_pattern: Document) -> &mut Self {
        self.params.indices.push(IndexEntry::new(key_pattern));
        self
    }

    pub fn add_entry(&mut self, entry: IndexEntry) -> &mut Self {
        self.params.indices.push(entry);
        self
    }

    pub fn plan(&self, request: QueryRequest) -> Result<Vec<QuerySolution>, PlannerError> {
        let query = canonical(request);
        QueryPlanner::plan(&query, &self.params)
    }

    pub fn plan_filter(&self, filter: Document) -> Vec<QuerySolution> {
        self.plan(QueryRequest::with_filter(filter)).unwrap()
    }

    pub fn plan_err(&self, request: QueryRequest) -> PlannerError {
        match self.plan(request) {
            Ok(solns) => panic!("expected planning to fail, got {:?}", shapes(&solns)),
            Err(e) => e,
        }
    }

    pub fn replay(&self, request: QueryRequest, soln: &QuerySolution) -> Result<QuerySolution, PlannerError> {
        let query = canonical(request);
        let cached = CachedSolution {
            planner_data: vec![soln.cache_data.clone().expect("solution has cache data")],
        };
        QueryPlanner::plan_from_cache(&query, &self.params, &cached)
    }
}

/// Planner logs show up with `RUST_LOG=slate_planner=trace` and `--nocapture`.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn canonical(request: QueryRequest) -> CanonicalQuery {
    CanonicalQuery::canonicalize(request).unwrap()
}

pub fn request(f: impl FnOnce(&mut QueryRequest)) -> QueryRequest {
    let mut request = QueryRequest::default();
    f(&mut request);
    request
}

pub fn shapes(solns: &[QuerySolution]) -> Vec<String> {
    solns.iter().map(ToString::to_string).collect()
}

/// Assert exactly the given solution shapes, in any order.
pub fn assert_solutions(solns: &[QuerySolution], expected: &[&str]) {
    let mut got = shapes(solns);
    let mut want: Vec<String> = expected.iter().map(|s| s.to_string()).collect();
    got.sort();
    want.sort();
    assert_eq!(got, want);
}

pub fn find_solution<'a>(solns: &'a [QuerySolution], shape: &str) -> &'a QuerySolution {
    solns
        .iter()
        .find(|s| s.to_string() == shape)
        .unwrap_or_else(|| panic!("no solution {shape} in {:?}", shapes(solns)))
}

pub fn first_scan(soln: &QuerySolution) -> &IndexScanNode {
    soln.root
        .first_index_scan()
        .unwrap_or_else(|| panic!("no index scan in {soln}"))
}
