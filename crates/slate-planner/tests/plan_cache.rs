mod common;
use common::*;

use bson::doc;
use slate_planner::{
    CachedSolution, ErrorCode, IndexEntry, QueryPlanner, SolutionCacheData, SolutionType,
};
use slate_query::QueryRequest;

/// Every cacheable solution rebuilds into the same plan from its cache data.
fn assert_replays(fx: &PlannerFixture, request: QueryRequest) {
    let solns = fx.plan(request.clone()).unwrap();
    assert!(!solns.is_empty());
    for soln in solns.iter().filter(|s| s.cache_data.is_some()) {
        let replayed = fx.replay(request.clone(), soln).unwrap();
        assert_eq!(replayed.root.to_tree_string(), soln.root.to_tree_string());
    }
}

#[test]
fn single_index_replays() {
    let mut fx = PlannerFixture::new();
    fx.add_index(doc! { "a": 1_i32 });
    assert_replays(&fx, QueryRequest::with_filter(doc! { "a": 1_i32, "b": 2_i32 }));
}

#[test]
fn compound_and_competing_indexes_replay() {
    let mut fx = PlannerFixture::new();
    fx.params.options.index_intersection = true;
    fx.add_index(doc! { "a": 1_i32 })
        .add_index(doc! { "b": 1_i32 })
        .add_index(doc! { "a": 1_i32, "b": 1_i32 });
    assert_replays(
        &fx,
        QueryRequest::with_filter(doc! { "a": 1_i32, "b": { "$gt": 2_i32 } }),
    );
}

#[test]
fn or_replays() {
    let mut fx = PlannerFixture::new();
    fx.add_index(doc! { "a": 1_i32 }).add_index(doc! { "b": 1_i32 });
    assert_replays(
        &fx,
        QueryRequest::with_filter(doc! { "$or": [{ "a": 1_i32 }, { "b": 2_i32 }] }),
    );
}

#[test]
fn or_pushdown_replays() {
    let mut fx = PlannerFixture::new();
    fx.add_index(doc! { "a": 1_i32, "b": 1_i32 })
        .add_index(doc! { "a": 1_i32, "c": 1_i32 });
    assert_replays(
        &fx,
        QueryRequest::with_filter(doc! { "a": 1_i32, "$or": [{ "b": 1_i32 }, { "c": 1_i32 }] }),
    );
}

#[test]
fn sort_providing_scan_replays() {
    let mut fx = PlannerFixture::new();
    fx.add_index(doc! { "a": 1_i32 });
    let request = request(|r| r.sort = doc! { "a": -1_i32 });
    let solns = fx.plan(request.clone()).unwrap();
    let soln = find_solution(&solns, "FETCH(IXSCAN[a_1][dir=-1])");
    let replayed = fx.replay(request.clone(), soln).unwrap();
    assert_eq!(replayed.to_string(), "FETCH(IXSCAN[a_1][dir=-1])");
    assert_replays(&fx, request);
}

#[test]
fn collscan_replays() {
    let fx = PlannerFixture::new();
    let query = canonical(QueryRequest::with_filter(doc! { "a": 1_i32 }));
    let cached = CachedSolution {
        planner_data: vec![SolutionCacheData::collscan()],
    };
    let soln = QueryPlanner::plan_from_cache(&query, &fx.params, &cached).unwrap();
    assert_eq!(soln.to_string(), "COLLSCAN");
}

#[test]
fn replay_follows_index_to_new_ordinal() {
    let mut fx = PlannerFixture::new();
    fx.add_index(doc! { "a": 1_i32 });
    let request = QueryRequest::with_filter(doc! { "a": 1_i32 });
    let solns = fx.plan(request.clone()).unwrap();
    let soln = find_solution(&solns, "FETCH(IXSCAN[a_1])");

    let mut moved = PlannerFixture::new();
    moved.add_index(doc! { "z": 1_i32 }).add_index(doc! { "a": 1_i32 });
    let replayed = moved.replay(request, soln).unwrap();
    assert_eq!(replayed.to_string(), "FETCH(IXSCAN[a_1])");
    assert_eq!(first_scan(&replayed).ordinal, 1);
}

#[test]
fn replay_with_dropped_index_fails() {
    let mut fx = PlannerFixture::new();
    fx.add_index(doc! { "a": 1_i32 });
    let request = QueryRequest::with_filter(doc! { "a": 1_i32 });
    let solns = fx.plan(request.clone()).unwrap();
    let soln = find_solution(&solns, "FETCH(IXSCAN[a_1])");

    let empty = PlannerFixture::new();
    let err = empty.replay(request, soln).unwrap_err();
    assert_eq!(err.code(), ErrorCode::BadValue);
    assert_eq!(err.message(), "Did not find index with name: a_1");
}

#[test]
fn replay_against_different_shape_fails() {
    let mut fx = PlannerFixture::new();
    fx.add_index(doc! { "a": 1_i32 });
    let solns = fx
        .plan(QueryRequest::with_filter(doc! { "a": 1_i32, "b": 1_i32 }))
        .unwrap();
    let soln = find_solution(&solns, "FETCH(IXSCAN[a_1])");
    let err = fx
        .replay(QueryRequest::with_filter(doc! { "a": 1_i32 }), soln)
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::Internal);
}

#[test]
fn cache_data_marks_index_filters() {
    let mut fx = PlannerFixture::new();
    fx.params.index_filters_applied = true;
    fx.add_index(doc! { "a": 1_i32 });
    let solns = fx.plan_filter(doc! { "a": 1_i32 });
    for soln in &solns {
        assert!(soln.cache_data.as_ref().unwrap().index_filter_applied);
    }
}

#[test]
fn geo_2d_plans_are_not_cached() {
    let mut fx = PlannerFixture::new();
    fx.add_entry(IndexEntry::new(doc! { "a": "2d" }));
    let solns = fx.plan_filter(doc! {
        "a": { "$within": { "$box": [[0_i32, 0_i32], [1_i32, 1_i32]] } }
    });
    let indexed = find_solution(&solns, "FETCH(IXSCAN[a_2d])");
    assert!(indexed.cache_data.is_none());
    let collscan = find_solution(&solns, "COLLSCAN");
    assert_eq!(
        collscan.cache_data.as_ref().map(|d| d.soln_type),
        Some(SolutionType::Collscan)
    );
}
