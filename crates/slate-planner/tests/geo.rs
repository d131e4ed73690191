mod common;
use common::*;

use bson::doc;
use slate_planner::QuerySolutionNode;

#[test]
fn box_within_uses_2d_index_and_collscan() {
    let mut fx = PlannerFixture::new();
    fx.add_index(doc! { "a": "2d" });
    let solns = fx.plan_filter(doc! {
        "a": { "$within": { "$box": [[0_i32, 0_i32], [100_i32, 100_i32]] } }
    });
    assert_eq!(solns.len(), 2);
    assert_solutions(&solns, &["COLLSCAN", "FETCH(IXSCAN[a_2d])"]);

    // The geo predicate is re-checked on fetched documents.
    let fetch = find_solution(&solns, "FETCH(IXSCAN[a_2d])");
    assert!(fetch.root.filter().is_some());
}

#[test]
fn near_requires_geo_index() {
    let mut fx = PlannerFixture::new();
    fx.add_index(doc! { "a": 1_i32 });
    let err = fx.plan_err(request(|r| r.filter = doc! { "a": { "$near": [0_i32, 0_i32] } }));
    assert_eq!(err.message(), "unable to find index for $geoNear query");
}

#[test]
fn flat_near_on_2d_index() {
    let mut fx = PlannerFixture::new();
    fx.add_index(doc! { "a": "2d" });
    let solns = fx.plan_filter(doc! { "a": { "$near": [0_i32, 0_i32] } });
    assert_solutions(&solns, &["GEO_NEAR_2D[a_2d]"]);
    assert!(!solns[0].has_blocking_stage);
}

#[test]
fn geojson_near_on_2dsphere_index() {
    let mut fx = PlannerFixture::new();
    fx.add_index(doc! { "a": "2dsphere" });
    let solns = fx.plan_filter(doc! {
        "a": { "$near": { "$geometry": { "type": "Point", "coordinates": [0_i32, 0_i32] } } }
    });
    assert_solutions(&solns, &["GEO_NEAR_2DSPHERE[a_2dsphere]"]);
}

#[test]
fn geojson_near_cannot_use_2d_index_without_max_distance() {
    let mut fx = PlannerFixture::new();
    fx.add_index(doc! { "a": "2d" });
    let err = fx.plan_err(request(|r| {
        r.filter = doc! {
            "a": { "$near": { "$geometry": { "type": "Point", "coordinates": [0_i32, 0_i32] } } }
        }
    }));
    assert_eq!(err.message(), "unable to find index for $geoNear query");
}

#[test]
fn near_keeps_other_predicates_as_filter() {
    let mut fx = PlannerFixture::new();
    fx.add_index(doc! { "a": "2d" });
    let solns = fx.plan_filter(doc! { "a": { "$near": [0_i32, 0_i32] }, "b": 1_i32 });
    assert_solutions(&solns, &["GEO_NEAR_2D[a_2d]"]);
    match &solns[0].root {
        QuerySolutionNode::GeoNear2D(n) => {
            let filter = n.filter.as_ref().expect("residual filter");
            assert_eq!(filter.path(), Some("b"));
        }
        other => panic!("expected geo near, got {other}"),
    }
}

#[test]
fn near_never_falls_back_to_collscan() {
    let mut fx = PlannerFixture::new();
    fx.add_index(doc! { "a": "2d" });
    let solns = fx
        .plan(request(|r| {
            r.filter = doc! { "a": { "$near": [0_i32, 0_i32] } };
            r.sort = doc! { "b": 1_i32 };
        }))
        .unwrap();
    assert_solutions(&solns, &["SORT(GEO_NEAR_2D[a_2d])"]);
}
