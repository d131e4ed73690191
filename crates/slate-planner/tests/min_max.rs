mod common;
use common::*;

use bson::{Bson, doc};
use slate_planner::IndexBounds;

fn range(soln: &slate_planner::QuerySolution) -> (Vec<Bson>, Vec<Bson>) {
    match &first_scan(soln).bounds {
        IndexBounds::SimpleRange {
            start_key, end_key, ..
        } => (start_key.clone(), end_key.clone()),
        other => panic!("expected simple range, got {other}"),
    }
}

#[test]
fn picks_first_compatible_index() {
    let mut fx = PlannerFixture::new();
    fx.add_index(doc! { "b": 1_i32 }).add_index(doc! { "a": 1_i32 });
    let solns = fx
        .plan(request(|r| r.min = doc! { "a": 2_i32 }))
        .unwrap();
    assert_solutions(&solns, &["FETCH(IXSCAN[a_1])"]);
    assert_eq!(range(&solns[0]), (vec![Bson::Int32(2)], vec![Bson::MaxKey]));
}

#[test]
fn max_only_on_descending_index_starts_at_max_key() {
    let mut fx = PlannerFixture::new();
    fx.add_index(doc! { "a": -1_i32 });
    let solns = fx
        .plan(request(|r| r.max = doc! { "a": 3_i32 }))
        .unwrap();
    assert_eq!(range(&solns[0]), (vec![Bson::MaxKey], vec![Bson::Int32(3)]));
}

#[test]
fn filter_is_applied_after_fetch() {
    let mut fx = PlannerFixture::new();
    fx.add_index(doc! { "a": 1_i32 });
    let solns = fx
        .plan(request(|r| {
            r.filter = doc! { "b": 1_i32 };
            r.min = doc! { "a": 1_i32 };
            r.max = doc! { "a": 5_i32 };
        }))
        .unwrap();
    assert_solutions(&solns, &["FETCH(IXSCAN[a_1])"]);
    assert!(solns[0].root.filter().is_some());
}

#[test]
fn no_compatible_index() {
    let mut fx = PlannerFixture::new();
    fx.add_index(doc! { "a": 1_i32, "b": 1_i32 });
    let err = fx.plan_err(request(|r| r.min = doc! { "a": 1_i32 }));
    assert_eq!(err.message(), "unable to find relevant index for max/min query");
}

#[test]
fn inverted_range_finds_no_index() {
    let mut fx = PlannerFixture::new();
    fx.add_index(doc! { "a": 1_i32 });
    let err = fx.plan_err(request(|r| {
        r.min = doc! { "a": 5_i32 };
        r.max = doc! { "a": 1_i32 };
    }));
    assert_eq!(err.message(), "unable to find relevant index for max/min query");
}

#[test]
fn inverted_range_with_hint() {
    let mut fx = PlannerFixture::new();
    fx.add_index(doc! { "a": 1_i32 });
    let err = fx.plan_err(request(|r| {
        r.min = doc! { "a": 5_i32 };
        r.max = doc! { "a": 1_i32 };
        r.hint = doc! { "a": 1_i32 };
    }));
    assert_eq!(err.message(), "hint provided does not work with min/max query");
}

#[test]
fn descending_index_accepts_descending_range() {
    let mut fx = PlannerFixture::new();
    fx.add_index(doc! { "a": -1_i32 });
    let solns = fx
        .plan(request(|r| {
            r.min = doc! { "a": 5_i32 };
            r.max = doc! { "a": 1_i32 };
        }))
        .unwrap();
    assert_eq!(range(&solns[0]), (vec![Bson::Int32(5)], vec![Bson::Int32(1)]));
}

#[test]
fn hint_incompatible_with_max() {
    let mut fx = PlannerFixture::new();
    fx.add_index(doc! { "a": 1_i32 }).add_index(doc! { "b": 1_i32 });
    let err = fx.plan_err(request(|r| {
        r.max = doc! { "a": 1_i32 };
        r.hint = doc! { "b": 1_i32 };
    }));
    assert_eq!(err.message(), "hint provided does not work with max query");
}

#[test]
fn natural_hint_excludes_min_max() {
    let mut fx = PlannerFixture::new();
    fx.add_index(doc! { "a": 1_i32 });
    let solns = fx
        .plan(request(|r| {
            r.max = doc! { "a": 1_i32 };
            r.hint = doc! { "$natural": 1_i32 };
        }))
        .unwrap();
    assert!(solns.is_empty());
}

#[test]
fn min_max_never_collscans() {
    let mut fx = PlannerFixture::new();
    fx.add_index(doc! { "a": 1_i32 });
    let solns = fx
        .plan(request(|r| r.min = doc! { "a": 1_i32 }))
        .unwrap();
    assert_eq!(solns.len(), 1);
}

#[test]
fn integer_bounds_ignore_index_collation() {
    let mut fx = PlannerFixture::new();
    fx.add_entry(
        slate_planner::IndexEntry::new(doc! { "a": 1_i32, "b": 1_i32 })
            .with_collator(slate_query::Collator::ReverseString),
    );
    let solns = fx
        .plan(request(|r| {
            r.min = doc! { "a": 1_i32, "b": 2_i32 };
            r.max = doc! { "a": 2_i32, "b": 1_i32 };
        }))
        .unwrap();
    assert_solutions(&solns, &["FETCH(IXSCAN[a_1_b_1])"]);
    assert_eq!(
        range(&solns[0]),
        (
            vec![Bson::Int32(1), Bson::Int32(2)],
            vec![Bson::Int32(2), Bson::Int32(1)]
        )
    );

    let err = fx.plan_err(request(|r| {
        r.min = doc! { "a": 1_i32, "b": "x" };
        r.max = doc! { "a": 2_i32, "b": 1_i32 };
    }));
    assert_eq!(err.message(), "unable to find relevant index for max/min query");
}
