use bson::{Document, doc};
use criterion::{Criterion, black_box, criterion_group, criterion_main};
use slate_planner::{CachedSolution, IndexEntry, QueryPlanner, QueryPlannerParams};
use slate_query::{CanonicalQuery, QueryRequest};

// ── Setup ──────────────────────────────────────────────────────

/// Catalog indexed on "status", "age" and {status, age}.
fn params() -> QueryPlannerParams {
    let mut params = QueryPlannerParams::with_indices(vec![
        IndexEntry::new(doc! { "status": 1_i32 }),
        IndexEntry::new(doc! { "age": 1_i32 }),
        IndexEntry::new(doc! { "status": 1_i32, "age": 1_i32 }),
    ]);
    params.options.include_collscan = true;
    params
}

fn query(filter: Document) -> CanonicalQuery {
    CanonicalQuery::canonicalize(QueryRequest::with_filter(filter)).unwrap()
}

// ── Benchmarks ─────────────────────────────────────────────────

fn bench_plan_collscan(c: &mut Criterion) {
    let params = params();
    let q = query(doc! { "name": "alice" });
    c.bench_function("plan/collscan", |b| {
        b.iter(|| QueryPlanner::plan(black_box(&q), &params).unwrap());
    });
}

fn bench_plan_compound(c: &mut Criterion) {
    let params = params();
    let q = query(doc! { "status": "active", "age": { "$gte": 18_i32 } });
    c.bench_function("plan/compound", |b| {
        b.iter(|| QueryPlanner::plan(black_box(&q), &params).unwrap());
    });
}

fn bench_plan_intersection(c: &mut Criterion) {
    let mut params = params();
    params.options.index_intersection = true;
    let q = query(doc! { "status": "active", "age": { "$gte": 18_i32 } });
    c.bench_function("plan/intersection", |b| {
        b.iter(|| QueryPlanner::plan(black_box(&q), &params).unwrap());
    });
}

fn bench_plan_or(c: &mut Criterion) {
    let params = params();
    let q = query(doc! {
        "age": { "$gte": 18_i32 },
        "$or": [{ "status": "active" }, { "status": "pending" }],
    });
    c.bench_function("plan/or", |b| {
        b.iter(|| QueryPlanner::plan(black_box(&q), &params).unwrap());
    });
}

fn bench_plan_from_cache(c: &mut Criterion) {
    let params = params();
    let q = query(doc! { "status": "active", "age": { "$gte": 18_i32 } });
    let winner = QueryPlanner::plan(&q, &params)
        .unwrap()
        .into_iter()
        .find_map(|s| s.cache_data)
        .unwrap();
    let cached = CachedSolution {
        planner_data: vec![winner],
    };
    c.bench_function("plan/from_cache", |b| {
        b.iter(|| QueryPlanner::plan_from_cache(black_box(&q), &params, &cached).unwrap());
    });
}

criterion_group!(
    benches,
    bench_plan_collscan,
    bench_plan_compound,
    bench_plan_intersection,
    bench_plan_or,
    bench_plan_from_cache,
);
criterion_main!(benches);
