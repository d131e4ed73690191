//! Query model consumed by the planner: predicate trees, sort and
//! projection specs, collation and the canonical query.

mod algo;
mod collation;
mod compare;
mod expression;
mod parse_filter;
mod projection;
mod query;
mod sort;

pub use algo::is_subset_of;
pub use collation::{Collator, apply_collation, collators_match, is_collatable};
pub use compare::{
    Comparator, as_f64, canonical_type, compare_docs, compare_keys, compare_values, is_descending,
    strip_field_names_and_apply_collation,
};
pub use expression::{
    CmpOp, Crs, GeoPredicate, GeoShape, MatchExpression, MatchKind, NodeId, RegexPredicate,
    TEXT_PATH,
};
pub use parse_filter::{FilterParseError, parse_filter};
pub use projection::Projection;
pub use query::{CanonicalQuery, QueryRequest};
pub use sort::{
    NATURAL, Sort, SortDirection, is_sort_prefix, natural_direction, parse_sort, reverse_sort,
    sort_from_key_pattern,
};
