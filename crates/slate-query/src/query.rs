use bson::{Bson, Document, doc};
use serde::{Deserialize, Serialize};

use crate::collation::Collator;
use crate::compare::as_f64;
use crate::expression::{MatchExpression, MatchKind};
use crate::parse_filter::{FilterParseError, parse_filter};
use crate::projection::Projection;
use crate::sort::{Sort, parse_sort};

/// The raw find request as the client sent it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryRequest {
    pub filter: Document,
    pub sort: Document,
    pub projection: Document,
    pub hint: Document,
    pub min: Document,
    pub max: Document,
    pub skip: Option<u64>,
    pub limit: Option<u64>,
    pub tailable: bool,
    pub collation: Document,
}

impl QueryRequest {
    pub fn with_filter(filter: Document) -> Self {
        Self {
            filter,
            ..Default::default()
        }
    }

    /// Read a request from a `find` command document.
    ///
    /// A string `hint` is normalized to `{$hint: <name>}`.
    pub fn from_find_command(cmd: &Document) -> Result<Self, FilterParseError> {
        let mut req = QueryRequest::default();
        for (key, value) in cmd {
            match key.as_str() {
                "find" | "$db" | "comment" | "batchSize" | "singleBatch" => {}
                "filter" => req.filter = document(key, value)?,
                "sort" => req.sort = document(key, value)?,
                "projection" => req.projection = document(key, value)?,
                "min" => req.min = document(key, value)?,
                "max" => req.max = document(key, value)?,
                "collation" => req.collation = document(key, value)?,
                "hint" => {
                    req.hint = match value {
                        Bson::String(name) => doc! { "$hint": name.clone() },
                        Bson::Document(d) => d.clone(),
                        _ => return Err(FilterParseError("hint must be a string or object".into())),
                    }
                }
                "skip" => req.skip = Some(non_negative(key, value)?),
                "limit" => req.limit = Some(non_negative(key, value)?),
                "tailable" => req.tailable = matches!(value, Bson::Boolean(true)),
                other => {
                    return Err(FilterParseError(format!("unrecognized find option: {other}")));
                }
            }
        }
        Ok(req)
    }
}

fn document(key: &str, value: &Bson) -> Result<Document, FilterParseError> {
    match value {
        Bson::Document(d) => Ok(d.clone()),
        _ => Err(FilterParseError(format!("'{key}' must be an object"))),
    }
}

fn non_negative(key: &str, value: &Bson) -> Result<u64, FilterParseError> {
    match as_f64(value) {
        Some(n) if n >= 0.0 && n.fract() == 0.0 => Ok(n as u64),
        _ => Err(FilterParseError(format!("'{key}' must be a non-negative integer"))),
    }
}

/// A parsed, normalized query ready for planning.
///
/// The predicate tree is normalized and its nodes carry pre-order ids.
/// Planning never mutates a `CanonicalQuery`; all per-plan annotations live
/// in side tables keyed by those ids.
#[derive(Debug, Clone)]
pub struct CanonicalQuery {
    request: QueryRequest,
    root: MatchExpression,
    sort: Vec<Sort>,
    projection: Option<Projection>,
    collator: Option<Collator>,
}

impl CanonicalQuery {
    pub fn canonicalize(request: QueryRequest) -> Result<Self, FilterParseError> {
        let mut root = parse_filter(&request.filter)?.normalize();
        root.assign_ids();
        validate(&root)?;

        let sort = parse_sort(&request.sort)?;
        let projection = if request.projection.is_empty() {
            None
        } else {
            Some(Projection::parse(&request.projection)?)
        };
        let collator = Collator::from_document(&request.collation)?;

        if !request.min.is_empty() && !request.max.is_empty() {
            let min_fields: Vec<_> = request.min.keys().collect();
            let max_fields: Vec<_> = request.max.keys().collect();
            if min_fields != max_fields {
                return Err(FilterParseError(
                    "min and max must have the same field names in the same order".into(),
                ));
            }
        }

        Ok(Self {
            request,
            root,
            sort,
            projection,
            collator,
        })
    }

    /// Shorthand for a query with only a filter.
    pub fn from_filter(filter: Document) -> Result<Self, FilterParseError> {
        Self::canonicalize(QueryRequest::with_filter(filter))
    }

    pub fn request(&self) -> &QueryRequest {
        &self.request
    }

    pub fn root(&self) -> &MatchExpression {
        &self.root
    }

    pub fn sort(&self) -> &[Sort] {
        &self.sort
    }

    pub fn projection(&self) -> Option<&Projection> {
        self.projection.as_ref()
    }

    pub fn collator(&self) -> Option<&Collator> {
        self.collator.as_ref()
    }

    pub fn is_text(&self) -> bool {
        self.root.find(&MatchExpression::is_text).is_some()
    }

    pub fn is_geo_near(&self) -> bool {
        self.root.find(&MatchExpression::is_geo_near).is_some()
    }
}

fn validate(root: &MatchExpression) -> Result<(), FilterParseError> {
    if root.count(&MatchExpression::is_text) > 1 {
        return Err(FilterParseError("too many text expressions".into()));
    }
    if root.count(&MatchExpression::is_geo_near) > 1 {
        return Err(FilterParseError("too many geoNear expressions".into()));
    }
    check_placement(root, false, false)
}

/// `$text` may not sit under `$nor`/`$not`; `$near` only at the top level
/// or inside the top-level `$and`.
fn check_placement(node: &MatchExpression, negated: bool, nested: bool) -> Result<(), FilterParseError> {
    match &node.kind {
        MatchKind::Text { .. } if negated => Err(FilterParseError(
            "text expression not allowed in nor or not".into(),
        )),
        MatchKind::GeoNear { .. } if negated || nested => Err(FilterParseError(
            "geoNear must be top-level expr".into(),
        )),
        MatchKind::And(children) => children
            .iter()
            .try_for_each(|c| check_placement(c, negated, nested)),
        MatchKind::Or(children) => children
            .iter()
            .try_for_each(|c| check_placement(c, negated, true)),
        MatchKind::Nor(children) => children
            .iter()
            .try_for_each(|c| check_placement(c, true, true)),
        MatchKind::Not(child) => check_placement(child, true, true),
        _ => Ok(()),
    }
}
