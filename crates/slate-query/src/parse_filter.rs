use bson::{Bson, Document};
use regex::RegexBuilder;

use crate::compare::as_f64;
use crate::expression::{
    CmpOp, Crs, GeoPredicate, GeoShape, MatchExpression, MatchKind, RegexPredicate,
};

/// Parse error for filter, sort, projection and find-command documents.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterParseError(pub String);

impl std::fmt::Display for FilterParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "filter parse error: {}", self.0)
    }
}

impl std::error::Error for FilterParseError {}

/// Parse a BSON filter document into a `MatchExpression` tree.
///
/// Follows MongoDB query semantics:
/// - The top-level document is an implicit AND of all entries
/// - `{ "field": value }` is implicit `$eq`
/// - `{ "field": { "$gt": v } }` uses operator sub-documents
/// - `{ "$or": [...] }` / `{ "$and": [...] }` / `{ "$nor": [...] }` for logical ops
/// - `$ne` and `$nin` become `$not` over `$eq` / `$in`
/// - geo operators, `$near`, and `$text` produce dedicated leaves
///
/// An empty document parses to the empty AND, which matches everything.
/// The result is not normalized and carries no node ids.
pub fn parse_filter(doc: &Document) -> Result<MatchExpression, FilterParseError> {
    let mut children = Vec::new();

    for (key, value) in doc {
        match key.as_str() {
            "$and" => children.push(MatchExpression::and(parse_logical_array(value)?)),
            "$or" => children.push(MatchExpression::or(parse_logical_array(value)?)),
            "$nor" => children.push(MatchExpression::new(MatchKind::Nor(parse_logical_array(
                value,
            )?))),
            "$text" => children.push(parse_text(value)?),
            "$comment" => {}
            k if k.starts_with('$') => {
                return Err(FilterParseError(format!("unknown top-level operator: {k}")));
            }
            _ => children.push(parse_field_condition(key, value)?),
        }
    }

    match children.len() {
        1 => Ok(children.remove(0)),
        _ => Ok(MatchExpression::and(children)),
    }
}

/// Parse a `$and`, `$or` or `$nor` array value into its child expressions.
fn parse_logical_array(value: &Bson) -> Result<Vec<MatchExpression>, FilterParseError> {
    let arr = match value {
        Bson::Array(a) => a,
        _ => return Err(FilterParseError("$and/$or/$nor value must be an array".into())),
    };

    let mut children = Vec::with_capacity(arr.len());
    for elem in arr {
        match elem {
            Bson::Document(sub_doc) => children.push(parse_filter(sub_doc)?),
            _ => {
                return Err(FilterParseError(
                    "$and/$or/$nor array elements must be documents".into(),
                ));
            }
        }
    }

    if children.is_empty() {
        return Err(FilterParseError("$and/$or/$nor array must not be empty".into()));
    }

    Ok(children)
}

/// Parse a field condition: either implicit $eq or an operator sub-document.
fn parse_field_condition(field: &str, value: &Bson) -> Result<MatchExpression, FilterParseError> {
    // A document whose first key starts with $ is an operator doc.
    if let Bson::Document(sub_doc) = value {
        if sub_doc.keys().next().is_some_and(|k| k.starts_with('$')) {
            return parse_operator_doc(field, sub_doc);
        }
    }

    if let Bson::RegularExpression(_) = value {
        return Err(FilterParseError(format!(
            "regular expression literals are not supported on '{field}', use $regex"
        )));
    }

    Ok(MatchExpression::compare(CmpOp::Eq, field, value.clone()))
}

/// Parse an operator sub-document like `{ "$gt": 21, "$lte": 100 }`.
fn parse_operator_doc(field: &str, doc: &Document) -> Result<MatchExpression, FilterParseError> {
    let mut conditions: Vec<MatchExpression> = Vec::new();

    // $regex/$options and $near/$maxDistance are siblings that belong together.
    let options = match doc.get("$options") {
        Some(Bson::String(s)) => Some(s.as_str()),
        Some(_) => return Err(FilterParseError("$options must be a string".into())),
        None => None,
    };
    let max_distance = match doc.get("$maxDistance") {
        Some(v) => Some(
            as_f64(v).ok_or_else(|| FilterParseError("$maxDistance must be a number".into()))?,
        ),
        None => None,
    };

    for (op, value) in doc {
        let cmp = |op: CmpOp| MatchExpression::compare(op, field, value.clone());
        let expr = match op.as_str() {
            "$eq" => cmp(CmpOp::Eq),
            "$lt" => cmp(CmpOp::Lt),
            "$lte" => cmp(CmpOp::Lte),
            "$gt" => cmp(CmpOp::Gt),
            "$gte" => cmp(CmpOp::Gte),
            "$ne" => not(cmp(CmpOp::Eq)),
            "$in" => parse_in(field, value)?,
            "$nin" => not(parse_in(field, value)?),
            "$exists" => MatchExpression::new(MatchKind::Exists {
                path: field.to_string(),
                exists: truthy(value),
            }),
            "$regex" => parse_regex(field, value, options.unwrap_or(""))?,
            "$options" | "$maxDistance" => continue,
            "$not" => match value {
                Bson::Document(inner) => not(parse_operator_doc(field, inner)?),
                _ => return Err(FilterParseError("$not needs a document".into())),
            },
            "$within" | "$geoWithin" => parse_geo(field, GeoPredicate::Within, value)?,
            "$geoIntersects" => parse_geo(field, GeoPredicate::Intersects, value)?,
            "$near" | "$geoNear" => parse_near(field, value, false, max_distance)?,
            "$nearSphere" => parse_near(field, value, true, max_distance)?,
            other => {
                return Err(FilterParseError(format!("unknown operator: {other}")));
            }
        };
        conditions.push(expr);
    }

    match conditions.len() {
        0 => Err(FilterParseError(format!("empty operator document for {field}"))),
        1 => Ok(conditions.remove(0)),
        _ => Ok(MatchExpression::and(conditions)),
    }
}

fn not(expr: MatchExpression) -> MatchExpression {
    MatchExpression::new(MatchKind::Not(Box::new(expr)))
}

fn truthy(value: &Bson) -> bool {
    match value {
        Bson::Boolean(b) => *b,
        Bson::Null | Bson::Undefined => false,
        v => as_f64(v).is_none_or(|d| d != 0.0),
    }
}

fn parse_in(field: &str, value: &Bson) -> Result<MatchExpression, FilterParseError> {
    let Bson::Array(values) = value else {
        return Err(FilterParseError("$in/$nin needs an array".into()));
    };
    if values.iter().any(|v| matches!(v, Bson::RegularExpression(_))) {
        return Err(FilterParseError("regular expressions inside $in are not supported".into()));
    }
    Ok(MatchExpression::new(MatchKind::In {
        path: field.to_string(),
        values: values.clone(),
    }))
}

fn parse_regex(field: &str, value: &Bson, options: &str) -> Result<MatchExpression, FilterParseError> {
    let pattern = match value {
        Bson::String(s) => s.clone(),
        _ => return Err(FilterParseError("$regex must be a string".into())),
    };

    let compiled = RegexBuilder::new(&pattern)
        .case_insensitive(options.contains('i'))
        .multi_line(options.contains('m'))
        .dot_matches_new_line(options.contains('s'))
        .ignore_whitespace(options.contains('x'))
        .build()
        .map_err(|e| FilterParseError(format!("invalid regex: {e}")))?;

    Ok(MatchExpression::new(MatchKind::Regex {
        path: field.to_string(),
        regex: RegexPredicate {
            pattern,
            options: options.to_string(),
            compiled,
        },
    }))
}

fn parse_text(value: &Bson) -> Result<MatchExpression, FilterParseError> {
    let Bson::Document(doc) = value else {
        return Err(FilterParseError("$text needs an object".into()));
    };
    let query = match doc.get("$search") {
        Some(Bson::String(s)) => s.clone(),
        _ => return Err(FilterParseError("$text requires a string $search".into())),
    };
    let language = match doc.get("$language") {
        Some(Bson::String(s)) => Some(s.clone()),
        Some(_) => return Err(FilterParseError("$language must be a string".into())),
        None => None,
    };
    Ok(MatchExpression::new(MatchKind::Text { query, language }))
}

// ── Geo ─────────────────────────────────────────────────────────

fn point(value: &Bson) -> Result<[f64; 2], FilterParseError> {
    let coords: Vec<f64> = match value {
        Bson::Array(a) => a.iter().filter_map(as_f64).collect(),
        Bson::Document(d) => d.values().filter_map(as_f64).collect(),
        _ => Vec::new(),
    };
    match coords.as_slice() {
        [x, y] => Ok([*x, *y]),
        _ => Err(FilterParseError("point must have exactly two numeric coordinates".into())),
    }
}

fn points(value: &Bson) -> Result<Vec<[f64; 2]>, FilterParseError> {
    match value {
        Bson::Array(a) => a.iter().map(point).collect(),
        _ => Err(FilterParseError("expected an array of points".into())),
    }
}

fn geometry(value: &Bson) -> Result<GeoShape, FilterParseError> {
    let Bson::Document(doc) = value else {
        return Err(FilterParseError("$geometry needs an object".into()));
    };
    let kind = match doc.get("type") {
        Some(Bson::String(s)) => s.clone(),
        _ => return Err(FilterParseError("$geometry requires a string type".into())),
    };
    let coordinates = doc
        .get("coordinates")
        .cloned()
        .ok_or_else(|| FilterParseError("$geometry requires coordinates".into()))?;
    Ok(GeoShape::GeoJson { kind, coordinates })
}

fn parse_geo(
    field: &str,
    predicate: GeoPredicate,
    value: &Bson,
) -> Result<MatchExpression, FilterParseError> {
    let Bson::Document(doc) = value else {
        return Err(FilterParseError("geo operator needs a shape object".into()));
    };
    let Some((shape_op, shape_value)) = doc.iter().next() else {
        return Err(FilterParseError("geo operator needs a shape".into()));
    };

    let shape = match (predicate, shape_op.as_str()) {
        (GeoPredicate::Within, "$box") => {
            let corners = points(shape_value)?;
            let [min, max] = corners.as_slice() else {
                return Err(FilterParseError("$box needs two points".into()));
            };
            GeoShape::Box { min: *min, max: *max }
        }
        (GeoPredicate::Within, "$polygon") => {
            let vertices = points(shape_value)?;
            if vertices.len() < 3 {
                return Err(FilterParseError("$polygon needs at least three points".into()));
            }
            GeoShape::Polygon(vertices)
        }
        (GeoPredicate::Within, "$center" | "$centerSphere") => {
            let Bson::Array(parts) = shape_value else {
                return Err(FilterParseError(format!("{shape_op} needs [point, radius]")));
            };
            let (Some(c), Some(r)) = (parts.first(), parts.get(1).and_then(as_f64)) else {
                return Err(FilterParseError(format!("{shape_op} needs [point, radius]")));
            };
            let center = point(c)?;
            if shape_op == "$center" {
                GeoShape::Center { center, radius: r }
            } else {
                GeoShape::CenterSphere { center, radius: r }
            }
        }
        (_, "$geometry") => geometry(shape_value)?,
        (_, other) => return Err(FilterParseError(format!("unknown geo shape: {other}"))),
    };

    Ok(MatchExpression::new(MatchKind::Geo {
        path: field.to_string(),
        predicate,
        shape,
    }))
}

fn parse_near(
    field: &str,
    value: &Bson,
    sphere: bool,
    max_distance: Option<f64>,
) -> Result<MatchExpression, FilterParseError> {
    // `{$near: {$geometry: ...}}` is always spherical, legacy pairs follow the operator.
    let (point, crs, max_distance) = match value {
        Bson::Document(doc) if doc.contains_key("$geometry") => {
            let geo = doc.get("$geometry").cloned().unwrap_or(Bson::Null);
            let GeoShape::GeoJson { kind, coordinates } = geometry(&geo)? else {
                return Err(FilterParseError("$geometry must be GeoJSON".into()));
            };
            if kind != "Point" {
                return Err(FilterParseError("$near requires a GeoJSON Point".into()));
            }
            let inner_max = doc.get("$maxDistance").and_then(as_f64);
            (self::point(&coordinates)?, Crs::Sphere, inner_max.or(max_distance))
        }
        _ => (
            self::point(value)?,
            if sphere { Crs::Sphere } else { Crs::Flat },
            max_distance,
        ),
    };

    Ok(MatchExpression::new(MatchKind::GeoNear {
        path: field.to_string(),
        point,
        crs,
        max_distance,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn bare_field_implicit_eq() {
        let expr = parse_filter(&doc! { "status": "active" }).unwrap();
        match expr.kind {
            MatchKind::Compare { op, path, value } => {
                assert_eq!(op, CmpOp::Eq);
                assert_eq!(path, "status");
                assert_eq!(value, Bson::String("active".into()));
            }
            other => panic!("expected Compare, got {:?}", other),
        }
    }

    #[test]
    fn empty_filter_is_empty_and() {
        let expr = parse_filter(&doc! {}).unwrap();
        assert!(expr.is_trivially_true());
    }

    #[test]
    fn multiple_operators_same_field() {
        let expr = parse_filter(&doc! { "score": { "$gt": 50_i32, "$lte": 100_i32 } }).unwrap();
        match expr.kind {
            MatchKind::And(children) => {
                assert_eq!(children.len(), 2);
                assert!(matches!(&children[0].kind, MatchKind::Compare { op: CmpOp::Gt, .. }));
                assert!(matches!(&children[1].kind, MatchKind::Compare { op: CmpOp::Lte, .. }));
            }
            other => panic!("expected And, got {:?}", other),
        }
    }

    #[test]
    fn ne_becomes_not_eq() {
        let expr = parse_filter(&doc! { "a": { "$ne": 3_i32 } }).unwrap();
        match expr.kind {
            MatchKind::Not(child) => {
                assert!(matches!(child.kind, MatchKind::Compare { op: CmpOp::Eq, .. }))
            }
            other => panic!("expected Not, got {:?}", other),
        }
    }

    #[test]
    fn regex_with_options() {
        let expr = parse_filter(&doc! { "name": { "$regex": "^ab", "$options": "i" } }).unwrap();
        match expr.kind {
            MatchKind::Regex { regex, .. } => {
                assert_eq!(regex.pattern, "^ab");
                assert_eq!(regex.options, "i");
                assert!(regex.compiled.is_match("ABC"));
            }
            other => panic!("expected Regex, got {:?}", other),
        }
    }

    #[test]
    fn invalid_regex_rejected() {
        assert!(parse_filter(&doc! { "name": { "$regex": "(" } }).is_err());
    }

    #[test]
    fn within_box() {
        let expr =
            parse_filter(&doc! { "a": { "$within": { "$box": [[0_i32, 0_i32], [9_i32, 9_i32]] } } })
                .unwrap();
        match expr.kind {
            MatchKind::Geo { shape, predicate, .. } => {
                assert_eq!(predicate, GeoPredicate::Within);
                assert_eq!(shape, GeoShape::Box { min: [0.0, 0.0], max: [9.0, 9.0] });
            }
            other => panic!("expected Geo, got {:?}", other),
        }
    }

    #[test]
    fn near_variants() {
        let flat = parse_filter(&doc! { "a": { "$near": [1_i32, 2_i32], "$maxDistance": 3_i32 } }).unwrap();
        assert!(matches!(
            flat.kind,
            MatchKind::GeoNear { crs: Crs::Flat, max_distance: Some(d), .. } if d == 3.0
        ));

        let sphere = parse_filter(&doc! {
            "a": { "$near": { "$geometry": { "type": "Point", "coordinates": [1_i32, 2_i32] } } }
        })
        .unwrap();
        assert!(matches!(sphere.kind, MatchKind::GeoNear { crs: Crs::Sphere, .. }));
    }

    #[test]
    fn text_operator() {
        let expr = parse_filter(&doc! { "$text": { "$search": "blah" } }).unwrap();
        assert!(expr.is_text());
        assert_eq!(expr.path(), Some("_fts"));
    }

    #[test]
    fn unknown_operator_rejected() {
        let err = parse_filter(&doc! { "a": { "$bogus": 1_i32 } }).unwrap_err();
        assert!(err.0.contains("$bogus"));
    }
}
