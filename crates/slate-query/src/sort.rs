use bson::{Bson, Document};
use serde::{Deserialize, Serialize};

use crate::compare::as_f64;
use crate::parse_filter::FilterParseError;

/// Pseudo-field requesting storage order.
pub const NATURAL: &str = "$natural";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub fn reverse(self) -> Self {
        match self {
            SortDirection::Asc => SortDirection::Desc,
            SortDirection::Desc => SortDirection::Asc,
        }
    }

    /// `1` or `-1`, the way key patterns spell it.
    pub fn as_i32(self) -> i32 {
        match self {
            SortDirection::Asc => 1,
            SortDirection::Desc => -1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Sort {
    pub field: String,
    pub direction: SortDirection,
}

impl Sort {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Asc,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Desc,
        }
    }
}

/// Parse a sort document such as `{a: 1, b: -1}` or `{$natural: -1}`.
pub fn parse_sort(doc: &Document) -> Result<Vec<Sort>, FilterParseError> {
    doc.iter()
        .map(|(field, value)| {
            let n = as_f64(value).ok_or_else(|| {
                FilterParseError(format!("sort direction for '{field}' must be a number"))
            })?;
            let direction = if n < 0.0 {
                SortDirection::Desc
            } else {
                SortDirection::Asc
            };
            Ok(Sort {
                field: field.clone(),
                direction,
            })
        })
        .collect()
}

/// Sort order an index with `key_pattern` produces when scanned forward.
///
/// Stops at the first special (string-valued) field: `{a: 1, b: "2d"}`
/// sorts by `{a: 1}` only.
pub fn sort_from_key_pattern(key_pattern: &Document) -> Vec<Sort> {
    let mut out = Vec::new();
    for (field, value) in key_pattern {
        if matches!(value, Bson::String(_)) {
            break;
        }
        let descending = as_f64(value).is_some_and(|d| d < 0.0);
        out.push(Sort {
            field: field.clone(),
            direction: if descending {
                SortDirection::Desc
            } else {
                SortDirection::Asc
            },
        });
    }
    out
}

pub fn reverse_sort(sort: &[Sort]) -> Vec<Sort> {
    sort.iter()
        .map(|s| Sort {
            field: s.field.clone(),
            direction: s.direction.reverse(),
        })
        .collect()
}

/// Whether `prefix` is a leading portion of `sort`.
pub fn is_sort_prefix(prefix: &[Sort], sort: &[Sort]) -> bool {
    prefix.len() <= sort.len() && prefix.iter().zip(sort).all(|(a, b)| a == b)
}

/// The `$natural` direction requested by `sort`, if any.
pub fn natural_direction(sort: &[Sort]) -> Option<SortDirection> {
    sort.iter().find(|s| s.field == NATURAL).map(|s| s.direction)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn key_pattern_sort_stops_at_special_field() {
        let sort = sort_from_key_pattern(&doc! { "a": -1_i32, "b": "2d", "c": 1_i32 });
        assert_eq!(sort, vec![Sort::desc("a")]);
    }

    #[test]
    fn prefix_checks_direction() {
        let index = vec![Sort::asc("a"), Sort::asc("b")];
        assert!(is_sort_prefix(&[Sort::asc("a")], &index));
        assert!(!is_sort_prefix(&[Sort::desc("a")], &index));
        assert!(is_sort_prefix(&[Sort::desc("a")], &reverse_sort(&index)));
    }

    #[test]
    fn natural_is_detected() {
        let sort = parse_sort(&doc! { "$natural": -1_i32 }).unwrap();
        assert_eq!(natural_direction(&sort), Some(SortDirection::Desc));
    }

    #[test]
    fn non_numeric_direction_rejected() {
        assert!(parse_sort(&doc! { "a": "up" }).is_err());
    }
}
