use bson::{Bson, Document};
use serde::{Deserialize, Serialize};

use crate::parse_filter::FilterParseError;

/// String collation used when comparing and indexing strings.
///
/// Only the behaviors the planner depends on are modelled: a collator maps
/// a string to its comparison key, and two collators either agree or not.
/// The absence of a collator means simple binary comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collator {
    /// Compares strings by their reversal.
    ReverseString,
    /// Considers every string equal.
    AlwaysEqual,
    /// Case-insensitive comparison.
    ToLower,
}

impl Collator {
    /// Parse a collation document. `{locale: "simple"}` (or an empty
    /// document) yields no collator.
    pub fn from_document(doc: &Document) -> Result<Option<Collator>, FilterParseError> {
        if doc.is_empty() {
            return Ok(None);
        }
        match doc.get("locale") {
            Some(Bson::String(locale)) => match locale.as_str() {
                "simple" => Ok(None),
                "reverse" | "reverse_string" => Ok(Some(Collator::ReverseString)),
                "always_equal" => Ok(Some(Collator::AlwaysEqual)),
                "to_lower" => Ok(Some(Collator::ToLower)),
                other => Err(FilterParseError(format!("unsupported collation locale: {other}"))),
            },
            _ => Err(FilterParseError("collation requires a string locale".into())),
        }
    }

    pub fn comparison_key(&self, s: &str) -> String {
        match self {
            Collator::ReverseString => s.chars().rev().collect(),
            Collator::AlwaysEqual => String::new(),
            Collator::ToLower => s.to_lowercase(),
        }
    }
}

/// Whether two optional collators order strings identically.
pub fn collators_match(a: Option<&Collator>, b: Option<&Collator>) -> bool {
    a == b
}

/// Replace every string inside `value` with its comparison key.
pub fn apply_collation(value: &Bson, collator: Option<&Collator>) -> Bson {
    let Some(collator) = collator else {
        return value.clone();
    };
    match value {
        Bson::String(s) => Bson::String(collator.comparison_key(s)),
        Bson::Array(items) => {
            Bson::Array(items.iter().map(|v| apply_collation(v, Some(collator))).collect())
        }
        Bson::Document(doc) => {
            let mut out = Document::new();
            for (k, v) in doc {
                out.insert(k.clone(), apply_collation(v, Some(collator)));
            }
            Bson::Document(out)
        }
        other => other.clone(),
    }
}

/// Whether `value` contains anything a collator would change the
/// ordering of: strings, or containers that may hold them.
pub fn is_collatable(value: &Bson) -> bool {
    match value {
        Bson::String(_) | Bson::Symbol(_) => true,
        Bson::Array(items) => items.iter().any(is_collatable),
        Bson::Document(doc) => doc.values().any(is_collatable),
        _ => false,
    }
}
