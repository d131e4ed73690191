use std::fmt;

use bson::{Bson, Document};
use slate_query::{Collator, FilterParseError, MatchExpression, as_f64, parse_filter};

/// Access method implied by an index's key pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexType {
    BTree,
    Hashed,
    TwoD,
    TwoDSphere,
    Text,
    Haystack,
}

impl IndexType {
    /// The first string value in the key pattern names the access method.
    pub fn from_key_pattern(key_pattern: &Document) -> IndexType {
        let plugin = key_pattern.values().find_map(|v| match v {
            Bson::String(s) => Some(s.as_str()),
            _ => None,
        });
        match plugin {
            Some("hashed") => IndexType::Hashed,
            Some("2d") => IndexType::TwoD,
            Some("2dsphere") => IndexType::TwoDSphere,
            Some("text") => IndexType::Text,
            Some("geoHaystack") => IndexType::Haystack,
            _ => IndexType::BTree,
        }
    }
}

/// Read-only description of one index, as supplied by the catalog.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    pub key_pattern: Document,
    pub name: String,
    pub index_type: IndexType,
    pub multikey: bool,
    pub sparse: bool,
    pub unique: bool,
    pub collator: Option<Collator>,
    /// Partial filter expression, normalized.
    pub filter_expr: Option<MatchExpression>,
    /// Extra index options, e.g. `2dsphereIndexVersion`.
    pub info: Document,
}

impl IndexEntry {
    pub fn new(key_pattern: Document) -> Self {
        Self {
            name: default_index_name(&key_pattern),
            index_type: IndexType::from_key_pattern(&key_pattern),
            key_pattern,
            multikey: false,
            sparse: false,
            unique: false,
            collator: None,
            filter_expr: None,
            info: Document::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn multikey(mut self, multikey: bool) -> Self {
        self.multikey = multikey;
        self
    }

    pub fn sparse(mut self, sparse: bool) -> Self {
        self.sparse = sparse;
        self
    }

    pub fn unique(mut self, unique: bool) -> Self {
        self.unique = unique;
        self
    }

    pub fn with_collator(mut self, collator: Collator) -> Self {
        self.collator = Some(collator);
        self
    }

    pub fn with_info(mut self, info: Document) -> Self {
        self.info = info;
        self
    }

    /// Attach a partial filter given as a filter document.
    pub fn with_partial_filter(mut self, filter: &Document) -> Result<Self, FilterParseError> {
        self.filter_expr = Some(parse_filter(filter)?.normalize());
        Ok(self)
    }

    /// Position of `field` in the key pattern.
    pub fn position_of(&self, field: &str) -> Option<usize> {
        self.key_pattern.keys().position(|k| k == field)
    }

    pub fn field_at(&self, pos: usize) -> Option<(&str, &Bson)> {
        self.key_pattern.iter().nth(pos).map(|(k, v)| (k.as_str(), v))
    }

    pub fn num_fields(&self) -> usize {
        self.key_pattern.len()
    }

    pub fn is_id_index(&self) -> bool {
        self.key_pattern.len() == 1
            && self
                .key_pattern
                .get("_id")
                .and_then(as_f64)
                .is_some_and(|d| d == 1.0 || d == -1.0)
    }

    /// Whether any key field is the `2d` access method.
    pub fn has_2d_field(&self) -> bool {
        self.key_pattern
            .values()
            .any(|v| matches!(v, Bson::String(s) if s == "2d"))
    }

    pub fn is_2dsphere_v2_or_later(&self) -> bool {
        self.index_type == IndexType::TwoDSphere
            && self
                .info
                .get("2dsphereIndexVersion")
                .and_then(as_f64)
                .is_some_and(|v| v >= 2.0)
    }
}

/// `{a: 1, b: -1}` is named `a_1_b_-1`, `{a: "2d"}` is `a_2d`.
pub fn default_index_name(key_pattern: &Document) -> String {
    let mut parts = Vec::with_capacity(key_pattern.len() * 2);
    for (field, value) in key_pattern {
        parts.push(field.clone());
        parts.push(match value {
            Bson::String(s) => s.clone(),
            v => match as_f64(v) {
                Some(d) if d.fract() == 0.0 => format!("{}", d as i64),
                Some(d) => d.to_string(),
                None => v.to_string(),
            },
        });
    }
    parts.join("_")
}

impl fmt::Display for IndexEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "kp: {} name: '{}'", self.key_pattern, self.name)?;
        if self.multikey {
            write!(f, " multikey")?;
        }
        if self.sparse {
            write!(f, " sparse")?;
        }
        if self.filter_expr.is_some() {
            write!(f, " partial")?;
        }
        Ok(())
    }
}

/// An index together with its ordinal in the catalog passed to one plan
/// call. Ordinals are only meaningful within that call.
#[derive(Debug, Clone, Copy)]
pub struct IndexRef<'a> {
    pub ordinal: usize,
    pub entry: &'a IndexEntry,
}

impl<'a> IndexRef<'a> {
    /// Refs over a whole catalog.
    pub fn all(indices: &'a [IndexEntry]) -> Vec<IndexRef<'a>> {
        indices
            .iter()
            .enumerate()
            .map(|(ordinal, entry)| IndexRef { ordinal, entry })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn type_from_key_pattern() {
        assert_eq!(IndexType::from_key_pattern(&doc! { "a": 1_i32 }), IndexType::BTree);
        assert_eq!(IndexType::from_key_pattern(&doc! { "a": "2d" }), IndexType::TwoD);
        assert_eq!(
            IndexType::from_key_pattern(&doc! { "a": 1_i32, "_fts": "text", "_ftsx": 1_i32 }),
            IndexType::Text
        );
        assert_eq!(IndexType::from_key_pattern(&doc! { "a": "hashed" }), IndexType::Hashed);
    }

    #[test]
    fn default_names() {
        assert_eq!(default_index_name(&doc! { "a": 1_i32, "b": -1_i32 }), "a_1_b_-1");
        assert_eq!(default_index_name(&doc! { "a": "2d" }), "a_2d");
        assert_eq!(default_index_name(&doc! { "x": 1.0 }), "x_1");
    }

    #[test]
    fn id_index() {
        assert!(IndexEntry::new(doc! { "_id": 1_i32 }).is_id_index());
        assert!(!IndexEntry::new(doc! { "_id": 1_i32, "a": 1_i32 }).is_id_index());
        assert!(!IndexEntry::new(doc! { "_id": "hashed" }).is_id_index());
    }

    #[test]
    fn positions() {
        let idx = IndexEntry::new(doc! { "a": 1_i32, "b": 1_i32 });
        assert_eq!(idx.position_of("b"), Some(1));
        assert_eq!(idx.position_of("c"), None);
        assert_eq!(idx.field_at(0).map(|(f, _)| f), Some("a"));
    }
}
