use bson::{Bson, Document};

use crate::compare::as_f64;
use crate::parse_filter::FilterParseError;

/// A parsed find projection.
#[derive(Debug, Clone, PartialEq)]
pub struct Projection {
    spec: Document,
    inclusion: bool,
    include_id: bool,
    requires_document: bool,
    fields: Vec<String>,
}

impl Projection {
    pub fn parse(spec: &Document) -> Result<Self, FilterParseError> {
        let mut inclusion: Option<bool> = None;
        let mut include_id = true;
        let mut requires_document = false;
        let mut fields = Vec::new();

        for (field, value) in spec {
            if field.contains('$') {
                // Positional projections need the array they index into.
                requires_document = true;
                fields.push(field.trim_end_matches(".$").to_string());
                continue;
            }

            let include = match value {
                Bson::Boolean(b) => *b,
                Bson::Document(_) => {
                    // $slice, $elemMatch, $meta
                    requires_document = true;
                    fields.push(field.clone());
                    continue;
                }
                v => as_f64(v)
                    .map(|d| d != 0.0)
                    .ok_or_else(|| FilterParseError(format!("bad projection value for {field}")))?,
            };

            if field == "_id" {
                include_id = include;
                continue;
            }

            match inclusion {
                Some(mode) if mode != include => {
                    return Err(FilterParseError(
                        "projection cannot mix inclusion and exclusion".into(),
                    ));
                }
                _ => inclusion = Some(include),
            }
            fields.push(field.clone());
        }

        // Exclusion-only projections keep every unnamed field.
        let inclusion = inclusion.unwrap_or(false);
        if !inclusion {
            requires_document = true;
        }

        Ok(Self {
            spec: spec.clone(),
            inclusion,
            include_id,
            requires_document,
            fields,
        })
    }

    pub fn spec(&self) -> &Document {
        &self.spec
    }

    pub fn is_inclusion(&self) -> bool {
        self.inclusion
    }

    /// Whether the projection can only be computed from the full document.
    pub fn requires_document(&self) -> bool {
        self.requires_document
    }

    /// Fields the projection reads, `_id` included unless suppressed.
    pub fn required_fields(&self) -> Vec<String> {
        let mut out = Vec::with_capacity(self.fields.len() + 1);
        if self.include_id {
            out.push("_id".to_string());
        }
        out.extend(self.fields.iter().cloned());
        out
    }
}
