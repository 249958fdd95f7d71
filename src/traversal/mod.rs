//! Schema-free document traversal
//!
//! This module walks arbitrary BSON documents without any knowledge of their
//! shape: it enumerates dot-delimited field paths, classifies values into the
//! discovery type model, and resolves dotted paths back into documents.
//! Both the discovery and export engines are built on top of it.

use bson::{Bson, Document};
use serde::{Deserialize, Serialize};

/// Inferred type of a field value.
///
/// Assigned on the first non-null occurrence of a field during discovery
/// and persisted in the field configuration. ObjectId values are modeled
/// as identifiers since they double as cross-collection references.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    String,
    Number,
    Boolean,
    Date,
    Identifier,
    Object,
    Array,
}

impl DataType {
    /// Classify a BSON value into the discovery type model.
    ///
    /// # Arguments
    /// * `value` - BSON value to classify
    ///
    /// # Returns
    /// * `Option<DataType>` - The inferred type, or None for null-like values
    pub fn classify(value: &Bson) -> Option<DataType> {
        match value {
            Bson::String(_) => Some(DataType::String),
            Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) | Bson::Decimal128(_) => {
                Some(DataType::Number)
            }
            Bson::Boolean(_) => Some(DataType::Boolean),
            Bson::DateTime(_) | Bson::Timestamp(_) => Some(DataType::Date),
            Bson::ObjectId(_) => Some(DataType::Identifier),
            Bson::Document(_) => Some(DataType::Object),
            Bson::Array(_) => Some(DataType::Array),
            _ => None,
        }
    }
}

/// Check whether a value counts as empty for statistics purposes.
///
/// Null, missing, blank strings, the literal string "null" (a sentinel some
/// upstream feeds write instead of a real null), and empty arrays are all
/// treated as empty.
pub fn is_empty_value(value: &Bson) -> bool {
    match value {
        Bson::Null | Bson::Undefined => true,
        Bson::String(s) => {
            let trimmed = s.trim();
            trimmed.is_empty() || trimmed.eq_ignore_ascii_case("null")
        }
        Bson::Array(items) => items.is_empty(),
        _ => false,
    }
}

/// Recursively walk a document, invoking `visit` for every field.
///
/// Paths are dot-delimited. The walk descends into nested documents up to
/// `max_depth` levels but never into arrays; array values are reported once
/// at their own path so the caller can analyze element structure separately.
///
/// # Arguments
/// * `doc` - Document to walk
/// * `max_depth` - Maximum nesting depth to descend into
/// * `visit` - Callback receiving (path, value, depth) for each field
pub fn walk_document<F>(doc: &Document, max_depth: usize, visit: &mut F)
where
    F: FnMut(&str, &Bson, usize),
{
    walk_inner(doc, "", 0, max_depth, visit);
}

fn walk_inner<F>(doc: &Document, prefix: &str, depth: usize, max_depth: usize, visit: &mut F)
where
    F: FnMut(&str, &Bson, usize),
{
    if depth > max_depth {
        return;
    }

    for (key, value) in doc {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };

        visit(&path, value, depth);

        if let Bson::Document(nested) = value {
            walk_inner(nested, &path, depth + 1, max_depth, visit);
        }
    }
}

/// Resolve a dot-delimited path against a document.
///
/// Returns None as soon as any segment is missing or the current value is
/// not a document. Array-aware resolution (extracting a field from every
/// element) is the export resolver's job, not traversal's.
///
/// # Arguments
/// * `doc` - Root document
/// * `path` - Dot-delimited field path
///
/// # Returns
/// * `Option<&Bson>` - The value at the path, if every segment resolves
pub fn get_path<'a>(doc: &'a Document, path: &str) -> Option<&'a Bson> {
    let mut segments = path.split('.');
    let first = segments.next()?;
    let mut current = doc.get(first)?;

    for segment in segments {
        match current {
            Bson::Document(nested) => current = nested.get(segment)?,
            _ => return None,
        }
    }

    Some(current)
}

/// Return the last segment of a dot-delimited field path.
pub fn last_segment(path: &str) -> &str {
    path.rsplit('.').next().unwrap_or(path)
}
