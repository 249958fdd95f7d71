//! Row formatting
//!
//! Converts resolved BSON values into delimited-text cells. Numbers never
//! use scientific notation and integral floats drop the decimal point,
//! so spreadsheet tools read them back losslessly. The `"null"` string
//! sentinel written by some upstream feeds is treated as empty.

use bson::{Bson, Document};
use chrono::DateTime;

/// Attribute names probed, in order, when turning a referenced document
/// into a display string.
const DISPLAY_FIELDS: &[&str] = &[
    "fullAddress",
    "fullName",
    "name",
    "title",
    "displayName",
    "streetAddress",
];

/// Timestamp layout for date cells.
const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Format one BSON value as a cell string.
///
/// Null and empty-like values become the empty string. Arrays that reach
/// the formatter unresolved are joined element-wise; the export resolver
/// normally flattens them before this point.
pub fn format_value(value: &Bson) -> String {
    match value {
        Bson::Null | Bson::Undefined => String::new(),
        Bson::String(s) => {
            let trimmed = s.trim();
            if trimmed.eq_ignore_ascii_case("null") {
                String::new()
            } else {
                s.clone()
            }
        }
        Bson::Int32(n) => n.to_string(),
        Bson::Int64(n) => n.to_string(),
        Bson::Double(n) => format_double(*n),
        Bson::Decimal128(d) => d.to_string(),
        Bson::Boolean(b) => b.to_string(),
        Bson::ObjectId(id) => id.to_hex(),
        Bson::DateTime(dt) => format_millis(dt.timestamp_millis()),
        Bson::Timestamp(ts) => format_millis(i64::from(ts.time) * 1000),
        Bson::Array(items) => items
            .iter()
            .map(format_value)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(", "),
        Bson::Document(doc) => display_string(doc).unwrap_or_default(),
        other => other.to_string(),
    }
}

/// Render a double without scientific notation; integral values drop the
/// decimal point. NaN and infinities become empty cells.
pub fn format_double(n: f64) -> String {
    if n.is_nan() || n.is_infinite() {
        return String::new();
    }
    // Rust's Display for f64 never uses scientific notation and already
    // renders integral values without a fractional part.
    format!("{n}")
}

fn format_millis(millis: i64) -> String {
    match DateTime::from_timestamp_millis(millis) {
        Some(ts) => ts.format(DATE_FORMAT).to_string(),
        None => String::new(),
    }
}

/// Pick a human-readable display string off a referenced document.
///
/// Probes [`DISPLAY_FIELDS`] in order and returns the first non-empty
/// string value. Callers fall back to the raw identifier when this
/// returns `None`.
pub fn display_string(document: &Document) -> Option<String> {
    for field in DISPLAY_FIELDS {
        if let Ok(value) = document.get_str(field) {
            let trimmed = value.trim();
            if !trimmed.is_empty() && !trimmed.eq_ignore_ascii_case("null") {
                return Some(value.to_string());
            }
        }
    }
    None
}

/// Whether a field name is safe to offer as an array extract field:
/// string-typed display data rather than an identifier.
pub fn is_display_safe_field(name: &str) -> bool {
    name != "_id"
        && name != "__v"
        && !name.ends_with("Id")
        && !name.ends_with("Ids")
        && !name.ends_with("_id")
        && !name.ends_with("ID")
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn test_null_and_sentinel_are_empty() {
        assert_eq!(format_value(&Bson::Null), "");
        assert_eq!(format_value(&Bson::String("null".into())), "");
        assert_eq!(format_value(&Bson::String("NULL".into())), "");
        assert_eq!(format_value(&Bson::String("not null".into())), "not null");
    }

    #[test]
    fn test_numbers_render_plainly() {
        assert_eq!(format_value(&Bson::Int32(42)), "42");
        assert_eq!(format_value(&Bson::Int64(9_007_199_254_740_993)), "9007199254740993");
        assert_eq!(format_double(3.0), "3");
        assert_eq!(format_double(2.5), "2.5");
        assert_eq!(format_double(-0.125), "-0.125");
        // Large magnitudes stay in positional notation
        assert_eq!(format_double(1e15), "1000000000000000");
    }

    #[test]
    fn test_non_finite_doubles_are_empty() {
        assert_eq!(format_double(f64::NAN), "");
        assert_eq!(format_double(f64::INFINITY), "");
    }

    #[test]
    fn test_booleans_literal() {
        assert_eq!(format_value(&Bson::Boolean(true)), "true");
        assert_eq!(format_value(&Bson::Boolean(false)), "false");
    }

    #[test]
    fn test_object_id_renders_hex() {
        let id = bson::oid::ObjectId::new();
        assert_eq!(format_value(&Bson::ObjectId(id)), id.to_hex());
    }

    #[test]
    fn test_datetime_format() {
        // 2024-03-15 12:30:45 UTC
        let dt = bson::DateTime::from_millis(1_710_505_845_000);
        assert_eq!(format_value(&Bson::DateTime(dt)), "2024-03-15 12:30:45");
    }

    #[test]
    fn test_array_joins_non_empty_elements() {
        let value = Bson::Array(vec![
            Bson::String("a".into()),
            Bson::Null,
            Bson::String("b".into()),
        ]);
        assert_eq!(format_value(&value), "a, b");
    }

    #[test]
    fn test_display_string_probe_order() {
        let document = doc! { "streetAddress": "1 Main St", "fullName": "J. Doe" };
        assert_eq!(display_string(&document).as_deref(), Some("J. Doe"));

        let document = doc! { "title": "Unit 4" };
        assert_eq!(display_string(&document).as_deref(), Some("Unit 4"));

        let document = doc! { "agentId": "x" };
        assert_eq!(display_string(&document), None);
    }

    #[test]
    fn test_display_string_skips_empty_values() {
        let document = doc! { "fullName": "  ", "name": "Ann" };
        assert_eq!(display_string(&document).as_deref(), Some("Ann"));
    }

    #[test]
    fn test_display_safe_fields() {
        assert!(is_display_safe_field("fullName"));
        assert!(!is_display_safe_field("_id"));
        assert!(!is_display_safe_field("listingAgentId"));
        assert!(!is_display_safe_field("property_id"));
        assert!(!is_display_safe_field("AgentID"));
    }
}
