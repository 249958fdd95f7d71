//! Field resolution
//!
//! Resolves one configured field against one source document: dotted
//! scalar paths, array flattening in list/count/primary modes, and
//! `_expanded` reference fields. All reference lookups go through the
//! [`ReferenceLookup`] seam so the cache policy stays in one place.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use bson::{oid::ObjectId, Bson, Document};

use crate::cache::ReferenceLookup;
use crate::config::{
    ArrayConfig, DisplayMode, ExtractionMode, FieldConfiguration, SortOrder,
};
use crate::error::Result;
use crate::formatter;
use crate::traversal;

/// Split `<base>_expanded.<nested>` into its base and nested parts.
pub fn split_expansion_path(path: &str) -> Option<(&str, &str)> {
    let idx = path.find("_expanded.")?;
    Some((&path[..idx], &path[idx + "_expanded.".len()..]))
}

/// Split `<base>[primary].<attribute>` into its base and attribute parts.
fn split_primary_path(path: &str) -> Option<(&str, &str)> {
    let idx = path.find("[primary].")?;
    Some((&path[..idx], &path[idx + "[primary].".len()..]))
}

/// Resolve one field to its formatted cell value.
///
/// `all_fields` is the full configured field list; it is consulted to
/// detect expansion children, which force a base identifier field to
/// yield its raw hex form instead of a display string.
pub async fn resolve_field(
    field: &FieldConfiguration,
    document: &Document,
    all_fields: &[FieldConfiguration],
    lookup: &mut dyn ReferenceLookup,
) -> Result<String> {
    match field.extraction_mode {
        Some(ExtractionMode::Count) => return Ok(resolve_count(field, document)),
        Some(ExtractionMode::Primary) => {
            return resolve_primary(field, document, lookup).await;
        }
        None => {}
    }

    if let Some((base, nested)) = split_expansion_path(&field.field_path) {
        return resolve_expansion(field, base, nested, document, all_fields, lookup).await;
    }

    let Some(value) = traversal::get_path(document, &field.field_path) else {
        return Ok(String::new());
    };

    match value {
        Bson::Array(items) => match &field.array_config {
            Some(array_config) => resolve_array(items, array_config, lookup).await,
            None => Ok(formatter::format_value(value)),
        },
        Bson::ObjectId(id) => {
            resolve_scalar_identifier(field, *id, all_fields, lookup).await
        }
        other => Ok(formatter::format_value(other)),
    }
}

/* ========================= Count and primary modes ========================= */

fn count_source<'a>(field: &'a FieldConfiguration) -> &'a str {
    field
        .source_field
        .as_deref()
        .or_else(|| field.field_path.strip_suffix("[count]"))
        .unwrap_or(&field.field_path)
}

/// Element count of the source array; 0 for absent or non-array values.
fn resolve_count(field: &FieldConfiguration, document: &Document) -> String {
    let count = match traversal::get_path(document, count_source(field)) {
        Some(Bson::Array(items)) => items.len(),
        _ => 0,
    };
    count.to_string()
}

/// Named attribute of the first element of the source array, resolving
/// through the cache when the element is an identifier.
async fn resolve_primary(
    field: &FieldConfiguration,
    document: &Document,
    lookup: &mut dyn ReferenceLookup,
) -> Result<String> {
    let Some((parsed_base, attribute)) = split_primary_path(&field.field_path) else {
        return Ok(String::new());
    };
    let base = field.source_field.as_deref().unwrap_or(parsed_base);

    let Some(Bson::Array(items)) = traversal::get_path(document, base) else {
        return Ok(String::new());
    };
    let Some(first) = items.first() else {
        return Ok(String::new());
    };

    match first {
        Bson::ObjectId(id) => {
            let target = field.relationship_target.as_deref().or_else(|| {
                field
                    .array_config
                    .as_ref()
                    .and_then(|a| a.reference_collection.as_deref())
            });
            let Some(target) = target else {
                return Ok(String::new());
            };
            match lookup.lookup_reference(target, id).await? {
                Some(doc) => Ok(traversal::get_path(&doc, attribute)
                    .map(formatter::format_value)
                    .unwrap_or_default()),
                None => Ok(String::new()),
            }
        }
        Bson::Document(doc) => Ok(traversal::get_path(doc, attribute)
            .map(formatter::format_value)
            .unwrap_or_default()),
        other => Ok(formatter::format_value(other)),
    }
}

/* ========================= Expansion fields ========================= */

async fn resolve_expansion(
    field: &FieldConfiguration,
    base: &str,
    nested: &str,
    document: &Document,
    all_fields: &[FieldConfiguration],
    lookup: &mut dyn ReferenceLookup,
) -> Result<String> {
    let id = match traversal::get_path(document, base) {
        Some(Bson::ObjectId(id)) => *id,
        Some(Bson::Document(inner)) => match inner.get_object_id("_id") {
            Ok(id) => id,
            Err(_) => return Ok(String::new()),
        },
        _ => return Ok(String::new()),
    };

    let target = expansion_target(field, base, all_fields);
    let Some(target) = target else {
        return Ok(String::new());
    };

    match lookup.lookup_reference(&target, &id).await? {
        Some(doc) => Ok(traversal::get_path(&doc, nested)
            .map(formatter::format_value)
            .unwrap_or_default()),
        None => Ok(String::new()),
    }
}

/// Target collection for an expansion field: the base field's confirmed
/// relationship, or the expansion field's own if the base is not listed.
fn expansion_target(
    field: &FieldConfiguration,
    base: &str,
    all_fields: &[FieldConfiguration],
) -> Option<String> {
    all_fields
        .iter()
        .find(|f| f.field_path == base)
        .and_then(|f| f.relationship_target.clone())
        .or_else(|| field.relationship_target.clone())
}

/* ========================= Scalar identifiers ========================= */

async fn resolve_scalar_identifier(
    field: &FieldConfiguration,
    id: ObjectId,
    all_fields: &[FieldConfiguration],
    lookup: &mut dyn ReferenceLookup,
) -> Result<String> {
    // Expansion children need the identifier itself, so the base field
    // must never emit a display string in their presence.
    if field.has_expansion_children(all_fields) {
        return Ok(id.to_hex());
    }

    let Some(target) = field.relationship_target.as_deref() else {
        return Ok(id.to_hex());
    };

    match lookup.lookup_reference(target, &id).await? {
        Some(doc) => Ok(formatter::display_string(&doc).unwrap_or_else(|| id.to_hex())),
        None => Ok(id.to_hex()),
    }
}

/* ========================= Array list mode ========================= */

async fn resolve_array(
    items: &[Bson],
    config: &ArrayConfig,
    lookup: &mut dyn ReferenceLookup,
) -> Result<String> {
    let mut values = Vec::new();
    for element in items {
        if let Some(display) = element_display(element, config, lookup).await? {
            values.push(display);
        }
    }
    if values.is_empty() {
        return Ok(String::new());
    }

    // Dedup and ordering apply before the display-mode split, so first
    // mode returns the head of the sorted list, not the source head.
    let mut seen = HashSet::new();
    let mut unique: Vec<String> = values
        .into_iter()
        .filter(|v| seen.insert(v.clone()))
        .collect();
    sort_values(&mut unique, config.sort_order);

    match config.display_mode {
        DisplayMode::First => Ok(unique.into_iter().next().unwrap_or_default()),
        DisplayMode::CommaSeparated => Ok(unique.join(&config.delimiter)),
    }
}

fn sort_values(values: &mut [String], order: SortOrder) {
    match order {
        SortOrder::Alphanumeric => values.sort(),
        SortOrder::Numeric => values.sort_by(|a, b| {
            match (a.parse::<f64>(), b.parse::<f64>()) {
                (Ok(x), Ok(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
                _ => a.cmp(b),
            }
        }),
        SortOrder::None => {}
    }
}

async fn element_display(
    element: &Bson,
    config: &ArrayConfig,
    lookup: &mut dyn ReferenceLookup,
) -> Result<Option<String>> {
    let display = match element {
        Bson::ObjectId(id) => match config.reference_collection.as_deref() {
            Some(target) => {
                referenced_display(lookup, target, id, config.extract_field.as_deref())
                    .await?
            }
            None => id.to_hex(),
        },
        Bson::Document(doc) => {
            let reference = config
                .reference_field
                .as_deref()
                .zip(config.reference_collection.as_deref())
                .and_then(|(ref_field, target)| {
                    doc.get_object_id(ref_field).ok().map(|id| (target, id))
                });
            match reference {
                Some((target, id)) => {
                    referenced_display(lookup, target, &id, config.extract_field.as_deref())
                        .await?
                }
                None => direct_object_display(doc, config),
            }
        }
        other => formatter::format_value(other),
    };

    Ok(if display.is_empty() { None } else { Some(display) })
}

fn direct_object_display(doc: &Document, config: &ArrayConfig) -> String {
    if let Some(extract) = config.extract_field.as_deref() {
        if let Some(value) = traversal::get_path(doc, extract) {
            let cell = formatter::format_value(value);
            if !cell.is_empty() {
                return cell;
            }
        }
    }
    formatter::display_string(doc).unwrap_or_default()
}

async fn referenced_display(
    lookup: &mut dyn ReferenceLookup,
    target: &str,
    id: &ObjectId,
    extract_field: Option<&str>,
) -> Result<String> {
    match lookup.lookup_reference(target, id).await? {
        Some(doc) => {
            if let Some(extract) = extract_field {
                if let Some(value) = traversal::get_path(&doc, extract) {
                    let cell = formatter::format_value(value);
                    if !cell.is_empty() {
                        return Ok(cell);
                    }
                }
            }
            Ok(formatter::display_string(&doc).unwrap_or_else(|| id.to_hex()))
        }
        None => Ok(id.to_hex()),
    }
}

/* ========================= Batch pre-scan ========================= */

/// Collect every identifier a document's configured fields will need,
/// grouped by target collection. Run over a whole batch before
/// resolution so each target collection gets one batched load.
pub fn collect_reference_ids(
    document: &Document,
    fields: &[FieldConfiguration],
) -> HashMap<String, HashSet<ObjectId>> {
    let mut needed: HashMap<String, HashSet<ObjectId>> = HashMap::new();
    let mut note = |target: &str, id: ObjectId| {
        needed.entry(target.to_string()).or_default().insert(id);
    };

    for field in fields.iter().filter(|f| f.include) {
        if let Some((base, _)) = split_expansion_path(&field.field_path) {
            if let Some(target) = expansion_target(field, base, fields) {
                match traversal::get_path(document, base) {
                    Some(Bson::ObjectId(id)) => note(&target, *id),
                    Some(Bson::Document(inner)) => {
                        if let Ok(id) = inner.get_object_id("_id") {
                            note(&target, id);
                        }
                    }
                    _ => {}
                }
            }
            continue;
        }

        if field.extraction_mode == Some(ExtractionMode::Primary) {
            let target = field.relationship_target.as_deref().or_else(|| {
                field
                    .array_config
                    .as_ref()
                    .and_then(|a| a.reference_collection.as_deref())
            });
            if let Some(target) = target {
                let base = field
                    .source_field
                    .as_deref()
                    .or_else(|| split_primary_path(&field.field_path).map(|(b, _)| b));
                if let Some(Bson::Array(items)) =
                    base.and_then(|b| traversal::get_path(document, b))
                {
                    if let Some(Bson::ObjectId(id)) = items.first() {
                        note(target, *id);
                    }
                }
            }
            continue;
        }
        if field.extraction_mode.is_some() {
            continue;
        }

        match traversal::get_path(document, &field.field_path) {
            Some(Bson::ObjectId(id)) => {
                if let Some(target) = field.relationship_target.as_deref() {
                    note(target, *id);
                }
            }
            Some(Bson::Array(items)) => {
                let Some(config) = &field.array_config else {
                    continue;
                };
                let Some(target) = config.reference_collection.as_deref() else {
                    continue;
                };
                for element in items {
                    match element {
                        Bson::ObjectId(id) => note(target, *id),
                        Bson::Document(doc) => {
                            if let Some(ref_field) = config.reference_field.as_deref() {
                                if let Ok(id) = doc.get_object_id(ref_field) {
                                    note(target, id);
                                }
                            }
                        }
                        _ => {}
                    }
                }
            }
            _ => {}
        }
    }

    needed
}
