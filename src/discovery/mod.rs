//! Schema and relationship discovery
//!
//! Samples the target collection, builds per-field statistics through
//! document traversal, probes identifier-shaped fields for their target
//! collections, expands confirmed references one level to find fields
//! that only exist inside referenced documents, and emits a field
//! configuration list with inclusion flags applied.

pub mod filter;
pub mod prober;

use std::collections::{BTreeSet, HashMap, HashSet};

use bson::{oid::ObjectId, Bson, Document};
use futures::TryStreamExt;
use mongodb::Database;
use tracing::{debug, info};

use crate::cache::{CollectionCacheManager, ReferenceLookup};
use crate::config::{
    business_name, ArrayConfig, DiscoveryConfiguration, DiscoveryParameters, ExtractionMode,
    FieldConfiguration, FieldStatistics, ObjectType,
};
use crate::error::{DiscoveryError, Result};
use crate::formatter;
use crate::traversal::{self, DataType};
use filter::FieldFilter;
use prober::{ProbeOutcome, RelationshipProber};

/// Cap on stringified sample values kept per field for distinct-count
/// estimation.
const MAX_SAMPLE_VALUES: usize = 100;

/// Sample identifiers kept per array field for probing.
const MAX_ARRAY_SAMPLE_IDS: usize = 10;

/// Sample identifiers kept per scalar identifier field for probing.
const MAX_SCALAR_SAMPLE_IDS: usize = 5;

/// Synthetic `[primary]` extraction fields generated per array.
const MAX_PRIMARY_FIELDS: usize = 4;

/// Sample values persisted into the configuration file per field.
const PERSISTED_SAMPLE_VALUES: usize = 5;

/// Attribute names preferred as an array's extract field, in order.
const PREFERRED_EXTRACT_FIELDS: &[&str] = &[
    "name",
    "fullName",
    "displayName",
    "title",
    "description",
    "value",
    "label",
    "text",
];

/// Running statistics for one discovered field path. Transient; folded
/// into a [`FieldConfiguration`] at the end of the run.
#[derive(Debug, Default)]
struct FieldMetadata {
    data_type: Option<DataType>,
    sample_values: BTreeSet<String>,
    null_count: u64,
    total_occurrences: u64,
    array_lengths: Vec<usize>,
    sample_ids: Vec<ObjectId>,
    type_conflicts: u64,
}

impl FieldMetadata {
    /// Fold one observed value into the statistics.
    fn record(&mut self, value: &Bson) {
        self.total_occurrences += 1;

        if traversal::is_empty_value(value) {
            self.null_count += 1;
            return;
        }

        if let Some(observed) = DataType::classify(value) {
            match self.data_type {
                None => self.data_type = Some(observed),
                Some(first) if first != observed => self.type_conflicts += 1,
                Some(_) => {}
            }
        }

        if self.sample_values.len() < MAX_SAMPLE_VALUES {
            let rendered = formatter::format_value(value);
            if !rendered.is_empty() {
                self.sample_values.insert(rendered);
            }
        }

        match value {
            Bson::ObjectId(id) => {
                if self.sample_ids.len() < MAX_SCALAR_SAMPLE_IDS {
                    self.sample_ids.push(*id);
                }
            }
            Bson::Array(items) => self.array_lengths.push(items.len()),
            _ => {}
        }
    }

    fn statistics(&self) -> FieldStatistics {
        let (avg, max) = if self.array_lengths.is_empty() {
            (None, None)
        } else {
            let sum: usize = self.array_lengths.iter().sum();
            (
                Some(sum as f64 / self.array_lengths.len() as f64),
                self.array_lengths.iter().max().copied(),
            )
        };
        FieldStatistics {
            distinct_non_null_values: self.sample_values.len(),
            null_count: self.null_count,
            total_occurrences: self.total_occurrences,
            sample_values: self
                .sample_values
                .iter()
                .take(PERSISTED_SAMPLE_VALUES)
                .cloned()
                .collect(),
            avg_array_length: avg,
            max_array_length: max,
            type_conflicts: self.type_conflicts,
        }
    }
}

/// Element-structure analysis for one array field path. Transient; used
/// only to populate the array's export configuration.
#[derive(Debug, Default)]
struct ArrayInternals {
    element_type: Option<ObjectType>,
    reference_field: Option<String>,
    sample_ids: Vec<ObjectId>,
    field_names: BTreeSet<String>,
    target: Option<String>,
}

impl ArrayInternals {
    /// Fold one non-empty array's elements into the analysis.
    fn analyze(&mut self, items: &[Bson]) {
        for element in items {
            match element {
                Bson::ObjectId(id) => {
                    self.element_type.get_or_insert(ObjectType::Identifier);
                    if self.sample_ids.len() < MAX_ARRAY_SAMPLE_IDS {
                        self.sample_ids.push(*id);
                    }
                }
                Bson::Document(doc) => {
                    self.element_type.get_or_insert(ObjectType::Object);
                    for key in doc.keys() {
                        self.field_names.insert(key.clone());
                    }
                    if self.reference_field.is_none() {
                        if let Some((key, id)) = find_reference_field(doc) {
                            self.reference_field = Some(key);
                            if self.sample_ids.len() < MAX_ARRAY_SAMPLE_IDS {
                                self.sample_ids.push(id);
                            }
                        }
                    } else if let Some(key) = self.reference_field.as_deref() {
                        if let Ok(id) = doc.get_object_id(key) {
                            if self.sample_ids.len() < MAX_ARRAY_SAMPLE_IDS {
                                self.sample_ids.push(id);
                            }
                        }
                    }
                }
                _ => {
                    self.element_type.get_or_insert(ObjectType::Scalar);
                }
            }
        }
    }

    /// Best-guess display field for element documents: a preferred name
    /// if present, else the first display-safe field.
    fn best_extract_field(&self) -> Option<String> {
        for preferred in PREFERRED_EXTRACT_FIELDS {
            if self.field_names.contains(*preferred) {
                return Some((*preferred).to_string());
            }
        }
        self.field_names
            .iter()
            .find(|name| self.offerable(name))
            .cloned()
    }

    /// Display-safe element fields, sorted, offered to the user as
    /// alternative extract fields.
    fn available_fields(&self) -> Vec<String> {
        self.field_names
            .iter()
            .filter(|name| self.offerable(name))
            .cloned()
            .collect()
    }

    /// The reference field carries raw identifiers and is never offered
    /// as display data.
    fn offerable(&self, name: &str) -> bool {
        formatter::is_display_safe_field(name) && self.reference_field.as_deref() != Some(name)
    }
}

/// Whether a scalar identifier path is worth probing for a relationship.
/// The primary key and version counter are structural, never references.
fn is_probeable_identifier_path(path: &str) -> bool {
    !matches!(traversal::last_segment(path), "_id" | "__v")
}

/// First ObjectId-valued field of an element document, if any.
fn find_reference_field(doc: &Document) -> Option<(String, ObjectId)> {
    doc.iter().find_map(|(key, value)| match value {
        Bson::ObjectId(id) => Some((key.clone(), *id)),
        _ => None,
    })
}

/// Runs the discovery phases against one collection.
pub struct DiscoveryEngine {
    database: Database,
    collection: String,
    params: DiscoveryParameters,
}

impl DiscoveryEngine {
    pub fn new(database: Database, collection: &str, params: DiscoveryParameters) -> Self {
        Self {
            database,
            collection: collection.to_string(),
            params,
        }
    }

    /// Run all phases and return the configuration, filter applied.
    pub async fn discover(&self) -> Result<DiscoveryConfiguration> {
        let names = self.database.list_collection_names().await?;
        if !names.iter().any(|n| n == &self.collection) {
            return Err(DiscoveryError::CollectionNotFound(self.collection.clone()).into());
        }

        // Phase 1: sample and collect per-field statistics
        let (metadata, mut arrays, scanned) = self.sample_fields().await?;
        info!(
            collection = %self.collection,
            scanned,
            fields = metadata.len(),
            arrays = arrays.len(),
            "sampling complete"
        );

        // Phase 2: probe identifier fields and cache their targets
        let mut cache = CollectionCacheManager::new(self.database.clone(), &self.collection);
        let mut prober = RelationshipProber::new(self.database.clone(), &self.collection);
        let targets =
            self.probe_relationships(&metadata, &mut arrays, &mut prober, &mut cache).await?;

        // Phase 3: expand confirmed references one level over a smaller
        // re-sample to find fields that only exist in referenced documents
        let (expanded, expansion_scanned) =
            self.expand_references(&metadata, &targets, &mut cache).await?;
        info!(
            expansion_scanned,
            expanded_fields = expanded.len(),
            "expansion pass complete"
        );

        // Phase 4: materialize field configurations
        let mut config = DiscoveryConfiguration::new(&self.collection);
        config.discovery_parameters = self.params.clone();
        let mut base_fields = self.build_fields(&metadata, &arrays, &targets);
        let mut expanded_fields = self.build_expanded_fields(&expanded, &targets);

        for target in targets.values() {
            config.add_required_collection(target);
        }
        for internals in arrays.values() {
            if let Some(target) = &internals.target {
                config.add_required_collection(target);
            }
        }

        // Phase 5: inclusion policy. Expanded-field sparsity is judged
        // against the expansion scan, never an independent sample of the
        // target collection.
        let filter = FieldFilter::new(
            self.params.min_distinct_non_null_values,
            self.params.include_business_ids,
        );
        let included = filter.apply(&mut base_fields, scanned);
        let included_expanded = filter.apply(&mut expanded_fields, expansion_scanned);
        info!(
            included = included + included_expanded,
            total = base_fields.len() + expanded_fields.len(),
            "filter applied"
        );

        config.fields = base_fields;
        config.fields.extend(expanded_fields);
        config.fields.sort_by(|a, b| a.field_path.cmp(&b.field_path));
        Ok(config)
    }

    /* ===== phase 1: sampling ===== */

    async fn sample_fields(
        &self,
    ) -> Result<(HashMap<String, FieldMetadata>, HashMap<String, ArrayInternals>, u64)> {
        let collection = self.database.collection::<Document>(&self.collection);
        let mut cursor = collection
            .find(bson::doc! {})
            .limit(self.params.sample_size as i64)
            .await
            .map_err(|e| DiscoveryError::SamplingFailed(e.to_string()))?;

        let mut metadata: HashMap<String, FieldMetadata> = HashMap::new();
        let mut arrays: HashMap<String, ArrayInternals> = HashMap::new();
        let mut scanned = 0u64;

        while let Some(document) = cursor
            .try_next()
            .await
            .map_err(|e| DiscoveryError::SamplingFailed(e.to_string()))?
        {
            scanned += 1;
            traversal::walk_document(
                &document,
                self.params.expansion_depth,
                &mut |path, value, _depth| {
                    metadata.entry(path.to_string()).or_default().record(value);
                    if let Bson::Array(items) = value {
                        if !items.is_empty() {
                            arrays.entry(path.to_string()).or_default().analyze(items);
                        }
                    }
                },
            );
        }

        Ok((metadata, arrays, scanned))
    }

    /* ===== phase 2: probing ===== */

    /// Probe scalar identifier fields and array identifiers, cache every
    /// confirmed target, and return the confirmed target per field path.
    async fn probe_relationships(
        &self,
        metadata: &HashMap<String, FieldMetadata>,
        arrays: &mut HashMap<String, ArrayInternals>,
        prober: &mut RelationshipProber,
        cache: &mut CollectionCacheManager,
    ) -> Result<HashMap<String, String>> {
        let mut targets: HashMap<String, String> = HashMap::new();
        let mut confirmed: HashSet<String> = HashSet::new();

        let mut scalar_paths: Vec<&String> = metadata
            .iter()
            .filter(|(path, m)| {
                m.data_type == Some(DataType::Identifier)
                    && !m.sample_ids.is_empty()
                    && is_probeable_identifier_path(path)
            })
            .map(|(path, _)| path)
            .collect();
        scalar_paths.sort();

        for path in scalar_paths {
            let field_name = traversal::last_segment(path);
            let meta = &metadata[path];
            match prober
                .resolve_target_collection(field_name, &meta.sample_ids)
                .await?
            {
                ProbeOutcome::Confirmed(target) => {
                    targets.insert(path.clone(), target.clone());
                    confirmed.insert(target);
                }
                ProbeOutcome::Suggested(target) => {
                    info!(field = %path, suggested = %target, "unconfirmed target suggestion");
                }
                ProbeOutcome::NoMatch => {
                    debug!(field = %path, "no relationship target found");
                }
            }
        }

        let mut array_paths: Vec<String> = arrays.keys().cloned().collect();
        array_paths.sort();
        for path in array_paths {
            let Some(internals) = arrays.get(&path) else { continue };
            if internals.sample_ids.is_empty() {
                continue;
            }
            let probe_name = internals
                .reference_field
                .clone()
                .unwrap_or_else(|| traversal::last_segment(&path).to_string());
            let sample_ids = internals.sample_ids.clone();
            match prober
                .resolve_target_collection(&probe_name, &sample_ids)
                .await?
            {
                ProbeOutcome::Confirmed(target) => {
                    confirmed.insert(target.clone());
                    if let Some(internals) = arrays.get_mut(&path) {
                        internals.target = Some(target);
                    }
                }
                ProbeOutcome::Suggested(target) => {
                    info!(field = %path, suggested = %target, "unconfirmed target suggestion");
                }
                ProbeOutcome::NoMatch => {}
            }
        }

        for target in &confirmed {
            cache.cache_collection(target).await?;
        }
        Ok(targets)
    }

    /* ===== phase 3: expansion ===== */

    fn expansion_sample_size(&self) -> u64 {
        (self.params.sample_size / 10).clamp(100, 1_000)
    }

    /// Re-sample and expand each confirmed reference one level, walking
    /// the referenced document under `<base>_expanded.` paths. Occurrence
    /// counts here come only from actual successful expansions.
    async fn expand_references(
        &self,
        metadata: &HashMap<String, FieldMetadata>,
        targets: &HashMap<String, String>,
        cache: &mut CollectionCacheManager,
    ) -> Result<(HashMap<String, FieldMetadata>, u64)> {
        let mut expanded: HashMap<String, FieldMetadata> = HashMap::new();
        if targets.is_empty() {
            return Ok((expanded, 0));
        }

        let collection = self.database.collection::<Document>(&self.collection);
        let mut cursor = collection
            .find(bson::doc! {})
            .limit(self.expansion_sample_size() as i64)
            .await
            .map_err(|e| DiscoveryError::SamplingFailed(e.to_string()))?;

        let mut scanned = 0u64;
        while let Some(document) = cursor
            .try_next()
            .await
            .map_err(|e| DiscoveryError::SamplingFailed(e.to_string()))?
        {
            scanned += 1;
            for (base, target) in targets {
                if metadata.get(base).is_none() {
                    continue;
                }
                let Some(Bson::ObjectId(id)) = traversal::get_path(&document, base) else {
                    continue;
                };
                let Some(resolved) = cache.lookup_reference(target, id).await? else {
                    continue;
                };
                traversal::walk_document(
                    &resolved,
                    self.params.expansion_depth,
                    &mut |nested, value, _depth| {
                        if nested == "_id" {
                            return;
                        }
                        let path = format!("{base}_expanded.{nested}");
                        expanded.entry(path).or_default().record(value);
                    },
                );
            }
        }

        Ok((expanded, scanned))
    }

    /* ===== phase 4: configuration build ===== */

    fn build_fields(
        &self,
        metadata: &HashMap<String, FieldMetadata>,
        arrays: &HashMap<String, ArrayInternals>,
        targets: &HashMap<String, String>,
    ) -> Vec<FieldConfiguration> {
        let mut fields = Vec::new();

        let mut paths: Vec<&String> = metadata.keys().collect();
        paths.sort();

        for path in paths {
            let meta = &metadata[path];
            // All-null fields keep a string type so the configuration
            // stays loadable; the filter drops them anyway.
            let data_type = meta.data_type.unwrap_or(DataType::String);

            let mut field = FieldConfiguration::new(path, &self.collection, data_type);
            field.statistics = Some(meta.statistics());
            if let Some(target) = targets.get(path) {
                field.relationship_target = Some(target.clone());
            }

            if data_type == DataType::Array {
                let internals = arrays.get(path);
                field.array_config = Some(build_array_config(internals));
                let synthetic = build_synthetic_fields(path, &self.collection, internals);
                fields.push(field);
                fields.extend(synthetic);
            } else {
                fields.push(field);
            }
        }

        fields
    }

    fn build_expanded_fields(
        &self,
        expanded: &HashMap<String, FieldMetadata>,
        targets: &HashMap<String, String>,
    ) -> Vec<FieldConfiguration> {
        let mut paths: Vec<&String> = expanded.keys().collect();
        paths.sort();

        paths
            .into_iter()
            .map(|path| {
                let meta = &expanded[path];
                let data_type = meta.data_type.unwrap_or(DataType::String);
                let mut field = FieldConfiguration::new(path, &self.collection, data_type);
                field.statistics = Some(meta.statistics());
                // Carry the base field's target so the export side can
                // resolve even if the base entry gets hand-edited away.
                if let Some((base, _)) = path.split_once("_expanded.") {
                    if let Some(target) = targets.get(base) {
                        field.relationship_target = Some(target.clone());
                    }
                }
                field
            })
            .collect()
    }
}

/// Array export configuration from the element analysis.
fn build_array_config(internals: Option<&ArrayInternals>) -> ArrayConfig {
    let Some(internals) = internals else {
        return ArrayConfig::default();
    };
    ArrayConfig {
        object_type: internals.element_type.unwrap_or(ObjectType::Scalar),
        reference_collection: internals.target.clone(),
        reference_field: internals.reference_field.clone(),
        extract_field: internals.best_extract_field(),
        available_fields: internals.available_fields(),
        ..Default::default()
    }
}

/// Synthetic count and primary-extraction fields for one array, excluded
/// by default; the user opts in by flipping `include`.
fn build_synthetic_fields(
    path: &str,
    source_collection: &str,
    internals: Option<&ArrayInternals>,
) -> Vec<FieldConfiguration> {
    let mut fields = Vec::new();

    let count_path = format!("{path}[count]");
    let mut count = FieldConfiguration::new(&count_path, source_collection, DataType::Number);
    count.extraction_mode = Some(ExtractionMode::Count);
    count.source_field = Some(path.to_string());
    count.business_name = business_name(&count_path);
    count.include = false;
    fields.push(count);

    if let Some(internals) = internals {
        for name in internals
            .available_fields()
            .into_iter()
            .take(MAX_PRIMARY_FIELDS)
        {
            let primary_path = format!("{path}[primary].{name}");
            let mut primary =
                FieldConfiguration::new(&primary_path, source_collection, DataType::String);
            primary.extraction_mode = Some(ExtractionMode::Primary);
            primary.source_field = Some(path.to_string());
            primary.relationship_target = internals.target.clone();
            primary.include = false;
            fields.push(primary);
        }
    }

    fields
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn test_metadata_first_seen_type_wins_and_conflicts_count() {
        let mut meta = FieldMetadata::default();
        meta.record(&Bson::Int32(5));
        meta.record(&Bson::String("five".into()));
        meta.record(&Bson::Int32(6));

        assert_eq!(meta.data_type, Some(DataType::Number));
        assert_eq!(meta.type_conflicts, 1);
        assert_eq!(meta.total_occurrences, 3);
        assert_eq!(meta.null_count, 0);
    }

    #[test]
    fn test_metadata_counts_empty_values_as_null() {
        let mut meta = FieldMetadata::default();
        meta.record(&Bson::Null);
        meta.record(&Bson::String("".into()));
        meta.record(&Bson::String("null".into()));
        meta.record(&Bson::String("value".into()));

        assert_eq!(meta.total_occurrences, 4);
        assert_eq!(meta.null_count, 3);
        let stats = meta.statistics();
        assert!(stats.total_occurrences >= stats.null_count);
        assert_eq!(stats.distinct_non_null_values, 1);
    }

    #[test]
    fn test_metadata_array_lengths() {
        let mut meta = FieldMetadata::default();
        meta.record(&Bson::Array(vec![Bson::Int32(1), Bson::Int32(2)]));
        meta.record(&Bson::Array(vec![Bson::Int32(1)]));
        meta.record(&Bson::Array(vec![]));

        let stats = meta.statistics();
        // The empty array counts as a null occurrence, not a length
        assert_eq!(stats.null_count, 1);
        assert_eq!(stats.max_array_length, Some(2));
        assert_eq!(stats.avg_array_length, Some(1.5));
    }

    #[test]
    fn test_primary_key_paths_are_not_probed() {
        assert!(!is_probeable_identifier_path("_id"));
        assert!(!is_probeable_identifier_path("address._id"));
        assert!(!is_probeable_identifier_path("__v"));
        assert!(is_probeable_identifier_path("listingAgent"));
        assert!(is_probeable_identifier_path("listingAgentId"));
    }

    #[test]
    fn test_array_internals_identifier_elements() {
        let mut internals = ArrayInternals::default();
        let id = ObjectId::new();
        internals.analyze(&[Bson::ObjectId(id), Bson::ObjectId(ObjectId::new())]);

        assert_eq!(internals.element_type, Some(ObjectType::Identifier));
        assert_eq!(internals.sample_ids.len(), 2);
        assert!(internals.sample_ids.contains(&id));
    }

    #[test]
    fn test_array_internals_object_elements_find_reference() {
        let mut internals = ArrayInternals::default();
        let id = ObjectId::new();
        internals.analyze(&[
            Bson::Document(doc! { "agent": id, "isPrimary": true }),
            Bson::Document(doc! { "agent": ObjectId::new(), "name": "x" }),
        ]);

        assert_eq!(internals.element_type, Some(ObjectType::Object));
        assert_eq!(internals.reference_field.as_deref(), Some("agent"));
        assert_eq!(internals.sample_ids.len(), 2);
        assert!(internals.field_names.contains("isPrimary"));
        assert!(internals.field_names.contains("name"));
    }

    #[test]
    fn test_array_internals_sample_ids_are_bounded() {
        let mut internals = ArrayInternals::default();
        let items: Vec<Bson> = (0..25).map(|_| Bson::ObjectId(ObjectId::new())).collect();
        internals.analyze(&items);
        assert_eq!(internals.sample_ids.len(), MAX_ARRAY_SAMPLE_IDS);
    }

    #[test]
    fn test_best_extract_field_prefers_name_like() {
        let mut internals = ArrayInternals::default();
        internals.analyze(&[Bson::Document(doc! {
            "agentId": ObjectId::new(),
            "zebra": "z",
            "name": "Ann",
        })]);
        assert_eq!(internals.best_extract_field().as_deref(), Some("name"));

        let mut internals = ArrayInternals::default();
        internals.analyze(&[Bson::Document(doc! {
            "agentId": ObjectId::new(),
            "city": "Oslo",
        })]);
        // No preferred name: first display-safe field, never an id
        assert_eq!(internals.best_extract_field().as_deref(), Some("city"));
    }

    #[test]
    fn test_synthetic_fields_excluded_by_default() {
        let mut internals = ArrayInternals::default();
        internals.target = Some("agents".to_string());
        internals.analyze(&[Bson::Document(doc! {
            "name": "Ann",
            "email": "a@example.com",
        })]);

        let synthetic = build_synthetic_fields("agents", "listings", Some(&internals));
        assert!(synthetic.iter().all(|f| !f.include));

        let count = synthetic
            .iter()
            .find(|f| f.field_path == "agents[count]")
            .unwrap();
        assert_eq!(count.extraction_mode, Some(ExtractionMode::Count));
        assert_eq!(count.source_field.as_deref(), Some("agents"));

        let primaries: Vec<&FieldConfiguration> = synthetic
            .iter()
            .filter(|f| f.extraction_mode == Some(ExtractionMode::Primary))
            .collect();
        assert!(!primaries.is_empty());
        assert!(primaries.len() <= MAX_PRIMARY_FIELDS);
        assert!(primaries
            .iter()
            .all(|f| f.relationship_target.as_deref() == Some("agents")));
    }

    #[test]
    fn test_build_array_config_carries_analysis() {
        let mut internals = ArrayInternals::default();
        internals.target = Some("agents".to_string());
        internals.analyze(&[Bson::Document(doc! {
            "agent": ObjectId::new(),
            "fullName": "J. Doe",
        })]);

        let config = build_array_config(Some(&internals));
        assert_eq!(config.object_type, ObjectType::Object);
        assert_eq!(config.reference_collection.as_deref(), Some("agents"));
        assert_eq!(config.reference_field.as_deref(), Some("agent"));
        assert_eq!(config.extract_field.as_deref(), Some("fullName"));
        assert_eq!(config.available_fields, vec!["fullName".to_string()]);
    }
}
