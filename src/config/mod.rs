//! Configuration management for mongotab
//!
//! Two kinds of configuration live here:
//! - The persisted discovery configuration (JSON): every discovered field
//!   with statistics and array settings, written by the discovery engine,
//!   hand-editable, and loaded unmodified by the export engine.
//! - Connection settings (TOML file or CLI flags), with CLI taking
//!   precedence over the file and the file over built-in defaults.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};
use crate::traversal::DataType;

/* ========================= Persisted discovery model ========================= */

/// Root configuration produced by a discovery run.
///
/// Contains all discovered fields (included and excluded, so a user can
/// flip `include` by hand), the collections needed for reference
/// resolution, and export settings. The export engine loads this file
/// as-is and never regenerates or drops fields from it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryConfiguration {
    /// Source collection name.
    pub collection: String,

    /// When the discovery run completed.
    pub discovered_at: DateTime<Utc>,

    /// Parameters the discovery ran with.
    pub discovery_parameters: DiscoveryParameters,

    /// Every discovered field, included or not.
    #[serde(default)]
    pub fields: Vec<FieldConfiguration>,

    /// Collections referenced by relationship or expansion fields.
    /// Drives pre-caching during export.
    #[serde(default)]
    pub required_collections: Vec<String>,

    /// Export-phase settings.
    pub export_settings: ExportSettings,
}

/// Parameters controlling a discovery run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryParameters {
    /// Maximum number of documents to sample.
    #[serde(default = "default_sample_size")]
    pub sample_size: u64,

    /// Maximum nesting depth for document traversal.
    #[serde(default = "default_expansion_depth")]
    pub expansion_depth: usize,

    /// Minimum distinct non-null values for a field to be included.
    #[serde(default = "default_min_distinct")]
    pub min_distinct_non_null_values: usize,

    /// Whether allowlisted business identifiers are force-included.
    #[serde(default = "default_include_business_ids")]
    pub include_business_ids: bool,
}

/// Export-phase settings persisted alongside the field list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportSettings {
    /// Documents per batch read from the source cursor.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Use business names as column headers instead of raw field paths.
    #[serde(default = "default_use_business_names")]
    pub use_business_names: bool,
}

/// Configuration for a single discovered field.
///
/// Everything the export engine needs to resolve and format one column.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldConfiguration {
    /// Dot-delimited path into the source document. Synthetic fields use
    /// `<array>[count]` and `<array>[primary].<field>` suffixes, and
    /// expansion fields use `<base>_expanded.<nested>`.
    pub field_path: String,

    /// Human-readable column label.
    pub business_name: String,

    /// Collection the field was discovered in.
    pub source_collection: String,

    /// Inferred type, first-seen across samples.
    pub data_type: DataType,

    /// Whether the field appears in the export.
    #[serde(default = "default_include")]
    pub include: bool,

    /// Target collection for identifier references.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relationship_target: Option<String>,

    /// Discovery statistics, kept so a user editing the file can judge
    /// whether to re-include an excluded field.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub statistics: Option<FieldStatistics>,

    /// Array flattening settings, present for array fields only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub array_config: Option<ArrayConfig>,

    /// Synthetic extraction mode (count or primary), if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extraction_mode: Option<ExtractionMode>,

    /// The array field a synthetic count/primary field derives from.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_field: Option<String>,
}

/// Per-field statistics gathered during discovery.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldStatistics {
    pub distinct_non_null_values: usize,
    pub null_count: u64,
    pub total_occurrences: u64,

    /// Bounded set of observed values, stringified.
    #[serde(default)]
    pub sample_values: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg_array_length: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_array_length: Option<usize>,

    /// Samples whose type disagreed with the first-seen type.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub type_conflicts: u64,
}

fn is_zero(n: &u64) -> bool {
    *n == 0
}

/// What kind of elements an array holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectType {
    /// Bare ObjectId references.
    Identifier,
    /// Nested documents.
    Object,
    /// Plain scalar values.
    Scalar,
}

/// How a multi-valued field is flattened into one cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisplayMode {
    /// Deduplicate, sort, and join with the configured delimiter.
    CommaSeparated,
    /// Keep only the first element.
    First,
}

/// Ordering applied to list-mode output before joining.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Alphanumeric,
    Numeric,
    None,
}

/// Synthetic field derivation from an array field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractionMode {
    /// Element count of the source array.
    Count,
    /// Named attribute of the first element.
    Primary,
}

/// Flattening configuration for an array-valued field.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArrayConfig {
    /// Element kind.
    pub object_type: ObjectType,

    /// Collection the elements (or their reference field) point into.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference_collection: Option<String>,

    /// For object arrays, the nested field holding the identifier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference_field: Option<String>,

    /// Field of the referenced or nested document to display.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extract_field: Option<String>,

    #[serde(default = "default_display_mode")]
    pub display_mode: DisplayMode,

    #[serde(default = "default_sort_order")]
    pub sort_order: SortOrder,

    #[serde(default = "default_delimiter")]
    pub delimiter: String,

    /// Display-safe fields seen on referenced/nested documents, kept so a
    /// user can re-point `extractField` by hand.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub available_fields: Vec<String>,
}

// Default value functions
fn default_sample_size() -> u64 {
    10_000
}

fn default_expansion_depth() -> usize {
    3
}

fn default_min_distinct() -> usize {
    2
}

fn default_include_business_ids() -> bool {
    true
}

fn default_batch_size() -> usize {
    5_000
}

fn default_use_business_names() -> bool {
    true
}

fn default_include() -> bool {
    true
}

fn default_display_mode() -> DisplayMode {
    DisplayMode::CommaSeparated
}

fn default_sort_order() -> SortOrder {
    SortOrder::Alphanumeric
}

fn default_delimiter() -> String {
    ", ".to_string()
}

impl Default for DiscoveryParameters {
    fn default() -> Self {
        Self {
            sample_size: default_sample_size(),
            expansion_depth: default_expansion_depth(),
            min_distinct_non_null_values: default_min_distinct(),
            include_business_ids: default_include_business_ids(),
        }
    }
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            use_business_names: default_use_business_names(),
        }
    }
}

impl Default for ArrayConfig {
    fn default() -> Self {
        Self {
            object_type: ObjectType::Scalar,
            reference_collection: None,
            reference_field: None,
            extract_field: None,
            display_mode: default_display_mode(),
            sort_order: default_sort_order(),
            delimiter: default_delimiter(),
            available_fields: Vec::new(),
        }
    }
}

impl FieldConfiguration {
    /// Create a new configuration for a field path with defaults.
    pub fn new(field_path: &str, source_collection: &str, data_type: DataType) -> Self {
        Self {
            field_path: field_path.to_string(),
            business_name: business_name(field_path),
            source_collection: source_collection.to_string(),
            data_type,
            include: true,
            relationship_target: None,
            statistics: None,
            array_config: None,
            extraction_mode: None,
            source_field: None,
        }
    }

    /// Whether this field has expansion children in `fields`.
    ///
    /// A base field with `<path>_expanded.*` children must export its raw
    /// identifier instead of a display value, because the expansion paths
    /// need the identifier to resolve.
    pub fn has_expansion_children(&self, fields: &[FieldConfiguration]) -> bool {
        let prefix = format!("{}_expanded.", self.field_path);
        fields
            .iter()
            .any(|f| f.include && f.field_path.starts_with(&prefix))
    }
}

impl DiscoveryConfiguration {
    /// Create an empty configuration for a collection, timestamped now.
    pub fn new(collection: &str) -> Self {
        Self {
            collection: collection.to_string(),
            discovered_at: Utc::now(),
            discovery_parameters: DiscoveryParameters::default(),
            fields: Vec::new(),
            required_collections: Vec::new(),
            export_settings: ExportSettings::default(),
        }
    }

    /// Conventional configuration file path for a collection.
    pub fn config_file(collection: &str) -> PathBuf {
        PathBuf::from("config").join(format!("{collection}_fields.json"))
    }

    /// Save as pretty-printed JSON.
    ///
    /// # Arguments
    /// * `path` - Destination file; parent directories are created
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Load a configuration from a JSON file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()).into());
        }
        let json = std::fs::read_to_string(path)?;
        let config: DiscoveryConfiguration = serde_json::from_str(&json)?;
        Ok(config)
    }

    /// Find a field configuration by path.
    pub fn find_field(&self, field_path: &str) -> Option<&FieldConfiguration> {
        self.fields.iter().find(|f| f.field_path == field_path)
    }

    /// All fields flagged for export.
    pub fn included_fields(&self) -> Vec<&FieldConfiguration> {
        self.fields.iter().filter(|f| f.include).collect()
    }

    /// Record a collection needed for reference resolution, once.
    pub fn add_required_collection(&mut self, name: &str) {
        if !self.required_collections.iter().any(|c| c == name) {
            self.required_collections.push(name.to_string());
        }
    }
}

/* ========================= Business names ========================= */

/// Static field-path to column-label mappings for common fields.
/// Anything not listed falls back to camelCase/underscore splitting.
const FIELD_LABELS: &[(&str, &str)] = &[
    ("_id", "Record ID"),
    ("__v", "Version"),
    ("createdAt", "Created At"),
    ("updatedAt", "Updated At"),
    ("lastModified", "Last Modified"),
    ("name", "Name"),
    ("fullName", "Full Name"),
    ("displayName", "Display Name"),
    ("title", "Title"),
    ("description", "Description"),
    ("status", "Status"),
    ("email", "Email"),
    ("phone", "Phone"),
    ("fullAddress", "Full Address"),
    ("streetAddress", "Street Address"),
    ("city", "City"),
    ("state", "State"),
    ("zipCode", "ZIP Code"),
    ("postalCode", "Postal Code"),
    ("country", "Country"),
    ("mlsNumber", "MLS Number"),
    ("listingId", "Listing ID"),
    ("transactionId", "Transaction ID"),
    ("orderId", "Order ID"),
    ("accountNumber", "Account Number"),
    ("notes", "Notes"),
];

/// Derive a human-readable column label from a field path.
///
/// Expansion markers are stripped before lookup, so an expanded field is
/// labeled like the plain nested path would be. Synthetic count/primary
/// suffixes get explicit labels.
pub fn business_name(field_path: &str) -> String {
    if let Some(base) = field_path.strip_suffix("[count]") {
        return format!("{} Count", business_name(base));
    }
    if let Some(pos) = field_path.find("[primary].") {
        let base = &field_path[..pos];
        let rest = &field_path[pos + "[primary].".len()..];
        return format!("{} Primary {}", business_name(base), business_name(rest));
    }

    let clean = field_path.replace("_expanded", "");

    if let Some((_, label)) = FIELD_LABELS.iter().find(|(k, _)| *k == clean) {
        return label.to_string();
    }

    clean
        .split('.')
        .map(|segment| {
            FIELD_LABELS
                .iter()
                .find(|(k, _)| *k == segment)
                .map(|(_, label)| label.to_string())
                .unwrap_or_else(|| words_from_segment(segment))
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Split a camelCase or snake_case path segment into capitalized words.
fn words_from_segment(segment: &str) -> String {
    let mut words: Vec<String> = Vec::new();
    let mut current = String::new();

    for ch in segment.chars() {
        if ch == '_' || ch == '-' {
            if !current.is_empty() {
                words.push(std::mem::take(&mut current));
            }
        } else if ch.is_uppercase() && !current.is_empty() {
            words.push(std::mem::take(&mut current));
            current.push(ch);
        } else {
            current.push(ch);
        }
    }
    if !current.is_empty() {
        words.push(current);
    }

    words
        .iter()
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/* ========================= Connection settings ========================= */

/// Connection settings from the TOML config file.
///
/// Precedence (highest first): CLI flags, this file, built-in defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionSettings {
    /// MongoDB connection URI.
    #[serde(default = "default_uri")]
    pub uri: String,

    /// Default database name.
    #[serde(default)]
    pub database: Option<String>,
}

fn default_uri() -> String {
    "mongodb://localhost:27017".to_string()
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            uri: default_uri(),
            database: None,
        }
    }
}

impl ConnectionSettings {
    /// Default configuration file path (`~/.mongotab/config.toml`).
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".mongotab")
            .join("config.toml")
    }

    /// Load settings from a TOML file, or defaults if the file is absent.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)?;
        let settings: ConnectionSettings = toml::from_str(&contents)
            .map_err(|e| ConfigError::InvalidFormat(e.to_string()))?;
        Ok(settings)
    }

    /// Apply CLI overrides on top of the file settings.
    pub fn with_overrides(mut self, uri: Option<String>, database: Option<String>) -> Self {
        if let Some(uri) = uri {
            self.uri = uri;
        }
        if database.is_some() {
            self.database = database;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_config() -> DiscoveryConfiguration {
        let mut config = DiscoveryConfiguration::new("listings");
        config.fields.push(FieldConfiguration::new(
            "mlsNumber",
            "listings",
            DataType::String,
        ));
        let mut excluded =
            FieldConfiguration::new("__v", "listings", DataType::Number);
        excluded.include = false;
        config.fields.push(excluded);
        config
    }

    #[test]
    fn test_included_fields_filters_excluded() {
        let config = sample_config();
        let included = config.included_fields();
        assert_eq!(included.len(), 1);
        assert_eq!(included[0].field_path, "mlsNumber");
    }

    #[test]
    fn test_add_required_collection_dedupes() {
        let mut config = sample_config();
        config.add_required_collection("agents");
        config.add_required_collection("agents");
        config.add_required_collection("brokerages");
        assert_eq!(config.required_collections, vec!["agents", "brokerages"]);
    }

    #[test]
    fn test_json_round_trip_uses_camel_case_keys() {
        let config = sample_config();
        let json = serde_json::to_string_pretty(&config).unwrap();
        assert!(json.contains("\"fieldPath\""));
        assert!(json.contains("\"businessName\""));
        assert!(json.contains("\"requiredCollections\""));
        assert!(json.contains("\"discoveryParameters\""));

        let parsed: DiscoveryConfiguration = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.collection, "listings");
        assert_eq!(parsed.fields.len(), 2);
        assert_eq!(parsed.discovery_parameters.sample_size, 10_000);
        assert_eq!(parsed.export_settings.batch_size, 5_000);
    }

    #[test]
    fn test_array_config_defaults() {
        let array = ArrayConfig::default();
        assert_eq!(array.display_mode, DisplayMode::CommaSeparated);
        assert_eq!(array.sort_order, SortOrder::Alphanumeric);
        assert_eq!(array.delimiter, ", ");
    }

    #[test]
    fn test_has_expansion_children() {
        let mut config = sample_config();
        let mut base =
            FieldConfiguration::new("listingAgent", "listings", DataType::Identifier);
        base.relationship_target = Some("agents".to_string());
        config.fields.push(base);
        config.fields.push(FieldConfiguration::new(
            "listingAgent_expanded.fullName",
            "listings",
            DataType::String,
        ));

        let base = config.find_field("listingAgent").unwrap();
        assert!(base.has_expansion_children(&config.fields));

        let plain = config.find_field("mlsNumber").unwrap();
        assert!(!plain.has_expansion_children(&config.fields));
    }

    #[test]
    fn test_business_name_table_and_fallback() {
        assert_eq!(business_name("_id"), "Record ID");
        assert_eq!(business_name("mlsNumber"), "MLS Number");
        assert_eq!(business_name("daysOnMarket"), "Days On Market");
        assert_eq!(business_name("listing_agent"), "Listing Agent");
        assert_eq!(business_name("address.city"), "Address City");
    }

    #[test]
    fn test_business_name_synthetic_and_expanded() {
        assert_eq!(business_name("agents[count]"), "Agents Count");
        assert_eq!(
            business_name("agents[primary].fullName"),
            "Agents Primary Full Name"
        );
        assert_eq!(
            business_name("listingAgent_expanded.fullName"),
            "Listing Agent Full Name"
        );
    }

    #[test]
    fn test_connection_settings_defaults() {
        let settings = ConnectionSettings::default();
        assert_eq!(settings.uri, "mongodb://localhost:27017");
        assert!(settings.database.is_none());
    }

    #[test]
    fn test_connection_settings_overrides() {
        let settings = ConnectionSettings::default().with_overrides(
            Some("mongodb://db.example.com:27017".to_string()),
            Some("prod".to_string()),
        );
        assert_eq!(settings.uri, "mongodb://db.example.com:27017");
        assert_eq!(settings.database.as_deref(), Some("prod"));
    }
}
