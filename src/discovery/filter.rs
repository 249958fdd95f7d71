//! Field inclusion policy
//!
//! Applied after discovery to set the `include` flag on every field
//! configuration. Excluded fields stay in the file with their statistics
//! so a user can flip them back on by hand.

use tracing::debug;

use crate::config::FieldConfiguration;
use crate::traversal;

/// Identifier-suffixed field names that carry business meaning and are
/// included whenever they have at least one non-null sample.
const BUSINESS_IDS: &[&str] = &[
    "mlsNumber",
    "listingId",
    "transactionId",
    "orderId",
    "contractNumber",
    "referenceNumber",
    "confirmationNumber",
    "invoiceNumber",
    "accountNumber",
    "caseNumber",
    "ticketId",
    "agentId",
];

/// Minimum share of scanned documents a field must appear in.
const DEFAULT_SPARSE_THRESHOLD: f64 = 0.05;

/// Whether a path segment is an identifier-suffixed name.
fn is_identifier_suffixed(segment: &str) -> bool {
    segment == "_id"
        || segment == "__v"
        || segment.ends_with("Id")
        || segment.ends_with("Ids")
        || segment.ends_with("_id")
        || segment.ends_with("ID")
}

fn is_business_id(segment: &str) -> bool {
    BUSINESS_IDS.contains(&segment)
}

/// Sets include flags over discovered fields.
///
/// Rules in order: allowlisted business identifiers are included when
/// non-empty; technical identifiers are excluded; everything else must
/// clear the sparsity and distinct-value thresholds. The distinct-value
/// floor is a heuristic over the discovery sample, not a guarantee about
/// the full population.
pub struct FieldFilter {
    min_distinct_non_null_values: usize,
    include_business_ids: bool,
    sparse_threshold: f64,
}

impl FieldFilter {
    pub fn new(min_distinct_non_null_values: usize, include_business_ids: bool) -> Self {
        Self {
            min_distinct_non_null_values,
            include_business_ids,
            sparse_threshold: DEFAULT_SPARSE_THRESHOLD,
        }
    }

    /// Set include flags in place. `documents_scanned` is the divisor for
    /// the presence ratio; for expansion fields the occurrence counts
    /// already come from actual observed expansions, so the same ratio
    /// applies.
    ///
    /// # Returns
    /// * `usize` - Number of fields left included
    pub fn apply(&self, fields: &mut [FieldConfiguration], documents_scanned: u64) -> usize {
        let mut included = 0;
        for field in fields.iter_mut() {
            // Synthetic count/primary fields keep the include flag their
            // generator set; the user opts in by hand.
            if field.extraction_mode.is_some() {
                if field.include {
                    included += 1;
                }
                continue;
            }

            field.include = self.should_include(field, documents_scanned);
            if field.include {
                included += 1;
            } else {
                debug!(field = %field.field_path, "excluded by filter");
            }
        }
        included
    }

    fn should_include(&self, field: &FieldConfiguration, documents_scanned: u64) -> bool {
        let segment = traversal::last_segment(&field.field_path);
        let stats = field.statistics.as_ref();
        let non_null = stats
            .map(|s| s.total_occurrences.saturating_sub(s.null_count))
            .unwrap_or(0);

        if self.include_business_ids && is_business_id(segment) {
            return non_null > 0;
        }

        if is_identifier_suffixed(segment) {
            return false;
        }

        if documents_scanned > 0 {
            let occurrences = stats.map(|s| s.total_occurrences).unwrap_or(0);
            let presence = occurrences as f64 / documents_scanned as f64;
            if presence < self.sparse_threshold {
                return false;
            }
        }

        let distinct = stats.map(|s| s.distinct_non_null_values).unwrap_or(0);
        distinct >= self.min_distinct_non_null_values
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FieldStatistics;
    use crate::traversal::DataType;

    fn field(path: &str, distinct: usize, nulls: u64, total: u64) -> FieldConfiguration {
        let mut f = FieldConfiguration::new(path, "listings", DataType::String);
        f.statistics = Some(FieldStatistics {
            distinct_non_null_values: distinct,
            null_count: nulls,
            total_occurrences: total,
            ..Default::default()
        });
        f
    }

    fn filter() -> FieldFilter {
        FieldFilter::new(2, true)
    }

    #[test]
    fn test_business_id_included_with_one_sample() {
        let mut fields = vec![field("mlsNumber", 1, 0, 1)];
        filter().apply(&mut fields, 100);
        assert!(fields[0].include);
    }

    #[test]
    fn test_business_id_excluded_when_all_null() {
        let mut fields = vec![field("mlsNumber", 0, 50, 50)];
        filter().apply(&mut fields, 100);
        assert!(!fields[0].include);
    }

    #[test]
    fn test_technical_identifiers_excluded() {
        let mut fields = vec![
            field("_id", 100, 0, 100),
            field("__v", 5, 0, 100),
            field("listingAgentId", 80, 0, 100),
            field("address.propertyId", 80, 0, 100),
        ];
        filter().apply(&mut fields, 100);
        for f in &fields {
            assert!(!f.include, "{} should be excluded", f.field_path);
        }
    }

    #[test]
    fn test_distinct_value_floor() {
        let mut fields = vec![
            field("status", 1, 0, 100),
            field("city", 2, 0, 100),
            field("empty", 0, 100, 100),
        ];
        filter().apply(&mut fields, 100);
        assert!(!fields[0].include);
        assert!(fields[1].include);
        assert!(!fields[2].include);
    }

    #[test]
    fn test_sparse_field_excluded() {
        // Present in 3 of 100 documents, below the 5% floor
        let mut fields = vec![field("rarelySeen", 3, 0, 3)];
        filter().apply(&mut fields, 100);
        assert!(!fields[0].include);
    }

    #[test]
    fn test_synthetic_fields_keep_generated_flag() {
        let mut count_field = field("agents[count]", 5, 0, 100);
        count_field.extraction_mode = Some(crate::config::ExtractionMode::Count);
        count_field.source_field = Some("agents".to_string());
        count_field.include = false;

        let mut fields = vec![count_field];
        let included = filter().apply(&mut fields, 100);
        assert!(!fields[0].include);
        assert_eq!(included, 0);
    }

    #[test]
    fn test_returns_included_count() {
        let mut fields = vec![field("city", 5, 0, 100), field("_id", 100, 0, 100)];
        assert_eq!(filter().apply(&mut fields, 100), 1);
    }
}
