//! Configuration-driven export
//!
//! Streams the source collection in batches, pre-loads every referenced
//! document a batch needs with one `$in` query per target collection,
//! resolves each configured field per document, and writes CSV rows.
//! A machine-readable summary with exact processed-vs-source counts is
//! written next to the CSV so silent truncation is detectable.

pub mod progress;
pub mod resolver;
pub mod writer;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};

use bson::{doc, oid::ObjectId, Document};
use futures::TryStreamExt;
use mongodb::{Cursor, Database};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::CollectionCacheManager;
use crate::config::{business_name, DiscoveryConfiguration, FieldConfiguration};
use crate::error::{ExportError, Result};
use progress::ProgressTracker;
use writer::CsvSink;

/// End-of-run report, also serialized as the summary JSON.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportReport {
    pub collection: String,
    pub rows_written: u64,
    pub documents_skipped: u64,
    pub source_count: u64,
    pub elapsed_seconds: f64,
    /// Empty-cell count per included field path.
    pub field_null_counts: BTreeMap<String, u64>,
}

/// Pulls source documents in fixed-size batches off one cursor.
struct BatchCursor {
    cursor: Option<Cursor<Document>>,
    batch_size: usize,
    total_fetched: u64,
}

impl BatchCursor {
    fn new(cursor: Cursor<Document>, batch_size: usize) -> Self {
        Self {
            cursor: Some(cursor),
            batch_size: batch_size.max(1),
            total_fetched: 0,
        }
    }

    async fn next_batch(&mut self) -> Result<Option<Vec<Document>>> {
        let Some(cursor) = self.cursor.as_mut() else {
            return Ok(None);
        };

        let mut batch = Vec::with_capacity(self.batch_size);
        for _ in 0..self.batch_size {
            match cursor.try_next().await {
                Ok(Some(document)) => batch.push(document),
                Ok(None) => break,
                Err(e) => {
                    self.cursor = None;
                    return Err(e.into());
                }
            }
        }

        if batch.is_empty() {
            debug!(total = self.total_fetched, "source cursor exhausted");
            self.cursor = None;
            return Ok(None);
        }
        self.total_fetched += batch.len() as u64;
        Ok(Some(batch))
    }

    /// Drop the cursor so no further batches are fetched.
    fn close(&mut self) {
        self.cursor = None;
    }
}

/// Exports a collection according to a loaded discovery configuration.
///
/// The configuration is used exactly as loaded; fields are never
/// regenerated or dropped here.
pub struct ConfigExporter {
    database: Database,
    config: DiscoveryConfiguration,
}

impl ConfigExporter {
    pub fn new(database: Database, config: DiscoveryConfiguration) -> Self {
        Self { database, config }
    }

    /// Column headers per the configuration's header setting.
    fn headers(included: &[FieldConfiguration], use_business_names: bool) -> Vec<String> {
        included
            .iter()
            .map(|f| {
                if use_business_names {
                    if f.business_name.is_empty() {
                        business_name(&f.field_path)
                    } else {
                        f.business_name.clone()
                    }
                } else {
                    f.field_path.clone()
                }
            })
            .collect()
    }

    /// Run the export.
    ///
    /// # Arguments
    /// * `output_path` - CSV destination
    /// * `row_limit` - Stop after this many rows, closing the cursor early
    /// * `cancel` - Checked between batches; already-written rows survive
    /// * `show_progress` - Display a progress bar
    pub async fn export(
        &self,
        output_path: &str,
        row_limit: Option<u64>,
        cancel: CancellationToken,
        show_progress: bool,
    ) -> Result<ExportReport> {
        let included: Vec<FieldConfiguration> = self
            .config
            .included_fields()
            .into_iter()
            .cloned()
            .collect();
        if included.is_empty() {
            return Err(ExportError::NoIncludedFields.into());
        }

        let source = &self.config.collection;
        let names = self.database.list_collection_names().await?;
        if !names.iter().any(|n| n == source) {
            return Err(ExportError::CollectionNotFound(source.clone()).into());
        }

        let collection = self.database.collection::<Document>(source);
        let source_count = collection.count_documents(doc! {}).await?;
        info!(collection = %source, source_count, fields = included.len(), "starting export");

        let mut cache = CollectionCacheManager::new(self.database.clone(), source);
        for required in &self.config.required_collections {
            cache.cache_collection(required).await?;
        }

        let headers = Self::headers(&included, self.config.export_settings.use_business_names);
        let mut sink = CsvSink::create(output_path, &headers).await?;

        let tracker = ProgressTracker::new(Some(source_count), show_progress);
        let mut null_counts: BTreeMap<String, u64> = included
            .iter()
            .map(|f| (f.field_path.clone(), 0))
            .collect();

        let cursor = collection.find(doc! {}).await?;
        let mut batches = BatchCursor::new(cursor, self.config.export_settings.batch_size);
        let mut rows_written = 0u64;
        let mut limit_reached = false;

        while let Some(batch) = batches.next_batch().await? {
            if cancel.is_cancelled() {
                warn!("export cancelled, output flushed at last batch boundary");
                batches.close();
                break;
            }

            self.precache_batch(&batch, &included, &mut cache).await;

            for document in &batch {
                match self
                    .resolve_row(document, &included, &self.config.fields, &mut cache)
                    .await
                {
                    Ok(cells) => {
                        for (field, cell) in included.iter().zip(&cells) {
                            if cell.is_empty() {
                                if let Some(count) = null_counts.get_mut(&field.field_path) {
                                    *count += 1;
                                }
                            }
                        }
                        sink.write_row(&cells).await?;
                        rows_written += 1;
                    }
                    Err(e) => {
                        let id = document
                            .get_object_id("_id")
                            .map(|id| id.to_hex())
                            .unwrap_or_default();
                        debug!(document = %id, error = %e, "skipping document");
                        tracker.record_skip();
                    }
                }

                if row_limit.is_some_and(|limit| rows_written >= limit) {
                    info!(rows_written, "row limit reached, stopping cursor");
                    limit_reached = true;
                    break;
                }
            }

            sink.flush().await?;
            tracker.update(rows_written);

            if limit_reached {
                batches.close();
                break;
            }
        }

        let rows = sink.finalize().await?;
        tracker.finish();

        for stat in cache.stats() {
            debug!(
                collection = %stat.collection,
                documents = stat.documents,
                fully_loaded = stat.fully_loaded,
                "cache usage"
            );
        }

        let report = ExportReport {
            collection: source.clone(),
            rows_written: rows,
            documents_skipped: tracker.skipped(),
            source_count,
            elapsed_seconds: tracker.elapsed().as_secs_f64(),
            field_null_counts: null_counts,
        };
        info!(
            rows = report.rows_written,
            skipped = report.documents_skipped,
            source = report.source_count,
            "export complete"
        );

        let summary = summary_path(output_path);
        if let Err(e) = write_summary(&report, &summary) {
            warn!(path = %summary.display(), error = %e, "failed to write summary");
        }

        Ok(report)
    }

    /// Collect every reference id a batch needs and issue one batched
    /// load per target collection. Failures here are swallowed; the
    /// per-document resolution path retries lookups synchronously.
    async fn precache_batch(
        &self,
        batch: &[Document],
        included: &[FieldConfiguration],
        cache: &mut CollectionCacheManager,
    ) {
        let mut needed: HashMap<String, HashSet<ObjectId>> = HashMap::new();
        for document in batch {
            for (target, ids) in resolver::collect_reference_ids(document, included) {
                needed.entry(target).or_default().extend(ids);
            }
        }

        for (target, ids) in needed {
            if let Err(e) = cache.batch_load(&target, &ids).await {
                debug!(collection = %target, error = %e, "batch pre-load failed");
            }
        }
    }

    async fn resolve_row(
        &self,
        document: &Document,
        included: &[FieldConfiguration],
        all_fields: &[FieldConfiguration],
        cache: &mut CollectionCacheManager,
    ) -> Result<Vec<String>> {
        let mut cells = Vec::with_capacity(included.len());
        for field in included {
            let cell = resolver::resolve_field(field, document, all_fields, cache).await?;
            cells.push(cell);
        }
        Ok(cells)
    }
}

/// Summary file path next to the CSV: `<stem>_summary.json`.
fn summary_path(output_path: &str) -> PathBuf {
    let path = Path::new(output_path);
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "export".to_string());
    path.with_file_name(format!("{stem}_summary.json"))
}

fn write_summary(report: &ExportReport, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(report)?;
    std::fs::write(path, json)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traversal::DataType;

    fn field(path: &str) -> FieldConfiguration {
        FieldConfiguration::new(path, "listings", DataType::String)
    }

    #[test]
    fn test_headers_use_business_names_when_enabled() {
        let included = vec![field("mlsNumber"), field("address.city")];
        let headers = ConfigExporter::headers(&included, true);
        assert_eq!(headers, vec!["MLS Number", "Address City"]);

        let headers = ConfigExporter::headers(&included, false);
        assert_eq!(headers, vec!["mlsNumber", "address.city"]);
    }

    #[test]
    fn test_summary_path_derivation() {
        assert_eq!(
            summary_path("out/listings.csv"),
            PathBuf::from("out/listings_summary.json")
        );
        assert_eq!(
            summary_path("listings.csv"),
            PathBuf::from("listings_summary.json")
        );
    }

    #[test]
    fn test_report_serializes_with_camel_case_keys() {
        let report = ExportReport {
            collection: "listings".to_string(),
            rows_written: 10,
            documents_skipped: 1,
            source_count: 11,
            elapsed_seconds: 0.5,
            field_null_counts: BTreeMap::from([("city".to_string(), 3)]),
        };
        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains("\"rowsWritten\":10"));
        assert!(json.contains("\"sourceCount\":11"));
        assert!(json.contains("\"fieldNullCounts\""));
    }
}
