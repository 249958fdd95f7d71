//! Reference-collection caching
//!
//! All reference lookups during discovery and export go through the
//! [`CollectionCacheManager`]. It decides per collection whether to
//! materialize every document in memory or query lazily, and serves
//! batched pre-loads so the export engine never falls back to one
//! query per document.
//!
//! Two invariants are enforced structurally here rather than by callers:
//! the source collection is never cached under its own name, and a
//! collection marked fully loaded is never queried again, so a miss
//! against it is a definitive `None`.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use bson::{doc, oid::ObjectId, Document};
use futures::TryStreamExt;
use mongodb::Database;
use tracing::{debug, info, warn};

use crate::error::Result;

/// Reference lookup seam for the discovery and export engines.
///
/// The engines resolve references through this trait instead of the
/// concrete manager so tests can substitute an in-memory fake.
#[async_trait]
pub trait ReferenceLookup: Send {
    /// Look up one document by id in a referenced collection.
    async fn lookup_reference(
        &mut self,
        collection: &str,
        id: &ObjectId,
    ) -> Result<Option<Document>>;
}

/// Document-count boundary for full materialization.
///
/// Shared by discovery and export; a mismatch between the two phases
/// causes silent throughput collapse when a collection full-cached in
/// one phase gets queried per-document in the other.
pub const MAX_CACHEABLE_DOCUMENTS: u64 = 500_000;

/// Whether a collection of `count` documents should be read in full.
pub fn should_fully_cache(count: u64) -> bool {
    count <= MAX_CACHEABLE_DOCUMENTS
}

/// In-memory cache state, separated from the database handle so the
/// policy rules are testable without a live server.
#[derive(Debug, Default)]
struct CacheStore {
    source_collection: String,
    maps: HashMap<String, HashMap<ObjectId, Document>>,
    fully_loaded: HashSet<String>,
}

impl CacheStore {
    fn new(source_collection: &str) -> Self {
        Self {
            source_collection: source_collection.to_string(),
            ..Default::default()
        }
    }

    fn is_source(&self, name: &str) -> bool {
        name == self.source_collection
    }

    fn get(&self, name: &str, id: &ObjectId) -> Option<&Document> {
        self.maps.get(name)?.get(id)
    }

    fn contains(&self, name: &str, id: &ObjectId) -> bool {
        self.maps.get(name).is_some_and(|m| m.contains_key(id))
    }

    /// Insert a document, refusing the source collection as a key.
    fn insert(&mut self, name: &str, id: ObjectId, document: Document) -> bool {
        if self.is_source(name) {
            return false;
        }
        self.maps
            .entry(name.to_string())
            .or_default()
            .insert(id, document);
        true
    }

    fn mark_fully_loaded(&mut self, name: &str) {
        if !self.is_source(name) {
            self.fully_loaded.insert(name.to_string());
        }
    }

    fn is_fully_loaded(&self, name: &str) -> bool {
        self.fully_loaded.contains(name)
    }

    fn cached_count(&self, name: &str) -> usize {
        self.maps.get(name).map_or(0, |m| m.len())
    }
}

/// Per-collection cache statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStat {
    pub collection: String,
    pub documents: usize,
    pub fully_loaded: bool,
}

/// Owns the full-load vs lazy decision and serves all reference lookups.
///
/// One instance per discovery or export run; never shared across runs.
pub struct CollectionCacheManager {
    database: Database,
    store: CacheStore,
}

impl CollectionCacheManager {
    /// Create a manager for a run over `source_collection`.
    ///
    /// The source name is captured so it can never become a cache key;
    /// caching the collection being iterated interacts badly with the
    /// live cursor.
    pub fn new(database: Database, source_collection: &str) -> Self {
        Self {
            database,
            store: CacheStore::new(source_collection),
        }
    }

    /// Decide and execute the caching strategy for a collection.
    ///
    /// At or below [`MAX_CACHEABLE_DOCUMENTS`] the collection is read in
    /// full and flagged fully loaded; above it, it is marked for lazy
    /// per-lookup queries. The source collection is always refused.
    ///
    /// # Returns
    /// * `Result<bool>` - true if the collection was fully loaded
    pub async fn cache_collection(&mut self, name: &str) -> Result<bool> {
        if self.store.is_source(name) {
            warn!(collection = name, "refusing to cache the source collection");
            return Ok(false);
        }
        if self.store.is_fully_loaded(name) {
            return Ok(true);
        }

        let collection = self.database.collection::<Document>(name);
        let count = collection.estimated_document_count().await?;

        if !should_fully_cache(count) {
            info!(
                collection = name,
                count, "collection above cache threshold, using lazy loading"
            );
            return Ok(false);
        }

        info!(collection = name, count, "fully caching collection");
        let mut cursor = collection.find(doc! {}).await?;
        let mut loaded = 0u64;
        while let Some(document) = cursor.try_next().await? {
            if let Ok(id) = document.get_object_id("_id") {
                self.store.insert(name, id, document);
                loaded += 1;
            }
        }
        self.store.mark_fully_loaded(name);
        info!(collection = name, loaded, "collection fully cached");
        Ok(true)
    }

    /// Look up one referenced document by id.
    ///
    /// For a fully-loaded collection a miss returns `None` immediately
    /// with no fallback query. For lazy collections the document is
    /// fetched on demand and cached opportunistically.
    pub async fn lookup(&mut self, name: &str, id: &ObjectId) -> Result<Option<&Document>> {
        if self.store.is_source(name) {
            return Ok(None);
        }

        if !self.store.contains(name, id) {
            if self.store.is_fully_loaded(name) {
                return Ok(None);
            }
            let collection = self.database.collection::<Document>(name);
            match collection.find_one(doc! { "_id": id }).await? {
                Some(document) => {
                    self.store.insert(name, *id, document);
                }
                None => return Ok(None),
            }
        }

        Ok(self.store.get(name, id))
    }

    /// Load a batch of ids with a single `$in` query, skipping ids
    /// already cached. No-op for the source collection and for fully
    /// loaded collections.
    pub async fn batch_load(&mut self, name: &str, ids: &HashSet<ObjectId>) -> Result<()> {
        if self.store.is_source(name) || self.store.is_fully_loaded(name) {
            return Ok(());
        }

        let missing: Vec<ObjectId> = ids
            .iter()
            .filter(|id| !self.store.contains(name, id))
            .copied()
            .collect();
        if missing.is_empty() {
            return Ok(());
        }

        debug!(collection = name, count = missing.len(), "batch loading references");
        let collection = self.database.collection::<Document>(name);
        let mut cursor = collection.find(doc! { "_id": { "$in": missing } }).await?;
        while let Some(document) = cursor.try_next().await? {
            if let Ok(id) = document.get_object_id("_id") {
                self.store.insert(name, id, document);
            }
        }
        Ok(())
    }

    /// Whether a collection has been fully materialized.
    pub fn is_fully_loaded(&self, name: &str) -> bool {
        self.store.is_fully_loaded(name)
    }

    /// Snapshot of cache sizes, for the end-of-run report.
    pub fn stats(&self) -> Vec<CacheStat> {
        let mut stats: Vec<CacheStat> = self
            .store
            .maps
            .iter()
            .map(|(name, map)| CacheStat {
                collection: name.clone(),
                documents: map.len(),
                fully_loaded: self.store.is_fully_loaded(name),
            })
            .collect();
        stats.sort_by(|a, b| a.collection.cmp(&b.collection));
        stats
    }

    /// Number of cached documents for one collection.
    pub fn cached_count(&self, name: &str) -> usize {
        self.store.cached_count(name)
    }
}

#[async_trait]
impl ReferenceLookup for CollectionCacheManager {
    async fn lookup_reference(
        &mut self,
        collection: &str,
        id: &ObjectId,
    ) -> Result<Option<Document>> {
        Ok(self.lookup(collection, id).await?.cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threshold_boundary() {
        assert!(should_fully_cache(0));
        assert!(should_fully_cache(MAX_CACHEABLE_DOCUMENTS));
        assert!(!should_fully_cache(MAX_CACHEABLE_DOCUMENTS + 1));
        assert!(!should_fully_cache(600_000));
    }

    #[test]
    fn test_store_refuses_source_collection() {
        let mut store = CacheStore::new("listings");
        let id = ObjectId::new();
        assert!(!store.insert("listings", id, doc! { "x": 1 }));
        assert_eq!(store.cached_count("listings"), 0);

        assert!(store.insert("agents", id, doc! { "x": 1 }));
        assert_eq!(store.cached_count("agents"), 1);
    }

    #[test]
    fn test_store_source_never_fully_loaded() {
        let mut store = CacheStore::new("listings");
        store.mark_fully_loaded("listings");
        assert!(!store.is_fully_loaded("listings"));

        store.mark_fully_loaded("agents");
        assert!(store.is_fully_loaded("agents"));
    }

    #[test]
    fn test_store_fully_loaded_miss_is_definitive() {
        let mut store = CacheStore::new("listings");
        let cached = ObjectId::new();
        let missing = ObjectId::new();
        store.insert("agents", cached, doc! { "fullName": "J. Doe" });
        store.mark_fully_loaded("agents");

        assert!(store.get("agents", &cached).is_some());
        assert!(store.get("agents", &missing).is_none());
        assert!(store.is_fully_loaded("agents"));
    }

    #[test]
    fn test_store_get_returns_inserted_document() {
        let mut store = CacheStore::new("listings");
        let id = ObjectId::new();
        store.insert("agents", id, doc! { "fullName": "J. Doe" });

        let document = store.get("agents", &id).unwrap();
        assert_eq!(document.get_str("fullName").unwrap(), "J. Doe");
    }
}
