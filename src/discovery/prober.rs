//! Relationship probing
//!
//! Determines which collection an identifier-shaped field points into by
//! testing membership of a few sample identifiers against every candidate
//! collection. Results are memoized per field name. Probing is inherently
//! probabilistic; callers must tolerate a no-match outcome.

use std::collections::HashMap;

use bson::{doc, oid::ObjectId, Document};
use mongodb::Database;
use tracing::{debug, info};

use crate::error::Result;

/// Sample identifiers tested per candidate collection.
const MAX_PROBE_IDS_PER_COLLECTION: usize = 3;

/// Result of probing one field's sample identifiers.
///
/// A suggestion from learned name patterns is kept structurally distinct
/// from a confirmed membership test and is never written into a
/// configuration's `relationshipTarget`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// At least one sample identifier was found in this collection.
    Confirmed(String),
    /// No live probe succeeded, but a field with the same normalized
    /// name previously confirmed this target.
    Suggested(String),
    /// No collection matched and no pattern applies.
    NoMatch,
}

impl ProbeOutcome {
    /// The confirmed target collection, if any.
    pub fn confirmed(&self) -> Option<&str> {
        match self {
            ProbeOutcome::Confirmed(name) => Some(name),
            _ => None,
        }
    }
}

/// Targets learned from confirmed probes, keyed by normalized field name.
#[derive(Debug, Default)]
struct LearnedPatterns {
    targets: HashMap<String, String>,
}

impl LearnedPatterns {
    fn learn(&mut self, field_name: &str, target: &str) {
        self.targets
            .insert(normalize_field_name(field_name), target.to_string());
    }

    fn suggest(&self, field_name: &str) -> Option<&str> {
        self.targets
            .get(&normalize_field_name(field_name))
            .map(String::as_str)
    }
}

/// Strip identifier suffixes and casing so `listingAgentId`,
/// `listing_agent_id`, and `listingAgentIds` all share one key.
fn normalize_field_name(field_name: &str) -> String {
    let mut name = field_name.to_lowercase();
    for suffix in ["_ids", "_id", "ids", "id"] {
        if let Some(stripped) = name.strip_suffix(suffix) {
            if !stripped.is_empty() {
                name = stripped.to_string();
                break;
            }
        }
    }
    name.trim_matches('_').replace('_', "")
}

/// Probes sample identifiers against database collections to find the
/// collection a reference field points into.
pub struct RelationshipProber {
    database: Database,
    source_collection: String,
    collection_names: Option<Vec<String>>,
    memo: HashMap<String, ProbeOutcome>,
    learned: LearnedPatterns,
}

impl RelationshipProber {
    pub fn new(database: Database, source_collection: &str) -> Self {
        Self {
            database,
            source_collection: source_collection.to_string(),
            collection_names: None,
            memo: HashMap::new(),
            learned: LearnedPatterns::default(),
        }
    }

    /// Resolve the collection a field's identifiers belong to.
    ///
    /// Memoized per field name. Tests up to
    /// [`MAX_PROBE_IDS_PER_COLLECTION`] sample identifiers against every
    /// collection except the source, returning the collection with the
    /// most matches. When no live probe succeeds, a previously-confirmed
    /// target for the same normalized field name is returned as a
    /// suggestion, never as a confirmation.
    pub async fn resolve_target_collection(
        &mut self,
        field_name: &str,
        sample_ids: &[ObjectId],
    ) -> Result<ProbeOutcome> {
        if let Some(outcome) = self.memo.get(field_name) {
            return Ok(outcome.clone());
        }

        let outcome = self.probe(field_name, sample_ids).await?;
        if let ProbeOutcome::Confirmed(target) = &outcome {
            self.learned.learn(field_name, target);
        }
        self.memo.insert(field_name.to_string(), outcome.clone());
        Ok(outcome)
    }

    async fn probe(&mut self, field_name: &str, sample_ids: &[ObjectId]) -> Result<ProbeOutcome> {
        if sample_ids.is_empty() {
            return Ok(self.fallback(field_name));
        }

        let names = self.candidate_collections().await?.to_vec();
        let mut best: Option<(String, usize)> = None;

        for name in names {
            let collection = self.database.collection::<Document>(&name);
            let mut matches = 0usize;
            for id in sample_ids.iter().take(MAX_PROBE_IDS_PER_COLLECTION) {
                if collection.find_one(doc! { "_id": id }).await?.is_some() {
                    matches += 1;
                }
            }
            if matches > 0 && best.as_ref().is_none_or(|(_, m)| matches > *m) {
                best = Some((name, matches));
            }
        }

        match best {
            Some((target, matches)) => {
                info!(
                    field = field_name,
                    target, matches, "confirmed relationship target"
                );
                Ok(ProbeOutcome::Confirmed(target))
            }
            None => Ok(self.fallback(field_name)),
        }
    }

    fn fallback(&self, field_name: &str) -> ProbeOutcome {
        match self.learned.suggest(field_name) {
            Some(target) => {
                debug!(
                    field = field_name,
                    target, "suggesting target from learned name pattern"
                );
                ProbeOutcome::Suggested(target.to_string())
            }
            None => ProbeOutcome::NoMatch,
        }
    }

    /// All database collections except the source and system namespaces.
    async fn candidate_collections(&mut self) -> Result<&[String]> {
        if self.collection_names.is_none() {
            let names: Vec<String> = self
                .database
                .list_collection_names()
                .await?
                .into_iter()
                .filter(|name| name != &self.source_collection && !name.starts_with("system."))
                .collect();
            debug!(count = names.len(), "candidate collections for probing");
            self.collection_names = Some(names);
        }
        Ok(self.collection_names.as_deref().unwrap_or(&[]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_field_name() {
        assert_eq!(normalize_field_name("listingAgentId"), "listingagent");
        assert_eq!(normalize_field_name("listing_agent_id"), "listingagent");
        assert_eq!(normalize_field_name("listingAgentIds"), "listingagent");
        assert_eq!(normalize_field_name("agents"), "agents");
        // A bare "id" keeps its name instead of normalizing to nothing
        assert_eq!(normalize_field_name("id"), "id");
    }

    #[test]
    fn test_learned_patterns_suggest_across_spellings() {
        let mut learned = LearnedPatterns::default();
        learned.learn("listingAgentId", "agents");

        assert_eq!(learned.suggest("listing_agent_id"), Some("agents"));
        assert_eq!(learned.suggest("listingAgentIds"), Some("agents"));
        assert_eq!(learned.suggest("buyerAgentId"), None);
    }

    #[test]
    fn test_probe_outcome_confirmed_accessor() {
        assert_eq!(
            ProbeOutcome::Confirmed("agents".into()).confirmed(),
            Some("agents")
        );
        assert_eq!(ProbeOutcome::Suggested("agents".into()).confirmed(), None);
        assert_eq!(ProbeOutcome::NoMatch.confirmed(), None);
    }
}
