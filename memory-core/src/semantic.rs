//! Semantic memory: shared, category-tagged wellness knowledge.
//!
//! Unlike the episodic tier this knowledge base is not user-scoped; facts
//! stored by anyone (or seeded at startup) are retrievable by everyone.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::embeddings::EmbeddingService;
use crate::error::{Error, MemoryTier, Result};
use crate::keys;
use crate::store::{read_text, KnnFilter, KvStore, VectorIndexSchema};
use crate::types::{RecordMetadata, SemanticRecord};

use crate::keys::SEMANTIC_INDEX as INDEX;

/// Curated facts written by [`SemanticMemory::seed_if_empty`]. Order and
/// content are fixed so seeding is deterministic.
const SEED_FACTS: &[(&str, &str, &str, &str)] = &[
    (
        "Adults should aim for at least 150 minutes of moderate aerobic activity per week",
        "guideline",
        "exercise",
        "General physical activity recommendation for healthy adults",
    ),
    (
        "Muscle recovery after strength training typically takes 48 hours per muscle group",
        "guideline",
        "recovery",
        "Allowing full recovery between sessions reduces injury risk",
    ),
    (
        "Resting heart rate for most adults falls between 60 and 100 bpm",
        "reference_range",
        "heart_rate",
        "Endurance training commonly lowers resting heart rate over time",
    ),
    (
        "A sustainable weight loss pace is 1 to 2 lbs per week",
        "guideline",
        "weight",
        "Faster loss tends to sacrifice lean mass and is hard to maintain",
    ),
    (
        "Adults need roughly 7 to 9 hours of sleep per night",
        "guideline",
        "sleep",
        "Sleep supports recovery, appetite regulation and training adaptation",
    ),
    (
        "Daily water intake of about 2 to 3 liters suits most active adults",
        "guideline",
        "hydration",
        "Needs rise with training volume, heat and body size",
    ),
];

/// The semantic slice of a context bundle.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SemanticSlice {
    /// Rendered fact lines
    pub context: Option<String>,
    /// Number of hits
    pub hits: usize,
}

impl SemanticSlice {
    /// Slice with no data.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }
}

/// Shared knowledge-base tier.
#[derive(Clone)]
pub struct SemanticMemory {
    store: Arc<dyn KvStore>,
    embeddings: Arc<EmbeddingService>,
    ttl: Duration,
}

impl SemanticMemory {
    /// Build the tier over shared store and embedding handles.
    #[must_use]
    pub fn new(store: Arc<dyn KvStore>, embeddings: Arc<EmbeddingService>, ttl: Duration) -> Self {
        Self {
            store,
            embeddings,
            ttl,
        }
    }

    /// Create the vector index if this is a fresh deployment.
    ///
    /// # Errors
    ///
    /// Backend errors pass through.
    pub async fn ensure_index(&self) -> Result<bool> {
        let schema = VectorIndexSchema::cosine_hnsw(
            keys::tier_prefix(MemoryTier::Semantic),
            self.embeddings.dimension(),
        )
        .with_tag("category")
        .with_tag("fact_type")
        .with_text("fact")
        .with_text("context")
        .with_text("source")
        .with_numeric("timestamp");
        self.store.vector_index_create(INDEX, &schema).await
    }

    /// Store one shared fact.
    ///
    /// The embedded text is `fact + "\n" + context` so retrieval matches
    /// against both the statement and its supporting detail.
    ///
    /// # Errors
    ///
    /// `InvalidInput` for an empty fact; embedding or backend failure is
    /// `WriteFailed { tier: Semantic }`.
    pub async fn store(
        &self,
        fact: &str,
        fact_type: &str,
        category: &str,
        context: &str,
        source: &str,
        metadata: RecordMetadata,
    ) -> Result<()> {
        if fact.trim().is_empty() {
            return Err(Error::InvalidInput(
                "semantic fact must not be empty".to_string(),
            ));
        }

        let mut record = SemanticRecord::new(fact, fact_type, category, context, source, metadata);
        record.embedding = self
            .embeddings
            .embed(&record.embedded_text())
            .await
            .map_err(|err| Error::WriteFailed {
                tier: MemoryTier::Semantic,
                reason: format!("embedding failed: {err}"),
            })?;

        let fields = record.to_fields()?;
        self.store
            .vector_upsert(
                INDEX,
                &record.key(),
                &fields,
                &record.embedding,
                Some(self.ttl),
            )
            .await
            .map_err(|err| Error::WriteFailed {
                tier: MemoryTier::Semantic,
                reason: err.to_string(),
            })?;

        debug!(category, fact_type, "stored semantic fact");
        Ok(())
    }

    /// Retrieve the `k` most relevant shared facts, optionally narrowed
    /// to one category.
    ///
    /// # Errors
    ///
    /// `RetrievalFailed { tier: Semantic }` on backend trouble; embedding
    /// failure degrades to an empty slice.
    pub async fn retrieve(
        &self,
        query: &str,
        k: usize,
        category_filter: Option<&str>,
    ) -> Result<SemanticSlice> {
        if k == 0 || query.trim().is_empty() {
            return Ok(SemanticSlice::empty());
        }

        let vector = match self.embeddings.embed(query).await {
            Ok(vector) => vector,
            Err(err) => {
                warn!("semantic query embedding failed, returning empty: {}", err);
                return Ok(SemanticSlice::empty());
            }
        };

        let filter = category_filter.map(|category| KnnFilter::eq("category", category));
        let hits = self
            .store
            .vector_knn(INDEX, &vector, k, filter.as_ref())
            .await
            .map_err(|err| Error::RetrievalFailed {
                tier: MemoryTier::Semantic,
                reason: err.to_string(),
            })?;

        let lines: Vec<String> = hits
            .iter()
            .filter_map(|hit| read_text(&hit.fields, "fact"))
            .collect();

        Ok(SemanticSlice {
            hits: lines.len(),
            context: if lines.is_empty() {
                None
            } else {
                Some(lines.join("\n"))
            },
        })
    }

    /// Populate the curated fact list when the index is empty.
    ///
    /// Returns how many facts were written (zero when data already
    /// exists).
    ///
    /// # Errors
    ///
    /// `WriteFailed { tier: Semantic }` when a seed write fails.
    pub async fn seed_if_empty(&self) -> Result<usize> {
        let existing = self
            .store
            .vector_count(INDEX)
            .await
            .map_err(|err| Error::RetrievalFailed {
                tier: MemoryTier::Semantic,
                reason: err.to_string(),
            })?;
        if existing > 0 {
            return Ok(0);
        }

        for (fact, fact_type, category, context) in SEED_FACTS {
            self.store(fact, fact_type, category, context, "seed", RecordMetadata::empty())
                .await?;
        }
        info!(count = SEED_FACTS.len(), "seeded semantic knowledge base");
        Ok(SEED_FACTS.len())
    }

    /// Number of facts visible to the index.
    ///
    /// # Errors
    ///
    /// Backend errors pass through.
    pub async fn count(&self) -> Result<u64> {
        self.store.vector_count(INDEX).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seed_list_is_deterministic_and_nonempty() {
        assert!(!SEED_FACTS.is_empty());
        // Every seed entry is complete
        for (fact, fact_type, category, context) in SEED_FACTS {
            assert!(!fact.is_empty());
            assert!(!fact_type.is_empty());
            assert!(!category.is_empty());
            assert!(!context.is_empty());
        }
    }

    #[test]
    fn test_slice_empty() {
        let slice = SemanticSlice::empty();
        assert_eq!(slice.hits, 0);
        assert!(slice.context.is_none());
    }
}
