//! Procedural memory: learned query-to-tool-sequence patterns.
//!
//! Every sufficiently successful turn leaves behind a pattern record
//! (query, classified intent, ordered tools, success score). Retrieval
//! finds patterns semantically close to a new query and synthesizes a
//! candidate plan from the most successful one.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::config::{ProceduralConfig, ProceduralScope};
use crate::embeddings::EmbeddingService;
use crate::error::{Error, MemoryTier, Result};
use crate::keys;
use crate::store::{read_text, text_field, KnnFilter, KnnHit, KvStore, VectorIndexSchema};
use crate::types::{ProceduralRecord, QueryType, RecordMetadata, UserId};

use crate::keys::PROCEDURAL_INDEX as INDEX;

/// Hex characters kept from the full SHA-256 pattern digest.
const PATTERN_HASH_LEN: usize = 16;

/// Classify a query by tag-matching against a fixed vocabulary.
///
/// Deterministic and deliberately dumb: the first category whose tag
/// appears in the lowercased query wins, checked in a fixed order.
#[must_use]
pub fn classify_query(query: &str) -> QueryType {
    let lowered = query.to_lowercase();
    let matches = |tags: &[&str]| tags.iter().any(|tag| lowered.contains(tag));

    if matches(&[
        "average", "avg", "mean", "total", "sum", "count", "how many", "how much", "max", "min",
        "per week", "per day", "weekly",
    ]) {
        QueryType::Aggregation
    } else if matches(&["trend", "over time", "progress", "improving", "improve", "getting better"])
    {
        QueryType::Trend
    } else if matches(&["compare", "versus", " vs ", "difference", "than last"]) {
        QueryType::Comparison
    } else if matches(&["show", "list", "find", "when did", "latest", "most recent", "last workout"])
    {
        QueryType::Lookup
    } else {
        QueryType::General
    }
}

/// Stable short identifier for a `(query, tool set)` pair.
///
/// Tools are sorted before hashing so the same set in a different
/// execution order maps to the same pattern.
#[must_use]
pub fn pattern_hash(query: &str, tools_used: &[String]) -> String {
    let mut sorted = tools_used.to_vec();
    sorted.sort_unstable();

    let mut hasher = Sha256::new();
    hasher.update(query.as_bytes());
    hasher.update(b"|");
    hasher.update(sorted.join(",").as_bytes());
    let digest = hasher.finalize();

    let mut hex = String::with_capacity(PATTERN_HASH_LEN);
    for byte in digest.iter().take(PATTERN_HASH_LEN / 2) {
        use std::fmt::Write;
        let _ = write!(hex, "{byte:02x}");
    }
    hex
}

/// Result of a `record` call.
#[derive(Debug, Clone, PartialEq)]
pub enum ProceduralWrite {
    /// Pattern persisted under this hash
    Stored {
        /// The pattern's primary key component
        pattern_hash: String,
    },
    /// Score below the storage floor; nothing written
    SkippedLowScore {
        /// The offending score
        score: f32,
    },
}

/// One retrieved pattern, flattened for the context bundle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternSummary {
    /// Classified intent of the originating query
    pub query_type: QueryType,
    /// Ordered tool names
    pub tools_used: Vec<String>,
    /// Observed success in `[0, 1]`
    pub success_score: f32,
    /// Original execution cost
    pub execution_time_ms: u64,
    /// Cosine similarity to the current query
    pub similarity: f32,
}

/// The procedural slice of a context bundle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProceduralSlice {
    /// Candidate patterns, most successful first
    pub patterns: Vec<PatternSummary>,
    /// Tool sequence of the best candidate, if any
    pub plan: Option<Vec<String>>,
    /// Intent classification of the current query
    pub query_type: QueryType,
}

impl ProceduralSlice {
    /// Slice with no patterns, still carrying the query classification.
    #[must_use]
    pub fn empty(query_type: QueryType) -> Self {
        Self {
            patterns: Vec::new(),
            plan: None,
            query_type,
        }
    }
}

/// Pattern storage and retrieval.
#[derive(Clone)]
pub struct ProceduralMemory {
    store: Arc<dyn KvStore>,
    embeddings: Arc<EmbeddingService>,
    config: ProceduralConfig,
    ttl: Duration,
}

impl ProceduralMemory {
    /// Build the tier over shared store and embedding handles.
    #[must_use]
    pub fn new(
        store: Arc<dyn KvStore>,
        embeddings: Arc<EmbeddingService>,
        config: ProceduralConfig,
        ttl: Duration,
    ) -> Self {
        Self {
            store,
            embeddings,
            config,
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
            keys::tier_prefix(MemoryTier::Procedural),
            self.embeddings.dimension(),
        )
        .with_tag("user_id")
        .with_tag("query_type")
        .with_text("query_description")
        .with_text("tools_used")
        .with_numeric("success_score")
        .with_numeric("timestamp");
        self.store.vector_index_create(INDEX, &schema).await
    }

    /// Record a pattern from a completed turn.
    ///
    /// Patterns scoring below the storage floor are skipped (the skip is
    /// reported, not silently dropped).
    ///
    /// # Errors
    ///
    /// `InvalidInput` for an empty query, empty tool list or out-of-range
    /// score; embedding or backend failure is
    /// `WriteFailed { tier: Procedural }`.
    pub async fn record(
        &self,
        user: &UserId,
        query: &str,
        tools_used: &[String],
        success_score: f32,
        execution_time_ms: u64,
        metadata: RecordMetadata,
    ) -> Result<ProceduralWrite> {
        if query.trim().is_empty() {
            return Err(Error::InvalidInput(
                "procedural query must not be empty".to_string(),
            ));
        }
        if tools_used.is_empty() {
            return Err(Error::InvalidInput(
                "procedural pattern needs at least one tool".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&success_score) {
            return Err(Error::InvalidInput(format!(
                "success score {success_score} outside [0, 1]"
            )));
        }

        if success_score < self.config.min_score {
            debug!(
                score = success_score,
                floor = self.config.min_score,
                "skipping low-scoring pattern"
            );
            return Ok(ProceduralWrite::SkippedLowScore {
                score: success_score,
            });
        }

        let mut record = ProceduralRecord::new(
            pattern_hash(query, tools_used),
            classify_query(query),
            query,
            tools_used.to_vec(),
            success_score,
            execution_time_ms,
        );
        record.embedding = self
            .embeddings
            .embed(query)
            .await
            .map_err(|err| Error::WriteFailed {
                tier: MemoryTier::Procedural,
                reason: format!("embedding failed: {err}"),
            })?;

        let mut fields = record.to_fields(user)?;
        fields.push(text_field(
            "metadata",
            &serde_json::to_string(&metadata.0)?,
        ));

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
                tier: MemoryTier::Procedural,
                reason: err.to_string(),
            })?;

        debug!(
            pattern_hash = %record.pattern_hash,
            query_type = %record.query_type,
            "stored procedural pattern"
        );
        Ok(ProceduralWrite::Stored {
            pattern_hash: record.pattern_hash,
        })
    }

    /// Retrieve candidate plans for a query.
    ///
    /// Patterns below the retrieval score floor are dropped; survivors
    /// are ranked most successful first and the winner's tool sequence
    /// becomes the plan.
    ///
    /// # Errors
    ///
    /// `RetrievalFailed { tier: Procedural }` on backend trouble;
    /// embedding failure degrades to an empty slice.
    pub async fn retrieve(&self, user: &UserId, query: &str, k: usize) -> Result<ProceduralSlice> {
        let query_type = classify_query(query);
        if k == 0 || query.trim().is_empty() {
            return Ok(ProceduralSlice::empty(query_type));
        }

        let vector = match self.embeddings.embed(query).await {
            Ok(vector) => vector,
            Err(err) => {
                warn!("procedural query embedding failed, returning empty: {}", err);
                return Ok(ProceduralSlice::empty(query_type));
            }
        };

        let filter = match self.config.scope {
            ProceduralScope::User => Some(KnnFilter::eq("user_id", user.as_str())),
            ProceduralScope::Global => None,
        };
        let hits = self
            .store
            .vector_knn(INDEX, &vector, k, filter.as_ref())
            .await
            .map_err(|err| Error::RetrievalFailed {
                tier: MemoryTier::Procedural,
                reason: err.to_string(),
            })?;

        let mut patterns: Vec<PatternSummary> = hits
            .iter()
            .filter_map(Self::flatten_hit)
            .filter(|p| p.success_score >= self.config.retrieval_floor)
            .collect();
        patterns.sort_by(|a, b| {
            b.success_score
                .total_cmp(&a.success_score)
                .then(b.similarity.total_cmp(&a.similarity))
        });

        let plan = patterns.first().map(|best| best.tools_used.clone());
        Ok(ProceduralSlice {
            patterns,
            plan,
            query_type,
        })
    }

    /// Number of patterns visible to the index.
    ///
    /// # Errors
    ///
    /// Backend errors pass through.
    pub async fn count(&self) -> Result<u64> {
        self.store.vector_count(INDEX).await
    }

    /// Delete every pattern recorded for a user.
    ///
    /// # Errors
    ///
    /// `WriteFailed { tier: Procedural }` on backend trouble.
    pub async fn clear(&self, user: &UserId) -> Result<u64> {
        let found = self
            .store
            .keys("procedural:*")
            .await
            .map_err(|err| Error::WriteFailed {
                tier: MemoryTier::Procedural,
                reason: err.to_string(),
            })?;

        // Pattern keys are not user-scoped, so ownership is checked on the
        // record itself.
        let mut owned = Vec::new();
        for key in found {
            match self.store.hget(&key, "user_id").await {
                Ok(Some(bytes)) if bytes == user.as_str().as_bytes() => owned.push(key),
                Ok(_) => {}
                Err(err) => {
                    return Err(Error::WriteFailed {
                        tier: MemoryTier::Procedural,
                        reason: err.to_string(),
                    });
                }
            }
        }

        if owned.is_empty() {
            return Ok(0);
        }
        self.store.del(&owned).await.map_err(|err| Error::WriteFailed {
            tier: MemoryTier::Procedural,
            reason: err.to_string(),
        })
    }

    fn flatten_hit(hit: &KnnHit) -> Option<PatternSummary> {
        let tools_used: Vec<String> =
            serde_json::from_str(&read_text(&hit.fields, "tools_used")?).ok()?;
        let success_score = read_text(&hit.fields, "success_score")?.parse().ok()?;
        let execution_time_ms = read_text(&hit.fields, "execution_time_ms")?
            .parse()
            .unwrap_or(0);
        let query_type = QueryType::parse(&read_text(&hit.fields, "query_type")?);

        Some(PatternSummary {
            query_type,
            tools_used,
            success_score,
            execution_time_ms,
            similarity: hit.score,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classifier_vocabulary() {
        assert_eq!(
            classify_query("average heart rate last week"),
            QueryType::Aggregation
        );
        assert_eq!(classify_query("how many workouts in March"), QueryType::Aggregation);
        assert_eq!(classify_query("is my pace improving"), QueryType::Trend);
        assert_eq!(
            classify_query("compare this month against February"),
            QueryType::Comparison
        );
        assert_eq!(classify_query("show my latest run"), QueryType::Lookup);
        assert_eq!(classify_query("should I stretch before bed"), QueryType::General);
    }

    #[test]
    fn test_classifier_is_deterministic() {
        let query = "total calories burned per week";
        assert_eq!(classify_query(query), classify_query(query));
    }

    #[test]
    fn test_pattern_hash_ignores_tool_order() {
        let a = pattern_hash(
            "weekly summary",
            &["search".to_string(), "aggregate_metrics".to_string()],
        );
        let b = pattern_hash(
            "weekly summary",
            &["aggregate_metrics".to_string(), "search".to_string()],
        );
        assert_eq!(a, b);
        assert_eq!(a.len(), PATTERN_HASH_LEN);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_pattern_hash_distinguishes_queries_and_tools() {
        let base = pattern_hash("weekly summary", &["search".to_string()]);
        assert_ne!(base, pattern_hash("daily summary", &["search".to_string()]));
        assert_ne!(
            base,
            pattern_hash("weekly summary", &["aggregate_metrics".to_string()])
        );
    }

    #[test]
    fn test_flatten_hit_parses_fields() {
        let mut fields = std::collections::HashMap::new();
        fields.insert("tools_used".to_string(), br#"["aggregate_metrics"]"#.to_vec());
        fields.insert("success_score".to_string(), b"0.9".to_vec());
        fields.insert("execution_time_ms".to_string(), b"420".to_vec());
        fields.insert("query_type".to_string(), b"aggregation".to_vec());
        let hit = KnnHit {
            key: "procedural:abc:1700000000".to_string(),
            score: 0.8,
            fields,
        };

        let summary = ProceduralMemory::flatten_hit(&hit).unwrap();
        assert_eq!(summary.query_type, QueryType::Aggregation);
        assert_eq!(summary.tools_used, vec!["aggregate_metrics"]);
        assert!((summary.success_score - 0.9).abs() < 1e-6);
        assert_eq!(summary.execution_time_ms, 420);
    }

    #[test]
    fn test_flatten_hit_rejects_incomplete_records() {
        let hit = KnnHit {
            key: "procedural:abc:1700000000".to_string(),
            score: 0.8,
            fields: std::collections::HashMap::new(),
        };
        assert!(ProceduralMemory::flatten_hit(&hit).is_none());
    }

    #[test]
    fn test_empty_slice_keeps_classification() {
        let slice = ProceduralSlice::empty(QueryType::Aggregation);
        assert_eq!(slice.query_type, QueryType::Aggregation);
        assert!(slice.plan.is_none());
        assert!(slice.patterns.is_empty());
    }
}
