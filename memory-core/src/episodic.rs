//! Episodic memory: user-scoped facts retrieved by semantic similarity.
//!
//! Goals, preferences and observations are stored as vectorized hash
//! records under `episodic:{user}:{event_type}:{ts}` and searched through
//! the `episodic_idx` vector index, always filtered to the owning user.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::embeddings::EmbeddingService;
use crate::error::{Error, MemoryTier, Result};
use crate::keys;
use crate::store::{read_text, KnnFilter, KnnHit, KvStore, VectorIndexSchema};
use crate::types::{EpisodicRecord, EventType, KnownMetadata, RecordMetadata, UserId};

use crate::keys::EPISODIC_INDEX as INDEX;

/// One retrieved episodic record, flattened for the context bundle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EpisodicHit {
    /// Original record description
    pub description: String,
    /// Metric name when the record is a quantified goal
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metric: Option<String>,
    /// Target value when the record is a quantified goal
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    /// Unit when the record is a quantified goal
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    /// Free-form goal text when the record is one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub goal_text: Option<String>,
    /// Cosine similarity to the query
    pub score: f32,
}

/// The episodic slice of a context bundle.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EpisodicSlice {
    /// Rendered context lines, one per hit
    pub context: Option<String>,
    /// Number of hits
    pub hits: usize,
    /// The hits themselves
    pub records: Vec<EpisodicHit>,
}

impl EpisodicSlice {
    /// Slice with no data, used for degradation.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }
}

/// User-scoped fact storage and retrieval.
#[derive(Clone)]
pub struct EpisodicMemory {
    store: Arc<dyn KvStore>,
    embeddings: Arc<EmbeddingService>,
    ttl: Duration,
}

impl EpisodicMemory {
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
            keys::tier_prefix(MemoryTier::Episodic),
            self.embeddings.dimension(),
        )
        .with_tag("user_id")
        .with_tag("event_type")
        .with_text("description")
        .with_text("metadata")
        .with_numeric("timestamp");
        self.store.vector_index_create(INDEX, &schema).await
    }

    /// Store one fact for a user.
    ///
    /// # Errors
    ///
    /// `InvalidInput` for an empty description. Embedding or backend
    /// failure aborts the write as `WriteFailed { tier: Episodic }`.
    pub async fn store(
        &self,
        user: &UserId,
        event_type: EventType,
        description: &str,
        metadata: RecordMetadata,
    ) -> Result<()> {
        if description.trim().is_empty() {
            return Err(Error::InvalidInput(
                "episodic description must not be empty".to_string(),
            ));
        }

        let mut record = EpisodicRecord::new(user.clone(), event_type, description, metadata);
        record.embedding = self
            .embeddings
            .embed(description)
            .await
            .map_err(|err| Error::WriteFailed {
                tier: MemoryTier::Episodic,
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
                tier: MemoryTier::Episodic,
                reason: err.to_string(),
            })?;

        debug!(user = %user, event_type = record.event_type.as_str(), "stored episodic record");
        Ok(())
    }

    /// Retrieve the `k` most relevant facts for a user query.
    ///
    /// Embedding failure on the read path degrades to an empty slice;
    /// backend failure surfaces as `RetrievalFailed` for the coordinator
    /// to swallow.
    ///
    /// # Errors
    ///
    /// `RetrievalFailed { tier: Episodic }` on backend trouble.
    pub async fn retrieve(&self, user: &UserId, query: &str, k: usize) -> Result<EpisodicSlice> {
        if k == 0 || query.trim().is_empty() {
            return Ok(EpisodicSlice::empty());
        }

        let vector = match self.embeddings.embed(query).await {
            Ok(vector) => vector,
            Err(err) => {
                warn!(user = %user, "episodic query embedding failed, returning empty: {}", err);
                return Ok(EpisodicSlice::empty());
            }
        };

        let filter = KnnFilter::eq("user_id", user.as_str());
        let hits = self
            .store
            .vector_knn(INDEX, &vector, k, Some(&filter))
            .await
            .map_err(|err| Error::RetrievalFailed {
                tier: MemoryTier::Episodic,
                reason: err.to_string(),
            })?;

        let records: Vec<EpisodicHit> = hits.iter().map(Self::flatten_hit).collect();
        let lines: Vec<String> = records.iter().map(render_line).collect();
        let context = if lines.is_empty() {
            None
        } else {
            Some(lines.join("\n"))
        };

        Ok(EpisodicSlice {
            context,
            hits: records.len(),
            records,
        })
    }

    /// Number of records stored for a user.
    ///
    /// # Errors
    ///
    /// Backend errors pass through.
    pub async fn count(&self, user: &UserId) -> Result<usize> {
        let found = self.store.keys(&keys::episodic_user_pattern(user)).await?;
        Ok(found.len())
    }

    /// Delete every record belonging to a user.
    ///
    /// # Errors
    ///
    /// `WriteFailed` on backend trouble.
    pub async fn clear(&self, user: &UserId) -> Result<u64> {
        let found = self
            .store
            .keys(&keys::episodic_user_pattern(user))
            .await
            .map_err(|err| Error::WriteFailed {
                tier: MemoryTier::Episodic,
                reason: err.to_string(),
            })?;
        if found.is_empty() {
            return Ok(0);
        }
        self.store.del(&found).await.map_err(|err| Error::WriteFailed {
            tier: MemoryTier::Episodic,
            reason: err.to_string(),
        })
    }

    fn flatten_hit(hit: &KnnHit) -> EpisodicHit {
        let description = read_text(&hit.fields, "description").unwrap_or_default();
        let metadata = read_text(&hit.fields, "metadata")
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .map(RecordMetadata::from_value)
            .unwrap_or_default();

        let mut flattened = EpisodicHit {
            description,
            score: hit.score,
            ..EpisodicHit::default()
        };
        match metadata.known_shape() {
            KnownMetadata::MetricGoal {
                metric,
                value,
                unit,
            } => {
                flattened.metric = Some(metric);
                flattened.value = Some(value);
                flattened.unit = Some(unit);
            }
            KnownMetadata::FreeformGoal { goal_text } => {
                flattened.goal_text = Some(goal_text);
            }
            KnownMetadata::Opaque => {}
        }
        flattened
    }
}

/// Contextual rendering rule: quantified goals get the compact metric
/// form, free-form goals get a `Goal:` prefix, everything else falls back
/// to the record description.
fn render_line(hit: &EpisodicHit) -> String {
    if let (Some(metric), Some(value), Some(unit)) = (&hit.metric, hit.value, &hit.unit) {
        return format!(
            "{} goal: {} {}",
            capitalize(metric),
            format_value(value),
            unit
        );
    }
    if let Some(goal_text) = &hit.goal_text {
        return format!("Goal: {goal_text}");
    }
    hit.description.clone()
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

/// Render a value without a trailing `.0` for whole numbers.
fn format_value(value: f64) -> String {
    if (value.fract()).abs() < f64::EPSILON {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}
