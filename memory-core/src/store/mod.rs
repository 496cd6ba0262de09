//! # KV+Vector backend abstraction
//!
//! Narrow, backend-agnostic trait for everything the memory tiers need from
//! the backing store: strings, hashes, ordered logs, score-ordered sets,
//! TTLs, atomic pipelines and an approximate-nearest-neighbor vector index.
//!
//! Backends implement [`KvStore`]; resilience (bounded pool, per-op
//! deadline, circuit breaker) is layered on top by
//! [`resilient::ResilientStore`] so every backend inherits it.

pub mod circuit_breaker;
pub mod resilient;

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{Error, Result};

/// Distance metric for a vector index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Distance {
    /// Cosine distance; the only metric this deployment uses
    #[default]
    Cosine,
}

/// Index structure used for approximate nearest-neighbor search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IndexAlgorithm {
    /// Hierarchical navigable small-world graph
    #[default]
    Hnsw,
}

/// Schema of a vector index over hash records sharing a key prefix.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorIndexSchema {
    /// Key prefix of the hashes this index covers (e.g. `episodic:`)
    pub prefix: String,
    /// Embedding dimensionality
    pub dim: usize,
    /// Distance metric
    pub distance: Distance,
    /// Index algorithm
    pub algorithm: IndexAlgorithm,
    /// Exact-match filterable fields (e.g. `user_id`, `category`)
    pub tag_fields: Vec<String>,
    /// Free-text fields returned with hits
    pub text_fields: Vec<String>,
    /// Numeric fields returned with hits
    pub numeric_fields: Vec<String>,
}

impl VectorIndexSchema {
    /// Cosine/HNSW schema over a prefix, the shape every tier uses.
    #[must_use]
    pub fn cosine_hnsw(prefix: &str, dim: usize) -> Self {
        Self {
            prefix: prefix.to_string(),
            dim,
            distance: Distance::Cosine,
            algorithm: IndexAlgorithm::Hnsw,
            tag_fields: Vec::new(),
            text_fields: Vec::new(),
            numeric_fields: Vec::new(),
        }
    }

    /// Add a filterable tag field.
    #[must_use]
    pub fn with_tag(mut self, field: &str) -> Self {
        self.tag_fields.push(field.to_string());
        self
    }

    /// Add a returned text field.
    #[must_use]
    pub fn with_text(mut self, field: &str) -> Self {
        self.text_fields.push(field.to_string());
        self
    }

    /// Add a returned numeric field.
    #[must_use]
    pub fn with_numeric(mut self, field: &str) -> Self {
        self.numeric_fields.push(field.to_string());
        self
    }
}

/// Exact-match tag filter applied during a KNN search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KnnFilter {
    /// Tag field to match
    pub field: String,
    /// Required value
    pub equals: String,
}

impl KnnFilter {
    /// Filter requiring `field == value`.
    #[must_use]
    pub fn eq(field: &str, value: &str) -> Self {
        Self {
            field: field.to_string(),
            equals: value.to_string(),
        }
    }
}

/// One nearest-neighbor hit.
///
/// `score` is cosine *similarity* in `[0, 1]` (1 = identical direction);
/// backends convert from whatever distance their index reports.
#[derive(Debug, Clone)]
pub struct KnnHit {
    /// Key of the matching hash record
    pub key: String,
    /// Cosine similarity to the query vector
    pub score: f32,
    /// Requested fields of the record (binary-safe)
    pub fields: HashMap<String, Vec<u8>>,
}

// ============================================================================
// Pipelines
// ============================================================================

/// A single buffered write inside a [`Pipeline`].
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineOp {
    /// `SET key value`
    Set {
        /// Target key
        key: String,
        /// String payload
        value: String,
    },
    /// `DEL key`
    Del {
        /// Target key
        key: String,
    },
    /// `HSET key field value …`
    HSet {
        /// Target key
        key: String,
        /// Field/value pairs (binary-safe)
        fields: Vec<(String, Vec<u8>)>,
    },
    /// `HINCRBY key field delta`
    HIncrBy {
        /// Target key
        key: String,
        /// Counter field
        field: String,
        /// Signed increment
        delta: i64,
    },
    /// `LPUSH key value …`
    LPush {
        /// Target key
        key: String,
        /// Values pushed at the head, in order
        values: Vec<String>,
    },
    /// `LTRIM key start stop`
    LTrim {
        /// Target key
        key: String,
        /// Inclusive start index
        start: i64,
        /// Inclusive stop index
        stop: i64,
    },
    /// `ZADD key score member …`
    ZAdd {
        /// Target key
        key: String,
        /// `(score, member)` pairs
        members: Vec<(f64, String)>,
    },
    /// `EXPIRE key ttl`
    Expire {
        /// Target key
        key: String,
        /// Time to live
        ttl: Duration,
    },
}

/// Buffered write batch applied atomically by [`KvStore::exec`].
///
/// Readers observe either none or all of the batch; the aggregation
/// indexer and the short-term append depend on this.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Pipeline {
    ops: Vec<PipelineOp>,
}

impl Pipeline {
    /// Empty pipeline.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer a `SET`.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.ops.push(PipelineOp::Set {
            key: key.into(),
            value: value.into(),
        });
        self
    }

    /// Buffer a `DEL`.
    pub fn del(&mut self, key: impl Into<String>) -> &mut Self {
        self.ops.push(PipelineOp::Del { key: key.into() });
        self
    }

    /// Buffer an `HSET`.
    pub fn hset(&mut self, key: impl Into<String>, fields: Vec<(String, Vec<u8>)>) -> &mut Self {
        self.ops.push(PipelineOp::HSet {
            key: key.into(),
            fields,
        });
        self
    }

    /// Buffer an `HINCRBY`.
    pub fn hincrby(
        &mut self,
        key: impl Into<String>,
        field: impl Into<String>,
        delta: i64,
    ) -> &mut Self {
        self.ops.push(PipelineOp::HIncrBy {
            key: key.into(),
            field: field.into(),
            delta,
        });
        self
    }

    /// Buffer an `LPUSH`.
    pub fn lpush(&mut self, key: impl Into<String>, values: Vec<String>) -> &mut Self {
        self.ops.push(PipelineOp::LPush {
            key: key.into(),
            values,
        });
        self
    }

    /// Buffer an `LTRIM`.
    pub fn ltrim(&mut self, key: impl Into<String>, start: i64, stop: i64) -> &mut Self {
        self.ops.push(PipelineOp::LTrim {
            key: key.into(),
            start,
            stop,
        });
        self
    }

    /// Buffer a `ZADD`.
    pub fn zadd(&mut self, key: impl Into<String>, members: Vec<(f64, String)>) -> &mut Self {
        self.ops.push(PipelineOp::ZAdd {
            key: key.into(),
            members,
        });
        self
    }

    /// Buffer an `EXPIRE`.
    pub fn expire(&mut self, key: impl Into<String>, ttl: Duration) -> &mut Self {
        self.ops.push(PipelineOp::Expire {
            key: key.into(),
            ttl,
        });
        self
    }

    /// Number of buffered ops.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// True when nothing is buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Consume the pipeline, yielding its ops in order.
    #[must_use]
    pub fn into_ops(self) -> Vec<PipelineOp> {
        self.ops
    }
}

// ============================================================================
// The backend trait
// ============================================================================

/// Backend-agnostic KV + vector store surface.
///
/// All operations are async; implementations must be safe to call from
/// many tasks concurrently. Hash values are binary-safe byte strings: the
/// reserved `embedding` field carries little-endian f32 bytes, everything
/// else is UTF-8.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Health probe.
    async fn ping(&self) -> Result<()>;

    /// Set a string key.
    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Get a string key.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Delete keys, returning how many existed.
    async fn del(&self, keys: &[String]) -> Result<u64>;

    /// Set a TTL on an existing key. Returns false when the key is absent.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool>;

    /// List keys matching a glob-style pattern. Administrative use only
    /// (`clear_user`); never on a hot path.
    async fn keys(&self, pattern: &str) -> Result<Vec<String>>;

    /// Set hash fields.
    async fn hset(&self, key: &str, fields: &[(String, Vec<u8>)]) -> Result<()>;

    /// Get one hash field.
    async fn hget(&self, key: &str, field: &str) -> Result<Option<Vec<u8>>>;

    /// Get all hash fields.
    async fn hgetall(&self, key: &str) -> Result<HashMap<String, Vec<u8>>>;

    /// Increment a numeric hash field, returning the new value.
    async fn hincrby(&self, key: &str, field: &str, delta: i64) -> Result<i64>;

    /// Push values at the head of a list, returning the new length.
    async fn lpush(&self, key: &str, values: &[String]) -> Result<u64>;

    /// Read a list slice (inclusive indices, 0 = head, -1 = tail).
    async fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>>;

    /// Trim a list to the inclusive index range.
    async fn ltrim(&self, key: &str, start: i64, stop: i64) -> Result<()>;

    /// List length.
    async fn llen(&self, key: &str) -> Result<u64>;

    /// Add scored members to a sorted set, returning how many were new.
    async fn zadd(&self, key: &str, members: &[(f64, String)]) -> Result<u64>;

    /// Members with `min <= score <= max`, ascending by score.
    async fn zrange_by_score(&self, key: &str, min: f64, max: f64) -> Result<Vec<String>>;

    /// Sorted-set cardinality.
    async fn zcard(&self, key: &str) -> Result<u64>;

    /// Apply a buffered batch atomically.
    async fn exec(&self, pipeline: Pipeline) -> Result<()>;

    /// Create a vector index if it does not exist yet.
    ///
    /// Returns true when the index was created, false when it already
    /// existed.
    async fn vector_index_create(&self, name: &str, schema: &VectorIndexSchema) -> Result<bool>;

    /// Write a hash record (fields + embedding) and make it visible to the
    /// index covering its key prefix. When `ttl` is given it is applied in
    /// the same atomic batch as the write, never as a follow-up call.
    async fn vector_upsert(
        &self,
        index: &str,
        key: &str,
        fields: &[(String, Vec<u8>)],
        vector: &[f32],
        ttl: Option<Duration>,
    ) -> Result<()>;

    /// K nearest neighbors by cosine similarity, optionally tag-filtered.
    async fn vector_knn(
        &self,
        index: &str,
        vector: &[f32],
        k: usize,
        filter: Option<&KnnFilter>,
    ) -> Result<Vec<KnnHit>>;

    /// Number of records currently visible to an index.
    async fn vector_count(&self, index: &str) -> Result<u64>;
}

// ============================================================================
// Field encoding helpers
// ============================================================================

/// Reserved hash field holding the embedding bytes.
pub const EMBEDDING_FIELD: &str = "embedding";

/// Encode an embedding as little-endian f32 bytes for the reserved field.
#[must_use]
pub fn encode_vector(vector: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vector.len() * 4);
    for value in vector {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

/// Decode little-endian f32 bytes back into an embedding.
///
/// # Errors
///
/// Returns `InvalidInput` when the byte length is not a multiple of four.
pub fn decode_vector(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return Err(Error::InvalidInput(format!(
            "embedding blob of {} bytes is not a whole number of f32s",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

/// UTF-8 hash field from a string.
#[must_use]
pub fn text_field(name: &str, value: &str) -> (String, Vec<u8>) {
    (name.to_string(), value.as_bytes().to_vec())
}

/// Read a UTF-8 hash field, if present and valid.
#[must_use]
pub fn read_text(fields: &HashMap<String, Vec<u8>>, name: &str) -> Option<String> {
    fields
        .get(name)
        .and_then(|bytes| String::from_utf8(bytes.clone()).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vector_byte_round_trip() {
        let vector = vec![0.25_f32, -1.5, 3.0, 0.0];
        let bytes = encode_vector(&vector);
        assert_eq!(bytes.len(), 16);
        assert_eq!(decode_vector(&bytes).unwrap(), vector);
    }

    #[test]
    fn test_decode_rejects_ragged_blob() {
        let err = decode_vector(&[1, 2, 3]).unwrap_err();
        assert_eq!(err.code(), "invalid_input");
    }

    #[test]
    fn test_pipeline_preserves_op_order() {
        let mut pipe = Pipeline::new();
        pipe.del("agg:u1:days")
            .hincrby("agg:u1:days", "Mon", 1)
            .expire("agg:u1:days", Duration::from_secs(60));

        let ops = pipe.into_ops();
        assert_eq!(ops.len(), 3);
        assert!(matches!(ops[0], PipelineOp::Del { .. }));
        assert!(matches!(ops[1], PipelineOp::HIncrBy { delta: 1, .. }));
        assert!(matches!(ops[2], PipelineOp::Expire { .. }));
    }

    #[test]
    fn test_schema_builder() {
        let schema = VectorIndexSchema::cosine_hnsw("episodic:", 384)
            .with_tag("user_id")
            .with_tag("event_type")
            .with_text("description");

        assert_eq!(schema.prefix, "episodic:");
        assert_eq!(schema.dim, 384);
        assert_eq!(schema.tag_fields, vec!["user_id", "event_type"]);
        assert_eq!(schema.text_fields, vec!["description"]);
    }

    #[test]
    fn test_text_field_round_trip() {
        let mut fields = HashMap::new();
        let (name, value) = text_field("description", "morning run");
        fields.insert(name, value);
        assert_eq!(
            read_text(&fields, "description"),
            Some("morning run".to_string())
        );
        assert_eq!(read_text(&fields, "missing"), None);
    }
}
