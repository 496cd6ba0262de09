#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

//! Test utilities shared across the workspace.
//!
//! The centerpiece is [`BagOfWordsEmbedder`]: a deterministic embedding
//! provider whose vectors actually encode word overlap, so similarity
//! ranking in tests behaves the way a real model's would ("what's my
//! weight goal" lands near "User's weight goal is 125 lbs") without any
//! model download.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rand::{RngExt, SeedableRng};
use rand_chacha::ChaCha8Rng;

use wellness_memory_core::aggregation::AggregateItem;
use wellness_memory_core::embeddings::EmbeddingProvider;
use wellness_memory_core::store::{KnnFilter, KnnHit, KvStore, Pipeline, VectorIndexSchema};
use wellness_memory_core::types::{SessionId, ToolInvocation, TurnInput, UserId};
use wellness_memory_core::{Error, Result};

/// Default dimensionality for test embeddings. Small keeps tests fast;
/// word-hash collisions at this size are rare enough not to matter.
pub const TEST_DIM: usize = 64;

// ============================================================================
// Embedding providers
// ============================================================================

/// Deterministic bag-of-words embedding provider.
///
/// Each lowercased word hashes to a bucket; bucket counts are normalized
/// to a unit vector. Texts sharing words end up with high cosine
/// similarity, disjoint texts near zero.
pub struct BagOfWordsEmbedder {
    dimension: usize,
}

impl BagOfWordsEmbedder {
    /// Provider with the default test dimensionality.
    #[must_use]
    pub fn new() -> Self {
        Self::with_dimension(TEST_DIM)
    }

    /// Provider with a specific dimensionality.
    #[must_use]
    pub fn with_dimension(dimension: usize) -> Self {
        Self { dimension }
    }

    fn bucket(&self, word: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        word.hash(&mut hasher);
        (hasher.finish() as usize) % self.dimension
    }

    fn vectorize(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0_f32; self.dimension];
        for word in text.to_lowercase().split(|c: char| !c.is_alphanumeric()) {
            if word.is_empty() {
                continue;
            }
            vector[self.bucket(word)] += 1.0;
        }
        let magnitude = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for x in &mut vector {
                *x /= magnitude;
            }
        } else {
            // Embeddings must never be all-zero; park empty text on a
            // dedicated axis
            vector[0] = 1.0;
        }
        vector
    }
}

impl Default for BagOfWordsEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EmbeddingProvider for BagOfWordsEmbedder {
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.vectorize(text))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        "bag-of-words-test"
    }
}

/// Provider that always refuses, for write-abort and degradation tests.
pub struct FailingEmbedder {
    dimension: usize,
}

impl FailingEmbedder {
    /// Refusing provider with the default test dimensionality.
    #[must_use]
    pub fn new() -> Self {
        Self {
            dimension: TEST_DIM,
        }
    }
}

impl Default for FailingEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EmbeddingProvider for FailingEmbedder {
    async fn embed_text(&self, _text: &str) -> Result<Vec<f32>> {
        Err(Error::EmbeddingUnavailable(
            "test provider is configured to fail".to_string(),
        ))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        "failing-test"
    }
}

/// Wrapper counting provider calls, for single-flight assertions.
pub struct CountingEmbedder<P> {
    inner: P,
    calls: AtomicU64,
}

impl<P> CountingEmbedder<P> {
    /// Wrap a provider.
    #[must_use]
    pub fn new(inner: P) -> Self {
        Self {
            inner,
            calls: AtomicU64::new(0),
        }
    }

    /// Provider calls observed so far.
    #[must_use]
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<P: EmbeddingProvider> EmbeddingProvider for CountingEmbedder<P> {
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.embed_text(text).await
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }
}

// ============================================================================
// Failure-injecting store
// ============================================================================

/// [`KvStore`] wrapper with switchable failure injection.
///
/// `fail_all` poisons every operation; `fail_vector_search` only the KNN
/// path, which is how single-tier degradation is exercised.
pub struct FailingStore {
    inner: Arc<dyn KvStore>,
    fail_all: AtomicBool,
    fail_vector_search: AtomicBool,
}

impl FailingStore {
    /// Wrap a healthy store; nothing fails until a switch is flipped.
    #[must_use]
    pub fn new(inner: Arc<dyn KvStore>) -> Self {
        Self {
            inner,
            fail_all: AtomicBool::new(false),
            fail_vector_search: AtomicBool::new(false),
        }
    }

    /// Make every operation fail (or recover).
    pub fn set_fail_all(&self, fail: bool) {
        self.fail_all.store(fail, Ordering::SeqCst);
    }

    /// Make only `vector_knn` fail (or recover).
    pub fn set_fail_vector_search(&self, fail: bool) {
        self.fail_vector_search.store(fail, Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if self.fail_all.load(Ordering::SeqCst) {
            return Err(Error::BackendUnavailable {
                reason: "injected failure".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl KvStore for FailingStore {
    async fn ping(&self) -> Result<()> {
        self.check()?;
        self.inner.ping().await
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.check()?;
        self.inner.set(key, value).await
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.check()?;
        self.inner.get(key).await
    }

    async fn del(&self, keys: &[String]) -> Result<u64> {
        self.check()?;
        self.inner.del(keys).await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        self.check()?;
        self.inner.expire(key, ttl).await
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        self.check()?;
        self.inner.keys(pattern).await
    }

    async fn hset(&self, key: &str, fields: &[(String, Vec<u8>)]) -> Result<()> {
        self.check()?;
        self.inner.hset(key, fields).await
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<Vec<u8>>> {
        self.check()?;
        self.inner.hget(key, field).await
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, Vec<u8>>> {
        self.check()?;
        self.inner.hgetall(key).await
    }

    async fn hincrby(&self, key: &str, field: &str, delta: i64) -> Result<i64> {
        self.check()?;
        self.inner.hincrby(key, field, delta).await
    }

    async fn lpush(&self, key: &str, values: &[String]) -> Result<u64> {
        self.check()?;
        self.inner.lpush(key, values).await
    }

    async fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>> {
        self.check()?;
        self.inner.lrange(key, start, stop).await
    }

    async fn ltrim(&self, key: &str, start: i64, stop: i64) -> Result<()> {
        self.check()?;
        self.inner.ltrim(key, start, stop).await
    }

    async fn llen(&self, key: &str) -> Result<u64> {
        self.check()?;
        self.inner.llen(key).await
    }

    async fn zadd(&self, key: &str, members: &[(f64, String)]) -> Result<u64> {
        self.check()?;
        self.inner.zadd(key, members).await
    }

    async fn zrange_by_score(&self, key: &str, min: f64, max: f64) -> Result<Vec<String>> {
        self.check()?;
        self.inner.zrange_by_score(key, min, max).await
    }

    async fn zcard(&self, key: &str) -> Result<u64> {
        self.check()?;
        self.inner.zcard(key).await
    }

    async fn exec(&self, pipeline: Pipeline) -> Result<()> {
        self.check()?;
        self.inner.exec(pipeline).await
    }

    async fn vector_index_create(&self, name: &str, schema: &VectorIndexSchema) -> Result<bool> {
        self.check()?;
        self.inner.vector_index_create(name, schema).await
    }

    async fn vector_upsert(
        &self,
        index: &str,
        key: &str,
        fields: &[(String, Vec<u8>)],
        vector: &[f32],
        ttl: Option<Duration>,
    ) -> Result<()> {
        self.check()?;
        self.inner.vector_upsert(index, key, fields, vector, ttl).await
    }

    async fn vector_knn(
        &self,
        index: &str,
        vector: &[f32],
        k: usize,
        filter: Option<&KnnFilter>,
    ) -> Result<Vec<KnnHit>> {
        self.check()?;
        if self.fail_vector_search.load(Ordering::SeqCst) {
            return Err(Error::BackendUnavailable {
                reason: "injected vector search failure".to_string(),
            });
        }
        self.inner.vector_knn(index, vector, k, filter).await
    }

    async fn vector_count(&self, index: &str) -> Result<u64> {
        self.check()?;
        self.inner.vector_count(index).await
    }
}

// ============================================================================
// Fixtures
// ============================================================================

/// A plain conversational turn with no tools and no goal statement.
#[must_use]
pub fn chat_turn(user: &UserId, session: &SessionId) -> TurnInput {
    TurnInput {
        user: user.clone(),
        session: session.clone(),
        user_message: "how was my week".to_string(),
        assistant_message: "You trained four times, nice consistency.".to_string(),
        tool_trace: Vec::new(),
        success_score: 1.0,
        execution_time_ms: 25,
    }
}

/// A turn whose user message states a goal in the canonical form.
#[must_use]
pub fn goal_turn(user: &UserId, session: &SessionId) -> TurnInput {
    TurnInput {
        user: user.clone(),
        session: session.clone(),
        user_message: "my weight goal is 125 lbs".to_string(),
        assistant_message: "Got it, targeting 125 lbs.".to_string(),
        tool_trace: Vec::new(),
        success_score: 1.0,
        execution_time_ms: 30,
    }
}

/// A turn that executed tools, eligible for procedural capture.
#[must_use]
pub fn tool_turn(user: &UserId, session: &SessionId, tools: &[&str], score: f32) -> TurnInput {
    TurnInput {
        user: user.clone(),
        session: session.clone(),
        user_message: "average heart rate last week".to_string(),
        assistant_message: "Your average heart rate was 72 bpm.".to_string(),
        tool_trace: tools
            .iter()
            .map(|name| ToolInvocation {
                name: (*name).to_string(),
                input: "last week".to_string(),
                output_json: serde_json::json!({"average": "72 bpm"}),
            })
            .collect(),
        success_score: score,
        execution_time_ms: 180,
    }
}

/// Deterministic workout items spread across a week, for aggregation
/// tests. Same seed, same items.
#[must_use]
pub fn seeded_workouts(seed: u64, count: usize, week_start: DateTime<Utc>) -> Vec<AggregateItem> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let types = ["run", "bike", "strength", "yoga"];
    let days = ["Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];

    (0..count)
        .map(|_| {
            let day_offset = rng.random_range(0..7_i64);
            let secs = rng.random_range(0..86_400_i64);
            let ts = week_start + chrono::Duration::days(day_offset) + chrono::Duration::seconds(secs);
            let item_type = types[rng.random_range(0..types.len())];
            AggregateItem::new(
                ts,
                item_type,
                days[day_offset as usize],
                vec![
                    ("type".to_string(), item_type.to_string()),
                    (
                        "duration_min".to_string(),
                        rng.random_range(15..90).to_string(),
                    ),
                    (
                        "calories".to_string(),
                        rng.random_range(80..700).to_string(),
                    ),
                ],
            )
        })
        .collect()
}

/// Midnight UTC of a fixed Monday, a convenient week anchor.
#[must_use]
pub fn monday() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 11, 0, 0, 0).unwrap()
}
