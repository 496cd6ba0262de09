//! # Embeddings
//!
//! The injected provider capability plus the two-level cache in front of
//! it. Every tier asks [`EmbeddingService`] for vectors; nothing else in
//! the system talks to the provider directly.
//!
//! Cache layout: L1 is an in-process LRU keyed by fingerprint; L2 is the
//! KV entry `embedding_cache:{fingerprint}` (JSON vector) with its own
//! TTL, shared across process restarts. Concurrent misses on the same
//! fingerprint coalesce to a single provider call.

mod cache;
mod provider;
pub mod similarity;

pub use cache::{fingerprint, EmbeddingCacheStats};
pub use provider::EmbeddingProvider;

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex as SyncMutex;
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::keys;
use crate::store::{KvStore, Pipeline};
use cache::{L1Cache, StatsCell};

/// Embedding generation with caching and request coalescing.
///
/// Shared process-wide: the builder constructs one and hands clones of the
/// `Arc` to every tier manager.
pub struct EmbeddingService {
    provider: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn KvStore>,
    l1: L1Cache,
    in_flight: AsyncMutex<HashMap<String, Arc<AsyncMutex<()>>>>,
    stats: SyncMutex<StatsCell>,
    dimension: usize,
    ttl: std::time::Duration,
}

impl EmbeddingService {
    /// Wire a provider and a KV store into a caching service.
    ///
    /// `dimension` is the deployment-wide vector dimensionality; vectors
    /// of any other length are rejected wherever they appear.
    #[must_use]
    pub fn new(
        provider: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn KvStore>,
        dimension: usize,
        ttl: std::time::Duration,
        l1_capacity: usize,
    ) -> Self {
        Self {
            provider,
            store,
            l1: L1Cache::new(l1_capacity),
            in_flight: AsyncMutex::new(HashMap::new()),
            stats: SyncMutex::new(StatsCell::default()),
            dimension,
            ttl,
        }
    }

    /// The deployment-wide embedding dimensionality.
    #[must_use]
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Embed one text, answering from cache when possible.
    ///
    /// # Errors
    ///
    /// `InvalidInput` for empty text or a provider vector of the wrong
    /// length; `EmbeddingUnavailable` when the provider cannot answer.
    /// Backend trouble during cache reads/writes degrades to a provider
    /// call rather than failing the embed.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if text.trim().is_empty() {
            return Err(Error::InvalidInput(
                "cannot embed empty text".to_string(),
            ));
        }

        let fp = fingerprint(text);

        if let Some(vector) = self.lookup(&fp).await {
            self.stats.lock().record_hit();
            return Ok(vector);
        }

        // Single-flight: one provider call per fingerprint. The guard map
        // lock is held only to fetch the per-fingerprint entry.
        let gate = {
            let mut map = self.in_flight.lock().await;
            Arc::clone(
                map.entry(fp.clone())
                    .or_insert_with(|| Arc::new(AsyncMutex::new(()))),
            )
        };
        let _leader = gate.lock().await;

        // A coalesced waiter finds the leader's result already cached.
        if let Some(vector) = self.lookup(&fp).await {
            self.stats.lock().record_coalesced_hit();
            return Ok(vector);
        }

        let result = self.fill(&fp, text).await;

        // Drop the gate entry on every path, success or not
        let mut map = self.in_flight.lock().await;
        map.remove(&fp);

        result
    }

    /// Leader path of a cache miss: call the provider, validate, persist.
    async fn fill(&self, fp: &str, text: &str) -> Result<Vec<f32>> {
        let started = Instant::now();
        let vector = self.provider.embed_text(text).await?;
        let latency_ms = started.elapsed().as_secs_f64() * 1000.0;

        if vector.len() != self.dimension {
            return Err(Error::InvalidInput(format!(
                "provider '{}' returned {} dims, expected {}",
                self.provider.model_name(),
                vector.len(),
                self.dimension
            )));
        }

        self.persist(fp, &vector).await;
        self.l1.put(fp.to_string(), vector.clone());
        self.stats.lock().record_provider_call(latency_ms);
        Ok(vector)
    }

    /// Snapshot of cache statistics.
    #[must_use]
    pub fn stats(&self) -> EmbeddingCacheStats {
        self.stats.lock().snapshot()
    }

    /// L1 → L2 lookup. Backend errors count as a miss.
    async fn lookup(&self, fp: &str) -> Option<Vec<f32>> {
        if let Some(vector) = self.l1.get(fp) {
            return Some(vector);
        }

        let key = keys::embedding_cache(fp);
        match self.store.get(&key).await {
            Ok(Some(json)) => match serde_json::from_str::<Vec<f32>>(&json) {
                Ok(vector) if vector.len() == self.dimension => {
                    self.l1.put(fp.to_string(), vector.clone());
                    Some(vector)
                }
                Ok(vector) => {
                    warn!(
                        fingerprint = fp,
                        dims = vector.len(),
                        "cached embedding has stale dimensionality, ignoring"
                    );
                    None
                }
                Err(err) => {
                    warn!(fingerprint = fp, "corrupt cached embedding: {}", err);
                    None
                }
            },
            Ok(None) => None,
            Err(err) => {
                debug!(fingerprint = fp, "embedding cache read failed: {}", err);
                None
            }
        }
    }

    /// Write the L2 entry with its TTL in one pipeline. A cache-write
    /// failure is logged, not surfaced: the embedding itself succeeded.
    async fn persist(&self, fp: &str, vector: &[f32]) {
        let json = match serde_json::to_string(vector) {
            Ok(json) => json,
            Err(err) => {
                warn!(fingerprint = fp, "could not serialize embedding: {}", err);
                return;
            }
        };

        let key = keys::embedding_cache(fp);
        let mut pipe = Pipeline::new();
        pipe.set(&key, json).expire(&key, self.ttl);
        if let Err(err) = self.store.exec(pipe).await {
            warn!(fingerprint = fp, "embedding cache write failed: {}", err);
        }
    }
}
