//! Resilience decorator for any [`KvStore`] backend.
//!
//! Wraps every call with, in order: a bounded concurrency pool (semaphore
//! with acquire deadline), the shared circuit breaker, and a per-operation
//! deadline. Backends stay simple; every component talking through the
//! decorated handle shares one breaker and one pool.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tracing::warn;

use crate::config::StoreConfig;
use crate::error::{Error, Result};
use crate::store::circuit_breaker::{CircuitBreaker, CircuitBreakerStats};
use crate::store::{KnnFilter, KnnHit, KvStore, Pipeline, VectorIndexSchema};

/// [`KvStore`] decorator adding pool bounds, deadlines and a circuit
/// breaker.
///
/// The pool permit is held for the duration of the backend round-trip;
/// it is a counting semaphore, not a mutex, so concurrent operations
/// proceed up to `pool_max` in flight.
pub struct ResilientStore {
    inner: Arc<dyn KvStore>,
    breaker: Arc<CircuitBreaker>,
    permits: Arc<Semaphore>,
    op_timeout: Duration,
    acquire_timeout: Duration,
}

impl ResilientStore {
    /// Wrap a backend with the resilience policy from `config`.
    #[must_use]
    pub fn new(inner: Arc<dyn KvStore>, config: &StoreConfig) -> Self {
        Self {
            inner,
            breaker: Arc::new(CircuitBreaker::new(
                config.cb_failure_threshold,
                config.cb_open_duration,
            )),
            permits: Arc::new(Semaphore::new(config.pool_max.max(1))),
            op_timeout: config.op_timeout,
            acquire_timeout: config.pool_acquire_timeout,
        }
    }

    /// The shared breaker, for stats and manual reset.
    #[must_use]
    pub fn breaker(&self) -> Arc<CircuitBreaker> {
        Arc::clone(&self.breaker)
    }

    /// Snapshot of breaker statistics.
    pub async fn breaker_stats(&self) -> CircuitBreakerStats {
        self.breaker.stats().await
    }

    async fn run<T, F, Fut>(&self, op: &'static str, f: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let permit =
            match tokio::time::timeout(self.acquire_timeout, self.permits.acquire()).await {
                Ok(Ok(permit)) => permit,
                Ok(Err(_)) => {
                    return Err(Error::BackendUnavailable {
                        reason: "connection pool closed".to_string(),
                    });
                }
                Err(_) => {
                    warn!(op, "backend pool exhausted");
                    return Err(Error::BackendUnavailable {
                        reason: "connection pool exhausted".to_string(),
                    });
                }
            };

        let op_timeout = self.op_timeout;
        let result = self
            .breaker
            .call(|| async {
                match tokio::time::timeout(op_timeout, f()).await {
                    Ok(result) => result,
                    Err(_) => Err(Error::BackendTimeout { op: op.to_string() }),
                }
            })
            .await;
        drop(permit);
        result
    }
}

#[async_trait]
impl KvStore for ResilientStore {
    async fn ping(&self) -> Result<()> {
        self.run("ping", || self.inner.ping()).await
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.run("set", || self.inner.set(key, value)).await
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.run("get", || self.inner.get(key)).await
    }

    async fn del(&self, keys: &[String]) -> Result<u64> {
        self.run("del", || self.inner.del(keys)).await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        self.run("expire", || self.inner.expire(key, ttl)).await
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        self.run("keys", || self.inner.keys(pattern)).await
    }

    async fn hset(&self, key: &str, fields: &[(String, Vec<u8>)]) -> Result<()> {
        self.run("hset", || self.inner.hset(key, fields)).await
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<Vec<u8>>> {
        self.run("hget", || self.inner.hget(key, field)).await
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, Vec<u8>>> {
        self.run("hgetall", || self.inner.hgetall(key)).await
    }

    async fn hincrby(&self, key: &str, field: &str, delta: i64) -> Result<i64> {
        self.run("hincrby", || self.inner.hincrby(key, field, delta))
            .await
    }

    async fn lpush(&self, key: &str, values: &[String]) -> Result<u64> {
        self.run("lpush", || self.inner.lpush(key, values)).await
    }

    async fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>> {
        self.run("lrange", || self.inner.lrange(key, start, stop))
            .await
    }

    async fn ltrim(&self, key: &str, start: i64, stop: i64) -> Result<()> {
        self.run("ltrim", || self.inner.ltrim(key, start, stop))
            .await
    }

    async fn llen(&self, key: &str) -> Result<u64> {
        self.run("llen", || self.inner.llen(key)).await
    }

    async fn zadd(&self, key: &str, members: &[(f64, String)]) -> Result<u64> {
        self.run("zadd", || self.inner.zadd(key, members)).await
    }

    async fn zrange_by_score(&self, key: &str, min: f64, max: f64) -> Result<Vec<String>> {
        self.run("zrange_by_score", || {
            self.inner.zrange_by_score(key, min, max)
        })
        .await
    }

    async fn zcard(&self, key: &str) -> Result<u64> {
        self.run("zcard", || self.inner.zcard(key)).await
    }

    async fn exec(&self, pipeline: Pipeline) -> Result<()> {
        self.run("exec", || self.inner.exec(pipeline)).await
    }

    async fn vector_index_create(&self, name: &str, schema: &VectorIndexSchema) -> Result<bool> {
        self.run("vector_index_create", || {
            self.inner.vector_index_create(name, schema)
        })
        .await
    }

    async fn vector_upsert(
        &self,
        index: &str,
        key: &str,
        fields: &[(String, Vec<u8>)],
        vector: &[f32],
        ttl: Option<Duration>,
    ) -> Result<()> {
        self.run("vector_upsert", || {
            self.inner.vector_upsert(index, key, fields, vector, ttl)
        })
        .await
    }

    async fn vector_knn(
        &self,
        index: &str,
        vector: &[f32],
        k: usize,
        filter: Option<&KnnFilter>,
    ) -> Result<Vec<KnnHit>> {
        self.run("vector_knn", || self.inner.vector_knn(index, vector, k, filter))
            .await
    }

    async fn vector_count(&self, index: &str) -> Result<u64> {
        self.run("vector_count", || self.inner.vector_count(index))
            .await
    }
}
