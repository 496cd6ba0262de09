#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::missing_errors_doc)]

//! Redis backend for the wellness memory system.
//!
//! Implements the core [`KvStore`] trait over a multiplexed
//! [`ConnectionManager`]: plain keyspace commands map one-to-one,
//! [`Pipeline`] batches run as `MULTI`/`EXEC`, and the vector surface maps
//! to RediSearch (`FT.CREATE` with an HNSW cosine field, `FT.SEARCH` with
//! a `KNN` clause, `FT.INFO` for counts).
//!
//! Resilience (pool bound, deadlines, circuit breaker) is not duplicated
//! here; the core's `ResilientStore` wraps this type.

mod search;

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::{debug, info};

use wellness_memory_core::store::{
    encode_vector, KnnFilter, KnnHit, KvStore, Pipeline, PipelineOp, VectorIndexSchema,
    EMBEDDING_FIELD,
};
use wellness_memory_core::{Error, Result};

use search::{build_knn_query, parse_ft_info_num_docs, parse_ft_search_reply};

/// Translate a transport error into the core taxonomy.
fn backend_err(err: &redis::RedisError) -> Error {
    if err.is_timeout() {
        Error::BackendTimeout {
            op: err.code().unwrap_or("redis").to_string(),
        }
    } else {
        Error::BackendUnavailable {
            reason: err.to_string(),
        }
    }
}

/// [`KvStore`] over Redis with RediSearch vector indices.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    /// Connect to a Redis URL (e.g. `redis://127.0.0.1:6379`).
    ///
    /// The connection manager multiplexes one TCP connection and
    /// reconnects on failure; concurrency bounding happens in the core's
    /// resilience layer.
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url).map_err(|err| backend_err(&err))?;
        let conn = client
            .get_connection_manager()
            .await
            .map_err(|err| backend_err(&err))?;
        info!(url, "connected to redis backend");
        Ok(Self { conn })
    }

    /// Wrap an existing connection manager.
    #[must_use]
    pub fn from_manager(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    fn connection(&self) -> ConnectionManager {
        self.conn.clone()
    }
}

#[async_trait]
impl KvStore for RedisStore {
    async fn ping(&self) -> Result<()> {
        let mut conn = self.connection();
        redis::cmd("PING")
            .query_async::<()>(&mut conn)
            .await
            .map_err(|err| backend_err(&err))
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut conn = self.connection();
        conn.set::<_, _, ()>(key, value)
            .await
            .map_err(|err| backend_err(&err))
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.connection();
        conn.get::<_, Option<String>>(key)
            .await
            .map_err(|err| backend_err(&err))
    }

    async fn del(&self, keys: &[String]) -> Result<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.connection();
        conn.del::<_, u64>(keys)
            .await
            .map_err(|err| backend_err(&err))
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.connection();
        conn.expire::<_, bool>(key, ttl.as_secs() as i64)
            .await
            .map_err(|err| backend_err(&err))
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        let mut conn = self.connection();
        conn.keys::<_, Vec<String>>(pattern)
            .await
            .map_err(|err| backend_err(&err))
    }

    async fn hset(&self, key: &str, fields: &[(String, Vec<u8>)]) -> Result<()> {
        if fields.is_empty() {
            return Ok(());
        }
        let mut conn = self.connection();
        conn.hset_multiple::<_, _, _, ()>(key, fields)
            .await
            .map_err(|err| backend_err(&err))
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.connection();
        conn.hget::<_, _, Option<Vec<u8>>>(key, field)
            .await
            .map_err(|err| backend_err(&err))
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, Vec<u8>>> {
        let mut conn = self.connection();
        conn.hgetall::<_, HashMap<String, Vec<u8>>>(key)
            .await
            .map_err(|err| backend_err(&err))
    }

    async fn hincrby(&self, key: &str, field: &str, delta: i64) -> Result<i64> {
        let mut conn = self.connection();
        conn.hincr::<_, _, _, i64>(key, field, delta)
            .await
            .map_err(|err| backend_err(&err))
    }

    async fn lpush(&self, key: &str, values: &[String]) -> Result<u64> {
        if values.is_empty() {
            return self.llen(key).await;
        }
        let mut conn = self.connection();
        conn.lpush::<_, _, u64>(key, values)
            .await
            .map_err(|err| backend_err(&err))
    }

    async fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>> {
        let mut conn = self.connection();
        conn.lrange::<_, Vec<String>>(key, start as isize, stop as isize)
            .await
            .map_err(|err| backend_err(&err))
    }

    async fn ltrim(&self, key: &str, start: i64, stop: i64) -> Result<()> {
        let mut conn = self.connection();
        conn.ltrim::<_, ()>(key, start as isize, stop as isize)
            .await
            .map_err(|err| backend_err(&err))
    }

    async fn llen(&self, key: &str) -> Result<u64> {
        let mut conn = self.connection();
        conn.llen::<_, u64>(key)
            .await
            .map_err(|err| backend_err(&err))
    }

    async fn zadd(&self, key: &str, members: &[(f64, String)]) -> Result<u64> {
        if members.is_empty() {
            return Ok(0);
        }
        let mut conn = self.connection();
        conn.zadd_multiple::<_, _, _, u64>(key, members)
            .await
            .map_err(|err| backend_err(&err))
    }

    async fn zrange_by_score(&self, key: &str, min: f64, max: f64) -> Result<Vec<String>> {
        let mut conn = self.connection();
        conn.zrangebyscore::<_, _, _, Vec<String>>(key, min, max)
            .await
            .map_err(|err| backend_err(&err))
    }

    async fn zcard(&self, key: &str) -> Result<u64> {
        let mut conn = self.connection();
        conn.zcard::<_, u64>(key)
            .await
            .map_err(|err| backend_err(&err))
    }

    async fn exec(&self, pipeline: Pipeline) -> Result<()> {
        if pipeline.is_empty() {
            return Ok(());
        }
        let mut pipe = redis::pipe();
        pipe.atomic();
        for op in pipeline.into_ops() {
            match op {
                PipelineOp::Set { key, value } => {
                    pipe.set(key, value).ignore();
                }
                PipelineOp::Del { key } => {
                    pipe.del(key).ignore();
                }
                PipelineOp::HSet { key, fields } => {
                    pipe.hset_multiple(key, &fields).ignore();
                }
                PipelineOp::HIncrBy { key, field, delta } => {
                    pipe.hincr(key, field, delta).ignore();
                }
                PipelineOp::LPush { key, values } => {
                    pipe.lpush(key, values).ignore();
                }
                PipelineOp::LTrim { key, start, stop } => {
                    pipe.ltrim(key, start as isize, stop as isize).ignore();
                }
                PipelineOp::ZAdd { key, members } => {
                    pipe.zadd_multiple(key, &members).ignore();
                }
                PipelineOp::Expire { key, ttl } => {
                    pipe.expire(key, ttl.as_secs() as i64).ignore();
                }
            }
        }

        let mut conn = self.connection();
        pipe.query_async::<()>(&mut conn)
            .await
            .map_err(|err| backend_err(&err))
    }

    async fn vector_index_create(&self, name: &str, schema: &VectorIndexSchema) -> Result<bool> {
        let mut cmd = redis::cmd("FT.CREATE");
        cmd.arg(name)
            .arg("ON")
            .arg("HASH")
            .arg("PREFIX")
            .arg(1)
            .arg(&schema.prefix)
            .arg("SCHEMA");
        for field in &schema.tag_fields {
            cmd.arg(field).arg("TAG");
        }
        for field in &schema.text_fields {
            cmd.arg(field).arg("TEXT");
        }
        for field in &schema.numeric_fields {
            cmd.arg(field).arg("NUMERIC");
        }
        cmd.arg(EMBEDDING_FIELD)
            .arg("VECTOR")
            .arg("HNSW")
            .arg(6)
            .arg("TYPE")
            .arg("FLOAT32")
            .arg("DIM")
            .arg(schema.dim)
            .arg("DISTANCE_METRIC")
            .arg("COSINE");

        let mut conn = self.connection();
        match cmd.query_async::<()>(&mut conn).await {
            Ok(()) => {
                info!(index = name, prefix = %schema.prefix, "created vector index");
                Ok(true)
            }
            Err(err) if err.to_string().contains("already exists") => {
                debug!(index = name, "vector index already present");
                Ok(false)
            }
            Err(err) => Err(backend_err(&err)),
        }
    }

    async fn vector_upsert(
        &self,
        _index: &str,
        key: &str,
        fields: &[(String, Vec<u8>)],
        vector: &[f32],
        ttl: Option<Duration>,
    ) -> Result<()> {
        // RediSearch tracks hashes by prefix; writing the hash is the
        // upsert. TTL rides in the same MULTI block.
        let mut stored: Vec<(String, Vec<u8>)> = fields.to_vec();
        stored.push((EMBEDDING_FIELD.to_string(), encode_vector(vector)));

        let mut pipe = redis::pipe();
        pipe.atomic();
        pipe.hset_multiple(key, &stored).ignore();
        if let Some(ttl) = ttl {
            pipe.expire(key, ttl.as_secs() as i64).ignore();
        }

        let mut conn = self.connection();
        pipe.query_async::<()>(&mut conn)
            .await
            .map_err(|err| backend_err(&err))
    }

    async fn vector_knn(
        &self,
        index: &str,
        vector: &[f32],
        k: usize,
        filter: Option<&KnnFilter>,
    ) -> Result<Vec<KnnHit>> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let query = build_knn_query(k, filter);
        let blob = encode_vector(vector);

        let mut cmd = redis::cmd("FT.SEARCH");
        cmd.arg(index)
            .arg(&query)
            .arg("PARAMS")
            .arg(2)
            .arg("vec")
            .arg(blob)
            .arg("SORTBY")
            .arg("vector_score")
            .arg("ASC")
            .arg("LIMIT")
            .arg(0)
            .arg(k)
            .arg("DIALECT")
            .arg(2);

        let mut conn = self.connection();
        let reply: redis::Value = cmd
            .query_async(&mut conn)
            .await
            .map_err(|err| backend_err(&err))?;
        parse_ft_search_reply(&reply)
    }

    async fn vector_count(&self, index: &str) -> Result<u64> {
        let mut conn = self.connection();
        let reply: redis::Value = redis::cmd("FT.INFO")
            .arg(index)
            .query_async(&mut conn)
            .await
            .map_err(|err| backend_err(&err))?;
        parse_ft_info_num_docs(&reply)
    }
}
