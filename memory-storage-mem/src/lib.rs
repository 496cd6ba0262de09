#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::missing_errors_doc)]

//! In-process [`KvStore`] backend.
//!
//! A single `RwLock`-guarded keyspace with the same observable semantics
//! as the networked backend: binary-safe hashes, head-pushed lists,
//! score-ordered sets, lazy TTL expiry and atomic pipelines. The vector
//! "index" is an exact cosine scan over tracked records, which at test
//! and single-user scale is an adequate stand-in for an ANN structure.
//!
//! TTLs are tracked on `tokio::time::Instant`, so tests running under a
//! paused clock can advance time deterministically.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::debug;

use wellness_memory_core::embeddings::similarity::cosine_similarity;
use wellness_memory_core::store::{
    decode_vector, encode_vector, KnnFilter, KnnHit, KvStore, Pipeline, PipelineOp,
    VectorIndexSchema, EMBEDDING_FIELD,
};
use wellness_memory_core::{Error, Result};

/// One stored value.
#[derive(Debug, Clone)]
enum Value {
    Str(String),
    Hash(HashMap<String, Vec<u8>>),
    List(VecDeque<String>),
    ZSet(BTreeMap<String, f64>),
}

impl Value {
    fn kind(&self) -> &'static str {
        match self {
            Value::Str(_) => "string",
            Value::Hash(_) => "hash",
            Value::List(_) => "list",
            Value::ZSet(_) => "zset",
        }
    }
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

#[derive(Debug, Clone)]
struct IndexState {
    schema: VectorIndexSchema,
    /// Keys upserted through this index, in insertion order.
    members: Vec<String>,
}

#[derive(Default)]
struct Inner {
    keyspace: HashMap<String, Entry>,
    indices: HashMap<String, IndexState>,
}

impl Inner {
    /// Fetch a live entry, lazily evicting it when expired.
    fn live(&mut self, key: &str) -> Option<&mut Entry> {
        let expired = match self.keyspace.get(key) {
            Some(entry) => entry
                .expires_at
                .is_some_and(|deadline| Instant::now() >= deadline),
            None => return None,
        };
        if expired {
            self.keyspace.remove(key);
            return None;
        }
        self.keyspace.get_mut(key)
    }

    fn apply(&mut self, op: PipelineOp) -> Result<()> {
        match op {
            PipelineOp::Set { key, value } => {
                self.set(&key, &value);
                Ok(())
            }
            PipelineOp::Del { key } => {
                self.keyspace.remove(&key);
                Ok(())
            }
            PipelineOp::HSet { key, fields } => self.hset(&key, &fields),
            PipelineOp::HIncrBy { key, field, delta } => self.hincrby(&key, &field, delta).map(|_| ()),
            PipelineOp::LPush { key, values } => self.lpush(&key, &values).map(|_| ()),
            PipelineOp::LTrim { key, start, stop } => self.ltrim(&key, start, stop),
            PipelineOp::ZAdd { key, members } => self.zadd(&key, &members).map(|_| ()),
            PipelineOp::Expire { key, ttl } => {
                self.expire(&key, ttl);
                Ok(())
            }
        }
    }

    fn set(&mut self, key: &str, value: &str) {
        // SET overwrites any type and clears the TTL, as the protocol does
        self.keyspace.insert(
            key.to_string(),
            Entry {
                value: Value::Str(value.to_string()),
                expires_at: None,
            },
        );
    }

    fn expire(&mut self, key: &str, ttl: Duration) -> bool {
        match self.live(key) {
            Some(entry) => {
                entry.expires_at = Some(Instant::now() + ttl);
                true
            }
            None => false,
        }
    }

    fn hset(&mut self, key: &str, fields: &[(String, Vec<u8>)]) -> Result<()> {
        if self.live(key).is_none() {
            self.keyspace.insert(
                key.to_string(),
                Entry {
                    value: Value::Hash(HashMap::new()),
                    expires_at: None,
                },
            );
        }
        let Some(entry) = self.keyspace.get_mut(key) else {
            return Err(Error::InvalidInput("hash vanished".to_string()));
        };
        match &mut entry.value {
            Value::Hash(map) => {
                for (name, value) in fields {
                    map.insert(name.clone(), value.clone());
                }
                Ok(())
            }
            other => Err(wrong_type(key, "hash", other.kind())),
        }
    }

    fn hincrby(&mut self, key: &str, field: &str, delta: i64) -> Result<i64> {
        if self.live(key).is_none() {
            self.keyspace.insert(
                key.to_string(),
                Entry {
                    value: Value::Hash(HashMap::new()),
                    expires_at: None,
                },
            );
        }
        let Some(entry) = self.keyspace.get_mut(key) else {
            return Err(Error::InvalidInput("hash vanished".to_string()));
        };
        match &mut entry.value {
            Value::Hash(map) => {
                let current = match map.get(field) {
                    Some(bytes) => std::str::from_utf8(bytes)
                        .ok()
                        .and_then(|s| s.parse::<i64>().ok())
                        .ok_or_else(|| {
                            Error::InvalidInput(format!(
                                "field '{field}' of '{key}' is not an integer"
                            ))
                        })?,
                    None => 0,
                };
                let next = current + delta;
                map.insert(field.to_string(), next.to_string().into_bytes());
                Ok(next)
            }
            other => Err(wrong_type(key, "hash", other.kind())),
        }
    }

    fn lpush(&mut self, key: &str, values: &[String]) -> Result<u64> {
        if self.live(key).is_none() {
            self.keyspace.insert(
                key.to_string(),
                Entry {
                    value: Value::List(VecDeque::new()),
                    expires_at: None,
                },
            );
        }
        let Some(entry) = self.keyspace.get_mut(key) else {
            return Err(Error::InvalidInput("list vanished".to_string()));
        };
        match &mut entry.value {
            Value::List(list) => {
                for value in values {
                    list.push_front(value.clone());
                }
                Ok(list.len() as u64)
            }
            other => Err(wrong_type(key, "list", other.kind())),
        }
    }

    fn ltrim(&mut self, key: &str, start: i64, stop: i64) -> Result<()> {
        let Some(entry) = self.live(key) else {
            return Ok(());
        };
        match &mut entry.value {
            Value::List(list) => {
                match normalize_range(list.len(), start, stop) {
                    Some((from, to)) => {
                        let kept: VecDeque<String> =
                            list.iter().skip(from).take(to - from + 1).cloned().collect();
                        *list = kept;
                    }
                    None => list.clear(),
                }
                Ok(())
            }
            other => Err(wrong_type(key, "list", other.kind())),
        }
    }

    fn zadd(&mut self, key: &str, members: &[(f64, String)]) -> Result<u64> {
        if self.live(key).is_none() {
            self.keyspace.insert(
                key.to_string(),
                Entry {
                    value: Value::ZSet(BTreeMap::new()),
                    expires_at: None,
                },
            );
        }
        let Some(entry) = self.keyspace.get_mut(key) else {
            return Err(Error::InvalidInput("zset vanished".to_string()));
        };
        match &mut entry.value {
            Value::ZSet(set) => {
                let mut added = 0;
                for (score, member) in members {
                    if set.insert(member.clone(), *score).is_none() {
                        added += 1;
                    }
                }
                Ok(added)
            }
            other => Err(wrong_type(key, "zset", other.kind())),
        }
    }
}

fn wrong_type(key: &str, wanted: &str, got: &str) -> Error {
    Error::InvalidInput(format!("key '{key}' holds a {got}, expected a {wanted}"))
}

/// Inclusive index range normalization with negative offsets, mirroring
/// the list protocol. `None` means the range selects nothing.
fn normalize_range(len: usize, start: i64, stop: i64) -> Option<(usize, usize)> {
    if len == 0 {
        return None;
    }
    let len = len as i64;
    let mut from = if start < 0 { len + start } else { start };
    let mut to = if stop < 0 { len + stop } else { stop };
    from = from.max(0);
    to = to.min(len - 1);
    if from > to || from >= len {
        return None;
    }
    Some((from as usize, to as usize))
}

/// Glob match supporting `*` (any run of characters) only, which is all
/// the key registry's patterns use.
fn glob_match(pattern: &str, text: &str) -> bool {
    fn inner(p: &[u8], t: &[u8]) -> bool {
        match (p.first(), t.first()) {
            (None, None) => true,
            (Some(b'*'), _) => {
                inner(&p[1..], t) || (!t.is_empty() && inner(p, &t[1..]))
            }
            (Some(pc), Some(tc)) if pc == tc => inner(&p[1..], &t[1..]),
            _ => false,
        }
    }
    inner(pattern.as_bytes(), text.as_bytes())
}

/// In-process KV+vector store.
#[derive(Default)]
pub struct InMemoryStore {
    inner: RwLock<Inner>,
}

impl InMemoryStore {
    /// Fresh empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fresh store behind an `Arc<dyn KvStore>` handle.
    #[must_use]
    pub fn shared() -> Arc<dyn KvStore> {
        Arc::new(Self::new())
    }
}

#[async_trait]
impl KvStore for InMemoryStore {
    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.inner.write().await.set(key, value);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut inner = self.inner.write().await;
        match inner.live(key).map(|e| &e.value) {
            Some(Value::Str(value)) => Ok(Some(value.clone())),
            Some(other) => Err(wrong_type(key, "string", other.kind())),
            None => Ok(None),
        }
    }

    async fn del(&self, keys: &[String]) -> Result<u64> {
        let mut inner = self.inner.write().await;
        let mut removed = 0;
        for key in keys {
            if inner.keyspace.remove(key).is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        Ok(self.inner.write().await.expire(key, ttl))
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        let mut inner = self.inner.write().await;
        let now = Instant::now();
        inner
            .keyspace
            .retain(|_, entry| entry.expires_at.is_none_or(|deadline| now < deadline));
        let mut found: Vec<String> = inner
            .keyspace
            .keys()
            .filter(|key| glob_match(pattern, key))
            .cloned()
            .collect();
        found.sort();
        Ok(found)
    }

    async fn hset(&self, key: &str, fields: &[(String, Vec<u8>)]) -> Result<()> {
        self.inner.write().await.hset(key, fields)
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<Vec<u8>>> {
        let mut inner = self.inner.write().await;
        match inner.live(key).map(|e| &e.value) {
            Some(Value::Hash(map)) => Ok(map.get(field).cloned()),
            Some(other) => Err(wrong_type(key, "hash", other.kind())),
            None => Ok(None),
        }
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, Vec<u8>>> {
        let mut inner = self.inner.write().await;
        match inner.live(key).map(|e| &e.value) {
            Some(Value::Hash(map)) => Ok(map.clone()),
            Some(other) => Err(wrong_type(key, "hash", other.kind())),
            None => Ok(HashMap::new()),
        }
    }

    async fn hincrby(&self, key: &str, field: &str, delta: i64) -> Result<i64> {
        self.inner.write().await.hincrby(key, field, delta)
    }

    async fn lpush(&self, key: &str, values: &[String]) -> Result<u64> {
        self.inner.write().await.lpush(key, values)
    }

    async fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>> {
        let mut inner = self.inner.write().await;
        match inner.live(key).map(|e| &e.value) {
            Some(Value::List(list)) => match normalize_range(list.len(), start, stop) {
                Some((from, to)) => Ok(list
                    .iter()
                    .skip(from)
                    .take(to - from + 1)
                    .cloned()
                    .collect()),
                None => Ok(Vec::new()),
            },
            Some(other) => Err(wrong_type(key, "list", other.kind())),
            None => Ok(Vec::new()),
        }
    }

    async fn ltrim(&self, key: &str, start: i64, stop: i64) -> Result<()> {
        self.inner.write().await.ltrim(key, start, stop)
    }

    async fn llen(&self, key: &str) -> Result<u64> {
        let mut inner = self.inner.write().await;
        match inner.live(key).map(|e| &e.value) {
            Some(Value::List(list)) => Ok(list.len() as u64),
            Some(other) => Err(wrong_type(key, "list", other.kind())),
            None => Ok(0),
        }
    }

    async fn zadd(&self, key: &str, members: &[(f64, String)]) -> Result<u64> {
        self.inner.write().await.zadd(key, members)
    }

    async fn zrange_by_score(&self, key: &str, min: f64, max: f64) -> Result<Vec<String>> {
        let mut inner = self.inner.write().await;
        match inner.live(key).map(|e| &e.value) {
            Some(Value::ZSet(set)) => {
                let mut in_range: Vec<(f64, String)> = set
                    .iter()
                    .filter(|(_, score)| **score >= min && **score <= max)
                    .map(|(member, score)| (*score, member.clone()))
                    .collect();
                in_range.sort_by(|a, b| a.0.total_cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
                Ok(in_range.into_iter().map(|(_, member)| member).collect())
            }
            Some(other) => Err(wrong_type(key, "zset", other.kind())),
            None => Ok(Vec::new()),
        }
    }

    async fn zcard(&self, key: &str) -> Result<u64> {
        let mut inner = self.inner.write().await;
        match inner.live(key).map(|e| &e.value) {
            Some(Value::ZSet(set)) => Ok(set.len() as u64),
            Some(other) => Err(wrong_type(key, "zset", other.kind())),
            None => Ok(0),
        }
    }

    async fn exec(&self, pipeline: Pipeline) -> Result<()> {
        // One write guard for the whole batch: readers never observe a
        // partially applied pipeline.
        let mut inner = self.inner.write().await;
        for op in pipeline.into_ops() {
            inner.apply(op)?;
        }
        Ok(())
    }

    async fn vector_index_create(&self, name: &str, schema: &VectorIndexSchema) -> Result<bool> {
        let mut inner = self.inner.write().await;
        if inner.indices.contains_key(name) {
            return Ok(false);
        }
        inner.indices.insert(
            name.to_string(),
            IndexState {
                schema: schema.clone(),
                members: Vec::new(),
            },
        );
        debug!(index = name, prefix = %schema.prefix, "created vector index");
        Ok(true)
    }

    async fn vector_upsert(
        &self,
        index: &str,
        key: &str,
        fields: &[(String, Vec<u8>)],
        vector: &[f32],
        ttl: Option<Duration>,
    ) -> Result<()> {
        let mut inner = self.inner.write().await;
        let Some(state) = inner.indices.get(index) else {
            return Err(Error::InvalidInput(format!("no such index '{index}'")));
        };
        if vector.len() != state.schema.dim {
            return Err(Error::InvalidInput(format!(
                "vector of {} dims against index '{index}' of {}",
                vector.len(),
                state.schema.dim
            )));
        }
        if !key.starts_with(&state.schema.prefix) {
            return Err(Error::InvalidInput(format!(
                "key '{key}' outside index prefix '{}'",
                state.schema.prefix
            )));
        }

        let mut stored: Vec<(String, Vec<u8>)> = fields.to_vec();
        stored.push((EMBEDDING_FIELD.to_string(), encode_vector(vector)));
        inner.hset(key, &stored)?;
        if let Some(ttl) = ttl {
            inner.expire(key, ttl);
        }

        if let Some(state) = inner.indices.get_mut(index) {
            if !state.members.iter().any(|member| member == key) {
                state.members.push(key.to_string());
            }
        }
        Ok(())
    }

    async fn vector_knn(
        &self,
        index: &str,
        vector: &[f32],
        k: usize,
        filter: Option<&KnnFilter>,
    ) -> Result<Vec<KnnHit>> {
        let mut inner = self.inner.write().await;
        let Some(state) = inner.indices.get(index) else {
            return Err(Error::InvalidInput(format!("no such index '{index}'")));
        };
        let members = state.members.clone();

        let mut scored = Vec::new();
        for key in members {
            let Some(entry) = inner.live(&key) else {
                continue;
            };
            let Value::Hash(fields) = &entry.value else {
                continue;
            };
            if let Some(filter) = filter {
                match fields.get(&filter.field) {
                    Some(bytes) if bytes.as_slice() == filter.equals.as_bytes() => {}
                    _ => continue,
                }
            }
            let Some(embedding_bytes) = fields.get(EMBEDDING_FIELD) else {
                continue;
            };
            let embedding = decode_vector(embedding_bytes)?;
            let score = cosine_similarity(vector, &embedding);

            let mut returned = fields.clone();
            returned.remove(EMBEDDING_FIELD);
            scored.push(KnnHit {
                key: key.clone(),
                score,
                fields: returned,
            });
        }

        scored.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.key.cmp(&b.key)));
        scored.truncate(k);
        Ok(scored)
    }

    async fn vector_count(&self, index: &str) -> Result<u64> {
        let mut inner = self.inner.write().await;
        let Some(state) = inner.indices.get(index) else {
            return Err(Error::InvalidInput(format!("no such index '{index}'")));
        };
        let members = state.members.clone();
        let mut live = 0;
        for key in members {
            if inner.live(&key).is_some() {
                live += 1;
            }
        }
        Ok(live)
    }
}
