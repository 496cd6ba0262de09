//! Aggregation index for domain documents (workouts, metrics).
//!
//! A pure on-write projection: importing a document rebuilds three
//! structures per user in one atomic pipeline, so tools answering
//! "how many workouts per weekday" or "what happened last week" never
//! scan raw documents.
//!
//! - `agg:{user}:days` - hash, bucket label → count (O(1) reads)
//! - `agg:{user}:by_date` - sorted set, item id scored by unix timestamp
//!   (O(log N + M) range reads)
//! - `agg:{user}:item:{id}` - per-item detail hash (O(1) reads)

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::error::{Error, Result};
use crate::keys;
use crate::store::{KvStore, Pipeline};
use crate::types::UserId;

/// One domain item to be projected into the index.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateItem {
    /// Stable item id, see [`derive_item_id`]
    pub id: String,
    /// When the item happened
    pub timestamp: DateTime<Utc>,
    /// Counter bucket this item falls into (for workouts: day of week)
    pub bucket_label: String,
    /// Detail fields stored on the item hash
    pub fields: Vec<(String, String)>,
}

impl AggregateItem {
    /// Build an item, deriving its id from timestamp and type.
    #[must_use]
    pub fn new(
        timestamp: DateTime<Utc>,
        item_type: &str,
        bucket_label: &str,
        fields: Vec<(String, String)>,
    ) -> Self {
        Self {
            id: derive_item_id(timestamp, item_type),
            timestamp,
            bucket_label: bucket_label.to_string(),
            fields,
        }
    }
}

/// Derive the stable id for an item: `{date}:{type}:{hh:mm:ss}`.
///
/// Two items in the same second stay distinct as long as their types
/// differ, which is what the source data guarantees.
#[must_use]
pub fn derive_item_id(timestamp: DateTime<Utc>, item_type: &str) -> String {
    format!(
        "{}:{}:{}",
        timestamp.format("%Y-%m-%d"),
        item_type,
        timestamp.format("%H:%M:%S")
    )
}

/// Builds and serves the aggregation projection.
#[derive(Clone)]
pub struct AggregationIndexer {
    store: Arc<dyn KvStore>,
    ttl: Duration,
}

impl AggregationIndexer {
    /// Build the indexer over a store handle.
    #[must_use]
    pub fn new(store: Arc<dyn KvStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    /// Rebuild the projection for a user from a full list of items.
    ///
    /// The whole rebuild is one pipeline: the counter hash and the time
    /// set are dropped and repopulated, item hashes are replaced
    /// item-by-item, and every key gets the shared TTL. Readers observe
    /// the previous or the new generation, never a mix. Rebuilding twice
    /// from the same input is idempotent.
    ///
    /// # Errors
    ///
    /// Backend errors pass through.
    pub async fn rebuild(&self, user: &UserId, items: &[AggregateItem]) -> Result<()> {
        let days_key = keys::agg_days(user);
        let by_date_key = keys::agg_by_date(user);

        let mut pipe = Pipeline::new();
        pipe.del(&days_key).del(&by_date_key);

        for item in items {
            let item_key = keys::agg_item(user, &item.id);
            pipe.hincrby(&days_key, &item.bucket_label, 1)
                .zadd(
                    &by_date_key,
                    vec![(item.timestamp.timestamp() as f64, item.id.clone())],
                )
                .hset(
                    &item_key,
                    item.fields
                        .iter()
                        .map(|(name, value)| (name.clone(), value.as_bytes().to_vec()))
                        .collect(),
                )
                .expire(&item_key, self.ttl);
        }

        pipe.expire(&days_key, self.ttl).expire(&by_date_key, self.ttl);
        self.store.exec(pipe).await?;

        debug!(user = %user, items = items.len(), "rebuilt aggregation index");
        Ok(())
    }

    /// Per-bucket counts. O(1) in the number of items.
    ///
    /// # Errors
    ///
    /// Backend errors pass through; a malformed counter value is
    /// `InvalidInput`.
    pub async fn counts_by_bucket(&self, user: &UserId) -> Result<HashMap<String, i64>> {
        let raw = self.store.hgetall(&keys::agg_days(user)).await?;
        let mut counts = HashMap::with_capacity(raw.len());
        for (label, bytes) in raw {
            let text = String::from_utf8(bytes).map_err(|_| {
                Error::InvalidInput(format!("non-UTF-8 counter for bucket '{label}'"))
            })?;
            let value = text.parse::<i64>().map_err(|_| {
                Error::InvalidInput(format!("non-numeric counter '{text}' for bucket '{label}'"))
            })?;
            counts.insert(label, value);
        }
        Ok(counts)
    }

    /// Item ids with `from_ts <= timestamp <= to_ts`, ascending.
    ///
    /// # Errors
    ///
    /// Backend errors pass through.
    pub async fn ids_in_range(
        &self,
        user: &UserId,
        from_ts: DateTime<Utc>,
        to_ts: DateTime<Utc>,
    ) -> Result<Vec<String>> {
        self.store
            .zrange_by_score(
                &keys::agg_by_date(user),
                from_ts.timestamp() as f64,
                to_ts.timestamp() as f64,
            )
            .await
    }

    /// Detail fields of one item; `None` when it does not exist.
    ///
    /// # Errors
    ///
    /// Backend errors pass through.
    pub async fn item(&self, user: &UserId, id: &str) -> Result<Option<HashMap<String, String>>> {
        let raw = self.store.hgetall(&keys::agg_item(user, id)).await?;
        if raw.is_empty() {
            return Ok(None);
        }
        let mut fields = HashMap::with_capacity(raw.len());
        for (name, bytes) in raw {
            if let Ok(text) = String::from_utf8(bytes) {
                fields.insert(name, text);
            }
        }
        Ok(Some(fields))
    }

    /// Number of items currently in the time index.
    ///
    /// # Errors
    ///
    /// Backend errors pass through.
    pub async fn item_count(&self, user: &UserId) -> Result<u64> {
        self.store.zcard(&keys::agg_by_date(user)).await
    }
}
