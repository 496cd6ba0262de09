//! Embedding cache bookkeeping: fingerprints, the in-process L1, and the
//! hit/miss statistics surfaced through `memory_stats`.

use std::num::NonZeroUsize;

use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Content-addressed fingerprint of a text: SHA-256, lowercase hex.
///
/// The fingerprint is the cache key, so it must never depend on anything
/// but the exact bytes of the input.
#[must_use]
pub fn fingerprint(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let digest = hasher.finalize();
    let mut hex = String::with_capacity(64);
    for byte in digest {
        use std::fmt::Write;
        let _ = write!(hex, "{byte:02x}");
    }
    hex
}

/// Counters for the two-level embedding cache.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EmbeddingCacheStats {
    /// Lookups answered from either cache level
    pub hits: u64,
    /// Lookups that went to the provider
    pub misses: u64,
    /// Calls actually made to the provider
    pub provider_calls: u64,
    /// Callers that waited on another caller's in-flight provider call
    pub coalesced_waits: u64,
    /// Mean provider latency over all calls, in milliseconds
    pub avg_provider_latency_ms: f64,
    /// `hits * avg_provider_latency_ms` - provider time the cache avoided
    pub estimated_time_saved_ms: f64,
}

impl EmbeddingCacheStats {
    /// Hit rate in `[0, 1]`.
    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct StatsCell {
    hits: u64,
    misses: u64,
    provider_calls: u64,
    coalesced_waits: u64,
    total_provider_latency_ms: f64,
}

impl StatsCell {
    pub(crate) fn record_hit(&mut self) {
        self.hits += 1;
    }

    pub(crate) fn record_coalesced_hit(&mut self) {
        self.hits += 1;
        self.coalesced_waits += 1;
    }

    pub(crate) fn record_provider_call(&mut self, latency_ms: f64) {
        self.misses += 1;
        self.provider_calls += 1;
        self.total_provider_latency_ms += latency_ms;
    }

    pub(crate) fn snapshot(&self) -> EmbeddingCacheStats {
        let avg = if self.provider_calls == 0 {
            0.0
        } else {
            self.total_provider_latency_ms / self.provider_calls as f64
        };
        EmbeddingCacheStats {
            hits: self.hits,
            misses: self.misses,
            provider_calls: self.provider_calls,
            coalesced_waits: self.coalesced_waits,
            avg_provider_latency_ms: avg,
            estimated_time_saved_ms: self.hits as f64 * avg,
        }
    }
}

/// In-process LRU in front of the KV-backed cache level.
///
/// Lock is held only for the map operation itself, never across an await.
pub(crate) struct L1Cache {
    entries: Mutex<LruCache<String, Vec<f32>>>,
}

impl L1Cache {
    pub(crate) fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub(crate) fn get(&self, fingerprint: &str) -> Option<Vec<f32>> {
        self.entries.lock().get(fingerprint).cloned()
    }

    pub(crate) fn put(&self, fingerprint: String, vector: Vec<f32>) {
        self.entries.lock().put(fingerprint, vector);
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_is_stable_and_content_addressed() {
        let a = fingerprint("what's my weight goal");
        let b = fingerprint("what's my weight goal");
        let c = fingerprint("what's my weight goal?");

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|ch| ch.is_ascii_hexdigit()));
    }

    #[test]
    fn test_l1_lru_eviction() {
        let l1 = L1Cache::new(2);
        l1.put("a".to_string(), vec![1.0]);
        l1.put("b".to_string(), vec![2.0]);
        l1.put("c".to_string(), vec![3.0]);

        assert_eq!(l1.len(), 2);
        assert!(l1.get("a").is_none());
        assert_eq!(l1.get("c"), Some(vec![3.0]));
    }

    #[test]
    fn test_stats_snapshot_math() {
        let mut cell = StatsCell::default();
        cell.record_provider_call(100.0);
        cell.record_provider_call(200.0);
        cell.record_hit();
        cell.record_hit();
        cell.record_coalesced_hit();

        let snap = cell.snapshot();
        assert_eq!(snap.hits, 3);
        assert_eq!(snap.misses, 2);
        assert_eq!(snap.provider_calls, 2);
        assert_eq!(snap.coalesced_waits, 1);
        assert!((snap.avg_provider_latency_ms - 150.0).abs() < f64::EPSILON);
        assert!((snap.estimated_time_saved_ms - 450.0).abs() < f64::EPSILON);
        assert!((snap.hit_rate() - 0.6).abs() < f64::EPSILON);
    }
}
