//! Shared fixtures for the end-to-end suite: a full memory system over
//! the in-process backend and the deterministic bag-of-words embedder.

#![allow(dead_code)]

use std::sync::Arc;

use test_utils::{BagOfWordsEmbedder, TEST_DIM};
use wellness_memory_core::config::MemoryConfig;
use wellness_memory_core::coordinator::WellnessMemory;
use wellness_memory_core::embeddings::EmbeddingProvider;
use wellness_memory_core::store::KvStore;
use wellness_memory_core::types::{SessionId, UserId};
use wellness_memory_storage_mem::InMemoryStore;

/// Config matched to the test embedder's dimensionality.
pub fn test_config() -> MemoryConfig {
    MemoryConfig {
        vector_dim: TEST_DIM,
        ..MemoryConfig::default()
    }
}

/// Full system over a fresh in-memory backend.
pub async fn memory() -> WellnessMemory {
    memory_with_store(InMemoryStore::shared()).await
}

/// Full system over a caller-provided backend.
pub async fn memory_with_store(store: Arc<dyn KvStore>) -> WellnessMemory {
    WellnessMemory::connect(test_config(), store, Arc::new(BagOfWordsEmbedder::new()))
        .await
        .expect("memory system should connect against a healthy backend")
}

/// Full system with a caller-provided embedding provider.
pub async fn memory_with_provider(provider: Arc<dyn EmbeddingProvider>) -> WellnessMemory {
    WellnessMemory::connect(test_config(), InMemoryStore::shared(), provider)
        .await
        .expect("memory system should connect against a healthy backend")
}

/// The single test user.
pub fn user() -> UserId {
    UserId::from("u1")
}

/// A fresh session id per test.
pub fn session(label: &str) -> SessionId {
    SessionId::from(label)
}
