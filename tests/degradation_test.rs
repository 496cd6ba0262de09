//! Degradation policy end-to-end: best-effort retrieval, strict storage.

mod common;

use std::sync::Arc;

use common::{memory_with_provider, memory_with_store, session, user};
use test_utils::{FailingEmbedder, FailingStore};
use wellness_memory_core::coordinator::{RetrieveOptions, TierStatus};
use wellness_memory_core::store::KvStore;
use wellness_memory_core::types::WriteOutcome;
use wellness_memory_storage_mem::InMemoryStore;

fn opts(session_label: &str) -> RetrieveOptions {
    RetrieveOptions {
        session: session(session_label),
        user: user(),
        top_k_episodic: None,
        top_k_semantic: None,
        top_k_procedural: None,
    }
}

#[tokio::test]
async fn single_tier_failure_degrades_but_succeeds() {
    let failing = Arc::new(FailingStore::new(InMemoryStore::shared()));
    let memory = memory_with_store(Arc::clone(&failing) as Arc<dyn KvStore>).await;
    let u = user();

    memory
        .store_turn(test_utils::goal_turn(&u, &session("s1")))
        .await
        .unwrap();

    // Vector search down: episodic and procedural degrade, the log holds
    failing.set_fail_vector_search(true);

    let bundle = memory
        .retrieve_context("what's my weight goal", opts("s1"))
        .await
        .unwrap();

    assert_eq!(bundle.stats.short_term, TierStatus::Ok);
    assert_eq!(bundle.stats.episodic, TierStatus::Degraded);
    assert_eq!(bundle.stats.procedural, TierStatus::Degraded);
    assert_eq!(bundle.episodic.hits, 0);
    assert!(bundle.procedural.plan.is_none());
    assert!(bundle.short_term.is_some(), "healthy tier still delivers");
    assert!(!bundle.stats.warnings.is_empty());

    // Recovery: the same call comes back complete
    failing.set_fail_vector_search(false);
    let bundle = memory
        .retrieve_context("what's my weight goal", opts("s1"))
        .await
        .unwrap();
    assert_eq!(bundle.stats.episodic, TierStatus::Ok);
    assert!(bundle.episodic.hits >= 1);
}

#[tokio::test]
async fn all_tiers_failing_surfaces_an_error() {
    let failing = Arc::new(FailingStore::new(InMemoryStore::shared()));
    let memory = memory_with_store(Arc::clone(&failing) as Arc<dyn KvStore>).await;

    failing.set_fail_all(true);

    let err = memory
        .retrieve_context("anything at all", opts("s1"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "backend_unavailable");
}

#[tokio::test]
async fn embedding_outage_on_reads_degrades_to_empty_slices() {
    // Provider refuses; vector tiers read empty, the call succeeds
    let memory = memory_with_provider(Arc::new(FailingEmbedder::new())).await;
    let u = user();

    // Seed only the short-term log (no embeddings involved)
    let mut turn = test_utils::chat_turn(&u, &session("s1"));
    turn.user_message = "hello there".to_string();
    let receipt = memory.store_turn(turn).await.unwrap();
    assert!(receipt.short_term.is_stored());

    let bundle = memory
        .retrieve_context("what's my weight goal", opts("s1"))
        .await
        .unwrap();

    // Embedding failure on the read path is an empty slice, not an error
    assert_eq!(bundle.episodic.hits, 0);
    assert_eq!(bundle.stats.episodic, TierStatus::Empty);
    assert!(bundle.short_term.is_some());
}

#[tokio::test]
async fn embedding_outage_fails_the_episodic_write_but_not_the_log() {
    let memory = memory_with_provider(Arc::new(FailingEmbedder::new())).await;
    let u = user();

    let receipt = memory
        .store_turn(test_utils::goal_turn(&u, &session("s1")))
        .await
        .unwrap();

    // Storage is strict: the failure is visible per tier
    assert!(receipt.short_term.is_stored(), "log append needs no embedding");
    match receipt.episodic {
        Some(WriteOutcome::Failed { ref code, .. }) => {
            assert_eq!(code, "memory_write_failed");
        }
        ref other => panic!("expected failed episodic write, got {other:?}"),
    }
    assert!(!receipt.is_fully_stored());

    // The message still made it into the log
    let messages = memory
        .short_term()
        .latest(&session("s1"), 10)
        .await
        .unwrap();
    assert_eq!(messages.len(), 2);
}

#[tokio::test]
async fn embedding_outage_fails_the_procedural_write_too() {
    let memory = memory_with_provider(Arc::new(FailingEmbedder::new())).await;
    let u = user();

    let receipt = memory
        .store_turn(test_utils::tool_turn(&u, &session("s1"), &["search"], 0.9))
        .await
        .unwrap();

    assert!(receipt.short_term.is_stored());
    assert!(matches!(
        receipt.procedural,
        Some(WriteOutcome::Failed { .. })
    ));
}

#[tokio::test]
async fn backend_write_outage_is_reported_strictly() {
    let failing = Arc::new(FailingStore::new(InMemoryStore::shared()));
    let memory = memory_with_store(Arc::clone(&failing) as Arc<dyn KvStore>).await;
    let u = user();

    failing.set_fail_all(true);

    let receipt = memory
        .store_turn(test_utils::chat_turn(&u, &session("s1")))
        .await
        .unwrap();
    assert!(receipt.short_term.is_failed());
    assert!(!receipt.is_fully_stored());
}

#[tokio::test]
async fn degraded_retrieval_still_reports_classification() {
    let failing = Arc::new(FailingStore::new(InMemoryStore::shared()));
    let memory = memory_with_store(Arc::clone(&failing) as Arc<dyn KvStore>).await;

    failing.set_fail_vector_search(true);

    let bundle = memory
        .retrieve_context("average heart rate last week", opts("s1"))
        .await
        .unwrap();

    // Even with the procedural tier down, the query classification is
    // local and survives
    assert_eq!(
        bundle.procedural.query_type,
        wellness_memory_core::types::QueryType::Aggregation
    );
}
