//! Short-term log behavior against a live backend: ordering, caps, TTL
//! and the token-budget trim.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{memory, session, test_config};
use test_utils::BagOfWordsEmbedder;
use wellness_memory_core::coordinator::WellnessMemory;
use wellness_memory_core::types::Message;
use wellness_memory_storage_mem::InMemoryStore;

#[tokio::test]
async fn short_term_round_trip_is_newest_first() {
    let memory = memory().await;
    let s1 = session("s1");
    let log = memory.short_term();

    log.append(&s1, &Message::user("hello")).await.unwrap();
    log.append(&s1, &Message::assistant("hi")).await.unwrap();

    let messages = log.latest(&s1, 10).await.unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].content, "hi");
    assert_eq!(messages[1].content, "hello");
}

#[tokio::test]
async fn latest_beyond_length_returns_the_same_messages() {
    let memory = memory().await;
    let s1 = session("s1");
    let log = memory.short_term();

    for i in 0..5 {
        log.append(&s1, &Message::user(format!("m{i}"))).await.unwrap();
    }

    let exact = log.latest(&s1, 5).await.unwrap();
    let oversized = log.latest(&s1, 50).await.unwrap();
    assert_eq!(exact, oversized);
}

#[tokio::test]
async fn missing_session_reads_empty() {
    let memory = memory().await;
    let log = memory.short_term();

    let messages = log.latest(&session("ghost"), 10).await.unwrap();
    assert!(messages.is_empty());
    assert_eq!(log.len(&session("ghost")).await.unwrap(), 0);
}

#[tokio::test]
async fn append_enforces_the_cap() {
    let mut config = test_config();
    config.short_term_cap = 3;
    let memory = WellnessMemory::connect(
        config,
        InMemoryStore::shared(),
        Arc::new(BagOfWordsEmbedder::new()),
    )
    .await
    .unwrap();
    let s1 = session("s1");
    let log = memory.short_term();

    for i in 0..10 {
        log.append(&s1, &Message::user(format!("m{i}"))).await.unwrap();
    }

    let messages = log.latest(&s1, 50).await.unwrap();
    assert_eq!(messages.len(), 3);
    // Only the newest three survive
    assert_eq!(messages[0].content, "m9");
    assert_eq!(messages[2].content, "m7");
}

#[tokio::test(start_paused = true)]
async fn session_log_expires_after_ttl() {
    let mut config = test_config();
    config.ttl.session = Duration::from_secs(60);
    let memory = WellnessMemory::connect(
        config,
        InMemoryStore::shared(),
        Arc::new(BagOfWordsEmbedder::new()),
    )
    .await
    .unwrap();
    let s1 = session("s1");
    let log = memory.short_term();

    log.append(&s1, &Message::user("hello")).await.unwrap();
    tokio::time::advance(Duration::from_secs(30)).await;
    assert_eq!(log.latest(&s1, 10).await.unwrap().len(), 1);

    // Append refreshes the TTL
    log.append(&s1, &Message::assistant("hi")).await.unwrap();
    tokio::time::advance(Duration::from_secs(45)).await;
    assert_eq!(log.latest(&s1, 10).await.unwrap().len(), 2);

    tokio::time::advance(Duration::from_secs(61)).await;
    assert!(log.latest(&s1, 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn empty_message_is_rejected() {
    let memory = memory().await;
    let err = memory
        .short_term()
        .append(&session("s1"), &Message::user("   "))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "invalid_input");
}

#[tokio::test]
async fn trim_to_budget_drops_oldest_and_reports_stats() {
    let memory = memory().await;
    let s1 = session("s1");
    let log = memory.short_term();

    // Ten wordy messages, far over a 100-token budget
    let wordy = "today I finished a long interval session and logged every \
                 split plus heart rate and perceived effort for the records";
    for _ in 0..10 {
        log.append(&s1, &Message::user(wordy)).await.unwrap();
    }

    let (messages, stats) = log.trim_to_budget(&s1, 100).await.unwrap();
    // min_messages_keep = 2: floor wins over the hopeless budget
    assert_eq!(messages.len(), 2);
    assert!(stats.trimmed);
    assert_eq!(stats.message_count, 2);
    assert_eq!(stats.max_tokens, 100);
    assert_eq!(stats.over_budget_warning, stats.token_count > 80);
}

#[tokio::test]
async fn trim_to_budget_keeps_small_logs_intact() {
    let memory = memory().await;
    let s1 = session("s1");
    let log = memory.short_term();

    log.append(&s1, &Message::user("hello")).await.unwrap();
    log.append(&s1, &Message::assistant("hi")).await.unwrap();

    let (messages, stats) = log.trim_to_budget(&s1, 1000).await.unwrap();
    assert_eq!(messages.len(), 2);
    assert!(!stats.trimmed);
    assert!(!stats.over_budget_warning);
    assert!(stats.usage_percent < 10.0);
}

#[tokio::test]
async fn clear_removes_only_that_session() {
    let memory = memory().await;
    let log = memory.short_term();
    let (s1, s2) = (session("s1"), session("s2"));

    log.append(&s1, &Message::user("one")).await.unwrap();
    log.append(&s2, &Message::user("two")).await.unwrap();

    log.clear(&s1).await.unwrap();
    assert!(log.latest(&s1, 10).await.unwrap().is_empty());
    assert_eq!(log.latest(&s2, 10).await.unwrap().len(), 1);
}
