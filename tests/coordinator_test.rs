//! Coordinator end-to-end: the full turn loop of retrieve → store →
//! retrieve, stats and the administrative clears.

mod common;

use common::{memory, session, user};
use wellness_memory_core::coordinator::{RetrieveOptions, TierStatus};
use wellness_memory_core::types::{QueryType, RecordMetadata, UserId, WriteOutcome};

fn opts(session_label: &str, user: &UserId) -> RetrieveOptions {
    RetrieveOptions {
        session: common::session(session_label),
        user: user.clone(),
        top_k_episodic: None,
        top_k_semantic: None,
        top_k_procedural: None,
    }
}

#[tokio::test]
async fn goal_statement_round_trips_through_store_and_retrieve() {
    let memory = memory().await;
    let u = user();

    let receipt = memory
        .store_turn(test_utils::goal_turn(&u, &session("s1")))
        .await
        .unwrap();
    assert!(receipt.short_term.is_stored());
    // Fact extraction recognized the goal and wrote the episodic record
    assert_eq!(receipt.episodic, Some(WriteOutcome::Stored));
    assert!(receipt.procedural.is_none());

    let bundle = memory
        .retrieve_context("what's my weight goal", opts("s1", &u))
        .await
        .unwrap();

    assert!(bundle.episodic.hits >= 1);
    assert!(
        bundle
            .episodic
            .context
            .as_deref()
            .unwrap_or_default()
            .contains("Weight goal: 125 lbs"),
        "bundle episodic context: {:?}",
        bundle.episodic.context
    );

    // The conversation itself is in the short-term slice
    let text = bundle.short_term.expect("short-term context");
    assert!(text.contains("User: my weight goal is 125 lbs"));
    assert!(text.contains("Assistant: Got it, targeting 125 lbs."));
    assert_eq!(bundle.stats.short_term, TierStatus::Ok);
    assert_eq!(bundle.stats.semantic, TierStatus::Skipped);
}

#[tokio::test]
async fn casual_turn_stores_nothing_beyond_the_log() {
    let memory = memory().await;
    let u = user();

    let receipt = memory
        .store_turn(test_utils::chat_turn(&u, &session("s1")))
        .await
        .unwrap();

    assert!(receipt.short_term.is_stored());
    assert!(receipt.episodic.is_none(), "no goal statement, no episodic write");
    assert!(receipt.procedural.is_none(), "no tools, no procedural write");
}

#[tokio::test]
async fn tool_turn_feeds_procedural_memory() {
    let memory = memory().await;
    let u = user();

    let receipt = memory
        .store_turn(test_utils::tool_turn(
            &u,
            &session("s1"),
            &["search", "aggregate_metrics"],
            0.9,
        ))
        .await
        .unwrap();
    assert_eq!(receipt.procedural, Some(WriteOutcome::Stored));

    let bundle = memory
        .retrieve_context("average heart rate this week", opts("s1", &u))
        .await
        .unwrap();

    assert_eq!(bundle.procedural.query_type, QueryType::Aggregation);
    assert_eq!(
        bundle.procedural.plan,
        Some(vec!["search".to_string(), "aggregate_metrics".to_string()])
    );
}

#[tokio::test]
async fn low_scoring_tool_turn_is_skipped_not_failed() {
    let memory = memory().await;
    let u = user();

    let receipt = memory
        .store_turn(test_utils::tool_turn(&u, &session("s1"), &["search"], 0.3))
        .await
        .unwrap();

    assert!(matches!(
        receipt.procedural,
        Some(WriteOutcome::Skipped { .. })
    ));
    assert!(receipt.is_fully_stored());
}

#[tokio::test]
async fn semantic_tier_joins_when_requested() {
    let memory = memory().await;
    let u = user();

    memory
        .semantic()
        .store(
            "Adults need roughly 7 to 9 hours of sleep per night",
            "guideline",
            "sleep",
            "Sleep supports recovery and training adaptation",
            "unit-test",
            RecordMetadata::empty(),
        )
        .await
        .unwrap();

    let bundle = memory
        .retrieve_context(
            "how many hours of sleep do adults need",
            opts("s1", &u).with_semantic(3),
        )
        .await
        .unwrap();

    let semantic = bundle.semantic.expect("semantic slice was requested");
    assert_eq!(semantic.hits, 1);
    assert!(
        semantic
            .context
            .as_deref()
            .unwrap_or_default()
            .contains("7 to 9 hours")
    );
    assert_eq!(bundle.stats.semantic, TierStatus::Ok);
}

#[tokio::test]
async fn empty_query_is_rejected() {
    let memory = memory().await;
    let err = memory
        .retrieve_context("  ", opts("s1", &user()))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "invalid_input");
}

#[tokio::test]
async fn empty_turn_messages_are_rejected() {
    let memory = memory().await;
    let mut turn = test_utils::chat_turn(&user(), &session("s1"));
    turn.assistant_message = String::new();

    let err = memory.store_turn(turn).await.unwrap_err();
    assert_eq!(err.code(), "invalid_input");
}

#[tokio::test]
async fn memory_stats_reflect_stored_data() {
    let memory = memory().await;
    let u = user();
    let s1 = session("s1");

    memory.store_turn(test_utils::goal_turn(&u, &s1)).await.unwrap();
    memory
        .store_turn(test_utils::tool_turn(&u, &s1, &["aggregate_metrics"], 0.9))
        .await
        .unwrap();

    let stats = memory.memory_stats(&u, &s1).await.unwrap();
    assert_eq!(stats.short_term_messages, 4); // two turns, two messages each
    assert_eq!(stats.episodic_records, 1);
    assert_eq!(stats.procedural_patterns, 1);
    assert!(stats.embedding_cache.provider_calls > 0);
}

#[tokio::test]
async fn clear_session_keeps_long_term_tiers() {
    let memory = memory().await;
    let u = user();
    let s1 = session("s1");

    memory.store_turn(test_utils::goal_turn(&u, &s1)).await.unwrap();
    memory.clear_session(&s1).await.unwrap();

    let stats = memory.memory_stats(&u, &s1).await.unwrap();
    assert_eq!(stats.short_term_messages, 0);
    assert_eq!(stats.episodic_records, 1, "episodic survives a session clear");
}

#[tokio::test]
async fn clear_user_spares_semantic_knowledge() {
    let memory = memory().await;
    let u = user();
    let s1 = session("s1");

    memory.store_turn(test_utils::goal_turn(&u, &s1)).await.unwrap();
    memory
        .store_turn(test_utils::tool_turn(&u, &s1, &["aggregate_metrics"], 0.9))
        .await
        .unwrap();
    memory
        .semantic()
        .store(
            "Hydration needs rise with training volume",
            "guideline",
            "hydration",
            "More sweat, more water",
            "unit-test",
            RecordMetadata::empty(),
        )
        .await
        .unwrap();

    memory.clear_user(&u).await.unwrap();

    let stats = memory.memory_stats(&u, &s1).await.unwrap();
    assert_eq!(stats.short_term_messages, 0);
    assert_eq!(stats.episodic_records, 0);
    assert_eq!(stats.procedural_patterns, 0);
    assert_eq!(stats.semantic_facts, 1, "semantic is shared and survives");
}

#[tokio::test]
async fn configured_validator_checks_tool_answers() {
    let memory = memory().await;

    let outputs = vec![serde_json::json!({"average": "72.5 bpm"})];
    let report = memory
        .validator()
        .validate("Your average heart rate was 150 bpm.", &outputs);

    assert!(!report.valid);
    assert_eq!(report.unverified.len(), 1);
}

#[tokio::test]
async fn bundle_statuses_distinguish_empty_from_ok() {
    let memory = memory().await;
    let u = user();

    // Nothing stored yet: everything answers but empty
    let bundle = memory
        .retrieve_context("average pace lately", opts("fresh", &u))
        .await
        .unwrap();

    assert_eq!(bundle.stats.short_term, TierStatus::Empty);
    assert_eq!(bundle.stats.episodic, TierStatus::Empty);
    assert_eq!(bundle.stats.procedural, TierStatus::Empty);
    assert!(bundle.stats.warnings.is_empty());
    assert!(bundle.short_term.is_none());
}
