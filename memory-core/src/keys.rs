//! Central key registry.
//!
//! Every key and vector-index name used anywhere in the system is built
//! here. The layouts are load-bearing: existing deployments hold data under
//! exactly these shapes, so no other module may construct key text.
//!
//! Timestamps inside keys are unix epoch seconds (colon-free, sortable).

use chrono::{DateTime, Utc};

use crate::error::MemoryTier;
use crate::types::{EventType, SessionId, UserId};

/// Key prefix for each vectorized tier, used by index schemas and by
/// `clear_user` scans.
#[must_use]
pub fn tier_prefix(tier: MemoryTier) -> &'static str {
    match tier {
        MemoryTier::ShortTerm => "short_term:",
        MemoryTier::Episodic => "episodic:",
        MemoryTier::Semantic => "semantic:",
        MemoryTier::Procedural => "procedural:",
    }
}

/// Vector index over `episodic:` hashes.
pub const EPISODIC_INDEX: &str = "episodic_idx";
/// Vector index over `semantic:` hashes.
pub const SEMANTIC_INDEX: &str = "semantic_idx";
/// Vector index over `procedural:` hashes.
pub const PROCEDURAL_INDEX: &str = "procedural_idx";

/// Vector index name for a tier. Only the three vectorized tiers have one.
#[must_use]
pub fn index_name(tier: MemoryTier) -> Option<&'static str> {
    match tier {
        MemoryTier::ShortTerm => None,
        MemoryTier::Episodic => Some(EPISODIC_INDEX),
        MemoryTier::Semantic => Some(SEMANTIC_INDEX),
        MemoryTier::Procedural => Some(PROCEDURAL_INDEX),
    }
}

/// `short_term:{session}` - ordered message log, newest at head.
#[must_use]
pub fn short_term(session: &SessionId) -> String {
    format!("short_term:{session}")
}

/// `episodic:{user}:{event_type}:{ts}` - user-scoped fact hash.
#[must_use]
pub fn episodic(user: &UserId, event_type: &EventType, ts: DateTime<Utc>) -> String {
    format!(
        "episodic:{user}:{}:{}",
        event_type.as_str(),
        ts.timestamp()
    )
}

/// Prefix matching every episodic key of one user.
#[must_use]
pub fn episodic_user_pattern(user: &UserId) -> String {
    format!("episodic:{user}:*")
}

/// `semantic:{category}:{fact_type}:{ts}` - shared knowledge hash.
#[must_use]
pub fn semantic(category: &str, fact_type: &str, ts: DateTime<Utc>) -> String {
    format!("semantic:{category}:{fact_type}:{}", ts.timestamp())
}

/// `procedural:{pattern_hash}:{ts}` - learned tool-sequence hash.
#[must_use]
pub fn procedural(pattern_hash: &str, ts: DateTime<Utc>) -> String {
    format!("procedural:{pattern_hash}:{}", ts.timestamp())
}

/// `embedding_cache:{fingerprint}` - JSON-serialized cached vector.
#[must_use]
pub fn embedding_cache(fingerprint: &str) -> String {
    format!("embedding_cache:{fingerprint}")
}

/// `agg:{user}:days` - bucket-label counter hash.
#[must_use]
pub fn agg_days(user: &UserId) -> String {
    format!("agg:{user}:days")
}

/// `agg:{user}:by_date` - sorted set of item ids scored by unix timestamp.
#[must_use]
pub fn agg_by_date(user: &UserId) -> String {
    format!("agg:{user}:by_date")
}

/// `agg:{user}:item:{id}` - per-item detail hash.
#[must_use]
pub fn agg_item(user: &UserId, item_id: &str) -> String {
    format!("agg:{user}:item:{item_id}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 15, 8, 30, 0).unwrap()
    }

    #[test]
    fn test_layouts_are_bit_exact() {
        let user = UserId::from("u1");
        let session = SessionId::from("s42");
        let at = ts();
        let unix = at.timestamp();

        assert_eq!(short_term(&session), "short_term:s42");
        assert_eq!(
            episodic(&user, &EventType::Goal, at),
            format!("episodic:u1:goal:{unix}")
        );
        assert_eq!(
            semantic("nutrition", "hydration", at),
            format!("semantic:nutrition:hydration:{unix}")
        );
        assert_eq!(
            procedural("a1b2c3d4e5f60718", at),
            format!("procedural:a1b2c3d4e5f60718:{unix}")
        );
        assert_eq!(embedding_cache("deadbeef"), "embedding_cache:deadbeef");
        assert_eq!(agg_days(&user), "agg:u1:days");
        assert_eq!(agg_by_date(&user), "agg:u1:by_date");
        assert_eq!(agg_item(&user, "2024-03-15:run:08:30:00"), "agg:u1:item:2024-03-15:run:08:30:00");
    }

    #[test]
    fn test_index_names() {
        assert_eq!(index_name(MemoryTier::Episodic), Some("episodic_idx"));
        assert_eq!(index_name(MemoryTier::Semantic), Some("semantic_idx"));
        assert_eq!(index_name(MemoryTier::Procedural), Some("procedural_idx"));
        assert_eq!(index_name(MemoryTier::ShortTerm), None);
    }

    #[test]
    fn test_keys_fall_under_their_tier_prefix() {
        let user = UserId::from("u1");
        assert!(episodic(&user, &EventType::Preference, ts())
            .starts_with(tier_prefix(MemoryTier::Episodic)));
        assert!(episodic_user_pattern(&user).starts_with("episodic:u1:"));
    }

    #[test]
    fn test_custom_event_type_in_key() {
        let user = UserId::from("u1");
        let key = episodic(&user, &EventType::Other("injury".to_string()), ts());
        assert!(key.starts_with("episodic:u1:injury:"));
    }
}
