//! Configuration for the memory system.
//!
//! Plain structs with defaults; `MemoryConfig::from_env()` overrides from
//! `WELLNESS_MEMORY_*` environment variables, clamping out-of-range values
//! and warning (never failing) on unparsable ones.

use std::time::Duration;

// ============================================================================
// Sub-configurations
// ============================================================================

/// Expiry policy for every TTL-bearing key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TtlConfig {
    /// Short-term log TTL (refreshed on every append)
    pub session: Duration,
    /// Episodic / semantic / procedural record TTL
    pub long_term: Duration,
    /// Embedding cache entry TTL
    pub embedding_cache: Duration,
}

impl Default for TtlConfig {
    fn default() -> Self {
        Self {
            session: Duration::from_secs(60 * 60),
            long_term: Duration::from_secs(60 * 60 * 24 * 30),
            embedding_cache: Duration::from_secs(60 * 60 * 24 * 7),
        }
    }
}

/// Token-budget trimming knobs for the short-term log.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenConfig {
    /// Model context budget in tokens
    pub budget: usize,
    /// Trim until usage drops below `budget * threshold`
    pub threshold: f64,
    /// Never trim below this many messages
    pub min_messages_keep: usize,
    /// Fixed per-message envelope cost (role framing)
    pub role_overhead_tokens: usize,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            budget: 4000,
            threshold: 0.8,
            min_messages_keep: 2,
            role_overhead_tokens: 4,
        }
    }
}

/// Whether procedural patterns are retrieved per user or shared.
///
/// The storage key is always user-agnostic (`procedural:{hash}:{ts}`); this
/// only controls the retrieval filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProceduralScope {
    /// Retrieval filters to the requesting user's patterns
    User,
    /// Patterns learned from any user are candidates
    #[default]
    Global,
}

/// Procedural memory knobs.
#[derive(Debug, Clone, PartialEq)]
pub struct ProceduralConfig {
    /// Patterns below this success score are never persisted
    pub min_score: f32,
    /// Patterns below this score are dropped at retrieval time
    pub retrieval_floor: f32,
    /// Retrieval scope, see [`ProceduralScope`]
    pub scope: ProceduralScope,
}

impl Default for ProceduralConfig {
    fn default() -> Self {
        Self {
            min_score: 0.7,
            retrieval_floor: 0.5,
            scope: ProceduralScope::Global,
        }
    }
}

/// Numeric-validator knobs.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatorConfig {
    /// Relative tolerance when matching a claim against ground truth
    pub tolerance: f64,
    /// Minimum verified share for a response to count as valid
    pub valid_threshold: f64,
    /// Words of surrounding context captured per claim
    pub context_window_words: usize,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            tolerance: 0.1,
            valid_threshold: 0.8,
            context_window_words: 5,
        }
    }
}

/// Resilience knobs for the KV+vector backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Consecutive recoverable failures before the circuit opens
    pub cb_failure_threshold: u32,
    /// How long an open circuit rejects calls before a half-open probe
    pub cb_open_duration: Duration,
    /// Per-operation deadline
    pub op_timeout: Duration,
    /// Maximum concurrent backend operations
    pub pool_max: usize,
    /// How long to wait for a pool slot before failing fast
    pub pool_acquire_timeout: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            cb_failure_threshold: 5,
            cb_open_duration: Duration::from_secs(30),
            op_timeout: Duration::from_secs(5),
            pool_max: 10,
            pool_acquire_timeout: Duration::from_secs(2),
        }
    }
}

// ============================================================================
// Main configuration
// ============================================================================

/// Main configuration for the wellness memory system.
///
/// # Examples
///
/// ```
/// use wellness_memory_core::config::MemoryConfig;
///
/// let config = MemoryConfig {
///     short_term_cap: 100,
///     ..MemoryConfig::default()
/// };
/// assert_eq!(config.vector_dim, 384);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryConfig {
    /// Embedding dimensionality, fixed for all tiers
    pub vector_dim: usize,
    /// Expiry policy
    pub ttl: TtlConfig,
    /// Hard cap on messages retained per session
    pub short_term_cap: usize,
    /// Token trimming knobs
    pub tokens: TokenConfig,
    /// Procedural memory knobs
    pub procedural: ProceduralConfig,
    /// Numeric validator knobs
    pub validator: ValidatorConfig,
    /// Backend resilience knobs
    pub store: StoreConfig,
    /// Deadline bounding an entire `retrieve_context` call
    pub coord_deadline: Duration,
    /// Default episodic hits per retrieval
    pub top_k_episodic: usize,
    /// Default semantic hits per retrieval
    pub top_k_semantic: usize,
    /// Default procedural hits per retrieval
    pub top_k_procedural: usize,
    /// Entries held in the in-process embedding cache
    pub embedding_l1_capacity: usize,
    /// Whether startup seeds the semantic tier when its index is empty
    pub seed_semantic_facts: bool,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            vector_dim: 384,
            ttl: TtlConfig::default(),
            short_term_cap: 50,
            tokens: TokenConfig::default(),
            procedural: ProceduralConfig::default(),
            validator: ValidatorConfig::default(),
            store: StoreConfig::default(),
            coord_deadline: Duration::from_secs(10),
            top_k_episodic: 3,
            top_k_semantic: 3,
            top_k_procedural: 3,
            embedding_l1_capacity: 1024,
            seed_semantic_facts: false,
        }
    }
}

impl MemoryConfig {
    /// Create a `MemoryConfig` from environment variables.
    ///
    /// Reads `WELLNESS_MEMORY_*` variables, falling back to defaults for
    /// missing values and warning on unparsable ones.
    ///
    /// # Environment Variables
    ///
    /// * `WELLNESS_MEMORY_VECTOR_DIM` - embedding dimensionality
    /// * `WELLNESS_MEMORY_TTL_SESSION_SECS` - short-term log TTL
    /// * `WELLNESS_MEMORY_TTL_LONG_SECS` - long-term record TTL
    /// * `WELLNESS_MEMORY_TTL_EMBED_SECS` - embedding cache TTL
    /// * `WELLNESS_MEMORY_SHORT_TERM_CAP` - message cap per session
    /// * `WELLNESS_MEMORY_TOKEN_BUDGET` - token budget
    /// * `WELLNESS_MEMORY_BUDGET_THRESHOLD` - trim threshold (0.0-1.0)
    /// * `WELLNESS_MEMORY_MIN_MESSAGES_KEEP` - trim floor
    /// * `WELLNESS_MEMORY_PROCEDURAL_MIN_SCORE` - storage floor (0.0-1.0)
    /// * `WELLNESS_MEMORY_PROCEDURAL_SCOPE` - `"user"` or `"global"`
    /// * `WELLNESS_MEMORY_NUMERIC_TOLERANCE` - validator tolerance
    /// * `WELLNESS_MEMORY_CB_FAILURE_THRESHOLD` - circuit breaker threshold
    /// * `WELLNESS_MEMORY_CB_OPEN_SECS` - circuit breaker cooldown
    /// * `WELLNESS_MEMORY_OP_TIMEOUT_MS` - per-op deadline
    /// * `WELLNESS_MEMORY_COORD_DEADLINE_MS` - retrieval deadline
    /// * `WELLNESS_MEMORY_POOL_MAX` - backend concurrency bound
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(dim) = parse_env::<usize>("WELLNESS_MEMORY_VECTOR_DIM") {
            config.vector_dim = dim;
        }
        if let Some(secs) = parse_env::<u64>("WELLNESS_MEMORY_TTL_SESSION_SECS") {
            config.ttl.session = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_env::<u64>("WELLNESS_MEMORY_TTL_LONG_SECS") {
            config.ttl.long_term = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_env::<u64>("WELLNESS_MEMORY_TTL_EMBED_SECS") {
            config.ttl.embedding_cache = Duration::from_secs(secs);
        }
        if let Some(cap) = parse_env::<usize>("WELLNESS_MEMORY_SHORT_TERM_CAP") {
            config.short_term_cap = cap.max(1);
        }
        if let Some(budget) = parse_env::<usize>("WELLNESS_MEMORY_TOKEN_BUDGET") {
            config.tokens.budget = budget;
        }
        if let Some(threshold) = parse_env::<f64>("WELLNESS_MEMORY_BUDGET_THRESHOLD") {
            config.tokens.threshold = threshold.clamp(0.0, 1.0);
        }
        if let Some(keep) = parse_env::<usize>("WELLNESS_MEMORY_MIN_MESSAGES_KEEP") {
            config.tokens.min_messages_keep = keep;
        }
        if let Some(score) = parse_env::<f32>("WELLNESS_MEMORY_PROCEDURAL_MIN_SCORE") {
            config.procedural.min_score = score.clamp(0.0, 1.0);
        }
        if let Ok(scope) = std::env::var("WELLNESS_MEMORY_PROCEDURAL_SCOPE") {
            config.procedural.scope = match scope.to_lowercase().as_str() {
                "user" => ProceduralScope::User,
                "global" => ProceduralScope::Global,
                other => {
                    tracing::warn!(
                        "Invalid WELLNESS_MEMORY_PROCEDURAL_SCOPE '{}', using global",
                        other
                    );
                    ProceduralScope::Global
                }
            };
        }
        if let Some(tol) = parse_env::<f64>("WELLNESS_MEMORY_NUMERIC_TOLERANCE") {
            config.validator.tolerance = tol.max(0.0);
        }
        if let Some(threshold) = parse_env::<u32>("WELLNESS_MEMORY_CB_FAILURE_THRESHOLD") {
            config.store.cb_failure_threshold = threshold.max(1);
        }
        if let Some(secs) = parse_env::<u64>("WELLNESS_MEMORY_CB_OPEN_SECS") {
            config.store.cb_open_duration = Duration::from_secs(secs);
        }
        if let Some(ms) = parse_env::<u64>("WELLNESS_MEMORY_OP_TIMEOUT_MS") {
            config.store.op_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_env::<u64>("WELLNESS_MEMORY_COORD_DEADLINE_MS") {
            config.coord_deadline = Duration::from_millis(ms);
        }
        if let Some(max) = parse_env::<usize>("WELLNESS_MEMORY_POOL_MAX") {
            config.store.pool_max = max.max(1);
        }

        config
    }
}

/// Parse one env var, warning (not failing) when the value is garbage.
fn parse_env<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!("Invalid {} '{}', using default", name, raw);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_defaults() {
        let config = MemoryConfig::default();
        assert_eq!(config.vector_dim, 384);
        assert_eq!(config.short_term_cap, 50);
        assert!((config.tokens.threshold - 0.8).abs() < f64::EPSILON);
        assert_eq!(config.tokens.min_messages_keep, 2);
        assert!((config.procedural.min_score - 0.7).abs() < f32::EPSILON);
        assert_eq!(config.procedural.scope, ProceduralScope::Global);
        assert!((config.validator.tolerance - 0.1).abs() < f64::EPSILON);
        assert_eq!(config.store.cb_failure_threshold, 5);
    }

    #[test]
    #[serial]
    fn test_from_env_overrides() {
        // Safety: serialized test, no concurrent env access
        unsafe {
            std::env::set_var("WELLNESS_MEMORY_VECTOR_DIM", "768");
            std::env::set_var("WELLNESS_MEMORY_PROCEDURAL_SCOPE", "user");
            std::env::set_var("WELLNESS_MEMORY_BUDGET_THRESHOLD", "2.5");
        }

        let config = MemoryConfig::from_env();
        assert_eq!(config.vector_dim, 768);
        assert_eq!(config.procedural.scope, ProceduralScope::User);
        // Clamped into range
        assert!((config.tokens.threshold - 1.0).abs() < f64::EPSILON);

        unsafe {
            std::env::remove_var("WELLNESS_MEMORY_VECTOR_DIM");
            std::env::remove_var("WELLNESS_MEMORY_PROCEDURAL_SCOPE");
            std::env::remove_var("WELLNESS_MEMORY_BUDGET_THRESHOLD");
        }
    }

    #[test]
    #[serial]
    fn test_from_env_garbage_falls_back() {
        unsafe {
            std::env::set_var("WELLNESS_MEMORY_TOKEN_BUDGET", "not-a-number");
        }

        let config = MemoryConfig::from_env();
        assert_eq!(config.tokens.budget, 4000);

        unsafe {
            std::env::remove_var("WELLNESS_MEMORY_TOKEN_BUDGET");
        }
    }
}
