use serde::{Deserialize, Serialize};

/// Result type alias for memory operations
pub type Result<T> = std::result::Result<T, Error>;

/// The four memory tiers managed by the coordinator.
///
/// Used to label per-tier failures so callers can tell which slice of the
/// context bundle degraded or which write was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryTier {
    /// Per-session ordered message log
    ShortTerm,
    /// User-scoped vectorized facts (goals, preferences)
    Episodic,
    /// Shared category-tagged knowledge base
    Semantic,
    /// Learned query-to-tool-sequence patterns
    Procedural,
}

impl MemoryTier {
    /// Stable lowercase label used in keys, logs and stats.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryTier::ShortTerm => "short_term",
            MemoryTier::Episodic => "episodic",
            MemoryTier::Semantic => "semantic",
            MemoryTier::Procedural => "procedural",
        }
    }
}

impl std::fmt::Display for MemoryTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error types for the wellness memory system
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Pool exhausted, circuit open, or transport failure.
    #[error("Backend unavailable: {reason}")]
    BackendUnavailable {
        /// What made the backend unreachable
        reason: String,
    },

    /// A single backend operation exceeded its deadline.
    #[error("Backend operation '{op}' timed out")]
    BackendTimeout {
        /// The operation that was cancelled
        op: String,
    },

    /// The embedding provider refused or timed out.
    #[error("Embedding provider unavailable: {0}")]
    EmbeddingUnavailable(String),

    /// A tier read returned an unexpected error (distinct from an empty result).
    #[error("Retrieval failed in {tier} tier: {reason}")]
    RetrievalFailed {
        /// Tier that failed
        tier: MemoryTier,
        /// Underlying cause
        reason: String,
    },

    /// A tier write was refused or only partially applied.
    #[error("Write failed in {tier} tier: {reason}")]
    WriteFailed {
        /// Tier that failed
        tier: MemoryTier,
        /// Underlying cause
        reason: String,
    },

    /// Malformed message, empty content, or bad vector dimensionality.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// JSON (de)serialization failure on metadata or cached vectors.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Check if this error is transient (worth retrying with backoff).
    ///
    /// The circuit breaker only counts recoverable errors toward its
    /// failure threshold; validation and serialization failures would
    /// otherwise poison the circuit for a healthy backend.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Error::BackendUnavailable { .. }
            | Error::BackendTimeout { .. }
            | Error::EmbeddingUnavailable(_) => true,
            Error::RetrievalFailed { .. }
            | Error::WriteFailed { .. }
            | Error::InvalidInput(_)
            | Error::Serialization(_) => false,
        }
    }

    /// Stable machine-readable code for this error kind.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Error::BackendUnavailable { .. } => "backend_unavailable",
            Error::BackendTimeout { .. } => "backend_timeout",
            Error::EmbeddingUnavailable(_) => "embedding_unavailable",
            Error::RetrievalFailed { .. } => "memory_retrieval_failed",
            Error::WriteFailed { .. } => "memory_write_failed",
            Error::InvalidInput(_) => "invalid_input",
            Error::Serialization(_) => "serialization_error",
        }
    }

    /// Shorthand for a circuit-open rejection.
    #[must_use]
    pub fn circuit_open() -> Self {
        Error::BackendUnavailable {
            reason: "circuit breaker open".to_string(),
        }
    }

    /// The tier this error is scoped to, if any.
    #[must_use]
    pub fn tier(&self) -> Option<MemoryTier> {
        match self {
            Error::RetrievalFailed { tier, .. } | Error::WriteFailed { tier, .. } => Some(*tier),
            _ => None,
        }
    }
}
