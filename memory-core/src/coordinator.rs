//! # Memory coordinator
//!
//! Single entry point the agent loop talks to. `retrieve_context` fans
//! out to the four tiers concurrently and merges whatever comes back in
//! time; `store_turn` fans out the per-tier writes and reports each one.
//!
//! Degradation policy: **retrieval is best-effort** (a failing tier
//! becomes an empty slice, flagged in stats; the call only errors when
//! every tier fails), **storage is strict** (every write outcome is
//! reported, failures included).

use std::sync::Arc;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::time::{timeout, Instant};
use tracing::{info, instrument, warn};

use crate::aggregation::AggregationIndexer;
use crate::config::MemoryConfig;
use crate::embeddings::{EmbeddingCacheStats, EmbeddingProvider, EmbeddingService};
use crate::episodic::{EpisodicMemory, EpisodicSlice};
use crate::error::{Error, MemoryTier, Result};
use crate::procedural::{ProceduralMemory, ProceduralSlice, ProceduralWrite};
use crate::semantic::{SemanticMemory, SemanticSlice};
use crate::short_term::{ShortTermLog, ShortTermStats};
use crate::store::resilient::ResilientStore;
use crate::store::KvStore;
use crate::tokens::{TokenManager, Tokenizer};
use crate::types::{
    EventType, Message, RecordMetadata, SessionId, StoreReceipt, TurnInput, UserId, WriteOutcome,
};
use crate::validation::NumericValidator;

/// The single well-known user this deployment serves.
pub const DEFAULT_USER: &str = "wellness_user";

/// How one tier fared during a retrieval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TierStatus {
    /// Tier answered with data
    Ok,
    /// Tier answered, nothing relevant stored
    Empty,
    /// Tier errored; its slice was replaced with an empty one
    Degraded,
    /// Tier missed the coordinator deadline
    TimedOut,
    /// Tier was not asked (semantic without a `top_k_semantic`)
    Skipped,
}

/// Per-call retrieval diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalStats {
    /// Short-term log status
    pub short_term: TierStatus,
    /// Episodic tier status
    pub episodic: TierStatus,
    /// Semantic tier status
    pub semantic: TierStatus,
    /// Procedural tier status
    pub procedural: TierStatus,
    /// Wall-clock time of the whole gather
    pub duration_ms: u64,
    /// Human-readable notes on anything that degraded
    pub warnings: Vec<String>,
}

/// Everything the agent needs to answer one turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextBundle {
    /// Rendered conversation window, chronological
    pub short_term: Option<String>,
    /// Usage stats for the short-term slice
    pub short_term_stats: ShortTermStats,
    /// User facts relevant to the query
    pub episodic: EpisodicSlice,
    /// Shared knowledge, only when requested
    #[serde(skip_serializing_if = "Option::is_none")]
    pub semantic: Option<SemanticSlice>,
    /// Candidate tool plans
    pub procedural: ProceduralSlice,
    /// Per-tier diagnostics
    pub stats: RetrievalStats,
}

/// Tier fan-out knobs for one retrieval. `None` falls back to the
/// configured default; the semantic tier is only consulted when
/// `top_k_semantic` is set.
#[derive(Debug, Clone)]
pub struct RetrieveOptions {
    /// Conversation session to load short-term context from
    pub session: SessionId,
    /// User whose memory is consulted
    pub user: UserId,
    /// Episodic hits to request
    pub top_k_episodic: Option<usize>,
    /// Semantic hits to request; `None` skips the tier
    pub top_k_semantic: Option<usize>,
    /// Procedural hits to request
    pub top_k_procedural: Option<usize>,
}

impl RetrieveOptions {
    /// Options for a session of the default single user.
    #[must_use]
    pub fn for_session(session: SessionId) -> Self {
        Self {
            session,
            user: UserId::from(DEFAULT_USER),
            top_k_episodic: None,
            top_k_semantic: None,
            top_k_procedural: None,
        }
    }

    /// Ask the semantic tier for `k` hits too.
    #[must_use]
    pub fn with_semantic(mut self, k: usize) -> Self {
        self.top_k_semantic = Some(k);
        self
    }
}

/// Per-tier record counts plus cache stats, for `memory_stats`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryStats {
    /// Messages currently retained for the session
    pub short_term_messages: u64,
    /// Episodic records stored for the user
    pub episodic_records: usize,
    /// Facts visible to the semantic index
    pub semantic_facts: u64,
    /// Patterns visible to the procedural index
    pub procedural_patterns: u64,
    /// Embedding cache counters
    pub embedding_cache: EmbeddingCacheStats,
}

/// The dependency-injection root owning every memory capability.
///
/// Built once by `main`, shared by reference. The raw backend is wrapped
/// in a [`ResilientStore`] here, so every tier shares one circuit breaker
/// and one connection pool.
pub struct WellnessMemory {
    config: MemoryConfig,
    store: Arc<dyn KvStore>,
    embeddings: Arc<EmbeddingService>,
    short_term: ShortTermLog,
    episodic: EpisodicMemory,
    semantic: SemanticMemory,
    procedural: ProceduralMemory,
    aggregation: AggregationIndexer,
    validator: NumericValidator,
    goal_re: Regex,
}

impl WellnessMemory {
    /// Wire up the full memory system with the bundled heuristic
    /// tokenizer.
    ///
    /// # Errors
    ///
    /// Backend errors from index creation or seeding pass through.
    pub async fn connect(
        config: MemoryConfig,
        backend: Arc<dyn KvStore>,
        provider: Arc<dyn EmbeddingProvider>,
    ) -> Result<Self> {
        Self::connect_with(
            config,
            backend,
            provider,
            Arc::new(crate::tokens::HeuristicTokenizer),
        )
        .await
    }

    /// Wire up the full memory system with an injected tokenizer.
    ///
    /// Creates the three vector indices if absent and seeds the semantic
    /// tier when configured to.
    ///
    /// # Errors
    ///
    /// Backend errors from index creation or seeding pass through.
    pub async fn connect_with(
        config: MemoryConfig,
        backend: Arc<dyn KvStore>,
        provider: Arc<dyn EmbeddingProvider>,
        tokenizer: Arc<dyn Tokenizer>,
    ) -> Result<Self> {
        let store: Arc<dyn KvStore> = Arc::new(ResilientStore::new(backend, &config.store));
        let embeddings = Arc::new(EmbeddingService::new(
            provider,
            Arc::clone(&store),
            config.vector_dim,
            config.ttl.embedding_cache,
            config.embedding_l1_capacity,
        ));
        let tokens = TokenManager::new(tokenizer, config.tokens.clone());

        let short_term = ShortTermLog::new(
            Arc::clone(&store),
            tokens,
            config.short_term_cap,
            config.ttl.session,
        );
        let episodic = EpisodicMemory::new(
            Arc::clone(&store),
            Arc::clone(&embeddings),
            config.ttl.long_term,
        );
        let semantic = SemanticMemory::new(
            Arc::clone(&store),
            Arc::clone(&embeddings),
            config.ttl.long_term,
        );
        let procedural = ProceduralMemory::new(
            Arc::clone(&store),
            Arc::clone(&embeddings),
            config.procedural.clone(),
            config.ttl.long_term,
        );
        let aggregation = AggregationIndexer::new(Arc::clone(&store), config.ttl.long_term);
        let validator = NumericValidator::new(config.validator.clone());

        episodic.ensure_index().await?;
        semantic.ensure_index().await?;
        procedural.ensure_index().await?;

        if config.seed_semantic_facts {
            let seeded = semantic.seed_if_empty().await?;
            if seeded > 0 {
                info!(seeded, "semantic tier seeded on first start");
            }
        }

        // Conservative by design: only explicit goal statements are
        // extracted, everything else is a false negative.
        #[allow(clippy::unwrap_used)]
        let goal_re =
            Regex::new(r"(?i)\bmy\s+([a-z][a-z ]{0,30}?)\s+goal\s+is\s+(\d+(?:\.\d+)?)\s*([a-z%]+)?")
                .unwrap();

        Ok(Self {
            config,
            store,
            embeddings,
            short_term,
            episodic,
            semantic,
            procedural,
            aggregation,
            validator,
            goal_re,
        })
    }

    /// The shared (already resilient) store handle.
    #[must_use]
    pub fn store(&self) -> Arc<dyn KvStore> {
        Arc::clone(&self.store)
    }

    /// The aggregation index surface, used by document importers and
    /// metric tools.
    #[must_use]
    pub fn aggregation(&self) -> &AggregationIndexer {
        &self.aggregation
    }

    /// Direct access to the short-term log.
    #[must_use]
    pub fn short_term(&self) -> &ShortTermLog {
        &self.short_term
    }

    /// Direct access to the episodic tier.
    #[must_use]
    pub fn episodic(&self) -> &EpisodicMemory {
        &self.episodic
    }

    /// Direct access to the semantic tier (importers store facts here).
    #[must_use]
    pub fn semantic(&self) -> &SemanticMemory {
        &self.semantic
    }

    /// Direct access to the procedural tier.
    #[must_use]
    pub fn procedural(&self) -> &ProceduralMemory {
        &self.procedural
    }

    /// The response validator configured for this deployment. Callers
    /// run every numeric answer through it before showing the user.
    #[must_use]
    pub fn validator(&self) -> &NumericValidator {
        &self.validator
    }

    /// Embedding cache counters.
    #[must_use]
    pub fn embedding_stats(&self) -> EmbeddingCacheStats {
        self.embeddings.stats()
    }

    /// Assemble the context bundle for one agent turn.
    ///
    /// All tier reads run concurrently under the coordinator deadline.
    /// A tier that errors or misses the deadline contributes an empty
    /// slice and a warning; the call itself fails only when every
    /// consulted tier fails.
    ///
    /// # Errors
    ///
    /// `InvalidInput` for an empty query; `BackendUnavailable` when no
    /// tier could be read at all.
    #[instrument(skip(self, opts), fields(session = %opts.session, user = %opts.user))]
    pub async fn retrieve_context(
        &self,
        query: &str,
        opts: RetrieveOptions,
    ) -> Result<ContextBundle> {
        if query.trim().is_empty() {
            return Err(Error::InvalidInput("query must not be empty".to_string()));
        }

        let started = Instant::now();
        let deadline = self.config.coord_deadline;
        let k_episodic = opts.top_k_episodic.unwrap_or(self.config.top_k_episodic);
        let k_procedural = opts
            .top_k_procedural
            .unwrap_or(self.config.top_k_procedural);

        let short_term_fut = timeout(
            deadline,
            self.short_term
                .trim_to_budget(&opts.session, self.config.tokens.budget),
        );
        let episodic_fut = timeout(deadline, self.episodic.retrieve(&opts.user, query, k_episodic));
        let semantic_fut = async {
            match opts.top_k_semantic {
                Some(k) => Some(timeout(deadline, self.semantic.retrieve(query, k, None)).await),
                None => None,
            }
        };
        let procedural_fut = timeout(
            deadline,
            self.procedural.retrieve(&opts.user, query, k_procedural),
        );

        let (short_term_res, episodic_res, semantic_res, procedural_res) =
            tokio::join!(short_term_fut, episodic_fut, semantic_fut, procedural_fut);

        let mut warnings = Vec::new();

        let (short_term_text, short_term_stats, short_term_status) = match short_term_res {
            Ok(Ok((messages, stats))) => {
                let status = if messages.is_empty() {
                    TierStatus::Empty
                } else {
                    TierStatus::Ok
                };
                (ShortTermLog::render(&messages), stats, status)
            }
            Ok(Err(err)) => {
                warn!("short-term tier degraded: {}", err);
                warnings.push(format!("short_term: {err}"));
                (None, ShortTermStats::default(), TierStatus::Degraded)
            }
            Err(_) => {
                warnings.push("short_term: deadline exceeded".to_string());
                (None, ShortTermStats::default(), TierStatus::TimedOut)
            }
        };

        let (episodic_slice, episodic_status) = match episodic_res {
            Ok(Ok(slice)) => {
                let status = if slice.hits == 0 {
                    TierStatus::Empty
                } else {
                    TierStatus::Ok
                };
                (slice, status)
            }
            Ok(Err(err)) => {
                warn!("episodic tier degraded: {}", err);
                warnings.push(format!("episodic: {err}"));
                (EpisodicSlice::empty(), TierStatus::Degraded)
            }
            Err(_) => {
                warnings.push("episodic: deadline exceeded".to_string());
                (EpisodicSlice::empty(), TierStatus::TimedOut)
            }
        };

        let (semantic_slice, semantic_status) = match semantic_res {
            None => (None, TierStatus::Skipped),
            Some(Ok(Ok(slice))) => {
                let status = if slice.hits == 0 {
                    TierStatus::Empty
                } else {
                    TierStatus::Ok
                };
                (Some(slice), status)
            }
            Some(Ok(Err(err))) => {
                warn!("semantic tier degraded: {}", err);
                warnings.push(format!("semantic: {err}"));
                (Some(SemanticSlice::empty()), TierStatus::Degraded)
            }
            Some(Err(_)) => {
                warnings.push("semantic: deadline exceeded".to_string());
                (Some(SemanticSlice::empty()), TierStatus::TimedOut)
            }
        };

        let (procedural_slice, procedural_status) = match procedural_res {
            Ok(Ok(slice)) => {
                let status = if slice.patterns.is_empty() {
                    TierStatus::Empty
                } else {
                    TierStatus::Ok
                };
                (slice, status)
            }
            Ok(Err(err)) => {
                warn!("procedural tier degraded: {}", err);
                warnings.push(format!("procedural: {err}"));
                (
                    ProceduralSlice::empty(crate::procedural::classify_query(query)),
                    TierStatus::Degraded,
                )
            }
            Err(_) => {
                warnings.push("procedural: deadline exceeded".to_string());
                (
                    ProceduralSlice::empty(crate::procedural::classify_query(query)),
                    TierStatus::TimedOut,
                )
            }
        };

        let statuses = [
            short_term_status,
            episodic_status,
            semantic_status,
            procedural_status,
        ];
        let attempted = statuses
            .iter()
            .filter(|s| **s != TierStatus::Skipped)
            .count();
        let failed = statuses
            .iter()
            .filter(|s| matches!(s, TierStatus::Degraded | TierStatus::TimedOut))
            .count();
        if attempted > 0 && failed == attempted {
            return Err(Error::BackendUnavailable {
                reason: format!("every memory tier failed: {}", warnings.join("; ")),
            });
        }

        Ok(ContextBundle {
            short_term: short_term_text,
            short_term_stats,
            episodic: episodic_slice,
            semantic: semantic_slice,
            procedural: procedural_slice,
            stats: RetrievalStats {
                short_term: short_term_status,
                episodic: episodic_status,
                semantic: semantic_status,
                procedural: procedural_status,
                duration_ms: started.elapsed().as_millis() as u64,
                warnings,
            },
        })
    }

    /// Persist one completed turn across the tiers.
    ///
    /// The short-term append always runs; the episodic write runs when
    /// fact extraction recognizes a goal statement; the procedural write
    /// runs when tools were traced. The three groups fan out concurrently
    /// and every outcome lands in the receipt.
    ///
    /// # Errors
    ///
    /// `InvalidInput` when either message is empty. Tier-level failures
    /// are reported inside the receipt, not raised.
    #[instrument(skip(self, turn), fields(session = %turn.session, user = %turn.user))]
    pub async fn store_turn(&self, turn: TurnInput) -> Result<StoreReceipt> {
        if turn.user_message.trim().is_empty() || turn.assistant_message.trim().is_empty() {
            return Err(Error::InvalidInput(
                "turn messages must not be empty".to_string(),
            ));
        }

        let short_term_fut = async {
            let user_msg = Message::user(&turn.user_message);
            if let Err(err) = self.short_term.append(&turn.session, &user_msg).await {
                return WriteOutcome::from_error(&err);
            }
            let assistant_msg = Message::assistant(&turn.assistant_message);
            match self.short_term.append(&turn.session, &assistant_msg).await {
                Ok(()) => WriteOutcome::Stored,
                Err(err) => WriteOutcome::from_error(&err),
            }
        };

        let extracted = self.extract_goal(&turn.user_message);
        let episodic_fut = async {
            match &extracted {
                Some((description, metadata)) => Some(
                    match self
                        .episodic
                        .store(
                            &turn.user,
                            EventType::Goal,
                            description,
                            metadata.clone(),
                        )
                        .await
                    {
                        Ok(()) => WriteOutcome::Stored,
                        Err(err) => WriteOutcome::from_error(&err),
                    },
                ),
                None => None,
            }
        };

        let procedural_fut = async {
            if turn.tool_trace.is_empty() {
                return None;
            }
            let tools: Vec<String> = turn.tool_trace.iter().map(|t| t.name.clone()).collect();
            Some(
                match self
                    .procedural
                    .record(
                        &turn.user,
                        &turn.user_message,
                        &tools,
                        turn.success_score,
                        turn.execution_time_ms,
                        RecordMetadata::empty(),
                    )
                    .await
                {
                    Ok(ProceduralWrite::Stored { .. }) => WriteOutcome::Stored,
                    Ok(ProceduralWrite::SkippedLowScore { score }) => WriteOutcome::Skipped {
                        reason: format!("success score {score} below storage floor"),
                    },
                    Err(err) => WriteOutcome::from_error(&err),
                },
            )
        };

        let (short_term, episodic, procedural) =
            tokio::join!(short_term_fut, episodic_fut, procedural_fut);

        let receipt = StoreReceipt {
            short_term,
            episodic,
            procedural,
        };
        if !receipt.is_fully_stored() {
            warn!(?receipt, "store_turn completed with failures");
        }
        Ok(receipt)
    }

    /// Per-tier record counts plus embedding-cache stats.
    ///
    /// # Errors
    ///
    /// Backend errors pass through.
    pub async fn memory_stats(&self, user: &UserId, session: &SessionId) -> Result<MemoryStats> {
        let (short_term, episodic, semantic, procedural) = tokio::join!(
            self.short_term.len(session),
            self.episodic.count(user),
            self.semantic.count(),
            self.procedural.count(),
        );

        Ok(MemoryStats {
            short_term_messages: short_term?,
            episodic_records: episodic?,
            semantic_facts: semantic?,
            procedural_patterns: procedural?,
            embedding_cache: self.embeddings.stats(),
        })
    }

    /// Remove one session's short-term log. Long-term tiers are kept.
    ///
    /// # Errors
    ///
    /// `WriteFailed { tier: ShortTerm }` on backend trouble.
    pub async fn clear_session(&self, session: &SessionId) -> Result<()> {
        self.short_term.clear(session).await
    }

    /// Remove everything owned by a user: all short-term logs, episodic
    /// records and procedural patterns. Semantic knowledge is shared and
    /// never cleared here.
    ///
    /// # Errors
    ///
    /// The first tier-level `WriteFailed` encountered.
    pub async fn clear_user(&self, user: &UserId) -> Result<()> {
        // Single-primary-user deployment: every session log belongs to
        // this user.
        let sessions = self
            .store
            .keys("short_term:*")
            .await
            .map_err(|err| Error::WriteFailed {
                tier: MemoryTier::ShortTerm,
                reason: err.to_string(),
            })?;
        if !sessions.is_empty() {
            self.store
                .del(&sessions)
                .await
                .map_err(|err| Error::WriteFailed {
                    tier: MemoryTier::ShortTerm,
                    reason: err.to_string(),
                })?;
        }

        let episodic_removed = self.episodic.clear(user).await?;
        let procedural_removed = self.procedural.clear(user).await?;
        info!(
            user = %user,
            episodic_removed,
            procedural_removed,
            sessions_removed = sessions.len(),
            "cleared user memory"
        );
        Ok(())
    }

    /// Conservative goal-statement extraction.
    ///
    /// Recognizes `"my {metric} goal is {value} {unit}"` and nothing
    /// else; a missed goal costs a follow-up question, a fabricated one
    /// pollutes the user's memory.
    fn extract_goal(&self, user_message: &str) -> Option<(String, RecordMetadata)> {
        let caps = self.goal_re.captures(user_message)?;
        let metric = caps.get(1)?.as_str().trim().to_lowercase();
        let value: f64 = caps.get(2)?.as_str().parse().ok()?;
        // A trailing word only counts as the unit when the validator's
        // vocabulary knows it ("my steps goal is 10000 every day" must
        // not record "every" as a unit).
        let unit = caps
            .get(3)
            .and_then(|m| crate::validation::canonical_unit(m.as_str()))
            .map(String::from);

        let (description, metadata) = match &unit {
            Some(unit) => (
                format!("User's {metric} goal is {value} {unit}"),
                RecordMetadata::metric_goal(&metric, value, unit),
            ),
            None => (
                format!("User's {metric} goal is {value}"),
                RecordMetadata::from_value(serde_json::json!({
                    "metric": metric,
                    "value": value,
                })),
            ),
        };
        Some((description, metadata))
    }
}
