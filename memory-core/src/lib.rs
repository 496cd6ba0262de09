#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_docs_in_private_items)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::float_cmp)]

//! # Wellness Memory Core
//!
//! Multi-tier memory for a health-wellness conversational agent, layered
//! over a KV store with a vector index.
//!
//! The four tiers follow the CoALA partition of agent memory:
//!
//! - **Short-term** ([`short_term`]): per-session ordered message log with
//!   a cap, a TTL and token-budget trimming
//! - **Episodic** ([`episodic`]): user-scoped facts (goals, preferences)
//!   retrieved by semantic similarity
//! - **Semantic** ([`semantic`]): shared category-tagged knowledge base
//! - **Procedural** ([`procedural`]): learned query-to-tool-sequence
//!   patterns with success scores
//!
//! The [`coordinator::WellnessMemory`] orchestrator composes all four into
//! one context bundle per turn (best-effort reads, strict writes). The
//! [`aggregation`] module projects imported workout documents into O(1)
//! counters and time-range sets, and [`validation`] checks free-form LLM
//! answers against structured tool output.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use wellness_memory_core::config::MemoryConfig;
//! use wellness_memory_core::coordinator::{RetrieveOptions, WellnessMemory};
//! use wellness_memory_core::types::{SessionId, TurnInput, UserId};
//!
//! # async fn example(
//! #     backend: Arc<dyn wellness_memory_core::store::KvStore>,
//! #     provider: Arc<dyn wellness_memory_core::embeddings::EmbeddingProvider>,
//! # ) -> wellness_memory_core::Result<()> {
//! let memory = WellnessMemory::connect(MemoryConfig::default(), backend, provider).await?;
//!
//! // Per turn: gather context, run the agent, persist the outcome
//! let session = SessionId::from("s1");
//! let bundle = memory
//!     .retrieve_context(
//!         "what's my weight goal",
//!         RetrieveOptions::for_session(session.clone()),
//!     )
//!     .await?;
//! println!("episodic hits: {}", bundle.episodic.hits);
//!
//! let receipt = memory
//!     .store_turn(TurnInput {
//!         user: UserId::from(wellness_memory_core::coordinator::DEFAULT_USER),
//!         session,
//!         user_message: "my weight goal is 125 lbs".to_string(),
//!         assistant_message: "Noted: 125 lbs.".to_string(),
//!         tool_trace: Vec::new(),
//!         success_score: 1.0,
//!         execution_time_ms: 12,
//!     })
//!     .await?;
//! assert!(receipt.is_fully_stored());
//! # Ok(())
//! # }
//! ```
//!
//! ## Error Handling
//!
//! Everything returns [`Result<T>`] over the taxonomy in [`error`]:
//! retrieval errors are swallowed per tier (empty slice, flagged in
//! stats), write errors surface in the store receipt.

pub mod aggregation;
pub mod config;
pub mod coordinator;
pub mod embeddings;
pub mod episodic;
pub mod error;
pub mod keys;
pub mod procedural;
pub mod semantic;
pub mod short_term;
pub mod store;
pub mod tokens;
pub mod types;
pub mod validation;

// Re-export the types most consumers need
pub use aggregation::{derive_item_id, AggregateItem, AggregationIndexer};
pub use config::{MemoryConfig, ProceduralScope};
pub use coordinator::{
    ContextBundle, MemoryStats, RetrievalStats, RetrieveOptions, TierStatus, WellnessMemory,
    DEFAULT_USER,
};
pub use embeddings::{EmbeddingCacheStats, EmbeddingProvider, EmbeddingService};
pub use episodic::{EpisodicHit, EpisodicMemory, EpisodicSlice};
pub use error::{Error, MemoryTier, Result};
pub use procedural::{
    classify_query, pattern_hash, PatternSummary, ProceduralMemory, ProceduralSlice,
    ProceduralWrite,
};
pub use semantic::{SemanticMemory, SemanticSlice};
pub use short_term::{ShortTermLog, ShortTermStats};
pub use store::{
    decode_vector, encode_vector, KnnFilter, KnnHit, KvStore, Pipeline, PipelineOp,
    VectorIndexSchema,
};
pub use tokens::{HeuristicTokenizer, TokenManager, Tokenizer, TrimResult};
pub use types::{
    EpisodicRecord, EventType, KnownMetadata, Message, ProceduralRecord, QueryType,
    RecordMetadata, Role, SemanticRecord, SessionId, StoreReceipt, ToolInvocation, TurnInput,
    UserId, WriteOutcome,
};
pub use validation::{NumericClaim, NumericValidator, ValidationReport};
