//! Common types shared across the memory tiers.
//!
//! Records are immutable once written: updates happen by appending a new
//! record with a fresher timestamp (aggregation counters are the one
//! exception and are incremented in place).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Error;

// ============================================================================
// Identifiers
// ============================================================================

/// Opaque user identifier.
///
/// The system runs single-user, but every user-scoped record still carries
/// the id so the key layout stays compatible with multi-user data.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    /// Borrow the raw id.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for UserId {
    fn from(value: &str) -> Self {
        UserId(value.to_string())
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque conversation session identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub String);

impl SessionId {
    /// Borrow the raw id.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        SessionId(value.to_string())
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Messages
// ============================================================================

/// Who produced a message in the short-term log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The end user
    User,
    /// The agent
    Assistant,
}

impl Role {
    /// Stable lowercase label.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// A single conversation message. Immutable after append.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Unique message id
    pub id: Uuid,
    /// Who produced it
    pub role: Role,
    /// Message text
    pub content: String,
    /// When it was produced
    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// Create a message with a fresh id and the current time.
    #[must_use]
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    /// Shorthand for a user message.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    /// Shorthand for an assistant message.
    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

// ============================================================================
// Record metadata
// ============================================================================

/// Opaque per-record metadata with typed accessors for the known shapes.
///
/// Arbitrary JSON rides along with every record; the renderer only
/// understands two shapes (`{metric, value, unit}` and `{goal_text}`) and
/// falls back to the record description for everything else.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordMetadata(pub serde_json::Value);

/// The metadata shapes the context renderer understands.
#[derive(Debug, Clone, PartialEq)]
pub enum KnownMetadata {
    /// A quantified goal, e.g. `{"metric": "weight", "value": 125, "unit": "lbs"}`
    MetricGoal {
        /// What is being measured
        metric: String,
        /// Target value
        value: f64,
        /// Unit label
        unit: String,
    },
    /// A free-form goal, e.g. `{"goal_text": "run a 10k by June"}`
    FreeformGoal {
        /// The goal statement
        goal_text: String,
    },
    /// Anything else; render the record description instead.
    Opaque,
}

impl RecordMetadata {
    /// Metadata with no content.
    #[must_use]
    pub fn empty() -> Self {
        RecordMetadata(serde_json::Value::Null)
    }

    /// Wrap a JSON value.
    #[must_use]
    pub fn from_value(value: serde_json::Value) -> Self {
        RecordMetadata(value)
    }

    /// Build the `{metric, value, unit}` shape.
    #[must_use]
    pub fn metric_goal(metric: &str, value: f64, unit: &str) -> Self {
        RecordMetadata(serde_json::json!({
            "metric": metric,
            "value": value,
            "unit": unit,
        }))
    }

    /// True when there is no payload at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_null()
    }

    /// Classify into one of the shapes the renderer understands.
    #[must_use]
    pub fn known_shape(&self) -> KnownMetadata {
        let obj = match self.0.as_object() {
            Some(obj) => obj,
            None => return KnownMetadata::Opaque,
        };

        if let (Some(metric), Some(value), Some(unit)) = (
            obj.get("metric").and_then(|v| v.as_str()),
            obj.get("value").and_then(serde_json::Value::as_f64),
            obj.get("unit").and_then(|v| v.as_str()),
        ) {
            return KnownMetadata::MetricGoal {
                metric: metric.to_string(),
                value,
                unit: unit.to_string(),
            };
        }

        if let Some(goal_text) = obj.get("goal_text").and_then(|v| v.as_str()) {
            return KnownMetadata::FreeformGoal {
                goal_text: goal_text.to_string(),
            };
        }

        KnownMetadata::Opaque
    }
}

// ============================================================================
// Tier records
// ============================================================================

/// Kind of episodic event stored for a user.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    /// A stated goal ("my weight goal is 125 lbs")
    Goal,
    /// A stated preference ("I prefer morning workouts")
    Preference,
    /// A one-off observation worth keeping
    Observation,
    /// Anything else, keyed by a caller-chosen label
    #[serde(untagged)]
    Other(String),
}

impl EventType {
    /// Stable lowercase label used in keys.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            EventType::Goal => "goal",
            EventType::Preference => "preference",
            EventType::Observation => "observation",
            EventType::Other(label) => label.as_str(),
        }
    }
}

/// A user-scoped vectorized fact (goal, preference, observation).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodicRecord {
    /// Owner of this record; never surfaced to other users
    pub user_id: UserId,
    /// What kind of event this is
    pub event_type: EventType,
    /// When it was recorded
    pub timestamp: DateTime<Utc>,
    /// Natural-language description (also the embedded text)
    pub description: String,
    /// Opaque metadata, see [`RecordMetadata`]
    pub metadata: RecordMetadata,
    /// Embedding of `description`
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub embedding: Vec<f32>,
}

/// A shared, category-tagged knowledge-base fact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SemanticRecord {
    /// Coarse category tag (e.g. "nutrition", "exercise")
    pub category: String,
    /// Finer-grained fact type within the category
    pub fact_type: String,
    /// When it was recorded
    pub timestamp: DateTime<Utc>,
    /// The fact itself (embedded together with `context`)
    pub fact: String,
    /// Supporting context for the fact
    pub context: String,
    /// Where the fact came from
    pub source: String,
    /// Opaque metadata
    pub metadata: RecordMetadata,
    /// Embedding of `fact + "\n" + context`
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub embedding: Vec<f32>,
}

impl EpisodicRecord {
    /// Fresh record stamped with the current time; the embedding is
    /// attached by the tier once computed.
    #[must_use]
    pub fn new(
        user_id: UserId,
        event_type: EventType,
        description: impl Into<String>,
        metadata: RecordMetadata,
    ) -> Self {
        Self {
            user_id,
            event_type,
            timestamp: Utc::now(),
            description: description.into(),
            metadata,
            embedding: Vec::new(),
        }
    }

    /// Backend key of this record.
    #[must_use]
    pub fn key(&self) -> String {
        crate::keys::episodic(&self.user_id, &self.event_type, self.timestamp)
    }

    /// Hash fields persisted alongside the embedding.
    ///
    /// # Errors
    ///
    /// `Serialization` when the metadata cannot be encoded.
    pub fn to_fields(&self) -> crate::error::Result<Vec<(String, Vec<u8>)>> {
        use crate::store::text_field;
        Ok(vec![
            text_field("user_id", self.user_id.as_str()),
            text_field("event_type", self.event_type.as_str()),
            text_field("timestamp", &self.timestamp.timestamp().to_string()),
            text_field("description", &self.description),
            text_field("metadata", &serde_json::to_string(&self.metadata.0)?),
        ])
    }
}

impl SemanticRecord {
    /// Fresh record stamped with the current time.
    #[must_use]
    pub fn new(
        fact: impl Into<String>,
        fact_type: impl Into<String>,
        category: impl Into<String>,
        context: impl Into<String>,
        source: impl Into<String>,
        metadata: RecordMetadata,
    ) -> Self {
        Self {
            category: category.into(),
            fact_type: fact_type.into(),
            timestamp: Utc::now(),
            fact: fact.into(),
            context: context.into(),
            source: source.into(),
            metadata,
            embedding: Vec::new(),
        }
    }

    /// The text the embedding is computed over.
    #[must_use]
    pub fn embedded_text(&self) -> String {
        format!("{}\n{}", self.fact, self.context)
    }

    /// Backend key of this record.
    #[must_use]
    pub fn key(&self) -> String {
        crate::keys::semantic(&self.category, &self.fact_type, self.timestamp)
    }

    /// Hash fields persisted alongside the embedding.
    ///
    /// # Errors
    ///
    /// `Serialization` when the metadata cannot be encoded.
    pub fn to_fields(&self) -> crate::error::Result<Vec<(String, Vec<u8>)>> {
        use crate::store::text_field;
        Ok(vec![
            text_field("category", &self.category),
            text_field("fact_type", &self.fact_type),
            text_field("timestamp", &self.timestamp.timestamp().to_string()),
            text_field("fact", &self.fact),
            text_field("context", &self.context),
            text_field("source", &self.source),
            text_field("metadata", &serde_json::to_string(&self.metadata.0)?),
        ])
    }
}

/// Classified intent of a user query, used to group procedural patterns.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryType {
    /// Statistics over a period ("average heart rate last week")
    Aggregation,
    /// Direction over time ("is my pace improving")
    Trend,
    /// One thing against another ("this month vs last month")
    Comparison,
    /// Direct record lookup ("show my last run")
    Lookup,
    /// Everything else
    General,
}

impl QueryType {
    /// Stable lowercase label.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryType::Aggregation => "aggregation",
            QueryType::Trend => "trend",
            QueryType::Comparison => "comparison",
            QueryType::Lookup => "lookup",
            QueryType::General => "general",
        }
    }

    /// Parse a stored label back into the enum; unknown labels become `General`.
    #[must_use]
    pub fn parse(label: &str) -> Self {
        match label {
            "aggregation" => QueryType::Aggregation,
            "trend" => QueryType::Trend,
            "comparison" => QueryType::Comparison,
            "lookup" => QueryType::Lookup,
            _ => QueryType::General,
        }
    }
}

impl std::fmt::Display for QueryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A learned query-to-tool-sequence pattern with its success score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProceduralRecord {
    /// Stable short hash of `(query, sorted tools)`; the primary key
    pub pattern_hash: String,
    /// Classified intent of the originating query
    pub query_type: QueryType,
    /// The originating query text (also the embedded text)
    pub query_description: String,
    /// Ordered tool names that answered the query
    pub tools_used: Vec<String>,
    /// Observed success in `[0, 1]`
    pub success_score: f32,
    /// Wall-clock cost of the original execution
    pub execution_time_ms: u64,
    /// When it was recorded
    pub timestamp: DateTime<Utc>,
    /// Embedding of `query_description`
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub embedding: Vec<f32>,
}

impl ProceduralRecord {
    /// Fresh record stamped with the current time. Hash and
    /// classification are computed by the procedural tier and passed in.
    #[must_use]
    pub fn new(
        pattern_hash: impl Into<String>,
        query_type: QueryType,
        query_description: impl Into<String>,
        tools_used: Vec<String>,
        success_score: f32,
        execution_time_ms: u64,
    ) -> Self {
        Self {
            pattern_hash: pattern_hash.into(),
            query_type,
            query_description: query_description.into(),
            tools_used,
            success_score,
            execution_time_ms,
            timestamp: Utc::now(),
            embedding: Vec::new(),
        }
    }

    /// Backend key of this record.
    #[must_use]
    pub fn key(&self) -> String {
        crate::keys::procedural(&self.pattern_hash, self.timestamp)
    }

    /// Hash fields persisted alongside the embedding. `user_id` travels
    /// separately because the record itself is not user-scoped.
    ///
    /// # Errors
    ///
    /// `Serialization` when the tool list cannot be encoded.
    pub fn to_fields(&self, user_id: &UserId) -> crate::error::Result<Vec<(String, Vec<u8>)>> {
        use crate::store::text_field;
        Ok(vec![
            text_field("user_id", user_id.as_str()),
            text_field("pattern_hash", &self.pattern_hash),
            text_field("query_type", self.query_type.as_str()),
            text_field("query_description", &self.query_description),
            text_field("tools_used", &serde_json::to_string(&self.tools_used)?),
            text_field("success_score", &self.success_score.to_string()),
            text_field(
                "execution_time_ms",
                &self.execution_time_ms.to_string(),
            ),
            text_field("timestamp", &self.timestamp.timestamp().to_string()),
        ])
    }
}

// ============================================================================
// Turn input and store receipt
// ============================================================================

/// One tool invocation observed while answering a turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    /// Tool name
    pub name: String,
    /// Input handed to the tool
    pub input: String,
    /// Raw JSON the tool returned
    pub output_json: serde_json::Value,
}

/// Everything the coordinator needs to persist one completed agent turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnInput {
    /// Owner of the turn
    pub user: UserId,
    /// Conversation session
    pub session: SessionId,
    /// What the user said
    pub user_message: String,
    /// What the assistant answered
    pub assistant_message: String,
    /// Tools executed for this turn, in order
    pub tool_trace: Vec<ToolInvocation>,
    /// Success score for the turn in `[0, 1]`
    pub success_score: f32,
    /// Wall-clock cost of the turn
    pub execution_time_ms: u64,
}

/// Outcome of a single tier write inside `store_turn`.
///
/// Storage is strict: failures are reported, never swallowed. The receipt
/// carries one of these per tier that was asked to write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum WriteOutcome {
    /// The write was applied.
    Stored,
    /// The tier decided not to write (e.g. score below the storage floor).
    Skipped {
        /// Why the write was skipped
        reason: String,
    },
    /// The write was attempted and failed.
    Failed {
        /// Stable machine-readable error code
        code: String,
        /// Human-readable message
        message: String,
    },
}

impl WriteOutcome {
    /// Build a `Failed` outcome from an error, preserving its code.
    #[must_use]
    pub fn from_error(err: &Error) -> Self {
        WriteOutcome::Failed {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }

    /// True when the write was applied.
    #[must_use]
    pub fn is_stored(&self) -> bool {
        matches!(self, WriteOutcome::Stored)
    }

    /// True when the write was attempted and failed.
    #[must_use]
    pub fn is_failed(&self) -> bool {
        matches!(self, WriteOutcome::Failed { .. })
    }
}

/// Per-tier results of a `store_turn` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreReceipt {
    /// Message log append (always attempted)
    pub short_term: WriteOutcome,
    /// Episodic fact write, when fact extraction found one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub episodic: Option<WriteOutcome>,
    /// Procedural pattern write, when a tool trace was present
    #[serde(skip_serializing_if = "Option::is_none")]
    pub procedural: Option<WriteOutcome>,
}

impl StoreReceipt {
    /// True when every attempted write was applied.
    #[must_use]
    pub fn is_fully_stored(&self) -> bool {
        self.short_term.is_stored()
            && self.episodic.as_ref().is_none_or(WriteOutcome::is_stored)
            && self
                .procedural
                .as_ref()
                .is_none_or(|o| o.is_stored() || matches!(o, WriteOutcome::Skipped { .. }))
    }
}
