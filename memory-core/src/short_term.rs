//! Short-term conversation log.
//!
//! One capped, TTL-bearing list per session, newest message at the head.
//! Append is a single atomic pipeline (push + trim + TTL refresh) so the
//! cap and the expiry can never drift from the data. Reads of missing
//! sessions yield empty context, never an error.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Error, MemoryTier, Result};
use crate::keys;
use crate::store::{KvStore, Pipeline};
use crate::tokens::TokenManager;
use crate::types::{Message, Role, SessionId};

/// Usage statistics for the short-term slice of a context bundle.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ShortTermStats {
    /// Messages included after trimming
    pub message_count: usize,
    /// Token count of the included messages
    pub token_count: usize,
    /// The budget the trim ran against
    pub max_tokens: usize,
    /// `token_count / max_tokens`, as a percentage
    pub usage_percent: f64,
    /// Whether any messages were dropped to fit the budget
    pub trimmed: bool,
    /// Set when the keep-floor was hit while still over the threshold
    pub over_budget_warning: bool,
}

/// Per-session ordered message log with cap, TTL and budget trimming.
#[derive(Clone)]
pub struct ShortTermLog {
    store: Arc<dyn KvStore>,
    tokens: TokenManager,
    cap: usize,
    ttl: Duration,
}

impl ShortTermLog {
    /// Build the log over a store handle.
    #[must_use]
    pub fn new(store: Arc<dyn KvStore>, tokens: TokenManager, cap: usize, ttl: Duration) -> Self {
        Self {
            store,
            tokens,
            cap: cap.max(1),
            ttl,
        }
    }

    /// Append a message at the head, trim to the cap and refresh the TTL,
    /// all in one atomic pipeline.
    ///
    /// # Errors
    ///
    /// `InvalidInput` for empty content; `WriteFailed` when the backend
    /// refuses the pipeline.
    pub async fn append(&self, session: &SessionId, message: &Message) -> Result<()> {
        if message.content.trim().is_empty() {
            return Err(Error::InvalidInput(
                "message content must not be empty".to_string(),
            ));
        }

        let payload = serde_json::to_string(message)?;
        let key = keys::short_term(session);

        let mut pipe = Pipeline::new();
        pipe.lpush(&key, vec![payload])
            .ltrim(&key, 0, self.cap as i64 - 1)
            .expire(&key, self.ttl);

        self.store.exec(pipe).await.map_err(|err| Error::WriteFailed {
            tier: MemoryTier::ShortTerm,
            reason: err.to_string(),
        })?;

        debug!(session = %session, role = message.role.as_str(), "appended message");
        Ok(())
    }

    /// Up to `n` messages, newest first. A missing session is empty.
    ///
    /// # Errors
    ///
    /// `RetrievalFailed` only on backend trouble, never for absent data.
    pub async fn latest(&self, session: &SessionId, n: usize) -> Result<Vec<Message>> {
        if n == 0 {
            return Ok(Vec::new());
        }
        let key = keys::short_term(session);
        let raw = self
            .store
            .lrange(&key, 0, n as i64 - 1)
            .await
            .map_err(|err| Error::RetrievalFailed {
                tier: MemoryTier::ShortTerm,
                reason: err.to_string(),
            })?;

        let mut messages = Vec::with_capacity(raw.len());
        for entry in raw {
            match serde_json::from_str::<Message>(&entry) {
                Ok(message) => messages.push(message),
                Err(err) => {
                    warn!(session = %session, "skipping corrupt log entry: {}", err);
                }
            }
        }
        Ok(messages)
    }

    /// Number of messages currently retained for a session.
    ///
    /// # Errors
    ///
    /// `RetrievalFailed` on backend trouble.
    pub async fn len(&self, session: &SessionId) -> Result<u64> {
        self.store
            .llen(&keys::short_term(session))
            .await
            .map_err(|err| Error::RetrievalFailed {
                tier: MemoryTier::ShortTerm,
                reason: err.to_string(),
            })
    }

    /// Load the log and trim it to a token budget.
    ///
    /// The budget path is authoritative: the retained-count cap only
    /// bounds what is stored, this decides what a model turn actually
    /// receives. Returns the surviving messages (newest first) plus usage
    /// stats.
    ///
    /// # Errors
    ///
    /// `RetrievalFailed` on backend trouble.
    pub async fn trim_to_budget(
        &self,
        session: &SessionId,
        budget_tokens: usize,
    ) -> Result<(Vec<Message>, ShortTermStats)> {
        let messages = self.latest(session, self.cap).await?;
        let result = self.tokens.trim(messages, budget_tokens);

        let usage_percent = if budget_tokens == 0 {
            0.0
        } else {
            result.trimmed_tokens as f64 / budget_tokens as f64 * 100.0
        };

        let stats = ShortTermStats {
            message_count: result.messages.len(),
            token_count: result.trimmed_tokens,
            max_tokens: budget_tokens,
            usage_percent,
            trimmed: result.dropped > 0,
            over_budget_warning: result.warn_over_threshold,
        };
        Ok((result.messages, stats))
    }

    /// Remove the whole session log.
    ///
    /// # Errors
    ///
    /// `WriteFailed` on backend trouble.
    pub async fn clear(&self, session: &SessionId) -> Result<()> {
        self.store
            .del(&[keys::short_term(session)])
            .await
            .map_err(|err| Error::WriteFailed {
                tier: MemoryTier::ShortTerm,
                reason: err.to_string(),
            })?;
        Ok(())
    }

    /// Render messages (newest first, as returned by [`latest`]) into the
    /// chronological text block the context bundle carries.
    #[must_use]
    pub fn render(messages: &[Message]) -> Option<String> {
        if messages.is_empty() {
            return None;
        }
        let mut lines = Vec::with_capacity(messages.len());
        for message in messages.iter().rev() {
            let speaker = match message.role {
                Role::User => "User",
                Role::Assistant => "Assistant",
            };
            lines.push(format!("{speaker}: {}", message.content));
        }
        Some(lines.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_is_chronological() {
        // Newest first in, oldest first out
        let messages = vec![Message::assistant("hi"), Message::user("hello")];
        let text = ShortTermLog::render(&messages).unwrap();
        assert_eq!(text, "User: hello\nAssistant: hi");
    }

    #[test]
    fn test_render_empty_is_none() {
        assert!(ShortTermLog::render(&[]).is_none());
    }

    #[test]
    fn test_stats_shape() {
        let stats = ShortTermStats {
            message_count: 2,
            token_count: 40,
            max_tokens: 100,
            usage_percent: 40.0,
            trimmed: true,
            over_budget_warning: false,
        };
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["message_count"], 2);
        assert_eq!(json["usage_percent"], 40.0);
    }
}
