//! Token counting and budget-aware trimming for the short-term log.
//!
//! Counting goes through an injected [`Tokenizer`] capability so a real
//! model tokenizer can be dropped in; the bundled heuristic is fully
//! deterministic, which the trim invariants rely on.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::TokenConfig;
use crate::types::Message;

/// Injected tokenizer capability.
///
/// Must be deterministic: the same text always counts to the same number.
pub trait Tokenizer: Send + Sync {
    /// Number of tokens in `text`.
    fn count(&self, text: &str) -> usize;
}

/// Word-based token estimate: each whitespace-separated word costs
/// `ceil(len / 4)` tokens, minimum one. Tracks real BPE tokenizers closely
/// enough for budgeting while staying dependency-free and deterministic.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicTokenizer;

impl Tokenizer for HeuristicTokenizer {
    fn count(&self, text: &str) -> usize {
        text.split_whitespace()
            .map(|word| word.len().div_ceil(4).max(1))
            .sum()
    }
}

/// Result of a budget trim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrimResult {
    /// Surviving messages, newest first
    pub messages: Vec<Message>,
    /// Token count before trimming (role overhead included)
    pub original_tokens: usize,
    /// Token count after trimming
    pub trimmed_tokens: usize,
    /// Messages dropped
    pub dropped: usize,
    /// Set when the floor was reached while still over the threshold
    pub warn_over_threshold: bool,
}

/// Token accounting against a model context budget.
#[derive(Clone)]
pub struct TokenManager {
    tokenizer: Arc<dyn Tokenizer>,
    config: TokenConfig,
}

impl TokenManager {
    /// Build a manager around a tokenizer capability.
    #[must_use]
    pub fn new(tokenizer: Arc<dyn Tokenizer>, config: TokenConfig) -> Self {
        Self { tokenizer, config }
    }

    /// Manager with the bundled heuristic tokenizer.
    #[must_use]
    pub fn heuristic(config: TokenConfig) -> Self {
        Self::new(Arc::new(HeuristicTokenizer), config)
    }

    /// The configured budget knobs.
    #[must_use]
    pub fn config(&self) -> &TokenConfig {
        &self.config
    }

    /// Count tokens in a bare text.
    #[must_use]
    pub fn count(&self, text: &str) -> usize {
        self.tokenizer.count(text)
    }

    /// Count one message including its role envelope overhead.
    #[must_use]
    pub fn count_message(&self, message: &Message) -> usize {
        self.tokenizer.count(&message.content) + self.config.role_overhead_tokens
    }

    /// Count a sequence of messages including per-message overhead.
    #[must_use]
    pub fn count_messages(&self, messages: &[Message]) -> usize {
        messages.iter().map(|m| self.count_message(m)).sum()
    }

    /// Trim `messages` (newest first) to fit `budget` tokens.
    ///
    /// Oldest messages are dropped first while the total exceeds
    /// `budget * threshold` and more than `min_messages_keep` remain. The
    /// floor always wins: the result never goes below it even when still
    /// over the threshold, in which case `warn_over_threshold` is set.
    #[must_use]
    pub fn trim(&self, messages: Vec<Message>, budget: usize) -> TrimResult {
        let original_tokens = self.count_messages(&messages);
        let limit = (budget as f64 * self.config.threshold) as usize;
        let floor = self.config.min_messages_keep;

        let mut kept = messages;
        let mut tokens = original_tokens;
        let mut dropped = 0;

        while tokens > limit && kept.len() > floor {
            // Newest-first ordering: the oldest message is at the tail
            if let Some(oldest) = kept.pop() {
                tokens -= self.count_message(&oldest);
                dropped += 1;
            } else {
                break;
            }
        }

        TrimResult {
            warn_over_threshold: tokens > limit,
            trimmed_tokens: tokens,
            original_tokens,
            dropped,
            messages: kept,
        }
    }
}
