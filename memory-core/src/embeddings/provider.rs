//! Embedding provider capability.
//!
//! The actual model (local or remote) lives outside the core; consumers
//! inject anything implementing this trait.

use async_trait::async_trait;

use crate::error::Result;

/// Injected capability converting text into a fixed-dimension vector.
///
/// A provider is a total function over non-empty text: it either returns a
/// vector of exactly [`dimension()`](EmbeddingProvider::dimension) floats
/// or fails with `EmbeddingUnavailable`.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate the embedding for one text.
    ///
    /// # Errors
    ///
    /// `EmbeddingUnavailable` when the provider refuses or times out.
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>>;

    /// The embedding dimensionality this provider produces.
    fn dimension(&self) -> usize;

    /// Model name or identifier, for logs and stats.
    fn model_name(&self) -> &str;

    /// Check whether the provider can currently answer.
    async fn is_available(&self) -> bool {
        self.embed_text("health probe").await.is_ok()
    }
}
