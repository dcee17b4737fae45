//! Model backend seams.
//!
//! The engine consumes models through three narrow traits: [`ChatBackend`]
//! for prompt completion (extraction, trait inference, reasoning),
//! [`EmbeddingBackend`] for text vectors, and [`PairScorer`] for
//! cross-encoder reranking. Concrete backends live in [`http`] (any
//! OpenAI-compatible completions API) and [`onnx`] (local bge-small-en-v1.5).

pub mod http;
pub mod onnx;

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;

/// Number of dimensions in the embedding vectors (bge-small-en-v1.5).
pub const EMBEDDING_DIM: usize = 384;

/// Chat completion backend. One prompt in, one text answer out.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Complete a prompt, optionally under a system instruction.
    async fn complete(&self, system: Option<&str>, prompt: &str) -> Result<String>;
}

/// Trait for embedding text into vectors.
///
/// Implementations produce L2-normalized vectors of exactly [`EMBEDDING_DIM`]
/// dimensions. All methods are synchronous; callers in async contexts use
/// `tokio::task::spawn_blocking`.
pub trait EmbeddingBackend: Send + Sync {
    /// Embed a single text string into a vector.
    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed a batch of text strings. Implementations may override for batched inference.
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        texts.iter().map(|t| self.embed(t)).collect()
    }

    /// Return the number of dimensions this backend produces.
    fn dimensions(&self) -> usize {
        EMBEDDING_DIM
    }
}

/// Pairwise relevance scorer for cross-encoder reranking.
///
/// Scores every `(query, text)` pair; higher means more relevant. Synchronous
/// like [`EmbeddingBackend`], called through `spawn_blocking`.
pub trait PairScorer: Send + Sync {
    fn score_pairs(&self, query: &str, texts: &[&str]) -> Result<Vec<f32>>;
}

/// Create an embedding backend from config.
///
/// Currently only `"local"` is supported (ONNX Runtime + bge-small-en-v1.5).
/// Returns an error if model files are not found; run `mnema model download`
/// first.
pub fn create_embedding_backend(
    config: &crate::config::EmbeddingConfig,
) -> Result<Arc<dyn EmbeddingBackend>> {
    match config.provider.as_str() {
        "local" => {
            let backend = onnx::OnnxEmbedder::new(config)?;
            Ok(Arc::new(backend))
        }
        other => Err(crate::error::MemoryError::Config(format!(
            "unknown embedding provider: {other}. Supported: local"
        ))),
    }
}

/// Create the chat backend from config.
pub fn create_chat_backend(
    config: &crate::config::ChatConfig,
) -> Result<Arc<dyn ChatBackend>> {
    let backend = http::OpenAiChat::new(config)?;
    Ok(Arc::new(backend))
}
