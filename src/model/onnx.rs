//! Local ONNX Runtime embedding backend.
//!
//! Implements [`EmbeddingBackend`] using BAAI/bge-small-en-v1.5 via `ort`.
//! Handles tokenization, inference, CLS pooling, and L2 normalization.

use std::sync::Mutex;

use ort::session::Session;
use ort::value::Tensor;
use tokenizers::Tokenizer;

use super::{EmbeddingBackend, EMBEDDING_DIM};
use crate::config::EmbeddingConfig;
use crate::error::{MemoryError, Result};

/// Maximum sequence length for bge-small-en-v1.5.
const MAX_SEQ_LEN: usize = 512;

/// Local ONNX-based embedding backend using bge-small-en-v1.5.
pub struct OnnxEmbedder {
    session: Mutex<Session>,
    tokenizer: Tokenizer,
}

// Safety: Tokenizer is Send+Sync. Session is behind a Mutex.
// The Mutex guarantees exclusive access during run().
unsafe impl Send for OnnxEmbedder {}
unsafe impl Sync for OnnxEmbedder {}

fn embed_err(e: impl std::fmt::Display) -> MemoryError {
    MemoryError::EmbeddingFailed {
        detail: e.to_string(),
    }
}

impl OnnxEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let cache_dir = crate::config::expand_tilde(&config.cache_dir);
        let model_path = cache_dir.join("model.onnx");
        let tokenizer_path = cache_dir.join("tokenizer.json");

        if !model_path.exists() {
            return Err(MemoryError::Config(format!(
                "ONNX model not found at {}. Run `mnema model download` first.",
                model_path.display()
            )));
        }
        if !tokenizer_path.exists() {
            return Err(MemoryError::Config(format!(
                "Tokenizer not found at {}. Run `mnema model download` first.",
                tokenizer_path.display()
            )));
        }

        let session = Session::builder()
            .map_err(embed_err)?
            .with_optimization_level(ort::session::builder::GraphOptimizationLevel::Level3)
            .map_err(embed_err)?
            .with_intra_threads(4)
            .map_err(embed_err)?
            .commit_from_file(&model_path)
            .map_err(embed_err)?;

        tracing::info!(model = %model_path.display(), "ONNX model loaded");

        let mut tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| embed_err(format!("failed to load tokenizer: {e}")))?;

        tokenizer
            .with_truncation(Some(tokenizers::TruncationParams {
                max_length: MAX_SEQ_LEN,
                ..Default::default()
            }))
            .map_err(|e| embed_err(format!("failed to set truncation: {e}")))?;

        tokenizer.with_padding(Some(tokenizers::PaddingParams {
            strategy: tokenizers::PaddingStrategy::BatchLongest,
            ..Default::default()
        }));

        tracing::info!(tokenizer = %tokenizer_path.display(), "tokenizer loaded");

        Ok(Self {
            session: Mutex::new(session),
            tokenizer,
        })
    }
}

impl EmbeddingBackend for OnnxEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut results = self.embed_batch(&[text])?;
        results.pop().ok_or_else(|| MemoryError::EmbeddingFailed {
            detail: "embedding batch returned no vectors".into(),
        })
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let encodings = self
            .tokenizer
            .encode_batch(texts.to_vec(), true)
            .map_err(|e| embed_err(format!("tokenization failed: {e}")))?;

        let batch_size = encodings.len();
        let seq_len = encodings[0].get_ids().len();

        // Flat i64 input tensors
        let mut input_ids_flat = Vec::with_capacity(batch_size * seq_len);
        let mut attention_mask_flat = Vec::with_capacity(batch_size * seq_len);

        for encoding in &encodings {
            for &id in encoding.get_ids() {
                input_ids_flat.push(id as i64);
            }
            for &mask in encoding.get_attention_mask() {
                attention_mask_flat.push(mask as i64);
            }
        }

        let shape = vec![batch_size as i64, seq_len as i64];
        let input_ids_tensor =
            Tensor::from_array((shape.clone(), input_ids_flat.into_boxed_slice()))
                .map_err(embed_err)?;
        let attention_mask_tensor =
            Tensor::from_array((shape.clone(), attention_mask_flat.into_boxed_slice()))
                .map_err(embed_err)?;
        // token_type_ids: all zeros (single sentence, no segment B)
        let token_type_ids = vec![0i64; batch_size * seq_len];
        let token_type_ids_tensor = Tensor::from_array((shape, token_type_ids.into_boxed_slice()))
            .map_err(embed_err)?;

        let mut session = self
            .session
            .lock()
            .map_err(|e| MemoryError::Internal(format!("session lock poisoned: {e}")))?;

        let outputs = session
            .run(ort::inputs! {
                "input_ids" => input_ids_tensor,
                "attention_mask" => attention_mask_tensor,
                "token_type_ids" => token_type_ids_tensor,
            })
            .map_err(embed_err)?;

        // Token embeddings, shape [batch, seq_len, 384]. The output name
        // varies by ONNX export; try common names, fall back to index 0.
        let token_emb_value = outputs
            .get("last_hidden_state")
            .or_else(|| outputs.get("token_embeddings"))
            .unwrap_or_else(|| &outputs[0]);

        let (out_shape, data) = token_emb_value
            .try_extract_tensor::<f32>()
            .map_err(embed_err)?;

        let dims: &[i64] = &out_shape;
        if dims.len() != 3 || dims[2] != EMBEDDING_DIM as i64 {
            return Err(MemoryError::EmbeddingFailed {
                detail: format!(
                    "unexpected output shape: {dims:?}, expected [batch, seq, {EMBEDDING_DIM}]"
                ),
            });
        }
        let hidden_dim = dims[2] as usize;
        let actual_seq_len = dims[1] as usize;

        // bge models pool on the CLS token (position 0), then normalize.
        let mut results = Vec::with_capacity(batch_size);
        for b in 0..batch_size {
            let offset = b * actual_seq_len * hidden_dim;
            let cls = &data[offset..offset + hidden_dim];
            results.push(l2_normalize(cls));
        }

        Ok(results)
    }
}

/// L2-normalize a vector. Returns a zero vector if the input norm is zero.
pub(crate) fn l2_normalize(v: &[f32]) -> Vec<f32> {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        v.iter().map(|x| x / norm).collect()
    } else {
        v.to_vec()
    }
}
