//! Sentence-transformer backend on ONNX Runtime (feature `onnx`).
//!
//! Loads a sentence-transformer ONNX export (e.g. all-MiniLM-L6-v2) via ort and
//! tokenizes with the HuggingFace tokenizers crate. Token embeddings are
//! mean-pooled under the attention mask and L2-normalized.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use ort::session::Session;
use ort::value::TensorRef;
use tokenizers::Tokenizer;
use tracing::info;

use limnus_core::error::{LimnusError, Result};

use crate::embedding::{l2_normalize, EmbeddingBackend};

/// Model used when no model name is configured.
pub const DEFAULT_MODEL: &str = "sentence-transformers/all-MiniLM-L6-v2";

/// ONNX Runtime-backed sentence embedding.
///
/// Expects a model directory containing:
/// - `model.onnx`: the sentence-transformer ONNX export
/// - `tokenizer.json`: the HuggingFace fast-tokenizer file
pub struct OnnxEmbedding {
    session: Mutex<Session>,
    tokenizer: Tokenizer,
    dimensions: usize,
}

// ort::Session is Send + Sync internally (uses Arc<SharedSessionInner>).
unsafe impl Send for OnnxEmbedding {}
unsafe impl Sync for OnnxEmbedding {}

impl std::fmt::Debug for OnnxEmbedding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnnxEmbedding")
            .field("dimensions", &self.dimensions)
            .finish()
    }
}

fn onnx_err(context: &str, e: impl std::fmt::Display) -> LimnusError {
    LimnusError::Embedding(format!("{}: {}", context, e))
}

/// Resolve a model name to a directory: an existing path wins, otherwise the
/// name is looked up under `models_dir`.
pub fn resolve_model_dir(model_name: Option<&str>, models_dir: &Path) -> PathBuf {
    let name = model_name.unwrap_or(DEFAULT_MODEL);
    let direct = PathBuf::from(name);
    if direct.is_dir() {
        direct
    } else {
        models_dir.join(name)
    }
}

impl OnnxEmbedding {
    /// Load a sentence-transformer model from the given directory.
    pub fn from_directory(model_dir: &Path) -> Result<Self> {
        Self::from_files(
            &model_dir.join("model.onnx"),
            &model_dir.join("tokenizer.json"),
        )
    }

    /// Load from explicit model and tokenizer file paths.
    pub fn from_files(model_path: &Path, tokenizer_path: &Path) -> Result<Self> {
        if !model_path.exists() {
            return Err(LimnusError::Embedding(format!(
                "ONNX model not found at {}",
                model_path.display()
            )));
        }
        if !tokenizer_path.exists() {
            return Err(LimnusError::Embedding(format!(
                "Tokenizer not found at {}",
                tokenizer_path.display()
            )));
        }

        let session = Session::builder()
            .map_err(|e| onnx_err("ONNX session builder", e))?
            .with_intra_threads(1)
            .map_err(|e| onnx_err("ONNX set threads", e))?
            .commit_from_file(model_path)
            .map_err(|e| onnx_err("ONNX load model", e))?;

        // Sentence-transformer output is [batch, seq_len, hidden_dim].
        let dimensions = session
            .outputs()
            .first()
            .and_then(|out| out.dtype().tensor_shape())
            .and_then(|shape| shape.last().copied())
            .map(|d| if d > 0 { d as usize } else { 384 })
            .unwrap_or(384);

        let tokenizer =
            Tokenizer::from_file(tokenizer_path).map_err(|e| onnx_err("Load tokenizer", e))?;

        info!(
            model = %model_path.display(),
            dimensions,
            "Loaded ONNX embedding model"
        );

        Ok(Self {
            session: Mutex::new(session),
            tokenizer,
            dimensions,
        })
    }
}

impl EmbeddingBackend for OnnxEmbedding {
    fn name(&self) -> &'static str {
        "sbert"
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if text.trim().is_empty() {
            return Ok(vec![0.0; self.dimensions]);
        }

        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| onnx_err("Tokenization failed", e))?;

        let input_ids: Vec<i64> = encoding.get_ids().iter().map(|&id| id as i64).collect();
        let attention_mask: Vec<i64> = encoding
            .get_attention_mask()
            .iter()
            .map(|&m| m as i64)
            .collect();
        let token_type_ids: Vec<i64> = encoding
            .get_type_ids()
            .iter()
            .map(|&t| t as i64)
            .collect();

        let seq_len = input_ids.len();

        let ids_array = ndarray::Array2::from_shape_vec((1, seq_len), input_ids)
            .map_err(|e| onnx_err("input_ids array", e))?;
        let mask_array = ndarray::Array2::from_shape_vec((1, seq_len), attention_mask.clone())
            .map_err(|e| onnx_err("attention_mask array", e))?;
        let type_array = ndarray::Array2::from_shape_vec((1, seq_len), token_type_ids)
            .map_err(|e| onnx_err("token_type_ids array", e))?;

        let ids_ref = TensorRef::from_array_view(&ids_array)
            .map_err(|e| onnx_err("TensorRef input_ids", e))?;
        let mask_ref = TensorRef::from_array_view(&mask_array)
            .map_err(|e| onnx_err("TensorRef attention_mask", e))?;
        let type_ref = TensorRef::from_array_view(&type_array)
            .map_err(|e| onnx_err("TensorRef token_type_ids", e))?;

        let mut session = self
            .session
            .lock()
            .map_err(|e| onnx_err("Session lock poisoned", e))?;
        let outputs = session
            .run(ort::inputs![ids_ref, mask_ref, type_ref])
            .map_err(|e| onnx_err("ONNX inference failed", e))?;

        let (shape, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| onnx_err("Extract embeddings", e))?;

        let hidden_dim = match shape.iter().copied().collect::<Vec<i64>>().as_slice() {
            [_, .., last] => *last as usize,
            other => {
                return Err(LimnusError::Embedding(format!(
                    "Unexpected output shape: {:?}",
                    other
                )))
            }
        };

        let mut pooled = vec![0.0f32; hidden_dim];
        let mut count = 0.0f32;
        for (tok_idx, &mask_val) in attention_mask.iter().enumerate() {
            if mask_val > 0 {
                let offset = tok_idx * hidden_dim;
                for (dim, slot) in pooled.iter_mut().enumerate() {
                    *slot += data[offset + dim];
                }
                count += 1.0;
            }
        }
        if count > 0.0 {
            for val in &mut pooled {
                *val /= count;
            }
        }

        l2_normalize(&mut pooled);
        Ok(pooled)
    }
}
