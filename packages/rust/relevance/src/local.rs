//! Local sentence embeddings through `fastembed`.
//!
//! Model files are downloaded into the configured cache directory on first
//! use and loaded from there afterwards. Inference is CPU-bound, so callers
//! on an async runtime should embed from blocking tasks.

use std::path::PathBuf;
use std::sync::Mutex;

use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use tracing::{info, warn};
use winelens_shared::{Result, WineLensError};

use crate::embedding::Embedder;

/// Map a configured model name to the fastembed model and its width.
fn model_for(name: &str) -> Result<(EmbeddingModel, usize)> {
    match name {
        "all-minilm-l6-v2" => Ok((EmbeddingModel::AllMiniLML6V2, 384)),
        "all-minilm-l12-v2" => Ok((EmbeddingModel::AllMiniLML12V2, 384)),
        "bge-small-en-v1.5" => Ok((EmbeddingModel::BGESmallENV15, 384)),
        other => Err(WineLensError::config(format!(
            "unknown embedding model '{other}'. Supported: all-minilm-l6-v2, \
             all-minilm-l12-v2, bge-small-en-v1.5, hashing"
        ))),
    }
}

/// Check a model name without loading anything.
pub fn is_supported_model(name: &str) -> bool {
    model_for(name).is_ok()
}

/// Sentence-transformer embedder running locally.
pub struct FastEmbedder {
    model: Mutex<TextEmbedding>,
    name: String,
    dims: usize,
}

impl FastEmbedder {
    /// Load `name`, downloading it into `cache_dir` when missing.
    pub fn try_new(name: &str, cache_dir: PathBuf) -> Result<Self> {
        let (model, dims) = model_for(name)?;

        let options = InitOptions::new(model)
            .with_cache_dir(cache_dir)
            .with_show_download_progress(false);
        let embedding = TextEmbedding::try_new(options).map_err(|e| {
            WineLensError::config(format!("failed to load embedding model '{name}': {e}"))
        })?;

        info!(model = name, dims, "local embedding model loaded");

        Ok(Self {
            model: Mutex::new(embedding),
            name: name.to_string(),
            dims,
        })
    }
}

impl Embedder for FastEmbedder {
    fn model_name(&self) -> &str {
        &self.name
    }

    fn dims(&self) -> usize {
        self.dims
    }

    /// A failed inference yields a zero vector, which matches nothing.
    fn embed(&self, text: &str) -> Vec<f32> {
        let mut model = match self.model.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        match model.embed(vec![text], None) {
            Ok(mut vectors) if !vectors.is_empty() => vectors.swap_remove(0),
            Ok(_) => vec![0.0; self.dims],
            Err(e) => {
                warn!(model = %self.name, error = %e, "embedding failed");
                vec![0.0; self.dims]
            }
        }
    }
}
