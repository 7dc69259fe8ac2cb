//! Text embedding trait, the hashing embedder, and vector utilities.
//!
//! Relevance and scoring only need a similarity primitive, so the
//! [`Embedder`] seam is synchronous and infallible. Production runs a local
//! sentence-embedding model (see [`embedder_from_config`]).
//! [`HashingEmbedder`] maps word and character features into a fixed-width
//! vector; it needs no model files and is what the tests run against.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use winelens_shared::{EmbeddingConfig, Result};

/// Trait for embedding backends.
pub trait Embedder: Send + Sync {
    /// Returns the model identifier.
    fn model_name(&self) -> &str;
    /// Returns the embedding vector dimensionality.
    fn dims(&self) -> usize;
    /// Embed `text` into a vector of [`dims`](Self::dims) floats.
    fn embed(&self, text: &str) -> Vec<f32>;
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns `0.0` for empty vectors or vectors of different lengths.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

/// Lowercase alphanumeric words of `text`.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Model name selecting [`HashingEmbedder`].
pub const HASHING_MODEL: &str = "hashing";

/// Build the embedder named by `config`.
///
/// Loading a local model may download it first, so call this from a
/// blocking context.
pub fn embedder_from_config(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    match config.model.as_str() {
        HASHING_MODEL => Ok(Arc::new(HashingEmbedder::default())),
        #[cfg(feature = "local-embeddings")]
        name => Ok(Arc::new(crate::local::FastEmbedder::try_new(
            name,
            config.resolved_cache_dir()?,
        )?)),
        #[cfg(not(feature = "local-embeddings"))]
        name => Err(winelens_shared::WineLensError::config(format!(
            "embedding model '{name}' needs the local-embeddings feature; \
             set [embedding] model = \"{HASHING_MODEL}\" to run without it"
        ))),
    }
}

// ---------------------------------------------------------------------------
// HashingEmbedder
// ---------------------------------------------------------------------------

const DEFAULT_DIMS: usize = 1024;
const BIGRAM_WEIGHT: f32 = 1.0;
const TRIGRAM_WEIGHT: f32 = 0.5;

/// Feature-hashing embedder over word unigrams, word bigrams and
/// character trigrams, L2-normalized.
///
/// Identical inputs always produce identical vectors, across processes and
/// platforms.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dims: usize,
}

impl HashingEmbedder {
    pub fn new(dims: usize) -> Self {
        Self { dims: dims.max(1) }
    }

    fn add(&self, vector: &mut [f32], feature: &str, weight: f32) {
        let hash = fnv1a(feature.as_bytes());
        let index = (hash % self.dims as u64) as usize;
        // High bit picks the sign so collisions tend to cancel
        let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
        vector[index] += sign * weight;
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_DIMS)
    }
}

impl Embedder for HashingEmbedder {
    fn model_name(&self) -> &str {
        "hashing-ngram"
    }

    fn dims(&self) -> usize {
        self.dims
    }

    fn embed(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dims];
        let words = tokenize(text);

        for word in &words {
            self.add(&mut vector, &format!("w:{word}"), 1.0);

            let padded: Vec<char> = format!(" {word} ").chars().collect();
            for window in padded.windows(3) {
                let trigram: String = window.iter().collect();
                self.add(&mut vector, &format!("c:{trigram}"), TRIGRAM_WEIGHT);
            }
        }

        for pair in words.windows(2) {
            self.add(&mut vector, &format!("b:{} {}", pair[0], pair[1]), BIGRAM_WEIGHT);
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > f32::EPSILON {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0100_0000_01b3;
    bytes
        .iter()
        .fold(OFFSET, |hash, b| (hash ^ u64::from(*b)).wrapping_mul(PRIME))
}

// ---------------------------------------------------------------------------
// EmbeddingMemo
// ---------------------------------------------------------------------------

/// Bounded, instance-owned memo of embeddings keyed by text.
///
/// Oldest entries are dropped first once `capacity` is reached.
pub struct EmbeddingMemo {
    capacity: usize,
    inner: Mutex<MemoInner>,
}

#[derive(Default)]
struct MemoInner {
    vectors: HashMap<String, Arc<Vec<f32>>>,
    order: VecDeque<String>,
}

impl EmbeddingMemo {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(MemoInner::default()),
        }
    }

    /// Return the memoized vector for `text`, embedding it on first use.
    pub fn get_or_embed(&self, embedder: &dyn Embedder, text: &str) -> Arc<Vec<f32>> {
        if let Some(hit) = self.lock().vectors.get(text) {
            return Arc::clone(hit);
        }

        // Embed outside the lock; a racing thread may embed the same text twice
        let vector = Arc::new(embedder.embed(text));

        let mut inner = self.lock();
        if let Some(hit) = inner.vectors.get(text) {
            return Arc::clone(hit);
        }
        while inner.vectors.len() >= self.capacity {
            match inner.order.pop_front() {
                Some(oldest) => {
                    inner.vectors.remove(&oldest);
                }
                None => break,
            }
        }
        inner.order.push_back(text.to_string());
        inner.vectors.insert(text.to_string(), Arc::clone(&vector));
        vector
    }

    pub fn len(&self) -> usize {
        self.lock().vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

// ---------------------------------------------------------------------------
// PhraseSet
// ---------------------------------------------------------------------------

/// A fixed set of reference phrases embedded once.
pub struct PhraseSet {
    phrases: Vec<String>,
    vectors: Vec<Vec<f32>>,
}

impl PhraseSet {
    pub fn new<I, S>(embedder: &dyn Embedder, phrases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let phrases: Vec<String> = phrases.into_iter().map(Into::into).collect();
        let vectors = phrases.iter().map(|p| embedder.embed(p)).collect();
        Self { phrases, vectors }
    }

    /// Highest similarity between `vector` and any phrase, with that phrase.
    pub fn best_match(&self, vector: &[f32]) -> Option<(&str, f32)> {
        self.phrases
            .iter()
            .zip(&self.vectors)
            .map(|(phrase, v)| (phrase.as_str(), cosine_similarity(vector, v)))
            .max_by(|a, b| a.1.total_cmp(&b.1))
    }

    /// Highest similarity between `vector` and any phrase, or `0.0` for an empty set.
    pub fn max_similarity(&self, vector: &[f32]) -> f32 {
        self.best_match(vector).map_or(0.0, |(_, score)| score)
    }

    pub fn phrases(&self) -> &[String] {
        &self.phrases
    }

    pub fn len(&self) -> usize {
        self.phrases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.phrases.is_empty()
    }
}
