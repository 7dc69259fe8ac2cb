//! Relevance filtering for fetched wine content.
//!
//! - [`RelevanceFilter`] decides whether a document is about an entity
//!   (lexical tokens, embedding similarity, or both) and whether short text
//!   blocks belong to the wine domain.
//! - [`Embedder`] is the similarity seam. [`embedder_from_config`] loads the
//!   local sentence-embedding model; [`HashingEmbedder`] runs without one.

pub mod embedding;
pub mod filter;
#[cfg(feature = "local-embeddings")]
pub mod local;
pub mod vocabulary;

pub use embedding::{
    Embedder, EmbeddingMemo, HASHING_MODEL, HashingEmbedder, PhraseSet, cosine_similarity,
    embedder_from_config, tokenize,
};
#[cfg(feature = "local-embeddings")]
pub use local::FastEmbedder;
pub use filter::{Relevance, RelevanceFilter, RelevanceStrategy};
