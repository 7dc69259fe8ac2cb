//! Relevance decisions for fetched documents and text blocks.

use std::collections::HashSet;
use std::sync::{Arc, LazyLock};

use regex::Regex;
use tracing::debug;
use winelens_shared::RelevanceConfig;

use crate::embedding::{Embedder, EmbeddingMemo, HashingEmbedder, PhraseSet, tokenize};
use crate::vocabulary::{REFERENCE_SENTENCES, SHORT_TERMS};

/// Longest text still considered a "term" by [`RelevanceFilter::is_domain_term`].
const MAX_TERM_CHARS: usize = 30;

/// Blocks of a long document compared against the entity name.
const MAX_SEMANTIC_BLOCKS: usize = 64;

static BLOCK_SPLIT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n\s*\n").expect("valid regex"));

/// How a candidate text is judged against an entity name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RelevanceStrategy {
    /// Entity-name tokens only.
    Lexical,
    /// Embedding similarity only.
    Semantic,
    /// Tokens first; embeddings only when the lexical check fails.
    #[default]
    LexicalThenSemantic,
}

/// Outcome of a relevance check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Relevance {
    /// Enough distinct entity tokens were found.
    Lexical { matched_tokens: usize },
    /// Similarity reached the threshold.
    Semantic { score: f32 },
    /// Neither check passed. `best_score` is `None` when no embedding was computed.
    Rejected { best_score: Option<f32> },
}

impl Relevance {
    pub fn is_relevant(&self) -> bool {
        !matches!(self, Self::Rejected { .. })
    }
}

/// Thread-safe relevance filter. Owns its embedding memo.
pub struct RelevanceFilter {
    embedder: Arc<dyn Embedder>,
    memo: EmbeddingMemo,
    strategy: RelevanceStrategy,
    config: RelevanceConfig,
    short_terms: PhraseSet,
    short_term_tokens: Vec<Vec<String>>,
    reference: PhraseSet,
}

impl RelevanceFilter {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        config: &RelevanceConfig,
        strategy: RelevanceStrategy,
    ) -> Self {
        let short_terms = PhraseSet::new(embedder.as_ref(), SHORT_TERMS.iter().copied());
        let reference = PhraseSet::new(embedder.as_ref(), REFERENCE_SENTENCES.iter().copied());
        let short_term_tokens = SHORT_TERMS
            .iter()
            .map(|term| tokenize(term))
            .filter(|tokens| !tokens.is_empty())
            .collect();

        Self {
            memo: EmbeddingMemo::new(config.memo_capacity),
            embedder,
            strategy,
            config: config.clone(),
            short_terms,
            short_term_tokens,
            reference,
        }
    }

    /// Hashing embedder, default thresholds, lexical-then-semantic.
    ///
    /// Needs no model files; production builds the embedder from config.
    pub fn with_defaults() -> Self {
        Self::new(
            Arc::new(HashingEmbedder::default()),
            &RelevanceConfig::default(),
            RelevanceStrategy::default(),
        )
    }

    pub fn strategy(&self) -> RelevanceStrategy {
        self.strategy
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    pub fn memo(&self) -> &EmbeddingMemo {
        &self.memo
    }

    // -----------------------------------------------------------------------
    // Entity relevance
    // -----------------------------------------------------------------------

    /// Judge `text` against `entity` using the configured strategy.
    pub fn check(&self, entity: &str, text: &str) -> Relevance {
        match self.strategy {
            RelevanceStrategy::Lexical => self.check_lexical(entity, text),
            RelevanceStrategy::Semantic => self.check_semantic(entity, text),
            RelevanceStrategy::LexicalThenSemantic => match self.check_lexical(entity, text) {
                accepted @ Relevance::Lexical { .. } => accepted,
                _ => self.check_semantic(entity, text),
            },
        }
    }

    pub fn is_relevant(&self, entity: &str, text: &str) -> bool {
        self.check(entity, text).is_relevant()
    }

    /// Accept when `text` contains enough distinct entity-name tokens.
    ///
    /// Single-character tokens are ignored. An entity with fewer tokens than
    /// `min_token_matches` needs all of them.
    pub fn check_lexical(&self, entity: &str, text: &str) -> Relevance {
        let wanted: HashSet<String> = tokenize(entity)
            .into_iter()
            .filter(|t| t.chars().count() > 1)
            .collect();
        if wanted.is_empty() {
            return Relevance::Rejected { best_score: None };
        }

        let present: HashSet<String> = tokenize(text).into_iter().collect();
        let matched = wanted.iter().filter(|t| present.contains(*t)).count();
        let required = self.config.min_token_matches.clamp(1, wanted.len());

        if matched >= required {
            Relevance::Lexical {
                matched_tokens: matched,
            }
        } else {
            Relevance::Rejected { best_score: None }
        }
    }

    /// Accept when any block of `text` is similar enough to `entity`.
    pub fn check_semantic(&self, entity: &str, text: &str) -> Relevance {
        let entity = entity.trim();
        if entity.is_empty() || text.trim().is_empty() {
            return Relevance::Rejected {
                best_score: Some(0.0),
            };
        }

        let target = self.memo.get_or_embed(self.embedder.as_ref(), entity);
        let score = BLOCK_SPLIT
            .split(text)
            .map(str::trim)
            .filter(|b| !b.is_empty())
            .take(MAX_SEMANTIC_BLOCKS)
            .map(|block| crate::cosine_similarity(&target, &self.embedder.embed(block)))
            .fold(0.0f32, f32::max);

        debug!(entity, score, threshold = self.config.entity_threshold, "semantic relevance");

        if score >= self.config.entity_threshold {
            Relevance::Semantic { score }
        } else {
            Relevance::Rejected {
                best_score: Some(score),
            }
        }
    }

    // -----------------------------------------------------------------------
    // Domain checks for short and borderline blocks
    // -----------------------------------------------------------------------

    /// Whether a short text is a recognizable wine term.
    ///
    /// Known terms match on word boundaries first; otherwise the best
    /// similarity against the short-term vocabulary must reach the threshold.
    pub fn is_domain_term(&self, text: &str) -> bool {
        let text = text.trim();
        if text.is_empty() || text.chars().count() > MAX_TERM_CHARS {
            return false;
        }

        let tokens = tokenize(text);
        let lexical = self
            .short_term_tokens
            .iter()
            .any(|term| tokens.windows(term.len()).any(|w| w == term.as_slice()));
        if lexical {
            return true;
        }

        let vector = self.embedder.embed(text);
        self.short_terms.max_similarity(&vector) >= self.config.short_term_threshold
    }

    /// Whether a text reads like wine writing, by similarity to the
    /// reference sentences.
    pub fn is_domain_related(&self, text: &str) -> bool {
        let text = text.trim();
        if text.is_empty() {
            return false;
        }
        let vector = self.embedder.embed(text);
        self.reference.max_similarity(&vector) >= self.config.reference_threshold
    }
}
