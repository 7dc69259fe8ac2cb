//! Deterministic quality scoring over a validated profile.
//!
//! Four rules, one point each:
//!
//! | Criterion  | Rule                                                          |
//! |------------|---------------------------------------------------------------|
//! | Balance    | `balanced` or `balance` in the palate                         |
//! | Length     | `long`/`lingering` in the palate, else a finish phrase close to a canonical long finish |
//! | Intensity  | `pronounced` in both nose and palate                          |
//! | Complexity | at least 3 clusters and 6 descriptors, or at least 4 clusters |

use std::sync::{Arc, LazyLock};

use regex::Regex;
use tracing::{debug, instrument};
use winelens_relevance::{Embedder, EmbeddingMemo, HashingEmbedder, PhraseSet, vocabulary};
use winelens_shared::{
    ClusterMap, Criterion, EntityProfile, Quality, ScoreResult, ScoringConfig,
};

use crate::lexicon::{derive_cluster_map, distinct_descriptors};

const MEMO_CAPACITY: usize = 256;

static BALANCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bbalanced?\b").expect("valid regex"));
static LENGTH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(long|lingering)\b").expect("valid regex"));
static INTENSITY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bpronounced\b").expect("valid regex"));
static FINISH_WORD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(finish|aftertaste|length)\b").expect("valid regex"));
static SHORT_FINISH_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(short|brief|medium|quick|abrupt)\b").expect("valid regex")
});

/// Rule engine for [`ScoreResult`]s.
///
/// Holds its own embedding memo, so one engine can be shared across tasks.
pub struct ScoringEngine {
    embedder: Arc<dyn Embedder>,
    memo: EmbeddingMemo,
    long_finish: PhraseSet,
    length_threshold: f32,
}

impl ScoringEngine {
    pub fn new(embedder: Arc<dyn Embedder>, config: &ScoringConfig) -> Self {
        let long_finish = PhraseSet::new(
            embedder.as_ref(),
            vocabulary::LONG_FINISH_PHRASES.iter().copied(),
        );
        Self {
            embedder,
            memo: EmbeddingMemo::new(MEMO_CAPACITY),
            long_finish,
            length_threshold: config.length_similarity_threshold,
        }
    }

    /// Engine backed by a [`HashingEmbedder`] with default thresholds.
    pub fn with_defaults() -> Self {
        Self::new(Arc::new(HashingEmbedder::default()), &ScoringConfig::default())
    }

    /// Score a profile.
    #[instrument(skip_all, fields(wine = %profile.wine))]
    pub fn score(&self, profile: &EntityProfile) -> ScoreResult {
        let nose = profile.nose_text();
        let palate = profile.palate_text();
        let clusters = self.cluster_map(profile, &nose, &palate);

        let checks = [
            (Criterion::Balance, has_balance(&palate)),
            (Criterion::Length, self.has_length(&palate)),
            (Criterion::Intensity, has_intensity(&nose, &palate)),
            (Criterion::Complexity, has_complexity(&clusters)),
        ];

        let matched_criteria: Vec<Criterion> = checks
            .into_iter()
            .filter_map(|(criterion, ok)| ok.then_some(criterion))
            .collect();

        let score = matched_criteria.len() as u8;
        let (clusters, descriptors) = ScoreResult::sorted_views(&clusters);

        debug!(score, criteria = ?matched_criteria, "profile scored");

        ScoreResult {
            score,
            quality: Quality::from_score(score),
            matched_criteria,
            clusters,
            descriptors,
        }
    }

    /// Long finish, lexically or by similarity of a finish phrase.
    pub fn has_length(&self, palate: &str) -> bool {
        if LENGTH_RE.is_match(palate) {
            return true;
        }

        finish_phrases(palate).any(|phrase| {
            let vector = self.memo.get_or_embed(self.embedder.as_ref(), &phrase.to_lowercase());
            let similarity = self.long_finish.max_similarity(&vector);
            debug!(phrase, similarity, "finish phrase similarity");
            similarity >= self.length_threshold
        })
    }

    /// The profile's own aroma map when non-empty, else a keyword scan of
    /// the nose and palate.
    fn cluster_map(&self, profile: &EntityProfile, nose: &str, palate: &str) -> ClusterMap {
        match &profile.aroma {
            Some(aroma) if !aroma.is_empty() => aroma.clone(),
            _ => derive_cluster_map(&format!("{nose} {palate}")),
        }
    }
}

pub fn has_balance(palate: &str) -> bool {
    BALANCE_RE.is_match(palate)
}

pub fn has_intensity(nose: &str, palate: &str) -> bool {
    INTENSITY_RE.is_match(nose) && INTENSITY_RE.is_match(palate)
}

pub fn has_complexity(clusters: &ClusterMap) -> bool {
    let cluster_count = clusters.len();
    let descriptor_count = distinct_descriptors(clusters).len();
    (cluster_count >= 3 && descriptor_count >= 6) || cluster_count >= 4
}

/// Sub-phrases of `text` (split on `, ; .` and newlines) that mention a
/// finish without calling it short or medium.
fn finish_phrases(text: &str) -> impl Iterator<Item = &str> {
    text.split([',', ';', '.', '\n'])
        .map(str::trim)
        .filter(|p| !p.is_empty() && FINISH_WORD_RE.is_match(p) && !SHORT_FINISH_RE.is_match(p))
}
