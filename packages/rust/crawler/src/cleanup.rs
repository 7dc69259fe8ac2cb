//! Text cleanup pipeline for extracted page text.
//!
//! Stage one strips non-human text line by line. Stage two splits the result
//! into blank-line separated blocks and keeps the ones worth summarizing.

use std::sync::{Arc, LazyLock};

use regex::Regex;
use tracing::debug;
use winelens_relevance::RelevanceFilter;
use winelens_shared::RelevanceConfig;

/// Characters that mark markup or template debris when they appear in a run.
const MARKUP_SYMBOLS: &str = "{}|\\@#$%^&*_=~`<>";

/// Two-stage cleaner. Short blocks and blocks in other languages are
/// rescued through the relevance filter's domain checks.
pub struct TextCleaner {
    filter: Arc<RelevanceFilter>,
    min_block_length: usize,
    max_symbolic_run: usize,
    accepted_languages: Vec<String>,
    language_check_min_chars: usize,
}

/// Per-reason counts from one block pass, for debug logging.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BlockStats {
    pub kept: usize,
    pub short: usize,
    pub symbolic: usize,
    pub non_accepted_lang: usize,
}

impl TextCleaner {
    pub fn new(filter: Arc<RelevanceFilter>, config: &RelevanceConfig) -> Self {
        Self {
            filter,
            min_block_length: config.min_block_length,
            max_symbolic_run: config.max_symbolic_run.max(1),
            accepted_languages: config.accepted_languages.clone(),
            language_check_min_chars: config.language_check_min_chars,
        }
    }

    /// Run both stages.
    pub fn clean(&self, raw: &str) -> String {
        let (cleaned, stats) = self.clean_blocks(&self.clean_non_human_text(raw));
        debug!(
            kept = stats.kept,
            short = stats.short,
            symbolic = stats.symbolic,
            non_accepted_lang = stats.non_accepted_lang,
            "block filtering"
        );
        cleaned
    }

    /// Stage one: control characters, whitespace and symbol-only lines.
    pub fn clean_non_human_text(&self, raw: &str) -> String {
        let mut text = strip_control_chars(raw);
        text = collapse_horizontal_whitespace(&text);
        text = trim_lines(&text);
        text = drop_symbolic_lines(&text, self.max_symbolic_run);
        text = collapse_blank_lines(&text);
        text.trim().to_string()
    }

    /// Stage two: keep blocks that are long enough or recognizably wine
    /// related, and drop blocks carrying markup debris or long blocks in a
    /// language outside the accepted set that are not about wine.
    pub fn clean_blocks(&self, text: &str) -> (String, BlockStats) {
        static BLOCK_SPLIT_RE: LazyLock<Regex> =
            LazyLock::new(|| Regex::new(r"\n{2,}").expect("valid regex"));

        let mut stats = BlockStats::default();
        let mut kept = Vec::new();

        for block in BLOCK_SPLIT_RE.split(text) {
            let block = block.trim();
            if block.is_empty() {
                continue;
            }

            if block.chars().count() < self.min_block_length && !self.rescue_short_block(block) {
                stats.short += 1;
                continue;
            }

            if longest_run(block, |c| MARKUP_SYMBOLS.contains(c)) >= self.max_symbolic_run {
                stats.symbolic += 1;
                continue;
            }

            if block.chars().count() > self.language_check_min_chars
                && !self.is_accepted_language(block)
                && !self.filter.is_domain_related(block)
            {
                stats.non_accepted_lang += 1;
                continue;
            }

            stats.kept += 1;
            kept.push(block);
        }

        (kept.join("\n\n"), stats)
    }

    /// Detected language is in the accepted set. Undetectable text is not.
    /// An empty set accepts everything.
    pub fn is_accepted_language(&self, block: &str) -> bool {
        if self.accepted_languages.is_empty() {
            return true;
        }
        whatlang::detect(block).is_some_and(|info| {
            let code = info.lang().code();
            self.accepted_languages.iter().any(|accepted| accepted == code)
        })
    }

    fn rescue_short_block(&self, block: &str) -> bool {
        self.filter.is_domain_term(block)
            || contains_price(block)
            || self.filter.is_domain_related(block)
    }
}

// ---------------------------------------------------------------------------
// Stage one passes
// ---------------------------------------------------------------------------

/// Remove control characters, keeping newlines and tabs.
fn strip_control_chars(text: &str) -> String {
    text.chars()
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
        .collect()
}

/// Collapse runs of non-newline whitespace into a single space.
fn collapse_horizontal_whitespace(text: &str) -> String {
    static WS_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"[^\S\n]+").expect("valid regex"));

    WS_RE.replace_all(text, " ").to_string()
}

fn trim_lines(text: &str) -> String {
    text.lines().map(str::trim).collect::<Vec<_>>().join("\n")
}

/// Drop lines made only of symbols once they reach `min_run` characters.
fn drop_symbolic_lines(text: &str, min_run: usize) -> String {
    text.lines()
        .filter(|line| {
            !(line.chars().count() >= min_run && line.chars().all(|c| !c.is_alphanumeric()))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Collapse three or more newlines into one blank line.
fn collapse_blank_lines(text: &str) -> String {
    static MULTI_BLANK_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\n{3,}").expect("valid regex"));

    MULTI_BLANK_RE.replace_all(text, "\n\n").to_string()
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Whether the text carries a price such as `$45`, `€ 90` or `USD120`.
pub fn contains_price(text: &str) -> bool {
    static PRICE_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?i)(usd|eur|€|\$|£)\s?\d{1,4}").expect("valid regex"));

    PRICE_RE.is_match(text)
}

/// Length of the longest run of consecutive characters matching `pred`.
fn longest_run(text: &str, pred: impl Fn(char) -> bool) -> usize {
    let mut best = 0;
    let mut current = 0;
    for c in text.chars() {
        if pred(c) {
            current += 1;
            best = best.max(current);
        } else {
            current = 0;
        }
    }
    best
}

/// Whether text looks like decoded binary rather than prose.
///
/// Texts under 100 characters count as binary, as do texts where more than
/// 30% of the characters are unprintable.
pub fn is_probably_binary(text: &str) -> bool {
    let total = text.chars().count();
    if total < 100 {
        return true;
    }
    let printable = text
        .chars()
        .filter(|c| (!c.is_control() || c.is_whitespace()) && *c != char::REPLACEMENT_CHARACTER)
        .count();
    (printable as f64 / total as f64) < 0.7
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
