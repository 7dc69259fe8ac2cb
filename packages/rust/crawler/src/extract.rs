//! Main-content extraction from fetched HTML.
//!
//! Prefers the first `article`, `main`, `section` or `div` element (in that
//! order) with enough text, and falls back to the whole document.

use std::fmt;
use std::sync::Arc;

use scraper::{ElementRef, Html, Selector};
use winelens_relevance::RelevanceFilter;
use winelens_shared::RelevanceConfig;

use crate::cleanup::{TextCleaner, is_probably_binary};

/// Containers tried in order of preference.
const PREFERRED_TAGS: [&str; 4] = ["article", "main", "section", "div"];

/// Elements whose text never reaches the output.
const SKIPPED_TAGS: [&str; 4] = ["script", "style", "noscript", "template"];

/// Minimum raw body size, and minimum text in a preferred container.
const MIN_CONTENT_CHARS: usize = 300;

/// Minimum cleaned text for a document to be worth keeping.
pub const MIN_TEXT_CHARS: usize = 100;

/// Why a body produced no text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NotHtml,
    Binary,
    TooShort,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            Self::NotHtml => "too short or invalid HTML",
            Self::Binary => "binary-like content",
            Self::TooShort => "too little text after cleaning",
        };
        f.write_str(reason)
    }
}

/// Turns an HTML body into cleaned plain text.
pub struct ContentExtractor {
    cleaner: TextCleaner,
}

impl ContentExtractor {
    pub fn new(filter: Arc<RelevanceFilter>, config: &RelevanceConfig) -> Self {
        Self {
            cleaner: TextCleaner::new(filter, config),
        }
    }

    pub fn cleaner(&self) -> &TextCleaner {
        &self.cleaner
    }

    /// Extract cleaned text from a raw HTML body.
    pub fn extract(&self, raw_html: &str) -> Result<String, SkipReason> {
        if raw_html.len() < MIN_CONTENT_CHARS || !contains_html_tag(raw_html) {
            return Err(SkipReason::NotHtml);
        }

        let doc = Html::parse_document(raw_html);

        for tag in PREFERRED_TAGS {
            let Ok(sel) = Selector::parse(tag) else {
                continue;
            };
            for el in doc.select(&sel) {
                let text = element_text(el);
                if text.trim().chars().count() >= MIN_CONTENT_CHARS {
                    tracing::trace!(tag, "main content container found");
                    return self.finish(&text);
                }
            }
        }

        let text = element_text(doc.root_element());
        if is_probably_binary(&text) {
            return Err(SkipReason::Binary);
        }
        self.finish(&text)
    }

    fn finish(&self, text: &str) -> Result<String, SkipReason> {
        let cleaned = self.cleaner.clean(text);
        if cleaned.chars().count() < MIN_TEXT_CHARS {
            return Err(SkipReason::TooShort);
        }
        Ok(cleaned)
    }
}

fn contains_html_tag(raw: &str) -> bool {
    raw.as_bytes()
        .windows(5)
        .any(|w| w.eq_ignore_ascii_case(b"<html"))
}

/// Text nodes under `el`, newline separated, skipping script-like elements.
fn element_text(el: ElementRef<'_>) -> String {
    let mut parts = Vec::new();
    collect_text(el, &mut parts);
    parts.join("\n")
}

fn collect_text(el: ElementRef<'_>, out: &mut Vec<String>) {
    for child in el.children() {
        if let Some(text) = child.value().as_text() {
            out.push(text.to_string());
        } else if let Some(child_el) = ElementRef::wrap(child) {
            if !SKIPPED_TAGS.contains(&child_el.value().name()) {
                collect_text(child_el, out);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extractor() -> ContentExtractor {
        ContentExtractor::new(
            Arc::new(RelevanceFilter::with_defaults()),
            &RelevanceConfig::default(),
        )
    }

    const TASTING: &str = "Opus One 2015 is a Bordeaux-style blend from Napa Valley built on Cabernet Sauvignon with Merlot, Cabernet Franc, Petit Verdot and Malbec. The nose shows pronounced cassis, black cherry, violets and cedar. On the palate it is full-bodied and balanced, with fine-grained tannins, fresh acidity and a long, lingering finish of graphite and dark chocolate.";

    #[test]
    fn prefers_article_over_chrome() {
        let html = format!(
            r#"<html><head><title>Review</title><script>var tracking = "analytics";</script></head>
<body><nav>Home | Shop | Cart</nav>
<article><h1>Opus One 2015</h1>
<p>{TASTING}</p>
<script>window.analytics = true;</script>
</article>
<footer>Copyright 2024 Example Wines</footer></body></html>"#
        );
        let text = extractor().extract(&html).expect("extracts article");
        assert!(text.contains("lingering finish"));
        assert!(!text.contains("analytics"));
        assert!(!text.contains("Copyright"));
    }

    #[test]
    fn falls_back_to_whole_document() {
        let html = format!(
            "<html><body><p>{}</p><p>{}</p></body></html>",
            &TASTING[..150],
            &TASTING[150..]
        );
        let text = extractor().extract(&html).expect("fallback text");
        assert!(text.contains("Napa Valley"));
    }

    #[test]
    fn rejects_non_html_and_tiny_bodies() {
        let ex = extractor();
        assert_eq!(ex.extract("<html></html>"), Err(SkipReason::NotHtml));
        let plain = TASTING.repeat(2);
        assert_eq!(ex.extract(&plain), Err(SkipReason::NotHtml));
    }

    #[test]
    fn rejects_documents_with_too_little_text() {
        let padding = " ".repeat(400);
        let html = format!("<html><body><p>Short note.</p>{padding}</body></html>");
        assert_eq!(extractor().extract(&html), Err(SkipReason::TooShort));
    }

    #[test]
    fn rejects_binary_looking_text() {
        let noise = "\u{0001}".repeat(300);
        let html = format!("<html><body><p>{noise}abc</p></body></html>");
        assert_eq!(extractor().extract(&html), Err(SkipReason::Binary));
    }

    #[test]
    fn tag_match_is_case_insensitive() {
        let html = format!("<!DOCTYPE html><HTML><BODY><ARTICLE>{TASTING}</ARTICLE></BODY></HTML>");
        assert!(extractor().extract(&html).is_ok());
    }
}
