//! Profile summarization through a generative language model.
//!
//! [`GeminiSummarizer`] sends the merged corpus with a tasting-analysis
//! prompt to the Gemini `generateContent` REST endpoint and pulls the first
//! JSON object out of the reply. Validation into an `EntityProfile` happens
//! in the aggregator, not here.

use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, instrument};
use winelens_shared::{Result, SummarizerConfig, WineLensError, read_secret};

use crate::lexicon::cluster_names;

// ---------------------------------------------------------------------------
// SummarizationProvider
// ---------------------------------------------------------------------------

/// A backend turning a source corpus into a raw profile map.
#[async_trait]
pub trait SummarizationProvider: Send + Sync {
    /// Short provider name for logs.
    fn name(&self) -> &str;

    /// Summarize `corpus` about `entity`. `sources` are the URLs the corpus
    /// came from.
    async fn summarize(
        &self,
        entity: &str,
        corpus: &str,
        sources: &[String],
        temperature: f32,
    ) -> Result<Map<String, Value>>;
}

// ---------------------------------------------------------------------------
// Prompt
// ---------------------------------------------------------------------------

/// Build the tasting-analysis prompt for one entity.
pub fn build_prompt(entity: &str, corpus: &str, sources: &[String]) -> String {
    let clusters = cluster_names().collect::<Vec<_>>().join(", ");
    let sources_section = if sources.is_empty() {
        String::new()
    } else {
        let list: Vec<String> = sources.iter().map(|s| format!("- {s}")).collect();
        format!("\nSources:\n{}\n", list.join("\n"))
    };

    format!(
        r#"You are a Master of Wine with the WSET Level 4 Diploma.
Analyze the wine "{entity}" with the WSET Systematic Approach to Tasting (SAT), using the content below.
Where data is partial, reason from regional and varietal benchmarks and state conclusions plainly.

Rules:
- "nose" and "palate" must state intensity.
- "palate" must cover sweetness, acidity, alcohol, body, flavour intensity, flavour characteristics, finish length and whether the wine is balanced.
- Mention tannin only for red wines.
- "aroma" maps every descriptor from "nose", "palate" and "analysis" to exactly one cluster from the list below. Leave out clusters with no descriptors.
- No hedging words ("probably", "might") and no disclaimers.

---
{corpus}
{sources_section}---

Reply with one JSON object. Every field is required.

{{
  "wine": "{entity}",
  "region": "Appellation and country",
  "grape_varieties": "Blend composition, e.g. 85% Cabernet Sauvignon, 15% Merlot",
  "appearance": "Clarity, intensity, colour",
  "nose": "Condition, intensity, aroma characteristics",
  "palate": "Sweetness, acidity, tannin, alcohol, body, flavour intensity, flavours, finish length, balance",
  "aging": "Ageing potential and why",
  "quality": "One of: Poor, Acceptable, Good, Very Good, Outstanding",
  "average_price": "Average market price in US dollars, e.g. US$120",
  "analysis": "Short SAT justification of the conclusions",
  "aroma": {{ "Black fruit": ["blackcurrant"], "Oak": ["cedar"] }},
  "reference_source": ["Links from the content that were used"]
}}

Aroma clusters (case-sensitive): {clusters}"#
    )
}

/// Parse the first `{...}` span of a model reply as a JSON object.
///
/// A reply carrying an `"error"` key is treated as a failure.
pub fn extract_json_object(text: &str) -> Result<Map<String, Value>> {
    static JSON_OBJECT_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?s)\{.*\}").expect("valid regex"));

    let span = JSON_OBJECT_RE
        .find(text)
        .ok_or_else(|| WineLensError::Summarization("no JSON object in model reply".into()))?;

    let value: Value = serde_json::from_str(span.as_str())
        .map_err(|e| WineLensError::Summarization(format!("invalid JSON in model reply: {e}")))?;

    let Value::Object(map) = value else {
        return Err(WineLensError::Summarization(
            "model reply is not a JSON object".into(),
        ));
    };

    if let Some(error) = map.get("error") {
        return Err(WineLensError::Summarization(format!(
            "model reported an error: {error}"
        )));
    }

    Ok(map)
}

/// Cut `corpus` to at most `max_chars` characters.
fn truncate_chars(corpus: &str, max_chars: usize) -> &str {
    match corpus.char_indices().nth(max_chars) {
        Some((idx, _)) => &corpus[..idx],
        None => corpus,
    }
}

// ---------------------------------------------------------------------------
// GeminiSummarizer
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

/// Gemini `generateContent` client.
pub struct GeminiSummarizer {
    client: Client,
    endpoint: String,
    model: String,
    api_key: String,
    max_corpus_chars: usize,
}

impl GeminiSummarizer {
    pub fn new(config: &SummarizerConfig, api_key: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| WineLensError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key: api_key.into(),
            max_corpus_chars: config.max_corpus_chars,
        })
    }

    /// Build a client with the API key read from the env var named in `config`.
    pub fn from_config(config: &SummarizerConfig) -> Result<Self> {
        let api_key = read_secret(&config.api_key_env)?;
        Self::new(config, api_key)
    }

    pub(crate) async fn generate(&self, prompt: &str, temperature: f32) -> Result<String> {
        let url = format!("{}/models/{}:generateContent", self.endpoint, self.model);
        let body = GenerateRequest {
            contents: vec![Content {
                parts: vec![Part { text: prompt }],
            }],
            generation_config: GenerationConfig { temperature },
        };

        let response = self
            .client
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
            .json(&body)
            .send()
            .await
            .map_err(|e| WineLensError::Summarization(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(WineLensError::Summarization(format!(
                "HTTP {status}: {}",
                detail.chars().take(200).collect::<String>()
            )));
        }

        let reply: GenerateResponse = response
            .json()
            .await
            .map_err(|e| WineLensError::Summarization(format!("invalid response: {e}")))?;

        let text: String = reply
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();

        if text.trim().is_empty() {
            return Err(WineLensError::Summarization("model returned no text".into()));
        }
        Ok(text)
    }
}

#[async_trait]
impl SummarizationProvider for GeminiSummarizer {
    fn name(&self) -> &str {
        &self.model
    }

    #[instrument(skip_all, fields(entity = %entity, model = %self.model, corpus_chars = corpus.len()))]
    async fn summarize(
        &self,
        entity: &str,
        corpus: &str,
        sources: &[String],
        temperature: f32,
    ) -> Result<Map<String, Value>> {
        let corpus = truncate_chars(corpus, self.max_corpus_chars);
        let prompt = build_prompt(entity, corpus, sources);
        let reply = self.generate(&prompt, temperature).await?;
        debug!(reply_chars = reply.len(), "model reply received");
        extract_json_object(&reply)
    }
}
