//! Free-text query resolution.
//!
//! A user query such as `"1978 château margaux"` is split by the language
//! model into winery, wine name and vintage, then recomposed into the entity
//! name the pipeline searches for (`"Château Margaux 1978"`).

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::{info, instrument, warn};
use winelens_shared::{Result, WineLensError};

use crate::summarize::{GeminiSummarizer, extract_json_object};

/// Sampling temperature for query parsing; low, since this is extraction.
pub const QUERY_TEMPERATURE: f32 = 0.3;

/// Structured reading of a free-text wine query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedQuery {
    pub winery: String,
    pub wine_name: String,
    pub vintage: String,
}

impl ParsedQuery {
    /// Read a model reply. Missing fields fall back to an empty winery and
    /// vintage and to `query` as the wine name. Numeric vintages are accepted.
    pub fn from_map(map: &Map<String, Value>, query: &str) -> Self {
        let field = |name: &str| match map.get(name) {
            Some(Value::String(s)) => Some(s.trim().to_string()),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        };

        Self {
            winery: field("winery").unwrap_or_default(),
            wine_name: field("wine_name").unwrap_or_else(|| query.trim().to_string()),
            vintage: field("vintage").unwrap_or_default(),
        }
    }

    /// Compose the entity name.
    ///
    /// When one of winery and wine name contains the other (ignoring case)
    /// only the longer one is kept, so `Opus One` / `Opus One` / `2015`
    /// becomes `Opus One 2015` rather than `Opus One Opus One 2015`.
    pub fn entity_name(&self) -> String {
        let winery = self.winery.to_lowercase();
        let wine = self.wine_name.to_lowercase();

        let parts: [&str; 3] = if winery.contains(&wine) {
            [&self.winery, "", &self.vintage]
        } else if wine.contains(&winery) {
            ["", &self.wine_name, &self.vintage]
        } else {
            [&self.winery, &self.wine_name, &self.vintage]
        };

        parts
            .iter()
            .map(|p| p.trim())
            .filter(|p| !p.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// A backend that reads winery, wine name and vintage out of a query.
#[async_trait]
pub trait QueryParser: Send + Sync {
    async fn parse_query(&self, query: &str) -> Result<ParsedQuery>;
}

/// Build the query extraction prompt.
pub fn build_query_prompt(query: &str) -> String {
    format!(
        r#"You are a Master of Wine specializing in wine classification.
Extract structured information from the user's wine query:
- winery: producer or estate name
- wine_name: official label name
- vintage: year, if present

If the winery is not mentioned but the wine name is unique or well known, return its winery.
If you are not sure, return the wine name and leave winery empty.
Only extract what the query clearly names. Leave out grapes, regions and descriptors unless they are part of the official name.

Reply with one JSON object:
{{"winery": "...", "wine_name": "...", "vintage": "..."}}

Query: "{query}"

Examples:
"opus one 2015" -> {{"winery": "Opus One", "wine_name": "Opus One", "vintage": "2015"}}
"1978 château margaux" -> {{"winery": "Château Margaux", "wine_name": "Château Margaux", "vintage": "1978"}}
"D2 2022" -> {{"winery": "DeLille Cellars", "wine_name": "D2", "vintage": "2022"}}"#
    )
}

#[async_trait]
impl QueryParser for GeminiSummarizer {
    #[instrument(skip_all, fields(query = %query))]
    async fn parse_query(&self, query: &str) -> Result<ParsedQuery> {
        let reply = self
            .generate(&build_query_prompt(query), QUERY_TEMPERATURE)
            .await?;
        let map = extract_json_object(&reply)?;
        Ok(ParsedQuery::from_map(&map, query))
    }
}

/// Turn a free-text query into the entity name to aggregate.
///
/// Parser failures and empty compositions fall back to the trimmed query.
pub async fn resolve_entity_name(parser: &dyn QueryParser, query: &str) -> Result<String> {
    let query = query.trim();
    if query.is_empty() {
        return Err(WineLensError::validation("query must not be empty"));
    }

    let name = match parser.parse_query(query).await {
        Ok(parsed) => {
            info!(
                winery = %parsed.winery,
                wine = %parsed.wine_name,
                vintage = %parsed.vintage,
                "query parsed"
            );
            parsed.entity_name()
        }
        Err(e) => {
            warn!(error = %e, "query parsing failed, using the query as the entity name");
            String::new()
        }
    };

    if name.is_empty() {
        Ok(query.to_string())
    } else {
        Ok(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use winelens_shared::SummarizerConfig;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn parsed(winery: &str, wine_name: &str, vintage: &str) -> ParsedQuery {
        ParsedQuery {
            winery: winery.into(),
            wine_name: wine_name.into(),
            vintage: vintage.into(),
        }
    }

    struct FailingParser;

    #[async_trait]
    impl QueryParser for FailingParser {
        async fn parse_query(&self, _query: &str) -> Result<ParsedQuery> {
            Err(WineLensError::Summarization("quota exceeded".into()))
        }
    }

    struct FixedParser(ParsedQuery);

    #[async_trait]
    impl QueryParser for FixedParser {
        async fn parse_query(&self, _query: &str) -> Result<ParsedQuery> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn same_winery_and_wine_is_named_once() {
        assert_eq!(parsed("Opus One", "opus one", "2015").entity_name(), "Opus One 2015");
        assert_eq!(
            parsed("Château Margaux", "Margaux", "1978").entity_name(),
            "Château Margaux 1978"
        );
        assert_eq!(
            parsed("Penfolds", "Penfolds Grange", "2010").entity_name(),
            "Penfolds Grange 2010"
        );
    }

    #[test]
    fn distinct_winery_and_wine_are_both_kept() {
        assert_eq!(parsed("DeLille Cellars", "D2", "2022").entity_name(), "DeLille Cellars D2 2022");
        assert_eq!(parsed("", "Sassicaia", "").entity_name(), "Sassicaia");
    }

    #[test]
    fn reply_fields_default_to_the_query() {
        let map = extract_json_object(r#"{"winery": "Opus One", "vintage": 2015}"#).unwrap();
        assert_eq!(
            ParsedQuery::from_map(&map, " opus one 2015 "),
            parsed("Opus One", "opus one 2015", "2015")
        );
    }

    #[tokio::test]
    async fn parser_failure_falls_back_to_trimmed_query() {
        let name = resolve_entity_name(&FailingParser, "  opus one 2015 ").await.unwrap();
        assert_eq!(name, "opus one 2015");

        let empty = FixedParser(ParsedQuery::default());
        assert_eq!(resolve_entity_name(&empty, "d2").await.unwrap(), "d2");

        let err = resolve_entity_name(&FailingParser, "   ").await.unwrap_err();
        assert!(matches!(err, WineLensError::Validation { .. }));
    }

    #[tokio::test]
    async fn gemini_parses_query_at_low_temperature() {
        let server = MockServer::start().await;
        let text = r#"{"winery": "Château Margaux", "wine_name": "Château Margaux", "vintage": "1978"}"#;

        Mock::given(method("POST"))
            .and(path("/v1beta/models/gemini-2.0-flash:generateContent"))
            .and(body_string_contains(r#""temperature":0.3"#))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "candidates": [{ "content": { "parts": [{ "text": text }] } }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let config = SummarizerConfig {
            endpoint: format!("{}/v1beta", server.uri()),
            ..SummarizerConfig::default()
        };
        let gemini = GeminiSummarizer::new(&config, "test-key").unwrap();

        let name = resolve_entity_name(&gemini, "1978 château margaux").await.unwrap();
        assert_eq!(name, "Château Margaux 1978");
    }
}
