//! Candidate source discovery through a web search provider.
//!
//! Before fetching anything, WineLens asks a search provider for pages
//! reviewing the entity. [`GoogleSearch`] queries the Google Custom Search
//! JSON API, keeps one result per domain, and caches the URL list.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info, instrument};
use url::Url;
use winelens_shared::{Result, SearchConfig, WineLensError, read_secret};
use winelens_storage::{CATEGORY_SEARCH, CacheStore};

/// Results returned per page by the Custom Search API.
const PAGE_SIZE: usize = 10;

/// Default timeout in seconds for one search request.
const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Publications logged as trusted when they show up in results.
pub const TRUSTED_DOMAINS: &[&str] = &[
    "wineenthusiast.com",
    "winespectator.com",
    "decanter.com",
    "jamessuckling.com",
    "jancisrobinson.com",
    "totalwine.com",
    "b-21.com",
    "vivino.com",
    "wine-searcher.com",
    "wine.com",
    "robertparker.com",
    "vinous.com",
    "thewinecellarinsider.com",
];

// ---------------------------------------------------------------------------
// SearchProvider
// ---------------------------------------------------------------------------

/// A web search backend returning candidate URLs for a query.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    /// Short provider name for logs.
    fn name(&self) -> &str;

    /// Up to `max_results` URLs for `query`, best first.
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<String>>;
}

#[async_trait]
impl<P: SearchProvider + ?Sized> SearchProvider for Arc<P> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<String>> {
        (**self).search(query, max_results).await
    }
}

/// Build the search query for an entity, e.g. `"Opus One 2015 wine review"`.
pub fn build_query(entity: &str, suffix: &str) -> String {
    let entity = entity.trim();
    let suffix = suffix.trim();
    if suffix.is_empty() {
        entity.to_string()
    } else {
        format!("{entity} {suffix}")
    }
}

/// Host of a URL, lowercased, without a leading `www.`.
pub fn normalized_domain(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let host = parsed.host_str()?.to_ascii_lowercase();
    Some(host.strip_prefix("www.").map(str::to_string).unwrap_or(host))
}

fn is_trusted(domain: &str) -> bool {
    TRUSTED_DOMAINS
        .iter()
        .any(|t| domain == *t || domain.ends_with(&format!(".{t}")))
}

// ---------------------------------------------------------------------------
// GoogleSearch
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<SearchItem>,
}

#[derive(Debug, Deserialize)]
struct SearchItem {
    link: Option<String>,
}

/// Google Custom Search JSON API client.
pub struct GoogleSearch {
    client: Client,
    endpoint: String,
    api_key: String,
    cx: String,
    allow_duplicate_domains: bool,
    cache: Arc<CacheStore>,
}

impl GoogleSearch {
    pub fn new(
        config: &SearchConfig,
        api_key: impl Into<String>,
        cx: impl Into<String>,
        cache: Arc<CacheStore>,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .map_err(|e| WineLensError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            api_key: api_key.into(),
            cx: cx.into(),
            allow_duplicate_domains: config.allow_duplicate_domains,
            cache,
        })
    }

    /// Build a client with credentials read from the env vars named in `config`.
    pub fn from_config(config: &SearchConfig, cache: Arc<CacheStore>) -> Result<Self> {
        let api_key = read_secret(&config.api_key_env)?;
        let cx = read_secret(&config.cx_env)?;
        Self::new(config, api_key, cx, cache)
    }

    /// Page through results until `max_results` distinct-domain links are found
    /// or the provider runs out.
    async fn fetch_links(&self, query: &str, max_results: usize) -> Result<Vec<String>> {
        let mut seen_domains = HashSet::new();
        let mut results = Vec::new();
        let pages = max_results.div_ceil(PAGE_SIZE);

        for page in 0..pages {
            let start = 1 + page * PAGE_SIZE;
            let num = PAGE_SIZE.min(max_results - results.len());
            let items = self.fetch_page(query, start, num).await?;
            if items.is_empty() {
                debug!(page = page + 1, "no more search results");
                break;
            }

            for link in items.into_iter().filter_map(|item| item.link) {
                let Some(domain) = normalized_domain(&link) else {
                    debug!(%link, "ignoring unparseable search result");
                    continue;
                };

                if !seen_domains.insert(domain.clone()) && !self.allow_duplicate_domains {
                    continue;
                }

                if is_trusted(&domain) {
                    info!(%link, "trusted source");
                }
                results.push(link);

                if results.len() >= max_results {
                    return Ok(results);
                }
            }
        }

        Ok(results)
    }

    async fn fetch_page(&self, query: &str, start: usize, num: usize) -> Result<Vec<SearchItem>> {
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[
                ("key", self.api_key.as_str()),
                ("cx", self.cx.as_str()),
                ("q", query),
                ("num", &num.to_string()),
                ("start", &start.to_string()),
            ])
            .send()
            .await
            .map_err(|e| WineLensError::SearchProvider(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(WineLensError::SearchProvider(format!(
                "HTTP {status} for results starting at {start}"
            )));
        }

        let body: SearchResponse = response
            .json()
            .await
            .map_err(|e| WineLensError::SearchProvider(format!("invalid response: {e}")))?;

        Ok(body.items)
    }
}

#[async_trait]
impl SearchProvider for GoogleSearch {
    fn name(&self) -> &str {
        "google-custom-search"
    }

    #[instrument(skip_all, fields(query = %query, max_results))]
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<String>> {
        if max_results == 0 {
            return Ok(Vec::new());
        }

        let key = format!("{query}|{max_results}");
        let links = self
            .cache
            .get_or_fetch(CATEGORY_SEARCH, &key, || self.fetch_links(query, max_results))
            .await?;

        info!(results = links.len(), "search completed");
        Ok(links)
    }
}
