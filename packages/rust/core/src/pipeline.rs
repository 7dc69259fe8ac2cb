//! End-to-end profile pipeline: search → fetch → summarize → merge.
//!
//! [`Aggregator::run`] executes the four stages strictly in sequence and
//! returns either a validated [`Aggregation`] or one of the pipeline error
//! variants of [`WineLensError`]. Nothing else escapes it.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use tracing::{info, instrument, warn};

use winelens_crawler::{FetchOptions, Fetcher};
use winelens_discovery::{GoogleSearch, SearchProvider, build_query};
use winelens_relevance::{Embedder, RelevanceFilter, RelevanceStrategy};
use winelens_shared::{
    AppConfig, EntityProfile, Result, RetryPolicy, SourceCorpus, WineLensError,
};
use winelens_storage::{CATEGORY_SUMMARY, CacheStore};

use crate::summarize::{GeminiSummarizer, SummarizationProvider};

// ---------------------------------------------------------------------------
// Options and results
// ---------------------------------------------------------------------------

/// Pipeline stage names, in execution order.
pub const STAGE_SEARCH: &str = "search";
pub const STAGE_FETCH: &str = "fetch";
pub const STAGE_SUMMARIZE: &str = "summarize";
pub const STAGE_MERGE: &str = "merge";

/// Per-run settings for the [`Aggregator`].
#[derive(Debug, Clone)]
pub struct AggregatorOptions {
    /// Search results requested per entity.
    pub max_results: usize,
    /// Appended to the entity name to form the search query.
    pub query_suffix: String,
    /// Sampling temperature passed to the summarizer.
    pub temperature: f32,
    pub fetch: FetchOptions,
}

impl From<&AppConfig> for AggregatorOptions {
    fn from(config: &AppConfig) -> Self {
        Self {
            max_results: config.pipeline.max_results,
            query_suffix: config.search.query_suffix.clone(),
            temperature: config.summarizer.temperature,
            fetch: FetchOptions::from(&config.pipeline),
        }
    }
}

/// Wall-clock time spent in one stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageTiming {
    pub stage: &'static str,
    pub duration_ms: u64,
}

/// Successful pipeline output.
#[derive(Debug, Clone, Serialize)]
pub struct Aggregation {
    pub profile: EntityProfile,
    /// URLs returned by the search stage.
    pub search_results: Vec<String>,
    /// URLs whose content made it into the corpus. Reporting only; the
    /// summarizer is given every search result.
    pub accepted_sources: Vec<String>,
    pub timings: Vec<StageTiming>,
}

/// Progress callback for reporting pipeline status.
pub trait PipelineProgress: Send + Sync {
    /// Called when entering a stage.
    fn stage(&self, name: &str);
    /// Called when the pipeline completes successfully.
    fn done(&self, aggregation: &Aggregation);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl PipelineProgress for SilentProgress {
    fn stage(&self, _name: &str) {}
    fn done(&self, _aggregation: &Aggregation) {}
}

// ---------------------------------------------------------------------------
// Aggregator
// ---------------------------------------------------------------------------

/// Orchestrates the provider calls and the fetch batch for one entity.
pub struct Aggregator {
    search: Arc<dyn SearchProvider>,
    summarizer: Arc<dyn SummarizationProvider>,
    fetcher: Fetcher,
    cache: Arc<CacheStore>,
    retry: RetryPolicy,
    options: AggregatorOptions,
}

impl Aggregator {
    pub fn new(
        search: Arc<dyn SearchProvider>,
        summarizer: Arc<dyn SummarizationProvider>,
        fetcher: Fetcher,
        cache: Arc<CacheStore>,
        retry: RetryPolicy,
        options: AggregatorOptions,
    ) -> Self {
        Self {
            search,
            summarizer,
            fetcher,
            cache,
            retry,
            options,
        }
    }

    /// Wire up the production providers from config.
    ///
    /// `cache` is shared by the search, page and summary caches. `embedder`
    /// backs the relevance filter.
    pub fn from_config(
        config: &AppConfig,
        cache: Arc<CacheStore>,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self> {
        let filter = Arc::new(RelevanceFilter::new(
            embedder,
            &config.relevance,
            RelevanceStrategy::default(),
        ));
        let fetcher = Fetcher::new(&config.http, &config.relevance, Arc::clone(&cache), filter)?;
        let search = GoogleSearch::from_config(&config.search, Arc::clone(&cache))?;
        let summarizer = GeminiSummarizer::from_config(&config.summarizer)?;

        Ok(Self::new(
            Arc::new(search),
            Arc::new(summarizer),
            fetcher,
            cache,
            RetryPolicy::from(&config.retry),
            AggregatorOptions::from(config),
        ))
    }

    /// Run the full pipeline for one entity.
    ///
    /// 1. Search for candidate URLs
    /// 2. Fetch, extract and filter them into a corpus
    /// 3. Summarize the corpus into a validated profile
    /// 4. Merge the profile's references with the search results
    #[instrument(skip_all, fields(entity = %entity))]
    pub async fn run(&self, entity: &str, progress: &dyn PipelineProgress) -> Result<Aggregation> {
        let entity = entity.trim();
        if entity.is_empty() {
            return Err(WineLensError::validation("entity name must not be empty"));
        }

        let start = Instant::now();
        let mut timings = Vec::with_capacity(4);

        // --- Stage 1: Search ---
        progress.stage(STAGE_SEARCH);
        let stage_start = Instant::now();
        let search_results = self.search_stage(entity).await?;
        timings.push(timing(STAGE_SEARCH, stage_start.elapsed()));

        if search_results.is_empty() {
            return Err(WineLensError::content_unavailable(format!(
                "search returned no results for '{entity}'"
            )));
        }

        // --- Stage 2: Fetch ---
        progress.stage(STAGE_FETCH);
        let stage_start = Instant::now();
        let documents = self
            .fetcher
            .fetch_all(entity, &search_results, &self.options.fetch)
            .await;
        let corpus = SourceCorpus::merge(entity, documents);
        timings.push(timing(STAGE_FETCH, stage_start.elapsed()));

        if corpus.is_empty() {
            return Err(WineLensError::content_unavailable(format!(
                "no relevant content found for '{entity}' in {} search results",
                search_results.len()
            )));
        }

        // --- Stage 3: Summarize ---
        progress.stage(STAGE_SUMMARIZE);
        let stage_start = Instant::now();
        let mut sources = search_results.clone();
        sources.sort();
        let mut profile = self
            .summarize_stage(entity, &corpus.merged_text, &sources)
            .await?;
        timings.push(timing(STAGE_SUMMARIZE, stage_start.elapsed()));

        // --- Stage 4: Merge ---
        progress.stage(STAGE_MERGE);
        let stage_start = Instant::now();
        profile.reference_source = merge_references(&profile.reference_source, &search_results);
        timings.push(timing(STAGE_MERGE, stage_start.elapsed()));

        info!(
            search_results = search_results.len(),
            documents = corpus.documents.len(),
            corpus_chars = corpus.merged_text.len(),
            references = profile.reference_source.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            breakdown = %format_timings(&timings),
            "pipeline completed"
        );

        let mut accepted_sources = corpus.urls();
        accepted_sources.sort();

        let aggregation = Aggregation {
            profile,
            search_results,
            accepted_sources,
            timings,
        };
        progress.done(&aggregation);
        Ok(aggregation)
    }

    async fn search_stage(&self, entity: &str) -> Result<Vec<String>> {
        let query = build_query(entity, &self.options.query_suffix);
        let max_results = self.options.max_results;
        info!(provider = self.search.name(), %query, "searching");

        self.retry
            .run("search", |_| self.search.search(&query, max_results))
            .await
            .map_err(into_search_error)
    }

    /// Summarize through the `summary` cache. Only maps that validate are
    /// cached; validation failures are terminal and never retried.
    async fn summarize_stage(
        &self,
        entity: &str,
        corpus: &str,
        sources: &[String],
    ) -> Result<EntityProfile> {
        let key = summary_key(entity, corpus, sources);
        let temperature = self.options.temperature;

        let raw: Map<String, Value> = self
            .cache
            .get_or_fetch(CATEGORY_SUMMARY, &key, move || async move {
                info!(provider = self.summarizer.name(), sources = sources.len(), "summarizing");
                let raw = self
                    .retry
                    .run("summarize", |_| {
                        self.summarizer.summarize(entity, corpus, sources, temperature)
                    })
                    .await
                    .map_err(into_summarization_error)?;
                EntityProfile::from_raw(raw.clone())?;
                Ok::<_, WineLensError>(raw)
            })
            .await?;

        EntityProfile::from_raw(raw).inspect_err(|e| warn!(error = %e, "profile failed validation"))
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn timing(stage: &'static str, elapsed: Duration) -> StageTiming {
    StageTiming {
        stage,
        duration_ms: elapsed.as_millis() as u64,
    }
}

fn format_timings(timings: &[StageTiming]) -> String {
    timings
        .iter()
        .map(|t| format!("{}={}ms", t.stage, t.duration_ms))
        .collect::<Vec<_>>()
        .join(" ")
}

fn into_search_error(e: WineLensError) -> WineLensError {
    match e {
        WineLensError::SearchProvider(_) => e,
        other => WineLensError::SearchProvider(other.to_string()),
    }
}

fn into_summarization_error(e: WineLensError) -> WineLensError {
    match e {
        WineLensError::Summarization(_) => e,
        other => WineLensError::Summarization(other.to_string()),
    }
}

/// Content hash of one summarization input: entity, corpus and sorted sources.
pub fn summary_key(entity: &str, corpus: &str, sorted_sources: &[String]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(entity.as_bytes());
    hasher.update([0u8]);
    hasher.update(corpus.as_bytes());
    for source in sorted_sources {
        hasher.update([0u8]);
        hasher.update(source.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

/// Union of the profile's `http(s)` references and the search URLs.
///
/// First occurrence wins the position; duplicates are dropped, so merging a
/// list with itself returns it unchanged up to de-duplication.
pub fn merge_references(references: &[String], search_urls: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    references
        .iter()
        .map(|r| r.trim())
        .filter(|r| r.starts_with("http://") || r.starts_with("https://"))
        .chain(search_urls.iter().map(String::as_str))
        .filter(|url| seen.insert(*url))
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use winelens_shared::{HttpConfig, RelevanceConfig};

    const ENTITY: &str = "Opus One 2015";

    // -- mock providers -----------------------------------------------------

    struct MockSearch {
        urls: Vec<String>,
        error: Option<String>,
        calls: AtomicUsize,
    }

    impl MockSearch {
        fn returning(urls: Vec<String>) -> Self {
            Self {
                urls,
                error: None,
                calls: AtomicUsize::new(0),
            }
        }

        fn failing_with(message: &str) -> Self {
            Self {
                urls: Vec::new(),
                error: Some(message.to_string()),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl SearchProvider for MockSearch {
        fn name(&self) -> &str {
            "mock-search"
        }

        async fn search(&self, _query: &str, _max_results: usize) -> Result<Vec<String>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.error {
                Some(message) => Err(WineLensError::Network(message.clone())),
                None => Ok(self.urls.clone()),
            }
        }
    }

    struct MockSummarizer {
        reply: Map<String, Value>,
        error: Option<String>,
        calls: AtomicUsize,
        sources: Mutex<Vec<String>>,
    }

    impl MockSummarizer {
        fn new(reply: Value) -> Self {
            let Value::Object(reply) = reply else {
                panic!("reply must be an object");
            };
            Self {
                reply,
                error: None,
                calls: AtomicUsize::new(0),
                sources: Mutex::new(Vec::new()),
            }
        }

        fn failing_with(message: &str) -> Self {
            Self {
                error: Some(message.to_string()),
                ..Self::new(serde_json::json!({}))
            }
        }
    }

    #[async_trait]
    impl SummarizationProvider for MockSummarizer {
        fn name(&self) -> &str {
            "mock-summarizer"
        }

        async fn summarize(
            &self,
            _entity: &str,
            corpus: &str,
            sources: &[String],
            _temperature: f32,
        ) -> Result<Map<String, Value>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            assert!(corpus.contains("Opus One"));
            *self.sources.lock().unwrap() = sources.to_vec();
            match &self.error {
                Some(message) => Err(WineLensError::Network(message.clone())),
                None => Ok(self.reply.clone()),
            }
        }
    }

    // -- fixtures -----------------------------------------------------------

    fn wine_page() -> ResponseTemplate {
        let body = r#"<html><head><title>Opus One 2015 review</title></head><body>
<article>
<h1>Opus One 2015</h1>
<p>Opus One 2015 is a Bordeaux-style blend from Napa Valley built on Cabernet Sauvignon with Merlot, Cabernet Franc, Petit Verdot and Malbec. The nose shows pronounced cassis, black cherry, violets and cedar.</p>
<p>On the palate it is full-bodied and balanced, with fine-grained tannins, fresh acidity and a long, lingering finish of graphite and dark chocolate. Drink now through 2040.</p>
</article>
</body></html>"#;
        ResponseTemplate::new(200).set_body_raw(body, "text/html; charset=utf-8")
    }

    fn full_profile() -> Value {
        serde_json::json!({
            "wine": ENTITY,
            "region": "Napa Valley, USA",
            "grape_varieties": "Cabernet Sauvignon, Merlot",
            "appearance": "clear, deep ruby",
            "nose": "clean, pronounced cassis, violet, cedar",
            "palate": "dry, pronounced, long finish, balanced",
            "aging": "20+ years",
            "average_price": "US$400",
            "quality": "Outstanding",
            "analysis": "Textbook Napa blend",
            "reference_source": ["https://www.decanter.com/opus-one-2015", "not a link"]
        })
    }

    /// Cache in a fresh temp dir, removed when the guard drops.
    fn temp_cache() -> (TempDir, Arc<CacheStore>) {
        let dir = TempDir::new().unwrap();
        let cache = Arc::new(CacheStore::new(dir.path().join("cache"), HashMap::new()));
        (dir, cache)
    }

    fn fetcher(cache: Arc<CacheStore>) -> Fetcher {
        Fetcher::new(
            &HttpConfig::default(),
            &RelevanceConfig::default(),
            cache,
            Arc::new(RelevanceFilter::with_defaults()),
        )
        .unwrap()
        .allow_private_hosts()
    }

    fn options() -> AggregatorOptions {
        AggregatorOptions {
            max_results: 10,
            query_suffix: "wine review".into(),
            temperature: 0.7,
            fetch: FetchOptions {
                concurrency_limit: 2,
                per_fetch_timeout: Duration::from_secs(2),
                aggregate_timeout: Duration::from_secs(5),
                slow_threshold: Duration::from_secs(1),
            },
        }
    }

    fn aggregator(
        search: Arc<MockSearch>,
        summarizer: Arc<MockSummarizer>,
        cache: Arc<CacheStore>,
    ) -> Aggregator {
        Aggregator::new(
            search,
            summarizer,
            fetcher(Arc::clone(&cache)),
            cache,
            RetryPolicy::new(2, Duration::ZERO),
            options(),
        )
    }

    async fn wine_server() -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/review"))
            .respond_with(wine_page())
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        server
    }

    // -- pure helpers -------------------------------------------------------

    #[test]
    fn merge_keeps_links_and_unions_search_results() {
        let refs = vec![
            "https://www.decanter.com/a".to_string(),
            "Wine Spectator, 2019".to_string(),
            " http://vinous.com/b ".to_string(),
        ];
        let search = vec![
            "https://www.decanter.com/a".to_string(),
            "https://www.vivino.com/c".to_string(),
        ];
        assert_eq!(
            merge_references(&refs, &search),
            vec![
                "https://www.decanter.com/a",
                "http://vinous.com/b",
                "https://www.vivino.com/c",
            ]
        );
    }

    #[test]
    fn self_union_is_idempotent() {
        let urls = vec![
            "https://a.com/1".to_string(),
            "https://b.com/2".to_string(),
            "https://a.com/1".to_string(),
        ];
        let once = merge_references(&urls, &urls);
        assert_eq!(once, vec!["https://a.com/1", "https://b.com/2"]);
        assert_eq!(merge_references(&once, &once), once);
    }

    #[test]
    fn summary_key_depends_on_every_input() {
        let sources = vec!["https://a.com".to_string()];
        let base = summary_key("X", "corpus", &sources);
        assert_eq!(base, summary_key("X", "corpus", &sources));
        assert_ne!(base, summary_key("Y", "corpus", &sources));
        assert_ne!(base, summary_key("X", "other", &sources));
        assert_ne!(base, summary_key("X", "corpus", &[]));
    }

    // -- pipeline -----------------------------------------------------------

    #[tokio::test]
    async fn run_produces_validated_profile_with_merged_references() {
        let server = wine_server().await;
        let review = format!("{}/review", server.uri());
        let missing = format!("{}/missing", server.uri());

        let search = Arc::new(MockSearch::returning(vec![review.clone(), missing.clone()]));
        let summarizer = Arc::new(MockSummarizer::new(full_profile()));
        let (_dir, cache) = temp_cache();
        let agg = aggregator(search, Arc::clone(&summarizer), cache);

        let result = agg.run(ENTITY, &SilentProgress).await.unwrap();

        assert_eq!(result.profile.wine, ENTITY);
        assert_eq!(result.accepted_sources, vec![review.clone()]);
        let mut searched = vec![review.clone(), missing.clone()];
        searched.sort();
        assert_eq!(*summarizer.sources.lock().unwrap(), searched);
        assert_eq!(
            result.profile.reference_source,
            vec!["https://www.decanter.com/opus-one-2015".to_string(), review, missing]
        );
        let stages: Vec<_> = result.timings.iter().map(|t| t.stage).collect();
        assert_eq!(stages, vec![STAGE_SEARCH, STAGE_FETCH, STAGE_SUMMARIZE, STAGE_MERGE]);
        assert_eq!(summarizer.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn empty_search_is_content_unavailable_without_summarizing() {
        let search = Arc::new(MockSearch::returning(Vec::new()));
        let summarizer = Arc::new(MockSummarizer::new(full_profile()));
        let (_dir, cache) = temp_cache();
        let agg = aggregator(search, Arc::clone(&summarizer), cache);

        let err = agg.run(ENTITY, &SilentProgress).await.unwrap_err();
        assert!(matches!(err, WineLensError::ContentUnavailable { .. }));
        assert_eq!(summarizer.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn no_relevant_documents_is_content_unavailable() {
        let server = wine_server().await;
        let search = Arc::new(MockSearch::returning(vec![format!("{}/missing", server.uri())]));
        let summarizer = Arc::new(MockSummarizer::new(full_profile()));
        let (_dir, cache) = temp_cache();
        let agg = aggregator(search, Arc::clone(&summarizer), cache);

        let err = agg.run(ENTITY, &SilentProgress).await.unwrap_err();
        assert!(matches!(err, WineLensError::ContentUnavailable { .. }));
        assert_eq!(summarizer.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn search_failures_are_retried_then_tagged() {
        let search = Arc::new(MockSearch::failing_with("connection reset"));
        let summarizer = Arc::new(MockSummarizer::new(full_profile()));
        let (_dir, cache) = temp_cache();
        let agg = aggregator(Arc::clone(&search), summarizer, cache);

        let err = agg.run(ENTITY, &SilentProgress).await.unwrap_err();
        assert!(matches!(err, WineLensError::SearchProvider(_)));
        assert!(err.is_pipeline_error());
        assert_eq!(search.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn summarizer_failures_are_retried_then_tagged_and_not_cached() {
        let server = wine_server().await;
        let search = Arc::new(MockSearch::returning(vec![format!("{}/review", server.uri())]));
        let summarizer = Arc::new(MockSummarizer::failing_with("upstream timed out"));
        let (_dir, cache) = temp_cache();
        let agg = aggregator(search, Arc::clone(&summarizer), Arc::clone(&cache));

        let err = agg.run(ENTITY, &SilentProgress).await.unwrap_err();
        assert!(matches!(err, WineLensError::Summarization(_)));
        assert!(err.to_string().contains("upstream timed out"));
        assert!(err.is_pipeline_error());
        assert_eq!(summarizer.calls.load(Ordering::SeqCst), 2);
        assert!(!cache.root().join(CATEGORY_SUMMARY).exists());

        // Nothing was cached, so the next run asks the provider again
        agg.run(ENTITY, &SilentProgress).await.unwrap_err();
        assert_eq!(summarizer.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn incomplete_profile_is_a_validation_error_and_not_cached() {
        let server = wine_server().await;
        let search = Arc::new(MockSearch::returning(vec![format!("{}/review", server.uri())]));
        let summarizer = Arc::new(MockSummarizer::new(serde_json::json!({
            "wine": ENTITY,
            "nose": "pronounced"
        })));
        let (_dir, cache) = temp_cache();
        let agg = aggregator(search, Arc::clone(&summarizer), cache);

        for _ in 0..2 {
            let err = agg.run(ENTITY, &SilentProgress).await.unwrap_err();
            assert!(matches!(err, WineLensError::Validation { .. }));
        }
        assert_eq!(summarizer.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn summaries_are_served_from_cache() {
        let server = wine_server().await;
        let search = Arc::new(MockSearch::returning(vec![format!("{}/review", server.uri())]));
        let summarizer = Arc::new(MockSummarizer::new(full_profile()));
        let (_dir, cache) = temp_cache();
        let agg = aggregator(search, Arc::clone(&summarizer), cache);

        let first = agg.run(ENTITY, &SilentProgress).await.unwrap();
        let second = agg.run(ENTITY, &SilentProgress).await.unwrap();
        assert_eq!(first.profile, second.profile);
        assert_eq!(summarizer.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn blank_entity_is_rejected() {
        let search = Arc::new(MockSearch::returning(Vec::new()));
        let summarizer = Arc::new(MockSummarizer::new(full_profile()));
        let (_dir, cache) = temp_cache();
        let agg = aggregator(Arc::clone(&search), summarizer, cache);

        let err = agg.run("   ", &SilentProgress).await.unwrap_err();
        assert!(matches!(err, WineLensError::Validation { .. }));
        assert_eq!(search.calls.load(Ordering::SeqCst), 0);
    }
}
