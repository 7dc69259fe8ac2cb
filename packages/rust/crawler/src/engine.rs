//! Bounded-concurrency fetch engine.
//!
//! The fetcher takes the candidate URLs for one entity, downloads them with at
//! most `concurrency_limit` requests in flight, and returns the cleaned,
//! relevant documents in completion order. Individual failures never abort
//! the batch.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use reqwest::Client;
use reqwest::header::CONTENT_TYPE;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};
use url::Url;

use winelens_relevance::{Relevance, RelevanceFilter};
use winelens_shared::{
    FetchedDocument, HttpConfig, PipelineConfig, RelevanceConfig, Result, WineLensError,
};
use winelens_storage::{CATEGORY_HTML, CacheStore};

use crate::extract::{ContentExtractor, MIN_TEXT_CHARS};

// ---------------------------------------------------------------------------
// FetchOptions
// ---------------------------------------------------------------------------

/// Limits for one `fetch_all` batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchOptions {
    /// Maximum requests in flight.
    pub concurrency_limit: usize,
    /// Budget for one URL once it holds a permit, cache lookup included.
    pub per_fetch_timeout: Duration,
    /// Budget for the whole batch. Outstanding fetches are aborted on expiry.
    pub aggregate_timeout: Duration,
    /// Fetches slower than this are logged as slow.
    pub slow_threshold: Duration,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self::from(&PipelineConfig::default())
    }
}

impl From<&PipelineConfig> for FetchOptions {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            concurrency_limit: config.concurrency.max(1),
            per_fetch_timeout: Duration::from_secs(config.per_fetch_timeout_secs),
            aggregate_timeout: Duration::from_secs(config.aggregate_timeout_secs),
            slow_threshold: Duration::from_secs(config.slow_threshold_secs),
        }
    }
}

// ---------------------------------------------------------------------------
// Fetcher
// ---------------------------------------------------------------------------

/// Concurrent page fetcher with caching, extraction and relevance filtering.
///
/// Cloning is cheap; clones share the HTTP client, cache and filter.
#[derive(Clone)]
pub struct Fetcher {
    client: Client,
    http: Arc<HttpConfig>,
    cache: Arc<CacheStore>,
    extractor: Arc<ContentExtractor>,
    filter: Arc<RelevanceFilter>,
    /// Allow localhost/private IPs (for tests against local mock servers).
    allow_private_hosts: bool,
}

impl Fetcher {
    /// Create a fetcher. The relevance filter is shared by the extractor's
    /// short-block rescue and the document relevance check.
    pub fn new(
        http: &HttpConfig,
        relevance: &RelevanceConfig,
        cache: Arc<CacheStore>,
        filter: Arc<RelevanceFilter>,
    ) -> Result<Self> {
        let client = Client::builder()
            .user_agent(http.user_agent.as_str())
            .redirect(reqwest::redirect::Policy::limited(5))
            .connect_timeout(Duration::from_secs(http.connect_timeout_secs))
            .build()
            .map_err(|e| WineLensError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            http: Arc::new(http.clone()),
            cache,
            extractor: Arc::new(ContentExtractor::new(Arc::clone(&filter), relevance)),
            filter,
            allow_private_hosts: false,
        })
    }

    /// Allow fetching localhost/private IPs.
    pub fn allow_private_hosts(mut self) -> Self {
        self.allow_private_hosts = true;
        self
    }

    /// Fetch every URL and return the accepted documents in completion order.
    ///
    /// Never fails: skipped, irrelevant, failed and timed-out URLs simply
    /// contribute nothing.
    #[instrument(skip_all, fields(entity = %entity, urls = urls.len()))]
    pub async fn fetch_all(
        &self,
        entity: &str,
        urls: &[String],
        options: &FetchOptions,
    ) -> Vec<FetchedDocument> {
        let started = Instant::now();
        let semaphore = Arc::new(Semaphore::new(options.concurrency_limit.max(1)));
        let mut tasks = JoinSet::new();

        info!(
            concurrency = options.concurrency_limit,
            per_fetch_timeout_ms = options.per_fetch_timeout.as_millis() as u64,
            aggregate_timeout_ms = options.aggregate_timeout.as_millis() as u64,
            "starting fetch batch"
        );

        for url in urls {
            let fetcher = self.clone();
            let sem = Arc::clone(&semaphore);
            let entity = entity.to_string();
            let url = url.clone();
            let options = *options;

            tasks.spawn(async move {
                let Ok(_permit) = sem.acquire_owned().await else {
                    return None;
                };
                fetcher.fetch_with_timeout(&entity, &url, &options).await
            });
        }

        let mut documents = Vec::new();
        let deadline = tokio::time::sleep(options.aggregate_timeout);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                joined = tasks.join_next() => match joined {
                    Some(Ok(Some(doc))) => documents.push(doc),
                    Some(Ok(None)) => {}
                    Some(Err(e)) => warn!(error = %e, "fetch task failed"),
                    None => break,
                },
                () = &mut deadline => {
                    warn!(
                        pending = tasks.len(),
                        timeout_ms = options.aggregate_timeout.as_millis() as u64,
                        "aggregate fetch timeout reached, returning partial results"
                    );
                    tasks.abort_all();
                    break;
                }
            }
        }

        info!(
            accepted = documents.len(),
            duration_ms = started.elapsed().as_millis() as u64,
            "fetch batch completed"
        );

        documents
    }

    /// One URL under the per-fetch budget. All failures are logged here.
    async fn fetch_with_timeout(
        &self,
        entity: &str,
        url: &str,
        options: &FetchOptions,
    ) -> Option<FetchedDocument> {
        let started = Instant::now();
        let outcome = tokio::time::timeout(options.per_fetch_timeout, self.fetch_one(entity, url)).await;
        let elapsed = started.elapsed();

        match outcome {
            Ok(Ok(Some(doc))) => {
                if elapsed > options.slow_threshold {
                    warn!(url, duration_ms = elapsed.as_millis() as u64, "fetched (slow)");
                } else {
                    info!(url, duration_ms = elapsed.as_millis() as u64, "fetched");
                }
                Some(doc)
            }
            Ok(Ok(None)) => None,
            Ok(Err(e)) => {
                warn!(url, error = %e, "fetch failed");
                None
            }
            Err(_) => {
                let err = WineLensError::FetchTimeout {
                    target: url.to_string(),
                    elapsed_ms: elapsed.as_millis() as u64,
                };
                warn!(url, error = %err, "fetch timed out");
                None
            }
        }
    }

    /// Screen, then serve from the `html` cache or download.
    ///
    /// `Ok(None)` means the URL was skipped or its content was rejected.
    pub async fn fetch_one(&self, entity: &str, url: &str) -> Result<Option<FetchedDocument>> {
        let parsed = match Url::parse(url) {
            Ok(parsed) => parsed,
            Err(e) => {
                debug!(url, error = %e, "invalid URL, skipping");
                return Ok(None);
            }
        };

        if has_skipped_extension(&parsed, &self.http.skipped_extensions) {
            debug!(url, "unsupported document type, skipping");
            return Ok(None);
        }

        if !self.allow_private_hosts && is_ssrf_target(&parsed) {
            warn!(url, "SSRF protection: blocked");
            return Ok(None);
        }

        let key = format!("{entity}({url})");
        self.cache
            .get_or_fetch(CATEGORY_HTML, &key, || self.download(entity, &parsed))
            .await
    }

    /// GET, screen headers, stream the body, extract and judge relevance.
    async fn download(&self, entity: &str, url: &Url) -> Result<Option<FetchedDocument>> {
        debug!(%url, "fetching page");

        let mut response = self
            .client
            .get(url.as_str())
            .send()
            .await
            .map_err(|e| WineLensError::Network(format!("{url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(WineLensError::Network(format!("{url}: HTTP {status}")));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_ascii_lowercase();
        if !self.is_allowed_content_type(&content_type) {
            debug!(%url, content_type = %content_type, "non-HTML content, skipping");
            return Ok(None);
        }

        let max_len = self.http.max_content_length;
        if let Some(len) = response.content_length().filter(|len| *len > max_len) {
            debug!(%url, content_length = len, "content too large, skipping");
            return Ok(None);
        }

        let mut body = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| WineLensError::Network(format!("{url}: body read failed: {e}")))?
        {
            body.extend_from_slice(&chunk);
            if body.len() as u64 > max_len {
                debug!(%url, max_len, "body exceeded maximum size, abandoning");
                return Ok(None);
            }
        }
        let body = String::from_utf8_lossy(&body).into_owned();

        // Extraction and relevance both embed text, which is CPU-bound
        let extractor = Arc::clone(&self.extractor);
        let filter = Arc::clone(&self.filter);
        let entity = entity.to_string();
        let page = url.to_string();
        let text = tokio::task::spawn_blocking(move || {
            screen_page(&extractor, &filter, &entity, &page, &body)
        })
        .await
        .map_err(|e| WineLensError::parse(format!("{url}: content screening failed: {e}")))?;

        Ok(text.map(|text| FetchedDocument {
            url: url.to_string(),
            text,
            content_type,
            fetched_at: Utc::now(),
        }))
    }

    fn is_allowed_content_type(&self, content_type: &str) -> bool {
        self.http
            .allowed_content_types
            .iter()
            .any(|allowed| content_type.starts_with(allowed.as_str()))
    }
}

/// Extract the page text and keep it only when it is about `entity`.
fn screen_page(
    extractor: &ContentExtractor,
    filter: &RelevanceFilter,
    entity: &str,
    url: &str,
    body: &str,
) -> Option<String> {
    let text = match extractor.extract(body) {
        Ok(text) => text,
        Err(reason) => {
            debug!(%url, %reason, "no usable content");
            return None;
        }
    };

    if text.chars().count() < MIN_TEXT_CHARS {
        debug!(%url, "fetched content is too short");
        return None;
    }

    match filter.check(entity, &text) {
        Relevance::Rejected { best_score } => {
            debug!(%url, ?best_score, "not relevant content");
            None
        }
        accepted => {
            debug!(%url, relevance = ?accepted, "relevant content");
            Some(text)
        }
    }
}

/// Whether the URL path ends with an extension the extractor cannot read.
fn has_skipped_extension(url: &Url, extensions: &[String]) -> bool {
    let path = url.path().to_ascii_lowercase();
    extensions.iter().any(|ext| path.ends_with(ext.as_str()))
}

// ---------------------------------------------------------------------------
// SSRF protection
// ---------------------------------------------------------------------------

/// Check if a URL targets a potentially dangerous resource.
fn is_ssrf_target(url: &Url) -> bool {
    match url.scheme() {
        "http" | "https" => {}
        _ => return true,
    }

    match url.host() {
        Some(url::Host::Ipv4(v4)) => is_private_ip(&IpAddr::V4(v4)),
        Some(url::Host::Ipv6(v6)) => is_private_ip(&IpAddr::V6(v6)),
        Some(url::Host::Domain(host)) => {
            host == "localhost" || host.ends_with(".local") || host.ends_with(".internal")
        }
        None => true,
    }
}

/// Check if an IP is in a private/reserved range.
fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_broadcast()
                || v4.is_unspecified()
                // 100.64.0.0/10 (Carrier-grade NAT)
                || (v4.octets()[0] == 100 && (v4.octets()[1] & 0xC0) == 64)
                // 192.0.0.0/24
                || (v4.octets()[0] == 192 && v4.octets()[1] == 0 && v4.octets()[2] == 0)
        }
        IpAddr::V6(v6) => v6.is_loopback() || v6.is_unspecified(),
    }
}

#[cfg(test)]
mod fetcher_tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const ENTITY: &str = "Opus One 2015";

    fn wine_page() -> String {
        r#"<html><head><title>Opus One 2015 review</title></head><body>
<nav>Home | Shop | Cart</nav>
<article>
<h1>Opus One 2015</h1>
<p>Opus One 2015 is a Bordeaux-style blend from Napa Valley built on Cabernet Sauvignon with Merlot, Cabernet Franc, Petit Verdot and Malbec. The nose shows pronounced cassis, black cherry, violets and cedar, with hints of vanilla from new French oak.</p>
<p>On the palate it is full-bodied and balanced, with ripe, fine-grained tannins, fresh acidity and a long, lingering finish of graphite and dark chocolate. Drink now through 2040.</p>
</article>
</body></html>"#
            .to_string()
    }

    fn garden_page() -> String {
        r#"<html><head><title>Garden tips</title></head><body>
<article>
<p>Tomatoes need at least six hours of direct sunlight every day, steady watering and rich, well drained soil. Stake the plants early so the stems can carry heavy fruit later in the summer season.</p>
<p>Mulch around the base of each plant to keep moisture in the ground and weeds out of the bed. Pinch off suckers to direct energy toward the main stems and prune lower leaves as they yellow.</p>
</article>
</body></html>"#
            .to_string()
    }

    fn html(body: String) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_raw(body, "text/html; charset=utf-8")
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

    fn options(concurrency: usize, per_fetch_ms: u64, aggregate_ms: u64) -> FetchOptions {
        FetchOptions {
            concurrency_limit: concurrency,
            per_fetch_timeout: Duration::from_millis(per_fetch_ms),
            aggregate_timeout: Duration::from_millis(aggregate_ms),
            slow_threshold: Duration::from_secs(5),
        }
    }

    #[test]
    fn test_ssrf_protection_blocks_file() {
        let url = Url::parse("file:///etc/passwd").unwrap();
        assert!(is_ssrf_target(&url));
    }

    #[test]
    fn test_ssrf_protection_blocks_private_ip() {
        for target in ["http://192.168.1.1/admin", "http://10.0.0.1/", "http://127.0.0.1:8080/", "http://[::1]/"] {
            let url = Url::parse(target).unwrap();
            assert!(is_ssrf_target(&url), "{target} should be blocked");
        }
    }

    #[test]
    fn test_ssrf_protection_allows_public() {
        let url = Url::parse("https://www.winespectator.com/wine/opus-one").unwrap();
        assert!(!is_ssrf_target(&url));
    }

    #[test]
    fn test_ssrf_blocks_localhost() {
        let url = Url::parse("http://localhost:3000/api").unwrap();
        assert!(is_ssrf_target(&url));
    }

    #[test]
    fn test_skipped_extensions() {
        let exts = HttpConfig::default().skipped_extensions;
        let pdf = Url::parse("https://example.com/tech-sheet.PDF").unwrap();
        assert!(has_skipped_extension(&pdf, &exts));
        let page = Url::parse("https://example.com/review?format=pdf").unwrap();
        assert!(!has_skipped_extension(&page, &exts));
    }

    #[test]
    fn options_from_config() {
        let opts = FetchOptions::default();
        assert_eq!(opts.concurrency_limit, 5);
        assert_eq!(opts.per_fetch_timeout, Duration::from_secs(6));
        assert_eq!(opts.aggregate_timeout, Duration::from_secs(20));
    }

    #[tokio::test]
    async fn timeouts_degrade_to_partial_results() {
        let server = MockServer::start().await;

        for p in ["/a", "/b", "/c"] {
            Mock::given(method("GET"))
                .and(path(p))
                .respond_with(html(wine_page()))
                .mount(&server)
                .await;
        }
        for p in ["/slow1", "/slow2"] {
            Mock::given(method("GET"))
                .and(path(p))
                .respond_with(html(wine_page()).set_delay(Duration::from_secs(3)))
                .mount(&server)
                .await;
        }

        let urls: Vec<String> = ["/slow1", "/a", "/slow2", "/b", "/c"]
            .iter()
            .map(|p| format!("{}{p}", server.uri()))
            .collect();

        let (_dir, cache) = temp_cache();
        let docs = fetcher(cache)
            .fetch_all(ENTITY, &urls, &options(2, 500, 10_000))
            .await;

        assert_eq!(docs.len(), 3);
        assert!(docs.iter().all(|d| !d.url.contains("slow")));
        assert!(docs.iter().all(|d| d.text.contains("Opus One 2015")));
        assert!(docs.iter().all(|d| d.content_type.starts_with("text/html")));
    }

    #[tokio::test]
    async fn aggregate_timeout_returns_completed_documents() {
        let server = MockServer::start().await;

        Mock::given(path("/fast"))
            .respond_with(html(wine_page()))
            .mount(&server)
            .await;
        Mock::given(path("/stuck"))
            .respond_with(html(wine_page()).set_delay(Duration::from_secs(5)))
            .mount(&server)
            .await;

        let urls = vec![format!("{}/fast", server.uri()), format!("{}/stuck", server.uri())];

        let started = Instant::now();
        let (_dir, cache) = temp_cache();
        let docs = fetcher(cache)
            .fetch_all(ENTITY, &urls, &options(2, 10_000, 1_000))
            .await;

        assert_eq!(docs.len(), 1);
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[tokio::test]
    async fn screening_rejects_without_failing_the_batch() {
        let server = MockServer::start().await;

        Mock::given(path("/pdf-typed"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(wine_page(), "application/pdf"))
            .mount(&server)
            .await;
        Mock::given(path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(path("/huge"))
            .respond_with(html("x".repeat(2 * 1024 * 1024)))
            .mount(&server)
            .await;
        Mock::given(path("/good"))
            .respond_with(html(wine_page()))
            .mount(&server)
            .await;
        // Never requested: the extension is screened before any network call
        Mock::given(path("/sheet.pdf"))
            .respond_with(html(wine_page()))
            .expect(0)
            .mount(&server)
            .await;

        let urls: Vec<String> = ["/pdf-typed", "/missing", "/huge", "/good", "/sheet.pdf"]
            .iter()
            .map(|p| format!("{}{p}", server.uri()))
            .collect();

        let (_dir, cache) = temp_cache();
        let docs = fetcher(cache)
            .fetch_all(ENTITY, &urls, &options(3, 5_000, 10_000))
            .await;

        assert_eq!(docs.len(), 1);
        assert!(docs[0].url.ends_with("/good"));
    }

    #[tokio::test]
    async fn relevant_pages_are_cached() {
        let server = MockServer::start().await;

        Mock::given(path("/review"))
            .respond_with(html(wine_page()))
            .expect(1)
            .mount(&server)
            .await;

        let (_dir, cache) = temp_cache();
        let fetcher = fetcher(cache);
        let urls = vec![format!("{}/review", server.uri())];

        for _ in 0..2 {
            let docs = fetcher.fetch_all(ENTITY, &urls, &options(1, 5_000, 10_000)).await;
            assert_eq!(docs.len(), 1);
        }
    }

    #[tokio::test]
    async fn irrelevant_pages_are_dropped_and_not_cached() {
        let server = MockServer::start().await;

        Mock::given(path("/garden"))
            .respond_with(html(garden_page()))
            .expect(2)
            .mount(&server)
            .await;

        let (_dir, cache) = temp_cache();
        let fetcher = fetcher(cache);
        let urls = vec![format!("{}/garden", server.uri())];

        for _ in 0..2 {
            let docs = fetcher.fetch_all(ENTITY, &urls, &options(1, 5_000, 10_000)).await;
            assert!(docs.is_empty());
        }
    }

    #[tokio::test]
    async fn private_hosts_blocked_by_default() {
        let server = MockServer::start().await;

        Mock::given(path("/review"))
            .respond_with(html(wine_page()))
            .expect(0)
            .mount(&server)
            .await;

        let fetcher = Fetcher::new(
            &HttpConfig::default(),
            &RelevanceConfig::default(),
            Arc::new(CacheStore::disabled()),
            Arc::new(RelevanceFilter::with_defaults()),
        )
        .unwrap();

        let urls = vec![format!("{}/review", server.uri())];
        let docs = fetcher.fetch_all(ENTITY, &urls, &FetchOptions::default()).await;
        assert!(docs.is_empty());
    }
}
