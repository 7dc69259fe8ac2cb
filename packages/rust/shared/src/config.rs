//! Application configuration for WineLens.
//!
//! User config lives at `~/.winelens/winelens.toml`. Every section and field
//! has a default, so a missing file or a partial file is always valid.
//! `WINELENS_ENV=prod` turns the cache off.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, WineLensError};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "winelens.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".winelens";

/// Env var selecting the runtime environment.
pub const ENV_VAR: &str = "WINELENS_ENV";

// ---------------------------------------------------------------------------
// Config structs (matching winelens.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub pipeline: PipelineConfig,

    #[serde(default)]
    pub http: HttpConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub relevance: RelevanceConfig,

    #[serde(default)]
    pub embedding: EmbeddingConfig,

    #[serde(default)]
    pub search: SearchConfig,

    #[serde(default)]
    pub summarizer: SummarizerConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub scoring: ScoringConfig,
}

/// `[pipeline]` section: fetch fan-out and time budgets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Search results requested per entity.
    #[serde(default = "default_max_results")]
    pub max_results: usize,

    /// Maximum fetches in flight at once.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Budget for a single URL, cache lookup included.
    #[serde(default = "default_per_fetch_timeout")]
    pub per_fetch_timeout_secs: u64,

    /// Budget for the whole fetch batch.
    #[serde(default = "default_aggregate_timeout")]
    pub aggregate_timeout_secs: u64,

    /// Fetches slower than this are logged as slow.
    #[serde(default = "default_slow_threshold")]
    pub slow_threshold_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_results: default_max_results(),
            concurrency: default_concurrency(),
            per_fetch_timeout_secs: default_per_fetch_timeout(),
            aggregate_timeout_secs: default_aggregate_timeout(),
            slow_threshold_secs: default_slow_threshold(),
        }
    }
}

fn default_max_results() -> usize {
    20
}
fn default_concurrency() -> usize {
    5
}
fn default_per_fetch_timeout() -> u64 {
    6
}
fn default_aggregate_timeout() -> u64 {
    20
}
fn default_slow_threshold() -> u64 {
    5
}

/// `[http]` section: outbound client settings and pre-download screening.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Largest body accepted, by `Content-Length` or by bytes streamed.
    #[serde(default = "default_max_content_length")]
    pub max_content_length: u64,

    /// MIME type prefixes accepted for extraction.
    #[serde(default = "default_allowed_content_types")]
    pub allowed_content_types: Vec<String>,

    /// URL path suffixes skipped without a request.
    #[serde(default = "default_skipped_extensions")]
    pub skipped_extensions: Vec<String>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            connect_timeout_secs: default_connect_timeout(),
            max_content_length: default_max_content_length(),
            allowed_content_types: default_allowed_content_types(),
            skipped_extensions: default_skipped_extensions(),
        }
    }
}

fn default_user_agent() -> String {
    concat!("WineLens/", env!("CARGO_PKG_VERSION")).into()
}
fn default_connect_timeout() -> u64 {
    2
}
fn default_max_content_length() -> u64 {
    1024 * 1024
}
fn default_allowed_content_types() -> Vec<String> {
    ["text/html", "text/plain", "application/xhtml+xml", "application/xml"]
        .into_iter()
        .map(String::from)
        .collect()
}
fn default_skipped_extensions() -> Vec<String> {
    [".pdf", ".doc", ".docx", ".xls", ".xlsx", ".ppt", ".pptx", ".zip"]
        .into_iter()
        .map(String::from)
        .collect()
}

/// `[cache]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// The single switch for all caching.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Root directory; `~` expands to the home directory.
    #[serde(default = "default_cache_dir")]
    pub dir: String,

    /// Per-category TTL in seconds. Categories not listed never expire.
    #[serde(default = "default_ttls")]
    pub ttl_secs: BTreeMap<String, u64>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: default_cache_dir(),
            ttl_secs: default_ttls(),
        }
    }
}

impl CacheConfig {
    /// Resolve `dir`, expanding a leading `~`.
    pub fn resolved_dir(&self) -> Result<PathBuf> {
        expand_home(&self.dir)
    }
}

fn default_true() -> bool {
    true
}
fn default_cache_dir() -> String {
    "~/.winelens/cache".into()
}
fn default_ttls() -> BTreeMap<String, u64> {
    BTreeMap::from([
        ("search".to_string(), 24 * 60 * 60),
        ("summary".to_string(), 6 * 60 * 60),
    ])
}

/// `[relevance]` section: acceptance thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelevanceConfig {
    /// Distinct entity-name tokens a text must contain.
    #[serde(default = "default_min_token_matches")]
    pub min_token_matches: usize,

    /// Cosine similarity against the entity name.
    #[serde(default = "default_entity_threshold")]
    pub entity_threshold: f32,

    /// Cosine similarity against the domain reference corpus.
    #[serde(default = "default_reference_threshold")]
    pub reference_threshold: f32,

    /// Cosine similarity against the short-term vocabulary.
    #[serde(default = "default_short_term_threshold")]
    pub short_term_threshold: f32,

    /// Blocks shorter than this need a rescue reason to survive cleaning.
    #[serde(default = "default_min_block_length")]
    pub min_block_length: usize,

    /// Runs of this many symbols mark a line or block as noise.
    #[serde(default = "default_max_symbolic_run")]
    pub max_symbolic_run: usize,

    /// Language codes (ISO 639-3) accepted for long blocks.
    #[serde(default = "default_accepted_languages")]
    pub accepted_languages: Vec<String>,

    /// Blocks longer than this are screened by language.
    #[serde(default = "default_language_check_min_chars")]
    pub language_check_min_chars: usize,

    /// Entries kept by each embedding memo.
    #[serde(default = "default_memo_capacity")]
    pub memo_capacity: usize,
}

impl Default for RelevanceConfig {
    fn default() -> Self {
        Self {
            min_token_matches: default_min_token_matches(),
            entity_threshold: default_entity_threshold(),
            reference_threshold: default_reference_threshold(),
            short_term_threshold: default_short_term_threshold(),
            min_block_length: default_min_block_length(),
            max_symbolic_run: default_max_symbolic_run(),
            accepted_languages: default_accepted_languages(),
            language_check_min_chars: default_language_check_min_chars(),
            memo_capacity: default_memo_capacity(),
        }
    }
}

fn default_min_token_matches() -> usize {
    2
}
fn default_entity_threshold() -> f32 {
    0.3
}
fn default_reference_threshold() -> f32 {
    0.35
}
fn default_short_term_threshold() -> f32 {
    0.6
}
fn default_min_block_length() -> usize {
    15
}
fn default_max_symbolic_run() -> usize {
    5
}
fn default_accepted_languages() -> Vec<String> {
    ["eng", "fra", "ita", "spa"]
        .into_iter()
        .map(String::from)
        .collect()
}
fn default_language_check_min_chars() -> usize {
    50
}
fn default_memo_capacity() -> usize {
    1024
}

/// `[embedding]` section: the similarity model behind relevance and scoring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Local sentence-embedding model, or `hashing` for the offline
    /// feature-hashing embedder.
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Where downloaded model files are kept; `~` expands to the home directory.
    #[serde(default = "default_model_cache_dir")]
    pub cache_dir: String,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: default_embedding_model(),
            cache_dir: default_model_cache_dir(),
        }
    }
}

impl EmbeddingConfig {
    /// Resolve `cache_dir`, expanding a leading `~`.
    pub fn resolved_cache_dir(&self) -> Result<PathBuf> {
        expand_home(&self.cache_dir)
    }
}

fn default_embedding_model() -> String {
    "all-minilm-l6-v2".into()
}
fn default_model_cache_dir() -> String {
    "~/.winelens/models".into()
}

/// `[search]` section: Google Custom Search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default = "default_search_endpoint")]
    pub endpoint: String,

    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_search_key_env")]
    pub api_key_env: String,

    /// Name of the env var holding the search engine id.
    #[serde(default = "default_search_cx_env")]
    pub cx_env: String,

    /// Appended to the entity name to form the query.
    #[serde(default = "default_query_suffix")]
    pub query_suffix: String,

    /// Keep several results from the same domain.
    #[serde(default)]
    pub allow_duplicate_domains: bool,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            endpoint: default_search_endpoint(),
            api_key_env: default_search_key_env(),
            cx_env: default_search_cx_env(),
            query_suffix: default_query_suffix(),
            allow_duplicate_domains: false,
        }
    }
}

fn default_search_endpoint() -> String {
    "https://www.googleapis.com/customsearch/v1".into()
}
fn default_search_key_env() -> String {
    "GOOGLE_API_KEY".into()
}
fn default_search_cx_env() -> String {
    "GOOGLE_CX".into()
}
fn default_query_suffix() -> String {
    "wine review".into()
}

/// `[summarizer]` section: Gemini.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummarizerConfig {
    #[serde(default = "default_summarizer_endpoint")]
    pub endpoint: String,

    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_summarizer_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_model")]
    pub model: String,

    /// 0.0 is most factual, 1.0 most exploratory.
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Corpus characters sent in one prompt.
    #[serde(default = "default_max_corpus_chars")]
    pub max_corpus_chars: usize,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for SummarizerConfig {
    fn default() -> Self {
        Self {
            endpoint: default_summarizer_endpoint(),
            api_key_env: default_summarizer_key_env(),
            model: default_model(),
            temperature: default_temperature(),
            max_corpus_chars: default_max_corpus_chars(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

fn default_summarizer_endpoint() -> String {
    "https://generativelanguage.googleapis.com/v1beta".into()
}
fn default_summarizer_key_env() -> String {
    "GEMINI_API_KEY".into()
}
fn default_model() -> String {
    "gemini-2.0-flash".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_corpus_chars() -> usize {
    200_000
}
fn default_request_timeout() -> u64 {
    60
}

/// `[retry]` section, shared by the search and summarization call sites.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Linear backoff unit: attempt `n` waits `n * base_delay_ms`.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    1000
}

/// `[scoring]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringConfig {
    /// Similarity a finish phrase needs to count as a long finish.
    #[serde(default = "default_length_threshold")]
    pub length_similarity_threshold: f32,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            length_similarity_threshold: default_length_threshold(),
        }
    }
}

fn default_length_threshold() -> f32 {
    0.6
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.winelens/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| WineLensError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.winelens/winelens.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    let mut config = if path.exists() {
        load_config_from(&path)?
    } else {
        tracing::debug!(?path, "config file not found, using defaults");
        AppConfig::default()
    };

    config.apply_env(std::env::var(ENV_VAR).ok().as_deref());
    Ok(config)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| WineLensError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| WineLensError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| WineLensError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| WineLensError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| WineLensError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

impl AppConfig {
    /// Apply the runtime environment. Production never caches.
    pub fn apply_env(&mut self, env: Option<&str>) {
        if matches!(env, Some("prod") | Some("production")) {
            tracing::debug!("production environment, caching disabled");
            self.cache.enabled = false;
        }
    }
}

/// Check that the search and summarizer API key env vars are set and non-empty.
pub fn validate_api_keys(config: &AppConfig) -> Result<()> {
    let required = [
        &config.search.api_key_env,
        &config.search.cx_env,
        &config.summarizer.api_key_env,
    ];

    let missing: Vec<&str> = required
        .into_iter()
        .filter(|name| !matches!(std::env::var(name.as_str()), Ok(v) if !v.is_empty()))
        .map(String::as_str)
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(WineLensError::config(format!(
            "API credentials not found. Set the environment variable(s): {}",
            missing.join(", ")
        )))
    }
}

/// Read a credential from the env var named by the config.
pub fn read_secret(var_name: &str) -> Result<String> {
    match std::env::var(var_name) {
        Ok(val) if !val.is_empty() => Ok(val),
        _ => Err(WineLensError::config(format!(
            "environment variable {var_name} is not set"
        ))),
    }
}

fn expand_home(path: &str) -> Result<PathBuf> {
    match path.strip_prefix("~/") {
        Some(rest) => {
            let home = dirs::home_dir()
                .ok_or_else(|| WineLensError::config("could not determine home directory"))?;
            Ok(home.join(rest))
        }
        None => Ok(PathBuf::from(path)),
    }
}
