//! Shared types, error model, and configuration for WineLens.
//!
//! This crate is the foundation depended on by all other WineLens crates.
//! It provides:
//! - [`WineLensError`], the unified error type
//! - Domain types ([`EntityProfile`], [`FetchedDocument`], [`ScoreResult`])
//! - Configuration ([`AppConfig`] and config loading)
//! - [`RetryPolicy`] for provider call sites

pub mod config;
pub mod error;
pub mod retry;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, CacheConfig, EmbeddingConfig, HttpConfig, PipelineConfig, RelevanceConfig, RetryConfig,
    ScoringConfig, SearchConfig, SummarizerConfig, config_dir, config_file_path, init_config,
    load_config, load_config_from, read_secret, validate_api_keys,
};
pub use error::{Result, WineLensError};
pub use retry::RetryPolicy;
pub use types::{
    ClusterMap, Criterion, EntityProfile, FetchedDocument, Quality, REQUIRED_PROFILE_FIELDS,
    ScoreResult, SourceCorpus, coerce_string_list, normalize_entity_name,
};
