//! Error types for WineLens.
//!
//! Library crates use [`WineLensError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.
//!
//! The first five variants form the closed pipeline taxonomy: they are the
//! only errors allowed to cross the aggregator boundary. The remaining
//! variants are plumbing errors raised inside individual crates.

use std::path::PathBuf;

/// Top-level error type for all WineLens operations.
#[derive(Debug, thiserror::Error)]
pub enum WineLensError {
    /// The search provider failed after its retry budget was spent.
    #[error("search provider error: {0}")]
    SearchProvider(String),

    /// The summarization provider failed after its retry budget was spent.
    #[error("summarization error: {0}")]
    Summarization(String),

    /// No relevant content survived fetching and filtering.
    #[error("content unavailable: {message}")]
    ContentUnavailable { message: String },

    /// A summarized profile is missing required fields or is malformed.
    #[error("validation error: {message}")]
    Validation { message: String },

    /// A single fetch, or the whole fetch batch, ran out of time.
    #[error("fetch timed out after {elapsed_ms}ms: {target}")]
    FetchTimeout { target: String, elapsed_ms: u64 },

    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Network/HTTP error during fetch, search or summarization.
    #[error("network error: {0}")]
    Network(String),

    /// HTML or provider response parsing error.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Cache storage error.
    #[error("cache error: {0}")]
    Cache(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, WineLensError>;

impl WineLensError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Create a content-unavailable error from any displayable message.
    pub fn content_unavailable(msg: impl Into<String>) -> Self {
        Self::ContentUnavailable {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether this error belongs to the closed pipeline taxonomy.
    pub fn is_pipeline_error(&self) -> bool {
        matches!(
            self,
            Self::SearchProvider(_)
                | Self::Summarization(_)
                | Self::ContentUnavailable { .. }
                | Self::Validation { .. }
                | Self::FetchTimeout { .. }
        )
    }

    /// Short machine-readable tag for the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SearchProvider(_) => "search_provider",
            Self::Summarization(_) => "summarization",
            Self::ContentUnavailable { .. } => "content_unavailable",
            Self::Validation { .. } => "validation",
            Self::FetchTimeout { .. } => "fetch_timeout",
            Self::Config { .. } => "config",
            Self::Network(_) => "network",
            Self::Parse { .. } => "parse",
            Self::Cache(_) => "cache",
            Self::Io { .. } => "io",
        }
    }
}
