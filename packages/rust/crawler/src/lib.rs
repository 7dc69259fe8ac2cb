//! Page fetching, content extraction, and text cleanup.
//!
//! This crate provides:
//! - [`engine`]: bounded-concurrency fetcher with caching and relevance checks
//! - [`extract`]: main-content extraction from HTML
//! - [`cleanup`]: the two-stage text cleaning pipeline

pub mod cleanup;
pub mod engine;
pub mod extract;

pub use cleanup::{BlockStats, TextCleaner, contains_price, is_probably_binary};
pub use engine::{FetchOptions, Fetcher};
pub use extract::{ContentExtractor, SkipReason};
