//! Core pipeline orchestration and scoring for WineLens.
//!
//! This crate ties together query resolution, search, fetching,
//! summarization and the quality rule engine into the end-to-end `profile`
//! workflow.

pub mod lexicon;
pub mod pipeline;
pub mod query;
pub mod scoring;
pub mod summarize;

pub use pipeline::{
    Aggregation, Aggregator, AggregatorOptions, PipelineProgress, SilentProgress, StageTiming,
};
pub use query::{ParsedQuery, QueryParser, resolve_entity_name};
pub use scoring::ScoringEngine;
pub use summarize::{GeminiSummarizer, SummarizationProvider};
