//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, WrapErr};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::info;
use winelens_core::{
    Aggregation, Aggregator, GeminiSummarizer, PipelineProgress, ScoringEngine,
    resolve_entity_name,
};
use winelens_relevance::{Embedder, embedder_from_config};
use winelens_shared::{
    AppConfig, EntityProfile, ScoreResult, init_config, load_config, validate_api_keys,
};
use winelens_storage::CacheStore;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// WineLens: wine profiles from published reviews.
#[derive(Parser)]
#[command(
    name = "winelens",
    version,
    about = "Aggregate published reviews into a graded wine tasting profile.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Build and grade a profile for a wine.
    Profile {
        /// Free-text wine query, e.g. "opus one 2015".
        name: String,

        /// Use the query as the wine name as-is, without parsing it.
        #[arg(long)]
        exact: bool,

        /// Bypass the search, page and summary caches.
        #[arg(long)]
        no_cache: bool,

        /// Print the profile and score as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Grade an existing profile JSON file.
    Score {
        /// Path to a profile JSON file.
        file: PathBuf,

        /// Print the score as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "winelens=info",
        1 => "winelens=debug",
        _ => "winelens=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Profile {
            name,
            exact,
            no_cache,
            json,
        } => cmd_profile(&name, exact, no_cache, json).await,
        Command::Score { file, json } => cmd_score(&file, json).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => cmd_config_show(),
        },
    }
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

/// JSON output of `profile --json`.
#[derive(Serialize)]
struct ProfileReport<'a> {
    query: &'a str,
    #[serde(flatten)]
    aggregation: &'a Aggregation,
    score: &'a ScoreResult,
}

async fn cmd_profile(query: &str, exact: bool, no_cache: bool, json: bool) -> Result<()> {
    // Validate credentials before doing anything
    let config = load_config()?;
    validate_api_keys(&config)?;

    let cache = if no_cache {
        CacheStore::disabled()
    } else {
        CacheStore::from_config(&config.cache)?
    };

    let name = if exact {
        query.trim().to_string()
    } else {
        let parser = GeminiSummarizer::from_config(&config.summarizer)?;
        resolve_entity_name(&parser, query).await?
    };

    info!(query, name = %name, cache = cache.is_enabled(), "building profile");

    let embedder = load_embedder(&config).await?;
    let aggregator = Aggregator::from_config(&config, Arc::new(cache), Arc::clone(&embedder))?;
    let reporter = CliProgress::new();

    let aggregation = aggregator
        .run(&name, &reporter)
        .await
        .inspect_err(|_| reporter.spinner.finish_and_clear())
        .wrap_err_with(|| format!("could not build a profile for '{name}'"))?;

    let score = ScoringEngine::new(embedder, &config.scoring).score(&aggregation.profile);

    if json {
        let report = ProfileReport {
            query,
            aggregation: &aggregation,
            score: &score,
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    print_profile(&aggregation.profile);
    print_score(&score);

    println!("  Sources:");
    for url in &aggregation.profile.reference_source {
        println!("    - {url}");
    }
    let timings: Vec<String> = aggregation
        .timings
        .iter()
        .map(|t| format!("{} {:.1}s", t.stage, t.duration_ms as f64 / 1000.0))
        .collect();
    println!("  Time:     {}", timings.join(", "));
    println!();

    Ok(())
}

async fn cmd_score(file: &Path, json: bool) -> Result<()> {
    let config = load_config()?;

    let content = std::fs::read_to_string(file)
        .wrap_err_with(|| format!("cannot read profile file '{}'", file.display()))?;
    let raw: Map<String, Value> = serde_json::from_str(&content)
        .wrap_err_with(|| format!("'{}' is not a JSON object", file.display()))?;
    let profile = EntityProfile::from_raw(raw)?;

    let embedder = load_embedder(&config).await?;
    let score = ScoringEngine::new(embedder, &config.scoring).score(&profile);

    if json {
        println!("{}", serde_json::to_string_pretty(&score)?);
    } else {
        print_profile(&profile);
        print_score(&score);
        println!();
    }

    Ok(())
}

fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show() -> Result<()> {
    let config: AppConfig = load_config()?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

/// Load the configured embedding model off the async runtime; a first run
/// downloads it.
async fn load_embedder(config: &AppConfig) -> Result<Arc<dyn Embedder>> {
    let embedding = config.embedding.clone();
    let embedder = tokio::task::spawn_blocking(move || embedder_from_config(&embedding))
        .await
        .wrap_err("embedding model loader panicked")??;
    Ok(embedder)
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

fn print_profile(profile: &EntityProfile) {
    println!();
    println!("  {}", profile.wine);
    println!("  Region:     {}", profile.region);
    println!("  Grapes:     {}", profile.grape_varieties);
    println!("  Appearance: {}", profile.appearance);
    println!("  Nose:       {}", profile.nose_text());
    println!("  Palate:     {}", profile.palate_text());
    println!("  Aging:      {}", profile.aging);
    println!("  Price:      {}", profile.average_price);
    println!("  Analysis:   {}", profile.analysis);
}

fn print_score(score: &ScoreResult) {
    let criteria: Vec<String> = score.matched_criteria.iter().map(ToString::to_string).collect();
    println!();
    println!("  Quality:  {} ({}/4)", score.quality, score.score);
    if !criteria.is_empty() {
        println!("  Criteria: {}", criteria.join(", "));
    }
    if !score.clusters.is_empty() {
        println!("  Clusters: {}", score.clusters.join(", "));
    }
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);

        let spinner = ProgressBar::new_spinner();
        spinner.set_style(style);
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }
}

impl PipelineProgress for CliProgress {
    fn stage(&self, name: &str) {
        let message = match name {
            "search" => "Searching for reviews",
            "fetch" => "Fetching review pages",
            "summarize" => "Summarizing tasting notes",
            "merge" => "Merging references",
            other => other,
        };
        self.spinner.set_message(message.to_string());
    }

    fn done(&self, _aggregation: &Aggregation) {
        self.spinner.finish_and_clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_profile_command() {
        let cli = Cli::try_parse_from(["winelens", "-vv", "profile", "Opus One 2015", "--no-cache"])
            .unwrap();
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Command::Profile {
                name,
                exact,
                no_cache,
                json,
            } => {
                assert_eq!(name, "Opus One 2015");
                assert!(!exact);
                assert!(no_cache);
                assert!(!json);
            }
            _ => panic!("expected profile command"),
        }
    }

    #[test]
    fn parses_score_and_config_commands() {
        let cli = Cli::try_parse_from(["winelens", "score", "profile.json", "--json"]).unwrap();
        assert!(matches!(cli.command, Command::Score { json: true, .. }));

        let cli = Cli::try_parse_from(["winelens", "--log-format", "json", "config", "show"])
            .unwrap();
        assert!(matches!(cli.log_format, LogFormat::Json));
        assert!(matches!(
            cli.command,
            Command::Config {
                action: ConfigAction::Show
            }
        ));
    }

    #[test]
    fn exact_skips_query_parsing() {
        let cli = Cli::try_parse_from(["winelens", "profile", "D2 2022", "--exact"]).unwrap();
        assert!(matches!(cli.command, Command::Profile { exact: true, .. }));
    }

    #[test]
    fn profile_name_is_required() {
        assert!(Cli::try_parse_from(["winelens", "profile"]).is_err());
    }
}
