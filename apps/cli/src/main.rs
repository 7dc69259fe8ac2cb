//! WineLens CLI: wine profiles aggregated from published reviews.
//!
//! Searches the web for reviews of a wine, summarizes them into a tasting
//! profile and grades the profile with a deterministic rule engine.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
