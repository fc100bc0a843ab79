//! Command-line driver for the recommendation engine.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use commands::{preprocess, query, train};

/// Sequence recommendation engine tools.
#[derive(Parser)]
#[command(name = "movie-rec", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Turn a ratings CSV into a training corpus and vocabulary
    Preprocess(preprocess::PreprocessArgs),
    /// Train the model and write per-epoch checkpoints
    Train(train::TrainArgs),
    /// Rank the catalog against a watch history
    Recommend(query::RecommendArgs),
    /// Find items similar to a seed movie
    Similar(query::SimilarArgs),
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Preprocess(args) => preprocess::run(args),
        Commands::Train(args) => train::run(args),
        Commands::Recommend(args) => query::run_recommend(args),
        Commands::Similar(args) => query::run_similar(args),
    }
}
