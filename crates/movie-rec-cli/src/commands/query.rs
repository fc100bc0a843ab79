//! Serve one-off recommendation and similarity queries from a checkpoint.

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;

use movie_rec_engine::InferenceEngine;

/// Arguments for the recommend command.
#[derive(Args)]
pub struct RecommendArgs {
    /// Checkpoint file to serve from
    #[arg(long)]
    pub checkpoint: PathBuf,

    /// Chronological watch history as comma-separated movie ids
    #[arg(long, value_delimiter = ',')]
    pub history: Vec<i64>,

    /// Number of results
    #[arg(long, default_value = "20")]
    pub top_k: usize,
}

/// Arguments for the similar command.
#[derive(Args)]
pub struct SimilarArgs {
    /// Checkpoint file to serve from
    #[arg(long)]
    pub checkpoint: PathBuf,

    /// Seed movie id
    #[arg(long)]
    pub movie_id: i64,

    /// Number of results
    #[arg(long, default_value = "20")]
    pub top_k: usize,
}

pub fn run_recommend(args: RecommendArgs) -> Result<()> {
    let engine = InferenceEngine::load(&args.checkpoint)?;
    let recommendations = engine.recommend(&args.history, args.top_k)?;
    println!("{}", serde_json::to_string_pretty(&recommendations)?);
    Ok(())
}

pub fn run_similar(args: SimilarArgs) -> Result<()> {
    let engine = InferenceEngine::load(&args.checkpoint)?;
    let similar = engine.similar(args.movie_id, args.top_k)?;
    println!("{}", serde_json::to_string_pretty(&similar)?);
    Ok(())
}
