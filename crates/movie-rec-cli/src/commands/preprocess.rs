//! Ratings CSV → training corpus + vocabulary.

use std::collections::BTreeMap;
use std::fs::File;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use serde::Deserialize;
use tracing::info;

use movie_rec_engine::corpus::{self, InteractionEvent, SequenceSampleBuilder};
use movie_rec_engine::SamplerConfig;

/// Arguments for the preprocess command.
#[derive(Args)]
pub struct PreprocessArgs {
    /// Ratings CSV with userId,movieId,rating,timestamp columns
    #[arg(long)]
    pub ratings: PathBuf,

    /// Output path for the JSONL training corpus
    #[arg(long, default_value = "data/train.jsonl")]
    pub corpus_out: PathBuf,

    /// Output path for the vocabulary JSON
    #[arg(long, default_value = "data/vocab.json")]
    pub vocab_out: PathBuf,

    /// Minimum rating counted as a positive signal
    #[arg(long, default_value = "3.5")]
    pub rating_threshold: f32,

    /// Bounded sequence length L
    #[arg(long, default_value = "50")]
    pub max_seq_len: usize,

    /// Minimum positive events per user
    #[arg(long, default_value = "3")]
    pub min_history_len: usize,
}

#[derive(Deserialize)]
struct RatingRow {
    #[serde(rename = "userId")]
    user_id: i64,
    #[serde(rename = "movieId")]
    movie_id: i64,
    rating: f32,
    timestamp: i64,
}

pub fn run(args: PreprocessArgs) -> Result<()> {
    let file = File::open(&args.ratings)
        .with_context(|| format!("opening {}", args.ratings.display()))?;
    let mut reader = csv::Reader::from_reader(file);

    let mut events_by_user: BTreeMap<i64, Vec<InteractionEvent>> = BTreeMap::new();
    for row in reader.deserialize() {
        let row: RatingRow = row.context("malformed ratings row")?;
        events_by_user.entry(row.user_id).or_default().push(InteractionEvent {
            movie_id: row.movie_id,
            rating: row.rating,
            timestamp: row.timestamp,
        });
    }
    info!(users = events_by_user.len(), "loaded ratings");

    let builder = SequenceSampleBuilder::new(SamplerConfig {
        rating_threshold: args.rating_threshold,
        max_seq_len: args.max_seq_len,
        min_history_len: args.min_history_len,
    });
    let records = builder.build_corpus(&events_by_user);
    let vocab = corpus::build_vocabulary(&records);

    if let Some(parent) = args.corpus_out.parent() {
        std::fs::create_dir_all(parent)?;
    }
    if let Some(parent) = args.vocab_out.parent() {
        std::fs::create_dir_all(parent)?;
    }
    corpus::write_corpus(&args.corpus_out, &records)?;
    vocab.save(&args.vocab_out)?;

    info!(
        samples = records.len(),
        vocab_size = vocab.len(),
        corpus = %args.corpus_out.display(),
        vocab_path = %args.vocab_out.display(),
        "preprocessing complete"
    );
    Ok(())
}
