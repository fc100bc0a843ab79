//! Train the model from a preprocessed corpus.

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use tracing::info;

use movie_rec_engine::corpus;
use movie_rec_engine::inference::select_device;
use movie_rec_engine::{ModelConfig, Trainer, TrainingConfig, Vocabulary};

/// Arguments for the train command.
#[derive(Args)]
pub struct TrainArgs {
    /// JSONL training corpus from `preprocess`
    #[arg(long, default_value = "data/train.jsonl")]
    pub corpus: PathBuf,

    /// Vocabulary JSON from `preprocess`
    #[arg(long, default_value = "data/vocab.json")]
    pub vocab: PathBuf,

    /// Directory receiving one checkpoint per epoch
    #[arg(long, default_value = "model_checkpoints")]
    pub checkpoint_dir: PathBuf,

    /// Embedding dimension
    #[arg(long, default_value = "128")]
    pub d_model: usize,

    /// Attention heads
    #[arg(long, default_value = "4")]
    pub n_heads: usize,

    /// Encoder layers
    #[arg(long, default_value = "2")]
    pub n_layers: usize,

    /// Bounded sequence length L; must match preprocessing
    #[arg(long, default_value = "50")]
    pub max_seq_len: usize,

    /// Samples per batch
    #[arg(long, default_value = "256")]
    pub batch_size: usize,

    /// Training epochs
    #[arg(long, default_value = "3")]
    pub epochs: usize,

    /// Sampled negatives per positive
    #[arg(long, default_value = "20")]
    pub negatives: usize,

    /// AdamW learning rate
    #[arg(long, default_value = "1e-3")]
    pub learning_rate: f64,

    /// Shuffle / negative-sampling seed
    #[arg(long, default_value = "42")]
    pub seed: u64,
}

pub fn run(args: TrainArgs) -> Result<()> {
    let vocab = Vocabulary::load(&args.vocab)?;
    let records = corpus::read_corpus(&args.corpus)?;
    let samples = corpus::index_corpus(&records, &vocab)?;
    info!(samples = samples.len(), vocab_size = vocab.len(), "corpus loaded");

    let model_config = ModelConfig {
        num_items: vocab.num_items(),
        d_model: args.d_model,
        n_heads: args.n_heads,
        n_layers: args.n_layers,
        max_seq_len: args.max_seq_len,
        pad_index: movie_rec_engine::PAD_INDEX,
    };
    let training = TrainingConfig {
        batch_size: args.batch_size,
        num_epochs: args.epochs,
        num_negatives: args.negatives,
        learning_rate: args.learning_rate,
        log_every: 100,
        seed: args.seed,
    };

    let mut trainer = Trainer::new(vocab, model_config, training, select_device())?;
    let summary = trainer.train(&samples, &args.checkpoint_dir)?;
    info!(
        steps = summary.steps,
        mean_loss = summary.mean_loss,
        skipped = summary.skipped_batches,
        "training finished"
    );
    Ok(())
}
