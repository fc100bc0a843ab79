//! Hyperparameter configuration for the model, the trainer and the
//! sample builder.

use serde::{Deserialize, Serialize};

use crate::error::{RecError, RecResult};

/// Reserved index denoting "no item". Never assigned to a real item.
pub const PAD_INDEX: u32 = 0;

/// Default bounded sequence length L.
pub const DEFAULT_MAX_SEQ_LEN: usize = 50;

/// Architecture hyperparameters.
///
/// Persisted inside every checkpoint so that a serving process can
/// reconstruct the exact training-time model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Size of the item embedding table, including the pad row
    /// (vocabulary size + 1).
    pub num_items: usize,
    /// Embedding dimension.
    pub d_model: usize,
    /// Attention heads per encoder layer.
    pub n_heads: usize,
    /// Number of encoder layers.
    pub n_layers: usize,
    /// Bounded sequence length L.
    pub max_seq_len: usize,
    /// Reserved padding index.
    pub pad_index: u32,
}

impl ModelConfig {
    /// Default architecture for a catalog of `num_items` (vocab size + 1).
    pub fn new(num_items: usize) -> Self {
        Self {
            num_items,
            d_model: 128,
            n_heads: 4,
            n_layers: 2,
            max_seq_len: DEFAULT_MAX_SEQ_LEN,
            pad_index: PAD_INDEX,
        }
    }

    /// Check internal consistency.
    pub fn validate(&self) -> RecResult<()> {
        if self.d_model == 0 || self.n_heads == 0 || self.n_layers == 0 {
            return Err(RecError::InvalidInput(
                "d_model, n_heads and n_layers must be non-zero".to_string(),
            ));
        }
        if self.d_model % self.n_heads != 0 {
            return Err(RecError::InvalidInput(format!(
                "d_model {} is not divisible by n_heads {}",
                self.d_model, self.n_heads
            )));
        }
        if self.max_seq_len == 0 {
            return Err(RecError::InvalidInput(
                "max_seq_len must be at least 1".to_string(),
            ));
        }
        if self.pad_index != PAD_INDEX {
            return Err(RecError::InvalidInput(format!(
                "pad_index must be {PAD_INDEX}, got {}",
                self.pad_index
            )));
        }
        if self.num_items < 2 {
            return Err(RecError::InvalidInput(format!(
                "num_items must cover at least one real item, got {}",
                self.num_items
            )));
        }
        Ok(())
    }
}

/// Training loop hyperparameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingConfig {
    /// Samples per batch.
    pub batch_size: usize,
    /// Full passes over the corpus; one checkpoint per epoch.
    pub num_epochs: usize,
    /// Sampled negatives per positive.
    pub num_negatives: usize,
    /// AdamW learning rate.
    pub learning_rate: f64,
    /// Emit a progress line every this many optimizer steps.
    pub log_every: usize,
    /// Seed for shuffling and negative sampling.
    pub seed: u64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            batch_size: 256,
            num_epochs: 3,
            num_negatives: 20,
            learning_rate: 1e-3,
            log_every: 100,
            seed: 42,
        }
    }
}

/// Sample-generation parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamplerConfig {
    /// Ratings below this are dropped as non-positive signals.
    pub rating_threshold: f32,
    /// Bounded sequence length L; must match the model's `max_seq_len`.
    pub max_seq_len: usize,
    /// Users with fewer positive events than this are skipped entirely.
    pub min_history_len: usize,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            rating_threshold: 3.5,
            max_seq_len: DEFAULT_MAX_SEQ_LEN,
            min_history_len: 3,
        }
    }
}
