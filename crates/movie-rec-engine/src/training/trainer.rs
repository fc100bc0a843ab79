//! Sampled-softmax retrieval training.
//!
//! Every candidate row puts the true target in column 0, so the loss is
//! cross-entropy against a fixed label of zero. One AdamW step per batch,
//! one immutable checkpoint per epoch.

use std::path::{Path, PathBuf};

use candle_core::{DType, Device, Tensor};
use candle_nn::{AdamW, Optimizer, ParamsAdamW, VarBuilder, VarMap};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::{info, warn};

use crate::batch::BatchAssembler;
use crate::config::{ModelConfig, TrainingConfig};
use crate::corpus::Sample;
use crate::error::{RecError, RecResult};
use crate::model::RecommenderModel;
use crate::training::checkpoint;
use crate::vocab::Vocabulary;

/// Outcome of a training run.
#[derive(Debug, Clone)]
pub struct TrainingSummary {
    /// Epochs completed.
    pub epochs: usize,
    /// Optimizer steps taken.
    pub steps: usize,
    /// Mean loss over all counted steps.
    pub mean_loss: f32,
    /// Batches skipped by the non-finite-loss guard.
    pub skipped_batches: usize,
    /// Checkpoint files written, one per epoch.
    pub checkpoints: Vec<PathBuf>,
}

/// Epoch loop driving assembler → model → loss → optimizer → checkpoint.
pub struct Trainer {
    model: RecommenderModel,
    varmap: VarMap,
    assembler: BatchAssembler,
    vocab: Vocabulary,
    model_config: ModelConfig,
    config: TrainingConfig,
    device: Device,
}

impl Trainer {
    /// Initialize a fresh model for the given vocabulary.
    pub fn new(
        vocab: Vocabulary,
        model_config: ModelConfig,
        config: TrainingConfig,
        device: Device,
    ) -> RecResult<Self> {
        model_config.validate()?;
        if model_config.num_items != vocab.num_items() {
            return Err(RecError::VocabMismatch(format!(
                "model expects {} items but vocabulary holds {}",
                model_config.num_items,
                vocab.num_items()
            )));
        }
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let model = RecommenderModel::new(&model_config, vb)?;
        let assembler = BatchAssembler::new(&model_config, config.num_negatives)?;
        let trainer = Self {
            model,
            varmap,
            assembler,
            vocab,
            model_config,
            config,
            device,
        };
        trainer.zero_pad_row()?;
        Ok(trainer)
    }

    /// The model being trained.
    pub fn model(&self) -> &RecommenderModel {
        &self.model
    }

    /// Run the full epoch loop over `samples`, writing one checkpoint per
    /// epoch into `checkpoint_dir`.
    pub fn train(&mut self, samples: &[Sample], checkpoint_dir: &Path) -> RecResult<TrainingSummary> {
        if samples.is_empty() {
            return Err(RecError::InvalidInput(
                "training corpus is empty".to_string(),
            ));
        }
        std::fs::create_dir_all(checkpoint_dir)?;

        let mut optimizer = AdamW::new(
            self.varmap.all_vars(),
            ParamsAdamW {
                lr: self.config.learning_rate,
                ..Default::default()
            },
        )?;
        let mut rng = ChaCha8Rng::seed_from_u64(self.config.seed);
        let mut order: Vec<usize> = (0..samples.len()).collect();

        let mut total_loss = 0f64;
        let mut steps = 0usize;
        let mut skipped = 0usize;
        let mut checkpoints = Vec::with_capacity(self.config.num_epochs);

        info!(
            samples = samples.len(),
            epochs = self.config.num_epochs,
            batch_size = self.config.batch_size,
            negatives = self.config.num_negatives,
            "starting training"
        );

        for epoch in 1..=self.config.num_epochs {
            order.shuffle(&mut rng);
            for chunk in order.chunks(self.config.batch_size) {
                let batch_samples: Vec<Sample> =
                    chunk.iter().map(|&i| samples[i].clone()).collect();
                let batch = self
                    .assembler
                    .assemble(&batch_samples, &mut rng, &self.device)?;

                let scores = self.model.forward(&batch)?;
                let labels = Tensor::zeros((batch.batch_size,), DType::U32, &self.device)?;
                let loss = candle_nn::loss::cross_entropy(&scores, &labels)?;

                let loss_value = loss.to_scalar::<f32>()?;
                if !loss_value.is_finite() {
                    // Stepping on a NaN/Inf loss would poison every weight
                    // and the next checkpoint with it.
                    warn!(epoch, loss = loss_value, "skipping batch with non-finite loss");
                    skipped += 1;
                    continue;
                }

                optimizer.backward_step(&loss)?;
                total_loss += f64::from(loss_value);
                steps += 1;
                if steps % self.config.log_every == 0 {
                    info!(
                        epoch,
                        step = steps,
                        loss = loss_value,
                        avg = (total_loss / steps as f64) as f32,
                        "training progress"
                    );
                }
            }

            self.zero_pad_row()?;
            let path = checkpoint_dir.join(format!("epoch{epoch}.ckpt"));
            checkpoint::save(&path, &self.export_tensors()?, &self.vocab, &self.model_config)?;
            info!(epoch, path = %path.display(), "saved checkpoint");
            checkpoints.push(path);
        }

        Ok(TrainingSummary {
            epochs: self.config.num_epochs,
            steps,
            mean_loss: if steps > 0 {
                (total_loss / steps as f64) as f32
            } else {
                0.0
            },
            skipped_batches: skipped,
            checkpoints,
        })
    }

    /// Snapshot all weight tensors by name.
    fn export_tensors(&self) -> RecResult<std::collections::HashMap<String, Tensor>> {
        let guard = self
            .varmap
            .data()
            .lock()
            .map_err(|_| RecError::ModelLoad("weight map lock poisoned".to_string()))?;
        Ok(guard
            .iter()
            .map(|(name, var)| (name.clone(), var.as_tensor().clone()))
            .collect())
    }

    /// Pin the pad row of the item-embedding table to the zero vector.
    ///
    /// Pad positions are masked out of every pooled or attended result,
    /// so the row receives no gradient; this keeps the stored table
    /// honest after random initialization and before every checkpoint.
    fn zero_pad_row(&self) -> RecResult<()> {
        let guard = self
            .varmap
            .data()
            .lock()
            .map_err(|_| RecError::ModelLoad("weight map lock poisoned".to_string()))?;
        if let Some(var) = guard.get("item_embedding.weight") {
            let weights = var.as_tensor();
            let (rows, _) = weights.dims2()?;
            let mut keep = vec![1f32; rows];
            keep[self.model_config.pad_index as usize] = 0.0;
            let keep = Tensor::from_vec(keep, (rows, 1), weights.device())?;
            var.set(&weights.broadcast_mul(&keep)?)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::Sample;

    fn tiny_setup() -> (Vocabulary, ModelConfig, TrainingConfig) {
        let vocab = Vocabulary::build(vec![10, 20, 30, 40]);
        let model_config = ModelConfig {
            num_items: vocab.num_items(),
            d_model: 8,
            n_heads: 2,
            n_layers: 1,
            max_seq_len: 4,
            pad_index: 0,
        };
        let config = TrainingConfig {
            batch_size: 4,
            num_epochs: 2,
            num_negatives: 2,
            learning_rate: 1e-2,
            log_every: 1000,
            seed: 11,
        };
        (vocab, model_config, config)
    }

    fn tiny_samples() -> Vec<Sample> {
        vec![
            Sample { sequence: vec![1], target: 2, taste: vec![] },
            Sample { sequence: vec![1, 2], target: 3, taste: vec![] },
            Sample { sequence: vec![2, 3], target: 4, taste: vec![1] },
            Sample { sequence: vec![1, 2, 3], target: 4, taste: vec![] },
        ]
    }

    #[test]
    fn trains_and_writes_one_checkpoint_per_epoch() {
        let dir = tempfile::tempdir().unwrap();
        let (vocab, model_config, config) = tiny_setup();
        let mut trainer = Trainer::new(vocab, model_config, config, Device::Cpu).unwrap();
        let summary = trainer.train(&tiny_samples(), dir.path()).unwrap();

        assert_eq!(summary.epochs, 2);
        assert_eq!(summary.checkpoints.len(), 2);
        assert_eq!(summary.skipped_batches, 0);
        assert!(summary.steps >= 2);
        assert!(summary.mean_loss.is_finite());
        for path in &summary.checkpoints {
            assert!(path.exists());
        }
    }

    #[test]
    fn pad_row_stays_zero_through_training() {
        let dir = tempfile::tempdir().unwrap();
        let (vocab, model_config, config) = tiny_setup();
        let mut trainer = Trainer::new(vocab, model_config, config, Device::Cpu).unwrap();
        trainer.train(&tiny_samples(), dir.path()).unwrap();

        let pad_row = trainer
            .model()
            .item_embeddings()
            .narrow(0, 0, 1)
            .unwrap()
            .to_vec2::<f32>()
            .unwrap();
        assert!(pad_row[0].iter().all(|&v| v == 0.0));
    }

    #[test]
    fn rejects_vocab_config_disagreement() {
        let (vocab, mut model_config, config) = tiny_setup();
        model_config.num_items = 17;
        assert!(matches!(
            Trainer::new(vocab, model_config, config, Device::Cpu),
            Err(RecError::VocabMismatch(_))
        ));
    }

    #[test]
    fn rejects_empty_corpus() {
        let dir = tempfile::tempdir().unwrap();
        let (vocab, model_config, config) = tiny_setup();
        let mut trainer = Trainer::new(vocab, model_config, config, Device::Cpu).unwrap();
        assert!(trainer.train(&[], dir.path()).is_err());
    }
}
