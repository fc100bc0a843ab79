//! Assembles indexed samples into fixed-shape training tensors.
//!
//! Sequences are left-padded so the most recent item is always the
//! rightmost column; the model's last-position readout depends on this
//! convention. Candidate matrices put the true target in column 0 and
//! sampled negatives in the remaining columns.

use candle_core::{Device, Tensor};
use rand::Rng;

use crate::config::ModelConfig;
use crate::corpus::Sample;
use crate::error::{RecError, RecResult};

/// Retries before a colliding negative falls back to the deterministic
/// alternate. Unbounded redraw would spin on tiny catalogs.
const MAX_NEGATIVE_RETRIES: usize = 16;

/// One self-contained training batch. No state is shared between batches.
#[derive(Debug)]
pub struct Batch {
    /// `[B, L]` item indices, left-padded with the pad index.
    pub sequence: Tensor,
    /// `[B, L]`, 1 where the token is a real item.
    pub attention_mask: Tensor,
    /// `[B, T_max]` taste indices, right-padded with the pad index.
    pub taste: Tensor,
    /// `[B, 1 + K]`; column 0 is the true target.
    pub candidates: Tensor,
    /// Number of rows B.
    pub batch_size: usize,
}

/// Pads and stacks samples, and injects sampled negatives.
#[derive(Debug, Clone)]
pub struct BatchAssembler {
    max_seq_len: usize,
    pad_index: u32,
    num_items: usize,
    num_negatives: usize,
}

impl BatchAssembler {
    /// Create an assembler for the given architecture.
    ///
    /// Fails when the catalog has fewer than two real items: no negative
    /// distinct from the target can exist.
    pub fn new(config: &ModelConfig, num_negatives: usize) -> RecResult<Self> {
        if config.num_items < 3 {
            return Err(RecError::InvalidInput(format!(
                "negative sampling needs at least 2 real items, catalog has {}",
                config.num_items.saturating_sub(1)
            )));
        }
        Ok(Self {
            max_seq_len: config.max_seq_len,
            pad_index: config.pad_index,
            num_items: config.num_items,
            num_negatives,
        })
    }

    /// Stack `samples` into one batch on `device`.
    pub fn assemble<R: Rng>(
        &self,
        samples: &[Sample],
        rng: &mut R,
        device: &Device,
    ) -> RecResult<Batch> {
        if samples.is_empty() {
            return Err(RecError::InvalidInput(
                "cannot assemble an empty batch".to_string(),
            ));
        }
        let b = samples.len();
        let l = self.max_seq_len;
        let t_max = samples.iter().map(|s| s.taste.len()).max().unwrap_or(0).max(1);
        let k = self.num_negatives + 1;

        let mut sequence = Vec::with_capacity(b * l);
        let mut mask = Vec::with_capacity(b * l);
        let mut taste = Vec::with_capacity(b * t_max);
        let mut candidates = Vec::with_capacity(b * k);

        for sample in samples {
            let seq = &sample.sequence[sample.sequence.len().saturating_sub(l)..];
            let pad = l - seq.len();
            sequence.extend(std::iter::repeat(self.pad_index).take(pad));
            sequence.extend_from_slice(seq);
            mask.extend(std::iter::repeat(0u32).take(pad));
            mask.extend(std::iter::repeat(1u32).take(seq.len()));

            taste.extend_from_slice(&sample.taste);
            taste.extend(std::iter::repeat(self.pad_index).take(t_max - sample.taste.len()));

            candidates.push(sample.target);
            for _ in 0..self.num_negatives {
                candidates.push(self.sample_negative(sample.target, rng));
            }
        }

        Ok(Batch {
            sequence: Tensor::from_vec(sequence, (b, l), device)?,
            attention_mask: Tensor::from_vec(mask, (b, l), device)?,
            taste: Tensor::from_vec(taste, (b, t_max), device)?,
            candidates: Tensor::from_vec(candidates, (b, k), device)?,
            batch_size: b,
        })
    }

    /// Draw a negative uniformly from the real item range, never equal to
    /// `target`. Bounded retries, then the next index modulo the catalog
    /// size, which is distinct from `target` by construction.
    fn sample_negative<R: Rng>(&self, target: u32, rng: &mut R) -> u32 {
        let num_real = (self.num_items - 1) as u32;
        for _ in 0..MAX_NEGATIVE_RETRIES {
            let draw = rng.gen_range(1..=num_real);
            if draw != target {
                return draw;
            }
        }
        (target % num_real) + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn assembler(num_items: usize, num_negatives: usize) -> BatchAssembler {
        let mut config = ModelConfig::new(num_items);
        config.max_seq_len = 4;
        BatchAssembler::new(&config, num_negatives).unwrap()
    }

    fn sample(sequence: Vec<u32>, target: u32, taste: Vec<u32>) -> Sample {
        Sample { sequence, target, taste }
    }

    #[test]
    fn sequences_are_left_padded_to_fixed_width() {
        let asm = assembler(10, 2);
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let batch = asm
            .assemble(&[sample(vec![3, 5], 7, vec![])], &mut rng, &Device::Cpu)
            .unwrap();
        let seq = batch.sequence.to_vec2::<u32>().unwrap();
        let mask = batch.attention_mask.to_vec2::<u32>().unwrap();
        assert_eq!(seq, vec![vec![0, 0, 3, 5]]);
        assert_eq!(mask, vec![vec![0, 0, 1, 1]]);
    }

    #[test]
    fn taste_is_right_padded_to_batch_max() {
        let asm = assembler(10, 1);
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let batch = asm
            .assemble(
                &[
                    sample(vec![1], 2, vec![8, 9]),
                    sample(vec![1], 3, vec![4]),
                ],
                &mut rng,
                &Device::Cpu,
            )
            .unwrap();
        let taste = batch.taste.to_vec2::<u32>().unwrap();
        assert_eq!(taste, vec![vec![8, 9], vec![4, 0]]);
    }

    #[test]
    fn empty_taste_yields_single_pad_column() {
        let asm = assembler(10, 1);
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let batch = asm
            .assemble(&[sample(vec![1], 2, vec![])], &mut rng, &Device::Cpu)
            .unwrap();
        assert_eq!(batch.taste.dims(), &[1, 1]);
    }

    #[test]
    fn candidate_column_zero_is_the_target() {
        let asm = assembler(50, 5);
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let samples: Vec<Sample> =
            (1..=8).map(|t| sample(vec![1, 2], t, vec![])).collect();
        let batch = asm.assemble(&samples, &mut rng, &Device::Cpu).unwrap();
        let cands = batch.candidates.to_vec2::<u32>().unwrap();
        for (row, s) in cands.iter().zip(&samples) {
            assert_eq!(row[0], s.target);
        }
    }

    #[test]
    fn negatives_never_collide_with_target() {
        // A 3-item catalog makes collisions frequent enough to exercise
        // both the resample path and the deterministic fallback.
        let asm = assembler(4, 10);
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        for target in 1..=3u32 {
            let batch = asm
                .assemble(&[sample(vec![1], target, vec![])], &mut rng, &Device::Cpu)
                .unwrap();
            let row = &batch.candidates.to_vec2::<u32>().unwrap()[0];
            for &neg in &row[1..] {
                assert_ne!(neg, target);
                assert_ne!(neg, 0);
                assert!(neg < 4);
            }
        }
    }

    #[test]
    fn two_item_catalog_always_picks_the_other_item() {
        let asm = assembler(3, 4);
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let batch = asm
            .assemble(&[sample(vec![1], 1, vec![])], &mut rng, &Device::Cpu)
            .unwrap();
        let row = &batch.candidates.to_vec2::<u32>().unwrap()[0];
        assert_eq!(&row[1..], &[2, 2, 2, 2]);
    }

    #[test]
    fn single_item_catalog_is_rejected() {
        let config = ModelConfig::new(2);
        assert!(matches!(
            BatchAssembler::new(&config, 1),
            Err(RecError::InvalidInput(_))
        ));
    }

    #[test]
    fn overlong_sequences_keep_the_most_recent_items() {
        let asm = assembler(10, 1);
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let batch = asm
            .assemble(
                &[sample(vec![1, 2, 3, 4, 5, 6], 7, vec![])],
                &mut rng,
                &Device::Cpu,
            )
            .unwrap();
        let seq = batch.sequence.to_vec2::<u32>().unwrap();
        assert_eq!(seq, vec![vec![3, 4, 5, 6]]);
    }
}
