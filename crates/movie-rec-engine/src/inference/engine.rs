//! Checkpoint-backed serving: top-K recommendation, item similarity,
//! batch recommendation and cached user-embedding extraction.

use std::collections::HashMap;
use std::path::Path;

use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::cache::{self, EmbeddingCache, UserEmbeddingEntry};
use crate::config::ModelConfig;
use crate::error::{RecError, RecResult};
use crate::model::RecommenderModel;
use crate::training::checkpoint::{self, Checkpoint};
use crate::vocab::Vocabulary;

/// One ranked recommendation.
#[derive(Debug, Clone, Serialize)]
pub struct Recommendation {
    /// Raw movie id.
    pub movie_id: i64,
    /// Inner-product score; rows are ordered by descending score.
    pub score: f32,
}

/// One item-similarity result.
#[derive(Debug, Clone, Serialize)]
pub struct SimilarItem {
    /// Raw movie id.
    pub movie_id: i64,
    /// Cosine similarity against the seed item.
    pub similarity: f32,
}

/// Result of a batch recommendation call. Per-user failures are isolated
/// into `failed_users`; they never abort the batch.
#[derive(Debug, Clone, Serialize)]
pub struct BatchRecommendation {
    /// Successful per-user rankings.
    pub results: HashMap<String, Vec<Recommendation>>,
    /// Users submitted.
    pub total_users: usize,
    /// Users that received recommendations.
    pub success_count: usize,
    /// Users whose history was empty or fully unknown.
    pub failed_users: Vec<String>,
}

/// Pick the fastest available compute backend: accelerated parallel,
/// then generic parallel, then the sequential CPU fallback.
pub fn select_device() -> Device {
    if let Ok(device) = Device::new_cuda(0) {
        return device;
    }
    if let Ok(device) = Device::new_metal(0) {
        return device;
    }
    Device::Cpu
}

/// Serving engine reconstructed from a checkpoint.
///
/// An explicitly constructed value owned by the caller: weights and
/// vocabulary are read-only after load, so sharing a reference across
/// concurrent requests is safe and no request can mutate model state.
pub struct InferenceEngine {
    model: RecommenderModel,
    vocab: Vocabulary,
    config: ModelConfig,
    device: Device,
}

impl InferenceEngine {
    /// Load a checkpoint from disk on the preferred device.
    pub fn load(path: impl AsRef<Path>) -> RecResult<Self> {
        let device = select_device();
        let ckpt = checkpoint::load(path, &device)?;
        Self::from_checkpoint(ckpt, device)
    }

    /// Reconstruct the model from a loaded checkpoint.
    pub fn from_checkpoint(ckpt: Checkpoint, device: Device) -> RecResult<Self> {
        ckpt.config.validate()?;
        if ckpt.config.num_items != ckpt.vocab.num_items() {
            return Err(RecError::VocabMismatch(format!(
                "checkpoint declares {} items but its vocabulary holds {}",
                ckpt.config.num_items,
                ckpt.vocab.num_items()
            )));
        }
        let vb = VarBuilder::from_tensors(ckpt.tensors, DType::F32, &device);
        let model = RecommenderModel::new(&ckpt.config, vb)
            .map_err(|e| RecError::ModelLoad(e.to_string()))?;
        info!(
            num_items = ckpt.config.num_items,
            d_model = ckpt.config.d_model,
            device = ?device,
            "inference engine ready"
        );
        Ok(Self {
            model,
            vocab: ckpt.vocab,
            config: ckpt.config,
            device,
        })
    }

    /// The frozen vocabulary the engine serves with.
    pub fn vocab(&self) -> &Vocabulary {
        &self.vocab
    }

    /// Map raw ids to indices, dropping unknown ids.
    fn map_history(&self, history: &[i64]) -> Vec<u32> {
        let mapped = self.vocab.map_ids(history);
        if mapped.len() < history.len() {
            debug!(
                submitted = history.len(),
                known = mapped.len(),
                "dropped unknown movie ids from history"
            );
        }
        mapped
    }

    /// Split a mapped history into (taste, sequence) with the training
    /// `L + 1` rule: the recent window keeps the last `L + 1` items and
    /// the sequence is its prefix, mirroring the sample layout the model
    /// was trained on. A history too short to leave a non-empty prefix
    /// is used whole, since an all-pad sequence would poison the masked
    /// softmax.
    fn split_history<'a>(&self, indices: &'a [u32]) -> (&'a [u32], &'a [u32]) {
        let l = self.config.max_seq_len;
        let (taste, recent) = if indices.len() > l + 1 {
            indices.split_at(indices.len() - (l + 1))
        } else {
            (&indices[..0], indices)
        };
        let sequence = if recent.len() > 1 {
            &recent[..recent.len() - 1]
        } else {
            recent
        };
        let sequence = &sequence[sequence.len().saturating_sub(l)..];
        (taste, sequence)
    }

    /// Compute the fused user embedding tensor `[d_model]`.
    fn encode_history(&self, history: &[i64]) -> RecResult<Tensor> {
        let indices = self.map_history(history);
        if indices.is_empty() {
            return Err(RecError::EmptyHistory);
        }
        let (taste, sequence) = self.split_history(&indices);

        let l = self.config.max_seq_len;
        let pad = l - sequence.len();
        let mut seq_row = vec![self.config.pad_index; pad];
        seq_row.extend_from_slice(sequence);
        let mut mask_row = vec![0u32; pad];
        mask_row.extend(std::iter::repeat(1u32).take(sequence.len()));

        let taste_row = if taste.is_empty() {
            vec![self.config.pad_index]
        } else {
            taste.to_vec()
        };
        let taste_len = taste_row.len();

        let sequence = Tensor::from_vec(seq_row, (1, l), &self.device)?;
        let mask = Tensor::from_vec(mask_row, (1, l), &self.device)?;
        let taste = Tensor::from_vec(taste_row, (1, taste_len), &self.device)?;

        let user = self.model.encode_user(&sequence, &mask, &taste)?;
        Ok(user.squeeze(0)?)
    }

    /// The fused user embedding for a raw-id history.
    pub fn user_embedding(&self, history: &[i64]) -> RecResult<Vec<f32>> {
        Ok(self.encode_history(history)?.to_vec1()?)
    }

    /// Rank the whole catalog against the user's history and return the
    /// top `top_k` by descending score, ties broken by ascending raw id.
    pub fn recommend(&self, history: &[i64], top_k: usize) -> RecResult<Vec<Recommendation>> {
        let user = self.encode_history(history)?;

        // Score every real item: rows 1.. of the embedding table.
        let table = self.model.item_embeddings();
        let real = table.narrow(0, 1, self.config.num_items - 1)?;
        let scores = real
            .matmul(&user.unsqueeze(1)?)?
            .squeeze(1)?
            .to_vec1::<f32>()?;

        let mut ranked: Vec<Recommendation> = scores
            .iter()
            .enumerate()
            .filter_map(|(i, &score)| {
                self.vocab
                    .id_of((i + 1) as u32)
                    .map(|movie_id| Recommendation { movie_id, score })
            })
            .collect();
        ranked.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then(a.movie_id.cmp(&b.movie_id))
        });
        ranked.truncate(top_k);
        Ok(ranked)
    }

    /// Items closest to `movie_id` by cosine similarity of their
    /// embeddings, seed excluded, ties broken by ascending raw id.
    pub fn similar(&self, movie_id: i64, top_k: usize) -> RecResult<Vec<SimilarItem>> {
        let seed_idx = self
            .vocab
            .index_of(movie_id)
            .ok_or(RecError::SeedNotFound { movie_id })? as usize;

        let table = self.model.item_embeddings();
        // The pad row is all zeros; the floor keeps its norm away from a
        // divide-by-zero without disturbing real rows.
        let norms = table.sqr()?.sum_keepdim(1)?.sqrt()?.maximum(1e-12)?;
        let unit = table.broadcast_div(&norms)?;
        let seed = unit.narrow(0, seed_idx, 1)?.squeeze(0)?;
        let mut sims = unit
            .matmul(&seed.unsqueeze(1)?)?
            .squeeze(1)?
            .to_vec1::<f32>()?;
        // Keep the seed's row in place for index alignment, but make it
        // unrankable.
        sims[seed_idx] = f32::NEG_INFINITY;

        let mut ranked: Vec<SimilarItem> = sims
            .iter()
            .enumerate()
            .skip(1) // pad row
            .filter(|&(i, _)| i != seed_idx)
            .filter_map(|(i, &similarity)| {
                self.vocab
                    .id_of(i as u32)
                    .map(|movie_id| SimilarItem { movie_id, similarity })
            })
            .collect();
        ranked.sort_by(|a, b| {
            b.similarity
                .total_cmp(&a.similarity)
                .then(a.movie_id.cmp(&b.movie_id))
        });
        ranked.truncate(top_k);
        Ok(ranked)
    }

    /// Recommend for many users at once with isolated failure domains:
    /// a user with an empty or fully-unknown history lands in
    /// `failed_users` and the rest of the batch proceeds.
    pub fn batch_recommend(
        &self,
        histories: &HashMap<String, Vec<i64>>,
        top_k: usize,
    ) -> BatchRecommendation {
        let mut results = HashMap::new();
        let mut failed_users = Vec::new();

        let mut user_ids: Vec<&String> = histories.keys().collect();
        user_ids.sort();
        for user_id in user_ids {
            match self.recommend(&histories[user_id], top_k) {
                Ok(recs) => {
                    results.insert(user_id.clone(), recs);
                }
                Err(e) => {
                    warn!(user_id = %user_id, error = %e, "batch recommendation failed for user");
                    failed_users.push(user_id.clone());
                }
            }
        }

        BatchRecommendation {
            total_users: histories.len(),
            success_count: results.len(),
            results,
            failed_users,
        }
    }

    /// Cache-first user embedding: any cache error degrades to direct
    /// computation, and a miss populates the cache best-effort.
    pub fn cached_user_embedding(
        &self,
        cache: &dyn EmbeddingCache,
        user_id: &str,
        history: &[i64],
    ) -> RecResult<Vec<f32>> {
        let key = cache::user_embedding_key(user_id);
        match cache.get(&key) {
            Ok(Some(raw)) => match serde_json::from_str::<UserEmbeddingEntry>(&raw) {
                Ok(entry) => return Ok(entry.vector),
                Err(e) => warn!(user_id, error = %e, "discarding undecodable cache entry"),
            },
            Ok(None) => {}
            Err(e) => warn!(user_id, error = %e, "cache read failed, computing directly"),
        }

        let entry = self.build_cache_entry(history)?;
        let vector = entry.vector.clone();
        match serde_json::to_string(&entry) {
            Ok(json) => {
                if let Err(e) = cache.set(&key, &json, cache::DEFAULT_TTL) {
                    warn!(user_id, error = %e, "cache write failed");
                }
            }
            Err(e) => warn!(user_id, error = %e, "cache entry serialization failed"),
        }
        Ok(vector)
    }

    /// Recompute a user's embedding from their full updated history and
    /// overwrite the cache entry. Called when an interaction completes;
    /// freshness comes from full recomputation, not incremental updates.
    /// A cache write failure is logged, not surfaced: the cache is an
    /// accelerator, not a source of truth.
    pub fn refresh_user_embedding(
        &self,
        cache: &dyn EmbeddingCache,
        user_id: &str,
        history: &[i64],
    ) -> RecResult<()> {
        let entry = self.build_cache_entry(history)?;
        let json = serde_json::to_string(&entry)?;
        if let Err(e) = cache.set(&cache::user_embedding_key(user_id), &json, cache::DEFAULT_TTL) {
            warn!(user_id, error = %e, "cache refresh failed");
        }
        Ok(())
    }

    fn build_cache_entry(&self, history: &[i64]) -> RecResult<UserEmbeddingEntry> {
        let indices = self.map_history(history);
        if indices.is_empty() {
            return Err(RecError::EmptyHistory);
        }
        let (taste, sequence) = self.split_history(&indices);
        let to_ids = |idxs: &[u32]| -> Vec<i64> {
            idxs.iter().filter_map(|&i| self.vocab.id_of(i)).collect()
        };
        Ok(UserEmbeddingEntry {
            sequence_ids: to_ids(sequence),
            taste_ids: to_ids(taste),
            vector: self.user_embedding(history)?,
        })
    }
}
