//! The embedding + attention-encoder + fusion scoring model.
//!
//! One shared item-embedding table serves sequence, taste and candidate
//! lookups. The two entry points are first-class and independently
//! callable: [`RecommenderModel::encode_user`] produces the fused user
//! embedding and [`RecommenderModel::score`] ranks candidates against it.
//! The training forward pass is exactly `score(encode_user(..), ..)`, so
//! serving reuses the training-time computation instead of replaying
//! model internals.

mod encoder;

pub use encoder::EncoderLayer;

use candle_core::{DType, Tensor};
use candle_nn::{embedding, linear, Embedding, Linear, Module, VarBuilder};

use crate::batch::Batch;
use crate::config::ModelConfig;
use crate::error::{RecError, RecResult};

/// Additive mask value for pad positions; large enough to zero their
/// attention weight after softmax without overflowing f32.
const MASK_NEG: f64 = 1e9;

/// Pure function from (sequence, taste, candidates) to scores.
pub struct RecommenderModel {
    item_embedding: Embedding,
    position_embedding: Embedding,
    layers: Vec<EncoderLayer>,
    user_proj: Linear,
    config: ModelConfig,
}

impl RecommenderModel {
    /// Build the model under `vb`. With a `VarMap`-backed builder this
    /// initializes fresh weights; with a tensor-backed builder it
    /// reconstructs a trained model.
    pub fn new(config: &ModelConfig, vb: VarBuilder) -> RecResult<Self> {
        config.validate()?;
        let item_embedding = embedding(config.num_items, config.d_model, vb.pp("item_embedding"))?;
        let position_embedding =
            embedding(config.max_seq_len, config.d_model, vb.pp("position_embedding"))?;
        let mut layers = Vec::with_capacity(config.n_layers);
        for i in 0..config.n_layers {
            layers.push(EncoderLayer::new(
                config.d_model,
                config.n_heads,
                vb.pp(format!("encoder.layer{i}")),
            )?);
        }
        let user_proj = linear(config.d_model, config.d_model, vb.pp("user_proj"))?;
        Ok(Self {
            item_embedding,
            position_embedding,
            layers,
            user_proj,
            config: config.clone(),
        })
    }

    /// Architecture this model was built with.
    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    /// The shared item-embedding table, `[num_items, d_model]`.
    pub fn item_embeddings(&self) -> &Tensor {
        self.item_embedding.embeddings()
    }

    /// Fuse short-term (encoded sequence) and long-term (pooled taste)
    /// representations into one user embedding.
    ///
    /// `sequence` is `[B, L]` left-padded item indices, `attention_mask`
    /// is `[B, L]` with 1 at real positions, `taste` is `[B, T]`
    /// right-padded indices. Returns `[B, d_model]`.
    ///
    /// The short-term vector is the encoder output at the last position,
    /// which is the most recent real item precisely because of the
    /// left-padding convention.
    pub fn encode_user(
        &self,
        sequence: &Tensor,
        attention_mask: &Tensor,
        taste: &Tensor,
    ) -> RecResult<Tensor> {
        let (b, l) = sequence.dims2()?;
        if l != self.config.max_seq_len {
            return Err(RecError::InvalidInput(format!(
                "sequence has {l} columns, model expects {}",
                self.config.max_seq_len
            )));
        }

        let seq_emb = self.item_embedding.forward(sequence)?;
        let pos_ids = Tensor::arange(0u32, l as u32, sequence.device())?;
        let pos_emb = self.position_embedding.forward(&pos_ids)?;
        let mut hidden = seq_emb.broadcast_add(&pos_emb)?;

        // 0 at real positions, -MASK_NEG at pad positions.
        let mask_add = attention_mask
            .to_dtype(DType::F32)?
            .affine(MASK_NEG, -MASK_NEG)?
            .reshape((b, 1, 1, l))?;
        for layer in &self.layers {
            hidden = layer.forward(&hidden, &mask_add)?;
        }
        let short_term = hidden.narrow(1, l - 1, 1)?.squeeze(1)?;

        let long_term = self.pool_taste(taste)?;
        let user = (short_term + long_term)?;
        Ok(self.user_proj.forward(&user)?)
    }

    /// Mean-pool taste embeddings over non-pad positions; rows whose
    /// taste is entirely padding pool to the zero vector.
    fn pool_taste(&self, taste: &Tensor) -> RecResult<Tensor> {
        let taste_emb = self.item_embedding.forward(taste)?;
        let mask = taste
            .ne(self.config.pad_index)?
            .to_dtype(DType::F32)?;
        let masked = taste_emb.broadcast_mul(&mask.unsqueeze(2)?)?;
        let sum = masked.sum(1)?;
        let count = mask.sum_keepdim(1)?.maximum(1f64)?;
        Ok(sum.broadcast_div(&count)?)
    }

    /// Inner-product scores of each candidate against its row's user
    /// embedding: `user_emb` is `[B, d_model]`, `candidates` is `[B, K]`,
    /// result is `[B, K]`.
    pub fn score(&self, user_emb: &Tensor, candidates: &Tensor) -> RecResult<Tensor> {
        let cand_emb = self.item_embedding.forward(candidates)?;
        let user = user_emb.unsqueeze(2)?;
        Ok(cand_emb.matmul(&user)?.squeeze(2)?)
    }

    /// Training forward pass over an assembled batch: `[B, 1 + K]` scores
    /// with the true target in column 0.
    pub fn forward(&self, batch: &Batch) -> RecResult<Tensor> {
        let user = self.encode_user(&batch.sequence, &batch.attention_mask, &batch.taste)?;
        self.score(&user, &batch.candidates)
    }
}
