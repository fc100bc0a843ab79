//! Post-norm transformer encoder layers with key-padding masking.
//!
//! Layout per layer: multi-head self-attention → residual + layer norm →
//! ReLU feed-forward of width `4 * d_model` → residual + layer norm.

use candle_core::{Tensor, D};
use candle_nn::ops::softmax;
use candle_nn::{layer_norm, linear, LayerNorm, LayerNormConfig, Linear, Module, VarBuilder};

use crate::error::RecResult;

/// Multi-head self-attention with an additive key-padding mask.
struct MultiHeadSelfAttention {
    q_proj: Linear,
    k_proj: Linear,
    v_proj: Linear,
    out_proj: Linear,
    n_heads: usize,
    head_dim: usize,
}

impl MultiHeadSelfAttention {
    fn new(d_model: usize, n_heads: usize, vb: VarBuilder) -> RecResult<Self> {
        Ok(Self {
            q_proj: linear(d_model, d_model, vb.pp("q_proj"))?,
            k_proj: linear(d_model, d_model, vb.pp("k_proj"))?,
            v_proj: linear(d_model, d_model, vb.pp("v_proj"))?,
            out_proj: linear(d_model, d_model, vb.pp("out_proj"))?,
            n_heads,
            head_dim: d_model / n_heads,
        })
    }

    /// `x` is `[B, L, D]`, `mask_add` is `[B, 1, 1, L]` with 0 at real
    /// positions and a large negative value at pad positions.
    fn forward(&self, x: &Tensor, mask_add: &Tensor) -> RecResult<Tensor> {
        let (b, l, d) = x.dims3()?;

        let split = |t: Tensor| -> RecResult<Tensor> {
            Ok(t.reshape((b, l, self.n_heads, self.head_dim))?
                .transpose(1, 2)?
                .contiguous()?)
        };
        let q = split(self.q_proj.forward(x)?)?;
        let k = split(self.k_proj.forward(x)?)?;
        let v = split(self.v_proj.forward(x)?)?;

        let scale = 1.0 / (self.head_dim as f64).sqrt();
        let scores = q
            .matmul(&k.transpose(2, 3)?.contiguous()?)?
            .affine(scale, 0.0)?;
        let scores = scores.broadcast_add(mask_add)?;
        let weights = softmax(&scores, D::Minus1)?;

        let context = weights
            .matmul(&v)?
            .transpose(1, 2)?
            .contiguous()?
            .reshape((b, l, d))?;
        Ok(self.out_proj.forward(&context)?)
    }
}

/// One encoder layer.
pub struct EncoderLayer {
    self_attn: MultiHeadSelfAttention,
    norm1: LayerNorm,
    ffn_w1: Linear,
    ffn_w2: Linear,
    norm2: LayerNorm,
}

impl EncoderLayer {
    /// Build one layer under the given variable path.
    pub fn new(d_model: usize, n_heads: usize, vb: VarBuilder) -> RecResult<Self> {
        let ln = LayerNormConfig::default();
        Ok(Self {
            self_attn: MultiHeadSelfAttention::new(d_model, n_heads, vb.pp("self_attn"))?,
            norm1: layer_norm(d_model, ln, vb.pp("norm1"))?,
            ffn_w1: linear(d_model, 4 * d_model, vb.pp("ffn.w1"))?,
            ffn_w2: linear(4 * d_model, d_model, vb.pp("ffn.w2"))?,
            norm2: layer_norm(d_model, ln, vb.pp("norm2"))?,
        })
    }

    /// Run one layer over `[B, L, D]` hidden states.
    pub fn forward(&self, x: &Tensor, mask_add: &Tensor) -> RecResult<Tensor> {
        let attn_out = self.self_attn.forward(x, mask_add)?;
        let x = self.norm1.forward(&(x + attn_out)?)?;
        let ffn_out = self.ffn_w2.forward(&self.ffn_w1.forward(&x)?.relu()?)?;
        Ok(self.norm2.forward(&(&x + ffn_out)?)?)
    }
}
