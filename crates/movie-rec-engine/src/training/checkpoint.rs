//! Self-contained checkpoint artifacts.
//!
//! A checkpoint alone is sufficient to reconstruct a working inference
//! engine: it carries the weight tensors, the full vocabulary, and the
//! architecture hyperparameters. Container layout: 4 magic bytes, a
//! version byte, a little-endian u64 metadata length, the JSON metadata
//! (hyperparameters + vocabulary), then a safetensors weight payload.
//! Checkpoints are immutable once written; the trainer emits one per
//! epoch.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use candle_core::{Device, Tensor};
use serde::{Deserialize, Serialize};

use crate::config::ModelConfig;
use crate::error::{RecError, RecResult};
use crate::vocab::{VocabFile, Vocabulary};

const CHECKPOINT_MAGIC: [u8; 4] = *b"MRCP";
const CHECKPOINT_VERSION: u8 = 1;
const HEADER_LEN: usize = CHECKPOINT_MAGIC.len() + 1 + 8;

#[derive(Serialize, Deserialize)]
struct CheckpointMeta {
    config: ModelConfig,
    vocab: VocabFile,
}

/// A loaded checkpoint, ready to back an inference engine.
pub struct Checkpoint {
    /// Architecture hyperparameters the weights were trained with.
    pub config: ModelConfig,
    /// The frozen training-time vocabulary.
    pub vocab: Vocabulary,
    /// Named weight tensors.
    pub tensors: HashMap<String, Tensor>,
}

/// Write a checkpoint file.
pub fn save(
    path: impl AsRef<Path>,
    tensors: &HashMap<String, Tensor>,
    vocab: &Vocabulary,
    config: &ModelConfig,
) -> RecResult<()> {
    let meta = CheckpointMeta {
        config: config.clone(),
        vocab: vocab.to_file_form(),
    };
    let meta_json = serde_json::to_vec(&meta)?;
    let weights = safetensors::serialize(tensors, &None)
        .map_err(|e| RecError::ModelLoad(format!("weight serialization failed: {e}")))?;

    let mut out = Vec::with_capacity(HEADER_LEN + meta_json.len() + weights.len());
    out.extend_from_slice(&CHECKPOINT_MAGIC);
    out.push(CHECKPOINT_VERSION);
    out.extend_from_slice(&(meta_json.len() as u64).to_le_bytes());
    out.extend_from_slice(&meta_json);
    out.extend_from_slice(&weights);
    fs::write(path, out)?;
    Ok(())
}

/// Read and validate a checkpoint file, placing tensors on `device`.
pub fn load(path: impl AsRef<Path>, device: &Device) -> RecResult<Checkpoint> {
    let path = path.as_ref();
    let bytes = fs::read(path)?;
    if bytes.len() < HEADER_LEN || bytes[..4] != CHECKPOINT_MAGIC {
        return Err(RecError::ModelLoad(format!(
            "{} is not a checkpoint file",
            path.display()
        )));
    }
    if bytes[4] != CHECKPOINT_VERSION {
        return Err(RecError::ModelLoad(format!(
            "unsupported checkpoint version {} (expected {CHECKPOINT_VERSION})",
            bytes[4]
        )));
    }
    let mut len_bytes = [0u8; 8];
    len_bytes.copy_from_slice(&bytes[5..HEADER_LEN]);
    let meta_len = u64::from_le_bytes(len_bytes) as usize;
    let weights_start = HEADER_LEN.checked_add(meta_len).ok_or_else(|| {
        RecError::ModelLoad(format!(
            "{} declares an impossible metadata length",
            path.display()
        ))
    })?;
    if bytes.len() < weights_start {
        return Err(RecError::ModelLoad(format!(
            "{} is truncated",
            path.display()
        )));
    }

    let meta: CheckpointMeta = serde_json::from_slice(&bytes[HEADER_LEN..weights_start])?;
    meta.config.validate()?;
    let vocab = Vocabulary::from_file_form(meta.vocab)?;
    if meta.config.num_items != vocab.num_items() {
        return Err(RecError::VocabMismatch(format!(
            "checkpoint declares {} items but its vocabulary holds {}",
            meta.config.num_items,
            vocab.num_items()
        )));
    }
    let tensors = candle_core::safetensors::load_buffer(&bytes[weights_start..], device)?;

    Ok(Checkpoint {
        config: meta.config,
        vocab,
        tensors,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::DType;

    fn fixture() -> (HashMap<String, Tensor>, Vocabulary, ModelConfig) {
        let device = Device::Cpu;
        let mut tensors = HashMap::new();
        tensors.insert(
            "item_embedding.weight".to_string(),
            Tensor::from_vec(
                (0..12).map(|i| i as f32).collect::<Vec<f32>>(),
                (4, 3),
                &device,
            )
            .unwrap(),
        );
        let vocab = Vocabulary::build(vec![10, 20, 30]);
        let mut config = ModelConfig::new(vocab.num_items());
        config.d_model = 3;
        config.n_heads = 1;
        (tensors, vocab, config)
    }

    #[test]
    fn round_trips_weights_vocab_and_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("epoch1.ckpt");
        let (tensors, vocab, config) = fixture();

        save(&path, &tensors, &vocab, &config).unwrap();
        let ckpt = load(&path, &Device::Cpu).unwrap();

        assert_eq!(ckpt.config, config);
        assert_eq!(ckpt.vocab.index_of(20), Some(2));
        let restored = ckpt.tensors["item_embedding.weight"]
            .to_vec2::<f32>()
            .unwrap();
        let original = tensors["item_embedding.weight"].to_vec2::<f32>().unwrap();
        assert_eq!(restored, original);
    }

    #[test]
    fn rejects_wrong_magic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bogus.ckpt");
        fs::write(&path, b"not a checkpoint at all").unwrap();
        assert!(matches!(
            load(&path, &Device::Cpu),
            Err(RecError::ModelLoad(_))
        ));
    }

    #[test]
    fn rejects_truncated_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cut.ckpt");
        let (tensors, vocab, config) = fixture();
        save(&path, &tensors, &vocab, &config).unwrap();
        let bytes = fs::read(&path).unwrap();
        fs::write(&path, &bytes[..HEADER_LEN + 4]).unwrap();
        assert!(load(&path, &Device::Cpu).is_err());
    }

    #[test]
    fn rejects_overflowing_metadata_length() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("overflow.ckpt");
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&CHECKPOINT_MAGIC);
        bytes.push(CHECKPOINT_VERSION);
        bytes.extend_from_slice(&u64::MAX.to_le_bytes());
        fs::write(&path, bytes).unwrap();
        assert!(matches!(
            load(&path, &Device::Cpu),
            Err(RecError::ModelLoad(_))
        ));
    }

    #[test]
    fn rejects_vocab_size_disagreement() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.ckpt");
        let (tensors, vocab, mut config) = fixture();
        config.num_items = 99;
        save(&path, &tensors, &vocab, &config).unwrap();
        assert!(matches!(
            load(&path, &Device::Cpu),
            Err(RecError::VocabMismatch(_))
        ));
    }

    #[test]
    fn loads_tensor_dtype_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dtype.ckpt");
        let (tensors, vocab, config) = fixture();
        save(&path, &tensors, &vocab, &config).unwrap();
        let ckpt = load(&path, &Device::Cpu).unwrap();
        assert_eq!(ckpt.tensors["item_embedding.weight"].dtype(), DType::F32);
    }
}
