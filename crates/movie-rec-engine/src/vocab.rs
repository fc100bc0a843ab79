//! Bidirectional mapping between raw movie ids and dense training indices.
//!
//! Index 0 is permanently reserved for padding; real items occupy the
//! contiguous range `1..=len`. The vocabulary is built once from the
//! training corpus and frozen afterwards: it is the sole bridge between
//! training-time and serving-time representations, so training and
//! inference must load byte-identical vocabulary state.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::config::PAD_INDEX;
use crate::error::{RecError, RecResult};

/// On-disk form of the vocabulary (JSON artifact and checkpoint metadata).
///
/// Keys are strings on both sides because the artifact is shared with
/// non-Rust consumers that only have string map keys.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VocabFile {
    /// Raw movie id (as string) → dense index.
    pub movie_id_to_index: BTreeMap<String, u32>,
    /// Dense index (as string) → raw movie id.
    pub index_to_movie_id: BTreeMap<String, i64>,
    /// Always 0.
    pub pad_index: u32,
}

/// Frozen id ↔ index mapping.
#[derive(Debug, Clone)]
pub struct Vocabulary {
    id_to_index: HashMap<i64, u32>,
    /// Slot `i` holds the raw id assigned to index `i + 1`.
    index_to_id: Vec<i64>,
}

impl Vocabulary {
    /// Build from the multiset of item ids appearing in the training
    /// corpus. Ids are deduplicated, sorted, and assigned ascending
    /// indices starting at 1.
    pub fn build(ids: impl IntoIterator<Item = i64>) -> Self {
        let unique: BTreeSet<i64> = ids.into_iter().collect();
        let index_to_id: Vec<i64> = unique.into_iter().collect();
        let id_to_index = index_to_id
            .iter()
            .enumerate()
            .map(|(i, &id)| (id, (i + 1) as u32))
            .collect();
        Self {
            id_to_index,
            index_to_id,
        }
    }

    /// Number of real items (excluding the pad slot).
    pub fn len(&self) -> usize {
        self.index_to_id.len()
    }

    /// True when no real items are mapped.
    pub fn is_empty(&self) -> bool {
        self.index_to_id.is_empty()
    }

    /// Size of the embedding table this vocabulary requires: real items
    /// plus the pad row.
    pub fn num_items(&self) -> usize {
        self.len() + 1
    }

    /// Dense index for a raw id, or `None` if the id was never seen.
    /// Never invents an index.
    pub fn index_of(&self, movie_id: i64) -> Option<u32> {
        self.id_to_index.get(&movie_id).copied()
    }

    /// Raw id for a dense index. `None` for the pad index and anything
    /// out of range.
    pub fn id_of(&self, index: u32) -> Option<i64> {
        if index == PAD_INDEX {
            return None;
        }
        self.index_to_id.get(index as usize - 1).copied()
    }

    /// Map raw ids to indices, silently dropping ids absent from the
    /// vocabulary.
    pub fn map_ids(&self, movie_ids: &[i64]) -> Vec<u32> {
        movie_ids
            .iter()
            .filter_map(|&id| self.index_of(id))
            .collect()
    }

    /// Convert to the on-disk form.
    pub fn to_file_form(&self) -> VocabFile {
        let movie_id_to_index = self
            .id_to_index
            .iter()
            .map(|(&id, &idx)| (id.to_string(), idx))
            .collect();
        let index_to_movie_id = self
            .index_to_id
            .iter()
            .enumerate()
            .map(|(i, &id)| (((i + 1) as u32).to_string(), id))
            .collect();
        VocabFile {
            movie_id_to_index,
            index_to_movie_id,
            pad_index: PAD_INDEX,
        }
    }

    /// Reconstruct from the on-disk form, validating structural integrity.
    ///
    /// A vocabulary that disagrees with itself would silently mis-index
    /// every lookup, so any inconsistency is a hard `VocabMismatch`.
    pub fn from_file_form(file: VocabFile) -> RecResult<Self> {
        if file.pad_index != PAD_INDEX {
            return Err(RecError::VocabMismatch(format!(
                "pad_index must be {PAD_INDEX}, got {}",
                file.pad_index
            )));
        }
        let len = file.movie_id_to_index.len();
        if file.index_to_movie_id.len() != len {
            return Err(RecError::VocabMismatch(format!(
                "forward map has {len} entries but inverse map has {}",
                file.index_to_movie_id.len()
            )));
        }

        let mut index_to_id = vec![0i64; len];
        let mut assigned = vec![false; len];
        let mut id_to_index = HashMap::with_capacity(len);
        for (id_str, idx) in &file.movie_id_to_index {
            let id: i64 = id_str.parse().map_err(|_| {
                RecError::VocabMismatch(format!("non-numeric movie id {id_str:?}"))
            })?;
            if *idx == PAD_INDEX || *idx as usize > len {
                return Err(RecError::VocabMismatch(format!(
                    "index {idx} for movie {id} is outside the contiguous range 1..={len}"
                )));
            }
            let slot = *idx as usize - 1;
            if assigned[slot] {
                return Err(RecError::VocabMismatch(format!(
                    "index {idx} is assigned to more than one movie id"
                )));
            }
            assigned[slot] = true;
            index_to_id[slot] = id;
            id_to_index.insert(id, *idx);
        }
        for (idx_str, id) in &file.index_to_movie_id {
            let idx: u32 = idx_str.parse().map_err(|_| {
                RecError::VocabMismatch(format!("non-numeric index {idx_str:?}"))
            })?;
            if idx == PAD_INDEX
                || idx as usize > len
                || index_to_id[idx as usize - 1] != *id
            {
                return Err(RecError::VocabMismatch(format!(
                    "inverse map disagrees with forward map at index {idx}"
                )));
            }
        }

        Ok(Self {
            id_to_index,
            index_to_id,
        })
    }

    /// Write the JSON artifact.
    pub fn save(&self, path: impl AsRef<Path>) -> RecResult<()> {
        let json = serde_json::to_string(&self.to_file_form())?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Load and validate the JSON artifact.
    pub fn load(path: impl AsRef<Path>) -> RecResult<Self> {
        let raw = fs::read_to_string(path)?;
        let file: VocabFile = serde_json::from_str(&raw)?;
        Self::from_file_form(file)
    }
}
