//! Training-sample generation from chronological interaction history.
//!
//! Each user's positive events are split into an unbounded, order-
//! insensitive `taste` prefix and a bounded `recent` window of the last
//! `L + 1` items. Sliding windows over `recent` produce one sample per
//! target position, so a single pass over a user yields progressively
//! longer contexts and dense supervision.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::SamplerConfig;
use crate::error::{RecError, RecResult};
use crate::vocab::Vocabulary;

/// One user interaction as ingested from the ratings source.
#[derive(Debug, Clone, Deserialize)]
pub struct InteractionEvent {
    /// Raw movie id.
    pub movie_id: i64,
    /// Rating given; only values at or above the sampler threshold count
    /// as positive signals.
    pub rating: f32,
    /// Event time, used only for chronological ordering.
    pub timestamp: i64,
}

/// One training sample in raw-id form, as stored in the JSONL corpus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SampleRecord {
    /// Owning user.
    pub user_id: i64,
    /// Chronological prefix, most recent last, at most L items.
    pub sequence: Vec<i64>,
    /// The next item the user engaged with.
    pub target: i64,
    /// Older history, order-insensitive, attached unchanged to every
    /// sample of the user.
    pub taste: Vec<i64>,
}

/// A sample mapped through the vocabulary into dense indices.
#[derive(Debug, Clone)]
pub struct Sample {
    /// Prefix indices, most recent last.
    pub sequence: Vec<u32>,
    /// Target index.
    pub target: u32,
    /// Taste indices.
    pub taste: Vec<u32>,
}

/// Turns per-user event lists into sliding-window training samples.
#[derive(Debug, Clone)]
pub struct SequenceSampleBuilder {
    config: SamplerConfig,
}

impl SequenceSampleBuilder {
    /// Create a builder with the given sampling parameters.
    pub fn new(config: SamplerConfig) -> Self {
        Self { config }
    }

    /// Generate all samples for one user.
    ///
    /// Events are filtered to positive signals and ordered
    /// chronologically; users with fewer than `min_history_len` positive
    /// events are skipped entirely.
    pub fn user_samples(&self, user_id: i64, events: &[InteractionEvent]) -> Vec<SampleRecord> {
        let mut positives: Vec<&InteractionEvent> = events
            .iter()
            .filter(|e| e.rating >= self.config.rating_threshold)
            .collect();
        positives.sort_by_key(|e| e.timestamp);
        let history: Vec<i64> = positives.iter().map(|e| e.movie_id).collect();

        if history.len() < self.config.min_history_len {
            return Vec::new();
        }

        let l = self.config.max_seq_len;
        let (taste, recent) = if history.len() > l + 1 {
            history.split_at(history.len() - (l + 1))
        } else {
            (&history[..0], &history[..])
        };

        let mut samples = Vec::with_capacity(recent.len().saturating_sub(1));
        for target_pos in 1..recent.len() {
            let prefix = &recent[..target_pos];
            let prefix = &prefix[prefix.len().saturating_sub(l)..];
            if prefix.is_empty() {
                continue;
            }
            samples.push(SampleRecord {
                user_id,
                sequence: prefix.to_vec(),
                target: recent[target_pos],
                taste: taste.to_vec(),
            });
        }
        samples
    }

    /// Generate the full corpus from per-user event lists, in ascending
    /// user order for deterministic output.
    pub fn build_corpus(
        &self,
        events_by_user: &BTreeMap<i64, Vec<InteractionEvent>>,
    ) -> Vec<SampleRecord> {
        let mut records = Vec::new();
        let mut skipped_users = 0usize;
        for (&user_id, events) in events_by_user {
            let samples = self.user_samples(user_id, events);
            if samples.is_empty() {
                skipped_users += 1;
            }
            records.extend(samples);
        }
        info!(
            users = events_by_user.len(),
            skipped_users,
            samples = records.len(),
            "built training corpus"
        );
        records
    }
}

/// Build the vocabulary over every id appearing in any generated sample
/// (sequence, target, or taste positions).
pub fn build_vocabulary(records: &[SampleRecord]) -> Vocabulary {
    Vocabulary::build(records.iter().flat_map(|r| {
        r.sequence
            .iter()
            .chain(std::iter::once(&r.target))
            .chain(r.taste.iter())
            .copied()
    }))
}

/// Write the corpus as newline-delimited JSON.
pub fn write_corpus(path: impl AsRef<Path>, records: &[SampleRecord]) -> RecResult<()> {
    let mut out = BufWriter::new(File::create(path)?);
    for record in records {
        serde_json::to_writer(&mut out, record)?;
        out.write_all(b"\n")?;
    }
    out.flush()?;
    Ok(())
}

/// Read a newline-delimited JSON corpus.
pub fn read_corpus(path: impl AsRef<Path>) -> RecResult<Vec<SampleRecord>> {
    let reader = BufReader::new(File::open(path)?);
    let mut records = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        records.push(serde_json::from_str(&line)?);
    }
    Ok(records)
}

impl SampleRecord {
    /// Map raw ids through the vocabulary.
    ///
    /// The vocabulary is built from the corpus, so every id must resolve;
    /// an unknown target means the caller paired the corpus with a
    /// foreign vocabulary and rankings would be meaningless.
    pub fn index(&self, vocab: &Vocabulary) -> RecResult<Sample> {
        let target = vocab.index_of(self.target).ok_or_else(|| {
            RecError::VocabMismatch(format!(
                "target movie {} is absent from the vocabulary",
                self.target
            ))
        })?;
        let sequence = vocab.map_ids(&self.sequence);
        if sequence.is_empty() {
            return Err(RecError::VocabMismatch(format!(
                "sample for user {} has no vocabularized sequence items",
                self.user_id
            )));
        }
        Ok(Sample {
            sequence,
            target,
            taste: vocab.map_ids(&self.taste),
        })
    }
}

/// Index a whole corpus against the vocabulary.
pub fn index_corpus(records: &[SampleRecord], vocab: &Vocabulary) -> RecResult<Vec<Sample>> {
    records.iter().map(|r| r.index(vocab)).collect()
}
