//! Sequence recommendation engine.
//!
//! Learns dense user and item embeddings from chronological interaction
//! history and scores candidates by inner product. The pipeline:
//!
//! - [`vocab::Vocabulary`]: raw movie ids ↔ dense training indices
//! - [`corpus::SequenceSampleBuilder`]: events → sliding-window samples
//! - [`batch::BatchAssembler`]: samples → padded tensors with sampled
//!   negatives
//! - [`model::RecommenderModel`]: embedding + attention encoder + fusion;
//!   `encode_user` and `score` are independent first-class operations
//! - [`training::Trainer`]: sampled-softmax epoch loop, one checkpoint
//!   per epoch
//! - [`inference::InferenceEngine`]: recommend / similar /
//!   batch-recommend over a loaded checkpoint
//! - [`cache::EmbeddingCache`]: optional accelerator for user embeddings;
//!   never a source of truth
//!
//! HTTP routing, durable user storage and external metadata lookups are
//! collaborators outside this crate: it only consumes and produces movie
//! identifiers, vectors and scores.

pub mod batch;
pub mod cache;
pub mod config;
pub mod corpus;
pub mod error;
pub mod inference;
pub mod model;
pub mod training;
pub mod vocab;

pub use batch::{Batch, BatchAssembler};
pub use cache::{EmbeddingCache, InMemoryEmbeddingCache, UserEmbeddingEntry};
pub use config::{ModelConfig, SamplerConfig, TrainingConfig, PAD_INDEX};
pub use corpus::{InteractionEvent, Sample, SampleRecord, SequenceSampleBuilder};
pub use error::{RecError, RecResult};
pub use inference::{BatchRecommendation, InferenceEngine, Recommendation, SimilarItem};
pub use model::RecommenderModel;
pub use training::{Checkpoint, Trainer, TrainingSummary};
pub use vocab::Vocabulary;
