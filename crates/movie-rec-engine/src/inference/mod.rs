//! Serving-time logic: checkpoint loading, ranking and similarity.

pub mod engine;

pub use engine::{
    select_device, BatchRecommendation, InferenceEngine, Recommendation, SimilarItem,
};
