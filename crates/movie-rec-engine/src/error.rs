//! Error types for the recommendation engine.

use thiserror::Error;

/// Engine-specific errors.
///
/// Single-item operations surface these directly; batch operations collect
/// per-user failures into a list and keep going.
#[derive(Debug, Error)]
pub enum RecError {
    /// Loading or reconstructing a model from a checkpoint failed.
    /// Fatal at startup: the engine cannot serve without a model.
    #[error("failed to load model: {0}")]
    ModelLoad(String),

    /// A recommendation was requested for a history that is empty after
    /// unknown ids were dropped.
    #[error("history contains no known items")]
    EmptyHistory,

    /// Similarity was requested for an id absent from the vocabulary.
    #[error("movie {movie_id} not found in vocabulary")]
    SeedNotFound {
        /// The raw id that failed lookup.
        movie_id: i64,
    },

    /// Vocabulary state disagrees with the data it is applied to.
    /// Silent mis-indexing corrupts rankings invisibly, so this fails fast.
    #[error("vocabulary mismatch: {0}")]
    VocabMismatch(String),

    /// The embedding cache could not be read or written.
    #[error("embedding cache unavailable: {0}")]
    CacheUnavailable(String),

    /// Input validation failed.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Tensor operation failed.
    #[error("tensor error: {0}")]
    Tensor(#[from] candle_core::Error),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for engine operations.
pub type RecResult<T> = Result<T, RecError>;
