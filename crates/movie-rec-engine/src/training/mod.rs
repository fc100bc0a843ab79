//! Training infrastructure: the epoch loop and checkpoint artifacts.

pub mod checkpoint;
pub mod trainer;

pub use checkpoint::Checkpoint;
pub use trainer::{Trainer, TrainingSummary};
