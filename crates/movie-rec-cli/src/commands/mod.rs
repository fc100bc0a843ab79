//! CLI subcommands.

pub mod preprocess;
pub mod query;
pub mod train;
