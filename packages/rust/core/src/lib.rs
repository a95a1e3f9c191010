//! Core curation pipeline for curator.
//!
//! Stages, in run order:
//! - [`normalize`]: canonical URL keys
//! - [`dedup`]: filtering against persisted history ([`history`])
//! - [`screener`]: batched first-pass scoring and immediate rejects
//! - [`deep_scorer`]: seven-dimension scoring and aggregates ([`weights`])
//! - [`themes`]: deterministic theme clusters
//! - [`selector`]: quota-aware final selection
//!
//! [`pipeline::run_pipeline`] runs them end to end.

pub mod dedup;
pub mod deep_scorer;
pub mod evaluator;
pub mod history;
pub mod normalize;
pub mod pipeline;
pub mod screener;
pub mod selector;
pub mod themes;
pub mod weights;

#[cfg(test)]
mod testing;

pub use evaluator::{Evaluator, HeuristicEvaluator, OpenRouterEvaluator};
pub use history::{HistoryStore, JsonHistoryStore, MemoryHistoryStore, SqliteHistoryStore};
pub use pipeline::{
    PipelineContext, PipelineReport, ProgressReporter, RunStats, SilentProgress, run_pipeline,
};
