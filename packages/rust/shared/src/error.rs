//! Error types for the curation pipeline.
//!
//! Library crates use [`CuratorError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.
//!
//! Most of these never escape a pipeline run: scoring failures are absorbed
//! by the per-stage fallback policy and history failures degrade to an empty
//! history. They are still typed so stages can log them with structure.

use std::path::PathBuf;

/// Top-level error type for all curator operations.
#[derive(Debug, thiserror::Error)]
pub enum CuratorError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Network/HTTP error talking to a scoring backend.
    #[error("network error: {0}")]
    Network(String),

    /// Malformed input or unparseable backend response.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Database or storage layer error.
    #[error("storage error: {0}")]
    Storage(String),

    /// A scoring backend rejected or failed a call.
    #[error("evaluation error: {0}")]
    Evaluation(String),

    /// A scoring call or the whole run exceeded its time budget.
    #[error("timed out: {0}")]
    Timeout(String),

    /// Dedup history could not be read, parsed, or locked.
    #[error("history unavailable: {0}")]
    HistoryUnavailable(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (bad weights, thresholds, input shape).
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, CuratorError>;

impl CuratorError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Create an evaluation error from any displayable message.
    pub fn evaluation(msg: impl Into<String>) -> Self {
        Self::Evaluation(msg.into())
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether this error came from an external scoring call.
    ///
    /// The Screener and DeepScorer log these as warnings. Anything else
    /// reaching them is logged as an error, though both stages still keep
    /// the item and fall back.
    pub fn is_scoring_failure(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::Parse { .. } | Self::Evaluation(_) | Self::Timeout(_)
        )
    }
}
