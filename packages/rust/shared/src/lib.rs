//! Shared types, error model, and configuration for curator.
//!
//! This crate is the foundation depended on by all other curator crates.
//! It provides:
//! - [`CuratorError`]: the unified error type
//! - Domain types ([`Item`], [`Category`], [`Verdict`], [`ThemeCluster`], [`RunId`])
//! - Configuration ([`AppConfig`], [`CurationConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, CurationConfig, DedupConfig, DeepConfig, DefaultsConfig, HeuristicConfig,
    OpenRouterConfig, PlatformFitWeights, PotentialWeights, QualityWeights, QuotaConfig,
    ScoringWeights, ScreenerConfig, SelectionConfig, ThemeAttribute, ThemesConfig,
    TimeoutsConfig, VerdictThresholds, WeightsConfig, api_key, config_dir, config_file_path,
    expand_home, init_config, load_config, load_config_from,
};
pub use error::{CuratorError, Result};
pub use types::{
    AttributeKind, Category, CollectedItem, DimensionScores, Item, PlatformFitScores, RunId,
    Stage, ThemeCluster, Verdict,
};
