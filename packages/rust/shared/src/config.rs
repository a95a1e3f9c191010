//! Application configuration for curator.
//!
//! User config lives at `~/.curator/curator.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CuratorError, Result};
use crate::types::{AttributeKind, Category};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "curator.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".curator";

// ---------------------------------------------------------------------------
// Config structs (matching curator.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Global defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// OpenRouter settings for the scoring backend.
    #[serde(default)]
    pub openrouter: OpenRouterConfig,

    /// Deduplication settings.
    #[serde(default)]
    pub dedup: DedupConfig,

    /// Batch screening settings.
    #[serde(default)]
    pub screener: ScreenerConfig,

    /// Per-item deep scoring settings.
    #[serde(default)]
    pub deep: DeepConfig,

    /// Weight tables for the aggregate scores.
    #[serde(default)]
    pub weights: WeightsConfig,

    /// Verdict threshold boundaries.
    #[serde(default)]
    pub thresholds: VerdictThresholds,

    /// Theme clustering.
    #[serde(default)]
    pub themes: ThemesConfig,

    /// Final selection.
    #[serde(default)]
    pub selection: SelectionConfig,

    /// Call and run time budgets.
    #[serde(default)]
    pub timeouts: TimeoutsConfig,

    /// Keyword lists for the offline heuristic evaluator.
    #[serde(default)]
    pub heuristic: HeuristicConfig,
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Maximum number of items in the final selection.
    #[serde(default = "default_output_max")]
    pub output_max: usize,

    /// Path of the JSON dedup history file.
    #[serde(default = "default_history_path")]
    pub history_path: String,

    /// History backend: "json" or "sqlite".
    #[serde(default = "default_history_backend")]
    pub history_backend: String,

    /// Path of the libSQL database (score cache, run log, sqlite history).
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            output_max: default_output_max(),
            history_path: default_history_path(),
            history_backend: default_history_backend(),
            db_path: default_db_path(),
        }
    }
}

fn default_output_max() -> usize {
    5
}
fn default_history_path() -> String {
    "~/.curator/history.json".into()
}
fn default_history_backend() -> String {
    "json".into()
}
fn default_db_path() -> String {
    "~/.curator/curator.db".into()
}

/// `[openrouter]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenRouterConfig {
    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Model used for screening and deep scoring.
    #[serde(default = "default_model")]
    pub default_model: String,

    /// OpenAI-compatible API base URL.
    #[serde(default = "default_base_url")]
    pub base_url: String,
}

impl Default for OpenRouterConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_api_key_env(),
            default_model: default_model(),
            base_url: default_base_url(),
        }
    }
}

fn default_api_key_env() -> String {
    "OPENROUTER_API_KEY".into()
}
fn default_model() -> String {
    "anthropic/claude-3.5-haiku".into()
}
fn default_base_url() -> String {
    "https://openrouter.ai/api/v1".into()
}

/// `[dedup]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupConfig {
    /// Also treat items with the same title fingerprint as duplicates.
    #[serde(default = "default_true")]
    pub match_titles: bool,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self { match_titles: true }
    }
}

fn default_true() -> bool {
    true
}

/// `[screener]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScreenerConfig {
    /// Items per classification call.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Concurrent batch calls.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Apply the immediate-reject heuristics before batch scoring.
    #[serde(default = "default_true")]
    pub immediate_reject: bool,

    /// Only the top research items by keyword score go on to scoring.
    /// Zero disables the cap.
    #[serde(default = "default_research_limit")]
    pub research_limit: usize,
}

impl Default for ScreenerConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            concurrency: default_concurrency(),
            immediate_reject: true,
            research_limit: default_research_limit(),
        }
    }
}

fn default_batch_size() -> usize {
    15
}
fn default_concurrency() -> usize {
    4
}
fn default_research_limit() -> usize {
    3
}

/// `[deep]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeepConfig {
    /// Concurrent per-item scoring calls.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Run the stricter platform-fit pass and take the verdict from it.
    #[serde(default)]
    pub platform_fit_pass: bool,
}

impl Default for DeepConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            platform_fit_pass: false,
        }
    }
}

/// `[weights]` section: one table per aggregate.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WeightsConfig {
    #[serde(default)]
    pub quality: QualityWeights,
    #[serde(default)]
    pub potential: PotentialWeights,
    #[serde(default)]
    pub platform_fit: PlatformFitWeights,
}

/// Weights for the overall-quality aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityWeights {
    pub curiosity: f64,
    pub insight: f64,
    pub relevance: f64,
    pub timeliness: f64,
    pub discussion: f64,
    pub shareability: f64,
    pub depth: f64,
}

impl Default for QualityWeights {
    fn default() -> Self {
        Self {
            curiosity: 1.5,
            insight: 2.0,
            relevance: 1.5,
            timeliness: 1.0,
            discussion: 1.0,
            shareability: 1.0,
            depth: 1.5,
        }
    }
}

impl QualityWeights {
    pub fn entries(&self) -> [(&'static str, f64); 7] {
        [
            ("curiosity", self.curiosity),
            ("insight", self.insight),
            ("relevance", self.relevance),
            ("timeliness", self.timeliness),
            ("discussion", self.discussion),
            ("shareability", self.shareability),
            ("depth", self.depth),
        ]
    }
}

/// Weights for the platform-potential aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PotentialWeights {
    pub curiosity: f64,
    pub insight: f64,
    pub discussion: f64,
    pub shareability: f64,
    pub depth: f64,
}

impl Default for PotentialWeights {
    fn default() -> Self {
        Self {
            curiosity: 1.5,
            insight: 1.0,
            discussion: 2.0,
            shareability: 2.0,
            depth: 1.0,
        }
    }
}

impl PotentialWeights {
    pub fn entries(&self) -> [(&'static str, f64); 5] {
        [
            ("curiosity", self.curiosity),
            ("insight", self.insight),
            ("discussion", self.discussion),
            ("shareability", self.shareability),
            ("depth", self.depth),
        ]
    }
}

/// Weights for the stricter platform-fit aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformFitWeights {
    pub timeliness: f64,
    pub discussion_trigger: f64,
    pub shareability: f64,
    pub explainability: f64,
    pub unique_angle: f64,
}

impl Default for PlatformFitWeights {
    fn default() -> Self {
        Self {
            timeliness: 2.5,
            discussion_trigger: 1.5,
            shareability: 1.5,
            explainability: 1.0,
            unique_angle: 1.0,
        }
    }
}

impl PlatformFitWeights {
    pub fn entries(&self) -> [(&'static str, f64); 5] {
        [
            ("timeliness", self.timeliness),
            ("discussion_trigger", self.discussion_trigger),
            ("shareability", self.shareability),
            ("explainability", self.explainability),
            ("unique_angle", self.unique_angle),
        ]
    }
}

/// `[thresholds]` section.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VerdictThresholds {
    /// Scores at or above this recommend.
    #[serde(default = "default_recommend")]
    pub recommend: f64,
    /// Scores at or above this (and below `recommend`) hold.
    #[serde(default = "default_hold")]
    pub hold: f64,
}

impl Default for VerdictThresholds {
    fn default() -> Self {
        Self {
            recommend: default_recommend(),
            hold: default_hold(),
        }
    }
}

fn default_recommend() -> f64 {
    7.0
}
fn default_hold() -> f64 {
    5.0
}

/// `[themes]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThemesConfig {
    /// Clusters smaller than this are dissolved.
    #[serde(default = "default_min_cluster_size")]
    pub min_cluster_size: usize,

    /// Attribute lexicon; order within a kind is match precedence.
    #[serde(default = "default_theme_attributes")]
    pub attributes: Vec<ThemeAttribute>,
}

impl Default for ThemesConfig {
    fn default() -> Self {
        Self {
            min_cluster_size: default_min_cluster_size(),
            attributes: default_theme_attributes(),
        }
    }
}

fn default_min_cluster_size() -> usize {
    3
}

/// `[[themes.attributes]]` entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThemeAttribute {
    pub kind: AttributeKind,
    /// Cluster label, also the id suffix.
    pub label: String,
    /// Terms matched case-insensitively on word boundaries.
    pub terms: Vec<String>,
}

fn attr(kind: AttributeKind, label: &str, terms: &[&str]) -> ThemeAttribute {
    ThemeAttribute {
        kind,
        label: label.to_string(),
        terms: terms.iter().map(|t| (*t).to_string()).collect(),
    }
}

fn default_theme_attributes() -> Vec<ThemeAttribute> {
    use AttributeKind::*;
    vec![
        attr(Organization, "openai", &["openai", "chatgpt", "sam altman"]),
        attr(Organization, "anthropic", &["anthropic", "claude"]),
        attr(Organization, "google", &["google", "deepmind", "gemini"]),
        attr(Organization, "meta", &["meta", "llama"]),
        attr(Organization, "microsoft", &["microsoft", "azure"]),
        attr(Organization, "nvidia", &["nvidia"]),
        attr(Organization, "apple", &["apple"]),
        attr(Organization, "amazon", &["amazon", "aws"]),
        attr(Organization, "deepseek", &["deepseek"]),
        attr(Organization, "mistral", &["mistral"]),
        attr(Technology, "agents", &["agent", "agents", "agentic"]),
        attr(Technology, "rag", &["rag", "retrieval-augmented", "retrieval augmented"]),
        attr(Technology, "multimodal", &["multimodal", "vision-language", "video generation"]),
        attr(Technology, "robotics", &["robot", "robots", "robotics", "humanoid"]),
        attr(Technology, "coding", &["coding assistant", "code generation", "copilot"]),
        attr(Trend, "open-models", &["open source", "open-source", "open weights", "open-weight"]),
        attr(Trend, "small-models", &["small model", "on-device", "distillation", "quantization"]),
        attr(Trend, "funding", &["raises", "funding round", "series a", "series b", "valuation"]),
        attr(Problem, "inference-cost", &["inference cost", "compute cost", "gpu shortage"]),
        attr(Problem, "safety", &["safety", "alignment", "jailbreak"]),
        attr(Problem, "regulation", &["regulation", "ai act", "antitrust"]),
    ]
}

/// `[selection]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectionConfig {
    /// Diversity quotas, applied in order.
    #[serde(default = "default_quotas")]
    pub quotas: Vec<QuotaConfig>,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            quotas: default_quotas(),
        }
    }
}

/// `[[selection.quotas]]` entry: a category bucket with a minimum.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuotaConfig {
    pub name: String,
    pub categories: Vec<Category>,
    #[serde(default = "default_quota_min")]
    pub min: usize,
}

fn default_quota_min() -> usize {
    1
}

fn default_quotas() -> Vec<QuotaConfig> {
    vec![
        QuotaConfig {
            name: "research".into(),
            categories: vec![Category::Research],
            min: 1,
        },
        QuotaConfig {
            name: "news".into(),
            categories: vec![
                Category::BigTech,
                Category::News,
                Category::Community,
                Category::Regional,
            ],
            min: 1,
        },
    ]
}

/// `[timeouts]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutsConfig {
    /// Budget for a single scoring call.
    #[serde(default = "default_per_call_secs")]
    pub per_call_secs: u64,
    /// Budget for the whole pipeline run.
    #[serde(default = "default_total_secs")]
    pub total_secs: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            per_call_secs: default_per_call_secs(),
            total_secs: default_total_secs(),
        }
    }
}

fn default_per_call_secs() -> u64 {
    30
}
fn default_total_secs() -> u64 {
    600
}

/// `[heuristic]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeuristicConfig {
    /// Strong interest signals (3.0 per match).
    #[serde(default = "default_high_priority")]
    pub high_priority: Vec<String>,
    /// General topic signals (1.5 per match).
    #[serde(default = "default_topics")]
    pub topics: Vec<String>,
}

impl Default for HeuristicConfig {
    fn default() -> Self {
        Self {
            high_priority: default_high_priority(),
            topics: default_topics(),
        }
    }
}

fn default_high_priority() -> Vec<String> {
    ["llm", "agent", "openai", "anthropic", "benchmark", "startup", "funding"]
        .iter()
        .map(|s| (*s).to_string())
        .collect()
}

fn default_topics() -> Vec<String> {
    [
        "ai", "model", "inference", "open source", "gpu", "reasoning", "multimodal",
        "robotics", "regulation", "productivity", "research", "dataset",
    ]
    .iter()
    .map(|s| (*s).to_string())
    .collect()
}

// ---------------------------------------------------------------------------
// Curation config (runtime, validated from config + CLI flags)
// ---------------------------------------------------------------------------

/// Weight tables with their denominators precomputed.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoringWeights {
    pub quality: QualityWeights,
    pub potential: PotentialWeights,
    pub platform_fit: PlatformFitWeights,
    pub quality_total: f64,
    pub potential_total: f64,
    pub platform_fit_total: f64,
}

impl ScoringWeights {
    /// Validate the three tables: every weight finite and non-negative,
    /// every table with a positive sum.
    pub fn new(config: &WeightsConfig) -> Result<Self> {
        Ok(Self {
            quality: config.quality,
            potential: config.potential,
            platform_fit: config.platform_fit,
            quality_total: table_total("quality", &config.quality.entries())?,
            potential_total: table_total("potential", &config.potential.entries())?,
            platform_fit_total: table_total("platform_fit", &config.platform_fit.entries())?,
        })
    }
}

fn table_total(table: &str, entries: &[(&'static str, f64)]) -> Result<f64> {
    for (name, weight) in entries {
        if !weight.is_finite() || *weight < 0.0 {
            return Err(CuratorError::validation(format!(
                "weights.{table}.{name} must be a non-negative number, got {weight}"
            )));
        }
    }
    let total: f64 = entries.iter().map(|(_, w)| w).sum();
    if total <= 0.0 {
        return Err(CuratorError::validation(format!(
            "weights.{table} must have a positive sum"
        )));
    }
    Ok(total)
}

/// Immutable per-run configuration, merged from config file + CLI flags.
#[derive(Debug, Clone)]
pub struct CurationConfig {
    pub batch_size: usize,
    pub screen_concurrency: usize,
    pub immediate_reject: bool,
    pub research_limit: usize,
    pub heuristic: HeuristicConfig,
    pub deep_concurrency: usize,
    pub platform_fit_pass: bool,
    pub match_titles: bool,
    pub weights: ScoringWeights,
    pub thresholds: VerdictThresholds,
    pub min_cluster_size: usize,
    pub theme_attributes: Vec<ThemeAttribute>,
    pub quotas: Vec<QuotaConfig>,
    pub output_max: usize,
    pub per_call_timeout: Duration,
    pub total_timeout: Duration,
}

impl TryFrom<&AppConfig> for CurationConfig {
    type Error = CuratorError;

    fn try_from(config: &AppConfig) -> Result<Self> {
        let thresholds = config.thresholds;
        let bounds_ok = thresholds.hold.is_finite()
            && thresholds.recommend.is_finite()
            && 0.0 <= thresholds.hold
            && thresholds.hold <= thresholds.recommend
            && thresholds.recommend <= 10.0;
        if !bounds_ok {
            return Err(CuratorError::validation(format!(
                "thresholds must satisfy 0 <= hold <= recommend <= 10 (hold={}, recommend={})",
                thresholds.hold, thresholds.recommend
            )));
        }

        if config.screener.batch_size == 0 {
            return Err(CuratorError::validation("screener.batch_size must be at least 1"));
        }
        if config.themes.min_cluster_size == 0 {
            return Err(CuratorError::validation(
                "themes.min_cluster_size must be at least 1",
            ));
        }
        if config.timeouts.per_call_secs == 0 || config.timeouts.total_secs == 0 {
            return Err(CuratorError::validation("timeouts must be greater than zero"));
        }

        Ok(Self {
            batch_size: config.screener.batch_size,
            screen_concurrency: config.screener.concurrency.max(1),
            immediate_reject: config.screener.immediate_reject,
            research_limit: config.screener.research_limit,
            heuristic: config.heuristic.clone(),
            deep_concurrency: config.deep.concurrency.max(1),
            platform_fit_pass: config.deep.platform_fit_pass,
            match_titles: config.dedup.match_titles,
            weights: ScoringWeights::new(&config.weights)?,
            thresholds,
            min_cluster_size: config.themes.min_cluster_size,
            theme_attributes: config.themes.attributes.clone(),
            quotas: config.selection.quotas.clone(),
            output_max: config.defaults.output_max,
            per_call_timeout: Duration::from_secs(config.timeouts.per_call_secs),
            total_timeout: Duration::from_secs(config.timeouts.total_secs),
        })
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.curator/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| CuratorError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.curator/curator.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| CuratorError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| CuratorError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| CuratorError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| CuratorError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| CuratorError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Read the OpenRouter API key, if its env var is set and non-empty.
pub fn api_key(config: &AppConfig) -> Option<String> {
    std::env::var(&config.openrouter.api_key_env)
        .ok()
        .filter(|v| !v.is_empty())
}

/// Expand a leading `~/` against the home directory.
pub fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| PathBuf::from(path)),
        None => PathBuf::from(path),
    }
}
