//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use curator_core::evaluator::{Evaluator, HeuristicEvaluator, OpenRouterEvaluator};
use curator_core::history::{History, HistoryStore, JsonHistoryStore, SqliteHistoryStore};
use curator_core::pipeline::{PipelineContext, PipelineReport, ProgressReporter, run_pipeline};
use curator_shared::{
    AppConfig, CollectedItem, CurationConfig, api_key, expand_home, init_config, load_config,
    load_config_from,
};
use curator_storage::Storage;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, info, warn};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// curator: pick the few collected items worth covering today.
#[derive(Parser)]
#[command(
    name = "curator",
    version,
    about = "Deduplicate, score, group and select collected news items.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file (defaults to ~/.curator/curator.toml).
    #[arg(long, global = true, env = "CURATOR_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Run the curation pipeline over a JSON file of collected items.
    Run {
        /// JSON array of collected items.
        #[arg(short, long)]
        input: PathBuf,

        /// Write the full report (selection, clusters, stats) here.
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Maximum number of selected items (overrides config).
        #[arg(long)]
        max: Option<usize>,

        /// Score with the offline keyword heuristic instead of OpenRouter.
        #[arg(long)]
        offline: bool,
    },

    /// Inspect or reset the dedup history.
    History {
        #[command(subcommand)]
        action: HistoryAction,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// History subcommands.
#[derive(Subcommand)]
pub(crate) enum HistoryAction {
    /// Show entry counts, the newest entries and recent runs.
    Show {
        /// Number of entries and runs to list.
        #[arg(long, default_value = "10")]
        limit: u32,
    },
    /// Forget every seen item.
    Clear,
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "curator=info",
        1 => "curator=debug",
        _ => "curator=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.as_deref();
    match cli.command {
        Command::Run {
            input,
            output,
            max,
            offline,
        } => cmd_run(config_path, &input, output.as_deref(), max, offline).await,
        Command::History { action } => match action {
            HistoryAction::Show { limit } => cmd_history_show(config_path, limit).await,
            HistoryAction::Clear => cmd_history_clear(config_path).await,
        },
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show(config_path).await,
        },
    }
}

// ---------------------------------------------------------------------------
// Shared setup
// ---------------------------------------------------------------------------

fn load_app_config(path: Option<&Path>) -> Result<AppConfig> {
    Ok(match path {
        Some(p) => load_config_from(p)?,
        None => load_config()?,
    })
}

/// Open the libSQL database. Failure only disables the cache and run log.
async fn open_storage(config: &AppConfig) -> Option<Arc<Storage>> {
    let path = expand_home(&config.defaults.db_path);
    match Storage::open(&path).await {
        Ok(storage) => Some(Arc::new(storage)),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "storage unavailable, continuing without cache");
            None
        }
    }
}

/// Open an existing database for reporting. A missing file is left
/// uncreated and yields `None`.
async fn open_storage_readonly(config: &AppConfig) -> Option<Arc<Storage>> {
    let path = expand_home(&config.defaults.db_path);
    if !path.exists() {
        debug!(path = %path.display(), "no database file");
        return None;
    }
    match Storage::open_readonly(&path).await {
        Ok(storage) => Some(Arc::new(storage)),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "storage unavailable");
            None
        }
    }
}

fn history_store(
    config: &AppConfig,
    storage: Option<&Arc<Storage>>,
) -> Result<Box<dyn HistoryStore>> {
    match config.defaults.history_backend.as_str() {
        "json" => Ok(Box::new(JsonHistoryStore::new(expand_home(
            &config.defaults.history_path,
        )))),
        "sqlite" => {
            let storage = storage
                .ok_or_else(|| eyre!("history_backend = \"sqlite\" but the database could not be opened"))?;
            Ok(Box::new(SqliteHistoryStore::new(Arc::clone(storage))))
        }
        other => Err(eyre!(
            "unknown history_backend '{other}': expected 'json' or 'sqlite'"
        )),
    }
}

fn build_evaluator(
    config: &AppConfig,
    curation: &CurationConfig,
    offline: bool,
) -> Result<Box<dyn Evaluator>> {
    if offline {
        info!("offline mode, using heuristic scorer");
        return Ok(Box::new(HeuristicEvaluator::new(&config.heuristic)));
    }
    match api_key(config) {
        Some(key) => Ok(Box::new(OpenRouterEvaluator::new(
            key,
            &config.openrouter.base_url,
            &config.openrouter.default_model,
            curation.per_call_timeout,
        )?)),
        None => {
            warn!(
                env = %config.openrouter.api_key_env,
                "no API key set, falling back to heuristic scorer"
            );
            Ok(Box::new(HeuristicEvaluator::new(&config.heuristic)))
        }
    }
}

/// Parse the collector's JSON: a bare array, or an object with an `items`
/// array.
fn parse_items(text: &str) -> Result<Vec<CollectedItem>> {
    let value: serde_json::Value =
        serde_json::from_str(text).map_err(|e| eyre!("input is not valid JSON: {e}"))?;
    let array = match value {
        serde_json::Value::Object(mut map) => map
            .remove("items")
            .ok_or_else(|| eyre!("input object has no 'items' array"))?,
        other => other,
    };
    serde_json::from_value(array).map_err(|e| eyre!("invalid collected items: {e}"))
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_run(
    config_path: Option<&Path>,
    input: &Path,
    output: Option<&Path>,
    max: Option<usize>,
    offline: bool,
) -> Result<()> {
    let config = load_app_config(config_path)?;
    let mut curation = CurationConfig::try_from(&config)?;
    if let Some(max) = max {
        curation.output_max = max;
    }

    let text = std::fs::read_to_string(input)
        .map_err(|e| eyre!("cannot read input '{}': {e}", input.display()))?;
    let items = parse_items(&text)?;
    info!(input = %input.display(), items = items.len(), "loaded collected items");

    let storage = open_storage(&config).await;
    let history = history_store(&config, storage.as_ref())?;
    let evaluator = build_evaluator(&config, &curation, offline)?;

    let reporter = CliProgress::new();
    let ctx = PipelineContext {
        history: history.as_ref(),
        evaluator: evaluator.as_ref(),
        storage: storage.as_deref(),
        progress: &reporter,
    };
    let report = run_pipeline(&curation, items, &ctx).await?;

    print_summary(&report);

    if let Some(path) = output {
        let json = serde_json::to_string_pretty(&report)?;
        std::fs::write(path, json)
            .map_err(|e| eyre!("cannot write report '{}': {e}", path.display()))?;
        println!("  Report: {}", path.display());
        println!();
    }

    Ok(())
}

fn print_summary(report: &PipelineReport) {
    let stats = &report.stats;
    println!();
    println!(
        "  Selected {} of {} items ({} duplicates, {} rejected outright)",
        stats.selected, stats.collected, stats.duplicates, stats.immediate_rejects
    );
    if stats.research_capped > 0 {
        println!("  Skipped {} research items over the per-run limit", stats.research_capped);
    }
    if stats.history_degraded {
        println!("  Warning: history was unreadable; nothing was filtered as seen");
    }
    if stats.timed_out {
        println!("  Warning: run deadline reached; some items kept screener scores");
    }
    println!();

    for (rank, item) in report.selected.iter().enumerate() {
        let score = match item.platform_potential.or(item.screen_score) {
            Some(s) => format!("{s:.1}"),
            None => "  - ".to_string(),
        };
        let theme = item
            .theme
            .as_deref()
            .map(|t| format!("  #{t}"))
            .unwrap_or_default();
        println!(
            "  {:>2}. [{score}] {}  ({}, {}){theme}",
            rank + 1,
            item.title,
            item.category,
            item.verdict.as_str()
        );
        println!("      {}", item.url);
    }
    if !report.clusters.is_empty() {
        println!();
        println!("  Themes:");
        for cluster in &report.clusters {
            println!("    {} ({} items)", cluster.id, cluster.members.len());
        }
    }
    println!();
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        spinner.set_style(style);
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn batch_screened(&self, current: usize, total: usize) {
        self.spinner
            .set_message(format!("Screening [{current}/{total} batches]"));
    }

    fn item_scored(&self, key: &str, current: usize, total: usize) {
        self.spinner
            .set_message(format!("Deep scoring [{current}/{total}] {key}"));
    }

    fn done(&self, _report: &PipelineReport) {
        self.spinner.finish_and_clear();
    }
}

/// Read the history for reporting without creating or migrating anything.
async fn read_history(config: &AppConfig, storage: Option<&Arc<Storage>>) -> Result<History> {
    if config.defaults.history_backend == "sqlite" && storage.is_none() {
        return Ok(History::default());
    }
    Ok(history_store(config, storage)?.snapshot().await?)
}

async fn cmd_history_show(config_path: Option<&Path>, limit: u32) -> Result<()> {
    let config = load_app_config(config_path)?;
    let storage = open_storage_readonly(&config).await;
    let history = read_history(&config, storage.as_ref()).await?;

    println!();
    println!("  Backend: {}", config.defaults.history_backend);
    println!("  URLs:    {}", history.urls.len());
    println!("  Titles:  {}", history.titles.len());
    if let Some(updated) = history.last_updated {
        println!("  Updated: {}", updated.to_rfc3339());
    }

    let mut newest: Vec<(&String, &chrono::DateTime<chrono::Utc>)> = history.urls.iter().collect();
    newest.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
    if !newest.is_empty() {
        println!();
        println!("  Newest entries:");
        for (key, seen) in newest.into_iter().take(limit as usize) {
            println!("    {}  {key}", seen.format("%Y-%m-%d %H:%M"));
        }
    }

    if let Some(storage) = storage {
        let runs = storage.list_runs(limit).await?;
        if !runs.is_empty() {
            println!();
            println!("  Recent runs:");
            for run in runs {
                let finished = run.finished_at.as_deref().unwrap_or("unfinished");
                println!("    {}  {}  ->  {finished}", run.id, run.started_at);
            }
        }
    }
    println!();
    Ok(())
}

async fn cmd_history_clear(config_path: Option<&Path>) -> Result<()> {
    let config = load_app_config(config_path)?;
    let storage = open_storage(&config).await;
    let store = history_store(&config, storage.as_ref())?;
    store.clear().await?;
    println!("History cleared ({} backend)", config.defaults.history_backend);
    Ok(())
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show(config_path: Option<&Path>) -> Result<()> {
    let config = load_app_config(config_path)?;
    // Surface validation errors alongside the resolved values.
    CurationConfig::try_from(&config)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_array_and_wrapped_items() {
        let bare = r#"[{"title": "A", "url": "https://a.example/x", "category": "vc"}]"#;
        let items = parse_items(bare).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].category, curator_shared::Category::Venture);

        let wrapped = r#"{"items": [{"title": "B", "url": "https://b.example"}]}"#;
        assert_eq!(parse_items(wrapped).unwrap()[0].title, "B");
    }

    #[test]
    fn rejects_unusable_input() {
        assert!(parse_items("not json").is_err());
        assert!(parse_items(r#"{"results": []}"#).is_err());
        assert!(parse_items(r#"[{"url": "https://missing-title.example"}]"#).is_err());
    }

    #[test]
    fn unknown_history_backend_is_an_error() {
        let mut config = AppConfig::default();
        config.defaults.history_backend = "redis".into();
        assert!(history_store(&config, None).is_err());
        config.defaults.history_backend = "sqlite".into();
        assert!(history_store(&config, None).is_err());
    }

    #[tokio::test]
    async fn history_show_does_not_create_database() {
        let dir = std::env::temp_dir().join(format!("curator_cli_{}", uuid::Uuid::now_v7()));
        let db = dir.join("curator.db");
        let mut config = AppConfig::default();
        config.defaults.db_path = db.to_string_lossy().into_owned();
        config.defaults.history_backend = "sqlite".into();

        let storage = open_storage_readonly(&config).await;
        assert!(storage.is_none());
        let history = read_history(&config, storage.as_ref()).await.unwrap();
        assert!(history.is_empty());
        assert!(!db.exists());
        assert!(!dir.exists());
    }

    #[tokio::test]
    async fn history_show_reads_existing_database() {
        let dir = std::env::temp_dir().join(format!("curator_cli_{}", uuid::Uuid::now_v7()));
        let db = dir.join("curator.db");
        drop(Storage::open(&db).await.unwrap());
        let mut config = AppConfig::default();
        config.defaults.db_path = db.to_string_lossy().into_owned();
        config.defaults.history_backend = "sqlite".into();

        let storage = open_storage_readonly(&config).await.expect("existing db");
        assert!(storage.begin_seen().await.is_err());
        let history = read_history(&config, Some(&storage)).await.unwrap();
        assert!(history.is_empty());

        let _ = std::fs::remove_dir_all(&dir);
    }
}
