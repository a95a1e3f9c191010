//! End-to-end curation run:
//! normalize → dedup → screen → deep-score → group → select.
//!
//! Stages run one after another; each one finishes (or falls back) for
//! every item before the next starts. Nothing past construction is fatal:
//! degraded stages show up in [`RunStats`] and per-item flags.

use std::time::Instant as StdInstant;

use chrono::Utc;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{info, instrument, warn};

use curator_shared::{CollectedItem, CurationConfig, Item, Result, RunId, ThemeCluster};
use curator_storage::Storage;

use crate::dedup::Deduplicator;
use crate::deep_scorer::DeepScorer;
use crate::evaluator::Evaluator;
use crate::history::HistoryStore;
use crate::normalize::normalize_url;
use crate::screener::Screener;
use crate::selector;
use crate::themes::ThemeGrouper;

/// Counters describing one run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunStats {
    pub collected: usize,
    pub duplicates: usize,
    pub deduped: usize,
    pub history_degraded: bool,
    pub immediate_rejects: usize,
    pub research_capped: usize,
    pub screen_batches_failed: usize,
    pub deep_scored: usize,
    pub deep_incomplete: usize,
    pub cache_hits: usize,
    pub clusters_formed: usize,
    pub quotas_waived: usize,
    pub selected: usize,
    /// The run deadline expired before scoring finished.
    pub timed_out: bool,
    pub elapsed_ms: u64,
}

/// Output of a run.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    pub run_id: RunId,
    /// Final ranked selection.
    pub selected: Vec<Item>,
    pub clusters: Vec<ThemeCluster>,
    pub stats: RunStats,
}

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new stage.
    fn phase(&self, name: &str);
    /// Called after each screening batch returns.
    fn batch_screened(&self, current: usize, total: usize);
    /// Called after each deep-scoring call returns.
    fn item_scored(&self, key: &str, current: usize, total: usize);
    /// Called when the run completes.
    fn done(&self, report: &PipelineReport);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn batch_screened(&self, _current: usize, _total: usize) {}
    fn item_scored(&self, _key: &str, _current: usize, _total: usize) {}
    fn done(&self, _report: &PipelineReport) {}
}

/// Collaborators of a run.
pub struct PipelineContext<'a> {
    pub history: &'a dyn HistoryStore,
    pub evaluator: &'a dyn Evaluator,
    /// Score cache and run log; both are skipped when absent.
    pub storage: Option<&'a Storage>,
    pub progress: &'a dyn ProgressReporter,
}

/// Run the whole pipeline over `collected`.
///
/// Errors only when a stage cannot be constructed from `config`.
#[instrument(skip_all, fields(items = collected.len()))]
pub async fn run_pipeline(
    config: &CurationConfig,
    collected: Vec<CollectedItem>,
    ctx: &PipelineContext<'_>,
) -> Result<PipelineReport> {
    let screener = Screener::new(config, ctx.evaluator)?;
    let grouper = ThemeGrouper::new(&config.theme_attributes, config.min_cluster_size)?;
    let mut scorer = DeepScorer::new(config, ctx.evaluator);
    if let Some(storage) = ctx.storage {
        scorer = scorer.with_cache(storage);
    }

    let started = StdInstant::now();
    let deadline = Instant::now() + config.total_timeout;
    let run_id = RunId::new();
    let mut stats = RunStats {
        collected: collected.len(),
        ..Default::default()
    };

    info!(%run_id, model = ctx.evaluator.model_id(), "starting curation run");
    if let Some(storage) = ctx.storage {
        if let Err(e) = storage.insert_run(&run_id.to_string()).await {
            warn!(error = %e, "failed to record run start");
        }
    }

    // --- Normalize ---
    ctx.progress.phase("Normalizing");
    let items: Vec<Item> = collected
        .into_iter()
        .map(|c| {
            let key = normalize_url(&c.url);
            Item::from_collected(c, key)
        })
        .collect();

    // --- Dedup ---
    ctx.progress.phase("Deduplicating");
    let dedup = Deduplicator::new(config.match_titles)
        .run(ctx.history, items, Utc::now())
        .await;
    stats.duplicates = dedup.duplicates;
    stats.deduped = dedup.items.len();
    stats.history_degraded = dedup.history_degraded;

    let mut clusters = Vec::new();
    let mut selected = Vec::new();

    if dedup.items.is_empty() {
        info!("no new items after deduplication");
    } else {
        // --- Screen ---
        ctx.progress.phase("Screening");
        let screened = screener.run(dedup.items, deadline, ctx.progress).await;
        stats.immediate_rejects = screened.immediate_rejects;
        stats.research_capped = screened.research_capped;
        stats.screen_batches_failed = screened.batches_failed;

        // --- Deep score ---
        ctx.progress.phase("Deep scoring");
        let deep = scorer.run(screened.items, deadline, ctx.progress).await;
        stats.deep_scored = deep.scored;
        stats.deep_incomplete = deep.incomplete;
        stats.cache_hits = deep.cache_hits;
        let mut items = deep.items;

        // --- Group ---
        ctx.progress.phase("Grouping themes");
        clusters = grouper.group(&mut items);
        stats.clusters_formed = clusters.len();

        // --- Select ---
        ctx.progress.phase("Selecting");
        let selection = selector::select(&items, &config.quotas, config.output_max);
        stats.quotas_waived = selection.quotas_waived;
        selected = selection.selected;
    }

    stats.selected = selected.len();
    stats.timed_out = Instant::now() >= deadline;
    stats.elapsed_ms = started.elapsed().as_millis() as u64;
    if stats.timed_out {
        warn!("run deadline expired; unfinished items kept their earlier scores");
    }

    if let Some(storage) = ctx.storage {
        match serde_json::to_string(&stats) {
            Ok(json) => {
                if let Err(e) = storage.finish_run(&run_id.to_string(), &json).await {
                    warn!(error = %e, "failed to record run stats");
                }
            }
            Err(e) => warn!(error = %e, "failed to serialize run stats"),
        }
    }

    info!(
        %run_id,
        collected = stats.collected,
        deduped = stats.deduped,
        selected = stats.selected,
        elapsed_ms = stats.elapsed_ms,
        "curation run complete"
    );

    let report = PipelineReport {
        run_id,
        selected,
        clusters,
        stats,
    };
    ctx.progress.done(&report);
    Ok(report)
}
