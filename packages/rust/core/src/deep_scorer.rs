//! Per-item deep scoring of the screening shortlist.
//!
//! Items on `recommend` or `hold` get all seven dimensions scored, the two
//! aggregates derived, and their verdict recomputed from platform-potential
//! (or from platform-fit when that pass is enabled). When a call fails or
//! runs out of time the item keeps its screener values and is flagged
//! `deep_incomplete`.

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use curator_shared::{
    CurationConfig, CuratorError, DimensionScores, Item, PlatformFitScores, Result, Stage, Verdict,
};
use curator_storage::Storage;

use crate::evaluator::{Evaluator, call_with_budget};
use crate::pipeline::ProgressReporter;
use crate::weights;

/// Cached backend output for one item.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CachedScores {
    scores: DimensionScores,
    #[serde(default)]
    platform_fit: Option<PlatformFitScores>,
}

/// Cache key over the content the backend sees.
fn prompt_hash(item: &Item) -> String {
    let mut hasher = Sha256::new();
    hasher.update(item.title.as_bytes());
    hasher.update([0u8]);
    hasher.update(item.summary.as_bytes());
    hasher.update([0u8]);
    hasher.update(item.key.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Result of the deep-scoring stage.
#[derive(Debug)]
pub struct DeepOutcome {
    /// Every input item, in input order.
    pub items: Vec<Item>,
    /// Items fully scored.
    pub scored: usize,
    /// Items whose deep scoring failed or timed out.
    pub incomplete: usize,
    pub cache_hits: usize,
}

pub struct DeepScorer<'a> {
    config: &'a CurationConfig,
    evaluator: &'a dyn Evaluator,
    cache: Option<&'a Storage>,
}

impl<'a> DeepScorer<'a> {
    pub fn new(config: &'a CurationConfig, evaluator: &'a dyn Evaluator) -> Self {
        Self {
            config,
            evaluator,
            cache: None,
        }
    }

    /// Reuse results stored under the same content hash and model.
    pub fn with_cache(mut self, storage: &'a Storage) -> Self {
        self.cache = Some(storage);
        self
    }

    #[instrument(skip_all, fields(items = items.len(), model = self.evaluator.model_id()))]
    pub async fn run(
        &self,
        mut items: Vec<Item>,
        deadline: Instant,
        progress: &dyn ProgressReporter,
    ) -> DeepOutcome {
        let targets: Vec<usize> = items
            .iter()
            .enumerate()
            .filter(|(_, item)| item.verdict != Verdict::Reject)
            .map(|(idx, _)| idx)
            .collect();
        let total = targets.len();

        let calls = targets.into_iter().map(|idx| {
            let item = items[idx].clone();
            async move {
                let result = self.score_one(&item, deadline).await;
                (idx, result)
            }
        });

        let mut results = Vec::with_capacity(total);
        let mut stream = stream::iter(calls).buffer_unordered(self.config.deep_concurrency);
        while let Some((idx, result)) = stream.next().await {
            progress.item_scored(&items[idx].key, results.len() + 1, total);
            results.push((idx, result));
        }
        drop(stream);

        let mut outcome = DeepOutcome {
            items: Vec::new(),
            scored: 0,
            incomplete: 0,
            cache_hits: 0,
        };

        for (idx, result) in results {
            let item = &mut items[idx];
            match result.and_then(|(cached, hit)| self.apply(item, &cached).map(|_| hit)) {
                Ok(hit) => {
                    outcome.scored += 1;
                    if hit {
                        outcome.cache_hits += 1;
                    }
                }
                Err(e) => {
                    if e.is_scoring_failure() {
                        warn!(item = %item.key, error = %e, "deep scoring incomplete, keeping screener result");
                    } else {
                        error!(item = %item.key, error = %e, "deep scoring incomplete, keeping screener result");
                    }
                    item.deep_incomplete = true;
                    outcome.incomplete += 1;
                }
            }
        }

        info!(
            scored = outcome.scored,
            incomplete = outcome.incomplete,
            cache_hits = outcome.cache_hits,
            "deep scoring complete"
        );
        outcome.items = items;
        outcome
    }

    /// Fetch scores for one item, from the cache or the backend.
    /// Returns the scores and whether they came from the cache.
    async fn score_one(&self, item: &Item, deadline: Instant) -> Result<(CachedScores, bool)> {
        let hash = prompt_hash(item);
        let model = self.evaluator.model_id();

        if let Some(cached) = self.cached(&hash, model).await {
            if !self.config.platform_fit_pass || cached.platform_fit.is_some() {
                debug!(item = %item.key, "deep score cache hit");
                return Ok((cached, true));
            }
        }

        let per_call = self.config.per_call_timeout;
        let scores = call_with_budget(self.evaluator.score_item(item), per_call, deadline).await?;
        let platform_fit = if self.config.platform_fit_pass {
            Some(call_with_budget(self.evaluator.platform_fit(item), per_call, deadline).await?)
        } else {
            None
        };

        let fresh = CachedScores {
            scores,
            platform_fit,
        };
        if scores.is_complete() {
            self.store(&hash, model, &fresh).await;
        }
        Ok((fresh, false))
    }

    async fn cached(&self, hash: &str, model: &str) -> Option<CachedScores> {
        let storage = self.cache?;
        match storage.get_score_cache(hash, model).await {
            Ok(Some(json)) => serde_json::from_str(&json)
                .map_err(|e| warn!(error = %e, "discarding unreadable cache entry"))
                .ok(),
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, "score cache lookup failed");
                None
            }
        }
    }

    async fn store(&self, hash: &str, model: &str, scores: &CachedScores) {
        let Some(storage) = self.cache else {
            return;
        };
        let json = match serde_json::to_string(scores) {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, "failed to serialize scores for cache");
                return;
            }
        };
        if let Err(e) = storage.set_score_cache(hash, model, &json).await {
            warn!(error = %e, "failed to write score cache");
        }
    }

    /// Write scores onto the item. Refuses incomplete dimension sets, which
    /// leaves the item exactly as the screener left it.
    fn apply(&self, item: &mut Item, cached: &CachedScores) -> Result<()> {
        let weights = &self.config.weights;
        let (Some(quality), Some(potential)) = (
            weights::quality(&cached.scores, weights),
            weights::platform_potential(&cached.scores, weights),
        ) else {
            return Err(CuratorError::evaluation("backend returned incomplete dimension scores"));
        };

        item.scores = cached.scores;
        item.quality = Some(quality);
        item.platform_potential = Some(potential);

        let authoritative = match &cached.platform_fit {
            Some(fit) => {
                let fit_score = weights::platform_fit(fit, weights);
                item.platform_fit = Some(fit_score);
                fit_score
            }
            None => potential,
        };
        item.verdict = Verdict::from_score(authoritative, &self.config.thresholds);
        item.deep_incomplete = false;
        item.advance(Stage::DeepScored);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::SilentProgress;
    use crate::testing::{ScriptedEvaluator, config, item};
    use std::time::Duration;

    fn far_deadline() -> Instant {
        Instant::now() + Duration::from_secs(60)
    }

    fn screened(title: &str, score: f64) -> Item {
        let mut it = item(title, "news");
        it.screen_score = Some(score);
        it.verdict = Verdict::from_score(score, &config().thresholds);
        it.stage = Stage::Screened;
        it
    }

    #[tokio::test]
    async fn rescoring_recomputes_verdict() {
        let cfg = config();
        let evaluator = ScriptedEvaluator::new();
        let items = vec![screened("Up", 5.5), screened("Down", 8.0)];
        evaluator.set_deep(&items[0].key, DimensionScores::uniform(8.0));
        evaluator.set_deep(&items[1].key, DimensionScores::uniform(4.0));

        let outcome = DeepScorer::new(&cfg, &evaluator)
            .run(items, far_deadline(), &SilentProgress)
            .await;
        assert_eq!(outcome.scored, 2);
        let up = &outcome.items[0];
        assert_eq!(up.platform_potential, Some(8.0));
        assert_eq!(up.quality, Some(8.0));
        assert_eq!(up.verdict, Verdict::Recommend);
        assert_eq!(up.stage, Stage::DeepScored);
        assert_eq!(outcome.items[1].verdict, Verdict::Reject);
    }

    #[tokio::test]
    async fn rejected_items_are_not_scored() {
        let cfg = config();
        let evaluator = ScriptedEvaluator::new();
        let items = vec![screened("Keep", 6.0), screened("Drop", 2.0)];
        evaluator.set_deep(&items[0].key, DimensionScores::uniform(6.0));

        let outcome = DeepScorer::new(&cfg, &evaluator)
            .run(items, far_deadline(), &SilentProgress)
            .await;
        assert_eq!(evaluator.deep_calls(), vec!["example.com/keep".to_string()]);
        assert_eq!(outcome.items[1].stage, Stage::Screened);
        assert!(!outcome.items[1].deep_incomplete);
    }

    #[tokio::test]
    async fn failure_keeps_screener_result() {
        let cfg = config();
        let evaluator = ScriptedEvaluator::new();
        let items = vec![screened("X", 6.0)];
        evaluator.fail_deep(&items[0].key);

        let outcome = DeepScorer::new(&cfg, &evaluator)
            .run(items, far_deadline(), &SilentProgress)
            .await;
        let x = &outcome.items[0];
        assert_eq!(outcome.incomplete, 1);
        assert_eq!(x.verdict, Verdict::Hold);
        assert_eq!(x.screen_score, Some(6.0));
        assert!(x.deep_incomplete);
        assert_eq!(x.platform_potential, None);
        assert_eq!(x.stage, Stage::Screened);
    }

    #[tokio::test]
    async fn timeout_never_promotes() {
        let mut cfg = config();
        cfg.per_call_timeout = Duration::from_millis(50);
        let evaluator = ScriptedEvaluator::new();
        let items = vec![screened("Slow", 6.5), screened("Fast", 6.5)];
        evaluator.set_deep(&items[0].key, DimensionScores::uniform(9.5));
        evaluator.set_deep_delay(&items[0].key, Duration::from_secs(5));
        evaluator.set_deep(&items[1].key, DimensionScores::uniform(9.5));

        let outcome = DeepScorer::new(&cfg, &evaluator)
            .run(items, far_deadline(), &SilentProgress)
            .await;
        assert_eq!(outcome.items[0].verdict, Verdict::Hold);
        assert!(outcome.items[0].deep_incomplete);
        assert_eq!(outcome.items[1].verdict, Verdict::Recommend);
    }

    #[tokio::test]
    async fn expired_run_deadline_leaves_items_on_screener_result() {
        let cfg = config();
        let evaluator = ScriptedEvaluator::new();
        let items = vec![screened("Late", 7.5)];
        evaluator.set_deep(&items[0].key, DimensionScores::uniform(2.0));
        evaluator.set_deep_delay(&items[0].key, Duration::from_secs(5));

        let outcome = DeepScorer::new(&cfg, &evaluator)
            .run(items, Instant::now() + Duration::from_millis(30), &SilentProgress)
            .await;
        assert_eq!(outcome.items[0].verdict, Verdict::Recommend);
        assert!(outcome.items[0].deep_incomplete);
    }

    #[tokio::test]
    async fn incomplete_dimensions_are_a_fallback() {
        let cfg = config();
        let evaluator = ScriptedEvaluator::new();
        let items = vec![screened("Partial", 6.0)];
        let mut partial = DimensionScores::uniform(9.0);
        partial.shareability = None;
        evaluator.set_deep(&items[0].key, partial);

        let outcome = DeepScorer::new(&cfg, &evaluator)
            .run(items, far_deadline(), &SilentProgress)
            .await;
        assert!(outcome.items[0].deep_incomplete);
        assert_eq!(outcome.items[0].quality, None);
        assert_eq!(outcome.items[0].verdict, Verdict::Hold);
    }

    #[tokio::test]
    async fn platform_fit_pass_sets_verdict() {
        let mut cfg = config();
        cfg.platform_fit_pass = true;
        let evaluator = ScriptedEvaluator::new();
        let items = vec![screened("Fit", 6.0)];
        evaluator.set_deep(&items[0].key, DimensionScores::uniform(9.0));
        evaluator.set_fit(
            &items[0].key,
            PlatformFitScores {
                timeliness: 5.0,
                discussion_trigger: 5.0,
                shareability: 5.0,
                explainability: 5.0,
                unique_angle: 5.0,
            },
        );

        let outcome = DeepScorer::new(&cfg, &evaluator)
            .run(items, far_deadline(), &SilentProgress)
            .await;
        let it = &outcome.items[0];
        assert_eq!(it.platform_potential, Some(9.0));
        assert_eq!(it.platform_fit, Some(5.0));
        assert_eq!(it.verdict, Verdict::Hold);
    }

    #[tokio::test]
    async fn cache_avoids_second_call() {
        let cfg = config();
        let db = std::env::temp_dir().join(format!("curator_deep_{}.db", uuid::Uuid::now_v7()));
        let storage = Storage::open(&db).await.unwrap();
        let evaluator = ScriptedEvaluator::new();
        let items = vec![screened("Cached", 6.0)];
        evaluator.set_deep(&items[0].key, DimensionScores::uniform(7.5));

        let scorer = DeepScorer::new(&cfg, &evaluator).with_cache(&storage);
        let first = scorer.run(items.clone(), far_deadline(), &SilentProgress).await;
        assert_eq!(first.cache_hits, 0);

        let second = scorer.run(items, far_deadline(), &SilentProgress).await;
        assert_eq!(second.cache_hits, 1);
        assert_eq!(second.items[0].platform_potential, Some(7.5));
        assert_eq!(evaluator.deep_calls().len(), 1);
    }

    #[test]
    fn prompt_hash_tracks_content() {
        let a = item("Same", "news");
        let mut b = a.clone();
        assert_eq!(prompt_hash(&a), prompt_hash(&b));
        b.summary = "changed".into();
        assert_ne!(prompt_hash(&a), prompt_hash(&b));
    }
}
