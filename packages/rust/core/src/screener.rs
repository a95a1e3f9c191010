//! Coarse batch screening.
//!
//! Items first pass through the immediate-reject rules, then the rest are
//! scored in fixed-size batches with bounded concurrency. A failed batch
//! leaves its items unscored on `hold`, never drops them.

use std::collections::{HashMap, HashSet};

use futures::stream::{self, StreamExt};
use regex::{Regex, RegexBuilder};
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use curator_shared::{Category, CurationConfig, CuratorError, Item, Result, Stage, Verdict};

use crate::evaluator::{Evaluator, HeuristicEvaluator, ScreenResult, call_with_budget};
use crate::pipeline::ProgressReporter;

// ---------------------------------------------------------------------------
// Immediate-reject rules
// ---------------------------------------------------------------------------

/// Why an item was rejected before batch scoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RejectReason {
    /// Bare product-launch announcement with no broader context.
    ProductLaunch,
    /// Needs specialist background to parse.
    Specialist,
    /// Reports only well-known information.
    WellKnown,
    /// Purely local or regional story.
    Regional,
    /// Gossip or scandal with no industry implication.
    Gossip,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ProductLaunch => "product_launch",
            Self::Specialist => "specialist",
            Self::WellKnown => "well_known",
            Self::Regional => "regional",
            Self::Gossip => "gossip",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::ProductLaunch => "bare product launch without broader context",
            Self::Specialist => "requires specialist background",
            Self::WellKnown => "only well-known information",
            Self::Regional => "local story outside audience interest",
            Self::Gossip => "gossip without industry implication",
        }
    }
}

const LAUNCH: &str = r"^(introducing|announcing|meet)\b|\b(launches|now available|is here|rolls out|released?|v\d+(\.\d+)+)\b";
const CONTEXT: &str = r"\b(why|because|market|industry|strategy|compet\w*|pricing|shift|trend|implications?|analysis)\b";
const SPECIALIST: &str = r"\b(theorem|lemma|corollary|convergence (rate|bound)s?|asymptotic|stochastic differential|manifolds?|eigen\w+|ablation stud(y|ies)|hilbert space|variational bound)\b";
const WELL_KNOWN: &str = r"\b(what is|beginner'?s guide|\w+ 101|introduction to|everything you need to know|explained|top \d+ \w+)\b";
const REGIONAL: &str = r"\b(city council|county (board|officials)|school board|town hall|local (news|election|elections|police)|state legislature|mayor)\b";
const GOSSIP: &str = r"\b(scandal|affair|divorce|feud|rumou?rs?|gossip|drama|slams|leaked (texts|photos|messages))\b";
const IMPLICATION: &str = r"\b(industry|market|regulat\w*|antitrust|lawsuit|investors?|shares|stock|governance|board)\b";

fn compile(pattern: &str) -> Result<Regex> {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .map_err(|e| CuratorError::config(format!("invalid reject rule: {e}")))
}

/// Compiled immediate-reject heuristics. The first matching rule wins, in
/// [`RejectReason`] declaration order.
pub struct RejectRules {
    launch: Regex,
    context: Regex,
    specialist: Regex,
    well_known: Regex,
    regional: Regex,
    gossip: Regex,
    implication: Regex,
}

impl RejectRules {
    pub fn new() -> Result<Self> {
        Ok(Self {
            launch: compile(LAUNCH)?,
            context: compile(CONTEXT)?,
            specialist: compile(SPECIALIST)?,
            well_known: compile(WELL_KNOWN)?,
            regional: compile(REGIONAL)?,
            gossip: compile(GOSSIP)?,
            implication: compile(IMPLICATION)?,
        })
    }

    pub fn check(&self, item: &Item) -> Option<RejectReason> {
        let title = item.title.as_str();
        let text = format!("{} {}", item.title, item.summary);

        if self.launch.is_match(title) && !self.context.is_match(&text) {
            return Some(RejectReason::ProductLaunch);
        }
        if self.specialist.is_match(title) {
            return Some(RejectReason::Specialist);
        }
        if self.well_known.is_match(title) {
            return Some(RejectReason::WellKnown);
        }
        if self.regional.is_match(&text) {
            return Some(RejectReason::Regional);
        }
        if self.gossip.is_match(&text) && !self.implication.is_match(&text) {
            return Some(RejectReason::Gossip);
        }
        None
    }
}

// ---------------------------------------------------------------------------
// Screener
// ---------------------------------------------------------------------------

/// Result of the screening stage.
#[derive(Debug)]
pub struct ScreenOutcome {
    /// Every input item, annotated, in input order.
    pub items: Vec<Item>,
    pub immediate_rejects: usize,
    /// Research items dropped beyond the per-run research limit.
    pub research_capped: usize,
    pub batches_failed: usize,
}

pub struct Screener<'a> {
    config: &'a CurationConfig,
    evaluator: &'a dyn Evaluator,
    rules: RejectRules,
    ranker: HeuristicEvaluator,
}

impl<'a> Screener<'a> {
    pub fn new(config: &'a CurationConfig, evaluator: &'a dyn Evaluator) -> Result<Self> {
        Ok(Self {
            config,
            evaluator,
            rules: RejectRules::new()?,
            ranker: HeuristicEvaluator::new(&config.heuristic),
        })
    }

    /// Screen `items`. Never fails: scoring errors fall back per batch.
    #[instrument(skip_all, fields(items = items.len(), batch_size = self.config.batch_size))]
    pub async fn run(
        &self,
        mut items: Vec<Item>,
        deadline: Instant,
        progress: &dyn ProgressReporter,
    ) -> ScreenOutcome {
        let mut immediate_rejects = 0;
        let mut pending: Vec<usize> = Vec::with_capacity(items.len());

        for (idx, item) in items.iter_mut().enumerate() {
            let reason = if self.config.immediate_reject {
                self.rules.check(item)
            } else {
                None
            };
            match reason {
                Some(reason) => {
                    debug!(item = %item.key, reason = reason.as_str(), "immediate reject");
                    item.screen_score = Some(0.0);
                    item.verdict = Verdict::Reject;
                    item.reason = Some(reason.description().to_string());
                    item.advance(Stage::Screened);
                    immediate_rejects += 1;
                }
                None => pending.push(idx),
            }
        }

        let research_capped = self.cap_research(&mut items, &mut pending);

        let batches: Vec<Vec<usize>> = pending
            .chunks(self.config.batch_size)
            .map(<[usize]>::to_vec)
            .collect();
        let total_batches = batches.len();

        let calls = batches.into_iter().enumerate().map(|(batch_no, indices)| {
            let batch: Vec<Item> = indices.iter().map(|&i| items[i].clone()).collect();
            async move {
                let result = call_with_budget(
                    self.evaluator.screen_batch(&batch),
                    self.config.per_call_timeout,
                    deadline,
                )
                .await;
                (batch_no, indices, result)
            }
        });

        let mut results: Vec<(usize, Vec<usize>, Result<Vec<ScreenResult>>)> = Vec::new();
        let mut done = 0;
        let mut stream = stream::iter(calls).buffer_unordered(self.config.screen_concurrency);
        while let Some(result) = stream.next().await {
            done += 1;
            progress.batch_screened(done, total_batches);
            results.push(result);
        }
        drop(stream);

        let mut batches_failed = 0;
        for (batch_no, indices, result) in results {
            match result {
                Ok(scored) => {
                    let by_index: HashMap<usize, ScreenResult> =
                        scored.into_iter().map(|r| (r.index, r)).collect();
                    for (pos, &idx) in indices.iter().enumerate() {
                        let item = &mut items[idx];
                        match by_index.get(&pos) {
                            Some(r) => {
                                item.screen_score = Some(r.score);
                                item.verdict = Verdict::from_score(r.score, &self.config.thresholds);
                                item.reason = r.reason.clone();
                            }
                            None => {
                                debug!(item = %item.key, batch = batch_no, "item missing from batch reply");
                                mark_unscored(item, "not scored by screener");
                            }
                        }
                        item.advance(Stage::Screened);
                    }
                }
                Err(e) => {
                    if e.is_scoring_failure() {
                        warn!(batch = batch_no, size = indices.len(), error = %e, "screening batch failed");
                    } else {
                        error!(batch = batch_no, size = indices.len(), error = %e, "screening batch failed");
                    }
                    batches_failed += 1;
                    for &idx in &indices {
                        let item = &mut items[idx];
                        mark_unscored(item, "screening failed");
                        item.advance(Stage::Screened);
                    }
                }
            }
        }

        info!(
            immediate_rejects,
            research_capped,
            batches = total_batches,
            batches_failed,
            "screening complete"
        );

        ScreenOutcome {
            items,
            immediate_rejects,
            research_capped,
            batches_failed,
        }
    }

    /// Keep only the top `research_limit` pending research items, ranked by
    /// keyword interest, then recency, then key. The rest are rejected
    /// before any backend call.
    fn cap_research(&self, items: &mut [Item], pending: &mut Vec<usize>) -> usize {
        let limit = self.config.research_limit;
        if limit == 0 {
            return 0;
        }
        let mut research: Vec<(usize, f64)> = pending
            .iter()
            .copied()
            .filter(|&i| items[i].category == Category::Research)
            .map(|i| (i, self.ranker.keyword_score(&items[i])))
            .collect();
        if research.len() <= limit {
            return 0;
        }
        research.sort_by(|(a, sa), (b, sb)| {
            sb.total_cmp(sa)
                .then_with(|| items[*b].published_at.cmp(&items[*a].published_at))
                .then_with(|| items[*a].key.cmp(&items[*b].key))
        });

        let dropped: HashSet<usize> = research[limit..].iter().map(|&(i, _)| i).collect();
        for &idx in &dropped {
            let item = &mut items[idx];
            debug!(item = %item.key, limit, "research limit exceeded");
            item.screen_score = None;
            item.verdict = Verdict::Reject;
            item.reason = Some("research limit exceeded".to_string());
            item.advance(Stage::Screened);
        }
        pending.retain(|i| !dropped.contains(i));
        dropped.len()
    }
}

fn mark_unscored(item: &mut Item, reason: &str) {
    item.screen_score = None;
    item.verdict = Verdict::Hold;
    item.reason = Some(reason.to_string());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::SilentProgress;
    use crate::testing::{ScriptedEvaluator, at, config, item};
    use std::time::Duration;

    fn far_deadline() -> Instant {
        Instant::now() + Duration::from_secs(60)
    }

    #[test]
    fn reject_rules_classify() {
        let rules = RejectRules::new().unwrap();
        let check = |title: &str, summary: &str| {
            let mut it = item(title, "research");
            it.summary = summary.into();
            rules.check(&it)
        };

        assert_eq!(check("Introducing Widget Pro 2", "Available today."), Some(RejectReason::ProductLaunch));
        assert_eq!(
            check("Introducing Widget Pro 2", "Why the pricing shift matters for the market."),
            None
        );
        assert_eq!(check("A convergence bound for stochastic differential games", ""), Some(RejectReason::Specialist));
        assert_eq!(check("What is a transformer? A beginner's guide", ""), Some(RejectReason::WellKnown));
        assert_eq!(check("City council approves new parking rules", ""), Some(RejectReason::Regional));
        assert_eq!(check("CEO feud goes public", "Celebrity drama."), Some(RejectReason::Gossip));
        assert_eq!(check("CEO feud goes public", "Investors worry about governance."), None);
        assert_eq!(check("How inference costs reshape model design", ""), None);
    }

    #[tokio::test]
    async fn batches_of_configured_size() {
        let cfg = config();
        let evaluator = ScriptedEvaluator::new();
        let items: Vec<Item> = (0..32).map(|i| item(&format!("Story {i}"), "news")).collect();
        for it in &items {
            evaluator.set_screen(&it.key, 6.0);
        }
        let screener = Screener::new(&cfg, &evaluator).unwrap();
        let outcome = screener.run(items, far_deadline(), &SilentProgress).await;

        assert_eq!(evaluator.batch_sizes(), vec![2, 15, 15]);
        assert!(outcome.items.iter().all(|i| i.screen_score == Some(6.0)));
        assert!(outcome.items.iter().all(|i| i.verdict == Verdict::Hold));
        assert!(outcome.items.iter().all(|i| i.stage == Stage::Screened));
    }

    #[tokio::test]
    async fn verdict_follows_thresholds() {
        let cfg = config();
        let evaluator = ScriptedEvaluator::new();
        let items = vec![
            item("Alpha", "news"),
            item("Beta", "news"),
            item("Gamma", "news"),
        ];
        evaluator.set_screen(&items[0].key, 7.0);
        evaluator.set_screen(&items[1].key, 5.0);
        evaluator.set_screen(&items[2].key, 4.999);
        let outcome = Screener::new(&cfg, &evaluator)
            .unwrap()
            .run(items, far_deadline(), &SilentProgress)
            .await;
        let verdicts: Vec<Verdict> = outcome.items.iter().map(|i| i.verdict).collect();
        assert_eq!(verdicts, vec![Verdict::Recommend, Verdict::Hold, Verdict::Reject]);
    }

    #[tokio::test]
    async fn failed_batch_keeps_items_on_hold() {
        let mut cfg = config();
        cfg.batch_size = 2;
        let evaluator = ScriptedEvaluator::new();
        let items = vec![
            item("One", "news"),
            item("Two", "news"),
            item("Three", "news"),
        ];
        for it in &items {
            evaluator.set_screen(&it.key, 8.0);
        }
        evaluator.fail_screen(&items[0].key);

        let outcome = Screener::new(&cfg, &evaluator)
            .unwrap()
            .run(items, far_deadline(), &SilentProgress)
            .await;
        assert_eq!(outcome.batches_failed, 1);
        assert_eq!(outcome.items.len(), 3);
        assert_eq!(outcome.items[0].screen_score, None);
        assert_eq!(outcome.items[0].verdict, Verdict::Hold);
        assert_eq!(outcome.items[1].screen_score, None);
        assert_eq!(outcome.items[2].verdict, Verdict::Recommend);
    }

    #[tokio::test]
    async fn non_scoring_error_still_falls_back_to_hold() {
        let mut cfg = config();
        cfg.batch_size = 1;
        let evaluator = ScriptedEvaluator::new();
        let items = vec![item("Broken", "news"), item("Fine", "news")];
        evaluator.set_screen(&items[1].key, 7.0);
        evaluator.fail_screen_internal(&items[0].key);

        let outcome = Screener::new(&cfg, &evaluator)
            .unwrap()
            .run(items, far_deadline(), &SilentProgress)
            .await;
        assert_eq!(outcome.batches_failed, 1);
        assert_eq!(outcome.items[0].verdict, Verdict::Hold);
        assert_eq!(outcome.items[0].reason.as_deref(), Some("screening failed"));
        assert_eq!(outcome.items[1].verdict, Verdict::Recommend);
    }

    #[tokio::test]
    async fn items_missing_from_reply_stay_unscored() {
        let cfg = config();
        let evaluator = ScriptedEvaluator::new();
        let items = vec![item("Scored", "news"), item("Forgotten", "news")];
        evaluator.set_screen(&items[0].key, 3.0);
        let outcome = Screener::new(&cfg, &evaluator)
            .unwrap()
            .run(items, far_deadline(), &SilentProgress)
            .await;
        assert_eq!(outcome.items[0].verdict, Verdict::Reject);
        assert_eq!(outcome.items[1].screen_score, None);
        assert_eq!(outcome.items[1].verdict, Verdict::Hold);
        assert_eq!(outcome.batches_failed, 0);
    }

    #[tokio::test]
    async fn slow_batch_times_out_to_hold() {
        let mut cfg = config();
        cfg.per_call_timeout = Duration::from_millis(50);
        let evaluator = ScriptedEvaluator::new();
        let items = vec![item("Slow", "news")];
        evaluator.set_screen(&items[0].key, 9.0);
        evaluator.set_screen_delay(Duration::from_secs(5));

        let outcome = Screener::new(&cfg, &evaluator)
            .unwrap()
            .run(items, far_deadline(), &SilentProgress)
            .await;
        assert_eq!(outcome.batches_failed, 1);
        assert_eq!(outcome.items[0].verdict, Verdict::Hold);
    }

    #[tokio::test]
    async fn immediate_rejects_skip_the_backend() {
        let cfg = config();
        let evaluator = ScriptedEvaluator::new();
        let items = vec![item("Introducing Widget Pro 2", "news")];
        let outcome = Screener::new(&cfg, &evaluator)
            .unwrap()
            .run(items, far_deadline(), &SilentProgress)
            .await;
        assert_eq!(outcome.immediate_rejects, 1);
        assert_eq!(outcome.items[0].verdict, Verdict::Reject);
        assert!(outcome.items[0].reason.as_deref().unwrap().contains("product launch"));
        assert!(evaluator.batch_sizes().is_empty());
    }

    #[tokio::test]
    async fn immediate_rejects_can_be_disabled() {
        let mut cfg = config();
        cfg.immediate_reject = false;
        let evaluator = ScriptedEvaluator::new();
        let items = vec![item("Introducing Widget Pro 2", "news")];
        evaluator.set_screen(&items[0].key, 6.0);
        let outcome = Screener::new(&cfg, &evaluator)
            .unwrap()
            .run(items, far_deadline(), &SilentProgress)
            .await;
        assert_eq!(outcome.immediate_rejects, 0);
        assert_eq!(outcome.items[0].verdict, Verdict::Hold);
    }

    #[tokio::test]
    async fn research_beyond_limit_is_rejected_before_scoring() {
        let mut cfg = config();
        cfg.research_limit = 2;
        let evaluator = ScriptedEvaluator::new();
        let mut items = vec![
            item("Plain results on graphs", "research"),
            item("Agents that plan with LLM tools", "research"),
            item("Sparse attention revisited", "research"),
            item("Chip export rules tighten", "news"),
            item("LLM reasoning benchmarks", "research"),
        ];
        items[0].published_at = Some(at(9));
        items[2].published_at = Some(at(10));
        for it in &items {
            evaluator.set_screen(&it.key, 6.0);
        }

        let outcome = Screener::new(&cfg, &evaluator)
            .unwrap()
            .run(items, far_deadline(), &SilentProgress)
            .await;

        assert_eq!(outcome.research_capped, 2);
        assert_eq!(evaluator.batch_sizes(), vec![3]);
        let capped: Vec<&str> = outcome
            .items
            .iter()
            .filter(|i| i.reason.as_deref() == Some("research limit exceeded"))
            .map(|i| i.title.as_str())
            .collect();
        assert_eq!(capped, vec!["Plain results on graphs", "Sparse attention revisited"]);
        assert!(
            outcome
                .items
                .iter()
                .filter(|i| capped.contains(&i.title.as_str()))
                .all(|i| i.verdict == Verdict::Reject && i.screen_score.is_none())
        );
        assert_eq!(outcome.items[3].screen_score, Some(6.0));
    }

    #[tokio::test]
    async fn zero_research_limit_disables_cap() {
        let mut cfg = config();
        cfg.research_limit = 0;
        let evaluator = ScriptedEvaluator::new();
        let items: Vec<Item> = (0..5).map(|i| item(&format!("Paper {i}"), "research")).collect();
        for it in &items {
            evaluator.set_screen(&it.key, 6.0);
        }
        let outcome = Screener::new(&cfg, &evaluator)
            .unwrap()
            .run(items, far_deadline(), &SilentProgress)
            .await;
        assert_eq!(outcome.research_capped, 0);
        assert!(outcome.items.iter().all(|i| i.screen_score == Some(6.0)));
    }
}
