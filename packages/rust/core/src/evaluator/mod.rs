//! Scoring backends used by the Screener and DeepScorer.
//!
//! Every external scoring call goes through [`Evaluator`]. Two backends
//! ship with curator: [`OpenRouterEvaluator`] (LLM over HTTP) and
//! [`HeuristicEvaluator`] (offline keyword scoring).

mod heuristic;
mod openrouter;
mod response;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use curator_shared::{CuratorError, DimensionScores, Item, PlatformFitScores, Result};

pub use heuristic::HeuristicEvaluator;
pub use openrouter::OpenRouterEvaluator;
pub use response::{extract_json, parse_dimension_scores, parse_platform_fit, parse_screen_results};

/// One item's outcome from a batch screening call.
#[derive(Debug, Clone, PartialEq)]
pub struct ScreenResult {
    /// Position of the item within the batch passed to `screen_batch`.
    pub index: usize,
    pub score: f64,
    pub reason: Option<String>,
}

/// An external scoring backend.
#[async_trait]
pub trait Evaluator: Send + Sync {
    /// Identifier of the model behind this backend (cache key component).
    fn model_id(&self) -> &str;

    /// Score a whole batch in one call. Items missing from the returned
    /// list are treated as unscored.
    async fn screen_batch(&self, items: &[Item]) -> Result<Vec<ScreenResult>>;

    /// Score the seven dimensions of a single item.
    async fn score_item(&self, item: &Item) -> Result<DimensionScores>;

    /// Score the five dimensions of the stricter platform-fit pass.
    async fn platform_fit(&self, item: &Item) -> Result<PlatformFitScores>;
}

/// Run one scoring call under both the per-call budget and the run deadline.
pub(crate) async fn call_with_budget<T, F>(call: F, per_call: Duration, deadline: Instant) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    let call_deadline = (Instant::now() + per_call).min(deadline);
    match tokio::time::timeout_at(call_deadline, call).await {
        Ok(result) => result,
        Err(_) if Instant::now() >= deadline => {
            Err(CuratorError::Timeout("run deadline reached".into()))
        }
        Err(_) => Err(CuratorError::Timeout(format!(
            "scoring call exceeded {}s",
            per_call.as_secs_f64()
        ))),
    }
}

/// Clamp a backend score onto [0,10].
pub(crate) fn clamp_score(value: f64) -> f64 {
    value.clamp(0.0, 10.0)
}

/// Prompt text shared by the HTTP backend.
pub(crate) mod prompts {
    use curator_shared::Item;

    const SUMMARY_CHARS: usize = 300;

    fn short_summary(item: &Item) -> String {
        let summary: String = item.summary.chars().take(SUMMARY_CHARS).collect();
        summary.replace('\n', " ")
    }

    pub fn screening(items: &[Item]) -> String {
        let mut listing = String::new();
        for (i, item) in items.iter().enumerate() {
            listing.push_str(&format!(
                "[{i}] {}\n    source: {} | category: {}\n    summary: {}\n\n",
                item.title,
                item.source,
                item.category,
                short_summary(item)
            ));
        }
        format!(
            "You curate AI and technology content for an audience of industry practitioners.\n\
             Rate how worth sharing each item below is on a 0-10 scale.\n\n\
             Prefer items that explain why something happened, carry numbers or cases showing a \
             trend, invite debate, or give practitioners something they can apply.\n\
             Score low: bare product launches, papers too specialized to explain, well-known \
             information, purely local stories, gossip without industry implications.\n\n\
             ## Items\n{listing}\
             ## Response\n\
             Reply with a JSON array only, one object per item:\n\
             [{{\"index\": 0, \"score\": 7.5, \"reason\": \"one line\"}}]"
        )
    }

    pub fn deep(item: &Item) -> String {
        format!(
            "Evaluate this item as material for a post aimed at AI and technology practitioners.\n\n\
             title: {}\nsource: {}\ncategory: {}\nsummary: {}\n\n\
             Score each dimension from 0 to 10:\n\
             - curiosity: does the headline alone make people want to know more?\n\
             - insight: does the reader take away a new perspective or usable information?\n\
             - relevance: does it matter to people working in the industry?\n\
             - timeliness: is there a reason to share it right now?\n\
             - discussion: will people want to add their own opinion?\n\
             - shareability: would someone forward it to a colleague?\n\
             - depth: can it be explained beyond a summary, with context and implications?\n\n\
             Reply with a JSON object only:\n\
             {{\"curiosity\": 7, \"insight\": 8, \"relevance\": 7, \"timeliness\": 6, \
             \"discussion\": 7, \"shareability\": 6, \"depth\": 7}}",
            item.title,
            item.source,
            item.category,
            short_summary(item)
        )
    }

    pub fn platform_fit(item: &Item) -> String {
        format!(
            "Judge strictly whether this item fits a professional social feed today.\n\n\
             title: {}\nsource: {}\ncategory: {}\nsummary: {}\n\n\
             Score each dimension from 0 to 10:\n\
             - timeliness: is this the moment to post it?\n\
             - discussion_trigger: will it start a conversation in the comments?\n\
             - shareability: would readers pass it on?\n\
             - explainability: can a non-specialist follow it?\n\
             - unique_angle: is there a take that is not obvious?\n\n\
             Reply with a JSON object only:\n\
             {{\"timeliness\": 7, \"discussion_trigger\": 6, \"shareability\": 6, \
             \"explainability\": 8, \"unique_angle\": 5}}",
            item.title,
            item.source,
            item.category,
            short_summary(item)
        )
    }
}
