//! Offline keyword scorer.
//!
//! Used when no API key is configured. Keywords match whole words only.
//! Interest is the sum of keyword hits
//! (high-priority 3.0 each, topic 1.5 each) plus a source-category bonus,
//! mapped onto [0,10] as `4 + interest / 2`. An item with no signal at all
//! lands below the hold threshold.

use async_trait::async_trait;

use curator_shared::{
    Category, DimensionScores, HeuristicConfig, Item, PlatformFitScores, Result,
};

use super::{Evaluator, ScreenResult, clamp_score};

const HIGH_PRIORITY_WEIGHT: f64 = 3.0;
const TOPIC_WEIGHT: f64 = 1.5;
const BASE_SCORE: f64 = 4.0;

/// A summary at least this long is taken as having room for depth.
const SUBSTANTIAL_SUMMARY: usize = 280;

#[derive(Debug, Clone, Copy, Default)]
struct Signals {
    high_priority: usize,
    topics: usize,
    category_bonus: f64,
    substantial: bool,
}

impl Signals {
    fn interest(&self) -> f64 {
        self.high_priority as f64 * HIGH_PRIORITY_WEIGHT
            + self.topics as f64 * TOPIC_WEIGHT
            + self.category_bonus
    }

    fn base(&self) -> f64 {
        round2(clamp_score(BASE_SCORE + self.interest() / 2.0))
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Deterministic keyword-based [`Evaluator`].
pub struct HeuristicEvaluator {
    high_priority: Vec<String>,
    topics: Vec<String>,
}

/// Lower-case, turn punctuation into spaces and pad with spaces so that
/// `" kw "` only matches whole words.
fn padded_words(text: &str) -> String {
    let cleaned: String = text
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    let joined = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");
    format!(" {joined} ")
}

impl HeuristicEvaluator {
    pub fn new(config: &HeuristicConfig) -> Self {
        let prepare = |words: &[String]| -> Vec<String> {
            words
                .iter()
                .map(|w| padded_words(w))
                .filter(|w| !w.trim().is_empty())
                .collect()
        };
        Self {
            high_priority: prepare(&config.high_priority),
            topics: prepare(&config.topics),
        }
    }

    /// Raw keyword interest of `item`, before mapping onto the score range.
    pub fn keyword_score(&self, item: &Item) -> f64 {
        self.signals(item).interest()
    }

    fn signals(&self, item: &Item) -> Signals {
        let text = padded_words(&format!("{} {}", item.title, item.summary));
        let hits = |words: &[String]| words.iter().filter(|w| text.contains(w.as_str())).count();
        let category_bonus = match item.category {
            Category::BigTech | Category::Venture => 3.0,
            Category::Media => 2.0,
            _ => 0.0,
        };
        Signals {
            high_priority: hits(&self.high_priority),
            topics: hits(&self.topics),
            category_bonus,
            substantial: item.summary.chars().count() >= SUBSTANTIAL_SUMMARY,
        }
    }
}

#[async_trait]
impl Evaluator for HeuristicEvaluator {
    fn model_id(&self) -> &str {
        "heuristic"
    }

    async fn screen_batch(&self, items: &[Item]) -> Result<Vec<ScreenResult>> {
        Ok(items
            .iter()
            .enumerate()
            .map(|(index, item)| {
                let signals = self.signals(item);
                ScreenResult {
                    index,
                    score: signals.base(),
                    reason: Some(format!(
                        "{} priority and {} topic keyword matches",
                        signals.high_priority, signals.topics
                    )),
                }
            })
            .collect())
    }

    async fn score_item(&self, item: &Item) -> Result<DimensionScores> {
        let s = self.signals(item);
        let base = s.base();
        let depth_shift = if s.substantial { 1.0 } else { -1.0 };
        let dim = |v: f64| Some(round2(clamp_score(v)));
        Ok(DimensionScores {
            curiosity: dim(base + 0.5 * s.high_priority as f64),
            insight: dim(base + depth_shift * 0.5),
            relevance: dim(BASE_SCORE + TOPIC_WEIGHT * (s.high_priority + s.topics) as f64),
            timeliness: dim(base),
            discussion: dim(base + s.category_bonus / 3.0),
            shareability: dim(base + s.category_bonus / 3.0),
            depth: dim(base + depth_shift),
        })
    }

    async fn platform_fit(&self, item: &Item) -> Result<PlatformFitScores> {
        let s = self.signals(item);
        let base = s.base();
        let fit = |v: f64| round2(clamp_score(v));
        Ok(PlatformFitScores {
            timeliness: fit(base),
            discussion_trigger: fit(base + s.category_bonus / 3.0),
            shareability: fit(base + s.category_bonus / 3.0),
            explainability: fit(if s.substantial { base } else { base - 0.5 }),
            unique_angle: fit(base - 0.5),
        })
    }
}
