//! Core domain types for the curation pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::VerdictThresholds;

// ---------------------------------------------------------------------------
// RunId
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper for pipeline run identifiers (time-sortable).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub Uuid);

impl RunId {
    /// Generate a new time-sortable run identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for RunId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

// ---------------------------------------------------------------------------
// Category
// ---------------------------------------------------------------------------

/// Source category of a collected item.
///
/// Parsing is lenient: collector labels such as `bigtech`, `vc` or `podcast`
/// map onto the canonical set, anything unknown becomes [`Category::Other`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Category {
    BigTech,
    Venture,
    News,
    Research,
    Community,
    Regional,
    Media,
    Other,
}

impl Category {
    /// Canonical label used in config files and reports.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BigTech => "big-tech",
            Self::Venture => "venture",
            Self::News => "news",
            Self::Research => "research",
            Self::Community => "community",
            Self::Regional => "regional",
            Self::Media => "media",
            Self::Other => "other",
        }
    }

    /// Map a collector label onto a category.
    pub fn parse(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "big-tech" | "bigtech" => Self::BigTech,
            "venture" | "vc" => Self::Venture,
            "news" => Self::News,
            "research" | "paper" | "arxiv" => Self::Research,
            "community" => Self::Community,
            "regional" | "local" | "korean" => Self::Regional,
            "media" | "podcast" | "newsletter" | "youtube" => Self::Media,
            _ => Self::Other,
        }
    }
}

impl From<String> for Category {
    fn from(s: String) -> Self {
        Self::parse(&s)
    }
}

impl From<Category> for String {
    fn from(c: Category) -> Self {
        c.as_str().to_string()
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Verdict
// ---------------------------------------------------------------------------

/// Categorical outcome of scoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Recommend,
    Hold,
    Reject,
}

impl Verdict {
    /// Derive a verdict from an authoritative score via fixed thresholds.
    ///
    /// `score >= recommend` → recommend, `score >= hold` → hold, else reject.
    /// NaN compares false everywhere and therefore rejects.
    pub fn from_score(score: f64, thresholds: &VerdictThresholds) -> Self {
        if score >= thresholds.recommend {
            Self::Recommend
        } else if score >= thresholds.hold {
            Self::Hold
        } else {
            Self::Reject
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Recommend => "recommend",
            Self::Hold => "hold",
            Self::Reject => "reject",
        }
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Stage
// ---------------------------------------------------------------------------

/// Lifecycle position of an item. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Collected,
    Deduped,
    Screened,
    DeepScored,
    Grouped,
    Selected,
}

// ---------------------------------------------------------------------------
// Scores
// ---------------------------------------------------------------------------

/// The seven per-dimension scores, each in [0,10] once computed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DimensionScores {
    pub curiosity: Option<f64>,
    pub insight: Option<f64>,
    pub relevance: Option<f64>,
    pub timeliness: Option<f64>,
    pub discussion: Option<f64>,
    pub shareability: Option<f64>,
    pub depth: Option<f64>,
}

impl DimensionScores {
    /// All seven dimensions set to the same value.
    pub fn uniform(value: f64) -> Self {
        Self {
            curiosity: Some(value),
            insight: Some(value),
            relevance: Some(value),
            timeliness: Some(value),
            discussion: Some(value),
            shareability: Some(value),
            depth: Some(value),
        }
    }

    /// Whether every dimension has been scored.
    pub fn is_complete(&self) -> bool {
        self.values().iter().all(Option::is_some)
    }

    /// Dimension values in declaration order.
    pub fn values(&self) -> [Option<f64>; 7] {
        [
            self.curiosity,
            self.insight,
            self.relevance,
            self.timeliness,
            self.discussion,
            self.shareability,
            self.depth,
        ]
    }
}

/// Dimensions of the stricter platform-fit pass.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlatformFitScores {
    pub timeliness: f64,
    pub discussion_trigger: f64,
    pub shareability: f64,
    pub explainability: f64,
    pub unique_angle: f64,
}

// ---------------------------------------------------------------------------
// CollectedItem / Item
// ---------------------------------------------------------------------------

/// An item as handed over by the collector stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectedItem {
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub source: String,
    #[serde(default = "default_category")]
    pub category: Category,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<DateTime<Utc>>,
}

fn default_category() -> Category {
    Category::Other
}

/// The unit flowing through the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Item {
    pub title: String,
    /// Original source URL.
    pub url: String,
    /// Normalized identity key derived from `url`.
    pub key: String,
    pub summary: String,
    pub source: String,
    pub category: Category,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<DateTime<Utc>>,

    /// Coarse score from the screener, absent if its batch failed.
    #[serde(default)]
    pub screen_score: Option<f64>,
    #[serde(default)]
    pub scores: DimensionScores,
    /// Overall-quality aggregate.
    #[serde(default)]
    pub quality: Option<f64>,
    /// Platform-potential aggregate, the ranking score.
    #[serde(default)]
    pub platform_potential: Option<f64>,
    /// Stricter platform-fit aggregate, only when that pass is enabled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform_fit: Option<f64>,
    pub verdict: Verdict,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Set when deep scoring was attempted and did not complete.
    #[serde(default)]
    pub deep_incomplete: bool,
    /// Theme-cluster identifier, set only for members of valid clusters.
    #[serde(default)]
    pub theme: Option<String>,
    pub stage: Stage,
}

impl Item {
    /// Build a pipeline item from a collected item and its normalized key.
    pub fn from_collected(collected: CollectedItem, key: String) -> Self {
        Self {
            title: collected.title,
            url: collected.url,
            key,
            summary: collected.summary,
            source: collected.source,
            category: collected.category,
            published_at: collected.published_at,
            screen_score: None,
            scores: DimensionScores::default(),
            quality: None,
            platform_potential: None,
            platform_fit: None,
            verdict: Verdict::Hold,
            reason: None,
            deep_incomplete: false,
            theme: None,
            stage: Stage::Collected,
        }
    }

    /// The score used for ranking: platform-potential, falling back to the
    /// screener score, then zero.
    pub fn ranking_score(&self) -> f64 {
        self.platform_potential
            .or(self.screen_score)
            .unwrap_or(0.0)
    }

    /// Move the item forward in its lifecycle. Never moves backward.
    pub fn advance(&mut self, stage: Stage) {
        if stage > self.stage {
            self.stage = stage;
        }
    }
}

// ---------------------------------------------------------------------------
// Theme clusters
// ---------------------------------------------------------------------------

/// Kind of shared attribute a theme cluster forms around.
///
/// Declaration order is the precedence order used when an item matches
/// attributes of several kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttributeKind {
    Organization,
    Technology,
    Trend,
    Problem,
}

impl AttributeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Organization => "org",
            Self::Technology => "tech",
            Self::Trend => "trend",
            Self::Problem => "problem",
        }
    }
}

/// A transient grouping of related items (never persisted).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThemeCluster {
    /// Deterministic identifier, e.g. `org:openai`.
    pub id: String,
    pub kind: AttributeKind,
    /// Shared attribute label.
    pub attribute: String,
    /// Normalized keys of member items.
    pub members: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn thresholds() -> VerdictThresholds {
        VerdictThresholds {
            recommend: 7.0,
            hold: 5.0,
        }
    }

    #[test]
    fn run_id_roundtrip() {
        let id = RunId::new();
        let s = id.to_string();
        let parsed: RunId = s.parse().expect("parse RunId");
        assert_eq!(id, parsed);
    }

    #[test]
    fn category_parses_collector_labels() {
        assert_eq!(Category::parse("bigtech"), Category::BigTech);
        assert_eq!(Category::parse("VC"), Category::Venture);
        assert_eq!(Category::parse("korean"), Category::Regional);
        assert_eq!(Category::parse("podcast"), Category::Media);
        assert_eq!(Category::parse("big_tech"), Category::BigTech);
        assert_eq!(Category::parse("something-else"), Category::Other);
    }

    #[test]
    fn category_serializes_canonically() {
        let json = serde_json::to_string(&Category::BigTech).unwrap();
        assert_eq!(json, r#""big-tech""#);
        let parsed: Category = serde_json::from_str(r#""vc""#).unwrap();
        assert_eq!(parsed, Category::Venture);
    }

    #[test]
    fn verdict_threshold_boundaries() {
        let t = thresholds();
        assert_eq!(Verdict::from_score(7.0, &t), Verdict::Recommend);
        assert_eq!(Verdict::from_score(6.999, &t), Verdict::Hold);
        assert_eq!(Verdict::from_score(5.0, &t), Verdict::Hold);
        assert_eq!(Verdict::from_score(4.999, &t), Verdict::Reject);
        assert_eq!(Verdict::from_score(f64::NAN, &t), Verdict::Reject);
    }

    #[test]
    fn dimension_completeness() {
        let mut scores = DimensionScores::uniform(5.0);
        assert!(scores.is_complete());
        scores.depth = None;
        assert!(!scores.is_complete());
        assert!(!DimensionScores::default().is_complete());
    }

    #[test]
    fn collected_item_defaults() {
        let json = r#"{"title":"t","url":"https://example.com/a"}"#;
        let item: CollectedItem = serde_json::from_str(json).unwrap();
        assert_eq!(item.category, Category::Other);
        assert!(item.summary.is_empty());
        assert!(item.published_at.is_none());
    }

    #[test]
    fn item_ranking_score_falls_back() {
        let collected = CollectedItem {
            title: "t".into(),
            url: "https://example.com/a".into(),
            summary: String::new(),
            source: "s".into(),
            category: Category::News,
            published_at: None,
        };
        let mut item = Item::from_collected(collected, "example.com/a".into());
        assert_eq!(item.ranking_score(), 0.0);
        item.screen_score = Some(6.0);
        assert_eq!(item.ranking_score(), 6.0);
        item.platform_potential = Some(8.5);
        assert_eq!(item.ranking_score(), 8.5);
    }

    #[test]
    fn item_stage_never_regresses() {
        let collected = CollectedItem {
            title: "t".into(),
            url: "u".into(),
            summary: String::new(),
            source: String::new(),
            category: Category::News,
            published_at: None,
        };
        let mut item = Item::from_collected(collected, "u".into());
        item.advance(Stage::Screened);
        item.advance(Stage::Deduped);
        assert_eq!(item.stage, Stage::Screened);
    }
}
