//! Weighted aggregates over dimension scores.
//!
//! Each aggregate is `Σ(score × weight) / Σ(weight)` over its table and is
//! only defined when every dimension in that table has been scored.

use curator_shared::{DimensionScores, PlatformFitScores, ScoringWeights};

fn weighted(pairs: &[(Option<f64>, f64)], total: f64) -> Option<f64> {
    let mut sum = 0.0;
    for (score, weight) in pairs {
        sum += (*score)? * weight;
    }
    Some(sum / total)
}

/// Overall-quality aggregate over all seven dimensions.
pub fn quality(scores: &DimensionScores, weights: &ScoringWeights) -> Option<f64> {
    let w = &weights.quality;
    weighted(
        &[
            (scores.curiosity, w.curiosity),
            (scores.insight, w.insight),
            (scores.relevance, w.relevance),
            (scores.timeliness, w.timeliness),
            (scores.discussion, w.discussion),
            (scores.shareability, w.shareability),
            (scores.depth, w.depth),
        ],
        weights.quality_total,
    )
}

/// Platform-potential aggregate; the ranking score.
pub fn platform_potential(scores: &DimensionScores, weights: &ScoringWeights) -> Option<f64> {
    let w = &weights.potential;
    weighted(
        &[
            (scores.curiosity, w.curiosity),
            (scores.insight, w.insight),
            (scores.discussion, w.discussion),
            (scores.shareability, w.shareability),
            (scores.depth, w.depth),
        ],
        weights.potential_total,
    )
}

/// Stricter platform-fit aggregate.
pub fn platform_fit(scores: &PlatformFitScores, weights: &ScoringWeights) -> f64 {
    let w = &weights.platform_fit;
    let sum = scores.timeliness * w.timeliness
        + scores.discussion_trigger * w.discussion_trigger
        + scores.shareability * w.shareability
        + scores.explainability * w.explainability
        + scores.unique_angle * w.unique_angle;
    sum / weights.platform_fit_total
}
