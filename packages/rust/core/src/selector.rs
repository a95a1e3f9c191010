//! Final candidate selection with diversity quotas.
//!
//! Each eligible item (verdict other than `reject`) belongs to at most one
//! quota bucket: the first configured quota listing its category. Quotas
//! are filled in configuration order with the bucket's best items, then
//! the remaining slots go to the best items overall. The result is sorted
//! by score, then recency, then key.

use std::cmp::Ordering;
use std::collections::HashSet;

use tracing::{debug, info, instrument};

use curator_shared::{Item, QuotaConfig, Stage, Verdict};

/// Result of the selection stage.
#[derive(Debug)]
pub struct Selection {
    pub selected: Vec<Item>,
    /// Quotas whose bucket had no eligible item.
    pub quotas_waived: usize,
}

/// Presentation order: ranking score descending, then more recent first
/// (undated last), then key ascending.
pub fn presentation_order(a: &Item, b: &Item) -> Ordering {
    b.ranking_score()
        .total_cmp(&a.ranking_score())
        .then_with(|| match (a.published_at, b.published_at) {
            (Some(x), Some(y)) => y.cmp(&x),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        })
        .then_with(|| a.key.cmp(&b.key))
}

fn bucket_of(item: &Item, quotas: &[QuotaConfig]) -> Option<usize> {
    quotas.iter().position(|q| q.categories.contains(&item.category))
}

/// Pick up to `max` items from `items`.
#[instrument(skip_all, fields(items = items.len(), max))]
pub fn select(items: &[Item], quotas: &[QuotaConfig], max: usize) -> Selection {
    let mut eligible: Vec<&Item> = items
        .iter()
        .filter(|item| item.verdict != Verdict::Reject)
        .collect();
    eligible.sort_by(|a, b| presentation_order(a, b));

    let mut chosen: Vec<usize> = Vec::new();
    let mut taken: HashSet<usize> = HashSet::new();
    let mut quotas_waived = 0;

    for (bucket, quota) in quotas.iter().enumerate() {
        let members: Vec<usize> = (0..eligible.len())
            .filter(|&i| bucket_of(eligible[i], quotas) == Some(bucket))
            .collect();
        if members.is_empty() {
            info!(quota = %quota.name, "no eligible items, quota waived");
            quotas_waived += 1;
            continue;
        }
        for i in members.into_iter().take(quota.min) {
            if chosen.len() >= max {
                break;
            }
            if taken.insert(i) {
                debug!(quota = %quota.name, item = %eligible[i].key, "selected by quota");
                chosen.push(i);
            }
        }
    }

    for i in 0..eligible.len() {
        if chosen.len() >= max {
            break;
        }
        if taken.insert(i) {
            chosen.push(i);
        }
    }

    let mut selected: Vec<Item> = chosen
        .into_iter()
        .map(|i| {
            let mut item = eligible[i].clone();
            item.advance(Stage::Selected);
            item
        })
        .collect();
    selected.sort_by(presentation_order);

    info!(selected = selected.len(), quotas_waived, "selection complete");
    Selection {
        selected,
        quotas_waived,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{at, config, scored};

    fn titles(selection: &Selection) -> Vec<&str> {
        selection.selected.iter().map(|i| i.title.as_str()).collect()
    }

    #[test]
    fn research_quota_forces_inclusion() {
        let items = vec![
            scored("A", "research", 6.2),
            scored("B", "news", 8.9),
            scored("C", "news", 9.5),
        ];
        let selection = select(&items, &config().quotas, 2);
        assert_eq!(titles(&selection), vec!["C", "A"]);
        assert_eq!(selection.quotas_waived, 0);
    }

    #[test]
    fn both_buckets_represented_regardless_of_rank() {
        let items = vec![
            scored("Paper", "research", 5.1),
            scored("Podcast", "podcast", 9.9),
            scored("Pod2", "podcast", 9.8),
            scored("Chip rules", "news", 5.5),
        ];
        let selection = select(&items, &config().quotas, 2);
        let names = titles(&selection);
        assert!(names.contains(&"Paper"));
        assert!(names.contains(&"Chip rules"));
    }

    #[test]
    fn venture_does_not_fill_news_quota() {
        let items = vec![
            scored("Paper", "research", 6.2),
            scored("Startup round", "vc", 9.9),
            scored("Chip rules", "news", 5.5),
        ];
        let selection = select(&items, &config().quotas, 2);
        assert_eq!(titles(&selection), vec!["Paper", "Chip rules"]);
        assert_eq!(selection.quotas_waived, 0);
    }

    #[test]
    fn empty_bucket_is_waived() {
        let items = vec![scored("N1", "news", 8.0), scored("N2", "news", 7.0)];
        let selection = select(&items, &config().quotas, 5);
        assert_eq!(selection.quotas_waived, 1);
        assert_eq!(titles(&selection), vec!["N1", "N2"]);
    }

    #[test]
    fn rejected_items_never_selected() {
        let items = vec![
            scored("Bad research", "research", 3.0),
            scored("News", "news", 6.0),
        ];
        let selection = select(&items, &config().quotas, 5);
        assert_eq!(titles(&selection), vec!["News"]);
        assert_eq!(selection.quotas_waived, 1);
    }

    #[test]
    fn fewer_eligible_than_max_returns_all() {
        let items = vec![scored("Only", "other", 6.0)];
        let selection = select(&items, &config().quotas, 10);
        assert_eq!(selection.selected.len(), 1);
        assert_eq!(selection.selected[0].stage, Stage::Selected);
        assert_eq!(selection.quotas_waived, 2);
    }

    #[test]
    fn zero_max_selects_nothing() {
        let items = vec![scored("R", "research", 9.0)];
        assert!(select(&items, &config().quotas, 0).selected.is_empty());
    }

    #[test]
    fn ties_broken_by_recency_then_key() {
        let mut older = scored("Older", "other", 7.0);
        older.published_at = Some(at(8));
        let mut newer = scored("Newer", "other", 7.0);
        newer.published_at = Some(at(12));
        let undated = scored("Undated", "other", 7.0);
        let mut items = vec![undated, older, newer];

        let selection = select(&items, &[], 3);
        assert_eq!(titles(&selection), vec!["Newer", "Older", "Undated"]);

        items.reverse();
        let again = select(&items, &[], 3);
        assert_eq!(titles(&again), vec!["Newer", "Older", "Undated"]);
    }

    #[test]
    fn unscored_hold_items_rank_last() {
        let mut unscored = scored("Unscored", "news", 6.0);
        unscored.platform_potential = None;
        unscored.screen_score = None;
        let items = vec![unscored, scored("Scored", "news", 5.5)];
        let selection = select(&items, &[], 2);
        assert_eq!(titles(&selection), vec!["Scored", "Unscored"]);
    }

    #[test]
    fn quota_item_counts_toward_one_bucket() {
        let overlapping = vec![
            QuotaConfig {
                name: "research".into(),
                categories: vec![curator_shared::Category::Research],
                min: 1,
            },
            QuotaConfig {
                name: "anything".into(),
                categories: vec![
                    curator_shared::Category::Research,
                    curator_shared::Category::News,
                ],
                min: 1,
            },
        ];
        let items = vec![
            scored("R1", "research", 9.0),
            scored("R2", "research", 8.0),
            scored("N", "news", 5.0),
        ];
        // Research items belong to the first bucket only, so the second
        // bucket is filled by the news item.
        let selection = select(&items, &overlapping, 2);
        assert_eq!(titles(&selection), vec!["R1", "N"]);
    }
}
