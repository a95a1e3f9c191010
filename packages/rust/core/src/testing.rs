//! Test fixtures: item builders and a scripted evaluator.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use curator_shared::{
    AppConfig, Category, CollectedItem, CurationConfig, CuratorError, DimensionScores, Item,
    PlatformFitScores, Result, Verdict, VerdictThresholds,
};

use crate::evaluator::{Evaluator, ScreenResult};
use crate::normalize::normalize_url;

pub(crate) fn config() -> CurationConfig {
    CurationConfig::try_from(&AppConfig::default()).expect("default config is valid")
}

fn slug(title: &str) -> String {
    title
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '-' })
        .collect()
}

/// An item keyed by its title, with a lenient category label.
pub(crate) fn item(title: &str, category: &str) -> Item {
    let url = format!("https://example.com/{}", slug(title));
    Item::from_collected(
        CollectedItem {
            title: title.into(),
            url: url.clone(),
            summary: String::new(),
            source: "test".into(),
            category: Category::parse(category),
            published_at: None,
        },
        normalize_url(&url),
    )
}

/// A deep-scored item with the given platform-potential.
pub(crate) fn scored(title: &str, category: &str, potential: f64) -> Item {
    let mut it = item(title, category);
    it.platform_potential = Some(potential);
    it.verdict = Verdict::from_score(potential, &VerdictThresholds::default());
    it
}

pub(crate) fn at(hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 6, 1, hour, 0, 0).unwrap()
}

/// In-memory evaluator whose replies, failures and delays are scripted
/// per item key.
#[derive(Default)]
pub(crate) struct ScriptedEvaluator {
    screen: Mutex<HashMap<String, f64>>,
    screen_fail: Mutex<HashSet<String>>,
    screen_internal_fail: Mutex<HashSet<String>>,
    screen_delay: Mutex<Option<Duration>>,
    deep: Mutex<HashMap<String, DimensionScores>>,
    deep_fail: Mutex<HashSet<String>>,
    deep_delay: Mutex<HashMap<String, Duration>>,
    fit: Mutex<HashMap<String, PlatformFitScores>>,
    batch_sizes: Mutex<Vec<usize>>,
    deep_calls: Mutex<Vec<String>>,
}

impl ScriptedEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_screen(&self, key: &str, score: f64) {
        self.screen.lock().unwrap().insert(key.into(), score);
    }

    /// Any batch containing `key` fails.
    pub fn fail_screen(&self, key: &str) {
        self.screen_fail.lock().unwrap().insert(key.into());
    }

    /// Any batch containing `key` fails with a non-scoring error.
    pub fn fail_screen_internal(&self, key: &str) {
        self.screen_internal_fail.lock().unwrap().insert(key.into());
    }

    pub fn set_screen_delay(&self, delay: Duration) {
        *self.screen_delay.lock().unwrap() = Some(delay);
    }

    pub fn set_deep(&self, key: &str, scores: DimensionScores) {
        self.deep.lock().unwrap().insert(key.into(), scores);
    }

    pub fn fail_deep(&self, key: &str) {
        self.deep_fail.lock().unwrap().insert(key.into());
    }

    pub fn set_deep_delay(&self, key: &str, delay: Duration) {
        self.deep_delay.lock().unwrap().insert(key.into(), delay);
    }

    pub fn set_fit(&self, key: &str, fit: PlatformFitScores) {
        self.fit.lock().unwrap().insert(key.into(), fit);
    }

    /// Sizes of the screening batches received, sorted.
    pub fn batch_sizes(&self) -> Vec<usize> {
        let mut sizes = self.batch_sizes.lock().unwrap().clone();
        sizes.sort_unstable();
        sizes
    }

    /// Keys passed to `score_item`, sorted.
    pub fn deep_calls(&self) -> Vec<String> {
        let mut calls = self.deep_calls.lock().unwrap().clone();
        calls.sort();
        calls
    }
}

#[async_trait]
impl Evaluator for ScriptedEvaluator {
    fn model_id(&self) -> &str {
        "scripted"
    }

    async fn screen_batch(&self, items: &[Item]) -> Result<Vec<ScreenResult>> {
        self.batch_sizes.lock().unwrap().push(items.len());
        let delay = *self.screen_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let failing = {
            let fail = self.screen_fail.lock().unwrap();
            items.iter().any(|i| fail.contains(&i.key))
        };
        if failing {
            return Err(CuratorError::evaluation("scripted batch failure"));
        }
        let internal = {
            let fail = self.screen_internal_fail.lock().unwrap();
            items.iter().any(|i| fail.contains(&i.key))
        };
        if internal {
            return Err(CuratorError::config("scripted internal failure"));
        }
        let screen = self.screen.lock().unwrap();
        Ok(items
            .iter()
            .enumerate()
            .filter_map(|(index, item)| {
                screen.get(&item.key).map(|&score| ScreenResult {
                    index,
                    score,
                    reason: Some("scripted".into()),
                })
            })
            .collect())
    }

    async fn score_item(&self, item: &Item) -> Result<DimensionScores> {
        self.deep_calls.lock().unwrap().push(item.key.clone());
        let delay = self.deep_delay.lock().unwrap().get(&item.key).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.deep_fail.lock().unwrap().contains(&item.key) {
            return Err(CuratorError::Network("scripted connection reset".into()));
        }
        self.deep
            .lock()
            .unwrap()
            .get(&item.key)
            .copied()
            .ok_or_else(|| CuratorError::evaluation(format!("no scripted scores for {}", item.key)))
    }

    async fn platform_fit(&self, item: &Item) -> Result<PlatformFitScores> {
        self.fit
            .lock()
            .unwrap()
            .get(&item.key)
            .copied()
            .ok_or_else(|| CuratorError::evaluation(format!("no scripted fit for {}", item.key)))
    }
}
