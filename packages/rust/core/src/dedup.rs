//! Deduplication against the persisted history.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tracing::{info, instrument, warn};

use curator_shared::{Item, Stage};
use curator_storage::SeenKind;

use crate::history::{History, HistoryStore};

/// Number of leading title words that make up the fingerprint.
const FINGERPRINT_WORDS: usize = 5;

/// Fingerprint of a title: the first five lower-cased words, sorted,
/// hashed with SHA-256 and cut to 16 hex characters.
///
/// Returns `None` for blank titles.
pub fn title_fingerprint(title: &str) -> Option<String> {
    let lowered = title.trim().to_lowercase();
    let mut words: Vec<&str> = lowered.split_whitespace().take(FINGERPRINT_WORDS).collect();
    if words.is_empty() {
        return None;
    }
    words.sort_unstable();
    let mut hasher = Sha256::new();
    hasher.update(words.join(" ").as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    Some(digest[..16].to_string())
}

/// Result of a dedup pass.
#[derive(Debug)]
pub struct DedupOutcome {
    /// Items not seen before, in input order.
    pub items: Vec<Item>,
    /// Items dropped as already seen (in history or earlier in this batch).
    pub duplicates: usize,
    /// The history could not be read and was treated as empty.
    pub history_degraded: bool,
}

/// Filters out items whose identity is already in the history.
#[derive(Debug, Clone, Copy)]
pub struct Deduplicator {
    match_titles: bool,
}

impl Deduplicator {
    pub fn new(match_titles: bool) -> Self {
        Self { match_titles }
    }

    /// Run one read-modify-write cycle against `store`.
    ///
    /// An unreadable history degrades to empty; a failed write is logged.
    /// Neither aborts the run.
    #[instrument(skip_all, fields(items = items.len()))]
    pub async fn run(
        &self,
        store: &dyn HistoryStore,
        items: Vec<Item>,
        now: DateTime<Utc>,
    ) -> DedupOutcome {
        let (mut history, history_degraded) = match store.begin().await {
            Ok(history) => (history, false),
            Err(e) => {
                warn!(error = %e, "dedup history unavailable, treating as empty");
                (History::default(), true)
            }
        };

        let (items, duplicates) = self.filter(&mut history, items, now);
        history.last_updated = Some(now);

        if let Err(e) = store.commit(&history).await {
            warn!(error = %e, "failed to persist dedup history");
            store.release().await;
        }

        info!(kept = items.len(), duplicates, "deduplication complete");
        DedupOutcome {
            items,
            duplicates,
            history_degraded,
        }
    }

    /// Pure filtering step: keep unseen items and record every identity
    /// encountered. Already-known identities keep their first-seen time.
    pub fn filter(
        &self,
        history: &mut History,
        items: Vec<Item>,
        now: DateTime<Utc>,
    ) -> (Vec<Item>, usize) {
        let mut kept = Vec::with_capacity(items.len());
        let mut duplicates = 0;

        for mut item in items {
            let fingerprint = if self.match_titles {
                title_fingerprint(&item.title)
            } else {
                None
            };

            let seen_url = history.contains(SeenKind::Url, &item.key);
            let seen_title = fingerprint
                .as_deref()
                .is_some_and(|fp| history.contains(SeenKind::Title, fp));

            history.record(SeenKind::Url, &item.key, now);
            if let Some(fp) = &fingerprint {
                history.record(SeenKind::Title, fp, now);
            }

            if seen_url || seen_title {
                duplicates += 1;
                continue;
            }
            item.advance(Stage::Deduped);
            kept.push(item);
        }

        (kept, duplicates)
    }
}
