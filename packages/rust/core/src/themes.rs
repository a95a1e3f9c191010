//! Theme grouping over the scored, non-rejected items.
//!
//! Each item is assigned at most one attribute: the first lexicon entry
//! whose terms match, with entries ordered by kind (organization, then
//! technology, trend, problem) and by lexicon position within a kind.
//! Membership therefore depends only on item text, never on input order.

use std::collections::{BTreeMap, HashSet};

use regex::{Regex, RegexBuilder};
use tracing::{debug, info, instrument};

use curator_shared::{
    AttributeKind, CuratorError, Item, Result, Stage, ThemeAttribute, ThemeCluster, Verdict,
};

struct CompiledAttribute {
    kind: AttributeKind,
    label: String,
    pattern: Regex,
}

impl CompiledAttribute {
    fn id(&self) -> String {
        format!("{}:{}", self.kind.as_str(), self.label)
    }
}

pub struct ThemeGrouper {
    /// Sorted into match precedence order.
    attributes: Vec<CompiledAttribute>,
    min_cluster_size: usize,
}

impl ThemeGrouper {
    pub fn new(lexicon: &[ThemeAttribute], min_cluster_size: usize) -> Result<Self> {
        let mut seen = HashSet::new();
        let mut attributes = Vec::with_capacity(lexicon.len());

        for attr in lexicon {
            if !seen.insert((attr.kind, attr.label.clone())) {
                return Err(CuratorError::validation(format!(
                    "duplicate theme attribute {}:{}",
                    attr.kind.as_str(),
                    attr.label
                )));
            }
            let terms: Vec<String> = attr
                .terms
                .iter()
                .map(|t| t.trim())
                .filter(|t| !t.is_empty())
                .map(regex::escape)
                .collect();
            if terms.is_empty() {
                return Err(CuratorError::validation(format!(
                    "theme attribute {} has no terms",
                    attr.label
                )));
            }
            let pattern = RegexBuilder::new(&format!(r"\b(?:{})\b", terms.join("|")))
                .case_insensitive(true)
                .build()
                .map_err(|e| CuratorError::config(format!("theme attribute {}: {e}", attr.label)))?;
            attributes.push(CompiledAttribute {
                kind: attr.kind,
                label: attr.label.clone(),
                pattern,
            });
        }

        // Stable: lexicon order is kept within a kind.
        attributes.sort_by_key(|a| a.kind);

        Ok(Self {
            attributes,
            min_cluster_size,
        })
    }

    /// Index of the first attribute matching the item's title or summary.
    fn extract(&self, item: &Item) -> Option<usize> {
        let text = format!("{}\n{}", item.title, item.summary);
        self.attributes
            .iter()
            .position(|a| a.pattern.is_match(&text))
    }

    /// Assign theme ids and return the clusters that meet the minimum size,
    /// in precedence order with members sorted by key.
    #[instrument(skip_all, fields(items = items.len(), min_size = self.min_cluster_size))]
    pub fn group(&self, items: &mut [Item]) -> Vec<ThemeCluster> {
        let mut buckets: BTreeMap<usize, Vec<usize>> = BTreeMap::new();

        for (idx, item) in items.iter_mut().enumerate() {
            item.theme = None;
            if item.verdict == Verdict::Reject {
                continue;
            }
            item.advance(Stage::Grouped);
            if let Some(attr) = self.extract(item) {
                buckets.entry(attr).or_default().push(idx);
            }
        }

        let mut clusters = Vec::new();
        for (attr_idx, members) in buckets {
            let attr = &self.attributes[attr_idx];
            if members.len() < self.min_cluster_size {
                debug!(theme = %attr.id(), size = members.len(), "dissolving undersized cluster");
                continue;
            }
            let id = attr.id();
            let mut keys: Vec<String> = Vec::with_capacity(members.len());
            for &idx in &members {
                items[idx].theme = Some(id.clone());
                keys.push(items[idx].key.clone());
            }
            keys.sort();
            clusters.push(ThemeCluster {
                id,
                kind: attr.kind,
                attribute: attr.label.clone(),
                members: keys,
            });
        }

        info!(clusters = clusters.len(), "theme grouping complete");
        clusters
    }
}
