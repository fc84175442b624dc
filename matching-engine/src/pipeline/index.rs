use std::{
    collections::{BTreeMap, HashMap},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use common::storage::types::knowledge_entry::KnowledgeEntry;
use serde::Serialize;
use tracing::info;

use super::config::MatcherTuning;
use crate::{
    exact::ExactIndex,
    fuzzy::FuzzyIndex,
    keyword::KeywordScorer,
    repository::{EntrySource, LoadedEntries},
};

/// Corpus-level usage figures.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UsageStats {
    /// Sum of `usage_count` over all entries.
    pub total_queries: u64,
    /// Entries surfaced at least once.
    pub entries_hit: usize,
    pub per_category_totals: BTreeMap<String, u64>,
}

/// One immutable generation of the entry set and every index derived from it.
///
/// Only the usage counters change after construction.
#[derive(Debug)]
pub struct MatcherIndex {
    pub(crate) entries: Vec<Arc<KnowledgeEntry>>,
    pub(crate) exact: ExactIndex,
    pub(crate) keywords: KeywordScorer,
    pub(crate) fuzzy: FuzzyIndex,
    usage: HashMap<String, AtomicU64>,
    source: EntrySource,
}

impl MatcherIndex {
    pub fn build(loaded: LoadedEntries, tuning: &MatcherTuning) -> Self {
        let entries: Vec<Arc<KnowledgeEntry>> =
            loaded.entries.into_iter().map(Arc::new).collect();

        let exact = ExactIndex::build(&entries);
        let keywords = KeywordScorer::build(&entries, tuning.keyword);
        let fuzzy = FuzzyIndex::build(&entries, tuning.fuzzy);
        let usage = entries
            .iter()
            .map(|entry| (entry.id.clone(), AtomicU64::new(entry.usage_count)))
            .collect();

        info!(
            entries = entries.len(),
            exact_keys = exact.len(),
            exact_overwritten = exact.overwritten(),
            keyword_rows = keywords.len(),
            fuzzy_records = fuzzy.len(),
            source = ?loaded.source,
            "Built knowledge matcher index"
        );

        Self {
            entries,
            exact,
            keywords,
            fuzzy,
            usage,
            source: loaded.source,
        }
    }

    pub fn source(&self) -> EntrySource {
        self.source
    }

    pub fn entries(&self) -> &[Arc<KnowledgeEntry>] {
        &self.entries
    }

    pub(crate) fn bump_usage(&self, entry_id: &str) {
        if let Some(counter) = self.usage.get(entry_id) {
            counter.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn usage_of(&self, entry_id: &str) -> Option<u64> {
        self.usage
            .get(entry_id)
            .map(|counter| counter.load(Ordering::Relaxed))
    }

    /// Raises each counter to at least the count `previous` holds for the same id, so
    /// hits not yet persisted survive a reload.
    pub(crate) fn carry_usage_from(&self, previous: &MatcherIndex) {
        for (entry_id, counter) in &self.usage {
            if let Some(count) = previous.usage_of(entry_id) {
                counter.fetch_max(count, Ordering::Relaxed);
            }
        }
    }

    pub fn usage_stats(&self) -> UsageStats {
        let mut stats = UsageStats::default();
        for entry in &self.entries {
            let count = self.usage_of(&entry.id).unwrap_or(entry.usage_count);
            stats.total_queries = stats.total_queries.saturating_add(count);
            if count > 0 {
                stats.entries_hit = stats.entries_hit.saturating_add(1);
            }
            let category_total = stats
                .per_category_totals
                .entry(entry.category.clone())
                .or_insert(0);
            *category_total = category_total.saturating_add(count);
        }
        stats
    }

    /// Entries grouped by category, each group ordered by priority, highest first.
    pub fn entries_by_category(&self) -> BTreeMap<String, Vec<Arc<KnowledgeEntry>>> {
        let mut grouped: BTreeMap<String, Vec<Arc<KnowledgeEntry>>> = BTreeMap::new();
        for entry in &self.entries {
            grouped
                .entry(entry.category.clone())
                .or_default()
                .push(Arc::clone(entry));
        }
        for group in grouped.values_mut() {
            group.sort_by(|a, b| b.priority.cmp(&a.priority));
        }
        grouped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str, category: &str, priority: i32, usage: u64) -> KnowledgeEntry {
        let mut entry = KnowledgeEntry::new(
            id,
            category,
            vec![format!("Question about {id}")],
            "answer",
            vec![id.to_string()],
            priority,
        );
        entry.usage_count = usage;
        entry
    }

    fn index(entries: Vec<KnowledgeEntry>) -> MatcherIndex {
        MatcherIndex::build(
            LoadedEntries {
                entries,
                source: EntrySource::Repository,
                skipped: 0,
            },
            &MatcherTuning::default(),
        )
    }

    #[test]
    fn groups_by_category_in_priority_order() {
        let index = index(vec![
            entry("low", "Billing", 1, 0),
            entry("account", "Account", 4, 0),
            entry("high", "Billing", 9, 0),
            entry("mid", "Billing", 5, 0),
        ]);

        let grouped = index.entries_by_category();

        assert_eq!(grouped.len(), 2);
        let billing: Vec<&str> = grouped["Billing"].iter().map(|e| e.id.as_str()).collect();
        assert_eq!(billing, vec!["high", "mid", "low"]);
        assert_eq!(grouped["Account"].len(), 1);
    }

    #[test]
    fn usage_stats_start_from_stored_counts() {
        let index = index(vec![
            entry("a", "Billing", 0, 3),
            entry("b", "Billing", 0, 0),
            entry("c", "Account", 0, 2),
        ]);

        let stats = index.usage_stats();

        assert_eq!(stats.total_queries, 5);
        assert_eq!(stats.entries_hit, 2);
        assert_eq!(stats.per_category_totals.get("Billing"), Some(&3));
        assert_eq!(stats.per_category_totals.get("Account"), Some(&2));
    }

    #[test]
    fn bumping_usage_is_reflected_in_stats() {
        let index = index(vec![entry("a", "Billing", 0, 0), entry("b", "Account", 0, 0)]);

        index.bump_usage("b");
        index.bump_usage("b");
        index.bump_usage("unknown");

        assert_eq!(index.usage_of("b"), Some(2));
        let stats = index.usage_stats();
        assert_eq!(stats.total_queries, 2);
        assert_eq!(stats.entries_hit, 1);
        assert_eq!(stats.per_category_totals.get("Billing"), Some(&0));
    }

    #[test]
    fn carried_usage_keeps_the_larger_count() {
        let previous = index(vec![entry("a", "Billing", 0, 0), entry("gone", "Billing", 0, 9)]);
        previous.bump_usage("a");
        previous.bump_usage("a");
        let next = index(vec![entry("a", "Billing", 0, 1), entry("b", "Account", 0, 4)]);

        next.carry_usage_from(&previous);

        assert_eq!(next.usage_of("a"), Some(2));
        assert_eq!(next.usage_of("b"), Some(4));
        assert_eq!(next.usage_of("gone"), None);
    }
}
