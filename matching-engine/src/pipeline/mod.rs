pub mod config;
pub mod index;

use std::{collections::BTreeMap, sync::Arc};

use common::{error::AppError, storage::types::knowledge_entry::KnowledgeEntry};
use tokio::sync::{OnceCell, RwLock};
use tracing::{debug, info, instrument};

use crate::{
    normalize::normalize,
    repository::{seed_entries, EntryLoader, EntryRepository, EntrySource},
    scoring::{clamp_unit, rank_candidates, RankOptions},
    usage::{UsageTracker, UsageTrackerStats},
    Match, MatchType,
};
use config::MatcherTuning;
use index::{MatcherIndex, UsageStats};

type Snapshot = Arc<OnceCell<Arc<MatcherIndex>>>;

/// Answers free-text questions from a set of knowledge entries.
///
/// The entry set is loaded on first use and kept until [`Self::reload_entries`]. Each
/// instance owns its own snapshot and usage recorder, so several can run side by side.
/// Construction spawns a task and therefore needs a Tokio runtime.
pub struct KnowledgeMatcher {
    loader: EntryLoader,
    tuning: MatcherTuning,
    snapshot: RwLock<Snapshot>,
    tracker: UsageTracker,
}

impl KnowledgeMatcher {
    /// Matcher that serves the bundled seed set whenever the repository cannot.
    pub fn new(
        repository: Arc<dyn EntryRepository>,
        tuning: MatcherTuning,
    ) -> Result<Self, AppError> {
        Ok(Self::with_fallback(repository, tuning, seed_entries()?))
    }

    pub fn with_fallback(
        repository: Arc<dyn EntryRepository>,
        tuning: MatcherTuning,
        fallback: Vec<KnowledgeEntry>,
    ) -> Self {
        Self::build(repository, tuning, Some(fallback))
    }

    /// Matcher whose queries fail with [`AppError::Unavailable`] while the repository
    /// has nothing to offer.
    pub fn without_fallback(repository: Arc<dyn EntryRepository>, tuning: MatcherTuning) -> Self {
        Self::build(repository, tuning, None)
    }

    fn build(
        repository: Arc<dyn EntryRepository>,
        tuning: MatcherTuning,
        fallback: Option<Vec<KnowledgeEntry>>,
    ) -> Self {
        let tracker = UsageTracker::spawn(Arc::clone(&repository));
        Self {
            loader: EntryLoader::new(repository, fallback),
            tuning,
            snapshot: RwLock::new(Arc::new(OnceCell::new())),
            tracker,
        }
    }

    pub fn tuning(&self) -> &MatcherTuning {
        &self.tuning
    }

    /// Current snapshot, loading it if no query has needed it yet. Concurrent first
    /// callers share a single load.
    async fn index(&self) -> Result<Arc<MatcherIndex>, AppError> {
        let cell = Arc::clone(&*self.snapshot.read().await);
        let index = cell
            .get_or_try_init(|| async {
                let loaded = self.loader.load().await?;
                Ok::<_, AppError>(Arc::new(MatcherIndex::build(loaded, &self.tuning)))
            })
            .await?;
        Ok(Arc::clone(index))
    }

    /// Up to `max_results` matches with confidence of at least `min_confidence`, best first.
    ///
    /// An exact phrasing or keyword hit is returned alone with confidence 1.0. Every
    /// returned entry has its usage recorded in the background.
    #[instrument(skip_all, fields(query_len = query.len(), max_results, min_confidence))]
    pub async fn find_matches(
        &self,
        query: &str,
        max_results: usize,
        min_confidence: f32,
    ) -> Result<Vec<Match>, AppError> {
        if max_results == 0 {
            return Ok(Vec::new());
        }
        let normalized = normalize(query);
        if normalized.is_empty() {
            debug!("Query is blank after normalization");
            return Ok(Vec::new());
        }

        let index = self.index().await?;

        if let Some(entry) = index.exact.lookup(&normalized) {
            debug!(entry_id = %entry.id, "Exact match; skipping keyword and fuzzy scoring");
            let hit = Match {
                entry: Arc::clone(entry),
                confidence: 1.0,
                matched_query: query.to_owned(),
                match_type: MatchType::Exact,
            };
            self.record_usage(&index, &hit);
            return Ok(vec![hit]);
        }

        let keyword = index.keywords.score(&normalized);
        let fuzzy = index.fuzzy.search(&normalized);
        debug!(
            keyword_candidates = keyword.len(),
            fuzzy_candidates = fuzzy.len(),
            "Scored candidates"
        );

        let candidates: Vec<Match> = keyword
            .into_iter()
            .map(|scored| Match::from_scored(scored, query, MatchType::Keyword))
            .chain(
                fuzzy
                    .into_iter()
                    .map(|scored| Match::from_scored(scored, query, MatchType::Fuzzy)),
            )
            .collect();

        let ranked = rank_candidates(
            candidates,
            RankOptions {
                min_confidence: clamp_unit(min_confidence),
                max_results,
                priority_band: self.tuning.priority_band,
                dedup: self.tuning.dedup,
            },
        );
        debug!(returned = ranked.len(), "Ranked matches");

        for matched in &ranked {
            self.record_usage(&index, matched);
        }
        Ok(ranked)
    }

    /// The single best match, with the support placeholder in its answer resolved.
    ///
    /// `substitution` takes precedence over the configured support contact. With neither
    /// present the answer is returned as stored.
    pub async fn get_best_match(
        &self,
        query: &str,
        min_confidence: f32,
        substitution: Option<&str>,
    ) -> Result<Option<Match>, AppError> {
        let best = self
            .find_matches(query, 1, min_confidence)
            .await?
            .into_iter()
            .next();

        let value = substitution.or(self.tuning.support_contact.as_deref());
        Ok(best.map(|matched| match value {
            Some(value) => matched.with_substitution(&self.tuning.placeholder_token, value),
            None => matched,
        }))
    }

    pub async fn get_entries_by_category(
        &self,
    ) -> Result<BTreeMap<String, Vec<Arc<KnowledgeEntry>>>, AppError> {
        Ok(self.index().await?.entries_by_category())
    }

    pub async fn get_usage_stats(&self) -> Result<UsageStats, AppError> {
        Ok(self.index().await?.usage_stats())
    }

    /// Where the current entry set came from.
    pub async fn entry_source(&self) -> Result<EntrySource, AppError> {
        Ok(self.index().await?.source())
    }

    /// Re-reads the repository and swaps in freshly built indices.
    ///
    /// Queries already running finish against the previous snapshot. Its usage counters
    /// carry over for entries that are still present, so counts never drop. On error the
    /// previous snapshot stays in place.
    pub async fn reload_entries(&self) -> Result<(), AppError> {
        // Pending increments must reach the repository before it is re-read.
        self.tracker.flush().await;

        let loaded = self.loader.load().await?;
        let index = Arc::new(MatcherIndex::build(loaded, &self.tuning));
        let entries = index.entries().len();
        let source = index.source();

        let mut snapshot = self.snapshot.write().await;
        if let Some(previous) = snapshot.get() {
            index.carry_usage_from(previous);
        }
        *snapshot = Arc::new(OnceCell::new_with(Some(index)));
        drop(snapshot);
        info!(entries, source = ?source, "Reloaded knowledge entries");
        Ok(())
    }

    pub fn usage_tracker_stats(&self) -> UsageTrackerStats {
        self.tracker.stats()
    }

    /// Waits until every usage event queued so far has been written.
    pub async fn shutdown(&self) {
        self.tracker.flush().await;
        let stats = self.tracker.stats();
        info!(
            recorded = stats.recorded,
            failed = stats.failed,
            dropped = stats.dropped,
            "Usage recorder drained"
        );
    }

    fn record_usage(&self, index: &MatcherIndex, matched: &Match) {
        index.bump_usage(&matched.entry.id);
        self.tracker.record(&matched.entry.id);
    }
}
