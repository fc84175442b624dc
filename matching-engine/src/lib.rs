pub mod exact;
pub mod fuzzy;
pub mod keyword;
pub mod normalize;
pub mod pipeline;
pub mod repository;
pub mod scoring;
pub mod usage;

use std::{fmt, sync::Arc};

use common::storage::types::knowledge_entry::KnowledgeEntry;
use serde::{Deserialize, Serialize};

use scoring::Scored;

pub use pipeline::{
    config::{MatcherTuning, DEFAULT_PLACEHOLDER_TOKEN},
    index::{MatcherIndex, UsageStats},
    KnowledgeMatcher,
};
pub use repository::{
    seed_entries, EntryLoader, EntryRepository, EntrySource, StaticEntryRepository,
    SurrealEntryRepository,
};
pub use usage::UsageTrackerStats;

/// Which strategy produced a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    Exact,
    Keyword,
    Fuzzy,
}

impl fmt::Display for MatchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Exact => "exact",
            Self::Keyword => "keyword",
            Self::Fuzzy => "fuzzy",
        };
        f.write_str(label)
    }
}

/// A knowledge entry nominated for a query.
#[derive(Debug, Clone)]
pub struct Match {
    /// Shared with the loaded snapshot unless the answer has been resolved.
    pub entry: Arc<KnowledgeEntry>,
    pub confidence: f32,
    /// The caller's query exactly as given.
    pub matched_query: String,
    pub match_type: MatchType,
}

impl Match {
    pub(crate) fn from_scored(scored: Scored, matched_query: &str, match_type: MatchType) -> Self {
        Self {
            entry: scored.entry,
            confidence: scored.confidence,
            matched_query: matched_query.to_owned(),
            match_type,
        }
    }

    /// Replaces every occurrence of `token` in the answer, on a private copy of the entry.
    pub fn with_substitution(mut self, token: &str, value: &str) -> Self {
        if !token.is_empty() && self.entry.answer.contains(token) {
            let answer = self.entry.answer.replace(token, value);
            self.entry = Arc::new(self.entry.with_answer(answer));
        }
        self
    }
}
