use common::utils::config::{AppConfig, DedupPolicy};
use serde::{Deserialize, Serialize};

use crate::{fuzzy::FuzzyOptions, keyword::KeywordWeights};

pub const DEFAULT_PLACEHOLDER_TOKEN: &str = "{{support_contact}}";

/// Tunable parameters that govern each matching stage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MatcherTuning {
    pub keyword: KeywordWeights,
    pub fuzzy: FuzzyOptions,
    /// Candidates whose confidences differ by less than this are ordered by priority.
    #[serde(default = "default_priority_band")]
    pub priority_band: f32,
    #[serde(default)]
    pub dedup: DedupPolicy,
    /// Token in answer bodies replaced by the support contact at query time.
    #[serde(default = "default_placeholder_token")]
    pub placeholder_token: String,
    /// Substitution used by `get_best_match` when the caller supplies none.
    #[serde(default)]
    pub support_contact: Option<String>,
}

impl Default for MatcherTuning {
    fn default() -> Self {
        Self {
            keyword: KeywordWeights::default(),
            fuzzy: FuzzyOptions::default(),
            priority_band: default_priority_band(),
            dedup: DedupPolicy::default(),
            placeholder_token: default_placeholder_token(),
            support_contact: None,
        }
    }
}

impl MatcherTuning {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            dedup: config.match_dedup_policy,
            support_contact: config.support_contact.clone(),
            ..Self::default()
        }
    }

    pub fn with_dedup(mut self, dedup: DedupPolicy) -> Self {
        self.dedup = dedup;
        self
    }

    pub fn with_support_contact(mut self, contact: impl Into<String>) -> Self {
        self.support_contact = Some(contact.into());
        self
    }
}

const fn default_priority_band() -> f32 {
    0.1
}

fn default_placeholder_token() -> String {
    DEFAULT_PLACEHOLDER_TOKEN.to_string()
}
