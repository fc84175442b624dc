use std::sync::Arc;

use common::storage::types::knowledge_entry::KnowledgeEntry;
use serde::{Deserialize, Serialize};

use crate::{
    normalize::{normalize, tokenize},
    scoring::{clamp_unit, Scored},
};

/// Shape of the keyword confidence curve: `min(cap, ratio * scale + floor)`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct KeywordWeights {
    pub floor: f32,
    pub scale: f32,
    pub cap: f32,
}

impl Default for KeywordWeights {
    fn default() -> Self {
        // Cap stays below 1.0 so a keyword hit never ties an exact hit.
        Self {
            floor: 0.3,
            scale: 0.8,
            cap: 0.95,
        }
    }
}

impl KeywordWeights {
    pub fn confidence(&self, matched: usize, total: usize) -> Option<f32> {
        if matched == 0 || total == 0 {
            return None;
        }
        #[allow(clippy::cast_precision_loss)]
        let ratio = matched as f32 / total as f32;
        Some(clamp_unit(ratio.mul_add(self.scale, self.floor).min(self.cap)))
    }
}

#[derive(Debug)]
struct KeywordRow {
    entry: Arc<KnowledgeEntry>,
    /// One token list per keyword, normalized.
    keywords: Vec<Vec<String>>,
}

/// Token-overlap scorer over each entry's keyword list.
#[derive(Debug, Default)]
pub struct KeywordScorer {
    rows: Vec<KeywordRow>,
    weights: KeywordWeights,
}

impl KeywordScorer {
    pub fn build(entries: &[Arc<KnowledgeEntry>], weights: KeywordWeights) -> Self {
        let rows = entries
            .iter()
            .filter_map(|entry| {
                let keywords: Vec<Vec<String>> = entry
                    .keywords
                    .iter()
                    .map(|k| normalize(k))
                    .filter(|k| !k.is_empty())
                    .map(|k| tokenize(&k).into_iter().map(str::to_owned).collect())
                    .collect();
                (!keywords.is_empty()).then(|| KeywordRow {
                    entry: Arc::clone(entry),
                    keywords,
                })
            })
            .collect();

        Self { rows, weights }
    }

    /// Scores every entry against the normalized query, in entry order.
    ///
    /// A keyword counts as matched when some query token and some keyword token
    /// contain one another.
    pub fn score(&self, normalized_query: &str) -> Vec<Scored> {
        let query_tokens = tokenize(normalized_query);
        if query_tokens.is_empty() {
            return Vec::new();
        }

        self.rows
            .iter()
            .filter_map(|row| {
                let matched = row
                    .keywords
                    .iter()
                    .filter(|keyword| keyword_matches(&query_tokens, keyword))
                    .count();
                self.weights
                    .confidence(matched, row.keywords.len())
                    .map(|confidence| Scored::new(Arc::clone(&row.entry), confidence))
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

fn keyword_matches(query_tokens: &[&str], keyword_tokens: &[String]) -> bool {
    query_tokens.iter().any(|q| {
        keyword_tokens
            .iter()
            .any(|k| q.contains(k.as_str()) || k.contains(q))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str, keywords: &[&str]) -> Arc<KnowledgeEntry> {
        Arc::new(KnowledgeEntry::new(
            id,
            "General",
            vec![format!("question for {id}")],
            "answer",
            keywords.iter().map(ToString::to_string).collect(),
            0,
        ))
    }

    fn approx(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-5
    }

    #[test]
    fn confidence_curve_has_floor_and_cap() {
        let weights = KeywordWeights::default();

        assert_eq!(weights.confidence(0, 4), None);
        assert_eq!(weights.confidence(1, 0), None);
        assert!(approx(weights.confidence(1, 4).unwrap_or_default(), 0.5));
        assert!(approx(weights.confidence(1, 2).unwrap_or_default(), 0.7));
        assert!(approx(weights.confidence(4, 4).unwrap_or_default(), 0.95));
    }

    #[test]
    fn single_shared_keyword_scores_between_floor_and_cap() {
        let entries = vec![entry("password-reset", &["password"])];
        let scorer = KeywordScorer::build(&entries, KeywordWeights::default());

        let results = scorer.score("my password is not working");

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].entry.id, "password-reset");
        assert!(results[0].confidence >= 0.3 && results[0].confidence <= 0.95);
        assert!(approx(results[0].confidence, 0.95));
    }

    #[test]
    fn substring_match_works_in_both_directions() {
        let entries = vec![entry("billing", &["invoices", "pay"])];
        let scorer = KeywordScorer::build(&entries, KeywordWeights::default());

        // "invoice" is contained in the keyword "invoices"; "payment" contains "pay".
        let results = scorer.score("invoice payment");

        assert_eq!(results.len(), 1);
        assert!(approx(results[0].confidence, 0.95));
    }

    #[test]
    fn partial_overlap_uses_ratio() {
        let entries = vec![entry("support", &["support", "contact", "phone", "help"])];
        let scorer = KeywordScorer::build(&entries, KeywordWeights::default());

        let results = scorer.score("need help");

        assert_eq!(results.len(), 1);
        assert!(approx(results[0].confidence, 0.5));
    }

    #[test]
    fn entries_without_overlap_or_keywords_produce_nothing() {
        let entries = vec![entry("billing", &["invoice"]), entry("bare", &[])];
        let scorer = KeywordScorer::build(&entries, KeywordWeights::default());

        assert_eq!(scorer.len(), 1);
        assert!(scorer.score("reset my password").is_empty());
        assert!(scorer.score("").is_empty());
    }

    #[test]
    fn multi_word_keywords_match_on_any_token() {
        let entries = vec![entry("hours", &["opening hours"])];
        let scorer = KeywordScorer::build(&entries, KeywordWeights::default());

        let results = scorer.score("when do you open");

        assert_eq!(results.len(), 1);
    }
}
