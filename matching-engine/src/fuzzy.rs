//! Approximate matching over three weighted entry fields.
//!
//! Each field value is compared with the query by aligning the whole query against the
//! best-fitting substring of the value (semi-global edit distance). A value's raw score is
//! `errors / query_len + |start - location| / distance`, where 0 is perfect; values above
//! `threshold` or without a long enough run of matched characters do not count.
//!
//! The run-length check looks only at the longest run of matched characters along the
//! chosen alignment. It approximates a Fuse-style `minMatchCharLength` match mask, which
//! considers every matched span in the text, so borderline values can be accepted or
//! rejected differently from Fuse.
//!
//! Matching values are combined per entry as `product(score ^ (weight * norm))`, with
//! `norm = 1 / sqrt(tokens in value)`. Fields that did not match contribute nothing, so an
//! entry that only matches a lightly weighted field ends up close to 1 (a poor match).
//! Confidence reported to callers is `1 - combined`.

use std::sync::Arc;

use common::storage::types::knowledge_entry::KnowledgeEntry;
use serde::{Deserialize, Serialize};

use crate::{normalize::normalize, scoring::Scored};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FuzzyField {
    Phrasings,
    Keywords,
    Answer,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct FuzzyOptions {
    pub phrasing_weight: f64,
    pub keyword_weight: f64,
    pub answer_weight: f64,
    /// Highest raw score (0 = perfect, 1 = unrelated) still accepted as a match.
    pub threshold: f64,
    /// How far from `location` a match may start before proximity alone rejects it.
    pub distance: usize,
    pub location: usize,
    pub min_match_char_length: usize,
}

impl Default for FuzzyOptions {
    fn default() -> Self {
        Self {
            phrasing_weight: 0.7,
            keyword_weight: 0.2,
            answer_weight: 0.1,
            threshold: 0.4,
            distance: 100,
            location: 0,
            min_match_char_length: 3,
        }
    }
}

impl FuzzyOptions {
    /// Field weight scaled so the three weights sum to one.
    fn weight(&self, field: FuzzyField) -> f64 {
        let raw = |f: FuzzyField| match f {
            FuzzyField::Phrasings => self.phrasing_weight,
            FuzzyField::Keywords => self.keyword_weight,
            FuzzyField::Answer => self.answer_weight,
        };
        let total = raw(FuzzyField::Phrasings) + raw(FuzzyField::Keywords) + raw(FuzzyField::Answer);
        if total > 0.0 && total.is_finite() {
            raw(field).max(0.0) / total
        } else {
            1.0 / 3.0
        }
    }
}

#[derive(Debug)]
struct FieldValue {
    field: FuzzyField,
    chars: Vec<char>,
    norm: f64,
}

#[derive(Debug)]
struct FuzzyRecord {
    entry: Arc<KnowledgeEntry>,
    values: Vec<FieldValue>,
}

#[derive(Debug, Default)]
pub struct FuzzyIndex {
    records: Vec<FuzzyRecord>,
    options: FuzzyOptions,
}

impl FuzzyIndex {
    pub fn build(entries: &[Arc<KnowledgeEntry>], options: FuzzyOptions) -> Self {
        let records = entries
            .iter()
            .map(|entry| {
                let fields = entry
                    .phrasings
                    .iter()
                    .map(|text| (FuzzyField::Phrasings, text))
                    .chain(entry.keywords.iter().map(|text| (FuzzyField::Keywords, text)))
                    .chain(std::iter::once((FuzzyField::Answer, &entry.answer)));
                let values = fields
                    .filter_map(|(field, text)| {
                        let normalized = normalize(text);
                        (!normalized.is_empty()).then(|| FieldValue {
                            field,
                            norm: field_norm(&normalized),
                            chars: normalized.chars().collect(),
                        })
                    })
                    .collect();
                FuzzyRecord {
                    entry: Arc::clone(entry),
                    values,
                }
            })
            .collect();

        Self { records, options }
    }

    /// Entries with at least one matching field value, best first.
    pub fn search(&self, normalized_query: &str) -> Vec<Scored> {
        let pattern: Vec<char> = normalized_query.chars().collect();
        if pattern.is_empty() {
            return Vec::new();
        }

        let mut hits: Vec<(f64, Scored)> = self
            .records
            .iter()
            .filter_map(|record| {
                let raw = self.score_record(record, &pattern)?;
                #[allow(clippy::cast_possible_truncation)]
                let confidence = (1.0 - raw) as f32;
                Some((raw, Scored::new(Arc::clone(&record.entry), confidence)))
            })
            .collect();

        // Stable, so equal scores stay in entry order.
        hits.sort_by(|a, b| a.0.total_cmp(&b.0));
        hits.into_iter().map(|(_, scored)| scored).collect()
    }

    fn score_record(&self, record: &FuzzyRecord, pattern: &[char]) -> Option<f64> {
        let mut combined = 1.0_f64;
        let mut matched = false;

        for value in &record.values {
            let Some(score) = approximate_score(pattern, &value.chars, &self.options) else {
                continue;
            };
            matched = true;
            let base = if score <= 0.0 { f64::EPSILON } else { score };
            combined *= base.powf(self.options.weight(value.field) * value.norm);
        }

        matched.then_some(combined.clamp(0.0, 1.0))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// `1 / sqrt(token count)`, rounded to three decimals.
fn field_norm(normalized: &str) -> f64 {
    let tokens = normalized.split(' ').filter(|t| !t.is_empty()).count().max(1);
    #[allow(clippy::cast_precision_loss)]
    let norm = 1.0 / (tokens as f64).sqrt();
    (norm * 1000.0).round() / 1000.0
}

#[derive(Debug, Clone, Copy, Default)]
struct Cell {
    errors: usize,
    /// Where the aligned substring of the text starts.
    start: usize,
    /// Length of the current run of matched characters ending here.
    run: usize,
    /// Longest run of matched characters along the path.
    longest: usize,
}

/// Best raw score for `pattern` inside `text`, or `None` when nothing clears the
/// threshold and minimum run length.
fn approximate_score(pattern: &[char], text: &[char], options: &FuzzyOptions) -> Option<f64> {
    if pattern.is_empty() || text.is_empty() {
        return None;
    }
    if pattern == text {
        return Some(0.0);
    }

    let width = text.len().saturating_add(1);
    let mut previous: Vec<Cell> = (0..width)
        .map(|start| Cell {
            start,
            ..Cell::default()
        })
        .collect();
    let mut current: Vec<Cell> = vec![Cell::default(); width];

    for (row, pattern_char) in pattern.iter().enumerate() {
        if let Some(first) = current.first_mut() {
            *first = Cell {
                errors: row.saturating_add(1),
                ..Cell::default()
            };
        }
        for (column, text_char) in text.iter().enumerate() {
            let (Some(diag), Some(up), Some(left)) = (
                previous.get(column).copied(),
                previous.get(column.saturating_add(1)).copied(),
                current.get(column).copied(),
            ) else {
                continue;
            };

            let cell = if pattern_char == text_char {
                let run = diag.run.saturating_add(1);
                Cell {
                    errors: diag.errors,
                    start: diag.start,
                    run,
                    longest: diag.longest.max(run),
                }
            } else {
                let substitute = diag.errors.saturating_add(1);
                let skip_pattern = up.errors.saturating_add(1);
                let skip_text = left.errors.saturating_add(1);
                if substitute <= skip_pattern && substitute <= skip_text {
                    Cell {
                        errors: substitute,
                        start: diag.start,
                        run: 0,
                        longest: diag.longest,
                    }
                } else if skip_pattern <= skip_text {
                    Cell {
                        errors: skip_pattern,
                        start: up.start,
                        run: 0,
                        longest: up.longest,
                    }
                } else {
                    Cell {
                        errors: skip_text,
                        start: left.start,
                        run: 0,
                        longest: left.longest,
                    }
                }
            };
            if let Some(slot) = current.get_mut(column.saturating_add(1)) {
                *slot = cell;
            }
        }
        std::mem::swap(&mut previous, &mut current);
    }

    #[allow(clippy::cast_precision_loss)]
    let pattern_len = pattern.len() as f64;
    previous
        .iter()
        .skip(1)
        .filter(|cell| cell.longest >= options.min_match_char_length)
        .map(|cell| {
            #[allow(clippy::cast_precision_loss)]
            let accuracy = cell.errors as f64 / pattern_len;
            let proximity = cell.start.abs_diff(options.location);
            if options.distance == 0 {
                if proximity == 0 {
                    accuracy
                } else {
                    1.0
                }
            } else {
                #[allow(clippy::cast_precision_loss)]
                let penalty = proximity as f64 / options.distance as f64;
                accuracy + penalty
            }
        })
        .filter(|score| *score <= options.threshold)
        .min_by(f64::total_cmp)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chars(text: &str) -> Vec<char> {
        text.chars().collect()
    }

    fn entry(id: &str, phrasings: &[&str], keywords: &[&str], answer: &str) -> Arc<KnowledgeEntry> {
        Arc::new(KnowledgeEntry::new(
            id,
            "General",
            phrasings.iter().map(ToString::to_string).collect(),
            answer,
            keywords.iter().map(ToString::to_string).collect(),
            0,
        ))
    }

    #[test]
    fn identical_text_scores_zero() {
        let score = approximate_score(&chars("password"), &chars("password"), &FuzzyOptions::default());
        assert_eq!(score, Some(0.0));
    }

    #[test]
    fn substring_at_start_scores_zero() {
        let score = approximate_score(
            &chars("password"),
            &chars("password reset"),
            &FuzzyOptions::default(),
        );
        assert_eq!(score, Some(0.0));
    }

    #[test]
    fn single_typo_costs_one_error() {
        let score = approximate_score(
            &chars("pasword reset"),
            &chars("password reset"),
            &FuzzyOptions::default(),
        )
        .expect("should match");
        assert!((score - 1.0 / 13.0).abs() < 1e-9);
    }

    #[test]
    fn distant_matches_are_penalized_by_location() {
        let options = FuzzyOptions::default();
        let near = approximate_score(&chars("invoice"), &chars("invoice list"), &options);
        let far_text = format!("{} invoice", "x".repeat(50));
        let far = approximate_score(&chars("invoice"), &chars(&far_text), &options);

        assert_eq!(near, Some(0.0));
        assert_eq!(far, None);
    }

    #[test]
    fn short_runs_do_not_count() {
        let options = FuzzyOptions::default();
        assert_eq!(approximate_score(&chars("ab"), &chars("abc"), &options), None);
        assert_eq!(approximate_score(&chars("abc"), &chars("abcdef"), &options), Some(0.0));
    }

    #[test]
    fn unrelated_text_is_rejected() {
        let score = approximate_score(
            &chars("billing invoice"),
            &chars("reset my password"),
            &FuzzyOptions::default(),
        );
        assert_eq!(score, None);
    }

    #[test]
    fn field_norm_rounds_to_three_decimals() {
        assert!((field_norm("password") - 1.0).abs() < 1e-9);
        assert!((field_norm("password reset") - 0.707).abs() < 1e-9);
        assert!((field_norm("a b c d") - 0.5).abs() < 1e-9);
    }

    #[test]
    fn weights_are_normalized() {
        let options = FuzzyOptions {
            phrasing_weight: 7.0,
            keyword_weight: 2.0,
            answer_weight: 1.0,
            ..FuzzyOptions::default()
        };
        assert!((options.weight(FuzzyField::Phrasings) - 0.7).abs() < 1e-9);
        assert!((options.weight(FuzzyField::Answer) - 0.1).abs() < 1e-9);
    }

    #[test]
    fn misspelled_query_finds_entry_through_phrasing() {
        let entries = vec![
            entry(
                "password-reset",
                &["How do I reset my password?", "Password reset"],
                &["password"],
                "Use the reset link.",
            ),
            entry(
                "billing",
                &["Where can I find my invoices?"],
                &["invoice"],
                "See the billing page.",
            ),
        ];
        let index = FuzzyIndex::build(&entries, FuzzyOptions::default());

        let results = index.search("pasword reset");

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].entry.id, "password-reset");
        // (1/13) ^ (0.7 * 0.707) ~= 0.281
        assert!(results[0].confidence > 0.7 && results[0].confidence < 0.73);
    }

    #[test]
    fn phrasing_hits_outrank_answer_only_hits() {
        let entries = vec![
            entry(
                "answer-only",
                &["Something else entirely"],
                &[],
                "Invoices are listed under billing.",
            ),
            entry(
                "phrasing",
                &["Invoices and receipts"],
                &[],
                "Look under the account menu.",
            ),
        ];
        let index = FuzzyIndex::build(&entries, FuzzyOptions::default());

        let results = index.search("invoices");

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].entry.id, "phrasing");
        assert!(results[0].confidence > results[1].confidence);
        assert!(results.iter().all(|r| (0.0..=1.0).contains(&r.confidence)));
    }

    #[test]
    fn empty_query_finds_nothing() {
        let entries = vec![entry("a", &["Anything"], &[], "answer")];
        let index = FuzzyIndex::build(&entries, FuzzyOptions::default());

        assert!(index.search("").is_empty());
    }
}
