use std::{cmp::Ordering, collections::HashMap, sync::Arc};

use common::{storage::types::knowledge_entry::KnowledgeEntry, utils::config::DedupPolicy};

use crate::Match;

/// An entry nominated by one strategy, before it is labelled as a [`Match`].
#[derive(Debug, Clone)]
pub struct Scored {
    pub entry: Arc<KnowledgeEntry>,
    pub confidence: f32,
}

impl Scored {
    pub fn new(entry: Arc<KnowledgeEntry>, confidence: f32) -> Self {
        Self {
            entry,
            confidence: clamp_unit(confidence),
        }
    }
}

pub fn clamp_unit(value: f32) -> f32 {
    if value.is_nan() {
        return 0.0;
    }
    value.clamp(0.0, 1.0)
}

/// Parameters for the merge step applied after all strategies have run.
#[derive(Debug, Clone, Copy)]
pub struct RankOptions {
    pub min_confidence: f32,
    pub max_results: usize,
    /// Confidences closer than this are ordered by entry priority instead.
    pub priority_band: f32,
    pub dedup: DedupPolicy,
}

/// Dedup, threshold, order and truncate merged candidates.
pub fn rank_candidates(candidates: Vec<Match>, options: RankOptions) -> Vec<Match> {
    let mut ranked: Vec<Match> = dedup_by_entry(candidates, options.dedup)
        .into_iter()
        .filter(|candidate| candidate.confidence >= options.min_confidence)
        .collect();
    order_by_confidence_then_priority(&mut ranked, options.priority_band);
    ranked.truncate(options.max_results);
    ranked
}

/// Collapses candidates sharing an entry id. Survivors keep the position of the
/// first candidate seen for that id.
pub fn dedup_by_entry(candidates: Vec<Match>, policy: DedupPolicy) -> Vec<Match> {
    let mut positions: HashMap<String, usize> = HashMap::with_capacity(candidates.len());
    let mut kept: Vec<Match> = Vec::with_capacity(candidates.len());

    for candidate in candidates {
        match positions.get(candidate.entry.id.as_str()) {
            None => {
                positions.insert(candidate.entry.id.clone(), kept.len());
                kept.push(candidate);
            }
            Some(&position) => {
                if policy == DedupPolicy::HighestConfidence {
                    if let Some(existing) = kept.get_mut(position) {
                        if candidate.confidence > existing.confidence {
                            *existing = candidate;
                        }
                    }
                }
            }
        }
    }

    kept
}

/// `Less` when `a` belongs in front of `b`.
///
/// Outside the band the higher confidence leads; inside it the higher priority leads.
/// Within the band this is not transitive, so it must not be handed to `sort_by`.
pub fn compare_candidates(a: &Match, b: &Match, priority_band: f32) -> Ordering {
    if (a.confidence - b.confidence).abs() < priority_band {
        b.entry.priority.cmp(&a.entry.priority)
    } else {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(Ordering::Equal)
    }
}

/// Stable insertion sort with [`compare_candidates`]. Every adjacent pair of the
/// output satisfies the comparator, and equal candidates keep their merge order.
pub fn order_by_confidence_then_priority(items: &mut [Match], priority_band: f32) {
    for current in 1..items.len() {
        let mut slot = current;
        while slot > 0 {
            let before = slot.saturating_sub(1);
            let out_of_order = match (items.get(before), items.get(slot)) {
                (Some(left), Some(right)) => {
                    compare_candidates(left, right, priority_band) == Ordering::Greater
                }
                _ => false,
            };
            if !out_of_order {
                break;
            }
            items.swap(before, slot);
            slot = before;
        }
    }
}
