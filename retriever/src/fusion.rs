//! Result fusion
//!
//! Reciprocal Rank Fusion (RRF) across search channels, plus the sparse
//! channel's drop-ratio filter. The store applies the same policy when it
//! fuses server-side; these functions back client-side fusion.

use crate::search::{Record, RecordId};
use std::cmp::Ordering;
use std::collections::HashMap;

/// Default RRF smoothing constant.
pub const DEFAULT_RRF_K: u32 = 60;

/// Drops candidates scoring below `drop_ratio` of the channel's best score.
///
/// Rank order is preserved. The best candidate always survives, so applying
/// the filter to its own output removes nothing.
pub fn apply_drop_ratio(candidates: Vec<Record>, drop_ratio: f32) -> Vec<Record> {
    let max_score = candidates
        .iter()
        .map(|c| c.score)
        .fold(f32::NEG_INFINITY, f32::max);

    // BM25 scores are non-negative; anything else has no meaningful fraction
    if drop_ratio <= 0.0 || !max_score.is_finite() || max_score <= 0.0 {
        return candidates;
    }

    let threshold = max_score * drop_ratio;
    candidates
        .into_iter()
        .filter(|c| c.score >= threshold)
        .collect()
}

#[derive(Debug)]
struct Fused {
    record: Record,
    ranks: Vec<usize>,
}

impl Fused {
    fn best_rank(&self) -> usize {
        self.ranks.iter().copied().min().unwrap_or(usize::MAX)
    }
}

/// RRF score = Σ 1/(k + rank) over every channel a record appears in,
/// with 1-based ranks.
///
/// Output is ordered by fused score descending, then best single-channel
/// rank, then id, and truncated to `limit`. Each returned record carries its
/// fused score. A repeated id within one channel is dropped before ranking:
/// it counts once, at its first position, and later records close the gap.
pub fn reciprocal_rank_fusion(channels: &[Vec<Record>], k: u32, limit: usize) -> Vec<Record> {
    let mut fused: HashMap<RecordId, Fused> = HashMap::new();

    for candidates in channels {
        let mut seen_in_channel: Vec<&RecordId> = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            if seen_in_channel.contains(&&candidate.id) {
                continue;
            }
            seen_in_channel.push(&candidate.id);

            let rank = seen_in_channel.len();
            fused
                .entry(candidate.id.clone())
                .and_modify(|f| {
                    f.ranks.push(rank);
                    for (name, value) in &candidate.fields {
                        f.record
                            .fields
                            .entry(name.clone())
                            .or_insert_with(|| value.clone());
                    }
                })
                .or_insert_with(|| Fused {
                    record: candidate.clone(),
                    ranks: vec![rank],
                });
        }
    }

    let mut scored: Vec<(f64, Fused)> = fused
        .into_values()
        .map(|mut f| {
            // summing in rank order keeps the score independent of channel order
            f.ranks.sort_unstable();
            let score = f
                .ranks
                .iter()
                .map(|&rank| 1.0 / (k as f64 + rank as f64))
                .sum::<f64>();
            (score, f)
        })
        .collect();

    scored.sort_by(|(score_a, a), (score_b, b)| {
        score_b
            .partial_cmp(score_a)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.best_rank().cmp(&b.best_rank()))
            .then_with(|| a.record.id.cmp(&b.record.id))
    });

    scored
        .into_iter()
        .take(limit)
        .map(|(score, f)| Record {
            score: score as f32,
            ..f.record
        })
        .collect()
}
