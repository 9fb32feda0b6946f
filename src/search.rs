//! Fuzzy ranking used by the assist pipeline.
//!
//! Scoring walks the query through the candidate left to right: every
//! matched character adds 1, a match directly after the previous match adds
//! 10 instead, and a completed word earns `max(0, 10 - last_match_pos)` for
//! matching early in the candidate. Multi-word queries multiply per-word
//! scores; a word with no match zeroes the whole result.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

/// Default minimum score for a candidate to be kept.
pub const DEFAULT_SCORE_CUTOFF: u64 = 15;

/// Default maximum number of ranked results.
pub const DEFAULT_RESULT_LIMIT: usize = 50;

/// Score a single query word against a candidate.
pub fn fuzzy_score_word(query: &str, candidate: &str) -> u64 {
    let query: Vec<char> = query.chars().flat_map(char::to_lowercase).collect();
    let candidate: Vec<char> = candidate.chars().flat_map(char::to_lowercase).collect();
    if query.is_empty() {
        return 0;
    }

    let mut qpos = 0usize;
    let mut score = 0u64;
    let mut last_match: Option<usize> = None;
    for (cpos, c) in candidate.iter().enumerate() {
        if qpos >= query.len() {
            break;
        }
        if query[qpos] == *c {
            score += match last_match {
                Some(prev) if prev + 1 == cpos => 10,
                _ => 1,
            };
            last_match = Some(cpos);
            qpos += 1;
        }
    }

    if qpos == query.len() {
        // bonus for matching early in the candidate
        score + 10u64.saturating_sub(last_match.unwrap_or(0) as u64)
    } else {
        0
    }
}

/// Score a whole query; per-word scores multiply together.
pub fn fuzzy_score(query: &str, candidate: &str) -> u64 {
    let mut total = 1u64;
    let mut words = 0;
    for word in query.split_whitespace() {
        let score = fuzzy_score_word(word, candidate);
        if score == 0 {
            return 0;
        }
        total = total.saturating_mul(score);
        words += 1;
    }
    if words == 0 {
        0
    } else {
        total
    }
}

/// A ranked search hit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scored<T> {
    pub score: u64,
    pub label: String,
    pub value: T,
}

#[derive(Debug, PartialEq, Eq)]
struct HeapEntry<T> {
    score: u64,
    /// Insertion order; keeps ordering total without requiring `T: Ord`.
    serial: usize,
    label: String,
    value: T,
}

impl<T: Eq> Ord for HeapEntry<T> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.score
            .cmp(&other.score)
            .then(other.serial.cmp(&self.serial))
    }
}

impl<T: Eq> PartialOrd for HeapEntry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Top-K collector: a min-heap of at most `limit` entries above `cutoff`.
///
/// Feeding N candidates costs O(N log K); the worst kept score rises as the
/// heap fills, letting low scores be rejected without heap traffic.
pub struct Ranked<T> {
    heap: BinaryHeap<Reverse<HeapEntry<T>>>,
    limit: usize,
    cutoff: u64,
    serial: usize,
}

impl<T: Eq> Ranked<T> {
    pub fn new(limit: usize, cutoff: u64) -> Self {
        Ranked {
            heap: BinaryHeap::with_capacity(limit + 1),
            limit: limit.max(1),
            cutoff,
            serial: 0,
        }
    }

    /// The score a new candidate has to beat to be kept.
    pub fn worst_kept(&self) -> u64 {
        if self.heap.len() < self.limit {
            self.cutoff
        } else {
            self.heap
                .peek()
                .map(|Reverse(e)| e.score)
                .unwrap_or(self.cutoff)
        }
    }

    /// Offer a candidate with a precomputed score.
    pub fn consider(&mut self, score: u64, label: String, value: T) {
        if score < self.worst_kept() {
            return;
        }
        self.serial += 1;
        self.heap.push(Reverse(HeapEntry {
            score,
            serial: self.serial,
            label,
            value,
        }));
        if self.heap.len() > self.limit {
            self.heap.pop();
        }
    }

    /// Score `label` against `query` (times `boost`) and offer it.
    pub fn offer(&mut self, query: &str, boost: u64, label: String, value: T) {
        let score = fuzzy_score(query, &label).saturating_mul(boost);
        self.consider(score, label, value);
    }

    /// Drain into a list sorted by descending score.
    pub fn into_sorted(self) -> Vec<Scored<T>> {
        let mut entries: Vec<HeapEntry<T>> =
            self.heap.into_iter().map(|Reverse(e)| e).collect();
        entries.sort_by(|a, b| b.score.cmp(&a.score).then(a.serial.cmp(&b.serial)));
        entries
            .into_iter()
            .map(|e| Scored {
                score: e.score,
                label: e.label,
                value: e.value,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consecutive_matches_score_higher_than_gapped() {
        let tight = fuzzy_score_word("gen", "general");
        let gapped = fuzzy_score_word("gen", "g-e-n-eral");
        assert!(tight > gapped, "{} vs {}", tight, gapped);
    }

    #[test]
    fn inserting_gap_never_raises_score() {
        // the monotonicity property: breaking up consecutive matches loses
        // the consecutive bonus
        for (a, b) in [("rust", "rustacean"), ("me", "member"), ("log", "logging")] {
            let broken: String = {
                let mut s = String::new();
                for (i, c) in b.chars().enumerate() {
                    s.push(c);
                    if i == 0 {
                        s.push('_');
                    }
                }
                s
            };
            assert!(fuzzy_score_word(a, b) >= fuzzy_score_word(a, &broken));
        }
    }

    #[test]
    fn early_match_bonus() {
        assert!(fuzzy_score_word("dev", "dev-chat") > fuzzy_score_word("dev", "chat-dev"));
    }

    #[test]
    fn unmatched_word_zeroes_total() {
        assert_eq!(fuzzy_score("general zzz", "general"), 0);
        assert!(fuzzy_score("gen ral", "general") > 0);
    }

    #[test]
    fn multi_word_scores_multiply() {
        let one = fuzzy_score("gen", "general chat");
        let two = fuzzy_score("gen chat", "general chat");
        assert!(two > one);
    }

    #[test]
    fn ranked_keeps_top_k_sorted_desc() {
        let mut ranked: Ranked<u32> = Ranked::new(3, 0);
        for (score, id) in [(5, 1), (40, 2), (12, 3), (33, 4), (7, 5)] {
            ranked.consider(score, format!("#{}", id), id);
        }
        let out = ranked.into_sorted();
        let ids: Vec<u32> = out.iter().map(|s| s.value).collect();
        assert_eq!(ids, vec![2, 4, 3]);
        assert!(out.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[test]
    fn cutoff_rejects_weak_candidates() {
        let mut ranked: Ranked<u32> = Ranked::new(10, DEFAULT_SCORE_CUTOFF);
        ranked.offer("zq", 1, "general".into(), 1);
        ranked.offer("gen", 1, "general".into(), 2);
        let out = ranked.into_sorted();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].value, 2);
    }

    #[test]
    fn result_set_never_exceeds_limit() {
        let mut ranked: Ranked<usize> = Ranked::new(4, 0);
        for i in 0..100 {
            ranked.consider(i as u64 + 1, format!("c{}", i), i);
        }
        assert_eq!(ranked.into_sorted().len(), 4);
    }
}
