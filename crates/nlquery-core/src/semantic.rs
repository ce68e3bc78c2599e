//! Semantic matching: the third pipeline stage.
//!
//! Only consulted when the rule matcher yields nothing. The query vector is
//! computed per request; exemplar vectors are cached in the
//! [`EmbeddingIndex`], which is rebuilt only on catalog reload.
//!
//! Decision logic:
//! 1. Score every exemplar by cosine similarity; keep the best score per
//!    intent label.
//! 2. Drop candidates below the similarity floor; keep the top-k.
//! 3. If the leader clears the accept threshold and leads the runner-up by
//!    at least the tie margin, accept it outright.
//! 4. Otherwise, if two or more candidates sit within the margin of each
//!    other, the input is ambiguous — clarify rather than guess.
//! 5. Anything else is no decision; the fallback stage gets its turn.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::dsl::{IntentCandidate, Stage};
use crate::embedding::cosine_similarity;

/// A canonical phrase with its intent label and precomputed vector.
#[derive(Debug, Clone)]
pub struct IntentExemplar {
    pub label: String,
    pub phrase: String,
    pub vector: Vec<f32>,
}

/// Cached exemplar vectors for one catalog generation.
///
/// Read-only at request time; invalidated and rebuilt only on reload.
#[derive(Debug, Default)]
pub struct EmbeddingIndex {
    entries: Vec<IntentExemplar>,
}

impl EmbeddingIndex {
    pub fn new(entries: Vec<IntentExemplar>) -> Self {
        Self { entries }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn entries(&self) -> &[IntentExemplar] {
        &self.entries
    }
}

/// Matching thresholds. Defaults are the documented crate defaults; the
/// application config can override each one.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    /// Candidates below this similarity are discarded entirely.
    pub similarity_floor: f32,
    /// The leader must reach this score to be accepted outright.
    pub accept_threshold: f32,
    /// Two candidates within this margin of each other are a tie.
    pub tie_margin: f32,
    /// Maximum candidates considered after per-label aggregation.
    pub top_k: usize,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            similarity_floor: 0.55,
            accept_threshold: 0.75,
            tie_margin: 0.05,
            top_k: 3,
        }
    }
}

/// Outcome of the semantic stage.
#[derive(Debug, Clone, PartialEq)]
pub enum SemanticDecision {
    /// A single candidate cleared the accept threshold with a clear lead.
    Accepted(IntentCandidate),
    /// Competing candidates within the tie margin, best first.
    Ambiguous(Vec<IntentCandidate>),
    /// Nothing above the floor, or an unclear leader below the accept
    /// threshold with no tie. The next stage decides.
    NoDecision,
}

/// Score the query vector against the index and decide.
pub fn classify(index: &EmbeddingIndex, query: &[f32], thresholds: &Thresholds) -> SemanticDecision {
    if index.is_empty() || query.is_empty() {
        return SemanticDecision::NoDecision;
    }
    decide(rank(index, query), thresholds)
}

/// Best cosine score per intent label, sorted descending (label ascending on
/// exact score ties, for determinism).
pub fn rank(index: &EmbeddingIndex, query: &[f32]) -> Vec<(String, f32)> {
    let mut best: HashMap<&str, f32> = HashMap::new();
    for exemplar in index.entries() {
        let score = cosine_similarity(query, &exemplar.vector);
        let entry = best.entry(exemplar.label.as_str()).or_insert(f32::MIN);
        if score > *entry {
            *entry = score;
        }
    }
    let mut ranked: Vec<(String, f32)> = best
        .into_iter()
        .map(|(label, score)| (label.to_string(), score))
        .collect();
    ranked.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
    ranked
}

/// Apply floor, top-k, accept threshold, and tie margin to a ranked list.
pub fn decide(mut ranked: Vec<(String, f32)>, thresholds: &Thresholds) -> SemanticDecision {
    ranked.retain(|(_, score)| *score >= thresholds.similarity_floor);
    ranked.truncate(thresholds.top_k);

    if ranked.is_empty() {
        return SemanticDecision::NoDecision;
    }

    let top_score = ranked[0].1;
    let runner_up = ranked.get(1).map(|(_, s)| *s);
    let clear_lead = match runner_up {
        Some(second) => top_score - second >= thresholds.tie_margin,
        None => true,
    };

    if top_score >= thresholds.accept_threshold && clear_lead {
        let (label, score) = ranked.swap_remove(0);
        return SemanticDecision::Accepted(IntentCandidate::new(label, score, Stage::Semantic));
    }

    let contenders: Vec<IntentCandidate> = ranked
        .iter()
        .filter(|(_, score)| top_score - *score < thresholds.tie_margin)
        .map(|(label, score)| IntentCandidate::new(label.clone(), *score, Stage::Semantic))
        .collect();
    if contenders.len() >= 2 {
        return SemanticDecision::Ambiguous(contenders);
    }

    SemanticDecision::NoDecision
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ranked(pairs: &[(&str, f32)]) -> Vec<(String, f32)> {
        pairs.iter().map(|(l, s)| (l.to_string(), *s)).collect()
    }

    #[test]
    fn test_clear_winner_accepted() {
        let decision = decide(
            ranked(&[("drop_table", 0.90), ("truncate_table", 0.40)]),
            &Thresholds::default(),
        );
        match decision {
            SemanticDecision::Accepted(c) => {
                assert_eq!(c.label, "drop_table");
                assert_eq!(c.stage, Stage::Semantic);
                assert!((c.confidence - 0.90).abs() < 1e-6);
            }
            other => panic!("expected accept, got {:?}", other),
        }
    }

    #[test]
    fn test_near_tie_is_ambiguous() {
        // 0.81 vs 0.79 with a 0.05 margin: clarify, never guess
        let decision = decide(
            ranked(&[("drop_table", 0.81), ("truncate_table", 0.79)]),
            &Thresholds::default(),
        );
        match decision {
            SemanticDecision::Ambiguous(cands) => {
                assert_eq!(cands.len(), 2);
                assert_eq!(cands[0].label, "drop_table");
                assert_eq!(cands[1].label, "truncate_table");
            }
            other => panic!("expected ambiguity, got {:?}", other),
        }
    }

    #[test]
    fn test_exact_margin_lead_is_accepted() {
        // lead of exactly the margin counts as clear
        let decision = decide(
            ranked(&[("drop_table", 0.85), ("truncate_table", 0.80)]),
            &Thresholds::default(),
        );
        assert!(matches!(decision, SemanticDecision::Accepted(_)));
    }

    #[test]
    fn test_below_floor_is_no_decision() {
        let decision = decide(
            ranked(&[("drop_table", 0.50), ("truncate_table", 0.30)]),
            &Thresholds::default(),
        );
        assert_eq!(decision, SemanticDecision::NoDecision);
    }

    #[test]
    fn test_single_candidate_below_accept_is_no_decision() {
        let decision = decide(ranked(&[("drop_table", 0.65)]), &Thresholds::default());
        assert_eq!(decision, SemanticDecision::NoDecision);
    }

    #[test]
    fn test_top_k_truncates_before_decision() {
        let t = Thresholds {
            top_k: 2,
            ..Thresholds::default()
        };
        let decision = decide(
            ranked(&[("a", 0.72), ("b", 0.70), ("c", 0.69)]),
            &t,
        );
        // "c" is cut by top_k, leaving a two-way tie
        match decision {
            SemanticDecision::Ambiguous(cands) => assert_eq!(cands.len(), 2),
            other => panic!("expected ambiguity, got {:?}", other),
        }
    }

    #[test]
    fn test_rank_collapses_labels_and_orders() {
        let index = EmbeddingIndex::new(vec![
            IntentExemplar {
                label: "drop_table".to_string(),
                phrase: "drop table payments".to_string(),
                vector: vec![1.0, 0.0],
            },
            IntentExemplar {
                label: "drop_table".to_string(),
                phrase: "remove a table".to_string(),
                vector: vec![0.6, 0.8],
            },
            IntentExemplar {
                label: "row_count".to_string(),
                phrase: "count rows".to_string(),
                vector: vec![0.0, 1.0],
            },
        ]);
        let ranked = rank(&index, &[1.0, 0.0]);
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].0, "drop_table");
        assert!((ranked[0].1 - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_empty_index_is_no_decision() {
        let idx = EmbeddingIndex::default();
        assert_eq!(
            classify(&idx, &[1.0], &Thresholds::default()),
            SemanticDecision::NoDecision
        );
    }
}
