//! Secondary similarity strategies for MEDIUM-confidence candidates.
//!
//! A [`Reranker`] receives the top few scored candidates and returns them in
//! preferred order, optionally with adjusted scores. Returning `None` means the
//! strategy is unavailable and the scorer falls back to [`HeuristicReranker`].

use std::cmp::Ordering;

use crate::domain::{ScoredCandidate, TargetMetadata};

use super::scoring::{candidate_title, cmp_year_distance, normalize_title};

/// Swappable re-ranking strategy
pub trait Reranker: Send + Sync {
    /// Human-readable strategy name
    fn name(&self) -> &str;

    /// Order `top` best first; `None` if the strategy cannot decide
    fn rerank(
        &self,
        target: &TargetMetadata,
        top: Vec<ScoredCandidate>,
    ) -> Option<Vec<ScoredCandidate>>;
}

/// Prefers lower subtitle penalty, then closer year, then higher score.
///
/// The winner's score is adjusted by year: a bonus for the exact year, nothing
/// for one year off, and half a year step lost per further year.
#[derive(Debug, Clone)]
pub struct HeuristicReranker {
    year_step: f64,
    exact_year_bonus: f64,
}

impl HeuristicReranker {
    pub fn new(year_step: f64, exact_year_bonus: f64) -> Self {
        Self {
            year_step,
            exact_year_bonus,
        }
    }

    fn year_adjustment(&self, distance: Option<u32>) -> f64 {
        match distance {
            Some(0) => self.exact_year_bonus,
            Some(1) | None => 0.0,
            Some(d) => -(self.year_step / 2.0) * (d - 1) as f64,
        }
    }
}

impl Reranker for HeuristicReranker {
    fn name(&self) -> &str {
        "heuristic"
    }

    fn rerank(
        &self,
        _target: &TargetMetadata,
        mut top: Vec<ScoredCandidate>,
    ) -> Option<Vec<ScoredCandidate>> {
        if top.is_empty() {
            return None;
        }

        // Stable sort keeps the incoming rank for full ties
        top.sort_by(|a, b| {
            a.subtitle_penalty
                .total_cmp(&b.subtitle_penalty)
                .then_with(|| cmp_year_distance(a.year_distance, b.year_distance))
                .then_with(|| b.score.total_cmp(&a.score))
        });

        let adjustment = self.year_adjustment(top[0].year_distance);
        top[0].score = (top[0].score + adjustment).clamp(0.0, 1.0);
        Some(top)
    }
}

/// Lightweight token strategy: blends the composite score with how much of the
/// target's title vocabulary the candidate title contains.
#[derive(Debug, Clone, Default)]
pub struct TokenReranker;

impl TokenReranker {
    fn containment(target: &TargetMetadata, candidate: &ScoredCandidate) -> f64 {
        let title = normalize_title(&candidate_title(&candidate.candidate));
        let words: Vec<&str> = title.split_whitespace().collect();

        target
            .titles()
            .map(|t| {
                let norm = normalize_title(t);
                let target_words: Vec<&str> = norm.split_whitespace().collect();
                if target_words.is_empty() {
                    return 0.0;
                }
                let hits = target_words.iter().filter(|w| words.contains(w)).count();
                hits as f64 / target_words.len() as f64
            })
            .fold(0.0, f64::max)
    }
}

impl Reranker for TokenReranker {
    fn name(&self) -> &str {
        "token"
    }

    fn rerank(
        &self,
        target: &TargetMetadata,
        top: Vec<ScoredCandidate>,
    ) -> Option<Vec<ScoredCandidate>> {
        if top.is_empty() {
            return None;
        }

        let mut adjusted: Vec<(usize, ScoredCandidate)> = top
            .into_iter()
            .enumerate()
            .map(|(idx, mut c)| {
                let blended = (c.score + Self::containment(target, &c)) / 2.0 - c.subtitle_penalty;
                c.score = blended.clamp(0.0, 1.0);
                (idx, c)
            })
            .collect();

        adjusted.sort_by(|(ia, a), (ib, b)| match b.score.total_cmp(&a.score) {
            Ordering::Equal => ia.cmp(ib),
            other => other,
        });

        Some(adjusted.into_iter().map(|(_, c)| c).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Candidate, ConfidenceTier, MediaType};

    fn scored(title: &str, score: f64, year_distance: Option<u32>, penalty: f64) -> ScoredCandidate {
        ScoredCandidate {
            candidate: Candidate::new("p", title, title, None),
            score,
            tier: ConfidenceTier::Medium,
            year_distance,
            subtitle_penalty: penalty,
        }
    }

    #[test]
    fn test_heuristic_prefers_no_subtitle_then_year() {
        let target = TargetMetadata::new("Heat", Some(1995), MediaType::Movie);
        let reranker = HeuristicReranker::new(0.25, 0.05);

        let out = reranker
            .rerank(
                &target,
                vec![
                    scored("a", 0.85, Some(0), 0.35),
                    scored("b", 0.75, Some(2), 0.0),
                    scored("c", 0.72, Some(0), 0.0),
                ],
            )
            .unwrap();

        assert_eq!(out[0].candidate.title, "c");
        assert!((out[0].score - 0.77).abs() < 1e-9);
        assert_eq!(out[1].candidate.title, "b");
        assert_eq!(out[2].candidate.title, "a");
    }

    #[test]
    fn test_heuristic_penalizes_distant_year() {
        let target = TargetMetadata::new("Heat", Some(1995), MediaType::Movie);
        let reranker = HeuristicReranker::new(0.25, 0.05);
        let out = reranker
            .rerank(&target, vec![scored("a", 0.75, Some(3), 0.0)])
            .unwrap();
        assert!((out[0].score - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_empty_window_declines() {
        let target = TargetMetadata::new("Heat", Some(1995), MediaType::Movie);
        assert!(HeuristicReranker::new(0.25, 0.05).rerank(&target, Vec::new()).is_none());
        assert!(TokenReranker.rerank(&target, Vec::new()).is_none());
    }

    #[test]
    fn test_token_reranker_prefers_full_vocabulary() {
        let target = TargetMetadata::new("The Grand Budapest Hotel", Some(2014), MediaType::Movie);
        let out = TokenReranker
            .rerank(
                &target,
                vec![
                    scored("Grand Hotel", 0.74, Some(0), 0.0),
                    scored("Grand Budapest Hotel", 0.72, Some(0), 0.0),
                ],
            )
            .unwrap();
        assert_eq!(out[0].candidate.title, "Grand Budapest Hotel");
        assert_eq!(TokenReranker.name(), "token");
    }
}
