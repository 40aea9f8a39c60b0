//! Matching and scoring of search candidates against target metadata.
//!
//! Precedence:
//! 1. Provider-native id match → accept, score 1.0
//! 2. Exact normalized title + year → accept, score 1.0
//! 3. Composite score (title similarity, word overlap, year proximity,
//!    subtitle penalty) classified into HIGH / MEDIUM / LOW
//!
//! MEDIUM candidates go through a [`Reranker`] before being accepted.
//! Scoring is pure: identical inputs always give identical results.

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::{Candidate, ConfidenceTier, ScoredCandidate, TargetMetadata};

use super::rerank::{HeuristicReranker, Reranker};

/// Words in a promotional title tail that mark it as noise
const PROMO_WORDS: [&str; 5] = ["trailer", "teaser", "preview", "clip", "promo"];

/// Scoring weights and thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringConfig {
    /// Weight of normalized edit-distance similarity (default: 0.45)
    #[serde(default = "default_title_weight")]
    pub title_weight: f64,

    /// Weight of word-overlap ratio (default: 0.25)
    #[serde(default = "default_overlap_weight")]
    pub overlap_weight: f64,

    /// Weight of year proximity (default: 0.30)
    #[serde(default = "default_year_weight")]
    pub year_weight: f64,

    /// Subtracted when the candidate has a subtitle the target lacks (default: 0.35)
    #[serde(default = "default_subtitle_penalty")]
    pub subtitle_penalty: f64,

    /// Year proximity lost per year of distance (default: 0.25)
    #[serde(default = "default_year_step")]
    pub year_step: f64,

    /// Bonus for an exact year during MEDIUM re-ranking (default: 0.05)
    #[serde(default = "default_exact_year_bonus")]
    pub exact_year_bonus: f64,

    /// Scores at or above this are HIGH (default: 0.9)
    #[serde(default = "default_high_threshold")]
    pub high_threshold: f64,

    /// Scores below this are LOW and rejected (default: 0.7)
    #[serde(default = "default_accept_threshold")]
    pub accept_threshold: f64,

    /// Candidates handed to the reranker for MEDIUM scores, clamped to 3..=5 (default: 5)
    #[serde(default = "default_rerank_window")]
    pub rerank_window: usize,
}

fn default_title_weight() -> f64 {
    0.45
}
fn default_overlap_weight() -> f64 {
    0.25
}
fn default_year_weight() -> f64 {
    0.30
}
fn default_subtitle_penalty() -> f64 {
    0.35
}
fn default_year_step() -> f64 {
    0.25
}
fn default_exact_year_bonus() -> f64 {
    0.05
}
fn default_high_threshold() -> f64 {
    0.9
}
fn default_accept_threshold() -> f64 {
    0.7
}
fn default_rerank_window() -> usize {
    5
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            title_weight: default_title_weight(),
            overlap_weight: default_overlap_weight(),
            year_weight: default_year_weight(),
            subtitle_penalty: default_subtitle_penalty(),
            year_step: default_year_step(),
            exact_year_bonus: default_exact_year_bonus(),
            high_threshold: default_high_threshold(),
            accept_threshold: default_accept_threshold(),
            rerank_window: default_rerank_window(),
        }
    }
}

impl ScoringConfig {
    /// Validate weights and thresholds
    pub fn validate(&self) -> Result<()> {
        let weights = [self.title_weight, self.overlap_weight, self.year_weight];
        if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
            anyhow::bail!("Scoring weights must be finite and non-negative");
        }
        if weights.iter().sum::<f64>() <= 0.0 {
            anyhow::bail!("At least one scoring weight must be positive");
        }
        if !(0.0..=1.0).contains(&self.subtitle_penalty) {
            anyhow::bail!("subtitle_penalty must be within [0, 1]");
        }
        if !(self.accept_threshold > 0.0
            && self.accept_threshold <= self.high_threshold
            && self.high_threshold <= 1.0)
        {
            anyhow::bail!(
                "Thresholds must satisfy 0 < accept ({}) <= high ({}) <= 1",
                self.accept_threshold,
                self.high_threshold
            );
        }
        Ok(())
    }

    /// Effective re-rank window size
    pub fn window(&self) -> usize {
        self.rerank_window.clamp(3, 5)
    }

    fn tier_for(&self, score: f64) -> ConfidenceTier {
        if score >= self.high_threshold {
            ConfidenceTier::High
        } else if score >= self.accept_threshold {
            ConfidenceTier::Medium
        } else {
            ConfidenceTier::Low
        }
    }
}

/// Lowercase, fold `&`, drop apostrophes, turn punctuation into spaces,
/// collapse whitespace and strip a leading article.
pub fn normalize_title(raw: &str) -> String {
    let lowered = raw.to_lowercase().replace('&', " and ");
    let mut out = String::with_capacity(lowered.len());
    for ch in lowered.chars() {
        match ch {
            '\'' | '\u{2019}' | '`' => {}
            c if c.is_alphanumeric() => out.push(c),
            _ => out.push(' '),
        }
    }

    let collapsed = out.split_whitespace().collect::<Vec<_>>().join(" ");
    match collapsed.strip_prefix("the ") {
        Some(rest) => rest.to_string(),
        None => collapsed,
    }
}

/// Remove bracketed segments and a trailing promotional tail
/// ("Rocketman (2019) - Official Trailer" → "Rocketman").
pub fn clean_candidate_title(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut depth = 0usize;
    for ch in raw.chars() {
        match ch {
            '(' | '[' => depth += 1,
            ')' | ']' => depth = depth.saturating_sub(1),
            c if depth == 0 => out.push(c),
            _ => {}
        }
    }

    for sep in [" - ", " | ", " \u{2013} "] {
        if let Some(idx) = out.find(sep) {
            let tail = out[idx + sep.len()..].to_lowercase();
            if PROMO_WORDS.iter().any(|w| tail.contains(w)) {
                out.truncate(idx);
            }
        }
    }

    out.trim().to_string()
}

/// Split "Main: Subtitle" at the first colon
pub fn split_subtitle(title: &str) -> (&str, Option<&str>) {
    match title.split_once(':') {
        Some((main, sub)) if !sub.trim().is_empty() => (main.trim(), Some(sub.trim())),
        Some((main, _)) => (main.trim(), None),
        None => (title.trim(), None),
    }
}

/// Candidate title as scored: cleaned, with a separately reported subtitle appended
pub fn candidate_title(candidate: &Candidate) -> String {
    let cleaned = clean_candidate_title(&candidate.title);
    match candidate.subtitle.as_deref().map(str::trim) {
        Some(sub) if !sub.is_empty() && !cleaned.contains(':') => format!("{}: {}", cleaned, sub),
        _ => cleaned,
    }
}

/// Jaccard ratio of two normalized titles' word sets
pub fn word_overlap(a: &str, b: &str) -> f64 {
    let left: BTreeSet<&str> = a.split_whitespace().collect();
    let right: BTreeSet<&str> = b.split_whitespace().collect();
    let union = left.union(&right).count();
    if union == 0 {
        return 0.0;
    }
    left.intersection(&right).count() as f64 / union as f64
}

fn contains_phrase(haystack: &str, phrase: &str) -> bool {
    format!(" {} ", haystack).contains(&format!(" {} ", phrase))
}

/// Candidate scoring engine
pub struct Scorer {
    config: ScoringConfig,
    reranker: Option<Arc<dyn Reranker>>,
    fallback: HeuristicReranker,
}

impl Scorer {
    /// Scorer with the built-in year/subtitle heuristic for MEDIUM candidates
    pub fn new(config: ScoringConfig) -> Self {
        let fallback = HeuristicReranker::new(config.year_step, config.exact_year_bonus);
        Self {
            config,
            reranker: None,
            fallback,
        }
    }

    /// Use a secondary similarity strategy for MEDIUM candidates
    pub fn with_reranker(mut self, reranker: Arc<dyn Reranker>) -> Self {
        self.reranker = Some(reranker);
        self
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    /// Pick the accepted candidate, or `None` when nothing clears the threshold
    pub fn score(
        &self,
        target: &TargetMetadata,
        candidates: &[Candidate],
    ) -> Option<ScoredCandidate> {
        if candidates.is_empty() {
            return None;
        }

        if let Some(exact) = self.exact_match(target, candidates) {
            debug!(
                provider = %exact.candidate.provider,
                provider_id = %exact.candidate.provider_id,
                "Exact match accepted"
            );
            return Some(exact);
        }

        let ranked = self.rank(target, candidates);
        let top = ranked.first()?;

        match top.tier {
            ConfidenceTier::High => Some(top.clone()),
            ConfidenceTier::Low => {
                debug!(score = top.score, title = %top.candidate.title, "Best candidate rejected");
                None
            }
            ConfidenceTier::Medium => {
                // LOW candidates never reach the reranker
                let window: Vec<ScoredCandidate> = ranked
                    .into_iter()
                    .take_while(|c| c.score >= self.config.accept_threshold)
                    .take(self.config.window())
                    .collect();
                self.resolve_medium(target, window)
            }
        }
    }

    /// Score every candidate and sort best first.
    ///
    /// Ties break on closer year, then lower subtitle penalty, then input order.
    pub fn rank(&self, target: &TargetMetadata, candidates: &[Candidate]) -> Vec<ScoredCandidate> {
        let target_norms: Vec<String> = target.titles().map(normalize_title).collect();

        let mut scored: Vec<(usize, ScoredCandidate)> = candidates
            .iter()
            .enumerate()
            .map(|(idx, c)| (idx, self.composite(&target_norms, target.year, c)))
            .collect();

        scored.sort_by(|(ia, a), (ib, b)| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| cmp_year_distance(a.year_distance, b.year_distance))
                .then_with(|| a.subtitle_penalty.total_cmp(&b.subtitle_penalty))
                .then_with(|| ia.cmp(ib))
        });

        scored.into_iter().map(|(_, s)| s).collect()
    }

    fn exact_match(&self, target: &TargetMetadata, candidates: &[Candidate]) -> Option<ScoredCandidate> {
        let by_id = candidates.iter().find(|c| {
            target
                .known_ids
                .get(&c.provider)
                .is_some_and(|known| known == &c.provider_id)
        });
        if let Some(candidate) = by_id {
            return Some(self.accept_exact(target, candidate));
        }

        let year = target.year?;
        let target_norms: Vec<String> = target.titles().map(normalize_title).collect();
        candidates
            .iter()
            .find(|c| {
                c.year == Some(year) && {
                    let norm = normalize_title(&candidate_title(c));
                    !norm.is_empty() && target_norms.iter().any(|t| *t == norm)
                }
            })
            .map(|c| self.accept_exact(target, c))
    }

    fn accept_exact(&self, target: &TargetMetadata, candidate: &Candidate) -> ScoredCandidate {
        ScoredCandidate {
            candidate: candidate.clone(),
            score: 1.0,
            tier: ConfidenceTier::High,
            year_distance: year_distance(target.year, candidate.year),
            subtitle_penalty: 0.0,
        }
    }

    fn composite(
        &self,
        target_norms: &[String],
        target_year: Option<i32>,
        candidate: &Candidate,
    ) -> ScoredCandidate {
        let title = candidate_title(candidate);
        let norm = normalize_title(&title);

        let (similarity, overlap) = target_norms.iter().fold((0.0f64, 0.0f64), |(s, o), t| {
            (
                s.max(strsim::normalized_levenshtein(t, &norm)),
                o.max(word_overlap(t, &norm)),
            )
        });

        let distance = year_distance(target_year, candidate.year);
        let year_score = distance
            .map(|d| (1.0 - self.config.year_step * d as f64).max(0.0))
            .unwrap_or(0.0);

        let penalty = self.subtitle_penalty(target_norms, &title);

        let weight_sum =
            self.config.title_weight + self.config.overlap_weight + self.config.year_weight;
        let weighted = (self.config.title_weight * similarity
            + self.config.overlap_weight * overlap
            + self.config.year_weight * year_score)
            / weight_sum;
        let score = clamp_score(weighted - penalty);

        ScoredCandidate {
            candidate: candidate.clone(),
            score,
            tier: self.config.tier_for(score),
            year_distance: distance,
            subtitle_penalty: penalty,
        }
    }

    fn subtitle_penalty(&self, target_norms: &[String], title: &str) -> f64 {
        let Some(subtitle) = split_subtitle(title).1 else {
            return 0.0;
        };
        let subtitle = normalize_title(subtitle);
        if subtitle.is_empty() || target_norms.iter().any(|t| contains_phrase(t, &subtitle)) {
            0.0
        } else {
            self.config.subtitle_penalty
        }
    }

    fn resolve_medium(
        &self,
        target: &TargetMetadata,
        window: Vec<ScoredCandidate>,
    ) -> Option<ScoredCandidate> {
        let reranked = self
            .reranker
            .as_ref()
            .and_then(|r| {
                let out = r.rerank(target, window.clone());
                if out.is_none() {
                    debug!(reranker = r.name(), "Reranker unavailable, using heuristic");
                }
                out
            })
            .or_else(|| self.fallback.rerank(target, window))?;

        let mut best = reranked.into_iter().next()?;
        best.score = clamp_score(best.score);
        if best.score >= self.config.accept_threshold {
            best.tier = ConfidenceTier::Medium;
            Some(best)
        } else {
            debug!(score = best.score, title = %best.candidate.title, "Re-ranked candidate rejected");
            None
        }
    }
}

fn clamp_score(score: f64) -> f64 {
    if score.is_nan() {
        0.0
    } else {
        score.clamp(0.0, 1.0)
    }
}

fn year_distance(target: Option<i32>, candidate: Option<i32>) -> Option<u32> {
    match (target, candidate) {
        (Some(a), Some(b)) => Some(a.abs_diff(b)),
        _ => None,
    }
}

/// Known distances first, closer first
pub(crate) fn cmp_year_distance(a: Option<u32>, b: Option<u32>) -> Ordering {
    match (a, b) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::MediaType;

    #[test]
    fn test_normalize_title() {
        assert_eq!(normalize_title("The Lord of the Rings"), "lord of the rings");
        assert_eq!(normalize_title("Fast & Furious"), "fast and furious");
        assert_eq!(normalize_title("Mad Mike's  Mission!"), "mad mikes mission");
        assert_eq!(normalize_title("WALL·E"), "wall e");
    }

    #[test]
    fn test_clean_candidate_title() {
        assert_eq!(
            clean_candidate_title("Rocketman (2019) - Official Trailer"),
            "Rocketman"
        );
        assert_eq!(clean_candidate_title("Heat [HD]"), "Heat");
        assert_eq!(
            clean_candidate_title("Spider-Man - Into the Spider-Verse"),
            "Spider-Man - Into the Spider-Verse"
        );
    }

    #[test]
    fn test_split_subtitle() {
        assert_eq!(
            split_subtitle("Rocketman: Mad Mike's Mission"),
            ("Rocketman", Some("Mad Mike's Mission"))
        );
        assert_eq!(split_subtitle("Rocketman"), ("Rocketman", None));
        assert_eq!(split_subtitle("Rocketman:"), ("Rocketman", None));
    }

    #[test]
    fn test_candidate_title_appends_subtitle() {
        let c = Candidate::new("p", "1", "Rocketman", Some(2019)).with_subtitle("Mad Mike's Mission");
        assert_eq!(candidate_title(&c), "Rocketman: Mad Mike's Mission");
    }

    #[test]
    fn test_word_overlap() {
        assert_eq!(word_overlap("a b", "a b"), 1.0);
        assert_eq!(word_overlap("a b", "c d"), 0.0);
        assert_eq!(word_overlap("", ""), 0.0);
        assert!((word_overlap("rocketman", "rocketman mad mikes mission") - 0.25).abs() < 1e-9);
    }

    #[test]
    fn test_matching_subtitle_not_penalized() {
        let scorer = Scorer::new(ScoringConfig::default());
        let target = TargetMetadata::new("Star Wars: The Last Jedi", Some(2017), MediaType::Movie);
        let ranked = scorer.rank(
            &target,
            &[Candidate::new("p", "1", "Star Wars: The Last Jedi - Teaser", Some(2017))],
        );
        assert_eq!(ranked[0].subtitle_penalty, 0.0);
    }

    #[test]
    fn test_config_validation() {
        assert!(ScoringConfig::default().validate().is_ok());

        let bad = ScoringConfig {
            accept_threshold: 0.95,
            ..Default::default()
        };
        assert!(bad.validate().is_err());

        let bad = ScoringConfig {
            title_weight: 0.0,
            overlap_weight: 0.0,
            year_weight: 0.0,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_window_is_clamped() {
        let config = ScoringConfig {
            rerank_window: 10,
            ..Default::default()
        };
        assert_eq!(config.window(), 5);
        let config = ScoringConfig {
            rerank_window: 1,
            ..Default::default()
        };
        assert_eq!(config.window(), 3);
    }
}
