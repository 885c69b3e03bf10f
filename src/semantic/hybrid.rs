//! Hybrid search combining semantic and lexical scores.
//!
//! Uses a weighted linear fusion:
//!   fused(d) = α * similarity(d) + β * keyword_score(d)
//!
//! Items found by both lookups are merged, keeping the best score of each
//! component. Short queries get a stricter threshold, and a page that would
//! come back empty falls back to the raw similarity order.

use std::collections::HashMap;

use crate::config::SearchConfig;

use super::preprocess::query_token_count;
use super::search::SemanticHit;

/// Default semantic weight (α).
pub const DEFAULT_SEMANTIC_WEIGHT: f32 = 0.7;

/// Default keyword weight (β).
pub const DEFAULT_KEYWORD_WEIGHT: f32 = 0.3;

/// Keyword lookup hit.
#[derive(Debug, Clone, PartialEq)]
pub struct KeywordHit {
    pub item_id: String,
    /// Keyword score in [0.0, 1.0]
    pub score: f32,
}

/// One fused result.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedHit {
    pub item_id: String,
    pub similarity: f32,
    pub keyword_score: f32,
    pub fused_score: f32,
    /// 1-based position in the page
    pub rank: usize,
}

/// Fusion weights and thresholds.
#[derive(Debug, Clone)]
pub struct HybridRanker {
    pub semantic_weight: f32,
    pub keyword_weight: f32,
    pub min_similarity: f32,
    pub short_query_min_similarity: f32,
    pub short_query_tokens: usize,
}

impl Default for HybridRanker {
    fn default() -> Self {
        Self::from(&SearchConfig::default())
    }
}

impl From<&SearchConfig> for HybridRanker {
    fn from(config: &SearchConfig) -> Self {
        Self {
            semantic_weight: config.semantic_weight,
            keyword_weight: config.keyword_weight,
            min_similarity: config.min_similarity,
            short_query_min_similarity: config.short_query_min_similarity,
            short_query_tokens: config.short_query_tokens,
        }
    }
}

/// Merged candidate before scoring.
struct Candidate {
    item_id: String,
    similarity: f32,
    keyword_score: f32,
    /// first position across semantic hits, then keyword hits
    order: usize,
}

impl HybridRanker {
    /// Threshold applied to the fused score for `query`.
    ///
    /// Queries with few tokens are less discriminative, so the threshold is
    /// raised to at least `short_query_min_similarity`.
    pub fn effective_threshold(&self, query: &str) -> f32 {
        if query_token_count(query) <= self.short_query_tokens {
            self.min_similarity.max(self.short_query_min_similarity)
        } else {
            self.min_similarity
        }
    }

    /// Fuse both candidate lists into one page of at most `limit` results.
    pub fn rank(
        &self,
        query: &str,
        semantic: &[SemanticHit],
        keyword: &[KeywordHit],
        limit: usize,
    ) -> Vec<RankedHit> {
        let candidates = merge(semantic, keyword);
        if candidates.is_empty() || limit == 0 {
            return vec![];
        }

        let threshold = self.effective_threshold(query);
        let mut scored: Vec<(Candidate, f32)> = candidates
            .into_iter()
            .map(|c| {
                let fused = self.semantic_weight * c.similarity + self.keyword_weight * c.keyword_score;
                (c, fused)
            })
            .collect();

        let passing = scored.iter().filter(|(_, fused)| *fused >= threshold).count();

        if passing == 0 {
            log::debug!(
                "no candidate passed threshold={threshold:.3}, returning top {limit} by similarity"
            );
            scored.sort_by(|(a, _), (b, _)| {
                b.similarity
                    .partial_cmp(&a.similarity)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then(a.order.cmp(&b.order))
            });
        } else {
            scored.retain(|(_, fused)| *fused >= threshold);
            scored.sort_by(|(a, fa), (b, fb)| {
                fb.partial_cmp(fa)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then(a.order.cmp(&b.order))
            });
        }

        scored
            .into_iter()
            .take(limit)
            .enumerate()
            .map(|(idx, (c, fused))| RankedHit {
                item_id: c.item_id,
                similarity: c.similarity,
                keyword_score: c.keyword_score,
                fused_score: fused,
                rank: idx + 1,
            })
            .collect()
    }
}

/// Union of both lists keyed by item id, best score per component.
fn merge<'a>(semantic: &'a [SemanticHit], keyword: &'a [KeywordHit]) -> Vec<Candidate> {
    let mut positions: HashMap<&'a str, usize> = HashMap::new();
    let mut candidates: Vec<Candidate> = Vec::with_capacity(semantic.len() + keyword.len());

    let entries = semantic
        .iter()
        .map(|h| (h.item_id.as_str(), h.similarity, 0.0))
        .chain(keyword.iter().map(|h| (h.item_id.as_str(), 0.0, h.score)));

    for (item_id, similarity, keyword_score) in entries {
        let similarity = clamp_score(similarity);
        let keyword_score = clamp_score(keyword_score);
        match positions.get(item_id) {
            Some(&pos) => {
                let c = &mut candidates[pos];
                c.similarity = c.similarity.max(similarity);
                c.keyword_score = c.keyword_score.max(keyword_score);
            }
            None => {
                let order = candidates.len();
                positions.insert(item_id, order);
                candidates.push(Candidate {
                    item_id: item_id.to_string(),
                    similarity,
                    keyword_score,
                    order,
                });
            }
        }
    }

    candidates
}

fn clamp_score(score: f32) -> f32 {
    if score.is_finite() {
        score.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sem(id: &str, similarity: f32) -> SemanticHit {
        SemanticHit {
            item_id: id.to_string(),
            similarity,
        }
    }

    fn kw(id: &str, score: f32) -> KeywordHit {
        KeywordHit {
            item_id: id.to_string(),
            score,
        }
    }

    fn ranker(min_similarity: f32) -> HybridRanker {
        HybridRanker {
            min_similarity,
            ..HybridRanker::default()
        }
    }

    fn ids(hits: &[RankedHit]) -> Vec<&str> {
        hits.iter().map(|h| h.item_id.as_str()).collect()
    }

    #[test]
    fn test_empty_inputs() {
        assert!(ranker(0.5).rank("anything at all here", &[], &[], 10).is_empty());
    }

    #[test]
    fn test_fused_score_weights() {
        let hits = ranker(0.0).rank(
            "long query with many tokens",
            &[sem("a", 0.8)],
            &[kw("a", 0.5)],
            10,
        );
        assert_eq!(hits.len(), 1);
        assert!((hits[0].fused_score - (0.7 * 0.8 + 0.3 * 0.5)).abs() < 1e-6);
        assert_eq!(hits[0].rank, 1);
    }

    #[test]
    fn test_items_in_both_lists_are_merged() {
        let hits = ranker(0.0).rank(
            "long query with many tokens",
            &[sem("a", 0.9), sem("b", 0.6), sem("a", 0.4)],
            &[kw("b", 1.0), kw("c", 0.5), kw("b", 0.2)],
            10,
        );

        assert_eq!(hits.len(), 3);
        let b = hits.iter().find(|h| h.item_id == "b").unwrap();
        assert_eq!(b.similarity, 0.6);
        assert_eq!(b.keyword_score, 1.0);

        let a = hits.iter().find(|h| h.item_id == "a").unwrap();
        assert_eq!(a.similarity, 0.9);
    }

    #[test]
    fn test_ordering_and_stable_ties() {
        let hits = ranker(0.0).rank(
            "long query with many tokens",
            &[sem("a", 0.5), sem("b", 0.9), sem("c", 0.5)],
            &[],
            10,
        );
        assert_eq!(ids(&hits), vec!["b", "a", "c"]);
        assert_eq!(hits.iter().map(|h| h.rank).collect::<Vec<_>>(), vec![1, 2, 3]);
    }

    #[test]
    fn test_threshold_filters() {
        let hits = ranker(0.5).rank(
            "long query with many tokens",
            &[sem("a", 0.9), sem("b", 0.6)],
            &[],
            10,
        );
        // b: 0.7 * 0.6 = 0.42 < 0.5
        assert_eq!(ids(&hits), vec!["a"]);
    }

    #[test]
    fn test_short_query_raises_threshold() {
        let r = ranker(0.5);
        assert_eq!(r.effective_threshold("diabetes"), 0.7);
        assert_eq!(r.effective_threshold("diabetes treatment"), 0.7);
        assert_eq!(r.effective_threshold("diabetes treatment options"), 0.5);

        let strict = ranker(0.9);
        assert_eq!(strict.effective_threshold("diabetes"), 0.9);

        // a: 0.7 * 0.95 + 0.3 = 0.965; b: 0.7 * 0.9 = 0.63 < 0.7
        let hits = r.rank("diabetes", &[sem("a", 0.95), sem("b", 0.9)], &[kw("a", 1.0)], 10);
        assert_eq!(ids(&hits), vec!["a"]);
    }

    #[test]
    fn test_non_empty_fallback_orders_by_similarity() {
        // keyword-only A (fused 0.3) and semantic-only B (fused 0.455) both
        // miss the threshold; B has the higher raw similarity
        let hits = ranker(0.5).rank(
            "diabetes treatment",
            &[sem("B", 0.65)],
            &[kw("A", 1.0)],
            10,
        );

        assert_eq!(ids(&hits), vec!["B", "A"]);
        assert!((hits[0].fused_score - 0.455).abs() < 1e-6);
        assert!((hits[1].fused_score - 0.3).abs() < 1e-6);
    }

    #[test]
    fn test_non_empty_fallback_respects_limit() {
        let hits = ranker(0.99).rank(
            "long query with many tokens",
            &[sem("a", 0.1), sem("b", 0.3), sem("c", 0.2)],
            &[],
            2,
        );
        assert_eq!(ids(&hits), vec!["b", "c"]);
    }

    #[test]
    fn test_limit_truncates() {
        let semantic: Vec<SemanticHit> = (0..20).map(|i| sem(&i.to_string(), 0.9)).collect();
        let hits = ranker(0.0).rank("long query with many tokens", &semantic, &[], 5);
        assert_eq!(hits.len(), 5);
        assert_eq!(ids(&hits), vec!["0", "1", "2", "3", "4"]);
    }

    #[test]
    fn test_out_of_range_scores_clamped() {
        let hits = ranker(0.0).rank(
            "long query with many tokens",
            &[sem("a", 1.7), sem("b", f32::NAN)],
            &[kw("b", -2.0)],
            10,
        );
        let a = hits.iter().find(|h| h.item_id == "a").unwrap();
        assert_eq!(a.similarity, 1.0);
        let b = hits.iter().find(|h| h.item_id == "b").unwrap();
        assert_eq!(b.similarity, 0.0);
        assert_eq!(b.keyword_score, 0.0);
    }
}
