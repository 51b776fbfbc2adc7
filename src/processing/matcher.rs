//! Picks the single best candidate for a query.

use crate::processing::similarity::SimilarityScorer;

/// Accepted candidate with the score that earned it.
#[derive(Clone, Debug, PartialEq)]
pub struct Match<T> {
    pub candidate: T,
    pub score: f32,
}

/// Returns the highest scoring candidate, or `None` when there are no
/// candidates or the best one scores below `min_score`.
///
/// Ties keep the first candidate seen.
pub fn select_best<T>(
    scorer: &dyn SimilarityScorer,
    query: &str,
    candidates: &[T],
    min_score: f32,
) -> Option<Match<T>>
where
    T: AsRef<str> + Clone,
{
    let mut best: Option<(&T, f32)> = None;
    for candidate in candidates {
        let score = scorer.score(query, candidate.as_ref());
        if best.is_none_or(|(_, best_score)| score > best_score) {
            best = Some((candidate, score));
        }
    }

    let (candidate, score) = best?;
    if score < min_score {
        log::debug!(
            "Best candidate '{}' for '{query}' scored {score:.2}, below {min_score:.2}",
            candidate.as_ref()
        );
        return None;
    }
    Some(Match {
        candidate: candidate.clone(),
        score,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processing::similarity::FuzzyScorer;

    struct FixedScorer(f32);

    impl SimilarityScorer for FixedScorer {
        fn score(&self, _a: &str, _b: &str) -> f32 {
            self.0
        }
    }

    #[test]
    fn picks_fresh_apple_for_apple() {
        let candidates = ["鲜苹果", "香蕉", "苹果汁"];
        let best = select_best(&FuzzyScorer, "苹果", &candidates, 0.5).expect("a match");

        assert_eq!(best.candidate, "鲜苹果");
        assert!(best.score >= 0.85);
    }

    #[test]
    fn empty_candidates_yield_none() {
        let candidates: [&str; 0] = [];
        assert_eq!(select_best(&FuzzyScorer, "苹果", &candidates, 0.0), None);
    }

    #[test]
    fn below_threshold_is_discarded() {
        let candidates = ["香蕉", "梨子"];
        assert_eq!(select_best(&FixedScorer(0.49), "苹果", &candidates, 0.5), None);
    }

    #[test]
    fn ties_keep_first_seen() {
        let candidates = ["first", "second"];
        let best = select_best(&FixedScorer(0.7), "q", &candidates, 0.5).expect("a match");

        assert_eq!(best.candidate, "first");
    }
}
