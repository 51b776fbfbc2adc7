//! Text similarity between a query and catalog entry names.
//!
//! Every scorer shares the exact/containment rules in
//! [`exact_or_containment`]; they differ only in how the remaining pairs are
//! compared. [`FuzzyScorer`] takes the best of three edit-distance based
//! ratios, the semantic scorer in [`crate::processing::embedding`] uses
//! embedding cosine similarity.

use strsim::normalized_levenshtein;

/// Floor of the containment score.
const CONTAINMENT_BASE: f32 = 0.85;
/// Share of the score awarded in proportion to how much of the longer
/// string the shorter one covers.
const CONTAINMENT_SPAN: f32 = 0.15;

/// Scores two texts in `[0, 1]`.
pub trait SimilarityScorer: Send + Sync {
    fn score(&self, a: &str, b: &str) -> f32;

    /// Scores every candidate against `query`, best first. Equal scores keep
    /// their input order.
    fn rank_all<T>(&self, query: &str, candidates: Vec<T>) -> Vec<(T, f32)>
    where
        T: AsRef<str>,
        Self: Sized,
    {
        rank_with(|candidate| self.score(query, candidate), candidates)
    }
}

/// Ranking helper usable through trait objects.
pub fn rank_all<T: AsRef<str>>(
    scorer: &dyn SimilarityScorer,
    query: &str,
    candidates: Vec<T>,
) -> Vec<(T, f32)> {
    rank_with(|candidate| scorer.score(query, candidate), candidates)
}

fn rank_with<T, F>(score: F, candidates: Vec<T>) -> Vec<(T, f32)>
where
    T: AsRef<str>,
    F: Fn(&str) -> f32,
{
    let mut ranked: Vec<(T, f32)> = candidates
        .into_iter()
        .map(|candidate| {
            let value = score(candidate.as_ref());
            (candidate, value)
        })
        .collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
    ranked
}

/// Outcome of the rules shared by all scorers.
#[derive(Debug, PartialEq)]
pub enum Prescore {
    /// The pair is settled with this score.
    Settled(f32),
    /// Neither empty, exact nor containment.
    Undecided,
}

/// Applies the empty, exact and containment rules.
///
/// Containment scores `0.85 + 0.15 * shorter/longer`, so it never drops
/// below 0.85 and only an exact match reaches 1.0.
pub fn exact_or_containment(a: &str, b: &str) -> Prescore {
    let a = a.trim();
    let b = b.trim();
    if a.is_empty() || b.is_empty() {
        return Prescore::Settled(0.0);
    }

    let a_lower = a.to_lowercase();
    let b_lower = b.to_lowercase();
    if a_lower == b_lower {
        return Prescore::Settled(1.0);
    }

    let a_len = a_lower.chars().count() as f32;
    let b_len = b_lower.chars().count() as f32;
    if b_lower.contains(&a_lower) {
        return Prescore::Settled(CONTAINMENT_BASE + CONTAINMENT_SPAN * a_len / b_len);
    }
    if a_lower.contains(&b_lower) {
        return Prescore::Settled(CONTAINMENT_BASE + CONTAINMENT_SPAN * b_len / a_len);
    }

    Prescore::Undecided
}

/// Normalized edit similarity over characters.
pub fn ratio(a: &str, b: &str) -> f32 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    normalized_levenshtein(a, b) as f32
}

/// Best [`ratio`] of the shorter string against every same-length window of
/// the longer one.
pub fn partial_ratio(a: &str, b: &str) -> f32 {
    let (short, long) = if a.chars().count() <= b.chars().count() {
        (a, b)
    } else {
        (b, a)
    };
    let short_len = short.chars().count();
    if short_len == 0 {
        return if long.is_empty() { 1.0 } else { 0.0 };
    }

    let long_chars: Vec<char> = long.chars().collect();
    long_chars
        .windows(short_len)
        .map(|window| ratio(short, &window.iter().collect::<String>()))
        .fold(0.0, f32::max)
}

fn sorted_tokens(text: &str) -> Vec<&str> {
    let mut tokens: Vec<&str> = text.split_whitespace().collect();
    tokens.sort_unstable();
    tokens
}

/// [`ratio`] after sorting whitespace tokens, so word order does not matter.
pub fn token_sort_ratio(a: &str, b: &str) -> f32 {
    ratio(&sorted_tokens(a).join(" "), &sorted_tokens(b).join(" "))
}

/// Compares the shared token set against each side's full token set.
///
/// A side whose tokens are all shared scores 1.0.
pub fn token_set_ratio(a: &str, b: &str) -> f32 {
    let mut a_tokens = sorted_tokens(a);
    let mut b_tokens = sorted_tokens(b);
    a_tokens.dedup();
    b_tokens.dedup();
    if a_tokens.is_empty() || b_tokens.is_empty() {
        return 0.0;
    }

    let common: Vec<&str> = a_tokens
        .iter()
        .filter(|t| b_tokens.contains(t))
        .copied()
        .collect();
    let a_only: Vec<&str> = a_tokens
        .iter()
        .filter(|t| !common.contains(t))
        .copied()
        .collect();
    let b_only: Vec<&str> = b_tokens
        .iter()
        .filter(|t| !common.contains(t))
        .copied()
        .collect();

    if !common.is_empty() && (a_only.is_empty() || b_only.is_empty()) {
        return 1.0;
    }

    let joined = |parts: &[&str]| parts.join(" ");
    let shared = joined(&common);
    let with = |rest: &[&str]| {
        if shared.is_empty() {
            joined(rest)
        } else {
            format!("{shared} {}", joined(rest))
        }
    };
    let a_full = with(&a_only);
    let b_full = with(&b_only);

    let mut best = ratio(&a_full, &b_full);
    if !shared.is_empty() {
        best = best.max(ratio(&shared, &a_full)).max(ratio(&shared, &b_full));
    }
    best
}

/// Traditional scorer: best of partial, token-sort and token-set ratios.
#[derive(Clone, Copy, Debug, Default)]
pub struct FuzzyScorer;

impl FuzzyScorer {
    /// The fuzzy stage alone, without the exact/containment rules.
    pub fn fuzzy_stage(a: &str, b: &str) -> f32 {
        let a = a.trim().to_lowercase();
        let b = b.trim().to_lowercase();
        let (a, b) = (a.as_str(), b.as_str());
        let partial = partial_ratio(a, b);
        let token_sort = token_sort_ratio(a, b);
        let token_set = token_set_ratio(a, b);
        let best = partial.max(token_sort).max(token_set).clamp(0.0, 1.0);
        log::debug!(
            "Similarity '{a}' vs '{b}': partial={partial:.2}, token_sort={token_sort:.2}, token_set={token_set:.2}, max={best:.2}"
        );
        best
    }
}

impl SimilarityScorer for FuzzyScorer {
    fn score(&self, a: &str, b: &str) -> f32 {
        match exact_or_containment(a, b) {
            Prescore::Settled(score) => score,
            Prescore::Undecided => Self::fuzzy_stage(a, b),
        }
    }
}
