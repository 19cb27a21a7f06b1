//! String-similarity metrics for matching external rankings to owned albums.
//!
//! All metrics score two already-normalized strings on a 0–100 scale. They
//! are deliberately complementary: plain edit distance for typos, token-sort
//! for reordered credits ("Davis, Miles" vs "Miles Davis"), partial for
//! strings contained in longer credit lists, and token-set for titles that
//! gained a suffix ("Mercy, Mercy, Mercy" vs "... - Live At The Club").

use std::collections::BTreeSet;

use strsim::normalized_levenshtein;

/// A similarity score in `[0, 100]` for two normalized strings.
///
/// Metrics are pluggable so the reconciliation control flow never cares
/// which heuristics are in play.
pub trait SimilarityMetric: Sync {
    fn score(&self, a: &str, b: &str) -> f64;
}

/// Plain edit-distance similarity.
pub struct EditDistance;

/// Edit-distance similarity after sorting tokens, so word order is ignored.
pub struct TokenSort;

/// Best edit-distance similarity of the shorter string against every
/// equal-length window of the longer one.
pub struct Partial;

/// Token-set similarity: scores the shared-token core against each side's
/// remainder, so a subset match scores high.
pub struct TokenSet;

impl SimilarityMetric for EditDistance {
    fn score(&self, a: &str, b: &str) -> f64 {
        normalized_levenshtein(a, b) * 100.0
    }
}

impl SimilarityMetric for TokenSort {
    fn score(&self, a: &str, b: &str) -> f64 {
        EditDistance.score(&sort_tokens(a), &sort_tokens(b))
    }
}

impl SimilarityMetric for Partial {
    fn score(&self, a: &str, b: &str) -> f64 {
        let a_chars: Vec<char> = a.chars().collect();
        let b_chars: Vec<char> = b.chars().collect();
        let (short, long) = if a_chars.len() <= b_chars.len() {
            (a_chars, b_chars)
        } else {
            (b_chars, a_chars)
        };

        if short.is_empty() {
            return if long.is_empty() { 100.0 } else { 0.0 };
        }

        let needle: String = short.iter().collect();
        let mut best = 0.0_f64;
        for window in long.windows(short.len()) {
            let haystack: String = window.iter().collect();
            best = best.max(EditDistance.score(&needle, &haystack));
            if best >= 100.0 {
                break;
            }
        }
        best
    }
}

impl SimilarityMetric for TokenSet {
    fn score(&self, a: &str, b: &str) -> f64 {
        let tokens_a: BTreeSet<&str> = a.split_whitespace().collect();
        let tokens_b: BTreeSet<&str> = b.split_whitespace().collect();

        let shared: Vec<&str> = tokens_a.intersection(&tokens_b).copied().collect();
        let only_a: Vec<&str> = tokens_a.difference(&tokens_b).copied().collect();
        let only_b: Vec<&str> = tokens_b.difference(&tokens_a).copied().collect();

        let core = shared.join(" ");
        let with_a = join_parts(&core, &only_a);
        let with_b = join_parts(&core, &only_b);

        EditDistance
            .score(&core, &with_a)
            .max(EditDistance.score(&core, &with_b))
            .max(EditDistance.score(&with_a, &with_b))
    }
}

fn sort_tokens(s: &str) -> String {
    let mut tokens: Vec<&str> = s.split_whitespace().collect();
    tokens.sort_unstable();
    tokens.join(" ")
}

fn join_parts(core: &str, rest: &[&str]) -> String {
    if rest.is_empty() {
        core.to_string()
    } else if core.is_empty() {
        rest.join(" ")
    } else {
        format!("{core} {}", rest.join(" "))
    }
}

/// Metrics applicable to artist credits.
pub fn artist_metrics() -> &'static [&'static dyn SimilarityMetric] {
    static METRICS: [&dyn SimilarityMetric; 3] = [&EditDistance, &TokenSort, &Partial];
    &METRICS
}

/// Metrics applicable to album titles.
pub fn title_metrics() -> &'static [&'static dyn SimilarityMetric] {
    static METRICS: [&dyn SimilarityMetric; 3] = [&EditDistance, &TokenSort, &TokenSet];
    &METRICS
}

/// Best score across a set of metrics.
#[must_use]
pub fn best_score(a: &str, b: &str, metrics: &[&dyn SimilarityMetric]) -> f64 {
    metrics
        .iter()
        .map(|m| m.score(a, b))
        .fold(0.0_f64, f64::max)
}

/// Normalize free text for matching: lowercase, strip a leading "the " and a
/// trailing ", the", drop trailing " (2)"-style disambiguators, remove
/// punctuation, collapse whitespace.
#[must_use]
pub fn normalize(text: &str) -> String {
    let mut s = text.to_lowercase().trim().to_string();

    if let Some(rest) = s.strip_prefix("the ") {
        s = rest.trim_start().to_string();
    }
    if let Some(pos) = s.rfind(',') {
        if s[pos + 1..].trim() == "the" {
            s.truncate(pos);
        }
    }
    s = strip_numeric_suffix(&s);

    let cleaned: String = s
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace() || *c == '_')
        .collect();

    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Drop a trailing parenthesized number, the style Discogs uses to
/// disambiguate same-named artists ("Nirvana (2)").
fn strip_numeric_suffix(s: &str) -> String {
    let trimmed = s.trim_end();
    if let Some(without_close) = trimmed.strip_suffix(')') {
        if let Some(open) = without_close.rfind('(') {
            let inner = &without_close[open + 1..];
            if !inner.is_empty() && inner.chars().all(|c| c.is_ascii_digit()) {
                return without_close[..open].trim_end().to_string();
            }
        }
    }
    trimmed.to_string()
}
