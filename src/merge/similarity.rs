use crate::batch::{Quote, Topic};
use std::collections::HashSet;

pub const TOPIC_DUPLICATE_THRESHOLD: f64 = 0.6;
pub const QUOTE_DUPLICATE_THRESHOLD: f64 = 0.7;

/// Jaccard similarity of the two strings' character sets.
///
/// Character sets rather than tokens: works the same for CJK text with no word
/// boundaries. An empty string is similar to nothing.
pub fn char_overlap_similarity(a: &str, b: &str) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }

    let set_a: HashSet<char> = a.chars().collect();
    let set_b: HashSet<char> = b.chars().collect();
    let intersection = set_a.intersection(&set_b).count();
    let union = set_a.union(&set_b).count();

    intersection as f64 / union as f64
}

pub fn is_duplicate_text<'a, I>(candidate: &str, accepted: I, threshold: f64) -> bool
where
    I: IntoIterator<Item = &'a str>,
{
    accepted
        .into_iter()
        .any(|existing| char_overlap_similarity(candidate, existing) >= threshold)
}

pub fn is_duplicate_topic(candidate: &Topic, accepted: &[Topic]) -> bool {
    is_duplicate_text(
        &candidate.name,
        accepted.iter().map(|t| t.name.as_str()),
        TOPIC_DUPLICATE_THRESHOLD,
    )
}

pub fn is_duplicate_quote(candidate: &Quote, accepted: &[Quote]) -> bool {
    is_duplicate_text(
        &candidate.content,
        accepted.iter().map(|q| q.content.as_str()),
        QUOTE_DUPLICATE_THRESHOLD,
    )
}
