//! Near-duplicate detection for incoming facts.
//!
//! Decisions are made per new fact against its nearest stored neighbors of
//! the same agent and fact type. Pure logic; the caller fetches candidates
//! and applies the outcome.

use crate::memory::normalize_text;

/// A stored fact compared against an incoming one.
#[derive(Debug, Clone)]
pub struct DedupCandidate {
    pub id: String,
    pub text: String,
    pub created_at: String,
    /// Cosine similarity to the incoming fact, in `[-1, 1]`.
    pub similarity: f64,
}

/// What to do with an incoming fact.
#[derive(Debug, Clone, PartialEq)]
pub enum DedupDecision {
    /// Insert the fact. `related` holds `(fact_id, similarity)` pairs in the
    /// related band, to become semantic links.
    Keep { related: Vec<(String, f64)> },
    /// Drop the fact and refresh `updated_at` on the named one.
    MergeInto { fact_id: String },
    /// Drop the fact entirely; its text already exists verbatim.
    Discard { duplicate_of: String },
}

/// Decide the fate of an incoming fact given its nearest neighbors.
///
/// Candidates at or above `dedup_threshold` are duplicates: if one has
/// identical normalized text the fact is discarded, otherwise it merges into
/// the most recently created match. Candidates in
/// `[related_threshold, dedup_threshold)` are kept as semantic link partners.
pub fn decide(
    new_text: &str,
    candidates: &[DedupCandidate],
    dedup_threshold: f64,
    related_threshold: f64,
) -> DedupDecision {
    let duplicates: Vec<&DedupCandidate> = candidates
        .iter()
        .filter(|c| c.similarity >= dedup_threshold)
        .collect();

    if !duplicates.is_empty() {
        let normalized = normalize_text(new_text);
        if let Some(exact) = duplicates
            .iter()
            .find(|c| normalize_text(&c.text) == normalized)
        {
            return DedupDecision::Discard {
                duplicate_of: exact.id.clone(),
            };
        }
        // Merge into the newest duplicate so the refreshed timestamp lands on
        // the fact most likely to stay current.
        let target = duplicates
            .iter()
            .max_by(|a, b| a.created_at.cmp(&b.created_at))
            .map(|c| c.id.clone());
        if let Some(fact_id) = target {
            return DedupDecision::MergeInto { fact_id };
        }
    }

    let mut related: Vec<(String, f64)> = candidates
        .iter()
        .filter(|c| c.similarity >= related_threshold && c.similarity < dedup_threshold)
        .map(|c| (c.id.clone(), c.similarity))
        .collect();
    related.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

    DedupDecision::Keep { related }
}
