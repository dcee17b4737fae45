//! Reordering of activated facts before the token budget is applied.
//!
//! The heuristic mode trades activation against recency without any model
//! call; the cross-encoder mode delegates to a [`PairScorer`]. Both keep a
//! strict total order by breaking score ties on the incoming rank.

use std::str::FromStr;

use chrono::{DateTime, Utc};

use crate::error::{MemoryError, Result};
use crate::memory::parse_flexible_date;
use crate::memory::retrieve::ActivatedFact;
use crate::model::PairScorer;

/// How recall candidates are reordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RerankMode {
    /// Activation x recency boost; no model call.
    Heuristic,
    /// Pairwise relevance scores from a [`PairScorer`].
    CrossEncoder,
}

impl FromStr for RerankMode {
    type Err = MemoryError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "heuristic" => Ok(Self::Heuristic),
            "cross_encoder" => Ok(Self::CrossEncoder),
            other => Err(MemoryError::Config(format!(
                "unknown reranker '{other}' (expected 'heuristic' or 'cross_encoder')"
            ))),
        }
    }
}

/// Multiplier in `[0.5, 1.0]`: 1.0 at the reference date, 0.75 one half-life
/// out, approaching 0.5 for ancient facts. Future dates count as age zero.
fn recency_boost(age_days: f64, half_life_days: f64) -> f64 {
    let age = age_days.max(0.0);
    if half_life_days <= 0.0 {
        return 1.0;
    }
    0.5 + 0.5 * (-age / half_life_days).exp2()
}

fn fact_age_days(item: &ActivatedFact, reference: DateTime<Utc>) -> f64 {
    let date = item
        .fact
        .event_date
        .as_deref()
        .and_then(parse_flexible_date)
        .or_else(|| parse_flexible_date(&item.fact.created_at));
    match date {
        Some(d) => (reference - d).num_seconds() as f64 / 86_400.0,
        None => 0.0,
    }
}

fn sort_scored(mut scored: Vec<(usize, f64, ActivatedFact)>) -> Vec<ActivatedFact> {
    scored.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
    scored.into_iter().map(|(_, _, item)| item).collect()
}

/// Reorder by `activation x recency_boost`.
pub fn rerank_heuristic(
    items: Vec<ActivatedFact>,
    reference: DateTime<Utc>,
    half_life_days: f64,
) -> Vec<ActivatedFact> {
    let scored = items
        .into_iter()
        .enumerate()
        .map(|(i, item)| {
            let boost = recency_boost(fact_age_days(&item, reference), half_life_days);
            (i, item.activation * boost, item)
        })
        .collect();
    sort_scored(scored)
}

/// Reorder by pairwise query relevance from the scorer.
pub fn rerank_cross_encoder(
    items: Vec<ActivatedFact>,
    query: &str,
    scorer: &dyn PairScorer,
) -> Result<Vec<ActivatedFact>> {
    if items.is_empty() {
        return Ok(items);
    }
    let texts: Vec<&str> = items.iter().map(|i| i.fact.text.as_str()).collect();
    let scores = scorer.score_pairs(query, &texts)?;
    if scores.len() != items.len() {
        return Err(MemoryError::Internal(format!(
            "pair scorer returned {} scores for {} texts",
            scores.len(),
            items.len()
        )));
    }
    let scored = items
        .into_iter()
        .zip(scores)
        .enumerate()
        .map(|(i, (item, score))| (i, score as f64, item))
        .collect();
    Ok(sort_scored(scored))
}
