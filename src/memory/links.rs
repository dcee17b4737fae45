//! Link drafting between facts.
//!
//! Three edge kinds connect facts of one agent: `temporal` (event dates close
//! in time), `semantic` (embedding similarity in the related band), and
//! `entity` (shared named entities). Drafts are pure values; persistence and
//! candidate selection happen in the ingestion layer.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};

use crate::memory::types::LinkKind;

/// Floor for link weights so an edge at the window boundary stays traversable.
pub const MIN_LINK_WEIGHT: f64 = 0.01;

/// The slice of a fact that link drafting looks at.
#[derive(Debug, Clone)]
pub struct FactNode {
    pub id: String,
    pub event_date: Option<DateTime<Utc>>,
    /// Normalized (lowercased, trimmed) entity names.
    pub entities: BTreeSet<String>,
}

impl FactNode {
    pub fn new(
        id: impl Into<String>,
        event_date: Option<DateTime<Utc>>,
        entity_names: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            id: id.into(),
            event_date,
            entities: entity_names
                .into_iter()
                .map(|n| n.trim().to_lowercase())
                .filter(|n| !n.is_empty())
                .collect(),
        }
    }
}

/// An edge waiting to be written.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkDraft {
    /// Canonically ordered: `src_id < dst_id`.
    pub src_id: String,
    pub dst_id: String,
    pub kind: LinkKind,
    pub weight: f64,
}

/// Order a pair of fact ids canonically.
pub fn canonical_pair(a: &str, b: &str) -> (String, String) {
    if a <= b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}

/// Weight for a temporal edge: linear falloff over the window, floored at
/// [`MIN_LINK_WEIGHT`]. `None` when the gap exceeds the window.
pub fn temporal_weight(
    a: DateTime<Utc>,
    b: DateTime<Utc>,
    window_days: i64,
) -> Option<f64> {
    if window_days <= 0 {
        return None;
    }
    let gap_secs = (a - b).num_seconds().unsigned_abs() as f64;
    let window_secs = (window_days * 86_400) as f64;
    if gap_secs > window_secs {
        return None;
    }
    Some((1.0 - gap_secs / window_secs).max(MIN_LINK_WEIGHT))
}

/// Weight for an entity edge: Jaccard overlap of normalized entity names.
/// `None` when the sets do not intersect.
pub fn entity_weight(a: &BTreeSet<String>, b: &BTreeSet<String>) -> Option<f64> {
    if a.is_empty() || b.is_empty() {
        return None;
    }
    let shared = a.intersection(b).count();
    if shared == 0 {
        return None;
    }
    let union = a.union(b).count();
    Some(shared as f64 / union as f64)
}

/// Draft all links for a batch of newly inserted facts.
///
/// Temporal and entity edges are drafted between each new fact and every
/// candidate partner (stored neighbors plus the other new facts in the
/// batch). Semantic edges come in as precomputed `(new_id, partner_id,
/// similarity)` triples from dedup. Duplicate `(src, dst, kind)` drafts
/// collapse to the highest weight.
pub fn build_links(
    new_nodes: &[FactNode],
    existing_nodes: &[FactNode],
    semantic_pairs: &[(String, String, f64)],
    window_days: i64,
) -> Vec<LinkDraft> {
    let mut drafts: HashMap<(String, String, LinkKind), f64> = HashMap::new();
    let mut add = |a: &str, b: &str, kind: LinkKind, weight: f64| {
        if a == b {
            return;
        }
        let (src, dst) = canonical_pair(a, b);
        let entry = drafts.entry((src, dst, kind)).or_insert(0.0);
        if weight > *entry {
            *entry = weight;
        }
    };

    for (i, node) in new_nodes.iter().enumerate() {
        // Later batch members only, so each in-batch pair is visited once.
        let partners = new_nodes[i + 1..].iter().chain(existing_nodes.iter());
        for partner in partners {
            if let (Some(a), Some(b)) = (node.event_date, partner.event_date) {
                if let Some(w) = temporal_weight(a, b, window_days) {
                    add(&node.id, &partner.id, LinkKind::Temporal, w);
                }
            }
            if let Some(w) = entity_weight(&node.entities, &partner.entities) {
                add(&node.id, &partner.id, LinkKind::Entity, w);
            }
        }
    }

    for (new_id, partner_id, similarity) in semantic_pairs {
        add(
            new_id,
            partner_id,
            LinkKind::Semantic,
            similarity.clamp(MIN_LINK_WEIGHT, 1.0),
        );
    }

    let mut out: Vec<LinkDraft> = drafts
        .into_iter()
        .map(|((src_id, dst_id, kind), weight)| LinkDraft {
            src_id,
            dst_id,
            kind,
            weight,
        })
        .collect();
    out.sort_by(|a, b| {
        (&a.src_id, &a.dst_id, a.kind.as_str()).cmp(&(&b.src_id, &b.dst_id, b.kind.as_str()))
    });
    out
}
