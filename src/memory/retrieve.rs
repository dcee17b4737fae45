//! Recall: KNN seeding plus spreading activation over the link graph.
//!
//! A query embedding seeds the K nearest facts with their cosine similarity
//! as activation. Activation then spreads along links for a bounded number of
//! hops, each neighbor gaining `source_gain x link_weight x decay`. The link
//! graph lets facts with weak direct similarity surface through strongly
//! related neighbors; with no links the ordering degrades to pure cosine.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use rusqlite::{params_from_iter, Connection};
use tokio::task;

use crate::config::RetrievalConfig;
use crate::db::Pool;
use crate::error::Result;
use crate::memory::types::{
    Fact, FactType, RecallRequest, RecallResponse, RecallResult, RecallTrace,
};
use crate::memory::{embedding_to_bytes, estimate_tokens, facts, l2_to_cosine, query, rerank};
use crate::model::{EmbeddingBackend, PairScorer};

/// Seed pool bounds for the KNN stage.
pub const MIN_SEEDS: usize = 8;
pub const MAX_SEEDS: usize = 256;
/// Hard ceiling on propagation hops.
pub const MAX_HOPS: usize = 5;

/// Number of KNN seeds for a thinking budget.
pub fn seed_count(thinking_budget: u32) -> usize {
    (thinking_budget as usize).clamp(MIN_SEEDS, MAX_SEEDS)
}

/// Number of propagation hops for a thinking budget.
pub fn hop_budget(thinking_budget: u32) -> usize {
    ((thinking_budget / 25) as usize).clamp(1, MAX_HOPS)
}

/// Propagation tuning, taken from [`RetrievalConfig`].
#[derive(Debug, Clone, Copy)]
pub struct SpreadParams {
    pub decay_per_hop: f64,
    pub activation_floor: f64,
    pub convergence_epsilon: f64,
}

impl Default for SpreadParams {
    fn default() -> Self {
        Self {
            decay_per_hop: 0.5,
            activation_floor: 0.02,
            convergence_epsilon: 1e-4,
        }
    }
}

impl From<&RetrievalConfig> for SpreadParams {
    fn from(cfg: &RetrievalConfig) -> Self {
        Self {
            decay_per_hop: cfg.decay_per_hop,
            activation_floor: cfg.activation_floor,
            convergence_epsilon: cfg.convergence_epsilon,
        }
    }
}

/// A fact with the activation it accumulated during the spread.
#[derive(Debug, Clone)]
pub struct ActivatedFact {
    pub fact: Fact,
    pub activation: f64,
}

/// Counters describing one spread, for traces.
#[derive(Debug, Clone, Copy, Default)]
pub struct SpreadStats {
    pub seed_count: usize,
    /// Facts holding any activation when the spread settled.
    pub pooled: usize,
    pub hops: usize,
}

/// Run seeded spreading activation for one query embedding.
///
/// `fact_types` restricts seeds and returned facts; propagation itself runs
/// over the whole graph, so an excluded fact can still conduct activation.
/// Each fact fires at most once per call, so activation cannot echo back and
/// forth across one edge. Results come back in a strict total order:
/// activation desc, event date desc (dateless last), created_at desc, id asc.
pub fn retrieve(
    conn: &Connection,
    agent_id: &str,
    query_embedding: &[f32],
    fact_types: &[FactType],
    thinking_budget: u32,
    spread: SpreadParams,
) -> Result<(Vec<ActivatedFact>, SpreadStats)> {
    let k = seed_count(thinking_budget);
    // Over-fetch so agent and type filtering still leaves k seeds.
    let neighbors = knn(conn, query_embedding, k * 4)?;

    let ids: Vec<String> = neighbors.iter().map(|(id, _)| id.clone()).collect();
    let mut by_id: HashMap<String, Fact> = facts::fetch_facts_by_ids(conn, &ids)?
        .into_iter()
        .map(|f| (f.id.clone(), f))
        .collect();

    let type_allowed = |ft: FactType| fact_types.is_empty() || fact_types.contains(&ft);
    let mut seeds: Vec<(String, f64)> = Vec::with_capacity(k);
    for (id, distance) in &neighbors {
        if seeds.len() >= k {
            break;
        }
        let Some(fact) = by_id.get(id) else { continue };
        if fact.agent_id != agent_id || !type_allowed(fact.fact_type) {
            continue;
        }
        let activation = l2_to_cosine(*distance).max(0.0);
        if activation > 0.0 {
            seeds.push((id.clone(), activation));
        }
    }

    let mut stats = SpreadStats {
        seed_count: seeds.len(),
        ..Default::default()
    };

    let mut activation: HashMap<String, f64> = seeds.iter().cloned().collect();
    // Each fact fires at most once; later gains still add to its activation
    // but never put it back on the frontier.
    let mut fired: HashSet<String> = activation.keys().cloned().collect();
    let mut frontier: Vec<(String, f64)> = seeds
        .into_iter()
        .filter(|(_, a)| *a >= spread.activation_floor)
        .collect();

    for _ in 0..hop_budget(thinking_budget) {
        if frontier.is_empty() {
            break;
        }
        let frontier_ids: Vec<String> = frontier.iter().map(|(id, _)| id.clone()).collect();
        let adjacency = fetch_adjacency(conn, agent_id, &frontier_ids)?;

        let mut gains: HashMap<String, f64> = HashMap::new();
        for (id, gain) in &frontier {
            let Some(neighbors) = adjacency.get(id) else { continue };
            for (neighbor, weight) in neighbors {
                *gains.entry(neighbor.clone()).or_insert(0.0) +=
                    gain * weight * spread.decay_per_hop;
            }
        }
        if gains.is_empty() {
            break;
        }
        stats.hops += 1;

        let max_gain = gains.values().cloned().fold(0.0f64, f64::max);
        frontier = gains
            .iter()
            .filter(|(id, g)| **g >= spread.activation_floor && !fired.contains(*id))
            .map(|(id, g)| (id.clone(), *g))
            .collect();
        for (id, _) in &frontier {
            fired.insert(id.clone());
        }
        for (id, gain) in gains {
            *activation.entry(id).or_insert(0.0) += gain;
        }
        if max_gain < spread.convergence_epsilon {
            break;
        }
    }

    stats.pooled = activation.len();

    // Pull in facts first reached through links.
    let missing: Vec<String> = activation
        .keys()
        .filter(|id| !by_id.contains_key(*id))
        .cloned()
        .collect();
    for fact in facts::fetch_facts_by_ids(conn, &missing)? {
        by_id.insert(fact.id.clone(), fact);
    }

    let mut out: Vec<ActivatedFact> = activation
        .into_iter()
        .filter_map(|(id, activation)| {
            let fact = by_id.remove(&id)?;
            (fact.agent_id == agent_id && type_allowed(fact.fact_type))
                .then_some(ActivatedFact { fact, activation })
        })
        .collect();
    sort_activated(&mut out);

    Ok((out, stats))
}

/// KNN over the vector table: `(fact_id, l2_distance)` nearest-first.
fn knn(conn: &Connection, embedding: &[f32], k: usize) -> Result<Vec<(String, f64)>> {
    let mut stmt = conn.prepare(
        "SELECT fact_id, distance FROM facts_vec WHERE embedding MATCH ?1 \
         ORDER BY distance LIMIT ?2",
    )?;
    let rows = stmt
        .query_map(
            rusqlite::params![embedding_to_bytes(embedding), k as i64],
            |row| Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?)),
        )?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Undirected adjacency for the given fact ids, batched to keep the
/// parameter count within SQLite's limit.
fn fetch_adjacency(
    conn: &Connection,
    agent_id: &str,
    ids: &[String],
) -> Result<HashMap<String, Vec<(String, f64)>>> {
    let mut adjacency: HashMap<String, Vec<(String, f64)>> = HashMap::new();
    for chunk in ids.chunks(400) {
        let placeholders = (2..2 + chunk.len())
            .map(|i| format!("?{i}"))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT src_id, dst_id, weight FROM links \
             WHERE agent_id = ?1 AND (src_id IN ({placeholders}) OR dst_id IN ({placeholders}))"
        );
        let mut stmt = conn.prepare(&sql)?;
        let params = std::iter::once(agent_id.to_string()).chain(chunk.iter().cloned());
        let rows = stmt.query_map(params_from_iter(params), |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, f64>(2)?,
            ))
        })?;
        for row in rows {
            let (src, dst, weight) = row?;
            adjacency
                .entry(src.clone())
                .or_default()
                .push((dst.clone(), weight));
            adjacency.entry(dst).or_default().push((src, weight));
        }
    }
    Ok(adjacency)
}

/// Strict total order over activated facts.
pub fn sort_activated(items: &mut [ActivatedFact]) {
    items.sort_by(|a, b| {
        b.activation
            .partial_cmp(&a.activation)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| match (&a.fact.event_date, &b.fact.event_date) {
                (Some(x), Some(y)) => y.cmp(x),
                (Some(_), None) => std::cmp::Ordering::Less,
                (None, Some(_)) => std::cmp::Ordering::Greater,
                (None, None) => std::cmp::Ordering::Equal,
            })
            .then_with(|| b.fact.created_at.cmp(&a.fact.created_at))
            .then_with(|| a.fact.id.cmp(&b.fact.id))
    });
}

/// Async recall service: embeds the query, runs the spread on a pooled
/// connection, reranks, and applies the token budget.
pub struct Retriever {
    pool: Pool,
    embedder: Arc<dyn EmbeddingBackend>,
    scorer: Option<Arc<dyn PairScorer>>,
    cfg: RetrievalConfig,
}

impl Retriever {
    pub fn new(
        pool: Pool,
        embedder: Arc<dyn EmbeddingBackend>,
        scorer: Option<Arc<dyn PairScorer>>,
        cfg: RetrievalConfig,
    ) -> Self {
        Self {
            pool,
            embedder,
            scorer,
            cfg,
        }
    }

    pub async fn recall(&self, agent_id: &str, req: RecallRequest) -> Result<RecallResponse> {
        let started = Instant::now();
        let analysis = query::analyze(&req.query, req.question_date, chrono::Utc::now());
        let thinking_budget = req.thinking_budget.unwrap_or(self.cfg.default_thinking_budget);
        let max_tokens = req.max_tokens.unwrap_or(self.cfg.default_max_tokens);
        let mode = req
            .reranker
            .as_deref()
            .unwrap_or(&self.cfg.default_reranker)
            .parse::<rerank::RerankMode>()?;

        let embedder = self.embedder.clone();
        let query_text = req.query.clone();
        let embedding = task::spawn_blocking(move || embedder.embed(&query_text)).await??;

        let conn = self.pool.acquire().await?;
        let agent = agent_id.to_string();
        let fact_types = req.fact_types.clone();
        let spread = SpreadParams::from(&self.cfg);
        let (activated, stats) = task::spawn_blocking(move || {
            retrieve(&conn, &agent, &embedding, &fact_types, thinking_budget, spread)
        })
        .await??;

        let ranked = self
            .rerank(&req.query, activated, mode, analysis.reference_date)
            .await?;
        let total_matched = ranked.len();

        let mut results = Vec::new();
        let mut token_estimate = 0usize;
        for item in ranked {
            let tokens = estimate_tokens(&item.fact.text);
            if token_estimate + tokens > max_tokens {
                break;
            }
            token_estimate += tokens;
            results.push(RecallResult {
                id: item.fact.id,
                text: item.fact.text,
                fact_type: item.fact.fact_type,
                activation: item.activation,
                context: item.fact.context,
                event_date: item.fact.event_date,
            });
        }

        let trace = req.trace.then(|| RecallTrace {
            query: req.query,
            seed_count: stats.seed_count,
            pooled: stats.pooled,
            hops: stats.hops,
            result_count: results.len(),
            elapsed_ms: started.elapsed().as_millis() as u64,
        });
        if let Some(t) = &trace {
            tracing::debug!(
                seeds = t.seed_count,
                pooled = t.pooled,
                hops = t.hops,
                results = t.result_count,
                elapsed_ms = t.elapsed_ms,
                "recall finished"
            );
        }

        Ok(RecallResponse {
            results,
            total_matched,
            token_estimate,
            trace,
        })
    }

    /// Spread-and-rank only, for callers that assemble their own context.
    pub async fn activated(
        &self,
        agent_id: &str,
        query_text: &str,
        fact_types: Vec<FactType>,
        thinking_budget: u32,
    ) -> Result<Vec<ActivatedFact>> {
        let embedder = self.embedder.clone();
        let text = query_text.to_string();
        let embedding = task::spawn_blocking(move || embedder.embed(&text)).await??;

        let conn = self.pool.acquire().await?;
        let agent = agent_id.to_string();
        let spread = SpreadParams::from(&self.cfg);
        let (activated, _) = task::spawn_blocking(move || {
            retrieve(&conn, &agent, &embedding, &fact_types, thinking_budget, spread)
        })
        .await??;
        Ok(activated)
    }

    async fn rerank(
        &self,
        query_text: &str,
        items: Vec<ActivatedFact>,
        mode: rerank::RerankMode,
        reference_date: chrono::DateTime<chrono::Utc>,
    ) -> Result<Vec<ActivatedFact>> {
        match mode {
            rerank::RerankMode::Heuristic => Ok(rerank::rerank_heuristic(
                items,
                reference_date,
                self.cfg.recency_half_life_days,
            )),
            rerank::RerankMode::CrossEncoder => {
                let Some(scorer) = self.scorer.clone() else {
                    tracing::warn!("no pair scorer configured, falling back to heuristic rerank");
                    return Ok(rerank::rerank_heuristic(
                        items,
                        reference_date,
                        self.cfg.recency_half_life_days,
                    ));
                };
                let query_text = query_text.to_string();
                task::spawn_blocking(move || rerank::rerank_cross_encoder(items, &query_text, scorer.as_ref()))
                    .await?
            }
        }
    }
}
