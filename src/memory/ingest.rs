//! The ingestion pipeline: extract, embed, dedup, persist, link.
//!
//! Extraction and embedding failures are per-item: the failing item is
//! retried once, then counted in `items_failed` while the rest of the batch
//! proceeds. Loose items commit per item; a document upsert commits the whole
//! replace in one transaction, serialized per (agent, document) so concurrent
//! upserts of the same document cannot interleave.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rusqlite::{params, params_from_iter, Connection, Transaction};
use tokio::sync::Mutex;
use tokio::task;

use crate::config::IngestionConfig;
use crate::db::Pool;
use crate::error::{MemoryError, Result};
use crate::memory::dedup::{self, DedupCandidate, DedupDecision};
use crate::memory::extract::{self, ExtractedFact};
use crate::memory::links::{self, FactNode};
use crate::memory::types::{EntityRef, FactType, IngestItem, IngestReport};
use crate::memory::{
    content_hash, embedding_to_bytes, facts, l2_to_cosine, parse_flexible_date,
};
use crate::model::{ChatBackend, EmbeddingBackend};

const RETRY_BACKOFF: Duration = Duration::from_millis(100);
/// Same-type neighbors considered per incoming fact.
const DEDUP_POOL: usize = 20;
/// Dated facts scanned for temporal link partners.
const TEMPORAL_SCAN_LIMIT: usize = 1000;

/// A fact ready for persistence: extracted, attributed, embedded.
#[derive(Debug, Clone)]
struct PendingFact {
    text: String,
    fact_type: FactType,
    event_date: Option<String>,
    entities: Vec<EntityRef>,
    context: Option<String>,
    embedding: Vec<f32>,
}

/// Async ingestion service over the shared pool and model backends.
pub struct Ingestor {
    pool: Pool,
    chat: Arc<dyn ChatBackend>,
    embedder: Arc<dyn EmbeddingBackend>,
    cfg: IngestionConfig,
    doc_locks: Mutex<HashMap<(String, String), Arc<Mutex<()>>>>,
}

impl Ingestor {
    pub fn new(
        pool: Pool,
        chat: Arc<dyn ChatBackend>,
        embedder: Arc<dyn EmbeddingBackend>,
        cfg: IngestionConfig,
    ) -> Self {
        Self {
            pool,
            chat,
            embedder,
            cfg,
            doc_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Ingest a batch of items for an agent.
    ///
    /// With a `document_id` the batch becomes an atomic document replace;
    /// without one each item commits independently.
    pub async fn ingest(
        &self,
        agent_id: &str,
        items: Vec<IngestItem>,
        document_id: Option<String>,
    ) -> Result<IngestReport> {
        let mut report = IngestReport {
            items_count: items.len() as u32,
            document_id: document_id.clone(),
            ..Default::default()
        };

        let mut prepared: Vec<Vec<PendingFact>> = Vec::with_capacity(items.len());
        for item in &items {
            match self.prepare_item(item).await {
                Ok(pending) => prepared.push(pending),
                Err(e) => {
                    tracing::warn!(agent = agent_id, "skipping item: {e}");
                    report.items_failed += 1;
                }
            }
        }

        match document_id {
            Some(doc_id) => {
                let original_text = items
                    .iter()
                    .map(|i| i.content.as_str())
                    .collect::<Vec<_>>()
                    .join("\n\n");
                let pending: Vec<PendingFact> = prepared.into_iter().flatten().collect();
                let (created, linked) = self
                    .persist_document(agent_id, &doc_id, original_text, pending)
                    .await?;
                report.facts_created = created;
                report.links_created = linked;
            }
            None => {
                for pending in prepared {
                    if pending.is_empty() {
                        continue;
                    }
                    let (created, linked) = self.persist_loose(agent_id, pending).await?;
                    report.facts_created += created;
                    report.links_created += linked;
                }
            }
        }

        tracing::info!(
            agent = agent_id,
            facts = report.facts_created,
            links = report.links_created,
            failed = report.items_failed,
            "ingest finished"
        );
        Ok(report)
    }

    /// Persist already-formed opinion statements, bypassing extraction.
    ///
    /// Used by the reasoner for the opinions a think call produced. Dedup
    /// still applies, so restating an existing opinion creates nothing.
    pub async fn ingest_opinions(
        &self,
        agent_id: &str,
        opinions: Vec<String>,
    ) -> Result<IngestReport> {
        let mut report = IngestReport {
            items_count: opinions.len() as u32,
            ..Default::default()
        };
        for opinion in opinions {
            let text = opinion.trim().to_string();
            if text.is_empty() {
                continue;
            }
            let embedding = match self.embed_batch_retry(vec![text.clone()]).await {
                Ok(mut e) => e.remove(0),
                Err(e) => {
                    tracing::warn!(agent = agent_id, "skipping opinion: {e}");
                    report.items_failed += 1;
                    continue;
                }
            };
            let pending = vec![PendingFact {
                text,
                fact_type: FactType::Opinion,
                event_date: None,
                entities: Vec::new(),
                context: None,
                embedding,
            }];
            let (created, linked) = self.persist_loose(agent_id, pending).await?;
            report.facts_created += created;
            report.links_created += linked;
        }
        Ok(report)
    }

    /// Extract and embed one item's facts.
    async fn prepare_item(&self, item: &IngestItem) -> Result<Vec<PendingFact>> {
        let drafts = self.extract_item(item).await?;
        if drafts.is_empty() {
            return Ok(Vec::new());
        }
        let texts: Vec<String> = drafts.iter().map(|d| d.text.clone()).collect();
        let embeddings = self.embed_batch_retry(texts).await?;

        Ok(drafts
            .into_iter()
            .zip(embeddings)
            .map(|(draft, embedding)| {
                let ExtractedFact {
                    text,
                    fact_type,
                    event_date,
                    entities,
                } = draft;
                PendingFact {
                    text,
                    fact_type,
                    event_date: event_date.or_else(|| item.event_date.clone()),
                    entities,
                    context: item.context.clone(),
                    embedding,
                }
            })
            .collect())
    }

    async fn extract_item(&self, item: &IngestItem) -> Result<Vec<ExtractedFact>> {
        let prompt = extract::build_extraction_prompt(&item.content, item.context.as_deref());
        let response = match self.chat.complete(None, &prompt).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!("extraction call failed, retrying: {e}");
                tokio::time::sleep(RETRY_BACKOFF).await;
                self.chat
                    .complete(None, &prompt)
                    .await
                    .map_err(|e| MemoryError::ExtractionFailed {
                        detail: e.to_string(),
                    })?
            }
        };
        Ok(extract::parse_extraction_response(&response))
    }

    async fn embed_batch_retry(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        let run = |texts: Vec<String>, embedder: Arc<dyn EmbeddingBackend>| {
            task::spawn_blocking(move || {
                let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
                embedder.embed_batch(&refs)
            })
        };
        match run(texts.clone(), self.embedder.clone()).await? {
            Ok(embeddings) => Ok(embeddings),
            Err(e) => {
                tracing::warn!("embedding failed, retrying: {e}");
                tokio::time::sleep(RETRY_BACKOFF).await;
                run(texts, self.embedder.clone())
                    .await?
                    .map_err(|e| MemoryError::EmbeddingFailed {
                        detail: e.to_string(),
                    })
            }
        }
    }

    async fn persist_loose(
        &self,
        agent_id: &str,
        pending: Vec<PendingFact>,
    ) -> Result<(u32, u32)> {
        let conn = self.pool.acquire().await?;
        let agent = agent_id.to_string();
        let cfg = self.cfg.clone();
        task::spawn_blocking(move || {
            let mut conn = conn;
            persist_with_retry(&mut conn, &agent, &pending, None, &cfg)
        })
        .await?
    }

    async fn persist_document(
        &self,
        agent_id: &str,
        document_id: &str,
        original_text: String,
        pending: Vec<PendingFact>,
    ) -> Result<(u32, u32)> {
        let lock = self.document_lock(agent_id, document_id).await;
        let _guard = lock.lock().await;

        let conn = self.pool.acquire().await?;
        let agent = agent_id.to_string();
        let doc = document_id.to_string();
        let cfg = self.cfg.clone();
        task::spawn_blocking(move || {
            let mut conn = conn;
            persist_with_retry(
                &mut conn,
                &agent,
                &pending,
                Some((&doc, &original_text)),
                &cfg,
            )
        })
        .await?
        .map_err(|e| {
            if e.is_retryable() {
                MemoryError::DocumentUpsertConflict {
                    document_id: document_id.to_string(),
                }
            } else {
                e
            }
        })
    }

    async fn document_lock(&self, agent_id: &str, document_id: &str) -> Arc<Mutex<()>> {
        let mut registry = self.doc_locks.lock().await;
        registry
            .entry((agent_id.to_string(), document_id.to_string()))
            .or_default()
            .clone()
    }
}

fn persist_with_retry(
    conn: &mut Connection,
    agent_id: &str,
    pending: &[PendingFact],
    document: Option<(&str, &str)>,
    cfg: &IngestionConfig,
) -> Result<(u32, u32)> {
    match persist_batch(conn, agent_id, pending, document, cfg) {
        Err(e) if e.is_retryable() => {
            tracing::warn!("persist failed, retrying once: {e}");
            std::thread::sleep(Duration::from_millis(50));
            persist_batch(conn, agent_id, pending, document, cfg)
        }
        other => other,
    }
}

/// One transactional persist: optional document replace, per-fact dedup,
/// inserts, link drafting. Returns `(facts_created, links_created)`.
fn persist_batch(
    conn: &mut Connection,
    agent_id: &str,
    pending: &[PendingFact],
    document: Option<(&str, &str)>,
    cfg: &IngestionConfig,
) -> Result<(u32, u32)> {
    let tx = conn.transaction()?;
    crate::memory::agents::ensure_agent(&tx, agent_id)?;

    if let Some((doc_id, original_text)) = document {
        replace_document(&tx, agent_id, doc_id, original_text)?;
    }

    let now = chrono::Utc::now().to_rfc3339();
    let mut facts_created = 0u32;
    let mut new_nodes: Vec<FactNode> = Vec::new();
    let mut semantic_pairs: Vec<(String, String, f64)> = Vec::new();
    // Neighbor facts seen along the way double as link partners.
    let mut partners: HashMap<String, FactNode> = HashMap::new();

    for fact in pending {
        let candidates = nearest_same_type(&tx, agent_id, fact.fact_type, &fact.embedding)?;
        let dedup_candidates: Vec<DedupCandidate> = candidates
            .iter()
            .map(|(f, similarity)| DedupCandidate {
                id: f.id.clone(),
                text: f.text.clone(),
                created_at: f.created_at.clone(),
                similarity: *similarity,
            })
            .collect();
        for (f, _) in &candidates {
            partners.entry(f.id.clone()).or_insert_with(|| fact_node(f));
        }

        match dedup::decide(
            &fact.text,
            &dedup_candidates,
            cfg.dedup_threshold,
            cfg.related_threshold,
        ) {
            DedupDecision::Discard { duplicate_of } => {
                tracing::debug!(duplicate_of, "discarding verbatim duplicate");
            }
            DedupDecision::MergeInto { fact_id } => {
                tracing::debug!(into = fact_id, "merging near-duplicate");
                tx.execute(
                    "UPDATE facts SET updated_at = ?1 WHERE id = ?2",
                    params![now, fact_id],
                )?;
            }
            DedupDecision::Keep { related } => {
                let id = uuid::Uuid::now_v7().to_string();
                tx.execute(
                    "INSERT INTO facts (id, agent_id, document_id, fact_type, text, context, \
                     event_date, entities, created_at, updated_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)",
                    params![
                        id,
                        agent_id,
                        document.map(|(doc_id, _)| doc_id),
                        fact.fact_type.as_str(),
                        fact.text,
                        fact.context,
                        fact.event_date,
                        serde_json::to_string(&fact.entities)?,
                        now,
                    ],
                )?;
                tx.execute(
                    "INSERT INTO facts_vec (fact_id, embedding) VALUES (?1, ?2)",
                    params![id, embedding_to_bytes(&fact.embedding)],
                )?;
                facts_created += 1;

                semantic_pairs.extend(
                    related
                        .into_iter()
                        .map(|(partner, similarity)| (id.clone(), partner, similarity)),
                );
                new_nodes.push(FactNode::new(
                    id,
                    fact.event_date.as_deref().and_then(parse_flexible_date),
                    fact.entities.iter().map(|e| e.name.clone()),
                ));
            }
        }
    }

    if new_nodes.iter().any(|n| n.event_date.is_some()) {
        collect_temporal_partners(&tx, agent_id, &new_nodes, cfg, &mut partners)?;
    }
    let new_ids: Vec<&str> = new_nodes.iter().map(|n| n.id.as_str()).collect();
    let existing: Vec<FactNode> = partners
        .into_values()
        .filter(|n| !new_ids.contains(&n.id.as_str()))
        .collect();

    let mut links_created = 0u32;
    for draft in links::build_links(
        &new_nodes,
        &existing,
        &semantic_pairs,
        cfg.temporal_window_days,
    ) {
        links_created += tx.execute(
            "INSERT OR IGNORE INTO links (id, agent_id, src_id, dst_id, kind, weight, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                uuid::Uuid::now_v7().to_string(),
                agent_id,
                draft.src_id,
                draft.dst_id,
                draft.kind.as_str(),
                draft.weight,
                now,
            ],
        )? as u32;
    }

    if let Some((doc_id, _)) = document {
        tx.execute(
            "UPDATE documents SET fact_count = \
             (SELECT COUNT(*) FROM facts WHERE agent_id = ?1 AND document_id = ?2) \
             WHERE agent_id = ?1 AND id = ?2",
            params![agent_id, doc_id],
        )?;
    }

    tx.commit()?;
    Ok((facts_created, links_created))
}

/// Delete the document's previous facts and upsert its record.
fn replace_document(
    tx: &Transaction<'_>,
    agent_id: &str,
    doc_id: &str,
    original_text: &str,
) -> Result<()> {
    let mut stmt =
        tx.prepare("SELECT id FROM facts WHERE agent_id = ?1 AND document_id = ?2")?;
    let old_ids = stmt
        .query_map(params![agent_id, doc_id], |row| row.get::<_, String>(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    drop(stmt);

    for chunk in old_ids.chunks(400) {
        let placeholders = (1..=chunk.len())
            .map(|i| format!("?{i}"))
            .collect::<Vec<_>>()
            .join(", ");
        tx.execute(
            &format!("DELETE FROM facts_vec WHERE fact_id IN ({placeholders})"),
            params_from_iter(chunk.iter()),
        )?;
    }
    // Links cascade with the facts.
    tx.execute(
        "DELETE FROM facts WHERE agent_id = ?1 AND document_id = ?2",
        params![agent_id, doc_id],
    )?;

    let now = chrono::Utc::now().to_rfc3339();
    tx.execute(
        "INSERT INTO documents (id, agent_id, original_text, content_hash, fact_count, \
         created_at, updated_at) VALUES (?1, ?2, ?3, ?4, 0, ?5, ?5) \
         ON CONFLICT(agent_id, id) DO UPDATE SET original_text = excluded.original_text, \
         content_hash = excluded.content_hash, updated_at = excluded.updated_at",
        params![doc_id, agent_id, original_text, content_hash(original_text), now],
    )?;
    Ok(())
}

/// Nearest stored facts of the same agent and type, with cosine similarity.
fn nearest_same_type(
    conn: &Connection,
    agent_id: &str,
    fact_type: FactType,
    embedding: &[f32],
) -> Result<Vec<(crate::memory::types::Fact, f64)>> {
    // Over-fetch: the KNN is store-wide and filtering happens after.
    let mut stmt = conn.prepare(
        "SELECT fact_id, distance FROM facts_vec WHERE embedding MATCH ?1 \
         ORDER BY distance LIMIT ?2",
    )?;
    let neighbors = stmt
        .query_map(
            params![embedding_to_bytes(embedding), (DEDUP_POOL * 4) as i64],
            |row| Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?)),
        )?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let ids: Vec<String> = neighbors.iter().map(|(id, _)| id.clone()).collect();
    let by_id: HashMap<String, crate::memory::types::Fact> =
        facts::fetch_facts_by_ids(conn, &ids)?
            .into_iter()
            .map(|f| (f.id.clone(), f))
            .collect();

    let mut out = Vec::new();
    for (id, distance) in neighbors {
        if out.len() >= DEDUP_POOL {
            break;
        }
        let Some(fact) = by_id.get(&id) else { continue };
        if fact.agent_id == agent_id && fact.fact_type == fact_type {
            out.push((fact.clone(), l2_to_cosine(distance)));
        }
    }
    Ok(out)
}

fn fact_node(fact: &crate::memory::types::Fact) -> FactNode {
    FactNode::new(
        fact.id.clone(),
        fact.event_date.as_deref().and_then(parse_flexible_date),
        fact.entities.iter().map(|e| e.name.clone()),
    )
}

/// Pull the agent's dated facts into the partner pool so temporal links can
/// reach facts the KNN never surfaced.
fn collect_temporal_partners(
    conn: &Connection,
    agent_id: &str,
    new_nodes: &[FactNode],
    cfg: &IngestionConfig,
    partners: &mut HashMap<String, FactNode>,
) -> Result<()> {
    let mut stmt = conn.prepare(
        "SELECT id, event_date, entities FROM facts \
         WHERE agent_id = ?1 AND event_date IS NOT NULL \
         ORDER BY created_at DESC LIMIT ?2",
    )?;
    let rows = stmt
        .query_map(params![agent_id, TEMPORAL_SCAN_LIMIT as i64], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let window = chrono::Duration::days(cfg.temporal_window_days);
    for (id, date_str, entities_json) in rows {
        if partners.contains_key(&id) {
            continue;
        }
        let Some(date) = parse_flexible_date(&date_str) else {
            continue;
        };
        let in_window = new_nodes.iter().any(|n| {
            n.event_date
                .map(|nd| (nd - date).abs() <= window)
                .unwrap_or(false)
        });
        if in_window {
            let entities: Vec<EntityRef> = entities_json
                .as_deref()
                .and_then(|json| serde_json::from_str(json).ok())
                .unwrap_or_default();
            partners.insert(
                id.clone(),
                FactNode::new(id, Some(date), entities.into_iter().map(|e| e.name)),
            );
        }
    }
    Ok(())
}
