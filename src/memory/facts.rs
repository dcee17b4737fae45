//! Direct fact and document reads, plus fact deletion.
//!
//! These are the plain SQL accessors behind the CLI, the reasoner's identity
//! gathering, and tests. Retrieval proper lives in [`super::retrieve`].

use rusqlite::{params, params_from_iter, Connection, OptionalExtension};

use crate::error::{MemoryError, Result};
use crate::memory::types::{Document, Fact, FactType};

const FACT_COLUMNS: &str = "id, agent_id, document_id, fact_type, text, context, event_date, \
                            entities, created_at, updated_at";

/// Filters for [`list_facts`].
#[derive(Debug, Clone, Default)]
pub struct FactFilter {
    pub fact_type: Option<FactType>,
    /// Case-insensitive substring match on the fact text.
    pub text_contains: Option<String>,
    pub limit: u32,
    pub offset: u32,
}

pub(crate) fn row_to_fact(row: &rusqlite::Row<'_>) -> rusqlite::Result<Fact> {
    let fact_type: String = row.get(3)?;
    let entities_json: Option<String> = row.get(7)?;
    Ok(Fact {
        id: row.get(0)?,
        agent_id: row.get(1)?,
        document_id: row.get(2)?,
        fact_type: fact_type.parse().unwrap_or(FactType::World),
        text: row.get(4)?,
        context: row.get(5)?,
        event_date: row.get(6)?,
        entities: entities_json
            .as_deref()
            .and_then(|json| serde_json::from_str(json).ok())
            .unwrap_or_default(),
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

/// Fetch one fact, scoped to its agent.
pub fn get_fact(conn: &Connection, agent_id: &str, fact_id: &str) -> Result<Fact> {
    conn.query_row(
        &format!("SELECT {FACT_COLUMNS} FROM facts WHERE id = ?1 AND agent_id = ?2"),
        params![fact_id, agent_id],
        row_to_fact,
    )
    .optional()?
    .ok_or_else(|| MemoryError::NotFound {
        kind: "fact",
        id: fact_id.to_string(),
    })
}

/// List an agent's facts, newest first, with the unpaged total.
pub fn list_facts(
    conn: &Connection,
    agent_id: &str,
    filter: &FactFilter,
) -> Result<(Vec<Fact>, u32)> {
    let mut where_clause = String::from("agent_id = ?1");
    let mut args: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(agent_id.to_string())];

    if let Some(ft) = filter.fact_type {
        args.push(Box::new(ft.as_str().to_string()));
        where_clause.push_str(&format!(" AND fact_type = ?{}", args.len()));
    }
    if let Some(needle) = filter.text_contains.as_deref().filter(|s| !s.is_empty()) {
        args.push(Box::new(format!("%{}%", needle.to_lowercase())));
        where_clause.push_str(&format!(" AND lower(text) LIKE ?{}", args.len()));
    }

    let total: u32 = conn.query_row(
        &format!("SELECT COUNT(*) FROM facts WHERE {where_clause}"),
        params_from_iter(args.iter().map(|a| a.as_ref())),
        |row| row.get(0),
    )?;

    let limit = if filter.limit == 0 { 50 } else { filter.limit };
    let sql = format!(
        "SELECT {FACT_COLUMNS} FROM facts WHERE {where_clause} \
         ORDER BY created_at DESC, id DESC LIMIT ?{} OFFSET ?{}",
        args.len() + 1,
        args.len() + 2
    );
    args.push(Box::new(limit));
    args.push(Box::new(filter.offset));

    let mut stmt = conn.prepare(&sql)?;
    let facts = stmt
        .query_map(params_from_iter(args.iter().map(|a| a.as_ref())), row_to_fact)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok((facts, total))
}

/// Fetch facts by id, in no particular order. Ids not present are skipped.
pub fn fetch_facts_by_ids(conn: &Connection, ids: &[String]) -> Result<Vec<Fact>> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let placeholders = (1..=ids.len())
        .map(|i| format!("?{i}"))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!("SELECT {FACT_COLUMNS} FROM facts WHERE id IN ({placeholders})");
    let mut stmt = conn.prepare(&sql)?;
    let facts = stmt
        .query_map(params_from_iter(ids.iter()), row_to_fact)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(facts)
}

/// Delete a fact, its vector row, and (via foreign keys) its links.
///
/// Decrements the owning document's fact count when there is one.
pub fn delete_fact(conn: &mut Connection, agent_id: &str, fact_id: &str) -> Result<()> {
    let tx = conn.transaction()?;

    let document_id: Option<Option<String>> = tx
        .query_row(
            "SELECT document_id FROM facts WHERE id = ?1 AND agent_id = ?2",
            params![fact_id, agent_id],
            |row| row.get(0),
        )
        .optional()?;
    let Some(document_id) = document_id else {
        return Err(MemoryError::NotFound {
            kind: "fact",
            id: fact_id.to_string(),
        });
    };

    // The vec0 virtual table has no foreign keys; clear it by hand.
    tx.execute("DELETE FROM facts_vec WHERE fact_id = ?1", params![fact_id])?;
    tx.execute("DELETE FROM facts WHERE id = ?1", params![fact_id])?;
    if let Some(doc_id) = document_id {
        tx.execute(
            "UPDATE documents SET fact_count = MAX(fact_count - 1, 0), updated_at = ?1 \
             WHERE agent_id = ?2 AND id = ?3",
            params![chrono::Utc::now().to_rfc3339(), agent_id, doc_id],
        )?;
    }

    tx.commit()?;
    Ok(())
}

fn row_to_document(row: &rusqlite::Row<'_>) -> rusqlite::Result<Document> {
    Ok(Document {
        id: row.get(0)?,
        agent_id: row.get(1)?,
        original_text: row.get(2)?,
        content_hash: row.get(3)?,
        fact_count: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

/// Fetch one document, scoped to its agent.
pub fn get_document(conn: &Connection, agent_id: &str, document_id: &str) -> Result<Document> {
    conn.query_row(
        "SELECT id, agent_id, original_text, content_hash, fact_count, created_at, updated_at \
         FROM documents WHERE agent_id = ?1 AND id = ?2",
        params![agent_id, document_id],
        row_to_document,
    )
    .optional()?
    .ok_or_else(|| MemoryError::NotFound {
        kind: "document",
        id: document_id.to_string(),
    })
}

/// List an agent's documents, most recently updated first.
pub fn list_documents(
    conn: &Connection,
    agent_id: &str,
    limit: u32,
    offset: u32,
) -> Result<Vec<Document>> {
    let limit = if limit == 0 { 50 } else { limit };
    let mut stmt = conn.prepare(
        "SELECT id, agent_id, original_text, content_hash, fact_count, created_at, updated_at \
         FROM documents WHERE agent_id = ?1 ORDER BY updated_at DESC LIMIT ?2 OFFSET ?3",
    )?;
    let docs = stmt
        .query_map(params![agent_id, limit, offset], row_to_document)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(docs)
}
